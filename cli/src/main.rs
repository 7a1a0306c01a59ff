// This file is part of prcd, an application to manage partial reconfiguration of FPGA tiles together with their accelerator drivers.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// prcd is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// prcd is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! Command-line client for the prcd daemon.
//!
//! Every subcommand issues one or more DBus calls to `com.canonical.prcd` and prints the
//! daemon's reply.

use clap::{Parser, Subcommand, arg, command};
use log::debug;

mod decouple;
mod load;
mod proxies;
mod status;

use crate::decouple::decoupler_handler;
use crate::load::{load_handler, reconfigure_handler};
use crate::status::{list_handler, status_handler};

#[derive(Parser, Debug)]
#[command(name = "prcd")]
#[command(bin_name = "prcd")]
#[command(about = "Manage partial reconfiguration of FPGA tiles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stage a bitstream file for a tile. An empty tile is loaded straight away.
    Load {
        /// Path to the partial bitstream
        file: String,
        #[arg(long)]
        tile: u32,
        /// Driver template to bind once the bitstream is running
        #[arg(long)]
        driver: String,
        /// Name to stage the bitstream under. Defaults to the file name without its extension
        #[arg(long)]
        name: Option<String>,
    },
    /// Switch a tile to one of its staged bitstreams
    Reconfigure {
        name: String,
        #[arg(long)]
        tile: u32,
    },
    /// Isolate a tile from the rest of the SoC
    Decouple {
        #[arg(long)]
        tile: i32,
    },
    /// Reconnect a tile to the rest of the SoC
    Couple {
        #[arg(long)]
        tile: i32,
    },
    /// Show the engine state and the state of one or every tile
    Status {
        #[arg(long)]
        tile: Option<u32>,
    },
    /// List the bitstreams staged for one or every tile, and the known drivers
    List {
        #[arg(long)]
        tile: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    debug!("parsed cli command with {cli:?}");
    let result = match &cli.command {
        Commands::Load {
            file,
            tile,
            driver,
            name,
        } => load_handler(file, *tile, driver, name).await,
        Commands::Reconfigure { name, tile } => reconfigure_handler(name, *tile).await,
        Commands::Decouple { tile } => decoupler_handler(*tile, true).await,
        Commands::Couple { tile } => decoupler_handler(*tile, false).await,
        Commands::Status { tile } => status_handler(*tile).await,
        Commands::List { tile } => list_handler(*tile).await,
    };
    match result {
        Ok(msg) => println!("{msg}"),
        Err(e) => eprintln!("{e}"),
    }
    Ok(())
}
