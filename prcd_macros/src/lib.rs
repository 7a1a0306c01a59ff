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

//! Procedural macros for prcd.

use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemStruct, LitStr, parse_macro_input};

/// Register an accelerator type as a driver template.
///
/// ```rust,ignore
/// #[accelerator_driver(name = "fir_drv", compatible = "sld,fir_vivado")]
/// #[derive(Debug, Default)]
/// pub struct FirAccelerator;
/// ```
///
/// generates `FirAccelerator::register_template()`, which registers a template called `fir_drv`
/// whose callbacks are those of `FirAccelerator::default()`. The type must implement
/// `Default` and `AcceleratorOps`.
#[proc_macro_attribute]
pub fn accelerator_driver(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut name: Option<LitStr> = None;
    let mut compatible: Option<LitStr> = None;
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("name") {
            name = Some(meta.value()?.parse()?);
            Ok(())
        } else if meta.path.is_ident("compatible") {
            compatible = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("expected `name` or `compatible`"))
        }
    });
    parse_macro_input!(attr with parser);

    let item = parse_macro_input!(item as ItemStruct);
    let Some(name) = name else {
        return syn::Error::new_spanned(&item.ident, "accelerator_driver requires `name = \"...\"`")
            .to_compile_error()
            .into();
    };
    let compatible = compatible.unwrap_or_else(|| LitStr::new("sld", name.span()));
    let ident = &item.ident;

    quote! {
        #item

        impl #ident {
            /// Register this accelerator's driver template.
            pub fn register_template() {
                crate::reconfig::tile_manager::register_template(#name, || {
                    crate::reconfig::tile_manager::DriverTemplate::new(
                        #name,
                        #compatible,
                        ::std::sync::Arc::new(<#ident as ::std::default::Default>::default()),
                    )
                });
            }
        }
    }
    .into()
}
