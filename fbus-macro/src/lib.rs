/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */
#![forbid(unsafe_code)]

//! FBus Macro Library
//!
//! Procedural macros for declaring bus messages and consumers.
//!
//! # Message Macro
//!
//! ```ignore
//! #[bus_message(command)]
//! pub struct Ping {
//!     pub from: String,
//! }
//!
//! #[bus_message(event, name = "orders.created")]
//! pub struct OrderCreated {
//!     pub id: u64,
//! }
//! ```
//!
//! # Consumer Macro
//!
//! ```ignore
//! #[bus_consumer(Ping, OrderCreated)]
//! pub struct PingConsumer;
//! ```

use proc_macro::TokenStream;

use quote::quote;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, DeriveInput, Expr, ExprLit, Lit, Meta, Path, Token};

fn has_derive(input: &DeriveInput, trait_name: &str) -> bool {
    input.attrs.iter().any(|attr| {
        if attr.path().is_ident("derive") {
            let mut found = false;
            let _ = attr.parse_nested_meta(|meta| {
                if meta
                    .path
                    .segments
                    .last()
                    .is_some_and(|segment| segment.ident == trait_name)
                {
                    found = true;
                }
                Ok(())
            });
            found
        } else {
            false
        }
    })
}

/// Options parsed from `#[bus_message(...)]`.
struct MessageConfig {
    /// `true` for `event`, `false` for `command` (the default).
    event: bool,
    /// Explicit wire name; the type identifier otherwise.
    name: Option<String>,
}

impl MessageConfig {
    fn parse(args: Punctuated<Meta, Token![,]>) -> syn::Result<Self> {
        let mut config = Self {
            event: false,
            name: None,
        };
        for meta in args {
            match meta {
                Meta::Path(path) if path.is_ident("command") => config.event = false,
                Meta::Path(path) if path.is_ident("event") => config.event = true,
                Meta::NameValue(nv) if nv.path.is_ident("name") => match nv.value {
                    Expr::Lit(ExprLit {
                        lit: Lit::Str(value),
                        ..
                    }) => config.name = Some(value.value()),
                    other => {
                        return Err(syn::Error::new_spanned(other, "expected a string literal"))
                    }
                },
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "expected `command`, `event` or `name = \"...\"`",
                    ))
                }
            }
        }
        Ok(config)
    }
}

/// Declares a type as a bus message.
///
/// Derives `Clone`, `Debug`, `Serialize` and `Deserialize` when they are not
/// already derived, and implements `fbus::BusMessage` with a message type name
/// taken from the type identifier (or `name = "..."`).
///
/// `command` (default) marks a directed message, `event` a broadcast one.
#[proc_macro_attribute]
pub fn bus_message(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr with Punctuated::<Meta, Token![,]>::parse_terminated);
    let config = match MessageConfig::parse(args) {
        Ok(config) => config,
        Err(err) => return err.to_compile_error().into(),
    };
    let input = parse_macro_input!(item as DeriveInput);

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let wire_name = config.name.unwrap_or_else(|| name.to_string());

    let mut derives = Vec::new();
    if !has_derive(&input, "Clone") {
        derives.push(quote! { Clone });
    }
    if !has_derive(&input, "Debug") {
        derives.push(quote! { Debug });
    }
    let mut needs_serde_crate = false;
    if !has_derive(&input, "Serialize") {
        derives.push(quote! { ::fbus::serde::Serialize });
        needs_serde_crate = true;
    }
    if !has_derive(&input, "Deserialize") {
        derives.push(quote! { ::fbus::serde::Deserialize });
        needs_serde_crate = true;
    }

    let derive_attr = if derives.is_empty() {
        quote! {}
    } else {
        quote! { #[derive(#(#derives),*)] }
    };
    let serde_attr = if needs_serde_crate {
        quote! { #[serde(crate = "::fbus::serde")] }
    } else {
        quote! {}
    };
    let kind = if config.event {
        quote! { ::fbus::MessageKind::Event }
    } else {
        quote! { ::fbus::MessageKind::Command }
    };

    let expanded = quote! {
        #derive_attr
        #serde_attr
        #input

        impl #impl_generics ::fbus::BusMessage for #name #ty_generics #where_clause {
            const KIND: ::fbus::MessageKind = #kind;

            fn message_type() -> ::fbus::MessageType {
                ::fbus::MessageType::from_static(#wire_name)
            }
        }
    };

    TokenStream::from(expanded)
}

/// Declares a consumer type and the message types it handles.
///
/// ```ignore
/// #[bus_consumer(FakeCommand, FakeEvent)]
/// pub struct FakeConsumer;
///
/// #[async_trait]
/// impl BusConsumer<FakeCommand> for FakeConsumer { /* ... */ }
/// ```
///
/// Implements `fbus::Consumer` so `BusBuilder::with_consumer::<FakeConsumer>()`
/// registers one binding per listed type. Derives `Default` unless already
/// derived or `no_default` is listed.
#[proc_macro_attribute]
pub fn bus_consumer(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr with Punctuated::<Path, Token![,]>::parse_terminated);
    let input = parse_macro_input!(item as DeriveInput);

    let mut no_default = false;
    let mut handled = Vec::new();
    for path in args {
        if path.is_ident("no_default") {
            no_default = true;
        } else {
            handled.push(path);
        }
    }

    if handled.is_empty() {
        return syn::Error::new_spanned(
            &input.ident,
            "bus_consumer needs at least one message type, e.g. #[bus_consumer(Ping)]",
        )
        .to_compile_error()
        .into();
    }

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let derive_attr = if no_default || has_derive(&input, "Default") {
        quote! {}
    } else {
        quote! { #[derive(Default)] }
    };

    let expanded = quote! {
        #derive_attr
        #input

        impl #impl_generics ::fbus::Consumer for #name #ty_generics #where_clause {
            fn bindings(bindings: &mut ::fbus::ConsumerBindings<Self>) {
                #( bindings.handle::<#handled>(); )*
            }
        }
    };

    TokenStream::from(expanded)
}
