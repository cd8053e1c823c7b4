use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, ItemEnum, parse_macro_input};

extern crate proc_macro;

/// Derives the trait bundle shared by every data record that crosses a process or
/// observer boundary: serde in both directions, equality, `Debug` and `Clone`.
#[proc_macro_attribute]
pub fn record(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as DeriveInput);
    let expanded = quote! {
        #[derive(
            serde::Serialize,
            serde::Deserialize,
            std::cmp::PartialEq,
            std::fmt::Debug,
            std::clone::Clone
        )]
        #ast
    };

    TokenStream::from(expanded)
}

/// Turns an enum into a worker protocol message: a [`record`] that is serialized as an
/// internally tagged JSON object (`{"type": "ready"}`).
#[proc_macro_attribute]
pub fn message(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as ItemEnum);
    let expanded = quote! {
        #[derive(
            serde::Serialize,
            serde::Deserialize,
            std::cmp::PartialEq,
            std::fmt::Debug,
            std::clone::Clone
        )]
        #[serde(tag = "type", rename_all = "snake_case")]
        #ast
    };

    TokenStream::from(expanded)
}
