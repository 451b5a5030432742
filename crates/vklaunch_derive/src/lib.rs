use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod push;

/// Derives `PushConstants` for a struct whose fields are `u32`, `f32` or `f64`.
///
/// Fields are emitted in declaration order. A field marked `#[push_constants(skip)]`
/// is left out of the packed range.
#[proc_macro_derive(PushConstants, attributes(push_constants))]
pub fn derive_push_constants(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let expanded = push::derive_push_constants(input);
    expanded.into()
}
