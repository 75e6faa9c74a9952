//! Attribute macros backing `#[core_async::test]` and `#[core_async::main]`.
//!
//! Both attributes turn an `async fn` into a synchronous function whose body
//! is driven by `core_async::runtime::block_on`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, EntryKind::Test)
}

#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand(attr, item, EntryKind::Main)
}

enum EntryKind {
    Test,
    Main,
}

fn expand(attr: TokenStream, item: TokenStream, kind: EntryKind) -> TokenStream {
    if !attr.is_empty() {
        let tokens = TokenStream2::from(attr);
        return syn::Error::new_spanned(tokens, "core_async attribute macros take no arguments")
            .to_compile_error()
            .into();
    }

    let input = parse_macro_input!(item as ItemFn);

    if input.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            input.sig.fn_token,
            "core_async attribute macros require `async fn`",
        )
        .to_compile_error()
        .into();
    }

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;

    let mut sync_sig = sig;
    sync_sig.asyncness = None;

    let test_attr = match kind {
        EntryKind::Test => quote!(#[test]),
        EntryKind::Main => TokenStream2::new(),
    };

    quote! {
        #(#attrs)*
        #test_attr
        #vis #sync_sig {
            core_async::runtime::block_on(async move #block)
        }
    }
    .into()
}
