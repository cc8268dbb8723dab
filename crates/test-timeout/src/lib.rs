//! Test attributes that fail a test which runs longer than a deadline.
//!
//! `#[timeout(secs)]` wraps a synchronous test; `#[tokio_timeout_test(secs)]`
//! wraps an async one in a current-thread runtime. The body runs on a
//! watchdog thread so a deadlocked test reports "test timed out" instead of
//! hanging the whole suite.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

fn parse_timeout(attr: TokenStream) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_TIMEOUT_SECS);
    }
    let lit: LitInt = syn::parse(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
    }
    Ok(secs)
}

fn path_is(attr: &Attribute, expected: &[&str]) -> bool {
    let segments = &attr.path().segments;
    segments.len() == expected.len()
        && segments
            .iter()
            .zip(expected)
            .all(|(segment, name)| segment.ident == name)
}

/// Runs `body` on a spawned thread and waits at most `secs` for it.
fn watchdog(secs: u64, body: TokenStream2) -> TokenStream2 {
    quote! {
        let __deadline = ::std::time::Duration::from_secs(#secs);
        let (__tx, __rx) = ::std::sync::mpsc::channel();
        ::std::thread::spawn(move || {
            let outcome = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| { #body }));
            let _ = __tx.send(outcome);
        });
        match __rx.recv_timeout(__deadline) {
            Ok(Ok(())) => {}
            Ok(Err(payload)) => ::std::panic::resume_unwind(payload),
            Err(::std::sync::mpsc::RecvTimeoutError::Timeout) => {
                panic!("test timed out after {}s", #secs)
            }
            Err(::std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                panic!("test thread exited without reporting")
            }
        }
    }
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_timeout(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "use tokio_timeout_test for async test functions",
        )
        .to_compile_error()
        .into();
    }

    let attrs = attrs.into_iter().filter(|attr| !path_is(attr, &["test"]));
    let body = watchdog(secs, quote! { #block });

    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #body
        }
    }
    .into()
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_timeout(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test expects an async function",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let attrs = attrs
        .into_iter()
        .filter(|attr| !path_is(attr, &["tokio", "test"]) && !path_is(attr, &["test"]));
    let body = watchdog(
        secs,
        quote! {
            let runtime = ::tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build tokio runtime");
            runtime.block_on(async move #block);
        },
    );

    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #body
        }
    }
    .into()
}
