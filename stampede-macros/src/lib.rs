use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{ItemFn, ReturnType};

/// Proc macro to denote a Scenario
///
/// Turns an `async fn` taking no arguments and returning `Result<R, E>` into a constructor for a
/// `Scenario<R>`. The request body is kept in a hidden sibling function; the generated function
/// only wires it up, so checks and pacing can be chained on the result.
///
/// The response type `R` should implement `Status` so non-2xx responses are recorded as failed
/// requests.
///
/// # Example
/// ```ignore
/// use stampede::prelude::*;
///
/// #[scenario]
/// async fn canary() -> Result<reqwest::Response, reqwest::Error> {
///     reqwest::get("http://127.0.0.1:65508").await
/// }
///
/// let scenario = canary().check("status is 200", |r| r.status() == 200);
/// ```
#[proc_macro_attribute]
pub fn scenario(attr: TokenStream, item: TokenStream) -> TokenStream {
    scenario_internal(attr.into(), item.into())
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn scenario_internal(_attr: TokenStream2, item: TokenStream2) -> syn::Result<TokenStream2> {
    let input = syn::parse2::<ItemFn>(item)?;

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;

    if sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            sig.fn_token,
            "#[scenario] only works on async functions",
        ));
    }
    if !sig.inputs.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.inputs,
            "#[scenario] functions cannot take arguments",
        ));
    }
    let ret = match &sig.output {
        ReturnType::Type(_, ty) => ty.clone(),
        ReturnType::Default => {
            return Err(syn::Error::new_spanned(
                &sig,
                "#[scenario] functions must return a `Result<R, E>`",
            ))
        }
    };

    let scen_name = sig.ident.clone();
    let new_name = format_ident!("__stampede_{}", scen_name);
    let mut new_sig = sig.clone();
    new_sig.ident = new_name.clone();

    Ok(quote! {
        #(#attrs)*
        #vis fn #scen_name() -> ::stampede::Scenario<<#ret as ::stampede::scenario::ScenarioOutput>::Response> {
            ::stampede::Scenario::new(stringify!(#scen_name), #new_name)
        }

        #[doc(hidden)]
        #new_sig #block
    })
}
