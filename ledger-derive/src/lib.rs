//! A derive macro for the `EventPayload` trait in the `ledger` crate.
use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitStr, Variant, parse_macro_input};

/// Derives the `EventPayload` trait for an enum.
///
/// The generated `event_type` method returns the variant's name. A variant
/// can publish under a different name with `#[event(rename = "...")]`, which
/// keeps stored event types stable when a variant is renamed in code.
#[proc_macro_derive(EventPayload, attributes(event))]
pub fn event_payload_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let variants = match &input.data {
        Data::Enum(data) => &data.variants,
        _ => {
            return syn::Error::new_spanned(
                name,
                "EventPayload derive macro can only be used on enums",
            )
            .to_compile_error()
            .into();
        }
    };

    let mut event_type_arms = Vec::with_capacity(variants.len());
    for variant in variants {
        let variant_name = &variant.ident;
        let fields = match &variant.fields {
            Fields::Named(_) => quote! { { .. } },
            Fields::Unnamed(_) => quote! { (..) },
            Fields::Unit => quote! {},
        };
        let event_type = match renamed(variant) {
            Ok(Some(rename)) => quote! { #rename },
            Ok(None) => quote! { stringify!(#variant_name) },
            Err(err) => return err.to_compile_error().into(),
        };
        event_type_arms.push(quote! {
            #name::#variant_name #fields => #event_type
        });
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        impl #impl_generics ::ledger::EventPayload for #name #ty_generics #where_clause {
            fn event_type(&self) -> &'static str {
                match self {
                    #(#event_type_arms),*
                }
            }
        }
    };

    TokenStream::from(expanded)
}

fn renamed(variant: &Variant) -> syn::Result<Option<LitStr>> {
    let mut rename = None;
    for attr in variant.attrs.iter().filter(|a| a.path().is_ident("event")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                rename = Some(meta.value()?.parse::<LitStr>()?);
                Ok(())
            } else {
                Err(meta.error("unsupported event attribute, expected `rename`"))
            }
        })?;
    }
    Ok(rename)
}
