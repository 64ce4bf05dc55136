//! ToParams derive macro implementation

use crate::attrs::{container_attrs, field_attrs, field_name, named_fields};
use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, Result};

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let container = container_attrs(&input.attrs)?;
    let fields = named_fields(&input, "ToParams")?;

    let mut entries = Vec::with_capacity(fields.len());
    for field in fields {
        let attrs = field_attrs(field)?;
        if attrs.skip {
            continue;
        }
        if attrs.default {
            return Err(syn::Error::new_spanned(
                field,
                "#[orm(default)] only applies to FromRow",
            ));
        }
        let ident = &field.ident;
        let param_name = field_name(field, &attrs, &container);
        entries.push(quote! {
            (
                ::std::string::String::from(#param_name),
                pgmat::ToParam::to_param(&self.#ident),
            )
        });
    }

    Ok(quote! {
        impl #impl_generics pgmat::ToParams for #name #ty_generics #where_clause {
            fn to_params(&self) -> ::std::vec::Vec<(::std::string::String, pgmat::ParamValue)> {
                ::std::vec![#(#entries),*]
            }
        }
    })
}
