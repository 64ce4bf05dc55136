//! FromRow derive macro implementation

use crate::attrs::{container_attrs, field_attrs, field_name, named_fields};
use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, Result};

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let container = container_attrs(&input.attrs)?;
    let fields = named_fields(&input, "FromRow")?;

    let mut field_extracts = Vec::with_capacity(fields.len());
    for field in fields {
        let ident = &field.ident;
        let attrs = field_attrs(field)?;
        if attrs.skip {
            field_extracts.push(quote! { #ident: ::core::default::Default::default() });
            continue;
        }
        let column_name = field_name(field, &attrs, &container);
        field_extracts.push(if attrs.default {
            quote! { #ident: row.try_get_or_default(#column_name)? }
        } else {
            quote! { #ident: row.try_get(#column_name)? }
        });
    }

    Ok(quote! {
        impl #impl_generics pgmat::FromRow for #name #ty_generics #where_clause {
            fn from_row(row: &pgmat::DataRow) -> pgmat::OrmResult<Self> {
                Ok(Self {
                    #(#field_extracts),*
                })
            }
        }
    })
}
