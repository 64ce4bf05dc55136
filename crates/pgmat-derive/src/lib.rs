//! Derive macros for pgmat
//!
//! Provides `#[derive(FromRow)]` and `#[derive(ToParams)]`.

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod attrs;
mod from_row;
mod to_params;

/// Derive `FromRow` trait for a struct.
///
/// # Example
///
/// ```ignore
/// use pgmat::FromRow;
///
/// #[derive(FromRow)]
/// struct User {
///     id: i64,
///     username: String,
///     #[orm(column = "email_address")]
///     email: Option<String>,
/// }
/// ```
///
/// # Attributes
///
/// - `#[orm(column = "name")]` - Map field to a different column name
/// - `#[orm(default)]` - Use `Default::default()` when the column is absent
/// - `#[orm(skip)]` - Never read; always `Default::default()`
/// - `#[orm(rename_all = "snake_case")]` on the struct - Rename every field
#[proc_macro_derive(FromRow, attributes(orm))]
pub fn derive_from_row(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    from_row::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

/// Derive `ToParams` for a struct: every field becomes a named parameter, in
/// declaration order.
///
/// Sequence fields (`Vec<T>`, arrays, sets) are expanded for `IN (@name)`;
/// `String` and `Vec<u8>` bind as single values.
///
/// # Example
///
/// ```ignore
/// use pgmat::ToParams;
///
/// #[derive(ToParams)]
/// struct Filter {
///     status: String,
///     ids: Vec<i64>,
///     #[orm(skip)]
///     page: u32,
/// }
/// ```
///
/// # Attributes
///
/// - `#[orm(rename = "name")]` - Bind under a different name
/// - `#[orm(skip)]` - Do not bind the field
/// - `#[orm(rename_all = "camelCase")]` on the struct - Rename every field
#[proc_macro_derive(ToParams, attributes(orm))]
pub fn derive_to_params(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    to_params::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
