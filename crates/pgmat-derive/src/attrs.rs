//! `#[orm(...)]` attribute parsing shared by the derives.

use heck::{ToLowerCamelCase, ToShoutySnakeCase, ToSnakeCase, ToUpperCamelCase};
use syn::punctuated::Punctuated;
use syn::{Attribute, Expr, ExprLit, Lit, Meta, Result, Token};

/// Case conversion applied to field names by `#[orm(rename_all = "...")]`.
#[derive(Clone, Copy)]
pub enum RenameRule {
    Lower,
    Upper,
    Snake,
    ScreamingSnake,
    Camel,
    Pascal,
}

impl RenameRule {
    fn parse(lit: &syn::LitStr) -> Result<Self> {
        Ok(match lit.value().as_str() {
            "lowercase" => Self::Lower,
            "UPPERCASE" => Self::Upper,
            "snake_case" => Self::Snake,
            "SCREAMING_SNAKE_CASE" => Self::ScreamingSnake,
            "camelCase" => Self::Camel,
            "PascalCase" => Self::Pascal,
            other => {
                return Err(syn::Error::new_spanned(
                    lit,
                    format!("unknown rename_all rule \"{other}\""),
                ));
            }
        })
    }

    pub fn apply(self, name: &str) -> String {
        match self {
            Self::Lower => name.to_lowercase(),
            Self::Upper => name.to_uppercase(),
            Self::Snake => name.to_snake_case(),
            Self::ScreamingSnake => name.to_shouty_snake_case(),
            Self::Camel => name.to_lower_camel_case(),
            Self::Pascal => name.to_upper_camel_case(),
        }
    }
}

#[derive(Default)]
pub struct ContainerAttrs {
    pub rename_all: Option<RenameRule>,
}

#[derive(Default)]
pub struct FieldAttrs {
    /// `column = "..."` or `rename = "..."`
    pub name: Option<String>,
    pub default: bool,
    pub skip: bool,
}

fn orm_metas(attrs: &[Attribute]) -> Result<Vec<Meta>> {
    let mut metas = Vec::new();
    for attr in attrs {
        if !attr.path().is_ident("orm") {
            continue;
        }
        let items = attr.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)?;
        metas.extend(items);
    }
    Ok(metas)
}

fn string_value(value: &Expr) -> Result<syn::LitStr> {
    match value {
        Expr::Lit(ExprLit {
            lit: Lit::Str(lit), ..
        }) => Ok(lit.clone()),
        other => Err(syn::Error::new_spanned(other, "expected a string literal")),
    }
}

pub fn container_attrs(attrs: &[Attribute]) -> Result<ContainerAttrs> {
    let mut out = ContainerAttrs::default();
    for meta in orm_metas(attrs)? {
        match &meta {
            Meta::NameValue(nv) if nv.path.is_ident("rename_all") => {
                out.rename_all = Some(RenameRule::parse(&string_value(&nv.value)?)?);
            }
            other => {
                return Err(syn::Error::new_spanned(other, "unknown orm container attribute"));
            }
        }
    }
    Ok(out)
}

pub fn field_attrs(field: &syn::Field) -> Result<FieldAttrs> {
    let mut out = FieldAttrs::default();
    for meta in orm_metas(&field.attrs)? {
        match &meta {
            Meta::NameValue(nv) if nv.path.is_ident("column") || nv.path.is_ident("rename") => {
                out.name = Some(string_value(&nv.value)?.value());
            }
            Meta::Path(path) if path.is_ident("default") => out.default = true,
            Meta::Path(path) if path.is_ident("skip") => out.skip = true,
            other => {
                return Err(syn::Error::new_spanned(other, "unknown orm field attribute"));
            }
        }
    }
    Ok(out)
}

/// Column / parameter name of a field: explicit name, else the field name
/// run through `rename_all`.
pub fn field_name(field: &syn::Field, attrs: &FieldAttrs, container: &ContainerAttrs) -> String {
    if let Some(name) = &attrs.name {
        return name.clone();
    }
    let ident = field
        .ident
        .as_ref()
        .map(|i| i.to_string())
        .unwrap_or_default();
    let ident = ident.strip_prefix("r#").unwrap_or(&ident).to_string();
    match container.rename_all {
        Some(rule) => rule.apply(&ident),
        None => ident,
    }
}

/// The named fields of a struct, or an error naming the derive.
pub fn named_fields<'a>(
    input: &'a syn::DeriveInput,
    derive: &str,
) -> Result<&'a Punctuated<syn::Field, Token![,]>> {
    match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(fields) => Ok(&fields.named),
            _ => Err(syn::Error::new_spanned(
                input,
                format!("{derive} can only be derived for structs with named fields"),
            )),
        },
        _ => Err(syn::Error::new_spanned(
            input,
            format!("{derive} can only be derived for structs"),
        )),
    }
}
