//! Attribute parsing utilities

use syn::{Attribute, ExprLit, Field, Lit, Type};

/// Extract table name from struct attributes
pub fn extract_table_name(attrs: &[Attribute]) -> Option<String> {
    extract_str(attrs, "table_name")
}

/// Check if the struct or field carries a marker attribute
pub fn has_marker(attrs: &[Attribute], attr_name: &str) -> bool {
    attrs.iter().any(|attr| attr.path().is_ident(attr_name))
}

fn extract_str(attrs: &[Attribute], name: &str) -> Option<String> {
    for attr in attrs {
        if attr.path().is_ident(name) {
            if let Ok(meta) = attr.meta.require_name_value() {
                if let syn::Expr::Lit(ExprLit {
                    lit: Lit::Str(s),
                    ..
                }) = &meta.value {
                    return Some(s.value());
                }
            }
        }
    }
    None
}

/// Column-related attributes of one field
#[derive(Default)]
pub struct ColumnAttributes {
    pub is_primary_key: bool,
    pub is_auto_increment: bool,
    pub column_name: Option<String>,
    pub is_skipped: bool,
    pub is_navigation: bool,
}

/// Parse all column attributes from a field
pub fn parse_column_attributes(field: &Field) -> ColumnAttributes {
    ColumnAttributes {
        is_primary_key: has_marker(&field.attrs, "primary_key"),
        is_auto_increment: has_marker(&field.attrs, "auto_increment"),
        column_name: extract_str(&field.attrs, "column_name"),
        is_skipped: has_marker(&field.attrs, "skip_column"),
        is_navigation: has_marker(&field.attrs, "navigation"),
    }
}

/// Whether deserialization fills the field when a row does not carry it: `Option<T>`, or a
/// serde `default`/`skip` on the field or the struct
pub fn fills_missing(field: &Field, struct_attrs: &[Attribute]) -> bool {
    is_option(&field.ty)
        || serde_flags(&field.attrs, &["default", "skip", "skip_deserializing"])
        || serde_flags(struct_attrs, &["default"])
}

fn is_option(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "Option"),
        _ => false,
    }
}

fn serde_flags(attrs: &[Attribute], flags: &[&str]) -> bool {
    let mut found = false;
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("serde")) {
        let _ = attr.parse_nested_meta(|meta| {
            if flags.iter().any(|flag| meta.path.is_ident(flag)) {
                found = true;
            }
            if meta.input.peek(syn::Token![=]) {
                let _: syn::Expr = meta.value()?.parse()?;
            } else if meta.input.peek(syn::token::Paren) {
                let _content;
                syn::parenthesized!(_content in meta.input);
            }
            Ok(())
        });
    }
    found
}
