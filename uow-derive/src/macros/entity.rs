//! Derive macro for `Entity`
//!
//! Generates the `uow::Entity` implementation: table and column metadata, the key type and
//! extractor, the optional key stub, and the navigation walk used by `track_graph`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields};

use crate::attributes;
use crate::utils;

pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;

    let fields = match &input.data {
        Data::Struct(syn::DataStruct {
            fields: Fields::Named(fields),
            ..
        }) => &fields.named,
        _ => {
            return Err(syn::Error::new_spanned(
                struct_name,
                "Entity can only be derived for structs with named fields",
            ))
        }
    };

    let table_name = attributes::extract_table_name(&input.attrs)
        .unwrap_or_else(|| utils::snake_case(&struct_name.to_string()));
    let key_stub = attributes::has_marker(&input.attrs, "key_stub");

    let mut columns = Vec::new();
    let mut key_columns = Vec::new();
    let mut key_fields = Vec::new();
    let mut key_types = Vec::new();
    let mut navigations = Vec::new();
    let mut auto_increment = false;

    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let attrs = attributes::parse_column_attributes(field);

        if (attrs.is_navigation || attrs.is_skipped) && !attributes::fills_missing(field, &input.attrs) {
            return Err(syn::Error::new_spanned(
                ident,
                "rows never carry #[skip_column] or #[navigation] fields; add #[serde(default)] \
                 (or #[serde(skip)]) so loaded entities can be deserialized",
            ));
        }

        if attrs.is_navigation {
            if attrs.is_primary_key {
                return Err(syn::Error::new_spanned(
                    ident,
                    "a navigation field cannot be part of the primary key",
                ));
            }
            navigations.push(ident.clone());
            continue;
        }
        if attrs.is_skipped {
            continue;
        }

        let column = attrs
            .column_name
            .unwrap_or_else(|| utils::field_name(ident));
        if attrs.is_primary_key {
            key_columns.push(column.clone());
            key_fields.push(ident.clone());
            key_types.push(field.ty.clone());
            auto_increment |= attrs.is_auto_increment;
        } else if attrs.is_auto_increment {
            return Err(syn::Error::new_spanned(
                ident,
                "#[auto_increment] is only valid on a #[primary_key] field",
            ));
        }
        columns.push(column);
    }

    if key_fields.is_empty() {
        return Err(syn::Error::new_spanned(
            struct_name,
            "Entity requires at least one field with #[primary_key] attribute",
        ));
    }
    if auto_increment && key_fields.len() > 1 {
        return Err(syn::Error::new_spanned(
            struct_name,
            "#[auto_increment] is not supported on composite keys",
        ));
    }

    let (key_type, key_expr) = if key_fields.len() == 1 {
        let ty = &key_types[0];
        let field = &key_fields[0];
        (quote! { #ty }, quote! { ::std::clone::Clone::clone(&self.#field) })
    } else {
        (
            quote! { ( #(#key_types),* ) },
            quote! { ( #(::std::clone::Clone::clone(&self.#key_fields)),* ) },
        )
    };

    let key_accessor = if key_stub {
        let assign = if key_fields.len() == 1 {
            let field = &key_fields[0];
            quote! { entity.#field = key; }
        } else {
            let parts: Vec<syn::Ident> = (0..key_fields.len())
                .map(|i| quote::format_ident!("key_{}", i))
                .collect();
            quote! {
                let ( #(#parts),* ) = key;
                #( entity.#key_fields = #parts; )*
            }
        };
        quote! {
            fn key_accessor() -> ::std::option::Option<fn(Self::Key) -> Self> {
                let accessor: fn(Self::Key) -> Self = |key| {
                    let mut entity = <Self as ::std::default::Default>::default();
                    #assign
                    entity
                };
                ::std::option::Option::Some(accessor)
            }
        }
    } else {
        quote! {}
    };

    let visit_navigations = if navigations.is_empty() {
        quote! {}
    } else {
        quote! {
            fn visit_navigations(&self, walker: &mut ::uow::GraphWalker<'_>) {
                #( walker.visit(&self.#navigations); )*
            }
        }
    };

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::uow::Entity for #struct_name #ty_generics #where_clause {
            type Key = #key_type;

            const TABLE: &'static str = #table_name;
            const COLUMNS: &'static [&'static str] = &[ #(#columns),* ];
            const PRIMARY_KEY: ::uow::PrimaryKey = ::uow::PrimaryKey {
                columns: &[ #(#key_columns),* ],
                auto_increment: #auto_increment,
            };

            fn key(&self) -> Self::Key {
                #key_expr
            }

            #key_accessor

            #visit_navigations
        }
    })
}
