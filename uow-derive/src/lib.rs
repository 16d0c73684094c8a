//! Procedural macros for `uow`
//!
//! This crate provides the `Entity` derive. Use it through the re-export in `uow`.

mod attributes;
mod macros;
mod utils;

use proc_macro::TokenStream;

/// Derive macro for `uow::Entity`
///
/// Struct attributes:
/// - `#[table_name = "..."]` table name (defaults to the snake_case struct name)
/// - `#[key_stub]` generate a typed key accessor from `Default`, so delete-by-key does not
///   load the row
///
/// Field attributes:
/// - `#[primary_key]` part of the key (several fields form a composite key, in field order)
/// - `#[auto_increment]` the store generates this key on insert
/// - `#[column_name = "..."]` column name when it differs from the field name (must match the
///   serde name of the field)
/// - `#[skip_column]` not persisted
/// - `#[navigation]` related entities (`Vec<T>`, `Option<T>` or `Box<T>`), walked by
///   `track_graph` and never persisted
///
/// Loaded rows never contain skipped or navigation fields, so each one must be an `Option`
/// or carry `#[serde(default)]`, `#[serde(skip)]` or `#[serde(skip_deserializing)]` (a
/// struct-level `#[serde(default)]` also works). The derive rejects the struct otherwise.
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, Default, Serialize, Deserialize, Entity)]
/// #[table_name = "orders"]
/// #[key_stub]
/// pub struct Order {
///     #[primary_key]
///     #[auto_increment]
///     pub id: i64,
///     pub customer: String,
///     #[navigation]
///     #[serde(default)]
///     pub lines: Vec<OrderLine>,
/// }
/// ```
#[proc_macro_derive(
    Entity,
    attributes(table_name, key_stub, primary_key, auto_increment, column_name, skip_column, navigation)
)]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    macros::derive_entity(input)
}
