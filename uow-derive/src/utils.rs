//! Utility functions for code generation

/// Convert string to snake_case
pub fn snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            result.push('_');
        }
        result.extend(c.to_lowercase());
    }
    result
}

/// Field name as written in the struct, without a raw-identifier prefix
pub fn field_name(ident: &syn::Ident) -> String {
    let name = ident.to_string();
    name.strip_prefix("r#").map(str::to_string).unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("OrderLine"), "order_line");
        assert_eq!(snake_case("order_line"), "order_line");
        assert_eq!(snake_case("Widget"), "widget");
    }

    #[test]
    fn test_field_name_strips_raw_prefix() {
        let ident: syn::Ident = syn::parse_str("r#type").unwrap();
        assert_eq!(field_name(&ident), "type");
    }
}
