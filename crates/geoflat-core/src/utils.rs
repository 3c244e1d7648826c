//! Naming and SQL text helpers shared by the flattening and export stages.
//!
//! Legacy flat vector formats impose their own naming rules: attribute names
//! are limited to ten bytes and file stems must be safe on every
//! filesystem. These helpers apply those rules and quote identifiers and
//! literals for the generated SQL.

/// Maximum attribute (field) name length in bytes of the legacy flat vector format.
pub const MAX_FIELD_NAME_LEN: usize = 10;

/// Longest prefix of `name` that fits in `max_bytes` without splitting a
/// UTF-8 character.
#[must_use]
pub fn truncate_to_bytes(name: &str, max_bytes: usize) -> &str {
    if name.len() <= max_bytes {
        return name;
    }
    let mut end = max_bytes;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Truncate a column name to the legacy attribute-name limit.
///
/// The limit counts encoded bytes, so names with multi-byte characters keep
/// fewer characters. A character is never split.
///
/// # Examples
///
/// ```
/// use geoflat_core::utils::truncate_field_name;
///
/// assert_eq!(truncate_field_name("height"), "height");
/// assert_eq!(truncate_field_name("elevation_meters"), "elevation_");
/// assert_eq!(truncate_field_name("événement_date"), "événemen");
/// ```
#[must_use]
pub fn truncate_field_name(name: &str) -> String {
    truncate_to_bytes(name, MAX_FIELD_NAME_LEN).to_string()
}

/// Quote an SQL identifier, doubling embedded double quotes.
///
/// # Examples
///
/// ```
/// use geoflat_core::utils::quote_identifier;
///
/// assert_eq!(quote_identifier("names"), "\"names\"");
/// ```
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote an SQL string literal, doubling embedded single quotes.
///
/// # Examples
///
/// ```
/// use geoflat_core::utils::quote_literal;
///
/// assert_eq!(quote_literal("O'Hare"), "'O''Hare'");
/// ```
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Turn a display name into a file stem.
///
/// Spaces become underscores, as do characters that are reserved on common
/// filesystems.
///
/// # Examples
///
/// ```
/// use geoflat_core::utils::sanitize_file_stem;
///
/// assert_eq!(sanitize_file_stem("Places - 2024-07-22.0 - POINT"), "Places_-_2024-07-22.0_-_POINT");
/// ```
#[must_use]
pub fn sanitize_file_stem(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_name_unchanged() {
        assert_eq!(truncate_field_name("id"), "id");
        assert_eq!(truncate_field_name("confidence"), "confidence");
    }

    #[test]
    fn test_truncate_long_name() {
        assert_eq!(truncate_field_name("elevation_feetxx"), "elevation_");
        assert_eq!(truncate_field_name("confidence_score"), "confidence");
    }

    #[test]
    fn test_truncate_counts_bytes_on_char_boundary() {
        let name = truncate_field_name("événement_date");
        assert_eq!(name, "événemen");
        assert_eq!(name.len(), 10);

        // "日本語の名前" is 18 bytes; three 3-byte characters fit.
        assert_eq!(truncate_field_name("日本語の名前"), "日本語");
    }

    #[test]
    fn test_truncate_to_bytes_backs_off_to_boundary() {
        assert_eq!(truncate_to_bytes("aé", 2), "a");
        assert_eq!(truncate_to_bytes("aé", 3), "aé");
        assert_eq!(truncate_to_bytes("abc", 0), "");
    }

    #[test]
    fn test_quote_identifier_escapes() {
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_quote_literal_paths() {
        assert_eq!(
            quote_literal("/tmp/out/Places_-_x_-_POINT.shp"),
            "'/tmp/out/Places_-_x_-_POINT.shp'"
        );
    }

    #[test]
    fn test_sanitize_reserved_characters() {
        assert_eq!(sanitize_file_stem("a/b\\c:d*e"), "a_b_c_d_e");
        assert_eq!(sanitize_file_stem("  Land Use  "), "Land_Use");
    }
}
