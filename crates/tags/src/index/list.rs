//! Delimited list columns.
//!
//! The index tables store tag and product-id lists as comma-delimited
//! strings with a leading and trailing separator (`,a,b,c,`) so that
//! `LIKE '%,x,%'` membership probes match whole elements. Internally every
//! list is a genuine set; the delimited form exists only at the storage
//! boundary.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

/// List element separator.
pub const DELIMITER: char = ',';

/// Parse a delimited column value into a set.
///
/// Empty segments (including the leading/trailing separators) and
/// unparseable elements are dropped.
pub fn parse<T: FromStr + Ord>(raw: &str) -> BTreeSet<T> {
    raw.split(DELIMITER)
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| segment.parse().ok())
        .collect()
}

/// Serialize elements to the delimited storage form (`,a,b,c,`).
///
/// Callers must not persist the serialization of an empty set — the
/// invariant is that an empty list means the row is deleted.
pub fn serialize<T: Display, I: IntoIterator<Item = T>>(items: I) -> String {
    let mut out = String::new();
    out.push(DELIMITER);
    for item in items {
        out.push_str(&item.to_string());
        out.push(DELIMITER);
    }
    out
}

/// SQL LIKE pattern matching rows whose delimited list contains `element`.
pub fn like_pattern<T: Display>(element: T) -> String {
    format!("%{DELIMITER}{element}{DELIMITER}%")
}
