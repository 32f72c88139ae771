//! Field → tag mapping and per-product tag resolution.
//!
//! While the generator walks the configured fields it records which tags
//! each field generates per language, and for attribute groups which tag
//! belongs to which entry value. Applying that map to one product is a
//! pure set computation: union everything the product's fields contribute,
//! then subtract the tags of group entry values the product did not
//! select. On ambiguity exclusion always wins.

use std::collections::{BTreeMap, BTreeSet};

/// Per-run record of the tags every generating field produces.
#[derive(Debug, Clone, Default)]
pub struct FieldTagMap {
    /// field id → language → every tag the field generates.
    all: BTreeMap<i64, BTreeMap<String, BTreeSet<String>>>,

    /// group field id → entry value → language → the value's tag.
    per_value: BTreeMap<i64, BTreeMap<String, BTreeMap<String, String>>>,

    /// Field ids that are attribute groups.
    groups: BTreeSet<i64>,
}

impl FieldTagMap {
    /// Record a tag generated by an attribute-list field.
    pub fn record_list(&mut self, field_id: i64, language: &str, tag: &str) {
        self.all
            .entry(field_id)
            .or_default()
            .entry(language.to_string())
            .or_default()
            .insert(tag.to_string());
    }

    /// Record a tag generated for one entry value of an attribute-group
    /// field.
    pub fn record_group(&mut self, field_id: i64, value: &str, language: &str, tag: &str) {
        self.groups.insert(field_id);
        self.all
            .entry(field_id)
            .or_default()
            .entry(language.to_string())
            .or_default()
            .insert(tag.to_string());
        self.per_value
            .entry(field_id)
            .or_default()
            .entry(value.to_string())
            .or_default()
            .insert(language.to_string(), tag.to_string());
    }

    /// Whether a field was recorded as an attribute group.
    pub fn is_group(&self, field_id: i64) -> bool {
        self.groups.contains(&field_id)
    }

    /// Every tag a field generates for one language.
    pub fn field_tags(&self, field_id: i64, language: &str) -> Option<&BTreeSet<String>> {
        self.all.get(&field_id).and_then(|langs| langs.get(language))
    }

    /// The tag of one group entry value for one language.
    pub fn value_tag(&self, field_id: i64, value: &str, language: &str) -> Option<&str> {
        self.per_value
            .get(&field_id)
            .and_then(|values| values.get(value))
            .and_then(|langs| langs.get(language))
            .map(String::as_str)
    }
}

/// Resolve the generated tag set for one product and language.
///
/// `product_fields` lists the generating fields the product carries with
/// its selected entry value (groups and lists both store a single value;
/// a list field contributes all of its tags regardless of the value).
pub fn resolve_product_tags(
    product_fields: &[(i64, Option<String>)],
    map: &FieldTagMap,
    language: &str,
) -> BTreeSet<String> {
    let mut contributed: BTreeSet<String> = BTreeSet::new();
    let mut forbidden: BTreeSet<String> = BTreeSet::new();

    for (field_id, selected) in product_fields {
        let Some(all) = map.field_tags(*field_id, language) else {
            continue;
        };

        if map.is_group(*field_id) {
            // Only the selected value's tag applies; every other tag of
            // this group is forbidden for the product.
            let selected_tag = selected
                .as_deref()
                .and_then(|value| map.value_tag(*field_id, value, language));

            for tag in all {
                if Some(tag.as_str()) == selected_tag {
                    contributed.insert(tag.clone());
                } else {
                    forbidden.insert(tag.clone());
                }
            }
        } else {
            contributed.extend(all.iter().cloned());
        }
    }

    &contributed - &forbidden
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn color_group() -> FieldTagMap {
        let mut map = FieldTagMap::default();
        map.record_group(7, "v1", "en", "red");
        map.record_group(7, "v2", "en", "blue");
        map
    }

    #[test]
    fn list_field_contributes_all_tags() {
        let mut map = FieldTagMap::default();
        map.record_list(5, "en", "cotton");
        map.record_list(5, "en", "wool");

        let tags = resolve_product_tags(&[(5, Some("cotton".to_string()))], &map, "en");
        assert_eq!(
            tags,
            BTreeSet::from(["cotton".to_string(), "wool".to_string()])
        );
    }

    #[test]
    fn group_field_contributes_only_selected_value() {
        let map = color_group();

        let tags = resolve_product_tags(&[(7, Some("v1".to_string()))], &map, "en");
        assert_eq!(tags, BTreeSet::from(["red".to_string()]));

        let tags = resolve_product_tags(&[(7, Some("v2".to_string()))], &map, "en");
        assert_eq!(tags, BTreeSet::from(["blue".to_string()]));
    }

    #[test]
    fn group_field_without_selection_contributes_nothing() {
        let map = color_group();
        let tags = resolve_product_tags(&[(7, None)], &map, "en");
        assert!(tags.is_empty());
    }

    #[test]
    fn unknown_selected_value_contributes_nothing() {
        let map = color_group();
        let tags = resolve_product_tags(&[(7, Some("v9".to_string()))], &map, "en");
        assert!(tags.is_empty());
    }

    #[test]
    fn exclusion_wins_over_inclusion() {
        // A list field also generates "blue", but the product's group
        // selection is v1: "blue" belongs to the unselected v2 and is
        // forbidden, so it must not survive the union.
        let mut map = color_group();
        map.record_list(5, "en", "blue");
        map.record_list(5, "en", "cotton");

        let tags = resolve_product_tags(
            &[(7, Some("v1".to_string())), (5, None)],
            &map,
            "en",
        );

        assert_eq!(
            tags,
            BTreeSet::from(["red".to_string(), "cotton".to_string()])
        );
    }

    #[test]
    fn languages_resolve_independently() {
        let mut map = FieldTagMap::default();
        map.record_group(7, "v1", "en", "red");
        map.record_group(7, "v1", "de", "rot");
        map.record_group(7, "v2", "en", "blue");

        let fields = vec![(7, Some("v1".to_string()))];
        assert_eq!(
            resolve_product_tags(&fields, &map, "en"),
            BTreeSet::from(["red".to_string()])
        );
        assert_eq!(
            resolve_product_tags(&fields, &map, "de"),
            BTreeSet::from(["rot".to_string()])
        );
        assert!(resolve_product_tags(&fields, &map, "fr").is_empty());
    }

    #[test]
    fn fields_absent_from_map_are_ignored() {
        let map = color_group();
        let tags = resolve_product_tags(&[(99, Some("x".to_string()))], &map, "en");
        assert!(tags.is_empty());
    }
}
