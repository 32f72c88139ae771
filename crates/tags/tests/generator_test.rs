#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Attribute tag generation tests.
//!
//! Covers the field configuration union, the title → tag name derivation,
//! and the per-product resolution step with its exclusion tie-break.

use std::collections::BTreeSet;

use mercato_tags::generator::{FieldTagMap, GENERATOR_ID, resolve_product_tags};
use mercato_tags::models::field::{KIND_ATTRIBUTE_GROUP, KIND_ATTRIBUTE_LIST};
use mercato_tags::models::tag::clear_tag_name;
use mercato_tags::models::{Field, Generator, TagField};

fn list_field(id: i64, entries: serde_json::Value) -> Field {
    Field {
        id,
        kind: KIND_ATTRIBUTE_LIST.to_string(),
        titles: serde_json::json!({"en": "Material"}),
        options: serde_json::json!({"generate_tags": true, "entries": entries}),
        search_filter: false,
        edited: 0,
    }
}

/// Build the field → tag map the generator records while walking a
/// field's configured entries, deriving names the way the dictionary does.
fn map_from_field(field: &Field) -> FieldTagMap {
    let config = field.config().unwrap();
    let mut map = FieldTagMap::default();

    for entry in &config.options().entries {
        for (language, title) in &entry.titles {
            let tag = clear_tag_name(title);
            if config.is_group() {
                map.record_group(field.id, &entry.value, language, &tag);
            } else {
                map.record_list(field.id, language, &tag);
            }
        }
    }

    map
}

// -------------------------------------------------------------------------
// Entry titles become tags
// -------------------------------------------------------------------------

#[test]
fn configured_entries_generate_their_tags() {
    // Field with entries titled "Red"/"Blue": the derived tags are
    // "red"/"blue", and a product carrying the field receives both.
    let field = list_field(
        7,
        serde_json::json!([
            {"value": "red", "titles": {"en": "Red"}},
            {"value": "blue", "titles": {"en": "Blue"}},
        ]),
    );
    let map = map_from_field(&field);

    let tags = resolve_product_tags(&[(7, Some("red".to_string()))], &map, "en");
    assert_eq!(
        tags,
        BTreeSet::from(["red".to_string(), "blue".to_string()])
    );
}

#[test]
fn generated_assignment_carries_the_generator_identity() {
    let field = list_field(
        7,
        serde_json::json!([{"value": "red", "titles": {"en": "Red"}}]),
    );
    let map = map_from_field(&field);
    let generator = Generator::named(GENERATOR_ID);

    let resolved = resolve_product_tags(&[(7, Some("red".to_string()))], &map, "en");

    let mut tag_field = TagField::new();
    tag_field.set_generated("en", &resolved, &generator);

    let assignment = &tag_field.assignments("en")[0];
    assert_eq!(assignment.tag, "red");
    assert_eq!(assignment.generator.id(), "mercato/tags");
}

#[test]
fn entry_titles_localize_per_language() {
    let field = list_field(
        7,
        serde_json::json!([
            {"value": "red", "titles": {"en": "Red", "de": "Rot"}},
        ]),
    );
    let map = map_from_field(&field);
    let fields = vec![(7, None)];

    assert_eq!(
        resolve_product_tags(&fields, &map, "en"),
        BTreeSet::from(["red".to_string()])
    );
    assert_eq!(
        resolve_product_tags(&fields, &map, "de"),
        BTreeSet::from(["rot".to_string()])
    );
    // language without a configured title generates nothing
    assert!(resolve_product_tags(&fields, &map, "fr").is_empty());
}

// -------------------------------------------------------------------------
// Attribute-group exclusivity
// -------------------------------------------------------------------------

#[test]
fn group_selection_excludes_sibling_values() {
    let field = Field {
        id: 9,
        kind: KIND_ATTRIBUTE_GROUP.to_string(),
        titles: serde_json::json!({"en": "Size"}),
        options: serde_json::json!({
            "generate_tags": true,
            "entries": [
                {"value": "v1", "titles": {"en": "Small"}},
                {"value": "v2", "titles": {"en": "Large"}},
            ]
        }),
        search_filter: false,
        edited: 0,
    };
    let map = map_from_field(&field);

    // selecting v1 must never yield v2's tag
    let tags = resolve_product_tags(&[(9, Some("v1".to_string()))], &map, "en");
    assert_eq!(tags, BTreeSet::from(["small".to_string()]));
    assert!(!tags.contains("large"));
}

#[test]
fn exclusion_beats_inclusion_across_fields() {
    // "large" is generated both by the group's unselected value and by an
    // unrelated list field the product carries: exclusion wins.
    let group = Field {
        id: 9,
        kind: KIND_ATTRIBUTE_GROUP.to_string(),
        titles: serde_json::json!({"en": "Size"}),
        options: serde_json::json!({
            "generate_tags": true,
            "entries": [
                {"value": "v1", "titles": {"en": "Small"}},
                {"value": "v2", "titles": {"en": "Large"}},
            ]
        }),
        search_filter: false,
        edited: 0,
    };
    let list = list_field(
        5,
        serde_json::json!([
            {"value": "large", "titles": {"en": "Large"}},
            {"value": "cotton", "titles": {"en": "Cotton"}},
        ]),
    );

    let mut map = map_from_field(&group);
    let list_map = map_from_field(&list);
    // merge the list field's tags into the run map
    for tag in list_map.field_tags(5, "en").unwrap() {
        map.record_list(5, "en", tag);
    }

    let tags = resolve_product_tags(
        &[(9, Some("v1".to_string())), (5, None)],
        &map,
        "en",
    );

    assert_eq!(
        tags,
        BTreeSet::from(["small".to_string(), "cotton".to_string()])
    );
}

// -------------------------------------------------------------------------
// Idempotence of the product application step
// -------------------------------------------------------------------------

#[test]
fn reapplying_identical_resolution_is_a_no_op() {
    let field = list_field(
        7,
        serde_json::json!([{"value": "red", "titles": {"en": "Red"}}]),
    );
    let map = map_from_field(&field);
    let generator = Generator::named(GENERATOR_ID);
    let product_fields = vec![(7, Some("red".to_string()))];

    let mut tag_field = TagField::new();
    tag_field.add_tag("en", "handmade", Generator::User);

    let resolved = resolve_product_tags(&product_fields, &map, "en");
    tag_field.set_generated("en", &resolved, &generator);
    let after_first = tag_field.clone();

    // second run resolves identically; the generator skips the save when
    // the existing generated set matches
    let resolved_again = resolve_product_tags(&product_fields, &map, "en");
    let existing: BTreeSet<String> = tag_field
        .tag_list_by_generator("en", &generator)
        .into_iter()
        .collect();
    assert_eq!(existing, resolved_again);

    tag_field.set_generated("en", &resolved_again, &generator);
    assert_eq!(tag_field, after_first);
}

// -------------------------------------------------------------------------
// Name derivation
// -------------------------------------------------------------------------

#[test]
fn titles_with_identical_names_collapse() {
    assert_eq!(clear_tag_name("Signal Red"), clear_tag_name("signal-red"));
    assert_eq!(clear_tag_name("Red"), "red");
}

#[test]
fn misconfigured_fields_are_rejected_at_load() {
    let field = Field {
        id: 3,
        kind: "free_text".to_string(),
        titles: serde_json::json!({}),
        options: serde_json::json!({"generate_tags": true}),
        search_filter: false,
        edited: 0,
    };

    assert!(field.config().is_err());
}
