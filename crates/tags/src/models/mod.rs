//! Store models and collaborator access.

pub mod field;
pub mod product;
pub mod project;
pub mod site;
pub mod tag;
pub mod tag_group;

pub use field::{AttributeEntry, AttributeOptions, Field, FieldConfig};
pub use product::Product;
pub use project::Project;
pub use site::{Category, CategorySite};
pub use tag::{Generator, Tag, TagAssignment, TagField};
pub use tag_group::TagGroup;
