//! Target-shaped payloads built from merged source records.
//!
//! Required fields are always present, falling back to the type's empty
//! value. Collections are built by dedicated helpers and may be empty.
pub mod attribute;
pub mod category;
pub mod media;
pub mod product;

use itertools::Itertools;
use serde_json::{json, Value};

pub use attribute::{build_assignment_payload, build_attribute_payload, build_group_payload};
pub use category::{build_category_attributes_payload, build_category_payload};
pub use media::{AssetFetcher, FetchedAsset, HttpAssets};
pub use product::{ProductBuilder, StorePayload};

/// `meta_title` -> `Meta Title`.
pub fn humanize_code(code: &str) -> String {
    code.split('_')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut chars = p.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .join(" ")
}

/// `Product Details` -> `product-details`.
pub fn group_code(name: &str) -> String {
    name.split_whitespace().join("-").to_lowercase()
}

pub fn custom_attribute(code: &str, value: impl Into<Value>) -> Value {
    json!({"attribute_code": code, "value": value.into()})
}

fn bool_or_false(v: Option<bool>) -> Value {
    Value::Bool(v.unwrap_or(false))
}

/// String-typed flags in the target schema: "1"/"0", or "" when unknown.
fn flag_string(v: Option<bool>) -> Value {
    Value::String(match v {
        Some(true) => "1".into(),
        Some(false) => "0".into(),
        None => String::new(),
    })
}

fn text_or_empty(v: &Option<String>) -> Value {
    Value::String(v.clone().unwrap_or_default())
}
