use serde_json::{json, Value};

use super::custom_attribute;
use crate::record::CategoryRecord;

/// `POST /categories` body. Custom attributes are only sent when non-empty.
///
/// A node without a url_key is sent without one and Magento derives it from
/// the name. A clash on that derived key is resolved by the writer: it looks
/// the category up by name and parent first, and only then suffixes the key.
pub fn build_category_payload(rec: &CategoryRecord, parent_id: i64, codes: &[String]) -> Value {
    let custom: Vec<Value> = codes
        .iter()
        .filter_map(|code| rec.text(code).map(|v| custom_attribute(code, v)))
        .collect();
    json!({
        "category": {
            "parent_id": parent_id,
            "name": rec.name.clone().unwrap_or_default(),
            "is_active": rec.is_active.unwrap_or(false),
            "position": rec.position.unwrap_or(0),
            "include_in_menu": rec.include_in_menu.unwrap_or(false),
            "custom_attributes": custom
        }
    })
}

/// `PUT /categories/{id}` body carrying only custom attributes.
pub fn build_category_attributes_payload(target_id: i64, values: &[(String, Value)]) -> Value {
    let custom: Vec<Value> = values
        .iter()
        .map(|(code, v)| custom_attribute(code, v.clone()))
        .collect();
    json!({
        "category": {
            "id": target_id,
            "custom_attributes": custom
        }
    })
}
