use serde_json::{json, Map, Value};

use super::{bool_or_false, flag_string, group_code, humanize_code, text_or_empty};
use crate::config::TransferOptions;
use crate::record::AttributeRecord;
use crate::source::AttributeGroupRow;

/// `POST /products/attribute-sets/groups` body.
pub fn build_group_payload(group: &AttributeGroupRow, target_set_id: i64) -> Value {
    json!({
        "group": {
            "attribute_group_name": group.attribute_group_name,
            "attribute_set_id": target_set_id,
            "extension_attributes": {
                "attribute_group_code": group_code(&group.attribute_group_name),
                "sort_order": "10"
            }
        }
    })
}

/// The label shown in admin: the source label, else a humanized code.
pub fn default_frontend_label(rec: &AttributeRecord) -> String {
    rec.default_frontend_label
        .clone()
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| humanize_code(&rec.attribute_code))
}

/// `POST /products/attributes` body.
pub fn build_attribute_payload(rec: &AttributeRecord, opts: &TransferOptions) -> Value {
    let mut frontend_input = rec
        .frontend_input
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "text".to_string());
    if rec.attribute_code.eq_ignore_ascii_case("weight") {
        frontend_input = "text".to_string();
    }

    let frontend_labels = match rec.db_frontend_label.as_deref() {
        Some(label) if !label.trim().is_empty() => json!([{"store_id": 0, "label": label}]),
        _ => json!([]),
    };
    let options: Vec<Value> = rec
        .option_labels
        .iter()
        .map(|label| json!({"label": label}))
        .collect();

    let mut attr = Map::new();
    attr.insert("extension_attributes".into(), json!({}));
    attr.insert("is_wysiwyg_enabled".into(), bool_or_false(rec.is_wysiwyg_enabled));
    attr.insert(
        "is_html_allowed_on_front".into(),
        bool_or_false(rec.is_html_allowed_on_front),
    );
    attr.insert("used_for_sort_by".into(), bool_or_false(rec.used_for_sort_by));
    attr.insert("is_filterable".into(), bool_or_false(rec.is_filterable));
    attr.insert(
        "is_filterable_in_search".into(),
        bool_or_false(rec.is_filterable_in_search),
    );
    attr.insert("is_used_in_grid".into(), Value::Bool(false));
    attr.insert("is_visible_in_grid".into(), Value::Bool(false));
    attr.insert("is_filterable_in_grid".into(), Value::Bool(false));
    attr.insert("position".into(), json!(rec.position.unwrap_or(0)));
    attr.insert("apply_to".into(), json!(rec.apply_to));
    attr.insert("is_searchable".into(), flag_string(rec.is_searchable));
    attr.insert(
        "is_visible_in_advanced_search".into(),
        flag_string(rec.is_visible_in_advanced_search),
    );
    attr.insert("is_comparable".into(), flag_string(rec.is_comparable));
    attr.insert(
        "is_used_for_promo_rules".into(),
        flag_string(rec.is_used_for_promo_rules),
    );
    attr.insert("is_visible_on_front".into(), flag_string(rec.is_visible_on_front));
    attr.insert(
        "used_in_product_listing".into(),
        flag_string(rec.used_in_product_listing),
    );
    attr.insert("is_visible".into(), Value::Bool(true));
    attr.insert("scope".into(), text_or_empty(&rec.scope));
    attr.insert("attribute_code".into(), json!(rec.attribute_code));
    attr.insert("frontend_input".into(), json!(frontend_input));
    attr.insert("entity_type_id".into(), json!(opts.entity_type_id));
    attr.insert("is_required".into(), bool_or_false(rec.is_required));
    attr.insert("options".into(), Value::Array(options));
    attr.insert("is_user_defined".into(), bool_or_false(rec.is_user_defined));
    attr.insert("default_frontend_label".into(), json!(default_frontend_label(rec)));
    attr.insert("frontend_labels".into(), frontend_labels);
    attr.insert("note".into(), text_or_empty(&rec.note));
    attr.insert("backend_type".into(), text_or_empty(&rec.backend_type));
    attr.insert("backend_model".into(), text_or_empty(&rec.backend_model));
    attr.insert("source_model".into(), text_or_empty(&rec.source_model));
    attr.insert("default_value".into(), text_or_empty(&rec.default_value));
    attr.insert("is_unique".into(), flag_string(rec.is_unique));
    attr.insert("frontend_class".into(), text_or_empty(&rec.frontend_class));
    attr.insert("validation_rules".into(), json!([]));
    attr.insert("custom_attributes".into(), json!([]));

    json!({ "attribute": Value::Object(attr) })
}

/// `POST /products/attribute-sets/attributes` body.
pub fn build_assignment_payload(
    rec: &AttributeRecord,
    target_set_id: i64,
    target_group_id: i64,
) -> Value {
    json!({
        "attributeSetId": target_set_id,
        "attributeGroupId": target_group_id,
        "attributeCode": rec.attribute_code,
        "sortOrder": rec.position.unwrap_or(10)
    })
}
