//! Merged source records.
//!
//! A [`SourceEntity`] is the union of whatever the source gave us for one
//! identifier: a database row or list summary first, then the detailed API
//! response layered on top (API wins on key collisions). Typed views
//! ([`AttributeRecord`], [`CategoryRecord`], [`ProductRecord`]) pull the
//! known fields out with explicit optionality; required-field defaults are
//! applied later by the payload builders.
use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    DatabaseRow,
    ListSummary,
    ApiResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceEntity {
    pub id: i64,
    pub fields: Map<String, Value>,
    pub origins: BTreeSet<Origin>,
    /// Set when the detail call failed and the record is partial.
    pub api_error: Option<String>,
}

impl SourceEntity {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            fields: Map::new(),
            origins: BTreeSet::new(),
            api_error: None,
        }
    }

    /// Layer `fields` over the current content; incoming keys win.
    pub fn merge(&mut self, fields: &Map<String, Value>, origin: Origin) {
        for (k, v) in fields {
            self.fields.insert(k.clone(), v.clone());
        }
        self.origins.insert(origin);
    }

    /// Merge an arbitrary value if it is an object; other shapes are ignored.
    pub fn merge_value(&mut self, value: &Value, origin: Origin) {
        if let Some(obj) = value.as_object() {
            self.merge(obj, origin);
        }
    }

    pub fn is_partial(&self) -> bool {
        self.api_error.is_some() || !self.origins.contains(&Origin::ApiResponse)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    /// Non-empty string form of a scalar field.
    pub fn str_field(&self, key: &str) -> Option<String> {
        self.get(key).and_then(scalar_to_string).filter(|s| !s.is_empty())
    }

    pub fn i64_field(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(value_as_i64)
    }

    pub fn f64_field(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(value_as_f64)
    }

    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(value_as_bool)
    }

    /// Integer list from an array field, a JSON-encoded string, or a CSV string.
    pub fn id_list(&self, key: &str) -> Vec<i64> {
        match self.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(value_as_i64).collect(),
            Some(Value::String(s)) => {
                let s = s.trim();
                if s.starts_with('[') {
                    serde_json::from_str::<Vec<Value>>(s)
                        .map(|items| items.iter().filter_map(value_as_i64).collect())
                        .unwrap_or_default()
                } else {
                    s.split(',').filter_map(|p| p.trim().parse().ok()).collect()
                }
            }
            Some(v) => value_as_i64(v).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

pub fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    }
}

pub fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

pub fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn value_as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// One `eav_attribute` row merged with `product_attribute.info`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AttributeRecord {
    pub attribute_id: i64,
    pub attribute_code: String,
    pub frontend_input: Option<String>,
    pub backend_type: Option<String>,
    pub backend_model: Option<String>,
    pub source_model: Option<String>,
    pub frontend_class: Option<String>,
    pub default_value: Option<String>,
    pub default_frontend_label: Option<String>,
    pub scope: Option<String>,
    pub note: Option<String>,
    pub apply_to: Vec<String>,
    pub position: Option<i64>,
    pub is_required: Option<bool>,
    pub is_unique: Option<bool>,
    pub is_user_defined: Option<bool>,
    pub is_visible_on_front: Option<bool>,
    pub is_filterable: Option<bool>,
    pub is_filterable_in_search: Option<bool>,
    pub is_searchable: Option<bool>,
    pub is_visible_in_advanced_search: Option<bool>,
    pub is_comparable: Option<bool>,
    pub is_used_for_promo_rules: Option<bool>,
    pub used_in_product_listing: Option<bool>,
    pub used_for_sort_by: Option<bool>,
    pub is_html_allowed_on_front: Option<bool>,
    pub is_wysiwyg_enabled: Option<bool>,
    /// Option labels in sort order, admin store.
    pub option_labels: Vec<String>,
    /// `eav_attribute.frontend_label` straight from the database.
    pub db_frontend_label: Option<String>,
}

impl AttributeRecord {
    pub fn from_entity(e: &SourceEntity) -> Self {
        let apply_to = match e.get("apply_to") {
            Some(Value::Array(items)) => items.iter().filter_map(scalar_to_string).collect(),
            Some(v) => scalar_to_string(v)
                .map(|s| {
                    s.split(',')
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            None => Vec::new(),
        };
        // `is_visible` in the DB row is catalog_eav_attribute.is_visible_on_front.
        let is_visible_on_front = e
            .bool_field("is_visible_on_front")
            .or_else(|| e.bool_field("is_visible"));
        Self {
            attribute_id: e.id,
            attribute_code: e.str_field("attribute_code").unwrap_or_default(),
            frontend_input: e.str_field("frontend_input"),
            backend_type: e.str_field("backend_type"),
            backend_model: e.str_field("backend_model"),
            source_model: e.str_field("source_model"),
            frontend_class: e.str_field("frontend_class"),
            default_value: e.str_field("default_value"),
            default_frontend_label: e.str_field("default_frontend_label"),
            scope: e.str_field("scope"),
            note: e.str_field("note"),
            apply_to,
            position: e.i64_field("position"),
            is_required: e.bool_field("is_required"),
            is_unique: e.bool_field("is_unique"),
            is_user_defined: e.bool_field("is_user_defined"),
            is_visible_on_front,
            is_filterable: e.bool_field("is_filterable"),
            is_filterable_in_search: e.bool_field("is_filterable_in_search"),
            is_searchable: e.bool_field("is_searchable"),
            is_visible_in_advanced_search: e.bool_field("is_visible_in_advanced_search"),
            is_comparable: e.bool_field("is_comparable"),
            is_used_for_promo_rules: e.bool_field("is_used_for_promo_rules"),
            used_in_product_listing: e.bool_field("used_in_product_listing"),
            used_for_sort_by: e.bool_field("used_for_sort_by"),
            is_html_allowed_on_front: e.bool_field("is_html_allowed_on_front"),
            is_wysiwyg_enabled: e.bool_field("is_wysiwyg_enabled"),
            option_labels: match e.get("option_labels") {
                Some(Value::Array(items)) => items.iter().filter_map(scalar_to_string).collect(),
                _ => Vec::new(),
            },
            db_frontend_label: e.str_field("db_frontend_label"),
        }
    }
}

/// One category tree node merged with `catalog_category.info`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryRecord {
    pub category_id: i64,
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub position: Option<i64>,
    pub include_in_menu: Option<bool>,
    /// Remaining scalar fields, used for custom attributes (url_key, meta_*).
    pub fields: Map<String, Value>,
}

impl CategoryRecord {
    pub fn from_entity(e: &SourceEntity) -> Self {
        Self {
            category_id: e.id,
            name: e.str_field("name"),
            is_active: e.bool_field("is_active"),
            position: e.i64_field("position"),
            include_in_menu: e.bool_field("include_in_menu"),
            fields: e.fields.clone(),
        }
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.fields
            .get(key)
            .and_then(scalar_to_string)
            .filter(|s| !s.is_empty())
    }
}

/// `catalog_product.list` item merged with `catalog_product.info`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProductRecord {
    pub product_id: i64,
    pub sku: Option<String>,
    pub name: Option<String>,
    pub attribute_set_id: Option<i64>,
    pub type_id: Option<String>,
    pub price: Option<f64>,
    pub status: Option<i64>,
    pub visibility: Option<i64>,
    pub weight: Option<f64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub websites: Vec<i64>,
    pub partial: bool,
}

impl ProductRecord {
    pub fn from_entity(e: &SourceEntity) -> Self {
        let mut websites = e.id_list("websites");
        if websites.is_empty() {
            websites = e.id_list("website_ids");
        }
        Self {
            product_id: e.id,
            sku: e.str_field("sku"),
            name: e.str_field("name"),
            attribute_set_id: e.i64_field("set"),
            type_id: e.str_field("type").or_else(|| e.str_field("type_id")),
            price: e.f64_field("price"),
            status: e.i64_field("status"),
            visibility: e.i64_field("visibility"),
            weight: e.f64_field("weight"),
            created_at: e.str_field("created_at"),
            updated_at: e.str_field("updated_at"),
            websites,
            partial: e.is_partial(),
        }
    }

    pub fn is_configurable(&self) -> bool {
        self.type_id.as_deref() == Some("configurable")
    }
}
