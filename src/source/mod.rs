//! Magento 1 side of the migration: the SOAP API, the MySQL EAV tables,
//! and the reader that merges the two into [`SourceEntity`] records.
pub mod eav;
pub mod soap;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::MigrateResult;
use crate::record::{value_as_i64, Origin, SourceEntity};

pub use eav::SourceDb;
pub use soap::SoapClient;

/// Remote procedure side of the source (SOAP V1 resources).
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// `catalog_product.list` summaries.
    async fn product_list(&self) -> MigrateResult<Vec<Value>>;
    /// `catalog_product.info`.
    async fn product_info(&self, product_id: i64) -> MigrateResult<Value>;
    /// `product_attribute.info`.
    async fn attribute_info(&self, attribute_id: i64) -> MigrateResult<Value>;
    /// `product_attribute.list` for one attribute set.
    async fn attribute_list(&self, set_id: i64) -> MigrateResult<Vec<Value>>;
    /// `catalog_category.tree` from the root.
    async fn category_tree(&self) -> MigrateResult<Value>;
    /// `catalog_category.info`.
    async fn category_info(&self, category_id: i64) -> MigrateResult<Value>;
}

/// Which store rows to take from the product EAV value tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueScope {
    AdminOnly,
    AllStores,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeGroupRow {
    pub attribute_group_id: i64,
    pub attribute_group_name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EavValue {
    pub attribute_code: String,
    pub store_id: i64,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaRow {
    pub value_id: i64,
    pub file: String,
    pub label: Option<String>,
    pub position: Option<i64>,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierPriceRow {
    pub all_groups: bool,
    pub customer_group_id: i64,
    pub qty: f64,
    pub value: f64,
    pub website_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuperAttributeRow {
    pub attribute_id: i64,
    pub attribute_code: String,
    pub label: Option<String>,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryAttributeValue {
    pub category_id: i64,
    pub attribute_code: String,
    pub value: Option<String>,
}

/// Relational side of the source (direct EAV queries).
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn attribute_groups(&self, set_id: i64) -> MigrateResult<Vec<AttributeGroupRow>>;
    /// Attribute rows assigned to one set + group, as loose column maps.
    async fn group_attributes(
        &self,
        set_id: i64,
        group_id: i64,
    ) -> MigrateResult<Vec<Map<String, Value>>>;
    /// Admin-store option labels in sort order.
    async fn attribute_option_labels(&self, attribute_id: i64) -> MigrateResult<Vec<String>>;
    async fn attribute_frontend_label(&self, attribute_id: i64) -> MigrateResult<Option<String>>;
    async fn option_label(&self, option_id: i64, store_id: i64) -> MigrateResult<Option<String>>;
    async fn product_category_ids(&self, product_id: i64) -> MigrateResult<Vec<i64>>;
    async fn media_gallery(&self, product_id: i64) -> MigrateResult<Vec<MediaRow>>;
    async fn tier_prices(&self, product_id: i64) -> MigrateResult<Vec<TierPriceRow>>;
    async fn super_attributes(&self, product_id: i64) -> MigrateResult<Vec<SuperAttributeRow>>;
    /// Child product ids of a configurable parent.
    async fn super_links(&self, parent_id: i64) -> MigrateResult<Vec<i64>>;
    async fn product_values(
        &self,
        product_id: i64,
        scope: ValueScope,
    ) -> MigrateResult<Vec<EavValue>>;
    /// `core_store`: website id -> store ids.
    async fn website_stores(&self) -> MigrateResult<BTreeMap<i64, Vec<i64>>>;
    /// Admin-store values of user-defined category attributes.
    async fn category_attribute_values(&self) -> MigrateResult<Vec<CategoryAttributeValue>>;
}

/// Merges list/database rows with the detailed API view of the same id.
///
/// A failed detail call is not the end of an entity: the partial record is
/// returned with `api_error` set so the caller can report it. Only fatal
/// errors (lost connection) propagate.
pub struct SourceReader<'a> {
    api: &'a dyn SourceApi,
    store: &'a dyn SourceStore,
}

impl<'a> SourceReader<'a> {
    pub fn new(api: &'a dyn SourceApi, store: &'a dyn SourceStore) -> Self {
        Self { api, store }
    }

    pub fn api(&self) -> &'a dyn SourceApi {
        self.api
    }

    pub fn store(&self) -> &'a dyn SourceStore {
        self.store
    }

    /// DB attribute row + `product_attribute.info`, with option labels and the
    /// raw DB frontend label attached.
    pub async fn read_attribute(&self, row: &Map<String, Value>) -> MigrateResult<Option<SourceEntity>> {
        let Some(id) = row.get("attribute_id").and_then(value_as_i64) else {
            warn!(?row, "source: attribute row without attribute_id");
            return Ok(None);
        };
        let mut entity = SourceEntity::new(id);
        entity.merge(row, Origin::DatabaseRow);

        match self.api.attribute_info(id).await {
            Ok(info) => {
                entity.merge_value(&info, Origin::ApiResponse);
                hoist_additional_fields(&mut entity);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(attribute_id = id, error = %e, "source: attribute info failed; using db row");
                entity.api_error = Some(e.to_string());
            }
        }

        let labels = self.store.attribute_option_labels(id).await?;
        let db_label = self.store.attribute_frontend_label(id).await?;
        let mut extra = Map::new();
        extra.insert(
            "option_labels".into(),
            Value::Array(labels.into_iter().map(Value::String).collect()),
        );
        extra.insert(
            "db_frontend_label".into(),
            db_label.map(Value::String).unwrap_or(Value::Null),
        );
        entity.merge(&extra, Origin::DatabaseRow);
        Ok(Some(entity))
    }

    /// `catalog_product.list` item + `catalog_product.info`.
    pub async fn read_product(&self, summary: &Value) -> MigrateResult<Option<SourceEntity>> {
        let Some(id) = summary.get("product_id").and_then(value_as_i64) else {
            warn!(%summary, "source: product summary without product_id");
            return Ok(None);
        };
        let mut entity = SourceEntity::new(id);
        entity.merge_value(summary, Origin::ListSummary);

        match self.api.product_info(id).await {
            Ok(info) => entity.merge_value(&info, Origin::ApiResponse),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(product_id = id, error = %e, "source: product info failed; using list summary");
                entity.api_error = Some(e.to_string());
            }
        }
        debug!(product_id = id, fields = entity.fields.len(), "source: product read");
        Ok(Some(entity))
    }

    /// `catalog_category.tree` node (children stripped) + `catalog_category.info`.
    pub async fn read_category(&self, node: &Value) -> MigrateResult<Option<SourceEntity>> {
        let Some(id) = node.get("category_id").and_then(value_as_i64) else {
            return Ok(None);
        };
        let mut entity = SourceEntity::new(id);
        if let Some(obj) = node.as_object() {
            let mut flat = obj.clone();
            flat.remove("children");
            entity.merge(&flat, Origin::ListSummary);
        }

        match self.api.category_info(id).await {
            Ok(info) => {
                entity.merge_value(&info, Origin::ApiResponse);
                entity.fields.remove("children");
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(category_id = id, error = %e, "source: category info failed; using tree node");
                entity.api_error = Some(e.to_string());
            }
        }
        Ok(Some(entity))
    }
}

/// `product_attribute.info` nests several frontend flags under
/// `additional_fields`; lift them to the top level.
fn hoist_additional_fields(entity: &mut SourceEntity) {
    let Some(Value::Object(extra)) = entity.fields.get("additional_fields").cloned() else {
        return;
    };
    for (k, v) in extra {
        entity.fields.insert(k, v);
    }
}
