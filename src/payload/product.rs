use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::custom_attribute;
use super::media::{build_media_entries, AssetFetcher};
use crate::config::MigrationConfig;
use crate::error::{Dimension, MigrateError, MigrateResult};
use crate::mapping::{IdentifierMapper, OptionResolver};
use crate::record::ProductRecord;
use crate::report::RunReport;
use crate::source::{EavValue, SourceStore, SuperAttributeRow, TierPriceRow, ValueScope};
use crate::target::{StoreScope, TargetApi};

/// Target id Magento 2 uses for "all customer groups".
const ALL_GROUPS_ID: i64 = 32000;

/// One store-view payload.
#[derive(Debug, Clone)]
pub struct StorePayload {
    pub target_store_id: i64,
    pub sku: String,
    pub product: Value,
}

/// Builds `product` objects for `POST /products`.
pub struct ProductBuilder<'a> {
    pub cfg: &'a MigrationConfig,
    pub mapper: IdentifierMapper<'a>,
    pub store: &'a dyn SourceStore,
    pub target: &'a dyn TargetApi,
    pub options: &'a OptionResolver<'a>,
    pub assets: &'a dyn AssetFetcher,
    /// Source product id -> sku, from the product list.
    pub skus: &'a BTreeMap<i64, String>,
}

impl<'a> ProductBuilder<'a> {
    /// Default-scope payload with store 0 custom attributes.
    ///
    /// `Ok(None)` means the product was skipped (unmapped attribute set).
    pub async fn build_default(
        &self,
        rec: &ProductRecord,
        report: &mut RunReport,
    ) -> MigrateResult<Option<Value>> {
        let Some(mut product) = self.base(rec, true, report).await? else {
            return Ok(None);
        };
        let values = self
            .store
            .product_values(rec.product_id, ValueScope::AdminOnly)
            .await?;
        let custom = self
            .default_custom_attributes(&values, report)
            .await?;
        product.insert("custom_attributes".into(), Value::Array(custom));
        Ok(Some(Value::Object(product)))
    }

    /// One payload per valid target store. Values of stores outside the
    /// product's websites, or without a store mapping, are dropped.
    pub async fn build_store_views(
        &self,
        rec: &ProductRecord,
        website_stores: &BTreeMap<i64, Vec<i64>>,
        report: &mut RunReport,
    ) -> MigrateResult<Vec<StorePayload>> {
        let valid = valid_source_stores(&rec.websites, website_stores);
        if valid.is_empty() {
            debug!(product_id = rec.product_id, websites = ?rec.websites, "product: no store views");
            return Ok(Vec::new());
        }
        // Images are sent once, with the default-scope payload.
        let Some(base) = self.base(rec, false, report).await? else {
            return Ok(Vec::new());
        };
        let sku = rec.sku.clone().unwrap_or_default();

        let values = self
            .store
            .product_values(rec.product_id, ValueScope::AllStores)
            .await?;

        let mut grouped: BTreeMap<i64, IndexMap<String, Value>> = BTreeMap::new();
        for v in values {
            if !valid.contains(&v.store_id) {
                continue;
            }
            let Some(target_store) =
                self.mapper
                    .map_or_report(Dimension::Store, v.store_id, &format!("sku {sku}"), report)
            else {
                continue;
            };
            let Some(raw) = v.value else { continue };
            let entry = grouped.entry(target_store).or_default();
            if entry.contains_key(&v.attribute_code) {
                continue;
            }
            let value = self
                .options
                .resolve(
                    &v.attribute_code,
                    &raw,
                    v.store_id,
                    StoreScope::Store(target_store),
                    report,
                )
                .await?;
            entry.insert(v.attribute_code, Value::String(value));
        }

        Ok(grouped
            .into_iter()
            .map(|(target_store_id, attrs)| {
                let mut product = base.clone();
                product.insert(
                    "custom_attributes".into(),
                    Value::Array(
                        attrs
                            .into_iter()
                            .map(|(code, v)| custom_attribute(&code, v))
                            .collect(),
                    ),
                );
                StorePayload {
                    target_store_id,
                    sku: sku.clone(),
                    product: Value::Object(product),
                }
            })
            .collect())
    }

    /// Everything except `custom_attributes`.
    async fn base(
        &self,
        rec: &ProductRecord,
        with_media: bool,
        report: &mut RunReport,
    ) -> MigrateResult<Option<Map<String, Value>>> {
        let sku = rec
            .sku
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| MigrateError::fetch("product", rec.product_id, "record has no sku"))?;

        let Some(source_set) = rec.attribute_set_id else {
            return Err(MigrateError::fetch(
                "product",
                rec.product_id,
                "record has no attribute set",
            ));
        };
        let Some(target_set) = self.mapper.map_or_report(
            Dimension::AttributeSet,
            source_set,
            &format!("sku {sku}"),
            report,
        ) else {
            return Ok(None);
        };

        let mut ext = Map::new();
        ext.insert("website_ids".into(), json!(self.cfg.transfer.website_ids));
        ext.insert(
            "category_links".into(),
            Value::Array(self.category_links(rec, &sku, report).await?),
        );
        ext.insert("discounts".into(), json!([]));
        ext.insert("bundle_product_options".into(), json!([]));
        ext.insert("stock_item".into(), json!({}));
        ext.insert("downloadable_product_links".into(), json!([]));
        ext.insert("downloadable_product_samples".into(), json!([]));
        let (options, links) = if rec.is_configurable() {
            self.configurable(rec, &sku, report).await?
        } else {
            (Vec::new(), Vec::new())
        };
        ext.insert("configurable_product_options".into(), Value::Array(options));
        ext.insert("configurable_product_links".into(), Value::Array(links));

        let media = if with_media {
            let rows = self.store.media_gallery(rec.product_id).await?;
            build_media_entries(&rows, &self.cfg.magento_domain, self.assets, &sku, report).await
        } else {
            Vec::new()
        };
        let tiers = self.store.tier_prices(rec.product_id).await?;

        let mut product = Map::new();
        product.insert("sku".into(), json!(sku));
        product.insert("name".into(), json!(rec.name.clone().unwrap_or_default()));
        product.insert("attribute_set_id".into(), json!(target_set));
        product.insert("price".into(), json!(rec.price.unwrap_or(0.0)));
        product.insert("status".into(), json!(rec.status.unwrap_or(0)));
        product.insert("visibility".into(), json!(rec.visibility.unwrap_or(0)));
        product.insert("type_id".into(), json!(rec.type_id.clone().unwrap_or_default()));
        product.insert("created_at".into(), json!(rec.created_at.clone().unwrap_or_default()));
        product.insert("updated_at".into(), json!(rec.updated_at.clone().unwrap_or_default()));
        product.insert("weight".into(), json!(rec.weight.unwrap_or(0.0)));
        product.insert("extension_attributes".into(), Value::Object(ext));
        product.insert("product_links".into(), json!([]));
        product.insert("options".into(), json!([]));
        product.insert("media_gallery_entries".into(), Value::Array(media));
        product.insert("tier_prices".into(), Value::Array(tier_prices(&tiers)));
        Ok(Some(product))
    }

    async fn category_links(
        &self,
        rec: &ProductRecord,
        sku: &str,
        report: &mut RunReport,
    ) -> MigrateResult<Vec<Value>> {
        let source_ids = self.store.product_category_ids(rec.product_id).await?;
        let mapped = self.mapper.map_all(
            Dimension::Category,
            &source_ids,
            &format!("sku {sku}"),
            report,
        );
        Ok(category_links(&mapped))
    }

    /// Store 0 values, first value per code, option ids translated.
    async fn default_custom_attributes(
        &self,
        values: &[EavValue],
        report: &mut RunReport,
    ) -> MigrateResult<Vec<Value>> {
        let mut seen: IndexMap<String, Value> = IndexMap::new();
        for v in values {
            if seen.contains_key(&v.attribute_code) {
                continue;
            }
            let Some(raw) = v.value.as_deref() else { continue };
            let value = self
                .options
                .resolve(&v.attribute_code, raw, 0, StoreScope::Default, report)
                .await?;
            seen.insert(v.attribute_code.clone(), Value::String(value));
        }
        Ok(seen
            .into_iter()
            .map(|(code, v)| custom_attribute(&code, v))
            .collect())
    }

    /// Super attributes become options keyed by the target attribute id;
    /// child products are linked by their target id, found via sku.
    async fn configurable(
        &self,
        rec: &ProductRecord,
        sku: &str,
        report: &mut RunReport,
    ) -> MigrateResult<(Vec<Value>, Vec<Value>)> {
        let supers = self.store.super_attributes(rec.product_id).await?;
        let mut options = Vec::with_capacity(supers.len());
        for sa in &supers {
            match self.target_entity_id(&attribute_path(&sa.attribute_code), "attribute_id").await? {
                Some(target_attribute_id) => {
                    options.push(configurable_option(sa, target_attribute_id))
                }
                None => report.record_failure(
                    "configurable option",
                    &format!("{sku}/{}", sa.attribute_code),
                    &MigrateError::fetch(
                        "target attribute",
                        &sa.attribute_code,
                        "not found on target",
                    ),
                ),
            }
        }

        let children = self.store.super_links(rec.product_id).await?;
        let mut links = Vec::with_capacity(children.len());
        for child in children {
            let Some(child_sku) = self.skus.get(&child) else {
                warn!(parent = %sku, child, "product: child id not in product list");
                report.record_failure(
                    "configurable link",
                    &format!("{sku}/{child}"),
                    &MigrateError::fetch("child product", child, "not in source product list"),
                );
                continue;
            };
            let path = format!("/products/{}", urlencoding::encode(child_sku));
            match self.target_entity_id(&path, "id").await? {
                Some(id) => links.push(json!(id)),
                None => report.record_failure(
                    "configurable link",
                    &format!("{sku}/{child_sku}"),
                    &MigrateError::fetch("child product", child_sku, "not found on target"),
                ),
            }
        }
        Ok((options, links))
    }

    async fn target_entity_id(&self, path: &str, field: &str) -> MigrateResult<Option<i64>> {
        let reply = self.target.get(StoreScope::Default, path, &[]).await?;
        Ok(if reply.is_success() {
            reply.id_field(field)
        } else {
            None
        })
    }
}

fn attribute_path(code: &str) -> String {
    format!("/products/attributes/{}", urlencoding::encode(code))
}

/// Source stores a product can carry values for, from its websites.
pub fn valid_source_stores(
    websites: &[i64],
    website_stores: &BTreeMap<i64, Vec<i64>>,
) -> BTreeSet<i64> {
    websites
        .iter()
        .filter_map(|w| website_stores.get(w))
        .flatten()
        .copied()
        .collect()
}

pub fn category_links(target_category_ids: &[i64]) -> Vec<Value> {
    target_category_ids
        .iter()
        .map(|id| {
            json!({
                "position": 0,
                "category_id": id.to_string(),
                "extension_attributes": {}
            })
        })
        .collect()
}

fn configurable_option(sa: &SuperAttributeRow, target_attribute_id: i64) -> Value {
    json!({
        "attribute_id": target_attribute_id.to_string(),
        "label": sa.label.clone().unwrap_or_else(|| sa.attribute_code.clone()),
        "position": sa.position,
        "values": []
    })
}

pub fn tier_prices(rows: &[TierPriceRow]) -> Vec<Value> {
    rows.iter()
        .map(|t| {
            json!({
                "customer_group_id": if t.all_groups { ALL_GROUPS_ID } else { t.customer_group_id },
                "qty": t.qty,
                "value": t.value,
                "extension_attributes": {"website_id": t.website_id}
            })
        })
        .collect()
}
