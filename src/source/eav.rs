use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use itertools::Itertools;
use serde_json::{Map, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::{MySqlPool, Row};
use tracing::{debug, info, instrument};

use super::{
    AttributeGroupRow, CategoryAttributeValue, EavValue, MediaRow, SourceStore, SuperAttributeRow,
    TierPriceRow, ValueScope,
};
use crate::error::{classify_sqlx, MigrateError, MigrateResult, System};

/// Attribute columns pulled for a set/group, `(expression, alias)`.
/// Everything is cast to text so rows merge uniformly with SOAP values.
const ATTRIBUTE_COLUMNS: &[(&str, &str)] = &[
    ("ea.attribute_id", "attribute_id"),
    ("ea.attribute_code", "attribute_code"),
    ("ea.backend_model", "backend_model"),
    ("ea.backend_type", "backend_type"),
    ("ea.frontend_input", "frontend_input"),
    ("ea.default_value", "default_value"),
    ("ea.frontend_label", "default_frontend_label"),
    ("ea.frontend_class", "frontend_class"),
    ("ea.source_model", "source_model"),
    ("ea.is_unique", "is_unique"),
    ("ea.is_required", "is_required"),
    ("ea.is_user_defined", "is_user_defined"),
    ("ea.note", "note"),
    ("cea.is_visible_on_front", "is_visible"),
    ("cea.is_filterable", "is_filterable"),
    ("cea.is_filterable_in_search", "is_filterable_in_search"),
    ("cea.is_searchable", "is_searchable"),
    ("cea.is_comparable", "is_comparable"),
    ("cea.is_visible_in_advanced_search", "is_visible_in_advanced_search"),
    ("cea.is_used_for_promo_rules", "is_used_for_promo_rules"),
    ("cea.used_in_product_listing", "used_in_product_listing"),
    ("cea.used_for_sort_by", "used_for_sort_by"),
    ("cea.is_html_allowed_on_front", "is_html_allowed_on_front"),
    ("cea.is_wysiwyg_enabled", "is_wysiwyg_enabled"),
    ("cea.apply_to", "apply_to"),
    ("cea.position", "position"),
];

const PRODUCT_VALUE_TABLES: &[&str] = &[
    "catalog_product_entity_varchar",
    "catalog_product_entity_int",
    "catalog_product_entity_text",
    "catalog_product_entity_decimal",
    "catalog_product_entity_datetime",
];

fn category_value_table(backend_type: &str) -> Option<&'static str> {
    match backend_type {
        "varchar" => Some("catalog_category_entity_varchar"),
        "int" => Some("catalog_category_entity_int"),
        "text" => Some("catalog_category_entity_text"),
        "decimal" => Some("catalog_category_entity_decimal"),
        "datetime" => Some("catalog_category_entity_datetime"),
        _ => None,
    }
}

fn group_attributes_sql() -> String {
    let cols = ATTRIBUTE_COLUMNS
        .iter()
        .map(|(expr, alias)| format!("CAST({expr} AS CHAR) AS {alias}"))
        .join(", ");
    format!(
        "SELECT {cols} \
         FROM eav_attribute AS ea \
         LEFT JOIN catalog_eav_attribute AS cea ON ea.attribute_id = cea.attribute_id \
         INNER JOIN eav_entity_attribute AS eea ON eea.attribute_id = ea.attribute_id \
         WHERE eea.attribute_set_id = ? AND eea.attribute_group_id = ? \
         ORDER BY ea.attribute_code"
    )
}

/// UNION over the five product value tables, joined back to `eav_attribute`.
/// Binds the product id once per table.
fn product_values_sql(scope: ValueScope) -> String {
    let store_filter = match scope {
        ValueScope::AdminOnly => " AND store_id = 0",
        ValueScope::AllStores => "",
    };
    let union = PRODUCT_VALUE_TABLES
        .iter()
        .map(|t| {
            format!("SELECT attribute_id, store_id, CAST(value AS CHAR) AS value FROM {t} WHERE entity_id = ?{store_filter}")
        })
        .join(" UNION ALL ");
    format!(
        "SELECT ea.attribute_code, CAST(v.store_id AS SIGNED) AS store_id, v.value \
         FROM eav_attribute ea \
         JOIN ({union}) AS v ON ea.attribute_id = v.attribute_id \
         WHERE ea.entity_type_id = (\
             SELECT entity_type_id FROM eav_entity_type WHERE entity_type_code = 'catalog_product'\
         ) \
         ORDER BY v.store_id"
    )
}

fn parse_f64(raw: Option<String>) -> f64 {
    raw.and_then(|s| s.trim().parse::<f64>().ok()).unwrap_or(0.0)
}

/// Direct read-only access to the Magento 1 database.
#[derive(Clone)]
pub struct SourceDb {
    pub pool: MySqlPool,
}

impl SourceDb {
    // Never put the password in a span.
    #[instrument(skip(password))]
    pub async fn connect(
        host: &str,
        port: u16,
        database: &str,
        user: &str,
        password: &str,
        acquire_timeout: Duration,
    ) -> MigrateResult<Self> {
        let options = MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .database(database)
            .username(user)
            .password(password)
            .charset("utf8mb4");

        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(Duration::from_secs(600))
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::connection(System::SourceDb, e))?;
        info!("source db: connected");
        Ok(Self { pool })
    }
}

fn row_to_map(row: &MySqlRow) -> Result<Map<String, Value>, sqlx::Error> {
    let mut out = Map::new();
    for (_, alias) in ATTRIBUTE_COLUMNS {
        let v: Option<String> = row.try_get(*alias)?;
        out.insert(
            (*alias).to_string(),
            v.map(Value::String).unwrap_or(Value::Null),
        );
    }
    Ok(out)
}

#[async_trait]
impl SourceStore for SourceDb {
    async fn attribute_groups(&self, set_id: i64) -> MigrateResult<Vec<AttributeGroupRow>> {
        let rows = sqlx::query(
            "SELECT CAST(attribute_group_id AS SIGNED) AS attribute_group_id, \
                    attribute_group_name, \
                    CAST(sort_order AS SIGNED) AS sort_order \
             FROM eav_attribute_group WHERE attribute_set_id = ? ORDER BY sort_order ASC",
        )
        .bind(set_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify_sqlx(e, "attribute groups", set_id))?;

        rows.iter()
            .map(|r| -> Result<_, sqlx::Error> {
                Ok(AttributeGroupRow {
                    attribute_group_id: r.try_get("attribute_group_id")?,
                    attribute_group_name: r.try_get("attribute_group_name")?,
                    sort_order: r.try_get::<Option<i64>, _>("sort_order")?.unwrap_or(0),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| classify_sqlx(e, "attribute groups", set_id))
    }

    async fn group_attributes(
        &self,
        set_id: i64,
        group_id: i64,
    ) -> MigrateResult<Vec<Map<String, Value>>> {
        let key = format!("set={set_id} group={group_id}");
        let rows = sqlx::query(&group_attributes_sql())
            .bind(set_id)
            .bind(group_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx(e, "group attributes", &key))?;
        debug!(set_id, group_id, count = rows.len(), "source db: group attributes");
        rows.iter()
            .map(row_to_map)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| classify_sqlx(e, "group attributes", &key))
    }

    async fn attribute_option_labels(&self, attribute_id: i64) -> MigrateResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT CAST(v.value AS CHAR) AS label \
             FROM eav_attribute_option AS o \
             LEFT JOIN eav_attribute_option_value AS v \
                    ON o.option_id = v.option_id AND v.store_id = 0 \
             WHERE o.attribute_id = ? \
             ORDER BY o.sort_order ASC, o.option_id ASC",
        )
        .bind(attribute_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify_sqlx(e, "attribute options", attribute_id))?;

        let mut labels = Vec::with_capacity(rows.len());
        for r in &rows {
            let label: Option<String> = r
                .try_get("label")
                .map_err(|e| classify_sqlx(e, "attribute options", attribute_id))?;
            if let Some(label) = label.filter(|l| !l.trim().is_empty()) {
                labels.push(label);
            }
        }
        Ok(labels)
    }

    async fn attribute_frontend_label(&self, attribute_id: i64) -> MigrateResult<Option<String>> {
        let row = sqlx::query(
            "SELECT CAST(frontend_label AS CHAR) AS frontend_label FROM eav_attribute WHERE attribute_id = ?",
        )
        .bind(attribute_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify_sqlx(e, "attribute label", attribute_id))?;
        match row {
            Some(r) => r
                .try_get::<Option<String>, _>("frontend_label")
                .map(|l| l.filter(|s| !s.trim().is_empty()))
                .map_err(|e| classify_sqlx(e, "attribute label", attribute_id)),
            None => Ok(None),
        }
    }

    async fn option_label(&self, option_id: i64, store_id: i64) -> MigrateResult<Option<String>> {
        let key = format!("option={option_id} store={store_id}");
        let row = sqlx::query(
            "SELECT CAST(value AS CHAR) AS value FROM eav_attribute_option_value \
             WHERE option_id = ? AND store_id = ? LIMIT 1",
        )
        .bind(option_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify_sqlx(e, "option label", &key))?;
        match row {
            Some(r) => r
                .try_get::<Option<String>, _>("value")
                .map_err(|e| classify_sqlx(e, "option label", &key)),
            None => Ok(None),
        }
    }

    async fn product_category_ids(&self, product_id: i64) -> MigrateResult<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT CAST(category_id AS SIGNED) AS category_id \
             FROM catalog_category_product WHERE product_id = ?",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify_sqlx(e, "product categories", product_id))?;
        rows.iter()
            .map(|r| r.try_get::<i64, _>("category_id"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| classify_sqlx(e, "product categories", product_id))
    }

    async fn media_gallery(&self, product_id: i64) -> MigrateResult<Vec<MediaRow>> {
        let rows = sqlx::query(
            "SELECT CAST(mg.value_id AS SIGNED) AS value_id, \
                    CAST(mg.value AS CHAR) AS file, \
                    CAST(mgv.label AS CHAR) AS label, \
                    CAST(mgv.position AS SIGNED) AS position, \
                    CAST(COALESCE(mgv.disabled, 0) AS SIGNED) AS disabled \
             FROM catalog_product_entity_media_gallery mg \
             LEFT JOIN catalog_product_entity_media_gallery_value mgv \
                    ON mg.value_id = mgv.value_id AND mgv.store_id = 0 \
             WHERE mg.entity_id = ? \
             ORDER BY mgv.position ASC, mg.value_id ASC",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify_sqlx(e, "media gallery", product_id))?;

        rows.iter()
            .map(|r| -> Result<_, sqlx::Error> {
                Ok(MediaRow {
                    value_id: r.try_get("value_id")?,
                    file: r.try_get::<Option<String>, _>("file")?.unwrap_or_default(),
                    label: r.try_get("label")?,
                    position: r.try_get("position")?,
                    disabled: r.try_get::<i64, _>("disabled")? != 0,
                })
            })
            .filter(|m| m.as_ref().map(|m| !m.file.is_empty()).unwrap_or(true))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| classify_sqlx(e, "media gallery", product_id))
    }

    async fn tier_prices(&self, product_id: i64) -> MigrateResult<Vec<TierPriceRow>> {
        let rows = sqlx::query(
            "SELECT CAST(all_groups AS SIGNED) AS all_groups, \
                    CAST(customer_group_id AS SIGNED) AS customer_group_id, \
                    CAST(qty AS CHAR) AS qty, \
                    CAST(value AS CHAR) AS value, \
                    CAST(website_id AS SIGNED) AS website_id \
             FROM catalog_product_entity_tier_price WHERE entity_id = ?",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify_sqlx(e, "tier prices", product_id))?;

        rows.iter()
            .map(|r| -> Result<_, sqlx::Error> {
                Ok(TierPriceRow {
                    all_groups: r.try_get::<i64, _>("all_groups")? != 0,
                    customer_group_id: r.try_get("customer_group_id")?,
                    qty: parse_f64(r.try_get("qty")?),
                    value: parse_f64(r.try_get("value")?),
                    website_id: r.try_get("website_id")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| classify_sqlx(e, "tier prices", product_id))
    }

    async fn super_attributes(&self, product_id: i64) -> MigrateResult<Vec<SuperAttributeRow>> {
        let rows = sqlx::query(
            "SELECT CAST(sa.attribute_id AS SIGNED) AS attribute_id, \
                    ea.attribute_code, \
                    CAST(sal.value AS CHAR) AS label, \
                    CAST(sa.position AS SIGNED) AS position \
             FROM catalog_product_super_attribute sa \
             JOIN eav_attribute ea ON ea.attribute_id = sa.attribute_id \
             LEFT JOIN catalog_product_super_attribute_label sal \
                    ON sal.product_super_attribute_id = sa.product_super_attribute_id \
                   AND sal.store_id = 0 \
             WHERE sa.product_id = ? \
             ORDER BY sa.position ASC",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify_sqlx(e, "super attributes", product_id))?;

        rows.iter()
            .map(|r| -> Result<_, sqlx::Error> {
                Ok(SuperAttributeRow {
                    attribute_id: r.try_get("attribute_id")?,
                    attribute_code: r.try_get("attribute_code")?,
                    label: r.try_get("label")?,
                    position: r.try_get::<Option<i64>, _>("position")?.unwrap_or(0),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| classify_sqlx(e, "super attributes", product_id))
    }

    async fn super_links(&self, parent_id: i64) -> MigrateResult<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT CAST(product_id AS SIGNED) AS product_id \
             FROM catalog_product_super_link WHERE parent_id = ? ORDER BY product_id",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify_sqlx(e, "super links", parent_id))?;
        rows.iter()
            .map(|r| r.try_get::<i64, _>("product_id"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| classify_sqlx(e, "super links", parent_id))
    }

    async fn product_values(
        &self,
        product_id: i64,
        scope: ValueScope,
    ) -> MigrateResult<Vec<EavValue>> {
        let sql = product_values_sql(scope);
        let mut query = sqlx::query(&sql);
        for _ in PRODUCT_VALUE_TABLES {
            query = query.bind(product_id);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx(e, "product values", product_id))?;

        rows.iter()
            .map(|r| -> Result<_, sqlx::Error> {
                Ok(EavValue {
                    attribute_code: r.try_get("attribute_code")?,
                    store_id: r.try_get("store_id")?,
                    value: r.try_get("value")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| classify_sqlx(e, "product values", product_id))
    }

    async fn website_stores(&self) -> MigrateResult<BTreeMap<i64, Vec<i64>>> {
        let rows = sqlx::query(
            "SELECT CAST(store_id AS SIGNED) AS store_id, CAST(website_id AS SIGNED) AS website_id \
             FROM core_store WHERE website_id > 0 ORDER BY store_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify_sqlx(e, "core_store", "*"))?;

        let mut out: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for r in &rows {
            let store_id: i64 = r
                .try_get("store_id")
                .map_err(|e| classify_sqlx(e, "core_store", "*"))?;
            let website_id: i64 = r
                .try_get("website_id")
                .map_err(|e| classify_sqlx(e, "core_store", "*"))?;
            out.entry(website_id).or_default().push(store_id);
        }
        Ok(out)
    }

    async fn category_attribute_values(&self) -> MigrateResult<Vec<CategoryAttributeValue>> {
        let attrs = sqlx::query(
            "SELECT CAST(ea.attribute_id AS SIGNED) AS attribute_id, ea.attribute_code, ea.backend_type \
             FROM eav_attribute AS ea \
             INNER JOIN eav_entity_type AS eet ON ea.entity_type_id = eet.entity_type_id \
             WHERE eet.entity_type_code = 'catalog_category' AND ea.is_user_defined = 1",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify_sqlx(e, "category attributes", "*"))?;

        let mut out = Vec::new();
        for a in &attrs {
            let (attribute_id, code, backend): (i64, String, String) = (
                a.try_get("attribute_id")
                    .map_err(|e| classify_sqlx(e, "category attributes", "*"))?,
                a.try_get("attribute_code")
                    .map_err(|e| classify_sqlx(e, "category attributes", "*"))?,
                a.try_get("backend_type")
                    .map_err(|e| classify_sqlx(e, "category attributes", "*"))?,
            );
            let Some(table) = category_value_table(&backend) else {
                debug!(attribute_code = %code, backend_type = %backend, "source db: static category attribute skipped");
                continue;
            };
            let sql = format!(
                "SELECT CAST(entity_id AS SIGNED) AS category_id, CAST(value AS CHAR) AS value \
                 FROM {table} WHERE attribute_id = ? AND store_id = 0"
            );
            let rows = sqlx::query(&sql)
                .bind(attribute_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| classify_sqlx(e, "category attribute values", &code))?;
            for r in &rows {
                out.push(CategoryAttributeValue {
                    category_id: r
                        .try_get("category_id")
                        .map_err(|e| classify_sqlx(e, "category attribute values", &code))?,
                    attribute_code: code.clone(),
                    value: r
                        .try_get("value")
                        .map_err(|e| classify_sqlx(e, "category attribute values", &code))?,
                });
            }
        }
        info!(values = out.len(), "source db: category attribute values loaded");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_scope_filters_every_value_table() {
        let sql = product_values_sql(ValueScope::AdminOnly);
        assert_eq!(sql.matches("AND store_id = 0").count(), PRODUCT_VALUE_TABLES.len());
        assert_eq!(sql.matches('?').count(), PRODUCT_VALUE_TABLES.len());
        let all = product_values_sql(ValueScope::AllStores);
        assert!(!all.contains("store_id = 0"));
    }

    #[test]
    fn group_query_selects_every_aliased_column() {
        let sql = group_attributes_sql();
        for (_, alias) in ATTRIBUTE_COLUMNS {
            assert!(sql.contains(&format!("AS {alias}")), "{alias}");
        }
        assert!(sql.contains("cea.is_visible_on_front AS CHAR) AS is_visible"));
    }

    #[test]
    fn only_known_backends_map_to_tables() {
        assert_eq!(category_value_table("varchar"), Some("catalog_category_entity_varchar"));
        assert_eq!(category_value_table("static"), None);
    }
}
