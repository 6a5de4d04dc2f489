//! Source -> target identifier translation.
//!
//! Attribute sets, categories and stores are translated through the static
//! tables in the configuration. Option values of select/multiselect
//! attributes are translated at run time by label.
use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::MappingTables;
use crate::error::{Dimension, MigrateResult};
use crate::record::scalar_to_string;
use crate::report::RunReport;
use crate::source::SourceStore;
use crate::target::{StoreScope, TargetApi};

/// Read-only view over the static mapping tables.
#[derive(Debug, Clone, Copy)]
pub struct IdentifierMapper<'a> {
    tables: &'a MappingTables,
}

impl<'a> IdentifierMapper<'a> {
    pub fn new(tables: &'a MappingTables) -> Self {
        Self { tables }
    }

    /// `None` means "drop this relation"; there is no fallback id.
    pub fn map(&self, dimension: Dimension, source_id: i64) -> Option<i64> {
        let table = match dimension {
            Dimension::AttributeSet => &self.tables.attribute_sets,
            Dimension::Category => &self.tables.categories,
            Dimension::Store => &self.tables.stores,
        };
        table.get(&source_id).copied()
    }

    /// Like [`map`](Self::map) but records misses in the report.
    pub fn map_or_report(
        &self,
        dimension: Dimension,
        source_id: i64,
        context: &str,
        report: &mut RunReport,
    ) -> Option<i64> {
        let mapped = self.map(dimension, source_id);
        if mapped.is_none() {
            debug!(%dimension, source_id, context, "mapping: unresolved");
            report.record_unmapped(dimension, source_id, context);
        }
        mapped
    }

    /// Map every id, dropping (and reporting) the unmapped ones.
    pub fn map_all(
        &self,
        dimension: Dimension,
        source_ids: &[i64],
        context: &str,
        report: &mut RunReport,
    ) -> Vec<i64> {
        source_ids
            .iter()
            .filter_map(|id| self.map_or_report(dimension, *id, context, report))
            .collect()
    }

    pub fn version(&self) -> u32 {
        self.tables.version
    }
}

/// First option whose label equals `label` (trimmed). Options with an empty
/// value (the blank placeholder Magento returns first) never match.
pub fn match_option_label(options: &[Value], label: &str) -> Option<String> {
    let wanted = label.trim();
    options.iter().find_map(|opt| {
        let l = opt.get("label").and_then(scalar_to_string)?;
        let v = opt.get("value").and_then(scalar_to_string)?;
        (l.trim() == wanted && !v.trim().is_empty()).then_some(v)
    })
}

/// Translates source option ids to target option ids by label.
///
/// Only attributes in the configured list are touched, and only numeric
/// values. Anything that cannot be resolved keeps its source value and is
/// reported. Duplicate labels resolve to the first target option.
/// Target option lists are fetched once per (attribute, scope).
pub struct OptionResolver<'a> {
    store: &'a dyn SourceStore,
    target: &'a dyn TargetApi,
    attributes: HashSet<String>,
    options: Mutex<HashMap<(String, StoreScope), Vec<Value>>>,
}

impl<'a> OptionResolver<'a> {
    pub fn new(store: &'a dyn SourceStore, target: &'a dyn TargetApi, attributes: &[String]) -> Self {
        Self {
            store,
            target,
            attributes: attributes.iter().map(|a| a.trim().to_string()).collect(),
            options: Mutex::new(HashMap::new()),
        }
    }

    pub fn applies_to(&self, attribute_code: &str, value: &str) -> bool {
        self.attributes.contains(attribute_code) && value.trim().parse::<i64>().is_ok()
    }

    /// Resolve one value. `store_id` is the source store of the value;
    /// `scope` is where the target options are read.
    pub async fn resolve(
        &self,
        attribute_code: &str,
        source_value: &str,
        store_id: i64,
        scope: StoreScope,
        report: &mut RunReport,
    ) -> MigrateResult<String> {
        if !self.applies_to(attribute_code, source_value) {
            return Ok(source_value.to_string());
        }
        let Ok(option_id) = source_value.trim().parse::<i64>() else {
            return Ok(source_value.to_string());
        };

        let mut label = self.store.option_label(option_id, store_id).await?;
        if label.is_none() && store_id != 0 {
            label = self.store.option_label(option_id, 0).await?;
        }
        let Some(label) = label.filter(|l| !l.trim().is_empty()) else {
            report.record_unresolved_option(attribute_code, source_value, store_id, None);
            return Ok(source_value.to_string());
        };

        let mut cache = self.options.lock().await;
        let key = (attribute_code.to_string(), scope);
        if !cache.contains_key(&key) {
            let path = format!(
                "/products/attributes/{}/options",
                urlencoding::encode(attribute_code)
            );
            let reply = self.target.get(scope, &path, &[]).await?;
            let ok = reply.is_success();
            let fetched = match reply.body {
                Value::Array(items) if ok => items,
                _ => Vec::new(),
            };
            debug!(attribute_code, %scope, options = fetched.len(), "mapping: target options loaded");
            cache.insert(key.clone(), fetched);
        }
        let options = cache.get(&key).map(Vec::as_slice).unwrap_or_default();

        match match_option_label(options, &label) {
            Some(target_value) => {
                debug!(attribute_code, source_value, %label, target_value = %target_value, "mapping: option resolved");
                Ok(target_value)
            }
            None => {
                report.record_unresolved_option(attribute_code, source_value, store_id, Some(&label));
                Ok(source_value.to_string())
            }
        }
    }
}
