//! Migration configuration: connection settings for both systems plus the
//! identifier mapping tables, loaded once from a single JSON document.
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{MigrateError, MigrateResult};
use crate::util::env::env_parse;

/// Overrides `timeout_secs` from the environment.
pub const TIMEOUT_ENV: &str = "MIGRATE_TIMEOUT_SECS";

fn default_db_port() -> u16 {
    3306
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_category_parent_id() -> i64 {
    2
}

fn default_website_ids() -> Vec<i64> {
    vec![1]
}

fn default_url_key_suffix() -> String {
    "-1".to_string()
}

fn default_entity_type_id() -> String {
    "4".to_string()
}

fn default_category_attribute_codes() -> Vec<String> {
    ["url_key", "description", "meta_title", "meta_keywords", "meta_description"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_mapping_version() -> u32 {
    1
}

/// Static source → target identifier tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MappingTables {
    #[serde(default = "default_mapping_version")]
    pub version: u32,
    #[serde(default)]
    pub attribute_sets: BTreeMap<i64, i64>,
    #[serde(default)]
    pub categories: BTreeMap<i64, i64>,
    #[serde(default)]
    pub stores: BTreeMap<i64, i64>,
}

/// Knobs that used to differ between the individual transfer scripts.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferOptions {
    /// Source attribute sets to migrate; empty means "every mapped set".
    #[serde(default)]
    pub attribute_sets: Vec<i64>,
    /// Source category ids whose subtrees are transferred.
    #[serde(default)]
    pub category_roots: Vec<i64>,
    #[serde(default = "default_category_parent_id")]
    pub category_parent_id: i64,
    /// Select/multiselect attributes whose option ids are translated by label.
    #[serde(default)]
    pub option_attributes: Vec<String>,
    #[serde(default = "default_website_ids")]
    pub website_ids: Vec<i64>,
    #[serde(default = "default_url_key_suffix")]
    pub url_key_suffix: String,
    #[serde(default = "default_entity_type_id")]
    pub entity_type_id: String,
    #[serde(default = "default_category_attribute_codes")]
    pub category_attribute_codes: Vec<String>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            attribute_sets: Vec::new(),
            category_roots: Vec::new(),
            category_parent_id: default_category_parent_id(),
            option_attributes: Vec::new(),
            website_ids: default_website_ids(),
            url_key_suffix: default_url_key_suffix(),
            entity_type_id: default_entity_type_id(),
            category_attribute_codes: default_category_attribute_codes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    pub magento_domain: String,
    pub api_user: String,
    pub api_key: String,
    /// Target admin password; the source key is reused when absent.
    #[serde(default)]
    pub api_key2: Option<String>,

    pub db_host: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    #[serde(default)]
    pub db_password: String,

    pub magento2_domain: String,
    pub rest_endpoint: String,
    /// Target store id → REST endpoint (e.g. `/rest/fr_fr/V1`).
    #[serde(default)]
    pub store_endpoints: BTreeMap<i64, String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub mappings: MappingTables,
    #[serde(default)]
    pub transfer: TransferOptions,
}

impl MigrationConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MigrateError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut cfg = Self::from_json(&raw)?;
        let timeout_secs = env_parse(TIMEOUT_ENV, cfg.timeout_secs);
        if timeout_secs > 0 && timeout_secs != cfg.timeout_secs {
            info!(timeout_secs, "config: timeout from {TIMEOUT_ENV}");
            cfg.timeout_secs = timeout_secs;
        }
        info!(
            path = %path.display(),
            mapping_version = cfg.mappings.version,
            attribute_sets = cfg.mappings.attribute_sets.len(),
            categories = cfg.mappings.categories.len(),
            stores = cfg.mappings.stores.len(),
            store_endpoints = cfg.store_endpoints.len(),
            "config loaded"
        );
        Ok(cfg)
    }

    pub fn from_json(raw: &str) -> MigrateResult<Self> {
        let doc: Value = serde_json::from_str(raw)
            .map_err(|e| MigrateError::Config(format!("invalid config json: {e}")))?;
        let legacy = legacy_store_endpoints(&doc);
        let mut cfg: MigrationConfig = serde_json::from_value(doc)
            .map_err(|e| MigrateError::Config(format!("invalid config: {e}")))?;
        for (store_id, endpoint) in legacy {
            cfg.store_endpoints.entry(store_id).or_insert(endpoint);
        }
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    fn normalize(&mut self) {
        for s in [
            &mut self.magento_domain,
            &mut self.api_user,
            &mut self.api_key,
            &mut self.db_host,
            &mut self.db_name,
            &mut self.db_user,
            &mut self.magento2_domain,
            &mut self.rest_endpoint,
        ] {
            *s = s.trim().to_string();
        }
        self.magento_domain = self.magento_domain.trim_end_matches('/').to_string();
        self.magento2_domain = self.magento2_domain.trim_end_matches('/').to_string();
        self.rest_endpoint = normalize_endpoint(&self.rest_endpoint);
        for endpoint in self.store_endpoints.values_mut() {
            *endpoint = normalize_endpoint(endpoint);
        }
    }

    fn validate(&self) -> MigrateResult<()> {
        let required = [
            ("magento_domain", &self.magento_domain),
            ("api_user", &self.api_user),
            ("api_key", &self.api_key),
            ("db_host", &self.db_host),
            ("db_name", &self.db_name),
            ("db_user", &self.db_user),
            ("magento2_domain", &self.magento2_domain),
            ("rest_endpoint", &self.rest_endpoint),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, v)| v.is_empty())
            .map(|(k, _)| *k)
            .collect();
        if !missing.is_empty() {
            return Err(MigrateError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }
        if self.timeout_secs == 0 {
            return Err(MigrateError::Config("timeout_secs must be > 0".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn target_password(&self) -> &str {
        self.api_key2
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.api_key)
    }

    /// Source attribute sets to process: explicit list, else every mapped set.
    pub fn source_attribute_sets(&self) -> Vec<i64> {
        if self.transfer.attribute_sets.is_empty() {
            self.mappings.attribute_sets.keys().copied().collect()
        } else {
            self.transfer.attribute_sets.clone()
        }
    }
}

/// Per-store endpoint keys in the old layout: `rest_endpoint_<locale>_<store_id>`.
fn legacy_store_endpoints(doc: &Value) -> Vec<(i64, String)> {
    let Some(obj) = doc.as_object() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for (key, value) in obj {
        let Some(rest) = key.strip_prefix("rest_endpoint_") else {
            continue;
        };
        let Some(store_id) = rest.rsplit('_').next().and_then(|s| s.parse::<i64>().ok()) else {
            warn!(key = %key, "ignoring rest endpoint key without trailing store id");
            continue;
        };
        if let Some(endpoint) = value.as_str() {
            out.push((store_id, endpoint.to_string()));
        }
    }
    out
}

fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
