//! End-of-run ledger. Append-only; one instance per pipeline run.
use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{Dimension, MigrateError};
use crate::writer::ReconciliationResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub created: usize,
    pub found: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub dry_run: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub entity: String,
    pub key: String,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartialRecord {
    pub entity: String,
    pub id: i64,
    pub api_error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageError {
    pub sku: String,
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedMapping {
    pub dimension: Dimension,
    pub source_id: i64,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedOption {
    pub attribute_code: String,
    pub source_value: String,
    pub store_id: i64,
    pub label: Option<String>,
}

/// Attribute-code comparison of one source set against its target set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SetComparison {
    pub source_set_id: i64,
    pub target_set_id: i64,
    pub source_count: usize,
    pub target_count: usize,
    pub shared: Vec<String>,
    pub source_only: Vec<String>,
    pub target_only: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: BTreeMap<String, OutcomeCounts>,
    pub failures: Vec<FailureRecord>,
    pub partial_records: Vec<PartialRecord>,
    pub image_errors: Vec<ImageError>,
    pub unresolved_mappings: Vec<UnresolvedMapping>,
    pub unresolved_options: Vec<UnresolvedOption>,
    /// Source category id -> created/found target id.
    pub category_map: BTreeMap<i64, i64>,
    pub comparisons: Vec<SetComparison>,
    /// Fatal error that cut the run short; everything above is what got done.
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn new(pipeline: &str, dry_run: bool) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            counts: BTreeMap::new(),
            failures: Vec::new(),
            partial_records: Vec::new(),
            image_errors: Vec::new(),
            unresolved_mappings: Vec::new(),
            unresolved_options: Vec::new(),
            category_map: BTreeMap::new(),
            comparisons: Vec::new(),
            aborted: None,
        }
    }

    fn counts_mut(&mut self, entity: &str) -> &mut OutcomeCounts {
        self.counts.entry(entity.to_string()).or_default()
    }

    pub fn counts(&self, entity: &str) -> OutcomeCounts {
        self.counts.get(entity).cloned().unwrap_or_default()
    }

    pub fn record_result(&mut self, entity: &str, key: &str, result: &ReconciliationResult) {
        match result {
            ReconciliationResult::Created(_) => self.counts_mut(entity).created += 1,
            ReconciliationResult::Found { updated, .. } => {
                let c = self.counts_mut(entity);
                c.found += 1;
                if *updated {
                    c.updated += 1;
                }
            }
            ReconciliationResult::Failed(err) => self.record_failure(entity, key, err),
        }
    }

    pub fn record_failure(&mut self, entity: &str, key: &str, err: &MigrateError) {
        warn!(entity, key, kind = err.kind(), error = %err, "entity failed");
        self.counts_mut(entity).failed += 1;
        self.failures.push(FailureRecord {
            entity: entity.to_string(),
            key: key.to_string(),
            kind: err.kind(),
            reason: err.to_string(),
        });
    }

    pub fn record_skip(&mut self, entity: &str) {
        self.counts_mut(entity).skipped += 1;
    }

    pub fn record_dry_run(&mut self, entity: &str) {
        self.counts_mut(entity).dry_run += 1;
    }

    pub fn record_partial(&mut self, entity: &str, id: i64, api_error: &str) {
        self.partial_records.push(PartialRecord {
            entity: entity.to_string(),
            id,
            api_error: api_error.to_string(),
        });
    }

    pub fn record_image_error(&mut self, sku: &str, url: &str, reason: &str) {
        warn!(sku, url, reason, "image omitted");
        self.image_errors.push(ImageError {
            sku: sku.to_string(),
            url: url.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Each (dimension, id, context) triple is kept once.
    pub fn record_unmapped(&mut self, dimension: Dimension, source_id: i64, context: &str) {
        let entry = UnresolvedMapping {
            dimension,
            source_id,
            context: context.to_string(),
        };
        if !self.unresolved_mappings.contains(&entry) {
            self.unresolved_mappings.push(entry);
        }
    }

    pub fn record_unresolved_option(
        &mut self,
        attribute_code: &str,
        source_value: &str,
        store_id: i64,
        label: Option<&str>,
    ) {
        let entry = UnresolvedOption {
            attribute_code: attribute_code.to_string(),
            source_value: source_value.to_string(),
            store_id,
            label: label.map(str::to_string),
        };
        if !self.unresolved_options.contains(&entry) {
            self.unresolved_options.push(entry);
        }
    }

    pub fn record_category(&mut self, source_id: i64, target_id: i64) {
        self.category_map.insert(source_id, target_id);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Close a run that ended on a fatal error.
    pub fn abort(&mut self, err: &MigrateError) {
        error!(pipeline = %self.pipeline, kind = err.kind(), error = %err, "run aborted");
        self.aborted = Some(err.to_string());
        self.finish();
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty() || self.aborted.is_some()
    }

    pub fn log_summary(&self) {
        for (entity, c) in &self.counts {
            info!(
                pipeline = %self.pipeline,
                entity = %entity,
                created = c.created,
                found = c.found,
                updated = c.updated,
                skipped = c.skipped,
                failed = c.failed,
                dry_run = c.dry_run,
                "run summary"
            );
        }
        info!(
            pipeline = %self.pipeline,
            failures = self.failures.len(),
            partial_records = self.partial_records.len(),
            image_errors = self.image_errors.len(),
            unresolved_mappings = self.unresolved_mappings.len(),
            unresolved_options = self.unresolved_options.len(),
            categories_mapped = self.category_map.len(),
            "run totals"
        );
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        info!(path = %path.display(), "report written");
        Ok(())
    }
}
