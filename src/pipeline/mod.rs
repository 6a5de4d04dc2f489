//! Entity-kind drivers. Each pipeline walks its source entities strictly in
//! sequence and funnels every write through [`PipelineContext::submit`].
pub mod attributes;
pub mod categories;
pub mod compare;
pub mod products;

use std::fmt;

use serde_json::Value;
use tracing::info;

use crate::config::MigrationConfig;
use crate::error::{MigrateError, MigrateResult};
use crate::mapping::IdentifierMapper;
use crate::payload::AssetFetcher;
use crate::report::RunReport;
use crate::source::SourceReader;
use crate::target::TargetApi;
use crate::writer::{Resource, TargetWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    Attributes,
    Categories,
    CategoryAttributes,
    Products,
    ProductStoreViews,
    Compare,
}

impl Pipeline {
    pub fn name(&self) -> &'static str {
        match self {
            Pipeline::Attributes => "attributes",
            Pipeline::Categories => "categories",
            Pipeline::CategoryAttributes => "category-attributes",
            Pipeline::Products => "products",
            Pipeline::ProductStoreViews => "product-store-views",
            Pipeline::Compare => "compare",
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one submitted payload, as far as the caller cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Written(i64),
    DryRun,
    Failed,
}

impl Submitted {
    pub fn target_id(self) -> Option<i64> {
        match self {
            Submitted::Written(id) => Some(id),
            Submitted::DryRun | Submitted::Failed => None,
        }
    }
}

/// Everything a pipeline needs, borrowed for the length of one run.
pub struct PipelineContext<'a> {
    pub cfg: &'a MigrationConfig,
    pub source: SourceReader<'a>,
    pub target: &'a dyn TargetApi,
    pub assets: &'a dyn AssetFetcher,
    pub dry_run: bool,
}

impl<'a> PipelineContext<'a> {
    pub fn mapper(&self) -> IdentifierMapper<'a> {
        IdentifierMapper::new(&self.cfg.mappings)
    }

    pub fn writer(&self) -> TargetWriter<'a> {
        TargetWriter::new(self.target, &self.cfg.transfer.url_key_suffix)
    }

    /// Write one payload, or only log it in dry-run mode. The outcome is
    /// recorded under the resource's entity name.
    pub async fn submit(
        &self,
        resource: &Resource,
        body: Value,
        report: &mut RunReport,
    ) -> MigrateResult<Submitted> {
        let entity = resource.entity();
        let key = resource.key();
        if self.dry_run {
            info!(entity, key = %key, payload = %body, "dry run: payload built");
            report.record_dry_run(entity);
            return Ok(Submitted::DryRun);
        }
        let result = self.writer().write(resource, body).await?;
        report.record_result(entity, &key, &result);
        Ok(result
            .target_id()
            .map(Submitted::Written)
            .unwrap_or(Submitted::Failed))
    }
}

/// Entity-level errors are recorded and turned into `None`; fatal ones
/// propagate and end the run.
pub fn contain<T>(
    result: MigrateResult<T>,
    report: &mut RunReport,
    entity: &str,
    key: &str,
) -> MigrateResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            report.record_failure(entity, key, &e);
            Ok(None)
        }
    }
}

/// A run cut short by a fatal error. `report` holds everything recorded
/// before the abort.
#[derive(Debug, thiserror::Error)]
#[error("pipeline {} aborted: {error}", .report.pipeline)]
pub struct Aborted {
    pub report: RunReport,
    #[source]
    pub error: MigrateError,
}

/// Run one pipeline to completion and return its report.
pub async fn run(ctx: &PipelineContext<'_>, pipeline: Pipeline) -> Result<RunReport, Aborted> {
    let mut report = RunReport::new(pipeline.name(), ctx.dry_run);
    info!(
        %pipeline,
        dry_run = ctx.dry_run,
        mapping_version = ctx.mapper().version(),
        "pipeline: start"
    );
    let outcome = match pipeline {
        Pipeline::Attributes => attributes::run(ctx, &mut report).await,
        Pipeline::Categories => categories::run(ctx, &mut report).await,
        Pipeline::CategoryAttributes => categories::run_attributes(ctx, &mut report).await,
        Pipeline::Products => products::run(ctx, &mut report, false).await,
        Pipeline::ProductStoreViews => products::run(ctx, &mut report, true).await,
        Pipeline::Compare => compare::run(ctx, &mut report).await,
    };
    match outcome {
        Ok(()) => {
            report.finish();
            report.log_summary();
            Ok(report)
        }
        Err(error) => {
            report.abort(&error);
            report.log_summary();
            Err(Aborted { report, error })
        }
    }
}
