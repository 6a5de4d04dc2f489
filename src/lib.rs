//! Magento 1.9 → Magento 2.4 catalog migration.
//!
//! Entities flow strictly one at a time through
//! source read → identifier mapping → payload build → target write,
//! with every per-entity outcome collected in a [`report::RunReport`].
pub mod config;
pub mod error;
pub mod mapping;
pub mod payload;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod source;
pub mod target;
pub mod tracing;
pub mod writer;

pub mod util {
    pub mod env;
}

#[cfg(test)]
mod testing;

pub use config::MigrationConfig;
pub use error::{MigrateError, MigrateResult};
pub use pipeline::{Aborted, Pipeline, PipelineContext};
pub use report::RunReport;
