use std::fmt;

use serde::Serialize;

/// Which side of the migration a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum System {
    SourceApi,
    SourceDb,
    Target,
    Assets,
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            System::SourceApi => "source soap api",
            System::SourceDb => "source database",
            System::Target => "target rest api",
            System::Assets => "source media",
        })
    }
}

/// Mapped identifier dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    AttributeSet,
    Category,
    Store,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dimension::AttributeSet => "attribute set",
            Dimension::Category => "category",
            Dimension::Store => "store",
        })
    }
}

/// Errors raised anywhere in the pipeline.
///
/// Only [`MigrateError::Config`] and [`MigrateError::Connection`] end a run;
/// every other variant is scoped to one entity and lands in the run report.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection failure ({system}): {reason}")]
    Connection { system: System, reason: String },

    #[error("failed to fetch {entity} {id}: {reason}")]
    EntityFetch {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("no {dimension} mapping for source id {source_id}")]
    MappingUnresolved { dimension: Dimension, source_id: i64 },

    #[error("{entity} `{key}` conflicts with an existing target record: {message}")]
    ConflictOnCreate {
        entity: &'static str,
        key: String,
        message: String,
    },

    #[error("write rejected for {entity} `{key}`: {reason}")]
    Write {
        entity: &'static str,
        key: String,
        reason: String,
    },
}

pub type MigrateResult<T> = Result<T, MigrateError>;

impl MigrateError {
    pub fn connection(system: System, reason: impl fmt::Display) -> Self {
        MigrateError::Connection {
            system,
            reason: reason.to_string(),
        }
    }

    pub fn fetch(entity: &'static str, id: impl fmt::Display, reason: impl fmt::Display) -> Self {
        MigrateError::EntityFetch {
            entity,
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MigrateError::Config(_) | MigrateError::Connection { .. }
        )
    }

    /// Short machine-friendly category used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            MigrateError::Config(_) => "config",
            MigrateError::Connection { .. } => "connection_failure",
            MigrateError::EntityFetch { .. } => "entity_fetch_failure",
            MigrateError::MappingUnresolved { .. } => "mapping_unresolved",
            MigrateError::ConflictOnCreate { .. } => "conflict_on_create",
            MigrateError::Write { .. } => "write_failure",
        }
    }
}

/// Split sqlx failures into "the database is gone" and "this query failed".
pub fn classify_sqlx(err: sqlx::Error, entity: &'static str, id: impl fmt::Display) -> MigrateError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => MigrateError::connection(System::SourceDb, err),
        other => MigrateError::fetch(entity, id, other),
    }
}

/// Transport failures talking to an HTTP peer are run-fatal; anything else
/// is attributed to the entity being processed.
pub fn classify_reqwest(err: reqwest::Error, system: System) -> MigrateError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        MigrateError::connection(system, err)
    } else {
        MigrateError::Write {
            entity: "request",
            key: err
                .url()
                .map(|u| u.path().to_string())
                .unwrap_or_default(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_config_and_connection_are_fatal() {
        assert!(MigrateError::Config("x".into()).is_fatal());
        assert!(MigrateError::connection(System::Target, "refused").is_fatal());
        assert!(!MigrateError::fetch("product", 5, "boom").is_fatal());
        assert!(!MigrateError::MappingUnresolved {
            dimension: Dimension::Category,
            source_id: 999
        }
        .is_fatal());
    }

    #[test]
    fn messages_name_the_entity() {
        let err = MigrateError::MappingUnresolved {
            dimension: Dimension::AttributeSet,
            source_id: 41,
        };
        assert_eq!(err.to_string(), "no attribute set mapping for source id 41");
        assert_eq!(err.kind(), "mapping_unresolved");
    }

    #[test]
    fn pool_timeouts_are_connection_failures() {
        let err = classify_sqlx(sqlx::Error::PoolTimedOut, "product", 1);
        assert!(err.is_fatal());
        let err = classify_sqlx(sqlx::Error::RowNotFound, "product", 1);
        assert_eq!(err.kind(), "entity_fetch_failure");
    }
}
