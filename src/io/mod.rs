//! External collaborator interfaces
//!
//! The pipeline consumes the plant through five narrow capabilities: the
//! historized series reader, the tag topology browser, the calculation query
//! interface, the recipe reference store, and the tag writer. Each is a trait
//! so the reporting core stays independent of the gateway wire protocol;
//! implementations handle transport, authentication, and retries internally.
//!
//! Failure contract: a collaborator returns `Ok(None)` / empty collections
//! for data-not-found, and `Err(QueryError)` for transport-level faults.
//! Callers convert both into the same safe defaults; nothing a
//! collaborator does should abort a reporting cycle.

pub mod memory;

use crate::types::{ReferenceRecord, Sample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by external collaborators.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Calculation kinds supported by the gateway's tag-calculation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcKind {
    /// Number of off→on transitions of a binary signal over the range.
    CountOn,
    /// Cumulative seconds the signal was on over the range.
    DurationOn,
}

/// Value written to an output tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Float(f64),
    Int(i64),
    Text(String),
}

/// Historized series reader.
///
/// Returns samples ordered by timestamp, last-known value per sampling
/// interval (the gateway's "Wide" return format with unbounded size).
#[async_trait]
pub trait HistorianReader: Send + Sync {
    async fn query(
        &self,
        tag_path: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>, QueryError>;
}

/// Tag topology browser, used to enumerate machines under a system.
#[async_trait]
pub trait TagBrowser: Send + Sync {
    /// Child names directly under `path` (relative, no leading slash).
    async fn browse(&self, path: &str) -> Result<Vec<String>, QueryError>;
}

/// Calculation query interface for completion counts and on-durations.
#[async_trait]
pub trait CalcReader: Send + Sync {
    /// `Ok(None)` when the engine has no data for the range.
    async fn calc(
        &self,
        tag_path: &str,
        kind: CalcKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<f64>, QueryError>;

    /// Current value of a tag (used for the active-recipe read).
    async fn read_tag(&self, tag_path: &str) -> Result<Option<TagValue>, QueryError>;
}

/// Recipe reference store, keyed by normalized machine name.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// All reference rows for a machine, including any `"default"` sentinel.
    async fn recipes_for_machine(
        &self,
        machine_key: &str,
    ) -> Result<Vec<ReferenceRecord>, QueryError>;

    /// The single row for a machine's named recipe, if present.
    async fn recipe(
        &self,
        machine_key: &str,
        recipe_name: &str,
    ) -> Result<Option<ReferenceRecord>, QueryError>;
}

/// Fire-and-forget tag writer for computed scorecard fields.
///
/// No read-modify-write guarantee is required or assumed; the next cycle
/// overwrites whatever this one wrote.
#[async_trait]
pub trait TagWriter: Send + Sync {
    async fn write(&self, tag_path: &str, value: TagValue) -> Result<(), QueryError>;
}

// ============================================================================
// Error Reporting
// ============================================================================

/// A structured error report emitted when a unit of work degrades.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Pipeline stage that degraded, e.g. `"aggregator.parts_complete"`.
    pub stage: String,
    /// Machine or system context, e.g. `"Line A/Machine 2"`.
    pub scope: String,
    pub detail: String,
}

impl ErrorReport {
    pub fn new(
        stage: impl Into<String>,
        scope: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            scope: scope.into(),
            detail: detail.into(),
        }
    }
}

/// Error-reporting sink.
///
/// Failures are caught at the smallest meaningful unit and converted to safe
/// defaults plus one of these reports; the report must never itself fail the
/// cycle.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: ErrorReport);
}

/// Default reporter: logs through `tracing` at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, report: ErrorReport) {
        tracing::warn!(
            stage = %report.stage,
            scope = %report.scope,
            "{}",
            report.detail
        );
    }
}

// ============================================================================
// Timeouts
// ============================================================================

/// Bound an external query with a timeout.
///
/// An elapsed timeout becomes `QueryError::Timeout`, which callers treat
/// exactly like a data-not-found outcome.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, QueryError>
where
    F: Future<Output = Result<T, QueryError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(QueryError::Timeout(limit)),
    }
}
