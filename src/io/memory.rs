//! In-memory collaborator implementations
//!
//! Back the simulated plant and the test suite. Binary signals are stored as
//! on-intervals so `CountOn`/`DurationOn` behave like the gateway's
//! calculation engine rather than returning canned numbers.

use super::{
    CalcKind, CalcReader, ErrorReport, ErrorReporter, HistorianReader, QueryError, ReferenceStore,
    TagBrowser, TagValue, TagWriter,
};
use crate::types::{ReferenceRecord, Sample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, RwLock};

fn poisoned(what: &str) -> QueryError {
    QueryError::Unavailable(format!("{what} lock poisoned"))
}

// ============================================================================
// Historian
// ============================================================================

/// Historized series keyed by tag path.
#[derive(Debug, Default)]
pub struct InMemoryHistorian {
    series: RwLock<HashMap<String, Vec<Sample>>>,
}

impl InMemoryHistorian {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the series for a tag. Samples are kept sorted by timestamp.
    pub fn set_series(&self, tag_path: impl Into<String>, mut samples: Vec<Sample>) {
        samples.sort_by_key(|s| s.timestamp);
        if let Ok(mut series) = self.series.write() {
            series.insert(tag_path.into(), samples);
        }
    }
}

#[async_trait]
impl HistorianReader for InMemoryHistorian {
    async fn query(
        &self,
        tag_path: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>, QueryError> {
        let series = self.series.read().map_err(|_| poisoned("historian"))?;
        Ok(series
            .get(tag_path)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| s.timestamp >= start && s.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ============================================================================
// Topology Browser
// ============================================================================

/// Child listings keyed by browse path.
#[derive(Debug, Default)]
pub struct InMemoryBrowser {
    children: RwLock<HashMap<String, Vec<String>>>,
    failing: RwLock<HashSet<String>>,
}

impl InMemoryBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_children(&self, path: impl Into<String>, names: Vec<String>) {
        if let Ok(mut children) = self.children.write() {
            children.insert(path.into(), names);
        }
    }

    /// Make subsequent browses of `path` fail (enumeration-failure tests).
    pub fn fail_path(&self, path: impl Into<String>) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(path.into());
        }
    }
}

#[async_trait]
impl TagBrowser for InMemoryBrowser {
    async fn browse(&self, path: &str) -> Result<Vec<String>, QueryError> {
        if self
            .failing
            .read()
            .map_err(|_| poisoned("browser"))?
            .contains(path)
        {
            return Err(QueryError::Unavailable(format!("browse failed for {path}")));
        }
        let children = self.children.read().map_err(|_| poisoned("browser"))?;
        Ok(children.get(path).cloned().unwrap_or_default())
    }
}

// ============================================================================
// Calculation Engine
// ============================================================================

/// Binary signals as on-intervals, plus current tag values.
#[derive(Debug, Default)]
pub struct InMemoryCalc {
    /// Tag path → closed-open `[on, off)` spans, sorted by start.
    on_spans: RwLock<HashMap<String, Vec<(DateTime<Utc>, DateTime<Utc>)>>>,
    current: RwLock<HashMap<String, TagValue>>,
    failing: RwLock<HashSet<String>>,
}

impl InMemoryCalc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_spans(
        &self,
        tag_path: impl Into<String>,
        mut spans: Vec<(DateTime<Utc>, DateTime<Utc>)>,
    ) {
        spans.sort_by_key(|(on, _)| *on);
        if let Ok(mut on_spans) = self.on_spans.write() {
            on_spans.insert(tag_path.into(), spans);
        }
    }

    pub fn set_current(&self, tag_path: impl Into<String>, value: TagValue) {
        if let Ok(mut current) = self.current.write() {
            current.insert(tag_path.into(), value);
        }
    }

    /// Make subsequent calc queries of `path` fail.
    pub fn fail_path(&self, path: impl Into<String>) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(path.into());
        }
    }
}

#[async_trait]
impl CalcReader for InMemoryCalc {
    async fn calc(
        &self,
        tag_path: &str,
        kind: CalcKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<f64>, QueryError> {
        if self
            .failing
            .read()
            .map_err(|_| poisoned("calc"))?
            .contains(tag_path)
        {
            return Err(QueryError::Unavailable(format!("calc failed for {tag_path}")));
        }
        let on_spans = self.on_spans.read().map_err(|_| poisoned("calc"))?;
        let Some(spans) = on_spans.get(tag_path) else {
            return Ok(None);
        };

        let result = match kind {
            CalcKind::CountOn => spans
                .iter()
                .filter(|(on, _)| *on >= start && *on < end)
                .count() as f64,
            CalcKind::DurationOn => spans
                .iter()
                .map(|&(on, off)| {
                    let clipped_on = on.max(start);
                    let clipped_off = off.min(end);
                    if clipped_on < clipped_off {
                        (clipped_off - clipped_on).num_milliseconds() as f64 / 1000.0
                    } else {
                        0.0
                    }
                })
                .sum(),
        };
        Ok(Some(result))
    }

    async fn read_tag(&self, tag_path: &str) -> Result<Option<TagValue>, QueryError> {
        let current = self.current.read().map_err(|_| poisoned("calc"))?;
        Ok(current.get(tag_path).cloned())
    }
}

// ============================================================================
// Reference Store
// ============================================================================

/// Recipe reference rows keyed by canonical machine key.
#[derive(Debug, Default)]
pub struct InMemoryReferenceStore {
    rows: RwLock<HashMap<String, Vec<ReferenceRecord>>>,
}

impl InMemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rows(&self, machine_key: impl Into<String>, records: Vec<ReferenceRecord>) {
        if let Ok(mut rows) = self.rows.write() {
            rows.insert(machine_key.into(), records);
        }
    }
}

#[async_trait]
impl ReferenceStore for InMemoryReferenceStore {
    async fn recipes_for_machine(
        &self,
        machine_key: &str,
    ) -> Result<Vec<ReferenceRecord>, QueryError> {
        let rows = self.rows.read().map_err(|_| poisoned("reference store"))?;
        Ok(rows.get(machine_key).cloned().unwrap_or_default())
    }

    async fn recipe(
        &self,
        machine_key: &str,
        recipe_name: &str,
    ) -> Result<Option<ReferenceRecord>, QueryError> {
        let rows = self.rows.read().map_err(|_| poisoned("reference store"))?;
        Ok(rows
            .get(machine_key)
            .and_then(|records| records.iter().find(|r| r.recipe == recipe_name))
            .cloned())
    }
}

// ============================================================================
// Tag Writer
// ============================================================================

/// Records writes for inspection; last write per path wins.
#[derive(Debug, Default)]
pub struct InMemoryTagWriter {
    written: RwLock<BTreeMap<String, TagValue>>,
}

impl InMemoryTagWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tag_path: &str) -> Option<TagValue> {
        self.written.read().ok()?.get(tag_path).cloned()
    }

    pub fn all(&self) -> BTreeMap<String, TagValue> {
        self.written.read().map(|w| w.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TagWriter for InMemoryTagWriter {
    async fn write(&self, tag_path: &str, value: TagValue) -> Result<(), QueryError> {
        self.written
            .write()
            .map_err(|_| poisoned("tag writer"))?
            .insert(tag_path.to_string(), value);
        Ok(())
    }
}

// ============================================================================
// Error Reporter
// ============================================================================

/// Collects reports for test assertions.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<ErrorReport>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, report: ErrorReport) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, h, m, 0).single().unwrap()
    }

    #[tokio::test]
    async fn count_on_counts_transitions_inside_range() {
        let calc = InMemoryCalc::new();
        calc.set_on_spans("sig", vec![(at(7, 0), at(7, 30)), (at(9, 0), at(9, 5)), (at(10, 0), at(10, 1))]);

        let count = calc
            .calc("sig", CalcKind::CountOn, at(8, 0), at(10, 0))
            .await
            .unwrap();
        // 9:00 span starts inside; 7:00 is before, 10:00 is at the open end.
        assert_eq!(count, Some(1.0));
    }

    #[tokio::test]
    async fn duration_on_clips_spans_to_range() {
        let calc = InMemoryCalc::new();
        calc.set_on_spans("sig", vec![(at(7, 50), at(8, 10))]);

        let secs = calc
            .calc("sig", CalcKind::DurationOn, at(8, 0), at(9, 0))
            .await
            .unwrap();
        assert_eq!(secs, Some(600.0));
    }

    #[tokio::test]
    async fn calc_returns_none_for_unknown_tag() {
        let calc = InMemoryCalc::new();
        let result = calc
            .calc("nope", CalcKind::DurationOn, at(8, 0), at(9, 0))
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn historian_range_is_inclusive() {
        let historian = InMemoryHistorian::new();
        historian.set_series(
            "recipe",
            vec![Sample::new(at(7, 0), "A"), Sample::new(at(8, 0), "B"), Sample::new(at(9, 0), "C")],
        );

        let samples = historian.query("recipe", at(8, 0), at(9, 0)).await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].recipe, "B");
    }
}
