//! Rebuilding a page's highlights from its log.
//!
//! Records are applied strictly in ascending date order so every delete sees
//! the wrapping of the create it cancels. Anchoring failures never abort a
//! replay: each create that could not be marked becomes a failure candidate,
//! and candidates later canceled by a delete are dropped during
//! reconciliation because they no longer matter.

use crate::anchor;
use crate::dom::Document;
use crate::error::HighlightError;
use crate::log::backend::Backend;
use crate::log::store::{QueryOptions, Store};
use crate::log::{Event, LogRecord, RecordId};
use crate::marker::Marker;
use crate::page_key::PageKey;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayPhase {
    Idle,
    Fetching,
    Replaying,
    Reconciling,
    Done,
    Failed,
}

/// What the page-level indicator should show after a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Indicator {
    Hidden,
    Shown { count: i64 },
    NotAllFound { count: i64, missing: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Creates minus deletes, independent of what could be marked.
    pub sum: i64,
    /// Live creates whose anchor could not be marked.
    pub failures: Vec<RecordId>,
    /// Creates that ended up marked, including those already present.
    pub marked: usize,
    pub phase: ReplayPhase,
}

impl ReplayReport {
    fn empty() -> Self {
        Self {
            sum: 0,
            failures: Vec::new(),
            marked: 0,
            phase: ReplayPhase::Done,
        }
    }

    pub fn all_found(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn indicator(&self) -> Indicator {
        if !self.failures.is_empty() {
            Indicator::NotAllFound {
                count: self.sum,
                missing: self.failures.len(),
            }
        } else if self.sum > 0 {
            Indicator::Shown { count: self.sum }
        } else {
            Indicator::Hidden
        }
    }
}

/// Replays one page load. After a successful run the engine keeps its report
/// and hands it out again instead of retrying.
#[derive(Debug)]
pub struct ReplayEngine {
    marker: Marker,
    phase: ReplayPhase,
    report: Option<ReplayReport>,
}

impl ReplayEngine {
    pub fn new(marker: Marker) -> Self {
        Self {
            marker,
            phase: ReplayPhase::Idle,
            report: None,
        }
    }

    pub fn phase(&self) -> ReplayPhase {
        self.phase
    }

    fn enter(&mut self, phase: ReplayPhase) {
        debug!(from = ?self.phase, to = ?phase, "replay phase");
        self.phase = phase;
    }

    pub fn replay<B: Backend>(
        &mut self,
        store: &Store<B>,
        doc: &mut Document,
        page_key: &PageKey,
    ) -> Result<ReplayReport, HighlightError> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }

        self.enter(ReplayPhase::Fetching);
        let records = match store.query(page_key, &QueryOptions::default()) {
            Ok(records) => records,
            Err(err) => {
                self.enter(ReplayPhase::Failed);
                return Err(err.into());
            }
        };

        let report = if records.is_empty() {
            self.enter(ReplayPhase::Done);
            ReplayReport::empty()
        } else {
            self.replay_records(doc, &records)
        };
        self.report = Some(report.clone());
        Ok(report)
    }

    /// Applies `records`, which must be in ascending date order.
    pub fn replay_records(&mut self, doc: &mut Document, records: &[LogRecord]) -> ReplayReport {
        self.enter(ReplayPhase::Replaying);
        let mut sum = 0;
        let mut candidates: Vec<RecordId> = Vec::new();
        let mut canceled: HashSet<&RecordId> = HashSet::new();

        for record in records {
            sum += record.weight();
            match &record.event {
                Event::Create(create) => {
                    if !self.apply_create(doc, &record.id, &create.anchor, &create.style_class) {
                        candidates.push(record.id.clone());
                    }
                }
                Event::Delete { corresponding_id } => {
                    canceled.insert(corresponding_id);
                    if let Err(err) = self.marker.unmark(doc, corresponding_id.as_str()) {
                        debug!(id = %corresponding_id, error = %err, "unmark during replay failed");
                    }
                }
            }
        }

        self.enter(ReplayPhase::Reconciling);
        let failures: Vec<RecordId> = candidates
            .into_iter()
            .filter(|id| !canceled.contains(id))
            .collect();
        if !failures.is_empty() {
            warn!(missing = failures.len(), "highlights could not be anchored");
        }
        if sum < 0 {
            warn!(sum, "negative highlight sum during replay");
        }

        let marked = records
            .iter()
            .filter(|record| record.as_create().is_some() && !canceled.contains(&record.id))
            .count()
            - failures.len();

        self.enter(ReplayPhase::Done);
        ReplayReport {
            sum,
            failures,
            marked,
            phase: ReplayPhase::Done,
        }
    }

    fn apply_create(
        &self,
        doc: &mut Document,
        id: &RecordId,
        anchor: &anchor::Anchor,
        style_class: &str,
    ) -> bool {
        if !self.marker.mark_elements(doc, id.as_str()).is_empty() {
            debug!(%id, "highlight already present");
            return true;
        }
        let Some(range) = anchor::to_range(doc, anchor) else {
            debug!(%id, "anchor did not resolve");
            return false;
        };
        match self
            .marker
            .mark(doc, &range, Some(style_class), Some(id.as_str()))
        {
            Ok(wrappers) => !wrappers.is_empty(),
            Err(err) => {
                debug!(%id, error = %err, "mark during replay failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::Anchor;
    use crate::dom::Range;
    use crate::log::CreateEvent;

    fn create(id: &str, date: u64, anchor: Anchor) -> LogRecord {
        LogRecord {
            id: RecordId::new(id),
            page_key: PageKey::new("p"),
            date,
            event: Event::Create(CreateEvent {
                anchor,
                style_class: "red".to_string(),
                text: String::new(),
                title: None,
            }),
        }
    }

    fn delete(id: &str, date: u64, target: &str) -> LogRecord {
        LogRecord {
            id: RecordId::new(id),
            page_key: PageKey::new("p"),
            date,
            event: Event::Delete {
                corresponding_id: RecordId::new(target),
            },
        }
    }

    fn anchor_for(doc: &Document, needle: &str) -> Anchor {
        let range = Range::find_text(doc, needle).unwrap();
        anchor::to_anchor(doc, &range).unwrap()
    }

    fn stale_anchor() -> Anchor {
        Anchor {
            start_path: "/html/body/article/text()".to_string(),
            start_offset: 0,
            end_path: Some("/html/body/article/text()".to_string()),
            end_offset: Some(3),
            collapsed: false,
        }
    }

    const PAGE: &str = "<html><body><p>alpha beta gamma</p></body></html>";

    #[test]
    fn test_creates_are_marked() {
        let mut doc = Document::parse_html(PAGE);
        let records = vec![create("hla", 1, anchor_for(&doc, "beta"))];
        let mut engine = ReplayEngine::new(Marker::default());
        let report = engine.replay_records(&mut doc, &records);

        assert_eq!(report.sum, 1);
        assert_eq!(report.marked, 1);
        assert!(report.all_found());
        assert_eq!(report.indicator(), Indicator::Shown { count: 1 });
        assert_eq!(engine.phase(), ReplayPhase::Done);
        assert!(doc.element_by_id("hla").is_some());
    }

    #[test]
    fn test_stale_create_is_failure() {
        let mut doc = Document::parse_html(PAGE);
        let records = vec![create("hla", 1, stale_anchor())];
        let report = ReplayEngine::new(Marker::default()).replay_records(&mut doc, &records);

        assert_eq!(report.failures, vec![RecordId::new("hla")]);
        assert_eq!(
            report.indicator(),
            Indicator::NotAllFound {
                count: 1,
                missing: 1
            }
        );
    }

    #[test]
    fn test_deleted_stale_create_is_reconciled() {
        let mut doc = Document::parse_html(PAGE);
        let records = vec![create("hla", 1, stale_anchor()), delete("hld", 2, "hla")];
        let report = ReplayEngine::new(Marker::default()).replay_records(&mut doc, &records);

        assert!(report.failures.is_empty());
        assert_eq!(report.sum, 0);
        assert_eq!(report.indicator(), Indicator::Hidden);
    }

    #[test]
    fn test_delete_unwraps_earlier_create() {
        let mut doc = Document::parse_html(PAGE);
        let before = doc.to_html();
        let records = vec![
            create("hla", 1, anchor_for(&doc, "beta")),
            delete("hld", 2, "hla"),
        ];
        let report = ReplayEngine::new(Marker::default()).replay_records(&mut doc, &records);
        assert_eq!(report.marked, 0);
        assert_eq!(doc.to_html(), before);
    }

    #[test]
    fn test_existing_chain_is_not_marked_twice() {
        let mut doc = Document::parse_html(PAGE);
        let records = vec![create("hla", 1, anchor_for(&doc, "beta"))];
        ReplayEngine::new(Marker::default()).replay_records(&mut doc, &records);
        let once = doc.to_html();
        let report = ReplayEngine::new(Marker::default()).replay_records(&mut doc, &records);
        assert_eq!(doc.to_html(), once);
        assert_eq!(report.marked, 1);
    }
}
