//! User-facing highlight operations.
//!
//! Each operation is a short protocol over the [`Store`] and one or more
//! documents. The log is authoritative: persistence always happens first,
//! and a document is only ever a cache that may lag behind it.

use crate::anchor;
use crate::dom::{Document, NodeId, Range};
use crate::error::HighlightError;
use crate::log::backend::Backend;
use crate::log::store::{CreatePatch, Deletion, QueryOptions, Store};
use crate::log::{Event, LogRecord, RecordId};
use crate::marker::Marker;
use crate::page_key::PageKey;
use crate::replay::{ReplayEngine, ReplayReport};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Result of [`Highlighter::delete`] and [`Highlighter::undo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deletion: Deletion,
    /// Page sum after the deletion.
    pub sum: i64,
    /// Records purged because the page had no live highlights left.
    pub purged: usize,
}

pub struct Highlighter<B: Backend> {
    store: Store<B>,
    marker: Marker,
}

impl<B: Backend> Highlighter<B> {
    pub fn new(store: Store<B>, marker: Marker) -> Self {
        Self { store, marker }
    }

    pub fn store(&self) -> &Store<B> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store<B> {
        &mut self.store
    }

    pub fn marker(&self) -> &Marker {
        &self.marker
    }

    /// Logs a create for `range` and wraps it in `doc`. When wrapping fails
    /// the new record is removed again before the error is returned.
    pub fn create(
        &mut self,
        doc: &mut Document,
        page_key: &PageKey,
        range: &Range,
        style_class: &str,
    ) -> Result<LogRecord, HighlightError> {
        if range.is_collapsed() {
            return Err(HighlightError::CollapsedRange);
        }
        let anchor = anchor::to_anchor(doc, range).ok_or(HighlightError::Unaddressable)?;
        let title = if self.store.config().title_on_first_create && self.store.sum(page_key)? == 0
        {
            doc.title()
        } else {
            None
        };
        let text = range.text(doc);

        let record = self
            .store
            .append_create(page_key, anchor, style_class, &text, title)?;
        let error = match self
            .marker
            .mark(doc, range, Some(style_class), Some(record.id.as_str()))
        {
            Ok(wrappers) if !wrappers.is_empty() => return Ok(record),
            Ok(_) => HighlightError::MarkFailed(record.id.clone()),
            Err(err) => HighlightError::Dom(err),
        };

        warn!(id = %record.id, error = %error, "rolling back create");
        self.store.remove_single(&record.id)?;
        Err(error)
    }

    /// Changes a highlight's style class, in the log first and then in `doc`.
    pub fn update(
        &mut self,
        doc: &mut Document,
        id: &RecordId,
        style_class: &str,
    ) -> Result<LogRecord, HighlightError> {
        let record = self.store.update_create(
            id,
            CreatePatch {
                style_class: Some(style_class.to_string()),
                title: None,
            },
        )?;
        let keep = [self.marker.config().class.as_str()];
        self.marker.update(doc, id.as_str(), style_class, &keep)?;
        Ok(record)
    }

    /// Deletes a highlight from the log and, best effort, from every open
    /// copy of the page. Purges the page once nothing is left live.
    pub fn delete(
        &mut self,
        tabs: &mut [&mut Document],
        id: &RecordId,
    ) -> Result<DeleteOutcome, HighlightError> {
        let deletion = self.store.delete_highlight(id)?;
        let page_key = deletion.page_key().clone();

        for tab in tabs.iter_mut() {
            match self.marker.unmark(tab, id.as_str()) {
                Ok(removed) if removed.is_empty() => debug!(%id, "highlight not present in tab"),
                Ok(_) => {}
                Err(err) => debug!(%id, error = %err, "ignoring unmark failure"),
            }
        }

        let sum = self.store.sum(&page_key)?;
        let purged = if sum <= 0 {
            let removed = self.store.remove_all(&page_key)?.len();
            info!(page = %page_key, removed, "purged page without live highlights");
            removed
        } else {
            0
        };
        Ok(DeleteOutcome {
            deletion,
            sum,
            purged,
        })
    }

    /// Deletes the most recent live highlight of `page_key`.
    pub fn undo(
        &mut self,
        tabs: &mut [&mut Document],
        page_key: &PageKey,
    ) -> Result<DeleteOutcome, HighlightError> {
        let records = self.store.query(page_key, &QueryOptions::descending())?;
        let mut deleted: HashSet<&RecordId> = HashSet::new();
        let mut target = None;
        for record in &records {
            match &record.event {
                Event::Delete { corresponding_id } => {
                    deleted.insert(corresponding_id);
                }
                Event::Create(_) if !deleted.contains(&record.id) => {
                    target = Some(record.id.clone());
                    break;
                }
                Event::Create(_) => {}
            }
        }
        let target = target.ok_or(HighlightError::NothingToUndo)?;
        self.delete(tabs, &target)
    }

    pub fn replay(
        &self,
        doc: &mut Document,
        page_key: &PageKey,
    ) -> Result<ReplayReport, HighlightError> {
        ReplayEngine::new(self.marker.clone()).replay(&self.store, doc, page_key)
    }

    /// Live highlights of a page, oldest first.
    pub fn highlights(&self, page_key: &PageKey) -> Result<Vec<LogRecord>, HighlightError> {
        Ok(self.store.query(page_key, &QueryOptions::live_creates())?)
    }

    /// The logged highlight under `node`, if any.
    pub fn highlight_at(
        &self,
        doc: &Document,
        node: NodeId,
    ) -> Result<Option<LogRecord>, HighlightError> {
        let Some(id) = self.marker.highlight_at(doc, node) else {
            return Ok(None);
        };
        match self.store.get(&RecordId::new(id)) {
            Ok(record) => Ok(Some(record)),
            Err(HighlightError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::backend::MemoryBackend;
    use crate::log::store::StoreConfig;

    const PAGE: &str =
        "<html><head><title>Notes</title></head><body><p>one two three four</p></body></html>";

    fn highlighter() -> Highlighter<MemoryBackend> {
        Highlighter::new(Store::new(MemoryBackend::new()).unwrap(), Marker::default())
    }

    fn page() -> PageKey {
        PageKey::new("example.com/notes")
    }

    fn select(doc: &Document, needle: &str) -> Range {
        Range::find_text(doc, needle).unwrap()
    }

    #[test]
    fn test_first_create_captures_title() {
        let mut hl = highlighter();
        let mut doc = Document::parse_html(PAGE);
        let range = select(&doc, "two");
        let first = hl.create(&mut doc, &page(), &range, "red").unwrap();
        let range = select(&doc, "four");
        let second = hl.create(&mut doc, &page(), &range, "red").unwrap();

        assert_eq!(first.as_create().unwrap().title.as_deref(), Some("Notes"));
        assert_eq!(first.as_create().unwrap().text, "two");
        assert_eq!(second.as_create().unwrap().title, None);
        assert!(doc.element_by_id(first.id.as_str()).is_some());
    }

    #[test]
    fn test_title_capture_can_be_disabled() {
        let store = Store::with_config(
            MemoryBackend::new(),
            StoreConfig {
                title_on_first_create: false,
                ..StoreConfig::default()
            },
        )
        .unwrap();
        let mut hl = Highlighter::new(store, Marker::default());
        let mut doc = Document::parse_html(PAGE);
        let range = select(&doc, "two");
        let record = hl.create(&mut doc, &page(), &range, "red").unwrap();
        assert_eq!(record.as_create().unwrap().title, None);
    }

    #[test]
    fn test_collapsed_create_appends_nothing() {
        let mut hl = highlighter();
        let mut doc = Document::parse_html(PAGE);
        let start = select(&doc, "two").start;
        let err = hl
            .create(&mut doc, &page(), &Range::collapsed(start), "red")
            .unwrap_err();
        assert!(matches!(err, HighlightError::CollapsedRange));
        assert!(hl.store().all_records().unwrap().is_empty());
    }

    #[test]
    fn test_unmarkable_create_is_rolled_back() {
        let mut hl = highlighter();
        let mut doc = Document::parse_html(
            "<html><body><table><tr><td>a</td></tr></table></body></html>",
        );
        let table = doc
            .descendants(Document::ROOT)
            .find(|node| doc.tag_name(*node) == Some("table"))
            .unwrap();
        let text = doc.create_text("stray");
        let first_row = doc.first_child(table);
        doc.insert_before(table, text, first_row).unwrap();
        let range = Range::of_contents(&doc, text);
        let err = hl.create(&mut doc, &page(), &range, "red").unwrap_err();
        assert!(matches!(err, HighlightError::MarkFailed(_)));
        assert!(hl.store().all_records().unwrap().is_empty());
    }

    #[test]
    fn test_update_changes_log_and_dom() {
        let mut hl = highlighter();
        let mut doc = Document::parse_html(PAGE);
        let range = select(&doc, "three");
        let record = hl.create(&mut doc, &page(), &range, "red").unwrap();

        let updated = hl.update(&mut doc, &record.id, "blue").unwrap();
        assert_eq!(updated.as_create().unwrap().style_class, "blue");
        let wrapper = doc.element_by_id(record.id.as_str()).unwrap();
        assert_eq!(doc.classes(wrapper), vec!["highlog", "blue"]);
    }

    #[test]
    fn test_delete_fans_out_to_tabs() {
        let mut hl = highlighter();
        let mut doc = Document::parse_html(PAGE);
        let mut other = Document::parse_html(PAGE);
        let pristine = other.to_html();

        let range = select(&doc, "two");
        let record = hl.create(&mut doc, &page(), &range, "red").unwrap();
        hl.replay(&mut other, &page()).unwrap();
        assert_ne!(other.to_html(), pristine);

        let outcome = hl.delete(&mut [&mut doc, &mut other], &record.id).unwrap();
        assert!(matches!(outcome.deletion, Deletion::Direct(_)));
        assert_eq!(outcome.sum, 0);
        assert_eq!(doc.to_html(), pristine);
        assert_eq!(other.to_html(), pristine);
    }

    #[test]
    fn test_delete_missing_from_tab_is_swallowed() {
        let mut hl = highlighter();
        let mut doc = Document::parse_html(PAGE);
        let mut unrelated = Document::parse_html("<p>elsewhere</p>");
        let range = select(&doc, "two");
        let record = hl.create(&mut doc, &page(), &range, "red").unwrap();
        assert!(hl.delete(&mut [&mut unrelated], &record.id).is_ok());
    }

    #[test]
    fn test_undo_picks_latest_live() {
        let mut hl = highlighter();
        let mut doc = Document::parse_html(PAGE);
        let range = select(&doc, "one");
        let first = hl.create(&mut doc, &page(), &range, "red").unwrap();
        let range = select(&doc, "three");
        let second = hl.create(&mut doc, &page(), &range, "red").unwrap();
        let range = select(&doc, "four");
        let third = hl.create(&mut doc, &page(), &range, "red").unwrap();

        hl.delete(&mut [&mut doc], &second.id).unwrap();
        let outcome = hl.undo(&mut [&mut doc], &page()).unwrap();
        assert!(matches!(outcome.deletion, Deletion::Appended(ref record)
            if record.corresponding_id() == Some(&third.id)));

        let outcome = hl.undo(&mut [&mut doc], &page()).unwrap();
        assert!(matches!(outcome.deletion, Deletion::Appended(ref record)
            if record.corresponding_id() == Some(&first.id)));
        assert_eq!(outcome.sum, 0);
        assert!(outcome.purged > 0);

        let err = hl.undo(&mut [&mut doc], &page()).unwrap_err();
        assert!(matches!(err, HighlightError::NothingToUndo));
        assert_eq!(doc.to_html(), Document::parse_html(PAGE).to_html());
    }

    #[test]
    fn test_highlight_at_resolves_record() {
        let mut hl = highlighter();
        let mut doc = Document::parse_html(PAGE);
        let range = select(&doc, "two three");
        let record = hl.create(&mut doc, &page(), &range, "red").unwrap();

        let wrapper = doc.element_by_id(record.id.as_str()).unwrap();
        let text = doc.first_child(wrapper).unwrap();
        assert_eq!(hl.highlight_at(&doc, text).unwrap(), Some(record));

        let body = doc.parent(doc.parent(wrapper).unwrap()).unwrap();
        assert_eq!(hl.highlight_at(&doc, body).unwrap(), None);
    }

    #[test]
    fn test_highlights_lists_live_creates() {
        let mut hl = highlighter();
        let mut doc = Document::parse_html(PAGE);
        let range = select(&doc, "one");
        let first = hl.create(&mut doc, &page(), &range, "red").unwrap();
        let range = select(&doc, "four");
        let second = hl.create(&mut doc, &page(), &range, "red").unwrap();
        hl.delete(&mut [&mut doc], &first.id).unwrap();

        assert_eq!(hl.highlights(&page()).unwrap(), vec![second]);
    }
}
