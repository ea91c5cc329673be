//! A naive, simple oracle implementation for differential testing.
use highlog::{Event, LogRecord, PageKey, RecordId};
use std::collections::BTreeSet;

/// Creates minus deletes for one page, counted the long way.
pub fn sum(records: &[LogRecord], page_key: &PageKey) -> i64 {
    let mut creates = 0i64;
    let mut deletes = 0i64;
    for record in records.iter().filter(|record| record.page_key == *page_key) {
        match record.event {
            Event::Create(_) => creates += 1,
            Event::Delete { .. } => deletes += 1,
        }
    }
    creates - deletes
}

/// Ids of creates on `page_key` that no delete references, in input order.
pub fn live_creates(records: &[LogRecord], page_key: &PageKey) -> Vec<RecordId> {
    let mut live = Vec::new();
    for record in records {
        if record.page_key != *page_key || record.as_create().is_none() {
            continue;
        }
        let canceled = records
            .iter()
            .any(|other| other.corresponding_id() == Some(&record.id));
        if !canceled {
            live.push(record.id.clone());
        }
    }
    live
}

/// Replay failures after reconciliation: every create in `unanchored` that
/// no delete in `records` cancels.
pub fn reconcile(records: &[LogRecord], unanchored: &[RecordId]) -> Vec<RecordId> {
    unanchored
        .iter()
        .filter(|id| {
            !records
                .iter()
                .any(|record| record.corresponding_id() == Some(*id))
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Create { id: u32, page: String },
    Delete { page: String, target: u32 },
}

/// A log of integer-keyed entries following the same delete rules as the
/// store: the latest entry of a page is removed outright, anything older is
/// canceled by appending a delete.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NaiveLog {
    entries: Vec<Entry>,
    next_id: u32,
}

impl NaiveLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, page: &str) -> u32 {
        self.next_id += 1;
        self.entries.push(Entry::Create {
            id: self.next_id,
            page: page.to_string(),
        });
        self.next_id
    }

    /// `Some(true)` for a direct delete, `Some(false)` when a delete entry
    /// was appended, `None` when `target` is not a live create.
    pub fn delete(&mut self, target: u32) -> Option<bool> {
        let page = self.entries.iter().find_map(|entry| match entry {
            Entry::Create { id, page } if *id == target => Some(page.clone()),
            _ => None,
        })?;
        if !self.live(&page).contains(&target) {
            return None;
        }

        let last_on_page = self.entries.iter().rposition(|entry| match entry {
            Entry::Create { page: p, .. } | Entry::Delete { page: p, .. } => *p == page,
        })?;
        if matches!(self.entries[last_on_page], Entry::Create { id, .. } if id == target) {
            self.entries.remove(last_on_page);
            return Some(true);
        }
        self.entries.push(Entry::Delete { page, target });
        Some(false)
    }

    pub fn sum(&self, page: &str) -> i64 {
        self.entries
            .iter()
            .map(|entry| match entry {
                Entry::Create { page: p, .. } if p == page => 1,
                Entry::Delete { page: p, .. } if p == page => -1,
                _ => 0,
            })
            .sum()
    }

    pub fn live(&self, page: &str) -> BTreeSet<u32> {
        let mut live = BTreeSet::new();
        for entry in &self.entries {
            match entry {
                Entry::Create { id, page: p } if p == page => {
                    live.insert(*id);
                }
                Entry::Delete { target, page: p } if p == page => {
                    live.remove(target);
                }
                _ => {}
            }
        }
        live
    }

    /// Drops every entry of `page`, as the store does once its sum is zero.
    pub fn purge(&mut self, page: &str) {
        self.entries.retain(|entry| match entry {
            Entry::Create { page: p, .. } | Entry::Delete { page: p, .. } => p != page,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
