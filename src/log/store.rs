//! The per-page highlight log.
//!
//! [`Store`] owns a [`Backend`] and layers the log semantics on top of it:
//! minting ids and dates, verb checks, the consistency sum, compaction and
//! the direct-delete rule used when a highlight is removed.

use super::backend::{Backend, StorageError};
use super::{CreateEvent, Event, LogRecord, RecordId, Verb};
use crate::anchor::Anchor;
use crate::error::HighlightError;
use crate::page_key::PageKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for the file backend; `None` keeps the log in memory.
    pub data_dir: Option<PathBuf>,
    /// Remove the latest create outright instead of appending a delete.
    pub direct_delete: bool,
    /// Attach the page title to the first create of a page.
    pub title_on_first_create: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            direct_delete: true,
            title_on_first_create: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub order: Order,
    pub verb: Option<Verb>,
    pub limit: Option<usize>,
    /// Drop canceled creates together with the deletes canceling them.
    pub exclude_canceled: bool,
}

impl QueryOptions {
    pub fn descending() -> Self {
        Self {
            order: Order::Descending,
            ..Self::default()
        }
    }

    /// Creates that have not been deleted, oldest first.
    pub fn live_creates() -> Self {
        Self {
            verb: Some(Verb::Create),
            exclude_canceled: true,
            ..Self::default()
        }
    }
}

/// Patch applied by [`Store::update_create`].
#[derive(Debug, Clone, Default)]
pub struct CreatePatch {
    pub style_class: Option<String>,
    pub title: Option<String>,
}

/// How [`Store::delete_highlight`] removed a create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deletion {
    /// The create was the latest record of its page and is gone.
    Direct(LogRecord),
    /// A delete record was appended; carries that record.
    Appended(LogRecord),
}

impl Deletion {
    pub fn page_key(&self) -> &PageKey {
        match self {
            Deletion::Direct(record) | Deletion::Appended(record) => &record.page_key,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

pub struct Store<B: Backend> {
    backend: B,
    config: StoreConfig,
    last_date: u64,
}

impl<B: Backend> Store<B> {
    pub fn new(backend: B) -> Result<Self, StorageError> {
        Self::with_config(backend, StoreConfig::default())
    }

    pub fn with_config(backend: B, config: StoreConfig) -> Result<Self, StorageError> {
        let last_date = backend
            .all_records()?
            .iter()
            .map(|record| record.date)
            .max()
            .unwrap_or(0);
        Ok(Self {
            backend,
            config,
            last_date,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Wall-clock milliseconds, bumped so every record gets a distinct date.
    fn next_date(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        self.last_date = now.max(self.last_date + 1);
        self.last_date
    }

    pub fn append_create(
        &mut self,
        page_key: &PageKey,
        anchor: Anchor,
        style_class: &str,
        text: &str,
        title: Option<String>,
    ) -> Result<LogRecord, HighlightError> {
        let record = LogRecord {
            id: RecordId::mint(),
            page_key: page_key.clone(),
            date: self.next_date(),
            event: Event::Create(CreateEvent {
                anchor,
                style_class: style_class.to_string(),
                text: text.to_string(),
                title,
            }),
        };
        self.backend.insert(record.clone())?;
        debug!(id = %record.id, page = %page_key, "appended create");
        Ok(record)
    }

    pub fn append_delete(&mut self, create_id: &RecordId) -> Result<LogRecord, HighlightError> {
        let target = self.get_create(create_id)?;
        let record = LogRecord {
            id: RecordId::mint(),
            page_key: target.page_key,
            date: self.next_date(),
            event: Event::Delete {
                corresponding_id: create_id.clone(),
            },
        };
        self.backend.insert(record.clone())?;
        debug!(id = %record.id, corresponding = %create_id, "appended delete");
        Ok(record)
    }

    /// Patches a create in place. A title that is already set is kept.
    pub fn update_create(
        &mut self,
        create_id: &RecordId,
        patch: CreatePatch,
    ) -> Result<LogRecord, HighlightError> {
        let mut record = self.get_create(create_id)?;
        let Event::Create(create) = &mut record.event else {
            return Err(HighlightError::WrongKind {
                id: create_id.clone(),
                expected: Verb::Create,
            });
        };

        let mut changed = false;
        if let Some(style_class) = patch.style_class
            && style_class != create.style_class
        {
            create.style_class = style_class;
            changed = true;
        }
        if let Some(title) = patch.title
            && create.title.is_none()
        {
            create.title = Some(title);
            changed = true;
        }

        if changed {
            self.backend.update(record.clone())?;
            debug!(id = %create_id, "updated create");
        }
        Ok(record)
    }

    pub fn get(&self, id: &RecordId) -> Result<LogRecord, HighlightError> {
        self.backend
            .get(id)?
            .ok_or_else(|| HighlightError::NotFound(id.clone()))
    }

    fn get_create(&self, id: &RecordId) -> Result<LogRecord, HighlightError> {
        let record = self.get(id)?;
        if record.verb() != Verb::Create {
            return Err(HighlightError::WrongKind {
                id: id.clone(),
                expected: Verb::Create,
            });
        }
        Ok(record)
    }

    pub fn query(
        &self,
        page_key: &PageKey,
        options: &QueryOptions,
    ) -> Result<Vec<LogRecord>, StorageError> {
        let mut records = self.backend.records_for_page(page_key)?;

        if options.exclude_canceled {
            let canceled: HashSet<RecordId> = records
                .iter()
                .filter_map(|record| record.corresponding_id().cloned())
                .collect();
            records.retain(|record| match &record.event {
                Event::Create(_) => !canceled.contains(&record.id),
                Event::Delete { .. } => false,
            });
        }
        if let Some(verb) = options.verb {
            records.retain(|record| record.verb() == verb);
        }
        if options.order == Order::Descending {
            records.reverse();
        }
        if let Some(limit) = options.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Creates minus deletes. A negative result is reported, never clamped.
    pub fn sum(&self, page_key: &PageKey) -> Result<i64, StorageError> {
        let sum = self
            .backend
            .records_for_page(page_key)?
            .iter()
            .map(LogRecord::weight)
            .sum();
        if sum < 0 {
            warn!(page = %page_key, sum, "negative highlight sum");
        }
        Ok(sum)
    }

    pub fn page_keys(&self) -> Result<Vec<PageKey>, StorageError> {
        self.backend.page_keys()
    }

    pub fn all_records(&self) -> Result<Vec<LogRecord>, StorageError> {
        self.backend.all_records()
    }

    pub fn remove_all(&mut self, page_key: &PageKey) -> Result<Vec<LogRecord>, StorageError> {
        let ids: Vec<RecordId> = self
            .backend
            .records_for_page(page_key)?
            .into_iter()
            .map(|record| record.id)
            .collect();
        let removed = self.backend.remove(&ids)?;
        debug!(page = %page_key, count = removed.len(), "removed page records");
        Ok(removed)
    }

    /// Drops every page whose sum is zero. Returns the number of records removed.
    pub fn remove_orphans(&mut self) -> Result<usize, StorageError> {
        let mut removed = 0;
        for page_key in self.page_keys()? {
            if self.sum(&page_key)? == 0 {
                removed += self.remove_all(&page_key)?.len();
            }
        }
        if removed > 0 {
            info!(count = removed, "removed orphaned records");
        }
        Ok(removed)
    }

    pub fn remove_single(&mut self, id: &RecordId) -> Result<LogRecord, HighlightError> {
        self.backend
            .remove(std::slice::from_ref(id))?
            .pop()
            .ok_or_else(|| HighlightError::NotFound(id.clone()))
    }

    /// Removes each delete together with the create it cancels.
    pub fn remove_superfluous(
        &mut self,
        page_key: &PageKey,
    ) -> Result<Vec<LogRecord>, StorageError> {
        let records = self.backend.records_for_page(page_key)?;
        let creates: HashSet<&RecordId> = records
            .iter()
            .filter(|record| record.verb() == Verb::Create)
            .map(|record| &record.id)
            .collect();

        let mut ids = Vec::new();
        for record in &records {
            if let Some(target) = record.corresponding_id()
                && creates.contains(target)
                && !ids.contains(target)
            {
                ids.push(target.clone());
                ids.push(record.id.clone());
            }
        }
        let removed = self.backend.remove(&ids)?;
        if !removed.is_empty() {
            debug!(page = %page_key, count = removed.len(), "removed superfluous records");
        }
        Ok(removed)
    }

    /// Deletes a live create, directly when it is the latest record of its
    /// page and by appending a delete record otherwise.
    pub fn delete_highlight(&mut self, create_id: &RecordId) -> Result<Deletion, HighlightError> {
        let target = self.get_create(create_id)?;
        let records = self.backend.records_for_page(&target.page_key)?;
        if records
            .iter()
            .any(|record| record.corresponding_id() == Some(create_id))
        {
            return Err(HighlightError::NotFound(create_id.clone()));
        }

        let latest = records.last().map(|record| &record.id) == Some(create_id);
        if self.config.direct_delete && latest {
            let removed = self.remove_single(create_id)?;
            info!(id = %create_id, "deleted latest create directly");
            return Ok(Deletion::Direct(removed));
        }

        let record = self.append_delete(create_id)?;
        info!(id = %create_id, delete = %record.id, "appended compensating delete");
        Ok(Deletion::Appended(record))
    }

    /// Writes every record as one JSON object per line, oldest first.
    pub fn export<W: Write>(&self, mut writer: W) -> Result<usize, StorageError> {
        let records = self.backend.all_records()?;
        for record in &records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(records.len())
    }

    /// Reads records written by [`Store::export`]. Ids already present are skipped.
    pub fn import<R: BufRead>(&mut self, reader: R) -> Result<ImportReport, StorageError> {
        let mut report = ImportReport::default();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: LogRecord = serde_json::from_str(&line)?;
            if self.backend.get(&record.id)?.is_some() {
                report.skipped += 1;
                continue;
            }
            self.last_date = self.last_date.max(record.date);
            self.backend.insert(record)?;
            report.imported += 1;
        }
        info!(
            imported = report.imported,
            skipped = report.skipped,
            "imported records"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::backend::MemoryBackend;

    fn anchor() -> Anchor {
        Anchor {
            start_path: "/html/body/p/text()".to_string(),
            start_offset: 0,
            end_path: Some("/html/body/p/text()".to_string()),
            end_offset: Some(4),
            collapsed: false,
        }
    }

    fn page() -> PageKey {
        PageKey::new("example.com/a")
    }

    fn store() -> Store<MemoryBackend> {
        Store::new(MemoryBackend::new()).unwrap()
    }

    #[test]
    fn test_dates_strictly_increase() {
        let mut store = store();
        let a = store.append_create(&page(), anchor(), "red", "a", None).unwrap();
        let b = store.append_create(&page(), anchor(), "red", "b", None).unwrap();
        assert!(b.date > a.date);
    }

    #[test]
    fn test_append_delete_checks_target() {
        let mut store = store();
        let err = store.append_delete(&RecordId::new("missing")).unwrap_err();
        assert!(matches!(err, HighlightError::NotFound(_)));

        let create = store.append_create(&page(), anchor(), "red", "a", None).unwrap();
        let delete = store.append_delete(&create.id).unwrap();
        let err = store.append_delete(&delete.id).unwrap_err();
        assert!(matches!(
            err,
            HighlightError::WrongKind {
                expected: Verb::Create,
                ..
            }
        ));
        assert_eq!(store.sum(&page()).unwrap(), 0);
    }

    #[test]
    fn test_update_create_keeps_first_title() {
        let mut store = store();
        let create = store
            .append_create(&page(), anchor(), "red", "a", Some("First".to_string()))
            .unwrap();
        let updated = store
            .update_create(
                &create.id,
                CreatePatch {
                    style_class: Some("blue".to_string()),
                    title: Some("Second".to_string()),
                },
            )
            .unwrap();
        let event = updated.as_create().unwrap();
        assert_eq!(event.style_class, "blue");
        assert_eq!(event.title.as_deref(), Some("First"));
        assert_eq!(store.get(&create.id).unwrap(), updated);
    }

    #[test]
    fn test_update_create_unchanged_is_noop() {
        let mut store = store();
        let create = store.append_create(&page(), anchor(), "red", "a", None).unwrap();
        let same = store
            .update_create(
                &create.id,
                CreatePatch {
                    style_class: Some("red".to_string()),
                    title: None,
                },
            )
            .unwrap();
        assert_eq!(same, create);
    }

    #[test]
    fn test_update_rejects_delete_record() {
        let mut store = store();
        let create = store.append_create(&page(), anchor(), "red", "a", None).unwrap();
        let delete = store.append_delete(&create.id).unwrap();
        let err = store
            .update_create(&delete.id, CreatePatch::default())
            .unwrap_err();
        assert!(matches!(err, HighlightError::WrongKind { .. }));
    }

    #[test]
    fn test_query_exclude_canceled() {
        let mut store = store();
        let a = store.append_create(&page(), anchor(), "red", "a", None).unwrap();
        let b = store.append_create(&page(), anchor(), "red", "b", None).unwrap();
        store.append_delete(&a.id).unwrap();

        let all = store.query(&page(), &QueryOptions::default()).unwrap();
        assert_eq!(all.len(), 3);

        let live = store
            .query(
                &page(),
                &QueryOptions {
                    exclude_canceled: true,
                    ..QueryOptions::default()
                },
            )
            .unwrap();
        assert_eq!(live, vec![b.clone()]);
    }

    #[test]
    fn test_query_order_and_limit() {
        let mut store = store();
        let a = store.append_create(&page(), anchor(), "red", "a", None).unwrap();
        let b = store.append_create(&page(), anchor(), "red", "b", None).unwrap();
        let c = store.append_create(&page(), anchor(), "red", "c", None).unwrap();

        let newest = store
            .query(
                &page(),
                &QueryOptions {
                    limit: Some(2),
                    ..QueryOptions::descending()
                },
            )
            .unwrap();
        assert_eq!(newest, vec![c, b]);

        let oldest = store
            .query(
                &page(),
                &QueryOptions {
                    limit: Some(1),
                    ..QueryOptions::default()
                },
            )
            .unwrap();
        assert_eq!(oldest, vec![a]);
    }

    #[test]
    fn test_query_verb_filter() {
        let mut store = store();
        let a = store.append_create(&page(), anchor(), "red", "a", None).unwrap();
        let d = store.append_delete(&a.id).unwrap();
        let deletes = store
            .query(
                &page(),
                &QueryOptions {
                    verb: Some(Verb::Delete),
                    ..QueryOptions::default()
                },
            )
            .unwrap();
        assert_eq!(deletes, vec![d]);
    }

    #[test]
    fn test_sum_is_not_clamped() {
        let mut backend = MemoryBackend::new();
        backend
            .insert(LogRecord {
                id: RecordId::new("d"),
                page_key: page(),
                date: 1,
                event: Event::Delete {
                    corresponding_id: RecordId::new("gone"),
                },
            })
            .unwrap();
        let store = Store::new(backend).unwrap();
        assert_eq!(store.sum(&page()).unwrap(), -1);
    }

    #[test]
    fn test_remove_orphans() {
        let mut store = store();
        let other = PageKey::new("example.com/b");
        let a = store.append_create(&page(), anchor(), "red", "a", None).unwrap();
        store.append_delete(&a.id).unwrap();
        store.append_create(&other, anchor(), "red", "b", None).unwrap();

        assert_eq!(store.remove_orphans().unwrap(), 2);
        assert_eq!(store.page_keys().unwrap(), vec![other]);
    }

    #[test]
    fn test_remove_single() {
        let mut store = store();
        let a = store.append_create(&page(), anchor(), "red", "a", None).unwrap();
        assert_eq!(store.remove_single(&a.id).unwrap().id, a.id);
        assert!(matches!(
            store.remove_single(&a.id).unwrap_err(),
            HighlightError::NotFound(_)
        ));
    }

    #[test]
    fn test_remove_superfluous_keeps_live() {
        let mut store = store();
        let a = store.append_create(&page(), anchor(), "red", "a", None).unwrap();
        let b = store.append_create(&page(), anchor(), "red", "b", None).unwrap();
        store.append_delete(&a.id).unwrap();

        let removed = store.remove_superfluous(&page()).unwrap();
        assert_eq!(removed.len(), 2);
        let left = store.query(&page(), &QueryOptions::default()).unwrap();
        assert_eq!(left, vec![b]);
        assert_eq!(store.sum(&page()).unwrap(), 1);
    }

    #[test]
    fn test_delete_latest_is_direct() {
        let mut store = store();
        store.append_create(&page(), anchor(), "red", "a", None).unwrap();
        let b = store.append_create(&page(), anchor(), "red", "b", None).unwrap();
        let deletion = store.delete_highlight(&b.id).unwrap();
        assert!(matches!(deletion, Deletion::Direct(ref record) if record.id == b.id));
        assert_eq!(store.all_records().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_earlier_appends() {
        let mut store = store();
        let a = store.append_create(&page(), anchor(), "red", "a", None).unwrap();
        store.append_create(&page(), anchor(), "red", "b", None).unwrap();
        let deletion = store.delete_highlight(&a.id).unwrap();
        assert!(matches!(deletion, Deletion::Appended(ref record)
            if record.corresponding_id() == Some(&a.id)));
        assert_eq!(store.all_records().unwrap().len(), 3);
        assert!(store.get(&a.id).is_ok());
    }

    #[test]
    fn test_delete_twice_is_rejected() {
        let mut store = store();
        let a = store.append_create(&page(), anchor(), "red", "a", None).unwrap();
        store.append_create(&page(), anchor(), "red", "b", None).unwrap();
        store.delete_highlight(&a.id).unwrap();
        assert!(matches!(
            store.delete_highlight(&a.id).unwrap_err(),
            HighlightError::NotFound(_)
        ));
        assert_eq!(store.sum(&page()).unwrap(), 1);
    }

    #[test]
    fn test_direct_delete_disabled() {
        let config = StoreConfig {
            direct_delete: false,
            ..StoreConfig::default()
        };
        let mut store = Store::with_config(MemoryBackend::new(), config).unwrap();
        let a = store.append_create(&page(), anchor(), "red", "a", None).unwrap();
        let deletion = store.delete_highlight(&a.id).unwrap();
        assert!(matches!(deletion, Deletion::Appended(_)));
        assert_eq!(store.sum(&page()).unwrap(), 0);
    }

    #[test]
    fn test_export_import() {
        let mut source = store();
        let a = source.append_create(&page(), anchor(), "red", "a", None).unwrap();
        source.append_create(&page(), anchor(), "blue", "b", None).unwrap();
        source.append_delete(&a.id).unwrap();

        let mut buffer = Vec::new();
        assert_eq!(source.export(&mut buffer).unwrap(), 3);
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert_eq!(text.lines().count(), 3);

        let mut target = store();
        let report = target.import(buffer.as_slice()).unwrap();
        assert_eq!(report, ImportReport { imported: 3, skipped: 0 });
        assert_eq!(target.all_records().unwrap(), source.all_records().unwrap());

        let again = target.import(buffer.as_slice()).unwrap();
        assert_eq!(again, ImportReport { imported: 0, skipped: 3 });

        let later = target.append_create(&page(), anchor(), "red", "c", None).unwrap();
        let newest = source.all_records().unwrap().last().unwrap().date;
        assert!(later.date > newest);
    }

    #[test]
    fn test_import_rejects_garbage() {
        let mut store = store();
        let err = store.import("not json\n".as_bytes()).unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
