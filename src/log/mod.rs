//! Event-sourced highlight log.
//!
//! Every highlight's life is recorded as [`LogRecord`]s keyed by page:
//!
//! - [`Event::Create`] - a highlight was made; its id doubles as the DOM id
//!   of the first wrapper element
//! - [`Event::Delete`] - a previously created highlight was removed
//!
//! [`store::Store`] appends, queries and compacts records on top of a
//! [`backend::Backend`].

use crate::anchor::Anchor;
use crate::page_key::PageKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

pub mod backend;
pub mod store;

/// Record id, always usable verbatim as a DOM element id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// A fresh id. The prefix keeps it from starting with a digit.
    pub fn mint() -> Self {
        Self(format!("hl{}", Uuid::new_v4().simple()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Create,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Create => f.write_str("create"),
            Verb::Delete => f.write_str("delete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEvent {
    pub anchor: Anchor,
    pub style_class: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl CreateEvent {
    /// The highlighted text cut to `max` graphemes, ellipsized when cut.
    pub fn preview(&self, max: usize) -> String {
        let collapsed = self.text.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut graphemes = collapsed.graphemes(true);
        let head: String = graphemes.by_ref().take(max).collect();
        if graphemes.next().is_some() {
            format!("{head}\u{2026}")
        } else {
            head
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "lowercase")]
pub enum Event {
    Create(CreateEvent),
    #[serde(rename_all = "camelCase")]
    Delete { corresponding_id: RecordId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: RecordId,
    pub page_key: PageKey,
    /// Milliseconds since the Unix epoch, strictly increasing per store.
    pub date: u64,
    #[serde(flatten)]
    pub event: Event,
}

impl LogRecord {
    pub fn verb(&self) -> Verb {
        match self.event {
            Event::Create(_) => Verb::Create,
            Event::Delete { .. } => Verb::Delete,
        }
    }

    pub fn as_create(&self) -> Option<&CreateEvent> {
        match &self.event {
            Event::Create(create) => Some(create),
            Event::Delete { .. } => None,
        }
    }

    pub fn corresponding_id(&self) -> Option<&RecordId> {
        match &self.event {
            Event::Create(_) => None,
            Event::Delete { corresponding_id } => Some(corresponding_id),
        }
    }

    /// Contribution to the page's consistency sum.
    pub fn weight(&self) -> i64 {
        match self.event {
            Event::Create(_) => 1,
            Event::Delete { .. } => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_record() -> LogRecord {
        LogRecord {
            id: RecordId::new("hl1"),
            page_key: PageKey::new("example.com/a"),
            date: 7,
            event: Event::Create(CreateEvent {
                anchor: Anchor {
                    start_path: "/p/text()".to_string(),
                    start_offset: 0,
                    end_path: Some("/p/text()".to_string()),
                    end_offset: Some(5),
                    collapsed: false,
                },
                style_class: "red".to_string(),
                text: "hello".to_string(),
                title: None,
            }),
        }
    }

    #[test]
    fn test_minted_ids_are_dom_legal() {
        for _ in 0..32 {
            let id = RecordId::mint();
            let first = id.as_str().chars().next().unwrap();
            assert!(first.is_ascii_alphabetic());
            assert!(id.as_str().chars().all(|ch| ch.is_ascii_alphanumeric()));
        }
        assert_ne!(RecordId::mint(), RecordId::mint());
    }

    #[test]
    fn test_create_record_json_shape() {
        let json = serde_json::to_value(create_record()).unwrap();
        assert_eq!(json["verb"], "create");
        assert_eq!(json["pageKey"], "example.com/a");
        assert_eq!(json["styleClass"], "red");
        assert_eq!(json["anchor"]["endOffset"], 5);
        assert!(json.get("title").is_none());
    }

    #[test]
    fn test_delete_record_json_shape() {
        let record = LogRecord {
            id: RecordId::new("hl2"),
            page_key: PageKey::new("example.com/a"),
            date: 8,
            event: Event::Delete {
                corresponding_id: RecordId::new("hl1"),
            },
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"verb\":\"delete\""));
        assert!(json.contains("\"correspondingId\":\"hl1\""));
        let back: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.verb(), Verb::Delete);
        assert_eq!(back.weight(), -1);
    }

    #[test]
    fn test_preview_truncates_on_graphemes() {
        let mut record = create_record();
        if let Event::Create(create) = &mut record.event {
            create.text = "e\u{301}te\u{301}\n  long".to_string();
        }
        let create = record.as_create().unwrap();
        assert_eq!(create.preview(2), "e\u{301}t\u{2026}");
        assert_eq!(create.preview(40), "e\u{301}te\u{301} long");
    }

    #[test]
    fn test_delete_fields_rejected_without_verb() {
        let json = r#"{"id":"x","pageKey":"p","date":1,"correspondingId":"y"}"#;
        assert!(serde_json::from_str::<LogRecord>(json).is_err());
    }
}
