//! highlog: durable text-range anchoring and an event-sourced highlight log.
//!
//! Highlights are ranges of text on a web page that must reappear on every
//! later visit even if the page changed a little in between. This crate
//! provides the engine behind that:
//!
//! - **Document model** - an arena DOM with a tolerant HTML parser, boundary
//!   points and ranges
//! - **Anchoring** - structural paths and the codec turning a range into a
//!   serializable [`Anchor`] and back
//! - **Marking** - wrapping a range in a chain of marker elements and removing
//!   it again without leaving split text nodes behind
//! - **Log** - per-page create/delete records with consistency sums,
//!   compaction and a crash-safe file backend (optional)
//! - **Replay** - rebuilding highlights from the log on page load
//!
//! # Quick Start
//!
//! ```rust
//! use highlog::{Document, Highlighter, Marker, MemoryBackend, PageKey, Range, Store};
//!
//! let mut doc = Document::parse_html("<p>The quick brown fox</p>");
//! let store = Store::new(MemoryBackend::new()).unwrap();
//! let mut highlighter = Highlighter::new(store, Marker::default());
//!
//! let page = PageKey::new("example.com/fox");
//! let range = Range::find_text(&doc, "quick brown").unwrap();
//! let record = highlighter.create(&mut doc, &page, &range, "yellow").unwrap();
//!
//! // A fresh copy of the page gets the highlight back from the log.
//! let mut reloaded = Document::parse_html("<p>The quick brown fox</p>");
//! let report = highlighter.replay(&mut reloaded, &page).unwrap();
//! assert!(report.all_found());
//! assert!(reloaded.element_by_id(record.id.as_str()).is_some());
//! ```
//!
//! # Features
//!
//! - `storage` - Enables the checksummed on-disk [`FileBackend`]

// Arena document model, HTML parsing and ranges
pub mod dom;

// Structural paths and range anchors
pub mod anchor;

// Marker chains
pub mod marker;

pub mod page_key;

// Create/delete log, backends and the store
pub mod log;

pub mod replay;

pub mod highlighter;

pub mod config;

pub mod error;

pub use anchor::{Anchor, to_anchor, to_range};
pub use config::{ConfigError, HighlogConfig};
pub use dom::{Boundary, Document, DomError, NodeId, NodeKind, Range};
pub use error::HighlightError;
pub use highlighter::{DeleteOutcome, Highlighter};
pub use log::backend::{Backend, MemoryBackend, StorageError};
pub use log::store::{
    CreatePatch, Deletion, ImportReport, Order, QueryOptions, Store, StoreConfig,
};
pub use log::{CreateEvent, Event, LogRecord, RecordId, Verb};
pub use marker::{Marker, MarkerConfig};
pub use page_key::{PageKey, PageKeyError, PageKeyOptions};
pub use replay::{Indicator, ReplayEngine, ReplayPhase, ReplayReport};

#[cfg(feature = "storage")]
pub use log::backend::FileBackend;
