use crate::dom::DomError;
use crate::log::backend::StorageError;
use crate::log::{RecordId, Verb};

/// Errors surfaced by the store, the replay engine and the highlighter.
///
/// An anchor that no longer resolves is not an error: codec functions return
/// `None` and replay records it as a failure candidate.
#[derive(Debug, thiserror::Error)]
pub enum HighlightError {
    #[error("cannot highlight a collapsed range")]
    CollapsedRange,
    #[error("record {0} not found")]
    NotFound(RecordId),
    #[error("record {id} is not a {expected} record")]
    WrongKind { id: RecordId, expected: Verb },
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("marking highlight {0} produced no elements")]
    MarkFailed(RecordId),
    #[error("range endpoints cannot be addressed")]
    Unaddressable,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Dom(#[from] DomError),
}
