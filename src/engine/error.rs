use ulid::Ulid;

use crate::model::BookingStatus;

/// Engine failure taxonomy. Callers must be able to tell "pick another
/// slot" (`Overlap`) from "retry" (`Wal`) from "fix your input"
/// (`Validation`, `InvalidTransition`).
#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The chosen slot lost the race; carries the booking that holds it.
    Overlap(Ulid),
    Validation(String),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    LimitExceeded(&'static str),
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Overlap(id) => {
                write!(f, "slot conflicts with existing booking: {id}")
            }
            EngineError::Validation(msg) => write!(f, "validation: {msg}"),
            EngineError::InvalidTransition { from, to } => {
                write!(
                    f,
                    "invalid status transition: {} -> {}",
                    from.as_str(),
                    to.as_str()
                )
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
