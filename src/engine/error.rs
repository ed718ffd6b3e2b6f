use ulid::Ulid;

use crate::model::{BookingStatus, Conflict, Ms, Span};
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    /// `end <= start`, unaligned, or otherwise unusable span.
    InvalidSpan(Span),
    InThePast(Ms),
    OverCapacity { guests: u32, capacity: u32 },
    NotAvailable(Vec<Conflict>),
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    LimitExceeded(&'static str),
    Invalid(String),
    /// Conditional writes to this resource or booking kept losing against
    /// concurrent writers.
    Contention(Ulid),
    Store(StoreError),
}

impl EngineError {
    /// Stable machine-readable code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidSpan(_) => "invalid_span",
            EngineError::InThePast(_) => "in_the_past",
            EngineError::OverCapacity { .. } => "over_capacity",
            EngineError::NotAvailable(_) => "not_available",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Invalid(_) => "invalid",
            EngineError::Contention(_) => "contention",
            EngineError::Store(StoreError::VersionMismatch { .. }) => "version_mismatch",
            EngineError::Store(StoreError::AlreadyExists { .. }) => "already_exists",
            EngineError::Store(StoreError::Invalid(_)) => "invalid",
            EngineError::Store(_) => "store_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::InvalidSpan(span) => {
                write!(f, "invalid time range [{}, {})", span.start, span.end)
            }
            EngineError::InThePast(start) => write!(f, "start {start} is in the past"),
            EngineError::OverCapacity { guests, capacity } => {
                write!(f, "{guests} guests exceed capacity {capacity}")
            }
            EngineError::NotAvailable(conflicts) => {
                write!(f, "time range not available ({} conflicts)", conflicts.len())
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move booking from {from} to {to}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Invalid(msg) => write!(f, "invalid request: {msg}"),
            EngineError::Contention(id) => {
                write!(f, "gave up after repeated concurrent updates to {id}")
            }
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            other => EngineError::Store(other),
        }
    }
}
