use thiserror::Error;

use crate::types::Role;

/// Malformed input, rejected before the store is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Verification code must not be empty")]
    EmptyCode,

    #[error("Quantity must be a positive number")]
    NonPositiveQuantity,

    #[error("Freshness window must be positive")]
    NonPositiveFreshness,

    #[error("Freshness window may not exceed {max} minutes")]
    FreshnessTooLong { max: i64 },

    #[error("Field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("Message text must not be empty")]
    EmptyMessage,

    #[error("Message exceeds {max} characters")]
    MessageTooLong { max: usize },

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("Unknown food category: {0}")]
    UnknownCategory(String),

    #[error("Invalid delivery code: {0}")]
    InvalidDeliveryCode(String),

    #[error("Cannot start a conversation with yourself")]
    SelfConversation,

    #[error("Inconsistent surplus record: {0}")]
    InconsistentRecord(&'static str),
}

/// The requested action is not legal in the record's current state.
///
/// The display strings are user-facing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardViolation {
    #[error("incorrect code")]
    IncorrectCode,

    #[error("not ready — no driver assigned yet")]
    NotReady,

    #[error("already claimed")]
    AlreadyClaimed,

    #[error("expired")]
    Expired,

    #[error("pickup not yet confirmed")]
    PickupNotConfirmed,

    #[error("record is terminal, no further transitions")]
    Terminal,

    #[error("not claimed yet")]
    NotClaimed,

    #[error("a driver is already assigned")]
    DriverAlreadyAssigned,

    #[error("pickup already confirmed")]
    PickupAlreadyConfirmed,

    #[error("not expired yet")]
    NotYetExpired,

    #[error("only available listings can be deleted")]
    NotDeletable,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("A {role} may not {action} this listing")]
    ActionNotPermitted { role: Role, action: &'static str },

    #[error("Only the owning canteen may do this")]
    NotOwner,

    #[error("Not a participant of this conversation")]
    NotParticipant,

    #[error("This chat is archived because the delivery has been completed")]
    ChatArchived,

    #[error("Chat restricted to active deliveries")]
    RestrictedToActiveDeliveries,
}

/// Outcome of the pure lifecycle engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Guard(#[from] GuardViolation),
}

/// Error taxonomy surfaced by every core operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Guard(#[from] GuardViolation),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    /// A conditional write lost a race against another client.
    #[error("Conflict, please try again")]
    Conflict,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl CoreError {
    /// Stable machine-readable discriminator for API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::Guard(_) => "guard_violation",
            CoreError::Authorization(_) => "authorization",
            CoreError::Conflict => "conflict",
            CoreError::NotFound(_) => "not_found",
            CoreError::Store(_) => "store",
        }
    }
}

impl From<LifecycleError> for CoreError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Validation(v) => CoreError::Validation(v),
            LifecycleError::Guard(g) => CoreError::Guard(g),
        }
    }
}
