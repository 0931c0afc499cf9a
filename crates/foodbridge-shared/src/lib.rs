//! # foodbridge-shared
//!
//! Domain types and pure decision logic shared by the FoodBridge store and
//! server crates: the surplus record model, the lifecycle state machine,
//! the contact authorization rule and the chat model.  Nothing in this
//! crate performs I/O.

pub mod chat;
pub mod clock;
pub mod code;
pub mod constants;
pub mod contact;
pub mod error;
pub mod lifecycle;
pub mod stats;
pub mod surplus;
pub mod types;

pub use error::{AuthorizationError, CoreError, GuardViolation, LifecycleError, ValidationError};
