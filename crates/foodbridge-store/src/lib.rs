//! # foodbridge-store
//!
//! SQLite persistence for FoodBridge.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and implements the collaborator traits the
//! services are written against: [`SurplusStore`] (with its conditional
//! update primitive), [`ChatStore`] and [`UserDirectory`].

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod repository;
pub mod surplus;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use repository::{CasOutcome, ChatStore, SurplusStore, UserDirectory};
pub use surplus::{DriverFilter, SurplusOrder, SurplusQuery};
