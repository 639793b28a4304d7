//! Core domain types for the wicket login service.
//!
//! This crate provides the strongly-typed identifiers shared by the
//! flow core and the server binary.

pub mod id;

pub use id::{AccountId, ParseIdError, TokenRecordId};
