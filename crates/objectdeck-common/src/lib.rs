//! ObjectDeck Common - Shared types and utilities
//!
//! This crate provides the identifier types, the common error type with its
//! stable machine tags, and the data-directory layout used across all
//! ObjectDeck components.

pub mod error;
pub mod layout;
pub mod types;

pub use error::{Error, ErrorCode, Result};
pub use layout::DataLayout;
pub use types::*;
