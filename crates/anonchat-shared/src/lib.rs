//! # anonchat-shared
//!
//! Domain types shared by every anonchat crate: the message row as the
//! backend stores it, change events, drafts and their validation, the
//! profanity filter and the anonymous identity value.

pub mod constants;
pub mod draft;
pub mod error;
pub mod identity;
pub mod profanity;
pub mod types;

pub use draft::{Draft, NewMessage, Tag};
pub use error::ValidationError;
pub use identity::Identity;
pub use types::*;
