//! Remote data gateway for the anonchat backend.
//!
//! [`Gateway`] is the boundary every other crate talks to. Two
//! implementations live here:
//! - [`HostedGateway`]: REST calls against the hosted backend plus a
//!   realtime websocket for change notifications
//! - [`MemoryGateway`]: an in-process backend with the same semantics,
//!   used for tests and local runs

pub mod config;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod realtime;
pub mod rest;

pub use config::BackendConfig;
pub use error::GatewayError;
pub use gateway::{ChangeFeed, Gateway};
pub use memory::{MemoryGateway, Operation};
pub use rest::HostedGateway;
