//! askbridge library: re-exports modules for the binary and integration tests.

pub mod bridge;
pub mod channel;
pub mod config;
pub mod link;
pub mod logging;
pub mod pending;
pub mod protocol;
pub mod registration;
