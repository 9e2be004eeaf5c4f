//! FineWatch Notification Engine Library
//!
//! Exposes the matching/dispatch modules for use by the binary and tests.

pub mod digest;
pub mod dispatch;
pub mod mailer;
pub mod matchers;
pub mod models;
pub mod render;
pub mod store;
