//! linkgate - a short-link redirect gateway.
//!
//! The heart of the crate is [`engine`]: a pure, priority-ordered rule
//! engine that resolves each visit to a [`engine::Disposition`]
//! (redirect, block, password gate, or notify). Everything around it is
//! plumbing: the HTTP surface in [`server`], the per-visit context
//! builder in [`context`], the storage seam in [`store`], and the
//! fire-and-forget webhook dispatcher in [`webhook`].

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod server;
pub mod store;
pub mod validate;
pub mod webhook;
