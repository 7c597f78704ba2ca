//! Mailflow — email assistant orchestration core.
//!
//! Drives multi-step email tasks (fetch, classify, summarize, draft, send)
//! over remote webhook capabilities, with durable run tracking and a
//! human approval gate in front of every outbound send.

pub mod api;
pub mod approval;
pub mod capability;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod store;

pub use error::{Error, Result};
