//! Weaver - real-time session client for an AI coding assistant backend.
//!
//! Architecture:
//! - `channel` keeps one WebSocket open per active session and reconnects
//!   with backoff
//! - `engine` runs one actor per session that folds server events into a
//!   `Transcript` through the `assembler`
//! - `cache` keeps session metadata and transcripts on disk with an expiry
//! - `api` talks to the REST side for session lists and history

pub mod api;
pub mod assembler;
pub mod auth;
pub mod cache;
pub mod channel;
pub mod config;
pub mod draft;
pub mod engine;
pub mod error;
pub mod interrupt;
pub mod models;
pub mod protocol;
pub mod tracker;

pub use config::Config;
pub use engine::{EngineOptions, EngineUpdate, SessionEngine};
