//! Core of the blacklist moderation bot.
//!
//! Telegram and SQLite live behind ports (`messaging::port::ChatClient`,
//! `storage::Storage`) implemented in adapter crates.

pub mod audit;
pub mod blacklist;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod keyed;
pub mod logging;
pub mod messaging;
pub mod reconcile;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod storage;

pub use errors::{Error, Result};
