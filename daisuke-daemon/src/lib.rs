//! Daisuke daemon library
//!
//! This module exports the internal components of the daemon for testing purposes.

pub mod config;
pub mod logger;
pub mod store;
pub mod updater;
