//! SPC Sync Library
//!
//! Offline-first synchronization for the quality dashboard.
//!
//! # Modules
//!
//! - `sync`: server-side version store, push/pull coordinator and conflict resolution
//! - `offline`: client-side request routing, response caches and the mutation queue
//! - `routes`: HTTP surface for the coordinator

pub mod config;
pub mod db;
pub mod error;
pub mod offline;
pub mod routes;
pub mod state;
pub mod sync;
