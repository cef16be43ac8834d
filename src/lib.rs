//! Profile Sync - avatar profile replica for the content network
//!
//! Ingests profile deployments announced by the network and keeps a
//! consistent replica across three tiers:
//!
//! - **L1**: in-process hot cache ([`cache::HotProfileCache`])
//! - **L2**: distributed cache shared by replicas ([`cache::DistributedCache`])
//! - **L3**: durable SQLite store ([`db::SqliteProfileStore`])
//!
//! For every pointer, the visible profile is the one with the highest
//! entity timestamp ever submitted. Writes are at-least-once and gated on
//! that timestamp, so duplicates and out-of-order delivery are harmless.
//!
//! ## Services
//!
//! - **Synchronizer**: cursor resolution, bootstrap (snapshots and pointer
//!   changes), steady-state polling and failed-fetch retries
//! - **Persister**: dedup, L1 write, L2 invalidation, queued L3 write
//! - **Ownership validator**: periodic audit of L1 against canonical state
//! - **Reader**: L1 -> L2 -> L3 read-through

pub mod cache;
pub mod config;
pub mod db;
pub mod network;
pub mod services;
pub mod shutdown;
pub mod tracker;
pub mod types;
pub mod worker;

pub use config::Args;
pub use shutdown::Shutdown;
pub use types::{Result, SyncError};
