//! gamesync - content synchronization for game installations.
//!
//! Installs, verifies, repairs and incrementally updates a directory tree
//! against a remote manifest. Integrity is checked with SHA-256, transfers
//! run concurrently under a shared permit pool and bandwidth budget, large
//! files are fetched as ordered chunks and merged, and changed files can be
//! rebuilt from a binary delta instead of downloaded whole.
//!
//! # Modules
//!
//! - [`manifest`]: remote file list and release channel addressing
//! - [`checksum`]: local hashing and manifest diffing
//! - [`transfer`]: scheduler, single and multi-part transfers, progress
//! - [`patch`]: block signatures and delta application
//! - [`lifecycle`]: the install / repair / update / uninstall / verify engine
//! - [`config`]: INI configuration and typed engine settings
//! - [`logging`]: tracing subscriber setup

pub mod checksum;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod manifest;
pub mod patch;
pub mod transfer;

pub use error::{SyncError, SyncResult};
pub use lifecycle::{EngineServices, InstallRequest, SyncEngine};
