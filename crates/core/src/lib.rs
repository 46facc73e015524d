//! Core domain types for the depot revision cache.
//!
//! This crate defines the data model shared by every other crate:
//! - Import paths as accepted from clients
//! - Storage tiers and the deterministic archive layout
//! - Application configuration

pub mod archive;
pub mod config;
pub mod error;
pub mod import_path;
pub mod tier;

pub use archive::{ArchiveLayout, DEFAULT_ARCHIVE_EXTENSION, short_revision, validate_revision};
pub use error::{Error, Result};
pub use import_path::ImportPath;
pub use tier::StorageTier;

/// Length of the abbreviated revision used in download file names.
pub const SHORT_REVISION_LEN: usize = 10;
