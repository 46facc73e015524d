//! HTTP request handlers.

pub mod admin;
pub mod common;
pub mod download;

pub use admin::*;
pub use common::*;
pub use download::*;
