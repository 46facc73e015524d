//! Repository traits for record store operations.

pub mod blocks;
pub mod downloaders;
pub mod packages;
pub mod revisions;

pub use blocks::BlockRepo;
pub use downloaders::DownloaderRepo;
pub use packages::PackageRepo;
pub use revisions::RevisionRepo;
