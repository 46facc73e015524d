//! Storage tier of a cached revision.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where the bytes of a revision currently live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    /// Hot tier: a file under the archive root.
    Local,
    /// Cold tier: an object in the remote store.
    Remote,
}

impl StorageTier {
    /// Get the persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl FromStr for StorageTier {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(crate::Error::InvalidTier(other.to_string())),
        }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
