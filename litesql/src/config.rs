//!
//! Connection Configuration
//!
//! `OpenFlags` selects how a database file is opened. `DatabaseConfig`
//! bundles a path, flags and a busy timeout and can be loaded from TOML:
//!
//! ```toml
//! path = "file:app.db"
//! read_write = true
//! create = true
//! wal = true
//! busy_timeout_ms = 5000
//! ```
//!
//! Paths are always interpreted as URIs when they start with `file:`.
//!

use std::path::Path;

use libc::c_int;
use libsqlite3_sys as ffi;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenFlags {
    /// Open for reading and writing. Read-only otherwise.
    pub read_write: bool,
    /// Create the file if missing. Ignored for read-only opens.
    pub create: bool,
    /// Switch the journal to write-ahead logging after opening.
    pub wal: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read_write: true,
            create: true,
            wal: false,
        }
    }
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read_write: false,
            create: false,
            wal: false,
        }
    }

    pub fn with_wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }

    // SQLite only defines READONLY, READWRITE and READWRITE|CREATE.
    pub(crate) fn to_raw(self) -> c_int {
        let mut flags = ffi::SQLITE_OPEN_URI;
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
            if self.create {
                flags |= ffi::SQLITE_OPEN_CREATE;
            }
        } else {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        flags
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(flatten)]
    pub flags: OpenFlags,
    #[serde(default)]
    pub busy_timeout_ms: Option<u32>,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            flags: OpenFlags::default(),
            busy_timeout_ms: None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config {
            path: "<inline>".into(),
            reason: e.to_string(),
        })
    }
}
