// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Backup adapter: persist the last-known registry view for cold starts.
//!
//! The dispatcher snapshots every persistable booking when its dirty flag
//! flips, and hands the snapshot to a [`BackupStore`] under the registry's
//! logical name. On open, `restore` runs once and the result is parked on
//! the controller for drivers that want to seed initial views before the
//! first network response.
//!
//! Backup I/O is best-effort: errors are logged and swallowed, never
//! propagated into task progress.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::shard::Shard;
use crate::url::ServiceUrl;

/// Durable store for registry snapshots.
pub trait BackupStore: Send + Sync {
    /// Persist a snapshot under the registry name.
    fn backup(&self, name: &str, datum: &BackupDatum) -> io::Result<()>;

    /// Load the last snapshot for the registry name, if any.
    fn restore(&self, name: &str) -> io::Result<Option<BackupDatum>>;
}

/// Serializable snapshot of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRecord {
    pub name: String,
    pub url: String,
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_center: Option<String>,
}

impl ShardRecord {
    pub fn from_shard(shard: &Shard) -> Self {
        Self {
            name: shard.name.clone(),
            url: shard.url.to_string(),
            weight: shard.weight,
            region: shard.region.clone(),
            data_center: shard.data_center.clone(),
        }
    }

    /// Rebuild the shard; `None` if the recorded URL no longer parses.
    pub fn to_shard(&self) -> Option<Shard> {
        let url: ServiceUrl = self.url.parse().ok()?;
        Some(Shard {
            name: self.name.clone(),
            url,
            weight: self.weight,
            region: self.region.clone(),
            data_center: self.data_center.clone(),
        })
    }
}

/// Full registry snapshot: every persistable cluster and config booking,
/// keyed by booking key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupDatum {
    #[serde(default)]
    pub clusters: HashMap<String, Vec<ShardRecord>>,
    #[serde(default)]
    pub configs: HashMap<String, HashMap<String, String>>,
}

impl BackupDatum {
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty() && self.configs.is_empty()
    }
}

/// One JSON file per registry name under a directory, written atomically
/// (temp file + rename).
pub struct FileBackupStore {
    dir: PathBuf,
}

impl FileBackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }
}

impl BackupStore for FileBackupStore {
    fn backup(&self, name: &str, datum: &BackupDatum) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_vec_pretty(datum)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let target = self.file(name);
        let tmp = self.dir.join(format!(".{}.json.tmp", name));
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    fn restore(&self, name: &str) -> io::Result<Option<BackupDatum>> {
        let body = match fs::read(self.file(name)) {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let datum = serde_json::from_slice(&body)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(datum))
    }
}
