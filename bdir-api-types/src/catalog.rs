//! Catalog record types
//!
//! These are working copies of the rows the catalog stores. Code outside
//! the catalog only ever holds transient copies and writes them back
//! through the catalog interface.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

/// Volume status as stored in the catalog
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolStatus {
    Append,
    Full,
    Used,
    Recycle,
    Purged,
    Error,
    Archive,
    #[serde(rename = "Read-Only")]
    ReadOnly,
    Disabled,
    Busy,
    Cleaning,
}

impl VolStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VolStatus::Append => "Append",
            VolStatus::Full => "Full",
            VolStatus::Used => "Used",
            VolStatus::Recycle => "Recycle",
            VolStatus::Purged => "Purged",
            VolStatus::Error => "Error",
            VolStatus::Archive => "Archive",
            VolStatus::ReadOnly => "Read-Only",
            VolStatus::Disabled => "Disabled",
            VolStatus::Busy => "Busy",
            VolStatus::Cleaning => "Cleaning",
        }
    }
}

impl fmt::Display for VolStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VolStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match s {
            "Append" => VolStatus::Append,
            "Full" => VolStatus::Full,
            "Used" => VolStatus::Used,
            "Recycle" => VolStatus::Recycle,
            "Purged" => VolStatus::Purged,
            "Error" => VolStatus::Error,
            "Archive" => VolStatus::Archive,
            "Read-Only" => VolStatus::ReadOnly,
            "Disabled" => VolStatus::Disabled,
            "Busy" => VolStatus::Busy,
            "Cleaning" => VolStatus::Cleaning,
            _ => bail!("unknown volume status '{}'", s),
        })
    }
}

impl Default for VolStatus {
    fn default() -> Self {
        VolStatus::Append
    }
}

/// Pool record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PoolRecord {
    pub pool_id: u64,
    pub name: String,
    pub num_vols: u32,
    /// Zero means unlimited
    pub max_vols: u32,
    pub use_once: bool,
    pub use_catalog: bool,
    pub accept_any_volume: bool,
    pub auto_prune: bool,
    pub recycle: bool,
    pub action_on_purge: u32,
    /// Seconds
    pub vol_retention: u64,
    /// Seconds, zero means unlimited
    pub vol_use_duration: u64,
    pub max_vol_jobs: u32,
    pub max_vol_files: u32,
    pub max_vol_bytes: u64,
    pub pool_type: String,
    pub label_type: i32,
    pub label_format: String,
    pub enabled: i32,
    pub scratch_pool_id: u64,
    pub recycle_pool_id: u64,
    pub recycle_current_volume: bool,
    pub purge_oldest_volume: bool,
    pub recycle_oldest_volume: bool,
}

/// Media record ("Volume")
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MediaRecord {
    pub media_id: u64,
    pub volume_name: String,
    pub pool_id: u64,
    pub media_type: String,
    pub vol_status: VolStatus,
    /// 0 disabled, 1 enabled, 2 archived
    pub enabled: i32,
    pub recycle: bool,
    pub vol_jobs: u32,
    pub vol_files: u32,
    pub vol_blocks: u32,
    pub vol_bytes: u64,
    pub vol_abytes: u64,
    pub vol_hole_bytes: u64,
    pub vol_holes: u32,
    pub vol_mounts: u32,
    pub vol_errors: u32,
    pub vol_writes: u64,
    pub vol_parts: i32,
    pub vol_cloud_parts: i32,
    pub last_part_bytes: u64,
    pub vol_capacity_bytes: u64,
    pub max_vol_bytes: u64,
    pub max_vol_jobs: u32,
    pub max_vol_files: u32,
    pub vol_retention: u64,
    pub vol_use_duration: u64,
    pub action_on_purge: u32,
    pub recycle_count: u32,
    pub slot: i32,
    pub in_changer: bool,
    pub storage_id: u64,
    pub scratch_pool_id: u64,
    pub recycle_pool_id: u64,
    /// Milliseconds, negative values mean "unknown"
    pub vol_read_time: i64,
    pub vol_write_time: i64,
    pub end_file: u32,
    pub end_block: u32,
    pub vol_type: u32,
    pub label_type: i32,
    pub first_written: i64,
    pub last_written: i64,
    pub label_date: i64,
    pub initial_write: i64,
}

impl MediaRecord {
    /// Initialize a new media record with the defaults of `pool`.
    pub fn with_pool_defaults(pool: &PoolRecord) -> Self {
        MediaRecord {
            pool_id: pool.pool_id,
            vol_status: VolStatus::Append,
            recycle: pool.recycle,
            vol_retention: pool.vol_retention,
            vol_use_duration: pool.vol_use_duration,
            max_vol_jobs: pool.max_vol_jobs,
            max_vol_files: pool.max_vol_files,
            max_vol_bytes: pool.max_vol_bytes,
            action_on_purge: pool.action_on_purge,
            recycle_pool_id: pool.recycle_pool_id,
            scratch_pool_id: pool.scratch_pool_id,
            label_type: pool.label_type,
            enabled: 1,
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled == 1
    }
}

/// Maps a contiguous range of a job's data onto a volume extent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobMediaRecord {
    pub job_media_id: u64,
    pub job_id: u64,
    pub media_id: u64,
    pub first_index: u32,
    pub last_index: u32,
    pub start_file: u32,
    pub end_file: u32,
    pub start_block: u32,
    pub end_block: u32,
}

impl JobMediaRecord {
    /// Placeholder rows carry no file indexes.
    pub fn is_dummy(&self) -> bool {
        self.first_index == 0 && self.last_index == 0
    }
}

/// Filesystem snapshot record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnapshotRecord {
    pub snapshot_id: u64,
    pub name: String,
    pub job_id: u64,
    pub volume: String,
    pub device: String,
    pub create_tdate: i64,
    pub snapshot_type: String,
    /// Seconds
    pub retention: u64,
    pub client: String,
    pub fileset: String,
}

/// Snapshot list filter, empty fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotFilter {
    pub name: String,
    pub volume: String,
    pub device: String,
    pub client: String,
    pub create_tdate: i64,
    pub snapshot_type: String,
    pub created_before: Option<i64>,
    pub created_after: Option<i64>,
    pub expired: bool,
}

impl SnapshotFilter {
    pub fn matches(&self, snap: &SnapshotRecord, now: i64) -> bool {
        fn field_matches(filter: &str, value: &str) -> bool {
            filter.is_empty() || filter == value
        }

        if !field_matches(&self.name, &snap.name)
            || !field_matches(&self.volume, &snap.volume)
            || !field_matches(&self.device, &snap.device)
            || !field_matches(&self.client, &snap.client)
            || !field_matches(&self.snapshot_type, &snap.snapshot_type)
        {
            return false;
        }
        if self.create_tdate != 0 && self.create_tdate != snap.create_tdate {
            return false;
        }
        if let Some(before) = self.created_before {
            if snap.create_tdate >= before {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if snap.create_tdate <= after {
                return false;
            }
        }
        if self.expired && snap.create_tdate + snap.retention as i64 > now {
            return false;
        }
        true
    }
}

/// Catalog search for the next usable volume
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeFilter {
    pub pool_id: u64,
    pub media_type: String,
    pub status: VolStatus,
    /// Only volumes loaded in an autochanger
    pub in_changer: bool,
    /// Restrict to volumes associated with this storage
    pub storage_id: Option<u64>,
    /// Volumes the caller already rejected
    pub exclude: Vec<u64>,
    /// Prefer the least recently written volume
    pub oldest: bool,
}

impl VolumeFilter {
    pub fn new(pool_id: u64, media_type: &str, status: VolStatus) -> Self {
        Self {
            pool_id,
            media_type: media_type.to_string(),
            status,
            in_changer: false,
            storage_id: None,
            exclude: Vec::new(),
            oldest: false,
        }
    }
}
