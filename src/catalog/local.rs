//! In-memory catalog with optional JSON persistence

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, format_err, Error};
use serde::{Deserialize, Serialize};

use proxmox_sys::fs::{file_read_optional_string, replace_file, CreateOptions};

use bdir_api_types::{
    JobMediaRecord, MediaRecord, PoolRecord, SnapshotFilter, SnapshotRecord, VolStatus,
    VolumeFilter,
};

use super::CatalogBackend;

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Tables {
    next_id: u64,
    pools: BTreeMap<u64, PoolRecord>,
    media: BTreeMap<u64, MediaRecord>,
    jobmedia: BTreeMap<u64, JobMediaRecord>,
    snapshots: BTreeMap<u64, SnapshotRecord>,
}

impl Tables {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Reference catalog backend
///
/// Transactions snapshot the whole table set, a rollback restores the
/// snapshot. With a database path, every committed change is written
/// back atomically.
pub struct LocalCatalog {
    tables: Tables,
    saved: Option<Tables>,
    path: Option<PathBuf>,
}

impl LocalCatalog {
    pub const CATALOG_FILENAME: &'static str = "catalog.json";

    /// Create an empty catalog which lives in memory only.
    pub fn new() -> Self {
        Self {
            tables: Tables::default(),
            saved: None,
            path: None,
        }
    }

    /// Load the catalog stored in `base_path` (empty if there is none).
    pub fn load(base_path: &Path) -> Result<Self, Error> {
        let mut path = base_path.to_owned();
        path.push(Self::CATALOG_FILENAME);

        let tables = match file_read_optional_string(&path)? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|err| format_err!("unable to parse {:?} - {}", path, err))?,
            None => Tables::default(),
        };

        Ok(Self {
            tables,
            saved: None,
            path: Some(path),
        })
    }

    fn persist(&self) -> Result<(), Error> {
        if self.saved.is_some() {
            return Ok(()); // written on commit
        }
        let path = match self.path {
            Some(ref path) => path,
            None => return Ok(()),
        };

        let raw = serde_json::to_string_pretty(&self.tables)?;
        let mode = nix::sys::stat::Mode::from_bits_truncate(0o0640);
        replace_file(path, raw.as_bytes(), CreateOptions::new().perm(mode), true)?;
        Ok(())
    }

    fn pool_exists(&self, pool_id: u64) -> bool {
        self.tables.pools.contains_key(&pool_id)
    }
}

impl Default for LocalCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn volume_suffix(name: &str, prefix: &str) -> Option<u64> {
    let suffix = name.strip_prefix(prefix)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// The volume's retention period ended at `now`.
fn retention_expired(media: &MediaRecord, now: i64) -> bool {
    i64::try_from(media.vol_retention)
        .ok()
        .and_then(|retention| media.last_written.checked_add(retention))
        .map(|end| end <= now)
        .unwrap_or(false)
}

impl CatalogBackend for LocalCatalog {
    fn get_pool(&self, pool_id: u64) -> Result<Option<PoolRecord>, Error> {
        Ok(self.tables.pools.get(&pool_id).cloned())
    }

    fn get_pool_by_name(&self, name: &str) -> Result<Option<PoolRecord>, Error> {
        Ok(self.tables.pools.values().find(|p| p.name == name).cloned())
    }

    fn create_pool(&mut self, pool: &mut PoolRecord) -> Result<(), Error> {
        if self.tables.pools.values().any(|p| p.name == pool.name) {
            bail!("pool '{}' already exists", pool.name);
        }
        pool.pool_id = self.tables.alloc_id();
        self.tables.pools.insert(pool.pool_id, pool.clone());
        self.persist()
    }

    fn update_pool(&mut self, pool: &PoolRecord) -> Result<(), Error> {
        match self.tables.pools.get_mut(&pool.pool_id) {
            Some(entry) => *entry = pool.clone(),
            None => bail!("pool id {} not in catalog", pool.pool_id),
        }
        self.persist()
    }

    fn get_media(&self, media_id: u64) -> Result<Option<MediaRecord>, Error> {
        Ok(self.tables.media.get(&media_id).cloned())
    }

    fn get_media_by_name(&self, volume_name: &str) -> Result<Option<MediaRecord>, Error> {
        Ok(self
            .tables
            .media
            .values()
            .find(|m| m.volume_name == volume_name)
            .cloned())
    }

    fn create_media(&mut self, media: &mut MediaRecord) -> Result<(), Error> {
        if !bdir_api_types::is_volume_name_legal(&media.volume_name) {
            bail!("illegal volume name '{}'", media.volume_name);
        }
        if self
            .tables
            .media
            .values()
            .any(|m| m.volume_name == media.volume_name)
        {
            bail!("volume '{}' already exists", media.volume_name);
        }
        if !self.pool_exists(media.pool_id) {
            bail!("pool id {} not in catalog", media.pool_id);
        }
        media.media_id = self.tables.alloc_id();
        self.tables.media.insert(media.media_id, media.clone());
        self.persist()
    }

    fn update_media(&mut self, media: &MediaRecord) -> Result<(), Error> {
        if !self.pool_exists(media.pool_id) {
            bail!("pool id {} not in catalog", media.pool_id);
        }
        if self
            .tables
            .media
            .values()
            .any(|m| m.volume_name == media.volume_name && m.media_id != media.media_id)
        {
            bail!("volume '{}' already exists", media.volume_name);
        }
        match self.tables.media.get_mut(&media.media_id) {
            Some(entry) => *entry = media.clone(),
            None => bail!("media id {} not in catalog", media.media_id),
        }
        self.persist()
    }

    fn make_inchanger_unique(&mut self, media: &MediaRecord) -> Result<usize, Error> {
        if !media.in_changer || media.slot == 0 || media.storage_id == 0 {
            return Ok(0);
        }

        let mut count = 0;
        for other in self.tables.media.values_mut() {
            if other.media_id != media.media_id
                && other.storage_id == media.storage_id
                && other.slot == media.slot
            {
                other.in_changer = false;
                other.slot = 0;
                count += 1;
            }
        }
        if count > 0 {
            self.persist()?;
        }
        Ok(count)
    }

    fn find_next_volume(&self, filter: &VolumeFilter) -> Result<Option<MediaRecord>, Error> {
        let mut list: Vec<&MediaRecord> = self
            .tables
            .media
            .values()
            .filter(|m| {
                m.pool_id == filter.pool_id
                    && m.media_type == filter.media_type
                    && m.vol_status == filter.status
                    && m.is_enabled()
                    && (!filter.in_changer || m.in_changer)
                    && filter.storage_id.map(|id| id == m.storage_id).unwrap_or(true)
                    && !filter.exclude.contains(&m.media_id)
            })
            .collect();

        if filter.oldest {
            list.sort_by_key(|m| (m.last_written, m.media_id));
        } else {
            list.sort_by(|a, b| {
                b.last_written
                    .cmp(&a.last_written)
                    .then(a.media_id.cmp(&b.media_id))
            });
        }

        Ok(list.first().map(|m| (*m).clone()))
    }

    fn max_volume_suffix(&self, pool_id: u64, prefix: &str) -> Result<u64, Error> {
        Ok(self
            .tables
            .media
            .values()
            .filter(|m| m.pool_id == pool_id)
            .filter_map(|m| volume_suffix(&m.volume_name, prefix))
            .max()
            .unwrap_or(0))
    }

    fn list_volume_job_ids(&self, media_id: u64) -> Result<Vec<u64>, Error> {
        let mut list: Vec<u64> = self
            .tables
            .jobmedia
            .values()
            .filter(|jm| jm.media_id == media_id)
            .map(|jm| jm.job_id)
            .collect();
        list.sort_unstable();
        list.dedup();
        Ok(list)
    }

    fn prune_volumes(&mut self, pool_id: u64, now: i64) -> Result<usize, Error> {
        let candidates: Vec<u64> = self
            .tables
            .media
            .values()
            .filter(|m| {
                m.pool_id == pool_id
                    && matches!(m.vol_status, VolStatus::Full | VolStatus::Used)
                    && retention_expired(m, now)
            })
            .map(|m| m.media_id)
            .collect();

        let mut count = 0;
        for media_id in candidates {
            if !self.list_volume_job_ids(media_id)?.is_empty() {
                continue;
            }
            if let Some(media) = self.tables.media.get_mut(&media_id) {
                log::info!(
                    "Volume \"{}\" contains no jobs after pruning.",
                    media.volume_name
                );
                media.vol_status = VolStatus::Purged;
                count += 1;
            }
        }
        if count > 0 {
            self.persist()?;
        }
        Ok(count)
    }

    fn begin_transaction(&mut self) -> Result<(), Error> {
        if self.saved.is_some() {
            bail!("nested catalog transaction");
        }
        self.saved = Some(self.tables.clone());
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), Error> {
        if self.saved.take().is_none() {
            bail!("no catalog transaction to commit");
        }
        self.persist()
    }

    fn rollback_transaction(&mut self) -> Result<(), Error> {
        match self.saved.take() {
            Some(tables) => {
                self.tables = tables;
                Ok(())
            }
            None => bail!("no catalog transaction to roll back"),
        }
    }

    fn create_jobmedia(&mut self, record: &mut JobMediaRecord) -> Result<(), Error> {
        if !self.tables.media.contains_key(&record.media_id) {
            bail!("media id {} not in catalog", record.media_id);
        }
        if record.first_index > record.last_index {
            bail!(
                "invalid file index range {}..{}",
                record.first_index,
                record.last_index
            );
        }
        record.job_media_id = self.tables.alloc_id();
        self.tables.jobmedia.insert(record.job_media_id, record.clone());
        self.persist()
    }

    fn list_jobmedia(&self, job_id: u64) -> Result<Vec<JobMediaRecord>, Error> {
        Ok(self
            .tables
            .jobmedia
            .values()
            .filter(|jm| jm.job_id == job_id)
            .cloned()
            .collect())
    }

    fn delete_dummy_jobmedia(&mut self, job_id: u64) -> Result<usize, Error> {
        let before = self.tables.jobmedia.len();
        self.tables
            .jobmedia
            .retain(|_, jm| !(jm.job_id == job_id && jm.is_dummy()));
        let removed = before - self.tables.jobmedia.len();
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    fn create_snapshot(&mut self, snap: &mut SnapshotRecord) -> Result<(), Error> {
        if self
            .tables
            .snapshots
            .values()
            .any(|s| s.name == snap.name && s.device == snap.device)
        {
            bail!("snapshot '{}' on '{}' already exists", snap.name, snap.device);
        }
        snap.snapshot_id = self.tables.alloc_id();
        self.tables.snapshots.insert(snap.snapshot_id, snap.clone());
        self.persist()
    }

    fn list_snapshots(&self, filter: &SnapshotFilter, now: i64) -> Result<Vec<SnapshotRecord>, Error> {
        Ok(self
            .tables
            .snapshots
            .values()
            .filter(|s| filter.matches(s, now))
            .cloned()
            .collect())
    }

    fn delete_snapshot(&mut self, name: &str, device: &str) -> Result<(), Error> {
        let id = self
            .tables
            .snapshots
            .values()
            .find(|s| s.name == name && (device.is_empty() || s.device == device))
            .map(|s| s.snapshot_id)
            .ok_or_else(|| format_err!("snapshot '{}' not found", name))?;
        self.tables.snapshots.remove(&id);
        self.persist()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn create_testdir(name: &str) -> Result<PathBuf, Error> {
        let mut testdir: PathBuf = String::from("./target/testout").into();
        testdir.push(std::module_path!());
        testdir.push(name);

        let _ = std::fs::remove_dir_all(&testdir);
        std::fs::create_dir_all(&testdir)?;

        Ok(testdir)
    }

    fn add_volume(db: &mut LocalCatalog, pool_id: u64, name: &str) -> Result<MediaRecord, Error> {
        let mut media = MediaRecord {
            volume_name: name.to_string(),
            pool_id,
            media_type: "File".to_string(),
            enabled: 1,
            ..Default::default()
        };
        db.create_media(&mut media)?;
        Ok(media)
    }

    #[test]
    fn test_unique_volume_names() -> Result<(), Error> {
        let mut db = LocalCatalog::new();
        let mut pool = PoolRecord {
            name: "Default".into(),
            ..Default::default()
        };
        db.create_pool(&mut pool)?;

        add_volume(&mut db, pool.pool_id, "Vol0001")?;
        assert!(add_volume(&mut db, pool.pool_id, "Vol0001").is_err());
        assert!(add_volume(&mut db, pool.pool_id + 100, "Vol0002").is_err());
        assert!(add_volume(&mut db, pool.pool_id, "bad/name").is_err());

        add_volume(&mut db, pool.pool_id, "Vol0017")?;
        add_volume(&mut db, pool.pool_id, "Vol00x3")?;
        assert_eq!(db.max_volume_suffix(pool.pool_id, "Vol")?, 17);
        assert_eq!(db.max_volume_suffix(pool.pool_id, "Tape")?, 0);
        Ok(())
    }

    #[test]
    fn test_transaction_rollback() -> Result<(), Error> {
        let mut db = LocalCatalog::new();
        let mut pool = PoolRecord {
            name: "Default".into(),
            ..Default::default()
        };
        db.create_pool(&mut pool)?;
        let media = add_volume(&mut db, pool.pool_id, "Vol0001")?;

        db.begin_transaction()?;
        let mut jm = JobMediaRecord {
            job_id: 1,
            media_id: media.media_id,
            first_index: 1,
            last_index: 5,
            ..Default::default()
        };
        db.create_jobmedia(&mut jm)?;
        assert!(db.begin_transaction().is_err());
        db.rollback_transaction()?;

        assert!(db.list_jobmedia(1)?.is_empty());
        assert!(db.commit_transaction().is_err());
        Ok(())
    }

    #[test]
    fn test_find_next_volume_order() -> Result<(), Error> {
        let mut db = LocalCatalog::new();
        let mut pool = PoolRecord {
            name: "Default".into(),
            ..Default::default()
        };
        db.create_pool(&mut pool)?;

        for (name, last_written) in [("Vol0001", 300), ("Vol0002", 100), ("Vol0003", 200)] {
            let mut media = add_volume(&mut db, pool.pool_id, name)?;
            media.last_written = last_written;
            db.update_media(&media)?;
        }

        let mut filter = VolumeFilter::new(pool.pool_id, "File", VolStatus::Append);
        let newest = db.find_next_volume(&filter)?.map(|m| m.volume_name);
        assert_eq!(newest.as_deref(), Some("Vol0001"));

        filter.oldest = true;
        let oldest = db.find_next_volume(&filter)?.map(|m| m.volume_name);
        assert_eq!(oldest.as_deref(), Some("Vol0002"));

        filter.exclude.push(db.get_media_by_name("Vol0002")?.map(|m| m.media_id).unwrap_or(0));
        let next = db.find_next_volume(&filter)?.map(|m| m.volume_name);
        assert_eq!(next.as_deref(), Some("Vol0003"));

        filter.media_type = "LTO-8".into();
        assert!(db.find_next_volume(&filter)?.is_none());
        Ok(())
    }

    #[test]
    fn test_persistence() -> Result<(), Error> {
        let testdir = create_testdir("test_persistence")?;

        let mut db = LocalCatalog::load(&testdir)?;
        let mut pool = PoolRecord {
            name: "Default".into(),
            num_vols: 1,
            ..Default::default()
        };
        db.create_pool(&mut pool)?;
        add_volume(&mut db, pool.pool_id, "Vol0001")?;

        let db = LocalCatalog::load(&testdir)?;
        assert_eq!(db.get_pool_by_name("Default")?.map(|p| p.num_vols), Some(1));
        assert!(db.get_media_by_name("Vol0001")?.is_some());
        Ok(())
    }

    #[test]
    fn test_prune_volumes() -> Result<(), Error> {
        let mut db = LocalCatalog::new();
        let mut pool = PoolRecord {
            name: "Default".into(),
            ..Default::default()
        };
        db.create_pool(&mut pool)?;

        let mut full = add_volume(&mut db, pool.pool_id, "Vol0001")?;
        full.vol_status = VolStatus::Full;
        full.last_written = 1000;
        full.vol_retention = 100;
        db.update_media(&full)?;

        let mut busy = add_volume(&mut db, pool.pool_id, "Vol0002")?;
        busy.vol_status = VolStatus::Used;
        db.update_media(&busy)?;
        db.create_jobmedia(&mut JobMediaRecord {
            job_id: 3,
            media_id: busy.media_id,
            first_index: 1,
            last_index: 1,
            ..Default::default()
        })?;

        assert_eq!(db.prune_volumes(pool.pool_id, 1050)?, 0);
        assert_eq!(db.prune_volumes(pool.pool_id, 1100)?, 1);
        assert_eq!(
            db.get_media(full.media_id)?.map(|m| m.vol_status),
            Some(VolStatus::Purged)
        );
        assert_eq!(
            db.get_media(busy.media_id)?.map(|m| m.vol_status),
            Some(VolStatus::Used)
        );
        Ok(())
    }

    #[test]
    fn test_prune_huge_retention() -> Result<(), Error> {
        let mut db = LocalCatalog::new();
        let mut pool = PoolRecord {
            name: "Default".into(),
            ..Default::default()
        };
        db.create_pool(&mut pool)?;

        for (name, retention) in [("Vol0001", u64::MAX), ("Vol0002", i64::MAX as u64)] {
            let mut media = add_volume(&mut db, pool.pool_id, name)?;
            media.vol_status = VolStatus::Full;
            media.last_written = 1000;
            media.vol_retention = retention;
            db.update_media(&media)?;
        }

        assert_eq!(db.prune_volumes(pool.pool_id, i64::MAX)?, 0);
        Ok(())
    }

    #[test]
    fn test_make_inchanger_unique() -> Result<(), Error> {
        let mut db = LocalCatalog::new();
        let mut pool = PoolRecord {
            name: "Default".into(),
            ..Default::default()
        };
        db.create_pool(&mut pool)?;

        let mut volumes = Vec::new();
        for (name, storage_id) in [("Vol0001", 1), ("Vol0002", 1), ("Vol0003", 2)] {
            let mut media = add_volume(&mut db, pool.pool_id, name)?;
            media.in_changer = true;
            media.slot = 3;
            media.storage_id = storage_id;
            db.update_media(&media)?;
            volumes.push(media);
        }

        let mut outside = volumes[0].clone();
        outside.slot = 0;
        assert_eq!(db.make_inchanger_unique(&outside)?, 0);

        assert_eq!(db.make_inchanger_unique(&volumes[0])?, 1);

        let first = db.get_media(volumes[0].media_id)?.unwrap();
        assert!(first.in_changer);
        assert_eq!(first.slot, 3);

        let second = db.get_media(volumes[1].media_id)?.unwrap();
        assert!(!second.in_changer);
        assert_eq!(second.slot, 0);

        // other storage keeps its slot
        let third = db.get_media(volumes[2].media_id)?.unwrap();
        assert!(third.in_changer);
        assert_eq!(third.slot, 3);
        Ok(())
    }
}
