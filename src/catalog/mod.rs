//! Catalog collaborator interface
//!
//! The director core only holds transient copies of catalog records. All
//! reads and writes go through a [CatalogBackend], shared between tasks by
//! a cloneable [Catalog] handle. A read-modify-write sequence must hold the
//! catalog lock for its whole duration.
//!
//! The lock is a synchronous mutex. Its guard is not `Send`, so it cannot
//! be held across an `.await` in a spawned task.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{format_err, Error};

use bdir_api_types::{
    JobMediaRecord, MediaRecord, PoolRecord, SnapshotFilter, SnapshotRecord, VolumeFilter,
};

mod local;
pub use local::LocalCatalog;

/// Catalog storage backend
pub trait CatalogBackend: Send {
    fn get_pool(&self, pool_id: u64) -> Result<Option<PoolRecord>, Error>;

    fn get_pool_by_name(&self, name: &str) -> Result<Option<PoolRecord>, Error>;

    /// Insert a pool, assigns `pool.pool_id`.
    fn create_pool(&mut self, pool: &mut PoolRecord) -> Result<(), Error>;

    fn update_pool(&mut self, pool: &PoolRecord) -> Result<(), Error>;

    fn get_media(&self, media_id: u64) -> Result<Option<MediaRecord>, Error>;

    fn get_media_by_name(&self, volume_name: &str) -> Result<Option<MediaRecord>, Error>;

    /// Insert a volume, assigns `media.media_id`.
    ///
    /// Fails if the volume name is already used.
    fn create_media(&mut self, media: &mut MediaRecord) -> Result<(), Error>;

    fn update_media(&mut self, media: &MediaRecord) -> Result<(), Error>;

    /// Take `media`'s changer slot away from every other volume of the same
    /// storage (their `InChanger` and `Slot` are cleared).
    ///
    /// Does nothing unless `media` is in a changer slot with a known storage.
    /// Returns the number of volumes taken out of the changer.
    fn make_inchanger_unique(&mut self, media: &MediaRecord) -> Result<usize, Error>;

    /// Find the first volume matching `filter`.
    ///
    /// Volumes are ordered by last write time, most recently written first,
    /// or least recently written first if `filter.oldest` is set.
    fn find_next_volume(&self, filter: &VolumeFilter) -> Result<Option<MediaRecord>, Error>;

    /// Highest numeric suffix of volume names `<prefix><digits>` in a pool
    /// (zero if there are none).
    fn max_volume_suffix(&self, pool_id: u64, prefix: &str) -> Result<u64, Error>;

    /// Ids of the jobs with data on a volume.
    fn list_volume_job_ids(&self, media_id: u64) -> Result<Vec<u64>, Error>;

    /// Mark `Full`/`Used` volumes of a pool whose retention period passed
    /// and which no longer hold jobs as `Purged`.
    ///
    /// Returns the number of purged volumes.
    fn prune_volumes(&mut self, pool_id: u64, now: i64) -> Result<usize, Error>;

    fn begin_transaction(&mut self) -> Result<(), Error>;

    fn commit_transaction(&mut self) -> Result<(), Error>;

    fn rollback_transaction(&mut self) -> Result<(), Error>;

    /// Insert a JobMedia row, assigns `record.job_media_id`.
    fn create_jobmedia(&mut self, record: &mut JobMediaRecord) -> Result<(), Error>;

    fn list_jobmedia(&self, job_id: u64) -> Result<Vec<JobMediaRecord>, Error>;

    /// Delete the placeholder JobMedia rows of a job.
    fn delete_dummy_jobmedia(&mut self, job_id: u64) -> Result<usize, Error>;

    /// Insert a snapshot record, assigns `snap.snapshot_id`.
    fn create_snapshot(&mut self, snap: &mut SnapshotRecord) -> Result<(), Error>;

    fn list_snapshots(&self, filter: &SnapshotFilter, now: i64) -> Result<Vec<SnapshotRecord>, Error>;

    fn delete_snapshot(&mut self, name: &str, device: &str) -> Result<(), Error>;
}

pub type CatalogGuard<'a> = MutexGuard<'a, Box<dyn CatalogBackend>>;

/// Shared catalog handle
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<Mutex<Box<dyn CatalogBackend>>>,
}

impl Catalog {
    pub fn new<B: CatalogBackend + 'static>(backend: B) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(backend))),
        }
    }

    /// Acquire the catalog lock.
    pub fn lock(&self) -> Result<CatalogGuard<'_>, Error> {
        self.inner
            .lock()
            .map_err(|_| format_err!("catalog lock poisoned"))
    }

    /// Run `func` inside a transaction while holding the catalog lock.
    ///
    /// The transaction is rolled back if `func` fails.
    pub fn transaction<R, F>(&self, func: F) -> Result<R, Error>
    where
        F: FnOnce(&mut dyn CatalogBackend) -> Result<R, Error>,
    {
        let mut db = self.lock()?;
        run_transaction(&mut **db, func)
    }
}

/// Run `func` inside a transaction on an already locked backend.
pub fn run_transaction<R, F>(db: &mut dyn CatalogBackend, func: F) -> Result<R, Error>
where
    F: FnOnce(&mut dyn CatalogBackend) -> Result<R, Error>,
{
    db.begin_transaction()?;
    match func(db) {
        Ok(result) => {
            db.commit_transaction()?;
            Ok(result)
        }
        Err(err) => {
            if let Err(rollback_err) = db.rollback_transaction() {
                log::error!("catalog rollback failed - {}", rollback_err);
            }
            Err(err)
        }
    }
}

/// Create the catalog pool for a configured pool, or refresh its policy
/// fields. The volume count is never changed.
pub fn sync_pool_from_config(
    db: &mut dyn CatalogBackend,
    config: &bdir_api_types::PoolConfig,
) -> Result<PoolRecord, Error> {
    let mut wanted = config.to_pool_record();

    for (name, id) in [
        (&config.scratch_pool, &mut wanted.scratch_pool_id),
        (&config.recycle_pool, &mut wanted.recycle_pool_id),
    ] {
        if let Some(name) = name {
            *id = db
                .get_pool_by_name(name)?
                .map(|pool| pool.pool_id)
                .ok_or_else(|| format_err!("pool '{}' not in catalog", name))?;
        }
    }

    match db.get_pool_by_name(&config.name)? {
        Some(current) => {
            wanted.pool_id = current.pool_id;
            wanted.num_vols = current.num_vols;
            if wanted != current {
                db.update_pool(&wanted)?;
                log::info!("Updated Pool \"{}\" in catalog.", wanted.name);
            }
        }
        None => {
            db.create_pool(&mut wanted)?;
            log::info!("Created Pool \"{}\" in catalog.", wanted.name);
        }
    }
    Ok(wanted)
}
