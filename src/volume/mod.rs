//! Volume allocation
//!
//! Finds the next appendable volume for a job: an existing `Append`
//! volume, a recycled one, a volume taken from the scratch pool, or a
//! newly created one. All functions expect the catalog to be locked by
//! the caller for the whole call.

use anyhow::{format_err, Error};

use bdir_api_types::{MediaRecord, PoolRecord, VolStatus, VolumeFilter};

use crate::catalog::{run_transaction, CatalogBackend};

mod expire;
mod label_format;
mod newvol;

pub use expire::{has_volume_expired, recycle_volume, DefaultRecyclePolicy, RecyclePolicy};
pub use label_format::{expand_label_format, is_simple_label_format, LabelContext};
pub use newvol::new_volume;

/// Give up after this many volumes turned out to be expired.
const MAX_FIND_RETRIES: usize = 200;

/// Name of the scratch pool if the pool does not name one
pub const DEFAULT_SCRATCH_POOL: &str = "Scratch";

#[derive(thiserror::Error, Debug)]
pub enum AllocError {
    #[error("Maximum Volumes exceeded for Pool {0}")]
    PoolFull(String),
    #[error("Pool {0} has no label format for automatic labeling")]
    NoLabelFormat(String),
    #[error("Illegal character in Volume name \"{0}\"")]
    IllegalName(String),
    #[error("Too many failures. Giving up creating Volume name.")]
    TooManyFailures,
    #[error("bad label format - {0}")]
    BadLabelFormat(String),
    #[error("No appendable Volume found in Pool {0}")]
    NoVolume(String),
    #[error("{0}")]
    Catalog(#[from] Error),
}

/// Parameters of a volume search
#[derive(Clone, Debug, Default)]
pub struct AllocRequest {
    /// Unique job name, used to prefix log messages
    pub job: String,
    pub pool_id: u64,
    pub media_type: String,
    /// Storage the volume will be written on
    pub storage_id: u64,
    /// The storage is an autochanger, prefer loaded volumes
    pub autochanger: bool,
    /// Use the n-th appendable volume (1 based, 0 means the first)
    pub index: u32,
    /// Create a new volume if nothing else is available
    pub create: bool,
    /// Prune the pool if nothing else is available
    pub prune: bool,
    /// Volumes already rejected for this job
    pub exclude: Vec<u64>,
    /// Volume name chosen by a plugin for this job
    pub plugin_volume_name: Option<String>,
    pub label: LabelContext,
    pub now: i64,
}

/// Find (or create) the next volume to append to.
pub fn find_next_volume_for_append(
    db: &mut dyn CatalogBackend,
    req: &AllocRequest,
) -> Result<MediaRecord, AllocError> {
    let pool = get_pool(db, req.pool_id)?;
    let mut exclude = req.exclude.clone();

    for _ in 0..MAX_FIND_RETRIES {
        let mut media = find_candidate(db, req, &pool, &exclude)?;

        if has_volume_expired(db, &pool, &mut media, req.now)? {
            exclude.push(media.media_id);
            continue;
        }

        media.storage_id = req.storage_id;
        return Ok(media);
    }

    log::error!("{}: too many expired volumes in Pool {}", req.job, pool.name);
    Err(AllocError::NoVolume(pool.name))
}

fn get_pool(db: &dyn CatalogBackend, pool_id: u64) -> Result<PoolRecord, Error> {
    db.get_pool(pool_id)?
        .ok_or_else(|| format_err!("pool id {} not in catalog", pool_id))
}

fn find_candidate(
    db: &mut dyn CatalogBackend,
    req: &AllocRequest,
    pool: &PoolRecord,
    exclude: &[u64],
) -> Result<MediaRecord, AllocError> {
    let passes: &[bool] = if req.autochanger { &[true, false] } else { &[false] };

    for &in_changer in passes {
        if let Some(media) = find_existing(db, req, pool, exclude, in_changer)? {
            return Ok(media);
        }
    }

    let mut error = None;
    if req.create {
        match new_volume(db, req) {
            Ok(media) => return Ok(media),
            Err(err) => {
                log::warn!("{}: unable to create new volume - {}", req.job, err);
                error = Some(err);
            }
        }
    }

    if pool.purge_oldest_volume || pool.recycle_oldest_volume {
        if let Some(media) = recycle_oldest_volume(db, req, pool, exclude)? {
            return Ok(media);
        }
    }

    Err(error.unwrap_or_else(|| AllocError::NoVolume(pool.name.clone())))
}

fn volume_filter(req: &AllocRequest, pool_id: u64, status: VolStatus, in_changer: bool) -> VolumeFilter {
    let mut filter = VolumeFilter::new(pool_id, &req.media_type, status);
    filter.in_changer = in_changer;
    if in_changer {
        filter.storage_id = Some(req.storage_id);
    }
    filter.oldest = status != VolStatus::Append;
    filter
}

fn find_existing(
    db: &mut dyn CatalogBackend,
    req: &AllocRequest,
    pool: &PoolRecord,
    exclude: &[u64],
    in_changer: bool,
) -> Result<Option<MediaRecord>, AllocError> {
    // appendable volume, skipping index-1 candidates
    let mut filter = volume_filter(req, pool.pool_id, VolStatus::Append, in_changer);
    filter.exclude = exclude.to_vec();
    let mut found = db.find_next_volume(&filter)?;
    for _ in 1..req.index {
        match found {
            Some(ref media) => {
                filter.exclude.push(media.media_id);
                found = db.find_next_volume(&filter)?;
            }
            None => break,
        }
    }
    if found.is_some() {
        return Ok(found);
    }

    let mut filter = volume_filter(req, pool.pool_id, VolStatus::Recycle, in_changer);
    filter.exclude = exclude.to_vec();
    if let Some(media) = db.find_next_volume(&filter)? {
        return Ok(Some(media));
    }

    if let Some(media) = recycle_oldest_purged_volume(db, req, pool, exclude, in_changer)? {
        return Ok(Some(media));
    }

    if req.prune && pool.auto_prune && db.prune_volumes(pool.pool_id, req.now)? > 0 {
        if let Some(media) = recycle_oldest_purged_volume(db, req, pool, exclude, in_changer)? {
            return Ok(Some(media));
        }
    }

    find_scratch_volume(db, req, pool, in_changer)
}

fn recycle_oldest_purged_volume(
    db: &mut dyn CatalogBackend,
    req: &AllocRequest,
    pool: &PoolRecord,
    exclude: &[u64],
    in_changer: bool,
) -> Result<Option<MediaRecord>, AllocError> {
    let mut filter = volume_filter(req, pool.pool_id, VolStatus::Purged, in_changer);
    filter.exclude = exclude.to_vec();
    match db.find_next_volume(&filter)? {
        Some(mut media) => {
            recycle_volume(db, &mut media)?;
            log::info!("{}: Recycled volume \"{}\"", req.job, media.volume_name);
            Ok(Some(media))
        }
        None => Ok(None),
    }
}

fn recycle_oldest_volume(
    db: &mut dyn CatalogBackend,
    req: &AllocRequest,
    pool: &PoolRecord,
    exclude: &[u64],
) -> Result<Option<MediaRecord>, AllocError> {
    for status in [VolStatus::Full, VolStatus::Used] {
        let mut filter = volume_filter(req, pool.pool_id, status, false);
        filter.exclude = exclude.to_vec();

        while let Some(mut media) = db.find_next_volume(&filter)? {
            if !db.list_volume_job_ids(media.media_id)?.is_empty() {
                filter.exclude.push(media.media_id);
                continue;
            }
            recycle_volume(db, &mut media)?;
            log::info!("{}: Recycled oldest volume \"{}\"", req.job, media.volume_name);
            return Ok(Some(media));
        }
    }
    Ok(None)
}

fn find_scratch_volume(
    db: &mut dyn CatalogBackend,
    req: &AllocRequest,
    pool: &PoolRecord,
    in_changer: bool,
) -> Result<Option<MediaRecord>, AllocError> {
    let scratch = if pool.scratch_pool_id != 0 {
        db.get_pool(pool.scratch_pool_id)?
    } else {
        db.get_pool_by_name(DEFAULT_SCRATCH_POOL)?
    };
    let scratch = match scratch {
        Some(scratch) if scratch.pool_id != pool.pool_id => scratch,
        _ => return Ok(None),
    };

    for status in [VolStatus::Append, VolStatus::Recycle, VolStatus::Purged] {
        let filter = volume_filter(req, scratch.pool_id, status, in_changer);
        let media = match db.find_next_volume(&filter)? {
            Some(media) => media,
            None => continue,
        };

        let moved = run_transaction(db, |db| move_scratch_volume(db, req, pool.pool_id, scratch.pool_id, media))?;
        if moved.is_some() {
            return Ok(moved);
        }
        break;
    }
    Ok(None)
}

fn move_scratch_volume(
    db: &mut dyn CatalogBackend,
    req: &AllocRequest,
    pool_id: u64,
    scratch_id: u64,
    mut media: MediaRecord,
) -> Result<Option<MediaRecord>, Error> {
    let mut dest = get_pool(db, pool_id)?;
    let mut scratch = get_pool(db, scratch_id)?;

    if dest.max_vols > 0 && dest.num_vols >= dest.max_vols {
        log::warn!(
            "{}: Unable add Scratch Volume, Pool \"{}\" full MaxVols={}",
            req.job,
            dest.name,
            dest.max_vols
        );
        return Ok(None);
    }

    let defaults = MediaRecord::with_pool_defaults(&dest);
    media.pool_id = dest.pool_id;
    media.recycle = defaults.recycle;
    media.vol_retention = defaults.vol_retention;
    media.vol_use_duration = defaults.vol_use_duration;
    media.max_vol_jobs = defaults.max_vol_jobs;
    media.max_vol_files = defaults.max_vol_files;
    media.max_vol_bytes = defaults.max_vol_bytes;
    media.action_on_purge = defaults.action_on_purge;
    media.recycle_pool_id = defaults.recycle_pool_id;

    if media.vol_status == VolStatus::Purged {
        recycle_volume(db, &mut media)?;
    } else {
        db.update_media(&media)?;
    }

    dest.num_vols += 1;
    scratch.num_vols = scratch.num_vols.saturating_sub(1);
    db.update_pool(&dest)?;
    db.update_pool(&scratch)?;

    log::info!(
        "{}: Using Volume \"{}\" from '{}' pool.",
        req.job,
        media.volume_name,
        scratch.name
    );
    Ok(Some(media))
}
