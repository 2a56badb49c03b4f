//! Automatic volume creation from the pool's label format

use bdir_api_types::{is_volume_name_legal, MediaRecord, PoolRecord};

use super::label_format::{expand_label_format, is_simple_label_format, LabelContext};
use super::{AllocError, AllocRequest};
use crate::catalog::CatalogBackend;

/// Numbered names probed by the simple naming scheme
const MAX_NAME_ATTEMPTS: u64 = 100;

fn create_simple_name(
    db: &mut dyn CatalogBackend,
    pool: &PoolRecord,
    prefix: &str,
    job: &str,
) -> Result<String, AllocError> {
    let start = db.max_volume_suffix(pool.pool_id, prefix)?;
    let first = match start.checked_add(1) {
        Some(first) => first,
        None => {
            log::error!("{}: Volume numbers of prefix \"{}\" exhausted.", job, prefix);
            return Err(AllocError::TooManyFailures);
        }
    };
    let last = start.saturating_add(MAX_NAME_ATTEMPTS);

    for i in first..=last {
        let name = format!("{}{:04}", prefix, i);
        if db.get_media_by_name(&name)?.is_some() {
            log::warn!(
                "{}: Wanted to create Volume \"{}\", but it already exists. Trying again.",
                job,
                name
            );
            continue;
        }
        return Ok(name);
    }

    log::error!("{}: Too many failures. Giving up creating Volume name.", job);
    Err(AllocError::TooManyFailures)
}

/// Create a new volume in the request's pool.
///
/// The pool's volume count is incremented together with the media insert,
/// inside one transaction on the locked catalog.
pub fn new_volume(
    db: &mut dyn CatalogBackend,
    req: &AllocRequest,
) -> Result<MediaRecord, AllocError> {
    db.begin_transaction()?;
    match create_volume(db, req) {
        Ok(media) => {
            db.commit_transaction()?;
            Ok(media)
        }
        Err(err) => {
            if let Err(rollback_err) = db.rollback_transaction() {
                log::error!("{}: catalog rollback failed - {}", req.job, rollback_err);
            }
            Err(err)
        }
    }
}

fn create_volume(
    db: &mut dyn CatalogBackend,
    req: &AllocRequest,
) -> Result<MediaRecord, AllocError> {
    // re-read, other jobs may have added volumes
    let mut pool = db
        .get_pool(req.pool_id)?
        .ok_or_else(|| anyhow::format_err!("pool id {} not in catalog", req.pool_id))?;

    if pool.max_vols > 0 && pool.num_vols >= pool.max_vols {
        log::debug!("{}: too many volumes for Pool {}", req.job, pool.name);
        return Err(AllocError::PoolFull(pool.name.clone()));
    }

    let mut media = MediaRecord::with_pool_defaults(&pool);
    media.media_type = req.media_type.clone();

    let format = pool.label_format.as_str();

    media.volume_name = match req.plugin_volume_name {
        Some(ref name) if is_volume_name_legal(name) => name.clone(),
        _ if format.is_empty() || format == "*" => {
            return Err(AllocError::NoLabelFormat(pool.name.clone()));
        }
        _ if is_simple_label_format(format) => create_simple_name(db, &pool, format, &req.job)?,
        _ => {
            let ctx = LabelContext {
                pool: pool.name.clone(),
                media_type: req.media_type.clone(),
                num_vols: pool.num_vols,
                ..req.label.clone()
            };
            let name = expand_label_format(format, &ctx)
                .map_err(|err| AllocError::BadLabelFormat(err.to_string()))?;
            if !is_volume_name_legal(&name) {
                log::error!("{}: Illegal character in Volume name \"{}\"", req.job, name);
                return Err(AllocError::IllegalName(name));
            }
            name
        }
    };

    pool.num_vols += 1;
    media.enabled = 1;
    media.storage_id = req.storage_id;

    db.create_media(&mut media)?;
    db.update_pool(&pool)?;

    log::info!(
        "{}: Created new Volume=\"{}\", Pool=\"{}\", MediaType=\"{}\" in catalog.",
        req.job,
        media.volume_name,
        pool.name,
        media.media_type
    );

    Ok(media)
}
