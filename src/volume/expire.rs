//! Volume limits, recycling and the recycle eligibility policy

use anyhow::Error;

use bdir_api_types::{MediaRecord, PoolRecord, VolStatus};

use crate::catalog::CatalogBackend;

/// Check the limits of an `Append` volume which holds data.
///
/// When a limit is reached the new status (`Full` or `Used`) is written to
/// the catalog and `true` is returned.
pub fn has_volume_expired(
    db: &mut dyn CatalogBackend,
    pool: &PoolRecord,
    media: &mut MediaRecord,
    now: i64,
) -> Result<bool, Error> {
    if media.vol_status != VolStatus::Append || media.vol_jobs == 0 {
        return Ok(false);
    }

    let new_status = if media.max_vol_bytes > 0 && media.vol_bytes >= media.max_vol_bytes {
        log::info!(
            "Max Volume bytes={} exceeded. Marking Volume \"{}\" as Full.",
            media.max_vol_bytes,
            media.volume_name
        );
        Some(VolStatus::Full)
    } else if pool.use_once && media.vol_bytes > 0 {
        log::info!("Volume used once. Marking Volume \"{}\" as Used.", media.volume_name);
        Some(VolStatus::Used)
    } else if media.max_vol_jobs > 0 && media.vol_jobs >= media.max_vol_jobs {
        log::info!(
            "Max Volume jobs={} exceeded. Marking Volume \"{}\" as Used.",
            media.max_vol_jobs,
            media.volume_name
        );
        Some(VolStatus::Used)
    } else if media.max_vol_files > 0 && media.vol_files >= media.max_vol_files {
        log::info!(
            "Max Volume files={} exceeded. Marking Volume \"{}\" as Used.",
            media.max_vol_files,
            media.volume_name
        );
        Some(VolStatus::Used)
    } else if media.vol_use_duration > 0
        && media.first_written > 0
        && now >= media.first_written + media.vol_use_duration as i64
    {
        log::info!(
            "Max configured use duration={} sec. exceeded. Marking Volume \"{}\" as Used.",
            media.vol_use_duration,
            media.volume_name
        );
        Some(VolStatus::Used)
    } else {
        None
    };

    match new_status {
        Some(status) => {
            media.vol_status = status;
            db.update_media(media)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Reset a volume's usage counters and mark it `Recycle`.
pub fn recycle_volume(db: &mut dyn CatalogBackend, media: &mut MediaRecord) -> Result<(), Error> {
    media.vol_status = VolStatus::Recycle;
    media.vol_jobs = 0;
    media.vol_files = 0;
    media.vol_blocks = 0;
    media.vol_errors = 0;
    media.vol_bytes = 1;
    media.first_written = 0;
    media.last_written = 0;
    media.recycle_count += 1;
    db.update_media(media)
}

/// Decides whether a volume requested for writing may be used.
pub trait RecyclePolicy: Send + Sync {
    /// Returns `None` if the volume is usable (possibly after recycling
    /// it), or the reason why it is not.
    fn check_volume(
        &self,
        db: &mut dyn CatalogBackend,
        pool: &PoolRecord,
        media: &mut MediaRecord,
        now: i64,
    ) -> Result<Option<String>, Error>;
}

/// Accepts `Append` and `Recycle` volumes, recycles `Purged` ones and,
/// with `recycle-current-volume`, `Full`/`Used` volumes without jobs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRecyclePolicy;

const BAD_STATUS: &str = "but should be Append, Purged or Recycle";

impl RecyclePolicy for DefaultRecyclePolicy {
    fn check_volume(
        &self,
        db: &mut dyn CatalogBackend,
        pool: &PoolRecord,
        media: &mut MediaRecord,
        now: i64,
    ) -> Result<Option<String>, Error> {
        // an expired volume continues with its new status
        has_volume_expired(db, pool, media, now)?;

        if matches!(media.vol_status, VolStatus::Append | VolStatus::Recycle) {
            return Ok(None);
        }

        if media.vol_status == VolStatus::Purged {
            return match recycle_volume(db, media) {
                Ok(()) => {
                    log::info!("Recycled current volume \"{}\"", media.volume_name);
                    Ok(None)
                }
                Err(err) => {
                    log::warn!("recycling volume \"{}\" failed - {}", media.volume_name, err);
                    Ok(Some(format!(
                        "{} (recycling of the current volume failed)",
                        BAD_STATUS
                    )))
                }
            };
        }

        if !media.recycle {
            return Ok(Some("volume has recycling disabled".to_string()));
        }

        if pool.recycle_current_volume
            && matches!(media.vol_status, VolStatus::Full | VolStatus::Used)
            && db.list_volume_job_ids(media.media_id)?.is_empty()
        {
            recycle_volume(db, media)?;
            log::info!("Recycled current volume \"{}\"", media.volume_name);
            return Ok(None);
        }

        Ok(Some(BAD_STATUS.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::catalog::LocalCatalog;

    fn setup(media: MediaRecord) -> Result<(LocalCatalog, PoolRecord, MediaRecord), Error> {
        let mut db = LocalCatalog::new();
        let mut pool = PoolRecord {
            name: "Default".into(),
            ..Default::default()
        };
        db.create_pool(&mut pool)?;
        let mut media = MediaRecord {
            volume_name: "Vol0001".into(),
            pool_id: pool.pool_id,
            media_type: "File".into(),
            enabled: 1,
            ..media
        };
        db.create_media(&mut media)?;
        Ok((db, pool, media))
    }

    #[test]
    fn test_volume_limits() -> Result<(), Error> {
        let (mut db, pool, mut media) = setup(MediaRecord {
            vol_jobs: 1,
            vol_bytes: 5000,
            max_vol_bytes: 5000,
            ..Default::default()
        })?;
        assert!(has_volume_expired(&mut db, &pool, &mut media, 0)?);
        assert_eq!(media.vol_status, VolStatus::Full);
        let stored = db.get_media(media.media_id)?.map(|m| m.vol_status);
        assert_eq!(stored, Some(VolStatus::Full));

        // only Append volumes expire
        assert!(!has_volume_expired(&mut db, &pool, &mut media, 0)?);

        let (mut db, pool, mut media) = setup(MediaRecord {
            vol_jobs: 1,
            first_written: 1000,
            vol_use_duration: 3600,
            ..Default::default()
        })?;
        assert!(!has_volume_expired(&mut db, &pool, &mut media, 4599)?);
        assert!(has_volume_expired(&mut db, &pool, &mut media, 4600)?);
        assert_eq!(media.vol_status, VolStatus::Used);

        // unused volumes never expire
        let (mut db, pool, mut media) = setup(MediaRecord {
            max_vol_jobs: 1,
            ..Default::default()
        })?;
        assert!(!has_volume_expired(&mut db, &pool, &mut media, 0)?);
        Ok(())
    }

    #[test]
    fn test_recycle_volume() -> Result<(), Error> {
        let (mut db, _pool, mut media) = setup(MediaRecord {
            vol_status: VolStatus::Purged,
            vol_jobs: 4,
            vol_files: 10,
            vol_bytes: 123456,
            first_written: 10,
            last_written: 20,
            recycle_count: 2,
            ..Default::default()
        })?;
        recycle_volume(&mut db, &mut media)?;

        let stored = db.get_media(media.media_id)?.unwrap();
        assert_eq!(stored.vol_status, VolStatus::Recycle);
        assert_eq!(stored.vol_jobs, 0);
        assert_eq!(stored.vol_files, 0);
        assert_eq!(stored.vol_bytes, 1);
        assert_eq!(stored.first_written, 0);
        assert_eq!(stored.recycle_count, 3);
        Ok(())
    }

    #[test]
    fn test_default_policy() -> Result<(), Error> {
        let policy = DefaultRecyclePolicy;

        let (mut db, pool, mut media) = setup(MediaRecord::default())?;
        assert_eq!(policy.check_volume(&mut db, &pool, &mut media, 0)?, None);

        let (mut db, pool, mut media) = setup(MediaRecord {
            vol_status: VolStatus::Purged,
            ..Default::default()
        })?;
        assert_eq!(policy.check_volume(&mut db, &pool, &mut media, 0)?, None);
        assert_eq!(media.vol_status, VolStatus::Recycle);

        let (mut db, pool, mut media) = setup(MediaRecord {
            vol_status: VolStatus::Full,
            recycle: false,
            ..Default::default()
        })?;
        assert_eq!(
            policy.check_volume(&mut db, &pool, &mut media, 0)?.as_deref(),
            Some("volume has recycling disabled")
        );

        let (mut db, mut pool, mut media) = setup(MediaRecord {
            vol_status: VolStatus::Used,
            recycle: true,
            ..Default::default()
        })?;
        assert_eq!(
            policy.check_volume(&mut db, &pool, &mut media, 0)?.as_deref(),
            Some(BAD_STATUS)
        );
        pool.recycle_current_volume = true;
        assert_eq!(policy.check_volume(&mut db, &pool, &mut media, 0)?, None);
        assert_eq!(media.vol_status, VolStatus::Recycle);
        Ok(())
    }
}
