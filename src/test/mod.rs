// Allocator and catalog request scenarios on an in-memory catalog
//
// # cargo test test::

use anyhow::Error;

use bdir_api_types::{MediaRecord, PoolRecord, VolStatus};

use crate::catalog::{CatalogBackend, LocalCatalog};

mod catreq;

fn add_pool(db: &mut LocalCatalog, name: &str, label_format: &str) -> Result<PoolRecord, Error> {
    let mut pool = PoolRecord {
        name: name.to_string(),
        label_format: label_format.to_string(),
        pool_type: "Backup".to_string(),
        enabled: 1,
        ..Default::default()
    };
    db.create_pool(&mut pool)?;
    Ok(pool)
}

fn add_volume(
    db: &mut LocalCatalog,
    pool: &mut PoolRecord,
    name: &str,
    status: VolStatus,
    now: i64,
) -> Result<MediaRecord, Error> {
    let mut media = MediaRecord::with_pool_defaults(pool);
    media.volume_name = name.to_string();
    media.media_type = "File".to_string();
    media.vol_status = status;
    if status != VolStatus::Append {
        media.vol_jobs = 1;
        media.last_written = now;
        media.vol_retention = 365 * 86400;
    }
    db.create_media(&mut media)?;

    pool.num_vols += 1;
    db.update_pool(pool)?;

    Ok(media)
}
