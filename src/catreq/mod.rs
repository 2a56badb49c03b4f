//! Catalog requests sent by the storage daemon
//!
//! Every request is answered with exactly one reply line (snapshot
//! listings send rows and end of data). Catalog and allocation failures
//! become rejection replies; only transport errors are returned to the
//! caller.

use std::sync::Arc;

use anyhow::{bail, Error};

use bdir_api_types::{JobMediaRecord, MediaRecord};
use bdir_protocol::message::{
    reply, CatalogRequest, CreateJobMedia, FindMedia, GetVolInfo, JobMediaTuple, UpdateMedia,
    VolumeInfo,
};
use bdir_protocol::{BSock, BnetMessage, BnetSignal};

use crate::catalog::{run_transaction, CatalogBackend};
use crate::job::JobContext;
use crate::volume::{
    find_next_volume_for_append, has_volume_expired, AllocRequest, DefaultRecyclePolicy,
    RecyclePolicy,
};

mod snapshot;

/// Outcome of one request: the reply line, and whether it is a rejection
enum Reply {
    Ok(String),
    Rejected(String),
}

/// Answers catalog requests of one job
#[derive(Clone)]
pub struct CatalogRequestHandler {
    policy: Arc<dyn RecyclePolicy>,
}

impl Default for CatalogRequestHandler {
    fn default() -> Self {
        Self::new(Arc::new(DefaultRecyclePolicy))
    }
}

impl CatalogRequestHandler {
    pub fn new(policy: Arc<dyn RecyclePolicy>) -> Self {
        Self { policy }
    }

    /// Handle the request starting with `line`.
    pub async fn handle(&self, jcr: &JobContext, sock: &mut BSock, line: &str) -> Result<(), Error> {
        let request = match CatalogRequest::parse(line) {
            Some(request) => request,
            None => {
                let msg = reply::invalid_request(line);
                log::error!("{}: Invalid Catalog request: {}", jcr.job(), line);
                return sock.send_line(&msg).await;
            }
        };

        if let Some(job_id) = request.job_id() {
            if job_id != jcr.info.job_id {
                log::debug!(
                    "{}: catalog request for JobId={} on channel of JobId={}",
                    jcr.job(),
                    job_id,
                    jcr.info.job_id
                );
            }
        }

        let now = proxmox_time::epoch_i64();

        let result = match request {
            CatalogRequest::FindMedia(req) => self.find_media(jcr, &req, now),
            CatalogRequest::GetVolInfo(req) => self.get_vol_info(jcr, &req, now),
            CatalogRequest::UpdateMedia(req) => self.update_media(jcr, &req, now),
            CatalogRequest::CreateJobMedia(req) => {
                let tuples = read_jobmedia_tuples(jcr, sock).await?;
                self.create_jobmedia(jcr, &req, tuples)
            }
            CatalogRequest::NewSnapshot(req) => snapshot::new_snapshot(jcr, &req, now),
            CatalogRequest::ListSnapshot(req) => {
                let rows = snapshot::list_snapshots(jcr, &req, now);
                for row in rows {
                    sock.send_line(&row).await?;
                }
                return sock.signal(BnetSignal::Eod).await;
            }
            CatalogRequest::DeleteSnapshot(req) => snapshot::delete_snapshot(jcr, &req),
        };

        match result {
            Reply::Ok(msg) => sock.send_line(&msg).await,
            Reply::Rejected(msg) => {
                log::warn!("{}: {} (request: {})", jcr.job(), msg, line);
                sock.send_line(&msg).await
            }
        }
    }

    fn find_media(&self, jcr: &JobContext, req: &FindMedia, now: i64) -> Reply {
        let storage = jcr.write_storage();

        let mut db = match jcr.catalog().lock() {
            Ok(db) => db,
            Err(err) => return Reply::Rejected(reply::no_media(&err.to_string())),
        };

        let pool = match db.get_pool_by_name(&req.pool_name) {
            Ok(Some(pool)) => pool,
            Ok(None) => {
                return Reply::Rejected(reply::no_media(&format!(
                    "Pool \"{}\" not in catalog.",
                    req.pool_name
                )))
            }
            Err(err) => return Reply::Rejected(reply::no_media(&err.to_string())),
        };

        let plugin_volume_name = match jcr.sd_status() {
            Ok(mut status) => status.plugin_volume_name.take(),
            Err(_) => None,
        };

        let alloc = AllocRequest {
            job: jcr.job().to_string(),
            pool_id: pool.pool_id,
            media_type: req.media_type.clone(),
            storage_id: storage.map(|s| s.storage_id).unwrap_or(0),
            autochanger: storage.map(|s| s.autochanger).unwrap_or(false),
            index: req.index,
            create: true,
            prune: true,
            exclude: Vec::new(),
            plugin_volume_name,
            label: jcr.label_context(now),
            now,
        };

        match find_next_volume_for_append(&mut **db, &alloc) {
            Ok(media) => Reply::Ok(VolumeInfo::from(&media).to_string()),
            Err(err) => Reply::Rejected(reply::no_media(&err.to_string())),
        }
    }

    fn get_vol_info(&self, jcr: &JobContext, req: &GetVolInfo, now: i64) -> Reply {
        let mut db = match jcr.catalog().lock() {
            Ok(db) => db,
            Err(err) => {
                return Reply::Rejected(reply::request_failed(&req.volume_name, &err.to_string()))
            }
        };

        match self.check_volume(&mut **db, jcr, req, now) {
            Ok(Ok(media)) => Reply::Ok(VolumeInfo::from(&media).to_string()),
            Ok(Err(reject)) => Reply::Rejected(reject),
            Err(err) => Reply::Rejected(reply::request_failed(&req.volume_name, &err.to_string())),
        }
    }

    fn check_volume(
        &self,
        db: &mut dyn CatalogBackend,
        jcr: &JobContext,
        req: &GetVolInfo,
        now: i64,
    ) -> Result<Result<MediaRecord, String>, Error> {
        let mut media = match db.get_media_by_name(&req.volume_name)? {
            Some(media) => media,
            None => return Ok(Err(reply::not_in_catalog(&req.volume_name))),
        };

        let mut reason = None;
        if req.write {
            let media_type = jcr.write_storage().map(|s| s.media_type.as_str());
            if media.pool_id != jcr.info.pool_id {
                reason = Some("not in Pool".to_string());
            } else if media_type.map(|t| t != media.media_type).unwrap_or(false) {
                reason = Some("not correct MediaType".to_string());
            } else {
                match db.get_pool(media.pool_id)? {
                    Some(pool) => {
                        reason = self.policy.check_volume(db, &pool, &mut media, now)?;
                    }
                    None => bail!("pool id {} not in catalog", media.pool_id),
                }
            }
        }
        if reason.is_none() && !media.is_enabled() {
            reason = Some("is not Enabled".to_string());
        }

        Ok(match reason {
            None => Ok(media),
            Some(reason) => Err(reply::bad_status(
                &media.volume_name,
                media.vol_status.as_str(),
                &reason,
            )),
        })
    }

    fn update_media(&self, jcr: &JobContext, req: &UpdateMedia, now: i64) -> Reply {
        let mut db = match jcr.catalog().lock() {
            Ok(db) => db,
            Err(err) => {
                return Reply::Rejected(reply::request_failed(&req.volume_name, &err.to_string()))
            }
        };

        let mut media = match db.get_media_by_name(&req.volume_name) {
            Ok(Some(media)) => media,
            Ok(None) => {
                log::error!("{}: Unable to get Media record for Volume {}", jcr.job(), req.volume_name);
                return Reply::Rejected(reply::request_failed(
                    &req.volume_name,
                    "Volume not in catalog",
                ));
            }
            Err(err) => {
                return Reply::Rejected(reply::request_failed(&req.volume_name, &err.to_string()))
            }
        };

        apply_media_update(jcr, &mut media, req);

        let result = run_transaction(&mut **db, |db| {
            db.update_media(&media)?;
            db.make_inchanger_unique(&media)
        });
        if let Err(err) = result {
            log::error!("{}: Catalog error updating Media record. {}", jcr.job(), err);
            return Reply::Rejected(reply::UPDATE_MEDIA_ERROR.to_string());
        }

        match db.get_pool(media.pool_id) {
            Ok(Some(pool)) => {
                if let Err(err) = has_volume_expired(&mut **db, &pool, &mut media, now) {
                    log::error!("{}: Catalog error updating Media record. {}", jcr.job(), err);
                    return Reply::Rejected(reply::UPDATE_MEDIA_ERROR.to_string());
                }
            }
            Ok(None) => log::warn!("{}: pool id {} not in catalog", jcr.job(), media.pool_id),
            Err(err) => log::warn!("{}: {}", jcr.job(), err),
        }

        Reply::Ok(VolumeInfo::from(&media).to_string())
    }

    fn create_jobmedia(
        &self,
        jcr: &JobContext,
        req: &CreateJobMedia,
        tuples: Result<Vec<JobMediaTuple>, String>,
    ) -> Reply {
        let tuples = match tuples {
            Ok(tuples) => tuples,
            Err(line) => {
                log::error!("{}: Invalid JobMedia tuple: {}", jcr.job(), line);
                return Reply::Rejected(reply::CREATE_JOBMEDIA_ERROR.to_string());
            }
        };

        let mut wrote_dummy = false;
        let result = jcr.catalog().transaction(|db| {
            for tuple in tuples.iter() {
                let mut record = JobMediaRecord {
                    job_media_id: 0,
                    job_id: req.job_id,
                    media_id: tuple.media_id,
                    first_index: tuple.first_index,
                    last_index: tuple.last_index,
                    start_file: tuple.start_file,
                    end_file: tuple.end_file,
                    start_block: tuple.start_block,
                    end_block: tuple.end_block,
                };
                db.create_jobmedia(&mut record)?;
                wrote_dummy |= record.is_dummy();
            }
            Ok(())
        });

        match result {
            Ok(()) => {
                if wrote_dummy {
                    if let Ok(mut status) = jcr.sd_status() {
                        status.wrote_dummy_jobmedia = true;
                    }
                }
                Reply::Ok(reply::CREATE_JOBMEDIA_OK.to_string())
            }
            Err(err) => {
                log::error!("{}: Catalog error creating JobMedia records. {}", jcr.job(), err);
                Reply::Rejected(reply::CREATE_JOBMEDIA_ERROR.to_string())
            }
        }
    }
}

/// Copy the values reported by the storage daemon into `media`.
fn apply_media_update(jcr: &JobContext, media: &mut MediaRecord, req: &UpdateMedia) {
    let start_time = jcr.info.start_time;

    if media.first_written == 0 {
        media.first_written = if req.vol_first_written == 0 {
            start_time
        } else {
            req.vol_first_written
        };
    }

    let mut vol_files = req.vol_files;
    if req.relabel || media.label_date == 0 {
        media.label_date = start_time;
        if media.initial_write == 0 {
            media.initial_write = start_time;
        }
    } else if vol_files < media.vol_files {
        log::info!(
            "{}: Attempt to set Volume Files from {} to {} for Volume \"{}\". Ignored.",
            jcr.job(),
            media.vol_files,
            vol_files,
            media.volume_name
        );
        vol_files = media.vol_files;
    }

    if media.vol_blocks != req.vol_blocks && req.end_time != 0 {
        media.last_written = req.end_time;
    }

    if req.vol_writes > media.vol_writes {
        if let Some(storage) = jcr.write_storage() {
            media.storage_id = storage.storage_id;
        }
    }

    media.vol_jobs = req.vol_jobs;
    media.vol_files = vol_files;
    media.vol_blocks = req.vol_blocks;
    media.vol_bytes = req.vol_bytes;
    media.vol_abytes = req.vol_abytes;
    media.vol_hole_bytes = req.vol_hole_bytes;
    media.vol_holes = req.vol_holes;
    media.vol_mounts = req.vol_mounts;
    media.vol_errors = req.vol_errors;
    media.vol_writes = req.vol_writes;
    media.max_vol_bytes = req.max_vol_bytes;
    media.vol_status = req.vol_status;
    media.slot = req.slot;
    media.in_changer = req.in_changer;
    media.vol_type = req.vol_type;
    media.vol_parts = req.vol_parts;
    media.vol_cloud_parts = req.vol_cloud_parts;
    media.last_part_bytes = req.last_part_bytes;
    media.enabled = req.enabled;
    media.recycle = req.recycle;
    if req.vol_read_time >= 0 {
        media.vol_read_time = req.vol_read_time;
    }
    if req.vol_write_time >= 0 {
        media.vol_write_time = req.vol_write_time;
    }
}

/// Read JobMedia tuples until end of data.
///
/// An invalid line fails the batch (the remaining lines are still read),
/// returned as `Ok(Err(line))`.
async fn read_jobmedia_tuples(
    jcr: &JobContext,
    sock: &mut BSock,
) -> Result<Result<Vec<JobMediaTuple>, String>, Error> {
    let mut tuples = Vec::new();
    let mut bad_line = None;

    loop {
        match sock.recv().await? {
            Some(BnetMessage::Text(line)) => match JobMediaTuple::parse(&line) {
                Some(tuple) => tuples.push(tuple),
                None => {
                    if bad_line.is_none() {
                        bad_line = Some(line);
                    }
                }
            },
            Some(BnetMessage::Signal(BnetSignal::Eod)) => break,
            Some(BnetMessage::Signal(signal)) => {
                log::debug!("{}: ignoring signal {:?} in JobMedia list", jcr.job(), signal);
            }
            None => bail!("{}: connection closed while reading JobMedia records", jcr.job()),
        }
    }

    Ok(match bad_line {
        Some(line) => Err(line),
        None => Ok(tuples),
    })
}
