//! Snapshot catalog requests

use anyhow::{format_err, Error};

use bdir_api_types::{SnapshotFilter, SnapshotRecord};
use bdir_protocol::message::{reply, DeleteSnapshot, ListSnapshot, NewSnapshot};

use super::Reply;
use crate::job::JobContext;

/// Parse a `before=`/`after=` value: an epoch, or an RFC 3339 date where
/// the time may be separated by a space and a missing offset means UTC.
fn parse_snapshot_time(value: &str) -> Result<Option<i64>, Error> {
    if value.is_empty() || value == "0" {
        return Ok(None);
    }
    if let Ok(epoch) = value.parse::<i64>() {
        return Ok(Some(epoch));
    }

    let mut text = value.replacen(' ', "T", 1);
    let has_offset = text.ends_with('Z')
        || text
            .rfind(|c| c == '+' || c == '-')
            .map(|pos| pos > 10)
            .unwrap_or(false);
    if !has_offset {
        text.push('Z');
    }
    proxmox_time::parse_rfc3339(&text)
        .map(Some)
        .map_err(|err| format_err!("invalid date '{}' - {}", value, err))
}

pub(super) fn new_snapshot(jcr: &JobContext, req: &NewSnapshot, now: i64) -> Reply {
    let mut snap = SnapshotRecord {
        snapshot_id: 0,
        name: req.name.clone(),
        job_id: jcr.info.job_id,
        volume: req.volume.clone(),
        device: req.device.clone(),
        create_tdate: if req.tdate != 0 { req.tdate } else { now },
        snapshot_type: req.snapshot_type.clone(),
        retention: req.retention,
        client: jcr.info.client_name.clone(),
        fileset: jcr.info.fileset.clone(),
    };

    let result = jcr
        .catalog()
        .lock()
        .and_then(|mut db| db.create_snapshot(&mut snap));

    match result {
        Ok(()) => {
            log::info!("{}: Snapshot \"{}\" created on {}", jcr.job(), snap.name, snap.device);
            Reply::Ok(reply::SNAPSHOT_CREATED.to_string())
        }
        Err(err) => Reply::Rejected(reply::snapshot_not_created(&err.to_string())),
    }
}

/// Matching snapshot rows, errors are logged and yield an empty list.
pub(super) fn list_snapshots(jcr: &JobContext, req: &ListSnapshot, now: i64) -> Vec<String> {
    let filter = match build_filter(req) {
        Ok(filter) => filter,
        Err(err) => {
            log::error!("{}: unable to list snapshots - {}", jcr.job(), err);
            return Vec::new();
        }
    };

    let result = jcr
        .catalog()
        .lock()
        .and_then(|db| db.list_snapshots(&filter, now));

    match result {
        Ok(list) => list.iter().map(reply::snapshot_row).collect(),
        Err(err) => {
            log::error!("{}: unable to list snapshots - {}", jcr.job(), err);
            Vec::new()
        }
    }
}

fn build_filter(req: &ListSnapshot) -> Result<SnapshotFilter, Error> {
    Ok(SnapshotFilter {
        name: req.name.clone(),
        volume: req.volume.clone(),
        device: req.device.clone(),
        client: String::new(),
        create_tdate: req.tdate,
        snapshot_type: req.snapshot_type.clone(),
        created_before: parse_snapshot_time(&req.before)?,
        created_after: parse_snapshot_time(&req.after)?,
        expired: req.expired,
    })
}

pub(super) fn delete_snapshot(jcr: &JobContext, req: &DeleteSnapshot) -> Reply {
    let result = jcr
        .catalog()
        .lock()
        .and_then(|mut db| db.delete_snapshot(&req.name, &req.device));

    match result {
        Ok(()) => {
            log::info!("{}: Snapshot \"{}\" deleted", jcr.job(), req.name);
            Reply::Ok(reply::SNAPSHOT_DELETED.to_string())
        }
        Err(err) => Reply::Rejected(reply::snapshot_not_deleted(&err.to_string())),
    }
}
