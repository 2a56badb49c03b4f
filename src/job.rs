//! Per job state shared between the job owner and its message channel

use std::sync::{Mutex, MutexGuard};

use anyhow::{format_err, Error};
use tokio_util::sync::CancellationToken;

use bdir_api_types::{JobLevel, JobStatus, JobType};

use crate::catalog::Catalog;
use crate::volume::LabelContext;

/// Storage resource a job reads from or writes to
#[derive(Clone, Debug, Default)]
pub struct JobStorage {
    pub name: String,
    /// Catalog id of the storage
    pub storage_id: u64,
    pub media_type: String,
    pub autochanger: bool,
    /// Devices in order of preference
    pub devices: Vec<String>,
}

/// Static description of a job, set up before it runs
#[derive(Clone, Debug)]
pub struct JobInfo {
    pub job_id: u64,
    /// Unique job name (`<name>.<date>_<seq>`)
    pub job: String,
    pub job_name: String,
    pub client_name: String,
    pub job_type: JobType,
    pub level: JobLevel,
    pub fileset: String,
    pub fileset_md5: String,
    pub pool_name: String,
    pub pool_id: u64,
    pub pool_type: String,
    pub no_attributes: bool,
    pub spool_attributes: bool,
    pub spool_data: bool,
    pub spool_size: u64,
    pub write_part_after_job: bool,
    pub prefer_mounted_volumes: bool,
    pub rerunning: bool,
    pub sd_client: bool,
    /// The job was rescheduled, the storage daemon may still know it
    pub rescheduled: bool,
    pub start_time: i64,
    /// Bootstrap file content for restores and verifies
    pub bootstrap: Option<String>,
    pub read_storage: Vec<JobStorage>,
    pub write_storage: Vec<JobStorage>,
}

impl Default for JobInfo {
    fn default() -> Self {
        Self {
            job_id: 0,
            job: String::new(),
            job_name: String::new(),
            client_name: String::new(),
            job_type: JobType::Backup,
            level: JobLevel::Full,
            fileset: String::new(),
            fileset_md5: String::new(),
            pool_name: String::new(),
            pool_id: 0,
            pool_type: "Backup".to_string(),
            no_attributes: false,
            spool_attributes: false,
            spool_data: false,
            spool_size: 0,
            write_part_after_job: false,
            prefer_mounted_volumes: true,
            rerunning: false,
            sd_client: false,
            rescheduled: false,
            start_time: 0,
            bootstrap: None,
            read_storage: Vec::new(),
            write_storage: Vec::new(),
        }
    }
}

/// Status reported by (or negotiated with) the storage daemon
#[derive(Clone, Debug)]
pub struct SdStatus {
    pub job_status: JobStatus,
    pub job_files: u32,
    pub job_bytes: u64,
    pub job_errors: u32,
    pub errmsg: String,
    pub vol_session_id: u32,
    pub vol_session_time: u32,
    /// Authorization key handed out by the storage daemon
    pub auth_key: String,
    /// Volume name chosen by a plugin for the next new volume
    pub plugin_volume_name: Option<String>,
    /// A placeholder JobMedia row was written for this job
    pub wrote_dummy_jobmedia: bool,
    /// Connection to the storage daemon was lost
    pub connection_lost: bool,
}

impl Default for SdStatus {
    fn default() -> Self {
        Self {
            job_status: JobStatus::Created,
            job_files: 0,
            job_bytes: 0,
            job_errors: 0,
            errmsg: String::new(),
            vol_session_id: 0,
            vol_session_time: 0,
            auth_key: String::new(),
            plugin_volume_name: None,
            wrote_dummy_jobmedia: false,
            connection_lost: false,
        }
    }
}

/// A running job
///
/// Shared (in an `Arc`) between the job owner and the message channel
/// task. The sockets are owned by the session and, once the job runs, by
/// the message channel.
pub struct JobContext {
    pub info: JobInfo,
    catalog: Catalog,
    cancel: CancellationToken,
    status: Mutex<SdStatus>,
}

impl JobContext {
    pub fn new(info: JobInfo, catalog: Catalog) -> Self {
        Self {
            info,
            catalog,
            cancel: CancellationToken::new(),
            status: Mutex::new(SdStatus::default()),
        }
    }

    pub fn job(&self) -> &str {
        &self.info.job
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Request cancellation, wakes up a blocked message channel.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the job is canceled.
    pub async fn canceled(&self) {
        self.cancel.cancelled().await
    }

    /// Lock the storage daemon status.
    pub fn sd_status(&self) -> Result<MutexGuard<'_, SdStatus>, Error> {
        self.status
            .lock()
            .map_err(|_| format_err!("{}: job status lock poisoned", self.info.job))
    }

    /// A copy of the storage daemon status.
    pub fn sd_status_snapshot(&self) -> Result<SdStatus, Error> {
        Ok(self.sd_status()?.clone())
    }

    pub fn set_sd_job_status(&self, status: JobStatus) -> Result<(), Error> {
        self.sd_status()?.job_status = status;
        Ok(())
    }

    /// The storage the job writes to (first configured write storage).
    pub fn write_storage(&self) -> Option<&JobStorage> {
        self.info.write_storage.first()
    }

    /// Values for label format expansion.
    pub fn label_context(&self, now: i64) -> LabelContext {
        let storage = self.write_storage();
        LabelContext {
            job_id: self.info.job_id,
            job: self.info.job.clone(),
            job_name: self.info.job_name.clone(),
            pool: self.info.pool_name.clone(),
            client: self.info.client_name.clone(),
            level: self.info.level.name().to_string(),
            job_type: self.info.job_type.name().to_string(),
            storage: storage.map(|s| s.name.clone()).unwrap_or_default(),
            media_type: storage.map(|s| s.media_type.clone()).unwrap_or_default(),
            num_vols: 0,
            time: now,
        }
    }

    /// Delete the job's placeholder JobMedia rows.
    ///
    /// Only done if the job actually wrote one.
    pub fn remove_dummy_jobmedia_records(&self) -> Result<usize, Error> {
        if !self.sd_status()?.wrote_dummy_jobmedia {
            return Ok(0);
        }
        let removed = self.catalog.lock()?.delete_dummy_jobmedia(self.info.job_id)?;
        if removed > 0 {
            log::debug!("{}: removed {} dummy JobMedia records", self.info.job, removed);
        }
        self.sd_status()?.wrote_dummy_jobmedia = false;
        Ok(removed)
    }
}
