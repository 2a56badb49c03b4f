//! Job startup on the storage daemon

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Error};

use bdir_api_types::{DirectorConfig, StorageConfig};
use bdir_protocol::message::{
    cancel_job_command, DeviceOk, JobCommand, JobMessage, JobOk, UseDevice, UseStorage,
    BOOTSTRAP_COMMAND, BOOTSTRAP_OK,
};
use bdir_protocol::{BSock, BnetMessage, BnetSignal};

use super::{log_job_message, MessageChannel};
use crate::auth::{authenticate_storage_daemon, PeerInfo};
use crate::catreq::CatalogRequestHandler;
use crate::job::{JobContext, JobStorage};

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Placeholder for an unset client name or FileSet hash
const DUMMY_NAME: &str = "**Dummy**";
const DUMMY_AUTH_KEY: &str = "dummy";

/// Devices the storage daemon selected
///
/// Each side is `None` if the job has no storage for it, otherwise the
/// selected device or the reason no device was accepted. The caller
/// decides whether the job can run with only one side.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceSelection {
    pub read: Option<Result<String, String>>,
    pub write: Option<Result<String, String>>,
}

impl DeviceSelection {
    /// Every requested side got a device.
    pub fn is_complete(&self) -> bool {
        [&self.read, &self.write]
            .into_iter()
            .flatten()
            .all(|side| side.is_ok())
    }
}

/// Control connection of one job to its storage daemon
pub struct JobSession {
    jcr: Arc<JobContext>,
    sock: BSock,
    peer: PeerInfo,
}

impl JobSession {
    /// Use an already authenticated connection.
    pub fn new(jcr: Arc<JobContext>, sock: BSock, peer: PeerInfo) -> Self {
        Self { jcr, sock, peer }
    }

    /// Connect to the storage daemon and authenticate.
    pub async fn connect(
        jcr: Arc<JobContext>,
        director: &DirectorConfig,
        storage: &StorageConfig,
        max_retry_time: Duration,
    ) -> Result<Self, Error> {
        log::debug!(
            "{}: connect to Storage daemon {} at {}:{}",
            jcr.job(),
            storage.name,
            storage.address,
            storage.port()
        );
        let sock = BSock::connect(
            "Storage daemon",
            &storage.address,
            storage.port(),
            CONNECT_RETRY_INTERVAL,
            max_retry_time,
        )
        .await?;

        let (sock, peer) = authenticate_storage_daemon(sock, director, storage).await?;
        Ok(Self::new(jcr, sock, peer))
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn socket(&mut self) -> &mut BSock {
        &mut self.sock
    }

    /// Start the job: send the job command and the bootstrap, then
    /// negotiate the read and write devices.
    pub async fn start(&mut self) -> Result<DeviceSelection, Error> {
        if self.jcr.info.rescheduled {
            self.cancel_previous_incarnation().await?;
        }

        self.send_job_command().await?;

        if let Some(bootstrap) = self.jcr.info.bootstrap.clone() {
            self.send_bootstrap(&bootstrap).await?;
        }

        let mut selection = DeviceSelection::default();
        let jcr = Arc::clone(&self.jcr);

        if !jcr.info.read_storage.is_empty() {
            selection.read = Some(self.use_storage(&jcr.info.read_storage, false).await?);
        }
        if !jcr.info.write_storage.is_empty() {
            selection.write = Some(self.use_storage(&jcr.info.write_storage, true).await?);
        }

        Ok(selection)
    }

    /// Hand the connection to a message channel for the rest of the job.
    pub fn start_message_channel(self, handler: CatalogRequestHandler) -> MessageChannel {
        MessageChannel::start(self.jcr, self.sock, handler)
    }

    pub fn into_socket(self) -> BSock {
        self.sock
    }

    /// The daemon may still run the job from before the reschedule and
    /// would not accept the same job again.
    async fn cancel_previous_incarnation(&mut self) -> Result<(), Error> {
        self.sock.send_line(&cancel_job_command(self.jcr.job())).await?;
        loop {
            match self.sock.recv().await {
                Ok(Some(BnetMessage::Text(_))) => continue,
                _ => break,
            }
        }
        Ok(())
    }

    async fn send_job_command(&mut self) -> Result<(), Error> {
        let info = &self.jcr.info;
        let status = self.jcr.sd_status_snapshot()?;

        let or_dummy = |value: &str, dummy: &str| {
            if value.is_empty() {
                dummy.to_string()
            } else {
                value.to_string()
            }
        };

        let command = JobCommand {
            job_id: info.job_id,
            job: info.job.clone(),
            job_name: info.job_name.clone(),
            client_name: or_dummy(&info.client_name, DUMMY_NAME),
            job_type: info.job_type.code(),
            job_level: info.level.code(),
            fileset: info.fileset.clone(),
            no_attributes: info.no_attributes,
            spool_attributes: info.spool_attributes,
            fileset_md5: or_dummy(&info.fileset_md5, DUMMY_NAME),
            spool_data: info.spool_data,
            write_part_after_job: info.write_part_after_job,
            prefer_mounted_volumes: info.prefer_mounted_volumes,
            spool_size: info.spool_size,
            rerunning: info.rerunning,
            vol_session_id: status.vol_session_id,
            vol_session_time: status.vol_session_time,
            sd_client: info.sd_client,
            authorization: or_dummy(&status.auth_key, DUMMY_AUTH_KEY),
        };
        self.sock.send_line(&command.to_string()).await?;

        let reply = recv_dir_msg(&self.jcr, &mut self.sock).await?;
        let job_ok = match JobOk::parse(&reply) {
            Some(job_ok) => job_ok,
            None => bail!("Storage daemon rejected Job command: {}", reply),
        };

        let mut status = self.jcr.sd_status()?;
        status.vol_session_id = job_ok.vol_session_id;
        status.vol_session_time = job_ok.vol_session_time;
        status.auth_key = job_ok.authorization;
        Ok(())
    }

    async fn send_bootstrap(&mut self, bootstrap: &str) -> Result<(), Error> {
        self.sock.send_line(BOOTSTRAP_COMMAND).await?;
        for line in bootstrap.lines() {
            self.sock.send_line(line).await?;
        }
        self.sock.signal(BnetSignal::Eod).await?;

        let reply = recv_dir_msg(&self.jcr, &mut self.sock).await?;
        if reply != BOOTSTRAP_OK {
            bail!("Bad response to Bootstrap command: wanted {}, got {}", BOOTSTRAP_OK, reply);
        }
        Ok(())
    }

    /// Offer all storages of one side with their devices.
    ///
    /// Returns the selected device, or the daemon's reason for rejecting
    /// the last offered device.
    async fn use_storage(
        &mut self,
        storages: &[JobStorage],
        append: bool,
    ) -> Result<Result<String, String>, Error> {
        let info = &self.jcr.info;
        let mut last_device = String::new();

        for storage in storages {
            let use_storage = UseStorage {
                storage: storage.name.clone(),
                media_type: storage.media_type.clone(),
                pool_name: info.pool_name.clone(),
                pool_type: info.pool_type.clone(),
                append,
                copy: false,
                stripe: 0,
            };
            self.sock.send_line(&use_storage.to_string()).await?;

            for device in storage.devices.iter() {
                let use_device = UseDevice {
                    device: device.clone(),
                };
                self.sock.send_line(&use_device.to_string()).await?;
                last_device = device.clone();
            }
            self.sock.signal(BnetSignal::Eod).await?;
        }
        self.sock.signal(BnetSignal::Eod).await?;

        let reply = recv_dir_msg(&self.jcr, &mut self.sock).await?;

        match DeviceOk::parse(&reply) {
            Some(DeviceOk { device }) => {
                let direction = if append { "write" } else { "read" };
                log::info!("{}: Using Device \"{}\" to {}.", self.jcr.job(), device, direction);
                Ok(Ok(device))
            }
            None => {
                let msg = format!(
                    "Storage daemon didn't accept Device \"{}\" because: {}",
                    last_device, reply
                );
                log::error!("{}: {}", self.jcr.job(), msg);
                Ok(Err(msg))
            }
        }
    }
}

/// Next reply line, job messages and heartbeats are handled on the way.
async fn recv_dir_msg(jcr: &JobContext, sock: &mut BSock) -> Result<String, Error> {
    loop {
        match sock.recv().await? {
            Some(BnetMessage::Text(line)) => match JobMessage::parse(&line) {
                Some(msg) => log_job_message(&msg),
                None => return Ok(line),
            },
            Some(BnetMessage::Signal(BnetSignal::Heartbeat))
            | Some(BnetMessage::Signal(BnetSignal::HbResponse)) => continue,
            Some(BnetMessage::Signal(signal)) => {
                bail!("{}: {} sent signal {:?} instead of a reply", jcr.job(), sock.who(), signal)
            }
            None => bail!("{}: {} closed the connection", jcr.job(), sock.who()),
        }
    }
}
