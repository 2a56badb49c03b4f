//! Message channel: the storage daemon's requests while a job runs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use bdir_api_types::JobStatus;
use bdir_protocol::message::{JobEnd, JobMessage, JobStart};
use bdir_protocol::{BSock, BnetMessage, BnetSignal};

use super::log_job_message;
use crate::catreq::CatalogRequestHandler;
use crate::job::JobContext;

/// Termination is awaited in slices of this length.
const WAIT_SLICE: Duration = Duration::from_secs(5);

/// Canceled slices before we stop waiting for the daemon
const MAX_CANCELED_SLICES: u32 = 6;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Started,
    Running,
    Done,
}

/// How the receive loop ended
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Exit {
    JobEnd,
    Canceled,
    Eof,
    SocketError,
}

/// Publishes `Done` and the final daemon status on every exit path,
/// including an aborted or never polled task.
struct ExitGuard {
    jcr: Arc<JobContext>,
    state: watch::Sender<ChannelState>,
    exit: Option<Exit>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let canceled = self.jcr.is_canceled();

        if let Ok(mut status) = self.jcr.sd_status() {
            if canceled {
                status.job_status = JobStatus::Canceled;
            } else {
                match self.exit {
                    Some(Exit::SocketError) => status.job_status = JobStatus::ErrorTerminated,
                    Some(Exit::Eof) => {
                        log::error!(
                            "{}: Director's connection to SD for this Job was lost.",
                            self.jcr.job()
                        );
                        status.connection_lost = true;
                    }
                    _ => {}
                }
            }
        }

        log::debug!("{}: message channel done ({:?})", self.jcr.job(), self.exit);
        self.state.send_replace(ChannelState::Done);
    }
}

/// Background task answering a storage daemon for one job
///
/// Dropping the handle aborts the task.
pub struct MessageChannel {
    jcr: Arc<JobContext>,
    state: watch::Receiver<ChannelState>,
    task: JoinHandle<()>,
}

impl MessageChannel {
    /// Spawn the channel task on the current runtime.
    pub fn start(jcr: Arc<JobContext>, sock: BSock, handler: CatalogRequestHandler) -> Self {
        let (state_tx, state) = watch::channel(ChannelState::Started);
        let guard = ExitGuard {
            jcr: Arc::clone(&jcr),
            state: state_tx,
            exit: None,
        };

        let task = tokio::spawn(run_channel(guard, sock, handler));

        Self { jcr, state, task }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn is_done(&self) -> bool {
        self.state() == ChannelState::Done
    }

    /// Break a blocked receive, the socket is closed.
    pub fn interrupt(&self) {
        self.task.abort();
    }

    /// Wait until the channel is done.
    ///
    /// Waits in slices. Once the job is canceled each slice interrupts the
    /// channel, after six such slices we give up and consider the storage
    /// daemon job terminated.
    pub async fn wait_for_termination(&mut self) {
        let mut canceled_slices = 0;

        while !self.is_done() {
            match tokio::time::timeout(WAIT_SLICE, self.state.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => break, // task gone
                Err(_) => {}
            }

            if self.jcr.is_canceled() {
                log::debug!("{}: interrupting message channel", self.jcr.job());
                self.interrupt();
                canceled_slices += 1;
            }
            if canceled_slices == MAX_CANCELED_SLICES {
                log::warn!(
                    "{}: storage daemon did not terminate the job, giving up",
                    self.jcr.job()
                );
                if let Ok(mut status) = self.jcr.sd_status() {
                    status.job_status = JobStatus::Terminated;
                }
                break;
            }
        }
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_channel(mut guard: ExitGuard, mut sock: BSock, handler: CatalogRequestHandler) {
    let jcr = Arc::clone(&guard.jcr);
    guard.state.send_replace(ChannelState::Running);

    let exit = loop {
        if jcr.is_canceled() {
            break Exit::Canceled;
        }

        let msg = tokio::select! {
            _ = jcr.canceled() => break Exit::Canceled,
            msg = sock.recv() => msg,
        };

        let line = match msg {
            Ok(Some(BnetMessage::Text(line))) => line,
            Ok(Some(BnetMessage::Signal(signal))) => match signal {
                BnetSignal::Heartbeat | BnetSignal::HbResponse | BnetSignal::Eod => continue,
                BnetSignal::Terminate => break Exit::Eof,
                other => {
                    log::debug!("{}: ignoring signal {:?} from {}", jcr.job(), other, sock.who());
                    continue;
                }
            },
            Ok(None) => break Exit::Eof,
            Err(err) => {
                log::error!("{}: {}", jcr.job(), err);
                break Exit::SocketError;
            }
        };

        if JobStart::parse(&line).is_some() {
            continue;
        }

        if let Some(end) = JobEnd::parse(&line) {
            match jcr.sd_status() {
                Ok(mut status) => {
                    status.job_status =
                        JobStatus::from_code(end.status).unwrap_or(JobStatus::ErrorTerminated);
                    status.job_files = end.files;
                    status.job_bytes = end.bytes;
                    status.job_errors = end.errors;
                    status.errmsg = end.errmsg;
                }
                Err(err) => log::error!("{}", err),
            }
            break Exit::JobEnd;
        }

        if let Some(msg) = JobMessage::parse(&line) {
            log_job_message(&msg);
            continue;
        }

        let result = tokio::select! {
            _ = jcr.canceled() => break Exit::Canceled,
            result = handler.handle(&jcr, &mut sock, &line) => result,
        };
        if let Err(err) = result {
            log::error!("{}: {}", jcr.job(), err);
            break Exit::SocketError;
        }
    };

    guard.exit = Some(exit);
}
