//! Storage daemon job control
//!
//! A [JobSession] connects and authenticates to the storage daemon and
//! negotiates the job's devices. Once the job runs, the socket is handed
//! to a [MessageChannel] which answers the daemon's catalog requests until
//! the job ends.

use bdir_protocol::message::{JobMessage, M_ABORT, M_DEBUG, M_ERROR, M_FATAL, M_WARNING};

mod msgchan;
mod session;

pub use msgchan::{ChannelState, MessageChannel};
pub use session::{DeviceSelection, JobSession};

/// Forward a job message sent by a daemon to the log.
pub(crate) fn log_job_message(msg: &JobMessage) {
    match msg.msg_type {
        M_ABORT | M_FATAL | M_ERROR => log::error!("{}: {}", msg.job, msg.text),
        M_WARNING => log::warn!("{}: {}", msg.job, msg.text),
        M_DEBUG => log::debug!("{}: {}", msg.job, msg.text),
        _ => log::info!("{}: {}", msg.job, msg.text),
    }
}
