//! Backup director control plane
//!
//! Authenticates to storage daemons, starts jobs on them and answers
//! their catalog requests while the jobs run. Volumes are allocated from
//! the catalog's pools, new volumes are labeled from the pool's label
//! format.

pub mod auth;
pub mod catalog;
pub mod catreq;
pub mod job;
pub mod storage;
pub mod volume;

#[cfg(test)]
mod test;
