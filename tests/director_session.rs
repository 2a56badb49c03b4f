// Director <-> storage daemon session over an in-memory socket
//
// # cargo test --test director_session

use std::sync::Arc;
use std::time::Duration;

use anyhow::{format_err, Error};

use bdir::auth::authenticate_storage_daemon;
use bdir::catalog::{Catalog, CatalogBackend, LocalCatalog};
use bdir::catreq::CatalogRequestHandler;
use bdir::job::{JobContext, JobInfo, JobStorage};
use bdir::storage::MessageChannel;
use bdir_api_types::{DirectorConfig, JobStatus, PoolRecord, StorageConfig, TlsOptions};
use bdir_cram::{cram_md5_response, generate_challenge, verify_cram_md5_response, ChallengeLine};
use bdir_protocol::message::{Hello, AUTH_OK};
use bdir_protocol::BSock;

const JOB: &str = "Backup.2024-01-02_10.00.00_01";
const PASSWORD: &str = "sd-secret";

fn director() -> DirectorConfig {
    DirectorConfig {
        name: "bdir".to_string(),
        password: "dir-secret".to_string(),
        comm_compression: None,
        max_concurrent_jobs: None,
        tls: TlsOptions::default(),
    }
}

fn storage() -> StorageConfig {
    StorageConfig {
        name: "File1".to_string(),
        address: "localhost".to_string(),
        port: None,
        password: PASSWORD.to_string(),
        device: vec!["FileStorage".to_string()],
        media_type: "File".to_string(),
        autochanger: None,
        tls: TlsOptions::default(),
    }
}

fn job_context() -> Result<(Arc<JobContext>, u64), Error> {
    let mut db = LocalCatalog::new();
    let mut pool = PoolRecord {
        name: "Default".to_string(),
        label_format: "Vol".to_string(),
        pool_type: "Backup".to_string(),
        enabled: 1,
        ..Default::default()
    };
    db.create_pool(&mut pool)?;

    let info = JobInfo {
        job_id: 1,
        job: JOB.to_string(),
        pool_name: pool.name.clone(),
        pool_id: pool.pool_id,
        write_storage: vec![JobStorage {
            name: "File1".to_string(),
            storage_id: 1,
            media_type: "File".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    };

    Ok((Arc::new(JobContext::new(info, Catalog::new(db))), pool.pool_id))
}

/// Answer the director's handshake like a storage daemon without TLS.
async fn storage_daemon_login(sd: &mut BSock) -> Result<(), Error> {
    let hello = sd.recv_line().await?;
    Hello::parse(&hello).ok_or_else(|| format_err!("bad hello '{}'", hello))?;

    let challenge = generate_challenge("sd")?;
    let line = ChallengeLine {
        challenge: challenge.clone(),
        tls_need: 0,
        compatible: true,
    };
    sd.send_line(&line.to_string()).await?;
    let response = sd.recv_line().await?;
    if !verify_cram_md5_response(PASSWORD, &challenge, &response)? {
        return Err(format_err!("director sent a wrong response"));
    }
    sd.send_line(AUTH_OK).await?;

    let challenge = ChallengeLine::parse(&sd.recv_line().await?)?;
    sd.send_line(&cram_md5_response(PASSWORD, &challenge.challenge, challenge.compatible)?)
        .await?;
    let answer = sd.recv_line().await?;
    if answer != AUTH_OK {
        return Err(format_err!("director refused us: {}", answer));
    }

    sd.send_line("3000 OK Hello").await
}

async fn connect() -> Result<(BSock, BSock), Error> {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let dir = BSock::new(a, "Storage daemon", "localhost", 9103);
    let mut sd = BSock::new(b, "Director daemon", "localhost", 0);

    let login = tokio::spawn(async move {
        storage_daemon_login(&mut sd).await?;
        Ok::<_, Error>(sd)
    });

    let (dir, peer) = authenticate_storage_daemon(dir, &director(), &storage()).await?;
    assert!(!peer.tls);
    assert!(!dir.compress());

    Ok((dir, login.await??))
}

#[test]
fn test_backup_job_requests_volume() -> Result<(), Error> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (jcr, pool_id) = job_context()?;
        let (dir, mut sd) = connect().await?;

        let mut chan = MessageChannel::start(Arc::clone(&jcr), dir, CatalogRequestHandler::default());

        sd.send_line(&format!("3010 Job {} start", JOB)).await?;
        sd.send_line("CatReq JobId=1 FindMedia=0 pool_name=Default media_type=File vol_type=0")
            .await?;
        let answer = sd.recv_line().await?;
        assert!(answer.starts_with("1000 OK VolName=Vol0001 "), "{}", answer);

        sd.send_line(&format!(
            "3099 Job {} end JobStatus=84 JobFiles=3 JobBytes=1024 JobErrors=0 ErrMsg=\"\"",
            JOB
        ))
        .await?;

        tokio::time::timeout(Duration::from_secs(10), chan.wait_for_termination()).await?;
        assert!(chan.is_done());

        let status = jcr.sd_status_snapshot()?;
        assert_eq!(status.job_status, JobStatus::Terminated);
        assert_eq!(status.job_files, 3);

        let db = jcr.catalog().lock()?;
        assert!(db.get_media_by_name("Vol0001")?.is_some());
        assert_eq!(db.get_pool(pool_id)?.map(|p| p.num_vols), Some(1));
        Ok(())
    })
}

#[test]
fn test_cancel_running_job() -> Result<(), Error> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (jcr, _) = job_context()?;
        let (dir, sd) = connect().await?;

        let mut chan = MessageChannel::start(Arc::clone(&jcr), dir, CatalogRequestHandler::default());

        // the daemon hangs, the director cancels
        jcr.cancel();
        tokio::time::timeout(Duration::from_secs(30), chan.wait_for_termination()).await?;
        assert!(chan.is_done());
        assert_eq!(jcr.sd_status_snapshot()?.job_status, JobStatus::Canceled);

        drop(sd);
        Ok(())
    })
}
