use anyhow::Error;

use bdir_api_types::{MediaRecord, VolStatus};
use bdir_protocol::message::{reply, VolumeInfo};
use bdir_protocol::{BSock, BnetSignal};

use super::{add_pool, add_volume};
use crate::catalog::{Catalog, CatalogBackend, LocalCatalog};
use crate::catreq::CatalogRequestHandler;
use crate::job::{JobContext, JobInfo, JobStorage};

const JOB: &str = "Backup.2024-01-02_10.00.00_01";

fn job_context(catalog: LocalCatalog, pool_id: u64) -> JobContext {
    job_on_storage(Catalog::new(catalog), pool_id, 1, 1)
}

fn job_on_storage(catalog: Catalog, pool_id: u64, job_id: u64, storage_id: u64) -> JobContext {
    let info = JobInfo {
        job_id,
        job: JOB.to_string(),
        pool_name: "Default".to_string(),
        pool_id,
        start_time: 1_700_000_000,
        write_storage: vec![JobStorage {
            name: format!("File{}", storage_id),
            storage_id,
            media_type: "File".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    };
    JobContext::new(info, catalog)
}

fn socket_pair() -> (BSock, BSock) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (
        BSock::new(a, "Storage daemon", "localhost", 9103),
        BSock::new(b, "Director daemon", "localhost", 0),
    )
}

/// Send `line` through the handler, return the reply seen by the daemon.
async fn request(jcr: &JobContext, line: &str) -> Result<String, Error> {
    let (mut dir, mut sd) = socket_pair();
    CatalogRequestHandler::default().handle(jcr, &mut dir, line).await?;
    sd.recv_line().await
}

/// Values of an UpdateMedia request
struct MediaUpdate<'a> {
    volume: &'a str,
    vol_files: u32,
    vol_writes: u64,
    relabel: bool,
    in_changer: bool,
    slot: i32,
    read_time: i64,
    write_time: i64,
    first_written: i64,
}

impl<'a> MediaUpdate<'a> {
    fn new(volume: &'a str) -> Self {
        Self {
            volume,
            vol_files: 1,
            vol_writes: 30,
            relabel: false,
            in_changer: false,
            slot: 0,
            read_time: 0,
            write_time: 1234,
            first_written: 1_700_000_000,
        }
    }

    fn line(&self) -> String {
        format!(
            "CatReq JobId=1 UpdateMedia VolName={} VolJobs=1 VolFiles={} VolBlocks=30 \
             VolBytes=64512 VolABytes=0 VolHoleBytes=0 VolHoles=0 VolMounts=1 VolErrors=0 \
             VolWrites={} MaxVolBytes=0 EndTime=1700000100 VolStatus=Append Slot={} relabel={} \
             InChanger={} VolReadTime={} VolWriteTime={} VolFirstWritten={} \
             VolType=1 VolParts=0 VolCloudParts=0 LastPartBytes=0 Enabled=1 Recycle=1",
            self.volume,
            self.vol_files,
            self.vol_writes,
            self.slot,
            self.relabel as u8,
            self.in_changer as u8,
            self.read_time,
            self.write_time,
            self.first_written,
        )
    }
}

fn update_media_line(volume: &str, vol_files: u32) -> String {
    MediaUpdate { vol_files, ..MediaUpdate::new(volume) }.line()
}

fn stored_volume(jcr: &JobContext, name: &str) -> Result<MediaRecord, Error> {
    jcr.catalog()
        .lock()?
        .get_media_by_name(name)?
        .ok_or_else(|| anyhow::format_err!("volume {} vanished", name))
}

#[test]
fn test_find_media_creates_volume() -> Result<(), Error> {
    let mut db = LocalCatalog::new();
    let pool = add_pool(&mut db, "Default", "Vol")?;
    let jcr = job_context(db, pool.pool_id);

    let rt = tokio::runtime::Runtime::new()?;
    let answer = rt.block_on(request(
        &jcr,
        "CatReq JobId=1 FindMedia=0 pool_name=Default media_type=File vol_type=0",
    ))?;
    assert!(answer.starts_with("1000 OK VolName=Vol0001 "), "{}", answer);

    let info = VolumeInfo::parse(&answer).ok_or_else(|| anyhow::format_err!("bad reply"))?;
    assert_eq!(info.vol_status, VolStatus::Append);

    let db = jcr.catalog().lock()?;
    assert_eq!(db.get_pool(pool.pool_id)?.map(|p| p.num_vols), Some(1));
    Ok(())
}

#[test]
fn test_find_media_unknown_pool() -> Result<(), Error> {
    let jcr = job_context(LocalCatalog::new(), 0);

    let rt = tokio::runtime::Runtime::new()?;
    let answer = rt.block_on(request(
        &jcr,
        "CatReq JobId=1 FindMedia=0 pool_name=Nowhere media_type=File vol_type=0",
    ))?;
    assert_eq!(answer, reply::no_media("Pool \"Nowhere\" not in catalog."));
    Ok(())
}

#[test]
fn test_get_vol_info() -> Result<(), Error> {
    let mut db = LocalCatalog::new();
    let mut pool = add_pool(&mut db, "Default", "*")?;
    let mut other = add_pool(&mut db, "Other", "*")?;
    add_volume(&mut db, &mut pool, "Vol0001", VolStatus::Append, 0)?;
    add_volume(&mut db, &mut other, "Foreign", VolStatus::Append, 0)?;
    let jcr = job_context(db, pool.pool_id);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let answer = request(&jcr, "CatReq JobId=1 GetVolInfo VolName=Vol0001 write=1").await?;
        assert!(answer.starts_with("1000 OK VolName=Vol0001 "), "{}", answer);

        let answer = request(&jcr, "CatReq JobId=1 GetVolInfo VolName=Foreign write=1").await?;
        assert_eq!(answer, reply::bad_status("Foreign", "Append", "not in Pool"));

        // reading does not care about the pool
        let answer = request(&jcr, "CatReq JobId=1 GetVolInfo VolName=Foreign write=0").await?;
        assert!(answer.starts_with("1000 OK VolName=Foreign "), "{}", answer);

        let answer = request(&jcr, "CatReq JobId=1 GetVolInfo VolName=Missing write=0").await?;
        assert_eq!(answer, reply::not_in_catalog("Missing"));
        Ok(())
    })
}

#[test]
fn test_update_media_vol_files() -> Result<(), Error> {
    let mut db = LocalCatalog::new();
    let mut pool = add_pool(&mut db, "Default", "*")?;
    let mut media = add_volume(&mut db, &mut pool, "Vol0001", VolStatus::Append, 0)?;
    media.vol_files = 10;
    media.label_date = 1_600_000_000;
    db.update_media(&media)?;
    let jcr = job_context(db, pool.pool_id);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        // smaller file count is ignored
        let answer = request(&jcr, &update_media_line("Vol0001", 5)).await?;
        let info = VolumeInfo::parse(&answer).ok_or_else(|| anyhow::format_err!("bad reply"))?;
        assert_eq!(info.vol_files, 10);

        let answer = request(&jcr, &update_media_line("Vol0001", 20)).await?;
        let info = VolumeInfo::parse(&answer).ok_or_else(|| anyhow::format_err!("bad reply"))?;
        assert_eq!(info.vol_files, 20);
        Ok::<_, Error>(())
    })?;

    let db = jcr.catalog().lock()?;
    let stored = db
        .get_media_by_name("Vol0001")?
        .ok_or_else(|| anyhow::format_err!("volume vanished"))?;
    assert_eq!(stored.vol_files, 20);
    assert_eq!(stored.vol_blocks, 30);
    assert_eq!(stored.first_written, 1_700_000_000);
    assert_eq!(stored.last_written, 1_700_000_100);
    assert_eq!(stored.label_date, 1_600_000_000);
    Ok(())
}

#[test]
fn test_update_unknown_volume() -> Result<(), Error> {
    let jcr = job_context(LocalCatalog::new(), 0);

    let rt = tokio::runtime::Runtime::new()?;
    let answer = rt.block_on(request(&jcr, &update_media_line("Missing", 1)))?;
    assert!(answer.starts_with("1991 Catalog Request for vol=Missing failed"), "{}", answer);
    Ok(())
}

#[test]
fn test_create_jobmedia() -> Result<(), Error> {
    let mut db = LocalCatalog::new();
    let mut pool = add_pool(&mut db, "Default", "*")?;
    let media = add_volume(&mut db, &mut pool, "Vol0001", VolStatus::Append, 0)?;
    let jcr = job_context(db, pool.pool_id);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (mut dir, mut sd) = socket_pair();
        let handler = CatalogRequestHandler::default();

        sd.send_line(&format!("0 0 0 0 0 0 {}", media.media_id)).await?;
        sd.send_line(&format!("1 120 0 1 0 2000 {}", media.media_id)).await?;
        sd.signal(BnetSignal::Eod).await?;
        handler.handle(&jcr, &mut dir, "CatReq JobId=1 CreateJobMedia").await?;
        assert_eq!(sd.recv_line().await?, reply::CREATE_JOBMEDIA_OK);

        // unknown media in the middle fails the whole batch
        sd.send_line(&format!("121 130 1 1 2000 2100 {}", media.media_id)).await?;
        sd.send_line("131 140 1 1 2100 2200 9999").await?;
        sd.send_line(&format!("141 150 1 1 2200 2300 {}", media.media_id)).await?;
        sd.signal(BnetSignal::Eod).await?;
        handler.handle(&jcr, &mut dir, "CatReq JobId=1 CreateJobMedia").await?;
        assert_eq!(sd.recv_line().await?, reply::CREATE_JOBMEDIA_ERROR);

        // so does a malformed tuple
        sd.send_line("not a tuple").await?;
        sd.signal(BnetSignal::Eod).await?;
        handler.handle(&jcr, &mut dir, "CatReq JobId=1 CreateJobMedia").await?;
        assert_eq!(sd.recv_line().await?, reply::CREATE_JOBMEDIA_ERROR);
        Ok::<_, Error>(())
    })?;

    assert_eq!(jcr.catalog().lock()?.list_jobmedia(1)?.len(), 2);
    assert!(jcr.sd_status_snapshot()?.wrote_dummy_jobmedia);

    assert_eq!(jcr.remove_dummy_jobmedia_records()?, 1);
    let rows = jcr.catalog().lock()?.list_jobmedia(1)?;
    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].first_index, rows[0].last_index), (1, 120));
    Ok(())
}

#[test]
fn test_invalid_request() -> Result<(), Error> {
    let jcr = job_context(LocalCatalog::new(), 0);

    let rt = tokio::runtime::Runtime::new()?;
    let answer = rt.block_on(request(&jcr, "CatReq JobId=1 Frobnicate"))?;
    assert_eq!(answer, reply::invalid_request("CatReq JobId=1 Frobnicate"));
    Ok(())
}

#[test]
fn test_update_media_storage_follows_writes() -> Result<(), Error> {
    let mut db = LocalCatalog::new();
    let mut pool = add_pool(&mut db, "Default", "Vol")?;
    let mut media = add_volume(&mut db, &mut pool, "Vol0001", VolStatus::Append, 0)?;
    media.vol_writes = 30;
    media.storage_id = 1;
    db.update_media(&media)?;

    let catalog = Catalog::new(db);
    let other = job_on_storage(catalog, pool.pool_id, 2, 2);

    let rt = tokio::runtime::Runtime::new()?;

    // same write count, the volume was not written through storage 2
    rt.block_on(request(&other, &MediaUpdate::new("Vol0001").line()))?;
    assert_eq!(stored_volume(&other, "Vol0001")?.storage_id, 1);

    let update = MediaUpdate { vol_writes: 31, ..MediaUpdate::new("Vol0001") };
    rt.block_on(request(&other, &update.line()))?;
    let stored = stored_volume(&other, "Vol0001")?;
    assert_eq!(stored.storage_id, 2);
    assert_eq!(stored.vol_writes, 31);
    Ok(())
}

#[test]
fn test_update_media_relabel() -> Result<(), Error> {
    let mut db = LocalCatalog::new();
    let mut pool = add_pool(&mut db, "Default", "Vol")?;
    let mut media = add_volume(&mut db, &mut pool, "Vol0001", VolStatus::Append, 0)?;
    media.vol_files = 10;
    media.label_date = 1_600_000_000;
    db.update_media(&media)?;
    let jcr = job_context(db, pool.pool_id);

    let update = MediaUpdate { vol_files: 2, relabel: true, ..MediaUpdate::new("Vol0001") };
    let rt = tokio::runtime::Runtime::new()?;
    let answer = rt.block_on(request(&jcr, &update.line()))?;
    let info = VolumeInfo::parse(&answer).ok_or_else(|| anyhow::format_err!("bad reply"))?;
    assert_eq!(info.vol_files, 2);

    let stored = stored_volume(&jcr, "Vol0001")?;
    assert_eq!(stored.vol_files, 2);
    assert_eq!(stored.label_date, 1_700_000_000);
    Ok(())
}

#[test]
fn test_update_media_first_written() -> Result<(), Error> {
    let mut db = LocalCatalog::new();
    let mut pool = add_pool(&mut db, "Default", "Vol")?;
    let mut written = add_volume(&mut db, &mut pool, "Vol0001", VolStatus::Append, 0)?;
    written.first_written = 1_500_000_000;
    db.update_media(&written)?;
    add_volume(&mut db, &mut pool, "Vol0002", VolStatus::Append, 0)?;
    add_volume(&mut db, &mut pool, "Vol0003", VolStatus::Append, 0)?;
    let jcr = job_context(db, pool.pool_id);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        request(&jcr, &MediaUpdate::new("Vol0001").line()).await?;
        let update = MediaUpdate { first_written: 1_650_000_000, ..MediaUpdate::new("Vol0002") };
        request(&jcr, &update.line()).await?;
        // no date from the daemon, the job start is taken
        let update = MediaUpdate { first_written: 0, ..MediaUpdate::new("Vol0003") };
        request(&jcr, &update.line()).await?;
        Ok::<_, Error>(())
    })?;

    assert_eq!(stored_volume(&jcr, "Vol0001")?.first_written, 1_500_000_000);
    assert_eq!(stored_volume(&jcr, "Vol0002")?.first_written, 1_650_000_000);
    assert_eq!(stored_volume(&jcr, "Vol0003")?.first_written, 1_700_000_000);
    Ok(())
}

#[test]
fn test_update_media_negative_times() -> Result<(), Error> {
    let mut db = LocalCatalog::new();
    let mut pool = add_pool(&mut db, "Default", "Vol")?;
    let mut media = add_volume(&mut db, &mut pool, "Vol0001", VolStatus::Append, 0)?;
    media.vol_read_time = 77;
    media.vol_write_time = 88;
    db.update_media(&media)?;
    let jcr = job_context(db, pool.pool_id);

    let update = MediaUpdate { read_time: -1, write_time: -5, ..MediaUpdate::new("Vol0001") };
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(request(&jcr, &update.line()))?;

    let stored = stored_volume(&jcr, "Vol0001")?;
    assert_eq!(stored.vol_read_time, 77);
    assert_eq!(stored.vol_write_time, 88);

    let update = MediaUpdate { read_time: 100, write_time: 200, ..MediaUpdate::new("Vol0001") };
    rt.block_on(request(&jcr, &update.line()))?;

    let stored = stored_volume(&jcr, "Vol0001")?;
    assert_eq!(stored.vol_read_time, 100);
    assert_eq!(stored.vol_write_time, 200);
    Ok(())
}

#[test]
fn test_update_media_takes_changer_slot() -> Result<(), Error> {
    let mut db = LocalCatalog::new();
    let mut pool = add_pool(&mut db, "Default", "Vol")?;
    let mut old = add_volume(&mut db, &mut pool, "Vol0001", VolStatus::Full, 0)?;
    old.in_changer = true;
    old.slot = 3;
    old.storage_id = 1;
    db.update_media(&old)?;
    let mut fresh = add_volume(&mut db, &mut pool, "Vol0002", VolStatus::Append, 0)?;
    fresh.storage_id = 1;
    db.update_media(&fresh)?;
    let jcr = job_context(db, pool.pool_id);

    let update = MediaUpdate { in_changer: true, slot: 3, ..MediaUpdate::new("Vol0002") };
    let rt = tokio::runtime::Runtime::new()?;
    let answer = rt.block_on(request(&jcr, &update.line()))?;
    assert!(answer.starts_with("1000 OK VolName=Vol0002 "), "{}", answer);

    let stored = stored_volume(&jcr, "Vol0002")?;
    assert!(stored.in_changer);
    assert_eq!(stored.slot, 3);

    let stored = stored_volume(&jcr, "Vol0001")?;
    assert!(!stored.in_changer);
    assert_eq!(stored.slot, 0);
    Ok(())
}

#[test]
fn test_concurrent_find_media() -> Result<(), Error> {
    let mut db = LocalCatalog::new();
    let mut pool = add_pool(&mut db, "Default", "Vol")?;
    pool.max_vols = 4;
    db.update_pool(&pool)?;
    let catalog = Catalog::new(db);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()?;

    let answers = rt.block_on(async {
        let mut tasks = Vec::new();
        for job_id in 1..=8u64 {
            let jcr = job_on_storage(catalog.clone(), pool.pool_id, job_id, 1);
            // one media type per job, so no job can append to a volume of another
            let line = format!(
                "CatReq JobId={} FindMedia=1 pool_name=Default media_type=File{} vol_type=0",
                job_id, job_id
            );
            tasks.push(tokio::spawn(async move { request(&jcr, &line).await }));
        }
        let mut answers = Vec::new();
        for task in tasks {
            answers.push(task.await??);
        }
        Ok::<_, Error>(answers)
    })?;

    let mut names = Vec::new();
    for answer in answers.iter().filter(|a| a.starts_with("1000 OK")) {
        let info = VolumeInfo::parse(answer).ok_or_else(|| anyhow::format_err!("bad reply"))?;
        names.push(info.volume_name);
    }
    assert_eq!(names.len(), 4, "{:?}", answers);
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 4);

    let db = catalog.lock()?;
    let stored = db.get_pool(pool.pool_id)?.ok_or_else(|| anyhow::format_err!("pool vanished"))?;
    assert_eq!(stored.num_vols, 4);
    for name in names {
        assert_eq!(db.get_media_by_name(&name)?.map(|m| m.pool_id), Some(pool.pool_id));
    }
    Ok(())
}
