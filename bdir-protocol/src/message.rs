//! Message templates
//!
//! Every message has a `parse()` function which returns `None` when the
//! line does not match the template, and a `Display` implementation which
//! produces the line (without newline). Names are bashed on output and
//! unbashed when parsed.

use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{anychar, char},
    combinator::{map, map_res, opt, rest, verify},
    sequence::{preceded, tuple},
};

use bdir_api_types::{MediaRecord, VolStatus};

use crate::bash_spaces;
use crate::parse::{
    field, keyword, match_line, multispace1, notspace1, parse_flag, parse_i32, parse_i64,
    parse_name, parse_text, parse_u32, parse_u64, IResult,
};

fn parse_vol_status(i: &str) -> IResult<&str, VolStatus> {
    map_res(notspace1, str::parse)(i)
}

/// Role of the peer we greet
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HelloRole {
    StorageDaemon,
    FileDaemon,
    /// Inbound console, the name is the console's name
    Console,
}

/// `Hello SD: Bacula Director <name> calling <version>` (storage daemon),
/// `Hello Director <name> calling <version>` (file daemon) or
/// `Hello <name> calling <version>` (console)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub role: HelloRole,
    pub name: String,
    pub version: u32,
}

impl Hello {
    pub fn parse(line: &str) -> Option<Self> {
        let role = alt((
            map(tag("SD: Bacula Director "), |_| HelloRole::StorageDaemon),
            map(tag("Director "), |_| HelloRole::FileDaemon),
            map(tag(""), |_| HelloRole::Console),
        ));
        match_line(
            line,
            map(
                tuple((
                    tag("Hello "),
                    role,
                    parse_name,
                    keyword("calling"),
                    preceded(multispace1, parse_u32),
                )),
                |(_, role, name, _, version)| Hello {
                    role,
                    name,
                    version,
                },
            ),
        )
    }
}

impl fmt::Display for Hello {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let prefix = match self.role {
            HelloRole::StorageDaemon => "SD: Bacula Director ",
            HelloRole::FileDaemon => "Director ",
            HelloRole::Console => "",
        };
        write!(
            f,
            "Hello {}{} calling {}",
            prefix,
            bash_spaces(&self.name),
            self.version
        )
    }
}

/// `3000 OK Hello [<version>]` (storage daemon) or `2000 OK Hello [<version>]`
/// (file daemon)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HelloOk {
    pub code: u32,
    pub version: Option<u32>,
}

impl HelloOk {
    pub fn parse(line: &str) -> Option<Self> {
        match_line(
            line,
            map(
                tuple((
                    alt((tag("3000"), tag("2000"))),
                    keyword("OK"),
                    keyword("Hello"),
                    opt(preceded(multispace1, parse_u32)),
                )),
                |(code, _, _, version)| HelloOk {
                    code: if code == "3000" { 3000 } else { 2000 },
                    version,
                },
            ),
        )
    }
}

impl fmt::Display for HelloOk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.version {
            Some(version) => write!(f, "{} OK Hello {}", self.code, version),
            None => write!(f, "{} OK Hello", self.code),
        }
    }
}

/// Authentication result lines
pub const AUTH_OK: &str = "1000 OK auth";
pub const AUTH_FAILED: &str = "1999 Authorization failed.";

/// The job command sent to the storage daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCommand {
    pub job_id: u64,
    pub job: String,
    pub job_name: String,
    pub client_name: String,
    /// Job type character code
    pub job_type: char,
    /// Job level character code
    pub job_level: char,
    pub fileset: String,
    pub no_attributes: bool,
    pub spool_attributes: bool,
    pub fileset_md5: String,
    pub spool_data: bool,
    pub write_part_after_job: bool,
    pub prefer_mounted_volumes: bool,
    pub spool_size: u64,
    pub rerunning: bool,
    pub vol_session_id: u32,
    pub vol_session_time: u32,
    pub sd_client: bool,
    pub authorization: String,
}

impl JobCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let code = || map(parse_u32, |c| char::from_u32(c).unwrap_or('?'));
        match_line(
            line,
            map(
                tuple((
                    tuple((
                        preceded(tag("JobId="), parse_u64),
                        field("job", parse_name),
                        field("job_name", parse_name),
                        field("client_name", parse_name),
                        field("type", code()),
                        field("level", code()),
                        field("FileSet", parse_name),
                        field("NoAttr", parse_flag),
                        field("SpoolAttr", parse_flag),
                        field("FileSetMD5", parse_text),
                    )),
                    tuple((
                        field("SpoolData", parse_flag),
                        field("WritePartAfterJob", parse_flag),
                        field("PreferMountedVols", parse_flag),
                        field("SpoolSize", parse_u64),
                        field("rerunning", parse_flag),
                        field("VolSessionId", parse_u32),
                        field("VolSessionTime", parse_u32),
                        field("sd_client", parse_flag),
                        field("Authorization", parse_text),
                    )),
                )),
                |(
                    (
                        job_id,
                        job,
                        job_name,
                        client_name,
                        job_type,
                        job_level,
                        fileset,
                        no_attributes,
                        spool_attributes,
                        fileset_md5,
                    ),
                    (
                        spool_data,
                        write_part_after_job,
                        prefer_mounted_volumes,
                        spool_size,
                        rerunning,
                        vol_session_id,
                        vol_session_time,
                        sd_client,
                        authorization,
                    ),
                )| JobCommand {
                    job_id,
                    job,
                    job_name,
                    client_name,
                    job_type,
                    job_level,
                    fileset,
                    no_attributes,
                    spool_attributes,
                    fileset_md5,
                    spool_data,
                    write_part_after_job,
                    prefer_mounted_volumes,
                    spool_size,
                    rerunning,
                    vol_session_id,
                    vol_session_time,
                    sd_client,
                    authorization,
                },
            ),
        )
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "JobId={} job={} job_name={} client_name={} type={} level={} FileSet={} \
             NoAttr={} SpoolAttr={} FileSetMD5={} SpoolData={} WritePartAfterJob={} \
             PreferMountedVols={} SpoolSize={} rerunning={} VolSessionId={} \
             VolSessionTime={} sd_client={} Authorization={}",
            self.job_id,
            bash_spaces(&self.job),
            bash_spaces(&self.job_name),
            bash_spaces(&self.client_name),
            self.job_type as u32,
            self.job_level as u32,
            bash_spaces(&self.fileset),
            u8::from(self.no_attributes),
            u8::from(self.spool_attributes),
            self.fileset_md5,
            u8::from(self.spool_data),
            u8::from(self.write_part_after_job),
            u8::from(self.prefer_mounted_volumes),
            self.spool_size,
            u8::from(self.rerunning),
            self.vol_session_id,
            self.vol_session_time,
            u8::from(self.sd_client),
            self.authorization,
        )
    }
}

/// `3000 OK Job SDid=<n> SDtime=<n> Authorization=<key>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOk {
    pub vol_session_id: u32,
    pub vol_session_time: u32,
    pub authorization: String,
}

impl JobOk {
    pub fn parse(line: &str) -> Option<Self> {
        match_line(
            line,
            map(
                tuple((
                    tag("3000 OK Job"),
                    field("SDid", parse_u32),
                    field("SDtime", parse_u32),
                    field(
                        "Authorization",
                        verify(notspace1, |s: &str| s.len() <= 100),
                    ),
                )),
                |(_, vol_session_id, vol_session_time, authorization)| JobOk {
                    vol_session_id,
                    vol_session_time,
                    authorization: authorization.to_string(),
                },
            ),
        )
    }
}

impl fmt::Display for JobOk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "3000 OK Job SDid={} SDtime={} Authorization={}",
            self.vol_session_id, self.vol_session_time, self.authorization
        )
    }
}

/// `cancel Job=<job>`
pub fn cancel_job_command(job: &str) -> String {
    format!("cancel Job={}", bash_spaces(job))
}

pub const BOOTSTRAP_COMMAND: &str = "bootstrap";
pub const BOOTSTRAP_OK: &str = "3000 OK bootstrap";

/// `use storage=<name> media_type=<type> pool_name=<name> pool_type=<type>
/// append=<0|1> copy=<0|1> stripe=<n>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseStorage {
    pub storage: String,
    pub media_type: String,
    pub pool_name: String,
    pub pool_type: String,
    pub append: bool,
    pub copy: bool,
    pub stripe: u32,
}

impl UseStorage {
    pub fn parse(line: &str) -> Option<Self> {
        match_line(
            line,
            map(
                tuple((
                    tag("use"),
                    field("storage", parse_name),
                    field("media_type", parse_name),
                    field("pool_name", parse_name),
                    field("pool_type", parse_name),
                    field("append", parse_flag),
                    field("copy", parse_flag),
                    field("stripe", parse_u32),
                )),
                |(_, storage, media_type, pool_name, pool_type, append, copy, stripe)| {
                    UseStorage {
                        storage,
                        media_type,
                        pool_name,
                        pool_type,
                        append,
                        copy,
                        stripe,
                    }
                },
            ),
        )
    }
}

impl fmt::Display for UseStorage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "use storage={} media_type={} pool_name={} pool_type={} append={} copy={} stripe={}",
            bash_spaces(&self.storage),
            bash_spaces(&self.media_type),
            bash_spaces(&self.pool_name),
            bash_spaces(&self.pool_type),
            u8::from(self.append),
            u8::from(self.copy),
            self.stripe,
        )
    }
}

/// `use device=<name>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseDevice {
    pub device: String,
}

impl UseDevice {
    pub fn parse(line: &str) -> Option<Self> {
        match_line(
            line,
            map(preceded(tag("use"), field("device", parse_name)), |device| {
                UseDevice { device }
            }),
        )
    }
}

impl fmt::Display for UseDevice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "use device={}", bash_spaces(&self.device))
    }
}

/// `3000 OK use device device=<name>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceOk {
    pub device: String,
}

impl DeviceOk {
    pub fn parse(line: &str) -> Option<Self> {
        match_line(
            line,
            map(
                preceded(tag("3000 OK use device"), field("device", parse_name)),
                |device| DeviceOk { device },
            ),
        )
    }
}

impl fmt::Display for DeviceOk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "3000 OK use device device={}", bash_spaces(&self.device))
    }
}

/// `3010 Job <job> start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStart {
    pub job: String,
}

impl JobStart {
    pub fn parse(line: &str) -> Option<Self> {
        match_line(
            line,
            map(
                tuple((tag("3010 Job"), preceded(multispace1, parse_name), keyword("start"))),
                |(_, job, _)| JobStart { job },
            ),
        )
    }
}

impl fmt::Display for JobStart {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "3010 Job {} start", bash_spaces(&self.job))
    }
}

/// `3099 Job <job> end JobStatus=<c> JobFiles=<u> JobBytes=<ll> JobErrors=<u> ErrMsg=<text>`
///
/// The status is sent as its numeric character code, a plain status
/// character is accepted as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEnd {
    pub job: String,
    pub status: char,
    pub files: u32,
    pub bytes: u64,
    pub errors: u32,
    pub errmsg: String,
}

fn parse_status_code(i: &str) -> IResult<&str, char> {
    alt((
        map_res(parse_u32, |code| char::from_u32(code).ok_or("invalid status code")),
        verify(anychar, |c: &char| c.is_ascii_alphabetic()),
    ))(i)
}

impl JobEnd {
    pub fn parse(line: &str) -> Option<Self> {
        match_line(
            line,
            map(
                tuple((
                    tag("3099 Job"),
                    preceded(multispace1, parse_name),
                    keyword("end"),
                    field("JobStatus", parse_status_code),
                    field("JobFiles", parse_u32),
                    field("JobBytes", parse_u64),
                    field("JobErrors", parse_u32),
                    opt(field("ErrMsg", opt(parse_text))),
                )),
                |(_, job, _, status, files, bytes, errors, errmsg)| JobEnd {
                    job,
                    status,
                    files,
                    bytes,
                    errors,
                    errmsg: errmsg.flatten().unwrap_or_default(),
                },
            ),
        )
    }
}

impl fmt::Display for JobEnd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let errmsg = if self.errmsg.is_empty() {
            "\"\"".to_string()
        } else {
            bash_spaces(&self.errmsg)
        };
        write!(
            f,
            "3099 Job {} end JobStatus={} JobFiles={} JobBytes={} JobErrors={} ErrMsg={}",
            bash_spaces(&self.job),
            self.status as u32,
            self.files,
            self.bytes,
            self.errors,
            errmsg,
        )
    }
}

/// `Jmsg Job=<job> type=<n> level=<time> <text>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMessage {
    pub job: String,
    pub msg_type: i32,
    pub mtime: i64,
    pub text: String,
}

/// Job message types (subset used to pick a log level)
pub const M_ABORT: i32 = 1;
pub const M_DEBUG: i32 = 2;
pub const M_FATAL: i32 = 3;
pub const M_ERROR: i32 = 4;
pub const M_WARNING: i32 = 5;
pub const M_INFO: i32 = 6;

impl JobMessage {
    pub fn parse(line: &str) -> Option<Self> {
        match_line(
            line,
            map(
                tuple((
                    tag("Jmsg"),
                    field("Job", parse_name),
                    field("type", parse_i32),
                    field("level", parse_i64),
                    opt(preceded(char(' '), rest)),
                )),
                |(_, job, msg_type, mtime, text): (_, _, _, _, Option<&str>)| JobMessage {
                    job,
                    msg_type,
                    mtime,
                    text: text.unwrap_or("").trim_end().to_string(),
                },
            ),
        )
    }
}

impl fmt::Display for JobMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Jmsg Job={} type={} level={} {}",
            bash_spaces(&self.job),
            self.msg_type,
            self.mtime,
            self.text
        )
    }
}

/// `CatReq JobId=<id> FindMedia=<idx> pool_name=<name> media_type=<type> vol_type=<n>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindMedia {
    pub job_id: u64,
    pub index: u32,
    pub pool_name: String,
    pub media_type: String,
    pub vol_type: u32,
}

/// `CatReq JobId=<id> GetVolInfo VolName=<name> write=<0|1>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetVolInfo {
    pub job_id: u64,
    pub volume_name: String,
    pub write: bool,
}

/// `CatReq JobId=<id> UpdateMedia VolName=<name> ...`
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMedia {
    pub job_id: u64,
    pub volume_name: String,
    pub vol_jobs: u32,
    pub vol_files: u32,
    pub vol_blocks: u32,
    pub vol_bytes: u64,
    pub vol_abytes: u64,
    pub vol_hole_bytes: u64,
    pub vol_holes: u32,
    pub vol_mounts: u32,
    pub vol_errors: u32,
    pub vol_writes: u64,
    pub max_vol_bytes: u64,
    pub end_time: i64,
    pub vol_status: VolStatus,
    pub slot: i32,
    pub relabel: bool,
    pub in_changer: bool,
    pub vol_read_time: i64,
    pub vol_write_time: i64,
    pub vol_first_written: i64,
    pub vol_type: u32,
    pub vol_parts: i32,
    pub vol_cloud_parts: i32,
    pub last_part_bytes: u64,
    pub enabled: i32,
    pub recycle: bool,
}

/// `CatReq JobId=<id> CreateJobMedia`, followed by [JobMediaTuple] lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateJobMedia {
    pub job_id: u64,
}

/// `<FirstIndex> <LastIndex> <StartFile> <EndFile> <StartBlock> <EndBlock> <MediaId>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMediaTuple {
    pub first_index: u32,
    pub last_index: u32,
    pub start_file: u32,
    pub end_file: u32,
    pub start_block: u32,
    pub end_block: u32,
    pub media_id: u64,
}

impl JobMediaTuple {
    pub fn parse(line: &str) -> Option<Self> {
        match_line(
            line,
            map(
                tuple((
                    parse_u32,
                    preceded(multispace1, parse_u32),
                    preceded(multispace1, parse_u32),
                    preceded(multispace1, parse_u32),
                    preceded(multispace1, parse_u32),
                    preceded(multispace1, parse_u32),
                    preceded(multispace1, parse_u64),
                )),
                |(first_index, last_index, start_file, end_file, start_block, end_block, media_id)| {
                    JobMediaTuple {
                        first_index,
                        last_index,
                        start_file,
                        end_file,
                        start_block,
                        end_block,
                        media_id,
                    }
                },
            ),
        )
    }
}

impl fmt::Display for JobMediaTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.first_index,
            self.last_index,
            self.start_file,
            self.end_file,
            self.start_block,
            self.end_block,
            self.media_id
        )
    }
}

/// `CatReq Job=<job> new_snapshot name=<n> volume=<v> device=<d> tdate=<t> type=<ty> retention=<r>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSnapshot {
    pub job: String,
    pub name: String,
    pub volume: String,
    pub device: String,
    pub tdate: i64,
    pub snapshot_type: String,
    pub retention: u64,
}

/// `CatReq Job=<job> list_snapshot name=<n> volume=<v> device=<d> tdate=<t> type=<ty>
/// before=<b> after=<a> [expired=<0|1>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSnapshot {
    pub job: String,
    pub name: String,
    pub volume: String,
    pub device: String,
    pub tdate: i64,
    pub snapshot_type: String,
    pub before: String,
    pub after: String,
    pub expired: bool,
}

/// `CatReq Job=<job> del_snapshot name=<n> device=<d>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteSnapshot {
    pub job: String,
    pub name: String,
    pub device: String,
}

/// Requests a daemon sends on the message channel
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogRequest {
    FindMedia(FindMedia),
    GetVolInfo(GetVolInfo),
    UpdateMedia(Box<UpdateMedia>),
    CreateJobMedia(CreateJobMedia),
    NewSnapshot(NewSnapshot),
    ListSnapshot(ListSnapshot),
    DeleteSnapshot(DeleteSnapshot),
}

fn catreq_job_id(i: &str) -> IResult<&str, u64> {
    preceded(tag("CatReq"), field("JobId", parse_u64))(i)
}

fn catreq_job(i: &str) -> IResult<&str, String> {
    preceded(tag("CatReq"), field("Job", parse_name))(i)
}

fn find_media(i: &str) -> IResult<&str, FindMedia> {
    map(
        tuple((
            catreq_job_id,
            field("FindMedia", parse_u32),
            field("pool_name", parse_name),
            field("media_type", parse_name),
            field("vol_type", parse_u32),
        )),
        |(job_id, index, pool_name, media_type, vol_type)| FindMedia {
            job_id,
            index,
            pool_name,
            media_type,
            vol_type,
        },
    )(i)
}

fn get_vol_info(i: &str) -> IResult<&str, GetVolInfo> {
    map(
        tuple((
            catreq_job_id,
            keyword("GetVolInfo"),
            field("VolName", parse_name),
            field("write", parse_flag),
        )),
        |(job_id, _, volume_name, write)| GetVolInfo {
            job_id,
            volume_name,
            write,
        },
    )(i)
}

fn update_media(i: &str) -> IResult<&str, UpdateMedia> {
    map(
        tuple((
            tuple((
                catreq_job_id,
                keyword("UpdateMedia"),
                field("VolName", parse_name),
                field("VolJobs", parse_u32),
                field("VolFiles", parse_u32),
                field("VolBlocks", parse_u32),
                field("VolBytes", parse_u64),
                field("VolABytes", parse_u64),
                field("VolHoleBytes", parse_u64),
                field("VolHoles", parse_u32),
                field("VolMounts", parse_u32),
                field("VolErrors", parse_u32),
                field("VolWrites", parse_u64),
                field("MaxVolBytes", parse_u64),
            )),
            tuple((
                field("EndTime", parse_i64),
                field("VolStatus", parse_vol_status),
                field("Slot", parse_i32),
                field("relabel", parse_flag),
                field("InChanger", parse_flag),
                field("VolReadTime", parse_i64),
                field("VolWriteTime", parse_i64),
                field("VolFirstWritten", parse_i64),
                field("VolType", parse_u32),
                field("VolParts", parse_i32),
                field("VolCloudParts", parse_i32),
                field("LastPartBytes", parse_u64),
                field("Enabled", parse_i32),
                field("Recycle", parse_flag),
            )),
        )),
        |(
            (
                job_id,
                _,
                volume_name,
                vol_jobs,
                vol_files,
                vol_blocks,
                vol_bytes,
                vol_abytes,
                vol_hole_bytes,
                vol_holes,
                vol_mounts,
                vol_errors,
                vol_writes,
                max_vol_bytes,
            ),
            (
                end_time,
                vol_status,
                slot,
                relabel,
                in_changer,
                vol_read_time,
                vol_write_time,
                vol_first_written,
                vol_type,
                vol_parts,
                vol_cloud_parts,
                last_part_bytes,
                enabled,
                recycle,
            ),
        )| UpdateMedia {
            job_id,
            volume_name,
            vol_jobs,
            vol_files,
            vol_blocks,
            vol_bytes,
            vol_abytes,
            vol_hole_bytes,
            vol_holes,
            vol_mounts,
            vol_errors,
            vol_writes,
            max_vol_bytes,
            end_time,
            vol_status,
            slot,
            relabel,
            in_changer,
            vol_read_time,
            vol_write_time,
            vol_first_written,
            vol_type,
            vol_parts,
            vol_cloud_parts,
            last_part_bytes,
            enabled,
            recycle,
        },
    )(i)
}

fn create_jobmedia(i: &str) -> IResult<&str, CreateJobMedia> {
    map(
        tuple((catreq_job_id, keyword("CreateJobMedia"))),
        |(job_id, _)| CreateJobMedia { job_id },
    )(i)
}

fn new_snapshot(i: &str) -> IResult<&str, NewSnapshot> {
    map(
        tuple((
            catreq_job,
            keyword("new_snapshot"),
            field("name", parse_name),
            field("volume", parse_text),
            field("device", parse_text),
            field("tdate", parse_i64),
            field("type", parse_name),
            field("retention", parse_u64),
        )),
        |(job, _, name, volume, device, tdate, snapshot_type, retention)| NewSnapshot {
            job,
            name,
            volume,
            device,
            tdate,
            snapshot_type,
            retention,
        },
    )(i)
}

fn list_snapshot(i: &str) -> IResult<&str, ListSnapshot> {
    map(
        tuple((
            catreq_job,
            keyword("list_snapshot"),
            field("name", parse_text),
            field("volume", parse_text),
            field("device", parse_text),
            field("tdate", parse_i64),
            field("type", parse_text),
            field("before", parse_text),
            field("after", parse_text),
            opt(field("expired", parse_flag)),
        )),
        |(job, _, name, volume, device, tdate, snapshot_type, before, after, expired)| {
            ListSnapshot {
                job,
                name,
                volume,
                device,
                tdate,
                snapshot_type,
                before,
                after,
                expired: expired.unwrap_or(false),
            }
        },
    )(i)
}

fn delete_snapshot(i: &str) -> IResult<&str, DeleteSnapshot> {
    map(
        tuple((
            catreq_job,
            keyword("del_snapshot"),
            field("name", parse_name),
            field("device", parse_text),
        )),
        |(job, _, name, device)| DeleteSnapshot { job, name, device },
    )(i)
}

impl CatalogRequest {
    /// Try all catalog request templates.
    pub fn parse(line: &str) -> Option<Self> {
        match_line(
            line,
            alt((
                map(find_media, CatalogRequest::FindMedia),
                map(get_vol_info, CatalogRequest::GetVolInfo),
                map(update_media, |req| CatalogRequest::UpdateMedia(Box::new(req))),
                map(create_jobmedia, CatalogRequest::CreateJobMedia),
                map(new_snapshot, CatalogRequest::NewSnapshot),
                map(list_snapshot, CatalogRequest::ListSnapshot),
                map(delete_snapshot, CatalogRequest::DeleteSnapshot),
            )),
        )
    }

    /// The JobId a request refers to (snapshot requests name the job instead).
    pub fn job_id(&self) -> Option<u64> {
        match self {
            CatalogRequest::FindMedia(req) => Some(req.job_id),
            CatalogRequest::GetVolInfo(req) => Some(req.job_id),
            CatalogRequest::UpdateMedia(req) => Some(req.job_id),
            CatalogRequest::CreateJobMedia(req) => Some(req.job_id),
            _ => None,
        }
    }
}

pub(crate) fn text_or_empty(text: &str) -> String {
    if text.is_empty() {
        "\"\"".to_string()
    } else {
        bash_spaces(text)
    }
}

impl fmt::Display for CatalogRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CatalogRequest::FindMedia(req) => write!(
                f,
                "CatReq JobId={} FindMedia={} pool_name={} media_type={} vol_type={}",
                req.job_id,
                req.index,
                bash_spaces(&req.pool_name),
                bash_spaces(&req.media_type),
                req.vol_type,
            ),
            CatalogRequest::GetVolInfo(req) => write!(
                f,
                "CatReq JobId={} GetVolInfo VolName={} write={}",
                req.job_id,
                bash_spaces(&req.volume_name),
                u8::from(req.write),
            ),
            CatalogRequest::UpdateMedia(req) => write!(
                f,
                "CatReq JobId={} UpdateMedia VolName={} VolJobs={} VolFiles={} VolBlocks={} \
                 VolBytes={} VolABytes={} VolHoleBytes={} VolHoles={} VolMounts={} \
                 VolErrors={} VolWrites={} MaxVolBytes={} EndTime={} VolStatus={} Slot={} \
                 relabel={} InChanger={} VolReadTime={} VolWriteTime={} VolFirstWritten={} \
                 VolType={} VolParts={} VolCloudParts={} LastPartBytes={} Enabled={} Recycle={}",
                req.job_id,
                bash_spaces(&req.volume_name),
                req.vol_jobs,
                req.vol_files,
                req.vol_blocks,
                req.vol_bytes,
                req.vol_abytes,
                req.vol_hole_bytes,
                req.vol_holes,
                req.vol_mounts,
                req.vol_errors,
                req.vol_writes,
                req.max_vol_bytes,
                req.end_time,
                req.vol_status,
                req.slot,
                u8::from(req.relabel),
                u8::from(req.in_changer),
                req.vol_read_time,
                req.vol_write_time,
                req.vol_first_written,
                req.vol_type,
                req.vol_parts,
                req.vol_cloud_parts,
                req.last_part_bytes,
                req.enabled,
                u8::from(req.recycle),
            ),
            CatalogRequest::CreateJobMedia(req) => {
                write!(f, "CatReq JobId={} CreateJobMedia", req.job_id)
            }
            CatalogRequest::NewSnapshot(req) => write!(
                f,
                "CatReq Job={} new_snapshot name={} volume={} device={} tdate={} type={} retention={}",
                bash_spaces(&req.job),
                bash_spaces(&req.name),
                text_or_empty(&req.volume),
                text_or_empty(&req.device),
                req.tdate,
                bash_spaces(&req.snapshot_type),
                req.retention,
            ),
            CatalogRequest::ListSnapshot(req) => write!(
                f,
                "CatReq Job={} list_snapshot name={} volume={} device={} tdate={} type={} \
                 before={} after={} expired={}",
                bash_spaces(&req.job),
                text_or_empty(&req.name),
                text_or_empty(&req.volume),
                text_or_empty(&req.device),
                req.tdate,
                text_or_empty(&req.snapshot_type),
                text_or_empty(&req.before),
                text_or_empty(&req.after),
                u8::from(req.expired),
            ),
            CatalogRequest::DeleteSnapshot(req) => write!(
                f,
                "CatReq Job={} del_snapshot name={} device={}",
                bash_spaces(&req.job),
                bash_spaces(&req.name),
                text_or_empty(&req.device),
            ),
        }
    }
}

/// Volume information reply (`1000 OK VolName=...`)
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeInfo {
    pub volume_name: String,
    pub vol_jobs: u32,
    pub vol_files: u32,
    pub vol_blocks: u32,
    pub vol_bytes: u64,
    pub vol_abytes: u64,
    pub vol_hole_bytes: u64,
    pub vol_holes: u32,
    pub vol_mounts: u32,
    pub vol_errors: u32,
    pub vol_writes: u64,
    pub max_vol_bytes: u64,
    pub vol_capacity_bytes: u64,
    pub vol_status: VolStatus,
    pub slot: i32,
    pub max_vol_jobs: u32,
    pub max_vol_files: u32,
    pub in_changer: bool,
    pub vol_read_time: i64,
    pub vol_write_time: i64,
    pub end_file: u32,
    pub end_block: u32,
    pub vol_type: u32,
    pub label_type: i32,
    pub media_id: u64,
    pub scratch_pool_id: u64,
    pub vol_parts: i32,
    pub vol_cloud_parts: i32,
    pub last_part_bytes: u64,
    pub enabled: i32,
    pub recycle: bool,
}

impl From<&MediaRecord> for VolumeInfo {
    fn from(media: &MediaRecord) -> Self {
        VolumeInfo {
            volume_name: media.volume_name.clone(),
            vol_jobs: media.vol_jobs,
            vol_files: media.vol_files,
            vol_blocks: media.vol_blocks,
            vol_bytes: media.vol_bytes,
            vol_abytes: media.vol_abytes,
            vol_hole_bytes: media.vol_hole_bytes,
            vol_holes: media.vol_holes,
            vol_mounts: media.vol_mounts,
            vol_errors: media.vol_errors,
            vol_writes: media.vol_writes,
            max_vol_bytes: media.max_vol_bytes,
            vol_capacity_bytes: media.vol_capacity_bytes,
            vol_status: media.vol_status,
            slot: media.slot,
            max_vol_jobs: media.max_vol_jobs,
            max_vol_files: media.max_vol_files,
            in_changer: media.in_changer,
            vol_read_time: media.vol_read_time,
            vol_write_time: media.vol_write_time,
            end_file: media.end_file,
            end_block: media.end_block,
            vol_type: media.vol_type,
            label_type: media.label_type,
            media_id: media.media_id,
            scratch_pool_id: media.scratch_pool_id,
            vol_parts: media.vol_parts,
            vol_cloud_parts: media.vol_cloud_parts,
            last_part_bytes: media.last_part_bytes,
            enabled: media.enabled,
            recycle: media.recycle,
        }
    }
}

impl VolumeInfo {
    pub fn parse(line: &str) -> Option<Self> {
        match_line(
            line,
            map(
                tuple((
                    tuple((
                        tag("1000 OK"),
                        field("VolName", parse_name),
                        field("VolJobs", parse_u32),
                        field("VolFiles", parse_u32),
                        field("VolBlocks", parse_u32),
                        field("VolBytes", parse_u64),
                        field("VolABytes", parse_u64),
                        field("VolHoleBytes", parse_u64),
                        field("VolHoles", parse_u32),
                        field("VolMounts", parse_u32),
                        field("VolErrors", parse_u32),
                        field("VolWrites", parse_u64),
                        field("MaxVolBytes", parse_u64),
                        field("VolCapacityBytes", parse_u64),
                        field("VolStatus", parse_vol_status),
                        field("Slot", parse_i32),
                    )),
                    tuple((
                        field("MaxVolJobs", parse_u32),
                        field("MaxVolFiles", parse_u32),
                        field("InChanger", parse_flag),
                        field("VolReadTime", parse_i64),
                        field("VolWriteTime", parse_i64),
                        field("EndFile", parse_u32),
                        field("EndBlock", parse_u32),
                        field("VolType", parse_u32),
                        field("LabelType", parse_i32),
                        field("MediaId", parse_u64),
                        field("ScratchPoolId", parse_u64),
                        field("VolParts", parse_i32),
                        field("VolCloudParts", parse_i32),
                        field("LastPartBytes", parse_u64),
                        field("Enabled", parse_i32),
                        field("Recycle", parse_flag),
                    )),
                )),
                |(
                    (
                        _,
                        volume_name,
                        vol_jobs,
                        vol_files,
                        vol_blocks,
                        vol_bytes,
                        vol_abytes,
                        vol_hole_bytes,
                        vol_holes,
                        vol_mounts,
                        vol_errors,
                        vol_writes,
                        max_vol_bytes,
                        vol_capacity_bytes,
                        vol_status,
                        slot,
                    ),
                    (
                        max_vol_jobs,
                        max_vol_files,
                        in_changer,
                        vol_read_time,
                        vol_write_time,
                        end_file,
                        end_block,
                        vol_type,
                        label_type,
                        media_id,
                        scratch_pool_id,
                        vol_parts,
                        vol_cloud_parts,
                        last_part_bytes,
                        enabled,
                        recycle,
                    ),
                )| VolumeInfo {
                    volume_name,
                    vol_jobs,
                    vol_files,
                    vol_blocks,
                    vol_bytes,
                    vol_abytes,
                    vol_hole_bytes,
                    vol_holes,
                    vol_mounts,
                    vol_errors,
                    vol_writes,
                    max_vol_bytes,
                    vol_capacity_bytes,
                    vol_status,
                    slot,
                    max_vol_jobs,
                    max_vol_files,
                    in_changer,
                    vol_read_time,
                    vol_write_time,
                    end_file,
                    end_block,
                    vol_type,
                    label_type,
                    media_id,
                    scratch_pool_id,
                    vol_parts,
                    vol_cloud_parts,
                    last_part_bytes,
                    enabled,
                    recycle,
                },
            ),
        )
    }
}

impl fmt::Display for VolumeInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "1000 OK VolName={} VolJobs={} VolFiles={} VolBlocks={} VolBytes={} VolABytes={} \
             VolHoleBytes={} VolHoles={} VolMounts={} VolErrors={} VolWrites={} \
             MaxVolBytes={} VolCapacityBytes={} VolStatus={} Slot={} MaxVolJobs={} \
             MaxVolFiles={} InChanger={} VolReadTime={} VolWriteTime={} EndFile={} \
             EndBlock={} VolType={} LabelType={} MediaId={} ScratchPoolId={} VolParts={} \
             VolCloudParts={} LastPartBytes={} Enabled={} Recycle={}",
            bash_spaces(&self.volume_name),
            self.vol_jobs,
            self.vol_files,
            self.vol_blocks,
            self.vol_bytes,
            self.vol_abytes,
            self.vol_hole_bytes,
            self.vol_holes,
            self.vol_mounts,
            self.vol_errors,
            self.vol_writes,
            self.max_vol_bytes,
            self.vol_capacity_bytes,
            self.vol_status,
            self.slot,
            self.max_vol_jobs,
            self.max_vol_files,
            u8::from(self.in_changer),
            self.vol_read_time,
            self.vol_write_time,
            self.end_file,
            self.end_block,
            self.vol_type,
            self.label_type,
            self.media_id,
            self.scratch_pool_id,
            self.vol_parts,
            self.vol_cloud_parts,
            self.last_part_bytes,
            self.enabled,
            u8::from(self.recycle),
        )
    }
}

/// Catalog request replies other than [VolumeInfo]
pub mod reply {
    use super::text_or_empty;
    use crate::bash_spaces;

    pub const CREATE_JOBMEDIA_OK: &str = "1000 OK CreateJobMedia";
    pub const CREATE_JOBMEDIA_ERROR: &str = "1992 Create JobMedia error";
    pub const UPDATE_MEDIA_ERROR: &str = "1993 Update Media error";
    pub const SNAPSHOT_CREATED: &str = "1000 Snapshot created";
    pub const SNAPSHOT_DELETED: &str = "1000 Snapshot deleted";

    pub fn no_media(why: &str) -> String {
        format!("1901 No Media. {}", why)
    }

    pub fn not_in_catalog(volume: &str) -> String {
        format!("1997 Volume \"{}\" not in catalog.", volume)
    }

    pub fn bad_status(volume: &str, status: &str, reason: &str) -> String {
        format!("1998 Volume \"{}\" catalog status is {}, {}.", volume, status, reason)
    }

    pub fn request_failed(volume: &str, err: &str) -> String {
        format!("1991 Catalog Request for vol={} failed: {}", volume, err)
    }

    pub fn invalid_request(line: &str) -> String {
        format!("1990 Invalid Catalog Request: {}", line)
    }

    pub fn snapshot_not_created(err: &str) -> String {
        format!("1999 Snapshot not created ERR={}", err)
    }

    pub fn snapshot_not_deleted(err: &str) -> String {
        format!("1999 Snapshot not deleted ERR={}", err)
    }

    /// One row of a snapshot listing
    pub fn snapshot_row(snap: &bdir_api_types::SnapshotRecord) -> String {
        format!(
            "name={} volume={} device={} tdate={} type={} retention={}",
            bash_spaces(&snap.name),
            text_or_empty(&snap.volume),
            text_or_empty(&snap.device),
            snap.create_tdate,
            text_or_empty(&snap.snapshot_type),
            snap.retention,
        )
    }
}
