//! Basic types shared by the backup director crates.

use std::fmt;

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

use proxmox_schema::{api, const_regex, ApiStringFormat, IntegerSchema, Schema, StringSchema};

mod catalog;
pub use catalog::*;

mod resource;
pub use resource::*;

/// Maximum length of resource and volume names (including the terminator
/// the storage daemon reserves).
pub const MAX_NAME_LENGTH: usize = 128;

/// Protocol version the director announces in its hello line.
///
/// 102: jobmedia change, 103: comm line compression
pub const DIRECTOR_PROTOCOL_VERSION: u32 = 103;

const_regex! {
    /// Resource names may contain spaces, they are bashed on the wire.
    pub RESOURCE_NAME_REGEX = r"^[A-Za-z0-9:.\-_ ]{1,127}$";

    /// Volume names must not contain spaces.
    pub VOLUME_NAME_REGEX = r"^[A-Za-z0-9:.\-_]{1,127}$";

    pub MEDIA_TYPE_REGEX = r"^[A-Za-z0-9:.\-_ ]{1,127}$";

    pub PASSWORD_REGEX = r"^[[:^cntrl:]]*$"; // everything but control characters
}

pub const RESOURCE_NAME_FORMAT: ApiStringFormat = ApiStringFormat::Pattern(&RESOURCE_NAME_REGEX);
pub const VOLUME_NAME_FORMAT: ApiStringFormat = ApiStringFormat::Pattern(&VOLUME_NAME_REGEX);
pub const MEDIA_TYPE_FORMAT: ApiStringFormat = ApiStringFormat::Pattern(&MEDIA_TYPE_REGEX);
pub const PASSWORD_FORMAT: ApiStringFormat = ApiStringFormat::Pattern(&PASSWORD_REGEX);

pub const RESOURCE_NAME_SCHEMA: Schema = StringSchema::new("Resource name.")
    .format(&RESOURCE_NAME_FORMAT)
    .min_length(1)
    .max_length(MAX_NAME_LENGTH - 1)
    .schema();

pub const VOLUME_NAME_SCHEMA: Schema = StringSchema::new("Volume name.")
    .format(&VOLUME_NAME_FORMAT)
    .min_length(1)
    .max_length(MAX_NAME_LENGTH - 1)
    .schema();

pub const MEDIA_TYPE_SCHEMA: Schema = StringSchema::new("Media type.")
    .format(&MEDIA_TYPE_FORMAT)
    .min_length(1)
    .max_length(MAX_NAME_LENGTH - 1)
    .schema();

pub const PASSWORD_SCHEMA: Schema = StringSchema::new("Shared secret.")
    .format(&PASSWORD_FORMAT)
    .min_length(1)
    .max_length(1024)
    .schema();

pub const PORT_SCHEMA: Schema = IntegerSchema::new("TCP port.")
    .minimum(1)
    .maximum(65535)
    .schema();

/// Check if a string is a legal volume name.
///
/// Legal characters are alphanumerics plus `:.-_`, the name must not be
/// empty and shorter than [MAX_NAME_LENGTH].
pub fn is_volume_name_legal(name: &str) -> bool {
    !name.is_empty()
        && name.len() < MAX_NAME_LENGTH
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ":.-_".contains(c))
}

#[api()]
/// TLS requirement level, ordered `None < Ok < Required`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsNeed {
    /// TLS is not supported
    None,
    /// TLS is supported but not required
    Ok,
    /// TLS is required
    Required,
}

impl TlsNeed {
    /// The numeric value used in `ssl=<n>`.
    pub fn code(self) -> i32 {
        match self {
            TlsNeed::None => 0,
            TlsNeed::Ok => 1,
            TlsNeed::Required => 2,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, Error> {
        Ok(match code {
            0 => TlsNeed::None,
            1 => TlsNeed::Ok,
            2 => TlsNeed::Required,
            _ => bail!("invalid TLS level {}", code),
        })
    }
}

impl fmt::Display for TlsNeed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            TlsNeed::None => "none",
            TlsNeed::Ok => "ok",
            TlsNeed::Required => "required",
        };
        f.write_str(text)
    }
}

macro_rules! char_code_enum {
    ($(#[$attr:meta])* $name:ident { $($(#[$vattr:meta])* $variant:ident = $code:literal,)* }) => {
        $(#[$attr])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vattr])* $variant,)*
        }

        impl $name {
            /// The single character code used on the wire and in the catalog.
            pub fn code(self) -> char {
                match self {
                    $($name::$variant => $code,)*
                }
            }

            pub fn from_code(code: char) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)*
                    _ => None,
                }
            }

            /// Human readable name
            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant),)*
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.code())
            }
        }
    };
}

char_code_enum! {
    /// Job type
    JobType {
        Backup = 'B',
        MigratedJob = 'M',
        Verify = 'V',
        Restore = 'R',
        System = 'I',
        Admin = 'D',
        Archive = 'A',
        JobCopy = 'C',
        Copy = 'c',
        Migrate = 'g',
        Scan = 'S',
    }
}

char_code_enum! {
    /// Job level
    JobLevel {
        Full = 'F',
        Incremental = 'I',
        Differential = 'D',
        Since = 'S',
        VerifyCatalog = 'C',
        VerifyInit = 'V',
        VerifyVolumeToCatalog = 'O',
        VerifyDiskToCatalog = 'd',
        VerifyData = 'A',
        Base = 'B',
        None = ' ',
        VirtualFull = 'f',
    }
}

char_code_enum! {
    /// Job status
    JobStatus {
        Created = 'C',
        Running = 'R',
        Blocked = 'B',
        Terminated = 'T',
        Warnings = 'W',
        ErrorTerminated = 'E',
        NonFatalError = 'e',
        FatalError = 'f',
        Differences = 'D',
        Canceled = 'A',
        Incomplete = 'I',
        WaitFd = 'F',
        WaitSd = 'S',
        WaitMount = 'm',
        WaitMedia = 'M',
        WaitStoreRes = 's',
        WaitJobRes = 'j',
        WaitClientRes = 'c',
        WaitMaxJobs = 'd',
        WaitStartTime = 't',
        WaitPriority = 'p',
        DataCommit = 'a',
        DataDespool = 'i',
    }
}

impl JobStatus {
    /// Job is finished (successfully or not).
    pub fn is_terminated(self) -> bool {
        matches!(
            self,
            JobStatus::Terminated
                | JobStatus::Warnings
                | JobStatus::ErrorTerminated
                | JobStatus::FatalError
                | JobStatus::Differences
                | JobStatus::Canceled
                | JobStatus::Incomplete
        )
    }
}
