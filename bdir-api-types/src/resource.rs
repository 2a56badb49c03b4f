//! Resource configuration types (director, storage, pool, client, console)

use serde::{Deserialize, Serialize};

use proxmox_schema::api;

use crate::{
    PoolRecord, TlsNeed, MEDIA_TYPE_SCHEMA, PASSWORD_SCHEMA, PORT_SCHEMA, RESOURCE_NAME_SCHEMA,
};

pub const DEFAULT_DIRECTOR_PORT: u16 = 9101;
pub const DEFAULT_CLIENT_PORT: u16 = 9102;
pub const DEFAULT_STORAGE_PORT: u16 = 9103;

/// Default volume retention: one year
pub const DEFAULT_VOLUME_RETENTION: u64 = 60 * 60 * 24 * 365;

#[api()]
#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "kebab-case")]
/// TLS settings of a resource
pub struct TlsOptions {
    /// Offer TLS to the peer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_enable: Option<bool>,
    /// Refuse peers without TLS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_require: Option<bool>,
    /// Use TLS for authentication only, continue in plaintext afterwards
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_authenticate: Option<bool>,
    /// Verify the peer certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_verify_peer: Option<bool>,
    /// CA certificate file (PEM)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_ca_file: Option<String>,
    /// Certificate file (PEM)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_cert: Option<String>,
    /// Private key file (PEM)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_key: Option<String>,
}

impl TlsOptions {
    /// The TLS level we advertise to a peer.
    pub fn local_need(&self) -> TlsNeed {
        let mut need = TlsNeed::None;
        if self.tls_enable.unwrap_or(false) {
            need = if self.tls_require.unwrap_or(false) {
                TlsNeed::Required
            } else {
                TlsNeed::Ok
            };
        }
        if self.tls_authenticate.unwrap_or(false) {
            need = TlsNeed::Required;
        }
        need
    }

    pub fn authenticate_only(&self) -> bool {
        self.tls_authenticate.unwrap_or(false)
    }
}

#[api(
    properties: {
        name: {
            schema: RESOURCE_NAME_SCHEMA,
        },
        password: {
            schema: PASSWORD_SCHEMA,
        },
        tls: {
            type: TlsOptions,
        },
    },
)]
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
/// The director itself
pub struct DirectorConfig {
    pub name: String,
    /// Console password of the director
    pub password: String,
    /// Compress protocol lines on capable connections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comm_compression: Option<bool>,
    /// Maximum number of jobs run at the same time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_jobs: Option<u64>,
    #[serde(flatten)]
    pub tls: TlsOptions,
}

#[api(
    properties: {
        name: {
            schema: RESOURCE_NAME_SCHEMA,
        },
        port: {
            schema: PORT_SCHEMA,
            optional: true,
        },
        password: {
            schema: PASSWORD_SCHEMA,
        },
        device: {
            type: Array,
            items: {
                schema: RESOURCE_NAME_SCHEMA,
            },
        },
        "media-type": {
            schema: MEDIA_TYPE_SCHEMA,
        },
        tls: {
            type: TlsOptions,
        },
    },
)]
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
/// Storage daemon resource
pub struct StorageConfig {
    pub name: String,
    /// Address of the storage daemon
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub password: String,
    /// Candidate devices, tried in order
    pub device: Vec<String>,
    pub media_type: String,
    /// Devices are part of an autochanger
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autochanger: Option<bool>,
    #[serde(flatten)]
    pub tls: TlsOptions,
}

impl StorageConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_STORAGE_PORT)
    }
}

#[api(
    properties: {
        name: {
            schema: RESOURCE_NAME_SCHEMA,
        },
        "scratch-pool": {
            schema: RESOURCE_NAME_SCHEMA,
            optional: true,
        },
        "recycle-pool": {
            schema: RESOURCE_NAME_SCHEMA,
            optional: true,
        },
    },
)]
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "kebab-case")]
/// Volume pool resource
pub struct PoolConfig {
    pub name: String,
    /// Pool type (default "Backup")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_type: Option<String>,
    /// Template for automatically labeled volumes
    ///
    /// A plain name is used as prefix and gets a four digit counter
    /// appended. Templates may contain `${Var}` references.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_format: Option<String>,
    /// Maximum number of volumes (0 = unlimited)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_volumes: Option<u32>,
    /// Volume retention in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_retention: Option<u64>,
    /// Seconds a volume may be appended after its first write
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_use_duration: Option<u64>,
    /// Maximum number of jobs per volume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_volume_jobs: Option<u32>,
    /// Maximum number of files per volume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_volume_files: Option<u32>,
    /// Maximum number of bytes per volume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_volume_bytes: Option<u64>,
    /// Use each volume for a single job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_volume_once: Option<bool>,
    /// Recycle volumes (default true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recycle: Option<bool>,
    /// Prune expired jobs and volumes (default true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_prune: Option<bool>,
    /// Recycle a requested Full/Used volume without remaining jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recycle_current_volume: Option<bool>,
    /// Purge the oldest volume when nothing else is available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purge_oldest_volume: Option<bool>,
    /// Recycle the oldest volume when nothing else is available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recycle_oldest_volume: Option<bool>,
    /// Truncate volumes on purge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_on_purge: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_pool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recycle_pool: Option<String>,
    /// Label type (0 = native, 1 = ANSI, 2 = IBM)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_type: Option<u32>,
    /// Record file attributes in the catalog (default true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_files: Option<bool>,
}

impl PoolConfig {
    /// Catalog record for this pool.
    ///
    /// Pool references (`scratch-pool`, `recycle-pool`) need a catalog
    /// lookup and are left unset.
    pub fn to_pool_record(&self) -> PoolRecord {
        PoolRecord {
            name: self.name.clone(),
            max_vols: self.max_volumes.unwrap_or(0),
            use_once: self.use_volume_once.unwrap_or(false),
            use_catalog: self.catalog_files.unwrap_or(true),
            auto_prune: self.auto_prune.unwrap_or(true),
            recycle: self.recycle.unwrap_or(true),
            action_on_purge: u32::from(self.action_on_purge.unwrap_or(false)),
            vol_retention: self.volume_retention.unwrap_or(DEFAULT_VOLUME_RETENTION),
            vol_use_duration: self.volume_use_duration.unwrap_or(0),
            max_vol_jobs: self.max_volume_jobs.unwrap_or(0),
            max_vol_files: self.max_volume_files.unwrap_or(0),
            max_vol_bytes: self.max_volume_bytes.unwrap_or(0),
            pool_type: self.pool_type.clone().unwrap_or_else(|| "Backup".to_string()),
            label_type: self.label_type.unwrap_or(0) as i32,
            label_format: self.label_format.clone().unwrap_or_else(|| "*".to_string()),
            enabled: 1,
            recycle_current_volume: self.recycle_current_volume.unwrap_or(false),
            purge_oldest_volume: self.purge_oldest_volume.unwrap_or(false),
            recycle_oldest_volume: self.recycle_oldest_volume.unwrap_or(false),
            ..Default::default()
        }
    }
}

#[api(
    properties: {
        name: {
            schema: RESOURCE_NAME_SCHEMA,
        },
        port: {
            schema: PORT_SCHEMA,
            optional: true,
        },
        password: {
            schema: PASSWORD_SCHEMA,
        },
        tls: {
            type: TlsOptions,
        },
    },
)]
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
/// File daemon resource
pub struct ClientConfig {
    pub name: String,
    /// Address of the file daemon
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub password: String,
    #[serde(flatten)]
    pub tls: TlsOptions,
}

impl ClientConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_CLIENT_PORT)
    }
}

#[api(
    properties: {
        name: {
            schema: RESOURCE_NAME_SCHEMA,
        },
        password: {
            schema: PASSWORD_SCHEMA,
        },
        tls: {
            type: TlsOptions,
        },
    },
)]
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
/// Named (restricted) console
pub struct ConsoleConfig {
    pub name: String,
    pub password: String,
    #[serde(flatten)]
    pub tls: TlsOptions,
}
