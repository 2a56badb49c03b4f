//! Director resource configuration
//!
//! This configuration module is based on [`SectionConfig`], and
//! provides a type safe interface to the director's resources: the
//! director itself, storage daemons, pools, clients and named consoles.
//!
//! [SectionConfig]: proxmox_section_config::SectionConfig

use std::path::PathBuf;

use anyhow::{bail, format_err, Error};
use lazy_static::lazy_static;

use proxmox_schema::{ApiType, ObjectSchemaType, Schema};
use proxmox_section_config::{SectionConfig, SectionConfigData, SectionConfigPlugin};

use bdir_api_types::{
    ClientConfig, ConsoleConfig, DirectorConfig, PoolConfig, StorageConfig, RESOURCE_NAME_SCHEMA,
};

use crate::{config_dir, open_config_lockfile, replace_config, ConfigLockGuard};

lazy_static! {
    /// Static [`SectionConfig`] to access parser/writer functions.
    pub static ref CONFIG: SectionConfig = init();
}

fn plugin(type_name: &str, schema: &'static Schema) -> SectionConfigPlugin {
    let obj_schema: &'static (dyn ObjectSchemaType + Send + Sync) = match schema {
        Schema::Object(obj_schema) => obj_schema,
        Schema::AllOf(allof_schema) => allof_schema,
        _ => unreachable!(),
    };
    SectionConfigPlugin::new(type_name.to_string(), Some("name".to_string()), obj_schema)
}

fn init() -> SectionConfig {
    let mut config = SectionConfig::new(&RESOURCE_NAME_SCHEMA);

    config.register_plugin(plugin("director", &DirectorConfig::API_SCHEMA));
    config.register_plugin(plugin("storage", &StorageConfig::API_SCHEMA));
    config.register_plugin(plugin("pool", &PoolConfig::API_SCHEMA));
    config.register_plugin(plugin("client", &ClientConfig::API_SCHEMA));
    config.register_plugin(plugin("console", &ConsoleConfig::API_SCHEMA));

    config
}

/// Configuration file name
pub fn config_filename() -> PathBuf {
    config_dir().join("director.cfg")
}

fn lock_filename() -> PathBuf {
    config_dir().join(".director.lck")
}

/// Get exclusive lock
pub fn lock() -> Result<ConfigLockGuard, Error> {
    open_config_lockfile(lock_filename(), None, true)
}

/// Read and parse the configuration file
pub fn config() -> Result<(SectionConfigData, [u8; 32]), Error> {
    let filename = config_filename();
    let content = proxmox_sys::fs::file_read_optional_string(&filename)?.unwrap_or_default();

    let digest = openssl::sha::sha256(content.as_bytes());
    let data = CONFIG.parse(&filename.to_string_lossy(), &content)?;
    Ok((data, digest))
}

/// Save the configuration file
pub fn save_config(config: &SectionConfigData) -> Result<(), Error> {
    let filename = config_filename();
    let raw = CONFIG.write(&filename.to_string_lossy(), config)?;
    replace_config(filename, raw.as_bytes())
}

/// Load and check the director resources.
pub fn load() -> Result<DirectorResources, Error> {
    let (data, _digest) = config()?;
    DirectorResources::new(data)
}

/// Typed, checked view on the parsed resources
pub struct DirectorResources {
    pub director: DirectorConfig,
    data: SectionConfigData,
}

impl DirectorResources {
    /// Check cross references and pick the (single) director section.
    pub fn new(data: SectionConfigData) -> Result<Self, Error> {
        let mut directors: Vec<DirectorConfig> = data.convert_to_typed_array("director")?;
        let director = match directors.len() {
            0 => bail!("no director resource configured"),
            1 => directors.remove(0),
            _ => bail!("only one director resource allowed"),
        };

        let storages: Vec<StorageConfig> = data.convert_to_typed_array("storage")?;
        for storage in storages.iter() {
            if storage.device.is_empty() {
                bail!("storage '{}' has no device", storage.name);
            }
        }

        let pools: Vec<PoolConfig> = data.convert_to_typed_array("pool")?;
        for pool in pools.iter() {
            for reference in [&pool.scratch_pool, &pool.recycle_pool].into_iter().flatten() {
                if !pools.iter().any(|p| &p.name == reference) {
                    bail!("pool '{}' references unknown pool '{}'", pool.name, reference);
                }
            }
        }

        Ok(Self { director, data })
    }

    fn lookup<T: serde::de::DeserializeOwned>(&self, type_name: &str, name: &str) -> Result<T, Error> {
        self.data
            .lookup(type_name, name)
            .map_err(|err| format_err!("no such {} resource '{}' - {}", type_name, name, err))
    }

    pub fn storage(&self, name: &str) -> Result<StorageConfig, Error> {
        self.lookup("storage", name)
    }

    pub fn pool(&self, name: &str) -> Result<PoolConfig, Error> {
        self.lookup("pool", name)
    }

    pub fn client(&self, name: &str) -> Result<ClientConfig, Error> {
        self.lookup("client", name)
    }

    pub fn console(&self, name: &str) -> Result<ConsoleConfig, Error> {
        self.lookup("console", name)
    }

    pub fn pools(&self) -> Result<Vec<PoolConfig>, Error> {
        self.data.convert_to_typed_array("pool")
    }

    pub fn storages(&self) -> Result<Vec<StorageConfig>, Error> {
        self.data.convert_to_typed_array("storage")
    }

    pub fn consoles(&self) -> Result<Vec<ConsoleConfig>, Error> {
        self.data.convert_to_typed_array("console")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const CONTENT: &str = "director: bdir
	password secret
	comm-compression true

storage: File1
	address sd.example.org
	password sdpass
	device FileChgr1-Dev1
	device FileChgr1-Dev2
	media-type File
	tls-enable true

pool: Default
	label-format Vol
	max-volumes 100
	scratch-pool Scratch

pool: Scratch
	pool-type Scratch

client: fd1
	address fd1.example.org
	password fdpass
";

    #[test]
    fn test_parse_resources() -> Result<(), Error> {
        let data = CONFIG.parse("director.cfg", CONTENT)?;
        let resources = DirectorResources::new(data)?;

        assert_eq!(resources.director.name, "bdir");
        assert_eq!(resources.director.comm_compression, Some(true));

        let storage = resources.storage("File1")?;
        assert_eq!(storage.device, vec!["FileChgr1-Dev1", "FileChgr1-Dev2"]);
        assert_eq!(storage.port(), 9103);
        assert_eq!(storage.tls.tls_enable, Some(true));

        let pool = resources.pool("Default")?;
        assert_eq!(pool.label_format.as_deref(), Some("Vol"));
        assert_eq!(pool.max_volumes, Some(100));

        assert_eq!(resources.client("fd1")?.port(), 9102);
        assert!(resources.console("nobody").is_err());
        assert_eq!(resources.pools()?.len(), 2);

        Ok(())
    }

    #[test]
    fn test_reject_dangling_pool_reference() -> Result<(), Error> {
        let content = "director: bdir
	password secret

pool: Default
	recycle-pool Nowhere
";
        let data = CONFIG.parse("director.cfg", content)?;
        assert!(DirectorResources::new(data).is_err());
        Ok(())
    }

    #[test]
    fn test_require_director() -> Result<(), Error> {
        let data = CONFIG.parse("director.cfg", "pool: Default\n")?;
        assert!(DirectorResources::new(data).is_err());
        Ok(())
    }
}
