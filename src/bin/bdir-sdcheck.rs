use std::time::Duration;

use anyhow::{bail, Error};

use bdir::auth::authenticate_storage_daemon;
use bdir_protocol::BSock;

/// Check that the director can log in to a configured storage daemon.
///
/// Usage: bdir-sdcheck [<storage>]
fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Never)
        .init();

    let name = std::env::args().nth(1);

    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(run(name))
}

async fn run(name: Option<String>) -> Result<(), Error> {
    let config = bdir_config::director::load()?;

    let storage = match name {
        Some(name) => config.storage(&name)?,
        None => {
            let mut list = config.storages()?;
            match list.len() {
                0 => bail!("no storage resource configured"),
                1 => list.remove(0),
                _ => bail!("more than one storage configured, please name one"),
            }
        }
    };

    log::info!(
        "connecting to storage '{}' at {}:{}",
        storage.name,
        storage.address,
        storage.port()
    );
    let sock = BSock::connect(
        "Storage daemon",
        &storage.address,
        storage.port(),
        Duration::from_secs(5),
        Duration::from_secs(30),
    )
    .await?;

    let (mut sock, peer) = authenticate_storage_daemon(sock, &config.director, &storage).await?;

    println!(
        "storage '{}': authenticated, version {}, tls {} (daemon wants {}), compression {}",
        storage.name,
        peer.version,
        if peer.tls { "on" } else { "off" },
        peer.remote_tls,
        if sock.compress() { "on" } else { "off" },
    );

    sock.terminate().await;
    Ok(())
}
