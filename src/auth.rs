//! Daemon and console authentication
//!
//! Both sides prove knowledge of the shared password with a CRAM-MD5
//! challenge, then the advertised TLS levels decide whether the connection
//! is upgraded to TLS.

use std::future::Future;
use std::time::Duration;

use anyhow::{format_err, Error};

use bdir_api_types::{
    ClientConfig, ConsoleConfig, DirectorConfig, StorageConfig, TlsNeed, TlsOptions,
    DIRECTOR_PROTOCOL_VERSION,
};
use bdir_cram::{cram_md5_response, generate_challenge, verify_cram_md5_response, ChallengeLine};
use bdir_protocol::message::{Hello, HelloOk, HelloRole, AUTH_FAILED, AUTH_OK};
use bdir_protocol::tls::{tls_acceptor, tls_connector};
use bdir_protocol::BSock;

/// Bound for the whole handshake
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(60);

/// A failed console login is answered after this delay.
const CONSOLE_FAILURE_DELAY: Duration = Duration::from_secs(5);

/// Console name selecting the director's own password
pub const DEFAULT_CONSOLE: &str = "*UserAgent*";

const CONSOLE_SORRY: &str = "1999 You are not authorized.";

/// Oldest storage daemon protocol we talk to
const MIN_SD_VERSION: u32 = 2;
const MIN_SD_COMPRESS_VERSION: u32 = 1;
const MIN_FD_COMPRESS_VERSION: u32 = 214;
const MIN_CONSOLE_COMPRESS_VERSION: u32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    /// Connection failed, timed out or was closed
    #[error("{0}")]
    Transport(#[from] Error),
    /// The peer does not know our password (or name)
    #[error("{0}")]
    Authorization(String),
    /// Advertised TLS levels cannot be satisfied
    #[error("{0}")]
    TlsPolicy(String),
    /// Unexpected message during the handshake
    #[error("{0}")]
    Protocol(String),
}

/// Result of a successful daemon handshake
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// TLS level the peer advertised
    pub remote_tls: TlsNeed,
    /// The connection was upgraded to TLS (maybe for the handshake only)
    pub tls: bool,
    /// Protocol version the peer reported, 0 if it sent none
    pub version: u32,
}

/// An authenticated console
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleInfo {
    /// Name the console sent in its Hello
    pub name: String,
    /// Console resource, `None` for the default console
    pub console: Option<String>,
    pub version: u32,
}

/// Decide whether to use TLS.
///
/// Fails if one side requires TLS and the other does not offer it. The
/// flexible `Ok` level on either side never fails.
pub fn negotiate_tls(local: TlsNeed, remote: TlsNeed, peer: &str) -> Result<bool, AuthError> {
    if local != TlsNeed::Ok && remote != TlsNeed::Ok {
        if remote < local {
            return Err(AuthError::TlsPolicy(format!(
                "Authorization problem: Remote {} did not advertise required TLS support.",
                peer
            )));
        }
        if remote > local {
            return Err(AuthError::TlsPolicy(format!(
                "Authorization problem: Remote {} requires TLS.",
                peer
            )));
        }
    }
    Ok(local >= TlsNeed::Ok && remote >= TlsNeed::Ok)
}

/// What we learned from the peer's challenge
struct Response {
    remote_tls: TlsNeed,
    compatible: bool,
    accepted: bool,
}

/// Answer the peer's challenge.
async fn cram_md5_respond(sock: &mut BSock, password: &str) -> Result<Response, AuthError> {
    let line = sock.recv_line().await?;
    let challenge = ChallengeLine::parse(&line).map_err(|err| {
        AuthError::Protocol(format!("{} sent no valid challenge - {}", sock.who(), err))
    })?;
    let remote_tls = TlsNeed::from_code(challenge.tls_need)
        .map_err(|err| AuthError::Protocol(format!("{} - {}", sock.who(), err)))?;

    let response = cram_md5_response(password, &challenge.challenge, challenge.compatible)?;
    sock.send_line(&response).await?;

    let answer = sock.recv_line().await?;
    Ok(Response {
        remote_tls,
        compatible: challenge.compatible,
        accepted: answer == AUTH_OK,
    })
}

/// Challenge the peer, true if it answered with the right digest.
async fn cram_md5_challenge(
    sock: &mut BSock,
    password: &str,
    local_tls: TlsNeed,
    compatible: bool,
) -> Result<bool, AuthError> {
    let host = nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    let challenge = generate_challenge(&host)?;

    let line = ChallengeLine {
        challenge: challenge.clone(),
        tls_need: local_tls.code(),
        compatible,
    };
    sock.send_line(&line.to_string()).await?;

    let response = sock.recv_line().await?;
    let ok = verify_cram_md5_response(password, &challenge, &response)?;
    sock.send_line(if ok { AUTH_OK } else { AUTH_FAILED }).await?;

    if !ok {
        log::debug!("cram-md5 challenge failed for {}", sock.who());
    }
    Ok(ok)
}

async fn with_auth_timeout<T, F>(who: &str, future: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    match tokio::time::timeout(AUTH_TIMEOUT, future).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::Transport(format_err!(
            "timeout authenticating with {}",
            who
        ))),
    }
}

/// Greet a daemon, answer its challenge, then challenge it.
async fn authenticate_daemon(
    mut sock: BSock,
    role: HelloRole,
    director_name: &str,
    password: &str,
    tls: &TlsOptions,
    hello_ok_code: u32,
) -> Result<(BSock, PeerInfo), AuthError> {
    let hello = Hello {
        role,
        name: director_name.to_string(),
        version: DIRECTOR_PROTOCOL_VERSION,
    };
    let sent = sock.send_line(&hello.to_string()).await;
    if let Err(err) = sent {
        return Err(AuthError::Transport(format_err!(
            "Error sending Hello to {} - {}",
            sock.who(),
            err
        )));
    }

    let local_tls = tls.local_need();

    let response = cram_md5_respond(&mut sock, password).await?;
    let accepted = response.accepted
        && cram_md5_challenge(&mut sock, password, local_tls, response.compatible).await?;
    if !accepted {
        return Err(AuthError::Authorization(format!(
            "Director unable to authenticate with {} at \"{}:{}\". \
             Passwords or names not the same.",
            sock.who(),
            sock.host(),
            sock.port()
        )));
    }

    let use_tls = negotiate_tls(local_tls, response.remote_tls, sock.who())?;
    if use_tls {
        let connector = tls_connector(tls)?;
        let host = sock.host().to_string();
        sock = sock.tls_client(&connector, &host, tls.authenticate_only()).await?;
    }

    let received = sock.recv_line().await;
    let line = match received {
        Ok(line) => line,
        Err(err) => {
            return Err(AuthError::Transport(format_err!(
                "{} at \"{}:{}\" bad response to Hello command - {}",
                sock.who(),
                sock.host(),
                sock.port(),
                err
            )))
        }
    };
    let hello_ok = match HelloOk::parse(&line) {
        Some(hello_ok) if hello_ok.code == hello_ok_code => hello_ok,
        _ => {
            return Err(AuthError::Protocol(format!(
                "{} at \"{}:{}\" rejected Hello command",
                sock.who(),
                sock.host(),
                sock.port()
            )))
        }
    };

    let info = PeerInfo {
        remote_tls: response.remote_tls,
        tls: use_tls,
        version: hello_ok.version.unwrap_or(0),
    };
    Ok((sock, info))
}

/// Authenticate a freshly connected storage daemon.
///
/// Enables line compression when the director has it configured and the
/// daemon is new enough.
pub async fn authenticate_storage_daemon(
    sock: BSock,
    director: &DirectorConfig,
    storage: &StorageConfig,
) -> Result<(BSock, PeerInfo), AuthError> {
    let who = sock.who().to_string();
    let (mut sock, info) = with_auth_timeout(
        &who,
        authenticate_daemon(
            sock,
            HelloRole::StorageDaemon,
            &director.name,
            &storage.password,
            &storage.tls,
            3000,
        ),
    )
    .await?;

    // daemons without version in their reply are accepted
    if info.version != 0 && info.version < MIN_SD_VERSION {
        return Err(AuthError::Protocol(format!(
            "Older Storage daemon at \"{}:{}\" incompatible with this Director.",
            sock.host(),
            sock.port()
        )));
    }

    let compress =
        director.comm_compression.unwrap_or(false) && info.version >= MIN_SD_COMPRESS_VERSION;
    sock.set_compress(compress);

    log::debug!(
        "authenticated with {} at {}:{} (version {}, tls {})",
        who,
        sock.host(),
        sock.port(),
        info.version,
        info.tls
    );
    Ok((sock, info))
}

/// Authenticate a freshly connected file daemon.
pub async fn authenticate_file_daemon(
    sock: BSock,
    director: &DirectorConfig,
    client: &ClientConfig,
) -> Result<(BSock, PeerInfo), AuthError> {
    let who = sock.who().to_string();
    let (mut sock, info) = with_auth_timeout(
        &who,
        authenticate_daemon(
            sock,
            HelloRole::FileDaemon,
            &director.name,
            &client.password,
            &client.tls,
            2000,
        ),
    )
    .await?;

    let compress =
        director.comm_compression.unwrap_or(false) && info.version >= MIN_FD_COMPRESS_VERSION;
    sock.set_compress(compress);

    Ok((sock, info))
}

async fn reject_console(sock: &mut BSock, err: AuthError) -> AuthError {
    if let Err(send_err) = sock.send_line(CONSOLE_SORRY).await {
        log::debug!("unable to tell console {} it was refused - {}", sock.host(), send_err);
    }
    tokio::time::sleep(CONSOLE_FAILURE_DELAY).await;
    err
}

/// Authenticate an inbound console connection.
///
/// The console greets first, then we challenge it before answering its
/// challenge. Failures are reported to the console after a short delay.
pub async fn authenticate_console(
    sock: BSock,
    director: &DirectorConfig,
    consoles: &[ConsoleConfig],
) -> Result<(BSock, ConsoleInfo), AuthError> {
    let who = sock.who().to_string();
    with_auth_timeout(&who, accept_console(sock, director, consoles)).await
}

async fn accept_console(
    mut sock: BSock,
    director: &DirectorConfig,
    consoles: &[ConsoleConfig],
) -> Result<(BSock, ConsoleInfo), AuthError> {
    let line = sock.recv_line().await?;

    let hello = match Hello::parse(&line) {
        Some(hello) if hello.role == HelloRole::Console => hello,
        _ => {
            let line: String = line.chars().take(100).collect();
            let err = AuthError::Protocol(format!(
                "UA Hello from {}:{} is invalid. Got: {}",
                sock.who(),
                sock.host(),
                line
            ));
            tokio::time::sleep(CONSOLE_FAILURE_DELAY).await;
            return Err(err);
        }
    };

    let failed = |sock: &BSock| {
        AuthError::Authorization(format!(
            "Unable to authenticate console \"{}\" at {}:{}:{}.",
            hello.name,
            sock.who(),
            sock.host(),
            sock.port()
        ))
    };

    let (password, tls, console) = if hello.name == DEFAULT_CONSOLE {
        (&director.password, &director.tls, None)
    } else {
        match consoles.iter().find(|c| c.name == hello.name) {
            Some(console) => (&console.password, &console.tls, Some(console.name.clone())),
            None => {
                let err = failed(&sock);
                return Err(reject_console(&mut sock, err).await);
            }
        }
    };

    if director.comm_compression.unwrap_or(false) && hello.version >= MIN_CONSOLE_COMPRESS_VERSION {
        sock.set_compress(true);
    }

    let local_tls = tls.local_need();

    let accepted = cram_md5_challenge(&mut sock, password, local_tls, true).await?;
    let remote_tls = if accepted {
        let response = cram_md5_respond(&mut sock, password).await?;
        response.accepted.then_some(response.remote_tls)
    } else {
        None
    };
    let remote_tls = match remote_tls {
        Some(remote_tls) => remote_tls,
        None => {
            let err = failed(&sock);
            return Err(reject_console(&mut sock, err).await);
        }
    };

    let use_tls = match negotiate_tls(local_tls, remote_tls, "client") {
        Ok(use_tls) => use_tls,
        Err(err) => return Err(reject_console(&mut sock, err).await),
    };

    if use_tls {
        let acceptor = match tls_acceptor(tls) {
            Ok(acceptor) => acceptor,
            Err(err) => return Err(reject_console(&mut sock, err.into()).await),
        };
        sock = match sock.tls_server(&acceptor, tls.authenticate_only()).await {
            Ok(sock) => sock,
            Err(err) => {
                tokio::time::sleep(CONSOLE_FAILURE_DELAY).await;
                return Err(AuthError::Transport(err));
            }
        };
    }

    sock.send_line(&format!(
        "1000 OK: {} {} Version: {}",
        DIRECTOR_PROTOCOL_VERSION,
        director.name,
        env!("CARGO_PKG_VERSION")
    ))
    .await?;

    let info = ConsoleInfo {
        name: hello.name,
        console,
        version: hello.version,
    };
    Ok((sock, info))
}

#[cfg(test)]
mod test {
    use super::*;

    fn director() -> DirectorConfig {
        DirectorConfig {
            name: "bdir".to_string(),
            password: "dir-secret".to_string(),
            comm_compression: Some(true),
            max_concurrent_jobs: None,
            tls: TlsOptions::default(),
        }
    }

    fn storage(password: &str) -> StorageConfig {
        StorageConfig {
            name: "File1".to_string(),
            address: "localhost".to_string(),
            port: None,
            password: password.to_string(),
            device: vec!["FileChgr1-Dev1".to_string()],
            media_type: "File".to_string(),
            autochanger: None,
            tls: TlsOptions::default(),
        }
    }

    /// Storage daemon side of the handshake
    async fn fake_sd(mut sd: BSock, password: &str, reply: &str) -> Result<bool, Error> {
        let hello = Hello::parse(&sd.recv_line().await?)
            .ok_or_else(|| format_err!("bad hello"))?;
        assert_eq!(hello.role, HelloRole::StorageDaemon);
        assert_eq!(hello.name, "bdir");

        let challenge = generate_challenge("sd")?;
        let line = ChallengeLine {
            challenge: challenge.clone(),
            tls_need: 0,
            compatible: true,
        };
        sd.send_line(&line.to_string()).await?;
        let response = sd.recv_line().await?;
        if !verify_cram_md5_response(password, &challenge, &response)? {
            sd.send_line(AUTH_FAILED).await?;
            return Ok(false);
        }
        sd.send_line(AUTH_OK).await?;

        let challenge = ChallengeLine::parse(&sd.recv_line().await?)?;
        let response = cram_md5_response(password, &challenge.challenge, challenge.compatible)?;
        sd.send_line(&response).await?;
        if sd.recv_line().await? != AUTH_OK {
            return Ok(false);
        }

        sd.send_line(reply).await?;
        Ok(true)
    }

    fn socket_pair() -> (BSock, BSock) {
        let (a, b) = tokio::io::duplex(4096);
        (
            BSock::new(a, "Storage daemon", "localhost", 9103),
            BSock::new(b, "Director daemon", "localhost", 0),
        )
    }

    #[test]
    fn test_tls_policy() -> Result<(), Error> {
        use TlsNeed::{None as NoTls, Ok as TlsOk, Required};

        assert!(!negotiate_tls(NoTls, NoTls, "server")?);
        assert!(!negotiate_tls(TlsOk, NoTls, "server")?);
        assert!(!negotiate_tls(NoTls, TlsOk, "server")?);
        assert!(negotiate_tls(TlsOk, TlsOk, "server")?);
        assert!(negotiate_tls(Required, TlsOk, "server")?);
        assert!(negotiate_tls(TlsOk, Required, "server")?);
        assert!(negotiate_tls(Required, Required, "server")?);

        assert!(matches!(
            negotiate_tls(Required, NoTls, "server"),
            Err(AuthError::TlsPolicy(_))
        ));
        assert!(matches!(
            negotiate_tls(NoTls, Required, "server"),
            Err(AuthError::TlsPolicy(_))
        ));
        Ok(())
    }

    #[test]
    fn test_storage_daemon_handshake() -> Result<(), Error> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let (dir, sd) = socket_pair();
            let reply = HelloOk { code: 3000, version: Some(2) }.to_string();
            let sd_task = tokio::spawn(async move { fake_sd(sd, "sd-secret", &reply).await });

            let (sock, info) =
                authenticate_storage_daemon(dir, &director(), &storage("sd-secret")).await?;
            assert!(sd_task.await??);

            assert_eq!(info.version, 2);
            assert_eq!(info.remote_tls, TlsNeed::None);
            assert!(!info.tls);
            assert!(sock.compress());
            Ok(())
        })
    }

    #[test]
    fn test_storage_daemon_bad_password() -> Result<(), Error> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let (dir, sd) = socket_pair();
            let sd_task = tokio::spawn(async move { fake_sd(sd, "other", "3000 OK Hello").await });

            let result = authenticate_storage_daemon(dir, &director(), &storage("sd-secret")).await;
            assert!(matches!(result, Err(AuthError::Authorization(_))));
            assert!(!sd_task.await??);
            Ok(())
        })
    }

    #[test]
    fn test_storage_daemon_too_old() -> Result<(), Error> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let (dir, sd) = socket_pair();
            let sd_task =
                tokio::spawn(async move { fake_sd(sd, "sd-secret", "3000 OK Hello 1").await });

            let result = authenticate_storage_daemon(dir, &director(), &storage("sd-secret")).await;
            assert!(matches!(result, Err(AuthError::Protocol(_))));
            assert!(sd_task.await??);
            Ok(())
        })
    }

    #[test]
    fn test_console_handshake() -> Result<(), Error> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let (a, b) = tokio::io::duplex(4096);
            let dir = BSock::new(a, "Console", "localhost", 0);
            let mut console = BSock::new(b, "Director daemon", "localhost", 9101);

            let console_task = tokio::spawn(async move {
                console.send_line("Hello *UserAgent* calling 102").await?;

                let challenge = ChallengeLine::parse(&console.recv_line().await?)?;
                let response =
                    cram_md5_response("dir-secret", &challenge.challenge, challenge.compatible)?;
                console.send_line(&response).await?;
                assert_eq!(console.recv_line().await?, AUTH_OK);

                let challenge = generate_challenge("console")?;
                let line = ChallengeLine {
                    challenge: challenge.clone(),
                    tls_need: 0,
                    compatible: true,
                };
                console.send_line(&line.to_string()).await?;
                let response = console.recv_line().await?;
                assert!(verify_cram_md5_response("dir-secret", &challenge, &response)?);
                console.send_line(AUTH_OK).await?;

                console.recv_line().await
            });

            let (_sock, info) = authenticate_console(dir, &director(), &[]).await?;
            assert_eq!(info.name, DEFAULT_CONSOLE);
            assert_eq!(info.console, None);
            assert_eq!(info.version, 102);

            let banner = console_task.await??;
            assert!(banner.starts_with("1000 OK: 103 bdir Version: "));
            Ok(())
        })
    }

    #[test]
    fn test_console_unknown_name() -> Result<(), Error> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let (a, b) = tokio::io::duplex(4096);
            let dir = BSock::new(a, "Console", "localhost", 0);
            let mut console = BSock::new(b, "Director daemon", "localhost", 9101);

            let console_task = tokio::spawn(async move {
                console.send_line("Hello stranger calling 102").await?;
                console.recv_line().await
            });

            let result = authenticate_console(dir, &director(), &[]).await;
            assert!(matches!(result, Err(AuthError::Authorization(_))));
            assert_eq!(console_task.await??, CONSOLE_SORRY);
            Ok(())
        })
    }

    #[test]
    fn test_console_gone_before_refusal() -> Result<(), Error> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let (a, b) = tokio::io::duplex(4096);
            let dir = BSock::new(a, "Console", "localhost", 0);
            let mut console = BSock::new(b, "Director daemon", "localhost", 9101);

            console.send_line("Hello stranger calling 102").await?;
            drop(console);

            // the failed write of the refusal does not hide the reason
            let result = authenticate_console(dir, &director(), &[]).await;
            assert!(matches!(result, Err(AuthError::Authorization(_))));
            Ok(())
        })
    }
}
