//! TLS contexts built from resource TLS options

use anyhow::{format_err, Error};
use openssl::ssl::{SslAcceptor, SslConnector, SslFiletype, SslMethod, SslVerifyMode, SslVersion};

use bdir_api_types::TlsOptions;

/// Client side context, used when we connect to a daemon.
pub fn tls_connector(options: &TlsOptions) -> Result<SslConnector, Error> {
    let mut builder = SslConnector::builder(SslMethod::tls())?;

    if let Some(ref ca_file) = options.tls_ca_file {
        builder
            .set_ca_file(ca_file)
            .map_err(|err| format_err!("unable to read CA file {} - {}", ca_file, err))?;
    }
    if let Some(ref cert) = options.tls_cert {
        builder
            .set_certificate_chain_file(cert)
            .map_err(|err| format_err!("unable to read certificate {} - {}", cert, err))?;
    }
    if let Some(ref key) = options.tls_key {
        builder
            .set_private_key_file(key, SslFiletype::PEM)
            .map_err(|err| format_err!("unable to read key {} - {}", key, err))?;
        builder.check_private_key()?;
    }
    if !options.tls_verify_peer.unwrap_or(true) {
        builder.set_verify(SslVerifyMode::NONE);
    }
    if options.authenticate_only() {
        builder.set_max_proto_version(Some(SslVersion::TLS1_2))?;
    }

    Ok(builder.build())
}

/// Server side context, used for inbound console connections.
pub fn tls_acceptor(options: &TlsOptions) -> Result<SslAcceptor, Error> {
    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;

    let key = options
        .tls_key
        .as_deref()
        .ok_or_else(|| format_err!("TLS server side needs a private key"))?;
    let cert = options
        .tls_cert
        .as_deref()
        .ok_or_else(|| format_err!("TLS server side needs a certificate"))?;

    acceptor
        .set_private_key_file(key, SslFiletype::PEM)
        .map_err(|err| format_err!("unable to read key {} - {}", key, err))?;
    acceptor
        .set_certificate_chain_file(cert)
        .map_err(|err| format_err!("unable to read certificate {} - {}", cert, err))?;
    acceptor.check_private_key()?;

    if let Some(ref ca_file) = options.tls_ca_file {
        acceptor
            .set_ca_file(ca_file)
            .map_err(|err| format_err!("unable to read CA file {} - {}", ca_file, err))?;
        if options.tls_verify_peer.unwrap_or(false) {
            acceptor.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);
        }
    }

    if options.authenticate_only() {
        acceptor.set_max_proto_version(Some(SslVersion::TLS1_2))?;
    }

    Ok(acceptor.build())
}
