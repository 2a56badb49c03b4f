//! Framed daemon socket

use std::pin::Pin;
use std::time::{Duration, Instant};

use anyhow::{bail, format_err, Error};
use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use openssl::ssl::{Ssl, SslAcceptor, SslConnector, SslVerifyMode};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;
use tokio_util::codec::Framed;

use crate::bnet::{BnetCodec, BnetFrame, BnetSignal};
use crate::maybe_tls::{AsyncStream, BoxedStream, MaybeTlsStream};

/// A received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BnetMessage {
    /// A text line, without its trailing newline
    Text(String),
    Signal(BnetSignal),
}

/// Socket to a daemon, sending and receiving frames
pub struct BSock {
    framed: Framed<MaybeTlsStream<BoxedStream>, BnetCodec>,
    who: String,
    host: String,
    port: u16,
    timeout: Option<Duration>,
}

impl BSock {
    /// Wrap an established connection.
    ///
    /// `who` names the peer in log and error messages.
    pub fn new<S: AsyncStream + 'static>(stream: S, who: &str, host: &str, port: u16) -> Self {
        let stream: BoxedStream = Box::new(stream);
        Self {
            framed: Framed::new(MaybeTlsStream::Normal(stream), BnetCodec::new()),
            who: who.to_string(),
            host: host.to_string(),
            port,
            timeout: None,
        }
    }

    /// Connect to `host:port`, retrying every `retry_interval` until
    /// `max_retry_time` has passed.
    pub async fn connect(
        who: &str,
        host: &str,
        port: u16,
        retry_interval: Duration,
        max_retry_time: Duration,
    ) -> Result<Self, Error> {
        let start = Instant::now();
        loop {
            match TcpStream::connect((host, port)).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(Self::new(stream, who, host, port));
                }
                Err(err) if start.elapsed() + retry_interval < max_retry_time => {
                    log::warn!(
                        "Could not connect to {} on {}:{} - {}, retrying ...",
                        who,
                        host,
                        port,
                        err
                    );
                    tokio::time::sleep(retry_interval).await;
                }
                Err(err) => {
                    bail!("unable to connect to {} on {}:{} - {}", who, host, port, err);
                }
            }
        }
    }

    pub fn who(&self) -> &str {
        &self.who
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Timeout for each send and receive, `None` blocks forever.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_compress(&mut self, compress: bool) {
        self.framed.codec_mut().set_compress(compress);
    }

    pub fn compress(&self) -> bool {
        self.framed.codec().compress()
    }

    pub fn is_tls(&self) -> bool {
        self.framed.get_ref().is_secured()
    }

    async fn send_frame(&mut self, frame: BnetFrame) -> Result<(), Error> {
        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.framed.send(frame))
                .await
                .map_err(|_| format_err!("timeout writing to {}", self.who))?,
            None => self.framed.send(frame).await,
        };
        result.map_err(|err| format_err!("write error sending to {} - {}", self.who, err))
    }

    /// Send one text line, the newline is appended.
    pub async fn send_line(&mut self, line: &str) -> Result<(), Error> {
        let mut data = BytesMut::with_capacity(line.len() + 1);
        data.put_slice(line.as_bytes());
        data.put_u8(b'\n');
        log::trace!(">{}: {}", self.who, line);
        self.send_frame(BnetFrame::Data(data.freeze())).await
    }

    pub async fn signal(&mut self, signal: BnetSignal) -> Result<(), Error> {
        log::trace!(">{}: signal {:?}", self.who, signal);
        self.send_frame(BnetFrame::Signal(signal)).await
    }

    /// Receive the next message, `None` on end of file.
    pub async fn recv(&mut self) -> Result<Option<BnetMessage>, Error> {
        let next = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.framed.next())
                .await
                .map_err(|_| format_err!("timeout reading from {}", self.who))?,
            None => self.framed.next().await,
        };

        match next {
            None => Ok(None),
            Some(Err(err)) => bail!("read error from {} - {}", self.who, err),
            Some(Ok(BnetFrame::Signal(signal))) => {
                log::trace!("<{}: signal {:?}", self.who, signal);
                Ok(Some(BnetMessage::Signal(signal)))
            }
            Some(Ok(BnetFrame::Data(data))) => {
                let mut text = String::from_utf8(data.to_vec())
                    .map_err(|_| format_err!("{} sent a message which is not UTF-8", self.who))?;
                if text.ends_with('\n') {
                    text.pop();
                }
                log::trace!("<{}: {}", self.who, text);
                Ok(Some(BnetMessage::Text(text)))
            }
        }
    }

    /// Receive a text line, treating signals and end of file as errors.
    pub async fn recv_line(&mut self) -> Result<String, Error> {
        match self.recv().await? {
            Some(BnetMessage::Text(text)) => Ok(text),
            Some(BnetMessage::Signal(signal)) => {
                bail!("{} sent signal {:?} instead of a message", self.who, signal)
            }
            None => bail!("{} closed the connection", self.who),
        }
    }

    fn take_plain_stream(
        framed: Framed<MaybeTlsStream<BoxedStream>, BnetCodec>,
        who: &str,
    ) -> Result<(BoxedStream, BnetCodec), Error> {
        let parts = framed.into_parts();
        if !parts.read_buf.is_empty() {
            bail!("{} sent data before the TLS handshake", who);
        }
        match parts.io {
            MaybeTlsStream::Normal(stream) => Ok((stream, parts.codec)),
            MaybeTlsStream::Secured(_) => bail!("connection to {} is already encrypted", who),
        }
    }

    /// Run the TLS client handshake.
    ///
    /// With `authenticate_only` the connection continues in plaintext once
    /// the handshake succeeded. The context must then be limited to TLS 1.2
    /// (see [crate::tls]), TLS 1.3 post-handshake messages would end up in
    /// the plaintext stream.
    pub async fn tls_client(
        mut self,
        connector: &SslConnector,
        domain: &str,
        authenticate_only: bool,
    ) -> Result<Self, Error> {
        let (mut stream, codec) = Self::take_plain_stream(self.framed, &self.who)?;

        let mut config = connector.configure()?;
        if connector.context().verify_mode() == SslVerifyMode::NONE {
            config.set_verify_hostname(false);
        }
        let ssl = config.into_ssl(domain)?;

        let io = if authenticate_only {
            let mut tls = SslStream::new(ssl, &mut stream)?;
            Pin::new(&mut tls)
                .connect()
                .await
                .map_err(|err| format_err!("TLS negotiation with {} failed - {}", self.who, err))?;
            drop(tls);
            MaybeTlsStream::Normal(stream)
        } else {
            let mut tls = SslStream::new(ssl, stream)?;
            Pin::new(&mut tls)
                .connect()
                .await
                .map_err(|err| format_err!("TLS negotiation with {} failed - {}", self.who, err))?;
            MaybeTlsStream::Secured(tls)
        };

        self.framed = Framed::new(io, codec);
        Ok(self)
    }

    /// Run the TLS server handshake.
    pub async fn tls_server(
        mut self,
        acceptor: &SslAcceptor,
        authenticate_only: bool,
    ) -> Result<Self, Error> {
        let (mut stream, codec) = Self::take_plain_stream(self.framed, &self.who)?;

        let ssl = Ssl::new(acceptor.context())?;

        let io = if authenticate_only {
            let mut tls = SslStream::new(ssl, &mut stream)?;
            Pin::new(&mut tls)
                .accept()
                .await
                .map_err(|err| format_err!("TLS negotiation with {} failed - {}", self.who, err))?;
            drop(tls);
            MaybeTlsStream::Normal(stream)
        } else {
            let mut tls = SslStream::new(ssl, stream)?;
            Pin::new(&mut tls)
                .accept()
                .await
                .map_err(|err| format_err!("TLS negotiation with {} failed - {}", self.who, err))?;
            MaybeTlsStream::Secured(tls)
        };

        self.framed = Framed::new(io, codec);
        Ok(self)
    }

    /// Tell the peer we are done and close our side.
    pub async fn terminate(&mut self) {
        let _ = self.signal(BnetSignal::Terminate).await;
        let _ = self.framed.get_mut().shutdown().await;
    }
}
