//! Length prefixed frame codec
//!
//! Each frame starts with a big-endian `i32`. A positive value is the
//! payload length (optionally with flag bits), a negative value is a
//! signal without payload.

use std::io::{Read, Write};

use anyhow::{bail, Error};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tokio_util::codec::{Decoder, Encoder};

/// Payload is compressed
pub const BNET_COMPRESSED: i32 = 1 << 30;
/// Extended header (data channel only)
pub const BNET_HDR_EXTEND: i32 = 1 << 29;
/// Payload is a command
pub const BNET_IS_CMD: i32 = 1 << 28;
/// Payload carries an offset (data channel only)
pub const BNET_OFFSET: i32 = 1 << 27;

const BNET_FLAG_MASK: i32 = BNET_COMPRESSED | BNET_HDR_EXTEND | BNET_IS_CMD | BNET_OFFSET;

/// Larger packets are a protocol violation.
pub const MAX_PACKET_SIZE: usize = 1_000_000;

/// Shorter payloads are never compressed.
pub const MIN_COMPRESS_SIZE: usize = 20;

macro_rules! signals {
    ($($(#[$attr:meta])* $variant:ident = $code:literal,)*) => {
        /// In-band signals (negative frame lengths)
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        pub enum BnetSignal {
            $($(#[$attr])* $variant,)*
            /// Signal value we do not know
            Unknown(i32),
        }

        impl BnetSignal {
            pub fn code(self) -> i32 {
                match self {
                    $(BnetSignal::$variant => $code,)*
                    BnetSignal::Unknown(code) => code,
                }
            }

            pub fn from_code(code: i32) -> Self {
                match code {
                    $($code => BnetSignal::$variant,)*
                    _ => BnetSignal::Unknown(code),
                }
            }
        }
    };
}

signals! {
    /// End of data stream
    Eod = -1,
    /// End of data, peer waits for a reply
    EodPoll = -2,
    /// Send full status
    Status = -3,
    /// Conversation terminated
    Terminate = -4,
    /// Method requested
    Poll = -5,
    Heartbeat = -6,
    HbResponse = -7,
    BTime = -9,
    Break = -10,
    StartSelect = -11,
    EndSelect = -12,
    InvalidCmd = -13,
    CmdFailed = -14,
    CmdOk = -15,
    CmdBegin = -16,
    MsgsPending = -17,
    MainPrompt = -18,
    SelectInput = -19,
    WarningMsg = -20,
    ErrorMsg = -21,
    InfoMsg = -22,
    RunCmd = -23,
    YesNo = -24,
    StartRtree = -25,
    EndRtree = -26,
    SubPrompt = -27,
    TextInput = -28,
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BnetFrame {
    Data(Bytes),
    Signal(BnetSignal),
}

/// Frame codec, optionally compressing outgoing payloads
#[derive(Debug, Default)]
pub struct BnetCodec {
    compress: bool,
}

impl BnetCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_compress(&mut self, compress: bool) {
        self.compress = compress;
    }

    pub fn compress(&self) -> bool {
        self.compress
    }
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut result = Vec::new();
    ZlibDecoder::new(data)
        .take(MAX_PACKET_SIZE as u64 + 1)
        .read_to_end(&mut result)?;
    if result.len() > MAX_PACKET_SIZE {
        bail!("decompressed packet too big");
    }
    Ok(result)
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len()), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

impl Decoder for BnetCodec {
    type Item = BnetFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BnetFrame>, Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let header = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if header < 0 {
            src.advance(4);
            return Ok(Some(BnetFrame::Signal(BnetSignal::from_code(header))));
        }

        if header & (BNET_HDR_EXTEND | BNET_OFFSET) != 0 {
            bail!("unsupported frame header {:#x}", header);
        }

        let len = (header & !BNET_FLAG_MASK) as usize;
        if len > MAX_PACKET_SIZE {
            bail!("packet size too big ({} > {})", len, MAX_PACKET_SIZE);
        }

        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let payload = src.split_to(len).freeze();

        if header & BNET_COMPRESSED != 0 {
            let data = inflate(&payload)?;
            return Ok(Some(BnetFrame::Data(data.into())));
        }

        Ok(Some(BnetFrame::Data(payload)))
    }
}

impl Encoder<BnetFrame> for BnetCodec {
    type Error = Error;

    fn encode(&mut self, frame: BnetFrame, dst: &mut BytesMut) -> Result<(), Error> {
        let data = match frame {
            BnetFrame::Signal(signal) => {
                dst.reserve(4);
                dst.put_i32(signal.code());
                return Ok(());
            }
            BnetFrame::Data(data) => data,
        };

        if data.len() > MAX_PACKET_SIZE {
            bail!("packet size too big ({} > {})", data.len(), MAX_PACKET_SIZE);
        }

        if self.compress && data.len() >= MIN_COMPRESS_SIZE {
            let packed = deflate(&data)?;
            if packed.len() < data.len() {
                dst.reserve(4 + packed.len());
                dst.put_i32(packed.len() as i32 | BNET_COMPRESSED);
                dst.put_slice(&packed);
                return Ok(());
            }
        }

        dst.reserve(4 + data.len());
        dst.put_i32(data.len() as i32);
        dst.put_slice(&data);

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decode_partial_and_signal() -> Result<(), Error> {
        let mut codec = BnetCodec::new();
        let mut buf = BytesMut::new();

        buf.put_i32(5);
        buf.put_slice(b"he");
        assert_eq!(codec.decode(&mut buf)?, None);

        buf.put_slice(b"llo");
        buf.put_i32(-1);
        buf.put_i32(-99);

        assert_eq!(
            codec.decode(&mut buf)?,
            Some(BnetFrame::Data(Bytes::from_static(b"hello")))
        );
        assert_eq!(
            codec.decode(&mut buf)?,
            Some(BnetFrame::Signal(BnetSignal::Eod))
        );
        assert_eq!(
            codec.decode(&mut buf)?,
            Some(BnetFrame::Signal(BnetSignal::Unknown(-99)))
        );
        assert_eq!(codec.decode(&mut buf)?, None);
        Ok(())
    }

    #[test]
    fn test_compressed_frames() -> Result<(), Error> {
        let mut codec = BnetCodec::new();
        codec.set_compress(true);

        let line = Bytes::from("CatReq JobId=1 CreateJobMedia ".repeat(10));
        let mut buf = BytesMut::new();
        codec.encode(BnetFrame::Data(line.clone()), &mut buf)?;

        let header = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert!(header & BNET_COMPRESSED != 0);

        // the receiving side does not need compression enabled
        let mut decoder = BnetCodec::new();
        assert_eq!(decoder.decode(&mut buf)?, Some(BnetFrame::Data(line)));

        // short lines stay uncompressed
        let mut buf = BytesMut::new();
        codec.encode(BnetFrame::Data(Bytes::from_static(b"1000 OK")), &mut buf)?;
        assert_eq!(i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]), 7);
        Ok(())
    }

    #[test]
    fn test_reject_oversized_packet() {
        let mut codec = BnetCodec::new();
        let mut buf = BytesMut::new();
        buf.put_i32(MAX_PACKET_SIZE as i32 + 1);
        assert!(codec.decode(&mut buf).is_err());

        let mut buf = BytesMut::new();
        buf.put_i32(BNET_OFFSET | 10);
        assert!(codec.decode(&mut buf).is_err());
    }
}
