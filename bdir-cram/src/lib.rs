//! CRAM-MD5 challenge/response primitives
//!
//! The challenger sends `auth cram-md5 <nonce> ssl=<n>`, the responder
//! answers with the base64 encoded HMAC-MD5 of the nonce, keyed by the
//! shared password.
//!
//! Older daemons use a base64 variant which sign-extends every input byte
//! and does not left align the final digit. We always accept both
//! encodings when verifying a response.

use anyhow::{bail, format_err, Error};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;

const BASE64_DIGITS: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Compute the HMAC-MD5 of `data`.
pub fn hmac_md5(key: &[u8], data: &[u8]) -> Result<[u8; 16], Error> {
    let pkey = PKey::hmac(key)?;
    let mut signer = Signer::new(MessageDigest::md5(), &pkey)?;
    signer.update(data)?;
    let digest = signer.sign_to_vec()?;

    let mut result = [0u8; 16];
    if digest.len() != result.len() {
        bail!("unexpected HMAC-MD5 length {}", digest.len());
    }
    result.copy_from_slice(&digest);
    Ok(result)
}

/// Base64 encode without padding.
///
/// With `compatible` set this is standard base64 (no padding), otherwise the
/// legacy encoding is produced.
pub fn bin_to_base64(bin: &[u8], compatible: bool) -> String {
    if compatible {
        return base64::encode_config(bin, base64::STANDARD_NO_PAD);
    }

    let mut text = String::with_capacity((bin.len() * 4 + 2) / 3);
    let mut reg: u32 = 0;
    let mut rem: u32 = 0;
    let mut i = 0;

    while i < bin.len() {
        if rem < 6 {
            reg <<= 8;
            // sign extension is part of the legacy format
            reg |= bin[i] as i8 as i32 as u32;
            i += 1;
            rem += 8;
        }
        let digit = (reg >> (rem - 6)) & 0x3f;
        text.push(BASE64_DIGITS[digit as usize] as char);
        rem -= 6;
    }

    if rem > 0 {
        let mask = (1u32 << rem) - 1;
        text.push(BASE64_DIGITS[(reg & mask) as usize] as char);
    }

    text
}

/// The response a responder sends for `challenge`.
pub fn cram_md5_response(password: &str, challenge: &str, compatible: bool) -> Result<String, Error> {
    let digest = hmac_md5(password.as_bytes(), challenge.as_bytes())?;
    Ok(bin_to_base64(&digest, compatible))
}

/// Verify a response, accepting both base64 variants.
pub fn verify_cram_md5_response(password: &str, challenge: &str, response: &str) -> Result<bool, Error> {
    let digest = hmac_md5(password.as_bytes(), challenge.as_bytes())?;
    let response = response.trim_end();

    let compatible = bin_to_base64(&digest, true);
    let legacy = bin_to_base64(&digest, false);

    Ok(constant_time_eq(response, &compatible) || constant_time_eq(response, &legacy))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && openssl::memcmp::eq(a.as_bytes(), b.as_bytes())
}

/// Generate a fresh nonce `<random.time@host>`.
pub fn generate_challenge(host: &str) -> Result<String, Error> {
    let mut rand = [0u8; 4];
    openssl::rand::rand_bytes(&mut rand)?;
    Ok(format!(
        "<{}.{}@{}>",
        u32::from_le_bytes(rand),
        proxmox_time::epoch_i64(),
        host,
    ))
}

/// A parsed `auth cram-md5` challenge line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeLine {
    pub challenge: String,
    /// TLS level advertised by the challenger (0 when absent)
    pub tls_need: i32,
    /// Peer asked for the compatible base64 encoding
    pub compatible: bool,
}

impl ChallengeLine {
    /// Parse `auth cram-md5[c] <challenge> [ssl=<n>]`
    pub fn parse(line: &str) -> Result<Self, Error> {
        let line = line.trim_end_matches(|c| c == '\n' || c == '\0');
        let mut parts = line.split_ascii_whitespace();

        if parts.next() != Some("auth") {
            bail!("not a cram-md5 challenge: {:?}", line);
        }
        let compatible = match parts.next() {
            Some("cram-md5c") => true,
            Some("cram-md5") => false,
            _ => bail!("not a cram-md5 challenge: {:?}", line),
        };
        let challenge = parts
            .next()
            .ok_or_else(|| format_err!("cram-md5 challenge without nonce"))?
            .to_string();

        let tls_need = match parts.next() {
            None => 0,
            Some(ssl) => match ssl.strip_prefix("ssl=") {
                Some(level) => level
                    .parse()
                    .map_err(|_| format_err!("invalid ssl level in challenge: {:?}", line))?,
                None => bail!("unexpected data in challenge: {:?}", line),
            },
        };
        if parts.next().is_some() {
            bail!("unexpected data in challenge: {:?}", line);
        }

        Ok(Self {
            challenge,
            tls_need,
            compatible,
        })
    }
}

impl std::fmt::Display for ChallengeLine {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let method = if self.compatible { "cram-md5c" } else { "cram-md5" };
        write!(f, "auth {} {} ssl={}", method, self.challenge, self.tls_need)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_hmac_md5_rfc2104() -> Result<(), Error> {
        // RFC 2104 test vector 2
        let digest = hmac_md5(b"Jefe", b"what do ya want for nothing?")?;
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(hex, "750c783e6ab0b503eaa86e310a5db738");
        Ok(())
    }

    #[test]
    fn test_base64_variants() {
        // all bytes < 0x80 and no remainder bits: both encodings agree
        let bin = b"\x01\x02\x03\x04";
        assert_eq!(bin_to_base64(bin, true), "AQIDBA");
        assert_eq!(bin_to_base64(bin, false), "AQIDBA");

        // the final digit is not left aligned
        let bin = b"\x01\x02\x03\x07";
        assert_eq!(bin_to_base64(bin, true), "AQIDBw");
        assert_eq!(bin_to_base64(bin, false), "AQIDBD");

        assert_eq!(bin_to_base64(b"Man", true), "TWFu");
        assert_eq!(bin_to_base64(b"Man", false), "TWFu");

        // the sign extension of 0xff pollutes the following digits
        assert_eq!(bin_to_base64(&[0xff, 0x00, 0x00], true), "/wAA");
        assert_eq!(bin_to_base64(&[0xff, 0x00, 0x00], false), "/wAA");
        assert_eq!(bin_to_base64(&[0x00, 0xff, 0x00], true), "AP8A");
        assert_eq!(bin_to_base64(&[0x00, 0xff, 0x00], false), "A/8A");
    }

    #[test]
    fn test_response_roundtrip() -> Result<(), Error> {
        let challenge = generate_challenge("localhost")?;
        assert!(challenge.starts_with('<') && challenge.ends_with("@localhost>"));

        for compatible in [true, false] {
            let response = cram_md5_response("secret", &challenge, compatible)?;
            assert!(verify_cram_md5_response("secret", &challenge, &response)?);
            assert!(!verify_cram_md5_response("wrong", &challenge, &response)?);
        }
        Ok(())
    }

    #[test]
    fn test_parse_challenge_line() -> Result<(), Error> {
        let line = ChallengeLine::parse("auth cram-md5 <1.2@host> ssl=2\n")?;
        assert_eq!(line.challenge, "<1.2@host>");
        assert_eq!(line.tls_need, 2);
        assert!(!line.compatible);

        let line = ChallengeLine::parse("auth cram-md5c <1.2@host> ssl=0")?;
        assert!(line.compatible);

        let line = ChallengeLine::parse("auth cram-md5 <1.2@host>")?;
        assert_eq!(line.tls_need, 0);

        assert!(ChallengeLine::parse("Hello there").is_err());
        assert!(ChallengeLine::parse("auth cram-md5").is_err());
        assert!(ChallengeLine::parse("auth cram-md5 <x> ssl=x").is_err());

        let line = ChallengeLine {
            challenge: "<1.2@host>".into(),
            tls_need: 1,
            compatible: false,
        };
        assert_eq!(line.to_string(), "auth cram-md5 <1.2@host> ssl=1");
        Ok(())
    }
}
