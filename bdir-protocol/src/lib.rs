//! Wire protocol spoken between the director and the storage/file daemons
//!
//! Messages are framed by a four byte length header ([bnet]), transported
//! over a plain or TLS protected socket ([bsock]), and carry text lines
//! matching a fixed set of templates ([message]).

pub mod bnet;
pub mod bsock;
pub mod maybe_tls;
pub mod message;
pub mod parse;
pub mod tls;

pub use bnet::{BnetCodec, BnetFrame, BnetSignal};
pub use bsock::{BSock, BnetMessage};

/// Names on the wire have their spaces replaced by `0x01`.
pub fn bash_spaces(text: &str) -> String {
    text.replace(' ', "\x01")
}

/// Undo [bash_spaces].
pub fn unbash_spaces(text: &str) -> String {
    text.replace('\x01', " ")
}
