//! WeCom Relay Protocol
//!
//! Wire codec for the chat platform's encrypted callback protocol.
//! Everything in this crate is pure and synchronous: signatures, AES
//! envelopes, decoded message types and reply chunking.

pub mod callback;
pub mod chunk;
pub mod envelope;
pub mod message;
pub mod signature;

pub use callback::CallbackCodec;
pub use chunk::{split, DEFAULT_CHUNK_BYTES, TRANSPORT_MAX_BYTES};
pub use envelope::{AesKey, DecryptedEnvelope};
pub use message::{extract_ciphertext, Decoded, InboundMessage};

use thiserror::Error;

/// Errors produced while verifying or decoding callback traffic.
///
/// None of these are ever reported back to the remote caller; the HTTP
/// layer acknowledges regardless and only logs the variant.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("envelope framing error: {0}")]
    Framing(String),

    #[error("invalid padding byte {0}")]
    Padding(u8),

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("message parse error: {0}")]
    Parse(String),

    #[error("invalid AES key: {0}")]
    InvalidKey(String),

    #[error("system random source unavailable")]
    Entropy,
}
