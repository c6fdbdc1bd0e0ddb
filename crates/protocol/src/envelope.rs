//! AES-256-CBC envelopes.
//!
//! Plaintext layout, before padding:
//!
//! ```text
//! random(16) | content_len(4, BE) | content | owner_len(4, BE) | owner_id
//! ```
//!
//! Two wire quirks are mandated by the platform and must not be "fixed":
//! the IV is the first 16 bytes of the key itself, and the PKCS#7-style
//! padding group is 32 bytes even though the cipher block is 16.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD as BASE64};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};

use crate::CodecError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const RANDOM_PREFIX_LEN: usize = 16;
const LEN_FIELD: usize = 4;
const HEADER_LEN: usize = RANDOM_PREFIX_LEN + LEN_FIELD;
const AES_BLOCK: usize = 16;
const PAD_GROUP: usize = 32;

// Configured keys are 43 characters whose final symbol usually carries
// non-zero trailing bits, which the strict engine rejects.
const KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The shared AES-256 key. Immutable once loaded.
#[derive(Clone, PartialEq, Eq)]
pub struct AesKey([u8; KEY_LEN]);

impl AesKey {
    /// Decode the configured base64 key (usually 43 characters, no padding).
    pub fn from_encoding_key(encoded: &str) -> Result<Self, CodecError> {
        let trimmed = encoded.trim();
        let missing = (4 - trimmed.len() % 4) % 4;
        let padded = format!("{trimmed}{}", "=".repeat(missing));

        let bytes = KEY_ENGINE
            .decode(padded)
            .map_err(|e| CodecError::InvalidKey(format!("base64: {e}")))?;
        let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            CodecError::InvalidKey(format!(
                "decoded key is {} bytes, expected {KEY_LEN}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    fn iv(&self) -> &[u8] {
        &self.0[..IV_LEN]
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesKey(<redacted>)")
    }
}

/// Result of opening an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedEnvelope {
    pub owner_id: String,
    pub content: String,
}

/// Encrypt `content` for `owner_id`, returning base64 ciphertext.
pub fn encrypt(key: &AesKey, owner_id: &str, content: &str) -> Result<String, CodecError> {
    let mut prefix = [0u8; RANDOM_PREFIX_LEN];
    SystemRandom::new()
        .fill(&mut prefix)
        .map_err(|_| CodecError::Entropy)?;
    encrypt_with_prefix(key, &prefix, owner_id, content)
}

fn encrypt_with_prefix(
    key: &AesKey,
    prefix: &[u8; RANDOM_PREFIX_LEN],
    owner_id: &str,
    content: &str,
) -> Result<String, CodecError> {
    let mut buf =
        Vec::with_capacity(HEADER_LEN + content.len() + LEN_FIELD + owner_id.len() + PAD_GROUP);
    buf.extend_from_slice(prefix);
    buf.extend_from_slice(&length_field(content.len())?);
    buf.extend_from_slice(content.as_bytes());
    buf.extend_from_slice(&length_field(owner_id.len())?);
    buf.extend_from_slice(owner_id.as_bytes());

    // Always pads, a full group when already aligned.
    let pad = PAD_GROUP - buf.len() % PAD_GROUP;
    buf.resize(buf.len() + pad, pad as u8);

    let cipher = Aes256CbcEnc::new_from_slices(&key.0, key.iv())
        .map_err(|e| CodecError::InvalidKey(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<NoPadding>(&buf);
    Ok(BASE64.encode(ciphertext))
}

/// Decrypt base64 ciphertext into its owner id and content.
pub fn decrypt(key: &AesKey, ciphertext_b64: &str) -> Result<DecryptedEnvelope, CodecError> {
    let data = BASE64
        .decode(ciphertext_b64.trim())
        .map_err(|e| CodecError::Decoding(format!("base64: {e}")))?;
    if data.is_empty() || data.len() % AES_BLOCK != 0 {
        return Err(CodecError::Framing(format!(
            "ciphertext length {} is not a positive multiple of {AES_BLOCK}",
            data.len()
        )));
    }

    let cipher = Aes256CbcDec::new_from_slices(&key.0, key.iv())
        .map_err(|e| CodecError::InvalidKey(e.to_string()))?;
    let plain = cipher
        .decrypt_padded_vec_mut::<NoPadding>(&data)
        .map_err(|_| CodecError::Framing("ciphertext is not block aligned".to_string()))?;

    let unpadded = strip_padding(&plain)?;
    parse_frame(unpadded)
}

fn strip_padding(buf: &[u8]) -> Result<&[u8], CodecError> {
    let pad = *buf.last().ok_or(CodecError::Padding(0))?;
    if pad == 0 || usize::from(pad) > buf.len() {
        return Err(CodecError::Padding(pad));
    }
    Ok(&buf[..buf.len() - usize::from(pad)])
}

fn parse_frame(buf: &[u8]) -> Result<DecryptedEnvelope, CodecError> {
    if buf.len() < HEADER_LEN + LEN_FIELD {
        return Err(CodecError::Framing(format!(
            "payload of {} bytes is shorter than the {} byte frame overhead",
            buf.len(),
            HEADER_LEN + LEN_FIELD
        )));
    }

    let content_len = read_length(&buf[RANDOM_PREFIX_LEN..HEADER_LEN]);
    if content_len > buf.len() - HEADER_LEN - LEN_FIELD {
        return Err(CodecError::Framing(format!(
            "declared content length {content_len} overruns {} byte payload",
            buf.len()
        )));
    }
    let content_end = HEADER_LEN + content_len;
    let content = &buf[HEADER_LEN..content_end];

    let owner_start = content_end + LEN_FIELD;
    let owner_len = read_length(&buf[content_end..owner_start]);
    if owner_len > buf.len() - owner_start {
        return Err(CodecError::Framing(format!(
            "declared owner id length {owner_len} overruns {} byte payload",
            buf.len()
        )));
    }
    let owner = &buf[owner_start..owner_start + owner_len];

    Ok(DecryptedEnvelope {
        owner_id: utf8(owner, "owner id")?,
        content: utf8(content, "content")?,
    })
}

fn length_field(len: usize) -> Result<[u8; LEN_FIELD], CodecError> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| CodecError::Framing(format!("field of {len} bytes exceeds u32 length")))
}

fn read_length(bytes: &[u8]) -> usize {
    let mut field = [0u8; LEN_FIELD];
    field.copy_from_slice(bytes);
    u32::from_be_bytes(field) as usize
}

fn utf8(bytes: &[u8], what: &str) -> Result<String, CodecError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::Decoding(format!("{what}: {e}")))
}
