//! Callback verification and message decoding.
//!
//! `CallbackCodec` owns the receive token, the AES key and the corp id and
//! wires the signature and envelope codecs together for the two callback
//! shapes: the URL verification handshake and encrypted message delivery.

use tracing::debug;

use crate::envelope::{self, AesKey};
use crate::message::{parse_message_xml, Decoded};
use crate::signature;
use crate::CodecError;

pub struct CallbackCodec {
    token: String,
    key: AesKey,
    corp_id: String,
}

impl CallbackCodec {
    pub fn new(token: &str, encoding_aes_key: &str, corp_id: &str) -> Result<Self, CodecError> {
        Ok(Self {
            token: token.to_string(),
            key: AesKey::from_encoding_key(encoding_aes_key)?,
            corp_id: corp_id.to_string(),
        })
    }

    pub fn corp_id(&self) -> &str {
        &self.corp_id
    }

    /// URL verification handshake: returns the plaintext echo to send back
    /// byte-for-byte, or the reason the request was rejected.
    pub fn verify_url(
        &self,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        echo: &str,
    ) -> Result<String, CodecError> {
        self.check_signature(signature, timestamp, nonce, echo)?;
        self.open(echo)
    }

    /// Verify, decrypt and parse one message callback. The signature is
    /// checked before any decryption is attempted.
    pub fn decode_message(
        &self,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        ciphertext: &str,
    ) -> Result<Decoded, CodecError> {
        self.check_signature(signature, timestamp, nonce, ciphertext)?;
        let xml = self.open(ciphertext)?;
        parse_message_xml(&xml)
    }

    /// Build an encrypted, signed passive reply body.
    pub fn seal_reply(
        &self,
        content: &str,
        timestamp: &str,
        nonce: &str,
    ) -> Result<String, CodecError> {
        let encrypted = envelope::encrypt(&self.key, &self.corp_id, content)?;
        let msg_signature = signature::sign(&self.token, timestamp, nonce, &encrypted);
        Ok(format!(
            "<xml><Encrypt><![CDATA[{encrypted}]]></Encrypt>\
             <MsgSignature><![CDATA[{msg_signature}]]></MsgSignature>\
             <TimeStamp>{timestamp}</TimeStamp>\
             <Nonce><![CDATA[{nonce}]]></Nonce></xml>"
        ))
    }

    fn check_signature(
        &self,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        payload: &str,
    ) -> Result<(), CodecError> {
        if signature::verify(signature, timestamp, nonce, payload, &self.token) {
            Ok(())
        } else {
            Err(CodecError::SignatureMismatch)
        }
    }

    fn open(&self, ciphertext: &str) -> Result<String, CodecError> {
        let env = envelope::decrypt(&self.key, ciphertext)?;
        if !self.corp_id.is_empty() && env.owner_id != self.corp_id {
            debug!(
                component = "callback_codec",
                event = "codec.owner_mismatch",
                owner_id = %env.owner_id,
                "Envelope owner does not match configured corp id"
            );
            return Err(CodecError::Parse(format!(
                "envelope owner `{}` does not match configured corp id",
                env.owner_id
            )));
        }
        Ok(env.content)
    }
}
