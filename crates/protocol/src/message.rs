//! Decoded callback messages.

use serde::Deserialize;

use crate::CodecError;

/// A text message from a chat user, ready for command classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub from_user: String,
    pub content: String,
    pub msg_type: String,
    pub agent_id: String,
    pub create_time: i64,
    pub msg_id: Option<String>,
}

/// Outcome of decoding a verified, decrypted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A text message to forward downstream.
    Text(InboundMessage),
    /// Any other message type: handled by acknowledging and doing nothing.
    Ignored { msg_type: String },
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "FromUserName", default)]
    from_user: String,
    #[serde(rename = "CreateTime", default)]
    create_time: i64,
    #[serde(rename = "MsgType", default)]
    msg_type: String,
    #[serde(rename = "Content", default)]
    content: String,
    #[serde(rename = "MsgId", default)]
    msg_id: Option<String>,
    #[serde(rename = "AgentID", default)]
    agent_id: String,
}

#[derive(Debug, Deserialize)]
struct RawEncryptedBody {
    #[serde(rename = "Encrypt", default)]
    encrypt: String,
}

/// Parse the decrypted XML payload into a message.
pub fn parse_message_xml(xml: &str) -> Result<Decoded, CodecError> {
    let raw: RawMessage =
        quick_xml::de::from_str(xml).map_err(|e| CodecError::Parse(format!("xml: {e}")))?;

    if raw.msg_type != "text" {
        return Ok(Decoded::Ignored {
            msg_type: raw.msg_type,
        });
    }
    if raw.from_user.is_empty() {
        return Err(CodecError::Parse("missing FromUserName".to_string()));
    }
    if raw.content.is_empty() {
        return Err(CodecError::Parse("empty Content".to_string()));
    }

    Ok(Decoded::Text(InboundMessage {
        from_user: raw.from_user,
        content: raw.content,
        msg_type: raw.msg_type,
        agent_id: raw.agent_id,
        create_time: raw.create_time,
        msg_id: raw.msg_id,
    }))
}

/// Pull the ciphertext out of a POST body.
///
/// The body is either the bare base64 ciphertext or an XML envelope with an
/// `Encrypt` element.
pub fn extract_ciphertext(body: &str) -> Result<String, CodecError> {
    let trimmed = body.trim();
    if !trimmed.starts_with('<') {
        if trimmed.is_empty() {
            return Err(CodecError::Parse("empty request body".to_string()));
        }
        return Ok(trimmed.to_string());
    }

    let raw: RawEncryptedBody =
        quick_xml::de::from_str(trimmed).map_err(|e| CodecError::Parse(format!("xml: {e}")))?;
    let encrypt = raw.encrypt.trim();
    if encrypt.is_empty() {
        return Err(CodecError::Parse("missing Encrypt element".to_string()));
    }
    Ok(encrypt.to_string())
}
