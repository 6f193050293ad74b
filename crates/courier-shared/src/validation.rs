//! Send-payload validation.
//!
//! The REST send body carries one optional field per content kind. A valid
//! request fills exactly one of them with non-empty content.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::message::{DocumentDescriptor, MediaRef, MessageBody};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentDescriptor>,
}

impl SendMessageRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Collapse the request into a single [`MessageBody`].
    ///
    /// Blank fields count as absent. Text is kept verbatim (not trimmed) but
    /// must be at most `max_text_len` characters.
    pub fn into_body(self, max_text_len: usize) -> Result<MessageBody, ValidationError> {
        let mut bodies = Vec::with_capacity(1);

        if let Some(text) = self.text.filter(|t| !t.trim().is_empty()) {
            let len = text.chars().count();
            if len > max_text_len {
                return Err(ValidationError::TextTooLong {
                    len,
                    max: max_text_len,
                });
            }
            bodies.push(MessageBody::Text(text));
        }
        if let Some(url) = non_blank(self.image) {
            bodies.push(MessageBody::Image(MediaRef { url }));
        }
        if let Some(url) = non_blank(self.video) {
            bodies.push(MessageBody::Video(MediaRef { url }));
        }
        if let Some(url) = non_blank(self.audio) {
            bodies.push(MessageBody::Audio(MediaRef { url }));
        }
        if let Some(mut doc) = self.document.filter(|d| !d.url.trim().is_empty()) {
            doc.url = doc.url.trim().to_string();
            if doc.file_name.trim().is_empty() {
                doc.file_name = "document".to_string();
            }
            bodies.push(MessageBody::Document(doc));
        }

        match bodies.len() {
            0 => Err(ValidationError::EmptyPayload),
            1 => Ok(bodies.remove(0)),
            n => Err(ValidationError::MultiplePayloads(n)),
        }
    }
}

impl From<MessageBody> for SendMessageRequest {
    fn from(body: MessageBody) -> Self {
        let mut req = SendMessageRequest::default();
        match body {
            MessageBody::Text(t) => req.text = Some(t),
            MessageBody::Image(m) => req.image = Some(m.url),
            MessageBody::Video(m) => req.video = Some(m.url),
            MessageBody::Audio(m) => req.audio = Some(m.url),
            MessageBody::Document(d) => req.document = Some(d),
        }
        req
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
