//! Media-upload collaborator seam.
//!
//! Uploads happen out of band; by the time a message is sent its media
//! fields hold references to already-stored objects. The resolver checks
//! those references (and document size) before anything is persisted.

use url::Url;

use courier_shared::{DocumentDescriptor, MediaRef, MessageBody, ValidationError};

pub trait MediaResolver: Send + Sync {
    /// Accept, rewrite or reject the media portion of a body.
    fn resolve(&self, body: MessageBody) -> Result<MessageBody, ValidationError>;
}

/// Accepts absolute `http(s)` references and enforces a document size cap.
#[derive(Debug, Clone)]
pub struct UrlMediaPolicy {
    max_document_size: u64,
}

impl UrlMediaPolicy {
    pub fn new(max_document_size: u64) -> Self {
        Self { max_document_size }
    }
}

impl MediaResolver for UrlMediaPolicy {
    /// Text passes through. Media references are parsed and stored in their
    /// normalized form.
    fn resolve(&self, body: MessageBody) -> Result<MessageBody, ValidationError> {
        let body = match body {
            MessageBody::Text(text) => MessageBody::Text(text),
            MessageBody::Image(media) => MessageBody::Image(MediaRef {
                url: check_reference(&media.url)?,
            }),
            MessageBody::Video(media) => MessageBody::Video(MediaRef {
                url: check_reference(&media.url)?,
            }),
            MessageBody::Audio(media) => MessageBody::Audio(MediaRef {
                url: check_reference(&media.url)?,
            }),
            MessageBody::Document(doc) => {
                if doc.size_bytes > self.max_document_size {
                    return Err(ValidationError::DocumentTooLarge {
                        size: doc.size_bytes,
                        max: self.max_document_size,
                    });
                }
                MessageBody::Document(DocumentDescriptor {
                    url: check_reference(&doc.url)?,
                    ..doc
                })
            }
        };
        Ok(body)
    }
}

/// Absolute `http(s)` URL with a host. Returns the normalized URL.
fn check_reference(raw: &str) -> Result<String, ValidationError> {
    let invalid = || ValidationError::InvalidReference(raw.to_string());

    let parsed = Url::parse(raw).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(parsed.into()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_passes_through() {
        let policy = UrlMediaPolicy::new(10);
        let body = MessageBody::Text("hello".into());
        assert_eq!(policy.resolve(body.clone()).unwrap(), body);
    }

    #[test]
    fn test_reference_scheme() {
        let policy = UrlMediaPolicy::new(10);
        let ok = MessageBody::Image(MediaRef {
            url: "https://cdn.example/i.png".into(),
        });
        assert!(policy.resolve(ok).is_ok());

        for bad in [
            "ftp://x/y",
            "https://",
            "javascript:alert(1)",
            "https://a b",
            "https://[oops",
            "http://:80",
            "https://a%zz",
            "/relative/path.png",
            "",
        ] {
            let body = MessageBody::Audio(MediaRef { url: bad.into() });
            assert!(
                matches!(policy.resolve(body), Err(ValidationError::InvalidReference(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_reference_is_normalized() {
        let policy = UrlMediaPolicy::new(10);
        let body = MessageBody::Video(MediaRef {
            url: "HTTPS://CDN.Example/clip one.mp4".into(),
        });
        assert_eq!(
            policy.resolve(body).unwrap(),
            MessageBody::Video(MediaRef {
                url: "https://cdn.example/clip%20one.mp4".into(),
            })
        );
    }

    #[test]
    fn test_document_reference_is_checked() {
        let policy = UrlMediaPolicy::new(100);
        let body = MessageBody::Document(DocumentDescriptor {
            url: "https://[oops".into(),
            file_name: "d.pdf".into(),
            size_bytes: 1,
            mime_type: None,
        });
        assert!(matches!(
            policy.resolve(body),
            Err(ValidationError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_document_size_cap() {
        let policy = UrlMediaPolicy::new(100);
        let doc = |size| {
            MessageBody::Document(DocumentDescriptor {
                url: "https://cdn/d.pdf".into(),
                file_name: "d.pdf".into(),
                size_bytes: size,
                mime_type: None,
            })
        };
        assert!(policy.resolve(doc(100)).is_ok());
        assert_eq!(
            policy.resolve(doc(101)),
            Err(ValidationError::DocumentTooLarge { size: 101, max: 100 })
        );
    }
}
