//! Offline notification fallback.
//!
//! Used only when the receiver has no live connection at send time. The
//! notification is a point-in-time record, not a queue: nothing retries it
//! and nothing deduplicates it against the message history.

use tracing::debug;

use courier_shared::constants::NOTIFICATION_PREVIEW_LEN;
use courier_shared::{
    Message, MessageBody, MessageKind, Notification, NotificationKind, PresenceProfile,
};

use crate::db::SharedDb;
use crate::error::ServerError;

pub fn classify(body: &MessageBody) -> MessageKind {
    body.kind()
}

/// Human-readable title and body for a message notification.
pub fn describe(sender_name: &str, body: &MessageBody) -> (String, String) {
    let title = format!("New message from {sender_name}");
    let text = match body {
        MessageBody::Text(text) => preview(text, NOTIFICATION_PREVIEW_LEN),
        MessageBody::Image(_) => "📷 Photo".to_string(),
        MessageBody::Video(_) => "🎥 Video".to_string(),
        MessageBody::Audio(_) => "🎤 Voice message".to_string(),
        MessageBody::Document(doc) => format!("📄 {}", doc.file_name),
    };
    (title, text)
}

fn preview(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

pub fn offline_notification(sender: &PresenceProfile, message: &Message) -> Notification {
    let (title, body) = describe(&sender.full_name, &message.body);
    Notification::new(
        message.receiver_id.clone(),
        NotificationKind::Message,
        title,
        body,
    )
    .with_sender(message.sender_id.clone())
    .with_message(message.id)
}

/// Persist one notification addressed to the message's receiver.
pub async fn notify_offline(
    db: &SharedDb,
    sender: &PresenceProfile,
    message: &Message,
) -> Result<Notification, ServerError> {
    let notification = offline_notification(sender, message);
    let stored = notification.clone();
    db.call(move |db| db.insert_notification(&stored)).await?;

    debug!(
        receiver = %message.receiver_id,
        message_id = %message.id,
        kind = %classify(&message.body),
        "Receiver offline, notification stored"
    );
    Ok(notification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_shared::{DocumentDescriptor, MediaRef, UserId};

    #[test]
    fn test_describe_each_kind() {
        let media = MediaRef {
            url: "https://cdn/x".into(),
        };
        let cases = vec![
            (MessageBody::Text("hi".into()), "hi".to_string()),
            (MessageBody::Image(media.clone()), "📷 Photo".to_string()),
            (MessageBody::Video(media.clone()), "🎥 Video".to_string()),
            (MessageBody::Audio(media), "🎤 Voice message".to_string()),
            (
                MessageBody::Document(DocumentDescriptor {
                    url: "https://cdn/r.pdf".into(),
                    file_name: "report.pdf".into(),
                    size_bytes: 1,
                    mime_type: None,
                }),
                "📄 report.pdf".to_string(),
            ),
        ];
        for (body, expected) in cases {
            let (title, text) = describe("Alice", &body);
            assert_eq!(title, "New message from Alice");
            assert_eq!(text, expected);
        }
    }

    #[test]
    fn test_long_text_is_truncated() {
        let long = "x".repeat(NOTIFICATION_PREVIEW_LEN + 10);
        let (_, text) = describe("A", &MessageBody::Text(long));
        assert_eq!(text.chars().count(), NOTIFICATION_PREVIEW_LEN + 1);
        assert!(text.ends_with('…'));
    }

    #[test]
    fn test_notification_references_message() {
        let a = UserId::parse("a").unwrap();
        let b = UserId::parse("b").unwrap();
        let msg = Message::new(a.clone(), b.clone(), MessageBody::Text("yo".into()));
        let profile = PresenceProfile {
            user_id: a.clone(),
            full_name: "Alice".into(),
            profile_pic: None,
        };
        let n = offline_notification(&profile, &msg);
        assert_eq!(n.user_id, b);
        assert_eq!(n.sender_id, Some(a));
        assert_eq!(n.message_id, Some(msg.id));
        assert_eq!(n.kind, NotificationKind::Message);
        assert!(n.title.contains("Alice"));
    }
}
