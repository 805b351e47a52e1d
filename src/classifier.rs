use crate::platform::{InboundMessage, Sender};

pub const COMMAND_PREFIX: char = '/';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Voice,
    Audio,
    Animation,
    Sticker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Text starting with `/`, carrying the command word without the prefix.
    Command(String),
    Text,
    Media(MediaKind),
    Unsupported,
}

/// Typed view of one inbound message. Built once by [`classify`], never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    /// Message text for `Text`, caption (or empty) for `Media`.
    pub body: String,
    pub sender: Sender,
    pub chat_id: i64,
    pub message_id: i32,
}

impl Envelope {
    /// Only text and media envelopes reach the admins.
    pub fn is_deliverable(&self) -> bool {
        matches!(self.kind, EnvelopeKind::Text | EnvelopeKind::Media(_))
    }
}

pub fn classify(msg: &InboundMessage) -> Envelope {
    let (kind, body) = resolve(msg);
    Envelope {
        kind,
        body,
        sender: msg.sender.clone(),
        chat_id: msg.chat_id,
        message_id: msg.message_id,
    }
}

fn resolve(msg: &InboundMessage) -> (EnvelopeKind, String) {
    if let Some(text) = msg.text.as_deref() {
        if let Some(rest) = text.strip_prefix(COMMAND_PREFIX) {
            let word = command_word(rest);
            return (EnvelopeKind::Command(word), String::new());
        }
    }

    if let Some(media) = media_kind(msg) {
        let body = msg.caption.clone().unwrap_or_default();
        return (EnvelopeKind::Media(media), body);
    }

    match msg.text.as_deref() {
        Some(text) if !text.is_empty() => (EnvelopeKind::Text, text.to_string()),
        _ => (EnvelopeKind::Unsupported, String::new()),
    }
}

/// First set flag in photo, video, document, voice, audio, animation, sticker order.
fn media_kind(msg: &InboundMessage) -> Option<MediaKind> {
    let flags = &msg.media;
    [
        (flags.photo, MediaKind::Photo),
        (flags.video, MediaKind::Video),
        (flags.document, MediaKind::Document),
        (flags.voice, MediaKind::Voice),
        (flags.audio, MediaKind::Audio),
        (flags.animation, MediaKind::Animation),
        (flags.sticker, MediaKind::Sticker),
    ]
    .into_iter()
    .find_map(|(set, kind)| set.then_some(kind))
}

// "/start@my_bot arg" -> "start"
fn command_word(rest: &str) -> String {
    let word = rest.split_whitespace().next().unwrap_or("");
    let word = word.split('@').next().unwrap_or("");
    word.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::inbound;
    use crate::platform::MediaFlags;

    #[test]
    fn test_command_takes_precedence() {
        let mut msg = inbound();
        msg.text = Some("/start".to_string());
        let env = classify(&msg);
        assert_eq!(env.kind, EnvelopeKind::Command("start".to_string()));
        assert!(!env.is_deliverable());
    }

    #[test]
    fn test_command_word_strips_bot_mention_and_args() {
        let mut msg = inbound();
        msg.text = Some("/Start@suggest_bot hello there".to_string());
        assert_eq!(
            classify(&msg).kind,
            EnvelopeKind::Command("start".to_string())
        );
    }

    #[test]
    fn test_photo_with_caption_is_media() {
        let mut msg = inbound();
        msg.caption = Some("look at this".to_string());
        msg.media.photo = true;
        let env = classify(&msg);
        assert_eq!(env.kind, EnvelopeKind::Media(MediaKind::Photo));
        assert_eq!(env.body, "look at this");
    }

    #[test]
    fn test_media_flag_order() {
        let mut msg = inbound();
        msg.media = MediaFlags {
            document: true,
            sticker: true,
            video: true,
            ..Default::default()
        };
        assert_eq!(classify(&msg).kind, EnvelopeKind::Media(MediaKind::Video));

        msg.media = MediaFlags {
            animation: true,
            sticker: true,
            ..Default::default()
        };
        assert_eq!(
            classify(&msg).kind,
            EnvelopeKind::Media(MediaKind::Animation)
        );
    }

    #[test]
    fn test_media_without_caption_has_empty_body() {
        let mut msg = inbound();
        msg.media.voice = true;
        let env = classify(&msg);
        assert_eq!(env.kind, EnvelopeKind::Media(MediaKind::Voice));
        assert!(env.body.is_empty());
    }

    #[test]
    fn test_plain_text() {
        let mut msg = inbound();
        msg.text = Some("hello".to_string());
        let env = classify(&msg);
        assert_eq!(env.kind, EnvelopeKind::Text);
        assert_eq!(env.body, "hello");
        assert_eq!(env.sender.display_name, "Alice");
        assert!(env.is_deliverable());
    }

    #[test]
    fn test_empty_message_is_unsupported() {
        let env = classify(&inbound());
        assert_eq!(env.kind, EnvelopeKind::Unsupported);
        assert!(!env.is_deliverable());

        let mut msg = inbound();
        msg.text = Some(String::new());
        assert_eq!(classify(&msg).kind, EnvelopeKind::Unsupported);
    }

    #[test]
    fn test_caption_without_media_is_unsupported() {
        let mut msg = inbound();
        msg.caption = Some("orphan caption".to_string());
        assert_eq!(classify(&msg).kind, EnvelopeKind::Unsupported);
    }
}
