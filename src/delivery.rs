use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info};

use crate::admins::{AdminId, AdminSet};
use crate::classifier::{Envelope, EnvelopeKind};
use crate::error::DeliveryError;
use crate::platform::{Messenger, Sender};

/// Telegram caption limit, in UTF-16 code units.
pub const CAPTION_LIMIT: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub admin: AdminId,
    pub result: Result<(), DeliveryError>,
}

/// Per-admin results for one envelope, in admin order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOutcome {
    pub outcomes: Vec<DeliveryOutcome>,
}

impl AggregateOutcome {
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> Vec<(AdminId, &DeliveryError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.admin, e)))
            .collect()
    }

    /// The sender is told "delivered" when at least one admin got it.
    pub fn is_success(&self) -> bool {
        self.success_count() > 0
    }
}

/// Fans envelopes out to every admin. One admin failing never stops the others.
pub struct DeliveryDispatcher {
    messenger: Arc<dyn Messenger>,
}

impl DeliveryDispatcher {
    pub fn new(messenger: Arc<dyn Messenger>) -> Self {
        Self { messenger }
    }

    pub async fn deliver(&self, envelope: &Envelope, admins: &AdminSet) -> AggregateOutcome {
        let payload = match Payload::for_envelope(envelope) {
            Some(payload) => payload,
            None => {
                debug!("Envelope {:?} is not deliverable", envelope.kind);
                return AggregateOutcome::default();
            }
        };

        let sends = admins.iter().map(|admin| {
            let payload = &payload;
            async move {
                let result = self.send_one(admin, envelope, payload).await;
                if let Err(e) = &result {
                    error!(admin_id = %admin, error = %e, "Failed to deliver submission");
                }
                DeliveryOutcome { admin, result }
            }
        });
        let outcomes = join_all(sends).await;

        let aggregate = AggregateOutcome { outcomes };
        info!(
            sender_id = envelope.sender.id,
            delivered = aggregate.success_count(),
            failed = aggregate.outcomes.len() - aggregate.success_count(),
            "Submission fan-out finished"
        );
        aggregate
    }

    /// Plain text to one chat, used for acknowledgments and the startup announcement.
    pub async fn send_text(&self, chat_id: i64, body: &str) -> Result<(), DeliveryError> {
        self.messenger.send_text(chat_id, body).await
    }

    async fn send_one(
        &self,
        admin: AdminId,
        envelope: &Envelope,
        payload: &Payload,
    ) -> Result<(), DeliveryError> {
        match payload {
            Payload::Text(body) => self.messenger.send_text(admin.0, body).await,
            Payload::Copy(caption) => {
                self.messenger
                    .copy_with_caption(admin.0, envelope.chat_id, envelope.message_id, caption)
                    .await
            }
        }
    }
}

enum Payload {
    Text(String),
    Copy(String),
}

impl Payload {
    fn for_envelope(envelope: &Envelope) -> Option<Self> {
        match &envelope.kind {
            EnvelopeKind::Text => Some(Payload::Text(compose(
                &envelope.sender,
                BodyLabel::Message,
                &envelope.body,
            ))),
            EnvelopeKind::Media(_) => {
                let caption = compose(&envelope.sender, BodyLabel::Caption, &envelope.body);
                Some(Payload::Copy(truncate_utf16(&caption, CAPTION_LIMIT).to_string()))
            }
            EnvelopeKind::Command(_) | EnvelopeKind::Unsupported => None,
        }
    }
}

#[derive(Clone, Copy)]
enum BodyLabel {
    Message,
    Caption,
}

fn header(sender: &Sender) -> String {
    let mut out = String::from("📨 New submission\n\n");
    out.push_str(&format!("👤 From: {}", sender.display_name));
    if let Some(handle) = &sender.handle {
        out.push_str(&format!(" (@{})", handle));
    }
    out.push_str(&format!("\n🆔 ID: {}\n", sender.id));
    out
}

fn compose(sender: &Sender, label: BodyLabel, body: &str) -> String {
    let mut out = header(sender);
    if !body.is_empty() {
        let label = match label {
            BodyLabel::Message => "Message",
            BodyLabel::Caption => "Caption",
        };
        out.push_str(&format!("\n📝 {}:\n{}", label, body));
    }
    out
}

/// Longest prefix of `text` that fits in `limit` UTF-16 code units without
/// splitting a character.
pub fn truncate_utf16(text: &str, limit: usize) -> &str {
    let mut units = 0;
    for (idx, ch) in text.char_indices() {
        units += ch.len_utf16();
        if units > limit {
            return &text[..idx];
        }
    }
    text
}
