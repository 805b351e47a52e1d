use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::admins::AdminSet;
use crate::classifier::{classify, EnvelopeKind};
use crate::config::TextsConfig;
use crate::delivery::{AggregateOutcome, DeliveryDispatcher};
use crate::platform::{InboundMessage, Messenger};

/// Everything the update handler needs, built once in `main`.
pub struct AppState {
    pub admins: AdminSet,
    pub dispatcher: DeliveryDispatcher,
    pub texts: TextsConfig,
}

impl AppState {
    pub fn new(admins: AdminSet, messenger: Arc<dyn Messenger>, texts: TextsConfig) -> Self {
        Self {
            admins,
            dispatcher: DeliveryDispatcher::new(messenger),
            texts,
        }
    }
}

/// What happened to one inbound message.
#[derive(Debug, PartialEq)]
pub enum Handled {
    Welcomed,
    Ignored,
    Delivered(AggregateOutcome),
}

/// Classify, fan out, then tell the sender whether it worked.
pub async fn process_message(state: &AppState, msg: &InboundMessage) -> Handled {
    let envelope = classify(msg);

    match &envelope.kind {
        EnvelopeKind::Command(word) if word == "start" => {
            if let Err(e) = state.dispatcher.send_text(msg.chat_id, &state.texts.welcome).await {
                error!(chat_id = msg.chat_id, error = %e, "Failed to send welcome");
            }
            info!("User {} started the bot", msg.sender.id);
            return Handled::Welcomed;
        }
        EnvelopeKind::Command(word) => {
            debug!("Ignoring command /{} from {}", word, msg.sender.id);
            return Handled::Ignored;
        }
        _ if !envelope.is_deliverable() => {
            debug!("Ignoring unsupported message {} from {}", msg.message_id, msg.sender.id);
            return Handled::Ignored;
        }
        _ => {}
    }

    info!(
        sender_id = msg.sender.id,
        kind = ?envelope.kind,
        sent_at = %msg.timestamp,
        "New submission from {}",
        msg.sender.display_name
    );
    let outcome = state.dispatcher.deliver(&envelope, &state.admins).await;

    let ack = if outcome.is_success() {
        &state.texts.ack_success
    } else {
        warn!(
            "No admin received the submission ({} failures)",
            outcome.failures().len()
        );
        &state.texts.ack_failure
    };
    if let Err(e) = state.dispatcher.send_text(msg.chat_id, ack).await {
        error!(chat_id = msg.chat_id, error = %e, "Failed to acknowledge submission");
    }

    Handled::Delivered(outcome)
}
