pub mod telegram;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DeliveryError;

/// Who sent a message
#[derive(Debug, Clone, PartialEq)]
pub struct Sender {
    pub id: u64,
    pub display_name: String,
    pub handle: Option<String>,
}

/// Attachment kinds present on an inbound message, as reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaFlags {
    pub photo: bool,
    pub video: bool,
    pub document: bool,
    pub voice: bool,
    pub audio: bool,
    pub animation: bool,
    pub sticker: bool,
}

/// A message received from the platform
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender: Sender,
    pub chat_id: i64,
    pub message_id: i32,
    pub timestamp: DateTime<Utc>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub media: MediaFlags,
}

/// Outbound side of the messaging platform.
///
/// Shared as `Arc<dyn Messenger>` between concurrent fan-out calls, the
/// startup announcement and sender acknowledgments.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: i64, body: &str) -> Result<(), DeliveryError>;

    /// Re-send `message_id` from `source_chat_id` to `dest_chat_id` with its caption replaced.
    async fn copy_with_caption(
        &self,
        dest_chat_id: i64,
        source_chat_id: i64,
        message_id: i32,
        caption: &str,
    ) -> Result<(), DeliveryError>;
}
