use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::requests::Request;
use teloxide::types::{Me, MessageId};
use teloxide::{ApiError, RequestError};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bot::{self, AppState};
use crate::error::{DeliveryError, ReceiveError};
use crate::notifier::BotIdentity;
use crate::platform::{InboundMessage, MediaFlags, Messenger, Sender};
use crate::supervisor::ReceiveLoop;

/// Convert a Telegram message into the platform-neutral shape.
/// Messages without a sender (channel posts) are skipped.
pub fn inbound_from_message(msg: &Message) -> Option<InboundMessage> {
    let user = msg.from.as_ref()?;
    Some(InboundMessage {
        sender: Sender {
            id: user.id.0,
            display_name: user.first_name.clone(),
            handle: user.username.clone(),
        },
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        timestamp: msg.date,
        text: msg.text().map(str::to_string),
        caption: msg.caption().map(str::to_string),
        media: MediaFlags {
            photo: msg.photo().is_some(),
            video: msg.video().is_some(),
            document: msg.document().is_some(),
            voice: msg.voice().is_some(),
            audio: msg.audio().is_some(),
            animation: msg.animation().is_some(),
            sticker: msg.sticker().is_some(),
        },
    })
}

/// Outbound calls through the Bot API, each bounded by `timeout`.
#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
    timeout: Duration,
}

impl TelegramMessenger {
    pub fn new(bot: Bot, timeout: Duration) -> Self {
        Self { bot, timeout }
    }

    async fn bounded<T, E, F>(&self, request: F) -> Result<T, DeliveryError>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(DeliveryError::Platform(e.to_string())),
            Err(_) => Err(DeliveryError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(&self, chat_id: i64, body: &str) -> Result<(), DeliveryError> {
        self.bounded(self.bot.send_message(ChatId(chat_id), body).send())
            .await
            .map(|_| ())
    }

    async fn copy_with_caption(
        &self,
        dest_chat_id: i64,
        source_chat_id: i64,
        message_id: i32,
        caption: &str,
    ) -> Result<(), DeliveryError> {
        let request = self
            .bot
            .copy_message(ChatId(dest_chat_id), ChatId(source_chat_id), MessageId(message_id))
            .caption(caption);
        self.bounded(request.send()).await.map(|_| ())
    }
}

/// Long-polling receive loop built on teloxide's dispatcher.
pub struct TelegramReceiver {
    bot: Bot,
    state: Arc<AppState>,
    timeout: Duration,
}

impl TelegramReceiver {
    pub fn new(bot: Bot, state: Arc<AppState>, timeout: Duration) -> Self {
        Self {
            bot,
            state,
            timeout,
        }
    }
}

fn identity_of(me: &Me) -> BotIdentity {
    BotIdentity {
        id: me.user.id.0,
        username: me.username().to_string(),
    }
}

/// Errors polling cannot recover from by retrying on its own.
fn is_fatal(err: &RequestError) -> bool {
    matches!(
        err,
        RequestError::Api(ApiError::InvalidToken)
            | RequestError::Api(ApiError::TerminatedByOtherGetUpdates)
    )
}

#[async_trait]
impl ReceiveLoop for TelegramReceiver {
    async fn connect(&mut self) -> Result<BotIdentity, ReceiveError> {
        match tokio::time::timeout(self.timeout, self.bot.get_me().send()).await {
            Ok(Ok(me)) => Ok(identity_of(&me)),
            Ok(Err(e)) => Err(ReceiveError::Connect(e.to_string())),
            Err(_) => Err(ReceiveError::Connect(format!(
                "getMe timed out after {:?}",
                self.timeout
            ))),
        }
    }

    async fn run(&mut self, shutdown: CancellationToken) -> Result<(), ReceiveError> {
        info!("Starting Telegram polling...");

        let handler = Update::filter_message().endpoint(handle_message);
        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![self.state.clone()])
            .default_handler(|upd| async move {
                warn!("Unhandled update: {:?}", upd.id);
            })
            .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
            .build();
        let stop = dispatcher.shutdown_token();

        let fatal = CancellationToken::new();
        let reason: Arc<OnceCell<String>> = Arc::new(OnceCell::new());
        let listener_errors = {
            let fatal = fatal.clone();
            let reason = reason.clone();
            Arc::new(move |err: RequestError| {
                let fatal = fatal.clone();
                let reason = reason.clone();
                async move {
                    if is_fatal(&err) {
                        error!("Polling cannot continue: {}", err);
                        let _ = reason.set(err.to_string());
                        fatal.cancel();
                    } else {
                        warn!("Polling error: {}", err);
                    }
                }
            })
        };

        // Building the listener calls the Bot API; an interrupt must not wait on it.
        let listener = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Shutdown requested before polling started");
                return Ok(());
            }
            listener = teloxide::update_listeners::polling_default(self.bot.clone()) => listener,
        };
        let dispatch = dispatcher.dispatch_with_listener(listener, listener_errors);
        tokio::pin!(dispatch);

        let outcome = tokio::select! {
            _ = &mut dispatch => return Err(ReceiveError::LoopExited),
            _ = shutdown.cancelled() => Ok(()),
            _ = fatal.cancelled() => Err(ReceiveError::Platform(
                reason.get().cloned().unwrap_or_else(|| "polling failed".to_string()),
            )),
        };

        if stop.shutdown().is_err() {
            debug!("Dispatcher was idle when asked to stop");
        }
        dispatch.await;
        outcome
    }
}

async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let inbound = match inbound_from_message(&msg) {
        Some(inbound) => inbound,
        None => return Ok(()),
    };
    bot::process_message(&state, &inbound).await;
    Ok(())
}
