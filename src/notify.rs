//! Status messages posted to a guild's text channel, and the loop that
//! keeps the "now playing" message animated.
use async_trait::async_trait;
use serenity::all::{ChannelId, CreateMessage, EditMessage, Http, MessageId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::NotificationError;
use crate::messages::{
    control_rows, now_playing_embed, palette_colour, queue_ended_embed, random_colour,
};
use crate::{LoopMode, PlaybackState, Track};

/// Delay before retrying a failed refresh.
pub const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Posts and maintains session status messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post a "now playing" message and return its id.
    async fn now_playing(
        &self,
        channel: ChannelId,
        track: &Track,
        loop_mode: LoopMode,
    ) -> Result<MessageId, NotificationError>;

    /// Redraw a "now playing" message for the given animation frame.
    async fn refresh(
        &self,
        channel: ChannelId,
        message: MessageId,
        track: &Track,
        frame: usize,
    ) -> Result<(), NotificationError>;

    async fn queue_ended(&self, channel: ChannelId) -> Result<(), NotificationError>;

    async fn notice(&self, channel: ChannelId, text: &str) -> Result<(), NotificationError>;

    async fn delete(&self, channel: ChannelId, message: MessageId) -> Result<(), NotificationError>;
}

/// Map a serenity failure onto the notification error kinds.
#[must_use]
pub fn classify(err: &serenity::Error) -> NotificationError {
    if let serenity::Error::Http(http) = err {
        match http.status_code().map(|code| code.as_u16()) {
            Some(404) => return NotificationError::NotFound,
            Some(403) => return NotificationError::Forbidden,
            _ => {}
        }
    }
    NotificationError::Http(err.to_string())
}

/// [`Notifier`] that talks to Discord over HTTP.
#[derive(Clone)]
pub struct DiscordNotifier {
    http: Arc<Http>,
}

impl DiscordNotifier {
    #[must_use]
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn now_playing(
        &self,
        channel: ChannelId,
        track: &Track,
        loop_mode: LoopMode,
    ) -> Result<MessageId, NotificationError> {
        let message = CreateMessage::new()
            .embed(now_playing_embed(track, random_colour()))
            .components(control_rows(loop_mode, PlaybackState::Playing));
        channel
            .send_message(&self.http, message)
            .await
            .map(|msg| msg.id)
            .map_err(|e| classify(&e))
    }

    async fn refresh(
        &self,
        channel: ChannelId,
        message: MessageId,
        track: &Track,
        frame: usize,
    ) -> Result<(), NotificationError> {
        let edit = EditMessage::new().embed(now_playing_embed(track, palette_colour(frame)));
        channel
            .edit_message(&self.http, message, edit)
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }

    async fn queue_ended(&self, channel: ChannelId) -> Result<(), NotificationError> {
        channel
            .send_message(&self.http, CreateMessage::new().embed(queue_ended_embed()))
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }

    async fn notice(&self, channel: ChannelId, text: &str) -> Result<(), NotificationError> {
        channel
            .say(&self.http, text)
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }

    async fn delete(&self, channel: ChannelId, message: MessageId) -> Result<(), NotificationError> {
        channel
            .delete_message(&self.http, message)
            .await
            .map_err(|e| classify(&e))
    }
}

/// Spawn the task that animates a "now playing" message. It ends by itself
/// once the message is gone or unreachable; otherwise abort it.
pub fn spawn_refresh(
    notifier: Arc<dyn Notifier>,
    channel: ChannelId,
    message: MessageId,
    track: Track,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(refresh_loop(notifier, channel, message, track, interval))
}

async fn refresh_loop(
    notifier: Arc<dyn Notifier>,
    channel: ChannelId,
    message: MessageId,
    track: Track,
    interval: Duration,
) {
    let mut frame = 0;
    loop {
        tokio::time::sleep(interval).await;
        match notifier.refresh(channel, message, &track, frame).await {
            Ok(()) => frame += 1,
            Err(e) if e.is_terminal() => {
                debug!("Refresh of message {message} ended: {e}");
                return;
            }
            Err(e) => {
                warn!("Refresh of message {message} failed, retrying: {e}");
                tokio::time::sleep(REFRESH_RETRY_DELAY).await;
            }
        }
    }
}
