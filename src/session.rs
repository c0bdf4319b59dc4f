//! The per-guild playback session: one task that owns the queue, the
//! current track, the live decoder and the voice sink, driven by commands
//! from the control surface and by completion events from the sink.
use serenity::all::{ChannelId, GuildId, MessageId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::decode::{DecodeHandle, Decoder};
use crate::errors::{DecodeStartError, Error, SessionError};
use crate::logging::{log_track_play, TRACK_TARGET};
use crate::notify::{spawn_refresh, Notifier, REFRESH_RETRY_DELAY};
use crate::sink::{CompletionSender, PlaybackEnded, VoiceSink};
use crate::{LoopMode, PlaybackState, Track, TrackQueue};

pub const MIN_VOLUME: f32 = 0.0;
pub const MAX_VOLUME: f32 = 2.0;
pub const DEFAULT_VOLUME: f32 = 1.0;
/// Step used by the volume buttons.
pub const VOLUME_STEP: f32 = 0.1;
const COMMAND_BUFFER: usize = 32;

/// Clamp a requested volume into the supported range.
#[must_use]
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return DEFAULT_VOLUME;
    }
    volume.clamp(MIN_VOLUME, MAX_VOLUME)
}

/// Tunables shared by every session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    /// Leave after this long without anything to play. `None` never leaves.
    pub idle_timeout: Option<Duration>,
    /// How often the "now playing" message is redrawn.
    pub refresh_interval: Duration,
    pub default_volume: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(5 * 60)),
            refresh_interval: Duration::from_secs(2),
            default_volume: DEFAULT_VOLUME,
        }
    }
}

/// Point-in-time view of a session for display.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub pending: Vec<Track>,
    pub loop_mode: LoopMode,
    pub volume: f32,
    pub state: PlaybackState,
}

/// Result of adding a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueued {
    /// The session was idle and the track is now playing.
    Started,
    /// Waiting at this 1-based position of the pending queue.
    Queued(usize),
}

enum Command {
    Enqueue(Track, oneshot::Sender<Result<Enqueued, DecodeStartError>>),
    Pause(oneshot::Sender<Result<(), SessionError>>),
    Resume(oneshot::Sender<Result<(), SessionError>>),
    Skip(oneshot::Sender<Result<Track, SessionError>>),
    Stop(oneshot::Sender<()>),
    SetVolume(f32, oneshot::Sender<f32>),
    NudgeVolume(f32, oneshot::Sender<f32>),
    SetLoopMode(LoopMode, oneshot::Sender<()>),
    CycleLoopMode(oneshot::Sender<LoopMode>),
    SetTextChannel(ChannelId),
    Snapshot(oneshot::Sender<QueueSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Cheap, cloneable access to a running [`PlaybackSession`].
#[derive(Clone, Debug)]
pub struct SessionHandle {
    guild_id: GuildId,
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    #[must_use]
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Whether both handles drive the same session.
    #[must_use]
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Add a track; starts playback when the session is idle. A track that
    /// fails to start is dropped and the session stays idle.
    pub async fn enqueue(&self, track: Track) -> Result<Enqueued, Error> {
        Ok(self.request(|tx| Command::Enqueue(track, tx)).await??)
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.request(Command::Pause).await?
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(Command::Resume).await?
    }

    /// Skip the current track, returning it.
    pub async fn skip(&self) -> Result<Track, SessionError> {
        self.request(Command::Skip).await?
    }

    /// Clear everything and go idle. The session stays alive.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(Command::Stop).await
    }

    /// Set the volume, returning the clamped value applied.
    pub async fn set_volume(&self, volume: f32) -> Result<f32, SessionError> {
        self.request(|tx| Command::SetVolume(volume, tx)).await
    }

    /// Change the volume by `delta`, returning the new clamped value.
    pub async fn nudge_volume(&self, delta: f32) -> Result<f32, SessionError> {
        self.request(|tx| Command::NudgeVolume(delta, tx)).await
    }

    pub async fn set_loop_mode(&self, mode: LoopMode) -> Result<(), SessionError> {
        self.request(|tx| Command::SetLoopMode(mode, tx)).await
    }

    /// Advance the loop mode to the next one, returning it.
    pub async fn cycle_loop_mode(&self) -> Result<LoopMode, SessionError> {
        self.request(Command::CycleLoopMode).await
    }

    /// Post future notifications to `channel`.
    pub async fn set_text_channel(&self, channel: ChannelId) -> Result<(), SessionError> {
        self.tx
            .send(Command::SetTextChannel(channel))
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot, SessionError> {
        self.request(Command::Snapshot).await
    }

    /// Release the decoder and sink and end the session task.
    pub(crate) async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(Command::Shutdown).await
    }
}

/// State of one guild's playback. Lives inside its own task; reach it
/// through a [`SessionHandle`].
pub struct PlaybackSession {
    guild_id: GuildId,
    text_channel: ChannelId,
    queue: TrackQueue,
    current: Option<Track>,
    loop_mode: LoopMode,
    volume: f32,
    state: PlaybackState,
    sink: Arc<dyn VoiceSink>,
    decoder: Arc<dyn Decoder>,
    notifier: Arc<dyn Notifier>,
    decode: Option<DecodeHandle>,
    notification: Option<MessageId>,
    refresher: Option<AbortHandle>,
    generation: u64,
    done_tx: mpsc::UnboundedSender<PlaybackEnded>,
    idle_since: Option<Instant>,
    idle_tx: mpsc::UnboundedSender<GuildId>,
    config: SessionConfig,
}

/// Everything a new session needs.
pub struct SessionParts {
    pub guild_id: GuildId,
    pub text_channel: ChannelId,
    pub sink: Arc<dyn VoiceSink>,
    pub decoder: Arc<dyn Decoder>,
    pub notifier: Arc<dyn Notifier>,
    pub config: SessionConfig,
    /// Receives the guild id when the session has been idle too long.
    pub idle_tx: mpsc::UnboundedSender<GuildId>,
}

impl PlaybackSession {
    /// Start the session task.
    pub fn spawn(parts: SessionParts) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let session = PlaybackSession {
            guild_id: parts.guild_id,
            text_channel: parts.text_channel,
            queue: TrackQueue::new(),
            current: None,
            loop_mode: LoopMode::Off,
            volume: clamp_volume(parts.config.default_volume),
            state: PlaybackState::Idle,
            sink: parts.sink,
            decoder: parts.decoder,
            notifier: parts.notifier,
            decode: None,
            notification: None,
            refresher: None,
            generation: 0,
            done_tx,
            idle_since: Some(Instant::now()),
            idle_tx: parts.idle_tx,
            config: parts.config,
        };
        let task = tokio::spawn(session.run(rx, done_rx));
        let handle = SessionHandle {
            guild_id: parts.guild_id,
            tx,
        };
        (handle, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut done: mpsc::UnboundedReceiver<PlaybackEnded>,
    ) {
        debug!("Session for guild {} started", self.guild_id);
        loop {
            let idle_deadline = self.idle_deadline();
            tokio::select! {
                biased;
                Some(ended) = done.recv() => self.on_playback_ended(ended).await,
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        self.teardown().await;
                        break;
                    };
                    if let Command::Shutdown(ack) = cmd {
                        self.teardown().await;
                        let _ = ack.send(());
                        break;
                    }
                    self.handle(cmd).await;
                }
                () = sleep_until(idle_deadline), if idle_deadline.is_some() => {
                    self.on_idle_timeout().await;
                }
            }
        }
        debug!("Session for guild {} ended", self.guild_id);
    }

    fn idle_deadline(&self) -> Option<Instant> {
        let timeout = self.config.idle_timeout?;
        self.idle_since.map(|since| since + timeout)
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Enqueue(track, reply) => {
                let outcome = self.enqueue(track).await;
                let _ = reply.send(outcome);
            }
            Command::Pause(reply) => {
                let _ = reply.send(self.pause().await);
            }
            Command::Resume(reply) => {
                let _ = reply.send(self.resume().await);
            }
            Command::Skip(reply) => {
                let _ = reply.send(self.skip().await);
            }
            Command::Stop(reply) => {
                self.stop().await;
                let _ = reply.send(());
            }
            Command::SetVolume(volume, reply) => {
                let _ = reply.send(self.set_volume(volume).await);
            }
            Command::NudgeVolume(delta, reply) => {
                let _ = reply.send(self.set_volume(self.volume + delta).await);
            }
            Command::SetLoopMode(mode, reply) => {
                self.loop_mode = mode;
                let _ = reply.send(());
            }
            Command::CycleLoopMode(reply) => {
                self.loop_mode = self.loop_mode.next();
                let _ = reply.send(self.loop_mode);
            }
            Command::SetTextChannel(channel) => self.text_channel = channel,
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown(reply) => {
                // Handled in `run`.
                let _ = reply.send(());
            }
        }
    }

    #[instrument(skip(self, track), fields(guild = %self.guild_id, title = %track.title))]
    async fn enqueue(&mut self, track: Track) -> Result<Enqueued, DecodeStartError> {
        let position = self.queue.enqueue(track);
        if self.state != PlaybackState::Idle {
            return Ok(Enqueued::Queued(position));
        }
        // Idle sessions hold no pending tracks, so this starts the new one.
        match self.advance(false).await {
            Some(e) => Err(e),
            None => Ok(Enqueued::Started),
        }
    }

    /// Finish the current track according to the loop mode and start the
    /// next pending one, or go idle when nothing is left. Returns the last
    /// start failure when the session ends up idle because of one.
    async fn advance(&mut self, announce_failures: bool) -> Option<DecodeStartError> {
        self.release_playback().await;

        let was_playing = self.current.is_some();
        if let Some(finished) = self.current.take() {
            match self.loop_mode {
                LoopMode::Single => self.queue.push_front(finished),
                LoopMode::Queue => self.queue.push_back(finished),
                LoopMode::Off => {}
            }
        }

        let mut failure = None;
        while let Some(next) = self.queue.dequeue() {
            match self.start(&next).await {
                Ok(()) => {
                    self.now_playing(next).await;
                    return None;
                }
                Err(e) => {
                    error!(
                        target: TRACK_TARGET,
                        guild_id = %self.guild_id,
                        track_title = %next.title,
                        error = %e,
                        "Track failed to start"
                    );
                    if announce_failures {
                        self.notice(&format!("Could not play **{}**: {e}", next.title))
                            .await;
                    }
                    failure = Some(e);
                }
            }
        }
        self.finish_queue(was_playing).await;
        failure
    }

    async fn start(&mut self, track: &Track) -> Result<(), DecodeStartError> {
        let mut decode = self.decoder.start(track).await?;
        let Some(frames) = decode.take_frames() else {
            decode.stop().await;
            return Err(DecodeStartError::MissingOutput);
        };
        self.generation += 1;
        let done = CompletionSender::new(self.generation, self.done_tx.clone());
        if let Err(e) = self.sink.play(frames, self.volume, done).await {
            decode.stop().await;
            return Err(e);
        }
        self.decode = Some(decode);
        Ok(())
    }

    async fn now_playing(&mut self, track: Track) {
        log_track_play(self.guild_id, self.text_channel, &track, self.volume);
        self.state = PlaybackState::Playing;
        self.idle_since = None;
        self.clear_notification().await;
        match self
            .notifier
            .now_playing(self.text_channel, &track, self.loop_mode)
            .await
        {
            Ok(message) => {
                self.notification = Some(message);
                let task = spawn_refresh(
                    self.notifier.clone(),
                    self.text_channel,
                    message,
                    track.clone(),
                    self.config.refresh_interval,
                );
                self.refresher = Some(task.abort_handle());
            }
            Err(e) => warn!("Could not post now playing in guild {}: {e}", self.guild_id),
        }
        self.current = Some(track);
    }

    /// Go idle. The queue end is only announced if something was playing.
    async fn finish_queue(&mut self, announce: bool) {
        self.current = None;
        self.state = PlaybackState::Idle;
        self.idle_since = Some(Instant::now());
        self.clear_notification().await;
        if !announce {
            return;
        }
        if let Err(e) = self.notifier.queue_ended(self.text_channel).await {
            warn!("Could not post queue end in guild {}: {e}", self.guild_id);
        }
        info!("Queue finished in guild {}", self.guild_id);
    }

    async fn on_playback_ended(&mut self, ended: PlaybackEnded) {
        if ended.generation != self.generation || self.state == PlaybackState::Idle {
            debug!(
                "Ignoring stale completion {} (current {})",
                ended.generation, self.generation
            );
            return;
        }
        if let Some(err) = &ended.error {
            error!("Playback error in guild {}: {err}", self.guild_id);
            self.notice(&format!("Playback error: {err}")).await;
        }
        self.advance(true).await;
    }

    async fn pause(&mut self) -> Result<(), SessionError> {
        if self.state != PlaybackState::Playing {
            return Err(SessionError::NotPlaying);
        }
        self.sink.pause().await;
        self.state = PlaybackState::Paused;
        info!("Paused playback in guild {}", self.guild_id);
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), SessionError> {
        if self.state != PlaybackState::Paused {
            return Err(SessionError::NotPaused);
        }
        self.sink.resume().await;
        self.state = PlaybackState::Playing;
        info!("Resumed playback in guild {}", self.guild_id);
        Ok(())
    }

    async fn skip(&mut self) -> Result<Track, SessionError> {
        let Some(current) = self.current.clone() else {
            return Err(SessionError::NotPlaying);
        };
        info!("Skipping {} in guild {}", current.title, self.guild_id);
        self.advance(true).await;
        Ok(current)
    }

    async fn stop(&mut self) {
        self.queue.clear();
        self.release_playback().await;
        self.current = None;
        self.clear_notification().await;
        if self.state != PlaybackState::Idle {
            self.idle_since = Some(Instant::now());
        }
        self.state = PlaybackState::Idle;
        info!("Cleared queue and stopped music in guild {}", self.guild_id);
    }

    async fn set_volume(&mut self, volume: f32) -> f32 {
        self.volume = clamp_volume(volume);
        if self.decode.is_some() {
            self.sink.set_volume(self.volume).await;
        }
        info!("Set volume to {:.0}% in guild {}", self.volume * 100.0, self.guild_id);
        self.volume
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current.clone(),
            pending: self.queue.snapshot(),
            loop_mode: self.loop_mode,
            volume: self.volume,
            state: self.state,
        }
    }

    async fn on_idle_timeout(&mut self) {
        self.idle_since = None;
        info!("Guild {} idle, leaving voice", self.guild_id);
        self.notice("Leaving the voice channel due to inactivity.")
            .await;
        let _ = self.idle_tx.send(self.guild_id);
    }

    /// Stop the sink and wait for the decoder to be gone. Any completion
    /// still in flight for it becomes stale.
    async fn release_playback(&mut self) {
        self.generation += 1;
        self.sink.stop().await;
        if let Some(mut decode) = self.decode.take() {
            decode.stop().await;
        }
    }

    async fn clear_notification(&mut self) {
        if let Some(task) = self.refresher.take() {
            task.abort();
        }
        let Some(message) = self.notification.take() else {
            return;
        };
        match self.notifier.delete(self.text_channel, message).await {
            Ok(()) => {}
            Err(e) if e.is_terminal() => debug!("Message {message} already gone: {e}"),
            Err(e) => {
                warn!("Could not delete message {message}, retrying: {e}");
                tokio::time::sleep(REFRESH_RETRY_DELAY).await;
                if let Err(e) = self.notifier.delete(self.text_channel, message).await {
                    warn!("Could not delete message {message}: {e}");
                }
            }
        }
    }

    async fn notice(&self, text: &str) {
        if let Err(e) = self.notifier.notice(self.text_channel, text).await {
            warn!("Could not post notice in guild {}: {e}", self.guild_id);
        }
    }

    async fn teardown(&mut self) {
        self.queue.clear();
        self.release_playback().await;
        self.current = None;
        self.clear_notification().await;
        self.state = PlaybackState::Idle;
        self.idle_since = None;
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
