//! The voice output sink and the gateway that hands sinks out. songbird
//! provides the production implementation.
use async_trait::async_trait;
use serenity::all::{ChannelId, GuildId};
use songbird::input::{Input, RawAdapter};
use songbird::tracks::TrackHandle;
use songbird::{Call, Event, Songbird, TrackEvent};
use std::sync::Arc;
use symphonia::core::io::ReadOnlySource;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::decode::{PcmStream, CHANNELS, SAMPLE_RATE};
use crate::errors::{DecodeStartError, JoinError};
use crate::event_handlers::TrackEndForwarder;

/// Reported by a sink when the stream it was given stops producing audio.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackEnded {
    /// Identifies which `play` call this belongs to.
    pub generation: u64,
    pub error: Option<String>,
}

/// Where a sink reports the end of a stream.
#[derive(Clone, Debug)]
pub struct CompletionSender {
    pub generation: u64,
    tx: UnboundedSender<PlaybackEnded>,
}

impl CompletionSender {
    #[must_use]
    pub fn new(generation: u64, tx: UnboundedSender<PlaybackEnded>) -> Self {
        Self { generation, tx }
    }

    /// Report completion. A closed session simply drops the event.
    pub fn finished(&self, error: Option<String>) {
        let _ = self.tx.send(PlaybackEnded {
            generation: self.generation,
            error,
        });
    }
}

/// An audio output connected to one voice channel.
#[async_trait]
pub trait VoiceSink: Send + Sync {
    /// Start playing `frames`, replacing anything currently playing.
    async fn play(
        &self,
        frames: PcmStream,
        volume: f32,
        done: CompletionSender,
    ) -> Result<(), DecodeStartError>;
    async fn pause(&self);
    async fn resume(&self);
    async fn stop(&self);
    async fn set_volume(&self, volume: f32);
}

/// Connects sinks to voice channels.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Connect to `channel`, or move an existing connection there.
    async fn connect(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> Result<Arc<dyn VoiceSink>, JoinError>;
    async fn disconnect(&self, guild: GuildId) -> Result<(), JoinError>;
}

/// [`VoiceGateway`] backed by the songbird voice manager.
#[derive(Clone)]
pub struct SongbirdGateway {
    manager: Arc<Songbird>,
}

impl SongbirdGateway {
    #[must_use]
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn connect(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> Result<Arc<dyn VoiceSink>, JoinError> {
        let call = self
            .manager
            .join(guild, channel)
            .await
            .map_err(|e| JoinError::Connect(e.to_string()))?;
        Ok(Arc::new(SongbirdSink::new(call)))
    }

    async fn disconnect(&self, guild: GuildId) -> Result<(), JoinError> {
        if self.manager.get(guild).is_none() {
            return Ok(());
        }
        self.manager
            .remove(guild)
            .await
            .map_err(|e| JoinError::Connect(e.to_string()))
    }
}

/// A songbird call playing one track at a time.
pub struct SongbirdSink {
    call: Arc<Mutex<Call>>,
    track: std::sync::Mutex<Option<TrackHandle>>,
}

impl SongbirdSink {
    #[must_use]
    pub fn new(call: Arc<Mutex<Call>>) -> Self {
        Self {
            call,
            track: std::sync::Mutex::new(None),
        }
    }

    fn current(&self) -> Option<TrackHandle> {
        self.track.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl VoiceSink for SongbirdSink {
    async fn play(
        &self,
        frames: PcmStream,
        volume: f32,
        done: CompletionSender,
    ) -> Result<(), DecodeStartError> {
        let source = ReadOnlySource::new(frames.into_reader());
        let input: Input = RawAdapter::new(source, SAMPLE_RATE, CHANNELS).into();

        let handle = {
            let mut call = self.call.lock().await;
            call.stop();
            call.play_input(input)
        };
        let sink_err = |e: songbird::tracks::ControlError| DecodeStartError::Sink(e.to_string());
        handle.set_volume(volume).map_err(sink_err)?;
        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndForwarder::new(done.clone()),
            )
            .map_err(sink_err)?;
        handle
            .add_event(Event::Track(TrackEvent::Error), TrackEndForwarder::new(done))
            .map_err(sink_err)?;

        if let Ok(mut slot) = self.track.lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    async fn pause(&self) {
        if let Some(track) = self.current() {
            if let Err(e) = track.pause() {
                warn!("Could not pause track: {e}");
            }
        }
    }

    async fn resume(&self) {
        if let Some(track) = self.current() {
            if let Err(e) = track.play() {
                warn!("Could not resume track: {e}");
            }
        }
    }

    async fn stop(&self) {
        let track = self.track.lock().ok().and_then(|mut slot| slot.take());
        if let Some(track) = track {
            // Already-finished tracks report an error here; that is fine.
            if let Err(e) = track.stop() {
                debug!("Track stop: {e}");
            }
        }
    }

    async fn set_volume(&self, volume: f32) {
        if let Some(track) = self.current() {
            if let Err(e) = track.set_volume(volume) {
                warn!("Could not set volume: {e}");
            }
        }
    }
}
