//! Owns the guild to session mapping. Create and destroy for one guild are
//! serialized behind a per-guild lock so a racing join and leave cannot
//! leak a session or its decoder.
use dashmap::DashMap;
use serenity::all::{ChannelId, GuildId};
use std::fmt::{self, Display};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::decode::Decoder;
use crate::errors::{Error, JoinError};
use crate::notify::Notifier;
use crate::retry::RetryPolicy;
use crate::session::{Enqueued, PlaybackSession, SessionConfig, SessionHandle, SessionParts};
use crate::sink::{VoiceGateway, VoiceSink};
use crate::{PlaybackState, Track};

/// Why a session was torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestroyReason {
    Leave,
    ChannelEmpty,
    Idle,
    Shutdown,
}

impl Display for DestroyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DestroyReason::Leave => "leave requested",
            DestroyReason::ChannelEmpty => "channel empty",
            DestroyReason::Idle => "idle timeout",
            DestroyReason::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

struct Entry {
    handle: SessionHandle,
    voice_channel: ChannelId,
    task: JoinHandle<()>,
}

pub struct SessionRegistry {
    sessions: DashMap<GuildId, Entry>,
    locks: DashMap<GuildId, Arc<Mutex<()>>>,
    gateway: Arc<dyn VoiceGateway>,
    decoder: Arc<dyn Decoder>,
    notifier: Arc<dyn Notifier>,
    config: SessionConfig,
    join_policy: RetryPolicy,
    idle_tx: mpsc::UnboundedSender<GuildId>,
}

impl SessionRegistry {
    /// Build the registry and start its idle reaper.
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        decoder: Arc<dyn Decoder>,
        notifier: Arc<dyn Notifier>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Self::with_join_policy(gateway, decoder, notifier, config, RetryPolicy::JOIN)
    }

    pub fn with_join_policy(
        gateway: Arc<dyn VoiceGateway>,
        decoder: Arc<dyn Decoder>,
        notifier: Arc<dyn Notifier>,
        config: SessionConfig,
        join_policy: RetryPolicy,
    ) -> Arc<Self> {
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SessionRegistry {
            sessions: DashMap::new(),
            locks: DashMap::new(),
            gateway,
            decoder,
            notifier,
            config,
            join_policy,
            idle_tx,
        });
        tokio::spawn(reap_idle(Arc::downgrade(&registry), idle_rx));
        registry
    }

    fn guild_lock(&self, guild: GuildId) -> Arc<Mutex<()>> {
        self.locks.entry(guild).or_default().clone()
    }

    /// Return the guild's session, creating it or moving it to
    /// `voice_channel` as needed. `text_channel` becomes where the session
    /// posts its notifications.
    #[instrument(skip(self))]
    pub async fn get_or_create(
        &self,
        guild: GuildId,
        voice_channel: ChannelId,
        text_channel: ChannelId,
    ) -> Result<SessionHandle, JoinError> {
        let lock = self.guild_lock(guild);
        let _guard = lock.lock().await;
        self.ensure_session(guild, voice_channel, text_channel).await
    }

    /// Like [`Self::get_or_create`], then add `track`. The guild lock is held
    /// throughout so an idle teardown cannot close the session in between.
    #[instrument(skip(self, track), fields(title = %track.title))]
    pub async fn play(
        &self,
        guild: GuildId,
        voice_channel: ChannelId,
        text_channel: ChannelId,
        track: Track,
    ) -> Result<Enqueued, Error> {
        let lock = self.guild_lock(guild);
        let _guard = lock.lock().await;
        let session = self
            .ensure_session(guild, voice_channel, text_channel)
            .await?;
        session.enqueue(track).await
    }

    /// Must be called with the guild lock held.
    async fn ensure_session(
        &self,
        guild: GuildId,
        voice_channel: ChannelId,
        text_channel: ChannelId,
    ) -> Result<SessionHandle, JoinError> {
        let existing = self
            .sessions
            .get(&guild)
            .map(|entry| (entry.handle.clone(), entry.voice_channel));
        if let Some((handle, current)) = existing {
            if current != voice_channel {
                // songbird keeps one call per guild and moves it in place.
                self.connect(guild, voice_channel).await?;
                if let Some(mut entry) = self.sessions.get_mut(&guild) {
                    entry.voice_channel = voice_channel;
                }
                info!("Moved guild {guild} session to channel {voice_channel}");
            }
            let _ = handle.set_text_channel(text_channel).await;
            return Ok(handle);
        }

        let sink = match self.connect(guild, voice_channel).await {
            Ok(sink) => sink,
            Err(e) => {
                // A failed join can leave a half-open call behind.
                self.disconnect(guild).await;
                return Err(e);
            }
        };
        let (handle, task) = PlaybackSession::spawn(SessionParts {
            guild_id: guild,
            text_channel,
            sink,
            decoder: self.decoder.clone(),
            notifier: self.notifier.clone(),
            config: self.config.clone(),
            idle_tx: self.idle_tx.clone(),
        });
        self.sessions.insert(
            guild,
            Entry {
                handle: handle.clone(),
                voice_channel,
                task,
            },
        );
        info!("Created session for guild {guild} in channel {voice_channel}");
        Ok(handle)
    }

    async fn connect(
        &self,
        guild: GuildId,
        channel: ChannelId,
    ) -> Result<Arc<dyn VoiceSink>, JoinError> {
        self.join_policy
            .run(
                "voice join",
                |_| self.gateway.connect(guild, channel),
                |_| true,
            )
            .await
            .map_err(|e| JoinError::Exhausted {
                attempts: self.join_policy.max_attempts,
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self, guild: GuildId) {
        if let Err(e) = self.gateway.disconnect(guild).await {
            warn!("Could not disconnect from guild {guild}: {e}");
        }
    }

    /// Stop the guild's session, release its decoder and disconnect. Returns
    /// whether a session was destroyed. Without a session any voice
    /// connection left in the guild is still dropped. An idle teardown is
    /// skipped when the session found something to play in the meantime.
    #[instrument(skip(self))]
    pub async fn destroy(&self, guild: GuildId, reason: DestroyReason) -> bool {
        let lock = self.guild_lock(guild);
        let _guard = lock.lock().await;

        let handle = self.sessions.get(&guild).map(|entry| entry.handle.clone());
        let Some(handle) = handle else {
            self.disconnect(guild).await;
            return false;
        };
        if reason == DestroyReason::Idle {
            match handle.snapshot().await {
                Ok(snapshot) if snapshot.state != PlaybackState::Idle => {
                    debug!("Guild {guild} is busy again, keeping its session");
                    return false;
                }
                _ => {}
            }
        }
        let Some((_, entry)) = self.sessions.remove(&guild) else {
            return false;
        };
        if entry.handle.shutdown().await.is_err() {
            debug!("Session for guild {guild} had already ended");
        }
        if let Err(e) = entry.task.await {
            warn!("Session task for guild {guild} failed: {e}");
        }
        self.disconnect(guild).await;
        info!("Destroyed session for guild {guild} ({reason})");
        true
    }

    #[must_use]
    pub fn get(&self, guild: GuildId) -> Option<SessionHandle> {
        self.sessions.get(&guild).map(|entry| entry.handle.clone())
    }

    /// The voice channel the guild's session is connected to.
    #[must_use]
    pub fn voice_channel(&self, guild: GuildId) -> Option<ChannelId> {
        self.sessions.get(&guild).map(|entry| entry.voice_channel)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Destroy every session.
    pub async fn shutdown(&self) {
        let guilds: Vec<GuildId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        info!("Shutting down {} sessions", guilds.len());
        futures::future::join_all(
            guilds
                .into_iter()
                .map(|guild| self.destroy(guild, DestroyReason::Shutdown)),
        )
        .await;
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

async fn reap_idle(registry: Weak<SessionRegistry>, mut idle: mpsc::UnboundedReceiver<GuildId>) {
    while let Some(guild) = idle.recv().await {
        let Some(registry) = registry.upgrade() else {
            break;
        };
        if registry.get(guild).is_none() {
            continue;
        }
        registry.destroy(guild, DestroyReason::Idle).await;
    }
}
