use async_trait::async_trait;
use serenity::all::{
    ChannelId, ComponentInteraction, Context as SerenityContext, CreateInteractionResponse,
    CreateInteractionResponseFollowup, CreateInteractionResponseMessage, FullEvent, GuildId,
    Interaction, UserId, VoiceState,
};
use songbird::tracks::PlayMode;
use songbird::{Event, EventContext, EventHandler as VoiceEventHandler};
use tracing::{debug, info, warn};

use crate::errors::SessionError;
use crate::messages::{control_rows, ControlAction};
use crate::registry::DestroyReason;
use crate::session::{SessionHandle, VOLUME_STEP};
use crate::{Data, Error};

/// Forwards songbird's end and error events for one track to its session.
pub struct TrackEndForwarder {
    done: crate::sink::CompletionSender,
}

impl TrackEndForwarder {
    #[must_use]
    pub fn new(done: crate::sink::CompletionSender) -> Self {
        Self { done }
    }
}

#[async_trait]
impl VoiceEventHandler for TrackEndForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.first().and_then(|(state, _)| {
                match &state.playing {
                    PlayMode::Errored(e) => Some(e.to_string()),
                    _ => None,
                }
            }),
            _ => None,
        };
        self.done.finished(error);
        None
    }
}

/// Framework-level event handler for voice-state changes and control buttons.
pub async fn event_handler(
    ctx: &SerenityContext,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        FullEvent::Ready { data_about_bot } => {
            info!("{} is connected!", data_about_bot.user.name);
        }
        FullEvent::VoiceStateUpdate { old, new } => {
            voice_state_update(ctx, data, old.as_ref(), new).await;
        }
        FullEvent::InteractionCreate {
            interaction: Interaction::Component(component),
        } => {
            if let Some(action) = ControlAction::from_custom_id(&component.data.custom_id) {
                control_button(ctx, data, component, action).await?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Destroy the session when the last human leaves its channel.
async fn voice_state_update(
    ctx: &SerenityContext,
    data: &Data,
    old: Option<&VoiceState>,
    new: &VoiceState,
) {
    let Some(guild_id) = new.guild_id else {
        return;
    };
    let Some(channel) = data.registry.voice_channel(guild_id) else {
        return;
    };
    if !left_channel(old.and_then(|state| state.channel_id), new.channel_id, channel) {
        return;
    }
    let humans = humans_in_channel(ctx, guild_id, channel);
    debug!("{humans:?} listeners left in {channel} of guild {guild_id}");
    if humans == Some(0) {
        info!("Channel {channel} in guild {guild_id} is empty, leaving");
        data.registry
            .destroy(guild_id, DestroyReason::ChannelEmpty)
            .await;
    }
}

/// Whether a voice-state change moved someone out of `channel`.
#[must_use]
pub fn left_channel(old: Option<ChannelId>, new: Option<ChannelId>, channel: ChannelId) -> bool {
    old == Some(channel) && new != Some(channel)
}

/// One member's voice state, reduced to what empty-channel detection needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Listener {
    pub user_id: UserId,
    pub channel_id: Option<ChannelId>,
    /// `None` when the member is not cached.
    pub bot: Option<bool>,
}

/// Members in `channel` that are neither us nor known bots.
#[must_use]
pub fn count_humans(
    listeners: impl IntoIterator<Item = Listener>,
    channel: ChannelId,
    own_id: UserId,
) -> usize {
    listeners
        .into_iter()
        .filter(|l| l.channel_id == Some(channel))
        .filter(|l| l.user_id != own_id)
        .filter(|l| l.bot != Some(true))
        .count()
}

/// Non-bot members in `channel`, or `None` when the guild is not cached.
fn humans_in_channel(ctx: &SerenityContext, guild_id: GuildId, channel: ChannelId) -> Option<usize> {
    let own_id = ctx.cache.current_user().id;
    let guild = ctx.cache.guild(guild_id)?;
    let listeners = guild.voice_states.values().map(|state| Listener {
        user_id: state.user_id,
        channel_id: state.channel_id,
        bot: state
            .member
            .as_ref()
            .map(|member| member.user.bot)
            .or_else(|| guild.members.get(&state.user_id).map(|m| m.user.bot)),
    });
    Some(count_humans(listeners, channel, own_id))
}

async fn control_button(
    ctx: &SerenityContext,
    data: &Data,
    component: &ComponentInteraction,
    action: ControlAction,
) -> Result<(), Error> {
    let session = component
        .guild_id
        .and_then(|guild_id| data.registry.get(guild_id));
    let Some(session) = session else {
        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content("I'm not connected to a voice channel.")
                .ephemeral(true),
        );
        if let Err(e) = component.create_response(&ctx.http, response).await {
            warn!("Could not answer button press: {e}");
        }
        return Ok(());
    };

    let _ = session.set_text_channel(component.channel_id).await;
    let reply = apply_control(&session, action).await;
    debug!(
        "Button {:?} from {} answered: {reply}",
        action, component.user.name
    );

    // Redraw the buttons so the loop label and play/pause availability
    // match the session, then answer privately.
    let update = match session.snapshot().await {
        Ok(snapshot) => CreateInteractionResponseMessage::new()
            .components(control_rows(snapshot.loop_mode, snapshot.state)),
        Err(_) => CreateInteractionResponseMessage::new(),
    };
    if let Err(e) = component
        .create_response(&ctx.http, CreateInteractionResponse::UpdateMessage(update))
        .await
    {
        warn!("Could not update controls: {e}");
        return Ok(());
    }
    let followup = CreateInteractionResponseFollowup::new()
        .content(reply)
        .ephemeral(true);
    if let Err(e) = component.create_followup(&ctx.http, followup).await {
        warn!("Could not answer button press: {e}");
    }
    Ok(())
}

/// Run a control button's session operation and describe the outcome.
pub async fn apply_control(session: &SessionHandle, action: ControlAction) -> String {
    let outcome = match action {
        ControlAction::Play => session.resume().await.map(|()| "Resumed playback.".to_string()),
        ControlAction::Pause => session.pause().await.map(|()| "Paused playback.".to_string()),
        ControlAction::Skip => session
            .skip()
            .await
            .map(|track| format!("Skipped **{}**.", track.title)),
        ControlAction::Stop => session
            .stop()
            .await
            .map(|()| "Cleared queue and stopped music.".to_string()),
        ControlAction::VolumeDown => session
            .nudge_volume(-VOLUME_STEP)
            .await
            .map(volume_reply),
        ControlAction::VolumeUp => session
            .nudge_volume(VOLUME_STEP)
            .await
            .map(volume_reply),
        ControlAction::Loop => session
            .cycle_loop_mode()
            .await
            .map(|mode| format!("Loop mode: {mode}")),
    };
    outcome.unwrap_or_else(describe_session_error)
}

#[must_use]
pub fn volume_reply(volume: f32) -> String {
    format!("Volume set to {:.0}%", volume * 100.0)
}

#[must_use]
pub fn describe_session_error(e: SessionError) -> String {
    match e {
        SessionError::NotPlaying => "Nothing is playing right now.".to_string(),
        SessionError::NotPaused => "Playback is not paused.".to_string(),
        SessionError::Closed => "I'm not connected to a voice channel.".to_string(),
    }
}
