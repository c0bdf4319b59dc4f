use poise::CreateReply;
use serenity::all::{ChannelId, Mentionable};
use tracing::info;

use crate::event_handlers::{describe_session_error, volume_reply};
use crate::messages::{added_embed, control_rows, controls_embed, queue_embed};
use crate::registry::DestroyReason;
use crate::session::{Enqueued, SessionHandle};
use crate::{Context, Error, LoopMode, PlaybackState};

const NOT_CONNECTED: &str = "I'm not connected to a voice channel.";
const NOT_IN_VOICE: &str = "You need to be in a voice channel first.";

/// Loop mode as offered to users.
#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum LoopChoice {
    #[name = "off"]
    Off,
    #[name = "single"]
    Single,
    #[name = "queue"]
    Queue,
}

impl From<LoopChoice> for LoopMode {
    fn from(choice: LoopChoice) -> Self {
        match choice {
            LoopChoice::Off => LoopMode::Off,
            LoopChoice::Single => LoopMode::Single,
            LoopChoice::Queue => LoopMode::Queue,
        }
    }
}

/// The voice channel the invoking user is sitting in.
fn author_voice_channel(ctx: Context<'_>) -> Option<ChannelId> {
    let guild = ctx.guild()?;
    let channel = guild
        .voice_states
        .get(&ctx.author().id)
        .and_then(|state| state.channel_id);
    channel
}

/// The guild's session, with notifications following this command's channel.
async fn current_session(ctx: Context<'_>) -> Result<Option<SessionHandle>, Error> {
    let guild_id = ctx.guild_id().ok_or(Error::NotInGuild)?;
    let Some(session) = ctx.data().registry.get(guild_id) else {
        return Ok(None);
    };
    session.set_text_channel(ctx.channel_id()).await?;
    Ok(Some(session))
}

/// Joins your voice channel
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn join(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or(Error::NotInGuild)?;
    let Some(channel) = author_voice_channel(ctx) else {
        ctx.say(NOT_IN_VOICE).await?;
        return Ok(());
    };
    ctx.data()
        .registry
        .get_or_create(guild_id, channel, ctx.channel_id())
        .await?;
    ctx.say(format!("Joined {}", channel.mention())).await?;
    Ok(())
}

/// Leaves the voice channel and drops the queue
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn leave(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or(Error::NotInGuild)?;
    if ctx
        .data()
        .registry
        .destroy(guild_id, DestroyReason::Leave)
        .await
    {
        ctx.say("Left voice channel").await?;
    } else {
        ctx.say(NOT_CONNECTED).await?;
    }
    Ok(())
}

/// Plays a song from a URL or search terms
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn play(
    ctx: Context<'_>,
    #[description = "URL or search terms"]
    #[rest]
    query: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or(Error::NotInGuild)?;
    let Some(channel) = author_voice_channel(ctx) else {
        ctx.say(NOT_IN_VOICE).await?;
        return Ok(());
    };
    ctx.defer().await?;

    let track = ctx
        .data()
        .resolver
        .resolve(&query)
        .await?
        .with_requester(ctx.author().id);
    let outcome = ctx
        .data()
        .registry
        .play(guild_id, channel, ctx.channel_id(), track.clone())
        .await?;

    match outcome {
        Enqueued::Started => {
            info!("Started {} in guild {guild_id}", track.title);
            ctx.say(format!("Playing **{}**", track.title)).await?;
        }
        Enqueued::Queued(position) => {
            ctx.send(CreateReply::default().embed(added_embed(&track, position)))
                .await?;
        }
    }
    Ok(())
}

/// Pauses the current song
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn pause(ctx: Context<'_>) -> Result<(), Error> {
    let reply = match current_session(ctx).await? {
        Some(session) => match session.pause().await {
            Ok(()) => "Paused playback.".to_string(),
            Err(e) => describe_session_error(e),
        },
        None => NOT_CONNECTED.to_string(),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Resumes a paused song
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn resume(ctx: Context<'_>) -> Result<(), Error> {
    let reply = match current_session(ctx).await? {
        Some(session) => match session.resume().await {
            Ok(()) => "Resumed playback.".to_string(),
            Err(e) => describe_session_error(e),
        },
        None => NOT_CONNECTED.to_string(),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Skips the current song
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn skip(ctx: Context<'_>) -> Result<(), Error> {
    let reply = match current_session(ctx).await? {
        Some(session) => match session.skip().await {
            Ok(track) => format!("Skipped **{}**.", track.title),
            Err(e) => describe_session_error(e),
        },
        None => NOT_CONNECTED.to_string(),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Stops playback and clears the queue
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn stop(ctx: Context<'_>) -> Result<(), Error> {
    let reply = match current_session(ctx).await? {
        Some(session) => {
            session.stop().await?;
            "Cleared queue and stopped music.".to_string()
        }
        None => NOT_CONNECTED.to_string(),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Sets the playback volume
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn volume(
    ctx: Context<'_>,
    #[description = "Volume in percent"]
    #[min = 0]
    #[max = 200]
    percent: u16,
) -> Result<(), Error> {
    let reply = match current_session(ctx).await? {
        Some(session) => {
            let applied = session.set_volume(f32::from(percent) / 100.0).await?;
            volume_reply(applied)
        }
        None => NOT_CONNECTED.to_string(),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Sets the loop mode
#[poise::command(slash_command, prefix_command, guild_only, rename = "loop")]
pub async fn loop_mode(
    ctx: Context<'_>,
    #[description = "off, single or queue"] mode: LoopChoice,
) -> Result<(), Error> {
    let reply = match current_session(ctx).await? {
        Some(session) => {
            let mode = LoopMode::from(mode);
            session.set_loop_mode(mode).await?;
            format!("Loop mode: {mode}")
        }
        None => NOT_CONNECTED.to_string(),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Shows the current song and the queue
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn queue(ctx: Context<'_>) -> Result<(), Error> {
    match current_session(ctx).await? {
        Some(session) => {
            let snapshot = session.snapshot().await?;
            ctx.send(CreateReply::default().embed(queue_embed(&snapshot)))
                .await?;
        }
        None => {
            ctx.say(NOT_CONNECTED).await?;
        }
    }
    Ok(())
}

/// Shows the playback control buttons
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn controls(ctx: Context<'_>) -> Result<(), Error> {
    let (loop_mode, state) = match current_session(ctx).await? {
        Some(session) => {
            let snapshot = session.snapshot().await?;
            (snapshot.loop_mode, snapshot.state)
        }
        None => (LoopMode::default(), PlaybackState::Idle),
    };
    ctx.send(
        CreateReply::default()
            .embed(controls_embed())
            .components(control_rows(loop_mode, state)),
    )
    .await?;
    Ok(())
}
