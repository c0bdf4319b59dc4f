use crate::{Context, Data, Error, Track};
use poise::FrameworkError;
use serenity::all::{ChannelId, GuildId};
use std::path::Path;
use std::time::Instant;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::FilterFn;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    prelude::*,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log directory name
pub const LOG_DIR: &str = "logs";
/// Command log file name
pub const COMMAND_LOG_FILE: &str = "commands";
/// Track log file name
pub const TRACK_LOG_FILE: &str = "tracks";
/// Error log file name
pub const ERROR_LOG_FILE: &str = "errors";

pub const COMMAND_TARGET: &str = "tunebot::command";
pub const TRACK_TARGET: &str = "tunebot::track";
const DEFAULT_FILTER: &str = "info,serenity=error,songbird=warn";

/// Initialize the logging system with console and file outputs
pub fn init(log_dir: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir)?;
    }

    // Set up file appenders with daily rotation
    let command_file = RollingFileAppender::new(Rotation::DAILY, log_dir, COMMAND_LOG_FILE);
    let track_file = RollingFileAppender::new(Rotation::DAILY, log_dir, TRACK_LOG_FILE);
    let error_file = RollingFileAppender::new(Rotation::DAILY, log_dir, ERROR_LOG_FILE);

    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    let command_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(command_file)
        .with_filter(FilterFn::new(|metadata| metadata.target() == COMMAND_TARGET));

    let track_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(track_file)
        .with_filter(FilterFn::new(|metadata| metadata.target() == TRACK_TARGET));

    let error_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(error_file)
        .with_filter(FilterFn::new(|metadata| {
            metadata.target().starts_with("tunebot") && metadata.level() == &tracing::Level::ERROR
        }));

    // RUST_LOG wins; otherwise keep serenity's heartbeat chatter out.
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(command_layer)
        .with(track_layer)
        .with(error_layer)
        .try_init()?;

    info!("Logging system initialized");
    Ok(())
}

fn guild_label(guild_id: Option<GuildId>) -> String {
    guild_id
        .map(|id| id.get().to_string())
        .unwrap_or_else(|| "DM".to_string())
}

/// Log the start of a command execution (pre-command hook)
pub async fn log_command_start(ctx: Context<'_>) {
    ctx.set_invocation_data(Instant::now()).await;

    let args = if ctx.command().parameters.is_empty() {
        String::new()
    } else {
        ctx.invocation_string()
    };

    info!(
        target: COMMAND_TARGET,
        command = %ctx.command().qualified_name,
        guild_id = %guild_label(ctx.guild_id()),
        user_id = %ctx.author().id,
        arguments = %args,
        event = "start",
        "Command execution started"
    );
}

/// Log the end of a command execution (post-command hook)
pub async fn log_command_end(ctx: Context<'_>) {
    let duration_ms = ctx
        .invocation_data::<Instant>()
        .await
        .map(|start| start.elapsed().as_millis() as u64)
        .unwrap_or(0);

    info!(
        target: COMMAND_TARGET,
        command = %ctx.command().qualified_name,
        guild_id = %guild_label(ctx.guild_id()),
        user_id = %ctx.author().id,
        duration_ms,
        event = "end",
        "Command execution completed"
    );
}

/// Log errors that occur during command execution
pub async fn log_command_error(error: &FrameworkError<'_, Data, Error>) {
    match error {
        FrameworkError::Command { error, ctx, .. } => {
            error!(
                target: "tunebot::error",
                command = %ctx.command().qualified_name,
                guild_id = %guild_label(ctx.guild_id()),
                user_id = %ctx.author().id,
                error = %error,
                "Command error"
            );
        }
        FrameworkError::CommandCheckFailed { error, ctx, .. } => {
            let error_msg = error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Check failed".to_string());

            error!(
                target: "tunebot::error",
                command = %ctx.command().qualified_name,
                guild_id = %guild_label(ctx.guild_id()),
                user_id = %ctx.author().id,
                error = %error_msg,
                "Command check failed"
            );
        }
        err => {
            error!(
                target: "tunebot::error",
                error = %err,
                "Other framework error"
            );
        }
    }
}

/// Log a track play event
pub fn log_track_play(guild_id: GuildId, channel_id: ChannelId, track: &Track, volume: f32) {
    let user_id = track
        .requested_by
        .map(|id| id.to_string())
        .unwrap_or_default();

    info!(
        target: TRACK_TARGET,
        guild_id = %guild_id,
        user_id = %user_id,
        channel_id = %channel_id,
        track_title = %track.title,
        duration = %track.duration_string(),
        volume,
        "Track played"
    );
}
