use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::session::SessionConfig;

/// Command line and environment configuration.
#[derive(Parser, Debug, Clone)]
#[command(
    version,
    about = "A Discord music bot with one playback queue per server."
)]
pub struct Cli {
    /// Path to the ffmpeg executable.
    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg", global = true)]
    pub ffmpeg: PathBuf,

    /// Path to the yt-dlp executable.
    #[arg(long, env = "YTDLP_PATH", default_value = "yt-dlp", global = true)]
    pub yt_dlp: PathBuf,

    /// Directory for the JSON log files.
    #[arg(long, env = "TUNEBOT_LOG_DIR", default_value = crate::logging::LOG_DIR, global = true)]
    pub log_dir: PathBuf,

    /// The command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// The command to run.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Connect to Discord and serve music commands.
    Bot(BotArgs),
    /// Resolve a query to a playable track and print it.
    Resolve {
        /// A URL or free text search.
        query: String,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct BotArgs {
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Prefix for text commands.
    #[arg(long, env = "TUNEBOT_PREFIX", default_value = "!")]
    pub prefix: String,

    /// Seconds without playback before leaving voice. 0 never leaves.
    #[arg(long, env = "TUNEBOT_IDLE_TIMEOUT", default_value_t = 300)]
    pub idle_timeout: u64,

    /// Seconds between redraws of the "now playing" message.
    #[arg(long, env = "TUNEBOT_REFRESH_INTERVAL", default_value_t = 2,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub refresh_interval: u64,

    /// Volume new sessions start at, in percent.
    #[arg(long, env = "TUNEBOT_DEFAULT_VOLUME", default_value_t = 100,
          value_parser = clap::value_parser!(u16).range(0..=200))]
    pub default_volume: u16,
}

impl BotArgs {
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            idle_timeout: (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout)),
            refresh_interval: Duration::from_secs(self.refresh_interval),
            default_volume: f32::from(self.default_volume) / 100.0,
        }
    }
}
