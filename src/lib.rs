pub mod commands;
pub mod config;
pub mod decode;
pub mod errors;
pub mod event_handlers;
pub mod logging;
pub mod messages;
pub mod notify;
pub mod queue;
pub use queue::*;
pub mod registry;
pub mod resolve;
pub mod retry;
pub mod session;
pub use session::{QueueSnapshot, SessionConfig, SessionHandle};
pub mod sink;
pub mod track;
pub use track::*;

pub use errors::Error;

#[cfg(test)]
pub mod test;

//------------------------------------
// External library imports
//------------------------------------
use clap::Parser;
use poise::FrameworkError;
use songbird::SerenityInit;
use tokio::sync::oneshot;
use tracing::{error, info};
//------------------------------------
// Standard library imports
//------------------------------------
use std::sync::Arc;

use crate::config::{BotArgs, Cli, Commands};
use crate::decode::{Decoder, FfmpegDecoder};
use crate::notify::DiscordNotifier;
use crate::registry::SessionRegistry;
use crate::resolve::{TrackResolver, YtDlpExtractor};
use crate::sink::{SongbirdGateway, VoiceGateway};

//------------------------------------
// Constants
//------------------------------------
pub const EMPTY_QUEUE: &str = "The queue is empty.";
pub const UNKNOWN_TITLE: &str = "Unknown title";
pub const UNKNOWN_DURATION: &str = "??:??";

/// The data structure that will be available in all command contexts.
#[derive(Debug)]
pub struct Data {
    pub registry: Arc<SessionRegistry>,
    pub resolver: TrackResolver,
}

pub type Context<'a> = poise::Context<'a, Data, Error>;

async fn on_error(error: FrameworkError<'_, Data, Error>) {
    logging::log_command_error(&error).await;
    if let Err(e) = poise::builtins::on_error(error).await {
        error!("Error while handling error: {e}");
    }
}

/// Connect to Discord and serve commands until the client stops.
async fn run_bot(cli: &Cli, args: BotArgs) -> anyhow::Result<()> {
    let manager = songbird::Songbird::serenity();
    let gateway: Arc<dyn VoiceGateway> = Arc::new(SongbirdGateway::new(manager.clone()));
    let decoder: Arc<dyn Decoder> = Arc::new(FfmpegDecoder::new(&cli.ffmpeg));
    let resolver = TrackResolver::new(Arc::new(YtDlpExtractor::new(&cli.yt_dlp)));
    let session_config = args.session_config();
    let (registry_tx, mut registry_rx) = oneshot::channel::<Arc<SessionRegistry>>();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(args.prefix.clone()),
                ..Default::default()
            },
            pre_command: |ctx| Box::pin(logging::log_command_start(ctx)),
            post_command: |ctx| Box::pin(logging::log_command_end(ctx)),
            on_error: |error| Box::pin(on_error(error)),
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handlers::event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                let notifier = Arc::new(DiscordNotifier::new(ctx.http.clone()));
                let registry = SessionRegistry::new(gateway, decoder, notifier, session_config);
                let _ = registry_tx.send(registry.clone());
                Ok(Data { registry, resolver })
            })
        })
        .build();

    let intents = serenity::all::GatewayIntents::non_privileged()
        | serenity::all::GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::all::ClientBuilder::new(&args.token, intents)
        .framework(framework)
        .register_songbird_with(manager)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl-C: {e}");
            return;
        }
        info!("Received Ctrl-C, shutting down");
        if let Ok(registry) = registry_rx.try_recv() {
            registry.shutdown().await;
        }
        shard_manager.shutdown_all().await;
    });

    client.start().await?;
    info!("Client stopped");
    Ok(())
}

/// Match the CLI command and run the appropriate function.
async fn match_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command.clone() {
        Commands::Bot(args) => run_bot(&cli, args).await,
        Commands::Resolve { query } => {
            let resolver = TrackResolver::new(Arc::new(YtDlpExtractor::new(&cli.yt_dlp)));
            let track = resolver.resolve(&query).await?;
            println!("{track}");
            println!("{}", track.stream_url);
            if let Some(page) = &track.webpage_url {
                println!("{page}");
            }
            Ok(())
        }
    }
}

/// Run the CLI.
/// # Errors
/// Returns an error if logging cannot be set up or the command fails.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_dir).map_err(|e| anyhow::anyhow!(e))?;
    let name = match &cli.command {
        Commands::Bot(_) => "bot",
        Commands::Resolve { .. } => "resolve",
    };
    info!("Running CLI command: {name}");
    match_cli(cli).await
}
