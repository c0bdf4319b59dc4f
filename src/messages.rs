//! Embeds and buttons shown to users.
use rand::Rng;
use serenity::all::{
    ButtonStyle, CreateActionRow, CreateButton, CreateEmbed, CreateEmbedFooter,
};

use crate::{build_display, LoopMode, PlaybackState, QueueSnapshot, Track};

pub const RED: u32 = 0xE7_4C_3C;
pub const ORANGE: u32 = 0xE6_7E_22;
pub const YELLOW: u32 = 0xF1_C4_0F;
pub const GREEN: u32 = 0x2E_CC_71;
pub const BLUE: u32 = 0x34_98_DB;
pub const PURPLE: u32 = 0x9B_59_B6;

/// Colours the now-playing embed cycles through while a track plays.
pub const PALETTE: [u32; 6] = [RED, ORANGE, YELLOW, GREEN, BLUE, PURPLE];

/// Prefix of every control button's custom id.
pub const CONTROL_PREFIX: &str = "tunebot:";

#[must_use]
pub fn random_colour() -> u32 {
    rand::rng().random_range(0..=0x00FF_FFFF)
}

#[must_use]
pub fn palette_colour(frame: usize) -> u32 {
    PALETTE[frame % PALETTE.len()]
}

#[must_use]
pub fn now_playing_embed(track: &Track, colour: u32) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title("Now Playing")
        .description(format!("🎵 {}\n**Queue Position:** 1", track.title))
        .colour(colour)
        .footer(CreateEmbedFooter::new(
            "Use the buttons below to control playback",
        ));
    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }
    if track.duration.is_some() {
        embed = embed.field("Duration", track.duration_string(), true);
    }
    embed
}

#[must_use]
pub fn queue_ended_embed() -> CreateEmbed {
    CreateEmbed::new()
        .title("Queue Ended")
        .description("No more tracks in queue")
        .colour(RED)
}

#[must_use]
pub fn added_embed(track: &Track, position: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title("Added to Queue")
        .description(format!("🎵 {}\n**Queue Position:** {position}", track.title))
        .colour(BLUE);
    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }
    embed
}

#[must_use]
pub fn queue_embed(snapshot: &QueueSnapshot) -> CreateEmbed {
    CreateEmbed::new()
        .title("Current Queue")
        .description(build_display(snapshot.current.as_ref(), &snapshot.pending))
        .field("Loop", snapshot.loop_mode.to_string(), true)
        .field("Volume", format!("{:.0}%", snapshot.volume * 100.0), true)
        .colour(BLUE)
}

#[must_use]
pub fn controls_embed() -> CreateEmbed {
    CreateEmbed::new()
        .title("Music Controls")
        .description("Control the music playback using these buttons")
        .colour(random_colour())
}

/// What a control button does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlAction {
    Play,
    Pause,
    Skip,
    Stop,
    VolumeDown,
    VolumeUp,
    Loop,
}

impl ControlAction {
    pub const ALL: [ControlAction; 7] = [
        ControlAction::Play,
        ControlAction::Pause,
        ControlAction::Skip,
        ControlAction::Stop,
        ControlAction::VolumeDown,
        ControlAction::VolumeUp,
        ControlAction::Loop,
    ];

    fn key(self) -> &'static str {
        match self {
            ControlAction::Play => "play",
            ControlAction::Pause => "pause",
            ControlAction::Skip => "skip",
            ControlAction::Stop => "stop",
            ControlAction::VolumeDown => "voldown",
            ControlAction::VolumeUp => "volup",
            ControlAction::Loop => "loop",
        }
    }

    #[must_use]
    pub fn custom_id(self) -> String {
        format!("{CONTROL_PREFIX}{}", self.key())
    }

    #[must_use]
    pub fn from_custom_id(id: &str) -> Option<Self> {
        let key = id.strip_prefix(CONTROL_PREFIX)?;
        Self::ALL.into_iter().find(|action| action.key() == key)
    }

    fn button(self, loop_mode: LoopMode, state: PlaybackState) -> CreateButton {
        let (label, style, emoji) = match self {
            ControlAction::Play => ("Play".to_string(), ButtonStyle::Success, '▶'),
            ControlAction::Pause => ("Pause".to_string(), ButtonStyle::Primary, '⏸'),
            ControlAction::Skip => ("Skip".to_string(), ButtonStyle::Danger, '⏭'),
            ControlAction::Stop => ("Stop".to_string(), ButtonStyle::Danger, '⏹'),
            ControlAction::VolumeDown => ("Vol Down".to_string(), ButtonStyle::Secondary, '🔉'),
            ControlAction::VolumeUp => ("Vol Up".to_string(), ButtonStyle::Secondary, '🔊'),
            ControlAction::Loop => (format!("Loop {loop_mode}"), ButtonStyle::Success, '🔁'),
        };
        let disabled = match self {
            ControlAction::Play => state != PlaybackState::Paused,
            ControlAction::Pause => state != PlaybackState::Playing,
            _ => false,
        };
        CreateButton::new(self.custom_id())
            .label(label)
            .style(style)
            .emoji(emoji)
            .disabled(disabled)
    }
}

/// Two rows of playback buttons: transport on top, volume and loop below.
/// Play is only enabled while paused and Pause only while playing.
#[must_use]
pub fn control_rows(loop_mode: LoopMode, state: PlaybackState) -> Vec<CreateActionRow> {
    use ControlAction::*;
    let row = |actions: &[ControlAction]| {
        CreateActionRow::Buttons(actions.iter().map(|a| a.button(loop_mode, state)).collect())
    };
    vec![
        row(&[Play, Pause, Skip, Stop]),
        row(&[VolumeDown, VolumeUp, Loop]),
    ]
}
