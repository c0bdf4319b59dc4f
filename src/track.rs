use serenity::all::UserId;
use std::fmt::{self, Display};
use std::time::Duration;

use crate::{UNKNOWN_DURATION, UNKNOWN_TITLE};

/// A resolved, playable track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    pub title: String,
    /// Direct media URL handed to the decoder.
    pub stream_url: String,
    /// Page the track was found on, when the extractor reports one.
    pub webpage_url: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<Duration>,
    pub requested_by: Option<UserId>,
}

impl Track {
    #[must_use]
    pub fn new(title: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Track {
            title: title.into(),
            stream_url: stream_url.into(),
            webpage_url: None,
            thumbnail: None,
            duration: None,
            requested_by: None,
        }
    }

    #[must_use]
    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    #[must_use]
    pub fn with_requester(mut self, user: UserId) -> Self {
        self.requested_by = Some(user);
        self
    }

    #[must_use]
    pub fn duration_string(&self) -> String {
        self.duration
            .map(format_duration)
            .unwrap_or_else(|| UNKNOWN_DURATION.to_string())
    }
}

impl Default for Track {
    fn default() -> Self {
        Track::new(UNKNOWN_TITLE, "")
    }
}

impl Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.title, self.duration_string())
    }
}

/// Format as `m:ss`, or `h:mm:ss` for long tracks.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, rem) = (total / 3600, total % 3600);
    let (mins, secs) = (rem / 60, rem % 60);
    if hours > 0 {
        format!("{hours}:{mins:02}:{secs:02}")
    } else {
        format!("{mins}:{secs:02}")
    }
}

/// What happens to a finished track.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LoopMode {
    #[default]
    Off,
    /// Replay the finished track immediately.
    Single,
    /// Send the finished track to the back of the queue.
    Queue,
}

impl LoopMode {
    /// Off -> Single -> Queue -> Off, as the loop button does.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            LoopMode::Off => LoopMode::Single,
            LoopMode::Single => LoopMode::Queue,
            LoopMode::Queue => LoopMode::Off,
        }
    }
}

impl Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopMode::Off => "Off",
            LoopMode::Single => "Single",
            LoopMode::Queue => "Queue",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
}

impl Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        f.write_str(s)
    }
}
