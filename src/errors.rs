use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Failure to turn a query into a playable [`crate::Track`].
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    #[error("metadata extraction failed: {0}")]
    Extraction(String),
    #[error("metadata extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("no playable audio stream found for `{0}`")]
    NoStream(String),
}

impl ResolutionError {
    /// Whether another extraction attempt could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, ResolutionError::NoStream(_))
    }
}

/// The external decoder could not be brought up.
#[derive(Debug, Error)]
pub enum DecodeStartError {
    #[error("could not spawn decoder: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("decoder exited during startup ({status}): {stderr}")]
    Exited { status: ExitStatus, stderr: String },
    #[error("decoder produced no output pipe")]
    MissingOutput,
    #[error("voice sink rejected the stream: {0}")]
    Sink(String),
}

impl DecodeStartError {
    /// Spawn failures (missing executable, bad path) will not fix themselves.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, DecodeStartError::Spawn(_))
    }
}

/// Could not connect or move the voice sink.
#[derive(Debug, Clone, Error)]
pub enum JoinError {
    #[error("voice connection failed: {0}")]
    Connect(String),
    #[error("voice connection failed after {attempts} attempts: {reason}")]
    Exhausted { attempts: u32, reason: String },
}

/// Editing, posting or deleting a status message failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("message not found")]
    NotFound,
    #[error("missing permission for message")]
    Forbidden,
    #[error("message request failed: {0}")]
    Http(String),
}

impl NotificationError {
    /// Missing or inaccessible messages end any work on them.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, NotificationError::NotFound | NotificationError::Forbidden)
    }
}

/// A session operation was not valid for the current playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("nothing is playing")]
    NotPlaying,
    #[error("nothing is paused")]
    NotPaused,
    #[error("the playback session has ended")]
    Closed,
}

/// Crate-level error used by the command layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Decode(#[from] DecodeStartError),
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error(transparent)]
    Notification(#[from] NotificationError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Serenity(#[from] serenity::Error),
    #[error("this command only works in a server")]
    NotInGuild,
}
