use crate::Track;
use crate::EMPTY_QUEUE;

use std::collections::VecDeque;

/// A [`TrackQueue`] of tracks waiting to be played. Owned by a single
/// playback session, so it needs no locking of its own.
#[derive(Clone, Debug, Default)]
pub struct TrackQueue {
    inner: VecDeque<Track>,
}

impl TrackQueue {
    /// Create a new, empty [`TrackQueue`].
    #[must_use]
    pub fn new() -> Self {
        TrackQueue::default()
    }

    /// Copy of the pending tracks, front first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Track> {
        self.inner.iter().cloned().collect()
    }

    /// Enqueue a track, returning its 1-based position.
    pub fn enqueue(&mut self, track: Track) -> usize {
        self.inner.push_back(track);
        self.inner.len()
    }

    /// Dequeue the next track.
    pub fn dequeue(&mut self) -> Option<Track> {
        self.inner.pop_front()
    }

    /// Put a track back at the front, to be played next.
    pub fn push_front(&mut self, track: Track) {
        self.inner.push_front(track);
    }

    /// Add a track to the back of the queue.
    pub fn push_back(&mut self, track: Track) {
        self.inner.push_back(track);
    }

    /// Clear the queue in place.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Render a numbered queue listing with the current track on top.
#[must_use]
pub fn build_display(current: Option<&Track>, pending: &[Track]) -> String {
    if current.is_none() && pending.is_empty() {
        return EMPTY_QUEUE.to_string();
    }
    let now_playing = match current {
        Some(track) => format!("Now Playing: {track}"),
        None => "Nothing is currently playing.".to_string(),
    };
    let queued = pending
        .iter()
        .enumerate()
        .map(|(i, track)| format!("{}. {}", i + 1, track))
        .collect::<Vec<String>>()
        .join("\n");
    format!("{now_playing}\n\n{queued}")
}
