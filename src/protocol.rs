//! Event-bus protocol shared by all runtime components.
//!
//! This module defines the message payloads exchanged between the sync
//! engine, the artwork manager, and whatever shell layer subscribes to
//! status notifications.

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Bridge(BridgeMessage),
    Artwork(ArtworkMessage),
}

/// Sync-engine commands and status notifications.
#[derive(Debug, Clone)]
pub enum BridgeMessage {
    /// Operator command: connect to the presence service and begin polling.
    Start,
    /// Operator command: clear any live presence and release both sessions.
    Stop,
    /// Edge-triggered lifecycle notification for shell layers.
    StateChanged {
        state: BridgeState,
        detail: Option<String>,
    },
    /// Now-playing summary emitted when a new track starts broadcasting.
    TrackChanged {
        artist: String,
        title: String,
        album: String,
    },
}

/// Artwork resolution traffic between the sync engine and the artwork manager.
#[derive(Debug, Clone)]
pub enum ArtworkMessage {
    /// Request to resolve cover art for the track identified by `key`.
    Resolve {
        key: TrackKey,
        artist: String,
        album: String,
    },
    /// Resolution outcome; `art` is the placeholder when nothing was found.
    Resolved { key: TrackKey, art: String },
}

/// Externally observable lifecycle state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No presence connection; waiting for a start command.
    Disconnected,
    /// Presence connect in progress.
    ConnectingPresence,
    /// Presence connected; the player automation surface is not reachable yet.
    SearchingPlayer,
    /// Player reachable but paused/stopped; presence is cleared.
    Idle,
    /// A track is live on the presence service.
    Broadcasting,
    /// Presence connection failed or died; passive until the next start command.
    Error,
}

/// One poll's worth of player state, produced fresh by the player adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    pub artist: String,
    pub title: String,
    pub album: String,
    /// Playback position in milliseconds, when the player reports one.
    pub position_ms: Option<u64>,
}

/// Identity used to distinguish "song changed" from "same song, later poll".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackKey(String);

impl TrackKey {
    /// Derives the key from snapshot metadata. Position never participates,
    /// so two polls of the same song compare equal.
    pub fn from_snapshot(snapshot: &PlaybackSnapshot) -> Self {
        Self(format!(
            "{}\u{001f}{}\u{001f}{}",
            snapshot.artist, snapshot.title, snapshot.album
        ))
    }
}

/// Action button rendered under the presence card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceButton {
    pub label: String,
    pub url: String,
}

/// One full presence update, constructed fresh per push.
#[derive(Debug, Clone, PartialEq)]
pub struct PresencePayload {
    pub state: String,
    pub details: String,
    pub large_image: String,
    pub large_text: String,
    pub small_image: String,
    pub small_text: String,
    /// Epoch seconds at which playback of the current track effectively began.
    pub start_timestamp: Option<u64>,
    pub buttons: Vec<PresenceButton>,
}
