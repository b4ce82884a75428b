//! Playback-presence synchronization engine.
//!
//! Owns the bridge state machine: polls the player on a fixed cadence,
//! deduplicates presence pushes by track identity, requests artwork
//! resolution off-thread and drives the presence connection lifecycle
//! (connect, push, clear, teardown).

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::art_resolver::ART_PLACEHOLDER;
use crate::config::Config;
use crate::player_source::{PlayerSession, PlayerSource};
use crate::presence_client::PresenceLink;
use crate::protocol::{
    ArtworkMessage, BridgeMessage, BridgeState, Message, PlaybackSnapshot, PresenceButton,
    PresencePayload, TrackKey,
};

const IDLE_LOOP_SLEEP: Duration = Duration::from_millis(25);

const SMALL_IMAGE_PLAYING: &str = "play";
const SMALL_TEXT_PLAYING: &str = "Playing";

pub struct BridgeManager {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    poll_interval: Duration,
    player_search_backoff: Duration,
    show_buttons: bool,
    state: BridgeState,
    player_source: Box<dyn PlayerSource>,
    player_session: Option<Box<dyn PlayerSession>>,
    presence: Box<dyn PresenceLink>,
    last_track_key: Option<TrackKey>,
    current_payload: Option<PresencePayload>,
    pending_art: Option<(TrackKey, (String, String))>,
    resolved_art: HashMap<(String, String), String>,
    last_poll_at: Instant,
    last_player_attempt_at: Instant,
}

impl BridgeManager {
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        config: &Config,
        player_source: Box<dyn PlayerSource>,
        presence: Box<dyn PresenceLink>,
    ) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            poll_interval: Duration::from_secs(config.bridge.poll_interval_secs),
            player_search_backoff: Duration::from_secs(config.bridge.player_search_backoff_secs),
            show_buttons: config.presence.show_buttons,
            state: BridgeState::Disconnected,
            player_source,
            player_session: None,
            presence,
            last_track_key: None,
            current_payload: None,
            pending_art: None,
            resolved_art: HashMap::new(),
            last_poll_at: Instant::now(),
            last_player_attempt_at: Instant::now(),
        }
    }

    /// Announces a state transition on the bus. No-op when the state is
    /// unchanged, so observers only ever see edges.
    fn set_state(&mut self, state: BridgeState, detail: Option<String>) {
        if self.state == state {
            return;
        }
        debug!("BridgeManager: state {:?} -> {:?}", self.state, state);
        self.state = state;
        let _ = self
            .bus_producer
            .send(Message::Bridge(BridgeMessage::StateChanged {
                state,
                detail,
            }));
    }

    fn reset_track_state(&mut self) {
        self.last_track_key = None;
        self.current_payload = None;
        self.pending_art = None;
    }

    fn start(&mut self) {
        match self.state {
            BridgeState::Disconnected | BridgeState::Error => {}
            _ => {
                debug!("BridgeManager: start command ignored while already active");
                return;
            }
        }
        self.set_state(BridgeState::ConnectingPresence, None);
        match self.presence.connect() {
            Ok(()) => {
                info!("BridgeManager: presence connected");
                self.set_state(BridgeState::SearchingPlayer, None);
                self.last_player_attempt_at = Instant::now();
                self.search_player();
            }
            Err(err) => {
                self.enter_error(format!("presence connect failed: {err}"));
            }
        }
    }

    fn stop(&mut self) {
        if self.state == BridgeState::Disconnected {
            return;
        }
        info!("BridgeManager: stopping");
        if self.state == BridgeState::Broadcasting {
            if let Err(err) = self.presence.clear() {
                debug!("BridgeManager: presence clear during stop failed: {}", err);
            }
        }
        self.presence.disconnect();
        self.player_session = None;
        self.reset_track_state();
        self.set_state(BridgeState::Disconnected, None);
    }

    /// Tears everything down and parks in the error state until the operator
    /// issues another start command.
    fn enter_error(&mut self, reason: String) {
        error!("BridgeManager: {}", reason);
        self.presence.disconnect();
        self.player_session = None;
        self.reset_track_state();
        self.set_state(BridgeState::Error, Some(reason));
    }

    fn search_player(&mut self) {
        match self.player_source.connect() {
            Ok(session) => {
                info!("BridgeManager: player found");
                self.player_session = Some(session);
                self.last_poll_at = Instant::now();
                self.poll_player();
            }
            Err(err) => {
                debug!("BridgeManager: player not reachable: {}", err);
            }
        }
    }

    fn poll_player(&mut self) {
        let Some(session) = self.player_session.as_mut() else {
            self.set_state(BridgeState::SearchingPlayer, None);
            return;
        };
        match session.poll() {
            Ok(snapshot) => self.apply_snapshot(snapshot),
            Err(err) => {
                warn!("BridgeManager: player poll failed: {}", err);
                self.player_session = None;
                self.set_state(BridgeState::SearchingPlayer, None);
            }
        }
    }

    fn apply_snapshot(&mut self, snapshot: PlaybackSnapshot) {
        if !snapshot.is_playing {
            self.enter_idle();
            return;
        }
        let key = TrackKey::from_snapshot(&snapshot);
        let same_track = self.last_track_key.as_ref() == Some(&key);
        self.set_state(BridgeState::Broadcasting, None);
        if same_track {
            return;
        }
        self.push_track(snapshot, key);
    }

    /// Clears the presence exactly once per pause cycle: only a previously
    /// broadcast track triggers the clear, so repeated idle polls (and the
    /// very first poll after startup) stay silent.
    fn enter_idle(&mut self) {
        if self.last_track_key.is_some() {
            info!("BridgeManager: playback paused, clearing presence");
            if let Err(err) = self.presence.clear() {
                self.enter_error(format!("presence clear failed: {err}"));
                return;
            }
            self.reset_track_state();
        }
        self.set_state(BridgeState::Idle, None);
    }

    fn push_track(&mut self, snapshot: PlaybackSnapshot, key: TrackKey) {
        let pair = (snapshot.artist.clone(), snapshot.album.clone());
        let art = match self.resolved_art.get(&pair) {
            Some(art) => {
                self.pending_art = None;
                art.clone()
            }
            None => {
                self.request_art(key.clone(), &snapshot);
                ART_PLACEHOLDER.to_string()
            }
        };
        let payload = self.build_payload(&snapshot, art, start_timestamp_for(&snapshot));

        info!(
            "BridgeManager: now playing \"{} - {}\"",
            snapshot.artist, snapshot.title
        );
        if let Err(err) = self.presence.push(&payload) {
            self.enter_error(format!("presence update failed: {err}"));
            return;
        }
        self.last_track_key = Some(key);
        self.current_payload = Some(payload);

        let PlaybackSnapshot {
            artist,
            title,
            album,
            ..
        } = snapshot;
        let _ = self
            .bus_producer
            .send(Message::Bridge(BridgeMessage::TrackChanged {
                artist,
                title,
                album,
            }));
    }

    fn request_art(&mut self, key: TrackKey, snapshot: &PlaybackSnapshot) {
        self.pending_art = Some((
            key.clone(),
            (snapshot.artist.clone(), snapshot.album.clone()),
        ));
        let _ = self
            .bus_producer
            .send(Message::Artwork(ArtworkMessage::Resolve {
                key,
                artist: snapshot.artist.clone(),
                album: snapshot.album.clone(),
            }));
    }

    /// Applies an asynchronous artwork result. Only the outstanding request
    /// for the currently broadcast track produces a follow-up push; anything
    /// else is a leftover from a superseded track and is dropped.
    fn handle_art_resolved(&mut self, key: TrackKey, art: String) {
        let pending_matches = match self.pending_art.as_ref() {
            Some((pending_key, _)) => *pending_key == key,
            None => false,
        };
        if !pending_matches {
            debug!("BridgeManager: artwork result for a superseded track discarded");
            return;
        }
        if let Some((_, pair)) = self.pending_art.take() {
            self.resolved_art.insert(pair, art.clone());
        }
        if self.state != BridgeState::Broadcasting || self.last_track_key.as_ref() != Some(&key) {
            return;
        }
        let corrected = match self.current_payload.as_ref() {
            Some(payload) if payload.large_image != art => {
                let mut corrected = payload.clone();
                corrected.large_image = art;
                corrected
            }
            _ => return,
        };
        debug!("BridgeManager: refreshing presence with resolved artwork");
        if let Err(err) = self.presence.push(&corrected) {
            self.enter_error(format!("presence update failed: {err}"));
            return;
        }
        self.current_payload = Some(corrected);
    }

    fn build_payload(
        &self,
        snapshot: &PlaybackSnapshot,
        art: String,
        start_timestamp: Option<u64>,
    ) -> PresencePayload {
        let mut buttons = Vec::new();
        if self.show_buttons {
            let query =
                urlencoding::encode(&format!("{} - {}", snapshot.artist, snapshot.title))
                    .into_owned();
            buttons.push(PresenceButton {
                label: "Listen on YouTube".to_string(),
                url: format!("https://www.youtube.com/results?search_query={query}"),
            });
            buttons.push(PresenceButton {
                label: "Search Apple Music".to_string(),
                url: format!("https://music.apple.com/us/search?term={query}"),
            });
        }

        PresencePayload {
            state: format!("by {}", snapshot.artist),
            details: snapshot.title.clone(),
            large_image: art,
            large_text: snapshot.album.clone(),
            small_image: SMALL_IMAGE_PLAYING.to_string(),
            small_text: SMALL_TEXT_PLAYING.to_string(),
            start_timestamp,
            buttons,
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Bridge(BridgeMessage::Start) => self.start(),
            Message::Bridge(BridgeMessage::Stop) => self.stop(),
            Message::Artwork(ArtworkMessage::Resolved { key, art }) => {
                self.handle_art_resolved(key, art)
            }
            _ => {}
        }
    }

    fn advance_if_due(&mut self) {
        match self.state {
            BridgeState::SearchingPlayer => {
                if self.last_player_attempt_at.elapsed() < self.player_search_backoff {
                    return;
                }
                self.last_player_attempt_at = Instant::now();
                self.search_player();
            }
            BridgeState::Idle | BridgeState::Broadcasting => {
                if self.last_poll_at.elapsed() < self.poll_interval {
                    return;
                }
                self.last_poll_at = Instant::now();
                self.poll_player();
            }
            BridgeState::Disconnected | BridgeState::ConnectingPresence | BridgeState::Error => {}
        }
    }

    fn process_pending_bus_messages(&mut self) -> bool {
        loop {
            match self.bus_consumer.try_recv() {
                Ok(message) => self.handle_message(message),
                Err(tokio::sync::broadcast::error::TryRecvError::Empty) => return false,
                Err(tokio::sync::broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("BridgeManager: bus lagged by {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::TryRecvError::Closed) => return true,
            }
        }
    }

    /// Starts the blocking bridge manager loop.
    pub fn run(&mut self) {
        info!("BridgeManager: started");
        loop {
            if self.process_pending_bus_messages() {
                break;
            }
            self.advance_if_due();
            if self.process_pending_bus_messages() {
                break;
            }
            thread::sleep(IDLE_LOOP_SLEEP);
        }
    }
}

fn start_timestamp_for(snapshot: &PlaybackSnapshot) -> Option<u64> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let position = Duration::from_millis(snapshot.position_ms.unwrap_or(0));
    Some(now.saturating_sub(position).as_secs())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use tokio::sync::broadcast;

    use super::BridgeManager;
    use crate::config::Config;
    use crate::errors::{PlayerError, PresenceError};
    use crate::player_source::{PlayerSession, PlayerSource};
    use crate::presence_client::PresenceLink;
    use crate::protocol::{
        ArtworkMessage, BridgeMessage, BridgeState, Message, PlaybackSnapshot, PresencePayload,
        TrackKey,
    };

    #[derive(Debug, Clone, PartialEq)]
    enum PresenceCall {
        Connect,
        Push(PresencePayload),
        Clear,
        Disconnect,
    }

    struct RecordingPresence {
        calls: Arc<Mutex<Vec<PresenceCall>>>,
        fail_connect: bool,
        fail_push: bool,
    }

    impl RecordingPresence {
        fn new() -> (Self, Arc<Mutex<Vec<PresenceCall>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    calls: Arc::clone(&calls),
                    fail_connect: false,
                    fail_push: false,
                },
                calls,
            )
        }

        fn record(&self, call: PresenceCall) {
            self.calls.lock().expect("presence call log").push(call);
        }
    }

    impl PresenceLink for RecordingPresence {
        fn connect(&mut self) -> Result<(), PresenceError> {
            self.record(PresenceCall::Connect);
            if self.fail_connect {
                return Err(PresenceError::Connect("socket missing".to_string()));
            }
            Ok(())
        }

        fn push(&mut self, payload: &PresencePayload) -> Result<(), PresenceError> {
            self.record(PresenceCall::Push(payload.clone()));
            if self.fail_push {
                return Err(PresenceError::Transport("pipe closed".to_string()));
            }
            Ok(())
        }

        fn clear(&mut self) -> Result<(), PresenceError> {
            self.record(PresenceCall::Clear);
            Ok(())
        }

        fn disconnect(&mut self) {
            self.record(PresenceCall::Disconnect);
        }
    }

    type PollScript = Arc<Mutex<VecDeque<Result<PlaybackSnapshot, PlayerError>>>>;

    struct ScriptedPlayer {
        polls: PollScript,
        reject_connects: usize,
        connect_count: Arc<Mutex<usize>>,
    }

    impl ScriptedPlayer {
        fn new(
            polls: Vec<Result<PlaybackSnapshot, PlayerError>>,
        ) -> (Self, Arc<Mutex<usize>>) {
            let connect_count = Arc::new(Mutex::new(0));
            (
                Self {
                    polls: Arc::new(Mutex::new(polls.into())),
                    reject_connects: 0,
                    connect_count: Arc::clone(&connect_count),
                },
                connect_count,
            )
        }
    }

    impl PlayerSource for ScriptedPlayer {
        fn connect(&mut self) -> Result<Box<dyn PlayerSession>, PlayerError> {
            *self.connect_count.lock().expect("connect counter") += 1;
            if self.reject_connects > 0 {
                self.reject_connects -= 1;
                return Err(PlayerError::NotFound("player not running".to_string()));
            }
            Ok(Box::new(ScriptedSession {
                polls: Arc::clone(&self.polls),
            }))
        }
    }

    struct ScriptedSession {
        polls: PollScript,
    }

    impl PlayerSession for ScriptedSession {
        fn poll(&mut self) -> Result<PlaybackSnapshot, PlayerError> {
            self.polls
                .lock()
                .expect("poll script")
                .pop_front()
                .unwrap_or_else(|| Err(PlayerError::SourceLost("script exhausted".to_string())))
        }
    }

    fn playing(
        artist: &str,
        title: &str,
        album: &str,
        position_ms: u64,
    ) -> Result<PlaybackSnapshot, PlayerError> {
        Ok(PlaybackSnapshot {
            is_playing: true,
            artist: artist.to_string(),
            title: title.to_string(),
            album: album.to_string(),
            position_ms: Some(position_ms),
        })
    }

    fn paused() -> Result<PlaybackSnapshot, PlayerError> {
        Ok(PlaybackSnapshot {
            is_playing: false,
            artist: String::new(),
            title: String::new(),
            album: String::new(),
            position_ms: None,
        })
    }

    fn test_manager(
        player: ScriptedPlayer,
        presence: RecordingPresence,
    ) -> (BridgeManager, broadcast::Receiver<Message>) {
        let (bus_producer, bus_consumer) = broadcast::channel(16);
        let observer = bus_producer.subscribe();
        let manager = BridgeManager::new(
            bus_consumer,
            bus_producer,
            &Config::default(),
            Box::new(player),
            Box::new(presence),
        );
        (manager, observer)
    }

    fn pushes(calls: &[PresenceCall]) -> Vec<PresencePayload> {
        calls
            .iter()
            .filter_map(|call| match call {
                PresenceCall::Push(payload) => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    fn resolve_requests(observer: &mut broadcast::Receiver<Message>) -> usize {
        let mut count = 0;
        while let Ok(message) = observer.try_recv() {
            if let Message::Artwork(ArtworkMessage::Resolve { .. }) = message {
                count += 1;
            }
        }
        count
    }

    #[test]
    fn test_start_connects_presence_then_searches_for_the_player() {
        let (mut player, connect_count) = ScriptedPlayer::new(vec![]);
        player.reject_connects = 1;
        let (presence, calls) = RecordingPresence::new();
        let (mut manager, _observer) = test_manager(player, presence);

        manager.handle_message(Message::Bridge(BridgeMessage::Start));

        assert_eq!(manager.state, BridgeState::SearchingPlayer);
        assert_eq!(*connect_count.lock().expect("connect counter"), 1);
        assert_eq!(
            *calls.lock().expect("presence call log"),
            vec![PresenceCall::Connect]
        );
    }

    #[test]
    fn test_presence_connect_failure_parks_in_error_without_player_search() {
        let (player, connect_count) = ScriptedPlayer::new(vec![]);
        let (mut presence, calls) = RecordingPresence::new();
        presence.fail_connect = true;
        let (mut manager, _observer) = test_manager(player, presence);

        manager.handle_message(Message::Bridge(BridgeMessage::Start));

        assert_eq!(manager.state, BridgeState::Error);
        assert_eq!(*connect_count.lock().expect("connect counter"), 0);
        let calls = calls.lock().expect("presence call log");
        assert_eq!(calls[0], PresenceCall::Connect);
        assert_eq!(calls[1], PresenceCall::Disconnect);
    }

    #[test]
    fn test_single_track_stream_produces_one_push_and_one_clear() {
        let (player, _) = ScriptedPlayer::new(vec![
            paused(),
            playing("Daft Punk", "One More Time", "Discovery", 0),
            playing("Daft Punk", "One More Time", "Discovery", 5_000),
            paused(),
            paused(),
        ]);
        let (presence, calls) = RecordingPresence::new();
        let (mut manager, _observer) = test_manager(player, presence);

        manager.handle_message(Message::Bridge(BridgeMessage::Start));
        for _ in 0..4 {
            manager.poll_player();
        }

        let calls = calls.lock().expect("presence call log");
        assert_eq!(calls.len(), 3, "expected connect, one push, one clear");
        assert_eq!(calls[0], PresenceCall::Connect);
        let PresenceCall::Push(payload) = &calls[1] else {
            panic!("expected a push as the second presence call, got {:?}", calls[1]);
        };
        assert_eq!(payload.state, "by Daft Punk");
        assert_eq!(payload.details, "One More Time");
        assert_eq!(payload.large_text, "Discovery");
        assert_eq!(payload.large_image, "logo");
        assert_eq!(payload.small_image, "play");
        assert_eq!(payload.small_text, "Playing");
        assert_eq!(calls[2], PresenceCall::Clear);
        assert_eq!(manager.state, BridgeState::Idle);
    }

    #[test]
    fn test_unchanged_track_is_never_pushed_twice() {
        let (player, _) = ScriptedPlayer::new(vec![
            playing("Daft Punk", "One More Time", "Discovery", 0),
            playing("Daft Punk", "One More Time", "Discovery", 5_000),
            playing("Daft Punk", "One More Time", "Discovery", 10_000),
        ]);
        let (presence, calls) = RecordingPresence::new();
        let (mut manager, _observer) = test_manager(player, presence);

        manager.handle_message(Message::Bridge(BridgeMessage::Start));
        manager.poll_player();
        manager.poll_player();

        assert_eq!(manager.state, BridgeState::Broadcasting);
        assert_eq!(pushes(&calls.lock().expect("presence call log")).len(), 1);
    }

    #[test]
    fn test_resume_after_pause_recomputes_the_start_timestamp() {
        let (player, _) = ScriptedPlayer::new(vec![
            playing("Daft Punk", "One More Time", "Discovery", 60_000),
            paused(),
            playing("Daft Punk", "One More Time", "Discovery", 180_000),
        ]);
        let (presence, calls) = RecordingPresence::new();
        let (mut manager, _observer) = test_manager(player, presence);

        manager.handle_message(Message::Bridge(BridgeMessage::Start));
        manager.poll_player();
        manager.poll_player();

        let calls = calls.lock().expect("presence call log");
        let pushed = pushes(&calls);
        assert_eq!(pushed.len(), 2, "resuming must broadcast a fresh occurrence");
        assert!(calls.contains(&PresenceCall::Clear));
        let first = pushed[0].start_timestamp.expect("first push timestamp");
        let second = pushed[1].start_timestamp.expect("second push timestamp");
        // The resumed track sits two minutes further in, so its computed
        // start moves backwards even though wall time advanced.
        assert!(second < first);
    }

    #[test]
    fn test_poll_failure_falls_back_to_player_search_and_recovers() {
        let (player, connect_count) = ScriptedPlayer::new(vec![
            playing("Daft Punk", "One More Time", "Discovery", 0),
            Err(PlayerError::SourceLost("player exited".to_string())),
            playing("Daft Punk", "One More Time", "Discovery", 15_000),
        ]);
        let (presence, calls) = RecordingPresence::new();
        let (mut manager, _observer) = test_manager(player, presence);

        manager.handle_message(Message::Bridge(BridgeMessage::Start));
        manager.poll_player();
        assert_eq!(manager.state, BridgeState::SearchingPlayer);
        assert!(manager.player_session.is_none());

        manager.search_player();

        assert_eq!(manager.state, BridgeState::Broadcasting);
        assert_eq!(*connect_count.lock().expect("connect counter"), 2);
        // Same track across the gap: presence stays as-is, no fresh push.
        assert_eq!(pushes(&calls.lock().expect("presence call log")).len(), 1);
    }

    #[test]
    fn test_push_failure_tears_down_both_sessions_into_error() {
        let (player, _) = ScriptedPlayer::new(vec![playing(
            "Daft Punk",
            "One More Time",
            "Discovery",
            0,
        )]);
        let (mut presence, calls) = RecordingPresence::new();
        presence.fail_push = true;
        let (mut manager, _observer) = test_manager(player, presence);

        manager.handle_message(Message::Bridge(BridgeMessage::Start));

        assert_eq!(manager.state, BridgeState::Error);
        assert!(manager.player_session.is_none());
        assert!(manager.last_track_key.is_none());
        let calls = calls.lock().expect("presence call log");
        assert_eq!(calls.last(), Some(&PresenceCall::Disconnect));
    }

    #[test]
    fn test_resolved_artwork_refreshes_the_push_with_the_same_timestamp() {
        let snapshot = playing("Daft Punk", "One More Time", "Discovery", 0)
            .expect("scripted snapshot");
        let key = TrackKey::from_snapshot(&snapshot);
        let (player, _) = ScriptedPlayer::new(vec![Ok(snapshot)]);
        let (presence, calls) = RecordingPresence::new();
        let (mut manager, _observer) = test_manager(player, presence);

        manager.handle_message(Message::Bridge(BridgeMessage::Start));
        manager.handle_message(Message::Artwork(ArtworkMessage::Resolved {
            key: key.clone(),
            art: "https://coverartarchive.org/release/abc/front-500".to_string(),
        }));

        let pushed = pushes(&calls.lock().expect("presence call log"));
        assert_eq!(pushed.len(), 2);
        assert_eq!(pushed[0].large_image, "logo");
        assert_eq!(
            pushed[1].large_image,
            "https://coverartarchive.org/release/abc/front-500"
        );
        assert_eq!(pushed[0].start_timestamp, pushed[1].start_timestamp);
        assert_eq!(pushed[0].details, pushed[1].details);

        // A duplicate result has no outstanding request to match.
        manager.handle_message(Message::Artwork(ArtworkMessage::Resolved {
            key,
            art: "https://example.com/other.jpg".to_string(),
        }));
        assert_eq!(pushes(&calls.lock().expect("presence call log")).len(), 2);
    }

    #[test]
    fn test_artwork_for_a_superseded_track_is_discarded() {
        let first = playing("Daft Punk", "One More Time", "Discovery", 0)
            .expect("scripted snapshot");
        let stale_key = TrackKey::from_snapshot(&first);
        let (player, _) = ScriptedPlayer::new(vec![
            Ok(first),
            playing("Justice", "D.A.N.C.E.", "Cross", 0),
        ]);
        let (presence, calls) = RecordingPresence::new();
        let (mut manager, _observer) = test_manager(player, presence);

        manager.handle_message(Message::Bridge(BridgeMessage::Start));
        manager.poll_player();
        manager.handle_message(Message::Artwork(ArtworkMessage::Resolved {
            key: stale_key,
            art: "https://example.com/discovery.jpg".to_string(),
        }));

        let pushed = pushes(&calls.lock().expect("presence call log"));
        assert_eq!(pushed.len(), 2);
        assert_eq!(pushed[1].details, "D.A.N.C.E.");
        assert_eq!(pushed[1].large_image, "logo");
    }

    #[test]
    fn test_stop_clears_disconnects_and_returns_to_disconnected() {
        let (player, _) = ScriptedPlayer::new(vec![playing(
            "Daft Punk",
            "One More Time",
            "Discovery",
            0,
        )]);
        let (presence, calls) = RecordingPresence::new();
        let (mut manager, _observer) = test_manager(player, presence);

        manager.handle_message(Message::Bridge(BridgeMessage::Start));
        manager.handle_message(Message::Bridge(BridgeMessage::Stop));

        assert_eq!(manager.state, BridgeState::Disconnected);
        assert!(manager.player_session.is_none());
        assert!(manager.last_track_key.is_none());
        let calls = calls.lock().expect("presence call log");
        let tail = calls.len() - 2;
        assert_eq!(calls[tail..], [PresenceCall::Clear, PresenceCall::Disconnect]);
    }

    #[test]
    fn test_previously_resolved_art_is_pushed_immediately_without_a_request() {
        let (player, _) = ScriptedPlayer::new(vec![playing(
            "Daft Punk",
            "One More Time",
            "Discovery",
            0,
        )]);
        let (presence, calls) = RecordingPresence::new();
        let (mut manager, mut observer) = test_manager(player, presence);
        manager.resolved_art.insert(
            ("Daft Punk".to_string(), "Discovery".to_string()),
            "https://example.com/discovery.jpg".to_string(),
        );

        manager.handle_message(Message::Bridge(BridgeMessage::Start));

        let pushed = pushes(&calls.lock().expect("presence call log"));
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].large_image, "https://example.com/discovery.jpg");
        assert_eq!(resolve_requests(&mut observer), 0);
        assert!(manager.pending_art.is_none());
    }

    #[test]
    fn test_payload_buttons_link_to_encoded_searches() {
        let (player, _) = ScriptedPlayer::new(vec![]);
        let (presence, _) = RecordingPresence::new();
        let (manager, _observer) = test_manager(player, presence);

        let snapshot = PlaybackSnapshot {
            is_playing: true,
            artist: "AC/DC".to_string(),
            title: "T.N.T.".to_string(),
            album: "High Voltage".to_string(),
            position_ms: Some(0),
        };
        let payload = manager.build_payload(&snapshot, "logo".to_string(), Some(0));

        assert_eq!(payload.buttons.len(), 2);
        assert_eq!(payload.buttons[0].label, "Listen on YouTube");
        assert_eq!(
            payload.buttons[0].url,
            "https://www.youtube.com/results?search_query=AC%2FDC%20-%20T.N.T."
        );
        assert_eq!(payload.buttons[1].label, "Search Apple Music");
        assert_eq!(
            payload.buttons[1].url,
            "https://music.apple.com/us/search?term=AC%2FDC%20-%20T.N.T."
        );
    }

    #[test]
    fn test_buttons_are_omitted_when_disabled() {
        let (player, _) = ScriptedPlayer::new(vec![]);
        let (presence, _) = RecordingPresence::new();
        let (mut manager, _observer) = test_manager(player, presence);
        manager.show_buttons = false;

        let snapshot = PlaybackSnapshot {
            is_playing: true,
            artist: "Daft Punk".to_string(),
            title: "One More Time".to_string(),
            album: "Discovery".to_string(),
            position_ms: None,
        };
        let payload = manager.build_payload(&snapshot, "logo".to_string(), Some(0));
        assert!(payload.buttons.is_empty());
    }
}
