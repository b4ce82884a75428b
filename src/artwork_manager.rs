//! Background cover art resolution service.
//!
//! Serves resolve requests from the sync engine so provider latency never
//! stalls the poll cadence. The resolver and its outcome cache live here, off
//! the engine timeline; results travel back as bus messages and the engine
//! drops any whose track key no longer matches the live track.

use log::{info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::art_resolver::ArtResolver;
use crate::protocol::{ArtworkMessage, Message, TrackKey};

/// Artwork resolution runtime manager.
pub struct ArtworkManager {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    resolver: ArtResolver,
}

impl ArtworkManager {
    /// Creates an artwork manager bound to the shared bus.
    pub fn new(bus_consumer: Receiver<Message>, bus_producer: Sender<Message>) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            resolver: ArtResolver::new(),
        }
    }

    fn handle_resolve(&mut self, key: TrackKey, artist: String, album: String) {
        let art = self.resolver.resolve(&artist, &album);
        let _ = self
            .bus_producer
            .send(Message::Artwork(ArtworkMessage::Resolved { key, art }));
    }

    /// Starts the blocking artwork manager loop.
    pub fn run(&mut self) {
        info!("ArtworkManager: started");
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Artwork(ArtworkMessage::Resolve { key, artist, album })) => {
                    self.handle_resolve(key, artist, album);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("ArtworkManager: bus lagged by {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ArtworkManager;
    use crate::art_resolver::ART_PLACEHOLDER;
    use crate::protocol::{ArtworkMessage, Message, PlaybackSnapshot, TrackKey};
    use tokio::sync::broadcast;

    fn key_for(artist: &str, title: &str, album: &str) -> TrackKey {
        TrackKey::from_snapshot(&PlaybackSnapshot {
            is_playing: true,
            artist: artist.to_string(),
            title: title.to_string(),
            album: album.to_string(),
            position_ms: None,
        })
    }

    #[test]
    fn test_blank_metadata_resolves_to_placeholder_without_lookup() {
        let (bus_sender, _) = broadcast::channel(16);
        let mut manager = ArtworkManager::new(bus_sender.subscribe(), bus_sender.clone());
        let mut observer = bus_sender.subscribe();

        let key = key_for("", "Untitled", "");
        manager.handle_resolve(key.clone(), String::new(), String::new());

        let message = observer
            .try_recv()
            .expect("resolved message should be emitted");
        let Message::Artwork(ArtworkMessage::Resolved { key: resolved_key, art }) = message else {
            panic!("unexpected message emitted by artwork manager");
        };
        assert_eq!(resolved_key, key);
        assert_eq!(art, ART_PLACEHOLDER);
    }

    #[test]
    fn test_repeated_requests_reuse_the_cached_outcome() {
        let (bus_sender, _) = broadcast::channel(16);
        let mut manager = ArtworkManager::new(bus_sender.subscribe(), bus_sender.clone());
        let mut observer = bus_sender.subscribe();

        let key = key_for("", "Untitled", "");
        manager.handle_resolve(key.clone(), String::new(), String::new());
        manager.handle_resolve(key, String::new(), String::new());

        let first = observer.try_recv().expect("first outcome should be emitted");
        let second = observer
            .try_recv()
            .expect("second outcome should be emitted");
        let (Message::Artwork(ArtworkMessage::Resolved { art: first_art, .. }),
            Message::Artwork(ArtworkMessage::Resolved { art: second_art, .. })) = (first, second)
        else {
            panic!("unexpected messages emitted by artwork manager");
        };
        assert_eq!(first_art, second_art);
    }
}
