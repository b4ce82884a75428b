//! Player integration seams and the platform implementation.
//!
//! The sync engine only ever sees the two traits here. The concrete source
//! reads the system media transport controls session, so any player that
//! publishes into it (including the target desktop player) is visible.

use crate::errors::PlayerError;
use crate::protocol::PlaybackSnapshot;

/// Discovery side of the player integration.
pub trait PlayerSource: Send {
    /// Attaches to the running player. A returned session has already
    /// answered one probe poll.
    fn connect(&mut self) -> Result<Box<dyn PlayerSession>, PlayerError>;
}

/// One live attachment to the player.
pub trait PlayerSession: Send {
    /// Reads the player's current playback state.
    fn poll(&mut self) -> Result<PlaybackSnapshot, PlayerError>;
}

/// Builds the player integration for the current platform.
#[cfg(target_os = "windows")]
pub fn platform_player_source() -> Box<dyn PlayerSource> {
    Box::new(smtc::SmtcPlayerSource::new())
}

#[cfg(not(target_os = "windows"))]
pub fn platform_player_source() -> Box<dyn PlayerSource> {
    log::warn!(
        "PlayerSource: no media session interface on this platform; player search will keep retrying"
    );
    Box::new(UnsupportedPlayerSource)
}

#[cfg(not(target_os = "windows"))]
struct UnsupportedPlayerSource;

#[cfg(not(target_os = "windows"))]
impl PlayerSource for UnsupportedPlayerSource {
    fn connect(&mut self) -> Result<Box<dyn PlayerSession>, PlayerError> {
        Err(PlayerError::NotFound(
            "no media session interface on this platform".to_string(),
        ))
    }
}

#[cfg(target_os = "windows")]
mod smtc {
    use std::future::IntoFuture;

    use futures::executor::block_on;
    use windows::core::Result as WinResult;
    use windows::Foundation::TimeSpan;
    use windows::Media::Control::{
        GlobalSystemMediaTransportControlsSession,
        GlobalSystemMediaTransportControlsSessionManager,
        GlobalSystemMediaTransportControlsSessionPlaybackStatus,
    };
    use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
    use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

    use super::{PlayerSession, PlayerSource};
    use crate::errors::PlayerError;
    use crate::protocol::PlaybackSnapshot;

    const TICKS_PER_MILLISECOND: i64 = 10_000;

    /// System media transport controls as the player integration.
    ///
    /// COM is initialised lazily on the first `connect`, which pins it to the
    /// polling thread that owns this source.
    pub struct SmtcPlayerSource {
        com_ready: bool,
        com_owned: bool,
    }

    impl SmtcPlayerSource {
        pub fn new() -> Self {
            Self {
                com_ready: false,
                com_owned: false,
            }
        }

        fn ensure_com(&mut self) -> Result<(), PlayerError> {
            if self.com_ready {
                return Ok(());
            }
            let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
            if hr.is_ok() {
                self.com_owned = true;
            } else if hr != RPC_E_CHANGED_MODE {
                return Err(PlayerError::NotFound(format!("COM init failed: {hr:?}")));
            }
            self.com_ready = true;
            Ok(())
        }
    }

    impl Drop for SmtcPlayerSource {
        fn drop(&mut self) {
            if self.com_owned {
                unsafe { CoUninitialize() };
            }
        }
    }

    impl PlayerSource for SmtcPlayerSource {
        fn connect(&mut self) -> Result<Box<dyn PlayerSession>, PlayerError> {
            self.ensure_com()?;
            let session = current_media_session().map_err(|err| {
                PlayerError::NotFound(format!("no active media session: {err:?}"))
            })?;
            let mut session = SmtcPlayerSession { session };
            session.poll().map_err(|err| match err {
                PlayerError::NotFound(text) | PlayerError::SourceLost(text) => {
                    PlayerError::NotFound(text)
                }
            })?;
            Ok(Box::new(session))
        }
    }

    struct SmtcPlayerSession {
        session: GlobalSystemMediaTransportControlsSession,
    }

    impl PlayerSession for SmtcPlayerSession {
        fn poll(&mut self) -> Result<PlaybackSnapshot, PlayerError> {
            read_snapshot(&self.session).map_err(|err| {
                PlayerError::SourceLost(format!("media session poll failed: {err:?}"))
            })
        }
    }

    fn block_on_operation<O, T>(operation: O) -> WinResult<T>
    where
        O: IntoFuture<Output = WinResult<T>>,
    {
        block_on(operation.into_future())
    }

    fn current_media_session() -> WinResult<GlobalSystemMediaTransportControlsSession> {
        let manager =
            block_on_operation(GlobalSystemMediaTransportControlsSessionManager::RequestAsync()?)?;
        manager.GetCurrentSession()
    }

    fn read_snapshot(
        session: &GlobalSystemMediaTransportControlsSession,
    ) -> WinResult<PlaybackSnapshot> {
        let props = block_on_operation(session.TryGetMediaPropertiesAsync()?)?;
        let status = session.GetPlaybackInfo()?.PlaybackStatus()?;
        let is_playing = status == GlobalSystemMediaTransportControlsSessionPlaybackStatus::Playing;

        // Position is advisory only, so a timeline read failure does not
        // fail the poll.
        let position_ms = session
            .GetTimelineProperties()
            .and_then(|timeline| timeline.Position())
            .ok()
            .map(time_span_to_ms);

        Ok(PlaybackSnapshot {
            is_playing,
            artist: props.Artist()?.to_string_lossy(),
            title: props.Title()?.to_string_lossy(),
            album: props.AlbumTitle()?.to_string_lossy(),
            position_ms,
        })
    }

    fn time_span_to_ms(span: TimeSpan) -> u64 {
        (span.Duration.max(0) / TICKS_PER_MILLISECOND) as u64
    }
}
