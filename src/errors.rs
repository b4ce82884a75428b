//! Typed failure taxonomy for the adapter seams.
//!
//! Adapter internals keep the usual `Result<T, String>` helper style; these
//! enums exist at the trait boundaries so the sync engine branches on failure
//! class instead of parsing message text.

/// Player automation failures, as seen by the sync engine.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// The player process/automation surface is not reachable. Expected and
    /// transient; retried from SearchingPlayer with backoff.
    #[error("player not found: {0}")]
    NotFound(String),
    /// A previously working session stopped answering. The session is
    /// discarded and reconnected on a later tick.
    #[error("player source lost: {0}")]
    SourceLost(String),
}

/// Presence connection failures. Every variant is fatal for the running
/// session; the engine surfaces the text and waits for a fresh start command.
#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    /// No presence endpoint accepted the connection.
    #[error("presence connect failed: {0}")]
    Connect(String),
    /// The endpoint connected but rejected or garbled the handshake.
    #[error("presence handshake failed: {0}")]
    Handshake(String),
    /// An established connection failed while pushing or clearing.
    #[error("presence transport failed: {0}")]
    Transport(String),
}
