//! Rich-presence IPC client.
//!
//! Speaks the presence service's local IPC protocol: little-endian
//! opcode+length framed JSON over a unix domain socket (named pipe on
//! Windows). The sync engine owns the single live connection; nothing else
//! pushes to it.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::debug;
use serde_json::Value;

use crate::errors::PresenceError;
use crate::protocol::PresencePayload;

const IPC_OPCODE_HANDSHAKE: u32 = 0;
const IPC_OPCODE_FRAME: u32 = 1;
const IPC_OPCODE_CLOSE: u32 = 2;
const IPC_OPCODE_PING: u32 = 3;
const IPC_OPCODE_PONG: u32 = 4;

const IPC_PROTOCOL_VERSION: u32 = 1;
const MAX_ENDPOINT_INDEX: u32 = 9;

#[cfg(unix)]
const PRESENCE_READ_TIMEOUT: Duration = Duration::from_millis(250);
#[cfg(unix)]
const PRESENCE_WRITE_TIMEOUT: Duration = Duration::from_millis(1500);
const RESPONSE_DEADLINE: Duration = Duration::from_secs(4);

#[cfg(unix)]
type IpcStream = std::os::unix::net::UnixStream;
#[cfg(windows)]
type IpcStream = std::fs::File;

/// Seam between the sync engine and the live presence connection.
pub trait PresenceLink: Send {
    /// Establishes the connection and completes the protocol handshake.
    /// Must succeed before any push or clear.
    fn connect(&mut self) -> Result<(), PresenceError>;
    /// Publishes one presence payload.
    fn push(&mut self, payload: &PresencePayload) -> Result<(), PresenceError>;
    /// Removes the current presence from display.
    fn clear(&mut self) -> Result<(), PresenceError>;
    /// Releases the connection. Safe to call when not connected.
    fn disconnect(&mut self);
}

/// Presence client over the service's local IPC endpoint.
pub struct IpcPresenceLink {
    client_id: String,
    session: Option<PresenceSession>,
}

impl IpcPresenceLink {
    pub fn new(client_id: String) -> Self {
        Self {
            client_id,
            session: None,
        }
    }
}

impl PresenceLink for IpcPresenceLink {
    fn connect(&mut self) -> Result<(), PresenceError> {
        self.disconnect();
        let session = PresenceSession::connect(&self.client_id)?;
        self.session = Some(session);
        Ok(())
    }

    fn push(&mut self, payload: &PresencePayload) -> Result<(), PresenceError> {
        let Some(session) = self.session.as_mut() else {
            return Err(PresenceError::Transport(
                "no live presence session".to_string(),
            ));
        };
        if let Err(err) = session.set_activity(Some(payload)) {
            self.session = None;
            return Err(PresenceError::Transport(err));
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<(), PresenceError> {
        let Some(session) = self.session.as_mut() else {
            return Err(PresenceError::Transport(
                "no live presence session".to_string(),
            ));
        };
        if let Err(err) = session.set_activity(None) {
            self.session = None;
            return Err(PresenceError::Transport(err));
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}

struct PresenceSession {
    stream: IpcStream,
    pid: u32,
}

impl PresenceSession {
    fn connect(client_id: &str) -> Result<Self, PresenceError> {
        let stream = open_ipc_stream().map_err(PresenceError::Connect)?;
        Self::establish(stream, client_id)
    }

    fn establish(stream: IpcStream, client_id: &str) -> Result<Self, PresenceError> {
        let mut session = Self {
            stream,
            pid: std::process::id(),
        };
        session
            .handshake(client_id)
            .map_err(PresenceError::Handshake)?;
        Ok(session)
    }

    fn handshake(&mut self, client_id: &str) -> Result<(), String> {
        self.send_frame(
            IPC_OPCODE_HANDSHAKE,
            &serde_json::json!({ "v": IPC_PROTOCOL_VERSION, "client_id": client_id }),
        )?;
        let response = self.await_response()?;
        if response.get("evt").and_then(Value::as_str) == Some("READY") {
            return Ok(());
        }
        Err(format!(
            "unexpected handshake response: {}",
            frame_error_text(&response)
        ))
    }

    /// Sends a SET_ACTIVITY command; `None` clears the displayed presence.
    fn set_activity(&mut self, activity: Option<&PresencePayload>) -> Result<(), String> {
        let command = serde_json::json!({
            "cmd": "SET_ACTIVITY",
            "args": {
                "pid": self.pid,
                "activity": activity.map(activity_json),
            },
            "nonce": uuid::Uuid::new_v4().to_string(),
        });
        self.send_frame(IPC_OPCODE_FRAME, &command)?;
        let response = self.await_response()?;
        if response.get("evt").and_then(Value::as_str) == Some("ERROR") {
            return Err(format!(
                "endpoint rejected the update: {}",
                frame_error_text(&response)
            ));
        }
        Ok(())
    }

    fn send_frame(&mut self, opcode: u32, payload: &Value) -> Result<(), String> {
        let frame = encode_frame(opcode, payload)?;
        self.stream
            .write_all(&frame)
            .map_err(|err| format!("failed to send presence frame: {err}"))?;
        Ok(())
    }

    fn read_next_frame(&mut self) -> Result<Option<(u32, Value)>, String> {
        let mut header = [0u8; 8];
        match self.stream.read_exact(&mut header) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
            Err(err) => return Err(format!("failed to read presence frame header: {err}")),
        }
        let opcode = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if len == 0 {
            return Ok(Some((opcode, Value::Null)));
        }
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .map_err(|err| format!("failed to read presence frame payload: {err}"))?;
        let value = serde_json::from_slice(&payload)
            .map_err(|err| format!("invalid presence frame payload: {err}"))?;
        Ok(Some((opcode, value)))
    }

    /// Waits for the endpoint's reply to the frame just sent. Pings are
    /// answered in place; a close frame is an error.
    fn await_response(&mut self) -> Result<Value, String> {
        let deadline = Instant::now() + RESPONSE_DEADLINE;
        while Instant::now() < deadline {
            let Some((opcode, payload)) = self.read_next_frame()? else {
                continue;
            };
            match opcode {
                IPC_OPCODE_PING => self.send_frame(IPC_OPCODE_PONG, &payload)?,
                IPC_OPCODE_CLOSE => {
                    return Err(format!(
                        "endpoint closed the connection: {}",
                        frame_error_text(&payload)
                    ))
                }
                IPC_OPCODE_FRAME => return Ok(payload),
                _ => {}
            }
        }
        Err("timed out waiting for a presence response".to_string())
    }

    fn close(&mut self) {
        if let Err(err) = self.send_frame(IPC_OPCODE_CLOSE, &serde_json::json!({})) {
            debug!("PresenceSession: close frame during disconnect failed: {}", err);
        }
        #[cfg(unix)]
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

fn encode_frame(opcode: u32, payload: &Value) -> Result<Vec<u8>, String> {
    let body = payload.to_string();
    let len = u32::try_from(body.len()).map_err(|_| "presence frame too large".to_string())?;
    let mut frame = Vec::with_capacity(8 + body.len());
    frame.extend_from_slice(&opcode.to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(body.as_bytes());
    Ok(frame)
}

/// Builds the activity object for a SET_ACTIVITY command. Empty fields are
/// omitted entirely; the endpoint rejects empty strings.
fn activity_json(payload: &PresencePayload) -> Value {
    let mut activity = serde_json::Map::new();
    if !payload.state.is_empty() {
        activity.insert("state".to_string(), Value::String(payload.state.clone()));
    }
    if !payload.details.is_empty() {
        activity.insert("details".to_string(), Value::String(payload.details.clone()));
    }

    let mut assets = serde_json::Map::new();
    if !payload.large_image.is_empty() {
        assets.insert(
            "large_image".to_string(),
            Value::String(payload.large_image.clone()),
        );
    }
    if !payload.large_text.is_empty() {
        assets.insert(
            "large_text".to_string(),
            Value::String(payload.large_text.clone()),
        );
    }
    if !payload.small_image.is_empty() {
        assets.insert(
            "small_image".to_string(),
            Value::String(payload.small_image.clone()),
        );
    }
    if !payload.small_text.is_empty() {
        assets.insert(
            "small_text".to_string(),
            Value::String(payload.small_text.clone()),
        );
    }
    if !assets.is_empty() {
        activity.insert("assets".to_string(), Value::Object(assets));
    }

    if let Some(start) = payload.start_timestamp {
        activity.insert(
            "timestamps".to_string(),
            serde_json::json!({ "start": start }),
        );
    }
    if !payload.buttons.is_empty() {
        let buttons: Vec<Value> = payload
            .buttons
            .iter()
            .map(|button| serde_json::json!({ "label": button.label, "url": button.url }))
            .collect();
        activity.insert("buttons".to_string(), Value::Array(buttons));
    }

    Value::Object(activity)
}

fn frame_error_text(payload: &Value) -> String {
    payload
        .get("data")
        .and_then(|data| data.get("message"))
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_else(|| payload.to_string())
}

#[cfg(unix)]
fn candidate_socket_dirs() -> Vec<std::path::PathBuf> {
    let mut dirs = Vec::new();
    for var in ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"] {
        if let Some(value) = std::env::var_os(var) {
            let path = std::path::PathBuf::from(value);
            if !path.as_os_str().is_empty() {
                dirs.push(path);
            }
        }
    }
    dirs.push(std::path::PathBuf::from("/tmp"));
    dirs
}

#[cfg(unix)]
fn open_ipc_stream() -> Result<IpcStream, String> {
    let mut last_error = None;
    for dir in candidate_socket_dirs() {
        for index in 0..=MAX_ENDPOINT_INDEX {
            let path = dir.join(format!("discord-ipc-{index}"));
            match std::os::unix::net::UnixStream::connect(&path) {
                Ok(stream) => {
                    configure_stream(&stream)?;
                    return Ok(stream);
                }
                Err(err) => last_error = Some(format!("{}: {err}", path.display())),
            }
        }
    }
    Err(last_error.unwrap_or_else(|| "no presence endpoint candidates".to_string()))
}

#[cfg(unix)]
fn configure_stream(stream: &IpcStream) -> Result<(), String> {
    stream
        .set_read_timeout(Some(PRESENCE_READ_TIMEOUT))
        .map_err(|err| format!("failed to set presence read timeout: {err}"))?;
    stream
        .set_write_timeout(Some(PRESENCE_WRITE_TIMEOUT))
        .map_err(|err| format!("failed to set presence write timeout: {err}"))?;
    Ok(())
}

#[cfg(windows)]
fn open_ipc_stream() -> Result<IpcStream, String> {
    let mut last_error = None;
    for index in 0..=MAX_ENDPOINT_INDEX {
        let path = format!(r"\\.\pipe\discord-ipc-{index}");
        match std::fs::OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => return Ok(file),
            Err(err) => last_error = Some(format!("{path}: {err}")),
        }
    }
    Err(last_error.unwrap_or_else(|| "no presence endpoint candidates".to_string()))
}
