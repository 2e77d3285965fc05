//! Per-connection client state, driven by readable/writable reactor
//! events. A `Session` is owned exclusively by its `Hub` slot (§3);
//! the reactor only ever reaches one through `Hub` methods.

use std::io::{self, ErrorKind, Read, Write};

use mio::net::TcpStream;
use tracing::{debug, trace, warn};

use crate::close::CloseCode;
use crate::error::SessionError;
use crate::frame::{self, OpCode};
use crate::handshake::{self, HandshakeEvent};

/// Default capacity of a session's pre-handshake receive buffer (§3).
pub const DEFAULT_RX_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Connecting,
  Open,
  Closing,
  Closed,
}

/// What the caller should do after driving a session's readable event.
pub enum Outcome {
  /// Keep going; nothing further for the caller to act on.
  Continue,
  /// The session moved to `Closing` and should be torn down.
  Close,
}

pub struct Session {
  pub stream: TcpStream,
  pub state: SessionState,
  rx_buffer: Vec<u8>,
  rx_capacity: usize,
}

impl Session {
  pub fn new(stream: TcpStream, rx_capacity: usize) -> Self {
    Session {
      stream,
      state: SessionState::Connecting,
      rx_buffer: Vec::with_capacity(rx_capacity),
      rx_capacity,
    }
  }

  /// Drains the socket until `EAGAIN`, as the edge-triggered contract
  /// requires (§4.5). `sticky_config`, when `Some`, is replayed to this
  /// session the moment its handshake completes (video hub only),
  /// before the caller can possibly observe a live broadcast frame —
  /// the caller must invoke this while still holding the hub lock so
  /// no `Hub::broadcast` can interleave between accept and replay.
  pub fn on_readable(&mut self, sticky_config: Option<&[u8]>) -> Result<Outcome, SessionError> {
    let mut scratch = [0u8; 4096];
    loop {
      match self.stream.read(&mut scratch) {
        Ok(0) => {
          self.state = SessionState::Closing;
          return Ok(Outcome::Close);
        }
        Ok(n) => {
          if self.state == SessionState::Connecting {
            self.feed_handshake(&scratch[..n], sticky_config)?;
          } else {
            self.feed_frames(&scratch[..n])?;
          }
          if self.state == SessionState::Closing {
            return Ok(Outcome::Close);
          }
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Outcome::Continue),
        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
        Err(e) => return Err(SessionError::Io(e)),
      }
    }
  }

  fn feed_handshake(
    &mut self,
    bytes: &[u8],
    sticky_config: Option<&[u8]>,
  ) -> Result<(), SessionError> {
    if self.rx_buffer.len() + bytes.len() > self.rx_capacity {
      self.state = SessionState::Closing;
      return Err(SessionError::RxOverflow);
    }
    self.rx_buffer.extend_from_slice(bytes);

    match handshake::parse(&self.rx_buffer) {
      HandshakeEvent::Incomplete => Ok(()),
      HandshakeEvent::Opening(request) => {
        let response = handshake::accept_response(&request);
        self.write_best_effort(response.as_bytes());
        self.state = SessionState::Open;
        self.rx_buffer.clear();
        debug!("session handshake complete");
        if let Some(config) = sticky_config {
          self.write_best_effort(config);
        }
        Ok(())
      }
      HandshakeEvent::Error(err) => {
        let response = handshake::reject_response();
        self.write_best_effort(response.as_bytes());
        self.state = SessionState::Closing;
        warn!(%err, "session handshake rejected");
        Ok(())
      }
    }
  }

  fn feed_frames(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
    let mut buf = bytes.to_vec();
    loop {
      match frame::decode_frame(&mut buf) {
        Ok(None) => {
          // Relay never expects large inbound payloads from clients;
          // a dangling partial frame tail is simply discarded (§4.3).
          return Ok(());
        }
        Ok(Some((decoded, consumed))) => {
          trace!(opcode = ?decoded.opcode, "frame from client");
          match decoded.opcode {
            OpCode::Close => {
              let echo = match close_code_of(&decoded.payload) {
                Some(code) if !code.is_allowed() => {
                  warn!(code = code.0, "client sent disallowed close code");
                  frame::encode_close(&CloseCode::PROTOCOL_ERROR.0.to_be_bytes())
                }
                _ => frame::encode_close(&decoded.payload),
              };
              self.write_best_effort(&echo);
              self.state = SessionState::Closing;
              return Ok(());
            }
            OpCode::Ping => {
              let pong = frame::encode_pong(&decoded.payload);
              self.write_best_effort(&pong);
            }
            _ => {
              // Text/binary/pong: this relay treats clients as
              // receivers only and ignores the payload.
            }
          }
          buf.drain(..consumed);
        }
        Err(_) => {
          self.state = SessionState::Closing;
          return Ok(());
        }
      }
    }
  }

  /// A single non-blocking write of a pre-encoded frame. Partial
  /// writes are treated as failures per the backpressure policy
  /// (§4.4): this relay drops slow clients rather than buffering.
  pub fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
    let n = self.stream.write(bytes)?;
    if n != bytes.len() {
      return Err(io::Error::new(ErrorKind::WriteZero, "partial write"));
    }
    Ok(())
  }

  fn write_best_effort(&mut self, bytes: &[u8]) {
    let _ = self.stream.write_all(bytes);
  }

  pub fn is_open(&self) -> bool {
    self.state == SessionState::Open
  }
}

/// Extracts the close code from a close frame's payload, if present
/// (RFC 6455 §5.5.1: the first two bytes, network byte order).
fn close_code_of(payload: &[u8]) -> Option<CloseCode> {
  let bytes: [u8; 2] = payload.get(0..2)?.try_into().ok()?;
  Some(CloseCode(u16::from_be_bytes(bytes)))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn disallowed_close_code_is_rejected() {
    assert!(!close_code_of(&[0x03, 0xEE]).unwrap().is_allowed()); // 1006, reserved for local use
    assert!(close_code_of(&[0x03, 0xE8]).unwrap().is_allowed()); // 1000
  }

  #[test]
  fn missing_close_code_is_none() {
    assert!(close_code_of(&[]).is_none());
  }
}
