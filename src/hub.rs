//! The registry of sessions bound to one listener, plus the broadcast
//! primitive and the sticky config frame used to bootstrap late
//! joiners on the video channel (§4.4).

use std::sync::Mutex;

use mio::net::TcpStream;
use mio::{Registry, Token};
use tracing::{info, warn};

use crate::error::HubError;
use crate::session::Session;

/// Token offset: slot `i` in the hub is registered at `Token(CLIENT_TOKEN_BASE + i)`.
/// Tokens below this are reserved for the listener and upstream fds.
pub const CLIENT_TOKEN_BASE: usize = 2;
pub const LISTENER_TOKEN: Token = Token(0);
pub const UPSTREAM_TOKEN: Token = Token(1);

/// Whether late joiners need a sticky config replay. Only the video
/// hub uses `Video`; the telemetry hub never replays history (§1
/// Non-goals: no historical replay of telemetry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubKind {
  Telemetry,
  Video,
}

struct HubInner {
  slots: Vec<Option<Session>>,
  sticky_config: Option<Vec<u8>>,
}

pub struct Hub {
  inner: Mutex<HubInner>,
  capacity: usize,
  kind: HubKind,
  registry: Registry,
  rx_capacity: usize,
}

pub fn token_for_slot(slot: usize) -> Token {
  Token(CLIENT_TOKEN_BASE + slot)
}

pub fn slot_for_token(token: Token) -> Option<usize> {
  token.0.checked_sub(CLIENT_TOKEN_BASE)
}

impl Hub {
  pub fn new(capacity: usize, kind: HubKind, registry: Registry) -> Self {
    Self::with_rx_capacity(capacity, kind, registry, crate::session::DEFAULT_RX_CAPACITY)
  }

  pub fn with_rx_capacity(
    capacity: usize,
    kind: HubKind,
    registry: Registry,
    rx_capacity: usize,
  ) -> Self {
    let mut slots = Vec::with_capacity(capacity);
    slots.resize_with(capacity, || None);
    Hub {
      inner: Mutex::new(HubInner {
        slots,
        sticky_config: None,
      }),
      capacity,
      kind,
      registry,
      rx_capacity,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Finds a free slot, registers the stream for edge-triggered read
  /// interest, and stores the new `Connecting` session. Returns the
  /// slot index on success.
  pub fn insert(&self, mut stream: TcpStream) -> Result<usize, HubError> {
    let mut inner = self.inner.lock().unwrap();
    let slot = inner.slots.iter().position(|s| s.is_none()).ok_or(HubError::Full)?;

    self
      .registry
      .register(&mut stream, token_for_slot(slot), mio::Interest::READABLE)
      .map_err(|_| HubError::Full)?;

    inner.slots[slot] = Some(Session::new(stream, self.rx_capacity));
    Ok(slot)
  }

  /// Deregisters and closes the session in `slot`, resetting it to
  /// empty. Idempotent: removing an already-empty slot is a no-op.
  pub fn remove(&self, slot: usize) {
    let mut inner = self.inner.lock().unwrap();
    if let Some(mut session) = inner.slots.get_mut(slot).and_then(Option::take) {
      let _ = self.registry.deregister(&mut session.stream);
    }
  }

  /// Drives a client readable event through its session's state
  /// machine. Holds the hub lock for the whole call so that the
  /// sticky-config replay on a Connecting→Open transition can never
  /// be interleaved with a concurrent `broadcast` (§4.4 ordering
  /// guarantee). Returns `None` if the slot is already empty.
  pub fn handle_client_readable(
    &self,
    slot: usize,
  ) -> Option<Result<crate::session::Outcome, crate::error::SessionError>> {
    let mut inner = self.inner.lock().unwrap();
    let sticky = if self.kind == HubKind::Video {
      inner.sticky_config.clone()
    } else {
      None
    };
    inner
      .slots
      .get_mut(slot)
      .and_then(Option::as_mut)
      .map(|session| session.on_readable(sticky.as_deref()))
  }

  /// Whether a sticky config has already been published this upstream
  /// session (video hub only; always `false` for telemetry).
  pub fn has_sticky_config(&self) -> bool {
    self.inner.lock().unwrap().sticky_config.is_some()
  }

  /// Idempotent set-once-per-upstream-session (video hub only).
  pub fn set_sticky_config(&self, frame_bytes: Vec<u8>) {
    if self.kind != HubKind::Video {
      return;
    }
    let mut inner = self.inner.lock().unwrap();
    if inner.sticky_config.is_none() {
      inner.sticky_config = Some(frame_bytes);
    }
  }

  /// Cleared when the upstream reconnects so the next session can
  /// publish a fresh configuration (§4.5 upstream supervisor).
  pub fn clear_sticky_config(&self) {
    let mut inner = self.inner.lock().unwrap();
    inner.sticky_config = None;
  }

  /// Attempts a single non-blocking write of `frame_bytes` to every
  /// `Open`, handshake-complete session. A session whose write fails
  /// is marked `Closing` rather than retried within this call — it is
  /// reaped on its next reactor tick. Per the at-least-once invariant
  /// (§4.4, §8), every session `Open` when `broadcast` begins either
  /// receives the bytes or is transitioned to `Closing`; none is
  /// silently skipped.
  pub fn broadcast(&self, frame_bytes: &[u8]) {
    let mut inner = self.inner.lock().unwrap();
    for session in inner.slots.iter_mut().flatten() {
      if !session.is_open() {
        continue;
      }
      if let Err(e) = session.send(frame_bytes) {
        warn!(error = %e, "broadcast write failed, closing session");
        session.state = crate::session::SessionState::Closing;
      }
    }
  }

  /// Accepts connections from `listener` until `EAGAIN`, per the
  /// edge-triggered drain contract (§4.5). Saturation rejects the
  /// accepted socket outright rather than queuing it (§7).
  pub fn accept_loop(&self, listener: &mio::net::TcpListener) {
    loop {
      match listener.accept() {
        Ok((stream, _addr)) => match self.insert(stream) {
          Ok(slot) => info!(slot, "accepted client"),
          Err(HubError::Full) => {
            warn!(capacity = self.capacity, "hub saturated, rejecting accept");
          }
          Err(e) => warn!(error = %e, "failed to register accepted client"),
        },
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
        Err(e) => {
          warn!(error = %e, "accept() failed");
          break;
        }
      }
    }
  }

  /// Sends a best-effort close frame to and deregisters every session,
  /// for cooperative shutdown (§4.5).
  pub fn close_all(&self) {
    let mut inner = self.inner.lock().unwrap();
    let close_frame = crate::frame::encode_close(&[]);
    for slot in inner.slots.iter_mut() {
      if let Some(session) = slot {
        let _ = session.send(&close_frame);
        let _ = self.registry.deregister(&mut session.stream);
      }
      *slot = None;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn make_hub(capacity: usize, kind: HubKind) -> (Hub, mio::Poll) {
    let poll = mio::Poll::new().unwrap();
    let registry = poll.registry().try_clone().unwrap();
    (Hub::new(capacity, kind, registry), poll)
  }

  #[test]
  fn sticky_config_is_telemetry_noop() {
    let (hub, _poll) = make_hub(4, HubKind::Telemetry);
    hub.set_sticky_config(vec![1, 2, 3]);
    let inner = hub.inner.lock().unwrap();
    assert!(inner.sticky_config.is_none());
  }

  #[test]
  fn sticky_config_is_set_once() {
    let (hub, _poll) = make_hub(4, HubKind::Video);
    hub.set_sticky_config(vec![1, 2, 3]);
    hub.set_sticky_config(vec![4, 5, 6]);
    let inner = hub.inner.lock().unwrap();
    assert_eq!(inner.sticky_config.as_deref(), Some(&[1u8, 2, 3][..]));
  }

  /// A connected loopback pair: `server` is the nonblocking side meant
  /// for `Hub::insert`, `client` is the plain blocking peer a test
  /// drives by hand.
  fn loopback_pair() -> (TcpStream, std::net::TcpStream) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = std::net::TcpStream::connect(addr).unwrap();
    let (server, _) = listener.accept().unwrap();
    server.set_nonblocking(true).unwrap();
    (TcpStream::from_std(server), client)
  }

  fn handshake_request() -> Vec<u8> {
    b"GET /ws HTTP/1.1\r\n\
      Upgrade: websocket\r\n\
      Connection: Upgrade\r\n\
      Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
      Sec-WebSocket-Version: 13\r\n\r\n"
      .to_vec()
  }

  #[test]
  fn saturation_rejects_beyond_capacity() {
    let (hub, _poll) = make_hub(2, HubKind::Telemetry);
    let (s1, _c1) = loopback_pair();
    let (s2, _c2) = loopback_pair();
    let (s3, _c3) = loopback_pair();

    assert!(hub.insert(s1).is_ok());
    assert!(hub.insert(s2).is_ok());
    assert!(matches!(hub.insert(s3), Err(HubError::Full)));
  }

  #[test]
  fn late_joiner_receives_sticky_config_before_any_live_frame() {
    use std::io::{Read, Write};

    let (hub, _poll) = make_hub(4, HubKind::Video);
    let sticky = crate::frame::encode_binary(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    hub.set_sticky_config(sticky.clone());

    let (server, mut client) = loopback_pair();
    client.write_all(&handshake_request()).unwrap();

    let slot = hub.insert(server).unwrap();
    // Drive the handshake to completion; the sticky config must be
    // replayed as part of this same transition to Open (§4.4).
    let outcome = hub.handle_client_readable(slot);
    assert!(matches!(outcome, Some(Ok(crate::session::Outcome::Continue))));

    let mut response = vec![0u8; 4096];
    let n = client.read(&mut response).unwrap();
    let response = &response[..n];

    let header_end = response
      .windows(4)
      .position(|w| w == b"\r\n\r\n")
      .map(|i| i + 4)
      .expect("101 response terminator");
    assert!(response[..header_end].starts_with(b"HTTP/1.1 101"));
    assert_eq!(&response[header_end..], &sticky[..]);
  }
}
