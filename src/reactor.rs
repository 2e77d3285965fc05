//! The event loop: one listener fd, one optional upstream fd, N client
//! fds, dispatched by identity (§4.5). One `Reactor` per listener
//! pair, each run on its own dedicated thread (§5).

use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll};
use tracing::{error, info, warn};

use crate::hub::{self, Hub, LISTENER_TOKEN, UPSTREAM_TOKEN};

/// Upper bound on simultaneously-ready events per `epoll_wait`-style
/// poll, matching the original's `events[1024]` (main loop) /
/// `events[64]` (video loop) arrays — sized generously here since
/// `Events` just grows a `Vec`.
const EVENTS_CAPACITY: usize = 1024;

/// How long the reactor blocks waiting for readiness before checking
/// the shutdown flag again (§4.5, §5).
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// A pipeline's hook into upstream data: called whenever the upstream
/// fd is readable, and on loss of the upstream connection. Implemented
/// separately by the telemetry and video pipelines.
pub trait UpstreamHandler: Send {
  /// Called when the upstream socket has bytes ready. Must drain
  /// `stream` until `EAGAIN` (§4.5 edge-triggered contract). An `Err`
  /// return (EOF or hard I/O error) triggers the reconnect supervisor.
  fn on_readable(
    &mut self,
    stream: &mut mio::net::TcpStream,
    hub: &Hub,
  ) -> io::Result<()>;

  /// Re-establishes the upstream connection, returning the new
  /// connected, non-blocking stream to register with the reactor.
  fn reconnect(&mut self) -> io::Result<mio::net::TcpStream>;

  /// Called once per reactor tick regardless of readiness, so
  /// time-driven behavior (telemetry's 100 ms coalescing tick) has
  /// somewhere to run even with no upstream bytes pending.
  fn on_tick(&mut self, _hub: &Hub) {}
}

pub struct Reactor {
  hub: Arc<Hub>,
  listener: TcpListener,
  poll: Poll,
  upstream: Option<(mio::net::TcpStream, Box<dyn UpstreamHandler>)>,
  running: Arc<AtomicBool>,
  reconnect_backoff: Duration,
}

impl Reactor {
  /// Binds `addr`, builds a fresh `Hub` sharing this reactor's
  /// registry, and optionally dials an upstream via `handler`. The
  /// initial upstream connect blocks with a `reconnect_backoff` retry
  /// (§9); per the design note's recommendation, the listener is
  /// already accepting clients during this phase.
  pub fn bind(
    addr: SocketAddr,
    hub_capacity: usize,
    kind: hub::HubKind,
    mut handler: Option<Box<dyn UpstreamHandler>>,
    running: Arc<AtomicBool>,
    reconnect_backoff: Duration,
  ) -> anyhow::Result<Self> {
    Self::bind_with_rx_capacity(
      addr,
      hub_capacity,
      kind,
      handler.take(),
      running,
      reconnect_backoff,
      crate::session::DEFAULT_RX_CAPACITY,
    )
  }

  /// Same as [`Reactor::bind`], with an explicit per-session
  /// pre-handshake receive buffer size (§3, §6 `rx_buffer_size`).
  pub fn bind_with_rx_capacity(
    addr: SocketAddr,
    hub_capacity: usize,
    kind: hub::HubKind,
    mut handler: Option<Box<dyn UpstreamHandler>>,
    running: Arc<AtomicBool>,
    reconnect_backoff: Duration,
    rx_capacity: usize,
  ) -> anyhow::Result<Self> {
    let mut listener = TcpListener::bind(addr)?;
    let poll = Poll::new()?;
    poll
      .registry()
      .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let hub = Arc::new(Hub::with_rx_capacity(
      hub_capacity,
      kind,
      poll.registry().try_clone()?,
      rx_capacity,
    ));

    let upstream = if let Some(handler) = handler.take() {
      let mut handler = handler;
      let mut stream = loop {
        if !running.load(Ordering::SeqCst) {
          anyhow::bail!("shutdown requested during initial upstream connect");
        }
        match handler.reconnect() {
          Ok(stream) => break stream,
          Err(e) => {
            warn!(error = %e, duration_ms = reconnect_backoff.as_millis() as u64, "upstream unreachable, retrying");
            std::thread::sleep(reconnect_backoff);
          }
        }
      };
      poll
        .registry()
        .register(&mut stream, UPSTREAM_TOKEN, Interest::READABLE)?;
      Some((stream, handler))
    } else {
      None
    };

    Ok(Reactor {
      hub,
      listener,
      poll,
      upstream,
      running,
      reconnect_backoff,
    })
  }

  pub fn hub(&self) -> Arc<Hub> {
    self.hub.clone()
  }

  /// Runs the event loop until the shutdown flag is observed, then
  /// cleans up (§4.5).
  pub fn run(mut self) {
    let mut events = Events::with_capacity(EVENTS_CAPACITY);

    while self.running.load(Ordering::SeqCst) {
      if let Err(e) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
        if e.kind() == ErrorKind::Interrupted {
          continue;
        }
        error!(error = %e, "poll() failed");
        break;
      }

      for event in events.iter() {
        match event.token() {
          LISTENER_TOKEN => self.hub.accept_loop(&self.listener),
          UPSTREAM_TOKEN => self.handle_upstream(),
          token => {
            if let Some(slot) = hub::slot_for_token(token) {
              self.handle_client(slot);
            }
          }
        }
      }

      if let Some((_, handler)) = self.upstream.as_mut() {
        handler.on_tick(&self.hub);
      }
    }

    self.shutdown();
  }

  fn handle_client(&self, slot: usize) {
    match self.hub.handle_client_readable(slot) {
      None => {}
      Some(Ok(crate::session::Outcome::Continue)) => {}
      Some(Ok(crate::session::Outcome::Close)) | Some(Err(_)) => {
        self.hub.remove(slot);
      }
    }
  }

  fn handle_upstream(&mut self) {
    let lost = match self.upstream.as_mut() {
      Some((stream, handler)) => handler.on_readable(stream, &self.hub).is_err(),
      None => false,
    };
    if lost {
      self.reconnect_upstream();
    }
  }

  /// On upstream EOF/error: close the fd, clear the sticky config,
  /// back off 1s, redial, re-register (§4.5, §7).
  fn reconnect_upstream(&mut self) {
    let Some((stream, handler)) = self.upstream.as_mut() else {
      return;
    };
    let _ = self.poll.registry().deregister(stream);
    self.hub.clear_sticky_config();

    loop {
      if !self.running.load(Ordering::SeqCst) {
        return;
      }
      match handler.reconnect() {
        Ok(mut new_stream) => {
          if self
            .poll
            .registry()
            .register(&mut new_stream, UPSTREAM_TOKEN, Interest::READABLE)
            .is_ok()
          {
            self.upstream.as_mut().unwrap().0 = new_stream;
            info!("upstream reconnected");
            return;
          }
        }
        Err(e) => {
          warn!(error = %e, "upstream reconnect failed, retrying");
        }
      }
      std::thread::sleep(self.reconnect_backoff);
    }
  }

  fn shutdown(mut self) {
    info!("reactor shutting down");
    self.hub.close_all();
    if let Some((mut stream, _)) = self.upstream.take() {
      let _ = self.poll.registry().deregister(&mut stream);
    }
    let _ = self.poll.registry().deregister(&mut self.listener);
  }
}
