//! Fan-out WebSocket relay bridging a telemetry feed and a video
//! source to many browser-style clients.
//!
//! The core is the WebSocket relay engine: frame codec, opening
//! handshake, per-connection session state machine, the session
//! registry ("hub") with its broadcast and late-joiner replay
//! discipline, and the reactor that multiplexes one listener, one
//! upstream, and N clients on a single thread. Two pipelines —
//! telemetry and video — sit on top of that engine and are the only
//! parts of this crate aware of payload semantics.

pub mod close;
pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod hub;
pub mod mask;
pub mod reactor;
pub mod session;
pub mod telemetry;
pub mod video;

pub use close::CloseCode;
pub use error::{FrameError, HandshakeError, HubError, SessionError};
pub use frame::{Frame, OpCode, Payload};
pub use hub::{Hub, HubKind};
pub use reactor::{Reactor, UpstreamHandler};
pub use session::{Session, SessionState};
