use thiserror::Error;

/// Errors produced while decoding a WebSocket frame header or payload.
#[derive(Error, Debug)]
pub enum FrameError {
  #[error("reserved bits must be zero")]
  ReservedBitsSet,
  #[error("unknown opcode {0:#x}")]
  UnknownOpcode(u8),
  #[error("control frames must not be fragmented")]
  ControlFrameFragmented,
  #[error("control frame payload exceeds 125 bytes")]
  ControlFrameTooLarge,
  #[error("fragmented data frames are not supported")]
  Fragmented,
  #[error("payload exceeds the configured ceiling of {0} bytes")]
  PayloadTooLarge(usize),
}

/// Errors produced while parsing an opening HTTP handshake request.
#[derive(Error, Debug)]
pub enum HandshakeError {
  #[error("header line exceeds 255 bytes")]
  HeaderLineTooLong,
  #[error("request line is missing method or URI")]
  MalformedRequestLine,
  #[error("missing Sec-WebSocket-Key header")]
  MissingKey,
  #[error("unsupported Sec-WebSocket-Version (server supports 13)")]
  UnsupportedVersion,
  #[error("Upgrade header does not name websocket")]
  NotWebsocketUpgrade,
  #[error("response did not grant the expected Sec-WebSocket-Accept")]
  AcceptMismatch,
  #[error("response was not HTTP/1.1 101 Switching Protocols")]
  NotSwitchingProtocols,
}

/// Errors that terminate a single client session without affecting others.
#[derive(Error, Debug)]
pub enum SessionError {
  #[error("receive buffer overflowed before handshake completed")]
  RxOverflow,
  #[error(transparent)]
  Frame(#[from] FrameError),
  #[error(transparent)]
  Handshake(#[from] HandshakeError),
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// Errors returned by Hub operations.
#[derive(Error, Debug)]
pub enum HubError {
  #[error("hub is at capacity")]
  Full,
}
