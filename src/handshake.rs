//! Opening HTTP handshake: request-line + header parsing sufficient to
//! validate an Upgrade request and produce the 101 response, plus the
//! matching client-side helpers used when the relay dials an upstream
//! WebSocket source.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::error::HandshakeError;

const MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_HEADER_LINE: usize = 255;
const SUPPORTED_VERSION: u8 = 13;

/// A parsed opening WebSocket handshake request.
#[derive(Debug, Default)]
pub struct HandshakeRequest {
  pub method: String,
  pub uri: String,
  pub sec_websocket_key: Option<String>,
  pub sec_websocket_version: Option<u8>,
  pub upgrade_is_websocket: bool,
}

impl HandshakeRequest {
  fn is_opening(&self) -> bool {
    self.sec_websocket_key.is_some()
      && self.sec_websocket_version == Some(SUPPORTED_VERSION)
      && self.upgrade_is_websocket
  }
}

/// Outcome of running the handshake parser over a (possibly partial)
/// receive buffer.
pub enum HandshakeEvent {
  /// The terminating blank line has not appeared yet; keep buffering.
  Incomplete,
  /// A well-formed upgrade request; write [`accept_response`] back.
  Opening(HandshakeRequest),
  /// A malformed or non-websocket request; write [`reject_response`].
  Error(HandshakeError),
}

/// Parses headers over a CRLF stream, tolerant of bare LF, per §4.2.
pub fn parse(buf: &[u8]) -> HandshakeEvent {
  let mut lines = Vec::new();
  let mut start = 0usize;
  let mut terminated = false;

  for (i, &byte) in buf.iter().enumerate() {
    if byte == b'\n' {
      let mut end = i;
      if end > start && buf[end - 1] == b'\r' {
        end -= 1;
      }
      if end - start > MAX_HEADER_LINE {
        return HandshakeEvent::Error(HandshakeError::HeaderLineTooLong);
      }
      let line = &buf[start..end];
      start = i + 1;
      if line.is_empty() {
        terminated = true;
        break;
      }
      lines.push(line);
    }
  }

  if !terminated {
    if start < buf.len() && buf.len() - start > MAX_HEADER_LINE {
      return HandshakeEvent::Error(HandshakeError::HeaderLineTooLong);
    }
    return HandshakeEvent::Incomplete;
  }

  let Some((&request_line, headers)) = lines.split_first() else {
    return HandshakeEvent::Error(HandshakeError::MalformedRequestLine);
  };

  let mut request = match parse_request_line(request_line) {
    Some(r) => r,
    None => return HandshakeEvent::Error(HandshakeError::MalformedRequestLine),
  };

  for &header in headers {
    apply_header(&mut request, header);
  }

  if !request.upgrade_is_websocket {
    return HandshakeEvent::Error(HandshakeError::NotWebsocketUpgrade);
  }
  if request.sec_websocket_key.is_none() {
    return HandshakeEvent::Error(HandshakeError::MissingKey);
  }
  if request.sec_websocket_version != Some(SUPPORTED_VERSION) {
    return HandshakeEvent::Error(HandshakeError::UnsupportedVersion);
  }

  debug_assert!(request.is_opening());
  HandshakeEvent::Opening(request)
}

fn parse_request_line(line: &[u8]) -> Option<HandshakeRequest> {
  let line = std::str::from_utf8(line).ok()?;
  let mut parts = line.split(' ');
  let method = parts.next()?.to_string();
  let uri = parts.next()?.to_string();
  if method.is_empty() || uri.is_empty() {
    return None;
  }
  Some(HandshakeRequest {
    method,
    uri,
    sec_websocket_key: None,
    sec_websocket_version: None,
    upgrade_is_websocket: false,
  })
}

fn apply_header(request: &mut HandshakeRequest, line: &[u8]) {
  let Ok(line) = std::str::from_utf8(line) else { return };
  let Some((name, value)) = line.split_once(':') else { return };
  let value = value.trim_start();

  match name {
    "Sec-WebSocket-Key" => request.sec_websocket_key = Some(value.to_string()),
    "Sec-WebSocket-Version" => request.sec_websocket_version = value.parse().ok(),
    "Upgrade" => request.upgrade_is_websocket = value.eq_ignore_ascii_case("websocket"),
    _ => {}
  }
}

/// Derives `base64(SHA1(key ++ MAGIC))`, per RFC 6455 §1.3. Used both
/// to answer a client handshake and to validate an upstream server's
/// handshake response when the relay is acting as client.
pub fn accept_key(client_key: &str) -> String {
  let mut hasher = Sha1::new();
  hasher.update(client_key.as_bytes());
  hasher.update(MAGIC.as_bytes());
  BASE64.encode(hasher.finalize())
}

/// Builds the 101 Switching Protocols response for an opening request.
pub fn accept_response(request: &HandshakeRequest) -> String {
  let key = request
    .sec_websocket_key
    .as_deref()
    .expect("accept_response called on a non-opening request");
  format!(
    "HTTP/1.1 101 Switching Protocols\r\n\
     Upgrade: websocket\r\n\
     Connection: Upgrade\r\n\
     Sec-WebSocket-Accept: {}\r\n\r\n",
    accept_key(key)
  )
}

/// Builds the 400 Bad Request response, with the server's supported
/// version as a hint per §4.2.
pub fn reject_response() -> String {
  format!(
    "HTTP/1.1 400 Bad Request\r\n\
     Sec-WebSocket-Version: {SUPPORTED_VERSION}\r\n\r\n"
  )
}

/// Generates a random 16-byte nonce, base64-encoded, for use as a
/// client-side `Sec-WebSocket-Key` when the relay dials an upstream.
pub fn generate_key() -> String {
  let mut nonce = [0u8; 16];
  rand::thread_rng().fill_bytes(&mut nonce);
  BASE64.encode(nonce)
}

/// Builds the client-side upgrade request sent to an upstream source.
pub fn build_request(host: &str, path: &str, key: &str) -> String {
  format!(
    "GET {path} HTTP/1.1\r\n\
     Host: {host}\r\n\
     Upgrade: websocket\r\n\
     Connection: Upgrade\r\n\
     Sec-WebSocket-Key: {key}\r\n\
     Sec-WebSocket-Version: {SUPPORTED_VERSION}\r\n\r\n"
  )
}

/// Validates an upstream's 101 response against the key the relay sent.
pub fn validate_response(response: &str, key: &str) -> Result<(), HandshakeError> {
  if !response.starts_with("HTTP/1.1 101") {
    return Err(HandshakeError::NotSwitchingProtocols);
  }

  let accept_value = response
    .lines()
    .find_map(|line| {
      let (name, value) = line.split_once(':')?;
      if name.eq_ignore_ascii_case("sec-websocket-accept") {
        Some(value.trim())
      } else {
        None
      }
    })
    .ok_or(HandshakeError::AcceptMismatch)?;

  if accept_value != accept_key(key) {
    return Err(HandshakeError::AcceptMismatch);
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accept_key_matches_rfc_example() {
    assert_eq!(
      accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
      "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
    );
  }

  #[test]
  fn parses_opening_request() {
    let req = b"GET /ws HTTP/1.1\r\n\
      Host: example.com\r\n\
      Upgrade: websocket\r\n\
      Connection: Upgrade\r\n\
      Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
      Sec-WebSocket-Version: 13\r\n\r\n";

    match parse(req) {
      HandshakeEvent::Opening(request) => {
        assert_eq!(request.method, "GET");
        assert_eq!(request.uri, "/ws");
        assert_eq!(
          accept_response(&request),
          "HTTP/1.1 101 Switching Protocols\r\n\
           Upgrade: websocket\r\n\
           Connection: Upgrade\r\n\
           Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"
        );
      }
      _ => panic!("expected an opening handshake"),
    }
  }

  #[test]
  fn incomplete_request_is_buffered() {
    let partial = b"GET /ws HTTP/1.1\r\nHost: example.com\r\n";
    assert!(matches!(parse(partial), HandshakeEvent::Incomplete));
  }

  #[test]
  fn tolerates_bare_lf() {
    let req = b"GET /ws HTTP/1.1\n\
      Upgrade: websocket\n\
      Connection: Upgrade\n\
      Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\n\
      Sec-WebSocket-Version: 13\n\n";
    assert!(matches!(parse(req), HandshakeEvent::Opening(_)));
  }

  #[test]
  fn missing_version_is_rejected() {
    let req = b"GET /ws HTTP/1.1\r\n\
      Upgrade: websocket\r\n\
      Connection: Upgrade\r\n\
      Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
    assert!(matches!(
      parse(req),
      HandshakeEvent::Error(HandshakeError::UnsupportedVersion)
    ));
  }

  #[test]
  fn non_websocket_upgrade_is_rejected() {
    let req = b"GET /ws HTTP/1.1\r\n\
      Upgrade: h2c\r\n\
      Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
      Sec-WebSocket-Version: 13\r\n\r\n";
    assert!(matches!(
      parse(req),
      HandshakeEvent::Error(HandshakeError::NotWebsocketUpgrade)
    ));
  }

  #[test]
  fn oversize_header_line_is_rejected() {
    let mut req = b"GET /ws HTTP/1.1\r\n".to_vec();
    req.extend(std::iter::repeat(b'x').take(300));
    req.extend_from_slice(b"\r\n\r\n");
    assert!(matches!(
      parse(&req),
      HandshakeEvent::Error(HandshakeError::HeaderLineTooLong)
    ));
  }

  #[test]
  fn client_round_trip_validates() {
    let key = generate_key();
    let accept = accept_key(&key);
    let response = format!(
      "HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
    );
    assert!(validate_response(&response, &key).is_ok());
  }
}
