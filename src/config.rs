//! CLI/environment configuration (§6).

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "relay-ws", about = "Fan-out telemetry and video relay")]
pub struct Config {
  /// Port the telemetry listener binds to.
  #[arg(long, env = "FRONTEND_PORT", default_value_t = 9001)]
  pub telemetry_port: u16,

  /// Port the video listener binds to.
  #[arg(long, env = "VIDEO_PORT", default_value_t = 8002)]
  pub video_port: u16,

  /// Upstream sensor feed, e.g. `ws://127.0.0.1:9000/ws`.
  #[arg(long, env = "TELEMETRY_UPSTREAM")]
  pub telemetry_upstream: String,

  /// Upstream RTSP source, e.g. `rtsp://127.0.0.1:8554/stream`.
  #[arg(long, env = "VIDEO_UPSTREAM")]
  pub video_upstream: String,

  /// Time-series store address, e.g. `redis://127.0.0.1:6379`.
  #[arg(long, env = "REDIS_ADDR", default_value = "redis://127.0.0.1:6379")]
  pub redis_addr: String,

  /// Directory CSV logs are written into.
  #[arg(long, env = "CSV_DIR", default_value = "logs")]
  pub csv_dir: PathBuf,

  /// Max simultaneous clients per hub.
  #[arg(long, env = "HUB_CAPACITY", default_value_t = 1024)]
  pub hub_capacity: usize,

  /// Per-session receive buffer size, in bytes (handshake phase only).
  #[arg(long, env = "RX_BUFFER_SIZE", default_value_t = 4096)]
  pub rx_buffer_size: usize,

  /// Telemetry broadcast coalescing window, in milliseconds.
  #[arg(long, env = "BROADCAST_COALESCE_MS", default_value_t = 100)]
  pub broadcast_coalesce_ms: u64,

  /// Backoff between upstream reconnect attempts, in milliseconds.
  #[arg(long, env = "RECONNECT_BACKOFF_MS", default_value_t = 1000)]
  pub reconnect_backoff_ms: u64,

  /// Redis pipeline batch size for `TS.ADD` flushes.
  #[arg(long, env = "PERSIST_BATCH_SIZE", default_value_t = 100)]
  pub persist_batch_size: usize,
}

/// A parsed `scheme://host:port/path` upstream URL, enough for the
/// two upstreams this relay dials (ws and rtsp schemes).
pub struct ParsedUrl {
  pub host: String,
  pub port: u16,
  pub path: String,
}

/// Parses the subset of URL syntax the relay's upstreams need: no
/// query strings, no userinfo, no IPv6 literals — matching what the
/// original's hardcoded `ip`/`port` config fields ever needed.
pub fn parse_ws_url(url: &str) -> Option<ParsedUrl> {
  let rest = url.strip_prefix("ws://").or_else(|| url.strip_prefix("wss://"))?;
  let (authority, path) = match rest.find('/') {
    Some(idx) => (&rest[..idx], &rest[idx..]),
    None => (rest, "/"),
  };
  let (host, port) = match authority.rsplit_once(':') {
    Some((host, port)) => (host, port.parse().ok()?),
    None => (authority, 80),
  };
  Some(ParsedUrl {
    host: host.to_string(),
    port,
    path: path.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_url_with_path() {
    let parsed = parse_ws_url("ws://10.0.0.5:9000/sensors").unwrap();
    assert_eq!(parsed.host, "10.0.0.5");
    assert_eq!(parsed.port, 9000);
    assert_eq!(parsed.path, "/sensors");
  }

  #[test]
  fn defaults_to_root_path() {
    let parsed = parse_ws_url("ws://example.com:81").unwrap();
    assert_eq!(parsed.path, "/");
  }

  #[test]
  fn rejects_non_ws_scheme() {
    assert!(parse_ws_url("http://example.com").is_none());
  }
}
