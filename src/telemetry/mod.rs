//! Upstream JSON sensor feed → decode → classify → persist →
//! broadcast, with 100 ms coalescing (§4.6).

pub mod classify;
pub mod csv_log;
pub mod decode;
pub mod persist;

use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpStream as StdTcpStream, ToSocketAddrs};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use mio::net::TcpStream;
use serde::Serialize;
use tracing::{debug, warn};

use crate::frame::{self, OpCode};
use crate::handshake;
use crate::hub::Hub;
use crate::reactor::UpstreamHandler;

#[derive(Serialize)]
struct OutgoingRecord<'a> {
  name: &'a str,
  value: f64,
  timestamp: u64,
  warning: u8,
}

/// Everything the telemetry pipeline needs to dial and re-dial its
/// upstream JSON-over-WebSocket source.
pub struct TelemetrySource {
  pub host: String,
  pub port: u16,
  pub path: String,
}

impl TelemetrySource {
  fn dial(&self) -> io::Result<StdTcpStream> {
    let addr = (self.host.as_str(), self.port)
      .to_socket_addrs()?
      .next()
      .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "DNS resolution failed"))?;
    let stream = StdTcpStream::connect(addr)?;
    stream.set_nodelay(true)?;

    let key = handshake::generate_key();
    let host_header = format!("{}:{}", self.host, self.port);
    let request = handshake::build_request(&host_header, &self.path, &key);
    let mut stream = stream;
    stream.write_all(request.as_bytes())?;

    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    loop {
      let n = stream.read(&mut byte)?;
      if n == 0 {
        return Err(io::Error::new(ErrorKind::UnexpectedEof, "eof during handshake"));
      }
      response.push(byte[0]);
      if response.ends_with(b"\r\n\r\n") {
        break;
      }
      if response.len() > 8192 {
        return Err(io::Error::new(ErrorKind::InvalidData, "handshake response too large"));
      }
    }

    let response_str = String::from_utf8_lossy(&response);
    handshake::validate_response(&response_str, &key)
      .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;

    Ok(stream)
  }
}

pub struct TelemetryPipeline {
  source: TelemetrySource,
  recv_buf: Vec<u8>,
  csv: Option<csv_log::CsvLog>,
  sink: persist::TsSink,
  batch: Vec<(String, f64, u64, u8)>,
  last_broadcast: Instant,
  coalesce_window: Duration,
}

impl TelemetryPipeline {
  pub fn new(
    source: TelemetrySource,
    csv: Option<csv_log::CsvLog>,
    sink: persist::TsSink,
    coalesce_window: Duration,
  ) -> Self {
    TelemetryPipeline {
      source,
      recv_buf: Vec::with_capacity(8192),
      csv,
      sink,
      batch: Vec::new(),
      last_broadcast: Instant::now(),
      coalesce_window,
    }
  }

  fn ingest(&mut self, payload: &[u8]) {
    let records = match decode::decode(payload) {
      Ok(records) => records,
      Err(e) => {
        warn!(error = %e, "failed to decode telemetry payload");
        return;
      }
    };

    for record in records {
      let timestamp_ns = record.timestamp_ns.unwrap_or_else(now_ns);
      let warning = classify::classify(&record.name, record.value);

      self.sink.push(&record.name, timestamp_ns, record.value);
      if let Some(csv) = self.csv.as_mut() {
        if let Err(e) = csv.append(timestamp_ns, &record.name, record.value) {
          warn!(error = %e, "csv log write failed");
        }
      }
      self.batch.push((record.name, record.value, timestamp_ns, warning));
    }
    self.sink.flush();
  }

  fn maybe_broadcast(&mut self, hub: &Hub) {
    if self.last_broadcast.elapsed() < self.coalesce_window || self.batch.is_empty() {
      return;
    }
    let outgoing: Vec<OutgoingRecord> = self
      .batch
      .iter()
      .map(|(name, value, ts, warning)| OutgoingRecord {
        name,
        value: *value,
        timestamp: *ts,
        warning: *warning,
      })
      .collect();

    match serde_json::to_string(&outgoing) {
      Ok(json) => {
        let frame_bytes = frame::encode_text(&json);
        hub.broadcast(&frame_bytes);
        debug!(count = outgoing.len(), "telemetry broadcast");
      }
      Err(e) => warn!(error = %e, "failed to serialize broadcast batch"),
    }

    self.batch.clear();
    self.last_broadcast = Instant::now();
  }
}

impl UpstreamHandler for TelemetryPipeline {
  fn on_readable(&mut self, stream: &mut TcpStream, hub: &Hub) -> io::Result<()> {
    let mut scratch = [0u8; 8192];
    loop {
      match stream.read(&mut scratch) {
        Ok(0) => return Err(io::Error::new(ErrorKind::UnexpectedEof, "upstream closed")),
        Ok(n) => {
          self.recv_buf.extend_from_slice(&scratch[..n]);
          self.drain_frames();
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => break,
        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
        Err(e) => return Err(e),
      }
    }
    self.maybe_broadcast(hub);
    Ok(())
  }

  fn reconnect(&mut self) -> io::Result<TcpStream> {
    let std_stream = self.source.dial()?;
    std_stream.set_nonblocking(true)?;
    Ok(TcpStream::from_std(std_stream))
  }

  fn on_tick(&mut self, hub: &Hub) {
    self.maybe_broadcast(hub);
  }
}

impl TelemetryPipeline {
  fn drain_frames(&mut self) {
    loop {
      let mut buf = std::mem::take(&mut self.recv_buf);
      match frame::decode_frame(&mut buf) {
        Ok(Some((decoded, consumed))) => {
          if decoded.opcode == OpCode::Text {
            let payload = decoded.payload.to_owned_payload();
            drop(decoded);
            buf.drain(..consumed);
            self.recv_buf = buf;
            self.ingest(&payload);
          } else {
            drop(decoded);
            buf.drain(..consumed);
            self.recv_buf = buf;
          }
        }
        Ok(None) => {
          self.recv_buf = buf;
          return;
        }
        Err(e) => {
          warn!(error = %e, "protocol error on telemetry upstream, dropping buffered bytes");
          self.recv_buf = Vec::new();
          return;
        }
      }
    }
  }
}

fn now_ns() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos() as u64)
    .unwrap_or(0)
}
