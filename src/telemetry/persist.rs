//! Batched, pipelined persistence into a time-series store (§4.6,
//! §6). Treated as an append-only sink: failures are logged and never
//! propagate to the broadcast path (§7).

use tracing::warn;

pub struct TsSink {
  conn: Option<redis::Connection>,
  pending: Vec<(String, u64, f64)>,
  batch_size: usize,
}

impl TsSink {
  pub fn connect(addr: &str, batch_size: usize) -> Self {
    let conn = redis::Client::open(addr)
      .and_then(|client| client.get_connection())
      .map_err(|e| warn!(error = %e, "failed to connect to time-series store"))
      .ok();
    TsSink {
      conn,
      pending: Vec::with_capacity(batch_size),
      batch_size,
    }
  }

  /// Queues a `TS.ADD name timestamp_ns value` command, flushing the
  /// batch once it reaches `batch_size` (default 100, §4.6).
  pub fn push(&mut self, name: &str, timestamp_ns: u64, value: f64) {
    self.pending.push((name.to_string(), timestamp_ns, value));
    if self.pending.len() >= self.batch_size {
      self.flush();
    }
  }

  /// Flushes whatever is queued, even if below the batch size —
  /// called at the end of each upstream read so a small trickle of
  /// records doesn't wait indefinitely for a full batch.
  pub fn flush(&mut self) {
    if self.pending.is_empty() {
      return;
    }
    let Some(conn) = self.conn.as_mut() else {
      self.pending.clear();
      return;
    };

    let mut pipe = redis::pipe();
    for (name, ts, value) in self.pending.drain(..) {
      pipe.cmd("TS.ADD").arg(name).arg(ts).arg(value).ignore();
    }
    if let Err(e) = pipe.query::<()>(conn) {
      warn!(error = %e, "time-series pipeline flush failed");
    }
  }
}
