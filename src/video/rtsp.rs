//! Bridges an RTSP/H.264 producer into the video hub: wraps each
//! access unit as a binary frame and keeps the sticky `avcC` config
//! current for late joiners (§4.4, §6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::frame;
use crate::hub::Hub;
use crate::video::avcc;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// One decoded unit out of the RTSP/H.264 demuxer. The demuxer itself
/// is an out-of-scope collaborator (§1, §6) — this crate only
/// consumes its output.
pub enum VideoEvent {
  /// Decoder-provided `avcC` configuration record, already assembled
  /// by the demuxer's codec context — sent through verbatim rather
  /// than rebuilt from a NAL scan.
  Extradata(Vec<u8>),
  AccessUnit { data: Vec<u8>, keyframe: bool },
}

/// Collaborator interface for the RTSP ingest side. A real
/// implementation demuxes RTP/H.264 over an RTSP session; this crate
/// only needs the event stream it produces.
pub trait RtspSource: Send {
  /// Establishes (or re-establishes) the upstream RTSP session.
  fn connect(&mut self) -> anyhow::Result<()>;

  /// Blocks until the next access unit or extradata event is available.
  /// Returns `Err` on any unrecoverable stream condition, which the
  /// producer loop treats the same as a dropped connection.
  fn next_event(&mut self) -> anyhow::Result<VideoEvent>;
}

/// Runs the ingest loop on the calling thread until `running` clears.
/// Intended to be spawned on its own dedicated thread (§5), separate
/// from the video `Reactor`'s thread, since an RTSP session has no
/// place in the client-facing reactor's token space.
pub fn run_producer(mut source: Box<dyn RtspSource>, hub: Arc<Hub>, running: Arc<AtomicBool>) {
  while running.load(Ordering::SeqCst) {
    if let Err(e) = source.connect() {
      warn!(error = %e, "rtsp source unreachable, retrying in 1s");
      std::thread::sleep(RECONNECT_BACKOFF);
      continue;
    }
    info!("rtsp source connected");

    loop {
      if !running.load(Ordering::SeqCst) {
        return;
      }
      match source.next_event() {
        Ok(VideoEvent::Extradata(record)) => match frame::encode_binary(&record) {
          Ok(bytes) => hub.set_sticky_config(bytes),
          Err(e) => warn!(error = %e, "failed to frame decoder-provided extradata"),
        },
        Ok(VideoEvent::AccessUnit { data, keyframe }) => {
          // Extradata is sent as soon as the decoder exposes it; this
          // is the fallback for sources that never provide one, tried
          // on the first keyframe per frame (cheap once steady-state).
          if keyframe && !hub.has_sticky_config() {
            let (sps, pps) = avcc::find_sps_pps(&data);
            if let (Some(sps), Some(pps)) = (sps, pps) {
              publish_sticky_config(&hub, sps, pps);
            }
          }
          match frame::encode_binary(&data) {
            Ok(bytes) => hub.broadcast(&bytes),
            Err(e) => warn!(error = %e, "dropping oversize access unit"),
          }
        }
        Err(e) => {
          warn!(error = %e, "rtsp source lost, reconnecting in 1s");
          break;
        }
      }
    }

    hub.clear_sticky_config();
    std::thread::sleep(RECONNECT_BACKOFF);
  }
}

fn publish_sticky_config(hub: &Hub, sps: &[u8], pps: &[u8]) {
  let record = avcc::build_avcc(sps, pps);
  match frame::encode_binary(&record) {
    Ok(bytes) => hub.set_sticky_config(bytes),
    Err(e) => warn!(error = %e, "failed to encode avcC sticky config"),
  }
}
