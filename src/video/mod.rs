//! Video channel: RTSP/H.264 ingest, `avcC` sticky config, fan-out to
//! browser clients as binary WebSocket frames (§4.4).

pub mod avcc;
pub mod ffmpeg_source;
pub mod rtsp;

pub use ffmpeg_source::FfmpegRtspSource;
pub use rtsp::{run_producer, RtspSource, VideoEvent};
