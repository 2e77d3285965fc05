use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use relay_ws::config::{self, Config};
use relay_ws::hub::HubKind;
use relay_ws::reactor::Reactor;
use relay_ws::telemetry::{persist::TsSink, csv_log::CsvLog, TelemetryPipeline, TelemetrySource};
use relay_ws::video::{run_producer, FfmpegRtspSource};

fn main() -> Result<()> {
  let config = Config::parse();

  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  info!("relay-ws starting up");

  let running = Arc::new(AtomicBool::new(true));
  {
    let running = running.clone();
    ctrlc::set_handler(move || {
      info!("shutdown requested");
      running.store(false, Ordering::SeqCst);
    })
    .context("failed to install SIGINT handler")?;
  }

  let telemetry_addr: SocketAddr = format!("0.0.0.0:{}", config.telemetry_port)
    .parse()
    .context("invalid telemetry bind address")?;
  let video_addr: SocketAddr = format!("0.0.0.0:{}", config.video_port)
    .parse()
    .context("invalid video bind address")?;

  let telemetry_source = config::parse_ws_url(&config.telemetry_upstream)
    .context("invalid telemetry upstream URL")?;
  let csv = match CsvLog::create(&config.csv_dir, started_at_secs()) {
    Ok(csv) => Some(csv),
    Err(e) => {
      tracing::warn!(error = %e, "failed to open csv log, continuing without one");
      None
    }
  };
  let sink = TsSink::connect(&config.redis_addr, config.persist_batch_size);
  let pipeline = TelemetryPipeline::new(
    TelemetrySource {
      host: telemetry_source.host,
      port: telemetry_source.port,
      path: telemetry_source.path,
    },
    csv,
    sink,
    Duration::from_millis(config.broadcast_coalesce_ms),
  );

  let telemetry_reactor = Reactor::bind_with_rx_capacity(
    telemetry_addr,
    config.hub_capacity,
    HubKind::Telemetry,
    Some(Box::new(pipeline)),
    running.clone(),
    Duration::from_millis(config.reconnect_backoff_ms),
    config.rx_buffer_size,
  )
  .context("failed to bind telemetry listener")?;
  info!(port = config.telemetry_port, "telemetry listener bound");

  let video_reactor = Reactor::bind_with_rx_capacity(
    video_addr,
    config.hub_capacity,
    HubKind::Video,
    None,
    running.clone(),
    Duration::from_millis(config.reconnect_backoff_ms),
    config.rx_buffer_size,
  )
  .context("failed to bind video listener")?;
  info!(port = config.video_port, "video listener bound");

  let video_hub = video_reactor.hub();
  let video_upstream_url = config.video_upstream.clone();

  let telemetry_thread = std::thread::spawn(move || telemetry_reactor.run());
  let video_thread = std::thread::spawn(move || video_reactor.run());
  let producer_thread = {
    let running = running.clone();
    std::thread::spawn(move || {
      let source = Box::new(FfmpegRtspSource::new(video_upstream_url));
      run_producer(source, video_hub, running);
    })
  };

  telemetry_thread.join().expect("telemetry reactor thread panicked");
  video_thread.join().expect("video reactor thread panicked");
  producer_thread.join().expect("rtsp producer thread panicked");

  info!("relay-ws shut down cleanly");
  Ok(())
}

fn started_at_secs() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}
