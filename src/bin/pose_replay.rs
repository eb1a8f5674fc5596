//! I420 の生フレームファイルを再生して姿勢を JSON Lines で出力する
//!
//! 使い方: pose_replay <frames.yuv> [config.toml]
//!
//! フレームサイズと FPS は `[replay]`、回転角は `[camera]` の設定から決める。
//! Ctrl-C で停止する。

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use motion_tracker::camera::{camera_rotation, RawFrame};
use motion_tracker::config::Config;
use motion_tracker::pipeline::{frame_channel, FrameScheduler, SourceInfo};
use motion_tracker::pose::PoseDetector;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("Pose Replay ({})", env!("GIT_VERSION"));

    let mut args = std::env::args().skip(1);
    let input = args.next().context("usage: pose_replay <frames.yuv> [config.toml]")?;
    let config_path = args.next().unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load_or_default(&config_path);

    let rotation = camera_rotation(
        config.camera.sensor_orientation,
        config.camera.device_orientation,
        config.camera.lens_facing,
    )?;
    info!(
        "camera: {} sensor={} device={} -> rotation {}",
        config.camera.lens_facing.name(),
        config.camera.sensor_orientation,
        config.camera.device_orientation,
        rotation.degrees()
    );

    // SIGINT / SIGTERM → 停止
    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&stop))?;

    let detector = PoseDetector::new(&config.model.model_path)?;
    let (producer, consumer) = frame_channel(config.scheduler.source_depth);
    let (ready_tx, ready_rx) = bounded::<SourceInfo>(1);
    // 購読者の登録が済むまでフレームを流さない
    let (go_tx, go_rx) = bounded::<()>(1);

    let (width, height) = (config.replay.width, config.replay.height);
    let frame_len = (width * height + 2 * width.div_ceil(2) * height.div_ceil(2)) as usize;
    let frame_interval = config.replay.frame_interval();
    let file = File::open(&input).with_context(|| format!("failed to open {}", input))?;

    let capture_stop = Arc::clone(&stop);
    let capture = thread::Builder::new().name("replay-capture".to_string()).spawn(move || {
        let mut reader = BufReader::new(file);
        let mut buf = vec![0u8; frame_len];
        let info = SourceInfo { width, height, rotation_degrees: rotation.degrees() };
        if ready_tx.send(info).is_err() {
            return;
        }
        drop(ready_tx);
        if go_rx.recv().is_err() {
            return;
        }

        while !capture_stop.load(Ordering::Relaxed) {
            if reader.read_exact(&mut buf).is_err() {
                info!("end of input");
                break;
            }
            let frame = match RawFrame::from_i420(width, height, rotation.degrees(), &buf) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("bad frame: {}", e);
                    continue;
                }
            };
            if producer.push(frame).is_err() {
                break;
            }
            thread::sleep(frame_interval);
        }
    })?;

    let scheduler = FrameScheduler::start(&config, detector, consumer, ready_rx)?;
    let poses = scheduler.sink().subscribe(config.scheduler.source_depth);
    go_tx.send(()).context("capture thread exited before start")?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    while !stop.load(Ordering::Relaxed) {
        match poses.recv_timeout(Duration::from_millis(100)) {
            Ok(tracked) => {
                writeln!(out, "{}", serde_json::to_string(&tracked)?)?;
            }
            Err(RecvTimeoutError::Timeout) => {
                if scheduler.is_finished() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    out.flush()?;

    stop.store(true, Ordering::Relaxed);
    let stats = scheduler.stats();
    let tracker = scheduler.stop()?;
    if capture.join().is_err() {
        warn!("capture thread panicked");
    }

    let region = tracker.region();
    info!(
        "done: captured {} processed {} dropped {} errors {} | last region y={:.3} x={:.3} size={:.3}x{:.3}",
        stats.captured,
        stats.processed,
        stats.dropped,
        stats.errors,
        region.y_min(),
        region.x_min(),
        region.height(),
        region.width()
    );
    Ok(())
}
