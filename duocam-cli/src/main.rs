//! Diagnostics for a running duocam capture process: inspect the shared
//! frame ring and detection slot, or dry-run the switch controller against a
//! synthetic brightness ramp.

use std::time::{Duration, Instant};

use clap::Parser;
use tracing::info;

use duocam_shm::{DetectionSlotReader, FrameRingReader};
use duocam_switch::{CameraSwitchConfig, CameraSwitchController, SwitchDecision};
use duocam_types::{CameraId, Frame};

#[derive(Debug, Parser)]
struct WatchFrames {
    /// shared memory object holding the frame ring
    #[arg(short, long, default_value = "duocam-frames")]
    name: String,

    /// poll interval in milliseconds
    #[arg(short, long, default_value = "100")]
    interval_ms: u64,

    /// stop after this many new frames. 0 means run forever.
    #[arg(short, long, default_value = "0")]
    count: usize,
}

#[derive(Debug, Parser)]
struct Detections {
    /// shared memory object holding the detection slot
    #[arg(short, long, default_value = "duocam-detections")]
    name: String,
}

#[derive(Debug, Parser)]
struct Simulate {
    /// switch policy TOML; defaults apply when omitted
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// simulated samples per second
    #[arg(long, default_value = "10")]
    rate: u32,
}

/// capture-side diagnostics
#[derive(Debug, Parser)]
#[command(name = "duocam", author, version)]
enum Command {
    /// follow frame metadata as the ring advances
    WatchFrames(WatchFrames),
    /// dump the latest detection batch as JSON
    Detections(Detections),
    /// run a synthetic dusk/dawn brightness ramp through the controller
    Simulate(Simulate),
}

fn watch_frames(args: WatchFrames) -> anyhow::Result<()> {
    let reader = FrameRingReader::open(&args.name)?;
    let mut out = Frame::boxed();
    let mut last_seq: Option<u64> = None;
    let mut seen = 0usize;
    info!("watching frame ring {:?}", args.name);
    loop {
        match reader.read_latest(&mut out) {
            Ok(seq) if last_seq != Some(seq) => {
                last_seq = Some(seq);
                println!(
                    "#{seq} frame {} cam {} {}x{} format {} ({} bytes)",
                    out.frame_number,
                    out.camera()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|_| format!("?{}", out.camera_id)),
                    out.width,
                    out.height,
                    out.frame_format()
                        .map(|f| f.to_string())
                        .unwrap_or_else(|_| format!("?{}", out.format)),
                    out.data_size,
                );
                seen += 1;
                if args.count != 0 && seen >= args.count {
                    return Ok(());
                }
            }
            Ok(_) => {}
            Err(duocam_shm::Error::NeverWritten) => {}
            Err(e) => return Err(e.into()),
        }
        std::thread::sleep(Duration::from_millis(args.interval_ms));
    }
}

fn detections(args: Detections) -> anyhow::Result<()> {
    let reader = DetectionSlotReader::open(&args.name)?;
    match reader.read() {
        None => println!("no detections published yet"),
        Some(latest) => {
            let entries: Vec<serde_json::Value> = latest
                .detections
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "label": d.label(),
                        "confidence": d.confidence,
                        "bbox": d.bbox,
                    })
                })
                .collect();
            let report = serde_json::json!({
                "version": latest.version,
                "frame_number": latest.frame_number,
                "detections": entries,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

/// Drive the controller through a full day -> night -> day brightness cycle
/// with simulated time, printing every decision as it fires.
fn simulate(args: Simulate) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => CameraSwitchConfig::from_path(path)?,
        None => CameraSwitchConfig::default(),
    };
    println!("policy: {config:?}");
    let mut ctrl = CameraSwitchController::new(config);
    let t0 = Instant::now();
    let step = Duration::from_secs_f64(1.0 / f64::from(args.rate.max(1)));

    // one hour of simulated samples: bright, then dark, then bright again
    let total = 3600 * args.rate as u64;
    for i in 0..total {
        let now = t0 + step * i as u32;
        let phase = i as f64 / total as f64;
        let brightness = if phase < 0.4 {
            120.0
        } else if phase < 0.7 {
            15.0
        } else {
            120.0
        };
        let active = ctrl.active_camera();
        let decision = ctrl.record_brightness_at(active, brightness, now);
        // probe camera sees roughly the same scene
        ctrl.record_brightness_at(active.other(), brightness, now);
        match decision {
            SwitchDecision::None => {}
            SwitchDecision::ToNight => {
                println!("t+{:.1}s: switching to night", (step * i as u32).as_secs_f64());
                ctrl.notify_active_camera(CameraId::Night, "simulated dusk");
            }
            SwitchDecision::ToDay => {
                println!("t+{:.1}s: switching to day", (step * i as u32).as_secs_f64());
                ctrl.notify_active_camera(CameraId::Day, "simulated dawn");
            }
        }
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&ctrl.status_at(t0 + step * total as u32))?
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Command::parse() {
        Command::WatchFrames(args) => watch_frames(args),
        Command::Detections(args) => detections(args),
        Command::Simulate(args) => simulate(args),
    }
}
