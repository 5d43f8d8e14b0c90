//! Translation of `pantilt serve` flags into a validated [`ServerConfig`].

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use ml_core::TrackerKind;
use vision::{AimConfig, AxisLimits, FieldOfView, FusionConfig};

#[derive(Clone, Debug)]
/// Everything the server needs at startup.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub fusion: FusionConfig,
    pub aim: AimConfig,
    pub detector: DetectorSettings,
    /// Tracker kinds probed in order; the first constructible one is used.
    pub tracker_preference: Vec<TrackerKind>,
    /// JPEG quality of frames sent to display consumers.
    pub jpeg_quality: u8,
    /// Messages buffered per consumer before frames are skipped for it.
    pub outbound_queue: usize,
    /// Largest WebSocket frame accepted from a producer.
    pub max_frame_bytes: usize,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug)]
/// Detector backend selection.
pub struct DetectorSettings {
    /// TorchScript module path.
    pub model_path: Option<PathBuf>,
    /// Model input width and height in pixels.
    pub input_size: (u32, u32),
    /// Class names indexed by the model's class id.
    pub class_names: Vec<String>,
    pub iou_threshold: f32,
    /// Force CPU inference.
    pub use_cpu: bool,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing fusion spans.
    pub chrome_trace_path: Option<PathBuf>,
}

/// CLI arguments accepted by the `serve` subcommand.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to bind the HTTP/WebSocket server on.
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0")]
    pub host: String,
    /// Port to listen on.
    #[arg(long, short = 'p', value_name = "PORT")]
    pub port: Option<u16>,

    /// Detector labels that count as targets (comma separated).
    #[arg(long = "labels", value_name = "LABEL", value_delimiter = ',')]
    pub labels: Vec<String>,
    /// Confidence required to start tracking.
    #[arg(long = "initial-threshold", value_name = "CONF")]
    pub initial_threshold: Option<f32>,
    /// Confidence required to re-anchor an active track.
    #[arg(long = "redetect-threshold", value_name = "CONF")]
    pub redetect_threshold: Option<f32>,
    /// Run the detector every N frames.
    #[arg(long = "detect-every", value_name = "N")]
    pub detect_every: Option<u64>,
    /// Seconds without a detection before the track is dropped.
    #[arg(long = "timeout", value_name = "SECONDS")]
    pub timeout_seconds: Option<f64>,
    /// Frame rate assumed until it has been measured.
    #[arg(long = "fps", value_name = "FPS")]
    pub fps: Option<f64>,

    /// TorchScript detector module.
    #[arg(long = "model", value_name = "PATH")]
    pub model_path: Option<PathBuf>,
    /// Detector input size as WIDTHxHEIGHT.
    #[arg(long = "model-input", value_name = "WxH")]
    pub model_input: Option<String>,
    /// Detector class names in model order (comma separated).
    #[arg(long = "classes", value_name = "NAME", value_delimiter = ',')]
    pub classes: Vec<String>,
    /// IoU above which overlapping detections are merged.
    #[arg(long = "nms-iou", value_name = "IOU")]
    pub nms_iou: Option<f32>,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,

    /// Only use this tracker backend instead of probing csrt, kcf, correlation.
    #[arg(long = "tracker", value_name = "KIND")]
    pub tracker: Option<String>,

    /// JPEG quality used for display frames (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY")]
    pub jpeg_quality: Option<i32>,
    /// Horizontal camera field of view in degrees.
    #[arg(long = "fov-h", value_name = "DEG")]
    pub fov_horizontal: Option<f64>,
    /// Vertical camera field of view in degrees.
    #[arg(long = "fov-v", value_name = "DEG")]
    pub fov_vertical: Option<f64>,
    /// Pan servo range and rest angle as MIN:MAX:CENTER.
    #[arg(long = "pan", value_name = "MIN:MAX:CENTER")]
    pub pan: Option<String>,
    /// Tilt servo range and rest angle as MIN:MAX:CENTER.
    #[arg(long = "tilt", value_name = "MIN:MAX:CENTER")]
    pub tilt: Option<String>,

    /// Messages buffered per display or servo consumer.
    #[arg(long = "outbound-queue", value_name = "N")]
    pub outbound_queue: Option<usize>,
    /// Largest producer WebSocket frame in bytes.
    #[arg(long = "max-frame-bytes", value_name = "BYTES")]
    pub max_frame_bytes: Option<usize>,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<ServeArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self> {
        let defaults = FusionConfig::default();
        let target_labels = if args.labels.is_empty() {
            defaults.target_labels.clone()
        } else {
            args.labels
                .into_iter()
                .map(|label| label.trim().to_string())
                .filter(|label| !label.is_empty())
                .collect()
        };
        let fusion = FusionConfig {
            target_labels,
            initial_threshold: args.initial_threshold.unwrap_or(defaults.initial_threshold),
            redetect_threshold: args
                .redetect_threshold
                .unwrap_or(defaults.redetect_threshold),
            detect_every: args.detect_every.unwrap_or(defaults.detect_every),
            timeout_seconds: args.timeout_seconds.unwrap_or(defaults.timeout_seconds),
            default_fps: args.fps.unwrap_or(defaults.default_fps),
            warm_window: defaults.warm_window,
        };
        fusion.validate().context("Invalid fusion settings")?;

        let aim_defaults = AimConfig::default();
        let aim = AimConfig {
            fov: FieldOfView {
                horizontal: args.fov_horizontal.unwrap_or(aim_defaults.fov.horizontal),
                vertical: args.fov_vertical.unwrap_or(aim_defaults.fov.vertical),
            },
            pan: match args.pan.as_deref() {
                Some(value) => parse_axis(value).context("Invalid --pan")?,
                None => aim_defaults.pan,
            },
            tilt: match args.tilt.as_deref() {
                Some(value) => parse_axis(value).context("Invalid --tilt")?,
                None => aim_defaults.tilt,
            },
        };
        aim.validate().context("Invalid aim settings")?;

        let input_size = match args.model_input.as_deref() {
            Some(value) => parse_size(value).context("Invalid --model-input")?,
            None => (640, 640),
        };
        let iou_threshold = args.nms_iou.unwrap_or(0.45);
        if !(0.0..=1.0).contains(&iou_threshold) {
            bail!("--nms-iou must be between 0 and 1");
        }
        let detector = DetectorSettings {
            model_path: args.model_path,
            input_size,
            class_names: args.classes,
            iou_threshold,
            use_cpu: args.use_cpu,
        };

        let tracker_preference = match args.tracker.as_deref() {
            Some(kind) => vec![kind.parse::<TrackerKind>()?],
            None => TrackerKind::PREFERENCE.to_vec(),
        };

        let jpeg_quality = args.jpeg_quality.unwrap_or(85);
        if !(1..=100).contains(&jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }

        let outbound_queue = args.outbound_queue.unwrap_or(4);
        if outbound_queue == 0 {
            bail!("--outbound-queue must be at least 1");
        }

        let max_frame_bytes = args.max_frame_bytes.unwrap_or(16 * 1024 * 1024);
        if max_frame_bytes < 1024 {
            bail!("--max-frame-bytes must be at least 1024");
        }

        Ok(Self {
            host: args.host,
            port: args.port.unwrap_or(8000),
            fusion,
            aim,
            detector,
            tracker_preference,
            jpeg_quality: jpeg_quality as u8,
            outbound_queue,
            max_frame_bytes,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
            },
        })
    }
}

/// Parse `WIDTHxHEIGHT`.
fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT, got {value:?}"))?;
    let width: u32 = w.trim().parse().with_context(|| format!("bad width {w:?}"))?;
    let height: u32 = h.trim().parse().with_context(|| format!("bad height {h:?}"))?;
    if width == 0 || height == 0 {
        bail!("model input dimensions must be positive");
    }
    Ok((width, height))
}

/// Parse `MIN:MAX:CENTER`.
fn parse_axis(value: &str) -> Result<AxisLimits> {
    let parts = value
        .split(':')
        .map(|part| part.trim().parse::<i32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("expected MIN:MAX:CENTER, got {value:?}"))?;
    match parts.as_slice() {
        &[min, max, center] => Ok(AxisLimits { min, max, center }),
        _ => bail!("expected MIN:MAX:CENTER, got {value:?}"),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Command};

    fn serve(args: &[&str]) -> Result<ServerConfig> {
        let argv = ["pantilt", "serve"].iter().chain(args.iter());
        let cli = Cli::try_parse_from(argv)?;
        match cli.command {
            Command::Serve(args) => ServerConfig::try_from(args),
            Command::Trackers => bail!("unexpected subcommand"),
        }
    }

    #[test]
    fn default_settings() {
        let config = serve(&[]).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.jpeg_quality, 85);
        assert_eq!(config.fusion.target_labels, vec!["Gun".to_string()]);
        assert_eq!(config.fusion.initial_threshold, 0.8);
        assert_eq!(config.fusion.redetect_threshold, 0.6);
        assert_eq!(config.fusion.detect_every, 10);
        assert_eq!(config.fusion.timeout_seconds, 5.0);
        assert_eq!(config.aim, AimConfig::default());
        assert_eq!(config.tracker_preference, TrackerKind::PREFERENCE.to_vec());
        assert_eq!(config.detector.input_size, (640, 640));
    }

    #[test]
    fn parses_overrides() {
        let config = serve(&[
            "--labels",
            "pistol,rifle",
            "--tracker",
            "kcf",
            "--model-input",
            "320x256",
            "--pan",
            "10:170:95",
            "--port",
            "9001",
        ])
        .unwrap();
        assert_eq!(config.fusion.target_labels, vec!["pistol", "rifle"]);
        assert_eq!(config.tracker_preference, vec![TrackerKind::Kcf]);
        assert_eq!(config.detector.input_size, (320, 256));
        assert_eq!(
            config.aim.pan,
            AxisLimits {
                min: 10,
                max: 170,
                center: 95
            }
        );
        assert_eq!(config.port, 9001);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let err = serve(&["--initial-threshold", "0.5", "--redetect-threshold", "0.7"]).unwrap_err();
        assert!(format!("{err:#}").contains("must not exceed"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(serve(&["--jpeg-quality", "0"]).is_err());
        assert!(serve(&["--tracker", "mosse"]).is_err());
        assert!(serve(&["--model-input", "640"]).is_err());
        assert!(serve(&["--tilt", "0:180"]).is_err());
        assert!(serve(&["--detect-every", "0"]).is_err());
    }
}
