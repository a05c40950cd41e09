pub mod slot;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use image::RgbImage;
use tracing::{debug, error, info, warn};

use roadsight_common::utils::elapsed_ms;
use roadsight_common::LidarPoint;

use crate::config::{PerceptionConfig, SENSOR_AUDIO, SENSOR_CAMERA, SENSOR_LIDAR};
use crate::error::{PerceptionError, Result};
use slot::HandoffSlot;

/// What the producer publishes once per sensing period.
pub struct SensorFrame {
    pub image: RgbImage,
    pub lidar: Vec<LidarPoint>,
}

/// Long-running producer that loads per-frame camera and LiDAR data from
/// the dataset directory and hands each frame to the inference side through
/// a single-slot rendezvous. A slow consumer stalls the producer; no frame
/// is ever overwritten.
pub struct SensingEngine {
    slot: Arc<HandoffSlot<SensorFrame>>,
    handle: Option<JoinHandle<Result<()>>>,
    dataset_path: PathBuf,
    frame_count: usize,
    peripheral_mask: u8,
}

impl SensingEngine {
    pub fn new(config: &PerceptionConfig) -> Self {
        Self {
            slot: Arc::new(HandoffSlot::new()),
            handle: None,
            dataset_path: config.dataset_path.clone(),
            frame_count: config.frame_count,
            peripheral_mask: config.peripheral_mask,
        }
    }

    /// Launch the background producer iterating frames `0..frame_count`.
    pub fn start(&mut self) {
        let slot = Arc::clone(&self.slot);
        let dataset = self.dataset_path.clone();
        let frame_count = self.frame_count;
        let mask = self.peripheral_mask;

        info!(frames = frame_count, dataset = %dataset.display(), "starting sensing engine");
        self.handle = Some(std::thread::spawn(move || {
            let result = Self::sensing_loop(&slot, &dataset, frame_count, mask);
            if let Err(ref e) = result {
                error!(error = %e, "sensing thread terminating");
                slot.close();
            }
            result
        }));
    }

    fn sensing_loop(
        slot: &HandoffSlot<SensorFrame>,
        dataset: &Path,
        frame_count: usize,
        mask: u8,
    ) -> Result<()> {
        for frame_id in 0..frame_count {
            // Back-pressure: the previous frame must be released first.
            if !slot.wait_empty() {
                debug!(frame_id, "sensing stopped");
                return Ok(());
            }

            let frame = Self::sense_frame(dataset, frame_id, mask)?;
            if !slot.publish(frame) {
                debug!(frame_id, "sensing stopped");
                return Ok(());
            }
            debug!(frame_id, "done sensing");
        }
        debug!("dataset exhausted");
        Ok(())
    }

    fn sense_frame(dataset: &Path, frame_id: usize, mask: u8) -> Result<SensorFrame> {
        let frame_dir = dataset.join(frame_id.to_string());

        let image = if mask & SENSOR_CAMERA != 0 {
            let start = Instant::now();
            let path = frame_dir.join("FRONT.jpeg");
            let image = image::open(&path)
                .map_err(|e| PerceptionError::Sensing {
                    frame: frame_id,
                    kind: format!("camera {}: {e}", path.display()),
                })?
                .to_rgb8();
            debug!(frame_id, spend_ms = elapsed_ms(start), "camera sensing");
            image
        } else {
            RgbImage::new(0, 0)
        };

        let lidar = if mask & SENSOR_LIDAR != 0 {
            let start = Instant::now();
            let path = frame_dir.join("FRONT.txt");
            let contents = std::fs::read_to_string(&path).map_err(|e| PerceptionError::Sensing {
                frame: frame_id,
                kind: format!("lidar {}: {e}", path.display()),
            })?;
            let points = parse_lidar(&contents).map_err(|kind| PerceptionError::Sensing {
                frame: frame_id,
                kind,
            })?;
            debug!(frame_id, points = points.len(), spend_ms = elapsed_ms(start), "lidar sensing");
            points
        } else {
            Vec::new()
        };

        if mask & SENSOR_AUDIO != 0 {
            warn!("audio sensing not implemented");
        }

        Ok(SensorFrame { image, lidar })
    }

    /// True iff a frame is ready to take.
    pub fn ready(&self) -> bool {
        self.slot.ready()
    }

    /// Block until a frame is ready. Returns `false` once the producer has
    /// shut down.
    pub fn wait_ready(&self) -> bool {
        self.slot.wait_ready()
    }

    /// Move the current frame out. Only valid after `ready()`; the producer
    /// stays blocked until `release()`.
    pub fn take(&self) -> Option<SensorFrame> {
        self.slot.take()
    }

    /// Hand the slot back so the next sensing cycle can start.
    pub fn release(&self) {
        self.slot.release();
    }

    /// Request termination and collect the producer's result. Best effort:
    /// a frame already in flight is completed and dropped.
    pub fn stop(&mut self) -> Result<()> {
        self.slot.close();
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(PerceptionError::Sensing {
                    frame: 0,
                    kind: "sensing thread panicked".to_string(),
                }),
            },
            None => Ok(()),
        }
    }
}

/// Parse a LiDAR text file: one header line (discarded), then
/// `<x>\t<y>\t<range>` per line. Any malformed field is fatal.
pub fn parse_lidar(contents: &str) -> std::result::Result<Vec<LidarPoint>, String> {
    let mut points = Vec::new();
    for (lineno, line) in contents.lines().enumerate().skip(1) {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let (x, y, range) = match (fields.next(), fields.next(), fields.next()) {
            (Some(x), Some(y), Some(range)) => (x, y, range),
            _ => return Err(format!("lidar line {}: expected 3 fields", lineno + 1)),
        };
        let x = x
            .trim()
            .parse::<i32>()
            .map_err(|e| format!("lidar line {}: x: {e}", lineno + 1))?;
        let y = y
            .trim()
            .parse::<i32>()
            .map_err(|e| format!("lidar line {}: y: {e}", lineno + 1))?;
        let range = range
            .trim()
            .parse::<f32>()
            .map_err(|e| format!("lidar line {}: range: {e}", lineno + 1))?;
        points.push(LidarPoint::new(x, y, range));
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_points_after_header() {
        let text = "x\ty\trange\n10\t20\t5.5\n400\t400\t20.0\n";
        let points = parse_lidar(text).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], LidarPoint::new(10, 20, 5.5));
        assert_eq!(points[1], LidarPoint::new(400, 400, 20.0));
    }

    #[test]
    fn header_only_is_empty() {
        assert!(parse_lidar("x\ty\trange\n").unwrap().is_empty());
        assert!(parse_lidar("").unwrap().is_empty());
    }

    #[test]
    fn malformed_fields_are_fatal() {
        assert!(parse_lidar("h\n10\t20\n").is_err());
        assert!(parse_lidar("h\nten\t20\t5.0\n").is_err());
        assert!(parse_lidar("h\n10\t20\tfar\n").is_err());
    }

    #[test]
    fn windows_line_endings_are_tolerated() {
        let points = parse_lidar("x\ty\tr\r\n1\t2\t3.0\r\n").unwrap();
        assert_eq!(points, vec![LidarPoint::new(1, 2, 3.0)]);
    }
}
