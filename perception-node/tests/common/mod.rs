#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use image::{Rgb, RgbImage};

use roadsight_perception::models::{BatchBuffer, InferenceModel};
use roadsight_perception::{PerceptionError, Result};

/// Shared record of what a stub model was asked to do.
#[derive(Default)]
pub struct StubLog {
    /// Sample count of each completed inference, in call order.
    pub infer_samples: Vec<usize>,
}

/// Scripted stand-in for an ONNX session: `infer` sleeps for a configured
/// duration while `last_spend_ms` reports a fixed prediction, so scheduling
/// decisions in tests are deterministic.
pub struct StubModel {
    name: String,
    batch_limit: usize,
    single_len: usize,
    spend_ms: f32,
    sleep: Duration,
    stream_len: usize,
    buffer: BatchBuffer,
    log: Arc<Mutex<StubLog>>,
}

impl StubModel {
    pub fn new(
        name: &str,
        batch_limit: usize,
        single_len: usize,
        spend_ms: f32,
        sleep_ms: u64,
    ) -> (Self, Arc<Mutex<StubLog>>) {
        let log = Arc::new(Mutex::new(StubLog::default()));
        let model = Self {
            name: name.to_string(),
            batch_limit,
            single_len,
            spend_ms,
            sleep: Duration::from_millis(sleep_ms),
            stream_len: single_len,
            buffer: BatchBuffer::new(single_len, batch_limit),
            log: Arc::clone(&log),
        };
        (model, log)
    }

    /// Make `preprocess` emit streams of the wrong length.
    pub fn with_stream_len(mut self, len: usize) -> Self {
        self.stream_len = len;
        self
    }
}

impl InferenceModel for StubModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    fn single_input_len(&self) -> usize {
        self.single_len
    }

    fn input_width(&self) -> u32 {
        56
    }

    fn input_height(&self) -> u32 {
        56
    }

    fn preprocess(&self, _image: &RgbImage) -> Vec<f32> {
        vec![0.5; self.stream_len]
    }

    fn push_input(&mut self, stream: Vec<f32>) -> Result<()> {
        let got = stream.len();
        self.buffer
            .push(stream)
            .map_err(|_| PerceptionError::InputShape {
                model: self.name.clone(),
                expected: self.single_len,
                got,
            })
    }

    fn fully_batched(&self) -> bool {
        self.buffer.fully_batched()
    }

    fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    fn infer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let samples = self.buffer.sample_count();
        self.buffer.take_padded();
        thread::sleep(self.sleep);
        self.log.lock().unwrap().infer_samples.push(samples);
        Ok(())
    }

    fn last_spend_ms(&self) -> f32 {
        self.spend_ms
    }
}

/// Write one dataset frame directory: a solid JPEG plus the given LiDAR
/// file body.
pub fn write_frame(root: &Path, frame_id: usize, width: u32, height: u32, lidar: &str) {
    let dir = root.join(frame_id.to_string());
    fs::create_dir_all(&dir).unwrap();
    RgbImage::from_pixel(width, height, Rgb([90, 90, 90]))
        .save(dir.join("FRONT.jpeg"))
        .unwrap();
    let mut file = fs::File::create(dir.join("FRONT.txt")).unwrap();
    file.write_all(lidar.as_bytes()).unwrap();
}

/// LiDAR body with a header and an `n x n` grid of returns at one range.
pub fn lidar_grid(x0: i32, y0: i32, n: i32, step: i32, range: f32) -> String {
    let mut body = String::from("x\ty\trange\n");
    for row in 0..n {
        for col in 0..n {
            body.push_str(&format!("{}\t{}\t{range}\n", x0 + col * step, y0 + row * step));
        }
    }
    body
}
