pub mod cps;
pub mod sge;
pub mod task;

pub use cps::CpsScheduler;
pub use sge::SgeScheduler;

use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use roadsight_common::utils::elapsed_ms;

use crate::config::{EngineKind, PerceptionConfig};
use crate::error::{PerceptionError, Result};
use crate::models::onnx::ModelRuntime;
use crate::sensing::{SensingEngine, SensorFrame};

/// Wall-clock budget of one frame, started when preprocessing begins.
pub struct FrameClock {
    start: Instant,
    period: Duration,
}

impl FrameClock {
    pub fn start(period: Duration) -> Self {
        Self {
            start: Instant::now(),
            period,
        }
    }

    pub fn elapsed_ms(&self) -> f32 {
        elapsed_ms(self.start)
    }

    /// Budget left in milliseconds; negative once the deadline has passed.
    pub fn remaining_ms(&self) -> f32 {
        self.period.as_secs_f32() * 1000.0 - self.elapsed_ms()
    }

    pub fn expired(&self) -> bool {
        self.start.elapsed() >= self.period
    }
}

/// The variant-specific third of the per-frame loop. One implementation per
/// scheduler design; the engine skeleton drives whichever it was built with.
pub trait Scheduler: Send {
    fn name(&self) -> &'static str;
    /// Turn the frame's sensor data into pending inference tasks.
    fn preprocess(&mut self, frame: &SensorFrame) -> Result<()>;
    /// Reorder the pending tasks.
    fn schedule(&mut self);
    /// Consume tasks until the frame deadline.
    fn dispatch(&mut self, frame: &SensorFrame, clock: &FrameClock) -> Result<()>;
    /// Tasks still pending after dispatch.
    fn pending_tasks(&self) -> usize;
    /// Discard whatever dispatch did not get to; every frame starts clean.
    fn clear_pending(&mut self);
}

/// Drives the per-frame loop: sync with the sensing producer, then hand the
/// frame through the variant's preprocess → schedule → dispatch triple.
pub struct InferenceEngine {
    sensing: SensingEngine,
    scheduler: Box<dyn Scheduler>,
    frame_count: usize,
    period: Duration,
}

impl InferenceEngine {
    pub fn new(sensing: SensingEngine, scheduler: Box<dyn Scheduler>, config: &PerceptionConfig) -> Self {
        Self {
            sensing,
            scheduler,
            frame_count: config.frame_count,
            period: config.sensing_period(),
        }
    }

    /// Build the configured variant with its canonical ONNX model set.
    pub fn from_config(config: &PerceptionConfig, sensing: SensingEngine) -> Result<Self> {
        let runtime = ModelRuntime::new(config)?;
        let scheduler: Box<dyn Scheduler> = match config.engine {
            EngineKind::Cps => Box::new(CpsScheduler::from_config(&runtime, config)?),
            EngineKind::Sge => Box::new(SgeScheduler::from_config(&runtime, config)?),
        };
        Ok(Self::new(sensing, scheduler, config))
    }

    pub fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    /// Process exactly `frame_count` frames, then stop the producer.
    pub fn run(&mut self) -> Result<()> {
        for frame_id in 0..self.frame_count {
            info!(frame_id, engine = self.scheduler.name(), "frame start");

            let frame = match self.sync(frame_id) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(frame_id, error = %e, "lost the sensing producer");
                    return Err(e);
                }
            };

            // The deadline runs from the start of preprocessing.
            let clock = FrameClock::start(self.period);
            if let Err(e) = self.run_frame(&frame, &clock) {
                error!(frame_id, error = %e, "frame abandoned");
            }

            let leftover = self.scheduler.pending_tasks();
            if leftover > 0 {
                info!(
                    frame_id,
                    leftover,
                    spend_ms = clock.elapsed_ms(),
                    "discarding tasks left at frame end"
                );
                self.scheduler.clear_pending();
            }
            info!(frame_id, spend_ms = clock.elapsed_ms(), "frame done");
        }

        self.sensing.stop()
    }

    /// Drain the handshake slot and immediately hand it back so the next
    /// sensing cycle can overlap this frame's inference.
    fn sync(&mut self, frame_id: usize) -> Result<SensorFrame> {
        let start = Instant::now();
        if !self.sensing.wait_ready() {
            // Producer is gone; prefer its own terminal error.
            self.sensing.stop()?;
            return Err(PerceptionError::Sensing {
                frame: frame_id,
                kind: "producer stopped early".to_string(),
            });
        }
        let frame = self.sensing.take().ok_or_else(|| PerceptionError::Sensing {
            frame: frame_id,
            kind: "handshake slot drained unexpectedly".to_string(),
        })?;
        self.sensing.release();

        debug!(
            frame_id,
            width = frame.image.width(),
            height = frame.image.height(),
            lidar = frame.lidar.len(),
            sync_ms = elapsed_ms(start),
            "data sync"
        );
        Ok(frame)
    }

    fn run_frame(&mut self, frame: &SensorFrame, clock: &FrameClock) -> Result<()> {
        self.scheduler.preprocess(frame)?;
        self.scheduler.schedule();
        self.scheduler.dispatch(frame, clock)
    }
}
