//! The improved scheduler: no slicing at all. Every registered detector
//! gets the full camera frame, and the dispatcher fans the inferences out
//! to one scoped thread per model so they run concurrently within the
//! frame budget.

use tracing::{debug, trace, warn};

use crate::config::PerceptionConfig;
use crate::error::{PerceptionError, Result};
use crate::models::onnx::ModelRuntime;
use crate::models::{InferenceModel, ModelKind, ModelSpec};
use crate::sensing::SensorFrame;

use super::task::{InferenceTask, TaskPayload};
use super::{FrameClock, Scheduler};

/// Canonical SGE model set; `model_mask` bit `i` selects entry `i`.
const SGE_MODEL_SET: &[ModelSpec] = &[
    ModelSpec { name: "yolov7-tiny_256_256", kind: ModelKind::Detector, batch_limit: 4 },
    ModelSpec { name: "yolov7-tiny_384_384", kind: ModelKind::Detector, batch_limit: 4 },
    ModelSpec { name: "yolov7-tiny_512_512", kind: ModelKind::Detector, batch_limit: 4 },
    ModelSpec { name: "yolov7-tiny_640_640", kind: ModelKind::Detector, batch_limit: 4 },
];

pub struct SgeScheduler {
    models: Vec<Box<dyn InferenceModel>>,
    queue: Vec<InferenceTask>,
}

impl SgeScheduler {
    pub fn from_config(runtime: &ModelRuntime, config: &PerceptionConfig) -> Result<Self> {
        let mut models: Vec<Box<dyn InferenceModel>> = Vec::new();
        for (bit, spec) in SGE_MODEL_SET.iter().enumerate() {
            if config.model_mask & (1 << bit) == 0 {
                continue;
            }
            debug!(model = spec.name, "registering model");
            models.push(Box::new(runtime.load_model(spec)?));
        }
        Ok(Self::with_models(models))
    }

    pub fn with_models(models: Vec<Box<dyn InferenceModel>>) -> Self {
        Self {
            models,
            queue: Vec::new(),
        }
    }

    pub fn models(&self) -> &[Box<dyn InferenceModel>] {
        &self.models
    }

    pub fn tasks(&self) -> &[InferenceTask] {
        &self.queue
    }
}

impl Scheduler for SgeScheduler {
    fn name(&self) -> &'static str {
        "sge"
    }

    fn preprocess(&mut self, _frame: &SensorFrame) -> Result<()> {
        for (index, model) in self.models.iter().enumerate() {
            trace!(model = model.name(), "queueing full-frame task");
            self.queue.push(InferenceTask {
                payload: TaskPayload::FullFrame,
                // Unused: every model sees the same frame.
                priority: -1.0,
                model: index,
            });
        }
        Ok(())
    }

    fn schedule(&mut self) {}

    fn dispatch(&mut self, frame: &SensorFrame, clock: &FrameClock) -> Result<()> {
        let mut tasks = std::mem::take(&mut self.queue).into_iter();
        let mut leftover: Vec<InferenceTask> = Vec::new();
        let mut results: Vec<Result<()>> = Vec::new();
        let mut slots: Vec<Option<&mut Box<dyn InferenceModel>>> =
            self.models.iter_mut().map(Some).collect();

        let scope_result = crossbeam::thread::scope(|scope| {
            let mut running = Vec::new();
            loop {
                // The deadline only gates starting new inferences.
                if clock.expired() {
                    leftover.extend(tasks.by_ref());
                    break;
                }
                let Some(task) = tasks.next() else { break };
                let Some(model) = slots[task.model].take() else {
                    // Model already dispatched this frame.
                    continue;
                };

                let stream = model.preprocess(task.image(&frame.image));
                match model.push_input(stream) {
                    Ok(()) => {
                        debug!(model = model.name(), remaining_ms = clock.remaining_ms(), "threaded inference start");
                        let name = model.name().to_string();
                        running.push((name, scope.spawn(move |_| model.infer())));
                    }
                    Err(e) => warn!(error = %e, "dropping full-frame task"),
                }
            }

            // Join everything that was started; in-flight inferences always
            // run to completion.
            for (name, handle) in running {
                match handle.join() {
                    Ok(result) => results.push(result),
                    Err(_) => results.push(Err(PerceptionError::Worker { model: name })),
                }
            }
        });
        if scope_result.is_err() {
            // Every handle is joined above, so this only fires if the scope
            // itself came apart.
            return Err(PerceptionError::Worker {
                model: "sge dispatch".to_string(),
            });
        }

        self.queue = leftover;
        for result in results {
            result?;
        }
        Ok(())
    }

    fn pending_tasks(&self) -> usize {
        self.queue.len()
    }

    fn clear_pending(&mut self) {
        self.queue.clear();
    }
}
