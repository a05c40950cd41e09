use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use ndarray::{Array, CowArray, IxDyn};
use ort::{Environment, GraphOptimizationLevel, LoggingLevel, Session, SessionBuilder, Value};
use tracing::{debug, error, info, trace};

use roadsight_common::utils::elapsed_ms;
use roadsight_common::{BBox, Classification, Detection};

use crate::config::PerceptionConfig;
use crate::error::{PerceptionError, Result};
use crate::models::{preprocess, BatchBuffer, InferenceModel, ModelKind, ModelSpec};

/// Shared runtime pieces handed to every model at registration time.
pub struct ModelRuntime {
    environment: Arc<Environment>,
    model_path: PathBuf,
    label_path: PathBuf,
    intra_threads: i16,
}

impl ModelRuntime {
    pub fn new(config: &PerceptionConfig) -> Result<Self> {
        let environment = Environment::builder()
            .with_name("roadsight")
            .with_log_level(LoggingLevel::Warning)
            .build()?
            .into_arc();

        Ok(Self {
            environment,
            model_path: config.model_path.clone(),
            label_path: config.label_path.clone(),
            intra_threads: config.inference.intra_threads,
        })
    }

    pub fn load_model(&self, spec: &ModelSpec) -> Result<OnnxModel> {
        OnnxModel::load(self, spec)
    }
}

/// One pre-loaded ONNX session plus its pending fixed-batch input buffer.
pub struct OnnxModel {
    name: String,
    kind: ModelKind,
    session: Session,
    /// Input tensor dims with the batch dimension pinned to `batch_limit`.
    input_dims: Vec<usize>,
    input_width: u32,
    input_height: u32,
    buffer: BatchBuffer,
    labels: Vec<String>,
    spend_ms: f32,
}

impl OnnxModel {
    fn load(runtime: &ModelRuntime, spec: &ModelSpec) -> Result<Self> {
        let setup_start = Instant::now();

        let builder = SessionBuilder::new(&runtime.environment)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(runtime.intra_threads)?;
        #[cfg(feature = "cuda")]
        let builder =
            builder.with_execution_providers([ort::ExecutionProvider::CUDA(Default::default())])?;
        #[cfg(feature = "tensorrt")]
        let builder = builder
            .with_execution_providers([ort::ExecutionProvider::TensorRT(Default::default())])?;

        let model_file = runtime.model_path.join(format!("{}.onnx", spec.name));
        let session = builder.with_model_from_file(&model_file).map_err(|e| {
            PerceptionError::Config(format!("failed to load model {}: {e}", model_file.display()))
        })?;

        let input = session.inputs.first().ok_or_else(|| {
            PerceptionError::Config(format!("{}: model has no input node", spec.name))
        })?;
        trace!(model = spec.name, input = %input.name, dims = ?input.dimensions);

        if input.dimensions.len() != 4 {
            return Err(PerceptionError::Config(format!(
                "{}: expected NCHW input, got {} dims",
                spec.name,
                input.dimensions.len()
            )));
        }
        let mut input_dims: Vec<usize> = input
            .dimensions
            .iter()
            .enumerate()
            .map(|(i, d)| match d {
                Some(v) => Ok(*v as usize),
                // The batch dimension is commonly dynamic; everything else
                // must be concrete.
                None if i == 0 => Ok(spec.batch_limit),
                None => Err(PerceptionError::Config(format!(
                    "{}: dynamic input dimension {i}",
                    spec.name
                ))),
            })
            .collect::<Result<_>>()?;
        input_dims[0] = spec.batch_limit;

        let single_input_len: usize = input_dims[1..].iter().product();
        let input_height = input_dims[2] as u32;
        let input_width = input_dims[3] as u32;

        let labels = load_labels(runtime, spec)?;

        let mut model = Self {
            name: spec.name.to_string(),
            kind: spec.kind,
            session,
            input_dims,
            input_width,
            input_height,
            buffer: BatchBuffer::new(single_input_len, spec.batch_limit),
            labels,
            spend_ms: 0.0,
        };

        // Two warm-up rounds: the first pays the lazy graph optimization,
        // the second's measurement seeds the dispatcher's cost predictor.
        for _ in 0..2 {
            for _ in 0..spec.batch_limit {
                model.push_input(vec![0.0; single_input_len])?;
            }
            model.infer()?;
        }

        info!(
            model = %model.name,
            batch = spec.batch_limit,
            single_input_len,
            spend_ms = elapsed_ms(setup_start),
            "model setup"
        );
        Ok(model)
    }

    fn decode(&self, outputs: &[Value]) {
        let Some(output) = outputs.first() else {
            debug!(model = %self.name, "inference produced no outputs");
            return;
        };
        let tensor = match output.try_extract::<f32>() {
            Ok(tensor) => tensor,
            Err(e) => {
                error!(model = %self.name, error = %e, "failed to extract output tensor");
                return;
            }
        };
        let view = tensor.view();
        debug!(model = %self.name, dims = ?view.shape(), "result tensor");
        if view.ndim() != 2 {
            return;
        }

        match self.kind {
            ModelKind::Classifier => {
                for (sample, row) in view.outer_iter().enumerate() {
                    let mut class_id = 0usize;
                    let mut confidence = 0.0f32;
                    for (id, &score) in row.iter().enumerate() {
                        if score > confidence {
                            confidence = score;
                            class_id = id;
                        }
                    }
                    let result = Classification {
                        class_id: class_id as u32,
                        class_label: self.label(class_id),
                        confidence,
                    };
                    info!(
                        model = %self.name,
                        sample,
                        label = %result.class_label,
                        confidence = result.confidence,
                        "classification"
                    );
                }
            }
            ModelKind::Detector => {
                // One row per kept box: [batch, x0, y0, x1, y1, class, confidence].
                for row in view.outer_iter() {
                    if row.len() < 7 {
                        continue;
                    }
                    let class_id = row[5] as usize;
                    let result = Detection {
                        bbox: BBox::new(row[1], row[2], row[3], row[4]),
                        confidence: row[6],
                        class_id: class_id as u32,
                        class_label: self.label(class_id),
                    };
                    info!(
                        model = %self.name,
                        sample = row[0] as usize,
                        label = %result.class_label,
                        confidence = result.confidence,
                        xmin = result.bbox.xmin,
                        ymin = result.bbox.ymin,
                        xmax = result.bbox.xmax,
                        ymax = result.bbox.ymax,
                        "detection"
                    );
                }
            }
        }
    }

    fn label(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }
}

impl InferenceModel for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn batch_limit(&self) -> usize {
        self.input_dims[0]
    }

    fn single_input_len(&self) -> usize {
        self.input_dims[1..].iter().product()
    }

    fn input_width(&self) -> u32 {
        self.input_width
    }

    fn input_height(&self) -> u32 {
        self.input_height
    }

    fn preprocess(&self, image: &RgbImage) -> Vec<f32> {
        match self.kind {
            ModelKind::Classifier => {
                preprocess::classification_stream(image, self.input_width, self.input_height)
            }
            ModelKind::Detector => {
                preprocess::detection_stream(image, self.input_width, self.input_height)
            }
        }
    }

    fn push_input(&mut self, stream: Vec<f32>) -> Result<()> {
        let got = stream.len();
        self.buffer
            .push(stream)
            .map_err(|_| PerceptionError::InputShape {
                model: self.name.clone(),
                expected: self.single_input_len(),
                got,
            })?;
        trace!(model = %self.name, pending = self.buffer.len(), "input stashed");
        Ok(())
    }

    fn fully_batched(&self) -> bool {
        self.buffer.fully_batched()
    }

    fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    fn infer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            debug!(model = %self.name, "inference skipped: no pending input");
            return Ok(());
        }
        if !self.buffer.is_aligned() {
            error!(
                model = %self.name,
                pending = self.buffer.len(),
                single_input_len = self.single_input_len(),
                "pending buffer is not a whole number of samples; batch skipped"
            );
            return Ok(());
        }

        let samples = self.buffer.sample_count();
        let padded = self.buffer.take_padded();
        let array = Array::from_shape_vec(IxDyn(&self.input_dims), padded)?;
        let array = CowArray::from(array);

        let start = Instant::now();
        let input = Value::from_array(self.session.allocator(), &array)?;
        let outputs = self.session.run(vec![input])?;
        self.spend_ms = elapsed_ms(start);
        info!(
            model = %self.name,
            batch = self.batch_limit(),
            samples,
            spend_ms = self.spend_ms,
            "inference done"
        );

        self.decode(&outputs);
        Ok(())
    }

    fn last_spend_ms(&self) -> f32 {
        self.spend_ms
    }
}

fn load_labels(runtime: &ModelRuntime, spec: &ModelSpec) -> Result<Vec<String>> {
    let file = runtime.label_path.join(match spec.kind {
        ModelKind::Classifier => "imagenet_labels.txt",
        ModelKind::Detector => "coco_labels.txt",
    });
    let contents = std::fs::read_to_string(&file).map_err(|e| {
        PerceptionError::Config(format!("failed to load labels {}: {e}", file.display()))
    })?;
    Ok(contents.lines().map(str::to_string).collect())
}
