pub mod onnx;
pub mod preprocess;

use image::RgbImage;

use crate::error::Result;

/// Which preprocessing and result decoding a model uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// ImageNet-style classifier: normalized CHW input, argmax decode.
    Classifier,
    /// Detector: plain scaled CHW input, per-row box decode.
    Detector,
}

/// Static description of one registrable model.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub name: &'static str,
    pub kind: ModelKind,
    pub batch_limit: usize,
}

/// The fixed-batch inference primitive the schedulers dispatch against.
///
/// Implemented by [`onnx::OnnxModel`] in production; scheduler tests inject
/// stubs with scripted execution times.
pub trait InferenceModel: Send {
    fn name(&self) -> &str;
    /// Maximum samples per inference call (`B`).
    fn batch_limit(&self) -> usize;
    /// Scalar count of one preprocessed sample (`S`).
    fn single_input_len(&self) -> usize;
    fn input_width(&self) -> u32;
    fn input_height(&self) -> u32;
    /// Raw image region to a flat tensor of length `S`.
    fn preprocess(&self, image: &RgbImage) -> Vec<f32>;
    /// Append one sample to the pending buffer.
    fn push_input(&mut self, stream: Vec<f32>) -> Result<()>;
    fn fully_batched(&self) -> bool;
    fn has_pending(&self) -> bool;
    /// Run one fixed-batch inference over the pending buffer.
    fn infer(&mut self) -> Result<()>;
    /// Wall-clock cost of the last inference, used as the dispatcher's
    /// feasibility predictor.
    fn last_spend_ms(&self) -> f32;
}

/// Pending input accumulator enforcing the fixed-batch discipline: the
/// buffer only ever holds whole samples and at most `batch_limit` of them.
pub struct BatchBuffer {
    single_len: usize,
    batch_limit: usize,
    data: Vec<f32>,
    fully_batched: bool,
}

impl BatchBuffer {
    pub fn new(single_len: usize, batch_limit: usize) -> Self {
        Self {
            single_len,
            batch_limit,
            data: Vec::with_capacity(single_len * batch_limit),
            fully_batched: false,
        }
    }

    /// Append one sample. Rejects a stream that is not exactly one sample
    /// long, and anything once the batch is full; `Err` carries the
    /// offered length.
    pub fn push(&mut self, stream: Vec<f32>) -> std::result::Result<(), usize> {
        if stream.len() != self.single_len || self.fully_batched {
            return Err(stream.len());
        }
        self.data.extend(stream);
        if self.data.len() == self.single_len * self.batch_limit {
            self.fully_batched = true;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whole samples currently pending.
    pub fn sample_count(&self) -> usize {
        self.data.len() / self.single_len
    }

    /// True iff the pending length is a whole number of samples.
    pub fn is_aligned(&self) -> bool {
        self.data.len() % self.single_len == 0
    }

    pub fn fully_batched(&self) -> bool {
        self.fully_batched
    }

    /// Move the pending data out, zero-padded to the full `B*S` batch.
    /// Leaves the buffer empty with the flag cleared.
    pub fn take_padded(&mut self) -> Vec<f32> {
        let mut padded = std::mem::take(&mut self.data);
        padded.resize(self.single_len * self.batch_limit, 0.0);
        self.fully_batched = false;
        padded
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.fully_batched = false;
    }
}
