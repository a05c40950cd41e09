use image::RgbImage;

/// Input data for one pending inference request.
pub enum TaskPayload {
    /// An owned crop of the frame image (CPS obstacle slice).
    Region(RgbImage),
    /// The full camera frame, resolved against the frame context at
    /// dispatch time (SGE).
    FullFrame,
}

/// A pending inference request targeting one model of the scheduler's bank.
pub struct InferenceTask {
    pub payload: TaskPayload,
    pub priority: f32,
    /// Index into the owning scheduler's model bank.
    pub model: usize,
}

impl InferenceTask {
    /// Resolve the payload against the frame the task belongs to.
    pub fn image<'a>(&'a self, frame_image: &'a RgbImage) -> &'a RgbImage {
        match &self.payload {
            TaskPayload::Region(region) => region,
            TaskPayload::FullFrame => frame_image,
        }
    }
}
