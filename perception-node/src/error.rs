use thiserror::Error;

#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("sensing failed at frame {frame}: {kind}")]
    Sensing { frame: usize, kind: String },

    #[error("{model}: input stream of {got} values does not fit single input size {expected}")]
    InputShape {
        model: String,
        expected: usize,
        got: usize,
    },

    #[error("inference runtime error: {0}")]
    Runtime(#[from] ort::OrtError),

    #[error("inference worker for {model} panicked")]
    Worker { model: String },

    #[error("tensor shape error: {0}")]
    TensorShape(#[from] ndarray::ShapeError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PerceptionError>;
