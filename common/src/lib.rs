pub mod types;
pub mod utils;

pub use types::{BBox, Classification, Detection, LidarPoint};
