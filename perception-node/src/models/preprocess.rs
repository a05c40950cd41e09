//! Image-to-tensor transformations shared by every model variant.
//!
//! Both variants resize with cubic interpolation, scale to `[0, 1]` and
//! flatten to CHW; the classifier additionally normalizes each channel with
//! the ImageNet statistics. The decoded image is already RGB, so the tensor
//! matches what the models were exported against.

use image::imageops::{self, FilterType};
use image::RgbImage;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Classification input: resize, scale, mean/std normalize, CHW flatten.
pub fn classification_stream(image: &RgbImage, width: u32, height: u32) -> Vec<f32> {
    chw_stream(image, width, height, Some((IMAGENET_MEAN, IMAGENET_STD)))
}

/// Detection input: resize, scale, CHW flatten. No normalization.
pub fn detection_stream(image: &RgbImage, width: u32, height: u32) -> Vec<f32> {
    chw_stream(image, width, height, None)
}

fn chw_stream(
    image: &RgbImage,
    width: u32,
    height: u32,
    normalize: Option<([f32; 3], [f32; 3])>,
) -> Vec<f32> {
    let len = (3 * width * height) as usize;
    if image.width() == 0 || image.height() == 0 {
        return vec![0.0; len];
    }

    let resized = imageops::resize(image, width, height, FilterType::CatmullRom);
    let mut stream = Vec::with_capacity(len);
    for channel in 0..3 {
        for y in 0..height {
            for x in 0..width {
                let value = resized.get_pixel(x, y).0[channel] as f32 / 255.0;
                stream.push(match normalize {
                    Some((mean, std)) => (value - mean[channel]) / std[channel],
                    None => value,
                });
            }
        }
    }
    stream
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(rgb))
    }

    #[test]
    fn stream_length_is_three_channel_area() {
        let img = solid(8, 6, [0, 0, 0]);
        assert_eq!(detection_stream(&img, 4, 4).len(), 48);
        assert_eq!(classification_stream(&img, 2, 3).len(), 18);
    }

    #[test]
    fn detection_scales_to_unit_interval() {
        let img = solid(4, 4, [255, 128, 0]);
        let stream = detection_stream(&img, 2, 2);
        // CHW: 4 red values, then 4 green, then 4 blue.
        assert!(stream[..4].iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(stream[4..8].iter().all(|&v| (v - 128.0 / 255.0).abs() < 1e-6));
        assert!(stream[8..].iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn classification_applies_imagenet_statistics() {
        let img = solid(4, 4, [255, 255, 255]);
        let stream = classification_stream(&img, 2, 2);
        for channel in 0..3 {
            let expected = (1.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
            for &v in &stream[channel * 4..(channel + 1) * 4] {
                assert!((v - expected).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn channels_are_planar_not_interleaved() {
        // Two pixels, distinct per channel; identity resize keeps them.
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([10, 20, 30]));
        img.put_pixel(1, 0, Rgb([40, 50, 60]));
        let stream = detection_stream(&img, 2, 1);
        let expected: Vec<f32> = [10u8, 40, 20, 50, 30, 60]
            .iter()
            .map(|&v| v as f32 / 255.0)
            .collect();
        for (got, want) in stream.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn preprocess_is_deterministic() {
        let img = solid(16, 16, [90, 120, 200]);
        assert_eq!(
            classification_stream(&img, 8, 8),
            classification_stream(&img, 8, 8)
        );
        assert_eq!(detection_stream(&img, 8, 8), detection_stream(&img, 8, 8));
    }

    #[test]
    fn degenerate_source_yields_zeroed_stream() {
        let img = RgbImage::new(0, 0);
        let stream = detection_stream(&img, 4, 4);
        assert_eq!(stream.len(), 48);
        assert!(stream.iter().all(|&v| v == 0.0));
    }
}
