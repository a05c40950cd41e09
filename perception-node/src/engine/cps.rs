//! The reference scheduler: LiDAR returns are grouped into obstacles, each
//! obstacle becomes a crop-sized classification task, and the dispatch loop
//! greedily feeds whichever model carries the most outstanding priority
//! until the frame deadline.

use std::time::Instant;

use image::{imageops, RgbImage};
use tracing::{debug, info, trace, warn};

use roadsight_common::utils::{argmax, elapsed_ms};
use roadsight_common::{BBox, LidarPoint};

use crate::config::PerceptionConfig;
use crate::error::Result;
use crate::models::onnx::ModelRuntime;
use crate::models::{InferenceModel, ModelKind, ModelSpec};
use crate::sensing::SensorFrame;

use super::task::{InferenceTask, TaskPayload};
use super::{FrameClock, Scheduler};

/// Range gradient (meters) below which two returns belong to one obstacle.
const LIDAR_GRADIENT_SENSITIVE: f32 = 5.0;
/// Pixel slack applied to bounding boxes when grouping and merging.
const LIDAR_MERGING_SENSITIVE: f32 = 15.0;
/// Obstacles at or below this box area are not worth an inference.
const MIN_OBSTACLE_AREA: f32 = 56.0 * 56.0;
/// Outstanding model priority below this counts as drained.
const PRIORITY_TOLERANCE: f32 = 1e-6;

/// A connected group of LiDAR returns treated as one object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub range: f32,
    pub bbox: BBox,
}

/// One registrable input geometry.
#[derive(Debug, Clone, Copy)]
pub struct ImageShape {
    pub height: u32,
    pub width: u32,
}

impl ImageShape {
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    fn area(&self) -> f32 {
        (self.width * self.height) as f32
    }
}

/// Canonical CPS model set; `model_mask` bit `i` selects entry `i`.
const CPS_MODEL_SET: &[(ModelSpec, ImageShape)] = &[
    (
        ModelSpec { name: "resnet50_56_56", kind: ModelKind::Classifier, batch_limit: 4 },
        ImageShape::new(56, 56),
    ),
    (
        ModelSpec { name: "resnet50_112_112", kind: ModelKind::Classifier, batch_limit: 4 },
        ImageShape::new(112, 112),
    ),
    (
        ModelSpec { name: "resnet50_168_168", kind: ModelKind::Classifier, batch_limit: 4 },
        ImageShape::new(168, 168),
    ),
    (
        ModelSpec { name: "resnet50_224_224", kind: ModelKind::Classifier, batch_limit: 2 },
        ImageShape::new(224, 224),
    ),
    (
        ModelSpec { name: "resnet50_280_280", kind: ModelKind::Classifier, batch_limit: 1 },
        ImageShape::new(280, 280),
    ),
    (
        ModelSpec { name: "resnet50_336_336", kind: ModelKind::Classifier, batch_limit: 1 },
        ImageShape::new(336, 336),
    ),
    (
        ModelSpec { name: "resnet50_448_448", kind: ModelKind::Classifier, batch_limit: 1 },
        ImageShape::new(448, 448),
    ),
    (
        ModelSpec { name: "resnet50_1280_1920", kind: ModelKind::Classifier, batch_limit: 1 },
        ImageShape::new(1280, 1920),
    ),
];

pub struct CpsScheduler {
    models: Vec<Box<dyn InferenceModel>>,
    /// Input geometry per model, in registration order.
    shapes: Vec<ImageShape>,
    queue: Vec<InferenceTask>,
    lidar_range_max: f32,
}

impl CpsScheduler {
    pub fn from_config(runtime: &ModelRuntime, config: &PerceptionConfig) -> Result<Self> {
        let mut models: Vec<Box<dyn InferenceModel>> = Vec::new();
        let mut shapes = Vec::new();
        for (bit, (spec, shape)) in CPS_MODEL_SET.iter().enumerate() {
            if config.model_mask & (1 << bit) == 0 {
                continue;
            }
            debug!(model = spec.name, "registering model");
            models.push(Box::new(runtime.load_model(spec)?));
            shapes.push(*shape);
        }
        Ok(Self::with_models(models, shapes, config.lidar_range_max))
    }

    /// Assemble from an explicit model bank; `shapes[i]` pairs with
    /// `models[i]`.
    pub fn with_models(
        models: Vec<Box<dyn InferenceModel>>,
        shapes: Vec<ImageShape>,
        lidar_range_max: f32,
    ) -> Self {
        debug_assert_eq!(models.len(), shapes.len());
        Self {
            models,
            shapes,
            queue: Vec::new(),
            lidar_range_max,
        }
    }

    pub fn models(&self) -> &[Box<dyn InferenceModel>] {
        &self.models
    }

    pub fn tasks(&self) -> &[InferenceTask] {
        &self.queue
    }

    fn emit_tasks(&mut self, obstacles: &[Obstacle], image: &RgbImage) {
        for obstacle in obstacles {
            let area = obstacle.bbox.area();
            if area <= MIN_OBSTACLE_AREA || obstacle.range >= self.lidar_range_max {
                continue;
            }
            let Some(model) = nearest_shape(&self.shapes, area) else {
                continue;
            };
            trace!(
                range = obstacle.range,
                area,
                height = self.shapes[model].height,
                width = self.shapes[model].width,
                "slicing obstacle"
            );

            // Closer obstacles rank higher; priority stays in (0, 1].
            let priority = (self.lidar_range_max - obstacle.range) / self.lidar_range_max;
            self.queue.push(InferenceTask {
                payload: TaskPayload::Region(crop_region(image, &obstacle.bbox)),
                priority,
                model,
            });
        }
    }
}

impl Scheduler for CpsScheduler {
    fn name(&self) -> &'static str {
        "cps"
    }

    fn preprocess(&mut self, frame: &SensorFrame) -> Result<()> {
        let start = Instant::now();
        let obstacles = segment_obstacles(&frame.lidar, self.lidar_range_max);
        self.emit_tasks(&obstacles, &frame.image);
        info!(
            obstacles = obstacles.len(),
            tasks = self.queue.len(),
            spend_ms = elapsed_ms(start),
            "obstacle slicing"
        );
        Ok(())
    }

    fn schedule(&mut self) {
        // Stable, descending by priority.
        self.queue.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for task in &self.queue {
            trace!(priority = task.priority, model = task.model, "sorted task");
        }
    }

    fn dispatch(&mut self, frame: &SensorFrame, clock: &FrameClock) -> Result<()> {
        debug!(tasks = self.queue.len(), "dispatch start");
        if self.queue.is_empty() {
            return Ok(());
        }

        // Outstanding priority per model.
        let mut model_priority = vec![0.0f32; self.models.len()];
        for task in &self.queue {
            model_priority[task.model] += task.priority;
        }
        for (index, priority) in model_priority.iter().enumerate() {
            trace!(model = self.models[index].name(), priority, "model priority");
        }

        loop {
            let remaining = clock.remaining_ms();
            debug!(remaining_ms = remaining, "dispatch budget");

            let Some(selected) = argmax(&model_priority) else {
                break;
            };
            if model_priority[selected].abs() < PRIORITY_TOLERANCE {
                break;
            }

            // Predicted too expensive for what is left of this frame: defer
            // the model, its tasks are shed at frame end.
            if self.models[selected].last_spend_ms() > remaining {
                debug!(
                    model = self.models[selected].name(),
                    spend_ms = self.models[selected].last_spend_ms(),
                    remaining_ms = remaining,
                    "model deferred for this frame"
                );
                model_priority[selected] = 0.0;
                continue;
            }

            // Pull matching tasks front to back until the batch fills. If
            // the batch fills early the model keeps its residual priority
            // and is simply re-selected on the next round.
            let mut index = 0;
            while index < self.queue.len() && !self.models[selected].fully_batched() {
                if self.queue[index].model != selected {
                    index += 1;
                    continue;
                }
                let task = self.queue.remove(index);
                model_priority[selected] -= task.priority;
                let stream = self.models[selected].preprocess(task.image(&frame.image));
                if let Err(e) = self.models[selected].push_input(stream) {
                    warn!(error = %e, "dropping task");
                }
            }

            self.models[selected].infer()?;

            if clock.expired() {
                break;
            }
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

/// Group projected LiDAR returns into obstacles.
///
/// Pass 1 accretes each point onto the first obstacle within
/// `LIDAR_GRADIENT_SENSITIVE` meters whose box, inflated by
/// `LIDAR_MERGING_SENSITIVE`, covers it. Pass 2 coalesces obstacle pairs
/// that sit at similar range with overlapping inflated boxes; the absorbed
/// obstacle is tombstoned at `range_max` and ignored by every later
/// comparison.
pub fn segment_obstacles(points: &[LidarPoint], range_max: f32) -> Vec<Obstacle> {
    let mut obstacles: Vec<Obstacle> = Vec::new();

    for point in points {
        let (x, y) = (point.x as f32, point.y as f32);
        let mut matched = false;
        for obstacle in obstacles.iter_mut() {
            if (obstacle.range - point.range).abs() < LIDAR_GRADIENT_SENSITIVE
                && obstacle
                    .bbox
                    .contains_with_margin(x, y, LIDAR_MERGING_SENSITIVE)
            {
                obstacle.range = (obstacle.range + point.range) / 2.0;
                obstacle.bbox.extend(x, y);
                matched = true;
                break;
            }
        }
        if !matched {
            obstacles.push(Obstacle {
                range: point.range,
                bbox: BBox::point(x, y),
            });
        }
    }

    for i in 0..obstacles.len() {
        for j in 0..obstacles.len() {
            if i == j {
                continue;
            }
            let a = obstacles[i];
            let b = obstacles[j];
            if a.range >= range_max || b.range >= range_max {
                continue;
            }
            if (a.range - b.range).abs() >= LIDAR_GRADIENT_SENSITIVE {
                continue;
            }
            if boxes_mergeable(&a.bbox, &b.bbox) {
                obstacles[i].range = (a.range + b.range) / 2.0;
                obstacles[i].bbox.merge(&b.bbox);
                obstacles[j].range = range_max;
            }
        }
    }

    obstacles
}

fn boxes_mergeable(a: &BBox, b: &BBox) -> bool {
    let vertical = (a.ymax - b.ymin).max(b.ymax - a.ymin)
        < a.height() + b.height() + LIDAR_MERGING_SENSITIVE;
    let horizontal = (a.xmax - b.xmin).max(b.xmax - a.xmin)
        < a.width() + b.width() + LIDAR_MERGING_SENSITIVE;
    vertical && horizontal
}

/// Registered shape whose area is closest to `area`; first wins ties.
pub fn nearest_shape(shapes: &[ImageShape], area: f32) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, shape) in shapes.iter().enumerate() {
        let diff = (area - shape.area()).abs();
        match best {
            Some((_, smallest)) if smallest <= diff => {}
            _ => best = Some((index, diff)),
        }
    }
    best.map(|(index, _)| index)
}

/// Owned crop of the obstacle's box, clamped to the image bounds.
fn crop_region(image: &RgbImage, bbox: &BBox) -> RgbImage {
    let x = (bbox.xmin.max(0.0) as u32).min(image.width());
    let y = (bbox.ymin.max(0.0) as u32).min(image.height());
    let width = (bbox.xmax.max(0.0) as u32).min(image.width()).saturating_sub(x);
    let height = (bbox.ymax.max(0.0) as u32).min(image.height()).saturating_sub(y);
    imageops::crop_imm(image, x, y, width, height).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: i32, y: i32, range: f32) -> LidarPoint {
        LidarPoint::new(x, y, range)
    }

    const RANGE_MAX: f32 = 75.0;

    #[test]
    fn well_separated_points_stay_separate() {
        let points = vec![point(10, 10, 5.0), point(400, 400, 20.0)];
        let obstacles = segment_obstacles(&points, RANGE_MAX);
        assert_eq!(obstacles.len(), 2);
        assert_eq!(obstacles[0].bbox.area(), 0.0);
        assert_eq!(obstacles[1].bbox.area(), 0.0);
    }

    #[test]
    fn dense_cluster_forms_one_obstacle() {
        // 10x10 grid of returns over a 63x63 pixel patch near (100, 100).
        let mut points = Vec::new();
        for row in 0..10 {
            for col in 0..10 {
                let noise = if (row + col) % 2 == 0 { 0.4 } else { -0.4 };
                points.push(point(70 + col * 7, 70 + row * 7, 10.0 + noise));
            }
        }
        let obstacles = segment_obstacles(&points, RANGE_MAX);
        let survivors: Vec<_> = obstacles
            .iter()
            .filter(|o| o.range < RANGE_MAX)
            .collect();
        assert_eq!(survivors.len(), 1);
        let obstacle = survivors[0];
        assert!((obstacle.range - 10.0).abs() < 1.0);
        assert_eq!(obstacle.bbox, BBox::new(70.0, 70.0, 133.0, 133.0));
        assert!(obstacle.bbox.area() > MIN_OBSTACLE_AREA);
    }

    #[test]
    fn overlapping_clusters_at_different_ranges_do_not_merge() {
        // Two 3x3 grids over the same pixel patch, ranges 5 m and 30 m.
        let mut points = Vec::new();
        for row in 0..3 {
            for col in 0..3 {
                points.push(point(100 + col * 30, 100 + row * 30, 5.0));
                points.push(point(110 + col * 30, 110 + row * 30, 30.0));
            }
        }
        let obstacles = segment_obstacles(&points, RANGE_MAX);
        let survivors: Vec<_> = obstacles
            .iter()
            .filter(|o| o.range < RANGE_MAX)
            .collect();
        assert_eq!(survivors.len(), 2);
        assert!((survivors[0].range - 5.0).abs() < LIDAR_GRADIENT_SENSITIVE);
        assert!((survivors[1].range - 30.0).abs() < LIDAR_GRADIENT_SENSITIVE);
    }

    #[test]
    fn nearby_obstacles_at_same_range_coalesce() {
        // The second return starts its own obstacle while the first box is
        // still a point; the first box then grows to within merging reach,
        // so pass 2 has to coalesce the pair.
        let points = vec![
            point(100, 100, 12.0),
            point(150, 150, 12.0),
            point(110, 110, 12.0),
            point(120, 120, 12.0),
            point(130, 130, 12.0),
            point(140, 140, 12.0),
        ];
        let obstacles = segment_obstacles(&points, RANGE_MAX);
        let survivors: Vec<_> = obstacles
            .iter()
            .filter(|o| o.range < RANGE_MAX)
            .collect();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].bbox, BBox::new(100.0, 100.0, 150.0, 150.0));
        assert_eq!(survivors[0].range, 12.0);
    }

    #[test]
    fn tombstones_are_ignored_by_later_comparisons() {
        // The grown first obstacle absorbs the point at (150, 150), which
        // tombstones it at the sensor maximum. The far return at (158, 158)
        // sits within merging reach of that stale box and within the range
        // gradient of the tombstone value; it must still survive untouched.
        let points = vec![
            point(100, 100, 12.0),
            point(150, 150, 12.0),
            point(110, 110, 12.0),
            point(120, 120, 12.0),
            point(130, 130, 12.0),
            point(140, 140, 12.0),
            point(158, 158, RANGE_MAX - 2.0),
        ];
        let obstacles = segment_obstacles(&points, RANGE_MAX);
        let survivors: Vec<_> = obstacles
            .iter()
            .filter(|o| o.range < RANGE_MAX)
            .collect();
        assert_eq!(survivors.len(), 2);
        assert_eq!(survivors[0].range, 12.0);
        assert_eq!(survivors[1].range, RANGE_MAX - 2.0);
    }

    #[test]
    fn segmentation_is_deterministic() {
        let points: Vec<_> = (0..50)
            .map(|i| point(50 + (i * 17) % 300, 50 + (i * 29) % 300, 8.0 + (i % 7) as f32))
            .collect();
        let first = segment_obstacles(&points, RANGE_MAX);
        let second = segment_obstacles(&points, RANGE_MAX);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_lidar_yields_no_obstacles() {
        assert!(segment_obstacles(&[], RANGE_MAX).is_empty());
    }

    #[test]
    fn nearest_shape_minimizes_area_difference() {
        let shapes = vec![
            ImageShape::new(56, 56),
            ImageShape::new(112, 112),
            ImageShape::new(168, 168),
        ];
        assert_eq!(nearest_shape(&shapes, 60.0 * 60.0), Some(0));
        assert_eq!(nearest_shape(&shapes, 110.0 * 110.0), Some(1));
        assert_eq!(nearest_shape(&shapes, 1.0e9), Some(2));
        assert_eq!(nearest_shape(&[], 100.0), None);
    }

    #[test]
    fn nearest_shape_ties_resolve_to_first() {
        // 8000 is equidistant from areas 6000 and 10000.
        let shapes = vec![ImageShape::new(100, 60), ImageShape::new(100, 100)];
        assert_eq!(nearest_shape(&shapes, 8000.0), Some(0));
    }

    #[test]
    fn crop_is_clamped_to_image_bounds() {
        let image = RgbImage::new(100, 80);
        let crop = crop_region(&image, &BBox::new(60.0, 50.0, 140.0, 120.0));
        assert_eq!((crop.width(), crop.height()), (40, 30));
        let empty = crop_region(&image, &BBox::new(150.0, 90.0, 180.0, 120.0));
        assert_eq!((empty.width(), empty.height()), (0, 0));
    }
}
