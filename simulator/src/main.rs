//! Synthesizes a RoadSight dataset: one directory per frame containing
//! `FRONT.jpeg` and `FRONT.txt`, so the perception node can be exercised
//! without a real recording. Obstacles are bright rectangles in the image
//! backed by a dense grid of LiDAR returns at a common range.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use image::{Rgb, RgbImage};
use rand::prelude::*;
use rand::rngs::StdRng;

#[derive(Parser, Debug)]
#[command(author, version, about = "RoadSight dataset simulator", long_about = None)]
struct Args {
    /// Output dataset root
    #[arg(short, long, default_value = "dataset/simulated")]
    out: PathBuf,

    /// Number of frames to synthesize
    #[arg(short, long, default_value_t = 10)]
    frames: usize,

    /// Image width in pixels
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Image height in pixels
    #[arg(long, default_value_t = 1280)]
    height: u32,

    /// Obstacles per frame
    #[arg(long, default_value_t = 3)]
    obstacles: usize,

    /// RNG seed, for reproducible datasets
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

struct Obstacle {
    x: u32,
    y: u32,
    size: u32,
    range: f32,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);

    for frame_id in 0..args.frames {
        let frame_dir = args.out.join(frame_id.to_string());
        fs::create_dir_all(&frame_dir)
            .with_context(|| format!("creating {}", frame_dir.display()))?;

        let obstacles: Vec<Obstacle> = (0..args.obstacles)
            .map(|_| {
                let size = rng.gen_range(80..320).min(args.width / 4);
                Obstacle {
                    x: rng.gen_range(0..args.width.saturating_sub(size)),
                    y: rng.gen_range(0..args.height.saturating_sub(size)),
                    size,
                    range: rng.gen_range(4.0..70.0),
                }
            })
            .collect();

        write_camera(&frame_dir, args.width, args.height, &obstacles, &mut rng)?;
        write_lidar(&frame_dir, &obstacles, &mut rng)?;
        println!("frame {frame_id}: {} obstacles", obstacles.len());
    }

    println!("dataset written to {}", args.out.display());
    Ok(())
}

fn write_camera(
    frame_dir: &Path,
    width: u32,
    height: u32,
    obstacles: &[Obstacle],
    rng: &mut StdRng,
) -> anyhow::Result<()> {
    let mut image = RgbImage::from_pixel(width, height, Rgb([60, 70, 80]));

    // Mild sensor noise so the JPEG does not compress to nothing.
    for pixel in image.pixels_mut() {
        let noise: i16 = rng.gen_range(-8..8);
        for channel in pixel.0.iter_mut() {
            *channel = (*channel as i16 + noise).clamp(0, 255) as u8;
        }
    }

    for obstacle in obstacles {
        let tone = Rgb([
            rng.gen_range(140..255),
            rng.gen_range(100..220),
            rng.gen_range(60..180),
        ]);
        for y in obstacle.y..(obstacle.y + obstacle.size).min(height) {
            for x in obstacle.x..(obstacle.x + obstacle.size).min(width) {
                image.put_pixel(x, y, tone);
            }
        }
    }

    let path = frame_dir.join("FRONT.jpeg");
    image
        .save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn write_lidar(frame_dir: &Path, obstacles: &[Obstacle], rng: &mut StdRng) -> anyhow::Result<()> {
    let path = frame_dir.join("FRONT.txt");
    let mut file =
        fs::File::create(&path).with_context(|| format!("writing {}", path.display()))?;
    writeln!(file, "x\ty\trange")?;

    for obstacle in obstacles {
        // A 10x10 grid of returns across the obstacle face.
        let step = (obstacle.size / 10).max(1);
        for row in 0..10 {
            for col in 0..10 {
                let x = obstacle.x + col * step;
                let y = obstacle.y + row * step;
                let range = obstacle.range + rng.gen_range(-0.5..0.5);
                writeln!(file, "{x}\t{y}\t{range:.2}")?;
            }
        }
    }
    Ok(())
}
