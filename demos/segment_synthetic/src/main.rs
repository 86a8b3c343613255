use argh::FromArgs;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::PathBuf;

use cellseg::image::{Image, ImageSize};
use cellseg::learn::{
    fisher_rao::FisherRaoParams,
    sample::{Label, NEGATIVE, POSITIVE},
    segmenter::{Segmenter, SegmenterConfig},
};

#[derive(FromArgs)]
/// Train a cell segmenter on a synthetic microscopy scene and segment it
struct Args {
    /// width of the synthetic scene
    #[argh(option, default = "160")]
    width: usize,

    /// height of the synthetic scene
    #[argh(option, default = "120")]
    height: usize,

    /// seed of the scene noise
    #[argh(option, default = "0")]
    seed: u64,

    /// convergence tolerance of the optimizer
    #[argh(option, default = "1e-5")]
    tolerance: f64,

    /// maximum number of optimizer iterations
    #[argh(option, default = "100")]
    max_iterations: usize,

    /// equalize the color histogram before training and segmentation
    #[argh(switch)]
    equalize: bool,

    /// path to write the trained model as json
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,
}

/// A disc shaped cell.
struct Cell {
    cx: f32,
    cy: f32,
    radius: f32,
}

impl Cell {
    fn contains(&self, x: usize, y: usize) -> bool {
        let (dx, dy) = (x as f32 - self.cx, y as f32 - self.cy);
        dx * dx + dy * dy <= self.radius * self.radius
    }
}

fn render_scene(
    size: ImageSize,
    cells: &[Cell],
    seed: u64,
) -> Result<Image<u8, 3>, Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(size.width * size.height * 3);

    for y in 0..size.height {
        for x in 0..size.width {
            let inside = cells.iter().any(|cell| cell.contains(x, y));
            let checker = ((x + y) % 2) as f32;
            let stripes = (y % 2) as f32;
            // cells carry a checker texture, the background row stripes
            let rgb = if inside {
                [0.55 + 0.3 * checker, 0.35, 0.6 - 0.2 * checker]
            } else {
                [0.3, 0.45 + 0.15 * stripes, 0.25]
            };
            for v in rgb {
                let noisy = (v + rng.random_range(-0.08..0.08)).clamp(0.0, 1.0);
                data.push((noisy * 255.0).round() as u8);
            }
        }
    }

    Ok(Image::new(size, data)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let size = ImageSize {
        width: args.width,
        height: args.height,
    };

    let cells = [
        Cell {
            cx: 0.25,
            cy: 0.3,
            radius: 0.16,
        },
        Cell {
            cx: 0.7,
            cy: 0.35,
            radius: 0.2,
        },
        Cell {
            cx: 0.45,
            cy: 0.75,
            radius: 0.18,
        },
    ]
    .into_iter()
    .map(|c| Cell {
        cx: c.cx * size.width as f32,
        cy: c.cy * size.height as f32,
        radius: c.radius * size.width.min(size.height) as f32,
    })
    .collect::<Vec<_>>();

    let scene = render_scene(size, &cells, args.seed)?;

    let config = SegmenterConfig {
        equalize_histogram: args.equalize,
        fisher_rao: FisherRaoParams {
            max_iterations: args.max_iterations,
            tolerance: args.tolerance,
        },
        ..Default::default()
    };
    // sample windows lying fully inside a cell or fully outside all of them
    let radius = config.window_size / 2;
    let (mut positive, mut negative) = (Vec::new(), Vec::new());
    let in_cell = |x: usize, y: usize| cells.iter().any(|c| c.contains(x, y));
    for y in (radius..size.height.saturating_sub(radius)).step_by(config.window_size) {
        for x in (radius..size.width.saturating_sub(radius)).step_by(config.window_size) {
            let corners = [
                (x - radius, y - radius),
                (x + radius, y - radius),
                (x - radius, y + radius),
                (x + radius, y + radius),
            ];
            if corners.iter().all(|&(cx, cy)| in_cell(cx, cy)) {
                positive.push((x, y));
            } else if corners.iter().all(|&(cx, cy)| !in_cell(cx, cy)) {
                negative.push((x, y));
            }
        }
    }
    log::info!(
        "Picked {} cellular and {} extra-cellular samples",
        positive.len(),
        negative.len()
    );

    let segmenter = Segmenter::train_from_image(&scene, &positive, &negative, config)?;
    println!("Optimization status: {:?}", segmenter.status());
    println!("Objective trace: {:?}", segmenter.objective_trace());
    println!(
        "Transform pair: {}",
        serde_json::to_string_pretty(segmenter.transform())?
    );

    let result = segmenter.segment(&scene)?;

    let count = |label: Label| result.labels.as_slice().iter().filter(|&&l| l == label).count();
    let mut correct = 0;
    for y in 0..size.height {
        for x in 0..size.width {
            let expected = if in_cell(x, y) {
                POSITIVE
            } else {
                NEGATIVE
            };
            if result.labels.get([y, x, 0]) == Some(&expected) {
                correct += 1;
            }
        }
    }
    println!(
        "Cellular pixels: {}, extra-cellular pixels: {}, agreement with the ground truth: {:.2}%",
        count(POSITIVE),
        count(NEGATIVE),
        100.0 * correct as f64 / (size.width * size.height) as f64
    );

    if let Some(path) = args.output {
        std::fs::write(&path, serde_json::to_string_pretty(&segmenter)?)?;
        println!("Model written to {}", path.display());
    }

    Ok(())
}
