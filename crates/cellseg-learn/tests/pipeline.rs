use cellseg_image::{Image, ImageSize};
use cellseg_imgproc::lft::FeatureVector;
use cellseg_learn::{
    fisher_rao::{optimize, FisherRaoParams, OptimizationStatus},
    kmeans::{reduce, squared_distance, KMeansParams},
    knn::{classify, Prototypes},
    sample::{Label, SampleSet, FEATURE_DIM, NEGATIVE, POSITIVE},
    segmenter::{Segmenter, SegmenterConfig},
    transform::ProjectedFeature,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

const PATCH: usize = 11;

/// Class specific texture, every channel has its own pattern so the classes differ in all
/// three channels.
fn texture(label: Label, y: usize, x: usize, c: usize, rng: &mut StdRng) -> f32 {
    let checker = ((x + y) % 2) as f32;
    let columns = (x % 2) as f32;
    let rows = (y % 2) as f32;
    let base = match (label, c) {
        (POSITIVE, 0) => 0.3 + 0.6 * checker,
        (POSITIVE, 1) => 0.2 + 0.4 * columns,
        (POSITIVE, _) => 0.5,
        (_, 0) => 0.3,
        (_, 1) => 0.5 + 0.25 * rows,
        (_, _) => 0.2 + 0.3 * checker,
    };
    base + rng.random_range(-0.1..0.1)
}

fn textured_image(
    size: ImageSize,
    label_at: impl Fn(usize) -> Label,
    seed: u64,
) -> Image<f32, 3> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(size.width * size.height * 3);
    for y in 0..size.height {
        for x in 0..size.width {
            for c in 0..3 {
                data.push(texture(label_at(x), y, x, c, &mut rng));
            }
        }
    }
    Image::new(size, data).expect("valid size")
}

fn patch(label: Label, seed: u64) -> Image<f32, 3> {
    let size = ImageSize {
        width: PATCH,
        height: PATCH,
    };
    textured_image(size, |_| label, seed)
}

#[test]
fn end_to_end_synthetic_patches() -> Result<(), Box<dyn std::error::Error>> {
    let positive = (0..4).map(|i| patch(POSITIVE, i)).collect::<Vec<_>>();
    let negative = (0..4).map(|i| patch(NEGATIVE, 100 + i)).collect::<Vec<_>>();

    let config = SegmenterConfig {
        fisher_rao: FisherRaoParams {
            max_iterations: 500,
            tolerance: 1e-3,
        },
        ..Default::default()
    };
    let segmenter = Segmenter::train(&positive, &negative, config)?;

    assert_eq!(segmenter.status(), OptimizationStatus::Converged);
    let pair = segmenter.transform();
    assert!(pair.color.iter().flatten().all(|x| x.is_finite()));
    assert!(pair.texture.iter().flatten().all(|x| x.is_finite()));

    let trace = segmenter.objective_trace();
    assert!(trace.iter().all(|j| j.is_finite()));
    assert!(trace.len() > 2);
    assert!(trace.windows(2).all(|w| w[1] >= w[0]));

    // a learned color transform, not a rotation of the identity
    let a = pair.color_matrix();
    let g = a.as_ref() * a.transpose();
    let mean_diagonal = (0..3).map(|i| g.read(i, i)).sum::<f64>() / 3.0;
    let anisotropy = (0..3)
        .flat_map(|i| (0..3).map(move |j| (i, j)))
        .map(|(i, j)| {
            let isotropic = if i == j { mean_diagonal } else { 0.0 };
            (g.read(i, j) - isotropic).abs()
        })
        .fold(0.0f64, f64::max);
    assert!(anisotropy > 1e-3);
    assert_eq!(segmenter.prototypes().len(), 40);

    for p in positive.iter() {
        assert_eq!(segmenter.classify_patch(p)?, POSITIVE);
    }
    for p in negative.iter() {
        assert_eq!(segmenter.classify_patch(p)?, NEGATIVE);
    }

    // left half cellular, right half extra-cellular
    let size = ImageSize {
        width: 44,
        height: 22,
    };
    let scene = textured_image(size, |x| if x < 22 { POSITIVE } else { NEGATIVE }, 7);
    let result = segmenter.segment_f32(&scene)?;

    assert_eq!(result.labels.size(), size);
    for y in 6..16 {
        for x in 6..16 {
            assert_eq!(result.labels.get([y, x, 0]), Some(&POSITIVE));
            assert_eq!(result.colors.pixel(x, y), Some(&[0u8, 255, 0][..]));
        }
        for x in 28..38 {
            assert_eq!(result.labels.get([y, x, 0]), Some(&NEGATIVE));
            assert_eq!(result.colors.pixel(x, y), Some(&[0u8, 0, 255][..]));
        }
    }

    Ok(())
}

#[test]
fn train_from_picked_centers() -> Result<(), Box<dyn std::error::Error>> {
    let size = ImageSize {
        width: 60,
        height: 30,
    };
    let scene = textured_image(size, |x| if x < 30 { POSITIVE } else { NEGATIVE }, 21);
    let scene_u8 = Image::<u8, 3>::new(
        size,
        scene
            .as_slice()
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect(),
    )?;

    let positive = [(7, 7), (14, 7), (7, 20), (20, 22)];
    let negative = [(40, 7), (50, 9), (38, 21), (52, 22)];
    let segmenter = Segmenter::train_from_image(
        &scene_u8,
        &positive,
        &negative,
        SegmenterConfig {
            fisher_rao: FisherRaoParams {
                max_iterations: 100,
                tolerance: 1e-3,
            },
            ..Default::default()
        },
    )?;

    let result = segmenter.segment(&scene_u8)?;
    assert_eq!(result.labels.get([15, 15, 0]), Some(&POSITIVE));
    assert_eq!(result.labels.get([15, 45, 0]), Some(&NEGATIVE));

    // centers too close to the border cannot hold a full window
    assert!(Segmenter::train_from_image(
        &scene_u8,
        &[(2, 2), (7, 7)],
        &negative,
        SegmenterConfig::default()
    )
    .is_err());

    Ok(())
}

fn gaussian_features(rng: &mut StdRng, mean: f64, n: usize) -> Vec<FeatureVector> {
    (0..n)
        .map(|_| {
            let mut v = [0.0; FEATURE_DIM];
            for (i, x) in v.iter_mut().enumerate() {
                let noise: f64 = (0..4).map(|_| rng.random_range(-1.0..1.0)).sum();
                *x = mean * (1.0 + 0.05 * (i % 7) as f64) + noise;
            }
            v
        })
        .collect()
}

#[test]
fn separable_classes_are_classified_exactly() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(2024);
    let train_pos = gaussian_features(&mut rng, 10.0, 40);
    let train_neg = gaussian_features(&mut rng, 0.0, 40);
    let test_pos = gaussian_features(&mut rng, 10.0, 20);
    let test_neg = gaussian_features(&mut rng, 0.0, 20);

    let samples = SampleSet::new(train_pos.clone(), train_neg.clone())?;
    let output = optimize(&samples, &FisherRaoParams::default())?;
    assert!(output.objective_trace.len() > 2);
    for w in output.objective_trace.windows(2) {
        assert!(w[1] >= w[0]);
    }
    let pair = output.state.transform_pair()?;

    let project = |vs: &[FeatureVector]| vs.iter().map(|v| pair.project(v)).collect::<Vec<_>>();
    let (proj_pos, proj_neg) = (project(&train_pos), project(&train_neg));

    // every held-out sample lies closer to its own class centroid
    let centroid = |vs: &[ProjectedFeature]| {
        let mut c = [0.0; 9];
        for v in vs {
            c.iter_mut().zip(v.iter()).for_each(|(a, b)| *a += b / vs.len() as f64);
        }
        c
    };
    let (c_pos, c_neg) = (centroid(&proj_pos), centroid(&proj_neg));
    for z in project(&test_pos) {
        assert!(squared_distance(&z, &c_pos) < squared_distance(&z, &c_neg));
    }
    for z in project(&test_neg) {
        assert!(squared_distance(&z, &c_neg) < squared_distance(&z, &c_pos));
    }

    let params = KMeansParams::default();
    let mut prototypes = Prototypes::new();
    prototypes.push_class(POSITIVE, &reduce(&proj_pos, 20, &params)?);
    prototypes.push_class(NEGATIVE, &reduce(&proj_neg, 20, &params)?);

    for z in project(&test_pos) {
        assert_eq!(classify(&prototypes, &z, 9)?, POSITIVE);
    }
    for z in project(&test_neg) {
        assert_eq!(classify(&prototypes, &z, 9)?, NEGATIVE);
    }

    Ok(())
}
