use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::SegmentationError;

/// Parameters of the k-means prototype reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansParams {
    /// Maximum number of Lloyd iterations.
    pub max_iterations: usize,
    /// Largest centroid movement below which the clustering has converged.
    pub tolerance: f64,
    /// Seed of the random generator used for the k-means++ seeding.
    pub seed: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-9,
            seed: 0,
        }
    }
}

/// Squared Euclidean distance between two points.
#[inline]
pub fn squared_distance<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest<const D: usize>(point: &[f64; D], centroids: &[[f64; D]]) -> usize {
    let mut best_idx = 0;
    let mut min_dist = f64::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let dist = squared_distance(point, centroid);
        if dist < min_dist {
            min_dist = dist;
            best_idx = i;
        }
    }
    best_idx
}

/// Pick `k` initial centroids, each new one drawn with probability proportional to its
/// squared distance to the closest centroid picked so far.
fn kmeans_plusplus<const D: usize>(data: &[[f64; D]], k: usize, rng: &mut StdRng) -> Vec<[f64; D]> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(data[rng.random_range(0..data.len())]);

    let mut distances = vec![f64::INFINITY; data.len()];

    for _ in 1..k {
        let last_centroid = centroids[centroids.len() - 1];

        distances
            .par_iter_mut()
            .zip(data.par_iter())
            .for_each(|(min_dist, point)| {
                let dist = squared_distance(point, &last_centroid);
                if dist < *min_dist {
                    *min_dist = dist;
                }
            });

        let total_dist: f64 = distances.iter().sum();

        // every point coincides with a centroid
        if total_dist == 0.0 {
            centroids.push(data[rng.random_range(0..data.len())]);
            continue;
        }

        let mut rand_val = rng.random_range(0.0..1.0) * total_dist;
        let mut chosen_idx = data.len() - 1;
        for (i, &dist) in distances.iter().enumerate() {
            rand_val -= dist;
            if rand_val <= 0.0 && dist > 0.0 {
                chosen_idx = i;
                break;
            }
        }
        centroids.push(data[chosen_idx]);
    }

    centroids
}

/// Compress a set of points into `k` representative centroids.
///
/// Seeds with k-means++ and refines with Lloyd iterations. The result is deterministic for a
/// fixed seed. A cluster that loses all its points keeps its previous centroid, so exactly `k`
/// centroids are returned even when `k` exceeds the number of distinct points.
///
/// # Arguments
///
/// * `data` - The points to cluster.
/// * `k` - The number of centroids.
/// * `params` - Iteration cap, tolerance and seed.
///
/// # Errors
///
/// Returns an error if `data` is empty or `k` is zero.
pub fn reduce<const D: usize>(
    data: &[[f64; D]],
    k: usize,
    params: &KMeansParams,
) -> Result<Vec<[f64; D]>, SegmentationError> {
    if data.is_empty() {
        return Err(SegmentationError::InvalidInput(
            "cannot cluster an empty set of points".into(),
        ));
    }
    if k == 0 {
        return Err(SegmentationError::InvalidInput(
            "the number of clusters must be greater than zero".into(),
        ));
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut centroids = kmeans_plusplus(data, k, &mut rng);

    for iteration in 0..params.max_iterations {
        let assignments = data
            .par_iter()
            .map(|point| nearest(point, &centroids))
            .collect::<Vec<_>>();

        let mut sums = vec![[0.0; D]; k];
        let mut counts = vec![0usize; k];
        for (point, &cluster) in data.iter().zip(assignments.iter()) {
            sums[cluster]
                .iter_mut()
                .zip(point.iter())
                .for_each(|(s, x)| *s += x);
            counts[cluster] += 1;
        }

        let mut max_shift = 0.0f64;
        for ((centroid, sum), &count) in centroids.iter_mut().zip(sums.iter()).zip(counts.iter()) {
            if count == 0 {
                continue;
            }
            let mut updated = *sum;
            updated.iter_mut().for_each(|s| *s /= count as f64);
            max_shift = max_shift.max(squared_distance(centroid, &updated).sqrt());
            *centroid = updated;
        }

        log::debug!("k-means iteration: {} max shift: {}", iteration, max_shift);

        if max_shift <= params.tolerance {
            break;
        }
    }

    Ok(centroids)
}
