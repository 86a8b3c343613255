//! Joint optimization of the color transform `A` and the texture projection `P`.
//!
//! With `D_i` the deviation of the class mean from the global mean and `E_ij` the deviation
//! of a sample from its class mean (all 8x3 feature matrices), the texture scatters for a
//! fixed `A` are
//!
//! ```text
//! Sb(A) = [D_1 D_2] · blockdiag(A, 2) · blockdiag(A, 2)ᵀ · [D_1 D_2]ᵀ / 2
//! Sw(A) = [E_11 … E_cn] · blockdiag(A, N) · blockdiag(A, N)ᵀ · [E_11 … E_cn]ᵀ / N
//! ```
//!
//! and the objective is the ratio trace `J = tr(W⁻¹ B)` with `W = Pᵀ Sw P`, `B = Pᵀ Sb P`.
//!
//! The optimizer starts from `A = I`, solves for `P`, then alternates an `A` step and a `P`
//! step until `J` changes by less than the tolerance.
//!
//! The `P` step is exact: the top generalized eigenvectors of `(Sb, Sw)` maximize `J` for a
//! fixed `A`. The `A` step maximizes a quadratic lower bound of `J(·, P)` that touches it at
//! the current `A`. With `U_i = W⁻¹ Pᵀ D_i A` the bound is maximized by
//!
//! ```text
//! A' = H⁻¹ Kᵀ
//! Kᵀ = [D_1ᵀ D_2ᵀ] · blockdiag(P, 2) · [U_1; U_2]
//! H  = [E_11ᵀ …] · blockdiag(P L, N) · blockdiag(P L, N)ᵀ · [E_11ᵀ …]ᵀ / N
//! ```
//!
//! where `L = [U_1 U_2]`. Hence `J(A', P) ≥ J(A, P)`, and a stationary `A` maps to itself.
//! `J` only depends on `A Aᵀ` up to scale, so `A'` is rescaled to `‖A'‖_F = √3`.

use faer::{Mat, MatRef};
use serde::{Deserialize, Serialize};

use cellseg_imgproc::lft::{FeatureVector, NUM_CHANNELS};
use cellseg_linalg::{
    block::{block_diagonal, hstack, vstack},
    eigen::{generalized_symmetric_eigen, inverse_sqrt, ratio_trace},
};

use crate::{
    sample::{feature_matrix, mean_vector, SampleSet},
    transform::{TransformPair, NUM_AXES},
    SegmentationError,
};

/// Number of sample blocks multiplied at once when assembling a scatter matrix.
const BLOCK_CHUNK: usize = 32;

/// Maximum number of color updates in one `A` step.
const COLOR_UPDATES: usize = 10;

/// Parameters of the alternating optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FisherRaoParams {
    /// Maximum number of full alternations.
    pub max_iterations: usize,
    /// Absolute change of the objective below which the optimization has converged.
    pub tolerance: f64,
}

impl Default for FisherRaoParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-5,
        }
    }
}

/// A consistent snapshot of the optimizer.
#[derive(Debug, Clone)]
pub struct FisherRaoState {
    /// 3x3 color transform.
    pub a: Mat<f64>,
    /// 8x3 texture projection.
    pub p: Mat<f64>,
    /// Objective `J` of the pair.
    pub objective: f64,
}

impl FisherRaoState {
    /// The learned pair as plain arrays.
    pub fn transform_pair(&self) -> Result<TransformPair, SegmentationError> {
        TransformPair::from_matrices(self.a.as_ref(), self.p.as_ref())
    }
}

/// How the optimization ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationStatus {
    /// The objective changed by at most the tolerance.
    Converged,
    /// The iteration cap was reached first.
    MaxIterationsReached,
    /// An alternation lowered the objective by more than the tolerance, the state before it
    /// was kept.
    ObjectiveDecreased,
}

/// Result of [`optimize`].
#[derive(Debug, Clone)]
pub struct FisherRaoOutput {
    /// Final state.
    pub state: FisherRaoState,
    /// Objective after initialization and after every accepted alternation.
    pub objective_trace: Vec<f64>,
    /// Number of alternations performed, including a discarded one.
    pub iterations: usize,
    /// Change of the objective in the last alternation.
    pub last_delta: f64,
    /// How the optimization ended.
    pub status: OptimizationStatus,
}

impl FisherRaoOutput {
    /// Return the state if the optimization converged.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentationError::NonConvergence`] with the best state for any other status.
    pub fn into_converged(self) -> Result<FisherRaoState, SegmentationError> {
        match self.status {
            OptimizationStatus::Converged => Ok(self.state),
            OptimizationStatus::MaxIterationsReached | OptimizationStatus::ObjectiveDecreased => {
                Err(SegmentationError::NonConvergence {
                    iterations: self.iterations,
                    last_delta: self.last_delta,
                    state: Box::new(self.state),
                })
            }
        }
    }
}

/// The class and sample deviations the scatter matrices are built from.
///
/// Built once per sample set and reused by every step.
#[derive(Debug, Clone)]
pub struct ScatterBasis {
    /// `D_i`, 8x3, one per class.
    class_deviations: Vec<Mat<f64>>,
    /// `E_ij`, 8x3, one per sample.
    sample_deviations: Vec<Mat<f64>>,
}

impl ScatterBasis {
    /// Compute the class and sample deviations of a sample set.
    pub fn new(samples: &SampleSet) -> Self {
        let classes = samples.classes();
        let all = classes
            .iter()
            .flat_map(|(_, class)| class.iter().copied())
            .collect::<Vec<FeatureVector>>();
        let global_mean = mean_vector(&all);

        let mut class_deviations = Vec::with_capacity(classes.len());
        let mut sample_deviations = Vec::with_capacity(all.len());
        for (_, class) in classes.iter() {
            let class_mean = mean_vector(class);
            class_deviations.push(feature_matrix(&difference(&class_mean, &global_mean)));
            sample_deviations.extend(
                class
                    .iter()
                    .map(|v| feature_matrix(&difference(v, &class_mean))),
            );
        }

        Self {
            class_deviations,
            sample_deviations,
        }
    }

    fn num_classes(&self) -> f64 {
        self.class_deviations.len() as f64
    }

    fn num_samples(&self) -> f64 {
        self.sample_deviations.len() as f64
    }

    /// Between-class texture scatter `Sb(A)`, 8x8.
    pub fn between_texture(&self, a: MatRef<'_, f64>) -> Result<Mat<f64>, SegmentationError> {
        let blocks = refs(&self.class_deviations);
        coupled_scatter(&blocks, a, self.num_classes())
    }

    /// Within-class texture scatter `Sw(A)`, 8x8.
    pub fn within_texture(&self, a: MatRef<'_, f64>) -> Result<Mat<f64>, SegmentationError> {
        let blocks = refs(&self.sample_deviations);
        coupled_scatter(&blocks, a, self.num_samples())
    }

    /// Within-class color scatter `Σ E_jᵀ M Mᵀ E_j / N` for a texture side matrix `M` with
    /// 8 rows, 3x3.
    pub fn within_color(&self, m: MatRef<'_, f64>) -> Result<Mat<f64>, SegmentationError> {
        let blocks = transposed_refs(&self.sample_deviations);
        coupled_scatter(&blocks, m, self.num_samples())
    }

    /// Objective `J(A, P)`.
    pub fn objective(
        &self,
        a: MatRef<'_, f64>,
        p: MatRef<'_, f64>,
    ) -> Result<f64, SegmentationError> {
        let sb = self.between_texture(a)?;
        let sw = self.within_texture(a)?;
        let pt = p.transpose();
        let num = pt * (sb.as_ref() * p).as_ref();
        let den = pt * (sw.as_ref() * p).as_ref();
        Ok(ratio_trace(num.as_ref(), den.as_ref())?)
    }

    /// Solve for the texture projection that maximizes the scatter ratio for a fixed `A`.
    pub fn optimize_p(&self, a: MatRef<'_, f64>) -> Result<Mat<f64>, SegmentationError> {
        let sb = self.between_texture(a)?;
        let sw = self.within_texture(a)?;
        Ok(generalized_symmetric_eigen(sb.as_ref(), sw.as_ref())?.top(NUM_AXES))
    }

    /// One update of the color transform for a fixed `P`, `A' = H⁻¹ Kᵀ` rescaled.
    ///
    /// Never lowers `J(·, P)` and leaves a stationary `A` unchanged.
    pub fn update_a(
        &self,
        a: MatRef<'_, f64>,
        p: MatRef<'_, f64>,
    ) -> Result<Mat<f64>, SegmentationError> {
        let sw = self.within_texture(a)?;
        let w = p.transpose() * (sw.as_ref() * p).as_ref();
        let w_inv_sqrt = inverse_sqrt(w.as_ref())?;
        let w_inv = w_inv_sqrt.as_ref() * w_inv_sqrt.as_ref();

        let u = self
            .class_deviations
            .iter()
            .map(|d| {
                let projected = p.transpose() * d.as_ref();
                let mixed = projected.as_ref() * a;
                w_inv.as_ref() * mixed.as_ref()
            })
            .collect::<Vec<_>>();
        let u_refs = refs(&u);

        let d_t = hstack(&transposed_refs(&self.class_deviations)).ok_or_else(stack_error)?;
        let expanded = block_diagonal(p, u.len());
        let u_stacked = vstack(&u_refs).ok_or_else(stack_error)?;
        let k_t = d_t.as_ref() * (expanded.as_ref() * u_stacked.as_ref()).as_ref();

        let l = hstack(&u_refs).ok_or_else(stack_error)?;
        let pl = p * l.as_ref();
        let h = self.within_color(pl.as_ref())?;
        let h_inv_sqrt = inverse_sqrt(h.as_ref())?;
        let next = h_inv_sqrt.as_ref() * (h_inv_sqrt.as_ref() * k_t.as_ref()).as_ref();

        rescaled(next)
    }

    /// Improve the color transform for a fixed `P` by repeated updates.
    ///
    /// Stops after a fixed number of updates or as soon as an update no longer raises `J`.
    /// Returns the transform and its objective.
    pub fn optimize_a(
        &self,
        a: MatRef<'_, f64>,
        p: MatRef<'_, f64>,
    ) -> Result<(Mat<f64>, f64), SegmentationError> {
        let mut best = a.to_owned();
        let mut objective = self.objective(a, p)?;
        for _ in 0..COLOR_UPDATES {
            let next = self.update_a(best.as_ref(), p)?;
            let next_objective = self.objective(next.as_ref(), p)?;
            if !next_objective.is_finite() || next_objective <= objective {
                break;
            }
            best = next;
            objective = next_objective;
        }
        Ok((best, objective))
    }

    /// The starting state: identity color transform and its best projection.
    pub fn initial_state(&self) -> Result<FisherRaoState, SegmentationError> {
        let a = Mat::<f64>::identity(NUM_CHANNELS, NUM_CHANNELS);
        let p = self.optimize_p(a.as_ref())?;
        let objective = self.objective(a.as_ref(), p.as_ref())?;
        Ok(FisherRaoState { a, p, objective })
    }
}

fn difference(a: &FeatureVector, b: &FeatureVector) -> FeatureVector {
    let mut d = *a;
    d.iter_mut().zip(b.iter()).for_each(|(x, y)| *x -= y);
    d
}

fn stack_error() -> SegmentationError {
    SegmentationError::InvalidInput("cannot stack empty or mismatched blocks".into())
}

/// Scale a color transform to the Frobenius norm of the identity.
fn rescaled(a: Mat<f64>) -> Result<Mat<f64>, SegmentationError> {
    let norm = (0..a.ncols())
        .flat_map(|j| (0..a.nrows()).map(move |i| (i, j)))
        .map(|(i, j)| a.read(i, j).powi(2))
        .sum::<f64>()
        .sqrt();
    if !norm.is_finite() || norm <= 0.0 {
        return Err(SegmentationError::IllConditioned {
            rcond: 0.0,
            state: None,
        });
    }

    let scale = (NUM_CHANNELS as f64).sqrt() / norm;
    Ok(Mat::from_fn(a.nrows(), a.ncols(), |i, j| a.read(i, j) * scale))
}

fn refs(blocks: &[Mat<f64>]) -> Vec<MatRef<'_, f64>> {
    blocks.iter().map(|b| b.as_ref()).collect()
}

fn transposed_refs(blocks: &[Mat<f64>]) -> Vec<MatRef<'_, f64>> {
    blocks.iter().map(|b| b.transpose()).collect()
}

/// `[X_1 … X_n] · blockdiag(M, n) · blockdiag(M, n)ᵀ · [X_1 … X_n]ᵀ / norm`.
///
/// The stacked product is accumulated over chunks of blocks so the block-diagonal matrix
/// stays small for large sample sets.
fn coupled_scatter(
    blocks: &[MatRef<'_, f64>],
    base: MatRef<'_, f64>,
    norm: f64,
) -> Result<Mat<f64>, SegmentationError> {
    let rows = blocks
        .first()
        .map(|b| b.nrows())
        .ok_or_else(|| SegmentationError::InvalidInput("no blocks to build a scatter".into()))?;

    let mut acc = Mat::<f64>::zeros(rows, rows);
    for chunk in blocks.chunks(BLOCK_CHUNK) {
        let stacked = hstack(chunk).ok_or(SegmentationError::DimensionMismatch {
            expected: rows,
            found: chunk.iter().map(|b| b.nrows()).find(|&r| r != rows).unwrap_or(rows),
        })?;
        if stacked.ncols() != base.nrows() * chunk.len() {
            return Err(SegmentationError::DimensionMismatch {
                expected: base.nrows() * chunk.len(),
                found: stacked.ncols(),
            });
        }

        let weighted = stacked.as_ref() * block_diagonal(base, chunk.len()).as_ref();
        let scatter = weighted.as_ref() * weighted.transpose();
        acc = acc.as_ref() + scatter.as_ref();
    }

    Ok(Mat::from_fn(rows, rows, |i, j| acc.read(i, j) / norm))
}

/// One full alternation: an `A` step followed by a `P` step.
///
/// Pure in the state, the candidate is returned and `state` is left untouched.
pub fn step(
    state: &FisherRaoState,
    basis: &ScatterBasis,
) -> Result<FisherRaoState, SegmentationError> {
    let (a, _) = basis.optimize_a(state.a.as_ref(), state.p.as_ref())?;
    let p = basis.optimize_p(a.as_ref())?;
    let objective = basis.objective(a.as_ref(), p.as_ref())?;
    if !objective.is_finite() {
        return Err(SegmentationError::IllConditioned {
            rcond: 0.0,
            state: None,
        });
    }
    Ok(FisherRaoState { a, p, objective })
}

/// Learn the color transform and texture projection of a sample set.
///
/// # Arguments
///
/// * `samples` - The labeled training features.
/// * `params` - The iteration cap and tolerance.
///
/// # Returns
///
/// The best state with the objective trace. Reaching the iteration cap or a lowered
/// objective is reported through [`FisherRaoOutput::status`], see
/// [`FisherRaoOutput::into_converged`].
///
/// # Errors
///
/// Returns [`SegmentationError::IllConditioned`] if a within-class scatter cannot be inverted,
/// carrying the last consistent state when the failure happens after initialization, and
/// [`SegmentationError::InvalidInput`] for a negative or non-finite tolerance.
pub fn optimize(
    samples: &SampleSet,
    params: &FisherRaoParams,
) -> Result<FisherRaoOutput, SegmentationError> {
    if !params.tolerance.is_finite() || params.tolerance < 0.0 {
        return Err(SegmentationError::InvalidInput(format!(
            "tolerance must be finite and non-negative, got {}",
            params.tolerance
        )));
    }

    let basis = ScatterBasis::new(samples);

    let mut state = basis.initial_state()?;
    let mut objective_trace = vec![state.objective];
    log::debug!("Initial objective: {}", state.objective);

    let mut last_delta = f64::INFINITY;
    for iteration in 1..=params.max_iterations {
        let candidate = step(&state, &basis).map_err(|e| e.with_state(&state))?;
        last_delta = candidate.objective - state.objective;

        log::debug!(
            "Iteration: {} objective: {} delta: {}",
            iteration,
            candidate.objective,
            last_delta
        );

        if last_delta < -params.tolerance {
            log::warn!(
                "Alternation {} lowered the objective by {}, keeping the previous state",
                iteration,
                -last_delta
            );
            return Ok(FisherRaoOutput {
                state,
                objective_trace,
                iterations: iteration,
                last_delta,
                status: OptimizationStatus::ObjectiveDecreased,
            });
        }

        if last_delta >= 0.0 {
            state = candidate;
            objective_trace.push(state.objective);
        }

        if last_delta.abs() <= params.tolerance {
            log::info!(
                "Fisher-Rao converged in {} iterations with objective {}",
                iteration,
                state.objective
            );
            return Ok(FisherRaoOutput {
                state,
                objective_trace,
                iterations: iteration,
                last_delta,
                status: OptimizationStatus::Converged,
            });
        }
    }

    log::warn!(
        "Fisher-Rao reached {} iterations without converging, last change {}",
        params.max_iterations,
        last_delta
    );

    Ok(FisherRaoOutput {
        state,
        objective_trace,
        iterations: params.max_iterations,
        last_delta,
        status: OptimizationStatus::MaxIterationsReached,
    })
}
