#[cfg(feature = "model")]
pub mod model;

use std::sync::Arc;

use rayon::prelude::*;

use crate::config::TtaConfig;
use crate::error::{PipelineError, Result};
use crate::models::NormalizedTensor;
use crate::tta::AugmentedView;

/// The trained classifier, seen from the pipeline: one tensor in, one positive-class
/// probability in `[0, 1]` out.
///
/// Implementations must be deterministic and safe to call from several threads at once.
/// Adapting models with other output conventions (e.g. two-class softmax) happens inside the
/// implementation, never in the pipeline.
pub trait Scorer: Send + Sync {
    fn score(&self, tensor: &NormalizedTensor) -> anyhow::Result<f32>;

    /// Human-readable name (used in logs)
    fn name(&self) -> &str {
        "scorer"
    }
}

impl<S: Scorer + ?Sized> Scorer for Arc<S> {
    fn score(&self, tensor: &NormalizedTensor) -> anyhow::Result<f32> {
        (**self).score(tensor)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Closure-backed scorer
pub struct FnScorer<F> {
    name: String,
    f: F,
}

impl<F> FnScorer<F>
where
    F: Fn(&NormalizedTensor) -> anyhow::Result<f32> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Scorer for FnScorer<F>
where
    F: Fn(&NormalizedTensor) -> anyhow::Result<f32> + Send + Sync,
{
    fn score(&self, tensor: &NormalizedTensor) -> anyhow::Result<f32> {
        (self.f)(tensor)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Arithmetic mean of a score vector. The result always lies within
/// `[min(scores), max(scores)]`.
pub fn aggregate(scores: &[f32]) -> Result<f32> {
    if scores.is_empty() {
        return Err(PipelineError::InvariantViolation(
            "cannot aggregate an empty score vector".to_string(),
        ));
    }
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(PipelineError::InvariantViolation(format!(
            "score vector contains non-finite value {bad}"
        )));
    }

    let sum: f64 = scores.iter().map(|&s| s as f64).sum();
    let mean = (sum / scores.len() as f64) as f32;
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    Ok(mean.clamp(min, max))
}

fn invoke(scorer: &dyn Scorer, view: &AugmentedView) -> Result<f32> {
    let score = scorer
        .score(&view.tensor)
        .map_err(|e| PipelineError::ScorerInvocation {
            view: view.transform,
            source: e.into(),
        })?;
    if !(0.0..=1.0).contains(&score) {
        return Err(PipelineError::ScorerInvocation {
            view: view.transform,
            source: format!("{} returned {} outside [0, 1]", scorer.name(), score).into(),
        });
    }
    log::debug!("{} on {}: {:.4}", scorer.name(), view.transform, score);
    Ok(score)
}

/// Scores test-time views and averages them, sequentially or on a rayon pool.
///
/// Any failing view fails the whole call; partial averages are never produced.
pub struct ScoreAggregator {
    parallel: bool,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl ScoreAggregator {
    pub fn new(config: &TtaConfig) -> Result<Self> {
        config.validate()?;
        let pool = match (config.parallel, config.threads) {
            (true, Some(threads)) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| {
                        PipelineError::Resource(format!("failed to build thread pool: {e}"))
                    })?;
                Some(Arc::new(pool))
            }
            _ => None,
        };
        Ok(Self {
            parallel: config.parallel,
            pool,
        })
    }

    pub fn sequential() -> Self {
        Self {
            parallel: false,
            pool: None,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Run `op` inside this aggregator's pool when it has one
    pub(crate) fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// One score per view, in view order
    pub fn score_vector(&self, views: &[AugmentedView], scorer: &dyn Scorer) -> Result<Vec<f32>> {
        if self.parallel {
            self.install(|| views.par_iter().map(|v| invoke(scorer, v)).collect())
        } else {
            views.iter().map(|v| invoke(scorer, v)).collect()
        }
    }

    pub fn score(&self, views: &[AugmentedView], scorer: &dyn Scorer) -> Result<f32> {
        let scores = self.score_vector(views, scorer)?;
        aggregate(&scores)
    }
}
