use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use thiserror::Error;

use tracing::{debug, warn};

use crate::protocol::{Classification, InferenceRequest, PredictionResult, RequestKind, ValueKind};

#[derive(Error, Debug, PartialEq)]
pub enum PredictorFault {
    #[error("degenerate distribution over {classes} classes (sum {sum})")]
    DegenerateDistribution { classes: usize, sum: f64 },
}

/// Generates placeholder predictions.
///
/// The generator is seeded once and keeps advancing across requests, so
/// values are reproducible only for the same sequence of calls.
pub struct Predictor<R = StdRng> {
    rng: R,
}

impl Predictor<StdRng> {
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Predictor<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Never fails: a fault becomes an error result.
    pub fn predict(&mut self, request: &InferenceRequest) -> PredictionResult {
        match self.try_predict(request) {
            Ok(result) => result,
            Err(fault) => {
                warn!("predictor fault: {fault}");
                PredictionResult::error(fault)
            }
        }
    }

    fn try_predict(
        &mut self,
        request: &InferenceRequest,
    ) -> Result<PredictionResult, PredictorFault> {
        match (request.kind, request.value_kind) {
            (RequestKind::Train, _) => Ok(PredictionResult::Trained),

            (RequestKind::Classify, ValueKind::Numeric) => Ok(PredictionResult::Classification(
                Classification::Value(self.rng.gen()),
            )),

            (RequestKind::Classify, ValueKind::Nominal) => Ok(PredictionResult::Classification(
                Classification::Index(self.rng.gen_range(0..=request.class_cardinality())),
            )),

            (RequestKind::Distribution, ValueKind::Numeric) => {
                Ok(PredictionResult::Distribution(vec![self.rng.gen()]))
            }

            (RequestKind::Distribution, ValueKind::Nominal) => self
                .distribution(request.class_cardinality())
                .map(PredictionResult::Distribution),
        }
    }

    fn distribution(&mut self, classes: usize) -> Result<Vec<f64>, PredictorFault> {
        let mut values = (0..classes).map(|_| self.rng.gen()).collect::<Vec<f64>>();
        normalize(&mut values)?;
        debug!("distribution over {classes} classes: {values:?}");
        Ok(values)
    }
}

fn normalize(values: &mut [f64]) -> Result<(), PredictorFault> {
    let sum = values.iter().sum::<f64>();
    if sum <= 0.0 || !sum.is_finite() {
        return Err(PredictorFault::DegenerateDistribution {
            classes: values.len(),
            sum,
        });
    }

    for v in values.iter_mut() {
        *v /= sum;
    }

    Ok(())
}
