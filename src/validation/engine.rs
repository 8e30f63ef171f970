use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{
    CrossFeedDescriptorValidator, FeedValidator, FrequencyTypeOneValidator,
    FrequencyTypeZeroValidator, HeaderValidator, RuleResult, StopTimeUpdateValidator,
    StopValidator, TimestampValidator, TripDescriptorValidator, ValidationContext,
    VehicleValidator,
};
use crate::error::{Result, ValidatorError};

/// Every realtime validator, in run order. Built once on first use and shared
/// by all pollers and batch runs.
static VALIDATORS: LazyLock<Vec<Box<dyn FeedValidator>>> = LazyLock::new(|| {
    vec![
        Box::new(CrossFeedDescriptorValidator),
        Box::new(VehicleValidator),
        Box::new(TimestampValidator),
        Box::new(StopTimeUpdateValidator),
        Box::new(TripDescriptorValidator),
        Box::new(StopValidator),
        Box::new(FrequencyTypeZeroValidator),
        Box::new(FrequencyTypeOneValidator),
        Box::new(HeaderValidator),
    ]
});

/// Wall time spent in one validator during a timed run.
#[derive(Debug, Clone)]
pub struct ValidatorTiming {
    pub name: &'static str,
    pub elapsed: Duration,
}

/// Runs the registered validators over a [`ValidationContext`].
#[derive(Clone, Copy)]
pub struct RuleEngine {
    validators: &'static [Box<dyn FeedValidator>],
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self {
            validators: VALIDATORS.as_slice(),
        }
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.validators.iter().map(|v| v.name()))
            .finish()
    }
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validator_names(&self) -> Vec<&'static str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    /// Concatenates every validator's results in registration order.
    ///
    /// The previous message must be a distinct snapshot from the current one;
    /// passing the same message twice is a caller bug.
    pub fn run_all(&self, ctx: &ValidationContext<'_>) -> Result<Vec<RuleResult>> {
        Ok(self.run_all_timed(ctx)?.0)
    }

    /// Like [`RuleEngine::run_all`], also reporting the time taken by each validator.
    pub fn run_all_timed(
        &self,
        ctx: &ValidationContext<'_>,
    ) -> Result<(Vec<RuleResult>, Vec<ValidatorTiming>)> {
        if ctx.previous.is_some_and(|p| std::ptr::eq(p, ctx.current)) {
            return Err(ValidatorError::Contract(
                "previous message is the current message".to_string(),
            ));
        }

        let mut results = Vec::new();
        let mut timings = Vec::with_capacity(self.validators.len());
        for validator in self.validators {
            let started = Instant::now();
            let found = validator.validate(ctx);
            let elapsed = started.elapsed();
            debug!(
                validator = validator.name(),
                rules = found.len(),
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "Validator finished"
            );
            results.extend(found);
            timings.push(ValidatorTiming {
                name: validator.name(),
                elapsed,
            });
        }

        Ok((results, timings))
    }
}
