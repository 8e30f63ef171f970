//! Rule validators and the engine that runs them over one feed snapshot.
//!
//! Every validator is a pure function of a [`ValidationContext`]. It reports
//! grouped [`Occurrence`]s per rule and never reports a rule that did not fire.

pub mod engine;

mod cross_feed;
mod frequency;
mod header;
mod location_type;
mod stop;
mod stop_time_update;
mod timestamp;
mod trip_descriptor;
mod vehicle;

pub use cross_feed::CrossFeedDescriptorValidator;
pub use engine::{RuleEngine, ValidatorTiming};
pub use frequency::{FrequencyTypeOneValidator, FrequencyTypeZeroValidator};
pub use header::HeaderValidator;
pub use location_type::StopLocationTypeValidator;
pub use stop::StopValidator;
pub use stop_time_update::StopTimeUpdateValidator;
pub use timestamp::TimestampValidator;
pub use trip_descriptor::TripDescriptorValidator;
pub use vehicle::VehicleValidator;

use serde::Serialize;
use tracing::debug;

use crate::gtfs::StaticScheduleMetadata;
use crate::gtfs_rt::FeedMessage;
use crate::rules::ValidationRule;

/// Everything a validator may look at for one pass.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Wall-clock reference time in milliseconds since the epoch.
    pub now_millis: i64,
    pub metadata: &'a StaticScheduleMetadata,
    pub current: &'a FeedMessage,
    /// Last unique message of the same feed, if any.
    pub previous: Option<&'a FeedMessage>,
    /// Merged view of sibling feeds, or the current message when it already
    /// mixes entity kinds.
    pub combined: Option<&'a FeedMessage>,
}

/// One concrete firing of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    /// Locator for the offending element, e.g. `"trip_id 42 stop_sequence [1, 5, 3]"`.
    pub prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Occurrence {
    /// Locator followed by the rule's occurrence suffix.
    pub fn message(&self, rule: &ValidationRule) -> String {
        match (self.prefix.is_empty(), rule.occurrence_suffix.is_empty()) {
            (true, _) => rule.occurrence_suffix.to_string(),
            (_, true) => self.prefix.clone(),
            _ => format!("{} {}", self.prefix, rule.occurrence_suffix),
        }
    }
}

/// All occurrences of one rule in one pass. Never constructed empty by the
/// validators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleResult {
    pub rule: &'static ValidationRule,
    pub occurrences: Vec<Occurrence>,
}

impl RuleResult {
    pub fn rule_id(&self) -> &'static str {
        self.rule.id
    }
}

/// A validator evaluates a fixed set of rules over a [`ValidationContext`].
pub trait FeedValidator: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<RuleResult>;
}

/// Gathers occurrences for a validator's rules in declaration order and drops
/// the rules that never fired.
pub(crate) struct RuleCollector {
    slots: Vec<RuleResult>,
}

impl RuleCollector {
    pub(crate) fn new(rules: &[&'static ValidationRule]) -> Self {
        Self {
            slots: rules
                .iter()
                .map(|&rule| RuleResult {
                    rule,
                    occurrences: Vec::new(),
                })
                .collect(),
        }
    }

    pub(crate) fn add(&mut self, rule: &'static ValidationRule, prefix: impl Into<String>) {
        self.push(rule, prefix.into(), None);
    }

    pub(crate) fn add_with_value(
        &mut self,
        rule: &'static ValidationRule,
        prefix: impl Into<String>,
        value: impl ToString,
    ) {
        self.push(rule, prefix.into(), Some(value.to_string()));
    }

    pub(crate) fn count(&self, rule: &ValidationRule) -> usize {
        self.slots
            .iter()
            .find(|s| s.rule.id == rule.id)
            .map_or(0, |s| s.occurrences.len())
    }

    fn push(&mut self, rule: &'static ValidationRule, prefix: String, value: Option<String>) {
        debug!(rule = rule.id, occurrence = %prefix, "Rule occurrence");
        let occurrence = Occurrence { prefix, value };
        match self.slots.iter_mut().find(|s| s.rule.id == rule.id) {
            Some(slot) => slot.occurrences.push(occurrence),
            None => self.slots.push(RuleResult {
                rule,
                occurrences: vec![occurrence],
            }),
        }
    }

    pub(crate) fn finish(self) -> Vec<RuleResult> {
        self.slots
            .into_iter()
            .filter(|s| !s.occurrences.is_empty())
            .collect()
    }
}
