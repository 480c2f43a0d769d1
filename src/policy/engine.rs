//! Per-cycle policy evaluation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::daypart::DayPart;
use super::expr::Facts;
use super::privacy::PrivacySwitch;
use super::rules::RuleSet;
use crate::domain::SharedContext;

/// What happened in one evaluation cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyOutcome {
    /// Rules whose actions were applied
    pub fired: Vec<String>,

    /// Rules that matched but were still cooling down
    pub suppressed: Vec<String>,

    /// Rules that failed to evaluate
    pub failed: Vec<String>,
}

pub struct PolicyEngine {
    rules: watch::Receiver<Arc<RuleSet>>,
    daypart: DayPart,
    default_cooldown: Duration,
    privacy: PrivacySwitch,
    last_trigger: HashMap<String, Instant>,
}

impl PolicyEngine {
    pub fn new(
        rules: watch::Receiver<Arc<RuleSet>>,
        daypart: DayPart,
        default_cooldown: Duration,
        privacy: PrivacySwitch,
    ) -> Self {
        let count = rules.borrow().len();
        tracing::info!("Policy engine initialized with {} rules", count);

        Self {
            rules,
            daypart,
            default_cooldown,
            privacy,
            last_trigger: HashMap::new(),
        }
    }

    /// Evaluate all rules against `ctx`, replacing its action set.
    ///
    /// `now` drives cooldowns and `hour` (local, 0-23) the day/night window.
    pub fn evaluate(&mut self, ctx: &mut SharedContext, now: Instant, hour: u32) -> PolicyOutcome {
        ctx.actions_to_take.clear();
        ctx.is_night_time = self.daypart.is_night(hour);
        ctx.privacy_mode_active = self.privacy.is_active();

        let mut outcome = PolicyOutcome::default();

        if ctx.is_silence() {
            return outcome;
        }

        // One rule set per cycle, even if a reload lands mid-evaluation
        let rules = Arc::clone(&self.rules.borrow());

        let facts = Facts {
            label: &ctx.current_label,
            confidence: ctx.current_confidence,
            metrics: &ctx.metrics,
            is_night: ctx.is_night_time,
            privacy_mode: ctx.privacy_mode_active,
            current_hour: hour,
        };

        tracing::debug!(
            "Evaluating {} rules: hour={} night={} label='{}' ({:.2})",
            rules.len(),
            hour,
            facts.is_night,
            facts.label,
            facts.confidence
        );

        let mut actions = Vec::new();

        for rule in rules.rules() {
            if facts.privacy_mode && !rule.ignore_privacy {
                continue;
            }

            match rule.condition.eval(&facts) {
                Ok(true) => {
                    let cooldown = rule.cooldown.unwrap_or(self.default_cooldown);
                    let cooling = self
                        .last_trigger
                        .get(&rule.name)
                        .is_some_and(|last| now.saturating_duration_since(*last) <= cooldown);

                    if cooling {
                        tracing::debug!("Policy '{}' matched but is cooling down", rule.name);
                        outcome.suppressed.push(rule.name.clone());
                        continue;
                    }

                    tracing::info!(policy = %rule.name, label = %facts.label, "Policy triggered");
                    actions.extend(rule.actions.iter().copied());
                    self.last_trigger.insert(rule.name.clone(), now);
                    outcome.fired.push(rule.name.clone());
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Policy '{}' evaluation failed: {}", rule.name, e);
                    outcome.failed.push(rule.name.clone());
                }
            }
        }

        ctx.actions_to_take.extend(actions);
        outcome
    }
}
