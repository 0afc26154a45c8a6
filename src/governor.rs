//! Rate governor: decides when a worker has to change network identity.
//!
//! Two independent triggers. The request-cost counter grows by each fetch's
//! cost and trips at the ceiling. The consecutive rate-limit streak resets
//! on any other outcome and trips after a few throttled fetches in a row,
//! long before sustained throttling would exhaust the cost budget.

use crate::fetch::Outcome;

/// Process-local counters. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateState {
    pub cost: u32,
    pub consecutive_rate_limits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorConfig {
    pub max_cost: u32,
    pub max_consecutive_rate_limits: u32,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_cost: 120,
            max_consecutive_rate_limits: 3,
        }
    }
}

/// Why the governor tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    CostCeiling { cost: u32 },
    SustainedThrottling { streak: u32 },
}

impl std::fmt::Display for RestartReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartReason::CostCeiling { cost } => write!(f, "request cost {cost} reached ceiling"),
            RestartReason::SustainedThrottling { streak } => {
                write!(f, "{streak} consecutive rate-limited fetches")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RateGovernor {
    config: GovernorConfig,
    state: RateState,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            state: RateState::default(),
        }
    }

    pub fn state(&self) -> &RateState {
        &self.state
    }

    pub fn record_cost(&mut self, cost: u32) {
        self.state.cost = self.state.cost.saturating_add(cost);
    }

    pub fn record_outcome(&mut self, outcome: Outcome) {
        if outcome == Outcome::RateLimited {
            self.state.consecutive_rate_limits += 1;
        } else {
            self.state.consecutive_rate_limits = 0;
        }
    }

    /// Gate check before each claim and fetch. The throttling streak is checked first.
    pub fn should_restart(&self) -> Option<RestartReason> {
        if self.state.consecutive_rate_limits >= self.config.max_consecutive_rate_limits {
            return Some(RestartReason::SustainedThrottling {
                streak: self.state.consecutive_rate_limits,
            });
        }
        if self.state.cost >= self.config.max_cost {
            return Some(RestartReason::CostCeiling {
                cost: self.state.cost,
            });
        }
        None
    }

    /// Fresh counters after a successful identity rotation.
    pub fn reset(&mut self) {
        self.state = RateState::default();
    }
}
