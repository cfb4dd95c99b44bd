use serde::{Deserialize, Serialize};

/// Club policy constants applied by the eligibility evaluators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Fixed monthly fee, in soles.
    pub monthly_fee: f64,
    /// Distinct trainings a member must attend per civil week.
    pub required_weekly_sessions: u32,
    /// Fixed amount of a training-absence fine.
    pub fine_amount: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            monthly_fee: 100.0,
            required_weekly_sessions: 1,
            fine_amount: 100.0,
        }
    }
}
