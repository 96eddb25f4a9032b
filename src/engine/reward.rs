use rand::Rng;
use serde::{Deserialize, Serialize};

/// Payout policy for eligible watchers: a small chance of the lucky
/// amount, otherwise the baseline. Stateless, so tests can drive it
/// with a seeded rng.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardPolicy {
    pub lucky_odds: f64,
    pub lucky_amount: i64,
    pub base_amount: i64,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            lucky_odds: 0.02,
            lucky_amount: 3,
            base_amount: 1,
        }
    }
}

impl RewardPolicy {
    pub fn draw(&self, rng: &mut impl Rng) -> i64 {
        if rng.gen_bool(self.lucky_odds.clamp(0.0, 1.0)) {
            self.lucky_amount
        } else {
            self.base_amount
        }
    }
}
