//! Claim eligibility policy

use serde::{Deserialize, Serialize};

use crate::countdown::Countdown;

/// Decide whether to act now: true when the remaining time is at or below
/// the threshold.
pub fn should_act_now(remaining: Countdown, threshold: Countdown) -> bool {
    remaining <= threshold
}

/// The outcome of applying the eligibility threshold to one countdown reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityDecision {
    pub remaining: Countdown,
    pub threshold: Countdown,
    pub act_now: bool,
}

impl EligibilityDecision {
    pub fn evaluate(remaining: Countdown, threshold: Countdown) -> Self {
        Self {
            remaining,
            threshold,
            act_now: should_act_now(remaining, threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_threshold_acts() {
        let t = Countdown::from_secs(900);
        assert!(should_act_now(t, t));
    }

    #[test]
    fn test_just_over_threshold_waits() {
        let t = Countdown::from_secs(900);
        assert!(!should_act_now(Countdown::from_secs(901), t));
    }

    #[test]
    fn test_zero_remaining_always_acts() {
        assert!(should_act_now(Countdown::ZERO, Countdown::ZERO));
        assert!(should_act_now(Countdown::ZERO, Countdown::from_secs(1200)));
    }

    #[test]
    fn test_decision_keeps_inputs() {
        let decision = EligibilityDecision::evaluate(Countdown::from_secs(600), Countdown::from_secs(900));
        assert!(decision.act_now);
        assert_eq!(decision.remaining.as_secs(), 600);
        assert_eq!(decision.threshold.as_secs(), 900);

        let decision =
            EligibilityDecision::evaluate(Countdown::from_secs(10_800), Countdown::from_secs(900));
        assert!(!decision.act_now);
    }
}
