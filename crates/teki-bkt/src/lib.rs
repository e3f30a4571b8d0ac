//! Bayesian Knowledge Tracing for TechGuro lessons.
//!
//! One skill per lesson. A learner's hidden mastery of a skill is tracked as
//! `p_known`; every graded response moves it through a two-step update:
//! a Bayes posterior given the observed correctness, then the learning
//! transition. Parameters are fixed per deployment and are not re-estimated
//! online.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mastery cutoff used across the product (lessons at or above are "mastered").
pub const MASTERY_THRESHOLD: f64 = 0.8;

/// Raw-score cutoff for the hybrid completion rule on post-assessments.
pub const SCORE_ELIGIBLE_THRESHOLD: f64 = 0.75;

#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    #[error("{name} must be within [0,1], got {value}")]
    OutOfRange { name: &'static str, value: f64 },
}

/// Fixed BKT parameters.
///
/// Defaults match the production tutoring service: conservative prior,
/// moderate learn rate, low slip, one-in-five guess.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BktParams {
    /// P(L0): prior probability the skill is already known.
    pub p_init: f64,
    /// P(T): probability of learning after one opportunity.
    pub p_transit: f64,
    /// P(S): probability of answering incorrectly despite knowing.
    pub p_slip: f64,
    /// P(G): probability of answering correctly despite not knowing.
    pub p_guess: f64,
}

impl Default for BktParams {
    fn default() -> Self {
        Self {
            p_init: 0.2,
            p_transit: 0.15,
            p_slip: 0.1,
            p_guess: 0.2,
        }
    }
}

impl BktParams {
    pub fn new(p_init: f64, p_transit: f64, p_slip: f64, p_guess: f64) -> Result<Self, ParamError> {
        let params = Self {
            p_init,
            p_transit,
            p_slip,
            p_guess,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        for (name, value) in [
            ("p_init", self.p_init),
            ("p_transit", self.p_transit),
            ("p_slip", self.p_slip),
            ("p_guess", self.p_guess),
        ] {
            if !(0.0..=1.0).contains(&value) || value.is_nan() {
                return Err(ParamError::OutOfRange { name, value });
            }
        }
        Ok(())
    }

    /// `p_slip + p_guess >= 1` makes the evidence update degenerate (a correct
    /// answer lowers mastery). Still handled by clamping, but worth a warning
    /// at configuration time.
    pub fn is_degenerate(&self) -> bool {
        self.p_slip + self.p_guess >= 1.0
    }
}

pub fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// One BKT update step.
///
/// Step 1 conditions `p_known` on the observed correctness; step 2 applies the
/// learning transition. A near-zero denominator (both hypotheses assign the
/// observation ~zero probability) keeps the prior unchanged instead of
/// dividing by zero.
pub fn update(p_known: f64, is_correct: bool, params: &BktParams) -> f64 {
    let p = clamp01(p_known);
    let s = params.p_slip;
    let g = params.p_guess;

    let (num, den) = if is_correct {
        let num = p * (1.0 - s);
        (num, num + (1.0 - p) * g)
    } else {
        let num = p * s;
        (num, num + (1.0 - p) * (1.0 - g))
    };

    let posterior = if den <= f64::EPSILON { p } else { num / den };
    clamp01(posterior + (1.0 - posterior) * params.p_transit)
}

/// Fold a correctness series starting from `p_init`, in submission order.
pub fn run_series(params: &BktParams, series: &[bool]) -> f64 {
    series
        .iter()
        .fold(params.p_init, |p, &correct| update(p, correct, params))
}

/// UI-facing mastery buckets. Thresholds are load-bearing for the frontend's
/// status badges; do not tweak without coordinating with the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteryTier {
    Mastered,
    Proficient,
    Developing,
    Beginner,
}

impl MasteryTier {
    pub fn from_mastery(mastery: f64) -> Self {
        if mastery >= 0.8 {
            Self::Mastered
        } else if mastery >= 0.6 {
            Self::Proficient
        } else if mastery >= 0.4 {
            Self::Developing
        } else {
            Self::Beginner
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Mastered => "mastered",
            Self::Proficient => "proficient",
            Self::Developing => "developing",
            Self::Beginner => "beginner",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::Mastered => "green",
            Self::Proficient => "blue",
            Self::Developing => "yellow",
            Self::Beginner => "red",
        }
    }
}

/// Study priority for a lesson relative to the recommendation threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
    Low,
    Done,
}

impl Priority {
    pub fn for_mastery(mastery: f64, threshold: f64) -> Self {
        if mastery < 0.3 {
            Self::High
        } else if mastery < 0.5 {
            Self::Medium
        } else if mastery < threshold {
            Self::Low
        } else {
            Self::Done
        }
    }
}

/// Reason text shown next to a recommended lesson.
pub fn recommendation_reason(mastery: f64, threshold: f64) -> &'static str {
    if mastery < 0.3 {
        "Critical: fundamental concepts need reinforcement"
    } else if mastery < 0.5 {
        "Developing: practice needed to build confidence"
    } else if mastery < threshold {
        "Almost there: review to achieve mastery"
    } else {
        "Mastered: ready for advanced topics"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn correct_observation_raises_mastery() {
        let params = BktParams::default();
        let after = update(params.p_init, true, &params);
        assert!(after > params.p_init);
    }

    #[test]
    fn scenario_single_correct_update() {
        // {p_known=0.1, p_transit=0.2, p_slip=0.1, p_guess=0.25}, one correct:
        // posterior = 0.09 / (0.09 + 0.9 * 0.25) = 0.285714..., then the
        // transition lands at 0.428571...
        let params = BktParams::new(0.1, 0.2, 0.1, 0.25).unwrap();
        let posterior: f64 = {
            let num = 0.1 * 0.9;
            num / (num + 0.9 * 0.25)
        };
        assert!((posterior - 0.285714).abs() < 1e-6);

        let after = update(0.1, true, &params);
        assert!((after - 0.428571).abs() < 1e-6);
    }

    #[test]
    fn denominator_guard_keeps_prior() {
        // p_known=1 and an incorrect answer with p_slip=0: both hypotheses
        // assign the observation zero probability.
        let params = BktParams::new(0.2, 0.0, 0.0, 1.0).unwrap();
        let after = update(1.0, false, &params);
        assert!((after - 1.0).abs() < 1e-12);
    }

    #[test]
    fn series_matches_stepwise_updates() {
        let params = BktParams::default();
        let series = [true, false, true, true];
        let mut p = params.p_init;
        for &c in &series {
            p = update(p, c, &params);
        }
        assert_eq!(run_series(&params, &series), p);
    }

    #[test]
    fn all_correct_series_is_monotone() {
        let params = BktParams::default();
        let mut p = params.p_init;
        for _ in 0..20 {
            let next = update(p, true, &params);
            assert!(next >= p);
            p = next;
        }
        assert!(p > 0.99);
    }

    #[test]
    fn validation_rejects_out_of_range() {
        assert!(BktParams::new(0.2, 1.5, 0.1, 0.2).is_err());
        assert!(BktParams::new(-0.1, 0.15, 0.1, 0.2).is_err());
        assert!(BktParams::new(0.2, f64::NAN, 0.1, 0.2).is_err());
    }

    #[test]
    fn degenerate_slip_guess_is_flagged_but_usable() {
        let params = BktParams::new(0.2, 0.1, 0.6, 0.6).unwrap();
        assert!(params.is_degenerate());
        let after = update(0.5, true, &params);
        assert!((0.0..=1.0).contains(&after));
    }

    #[test]
    fn tier_thresholds() {
        assert_eq!(MasteryTier::from_mastery(0.8), MasteryTier::Mastered);
        assert_eq!(MasteryTier::from_mastery(0.79), MasteryTier::Proficient);
        assert_eq!(MasteryTier::from_mastery(0.6), MasteryTier::Proficient);
        assert_eq!(MasteryTier::from_mastery(0.59), MasteryTier::Developing);
        assert_eq!(MasteryTier::from_mastery(0.4), MasteryTier::Developing);
        assert_eq!(MasteryTier::from_mastery(0.39), MasteryTier::Beginner);
        assert_eq!(MasteryTier::from_mastery(0.8).color(), "green");
        assert_eq!(MasteryTier::from_mastery(0.1).color(), "red");
    }

    #[test]
    fn priority_buckets() {
        assert_eq!(Priority::for_mastery(0.2, 0.8), Priority::High);
        assert_eq!(Priority::for_mastery(0.4, 0.8), Priority::Medium);
        assert_eq!(Priority::for_mastery(0.7, 0.8), Priority::Low);
        assert_eq!(Priority::for_mastery(0.9, 0.8), Priority::Done);
    }

    proptest! {
        #[test]
        fn update_stays_in_unit_interval(
            p_known in 0.0f64..=1.0,
            p_transit in 0.0f64..=1.0,
            p_slip in 0.0f64..=1.0,
            p_guess in 0.0f64..=1.0,
            is_correct in proptest::bool::ANY,
        ) {
            let params = BktParams::new(0.2, p_transit, p_slip, p_guess).unwrap();
            let after = update(p_known, is_correct, &params);
            prop_assert!((0.0..=1.0).contains(&after));
        }

        #[test]
        // Monotone only while the evidence model is non-degenerate
        // (1 - p_slip > p_guess).
        fn all_correct_never_decreases(
            p_transit in 0.001f64..=1.0,
            p_slip in 0.0f64..0.5,
            p_guess in 0.0f64..0.5,
            len in 1usize..30,
        ) {
            let params = BktParams::new(0.2, p_transit, p_slip, p_guess).unwrap();
            let mut p = params.p_init;
            for _ in 0..len {
                let next = update(p, true, &params);
                prop_assert!(next >= p - 1e-12);
                p = next;
            }
        }
    }
}
