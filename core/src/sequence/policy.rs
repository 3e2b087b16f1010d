//! Sequence length re-seeding policy

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// How a sequence picks its target length when it starts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SequenceLengthPolicy {
    /// Every sequence is exactly the base length
    Fixed,

    /// Uniformly drawn from `base ± base * variation_percent / 100`, at least 1
    Varied {
        /// Spread around the base length, in percent
        variation_percent: f64,
    },
}

impl Default for SequenceLengthPolicy {
    fn default() -> Self {
        SequenceLengthPolicy::Varied {
            variation_percent: 20.0,
        }
    }
}

impl SequenceLengthPolicy {
    /// Validate the policy parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            SequenceLengthPolicy::Fixed => Ok(()),
            SequenceLengthPolicy::Varied { variation_percent } => {
                if !variation_percent.is_finite() || *variation_percent < 0.0 {
                    return Err(ConfigError::InvalidSequence(format!(
                        "sequence length variation must be a non-negative percentage, got {}",
                        variation_percent
                    )));
                }
                Ok(())
            }
        }
    }

    /// Draw a target length around `base`; never returns 0
    pub fn sample<R: Rng + ?Sized>(&self, base: usize, rng: &mut R) -> usize {
        match *self {
            SequenceLengthPolicy::Fixed => base.max(1),
            SequenceLengthPolicy::Varied { variation_percent } => {
                let spread = base as f64 * variation_percent / 100.0;
                if spread <= 0.0 || !spread.is_finite() {
                    return base.max(1);
                }
                let offset = rng.gen_range(-spread..=spread);
                let length = (base as f64 + offset).round();
                if length < 1.0 {
                    1
                } else {
                    length as usize
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_fixed_policy() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(SequenceLengthPolicy::Fixed.sample(3, &mut rng), 3);
        assert_eq!(SequenceLengthPolicy::Fixed.sample(0, &mut rng), 1);
    }

    #[test]
    fn test_varied_policy_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let policy = SequenceLengthPolicy::Varied {
            variation_percent: 20.0,
        };
        for _ in 0..1_000 {
            let len = policy.sample(100, &mut rng);
            assert!((80..=120).contains(&len), "length {} out of bounds", len);
        }
    }

    #[test]
    fn test_policy_validation() {
        assert!(SequenceLengthPolicy::Fixed.validate().is_ok());
        assert!(SequenceLengthPolicy::default().validate().is_ok());
        assert!(SequenceLengthPolicy::Varied {
            variation_percent: -1.0
        }
        .validate()
        .is_err());
        assert!(SequenceLengthPolicy::Varied {
            variation_percent: f64::NAN
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_policy_serialization() {
        let json = serde_json::to_string(&SequenceLengthPolicy::default()).unwrap();
        assert_eq!(json, r#"{"kind":"varied","variation_percent":20.0}"#);
        let fixed: SequenceLengthPolicy = serde_json::from_str(r#"{"kind":"fixed"}"#).unwrap();
        assert_eq!(fixed, SequenceLengthPolicy::Fixed);
    }

    proptest! {
        #[test]
        fn prop_sampled_length_is_positive(
            base in 0usize..10_000,
            variation in 0.0f64..500.0,
            seed in any::<u64>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let policy = SequenceLengthPolicy::Varied { variation_percent: variation };
            prop_assert!(policy.sample(base, &mut rng) >= 1);
            prop_assert!(SequenceLengthPolicy::Fixed.sample(base, &mut rng) >= 1);
        }
    }
}
