//! Harness configuration resolved from the environment.

use std::str::FromStr;

use tc_frontend::{Target, default_target, target_from_lookup};

use crate::error::{OpTestError, Result};

pub const DEFAULT_ATOL: f32 = 1e-5;
pub const DEFAULT_RTOL: f32 = 1e-5;

#[derive(Clone, Debug, PartialEq)]
pub struct OpTestConfig {
    /// Fixed seed; `None` draws a fresh one per check.
    pub seed: Option<u64>,
    pub atol: f32,
    pub rtol: f32,
    pub target: Target,
}

impl Default for OpTestConfig {
    fn default() -> Self {
        Self {
            seed: None,
            atol: DEFAULT_ATOL,
            rtol: DEFAULT_RTOL,
            target: default_target(),
        }
    }
}

impl OpTestConfig {
    /// Defaults overridden by `TC_TEST_SEED`, `TC_TEST_ATOL`, `TC_TEST_RTOL`
    /// and `TC_TARGET`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`OpTestConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Self {
            seed: parse_var(&lookup, "TC_TEST_SEED")?,
            atol: parse_var(&lookup, "TC_TEST_ATOL")?.unwrap_or(DEFAULT_ATOL),
            rtol: parse_var(&lookup, "TC_TEST_RTOL")?.unwrap_or(DEFAULT_RTOL),
            target: target_from_lookup(&lookup),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_tolerance(mut self, atol: f32, rtol: f32) -> Self {
        self.atol = atol;
        self.rtol = rtol;
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// The configured seed, or a fresh random one.
    pub fn resolve_seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }

    fn validate(&self) -> Result<()> {
        for (name, v) in [("atol", self.atol), ("rtol", self.rtol)] {
            if !(v >= 0.0 && v.is_finite()) {
                return Err(OpTestError::Config(format!(
                    "{name} must be finite and non-negative, got {v}"
                )));
            }
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| OpTestError::Config(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}
