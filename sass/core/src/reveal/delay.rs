//! Typing delay model
//!
//! Computes the wait before the next character is revealed from the last
//! revealed character and a persona's [`DelayProfile`]:
//!
//! ```text
//! delay  = base * U(jitter)
//! delay += U(sentence_end)   if last char is '.', '!' or '?'
//!        | U(comma)          if last char is ','
//! delay += U(digression)     with probability p (personas that digress)
//! ```
//!
//! Every `U(..)` is an inclusive uniform draw. The result is rounded to whole
//! milliseconds, so it always lies inside [`DelayProfile::bounds`].

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Characters that end a sentence and earn the long pause
pub const SENTENCE_END: [char; 3] = ['.', '!', '?'];

/// Inclusive millisecond range for a randomized pause
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PauseRange {
    /// Shortest pause (ms)
    pub min_ms: f64,
    /// Longest pause (ms)
    pub max_ms: f64,
}

impl PauseRange {
    /// Create a pause range
    #[must_use]
    pub const fn new(min_ms: f64, max_ms: f64) -> Self {
        Self { min_ms, max_ms }
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        rng.gen_range(self.min_ms..=self.max_ms)
    }

    fn validate(&self, what: &str) -> Result<(), String> {
        if !self.min_ms.is_finite() || !self.max_ms.is_finite() {
            return Err(format!("{what}: bounds must be finite"));
        }
        if self.min_ms < 0.0 {
            return Err(format!("{what}: min_ms must not be negative"));
        }
        if self.min_ms > self.max_ms {
            return Err(format!(
                "{what}: min_ms ({}) exceeds max_ms ({})",
                self.min_ms, self.max_ms
            ));
        }
        Ok(())
    }
}

/// Multiplicative jitter applied to the base delay
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct JitterRange {
    /// Smallest factor
    pub min: f64,
    /// Largest factor
    pub max: f64,
}

impl JitterRange {
    /// Create a jitter range
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Occasional "lost my train of thought" pause
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Digression {
    /// Chance per character, in `[0, 1]`
    pub probability: f64,
    /// Extra pause when it triggers
    pub pause: PauseRange,
}

/// Per-persona typing cadence
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelayProfile {
    /// Base delay per character (ms)
    pub base_delay_ms: f64,
    /// Multiplier range for the base delay
    pub jitter: JitterRange,
    /// Extra pause after `.`, `!` or `?`
    pub sentence_end: PauseRange,
    /// Extra pause after `,`
    pub comma: PauseRange,
    /// Random digression, if the persona has one
    #[serde(default)]
    pub digression: Option<Digression>,
}

impl DelayProfile {
    /// Draw the delay that precedes the next character.
    ///
    /// `last` is the most recently revealed character (`None` before the
    /// first one).
    pub fn next_delay<R: Rng + ?Sized>(&self, last: Option<char>, rng: &mut R) -> Duration {
        let mut delay = self.base_delay_ms * rng.gen_range(self.jitter.min..=self.jitter.max);

        match last {
            Some(c) if SENTENCE_END.contains(&c) => delay += self.sentence_end.sample(rng),
            Some(',') => delay += self.comma.sample(rng),
            _ => {}
        }

        if let Some(digression) = &self.digression {
            if rng.gen_bool(digression.probability) {
                delay += digression.pause.sample(rng);
            }
        }

        Duration::from_millis(round_ms(delay))
    }

    /// Smallest and largest delay [`next_delay`](Self::next_delay) can return
    #[must_use]
    pub fn bounds(&self) -> (Duration, Duration) {
        let min = self.base_delay_ms * self.jitter.min;
        let max_pause = self.sentence_end.max_ms.max(self.comma.max_ms);
        let max_digression = self.digression.map_or(0.0, |d| d.pause.max_ms);
        let max = self.base_delay_ms * self.jitter.max + max_pause + max_digression;
        (
            Duration::from_millis(round_ms(min)),
            Duration::from_millis(round_ms(max)),
        )
    }

    /// Check every range is well formed
    pub fn validate(&self) -> Result<(), String> {
        if !self.base_delay_ms.is_finite() || self.base_delay_ms < 0.0 {
            return Err("base_delay_ms must be a non-negative number".to_string());
        }
        if !(self.jitter.min > 0.0 && self.jitter.min <= self.jitter.max && self.jitter.max.is_finite()) {
            return Err(format!(
                "jitter: expected 0 < min <= max, got {}..{}",
                self.jitter.min, self.jitter.max
            ));
        }
        self.sentence_end.validate("sentence_end")?;
        self.comma.validate("comma")?;
        if let Some(d) = &self.digression {
            if !(0.0..=1.0).contains(&d.probability) {
                return Err(format!(
                    "digression: probability {} is outside [0, 1]",
                    d.probability
                ));
            }
            d.pause.validate("digression")?;
        }
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_ms(ms: f64) -> u64 {
    ms.max(0.0).round() as u64
}
