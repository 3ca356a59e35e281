//! Personas
//!
//! The closed set of characters the chat can answer as. Each persona carries
//! two immutable records: a typing [`DelayProfile`] consumed by the reveal
//! engine, and [`GenerationParams`] used when shaping the provider request.
//!
//! The tables are data. Defaults ship here; `[personas.*]` sections of the
//! config file override them without code changes.

mod prompts;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reveal::{DelayProfile, Digression, JitterRange, PauseRange};

pub use prompts::{interruption_instruction, mark_interrupted, system_prompt, INTERRUPTED_PREFIX};

/// Default provider model for every persona
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// A chat persona
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    /// Moody, lowercase, reluctantly helpful
    #[default]
    Teenager,
    /// Slow, blunt, forgetful
    Grandma,
    /// Pompous academic
    Intellectual,
    /// Corporate jargon machine
    Exec,
}

impl Persona {
    /// Every persona, in display order
    pub const ALL: [Persona; 4] = [
        Persona::Teenager,
        Persona::Grandma,
        Persona::Intellectual,
        Persona::Exec,
    ];

    /// URL and config key
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::Teenager => "teenager",
            Self::Grandma => "grandma",
            Self::Intellectual => "intellectual",
            Self::Exec => "exec",
        }
    }

    /// Name shown to the user
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Teenager => "The Teenager",
            Self::Grandma => "The Grandma",
            Self::Intellectual => "The Intellectual",
            Self::Exec => "The Exec",
        }
    }

    /// One-line description for pickers
    #[must_use]
    pub fn tagline(self) -> &'static str {
        match self {
            Self::Teenager => "whatever. ask me something i guess",
            Self::Grandma => "Speak up, dear, and sit up straight",
            Self::Intellectual => "Permit me to contextualize your question",
            Self::Exec => "Let's align on deliverables going forward",
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Slug did not name a persona
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown persona: {0}")]
pub struct UnknownPersona(pub String);

impl FromStr for Persona {
    type Err = UnknownPersona;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.slug().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownPersona(s.to_string()))
    }
}

/// Sampling parameters sent with every completion request
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature
    pub temperature: f32,
    /// Nucleus sampling mass
    pub top_p: f32,
    /// Maximum output tokens
    pub max_tokens: u32,
}

impl GenerationParams {
    /// Check the values are in the ranges the provider accepts
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!("temperature {} is outside [0, 2]", self.temperature));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(format!("top_p {} is outside (0, 1]", self.top_p));
        }
        if self.max_tokens == 0 {
            return Err("max_tokens must be positive".to_string());
        }
        Ok(())
    }
}

/// Everything tunable about one persona
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonaProfile {
    /// Reveal cadence
    pub typing: DelayProfile,
    /// Provider sampling
    pub generation: GenerationParams,
}

/// One profile per persona
///
/// Struct fields rather than a map, so a missing persona is a compile error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonaTable {
    /// The teenager
    pub teenager: PersonaProfile,
    /// The grandma
    pub grandma: PersonaProfile,
    /// The intellectual
    pub intellectual: PersonaProfile,
    /// The exec
    pub exec: PersonaProfile,
}

impl PersonaTable {
    /// Profile for a persona
    #[must_use]
    pub fn get(&self, persona: Persona) -> &PersonaProfile {
        match persona {
            Persona::Teenager => &self.teenager,
            Persona::Grandma => &self.grandma,
            Persona::Intellectual => &self.intellectual,
            Persona::Exec => &self.exec,
        }
    }

    /// Mutable profile for a persona
    pub fn get_mut(&mut self, persona: Persona) -> &mut PersonaProfile {
        match persona {
            Persona::Teenager => &mut self.teenager,
            Persona::Grandma => &mut self.grandma,
            Persona::Intellectual => &mut self.intellectual,
            Persona::Exec => &mut self.exec,
        }
    }

    /// Typing profile for a persona
    #[must_use]
    pub fn typing(&self, persona: Persona) -> &DelayProfile {
        &self.get(persona).typing
    }

    /// Iterate personas with their profiles
    pub fn iter(&self) -> impl Iterator<Item = (Persona, &PersonaProfile)> {
        Persona::ALL.into_iter().map(move |p| (p, self.get(p)))
    }

    /// Validate every profile, naming the first offender
    pub fn validate(&self) -> Result<(), String> {
        for (persona, profile) in self.iter() {
            profile
                .typing
                .validate()
                .map_err(|e| format!("personas.{persona}.typing: {e}"))?;
            profile
                .generation
                .validate()
                .map_err(|e| format!("personas.{persona}.generation: {e}"))?;
        }
        Ok(())
    }
}

impl Default for PersonaTable {
    fn default() -> Self {
        Self {
            teenager: PersonaProfile {
                typing: DelayProfile {
                    base_delay_ms: 40.0,
                    jitter: JitterRange::new(0.7, 1.3),
                    sentence_end: PauseRange::new(100.0, 200.0),
                    comma: PauseRange::new(50.0, 100.0),
                    digression: None,
                },
                generation: GenerationParams {
                    temperature: 1.0,
                    top_p: 0.92,
                    max_tokens: 800,
                },
            },
            grandma: PersonaProfile {
                typing: DelayProfile {
                    base_delay_ms: 80.0,
                    jitter: JitterRange::new(0.7, 1.3),
                    sentence_end: PauseRange::new(200.0, 500.0),
                    comma: PauseRange::new(100.0, 200.0),
                    digression: Some(Digression {
                        probability: 0.05,
                        pause: PauseRange::new(300.0, 700.0),
                    }),
                },
                generation: GenerationParams {
                    temperature: 0.95,
                    top_p: 0.92,
                    max_tokens: 4096,
                },
            },
            intellectual: PersonaProfile {
                typing: DelayProfile {
                    base_delay_ms: 25.0,
                    jitter: JitterRange::new(0.95, 1.05),
                    sentence_end: PauseRange::new(300.0, 600.0),
                    comma: PauseRange::new(150.0, 250.0),
                    digression: None,
                },
                generation: GenerationParams {
                    temperature: 0.7,
                    top_p: 0.9,
                    max_tokens: 600,
                },
            },
            exec: PersonaProfile {
                typing: DelayProfile {
                    base_delay_ms: 20.0,
                    jitter: JitterRange::new(0.95, 1.05),
                    sentence_end: PauseRange::new(50.0, 100.0),
                    comma: PauseRange::new(20.0, 50.0),
                    digression: None,
                },
                generation: GenerationParams {
                    temperature: 0.9,
                    top_p: 0.92,
                    max_tokens: 4096,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_round_trip() {
        for persona in Persona::ALL {
            assert_eq!(persona.slug().parse::<Persona>(), Ok(persona));
        }
        assert_eq!("  Grandma ".parse::<Persona>(), Ok(Persona::Grandma));
    }

    #[test]
    fn test_unknown_slug_is_error() {
        assert_eq!(
            "pirate".parse::<Persona>(),
            Err(UnknownPersona("pirate".to_string()))
        );
    }

    #[test]
    fn test_default_tables_are_distinct() {
        let table = PersonaTable::default();
        for (i, (_, a)) in table.iter().enumerate() {
            for (_, b) in table.iter().skip(i + 1) {
                assert_ne!(a.typing, b.typing);
            }
        }
    }

    #[test]
    fn test_default_tables_validate() {
        assert!(PersonaTable::default().validate().is_ok());
    }

    #[test]
    fn test_relative_cadence() {
        let table = PersonaTable::default();
        let exec = table.typing(Persona::Exec);
        let grandma = table.typing(Persona::Grandma);
        let intellectual = table.typing(Persona::Intellectual);
        assert!(grandma.base_delay_ms > exec.base_delay_ms);
        assert!(intellectual.sentence_end.min_ms > exec.sentence_end.max_ms);
        assert!(grandma.digression.is_some());
        assert!(exec.digression.is_none());
    }

    #[test]
    fn test_validate_names_offender() {
        let mut table = PersonaTable::default();
        table.get_mut(Persona::Exec).generation.top_p = 0.0;
        let err = table.validate().unwrap_err();
        assert!(err.starts_with("personas.exec.generation"), "{err}");
    }
}
