//! Reveal state machine
//!
//! A synchronous, clock-free state machine. It never sleeps and never spawns;
//! it hands out [`TickSchedule`]s and the driver (see
//! [`Typewriter`](super::Typewriter)) calls [`RevealEngine::tick`] once the
//! scheduled delay has elapsed.
//!
//! ```text
//!            attach(non-empty)              tick (more to show)
//!   ┌──────┐ ───────────────────▶ ┌───────────┐ ◀──────┐
//!   │ Idle │                      │ Revealing │ ───────┘
//!   └──────┘ ◀─────────────────── └───────────┘
//!      ▲      attach / detach           │ tick (caught up)
//!      │                                ▼
//!      │   attach / detach        ┌─────────┐  target grows past
//!      └───────────────────────── │ Settled │  prefix ──▶ Revealing
//!                                 └─────────┘
//! ```
//!
//! # Generation guard
//!
//! Every issued schedule, attach, detach and divergence reset bumps the
//! generation counter. A tick only acts if it carries the current generation,
//! so at most one scheduled tick is ever live and a timer that outlives its
//! target is a no-op, whether or not the driver managed to cancel it.

use std::fmt;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::messages::MessageId;
use crate::persona::{Persona, PersonaTable};

/// Monotonic counter captured by every scheduled tick
pub type Generation = u64;

/// Observer for transitions into (`true`) and out of (`false`) `Revealing`
pub type StatusListener = Box<dyn FnMut(bool) + Send>;

/// Engine phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RevealPhase {
    /// No target, or a target with nothing to show yet
    #[default]
    Idle,
    /// A tick is scheduled
    Revealing,
    /// Caught up with the target; no tick scheduled
    Settled,
}

/// Request to run [`RevealEngine::tick`] after `delay`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickSchedule {
    /// Generation the tick must present
    pub generation: Generation,
    /// How long to wait before ticking
    pub delay: Duration,
}

/// Result of a tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// One more character is visible and the next tick is scheduled
    Advanced {
        /// Revealed length in characters
        revealed_chars: usize,
        /// The follow-up tick
        next: TickSchedule,
    },
    /// The last character of the current target became visible; the engine
    /// settled in the same step and scheduled nothing
    CaughtUp {
        /// Revealed length in characters
        revealed_chars: usize,
    },
    /// Nothing left to reveal; scheduling stopped
    Settled,
    /// The tick belonged to an earlier generation and did nothing
    Stale,
}

/// Snapshot handed to renderers
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RevealView {
    /// Message being revealed
    pub message_id: Option<MessageId>,
    /// The visible prefix
    pub text: String,
    /// Engine phase when the snapshot was taken
    pub phase: RevealPhase,
}

impl RevealView {
    /// Whether the engine was revealing at snapshot time
    #[must_use]
    pub fn is_revealing(&self) -> bool {
        self.phase == RevealPhase::Revealing
    }
}

#[derive(Debug)]
struct Target {
    message_id: MessageId,
    persona: Persona,
    content: String,
    revealed_bytes: usize,
    revealed_chars: usize,
}

impl Target {
    fn revealed(&self) -> &str {
        &self.content[..self.revealed_bytes]
    }

    fn next_char(&self) -> Option<char> {
        self.content[self.revealed_bytes..].chars().next()
    }

    fn last_revealed(&self) -> Option<char> {
        self.revealed().chars().next_back()
    }

    fn caught_up(&self) -> bool {
        self.revealed_bytes >= self.content.len()
    }

    fn rewind(&mut self) {
        self.revealed_bytes = 0;
        self.revealed_chars = 0;
    }
}

/// Incremental text-reveal engine for one displayed assistant message
pub struct RevealEngine {
    table: PersonaTable,
    rng: StdRng,
    generation: Generation,
    phase: RevealPhase,
    target: Option<Target>,
    status_listener: Option<StatusListener>,
}

impl fmt::Debug for RevealEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevealEngine")
            .field("generation", &self.generation)
            .field("phase", &self.phase)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl RevealEngine {
    /// Create an engine with entropy-seeded jitter
    #[must_use]
    pub fn new(table: PersonaTable) -> Self {
        Self::with_rng(table, StdRng::from_entropy())
    }

    /// Create an engine with reproducible delays
    #[must_use]
    pub fn with_seed(table: PersonaTable, seed: u64) -> Self {
        Self::with_rng(table, StdRng::seed_from_u64(seed))
    }

    fn with_rng(table: PersonaTable, rng: StdRng) -> Self {
        Self {
            table,
            rng,
            generation: 0,
            phase: RevealPhase::Idle,
            target: None,
            status_listener: None,
        }
    }

    /// Install the status observer. It runs synchronously inside engine
    /// calls and must not call back into the engine.
    pub fn set_status_listener(&mut self, listener: StatusListener) {
        self.status_listener = Some(listener);
    }

    /// Bind to a new target, discarding the previous one.
    ///
    /// Any tick scheduled for the previous target is invalidated before the
    /// new state exists.
    pub fn attach(
        &mut self,
        message_id: MessageId,
        content: impl Into<String>,
        persona: Persona,
    ) -> Option<TickSchedule> {
        self.generation += 1;
        let content = content.into();
        tracing::debug!(
            message_id = %message_id,
            persona = %persona,
            target_len = content.len(),
            generation = self.generation,
            "Reveal attach"
        );
        let empty = content.is_empty();
        self.target = Some(Target {
            message_id,
            persona,
            content,
            revealed_bytes: 0,
            revealed_chars: 0,
        });

        if empty {
            self.set_phase(RevealPhase::Idle);
            None
        } else {
            self.set_phase(RevealPhase::Revealing);
            Some(self.schedule())
        }
    }

    /// The target buffer grew or was replaced.
    ///
    /// Returns a schedule when the driver must start a new tick: after a
    /// divergence reset, or when an idle/settled engine has new text to show.
    /// While already revealing, the pending tick simply keeps going.
    pub fn update_target(&mut self, content: impl Into<String>) -> Option<TickSchedule> {
        let content = content.into();
        let target = self.target.as_mut()?;

        if !content.starts_with(target.revealed()) {
            tracing::debug!(
                message_id = %target.message_id,
                revealed_chars = target.revealed_chars,
                new_len = content.len(),
                "Reveal target diverged, restarting from the beginning"
            );
            target.content = content;
            target.rewind();
            self.generation += 1;
            return self.resume();
        }

        target.content = content;
        match self.phase {
            RevealPhase::Revealing => None,
            RevealPhase::Idle | RevealPhase::Settled => self.resume(),
        }
    }

    /// Drop the target. Pending ticks become stale.
    pub fn detach(&mut self) {
        self.generation += 1;
        if let Some(target) = self.target.take() {
            tracing::debug!(
                message_id = %target.message_id,
                revealed_chars = target.revealed_chars,
                "Reveal detach"
            );
        }
        self.set_phase(RevealPhase::Idle);
    }

    /// Run a scheduled tick.
    ///
    /// Revealing the final character settles immediately: the pause that
    /// would follow it belongs to the next character, which does not exist
    /// yet. Growth after that resumes through [`update_target`](Self::update_target).
    pub fn tick(&mut self, generation: Generation) -> TickOutcome {
        if generation != self.generation || self.phase != RevealPhase::Revealing {
            tracing::trace!(
                tick_generation = generation,
                current_generation = self.generation,
                "Stale reveal tick dropped"
            );
            return TickOutcome::Stale;
        }
        let Some(target) = self.target.as_mut() else {
            return TickOutcome::Stale;
        };

        let Some(c) = target.next_char() else {
            self.set_phase(RevealPhase::Settled);
            return TickOutcome::Settled;
        };
        target.revealed_bytes += c.len_utf8();
        target.revealed_chars += 1;
        let revealed_chars = target.revealed_chars;

        if target.caught_up() {
            self.set_phase(RevealPhase::Settled);
            return TickOutcome::CaughtUp { revealed_chars };
        }
        TickOutcome::Advanced {
            revealed_chars,
            next: self.schedule(),
        }
    }

    /// Whether a tick is scheduled
    #[must_use]
    pub fn is_revealing(&self) -> bool {
        self.phase == RevealPhase::Revealing
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> RevealPhase {
        self.phase
    }

    /// Current generation
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Visible prefix
    #[must_use]
    pub fn revealed(&self) -> &str {
        self.target.as_ref().map_or("", Target::revealed)
    }

    /// Visible prefix length in characters
    #[must_use]
    pub fn revealed_len(&self) -> usize {
        self.target.as_ref().map_or(0, |t| t.revealed_chars)
    }

    /// Latest known full content
    #[must_use]
    pub fn target_content(&self) -> &str {
        self.target.as_ref().map_or("", |t| t.content.as_str())
    }

    /// Message currently bound
    #[must_use]
    pub fn message_id(&self) -> Option<&MessageId> {
        self.target.as_ref().map(|t| &t.message_id)
    }

    /// Persona of the bound target
    #[must_use]
    pub fn persona(&self) -> Option<Persona> {
        self.target.as_ref().map(|t| t.persona)
    }

    /// Snapshot for renderers
    #[must_use]
    pub fn snapshot(&self) -> RevealView {
        RevealView {
            message_id: self.message_id().cloned(),
            text: self.revealed().to_string(),
            phase: self.phase,
        }
    }

    fn resume(&mut self) -> Option<TickSchedule> {
        let caught_up = self.target.as_ref().map_or(true, Target::caught_up);
        if caught_up {
            // Diverged onto a target that is no longer than what was shown.
            if self.phase == RevealPhase::Revealing {
                self.set_phase(RevealPhase::Settled);
            }
            return None;
        }
        self.set_phase(RevealPhase::Revealing);
        Some(self.schedule())
    }

    fn schedule(&mut self) -> TickSchedule {
        self.generation += 1;
        let (persona, last) = self
            .target
            .as_ref()
            .map_or((Persona::default(), None), |t| (t.persona, t.last_revealed()));
        let delay = self.table.typing(persona).next_delay(last, &mut self.rng);
        TickSchedule {
            generation: self.generation,
            delay,
        }
    }

    fn set_phase(&mut self, phase: RevealPhase) {
        let was_revealing = self.phase == RevealPhase::Revealing;
        self.phase = phase;
        let now_revealing = phase == RevealPhase::Revealing;
        if was_revealing != now_revealing {
            if let Some(listener) = self.status_listener.as_mut() {
                listener(now_revealing);
            }
        }
    }
}
