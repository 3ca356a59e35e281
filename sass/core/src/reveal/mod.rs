//! Typing Reveal
//!
//! Shows a growing assistant message one character at a time, at a
//! persona-dependent cadence, while the network keeps filling the message in
//! underneath.
//!
//! # Layers
//!
//! - [`delay`]: the per-character delay model and persona delay profiles
//! - [`RevealEngine`]: a clock-free state machine (`Idle`, `Revealing`,
//!   `Settled`) guarded by a generation counter
//! - [`Typewriter`]: the tokio driver and host API (attach, grow, detach,
//!   status, snapshots)
//!
//! The engine only ever consumes text. It never fetches, so the transcript
//! can run arbitrarily far ahead of the visible prefix.

pub mod delay;
mod engine;
mod typewriter;

pub use delay::{DelayProfile, Digression, JitterRange, PauseRange, SENTENCE_END};
pub use engine::{
    Generation, RevealEngine, RevealPhase, RevealView, StatusListener, TickOutcome, TickSchedule,
};
pub use typewriter::Typewriter;
