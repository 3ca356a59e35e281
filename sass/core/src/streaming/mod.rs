//! Streaming Infrastructure
//!
//! Moves provider fragments to their two consumers:
//!
//! ```text
//!                         ┌──────────────┐   bytes    ┌───────────────┐
//!                    ┌──▶ │    relay()   │ ─────────▶ │ HTTP response │
//!  backend tokens ───┤    └──────────────┘            └───────────────┘
//!  (mpsc channel)    │    ┌──────────────┐  content   ┌───────────────┐
//!                    └──▶ │ContentBatcher│ ─────────▶ │  Transcript   │ ──▶ Typewriter
//!                         └──────────────┘  ≤ 1/50ms  └───────────────┘
//! ```
//!
//! A channel feeds exactly one of them: the server relays, the chat
//! controller batches. Both observe the same [`CancelSignal`] type so an
//! interruption stops either one at its next suspension point.

mod batcher;
mod cancel;
mod relay;

pub use batcher::{BatchOutcome, ContentBatcher, ContentListener, DEFAULT_FLUSH_INTERVAL};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use relay::{relay, RelayError};
