//! Tokio driver for the reveal engine
//!
//! [`Typewriter`] is the host-facing handle. It owns a [`RevealEngine`]
//! behind a mutex and turns each [`TickSchedule`] into a spawned task that
//! sleeps for the scheduled delay and then ticks the engine. Renderers watch
//! [`RevealView`] snapshots through [`Typewriter::subscribe`].
//!
//! The previous tick task is aborted whenever a new one supersedes it. The
//! abort is best effort: a task already past its sleep when the abort lands
//! still reaches [`RevealEngine::tick`], where the generation guard drops it.
//!
//! Must be used from within a tokio runtime.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use super::engine::{RevealEngine, RevealPhase, RevealView, TickOutcome, TickSchedule};
use crate::messages::MessageId;
use crate::persona::{Persona, PersonaTable};

struct Inner {
    engine: RevealEngine,
    pending: Option<AbortHandle>,
    view_tx: watch::Sender<RevealView>,
}

impl Inner {
    fn publish(&self) {
        let view = self.engine.snapshot();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

/// Host handle for the typing reveal
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct Typewriter {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for Typewriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Typewriter")
            .field("engine", &self.inner.lock().engine)
            .finish_non_exhaustive()
    }
}

impl Typewriter {
    /// Create a typewriter with entropy-seeded jitter
    #[must_use]
    pub fn new(table: PersonaTable) -> Self {
        Self::from_engine(RevealEngine::new(table))
    }

    /// Create a typewriter with reproducible delays
    #[must_use]
    pub fn with_seed(table: PersonaTable, seed: u64) -> Self {
        Self::from_engine(RevealEngine::with_seed(table, seed))
    }

    /// Wrap an existing engine
    #[must_use]
    pub fn from_engine(engine: RevealEngine) -> Self {
        let (view_tx, _) = watch::channel(engine.snapshot());
        Self {
            inner: Arc::new(Mutex::new(Inner {
                engine,
                pending: None,
                view_tx,
            })),
        }
    }

    /// Register the status callback, fired on every transition into or out
    /// of revealing.
    ///
    /// The callback runs while the engine lock is held: it must not call back
    /// into this typewriter.
    #[must_use]
    pub fn with_status_callback<F>(self, callback: F) -> Self
    where
        F: FnMut(bool) + Send + 'static,
    {
        self.inner
            .lock()
            .engine
            .set_status_listener(Box::new(callback));
        self
    }

    /// Start revealing a new message, abandoning the current one
    pub fn attach(&self, message_id: MessageId, content: impl Into<String>, persona: Persona) {
        let mut inner = self.inner.lock();
        inner.cancel_pending();
        let schedule = inner.engine.attach(message_id, content, persona);
        inner.publish();
        if let Some(schedule) = schedule {
            spawn_tick(&self.inner, &mut inner, schedule);
        }
    }

    /// The target message's content changed
    pub fn on_target_grown(&self, content: impl Into<String>) {
        let mut inner = self.inner.lock();
        if let Some(schedule) = inner.engine.update_target(content) {
            inner.cancel_pending();
            spawn_tick(&self.inner, &mut inner, schedule);
        }
        inner.publish();
    }

    /// Like [`on_target_grown`](Self::on_target_grown), but only while bound
    /// to `message_id`. Returns whether the update was applied.
    pub fn update_if_current(&self, message_id: &MessageId, content: impl Into<String>) -> bool {
        let mut inner = self.inner.lock();
        if inner.engine.message_id() != Some(message_id) {
            return false;
        }
        if let Some(schedule) = inner.engine.update_target(content) {
            inner.cancel_pending();
            spawn_tick(&self.inner, &mut inner, schedule);
        }
        inner.publish();
        true
    }

    /// Stop revealing and forget the target
    pub fn detach(&self) {
        let mut inner = self.inner.lock();
        inner.cancel_pending();
        inner.engine.detach();
        inner.publish();
    }

    /// Whether a reveal is in progress
    #[must_use]
    pub fn is_revealing(&self) -> bool {
        self.inner.lock().engine.is_revealing()
    }

    /// Current engine phase
    #[must_use]
    pub fn phase(&self) -> RevealPhase {
        self.inner.lock().engine.phase()
    }

    /// Visible prefix
    #[must_use]
    pub fn revealed(&self) -> String {
        self.inner.lock().engine.revealed().to_string()
    }

    /// Message currently bound
    #[must_use]
    pub fn message_id(&self) -> Option<MessageId> {
        self.inner.lock().engine.message_id().cloned()
    }

    /// Current snapshot
    #[must_use]
    pub fn view(&self) -> RevealView {
        self.inner.lock().engine.snapshot()
    }

    /// Receive a snapshot after every visible change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RevealView> {
        self.inner.lock().view_tx.subscribe()
    }
}

fn spawn_tick(shared: &Arc<Mutex<Inner>>, inner: &mut Inner, schedule: TickSchedule) {
    let weak = Arc::downgrade(shared);
    let task = tokio::spawn(async move {
        tokio::time::sleep(schedule.delay).await;
        fire(&weak, schedule);
    });
    inner.pending = Some(task.abort_handle());
}

fn fire(weak: &Weak<Mutex<Inner>>, schedule: TickSchedule) {
    // Typewriter dropped while we slept
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let mut inner = shared.lock();
    match inner.engine.tick(schedule.generation) {
        TickOutcome::Advanced { next, .. } => {
            inner.publish();
            spawn_tick(&shared, &mut inner, next);
        }
        TickOutcome::CaughtUp { .. } | TickOutcome::Settled => {
            inner.pending = None;
            inner.publish();
        }
        TickOutcome::Stale => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn typewriter() -> Typewriter {
        Typewriter::with_seed(PersonaTable::default(), 9)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reveals_over_time() {
        let tw = typewriter();
        tw.attach(MessageId::new(), "Hi.", Persona::Exec);
        assert!(tw.is_revealing());
        assert_eq!(tw.revealed(), "");

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(tw.revealed(), "");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(tw.revealed(), "Hi.");
        assert_eq!(tw.phase(), RevealPhase::Settled);
        assert!(!tw.is_revealing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_turns_off_with_last_char() {
        let flips = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&flips);
        let tw = typewriter().with_status_callback(move |on| sink.lock().push(on));
        let mut rx = tw.subscribe();
        tw.attach(MessageId::new(), "Indeed.", Persona::Intellectual);

        while rx.borrow_and_update().text != "Indeed." {
            rx.changed().await.unwrap();
        }
        // the snapshot showing the full text already reports settled
        assert_eq!(rx.borrow().phase, RevealPhase::Settled);
        assert!(!tw.is_revealing());
        assert_eq!(*flips.lock(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_sees_growing_prefix() {
        let tw = typewriter();
        let mut rx = tw.subscribe();
        tw.attach(MessageId::new(), "abc", Persona::Exec);

        let mut seen = Vec::new();
        while seen.last().map(String::as_str) != Some("abc") {
            rx.changed().await.unwrap();
            let text = rx.borrow_and_update().text.clone();
            if seen.last() != Some(&text) {
                seen.push(text);
            }
        }
        for pair in seen.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_callback_fires_on_transitions() {
        let flips = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&flips);
        let tw = typewriter().with_status_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tw.attach(MessageId::new(), "ok", Persona::Exec);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(flips.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_freezes_output() {
        let tw = typewriter();
        tw.attach(MessageId::new(), "Hello there", Persona::Exec);
        tokio::time::sleep(Duration::from_millis(45)).await;
        tw.detach();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(tw.revealed(), "");
        assert!(!tw.is_revealing());
        assert!(tw.message_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_typewriter_stops_ticks() {
        let tw = typewriter();
        let rx = tw.subscribe();
        tw.attach(MessageId::new(), "Hello", Persona::Exec);
        drop(tw);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rx.borrow().text, "");
    }
}
