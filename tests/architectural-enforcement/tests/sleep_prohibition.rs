//! Integration Test: Sleep Prohibition
//!
//! **Policy**: production code waits on I/O, channels or deadlines. Sleeping
//! is reserved for the two places whose whole job is pacing output:
//! - `reveal/typewriter.rs`: the per-character reveal delay
//! - `backend/scripted.rs`: the fake provider's fragment pacing
//!
//! `tokio::time::sleep_until` in the batcher is a deadline inside `select!`,
//! not a sleep, and does not match.

use architectural_enforcement::scan;

const ALLOWED: [&str; 2] = ["reveal/typewriter.rs", "backend/scripted.rs"];

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(&["::sleep(", ".sleep(", "thread::sleep"], &ALLOWED);

    if !violations.is_empty() {
        eprintln!("\n❌ Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Wait on a channel, a CancelSignal or a select! deadline instead.");
        panic!("Found {} sleep violation(s)", violations.len());
    }
}

#[test]
fn test_allowed_files_still_exist() {
    let files = architectural_enforcement::source_files();
    for allowed in ALLOWED {
        assert!(
            files.iter().any(|f| f.to_string_lossy().replace('\\', "/").ends_with(allowed)),
            "{allowed} moved; update the allow list"
        );
    }
}
