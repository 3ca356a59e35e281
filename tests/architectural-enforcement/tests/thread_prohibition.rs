//! Integration Test: Worker Thread Prohibition
//!
//! **Policy**: network arrival and the reveal timer interleave on tokio's
//! cooperative scheduler. No component starts its own threads or blocks a
//! runtime worker.

use architectural_enforcement::scan;

#[test]
fn test_no_worker_threads() {
    let violations = scan(
        &[
            "std::thread::spawn",
            "thread::spawn(",
            "thread::Builder",
            "spawn_blocking(",
            "block_in_place(",
        ],
        &[],
    );

    if !violations.is_empty() {
        eprintln!("\n❌ Thread creation found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        panic!("Found {} thread violation(s)", violations.len());
    }
}

#[test]
fn test_no_blocking_http() {
    let violations = scan(&["reqwest::blocking"], &[]);
    assert!(
        violations.is_empty(),
        "blocking HTTP client in production code: {violations:?}"
    );
}
