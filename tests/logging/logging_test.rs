//! Tests for `src/logging.rs`.

use mcrelay::logging::LoggingGuard;

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("nested").join("logs");
    assert!(!logs_dir.exists());

    // The global subscriber can only be installed once per process, so only
    // the directory is asserted on.
    let _result = mcrelay::logging::init_production(&logs_dir);
    assert!(logs_dir.exists(), "logs directory should be created");
}
