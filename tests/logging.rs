//! Integration test for the logger setup.
use redispatch::log::is_logger_initialised;
use tempfile::tempdir;

/// Set up the logger with an on-disk record and check both log files appear.
///
/// We also check that a second initialisation is refused, since a process has only one
/// global logger.
#[test]
fn test_logger_initialisation() {
    unsafe { std::env::set_var("REDISPATCH_LOG_LEVEL", "off") };

    assert!(!is_logger_initialised());

    let dir = tempdir().unwrap();
    redispatch::log::init(None, Some(dir.path())).unwrap();

    assert!(is_logger_initialised());
    assert!(dir.path().join("redispatch_info.log").is_file());
    assert!(dir.path().join("redispatch_error.log").is_file());

    assert!(redispatch::log::init(None, None).is_err());
}
