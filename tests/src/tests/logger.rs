//! Logger Tests
//!
//! The level filter is a global, so every test that touches it runs serially.

use serial_test::serial;

use crate::logger::{self, LogLevel};

#[test]
fn test_level_order_and_names() {
    assert!(LogLevel::PANIC < LogLevel::FATAL);
    assert!(LogLevel::DEBUG < LogLevel::TRACE);
    assert_eq!(LogLevel::WARN.as_str(), "WARN");
    assert_eq!(LogLevel::TRACE.priority(), 6);
}

#[test]
fn test_level_from_str() {
    assert_eq!(LogLevel::from_str("debug"), Some(LogLevel::DEBUG));
    assert_eq!(LogLevel::from_str("WARNING"), Some(LogLevel::WARN));
    assert_eq!(LogLevel::from_str("Fatal"), Some(LogLevel::FATAL));
    assert_eq!(LogLevel::from_str("loud"), None);
}

#[test]
fn test_facade_level_mapping() {
    assert_eq!(LogLevel::PANIC.facade_level(), log::Level::Error);
    assert_eq!(LogLevel::FATAL.facade_level(), log::Level::Error);
    assert_eq!(LogLevel::WARN.facade_level(), log::Level::Warn);
    assert_eq!(LogLevel::TRACE.facade_level(), log::Level::Trace);
}

#[test]
fn test_parse_level_directive() {
    assert_eq!(
        logger::parse_level_directive("quiet loglevel=debug root=/dev/vda"),
        Some(LogLevel::DEBUG)
    );
    assert_eq!(logger::parse_level_directive("log=nonsense log=error"), Some(LogLevel::ERROR));
    assert_eq!(logger::parse_level_directive("quiet"), None);
}

#[test]
#[serial]
fn test_max_level_filters() {
    let saved = logger::max_level();

    logger::set_max_level(LogLevel::WARN);
    assert_eq!(logger::max_level(), LogLevel::WARN);
    assert!(logger::enabled(LogLevel::ERROR));
    assert!(logger::enabled(LogLevel::WARN));
    assert!(!logger::enabled(LogLevel::INFO));

    logger::set_max_level(saved);
}

#[test]
#[serial]
fn test_log_without_installed_logger() {
    let saved = logger::max_level();
    logger::set_max_level(LogLevel::TRACE);

    // No `log::Log` is installed; records are dropped by the facade
    logger::log(LogLevel::INFO, format_args!("cpu {} online", 0));
    logger::log(LogLevel::TRACE, format_args!("switch {} -> {}", "a", "b"));

    logger::set_max_level(saved);
}
