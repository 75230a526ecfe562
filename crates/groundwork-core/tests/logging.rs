//! Integration tests for the logging subsystem.
//!
//! The logger is process-global and configured from the environment, so
//! every test here serializes on one lock, drives initialization
//! explicitly, and restores a clean slate (shutdown + cleared variables)
//! before releasing it.

use std::sync::{Mutex, MutexGuard};

use groundwork_core::allocator::AllocHandle;
use groundwork_core::env::set_env;
use groundwork_core::error::ErrorKind;
use groundwork_core::logging::{
    self, DEFAULT_LOGGER_DEFAULT_LEVEL, LogLocation, Severity,
};
use groundwork_core::time::ClockKind;
use groundwork_core::types::CharArray;
use groundwork_core::{
    log_debug_named, log_expression, log_function, log_info, log_info_named, log_once,
    log_skipfirst, log_throttle, log_warn_named,
};

static LOGGING_TEST_LOCK: Mutex<()> = Mutex::new(());
static CAPTURED: Mutex<Vec<(Severity, String, String)>> = Mutex::new(Vec::new());

fn lock() -> MutexGuard<'static, ()> {
    LOGGING_TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn clean_slate() {
    let _ = logging::shutdown();
    for name in [
        "RCUTILS_CONSOLE_OUTPUT_FORMAT",
        "RCUTILS_LOGGING_USE_STDOUT",
        "RCUTILS_LOGGING_BUFFERED_STREAM",
        "RCUTILS_COLORIZED_OUTPUT",
        "RCUTILS_CONSOLE_STDOUT_LINE_BUFFERED",
    ] {
        set_env(name, None);
    }
    groundwork_core::reset_error();
    CAPTURED.lock().unwrap().clear();
}

/// Sink that renders through the compiled template and keeps the line.
fn capture_handler(
    location: Option<&LogLocation>,
    severity: Severity,
    name: &str,
    timestamp: i64,
    args: std::fmt::Arguments<'_>,
) {
    let message = format!("{args}");
    let mut out = CharArray::init(256, &AllocHandle::default_allocator()).unwrap();
    logging::format_message(location, severity, name, timestamp, &message, &mut out).unwrap();
    CAPTURED
        .lock()
        .unwrap()
        .push((severity, name.to_string(), out.as_str().to_string()));
}

fn captured_lines() -> Vec<String> {
    CAPTURED.lock().unwrap().iter().map(|(_, _, line)| line.clone()).collect()
}

#[test]
fn default_template_renders_severity_name_and_message() {
    let _guard = lock();
    clean_slate();
    set_env(
        "RCUTILS_CONSOLE_OUTPUT_FORMAT",
        Some("[{severity}] [{name}]: {message}"),
    );
    set_env("RCUTILS_COLORIZED_OUTPUT", Some("0"));
    logging::initialize().unwrap();
    logging::set_output_handler(capture_handler);
    logging::set_logger_level("a", Severity::Debug).unwrap();

    log_debug_named!("a", "hi {}", 7);

    assert_eq!(captured_lines(), vec!["[DEBUG] [a]: hi 7".to_string()]);
    clean_slate();
}

#[test]
fn location_tokens_expand() {
    let _guard = lock();
    clean_slate();
    set_env(
        "RCUTILS_CONSOLE_OUTPUT_FORMAT",
        Some("{file_name}:{line_number} {function_name} | {message}"),
    );
    logging::initialize().unwrap();
    logging::set_output_handler(capture_handler);

    log_info!("located");

    let lines = captured_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("tests/logging.rs:"), "line was: {}", lines[0]);
    assert!(lines[0].contains("location_tokens_expand"));
    assert!(lines[0].ends_with("| located"));
    clean_slate();
}

#[test]
fn timestamp_tokens_expand_to_digits() {
    let _guard = lock();
    clean_slate();
    set_env(
        "RCUTILS_CONSOLE_OUTPUT_FORMAT",
        Some("{time}|{time_as_nanoseconds}|{date_time_with_ms}"),
    );
    logging::initialize().unwrap();
    logging::set_output_handler(capture_handler);

    log_info!("stamped");

    let lines = captured_lines();
    let fields: Vec<&str> = lines[0].split('|').collect();
    assert_eq!(fields.len(), 3);
    assert!(fields[0].contains('.'));
    assert_eq!(fields[1].len(), 19);
    assert!(fields[1].chars().all(|c| c.is_ascii_digit()));
    assert!(fields[2].contains('-') && fields[2].contains(':'));
    clean_slate();
}

#[test]
fn unknown_tokens_and_escapes_render_verbatim() {
    let _guard = lock();
    clean_slate();
    set_env(
        "RCUTILS_CONSOLE_OUTPUT_FORMAT",
        Some(r"{nope} \t{message}"),
    );
    logging::initialize().unwrap();
    logging::set_output_handler(capture_handler);

    log_info!("x");

    assert_eq!(captured_lines(), vec!["{nope} \tx".to_string()]);
    clean_slate();
}

#[test]
fn severity_hierarchy_resolution() {
    let _guard = lock();
    clean_slate();
    logging::initialize().unwrap();

    logging::set_logger_level("x", Severity::Warn).unwrap();
    logging::set_logger_level("x.y.z", Severity::Error).unwrap();

    assert_eq!(logging::get_logger_effective_level("x.y.z.w"), Severity::Error);
    assert_eq!(logging::get_logger_effective_level("x.y.z"), Severity::Error);
    assert_eq!(logging::get_logger_effective_level("x.y"), Severity::Warn);
    assert_eq!(logging::get_logger_effective_level("x"), Severity::Warn);
    assert_eq!(
        logging::get_logger_effective_level("other"),
        DEFAULT_LOGGER_DEFAULT_LEVEL
    );

    // Exact levels: only what was set reads back as set.
    assert_eq!(logging::get_logger_level("x"), Severity::Warn);
    assert_eq!(logging::get_logger_level("x.y"), Severity::Unset);
    clean_slate();
}

#[test]
fn sibling_loggers_do_not_inherit_sideways() {
    let _guard = lock();
    clean_slate();
    logging::initialize().unwrap();

    logging::set_logger_level("a", Severity::Warn).unwrap();
    logging::set_logger_level("a.b", Severity::Debug).unwrap();

    assert_eq!(logging::get_logger_effective_level("a"), Severity::Warn);
    assert_eq!(logging::get_logger_effective_level("a.b"), Severity::Debug);
    assert_eq!(logging::get_logger_effective_level("a.b.c"), Severity::Debug);
    assert_eq!(logging::get_logger_effective_level("a.z"), Severity::Warn);
    clean_slate();
}

#[test]
fn resetting_a_parent_keeps_user_set_descendants() {
    let _guard = lock();
    clean_slate();
    logging::initialize().unwrap();

    logging::set_logger_level("p", Severity::Warn).unwrap();
    logging::set_logger_level("p.q", Severity::Debug).unwrap();
    // Re-setting the parent purges cached entries under it but must keep
    // the explicitly configured child.
    logging::set_logger_level("p", Severity::Error).unwrap();

    assert_eq!(logging::get_logger_effective_level("p"), Severity::Error);
    assert_eq!(logging::get_logger_effective_level("p.q"), Severity::Debug);
    clean_slate();
}

#[test]
fn empty_name_moves_the_process_default() {
    let _guard = lock();
    clean_slate();
    logging::initialize().unwrap();

    logging::set_logger_level("", Severity::Debug).unwrap();
    assert_eq!(logging::get_default_logger_level(), Severity::Debug);
    assert_eq!(logging::get_logger_effective_level("anything"), Severity::Debug);

    logging::set_default_logger_level(Severity::Unset);
    assert_eq!(logging::get_default_logger_level(), DEFAULT_LOGGER_DEFAULT_LEVEL);
    clean_slate();
}

#[test]
fn is_enabled_for_gates_on_the_effective_threshold() {
    let _guard = lock();
    clean_slate();
    logging::initialize().unwrap();
    logging::set_logger_level("gate", Severity::Warn).unwrap();

    assert!(!logging::logger_is_enabled_for("gate", Severity::Debug));
    assert!(!logging::logger_is_enabled_for("gate", Severity::Info));
    assert!(logging::logger_is_enabled_for("gate", Severity::Warn));
    assert!(logging::logger_is_enabled_for("gate", Severity::Fatal));
    // Unconfigured name: the default (INFO) applies.
    assert!(!logging::logger_is_enabled_for("elsewhere", Severity::Debug));
    assert!(logging::logger_is_enabled_for("elsewhere", Severity::Info));
    clean_slate();
}

#[test]
fn disabled_severities_are_not_captured() {
    let _guard = lock();
    clean_slate();
    logging::initialize().unwrap();
    logging::set_output_handler(capture_handler);
    logging::set_logger_level("quiet", Severity::Error).unwrap();

    log_info_named!("quiet", "dropped");
    log_warn_named!("quiet", "dropped too");

    assert!(captured_lines().is_empty());
    clean_slate();
}

#[test]
fn once_fires_exactly_once_per_call_site() {
    let _guard = lock();
    clean_slate();
    logging::initialize().unwrap();
    logging::set_output_handler(capture_handler);

    for _ in 0..5 {
        log_once!(Severity::Info, "only once");
    }
    assert_eq!(captured_lines().len(), 1);
    clean_slate();
}

#[test]
fn skipfirst_skips_only_the_first() {
    let _guard = lock();
    clean_slate();
    logging::initialize().unwrap();
    logging::set_output_handler(capture_handler);

    for _ in 0..4 {
        log_skipfirst!(Severity::Info, "after the first");
    }
    assert_eq!(captured_lines().len(), 3);
    clean_slate();
}

#[test]
fn expression_condition_gates_emission() {
    let _guard = lock();
    clean_slate();
    logging::initialize().unwrap();
    logging::set_output_handler(capture_handler);

    for i in 0..6 {
        log_expression!(Severity::Info, i % 2 == 0, "even {}", i);
    }
    assert_eq!(captured_lines().len(), 3);
    clean_slate();
}

#[test]
fn function_predicate_not_called_when_disabled() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    let _guard = lock();
    clean_slate();
    logging::initialize().unwrap();
    logging::set_output_handler(capture_handler);

    static CALLS: AtomicUsize = AtomicUsize::new(0);
    let predicate = || {
        CALLS.fetch_add(1, Ordering::SeqCst);
        true
    };

    // Debug is below the default threshold: predicate must not run.
    log_function!(Severity::Debug, predicate, "suppressed");
    assert_eq!(CALLS.load(Ordering::SeqCst), 0);

    log_function!(Severity::Info, predicate, "emitted");
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(captured_lines().len(), 1);
    clean_slate();
}

#[test]
fn throttle_enforces_a_minimum_period() {
    let _guard = lock();
    clean_slate();
    logging::initialize().unwrap();
    logging::set_output_handler(capture_handler);

    log_throttle!(Severity::Info, ClockKind::Steady, 50, "tick");
    log_throttle!(Severity::Info, ClockKind::Steady, 50, "tick");
    assert_eq!(captured_lines().len(), 1, "second call inside the period");

    std::thread::sleep(std::time::Duration::from_millis(120));
    log_throttle!(Severity::Info, ClockKind::Steady, 50, "tick");
    assert_eq!(captured_lines().len(), 2, "call after the period expired");
    clean_slate();
}

#[test]
fn invalid_flag_values_fail_initialization() {
    let _guard = lock();
    clean_slate();
    set_env("RCUTILS_LOGGING_USE_STDOUT", Some("yes"));
    assert_eq!(logging::initialize(), Err(ErrorKind::InvalidArgument));
    assert!(!logging::logging_is_initialized());
    clean_slate();

    set_env("RCUTILS_COLORIZED_OUTPUT", Some("2"));
    assert_eq!(logging::initialize(), Err(ErrorKind::InvalidArgument));
    clean_slate();

    set_env("RCUTILS_LOGGING_BUFFERED_STREAM", Some("full"));
    assert_eq!(logging::initialize(), Err(ErrorKind::InvalidArgument));
    clean_slate();
}

#[test]
fn stream_and_buffering_flags_are_accepted() {
    let _guard = lock();
    clean_slate();
    set_env("RCUTILS_LOGGING_USE_STDOUT", Some("1"));
    set_env("RCUTILS_LOGGING_BUFFERED_STREAM", Some("1"));
    set_env("RCUTILS_COLORIZED_OUTPUT", Some("0"));
    logging::initialize().unwrap();
    assert!(logging::logging_is_initialized());
    clean_slate();
}

#[test]
fn deprecated_buffering_variable_still_initializes() {
    let _guard = lock();
    clean_slate();
    set_env("RCUTILS_CONSOLE_STDOUT_LINE_BUFFERED", Some("1"));
    logging::initialize().unwrap();
    assert!(logging::logging_is_initialized());
    clean_slate();
}

#[test]
fn initialization_is_idempotent_and_shutdown_resets() {
    let _guard = lock();
    clean_slate();
    logging::initialize().unwrap();
    logging::initialize().unwrap();
    logging::set_logger_level("tmp", Severity::Debug).unwrap();

    logging::shutdown().unwrap();
    assert!(!logging::logging_is_initialized());
    logging::shutdown().unwrap();

    // A fresh initialization has forgotten the old configuration.
    logging::initialize().unwrap();
    assert_eq!(logging::get_logger_effective_level("tmp"), DEFAULT_LOGGER_DEFAULT_LEVEL);
    clean_slate();
}

#[test]
fn severity_parse_round_trip() {
    let _guard = lock();
    assert_eq!(
        logging::severity_level_from_string("error").unwrap(),
        Severity::Error
    );
    assert_eq!(
        logging::severity_level_from_string("chatty"),
        Err(ErrorKind::SeverityStringInvalid)
    );
    groundwork_core::reset_error();
}

#[test]
fn auto_initialization_covers_bare_logging_calls() {
    let _guard = lock();
    clean_slate();
    // No explicit initialize: the first call must bootstrap the logger.
    assert!(logging::logger_is_enabled_for("auto", Severity::Error));
    assert!(logging::logging_is_initialized());
    clean_slate();
}
