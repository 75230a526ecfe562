//! Logging macro families.
//!
//! Every macro checks [`logger_is_enabled_for`](crate::logging::logger_is_enabled_for)
//! before evaluating its message arguments, captures the call-site
//! location, and forwards to the installed output handler. The
//! conditional families (`once`, `skipfirst`, `throttle`, …) keep their
//! state in per-call-site statics, so two call sites never share a
//! counter.

/// Name of the enclosing function, as a `&'static str`.
#[macro_export]
macro_rules! function_name {
    () => {{
        fn marker() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = type_name_of(marker);
        name.strip_suffix("::marker").unwrap_or(name)
    }};
}

/// Call-site [`LogLocation`](crate::logging::LogLocation) capture.
#[doc(hidden)]
#[macro_export]
macro_rules! __log_location {
    () => {
        $crate::logging::LogLocation {
            function_name: $crate::function_name!(),
            file_name: file!(),
            line_number: line!() as usize,
        }
    };
}

/// Log at an explicit severity with the unnamed (root) logger.
#[macro_export]
macro_rules! log {
    ($severity:expr, $($args:tt)*) => {
        $crate::log_named!($severity, "", $($args)*)
    };
}

/// Log at an explicit severity with a named logger.
#[macro_export]
macro_rules! log_named {
    ($severity:expr, $name:expr, $($args:tt)*) => {{
        let severity = $severity;
        let name = $name;
        if $crate::logging::logger_is_enabled_for(name, severity) {
            let location = $crate::__log_location!();
            $crate::logging::log_internal(
                Some(&location),
                severity,
                name,
                format_args!($($args)*),
            );
        }
    }};
}

/// Log at most once per call site.
#[macro_export]
macro_rules! log_once {
    ($severity:expr, $($args:tt)*) => {
        $crate::log_once_named!($severity, "", $($args)*)
    };
}

/// Log at most once per call site, named logger.
#[macro_export]
macro_rules! log_once_named {
    ($severity:expr, $name:expr, $($args:tt)*) => {{
        let severity = $severity;
        let name = $name;
        if $crate::logging::logger_is_enabled_for(name, severity) {
            static FIRED: ::std::sync::atomic::AtomicBool =
                ::std::sync::atomic::AtomicBool::new(false);
            if !FIRED.swap(true, ::std::sync::atomic::Ordering::Relaxed) {
                let location = $crate::__log_location!();
                $crate::logging::log_internal(
                    Some(&location),
                    severity,
                    name,
                    format_args!($($args)*),
                );
            }
        }
    }};
}

/// Log only when `expression` is true.
#[macro_export]
macro_rules! log_expression {
    ($severity:expr, $expression:expr, $($args:tt)*) => {
        $crate::log_expression_named!($severity, $expression, "", $($args)*)
    };
}

/// Log only when `expression` is true, named logger.
#[macro_export]
macro_rules! log_expression_named {
    ($severity:expr, $expression:expr, $name:expr, $($args:tt)*) => {{
        let severity = $severity;
        let name = $name;
        if $crate::logging::logger_is_enabled_for(name, severity) && $expression {
            let location = $crate::__log_location!();
            $crate::logging::log_internal(
                Some(&location),
                severity,
                name,
                format_args!($($args)*),
            );
        }
    }};
}

/// Log only when `predicate()` returns true.
///
/// The predicate is not invoked while the severity is disabled.
#[macro_export]
macro_rules! log_function {
    ($severity:expr, $predicate:expr, $($args:tt)*) => {
        $crate::log_function_named!($severity, $predicate, "", $($args)*)
    };
}

/// Log only when `predicate()` returns true, named logger.
#[macro_export]
macro_rules! log_function_named {
    ($severity:expr, $predicate:expr, $name:expr, $($args:tt)*) => {{
        let severity = $severity;
        let name = $name;
        if $crate::logging::logger_is_enabled_for(name, severity) && ($predicate)() {
            let location = $crate::__log_location!();
            $crate::logging::log_internal(
                Some(&location),
                severity,
                name,
                format_args!($($args)*),
            );
        }
    }};
}

/// Skip the first occurrence at this call site, log every one after.
#[macro_export]
macro_rules! log_skipfirst {
    ($severity:expr, $($args:tt)*) => {
        $crate::log_skipfirst_named!($severity, "", $($args)*)
    };
}

/// Skip the first occurrence at this call site, named logger.
#[macro_export]
macro_rules! log_skipfirst_named {
    ($severity:expr, $name:expr, $($args:tt)*) => {{
        let severity = $severity;
        let name = $name;
        if $crate::logging::logger_is_enabled_for(name, severity) {
            static SEEN: ::std::sync::atomic::AtomicBool =
                ::std::sync::atomic::AtomicBool::new(false);
            if SEEN.swap(true, ::std::sync::atomic::Ordering::Relaxed) {
                let location = $crate::__log_location!();
                $crate::logging::log_internal(
                    Some(&location),
                    severity,
                    name,
                    format_args!($($args)*),
                );
            }
        }
    }};
}

/// Throttle gate shared by the throttle macros: true when this call site
/// may fire now, measured on the given clock kind.
#[doc(hidden)]
pub fn throttle_gate(
    last_fired: &std::sync::atomic::AtomicI64,
    clock_kind: crate::time::ClockKind,
    period_ms: i64,
) -> bool {
    use std::sync::atomic::Ordering;

    let Ok(now) = crate::time::now_from_kind(clock_kind) else {
        eprintln!("{}", crate::error::get_error_string().as_str());
        crate::error::reset_error();
        return false;
    };
    let period_ns = period_ms.saturating_mul(crate::time::MS_TO_NS);
    let last = last_fired.load(Ordering::Relaxed);
    if last != i64::MIN && now.nanoseconds < last.saturating_add(period_ns) {
        return false;
    }
    // One winner per expiry under contention.
    last_fired
        .compare_exchange(last, now.nanoseconds, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
}

/// Log at most once per `period_ms`, measured on `clock_kind`.
#[macro_export]
macro_rules! log_throttle {
    ($severity:expr, $clock_kind:expr, $period_ms:expr, $($args:tt)*) => {
        $crate::log_throttle_named!($severity, $clock_kind, $period_ms, "", $($args)*)
    };
}

/// Log at most once per `period_ms`, named logger.
#[macro_export]
macro_rules! log_throttle_named {
    ($severity:expr, $clock_kind:expr, $period_ms:expr, $name:expr, $($args:tt)*) => {{
        let severity = $severity;
        let name = $name;
        if $crate::logging::logger_is_enabled_for(name, severity) {
            static LAST_FIRED: ::std::sync::atomic::AtomicI64 =
                ::std::sync::atomic::AtomicI64::new(i64::MIN);
            if $crate::logging::macros::throttle_gate(&LAST_FIRED, $clock_kind, $period_ms) {
                let location = $crate::__log_location!();
                $crate::logging::log_internal(
                    Some(&location),
                    severity,
                    name,
                    format_args!($($args)*),
                );
            }
        }
    }};
}

/// Throttled logging that additionally skips its first firing.
#[macro_export]
macro_rules! log_skipfirst_throttle {
    ($severity:expr, $clock_kind:expr, $period_ms:expr, $($args:tt)*) => {
        $crate::log_skipfirst_throttle_named!($severity, $clock_kind, $period_ms, "", $($args)*)
    };
}

/// Throttled, first-firing-skipped logging with a named logger.
#[macro_export]
macro_rules! log_skipfirst_throttle_named {
    ($severity:expr, $clock_kind:expr, $period_ms:expr, $name:expr, $($args:tt)*) => {{
        let severity = $severity;
        let name = $name;
        if $crate::logging::logger_is_enabled_for(name, severity) {
            static LAST_FIRED: ::std::sync::atomic::AtomicI64 =
                ::std::sync::atomic::AtomicI64::new(i64::MIN);
            static SEEN: ::std::sync::atomic::AtomicBool =
                ::std::sync::atomic::AtomicBool::new(false);
            if $crate::logging::macros::throttle_gate(&LAST_FIRED, $clock_kind, $period_ms)
                && SEEN.swap(true, ::std::sync::atomic::Ordering::Relaxed)
            {
                let location = $crate::__log_location!();
                $crate::logging::log_internal(
                    Some(&location),
                    severity,
                    name,
                    format_args!($($args)*),
                );
            }
        }
    }};
}

/// Debug-level logging with the unnamed logger.
#[macro_export]
macro_rules! log_debug {
    ($($args:tt)*) => { $crate::log!($crate::logging::Severity::Debug, $($args)*) };
}

/// Debug-level logging with a named logger.
#[macro_export]
macro_rules! log_debug_named {
    ($name:expr, $($args:tt)*) => {
        $crate::log_named!($crate::logging::Severity::Debug, $name, $($args)*)
    };
}

/// Info-level logging with the unnamed logger.
#[macro_export]
macro_rules! log_info {
    ($($args:tt)*) => { $crate::log!($crate::logging::Severity::Info, $($args)*) };
}

/// Info-level logging with a named logger.
#[macro_export]
macro_rules! log_info_named {
    ($name:expr, $($args:tt)*) => {
        $crate::log_named!($crate::logging::Severity::Info, $name, $($args)*)
    };
}

/// Warn-level logging with the unnamed logger.
#[macro_export]
macro_rules! log_warn {
    ($($args:tt)*) => { $crate::log!($crate::logging::Severity::Warn, $($args)*) };
}

/// Warn-level logging with a named logger.
#[macro_export]
macro_rules! log_warn_named {
    ($name:expr, $($args:tt)*) => {
        $crate::log_named!($crate::logging::Severity::Warn, $name, $($args)*)
    };
}

/// Error-level logging with the unnamed logger.
#[macro_export]
macro_rules! log_error {
    ($($args:tt)*) => { $crate::log!($crate::logging::Severity::Error, $($args)*) };
}

/// Error-level logging with a named logger.
#[macro_export]
macro_rules! log_error_named {
    ($name:expr, $($args:tt)*) => {
        $crate::log_named!($crate::logging::Severity::Error, $name, $($args)*)
    };
}

/// Fatal-level logging with the unnamed logger.
#[macro_export]
macro_rules! log_fatal {
    ($($args:tt)*) => { $crate::log!($crate::logging::Severity::Fatal, $($args)*) };
}

/// Fatal-level logging with a named logger.
#[macro_export]
macro_rules! log_fatal_named {
    ($name:expr, $($args:tt)*) => {
        $crate::log_named!($crate::logging::Severity::Fatal, $name, $($args)*)
    };
}
