//! Hierarchical logger with a pluggable sink.
//!
//! Loggers are named by dotted strings (`transport.tcp.reader`); the
//! effective severity threshold of a name is resolved by walking from the
//! most specific name toward the root until a configured level is found,
//! falling back to the process default. Emission goes through a single
//! replaceable output handler; the default handler expands a pre-compiled
//! format template and writes one line per message to the configured
//! stream, colorized per severity when the stream is a terminal.
//!
//! Configuration is captured once, from the environment, at
//! initialization (see [`initialize`]); every entry point auto-initializes
//! so plain logging calls never need setup code.

pub(crate) mod format;
#[doc(hidden)]
pub mod macros;

use std::fmt;
use std::io::Write as _;
use std::sync::RwLock;

use crate::allocator::AllocHandle;
use crate::error::ErrorKind;
use crate::maybe_return_error;
use crate::types::hash_map::{HashMap, StrPtr, string_eq, string_hash};
use crate::types::CharArray;

use self::format::{DEFAULT_OUTPUT_FORMAT, FormatPart, LoggingInput};

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Log severity levels, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum Severity {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    Fatal = 4,
    /// No explicit level; resolution continues up the hierarchy.
    Unset = 100,
}

/// Default threshold for loggers with no configuration anywhere in their
/// hierarchy.
pub const DEFAULT_LOGGER_DEFAULT_LEVEL: Severity = Severity::Info;

impl Severity {
    /// Canonical upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
            Self::Unset => "UNSET",
        }
    }

    /// The severity with this contract value, if any.
    pub fn from_value(value: i32) -> Option<Severity> {
        match value {
            0 => Some(Self::Debug),
            1 => Some(Self::Info),
            2 => Some(Self::Warn),
            3 => Some(Self::Error),
            4 => Some(Self::Fatal),
            100 => Some(Self::Unset),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a severity from its name, case-insensitively.
pub fn severity_level_from_string(severity_string: &str) -> crate::Result<Severity> {
    maybe_return_error!(Err(ErrorKind::Error));
    let upper = severity_string.to_uppercase();
    for severity in [
        Severity::Debug,
        Severity::Info,
        Severity::Warn,
        Severity::Error,
        Severity::Fatal,
        Severity::Unset,
    ] {
        if severity.as_str() == upper {
            return Ok(severity);
        }
    }
    Err(ErrorKind::SeverityStringInvalid)
}

impl std::str::FromStr for Severity {
    type Err = ErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        severity_level_from_string(s)
    }
}

// ---------------------------------------------------------------------------
// Locations and handlers
// ---------------------------------------------------------------------------

/// Source location of a logging call.
#[derive(Debug, Clone, Copy)]
pub struct LogLocation {
    pub function_name: &'static str,
    pub file_name: &'static str,
    pub line_number: usize,
}

/// Sink invoked for every emitted message.
///
/// Receives the call location, severity, logger name, a system timestamp
/// in nanoseconds, and the message as deferred format arguments.
pub type OutputHandler =
    fn(Option<&LogLocation>, Severity, &str, i64, fmt::Arguments<'_>);

/// Severity table entry: the level plus who put it there.
///
/// Entries written by [`set_logger_level`] are user-set; entries written
/// by the resolver as shortcuts are cache-only and may be purged whenever
/// an ancestor's configuration changes.
#[derive(Clone, Copy)]
struct LevelEntry {
    severity: Severity,
    set_by_user: bool,
}

// ---------------------------------------------------------------------------
// Global state
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BufferingMode {
    PlatformDefault,
    Unbuffered,
    LineBuffered,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ColorizedMode {
    ForceDisable,
    ForceEnable,
    Auto,
}

struct LoggingState {
    initialized: bool,
    allocator: AllocHandle,
    output_handler: OutputHandler,
    severities: HashMap<StrPtr, LevelEntry>,
    // False when severity-table allocation failed; levels are then not
    // configurable but logging still works off the default level.
    severities_valid: bool,
    default_level: Severity,
    stream: OutputStream,
    buffering: BufferingMode,
    colorized: ColorizedMode,
    decoded_format: String,
    parts: Vec<FormatPart>,
}

impl LoggingState {
    const fn uninitialized() -> Self {
        LoggingState {
            initialized: false,
            allocator: AllocHandle::default_allocator(),
            output_handler: console_output_handler,
            severities: HashMap::zeroed(),
            severities_valid: false,
            default_level: DEFAULT_LOGGER_DEFAULT_LEVEL,
            stream: OutputStream::Stderr,
            buffering: BufferingMode::PlatformDefault,
            colorized: ColorizedMode::Auto,
            decoded_format: String::new(),
            parts: Vec::new(),
        }
    }
}

static LOGGING: RwLock<LoggingState> = RwLock::new(LoggingState::uninitialized());

fn read_state() -> std::sync::RwLockReadGuard<'static, LoggingState> {
    LOGGING.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_state() -> std::sync::RwLockWriteGuard<'static, LoggingState> {
    LOGGING.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Initialize from every entry point that may run before [`initialize`].
fn ensure_initialized() {
    if !read_state().initialized {
        // A failure has already been recorded in the error state; logging
        // proceeds with built-in defaults.
        let _ = initialize();
    }
}

/// Whether the logger is currently initialized.
pub fn logging_is_initialized() -> bool {
    read_state().initialized
}

// ---------------------------------------------------------------------------
// Environment capture
// ---------------------------------------------------------------------------

enum EnvFlag {
    Empty,
    Zero,
    One,
}

fn get_env_flag(name: &str, zero_semantic: &str, one_semantic: &str) -> crate::Result<EnvFlag> {
    match crate::env::get_env(name) {
        Err(err) => {
            crate::set_error_fmt!("error getting environment variable {}: {}", name, err);
            Err(ErrorKind::InvalidArgument)
        }
        Ok(value) if value.is_empty() => Ok(EnvFlag::Empty),
        Ok(value) if value == "0" => Ok(EnvFlag::Zero),
        Ok(value) if value == "1" => Ok(EnvFlag::One),
        Ok(value) => {
            crate::set_error_fmt!(
                "unexpected value [{}] specified for {}; valid values are 0 ({}) or 1 ({})",
                value,
                name,
                zero_semantic,
                one_semantic
            );
            Err(ErrorKind::InvalidArgument)
        }
    }
}

/// Initialize the logger with the default allocator.
///
/// Idempotent; see [`initialize_with_allocator`].
pub fn initialize() -> crate::Result {
    initialize_with_allocator(&AllocHandle::default_allocator())
}

/// Initialize the logger, capturing configuration from the environment.
///
/// One-shot and idempotent: a second call on an initialized logger
/// returns immediately. Consults `RCUTILS_CONSOLE_OUTPUT_FORMAT`,
/// `RCUTILS_LOGGING_USE_STDOUT`, `RCUTILS_LOGGING_BUFFERED_STREAM` and
/// `RCUTILS_COLORIZED_OUTPUT`; malformed zero/one values fail with
/// `InvalidArgument`. The output format template is compiled here, once.
pub fn initialize_with_allocator(allocator: &AllocHandle) -> crate::Result {
    maybe_return_error!(Err(ErrorKind::Error));
    let mut state = write_state();
    if state.initialized {
        return Ok(());
    }
    if !allocator.is_valid() {
        crate::set_error_msg!("provided allocator is invalid");
        return Err(ErrorKind::InvalidArgument);
    }
    state.allocator = allocator.clone();
    state.output_handler = console_output_handler;
    state.default_level = DEFAULT_LOGGER_DEFAULT_LEVEL;

    match crate::env::get_env("RCUTILS_CONSOLE_STDOUT_LINE_BUFFERED") {
        Err(err) => {
            crate::set_error_fmt!(
                "error getting environment variable RCUTILS_CONSOLE_STDOUT_LINE_BUFFERED: {}",
                err
            );
            return Err(ErrorKind::Error);
        }
        Ok(value) if !value.is_empty() => {
            eprintln!(
                "RCUTILS_CONSOLE_STDOUT_LINE_BUFFERED is now ignored. \
                 Please set RCUTILS_LOGGING_USE_STDOUT and RCUTILS_LOGGING_BUFFERED_STREAM \
                 to control the stream and the buffering of log messages."
            );
        }
        Ok(_) => {}
    }

    // Errors are delivered to stderr by default so they propagate
    // immediately; stdout is opt-in.
    state.stream = match get_env_flag("RCUTILS_LOGGING_USE_STDOUT", "use stderr", "use stdout")? {
        EnvFlag::Empty | EnvFlag::Zero => OutputStream::Stderr,
        EnvFlag::One => OutputStream::Stdout,
    };

    state.buffering = match get_env_flag("RCUTILS_LOGGING_BUFFERED_STREAM", "not buffered", "buffered")? {
        EnvFlag::Empty => BufferingMode::PlatformDefault,
        EnvFlag::Zero => BufferingMode::Unbuffered,
        EnvFlag::One => BufferingMode::LineBuffered,
    };

    state.colorized = match get_env_flag("RCUTILS_COLORIZED_OUTPUT", "force color off", "force color on")? {
        EnvFlag::Empty => ColorizedMode::Auto,
        EnvFlag::Zero => ColorizedMode::ForceDisable,
        EnvFlag::One => ColorizedMode::ForceEnable,
    };

    let output_format = match crate::env::get_env("RCUTILS_CONSOLE_OUTPUT_FORMAT") {
        Ok(value) if !value.is_empty() => value,
        Ok(_) => DEFAULT_OUTPUT_FORMAT.to_string(),
        Err(err) => {
            eprintln!(
                "failed to get output format from the environment ({err}); using the default"
            );
            DEFAULT_OUTPUT_FORMAT.to_string()
        }
    };
    state.decoded_format = format::decode_escapes(&output_format);
    state.parts = format::compile_parts(&state.decoded_format);

    match HashMap::with_capacity(2, string_hash, string_eq, allocator) {
        Ok(map) => {
            state.severities = map;
            state.severities_valid = true;
        }
        Err(_) => {
            state.severities_valid = false;
            crate::set_error_fmt!(
                "failed to initialize map for logger severities [{}]; severities will not be configurable",
                crate::error::get_error_string().as_str()
            );
            return Err(ErrorKind::Error);
        }
    }

    state.initialized = true;
    Ok(())
}

/// Shut the logger down, releasing the severity table and compiled format.
///
/// Every key still owned by the severity table is freed through the
/// logger's allocator. Idempotent; the next logging call re-initializes.
pub fn shutdown() -> crate::Result {
    let mut state = write_state();
    if !state.initialized {
        return Ok(());
    }
    let mut result = Ok(());
    if state.severities_valid {
        loop {
            let key = match state.severities.get_next_key_and_data(None) {
                Ok((key, _)) => key,
                Err(_) => break,
            };
            if state.severities.unset(&key).is_err() {
                crate::set_error_fmt!(
                    "failed to clear out logger severities [{}] during shutdown; memory will be leaked",
                    crate::error::get_error_string().as_str()
                );
                result = Err(ErrorKind::SeverityMapInvalid);
                break;
            }
            // SAFETY: the key was allocated by the logging allocator when
            // the entry was added and is owned exclusively by the table.
            unsafe { state.allocator.deallocate(key.0.cast_mut()) };
        }
        if state.severities.fini().is_err() {
            result = Err(ErrorKind::SeverityMapInvalid);
        }
        state.severities_valid = false;
    } else {
        let _ = state.severities.fini();
    }
    state.parts = Vec::new();
    state.decoded_format = String::new();
    state.initialized = false;
    result
}

// ---------------------------------------------------------------------------
// Severity configuration and resolution
// ---------------------------------------------------------------------------

/// Stack-or-heap nul-terminated probe for string-keyed table lookups.
fn with_probe_key<R>(name: &str, f: impl FnOnce(StrPtr) -> R) -> Option<R> {
    let mut stack = [0u8; 256];
    if name.len() < stack.len() {
        stack[..name.len()].copy_from_slice(name.as_bytes());
        Some(f(StrPtr(stack.as_ptr())))
    } else {
        let scratch = AllocHandle::default_allocator();
        let ptr = scratch.alloc_string(name);
        if ptr.is_null() {
            return None;
        }
        let result = f(StrPtr(ptr));
        // SAFETY: ptr came from scratch just above.
        unsafe { scratch.deallocate(ptr) };
        Some(result)
    }
}

fn get_entry(severities: &HashMap<StrPtr, LevelEntry>, name: &str) -> Option<LevelEntry> {
    with_probe_key(name, |probe| severities.get(&probe)).flatten()
}

fn add_entry(state: &mut LoggingState, name: &str, entry: LevelEntry) -> crate::Result {
    let severities = &mut state.severities;
    let exists = with_probe_key(name, |probe| severities.key_exists(&probe))
        .ok_or(ErrorKind::BadAlloc)?;
    if exists {
        // The table retains the stored key; only the value is replaced,
        // so a transient probe key is fine here.
        return with_probe_key(name, |probe| severities.set(&probe, &entry))
            .ok_or(ErrorKind::BadAlloc)?;
    }
    let copy = state.allocator.alloc_string(name);
    if copy.is_null() {
        return Err(ErrorKind::BadAlloc);
    }
    if let Err(err) = severities.set(&StrPtr(copy), &entry) {
        // SAFETY: copy was allocated just above and never stored.
        unsafe { state.allocator.deallocate(copy) };
        return Err(err);
    }
    Ok(())
}

/// The process default level, used when no logger in a hierarchy is set.
pub fn get_default_logger_level() -> Severity {
    ensure_initialized();
    read_state().default_level
}

/// Set the process default level. `Unset` restores the built-in default.
pub fn set_default_logger_level(level: Severity) {
    ensure_initialized();
    let mut state = write_state();
    state.default_level = if level == Severity::Unset {
        DEFAULT_LOGGER_DEFAULT_LEVEL
    } else {
        level
    };
}

/// The level configured (or cached) for exactly `name`.
///
/// The empty name reads the process default; otherwise `Unset` means
/// "nothing configured for this exact name".
pub fn get_logger_level(name: &str) -> Severity {
    ensure_initialized();
    let state = read_state();
    logger_level_locked(&state, name)
}

/// As [`get_logger_level`], but only the first `name_length` bytes of
/// `name` count.
pub fn get_logger_leveln(name: &str, name_length: usize) -> crate::Result<Severity> {
    ensure_initialized();
    if name_length > name.len() || !name.is_char_boundary(name_length) {
        crate::set_error_msg!("logger name length is not a valid prefix");
        return Err(ErrorKind::InvalidArgument);
    }
    let state = read_state();
    Ok(logger_level_locked(&state, &name[..name_length]))
}

fn logger_level_locked(state: &LoggingState, name: &str) -> Severity {
    if name.is_empty() {
        return state.default_level;
    }
    if !state.severities_valid {
        return Severity::Unset;
    }
    match get_entry(&state.severities, name) {
        Some(entry) => entry.severity,
        None => Severity::Unset,
    }
}

/// The threshold `name` actually logs at, resolved through its ancestry.
pub fn get_logger_effective_level(name: &str) -> Severity {
    ensure_initialized();
    let state = read_state();
    effective_level_locked(&state, name)
}

fn effective_level_locked(state: &LoggingState, name: &str) -> Severity {
    if name.is_empty() || !state.severities_valid || state.severities.is_empty() {
        return state.default_level;
    }

    if let Some(entry) = get_entry(&state.severities, name) {
        if entry.severity != Severity::Unset {
            return entry.severity;
        }
        // An Unset entry defers to the ancestors, like no entry at all.
    }

    let mut ancestor = name;
    while let Some(separator) = ancestor.rfind('.') {
        ancestor = &ancestor[..separator];
        if let Some(entry) = get_entry(&state.severities, ancestor) {
            if entry.severity != Severity::Unset {
                return entry.severity;
            }
        }
    }

    // Resolution results are deliberately not written back here: caching
    // would require the write lock on this read path. The purge logic in
    // set_logger_level still honors cached entries should that change.
    state.default_level
}

fn is_dotted_descendant(key: &str, name: &str) -> bool {
    if name.is_empty() {
        return !key.is_empty();
    }
    key.len() > name.len() && key.starts_with(name) && key.as_bytes()[name.len()] == b'.'
}

/// Configure the level for `name` (the empty name also moves the process
/// default).
///
/// Cache entries under `name` are purged; levels the user explicitly set
/// on descendants are left alone.
pub fn set_logger_level(name: &str, level: Severity) -> crate::Result {
    ensure_initialized();
    maybe_return_error!(Err(ErrorKind::Error));
    let mut state = write_state();
    if !state.severities_valid {
        crate::set_error_msg!("logger severity level map is invalid");
        return Err(ErrorKind::SeverityMapInvalid);
    }

    let name_exists =
        with_probe_key(name, |probe| state.severities.key_exists(&probe)).unwrap_or(false);
    if name_exists {
        let mut to_remove: Vec<StrPtr> = Vec::new();
        let mut cursor = state.severities.get_next_key_and_data(None);
        while let Ok((key, entry)) = cursor {
            // SAFETY: stored keys are live allocator-owned strings.
            let key_str = unsafe { key.as_str() };
            let remove = if key_str == name {
                // Replaced below as a user-set entry either way.
                true
            } else {
                is_dotted_descendant(key_str, name) && !entry.set_by_user
            };
            if remove {
                to_remove.push(key);
            }
            cursor = state.severities.get_next_key_and_data(Some(&key));
        }
        for key in to_remove {
            if let Err(err) = state.severities.unset(&key) {
                crate::set_error_fmt!(
                    "error clearing old severity level for logger named '{}'",
                    name
                );
                return Err(err);
            }
            // SAFETY: the key was allocated by the logging allocator when
            // its entry was added.
            unsafe { state.allocator.deallocate(key.0.cast_mut()) };
        }
    }

    if let Err(err) = add_entry(
        &mut state,
        name,
        LevelEntry {
            severity: level,
            set_by_user: true,
        },
    ) {
        crate::set_error_fmt!("error setting severity level for logger named '{}'", name);
        return Err(err);
    }

    if name.is_empty() {
        state.default_level = level;
    }
    Ok(())
}

/// Whether a message at `severity` from logger `name` would be emitted.
///
/// This is the hot path: one read-lock acquisition, no allocation for
/// names of ordinary length.
pub fn logger_is_enabled_for(name: &str, severity: Severity) -> bool {
    ensure_initialized();
    let state = read_state();
    let threshold = effective_level_locked(&state, name);
    (severity as i32) >= (threshold as i32)
}

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

/// Emit a message if `name` is enabled at `severity`.
pub fn log(
    location: Option<&LogLocation>,
    severity: Severity,
    name: &str,
    args: fmt::Arguments<'_>,
) {
    if !logger_is_enabled_for(name, severity) {
        return;
    }
    log_internal(location, severity, name, args);
}

/// Emit unconditionally; the macros call this after their own enabled
/// check.
#[doc(hidden)]
pub fn log_internal(
    location: Option<&LogLocation>,
    severity: Severity,
    name: &str,
    args: fmt::Arguments<'_>,
) {
    let Ok(timestamp) = crate::time::system_time_now() else {
        eprintln!("failed to get timestamp while doing a console logging");
        return;
    };
    let handler = { read_state().output_handler };
    handler(location, severity, name, timestamp, args);
}

/// The currently installed output handler.
pub fn get_output_handler() -> OutputHandler {
    ensure_initialized();
    read_state().output_handler
}

/// Replace the output handler.
pub fn set_output_handler(handler: OutputHandler) {
    ensure_initialized();
    write_state().output_handler = handler;
}

/// Expand the compiled format template for one message into `out`.
///
/// This is the formatting stage of the default handler, exposed so that
/// custom handlers can produce identical lines.
pub fn format_message(
    location: Option<&LogLocation>,
    severity: Severity,
    name: &str,
    timestamp: i64,
    msg: &str,
    out: &mut CharArray,
) -> crate::Result {
    let state = read_state();
    let input = LoggingInput {
        location,
        severity,
        name,
        timestamp,
        msg,
    };
    format::expand_parts(&state.parts, &state.decoded_format, &input, out)
}

const COLOR_NORMAL: &str = "\x1b[0m";
const COLOR_RED: &str = "\x1b[31m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_YELLOW: &str = "\x1b[33m";

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Debug => COLOR_GREEN,
        Severity::Info => COLOR_NORMAL,
        Severity::Warn => COLOR_YELLOW,
        Severity::Error | Severity::Fatal => COLOR_RED,
        Severity::Unset => COLOR_NORMAL,
    }
}

fn stream_is_tty(stream: OutputStream) -> bool {
    let fd = match stream {
        OutputStream::Stdout => libc::STDOUT_FILENO,
        OutputStream::Stderr => libc::STDERR_FILENO,
    };
    // SAFETY: isatty on a standard stream descriptor.
    unsafe { libc::isatty(fd) != 0 }
}

/// Default sink: template expansion plus one colorized line per message
/// on the configured stream.
pub fn console_output_handler(
    location: Option<&LogLocation>,
    severity: Severity,
    name: &str,
    timestamp: i64,
    args: fmt::Arguments<'_>,
) {
    let state = read_state();
    if !state.initialized {
        eprintln!("logging system isn't initialized: dropping a log message");
        return;
    }
    match severity {
        Severity::Debug | Severity::Info | Severity::Warn | Severity::Error | Severity::Fatal => {}
        other => {
            eprintln!("unknown severity level: {}", other as i32);
            return;
        }
    }
    let colorized = match state.colorized {
        ColorizedMode::ForceEnable => true,
        ColorizedMode::ForceDisable => false,
        ColorizedMode::Auto => stream_is_tty(state.stream),
    };

    let build = (|| -> crate::Result<CharArray> {
        let mut message = CharArray::init(1024, &state.allocator)?;
        fmt::Write::write_fmt(&mut message, args).map_err(|_| ErrorKind::Error)?;

        let mut output = CharArray::init(1024, &state.allocator)?;
        if colorized {
            output.append_str(severity_color(severity))?;
        }
        let input = LoggingInput {
            location,
            severity,
            name,
            timestamp,
            msg: message.as_str(),
        };
        format::expand_parts(&state.parts, &state.decoded_format, &input, &mut output)?;
        if colorized {
            output.append_str(COLOR_NORMAL)?;
        }
        output.append_str("\n")?;
        Ok(output)
    })();

    let output = match build {
        Ok(output) => output,
        Err(_) => {
            eprintln!("{}", crate::error::get_error_string().as_str());
            crate::error::reset_error();
            return;
        }
    };

    match state.stream {
        OutputStream::Stdout => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            let _ = lock.write_all(output.as_bytes());
            if state.buffering != BufferingMode::PlatformDefault {
                let _ = lock.flush();
            }
        }
        OutputStream::Stderr => {
            let stderr = std::io::stderr();
            let mut lock = stderr.lock();
            let _ = lock.write_all(output.as_bytes());
        }
    }
}
