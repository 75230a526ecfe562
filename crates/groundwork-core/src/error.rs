//! Status codes and thread-local structured error state.
//!
//! Every fallible operation in this crate returns `Result<T, ErrorKind>`
//! and, where the failure is worth a message, records one in the calling
//! thread's error slot before returning. The slot is a fixed-capacity
//! record (message, source file, line number) so that reporting an
//! allocation failure never itself needs to allocate.
//!
//! The formatted view is `"<message>, at <file>:<line>"`. Re-setting the
//! error with its own formatted string chains another `", at <file>:<line>"`
//! suffix, producing a call-path trail bounded by the message capacity.

use std::cell::RefCell;
use std::fmt;

// ---------------------------------------------------------------------------
// Status codes
// ---------------------------------------------------------------------------

/// Failure codes returned by this crate.
///
/// The numeric values are part of the contract with bindings and peer
/// libraries; success is the absence of a code (`Ok`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorKind {
    /// Unspecified failure.
    Error = 1,
    /// Memory allocation failed.
    BadAlloc = 2,
    /// A caller-supplied argument was invalid.
    InvalidArgument = 11,
    /// Container was already initialized.
    AlreadyInit = 103,
    /// String-map key not present.
    KeyNotFound = 105,
    /// Container is full and was asked not to grow.
    NotEnoughSpace = 106,
    /// Lookup found nothing.
    NotFound = 107,
    /// Hash-map iteration is exhausted.
    HashMapNoMoreEntries = 108,
    /// A severity name did not match any known severity.
    SeverityStringInvalid = 300,
    /// The logger severity table is unusable.
    SeverityMapInvalid = 301,
}

impl ErrorKind {
    /// Numeric value of this code.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::BadAlloc => write!(f, "bad allocation"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::AlreadyInit => write!(f, "already initialized"),
            Self::KeyNotFound => write!(f, "key not found"),
            Self::NotEnoughSpace => write!(f, "not enough space"),
            Self::NotFound => write!(f, "not found"),
            Self::HashMapNoMoreEntries => write!(f, "no more entries"),
            Self::SeverityStringInvalid => write!(f, "invalid severity string"),
            Self::SeverityMapInvalid => write!(f, "severity map invalid"),
        }
    }
}

impl std::error::Error for ErrorKind {}

// ---------------------------------------------------------------------------
// Error state buffers
// ---------------------------------------------------------------------------

/// Capacity of the error message buffer, in bytes.
pub const ERROR_MESSAGE_MAX_LENGTH: usize = 768;
/// Capacity of the source-file buffer, in bytes.
pub const ERROR_FILE_MAX_LENGTH: usize = 228;
/// Capacity of the formatted `"<msg>, at <file>:<line>"` string, in bytes.
pub const ERROR_STRING_MAX_LENGTH: usize = 1024;

/// Structured error record held in the thread-local slot.
///
/// Message and file live in fixed inline buffers; a message longer than
/// [`ERROR_MESSAGE_MAX_LENGTH`] is truncated at the tail, a file path
/// longer than [`ERROR_FILE_MAX_LENGTH`] keeps its tail behind a `...`
/// marker (the tail is the part that identifies the call site).
#[derive(Clone, Copy)]
pub struct ErrorState {
    message: [u8; ERROR_MESSAGE_MAX_LENGTH],
    message_len: usize,
    file: [u8; ERROR_FILE_MAX_LENGTH],
    file_len: usize,
    line_number: u64,
}

impl ErrorState {
    fn new(message: &str, file: &str, line_number: u64) -> Self {
        let mut state = ErrorState {
            message: [0; ERROR_MESSAGE_MAX_LENGTH],
            message_len: 0,
            file: [0; ERROR_FILE_MAX_LENGTH],
            file_len: 0,
            line_number,
        };

        let message = truncate_at_boundary(message, ERROR_MESSAGE_MAX_LENGTH);
        state.message[..message.len()].copy_from_slice(message.as_bytes());
        state.message_len = message.len();

        let (marker, tail) = keep_tail(file, ERROR_FILE_MAX_LENGTH);
        state.file[..marker.len()].copy_from_slice(marker.as_bytes());
        state.file[marker.len()..marker.len() + tail.len()].copy_from_slice(tail.as_bytes());
        state.file_len = marker.len() + tail.len();

        state
    }

    /// The (possibly truncated) error message.
    pub fn message(&self) -> &str {
        // SAFETY: the buffer was filled from a &str on a char boundary.
        unsafe { std::str::from_utf8_unchecked(&self.message[..self.message_len]) }
    }

    /// The (possibly tail-truncated) source file the error was set from.
    pub fn file(&self) -> &str {
        // SAFETY: the buffer was filled from a &str on a char boundary.
        unsafe { std::str::from_utf8_unchecked(&self.file[..self.file_len]) }
    }

    /// Line number the error was set from.
    pub fn line_number(&self) -> u64 {
        self.line_number
    }
}

impl fmt::Debug for ErrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorState")
            .field("message", &self.message())
            .field("file", &self.file())
            .field("line_number", &self.line_number)
            .finish()
    }
}

/// Formatted error string, returned by value.
///
/// Holds `"<message>, at <file>:<line>"` in an inline buffer so that it
/// can be produced without allocating, even under memory pressure.
#[derive(Clone, Copy)]
pub struct ErrorString {
    buf: [u8; ERROR_STRING_MAX_LENGTH],
    len: usize,
}

impl ErrorString {
    fn from_str(s: &str) -> Self {
        let mut out = ErrorString {
            buf: [0; ERROR_STRING_MAX_LENGTH],
            len: 0,
        };
        let s = truncate_at_boundary(s, ERROR_STRING_MAX_LENGTH);
        out.buf[..s.len()].copy_from_slice(s.as_bytes());
        out.len = s.len();
        out
    }

    fn from_state(state: &ErrorState) -> Self {
        let mut out = ErrorString {
            buf: [0; ERROR_STRING_MAX_LENGTH],
            len: 0,
        };
        let mut writer = FixedWriter {
            buf: &mut out.buf,
            len: 0,
        };
        // FixedWriter truncates silently, so formatting cannot fail here.
        let _ = fmt::Write::write_fmt(
            &mut writer,
            format_args!(
                "{}, at {}:{}",
                state.message(),
                state.file(),
                state.line_number
            ),
        );
        out.len = writer.len;
        out
    }

    /// View as a string slice.
    pub fn as_str(&self) -> &str {
        // SAFETY: the buffer was written from &str data on char boundaries.
        unsafe { std::str::from_utf8_unchecked(&self.buf[..self.len]) }
    }
}

impl fmt::Display for ErrorString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ErrorString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl std::ops::Deref for ErrorString {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<&str> for ErrorString {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

// ---------------------------------------------------------------------------
// Thread-local slot
// ---------------------------------------------------------------------------

struct ErrorSlot {
    state: Option<ErrorState>,
    // Formatted form, computed lazily and invalidated on every set.
    formatted: Option<ErrorString>,
}

thread_local! {
    static ERROR_SLOT: RefCell<ErrorSlot> = const {
        RefCell::new(ErrorSlot { state: None, formatted: None })
    };
}

/// Pre-create the calling thread's error slot.
///
/// Optional and idempotent: the slot is otherwise created lazily on first
/// use. The allocator argument is accepted for symmetry with the rest of
/// the library and validated; the slot itself lives inline in thread-local
/// storage and is reclaimed by the runtime at thread exit.
pub fn initialize_error_handling_thread_local_storage(
    allocator: &crate::allocator::AllocHandle,
) -> crate::Result {
    if !allocator.is_valid() {
        // Nothing sensible to record the failure in: the slot may not exist.
        eprintln!("[groundwork.error_handling] invalid allocator, thread-local storage not initialized");
        return Err(ErrorKind::InvalidArgument);
    }
    ERROR_SLOT.with(|_| {});
    Ok(())
}

/// Record an error in the calling thread's slot.
///
/// Overwrites any previous error. When a different error is already set, a
/// diagnostic is written to stderr first; re-setting the same message (or
/// the formatted form of the current state, the propagation idiom) stays
/// silent.
pub fn set_error_state(message: &str, file: &str, line_number: u64) {
    ERROR_SLOT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if let Some(previous) = &slot.state {
            let previous_formatted = ErrorString::from_state(previous);
            if message != previous.message() && message != previous_formatted.as_str() {
                eprintln!(
                    "\n\
                     >>> [groundwork.error_handling] set_error_state()\n\
                     This error state is being overwritten:\n\
                     \n\
                     \x20 '{}'\n\
                     \n\
                     with this new error message:\n\
                     \n\
                     \x20 '{}, at {}:{}'\n\
                     \n\
                     reset_error() should be called after error handling to avoid this.\n\
                     <<<",
                    previous_formatted.as_str(),
                    message,
                    file,
                    line_number
                );
            }
        }
        slot.state = Some(ErrorState::new(message, file, line_number));
        slot.formatted = None;
    });
}

/// Format a message into a fixed buffer, then record it like
/// [`set_error_state`].
///
/// A failure reported by the formatter leaves the current error state
/// untouched and writes a diagnostic to stderr instead.
pub fn set_error_state_fmt(args: fmt::Arguments<'_>, file: &str, line_number: u64) {
    let mut buf = [0u8; ERROR_STRING_MAX_LENGTH];
    let mut writer = FixedWriter {
        buf: &mut buf,
        len: 0,
    };
    if fmt::Write::write_fmt(&mut writer, args).is_err() {
        eprintln!("[groundwork.error_handling] failed to format error message, error state not updated");
        return;
    }
    let len = writer.len;
    // SAFETY: FixedWriter only copies whole char boundaries from &str data.
    let message = unsafe { std::str::from_utf8_unchecked(&buf[..len]) };
    set_error_state(message, file, line_number);
}

/// A copy of the calling thread's error state, if one is set.
pub fn get_error_state() -> Option<ErrorState> {
    ERROR_SLOT.with(|slot| slot.borrow().state)
}

/// The formatted error string, always valid.
///
/// Returns the literal `"error not set"` when no error is recorded.
pub fn get_error_string() -> ErrorString {
    ERROR_SLOT.with(|slot| {
        let mut slot = slot.borrow_mut();
        let slot = &mut *slot;
        match &slot.state {
            None => ErrorString::from_str("error not set"),
            Some(state) => {
                if slot.formatted.is_none() {
                    slot.formatted = Some(ErrorString::from_state(state));
                }
                slot.formatted.unwrap()
            }
        }
    })
}

/// Whether the calling thread has an error recorded.
pub fn error_is_set() -> bool {
    ERROR_SLOT.with(|slot| slot.borrow().state.is_some())
}

/// Clear the calling thread's error state.
pub fn reset_error() {
    ERROR_SLOT.with(|slot| {
        let mut slot = slot.borrow_mut();
        slot.state = None;
        slot.formatted = None;
    });
}

/// Record an error message at the caller's source location.
#[macro_export]
macro_rules! set_error_msg {
    ($msg:expr) => {
        $crate::error::set_error_state($msg, file!(), line!() as u64)
    };
}

/// Format and record an error message at the caller's source location.
#[macro_export]
macro_rules! set_error_fmt {
    ($($arg:tt)*) => {
        $crate::error::set_error_state_fmt(format_args!($($arg)*), file!(), line!() as u64)
    };
}

// ---------------------------------------------------------------------------
// Fixed-buffer formatting
// ---------------------------------------------------------------------------

struct FixedWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl fmt::Write for FixedWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let remaining = self.buf.len() - self.len;
        let s = truncate_at_boundary(s, remaining);
        self.buf[self.len..self.len + s.len()].copy_from_slice(s.as_bytes());
        self.len += s.len();
        // Overflow truncates silently; the buffers are sized so that any
        // overflow only loses trailing context.
        Ok(())
    }
}

/// Longest prefix of `s` that fits in `max` bytes, cut on a char boundary.
fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Tail of `s` fitting `max` bytes, with a `...` marker when truncated.
fn keep_tail(s: &str, max: usize) -> (&'static str, &str) {
    if s.len() <= max {
        return ("", s);
    }
    let marker = "...";
    let mut start = s.len() - (max - marker.len());
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    (marker, &s[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_state_reads_as_not_set() {
        reset_error();
        assert!(!error_is_set());
        assert_eq!(get_error_string().as_str(), "error not set");
        assert!(get_error_state().is_none());
    }

    #[test]
    fn set_and_get_round_trip() {
        reset_error();
        set_error_state("something went wrong", "src/widget.rs", 42);
        assert!(error_is_set());
        let state = get_error_state().unwrap();
        assert_eq!(state.message(), "something went wrong");
        assert_eq!(state.file(), "src/widget.rs");
        assert_eq!(state.line_number(), 42);
        assert_eq!(
            get_error_string().as_str(),
            "something went wrong, at src/widget.rs:42"
        );
        reset_error();
        assert!(!error_is_set());
    }

    #[test]
    fn chained_error_appends_locations() {
        reset_error();
        set_error_state("bad", "a.c", 10);
        assert_eq!(get_error_string().as_str(), "bad, at a.c:10");
        let chained = get_error_string();
        set_error_state(chained.as_str(), "b.c", 20);
        assert_eq!(get_error_string().as_str(), "bad, at a.c:10, at b.c:20");
        reset_error();
    }

    #[test]
    fn message_at_capacity_round_trips() {
        reset_error();
        let exact = "x".repeat(ERROR_MESSAGE_MAX_LENGTH);
        set_error_state(&exact, "f.rs", 1);
        assert_eq!(get_error_state().unwrap().message(), exact.as_str());

        let over = "x".repeat(ERROR_MESSAGE_MAX_LENGTH + 1);
        set_error_state(&over, "f.rs", 1);
        assert_eq!(get_error_state().unwrap().message(), exact.as_str());
        reset_error();
    }

    #[test]
    fn long_file_path_keeps_tail() {
        reset_error();
        let long_path = format!("{}/src/deep/module.rs", "p".repeat(400));
        set_error_state("oops", &long_path, 7);
        let state = get_error_state().unwrap();
        assert!(state.file().starts_with("..."));
        assert!(state.file().ends_with("/src/deep/module.rs"));
        assert!(state.file().len() <= ERROR_FILE_MAX_LENGTH);
        reset_error();
    }

    #[test]
    fn fmt_macro_records_location() {
        reset_error();
        set_error_fmt!("widget {} failed with {}", 3, "timeout");
        let state = get_error_state().unwrap();
        assert_eq!(state.message(), "widget 3 failed with timeout");
        assert!(state.file().ends_with("error.rs"));
        reset_error();
    }

    #[test]
    fn error_state_is_thread_private() {
        reset_error();
        set_error_state("main thread error", "main.rs", 1);
        let handle = std::thread::spawn(|| {
            assert!(!error_is_set());
            set_error_state("worker error", "worker.rs", 2);
            assert_eq!(get_error_state().unwrap().message(), "worker error");
        });
        handle.join().unwrap();
        assert_eq!(get_error_state().unwrap().message(), "main thread error");
        reset_error();
    }

    #[test]
    fn tls_pre_initialization_is_idempotent() {
        let alloc = crate::allocator::AllocHandle::default_allocator();
        assert!(initialize_error_handling_thread_local_storage(&alloc).is_ok());
        assert!(initialize_error_handling_thread_local_storage(&alloc).is_ok());
    }
}
