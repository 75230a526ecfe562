//! Multi-source clock abstraction.
//!
//! Three usable time sources: the system (wall) clock, the steady
//! (monotonic) clock, and ROS time, a source that normally follows the
//! system clock but can be overridden with a caller-set value, firing
//! pre/post notification callbacks around every visible change.
//!
//! Time points and durations are signed 64-bit nanosecond counts tagged
//! with the kind of source they came from; mixing kinds is an error, not
//! a silent conversion.

use std::fmt;
use std::sync::{Mutex, OnceLock};

use crate::error::ErrorKind;
use crate::maybe_return_error;

/// Nanoseconds per second.
pub const S_TO_NS: i64 = 1_000_000_000;
/// Nanoseconds per millisecond.
pub const MS_TO_NS: i64 = 1_000_000;

/// Kind of time source a value was sampled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockKind {
    Uninitialized,
    /// System time unless an override is active.
    Ros,
    /// Wall-clock time; subject to user adjustment.
    System,
    /// Monotonic time from an arbitrary origin.
    Steady,
}

impl fmt::Display for ClockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Ros => write!(f, "ros"),
            Self::System => write!(f, "system"),
            Self::Steady => write!(f, "steady"),
        }
    }
}

/// A nanosecond instant tagged with its source kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimePoint {
    pub nanoseconds: i64,
    pub clock_kind: ClockKind,
}

/// A signed nanosecond span tagged with the kind it was measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeDuration {
    pub nanoseconds: i64,
    pub clock_kind: ClockKind,
}

// ---------------------------------------------------------------------------
// Platform clocks
// ---------------------------------------------------------------------------

fn clock_gettime_ns(clock_id: libc::clockid_t) -> crate::Result<i64> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid out-pointer for clock_gettime.
    let rc = unsafe { libc::clock_gettime(clock_id, &mut ts) };
    if rc < 0 {
        crate::set_error_fmt!(
            "failed to read clock: {}",
            std::io::Error::last_os_error()
        );
        return Err(ErrorKind::Error);
    }
    if ts.tv_sec < 0 || ts.tv_nsec < 0 {
        crate::set_error_msg!("unexpected negative time");
        return Err(ErrorKind::Error);
    }
    let seconds: i64 = ts.tv_sec as i64;
    let nanoseconds: i64 = ts.tv_nsec as i64;
    seconds
        .checked_mul(S_TO_NS)
        .and_then(|ns| ns.checked_add(nanoseconds))
        .ok_or_else(|| {
            crate::set_error_msg!("clock value overflows a 64-bit nanosecond count");
            ErrorKind::Error
        })
}

/// Wall-clock nanoseconds since the Unix epoch.
pub fn system_time_now() -> crate::Result<i64> {
    clock_gettime_ns(libc::CLOCK_REALTIME)
}

thread_local! {
    static LAST_STEADY_SAMPLE: std::cell::Cell<i64> = const { std::cell::Cell::new(i64::MIN) };
}

/// Monotonic nanoseconds from an implementation-defined origin.
///
/// Each thread checks its own consecutive samples; a backwards step is
/// reported as an error rather than returned.
pub fn steady_time_now() -> crate::Result<i64> {
    let now = clock_gettime_ns(libc::CLOCK_MONOTONIC)?;
    LAST_STEADY_SAMPLE.with(|last| {
        if now < last.get() {
            crate::set_error_msg!("non-monotonic steady time");
            return Err(ErrorKind::Error);
        }
        last.set(now);
        Ok(())
    })?;
    Ok(now)
}

/// `finish - start`, requiring both points to share a source kind.
///
/// The resulting duration inherits that kind; its sign follows the
/// ordering of the inputs.
pub fn difference_times(start: &TimePoint, finish: &TimePoint) -> crate::Result<TimeDuration> {
    if start.clock_kind != finish.clock_kind {
        crate::set_error_msg!("cannot take the difference of time points from different clocks");
        return Err(ErrorKind::InvalidArgument);
    }
    let nanoseconds = finish
        .nanoseconds
        .checked_sub(start.nanoseconds)
        .ok_or_else(|| {
            crate::set_error_msg!("time point difference overflows");
            ErrorKind::Error
        })?;
    Ok(TimeDuration {
        nanoseconds,
        clock_kind: start.clock_kind,
    })
}

// ---------------------------------------------------------------------------
// Clock sources
// ---------------------------------------------------------------------------

/// Callback fired around ROS-time changes; runs on the caller's thread.
pub type UpdateCallback = Box<dyn Fn() + Send>;

#[derive(Default)]
struct RosState {
    override_enabled: bool,
    override_value: i64,
    pre_update: Option<UpdateCallback>,
    post_update: Option<UpdateCallback>,
}

/// A time source of a particular [`ClockKind`].
///
/// System and steady sources are stateless reads of the platform clocks.
/// A ROS source adds the override machinery behind an internal lock, so a
/// shared source is usable from several threads; the callbacks run on
/// whichever thread performs the change.
pub struct ClockSource {
    kind: ClockKind,
    ros: Option<Mutex<RosState>>,
}

impl ClockSource {
    /// Create a source of the given kind.
    pub fn new(kind: ClockKind) -> crate::Result<Self> {
        maybe_return_error!(Err(ErrorKind::Error));
        match kind {
            ClockKind::Uninitialized => {
                crate::set_error_msg!("cannot initialize a clock source without a kind");
                Err(ErrorKind::InvalidArgument)
            }
            ClockKind::Ros => Ok(ClockSource {
                kind,
                ros: Some(Mutex::new(RosState::default())),
            }),
            ClockKind::System | ClockKind::Steady => Ok(ClockSource { kind, ros: None }),
        }
    }

    /// A system-time source.
    pub fn system() -> crate::Result<Self> {
        Self::new(ClockKind::System)
    }

    /// A steady-time source.
    pub fn steady() -> crate::Result<Self> {
        Self::new(ClockKind::Steady)
    }

    /// A ROS-time source with the override disabled.
    pub fn ros() -> crate::Result<Self> {
        Self::new(ClockKind::Ros)
    }

    /// Tear the source down; it reads as invalid afterwards.
    pub fn fini(&mut self) {
        self.kind = ClockKind::Uninitialized;
        self.ros = None;
    }

    /// True once initialized with a usable kind.
    pub fn is_valid(&self) -> bool {
        self.kind != ClockKind::Uninitialized
    }

    pub fn kind(&self) -> ClockKind {
        self.kind
    }

    /// Sample the source.
    pub fn now(&self) -> crate::Result<TimePoint> {
        let nanoseconds = match self.kind {
            ClockKind::Uninitialized => {
                crate::set_error_msg!("clock source is not initialized");
                return Err(ErrorKind::InvalidArgument);
            }
            ClockKind::System => system_time_now()?,
            ClockKind::Steady => steady_time_now()?,
            ClockKind::Ros => {
                let state = self.ros_state()?.lock().unwrap();
                if state.override_enabled {
                    state.override_value
                } else {
                    drop(state);
                    system_time_now()?
                }
            }
        };
        Ok(TimePoint {
            nanoseconds,
            clock_kind: self.kind,
        })
    }

    fn ros_state(&self) -> crate::Result<&Mutex<RosState>> {
        match &self.ros {
            Some(state) if self.kind == ClockKind::Ros => Ok(state),
            _ => {
                crate::set_error_msg!("operation is only valid on a ros clock source");
                Err(ErrorKind::InvalidArgument)
            }
        }
    }

    /// Register the callbacks fired around ROS-time changes.
    ///
    /// `pre` runs before a change becomes visible, `post` after it has.
    pub fn set_on_update_callbacks(
        &self,
        pre: Option<UpdateCallback>,
        post: Option<UpdateCallback>,
    ) -> crate::Result {
        let mut state = self.ros_state()?.lock().unwrap();
        state.pre_update = pre;
        state.post_update = post;
        Ok(())
    }

    /// Switch the source to the cached override value.
    pub fn enable_ros_time_override(&self) -> crate::Result {
        let mut state = self.ros_state()?.lock().unwrap();
        if !state.override_enabled {
            if let Some(pre) = &state.pre_update {
                pre();
            }
            state.override_enabled = true;
            if let Some(post) = &state.post_update {
                post();
            }
        }
        Ok(())
    }

    /// Switch the source back to system time.
    pub fn disable_ros_time_override(&self) -> crate::Result {
        let mut state = self.ros_state()?.lock().unwrap();
        if state.override_enabled {
            if let Some(pre) = &state.pre_update {
                pre();
            }
            state.override_enabled = false;
            if let Some(post) = &state.post_update {
                post();
            }
        }
        Ok(())
    }

    /// Whether the override is active.
    pub fn is_ros_time_override_enabled(&self) -> crate::Result<bool> {
        Ok(self.ros_state()?.lock().unwrap().override_enabled)
    }

    /// Set the override value.
    ///
    /// While the override is enabled this is a visible time change:
    /// `pre_update` fires, the value is published, `post_update` fires.
    /// While disabled only the cached value is updated, silently.
    pub fn set_ros_time_override(&self, value: i64) -> crate::Result {
        let mut state = self.ros_state()?.lock().unwrap();
        if state.override_enabled {
            if let Some(pre) = &state.pre_update {
                pre();
            }
            state.override_value = value;
            if let Some(post) = &state.post_update {
                post();
            }
        } else {
            state.override_value = value;
        }
        Ok(())
    }
}

impl fmt::Debug for ClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockSource").field("kind", &self.kind).finish()
    }
}

/// Process-wide default system source.
pub fn system_clock() -> &'static ClockSource {
    static CLOCK: OnceLock<ClockSource> = OnceLock::new();
    CLOCK.get_or_init(|| ClockSource {
        kind: ClockKind::System,
        ros: None,
    })
}

/// Process-wide default steady source.
pub fn steady_clock() -> &'static ClockSource {
    static CLOCK: OnceLock<ClockSource> = OnceLock::new();
    CLOCK.get_or_init(|| ClockSource {
        kind: ClockKind::Steady,
        ros: None,
    })
}

/// Process-wide default ROS source.
pub fn ros_clock() -> &'static ClockSource {
    static CLOCK: OnceLock<ClockSource> = OnceLock::new();
    CLOCK.get_or_init(|| ClockSource {
        kind: ClockKind::Ros,
        ros: Some(Mutex::new(RosState::default())),
    })
}

/// Sample the process-wide default source of the given kind.
pub fn now_from_kind(kind: ClockKind) -> crate::Result<TimePoint> {
    match kind {
        ClockKind::System => system_clock().now(),
        ClockKind::Steady => steady_clock().now(),
        ClockKind::Ros => ros_clock().now(),
        ClockKind::Uninitialized => {
            crate::set_error_msg!("no default clock for the uninitialized kind");
            Err(ErrorKind::InvalidArgument)
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamp formatting
// ---------------------------------------------------------------------------

/// Write a time point as zero-padded decimal seconds (`ssssssssss.nnnnnnnnn`).
pub fn time_point_value_as_seconds_string(
    time_point: i64,
    out: &mut dyn fmt::Write,
) -> crate::Result {
    let magnitude = time_point.unsigned_abs();
    let seconds = magnitude / S_TO_NS as u64;
    let nanoseconds = magnitude % S_TO_NS as u64;
    let sign = if time_point < 0 { "-" } else { "" };
    write!(out, "{sign}{seconds:010}.{nanoseconds:09}").map_err(|_| {
        crate::set_error_msg!("failed to format time point as seconds");
        ErrorKind::Error
    })
}

/// Write a time point as a zero-padded decimal nanosecond count.
pub fn time_point_value_as_nanoseconds_string(
    time_point: i64,
    out: &mut dyn fmt::Write,
) -> crate::Result {
    let sign = if time_point < 0 { "-" } else { "" };
    let magnitude = time_point.unsigned_abs();
    write!(out, "{sign}{magnitude:019}").map_err(|_| {
        crate::set_error_msg!("failed to format time point as nanoseconds");
        ErrorKind::Error
    })
}

/// Write a time point as a local-time date with millisecond resolution
/// (`YYYY-MM-DD HH:MM:SS.mmm`).
pub fn time_point_value_as_date_string(
    time_point: i64,
    out: &mut dyn fmt::Write,
) -> crate::Result {
    let magnitude = time_point.unsigned_abs();
    let seconds = (magnitude / S_TO_NS as u64) as libc::time_t;
    let milliseconds = (magnitude % S_TO_NS as u64) / MS_TO_NS as u64;

    // SAFETY: localtime_r fills the provided tm; zeroed tm is a valid
    // out-parameter.
    let tm = unsafe {
        let mut tm: libc::tm = std::mem::zeroed();
        if libc::localtime_r(&seconds, &mut tm).is_null() {
            crate::set_error_msg!("failed to convert time point to local time");
            return Err(ErrorKind::Error);
        }
        tm
    };

    write!(
        out,
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec,
        milliseconds
    )
    .map_err(|_| {
        crate::set_error_msg!("failed to format time point as date");
        ErrorKind::Error
    })
}
