//! Process environment accessors.
//!
//! The interface the logger (and any other configurable component)
//! consumes from the platform. An unset variable reads as the empty
//! string, so callers only have to distinguish "configured" from
//! "not configured" by content.

/// Read an environment variable.
///
/// Unset variables yield `Ok("")`. The error string describes why the
/// value could not be read (currently: non-Unicode content or an invalid
/// name).
pub fn get_env(name: &str) -> Result<String, &'static str> {
    if name.is_empty() {
        return Err("environment variable name is empty");
    }
    match std::env::var(name) {
        Ok(value) => Ok(value),
        Err(std::env::VarError::NotPresent) => Ok(String::new()),
        Err(std::env::VarError::NotUnicode(_)) => {
            Err("environment variable value is not valid unicode")
        }
    }
}

/// Set (`Some`) or unset (`None`) an environment variable.
///
/// Returns false when the name is unusable. Like all process-environment
/// mutation, this is inherently racy against concurrent reads from other
/// threads; it exists for configuration at startup and for tests.
pub fn set_env(name: &str, value: Option<&str>) -> bool {
    if name.is_empty() || name.contains('=') || name.contains('\0') {
        return false;
    }
    if let Some(value) = value {
        if value.contains('\0') {
            return false;
        }
        // SAFETY: single-process configuration contract; see above.
        unsafe { std::env::set_var(name, value) };
    } else {
        // SAFETY: single-process configuration contract; see above.
        unsafe { std::env::remove_var(name) };
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variable_reads_empty() {
        assert_eq!(get_env("GROUNDWORK_TEST_ENV_SURELY_UNSET").unwrap(), "");
    }

    #[test]
    fn set_then_get_then_unset() {
        assert!(set_env("GROUNDWORK_TEST_ENV_RT", Some("on")));
        assert_eq!(get_env("GROUNDWORK_TEST_ENV_RT").unwrap(), "on");
        assert!(set_env("GROUNDWORK_TEST_ENV_RT", None));
        assert_eq!(get_env("GROUNDWORK_TEST_ENV_RT").unwrap(), "");
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(get_env("").is_err());
        assert!(!set_env("", Some("x")));
        assert!(!set_env("A=B", Some("x")));
        assert!(!set_env("NUL\0NAME", Some("x")));
    }
}
