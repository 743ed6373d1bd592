/// Debug output on the `beacon` log target.
#[macro_export]
#[doc(hidden)]
macro_rules! beacon_debug {
    ($($arg:tt)*) => {
        ::log::debug!(target: "beacon", $($arg)*)
    }
}

/// Logs an absorbed failure at warn level.
///
/// Recording and submission never report failures to the caller; this is the
/// single place they surface.
#[macro_export]
#[doc(hidden)]
macro_rules! beacon_warn {
    ($($arg:tt)*) => {
        ::log::warn!(target: "beacon", $($arg)*)
    }
}

/// Panics in debug builds and logs through `beacon_warn!` in non-debug builds.
#[macro_export]
#[doc(hidden)]
macro_rules! debug_panic_or_log {
    ($($arg:tt)*) => {{
        #[cfg(debug_assertions)]
        panic!($($arg)*);

        #[cfg(not(debug_assertions))]
        $crate::beacon_warn!($($arg)*);
    }};
}

/// If the condition is false, panics in debug builds and logs in non-debug builds.
#[macro_export]
#[doc(hidden)]
macro_rules! debug_assert_or_log {
    ($cond:expr $(,)?) => {{
        let condition = $cond;
        if !condition {
            $crate::debug_panic_or_log!("assertion failed: {}", stringify!($cond));
        }
    }};
    ($cond:expr, $($arg:tt)+) => {{
        let condition = $cond;
        if !condition {
            $crate::debug_panic_or_log!($($arg)+);
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn debug_assert_or_log_does_not_panic_when_condition_holds() {
        crate::debug_assert_or_log!(2 + 2 == 4, "should not panic");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "assertion failed: 1 == 2")]
    fn debug_assert_or_log_panics_with_default_message_when_condition_fails() {
        crate::debug_assert_or_log!(1 == 2);
    }
}
