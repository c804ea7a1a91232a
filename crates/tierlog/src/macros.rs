//! Leveled write macros over the process-wide handle.
//!
//! Each macro takes `format!`-style arguments and evaluates to
//! `tierlog::Result<()>`, except `panic!` and `fatal!`, which never return.

/// Log at an explicit level through the installed logger
#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)+) => {
        $crate::facade::log($level, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {
        $crate::facade::log($crate::Level::Debug, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => {
        $crate::facade::log($crate::Level::Info, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {
        $crate::facade::log($crate::Level::Warn, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {
        $crate::facade::log($crate::Level::Error, format_args!($($arg)+))
    };
}

/// Logged with a stacktrace; does not terminate
#[macro_export]
macro_rules! dpanic {
    ($($arg:tt)+) => {
        $crate::facade::log($crate::Level::DPanic, format_args!($($arg)+))
    };
}

/// Log at panic level, then unwind with the message
#[macro_export]
macro_rules! panic {
    ($($arg:tt)+) => {
        $crate::facade::escalate($crate::Level::Panic, format_args!($($arg)+))
    };
}

/// Log at fatal level, sync every sink, then exit with status 1
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {
        $crate::facade::escalate($crate::Level::Fatal, format_args!($($arg)+))
    };
}
