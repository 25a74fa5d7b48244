//! # Error Handling
//!
//! Error types for the importance engine.
//!
//! Passes themselves never fail: missing signals fall back to the least
//! important default, cycles converge, and clamp violations are clamped.
//! Errors only surface from the registry surface (registering processes,
//! adding bindings, tuning configuration) and from non-blocking pass
//! attempts that lose the race for the graph lock.
//!
//! ## Error Categories
//!
//! | Category | Range | Recoverable | Example |
//! |----------|-------|-------------|---------|
//! | Registry | 100-199 | No | Binding to an unregistered pid |
//! | Configuration | 200-299 | No | Zero cached process limit |
//! | Pass | 300-399 | `WouldBlock` only | Graph lock held by another pass |

use core::fmt;

use alloc::string::String;

use crate::process::Pid;

// =============================================================================
// ERROR KIND
// =============================================================================

/// Classification of engine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorKind {
    // -------------------------------------------------------------------------
    // Registry Errors (100-199)
    // -------------------------------------------------------------------------
    /// No process registered under the pid
    ProcessNotFound      = 100,
    /// A process with the same pid is already registered
    ProcessExists        = 101,
    /// No binding registered under the id
    BindingNotFound      = 102,
    /// Binding endpoints or kind are malformed
    InvalidBinding       = 103,

    // -------------------------------------------------------------------------
    // Configuration Errors (200-299)
    // -------------------------------------------------------------------------
    /// Configuration value out of range
    InvalidConfig        = 200,

    // -------------------------------------------------------------------------
    // Pass Errors (300-399)
    // -------------------------------------------------------------------------
    /// Graph lock is held and the caller asked not to wait
    WouldBlock           = 300,
    /// Internal invariant violated
    InvariantViolation   = 301,
}

impl ErrorKind {
    /// Get the error category name
    pub const fn category(&self) -> &'static str {
        match *self as u32 {
            100..=199 => "Registry",
            200..=299 => "Configuration",
            300..=399 => "Pass",
            _ => "Unknown",
        }
    }

    /// Check if retrying the same call can succeed
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, ErrorKind::WouldBlock)
    }

    /// Check if the error indicates a bug in the engine
    pub const fn is_critical(&self) -> bool {
        matches!(self, ErrorKind::InvariantViolation)
    }

    /// Default message for the kind
    pub const fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::ProcessNotFound => "Process not found",
            ErrorKind::ProcessExists => "Process already registered",
            ErrorKind::BindingNotFound => "Binding not found",
            ErrorKind::InvalidBinding => "Invalid binding",
            ErrorKind::InvalidConfig => "Invalid configuration",
            ErrorKind::WouldBlock => "Graph lock busy",
            ErrorKind::InvariantViolation => "Invariant violation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// IMPORTANCE ERROR
// =============================================================================

/// Engine error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportanceError {
    /// Error classification
    kind: ErrorKind,
    /// Human-readable message
    message: &'static str,
    /// Process the error refers to
    pid: Option<Pid>,
    /// Optional detailed message (heap allocated)
    details: Option<String>,
}

impl ImportanceError {
    /// Create new error with kind and message
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self {
            kind,
            message,
            pid: None,
            details: None,
        }
    }

    /// Create error from kind with default message
    pub const fn from_kind(kind: ErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }

    /// Attach the offending pid
    pub fn with_pid(mut self, pid: Pid) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Add details to error
    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }

    /// Get error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get message
    pub fn message(&self) -> &str {
        self.message
    }

    /// Get pid
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// Get details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Check if recoverable
    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }
}

impl fmt::Display for ImportanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.category(), self.message)?;

        if let Some(ref details) = self.details {
            write!(f, ": {}", details)?;
        }

        if let Some(pid) = self.pid {
            write!(f, " (pid: {})", pid)?;
        }

        Ok(())
    }
}

impl From<ErrorKind> for ImportanceError {
    fn from(kind: ErrorKind) -> Self {
        Self::from_kind(kind)
    }
}

/// Result type for engine operations
pub type ImportanceResult<T> = Result<T, ImportanceError>;

// =============================================================================
// MACROS
// =============================================================================

/// Create an engine error
#[macro_export]
macro_rules! importance_error {
    ($kind:expr, $msg:literal) => {
        $crate::error::ImportanceError::new($kind, $msg)
    };
    ($kind:expr, $msg:literal, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::error::ImportanceError::new($kind, $msg)
            .with_details(::alloc::format!($fmt $(, $arg)*))
    };
    // message doubles as the details format
    ($kind:expr, $msg:literal, $($arg:expr),+ $(,)?) => {
        $crate::error::ImportanceError::new($kind, $msg)
            .with_details(::alloc::format!($msg, $($arg),+))
    };
}

/// Return early with an error
#[macro_export]
macro_rules! importance_bail {
    ($kind:expr, $msg:literal) => {
        return Err($crate::importance_error!($kind, $msg))
    };
    ($kind:expr, $msg:literal, $($arg:tt)*) => {
        return Err($crate::importance_error!($kind, $msg, $($arg)*))
    };
}

/// Ensure a condition is true, otherwise return error
#[macro_export]
macro_rules! importance_ensure {
    ($cond:expr, $kind:expr, $msg:literal) => {
        if !$cond {
            $crate::importance_bail!($kind, $msg);
        }
    };
    ($cond:expr, $kind:expr, $msg:literal, $($arg:tt)*) => {
        if !$cond {
            $crate::importance_bail!($kind, $msg, $($arg)*);
        }
    };
}

cfg_if::cfg_if! {
    if #[cfg(debug_assertions)] {
        /// Report a broken internal invariant. Development builds stop here.
        pub(crate) fn report_invariant(args: fmt::Arguments<'_>) {
            panic!("importance invariant violated: {}", args);
        }
    } else {
        /// Report a broken internal invariant. The caller skips the offending item.
        pub(crate) fn report_invariant(args: fmt::Arguments<'_>) {
            log::error!("importance invariant violated: {}", args);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
