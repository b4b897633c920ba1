use thiserror::Error;

macro_rules! malformed_error {
    // Single string version, inline captures allowed
    ($msg:literal) => {
        crate::Error::Malformed {
            message: format!($msg),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! invalid_cfg {
    ($fmt:expr) => {
        crate::Error::InvalidCfg(format!($fmt))
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidCfg(format!($fmt, $($arg)*))
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Only fatal conditions are errors. A call site that the inliner decides not to inline is not
/// an error; those decisions are reported as [`crate::compiler::Rejection`] values and counted
/// in the inliner statistics.
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::Malformed`] - Structurally invalid linear code (dangling label, bad catch chain)
/// - [`Error::Parse`] - The textual S-expression IR could not be parsed
/// - [`Error::NotFound`] - A reference or definition is missing from the context
///
/// ## Invariant Violations
/// - [`Error::InvalidCfg`] - The control-flow graph is inconsistent (corrupted edge lists,
///   illegal block shape, try regions that cannot be materialized)
///
/// ## Engine Errors
/// - [`Error::Scheduler`] - A scheduled task failed; reported at join time
/// - [`Error::LockError`] - Thread synchronization failure
///
/// # Examples
///
/// ```rust
/// use redex::{Error, ir::parse_code, model::DexContext};
///
/// let ctx = DexContext::new();
/// match parse_code(&ctx, "((goto :nowhere))") {
///     Ok(_) => println!("parsed"),
///     Err(Error::Malformed { message, .. }) => eprintln!("bad code: {}", message),
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The linear code is damaged and could not be turned into a graph.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The control-flow graph violates one of its invariants.
    ///
    /// These are bugs in a transformation, never recoverable conditions. Linearization
    /// refuses to emit code from a graph whose throw edges cannot be expressed as try
    /// regions.
    #[error("Invalid CFG: {0}")]
    InvalidCfg(String),

    /// The textual IR could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A reference or definition was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A scheduled task failed.
    ///
    /// The first failure aborts the remaining tasks and is surfaced when the scheduler
    /// joins.
    #[error("Scheduler: {0}")]
    Scheduler(String),

    /// Failed to lock target.
    ///
    /// This error occurs when thread synchronization fails, typically due to
    /// lock poisoning or other concurrency issues.
    #[error("Failed to lock target")]
    LockError,

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
