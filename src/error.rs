//! The error taxonomy returned by every fallible operation in this crate.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Errors returned by the worker lifecycle, submission, and introspection APIs.
///
/// Values are stable within a release: callers are expected to match on
/// individual variants rather than treat the enum as opaque.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Attempted to destroy a worker that is already terminal, or whose
    /// teardown is being driven by a thread not in `SayingBye`. Indicates a
    /// program bug: the caller must stop reusing the handle.
    #[error("worker was destroyed twice")]
    DoubleFree,

    /// Submission against a worker past `Alive`; the caller must stop using
    /// the handle.
    #[error("worker handle is no longer valid")]
    InvalidHandle,

    /// Tried to install a second worker on a thread that is already serving
    /// as one.
    #[error("thread is already serving a worker")]
    AlreadyServing,

    /// A timed operation received an ill-formed deadline (e.g. one already
    /// in the past relative to a monotonic clock that cannot represent it).
    #[error("invalid deadline")]
    InvalidTime,

    /// A timed operation's deadline passed before the teardown it was
    /// waiting on finished; the teardown itself continues asynchronously.
    #[error("operation timed out before the worker finished tearing down")]
    Expired,

    /// A synchronous destroy observed another thread already inside
    /// `on_terminate`; the effective outcome is the same as an asynchronous
    /// destroy.
    #[error("another thread is already tearing down this worker")]
    NotAlone,

    /// Allocation failed.
    #[error("allocation failed")]
    NoMemory,

    /// The OS refused to create a new thread.
    #[error("failed to create worker thread")]
    ThreadCreate,

    /// The wake pipe could not be written to or read from; the worker may
    /// now be `Zombie`. Retry via `ping`, or accept the worker as leaked.
    #[error("wake channel signal failed")]
    Signal,

    /// An OS or library primitive returned something that should not be
    /// possible; treat as fatal.
    #[error("unexpected failure from an OS primitive")]
    Unknown,

    /// An internal invariant was violated. Unreachable in a correct
    /// implementation; reported rather than panicking so that a caller can
    /// at least log and abort deliberately.
    #[error("internal invariant violated: {0}")]
    InternalBug(&'static str),
}
