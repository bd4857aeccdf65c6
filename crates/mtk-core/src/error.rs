//! Error taxonomy shared by every module in the kernel.
//!
//! One enum variant per error kind named in `spec.md` §7. Modules that want a
//! narrower error surface (e.g. [`crate::fifo::FifoError`]) define their own
//! `thiserror` enum and convert into [`KernelError`] at the boundary where
//! callers need a uniform type (e.g. the endpoint's open/close path).

use thiserror::Error;

/// Uniform error type for operations that cross module boundaries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Unrecoverable condition; the caller should tear down and not retry.
    #[error("fatal error")]
    Fatal,
    /// A bounded allocation (pool growth, buffer) could not be satisfied.
    #[error("not enough memory")]
    NotEnoughMemory,
    /// The underlying allocator returned an error.
    #[error("allocation failed")]
    AllocationFailed,
    /// `std::thread::Builder::spawn` failed.
    #[error("failed to create thread")]
    CreateThreadFailed,
    /// Opening a socket or other resource failed.
    #[error("open failed")]
    OpenFailed,
    /// Could not read back the bound local port.
    #[error("get port failed")]
    GetPortFailed,
    /// A send/write syscall failed.
    #[error("send failed")]
    SendFailed,
    /// A caller-supplied parameter violated a precondition.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    /// A payload failed structural validation.
    #[error("invalid payload")]
    InvalidPayload,
    /// A fixed-size buffer could not hold the requested data.
    #[error("buffer overflow")]
    BufferOverflow,
    /// A probe packet had a size that matches neither protocol version.
    #[error("probe packet has invalid size")]
    ProbePacketInvalidSize,
    /// The endpoint's receive path hit a recoverable error (logged, retried).
    #[error("rx payload error")]
    RxPayloadError,
    /// Recoverable condition; caller may retry or ignore.
    #[error("non-fatal error")]
    NonFatal,
    /// The caller is being asked to slow down (backpressure).
    #[error("throttling")]
    Throttling,
}

/// Convenience alias used throughout the kernel.
pub type Result<T> = std::result::Result<T, KernelError>;
