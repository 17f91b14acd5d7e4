//! Error types for the platform interrupt and timer subsystem.
//!
//! Probe-time failures (`MapError`, `UnresolvedResource`, `NoIrq`,
//! `AlreadyInitialized`) abort the registration of the device that raised
//! them. Everything else is surfaced to the caller of the failing operation.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A register window could not be resolved to a mapped region.
    MapError {
        phys: usize,
        size: usize,
    },
    /// The discovery layer did not supply a required resource.
    UnresolvedResource {
        device: &'static str,
        resource: &'static str,
    },
    /// The discovery layer did not supply an interrupt line.
    NoIrq {
        device: &'static str,
    },
    /// A caller-supplied value lies outside what the hardware supports.
    OutOfRange {
        name: &'static str,
        value: u64,
        max: u64,
    },
    /// A once-only probe or registration ran a second time.
    AlreadyInitialized {
        subsystem: &'static str,
    },
    NotInitialized {
        subsystem: &'static str,
    },
    OperationNotSupported {
        operation: &'static str,
    },
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    AlreadyExists {
        resource: &'static str,
        id: u64,
    },
    NotFound {
        resource: &'static str,
        id: u64,
    },
    ResourceExhausted {
        resource: &'static str,
    },
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MapError { phys, size } => {
                write!(
                    f,
                    "Unable to map register window 0x{:x} (+0x{:x})",
                    phys, size
                )
            }
            Self::UnresolvedResource { device, resource } => {
                write!(f, "{}: unable to resolve {}", device, resource)
            }
            Self::NoIrq { device } => write!(f, "{}: no interrupt line", device),
            Self::OutOfRange { name, value, max } => {
                write!(f, "'{}' out of range: {} (max {})", name, value, max)
            }
            Self::AlreadyInitialized { subsystem } => {
                write!(f, "{} already initialized", subsystem)
            }
            Self::NotInitialized { subsystem } => write!(f, "{} not initialized", subsystem),
            Self::OperationNotSupported { operation } => {
                write!(f, "Operation not supported: {}", operation)
            }
            Self::InvalidState { expected, actual } => {
                write!(f, "Invalid state: expected {}, got {}", expected, actual)
            }
            Self::AlreadyExists { resource, id } => {
                write!(f, "{} with id {} already exists", resource, id)
            }
            Self::NotFound { resource, id } => write!(f, "{} with id {} not found", resource, id),
            Self::ResourceExhausted { resource } => write!(f, "Resource exhausted: {}", resource),
        }
    }
}
