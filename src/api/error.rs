//! Allocator error taxonomy.

use std::fmt;

/// Errors reported by the fallible (`try_*`) allocator API.
///
/// The null-returning wrappers collapse every variant into a null pointer;
/// callers that need the reason use the `try_*` form.
#[derive(Debug)]
pub enum AllocError {
    /// Every pool and the fallback heap refused the request.
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
    },
    /// Alignment was zero or not a power of two.
    InvalidAlignment {
        /// The rejected alignment.
        alignment: usize,
    },
    /// The address is not in the allocation table.
    UnknownAddress {
        /// The address that was looked up.
        address: usize,
    },
    /// Link requested on a block that is not `Free`.
    AlreadyLinked {
        /// The block that is already part of a pair.
        address: usize,
    },
    /// Link operation on a block that has never been linked.
    NotLinked {
        /// The block that has no link state.
        address: usize,
    },
    /// The requested NUMA node does not exist or NUMA is unsupported.
    NumaUnavailable {
        /// Node that was requested.
        node: usize,
    },
    /// Configuration rejected by [`AllocConfig::validate`](crate::AllocConfig::validate).
    InvalidConfig(&'static str),
    /// The allocator has been shut down.
    ShutDown,
    /// Writing a diagnostic dump failed.
    Io(std::io::Error),
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::OutOfMemory { size } => {
                write!(f, "out of memory allocating {} bytes", size)
            }
            AllocError::InvalidAlignment { alignment } => {
                write!(f, "alignment {} is not a power of two", alignment)
            }
            AllocError::UnknownAddress { address } => {
                write!(f, "address {:#x} was not returned by this allocator", address)
            }
            AllocError::AlreadyLinked { address } => {
                write!(f, "block {:#x} is already linked", address)
            }
            AllocError::NotLinked { address } => write!(f, "block {:#x} is not linked", address),
            AllocError::NumaUnavailable { node } => {
                write!(f, "NUMA node {} is not available", node)
            }
            AllocError::InvalidConfig(reason) => write!(f, "invalid configuration: {}", reason),
            AllocError::ShutDown => write!(f, "allocator has been shut down"),
            AllocError::Io(err) => write!(f, "memory map dump failed: {}", err),
        }
    }
}

impl std::error::Error for AllocError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AllocError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AllocError {
    fn from(err: std::io::Error) -> Self {
        AllocError::Io(err)
    }
}

/// Result alias for allocator operations.
pub type AllocResult<T> = Result<T, AllocError>;
