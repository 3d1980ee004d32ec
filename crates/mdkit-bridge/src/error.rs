//! Error types for the bridge crate.

use thiserror::Error;

/// Bridge error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// Bytes read out of linear memory were not valid UTF-8
    #[error("invalid UTF-8 in guest string: valid up to byte {valid_up_to} of {len}")]
    Decode {
        /// Length of the longest valid prefix
        valid_up_to: usize,
        /// Total length of the decoded region
        len: usize,
    },

    /// The guest allocator could not satisfy a request
    #[error("guest allocation of {requested} bytes failed: {reason}")]
    AllocationFailure {
        /// Requested size in bytes
        requested: u32,
        /// What the allocator reported
        reason: String,
    },

    /// The guest invoked the raise intrinsic
    #[error("{0}")]
    ModuleRaised(String),

    /// The guest trapped outside the raise intrinsic
    #[error("guest trapped: {0}")]
    Trap(String),

    /// A required export is absent from the module
    #[error("module export '{0}' not found")]
    MissingExport(String),

    /// Engine, link or instantiation failure
    #[error("WASM error: {0}")]
    Wasm(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A pointer/length pair falls outside the current memory view
    #[error("region {offset}+{len} outside linear memory of {memory_len} bytes")]
    OutOfBounds {
        /// Start offset of the region
        offset: u32,
        /// Region length
        len: u32,
        /// Byte length of the view that was consulted
        memory_len: usize,
    },

    /// Handle does not name a table entry
    #[error("invalid reference handle {0}")]
    InvalidHandle(u32),

    /// Handle names an entry of the wrong kind for the operation
    #[error("reference handle {handle} is not {expected}")]
    InvalidTarget {
        /// Offending handle
        handle: u32,
        /// Kind the operation required
        expected: &'static str,
    },

    /// A composite value reaches itself
    #[error("reference handle {0} is part of a cycle")]
    CyclicValue(u32),

    /// A value nests composites deeper than the configured limit
    #[error("value nests deeper than {max_depth} levels")]
    ValueTooDeep {
        /// Configured depth limit
        max_depth: usize,
    },

    /// A value expands to more nodes than the configured budget
    #[error("value expands to more than {max_nodes} nodes")]
    ValueTooLarge {
        /// Configured node budget
        max_nodes: usize,
    },
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Recover a bridge error from a failed guest call.
    ///
    /// Host intrinsics return `BridgeError` values that wasmtime carries
    /// through the guest as traps; those are unwrapped unchanged. Any other
    /// failure is reported as a guest trap.
    pub fn from_guest_call(err: wasmtime::Error) -> Self {
        match err.downcast::<BridgeError>() {
            Ok(bridge_err) => bridge_err,
            Err(err) => match err.downcast_ref::<wasmtime::Trap>() {
                Some(trap) => BridgeError::Trap(trap.to_string()),
                None => BridgeError::Trap(format!("{:#}", err)),
            },
        }
    }
}
