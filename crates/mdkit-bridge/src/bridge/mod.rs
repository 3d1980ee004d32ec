//! Marshalling bridge between host values and a guest's linear memory.
//!
//! The guest only understands 32-bit offsets into one growable byte array.
//! This module moves text, numbers and opaque handles across that boundary.
//!
//! ## Layers
//!
//! - **Memory**: views re-fetched before every access, with a generation
//!   counter that ticks when the guest grows its memory
//! - **Allocation shim**: places, extends and releases regions through the
//!   guest's own allocator exports
//! - **Text codec**: UTF-8 staging with an ASCII fast path, strict decoding,
//!   and decoder rotation at a configurable byte ceiling
//! - **Reference table**: append-only arena of host values the guest refers to
//!   by handle, seeded with undefined, null, true and false
//! - **Intrinsics**: the closed set of operations the guest calls to build
//!   host values
//! - **Trampolines**: `parse_structured` and `transform_text`
//!
//! ## Usage
//!
//! The module must be built against the `mdkit_host` intrinsic imports;
//! wasm-bindgen glue imports are not provided.
//!
//! ```rust,ignore
//! use mdkit_bridge::{BridgeConfig, BridgeRuntime};
//!
//! let runtime = BridgeRuntime::new(BridgeConfig::default())?;
//! let module = runtime.load_module("mdkit_guest.wasm")?;
//! let mut bridge = runtime.instantiate(&module)?;
//!
//! let ast = bridge.parse_structured("# Title")?;
//! let html = bridge.transform_text("*hi*")?;
//! ```

pub mod alloc;
pub mod codec;
pub mod config;
pub mod extension;
pub mod intrinsics;
pub mod memory;
mod runtime;
pub mod table;
mod trampoline;
pub mod value;

pub use alloc::{AllocStats, AllocationShim};
pub use codec::{pass_string, TextCodec, Utf8Decoder};
pub use config::{BridgeConfig, ExportNames, WEBKIT_DECODE_CEILING};
pub use extension::{Extension, ExtensionHost};
pub use intrinsics::{HostOp, OpOutput};
pub use memory::{BufferStore, LinearMemory, MemoryView, PtrLen};
pub use runtime::{Bridge, BridgeRuntime, BridgeState, GuestModule};
pub use table::{ExternRefTable, Handle, HostValue, MapKey, ResolveLimits};
pub use value::StructuredValue;
