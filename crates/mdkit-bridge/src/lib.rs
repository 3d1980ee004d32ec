//! # mdkit bridge
//!
//! Host side of the mdkit markdown engine compiled to WebAssembly.
//!
//! The engine runs inside a wasmtime sandbox and sees only its linear memory.
//! This crate stages host text into that memory, lets the guest build host
//! values through a fixed set of intrinsics, and hands results back as owned
//! Rust values.
//!
//! ## Quick Start
//!
//! The guest must import its intrinsics from the `mdkit_host` namespace (see
//! [`bridge::intrinsics`]) and export the allocator trio plus the two entry
//! points named in [`bridge::ExportNames`]. A stock wasm-bindgen build links
//! against hashed `__wbg_*` glue imports instead and will not instantiate.
//!
//! ```rust,ignore
//! use mdkit_bridge::{BridgeConfig, BridgeRuntime};
//!
//! let runtime = BridgeRuntime::new(BridgeConfig::webkit_compat())?;
//! let module = runtime.load_module("mdkit_guest.wasm")?;
//! let mut bridge = runtime.instantiate(&module)?;
//!
//! let ast = bridge.parse_structured("# Hello")?;
//! println!("{}", ast.to_json());
//!
//! let html = bridge.transform_text("**bold**")?;
//! ```
//!
//! See [`bridge`] for the layering.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod error;

// Re-export main types
pub use bridge::{
    Bridge, BridgeConfig, BridgeRuntime, Extension, ExternRefTable, GuestModule, Handle,
    StructuredValue,
};
pub use error::{BridgeError, Result};
