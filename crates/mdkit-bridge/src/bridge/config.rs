//! Configuration for the host bridge.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::table::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_NODES};
use crate::error::{BridgeError, Result};

/// Cumulative decode ceiling of the reference browser host.
///
/// Its text decoder corrupts output once roughly 2 GiB have passed through a
/// single instance.
pub const WEBKIT_DECODE_CEILING: u64 = 2_146_435_072;

/// Names of the exports the bridge resolves on the guest module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportNames {
    /// Linear memory export
    pub memory: String,

    /// `allocate(size, align) -> ptr`
    pub malloc: String,

    /// `reallocate(ptr, old_size, new_size, align) -> ptr` (optional on the guest)
    pub realloc: String,

    /// `free(ptr, size, align)`
    pub free: String,

    /// Parse entry point: `(ptr, len) -> handle`
    pub parse: String,

    /// Render entry point: `(ptr, len) -> (ptr, len)`
    pub render: String,
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            memory: "memory".to_string(),
            malloc: "__wbindgen_malloc".to_string(),
            realloc: "__wbindgen_realloc".to_string(),
            free: "__wbindgen_free".to_string(),
            parse: "markdown_to_ast".to_string(),
            render: "markdown_to_html".to_string(),
        }
    }
}

impl ExportNames {
    /// Builder: set the parse entry point
    pub fn parse(mut self, name: impl Into<String>) -> Self {
        self.parse = name.into();
        self
    }

    /// Builder: set the render entry point
    pub fn render(mut self, name: impl Into<String>) -> Self {
        self.render = name.into();
        self
    }

    /// Builder: set the reallocator export
    pub fn realloc(mut self, name: impl Into<String>) -> Self {
        self.realloc = name.into();
        self
    }
}

/// Configuration for the bridge runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Maximum guest memory in bytes (default = 256MB)
    pub max_memory: usize,

    /// Cranelift optimization level (0-3)
    pub optimization_level: u8,

    /// Enable SIMD support
    pub enable_simd: bool,

    /// Cache compiled modules to disk
    pub cache_path: Option<PathBuf>,

    /// Bytes a decoder may see before it is replaced
    pub decode_ceiling: u64,

    /// Import namespace the intrinsics are registered under
    pub import_module: String,

    /// Deepest composite nesting a parse result may have
    pub max_depth: usize,

    /// Most nodes a parse result may expand to
    pub max_nodes: usize,

    /// Guest export names
    pub exports: ExportNames,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_memory: 256 * 1024 * 1024, // 256 MB
            optimization_level: 2,
            enable_simd: true,
            cache_path: None,
            decode_ceiling: u64::MAX,
            import_module: "mdkit_host".to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_nodes: DEFAULT_MAX_NODES,
            exports: ExportNames::default(),
        }
    }
}

impl BridgeConfig {
    /// Create a small config for short-lived bridges
    pub fn minimal() -> Self {
        Self {
            max_memory: 64 * 1024 * 1024, // 64 MB
            enable_simd: false,
            ..Default::default()
        }
    }

    /// Create config for development/debugging
    pub fn development() -> Self {
        Self {
            optimization_level: 0, // Faster compilation
            ..Default::default()
        }
    }

    /// Create config that rotates decoders at the browser host's ceiling
    pub fn webkit_compat() -> Self {
        Self {
            decode_ceiling: WEBKIT_DECODE_CEILING,
            ..Default::default()
        }
    }

    /// Load a configuration document; absent fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| BridgeError::Config(format!("invalid config document: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.decode_ceiling == 0 {
            return Err(BridgeError::Config(
                "decode_ceiling must be greater than zero".to_string(),
            ));
        }
        if self.max_depth == 0 || self.max_nodes == 0 {
            return Err(BridgeError::Config(
                "max_depth and max_nodes must be greater than zero".to_string(),
            ));
        }
        if self.import_module.is_empty() {
            return Err(BridgeError::Config(
                "import_module must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder: set max memory
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Builder: enable SIMD
    pub fn simd(mut self, enable: bool) -> Self {
        self.enable_simd = enable;
        self
    }

    /// Builder: set optimization level
    pub fn optimize(mut self, level: u8) -> Self {
        self.optimization_level = level.min(3);
        self
    }

    /// Builder: set cache path
    pub fn cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Builder: set the decoder byte ceiling
    pub fn decode_ceiling(mut self, bytes: u64) -> Self {
        self.decode_ceiling = bytes;
        self
    }

    /// Builder: set the intrinsic import namespace
    pub fn import_module(mut self, name: impl Into<String>) -> Self {
        self.import_module = name.into();
        self
    }

    /// Builder: set the parse result nesting limit
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Builder: set the parse result node budget
    pub fn max_nodes(mut self, nodes: usize) -> Self {
        self.max_nodes = nodes;
        self
    }

    /// Builder: set guest export names
    pub fn exports(mut self, exports: ExportNames) -> Self {
        self.exports = exports;
        self
    }
}
