//! Guest module host built on wasmtime.
//!
//! [`BridgeRuntime`] owns the engine and compiles modules. Instantiating a
//! [`GuestModule`] links the host intrinsics, resolves the export contract and
//! yields a [`Bridge`] ready to serve the entry trampolines.

use super::alloc::{AllocStats, AllocationShim};
use super::codec::TextCodec;
use super::config::{BridgeConfig, ExportNames};
use super::extension::{Extension, ExtensionHost};
use super::intrinsics;
use super::memory::{BufferStore, LinearMemory, MemoryView, PtrLen};
use super::table::{ExternRefTable, ResolveLimits};
use crate::error::{BridgeError, Result};

use std::path::Path;

use wasmtime::*;

/// Store data shared by every host intrinsic.
pub struct BridgeState {
    pub(crate) table: ExternRefTable,
    pub(crate) codec: TextCodec,
    pub(crate) buffers: BufferStore,
    pub(crate) memory: Option<Memory>,
    pub(crate) memory_export: String,
    limits: StoreLimits,
}

impl BridgeState {
    fn new(config: &BridgeConfig) -> Self {
        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory)
            .build();

        Self {
            table: ExternRefTable::with_limits(ResolveLimits {
                max_depth: config.max_depth,
                max_nodes: config.max_nodes,
            }),
            codec: TextCodec::new(config.decode_ceiling),
            buffers: BufferStore::new(),
            memory: None,
            memory_export: config.exports.memory.clone(),
            limits,
        }
    }
}

/// Decode the UTF-8 string at `region` through the bridge codec.
pub(crate) fn read_guest_string<'a>(
    memory: Memory,
    store: impl Into<StoreContextMut<'a, BridgeState>>,
    region: PtrLen,
) -> Result<String> {
    let (bytes, state) = memory.data_and_store_mut(store);
    let view = state.buffers.view(bytes);
    let raw = view.read(region)?;
    state.codec.decode(raw)
}

/// Compiles guest modules and instantiates bridges over them.
pub struct BridgeRuntime {
    engine: Engine,
    config: BridgeConfig,
}

/// A compiled guest module.
pub struct GuestModule {
    module: Module,
    name: String,
}

impl BridgeRuntime {
    /// Create a runtime with the given configuration.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;

        let mut engine_config = Config::new();

        engine_config.cranelift_opt_level(match config.optimization_level {
            0 => OptLevel::None,
            1 | 2 => OptLevel::Speed,
            _ => OptLevel::SpeedAndSize,
        });
        engine_config.wasm_simd(config.enable_simd);
        if !config.enable_simd {
            engine_config.wasm_relaxed_simd(false);
        }

        // Render entry points return (ptr, len) pairs.
        engine_config.wasm_multi_value(true);
        engine_config.wasm_bulk_memory(true);

        if let Some(ref cache_path) = config.cache_path {
            if let Err(e) = engine_config.cache_config_load(cache_path) {
                tracing::warn!("Failed to load cache config: {}", e);
            }
        }

        let engine = Engine::new(&engine_config)
            .map_err(|e| BridgeError::Wasm(format!("engine creation failed: {}", e)))?;

        Ok(Self { engine, config })
    }

    /// Load a module from a `.wasm` or `.wat` file.
    pub fn load_module(&self, path: impl AsRef<Path>) -> Result<GuestModule> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let module = Module::from_file(&self.engine, path)
            .map_err(|e| BridgeError::Wasm(format!("module load failed: {}", e)))?;

        Ok(GuestModule { module, name })
    }

    /// Load a module from binary or text bytes.
    pub fn load_module_bytes(&self, name: &str, bytes: impl AsRef<[u8]>) -> Result<GuestModule> {
        let module = Module::new(&self.engine, bytes)
            .map_err(|e| BridgeError::Wasm(format!("module creation failed: {}", e)))?;

        Ok(GuestModule {
            module,
            name: name.to_string(),
        })
    }

    /// Instantiate a module and resolve its export contract.
    pub fn instantiate(&self, module: &GuestModule) -> Result<Bridge> {
        let mut store = Store::new(&self.engine, BridgeState::new(&self.config));
        store.limiter(|state| &mut state.limits);

        let mut linker: Linker<BridgeState> = Linker::new(&self.engine);
        intrinsics::register(&mut linker, &self.config.import_module)?;

        let instance = linker
            .instantiate(&mut store, &module.module)
            .map_err(|e| BridgeError::Wasm(format!("instantiation failed: {}", e)))?;

        let exports = GuestExports::resolve(&mut store, &instance, &self.config.exports)?;

        let initial_len = exports.memory.data_size(&store);
        let state = store.data_mut();
        state.memory = Some(exports.memory);
        state.buffers.observe(initial_len);

        tracing::debug!(
            module = %module.name,
            memory_bytes = initial_len,
            realloc = exports.realloc.is_some(),
            "bridge instantiated"
        );

        Ok(Bridge {
            store,
            exports,
            shim: AllocationShim::new(),
            extensions: ExtensionHost::new(),
            module_name: module.name.clone(),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

impl GuestModule {
    /// Get the module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get exported function names.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.module.exports().filter_map(|e| {
            if matches!(e.ty(), ExternType::Func(_)) {
                Some(e.name())
            } else {
                None
            }
        })
    }
}

/// Typed handles to the guest's half of the contract.
pub(crate) struct GuestExports {
    pub(crate) memory: Memory,
    malloc: TypedFunc<(i32, i32), i32>,
    realloc: Option<TypedFunc<(i32, i32, i32, i32), i32>>,
    free: TypedFunc<(i32, i32, i32), ()>,
    pub(crate) parse: TypedFunc<(i32, i32), i32>,
    pub(crate) render: TypedFunc<(i32, i32), (i32, i32)>,
}

impl GuestExports {
    fn resolve(
        store: &mut Store<BridgeState>,
        instance: &Instance,
        names: &ExportNames,
    ) -> Result<Self> {
        let memory = instance
            .get_memory(&mut *store, &names.memory)
            .ok_or_else(|| BridgeError::MissingExport(names.memory.clone()))?;

        let realloc = match instance.get_func(&mut *store, &names.realloc) {
            Some(func) => Some(Self::typed(store, func, &names.realloc)?),
            None => None,
        };

        Ok(Self {
            memory,
            malloc: Self::required(store, instance, &names.malloc)?,
            realloc,
            free: Self::required(store, instance, &names.free)?,
            parse: Self::required(store, instance, &names.parse)?,
            render: Self::required(store, instance, &names.render)?,
        })
    }

    fn required<P, R>(
        store: &mut Store<BridgeState>,
        instance: &Instance,
        name: &str,
    ) -> Result<TypedFunc<P, R>>
    where
        P: WasmParams,
        R: WasmResults,
    {
        let func = instance
            .get_func(&mut *store, name)
            .ok_or_else(|| BridgeError::MissingExport(name.to_string()))?;
        Self::typed(store, func, name)
    }

    fn typed<P, R>(store: &Store<BridgeState>, func: Func, name: &str) -> Result<TypedFunc<P, R>>
    where
        P: WasmParams,
        R: WasmResults,
    {
        func.typed::<P, R>(store).map_err(|e| {
            BridgeError::Wasm(format!(
                "export '{}' has the wrong signature: {}",
                name, e
            ))
        })
    }
}

/// Linear memory and allocator exports, borrowed for one staging step.
pub(crate) struct WasmLinearMemory<'a> {
    store: &'a mut Store<BridgeState>,
    exports: &'a GuestExports,
}

impl LinearMemory for WasmLinearMemory<'_> {
    fn view(&mut self) -> Result<MemoryView<'_>> {
        let (bytes, state) = self.exports.memory.data_and_store_mut(&mut *self.store);
        Ok(state.buffers.view(bytes))
    }

    fn malloc(&mut self, size: u32, align: u32) -> Result<u32> {
        self.exports
            .malloc
            .call(&mut *self.store, (size as i32, align as i32))
            .map(|ptr| ptr as u32)
            .map_err(|e| BridgeError::AllocationFailure {
                requested: size,
                reason: BridgeError::from_guest_call(e).to_string(),
            })
    }

    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32, align: u32) -> Result<u32> {
        let realloc = self
            .exports
            .realloc
            .as_ref()
            .ok_or_else(|| BridgeError::MissingExport("reallocator".to_string()))?;
        realloc
            .call(
                &mut *self.store,
                (ptr as i32, old_size as i32, new_size as i32, align as i32),
            )
            .map(|ptr| ptr as u32)
            .map_err(|e| BridgeError::AllocationFailure {
                requested: new_size,
                reason: BridgeError::from_guest_call(e).to_string(),
            })
    }

    fn has_realloc(&self) -> bool {
        self.exports.realloc.is_some()
    }

    fn free(&mut self, ptr: u32, size: u32, align: u32) -> Result<()> {
        self.exports
            .free
            .call(&mut *self.store, (ptr as i32, size as i32, align as i32))
            .map_err(BridgeError::from_guest_call)
    }
}

/// An instantiated guest module behind the marshalling bridge.
///
/// A bridge serves one call at a time; callers sharing it across threads
/// must serialize access themselves.
pub struct Bridge {
    pub(crate) store: Store<BridgeState>,
    pub(crate) exports: GuestExports,
    pub(crate) shim: AllocationShim,
    pub(crate) extensions: ExtensionHost,
    module_name: String,
}

impl Bridge {
    /// Builder: register an extension.
    pub fn with_extension(mut self, extension: impl Extension + 'static) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Register an extension in place.
    pub fn add_extension(&mut self, extension: impl Extension + 'static) {
        self.extensions.push(extension);
    }

    /// Name of the module this bridge wraps.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Split into the allocation shim and a memory handle over the store.
    pub(crate) fn staging(&mut self) -> (&mut AllocationShim, WasmLinearMemory<'_>) {
        let mem = WasmLinearMemory {
            store: &mut self.store,
            exports: &self.exports,
        };
        (&mut self.shim, mem)
    }

    /// Allocation statistics.
    pub fn alloc_stats(&self) -> AllocStats {
        self.shim.stats()
    }

    /// Number of distinct linear-memory buffers seen, counting the current one.
    pub fn memory_generation(&mut self) -> u64 {
        let len = self.exports.memory.data_size(&self.store);
        let buffers = &mut self.store.data_mut().buffers;
        buffers.observe(len);
        buffers.generation()
    }

    /// Current byte length of linear memory.
    pub fn memory_size(&self) -> usize {
        self.exports.memory.data_size(&self.store)
    }

    /// Entries in the reference table, constants included.
    pub fn table_len(&self) -> usize {
        self.store.data().table.len()
    }

    /// Read access to the reference table.
    pub fn table(&self) -> &ExternRefTable {
        &self.store.data().table
    }

    /// How many text decoders have been retired.
    pub fn decoder_rotations(&self) -> u64 {
        self.store.data().codec.rotations()
    }

    /// Whether the guest exports a reallocator.
    pub fn has_realloc(&self) -> bool {
        self.exports.realloc.is_some()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("module", &self.module_name)
            .field("alloc", &self.shim.stats())
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}
