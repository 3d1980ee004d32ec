//! Host intrinsics the guest calls to build host values.
//!
//! The guest cannot construct host values itself. It asks for them through a
//! closed set of operations, [`HostOp`], each answered against the
//! [`ExternRefTable`]. The linker glue below only decodes arguments into a
//! `HostOp` and encodes the [`OpOutput`] back, so every intrinsic can be
//! exercised with [`apply`] alone.
//!
//! ## Import Module
//!
//! Intrinsics are imported under the configured namespace (`mdkit_host` by
//! default):
//! ```wat
//! (import "mdkit_host" "object_new" (func $object_new (result i32)))
//! (import "mdkit_host" "set_property" (func $set_property (param i32 i32 i32)))
//! (import "mdkit_host" "cast_string" (func $cast_string (param i32 i32) (result i32)))
//! ```
//!
//! | Import | Signature | Effect |
//! |--------|-----------|--------|
//! | `object_new` | `() -> handle` | empty record |
//! | `array_new` | `() -> handle` | empty array |
//! | `map_new` | `() -> handle` | empty map |
//! | `map_set` | `(map, key, value) -> map` | insert map entry |
//! | `set_property` | `(target, key, value)` | `target[key] = value` |
//! | `set_index` | `(target, index, value)` | `target[index >>> 0] = value` |
//! | `error_new` | `(ptr, len) -> handle` | error from a UTF-8 message |
//! | `throw` | `(ptr, len)` | abort the call with a message |
//! | `is_string` | `(value) -> i32` | 1 if the entry is text |
//! | `cast_f64` | `(f64) -> handle` | number |
//! | `cast_string` | `(ptr, len) -> handle` | text copied out of memory |
//! | `cast_u64` | `(i64) -> handle` | unsigned 64-bit integer |

use indexmap::IndexMap;
use wasmtime::{Caller, Linker, Memory};

use super::memory::PtrLen;
use super::runtime::{read_guest_string, BridgeState};
use super::table::{ExternRefTable, Handle, HostValue};
use crate::error::{BridgeError, Result};

/// One request from the guest.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOp {
    /// Construct an empty record
    NewObject,
    /// Construct an empty array
    NewArray,
    /// Construct an empty map
    NewMap,
    /// Insert `key -> value` into a map
    MapSet {
        /// Map handle
        map: Handle,
        /// Key handle
        key: Handle,
        /// Value handle
        value: Handle,
    },
    /// Set a named (or, on arrays, indexed) field
    SetProperty {
        /// Record or array handle
        target: Handle,
        /// Key handle
        key: Handle,
        /// Value handle
        value: Handle,
    },
    /// Set a numbered field
    SetIndex {
        /// Record or array handle
        target: Handle,
        /// Index
        index: u32,
        /// Value handle
        value: Handle,
    },
    /// Construct an error value
    NewError {
        /// Decoded message
        message: String,
    },
    /// Abort the in-flight call
    Raise {
        /// Decoded message
        message: String,
    },
    /// Ask whether an entry is text
    IsString {
        /// Entry to test
        value: Handle,
    },
    /// Box a number
    CastF64(f64),
    /// Box a decoded string
    CastString(String),
    /// Box an unsigned 64-bit integer
    CastU64(u64),
}

impl HostOp {
    /// Import name of the intrinsic that produces this op.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewObject => "object_new",
            Self::NewArray => "array_new",
            Self::NewMap => "map_new",
            Self::MapSet { .. } => "map_set",
            Self::SetProperty { .. } => "set_property",
            Self::SetIndex { .. } => "set_index",
            Self::NewError { .. } => "error_new",
            Self::Raise { .. } => "throw",
            Self::IsString { .. } => "is_string",
            Self::CastF64(_) => "cast_f64",
            Self::CastString(_) => "cast_string",
            Self::CastU64(_) => "cast_u64",
        }
    }
}

/// What an intrinsic hands back to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutput {
    /// Nothing
    Unit,
    /// A table handle
    Handle(Handle),
    /// A boolean answer
    Flag(bool),
}

impl OpOutput {
    /// Encode as the i32 the guest receives. `Unit` encodes as the undefined handle.
    pub fn to_abi(self) -> i32 {
        match self {
            Self::Unit => Handle::UNDEFINED.to_abi(),
            Self::Handle(handle) => handle.to_abi(),
            Self::Flag(flag) => i32::from(flag),
        }
    }
}

/// Carry out one operation against the table.
///
/// `Raise` always fails with [`BridgeError::ModuleRaised`].
pub fn apply(table: &mut ExternRefTable, op: HostOp) -> Result<OpOutput> {
    let output = match op {
        HostOp::NewObject => OpOutput::Handle(table.insert(HostValue::Object(IndexMap::new()))),
        HostOp::NewArray => OpOutput::Handle(table.insert(HostValue::Array(Vec::new()))),
        HostOp::NewMap => OpOutput::Handle(table.insert(HostValue::Map(IndexMap::new()))),
        HostOp::MapSet { map, key, value } => {
            table.map_set(map, key, value)?;
            OpOutput::Handle(map)
        }
        HostOp::SetProperty { target, key, value } => {
            table.set_property(target, key, value)?;
            OpOutput::Unit
        }
        HostOp::SetIndex {
            target,
            index,
            value,
        } => {
            table.set_index(target, index, value)?;
            OpOutput::Unit
        }
        HostOp::NewError { message } => OpOutput::Handle(table.insert(HostValue::Error(message))),
        HostOp::Raise { message } => return Err(BridgeError::ModuleRaised(message)),
        HostOp::IsString { value } => {
            OpOutput::Flag(matches!(table.get(value)?, HostValue::String(_)))
        }
        HostOp::CastF64(n) => OpOutput::Handle(table.insert(HostValue::Number(n))),
        HostOp::CastString(s) => OpOutput::Handle(table.insert(HostValue::String(s))),
        HostOp::CastU64(n) => OpOutput::Handle(table.insert(HostValue::BigInt(n))),
    };
    Ok(output)
}

fn dispatch(caller: &mut Caller<'_, BridgeState>, op: HostOp) -> Result<OpOutput> {
    tracing::trace!(op = op.name(), "host intrinsic");
    apply(&mut caller.data_mut().table, op)
}

/// Resolve the guest memory from inside a host call.
fn guest_memory(caller: &mut Caller<'_, BridgeState>) -> Result<Memory> {
    if let Some(memory) = caller.data().memory {
        return Ok(memory);
    }
    let name = caller.data().memory_export.clone();
    caller
        .get_export(&name)
        .and_then(|e| e.into_memory())
        .ok_or(BridgeError::MissingExport(name))
}

fn caller_string(caller: &mut Caller<'_, BridgeState>, ptr: i32, len: i32) -> Result<String> {
    let memory = guest_memory(caller)?;
    read_guest_string(memory, &mut *caller, PtrLen::from_abi(ptr, len))
}

fn link_error(name: &'static str) -> impl FnOnce(wasmtime::Error) -> BridgeError {
    move |e| BridgeError::Wasm(format!("failed to register {}: {}", name, e))
}

/// Register every intrinsic under `namespace`.
pub fn register(linker: &mut Linker<BridgeState>, namespace: &str) -> Result<()> {
    register_constructors(linker, namespace)?;
    register_setters(linker, namespace)?;
    register_errors(linker, namespace)?;
    register_casts(linker, namespace)?;
    Ok(())
}

fn register_constructors(linker: &mut Linker<BridgeState>, ns: &str) -> Result<()> {
    linker
        .func_wrap(
            ns,
            "object_new",
            |mut caller: Caller<'_, BridgeState>| -> wasmtime::Result<i32> {
                Ok(dispatch(&mut caller, HostOp::NewObject)?.to_abi())
            },
        )
        .map_err(link_error("object_new"))?;

    linker
        .func_wrap(
            ns,
            "array_new",
            |mut caller: Caller<'_, BridgeState>| -> wasmtime::Result<i32> {
                Ok(dispatch(&mut caller, HostOp::NewArray)?.to_abi())
            },
        )
        .map_err(link_error("array_new"))?;

    linker
        .func_wrap(
            ns,
            "map_new",
            |mut caller: Caller<'_, BridgeState>| -> wasmtime::Result<i32> {
                Ok(dispatch(&mut caller, HostOp::NewMap)?.to_abi())
            },
        )
        .map_err(link_error("map_new"))?;

    Ok(())
}

fn register_setters(linker: &mut Linker<BridgeState>, ns: &str) -> Result<()> {
    linker
        .func_wrap(
            ns,
            "map_set",
            |mut caller: Caller<'_, BridgeState>,
             map: i32,
             key: i32,
             value: i32|
             -> wasmtime::Result<i32> {
                let op = HostOp::MapSet {
                    map: Handle::from_abi(map),
                    key: Handle::from_abi(key),
                    value: Handle::from_abi(value),
                };
                Ok(dispatch(&mut caller, op)?.to_abi())
            },
        )
        .map_err(link_error("map_set"))?;

    linker
        .func_wrap(
            ns,
            "set_property",
            |mut caller: Caller<'_, BridgeState>,
             target: i32,
             key: i32,
             value: i32|
             -> wasmtime::Result<()> {
                let op = HostOp::SetProperty {
                    target: Handle::from_abi(target),
                    key: Handle::from_abi(key),
                    value: Handle::from_abi(value),
                };
                dispatch(&mut caller, op)?;
                Ok(())
            },
        )
        .map_err(link_error("set_property"))?;

    linker
        .func_wrap(
            ns,
            "set_index",
            |mut caller: Caller<'_, BridgeState>,
             target: i32,
             index: i32,
             value: i32|
             -> wasmtime::Result<()> {
                let op = HostOp::SetIndex {
                    target: Handle::from_abi(target),
                    index: index as u32,
                    value: Handle::from_abi(value),
                };
                dispatch(&mut caller, op)?;
                Ok(())
            },
        )
        .map_err(link_error("set_index"))?;

    linker
        .func_wrap(
            ns,
            "is_string",
            |mut caller: Caller<'_, BridgeState>, value: i32| -> wasmtime::Result<i32> {
                let op = HostOp::IsString {
                    value: Handle::from_abi(value),
                };
                Ok(dispatch(&mut caller, op)?.to_abi())
            },
        )
        .map_err(link_error("is_string"))?;

    Ok(())
}

fn register_errors(linker: &mut Linker<BridgeState>, ns: &str) -> Result<()> {
    linker
        .func_wrap(
            ns,
            "error_new",
            |mut caller: Caller<'_, BridgeState>, ptr: i32, len: i32| -> wasmtime::Result<i32> {
                let message = caller_string(&mut caller, ptr, len)?;
                Ok(dispatch(&mut caller, HostOp::NewError { message })?.to_abi())
            },
        )
        .map_err(link_error("error_new"))?;

    linker
        .func_wrap(
            ns,
            "throw",
            |mut caller: Caller<'_, BridgeState>, ptr: i32, len: i32| -> wasmtime::Result<()> {
                let message = caller_string(&mut caller, ptr, len)?;
                dispatch(&mut caller, HostOp::Raise { message })?;
                Ok(())
            },
        )
        .map_err(link_error("throw"))?;

    Ok(())
}

fn register_casts(linker: &mut Linker<BridgeState>, ns: &str) -> Result<()> {
    linker
        .func_wrap(
            ns,
            "cast_f64",
            |mut caller: Caller<'_, BridgeState>, n: f64| -> wasmtime::Result<i32> {
                Ok(dispatch(&mut caller, HostOp::CastF64(n))?.to_abi())
            },
        )
        .map_err(link_error("cast_f64"))?;

    linker
        .func_wrap(
            ns,
            "cast_string",
            |mut caller: Caller<'_, BridgeState>, ptr: i32, len: i32| -> wasmtime::Result<i32> {
                let text = caller_string(&mut caller, ptr, len)?;
                Ok(dispatch(&mut caller, HostOp::CastString(text))?.to_abi())
            },
        )
        .map_err(link_error("cast_string"))?;

    linker
        .func_wrap(
            ns,
            "cast_u64",
            |mut caller: Caller<'_, BridgeState>, n: i64| -> wasmtime::Result<i32> {
                // The guest passes the bit pattern; reinterpret as unsigned.
                Ok(dispatch(&mut caller, HostOp::CastU64(n as u64))?.to_abi())
            },
        )
        .map_err(link_error("cast_u64"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::value::StructuredValue;

    fn handle(output: OpOutput) -> Handle {
        match output {
            OpOutput::Handle(h) => h,
            other => panic!("expected handle, got {:?}", other),
        }
    }

    #[test]
    fn test_constructors_return_distinct_handles() {
        let mut table = ExternRefTable::new();
        let a = handle(apply(&mut table, HostOp::NewObject).unwrap());
        let b = handle(apply(&mut table, HostOp::NewArray).unwrap());
        let c = handle(apply(&mut table, HostOp::NewMap).unwrap());
        assert!(a.index() >= ExternRefTable::RESERVED);
        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn test_map_set_builds_ordered_mapping() {
        let mut table = ExternRefTable::new();
        let map = handle(apply(&mut table, HostOp::NewMap).unwrap());
        for (k, v) in [("a", 1.0), ("b", 2.0)] {
            let key = handle(apply(&mut table, HostOp::CastString(k.into())).unwrap());
            let value = handle(apply(&mut table, HostOp::CastF64(v)).unwrap());
            let returned = apply(&mut table, HostOp::MapSet { map, key, value }).unwrap();
            assert_eq!(returned, OpOutput::Handle(map));
        }

        let resolved = table.resolve(map).unwrap();
        assert_eq!(
            resolved,
            StructuredValue::Map(vec![
                (
                    StructuredValue::String("a".into()),
                    StructuredValue::Number(1.0)
                ),
                (
                    StructuredValue::String("b".into()),
                    StructuredValue::Number(2.0)
                ),
            ])
        );
        assert_eq!(resolved.to_json(), serde_json::json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_raise_carries_message_verbatim() {
        let mut table = ExternRefTable::new();
        let err = apply(
            &mut table,
            HostOp::Raise {
                message: "unclosed fence at line 3".into(),
            },
        )
        .unwrap_err();
        assert_eq!(
            err,
            BridgeError::ModuleRaised("unclosed fence at line 3".into())
        );
        assert_eq!(err.to_string(), "unclosed fence at line 3");
    }

    #[test]
    fn test_is_string_and_casts() {
        let mut table = ExternRefTable::new();
        let s = handle(apply(&mut table, HostOp::CastString("x".into())).unwrap());
        let n = handle(apply(&mut table, HostOp::CastU64(u64::MAX)).unwrap());
        assert_eq!(
            apply(&mut table, HostOp::IsString { value: s }).unwrap(),
            OpOutput::Flag(true)
        );
        assert_eq!(
            apply(&mut table, HostOp::IsString { value: n }).unwrap(),
            OpOutput::Flag(false)
        );
        assert_eq!(table.resolve(n).unwrap(), StructuredValue::BigInt(u64::MAX));
    }

    #[test]
    fn test_error_values_resolve() {
        let mut table = ExternRefTable::new();
        let err = handle(
            apply(
                &mut table,
                HostOp::NewError {
                    message: "bad heading".into(),
                },
            )
            .unwrap(),
        );
        assert_eq!(
            table.resolve(err).unwrap(),
            StructuredValue::Error("bad heading".into())
        );
    }

    #[test]
    fn test_output_abi_encoding() {
        assert_eq!(OpOutput::Unit.to_abi(), 0);
        assert_eq!(OpOutput::Flag(true).to_abi(), 1);
        assert_eq!(OpOutput::Handle(Handle::FALSE).to_abi(), 3);
    }
}
