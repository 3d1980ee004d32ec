//! External reference table.
//!
//! The guest never sees host values, only integer handles into this table.
//! Composite entries (records, arrays, maps) hold handles to their members,
//! so storing a composite inside another shares it, as a reference would.
//!
//! The table is append-only. Handles stay valid for the bridge's lifetime;
//! there is no removal or compaction, and any reuse scheme is the guest's
//! business.

use indexmap::{IndexMap, IndexSet};

use super::value::StructuredValue;
use crate::error::{BridgeError, Result};

/// Largest gap `set_index` will fill with `undefined` past the end of an array.
pub const MAX_ARRAY_HOLE: u32 = 1 << 16;

/// Default nesting depth `resolve` will follow.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Default number of nodes `resolve` will materialise for one value.
pub const DEFAULT_MAX_NODES: usize = 1 << 20;

/// Integer handle naming a table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    /// The undefined singleton.
    pub const UNDEFINED: Handle = Handle(0);
    /// The null singleton.
    pub const NULL: Handle = Handle(1);
    /// The `true` singleton.
    pub const TRUE: Handle = Handle(2);
    /// The `false` singleton.
    pub const FALSE: Handle = Handle(3);

    /// Wrap a raw index.
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Raw index.
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Decode from the guest's i32 representation.
    pub fn from_abi(raw: i32) -> Self {
        Self(raw as u32)
    }

    /// Encode for the guest.
    pub fn to_abi(self) -> i32 {
        self.0 as i32
    }
}

/// Map key with same-value-zero identity.
///
/// Numbers compare by value with `-0 == +0` and all NaNs equal; composites
/// compare by handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Canonical bits of a number
    Number(u64),
    /// 64-bit unsigned integer
    BigInt(u64),
    /// Text
    String(String),
    /// Composite, by identity
    Ref(Handle),
}

impl MapKey {
    fn number(n: f64) -> Self {
        let canonical = if n.is_nan() {
            f64::NAN
        } else if n == 0.0 {
            0.0
        } else {
            n
        };
        MapKey::Number(canonical.to_bits())
    }
}

/// A table entry.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Double-precision number
    Number(f64),
    /// 64-bit unsigned integer
    BigInt(u64),
    /// Text
    String(String),
    /// Record: property name to member handle
    Object(IndexMap<String, Handle>),
    /// Sequence of member handles
    Array(Vec<Handle>),
    /// Mapping: key to member handle
    Map(IndexMap<MapKey, Handle>),
    /// Error carrying a message
    Error(String),
}

impl HostValue {
    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::BigInt(_) => "bigint",
            Self::String(_) => "string",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Error(_) => "error",
        }
    }

    fn is_composite(&self) -> bool {
        matches!(
            self,
            Self::Object(_) | Self::Array(_) | Self::Map(_) | Self::Error(_)
        )
    }
}

/// Bounds on the tree `resolve` builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveLimits {
    /// Deepest chain of nested composites
    pub max_depth: usize,
    /// Most nodes in one resolved value, shared members counted per place
    pub max_nodes: usize,
}

impl Default for ResolveLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_nodes: DEFAULT_MAX_NODES,
        }
    }
}

/// Traversal state for one `resolve` call.
struct Walk {
    path: IndexSet<Handle>,
    nodes: usize,
}

/// Growable table of host values addressed by [`Handle`].
#[derive(Debug, Clone)]
pub struct ExternRefTable {
    entries: Vec<HostValue>,
    limits: ResolveLimits,
}

impl ExternRefTable {
    /// Slots reserved for the singleton constants.
    pub const RESERVED: u32 = 4;

    /// Create a table seeded with `undefined`, `null`, `true`, `false` at 0-3.
    pub fn new() -> Self {
        Self::with_limits(ResolveLimits::default())
    }

    /// Create a seeded table whose `resolve` stops at `limits`.
    pub fn with_limits(limits: ResolveLimits) -> Self {
        Self {
            entries: vec![
                HostValue::Undefined,
                HostValue::Null,
                HostValue::Bool(true),
                HostValue::Bool(false),
            ],
            limits,
        }
    }

    /// Bounds applied by `resolve`.
    pub fn limits(&self) -> ResolveLimits {
        self.limits
    }

    /// Number of entries, reserved slots included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: the reserved slots are never removed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a value, returning its handle.
    pub fn insert(&mut self, value: HostValue) -> Handle {
        let handle = Handle(self.entries.len() as u32);
        self.entries.push(value);
        handle
    }

    /// Borrow the entry behind `handle`.
    pub fn get(&self, handle: Handle) -> Result<&HostValue> {
        self.entries
            .get(handle.0 as usize)
            .ok_or(BridgeError::InvalidHandle(handle.0))
    }

    fn get_mut(&mut self, handle: Handle) -> Result<&mut HostValue> {
        self.entries
            .get_mut(handle.0 as usize)
            .ok_or(BridgeError::InvalidHandle(handle.0))
    }

    /// One of the four seeded constants: 0 undefined, 1 null, 2 true, 3 false.
    pub fn get_constant(&self, n: u32) -> Result<&HostValue> {
        if n >= Self::RESERVED {
            return Err(BridgeError::InvalidHandle(n));
        }
        self.get(Handle(n))
    }

    /// Set `key -> value` on whatever `target` is.
    ///
    /// Maps get an entry, arrays an element at numeric `key`, records a
    /// named property.
    pub fn set(&mut self, target: Handle, key: Handle, value: Handle) -> Result<()> {
        match self.get(target)? {
            HostValue::Map(_) => self.map_set(target, key, value),
            HostValue::Array(_) => {
                let index = self.array_index(key)?.ok_or(BridgeError::InvalidTarget {
                    handle: key.0,
                    expected: "an array index",
                })?;
                self.set_index(target, index, value)
            }
            HostValue::Object(_) => self.set_property(target, key, value),
            _ => Err(BridgeError::InvalidTarget {
                handle: target.0,
                expected: "an object, array or map",
            }),
        }
    }

    /// Insert or overwrite a map entry. Existing keys keep their position.
    pub fn map_set(&mut self, map: Handle, key: Handle, value: Handle) -> Result<()> {
        self.get(value)?;
        let key = self.map_key(key)?;
        match self.get_mut(map)? {
            HostValue::Map(entries) => {
                entries.insert(key, value);
                Ok(())
            }
            _ => Err(BridgeError::InvalidTarget {
                handle: map.0,
                expected: "a map",
            }),
        }
    }

    /// `target[key] = value` on a record, or on an array when `key` is an index.
    pub fn set_property(&mut self, target: Handle, key: Handle, value: Handle) -> Result<()> {
        self.get(value)?;
        if matches!(self.get(target)?, HostValue::Array(_)) {
            let index = self.array_index(key)?.ok_or(BridgeError::InvalidTarget {
                handle: key.0,
                expected: "an array index",
            })?;
            return self.set_index(target, index, value);
        }

        let name = self.property_key(key)?;
        match self.get_mut(target)? {
            HostValue::Object(props) => {
                props.insert(name, value);
                Ok(())
            }
            _ => Err(BridgeError::InvalidTarget {
                handle: target.0,
                expected: "an object",
            }),
        }
    }

    /// `target[index] = value`. Arrays grow, filling holes with `undefined`.
    pub fn set_index(&mut self, target: Handle, index: u32, value: Handle) -> Result<()> {
        self.get(value)?;
        match self.get_mut(target)? {
            HostValue::Array(items) => {
                let index = index as usize;
                if index < items.len() {
                    items[index] = value;
                    return Ok(());
                }
                if index - items.len() > MAX_ARRAY_HOLE as usize {
                    return Err(BridgeError::InvalidTarget {
                        handle: target.0,
                        expected: "an array close enough to grow to the index",
                    });
                }
                items.resize(index, Handle::UNDEFINED);
                items.push(value);
                Ok(())
            }
            HostValue::Object(props) => {
                props.insert(index.to_string(), value);
                Ok(())
            }
            _ => Err(BridgeError::InvalidTarget {
                handle: target.0,
                expected: "an object or array",
            }),
        }
    }

    fn map_key(&self, key: Handle) -> Result<MapKey> {
        Ok(match self.get(key)? {
            HostValue::Undefined => MapKey::Undefined,
            HostValue::Null => MapKey::Null,
            HostValue::Bool(b) => MapKey::Bool(*b),
            HostValue::Number(n) => MapKey::number(*n),
            HostValue::BigInt(n) => MapKey::BigInt(*n),
            HostValue::String(s) => MapKey::String(s.clone()),
            _ => MapKey::Ref(key),
        })
    }

    fn property_key(&self, key: Handle) -> Result<String> {
        let value = self.get(key)?;
        Ok(match value {
            HostValue::String(s) => s.clone(),
            HostValue::Number(n) => number_to_string(*n),
            HostValue::BigInt(n) => n.to_string(),
            HostValue::Bool(b) => b.to_string(),
            HostValue::Undefined => "undefined".to_string(),
            HostValue::Null => "null".to_string(),
            HostValue::Object(_)
            | HostValue::Array(_)
            | HostValue::Map(_)
            | HostValue::Error(_) => {
                return Err(BridgeError::InvalidTarget {
                    handle: key.0,
                    expected: "a primitive property key",
                })
            }
        })
    }

    fn array_index(&self, key: Handle) -> Result<Option<u32>> {
        Ok(match self.get(key)? {
            HostValue::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n < u32::MAX as f64 => {
                Some(*n as u32)
            }
            HostValue::BigInt(n) if *n < u32::MAX as u64 => Some(*n as u32),
            HostValue::String(s) => s
                .parse::<u32>()
                .ok()
                .filter(|i| *i != u32::MAX && i.to_string() == *s),
            _ => None,
        })
    }

    /// Materialise the value behind `handle` as an owned tree.
    ///
    /// Shared members are copied into each place they appear, and every copy
    /// counts against [`ResolveLimits::max_nodes`]. A composite that contains
    /// itself fails with [`BridgeError::CyclicValue`]; nesting past
    /// [`ResolveLimits::max_depth`] fails with [`BridgeError::ValueTooDeep`].
    pub fn resolve(&self, handle: Handle) -> Result<StructuredValue> {
        let mut walk = Walk {
            path: IndexSet::new(),
            nodes: 0,
        };
        self.resolve_inner(handle, &mut walk)
    }

    fn resolve_inner(&self, handle: Handle, walk: &mut Walk) -> Result<StructuredValue> {
        walk.nodes += 1;
        if walk.nodes > self.limits.max_nodes {
            return Err(BridgeError::ValueTooLarge {
                max_nodes: self.limits.max_nodes,
            });
        }

        let value = self.get(handle)?;
        if value.is_composite() {
            if walk.path.contains(&handle) {
                return Err(BridgeError::CyclicValue(handle.0));
            }
            if walk.path.len() >= self.limits.max_depth {
                return Err(BridgeError::ValueTooDeep {
                    max_depth: self.limits.max_depth,
                });
            }
            walk.path.insert(handle);
        }

        let resolved = match value {
            HostValue::Undefined => StructuredValue::Undefined,
            HostValue::Null => StructuredValue::Null,
            HostValue::Bool(b) => StructuredValue::Bool(*b),
            HostValue::Number(n) => StructuredValue::Number(*n),
            HostValue::BigInt(n) => StructuredValue::BigInt(*n),
            HostValue::String(s) => StructuredValue::String(s.clone()),
            HostValue::Error(message) => StructuredValue::Error(message.clone()),
            HostValue::Array(items) => StructuredValue::Array(
                items
                    .iter()
                    .map(|item| self.resolve_inner(*item, walk))
                    .collect::<Result<_>>()?,
            ),
            HostValue::Object(props) => {
                let mut out = IndexMap::with_capacity(props.len());
                for (name, member) in props {
                    out.insert(name.clone(), self.resolve_inner(*member, walk)?);
                }
                StructuredValue::Object(out)
            }
            HostValue::Map(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (key, member) in entries {
                    let key = match key {
                        MapKey::Undefined => StructuredValue::Undefined,
                        MapKey::Null => StructuredValue::Null,
                        MapKey::Bool(b) => StructuredValue::Bool(*b),
                        MapKey::Number(bits) => StructuredValue::Number(f64::from_bits(*bits)),
                        MapKey::BigInt(n) => StructuredValue::BigInt(*n),
                        MapKey::String(s) => StructuredValue::String(s.clone()),
                        MapKey::Ref(h) => self.resolve_inner(*h, walk)?,
                    };
                    out.push((key, self.resolve_inner(*member, walk)?));
                }
                StructuredValue::Map(out)
            }
        };

        if value.is_composite() {
            walk.path.pop();
        }
        Ok(resolved)
    }
}

impl Default for ExternRefTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Property-key spelling of a number.
fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        (if n > 0.0 { "Infinity" } else { "-Infinity" }).to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{}", n)
    }
}
