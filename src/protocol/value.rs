//! Shared value graph carried by the serializer.
//!
//! [`Data`] is the in-memory form of an inspected value. Arrays and objects
//! are shared references, so one node can appear under several parents and a
//! node can (directly or indirectly) contain itself.
//!
//! # Special values
//!
//! JSON has no `undefined`, `NaN` or infinities. They travel as reserved
//! string markers and are restored on decode. Resource handles cannot be
//! encoded at all; they become a descriptive placeholder string.
//!
//! The markers share the string space with user data: a string equal to
//! [`UNDEFINED_MARKER`] (or any other marker) decodes as the special value,
//! not as the original string.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use serde_json::{Map, Number, Value};

// ============================================================================
// Constants
// ============================================================================

/// Wire marker for [`Data::Undefined`].
pub const UNDEFINED_MARKER: &str = "__bridge_undefined__";

/// Wire marker for [`Data::NaN`].
pub const NAN_MARKER: &str = "__bridge_nan__";

/// Wire marker for [`Data::Infinity`].
pub const INFINITY_MARKER: &str = "__bridge_infinity__";

/// Wire marker for [`Data::NegativeInfinity`].
pub const NEGATIVE_INFINITY_MARKER: &str = "__bridge_negative_infinity__";

// ============================================================================
// Types
// ============================================================================

/// Shared, interior-mutable node storage.
pub type Shared<T> = Arc<RwLock<T>>;

/// Array node contents.
pub type ArrayNode = Shared<Vec<Data>>;

/// Object node contents (keys kept sorted).
pub type ObjectNode = Shared<BTreeMap<String, Data>>;

// ============================================================================
// Data
// ============================================================================

/// A value that may contain shared and cyclic references.
///
/// Cloning a `Data` clones the reference for arrays and objects, never the
/// contents.
#[derive(Clone)]
pub enum Data {
    /// JSON `null`.
    Null,
    /// Absent value.
    Undefined,
    /// Boolean.
    Bool(bool),
    /// Finite number.
    Number(Number),
    /// Not-a-number.
    NaN,
    /// Positive infinity.
    Infinity,
    /// Negative infinity.
    NegativeInfinity,
    /// String.
    String(String),
    /// Shared array node.
    Array(ArrayNode),
    /// Shared object node.
    Object(ObjectNode),
    /// Unencodable resource, identified by a type name.
    Handle(String),
}

// ============================================================================
// Data - Constructors
// ============================================================================

impl Data {
    /// Creates a new array node.
    #[must_use]
    pub fn array(items: impl IntoIterator<Item = Data>) -> Self {
        Self::Array(Arc::new(RwLock::new(items.into_iter().collect())))
    }

    /// Creates a new object node.
    #[must_use]
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Data)>) -> Self {
        Self::Object(Arc::new(RwLock::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        )))
    }

    /// Creates a number, mapping non-finite floats to their special variants.
    #[must_use]
    pub fn float(value: f64) -> Self {
        if value.is_nan() {
            Self::NaN
        } else if value == f64::INFINITY {
            Self::Infinity
        } else if value == f64::NEG_INFINITY {
            Self::NegativeInfinity
        } else {
            Number::from_f64(value).map_or(Self::NaN, Self::Number)
        }
    }

    /// Creates a resource handle placeholder.
    #[must_use]
    pub fn handle(kind: impl Into<String>) -> Self {
        Self::Handle(kind.into())
    }
}

// ============================================================================
// Data - Accessors
// ============================================================================

impl Data {
    /// Returns the string contents, if this is a string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number as `f64`, including non-finite variants.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            Self::NaN => Some(f64::NAN),
            Self::Infinity => Some(f64::INFINITY),
            Self::NegativeInfinity => Some(f64::NEG_INFINITY),
            _ => None,
        }
    }

    /// Returns the boolean, if this is one.
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns `true` for arrays and objects.
    #[inline]
    #[must_use]
    pub fn is_node(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Object(_))
    }

    /// Returns the object member under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Data> {
        match self {
            Self::Object(node) => node.read().get(key).cloned(),
            _ => None,
        }
    }

    /// Returns the array element at `index`.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<Data> {
        match self {
            Self::Array(node) => node.read().get(index).cloned(),
            _ => None,
        }
    }

    /// Number of elements or members; zero for scalars.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Array(node) => node.read().len(),
            Self::Object(node) => node.read().len(),
            _ => 0,
        }
    }

    /// Returns `true` if [`len`](Self::len) is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sets an object member. Returns `false` if this is not an object.
    pub fn set(&self, key: impl Into<String>, value: Data) -> bool {
        match self {
            Self::Object(node) => {
                node.write().insert(key.into(), value);
                true
            }
            _ => false,
        }
    }

    /// Appends an array element. Returns `false` if this is not an array.
    pub fn push(&self, value: Data) -> bool {
        match self {
            Self::Array(node) => {
                node.write().push(value);
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if both values are the same array or object node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Data) -> bool {
        match (self.node_addr(), other.node_addr()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Address of the shared node, used as identity.
    pub(crate) fn node_addr(&self) -> Option<usize> {
        match self {
            Self::Array(node) => Some(Arc::as_ptr(node) as *const () as usize),
            Self::Object(node) => Some(Arc::as_ptr(node) as *const () as usize),
            _ => None,
        }
    }
}

// ============================================================================
// Data - Scalar JSON Mapping
// ============================================================================

impl Data {
    /// Converts a scalar to its wire form. Nodes map to `null`.
    pub(crate) fn scalar_to_json(&self) -> Value {
        match self {
            Self::Null | Self::Array(_) | Self::Object(_) => Value::Null,
            Self::Undefined => Value::from(UNDEFINED_MARKER),
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::NaN => Value::from(NAN_MARKER),
            Self::Infinity => Value::from(INFINITY_MARKER),
            Self::NegativeInfinity => Value::from(NEGATIVE_INFINITY_MARKER),
            Self::String(s) => Value::String(s.clone()),
            Self::Handle(kind) => Value::String(format!("[native Handle {kind}]")),
        }
    }

    /// Converts a JSON scalar back, restoring special markers.
    pub(crate) fn scalar_from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(n.clone()),
            Value::String(s) => match s.as_str() {
                UNDEFINED_MARKER => Self::Undefined,
                NAN_MARKER => Self::NaN,
                INFINITY_MARKER => Self::Infinity,
                NEGATIVE_INFINITY_MARKER => Self::NegativeInfinity,
                _ => Self::String(s.clone()),
            },
            Value::Array(_) | Value::Object(_) => Self::Null,
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<Value> for Data {
    /// Builds a fresh tree (no sharing) from plain JSON.
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::array(items.into_iter().map(Self::from)),
            Value::Object(members) => {
                Self::object(members.into_iter().map(|(k, v)| (k, Self::from(v))))
            }
            scalar => Self::scalar_from_json(&scalar),
        }
    }
}

impl From<bool> for Data {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Data {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for Data {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<i32> for Data {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<f64> for Data {
    fn from(value: f64) -> Self {
        Self::float(value)
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl Data {
    /// Converts an acyclic value to plain JSON.
    ///
    /// Returns `None` if a cycle is reached.
    #[must_use]
    pub fn to_json(&self) -> Option<Value> {
        let mut path = FxHashSet::default();
        self.to_json_inner(&mut path)
    }

    fn to_json_inner(&self, path: &mut FxHashSet<usize>) -> Option<Value> {
        let addr = self.node_addr();
        if let Some(addr) = addr
            && !path.insert(addr)
        {
            return None;
        }

        let json = match self {
            Self::Array(node) => {
                let items = node.read().clone();
                let mut out = Vec::with_capacity(items.len());
                for item in &items {
                    out.push(item.to_json_inner(path)?);
                }
                Value::Array(out)
            }
            Self::Object(node) => {
                let members = node.read().clone();
                let mut out = Map::new();
                for (key, item) in &members {
                    out.insert(key.clone(), item.to_json_inner(path)?);
                }
                Value::Object(out)
            }
            scalar => scalar.scalar_to_json(),
        };

        if let Some(addr) = addr {
            path.remove(&addr);
        }
        Some(json)
    }
}

// ============================================================================
// Equality
// ============================================================================

impl PartialEq for Data {
    /// Structural equality that terminates on cyclic graphs.
    ///
    /// A pair of nodes already under comparison is assumed equal, so two
    /// cycles of the same shape compare equal.
    fn eq(&self, other: &Self) -> bool {
        let mut visiting = FxHashSet::default();
        data_eq(self, other, &mut visiting)
    }
}

fn data_eq(a: &Data, b: &Data, visiting: &mut FxHashSet<(usize, usize)>) -> bool {
    if let (Some(x), Some(y)) = (a.node_addr(), b.node_addr()) {
        if x == y || !visiting.insert((x, y)) {
            return true;
        }
    }

    match (a, b) {
        (Data::Null, Data::Null)
        | (Data::Undefined, Data::Undefined)
        | (Data::NaN, Data::NaN)
        | (Data::Infinity, Data::Infinity)
        | (Data::NegativeInfinity, Data::NegativeInfinity) => true,
        (Data::Bool(x), Data::Bool(y)) => x == y,
        (Data::Number(x), Data::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) if x.is_f64() || y.is_f64() => fx == fy,
            _ => x == y,
        },
        (Data::String(x), Data::String(y)) | (Data::Handle(x), Data::Handle(y)) => x == y,
        (Data::Array(x), Data::Array(y)) => {
            let xs = x.read().clone();
            let ys = y.read().clone();
            xs.len() == ys.len()
                && xs.iter().zip(ys.iter()).all(|(p, q)| data_eq(p, q, visiting))
        }
        (Data::Object(x), Data::Object(y)) => {
            let xs = x.read().clone();
            let ys = y.read().clone();
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|((kp, p), (kq, q))| kp == kq && data_eq(p, q, visiting))
        }
        _ => false,
    }
}

// ============================================================================
// Debug
// ============================================================================

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut path = FxHashSet::default();
        debug_inner(self, f, &mut path)
    }
}

fn debug_inner(data: &Data, f: &mut fmt::Formatter<'_>, path: &mut FxHashSet<usize>) -> fmt::Result {
    let addr = data.node_addr();
    if let Some(addr) = addr
        && !path.insert(addr)
    {
        return f.write_str("<cycle>");
    }

    match data {
        Data::Null => f.write_str("null")?,
        Data::Undefined => f.write_str("undefined")?,
        Data::Bool(b) => write!(f, "{b}")?,
        Data::Number(n) => write!(f, "{n}")?,
        Data::NaN => f.write_str("NaN")?,
        Data::Infinity => f.write_str("Infinity")?,
        Data::NegativeInfinity => f.write_str("-Infinity")?,
        Data::String(s) => write!(f, "{s:?}")?,
        Data::Handle(kind) => write!(f, "Handle({kind})")?,
        Data::Array(node) => {
            let items = node.read().clone();
            f.write_str("[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                debug_inner(item, f, path)?;
            }
            f.write_str("]")?;
        }
        Data::Object(node) => {
            let members = node.read().clone();
            f.write_str("{")?;
            for (i, (key, item)) in members.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{key:?}: ")?;
                debug_inner(item, f, path)?;
            }
            f.write_str("}")?;
        }
    }

    if let Some(addr) = addr {
        path.remove(&addr);
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
