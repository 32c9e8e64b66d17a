//! Cycle-safe, size-chunked serialization of [`Data`].
//!
//! # Wire Format
//!
//! | Form | Shape |
//! |------|-------|
//! | Direct | Plain JSON of the value |
//! | Flattened | `" "` + JSON array of nodes, children referenced by index |
//! | Chunked | Ordered list of strings, each at most [`MAX_SERIALIZED_SIZE`] bytes |
//!
//! [`stringify`] tries the direct encoding first and only falls back to the
//! flattened form when it meets a cycle or nesting deeper than
//! [`MAX_DIRECT_DEPTH`]. Either output is chunked when it
//! exceeds [`MAX_SERIALIZED_SIZE`]. [`parse`] accepts all three forms.
//!
//! # Example
//!
//! ```
//! use devtools_bridge::protocol::{Data, serializer};
//!
//! let node = Data::object([("name", Data::from("root"))]);
//! node.set("self", node.clone());
//!
//! let wire = serializer::stringify(&node);
//! let back = serializer::parse(wire).unwrap();
//! assert!(back.get("self").unwrap().ptr_eq(&back));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use tracing::{trace, warn};

use crate::error::{Error, Result};

use super::value::Data;

// ============================================================================
// Constants
// ============================================================================

/// Largest serialized string sent as one piece (512 KiB).
pub const MAX_SERIALIZED_SIZE: usize = 512 * 1024;

/// Deepest nesting written in the direct form.
///
/// Kept below the JSON parser's recursion limit; deeper values use the
/// flattened form, which is never more than two levels deep.
pub const MAX_DIRECT_DEPTH: usize = 100;

/// Indentation cap, matching the JSON `space` convention.
const MAX_INDENT: usize = 10;

// ============================================================================
// Types
// ============================================================================

/// Per-key transform applied while encoding: `(key, value) -> value`.
///
/// The root is passed with an empty key; array elements with their decimal
/// index.
pub type Replacer<'a> = dyn Fn(&str, Data) -> Data + 'a;

/// Per-key transform applied while decoding: `(key, value) -> value`.
pub type Reviver<'a> = dyn Fn(&str, Data) -> Data + 'a;

// ============================================================================
// Serialized
// ============================================================================

/// Output of [`stringify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Serialized {
    /// Single string.
    Whole(String),
    /// Consecutive chunks; concatenate in order before decoding.
    Chunks(Vec<String>),
}

impl Serialized {
    /// Returns `true` if the output was split.
    #[inline]
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        matches!(self, Self::Chunks(_))
    }

    /// Total length in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Whole(s) => s.len(),
            Self::Chunks(chunks) => chunks.iter().map(String::len).sum(),
        }
    }

    /// Joins chunks into one string.
    #[must_use]
    pub fn into_string(self) -> String {
        match self {
            Self::Whole(s) => s,
            Self::Chunks(chunks) => chunks.concat(),
        }
    }

    /// Converts to the envelope payload value (string or array of strings).
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Whole(s) => Value::String(s.clone()),
            Self::Chunks(chunks) => Value::Array(chunks.iter().cloned().map(Value::String).collect()),
        }
    }

    /// Reads a payload value back.
    ///
    /// Returns `None` unless the value is a string or an array of strings.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Whole(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_owned))
                .collect::<Option<Vec<_>>>()
                .map(Self::Chunks),
            _ => None,
        }
    }
}

impl From<String> for Serialized {
    fn from(value: String) -> Self {
        Self::Whole(value)
    }
}

impl From<&str> for Serialized {
    fn from(value: &str) -> Self {
        Self::Whole(value.to_owned())
    }
}

impl From<Vec<String>> for Serialized {
    fn from(value: Vec<String>) -> Self {
        Self::Chunks(value)
    }
}

// ============================================================================
// Stringify
// ============================================================================

/// Serializes a value with no transform and compact output.
#[must_use]
pub fn stringify(value: &Data) -> Serialized {
    stringify_with(value, None, None)
}

/// Serializes a value.
///
/// # Arguments
///
/// * `replacer` - Optional per-key transform, applied on both encoding paths
/// * `space` - Optional indentation width (capped at 10)
#[must_use]
pub fn stringify_with(value: &Data, replacer: Option<&Replacer<'_>>, space: Option<usize>) -> Serialized {
    let root = apply(replacer, "", value.clone());

    let text = match encode_direct(&root, replacer, &mut FxHashSet::default(), 0) {
        Some(json) => write_json(&json, space).unwrap_or_else(|e| {
            warn!(error = %e, "Direct encoding failed");
            String::from("null")
        }),
        None => {
            trace!("Cycle or deep nesting, using flattened encoding");
            encode_flattened(root, replacer, space)
        }
    };

    split_chunks(text, MAX_SERIALIZED_SIZE)
}

/// Direct encoding.
///
/// `None` when a node repeats on the current path or a container sits
/// deeper than [`MAX_DIRECT_DEPTH`].
fn encode_direct(
    value: &Data,
    replacer: Option<&Replacer<'_>>,
    path: &mut FxHashSet<usize>,
    depth: usize,
) -> Option<Value> {
    let addr = value.node_addr();
    if addr.is_some() && depth >= MAX_DIRECT_DEPTH {
        return None;
    }
    if let Some(addr) = addr
        && !path.insert(addr)
    {
        return None;
    }

    let json = match value {
        Data::Array(node) => {
            let items = node.read().clone();
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                let item = apply(replacer, &i.to_string(), item);
                out.push(encode_direct(&item, replacer, path, depth + 1)?);
            }
            Value::Array(out)
        }
        Data::Object(node) => {
            let members = node.read().clone();
            let mut out = Map::new();
            for (key, item) in members {
                let item = apply(replacer, &key, item);
                let encoded = encode_direct(&item, replacer, path, depth + 1)?;
                out.insert(key, encoded);
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

/// Flattened encoding, prefixed with the whitespace marker.
fn encode_flattened(root: Data, replacer: Option<&Replacer<'_>>, space: Option<usize>) -> String {
    let mut flattener = Flattener {
        list: Vec::new(),
        seen: FxHashMap::default(),
        retained: Vec::new(),
        replacer,
    };
    flattener.encode(root);

    match write_json(&Value::Array(flattener.list), space) {
        Ok(json) => format!(" {json}"),
        Err(e) => {
            warn!(error = %e, "Flattened encoding failed");
            String::from(" []")
        }
    }
}

/// Assigns list indices in first-seen order.
///
/// `seen` is keyed by node address, so every visited node is held in
/// `retained` until encoding ends; a freed replacer output must not hand
/// its address to a later node.
struct Flattener<'a, 'r> {
    list: Vec<Value>,
    seen: FxHashMap<usize, usize>,
    retained: Vec<Data>,
    replacer: Option<&'a Replacer<'r>>,
}

impl Flattener<'_, '_> {
    fn encode(&mut self, value: Data) -> usize {
        let index = self.list.len();

        let Some(addr) = value.node_addr() else {
            self.list.push(value.scalar_to_json());
            return index;
        };
        if let Some(&seen) = self.seen.get(&addr) {
            return seen;
        }

        // Reserve the slot before children so they get higher indices.
        self.seen.insert(addr, index);
        self.retained.push(value.clone());
        self.list.push(Value::Null);

        let slots = match value {
            Data::Array(node) => {
                let items = node.read().clone();
                let mut slots = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    let item = apply(self.replacer, &i.to_string(), item);
                    slots.push(Value::from(self.encode(item)));
                }
                Value::Array(slots)
            }
            Data::Object(node) => {
                let members = node.read().clone();
                let mut slots = Map::new();
                for (key, item) in members {
                    let item = apply(self.replacer, &key, item);
                    let child = self.encode(item);
                    slots.insert(key, Value::from(child));
                }
                Value::Object(slots)
            }
            _ => Value::Null,
        };
        self.list[index] = slots;
        index
    }
}

fn write_json(value: &Value, space: Option<usize>) -> serde_json::Result<String> {
    match space.map(|n| n.min(MAX_INDENT)).filter(|n| *n > 0) {
        Some(width) => {
            let indent = " ".repeat(width);
            let mut out = Vec::new();
            let mut ser =
                serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(indent.as_bytes()));
            value.serialize(&mut ser)?;
            Ok(String::from_utf8_lossy(&out).into_owned())
        }
        None => serde_json::to_string(value),
    }
}

/// Splits `text` into consecutive chunks of at most `max` bytes.
///
/// Chunk boundaries never fall inside a UTF-8 character.
pub(crate) fn split_chunks(text: String, max: usize) -> Serialized {
    if text.len() <= max {
        return Serialized::Whole(text);
    }

    let max = max.max(4);
    let mut chunks = Vec::with_capacity(text.len().div_ceil(max));
    let mut rest = text.as_str();
    while !rest.is_empty() {
        let mut end = max.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        chunks.push(rest[..end].to_owned());
        rest = &rest[end..];
    }

    trace!(chunks = chunks.len(), bytes = text.len(), "Serialized payload chunked");
    Serialized::Chunks(chunks)
}

// ============================================================================
// Parse
// ============================================================================

/// Decodes any wire form with no transform.
///
/// # Errors
///
/// - [`Error::Json`] if the text is not valid JSON
/// - [`Error::Protocol`] if a flattened index is invalid
pub fn parse(data: impl Into<Serialized>) -> Result<Data> {
    parse_with(data, None)
}

/// Decodes any wire form, applying `reviver` per key and finally to the root.
///
/// # Errors
///
/// - [`Error::Json`] if the text is not valid JSON
/// - [`Error::Protocol`] if a flattened index is invalid
pub fn parse_with(data: impl Into<Serialized>, reviver: Option<&Reviver<'_>>) -> Result<Data> {
    let text = data.into().into_string();

    if text.starts_with(char::is_whitespace) {
        let list: Vec<Value> = serde_json::from_str(&text)?;
        return decode_flattened(&list, reviver);
    }

    let json: Value = serde_json::from_str(&text)?;
    let root = revive_tree(Data::from(json), reviver);
    Ok(apply(reviver, "", root))
}

/// Rebuilds the shared graph from the flat list.
///
/// Every container is allocated before any is filled, so a slot may point
/// at any index, earlier or later. Filling runs from the last entry to the
/// first, which hands the reviver fully built children.
fn decode_flattened(list: &[Value], reviver: Option<&Reviver<'_>>) -> Result<Data> {
    if list.is_empty() {
        return Ok(Data::Undefined);
    }

    let nodes: Vec<Data> = list
        .iter()
        .map(|raw| match raw {
            Value::Array(_) => Data::array([]),
            Value::Object(_) => Data::object::<String>([]),
            scalar => Data::scalar_from_json(scalar),
        })
        .collect();

    for (raw, node) in list.iter().zip(nodes.iter()).rev() {
        match (raw, node) {
            (Value::Array(slots), Data::Array(target)) => {
                let mut items = Vec::with_capacity(slots.len());
                for (i, slot) in slots.iter().enumerate() {
                    let child = resolve(&nodes, slot)?;
                    items.push(apply(reviver, &i.to_string(), child));
                }
                *target.write() = items;
            }
            (Value::Object(slots), Data::Object(target)) => {
                let mut members = BTreeMap::new();
                for (key, slot) in slots {
                    let child = resolve(&nodes, slot)?;
                    members.insert(key.clone(), apply(reviver, key, child));
                }
                *target.write() = members;
            }
            _ => {}
        }
    }

    Ok(apply(reviver, "", nodes[0].clone()))
}

fn resolve(nodes: &[Data], slot: &Value) -> Result<Data> {
    let index = slot
        .as_u64()
        .ok_or_else(|| Error::protocol(format!("flattened slot is not an index: {slot}")))?;
    usize::try_from(index)
        .ok()
        .and_then(|i| nodes.get(i))
        .cloned()
        .ok_or_else(|| Error::protocol(format!("flattened index {index} out of range ({})", nodes.len())))
}

/// Applies the reviver bottom-up to a freshly decoded tree.
fn revive_tree(value: Data, reviver: Option<&Reviver<'_>>) -> Data {
    let Some(reviver) = reviver else {
        return value;
    };

    match &value {
        Data::Array(node) => {
            let items = node.read().clone();
            let revived: Vec<Data> = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| reviver(&i.to_string(), revive_tree(item, Some(reviver))))
                .collect();
            *node.write() = revived;
        }
        Data::Object(node) => {
            let members = node.read().clone();
            let revived: BTreeMap<String, Data> = members
                .into_iter()
                .map(|(key, item)| {
                    let item = reviver(&key, revive_tree(item, Some(reviver)));
                    (key, item)
                })
                .collect();
            *node.write() = revived;
        }
        _ => {}
    }
    value
}

#[inline]
fn apply(transform: Option<&Replacer<'_>>, key: &str, value: Data) -> Data {
    match transform {
        Some(f) => f(key, value),
        None => value,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    fn sample() -> Data {
        Data::from(json!({
            "name": "App",
            "props": { "count": 3, "tags": ["a", "b"], "nested": { "deep": true } },
            "children": [1, 2.5, null, "x"]
        }))
    }

    fn cyclic() -> Data {
        let root = Data::object([("name", Data::from("root"))]);
        let child = Data::object([("name", Data::from("child"))]);
        child.set("parent", root.clone());
        root.set("child", child);
        root.set("self", root.clone());
        root
    }

    #[test]
    fn test_acyclic_uses_direct_json() {
        let wire = stringify(&sample());
        let Serialized::Whole(text) = &wire else {
            panic!("expected whole output");
        };
        assert!(!text.starts_with(' '));
        let plain: Value = serde_json::from_str(text).expect("plain json");
        assert_eq!(plain["props"]["count"], json!(3));
    }

    #[test]
    fn test_acyclic_roundtrip() {
        let value = sample();
        let back = parse(stringify(&value)).expect("parse");
        assert_eq!(back, value);
    }

    #[test]
    fn test_cycle_uses_flattened_form() {
        let wire = stringify(&cyclic()).into_string();
        assert!(wire.starts_with(' '));
        let list: Vec<Value> = serde_json::from_str(&wire).expect("list");
        // root object first, its members by index
        assert!(list[0].is_object());
        assert!(list[0]["self"] == json!(0));
    }

    #[test]
    fn test_cycle_roundtrip_preserves_identity() {
        let back = parse(stringify(&cyclic())).expect("parse");
        let child = back.get("child").expect("child");
        assert!(back.get("self").expect("self").ptr_eq(&back));
        assert!(child.get("parent").expect("parent").ptr_eq(&back));
        assert_eq!(child.get("name").and_then(|n| n.as_str().map(String::from)), Some("child".into()));
    }

    #[test]
    fn test_mutual_array_cycle() {
        let a = Data::array([Data::from(1)]);
        let b = Data::array([Data::from(2), a.clone()]);
        a.push(b.clone());

        let back = parse(stringify(&a)).expect("parse");
        let inner = back.at(1).expect("b");
        assert!(inner.at(1).expect("a").ptr_eq(&back));
        assert_eq!(inner.at(0).and_then(|v| v.as_f64()), Some(2.0));
    }

    #[test]
    fn test_shared_node_in_cyclic_graph_keeps_sharing() {
        let shared = Data::object([("v", Data::from(1))]);
        let root = Data::array([shared.clone(), shared]);
        root.push(root.clone());

        let back = parse(stringify(&root)).expect("parse");
        assert!(back.at(0).expect("0").ptr_eq(&back.at(1).expect("1")));
    }

    #[test]
    fn test_special_values_roundtrip() {
        let value = Data::array([
            Data::Undefined,
            Data::NaN,
            Data::Infinity,
            Data::NegativeInfinity,
            Data::Null,
        ]);
        let back = parse(stringify(&value)).expect("parse");
        assert_eq!(back, value);
    }

    #[test]
    fn test_handle_becomes_placeholder_string() {
        let value = Data::object([("socket", Data::handle("WebSocket"))]);
        let back = parse(stringify(&value)).expect("parse");
        assert_eq!(
            back.get("socket").and_then(|v| v.as_str().map(String::from)),
            Some("[native Handle WebSocket]".into())
        );
    }

    #[test]
    fn test_large_payload_is_chunked() {
        let big = "x".repeat(MAX_SERIALIZED_SIZE + 1000);
        let value = Data::object([("blob", Data::from(big.clone()))]);

        let wire = stringify(&value);
        let Serialized::Chunks(chunks) = &wire else {
            panic!("expected chunks");
        };
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() <= MAX_SERIALIZED_SIZE));

        let back = parse(wire).expect("parse");
        assert_eq!(back.get("blob").and_then(|v| v.as_str().map(str::len)), Some(big.len()));
    }

    #[test]
    fn test_large_cyclic_payload_is_chunked() {
        let root = Data::object([("blob", Data::from("y".repeat(MAX_SERIALIZED_SIZE)))]);
        root.set("self", root.clone());

        let wire = stringify(&root);
        assert!(wire.is_chunked());
        let back = parse(wire).expect("parse");
        assert!(back.get("self").expect("self").ptr_eq(&back));
    }

    #[test]
    fn test_split_chunks_respects_char_boundaries() {
        let text = "héllo wörld ✓✓✓".to_owned();
        let Serialized::Chunks(chunks) = split_chunks(text.clone(), 5) else {
            panic!("expected chunks");
        };
        assert!(chunks.iter().all(|c| c.len() <= 5 && !c.is_empty()));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_split_chunks_small_input_is_whole() {
        assert_eq!(split_chunks("abc".into(), 5), Serialized::Whole("abc".into()));
    }

    #[test]
    fn test_serialized_value_conversion() {
        let chunks = Serialized::Chunks(vec!["{\"a\"".into(), ":1}".into()]);
        let value = chunks.to_value();
        assert_eq!(value, json!(["{\"a\"", ":1}"]));
        assert_eq!(Serialized::from_value(&value), Some(chunks));
        assert_eq!(Serialized::from_value(&json!(1)), None);
        assert_eq!(Serialized::from_value(&json!(["a", 1])), None);
    }

    #[test]
    fn test_parse_chunk_list() {
        let back = parse(vec!["{\"a\"".to_owned(), ":1}".to_owned()]).expect("parse");
        assert_eq!(back.get("a").and_then(|v| v.as_f64()), Some(1.0));
    }

    #[test]
    fn test_space_indents_output() {
        let wire = stringify_with(&Data::from(json!({ "a": 1 })), None, Some(2)).into_string();
        assert_eq!(wire, "{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_replacer_applies_on_both_paths() {
        let replacer = |key: &str, value: Data| {
            if key == "secret" { Data::from("***") } else { value }
        };

        let plain = Data::object([("secret", Data::from("pw")), ("n", Data::from(1))]);
        let back = parse(stringify_with(&plain, Some(&replacer), None)).expect("parse");
        assert_eq!(back.get("secret").and_then(|v| v.as_str().map(String::from)), Some("***".into()));

        let looped = Data::object([("secret", Data::from("pw"))]);
        looped.set("me", looped.clone());
        let wire = stringify_with(&looped, Some(&replacer), None);
        assert!(wire.clone().into_string().starts_with(' '));
        let back = parse(wire).expect("parse");
        assert_eq!(back.get("secret").and_then(|v| v.as_str().map(String::from)), Some("***".into()));
    }

    #[test]
    fn test_replacer_fresh_nodes_keep_distinct_slots() {
        let replacer = |key: &str, value: Data| match key {
            "a" | "b" | "c" => Data::object([("wrapped", value)]),
            _ => value,
        };

        let looped = Data::object([("a", Data::from(1)), ("b", Data::from(2)), ("c", Data::from(3))]);
        looped.set("self", looped.clone());
        let back = parse(stringify_with(&looped, Some(&replacer), None)).expect("parse");

        let wrapped = |key: &str| back.get(key).and_then(|v| v.get("wrapped")).and_then(|v| v.as_f64());
        assert_eq!(wrapped("a"), Some(1.0));
        assert_eq!(wrapped("b"), Some(2.0));
        assert_eq!(wrapped("c"), Some(3.0));
        assert!(back.get("self").expect("self").ptr_eq(&back));
    }

    #[test]
    fn test_replacer_sees_root_with_empty_key() {
        let replacer = |key: &str, value: Data| if key.is_empty() { Data::from("root") } else { value };
        let back = parse(stringify_with(&Data::from(1), Some(&replacer), None)).expect("parse");
        assert_eq!(back.as_str(), Some("root"));
    }

    #[test]
    fn test_reviver_applies_on_both_paths() {
        let reviver = |key: &str, value: Data| match (key, value.as_f64()) {
            ("count", Some(n)) => Data::float(n * 10.0),
            _ => value,
        };

        let plain = Data::object([("count", Data::from(2))]);
        let back = parse_with(stringify(&plain), Some(&reviver)).expect("parse");
        assert_eq!(back.get("count").and_then(|v| v.as_f64()), Some(20.0));

        let looped = Data::object([("count", Data::from(2))]);
        looped.set("me", looped.clone());
        let back = parse_with(stringify(&looped), Some(&reviver)).expect("parse");
        assert_eq!(back.get("count").and_then(|v| v.as_f64()), Some(20.0));
        assert!(back.get("me").expect("me").ptr_eq(&back));
    }

    #[test]
    fn test_reviver_runs_root_last() {
        let order = parking_lot::Mutex::new(Vec::new());
        let reviver = |key: &str, value: Data| {
            order.lock().push(key.to_owned());
            value
        };
        parse_with(r#"{"a":{"b":1}}"#, Some(&reviver)).expect("parse");
        assert_eq!(*order.lock(), vec!["b".to_owned(), "a".to_owned(), String::new()]);
    }

    #[test]
    fn test_deep_nesting_roundtrip() {
        let mut value = Data::array([Data::from("leaf")]);
        for _ in 0..250 {
            value = Data::array([value]);
        }

        let wire = stringify(&value);
        assert!(wire.clone().into_string().starts_with(' '));
        let back = parse(wire).expect("parse");
        assert_eq!(back, value);
    }

    #[test]
    fn test_nesting_at_direct_limit_stays_direct() {
        let mut value = Data::from(1);
        for _ in 0..MAX_DIRECT_DEPTH {
            value = Data::array([value]);
        }

        let wire = stringify(&value).into_string();
        assert!(wire.starts_with('['));
        assert_eq!(parse(wire).expect("parse"), value);
    }

    #[test]
    fn test_forward_reference_decodes() {
        // parent at 0 points forward to 2, 2 points back to 0
        let back = parse(r#" [{"next":2},"unused",{"prev":0}]"#).expect("parse");
        let next = back.get("next").expect("next");
        assert!(next.get("prev").expect("prev").ptr_eq(&back));
    }

    #[test]
    fn test_invalid_index_is_protocol_error() {
        let err = parse(r#" [{"a":9}]"#).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        let err = parse(r#" [{"a":"x"}]"#).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_invalid_json_is_json_error() {
        assert!(matches!(parse("{nope"), Err(Error::Json(_))));
    }

    #[test]
    fn test_empty_flattened_list_is_undefined() {
        assert!(matches!(parse(" []"), Ok(Data::Undefined)));
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z0-9 é✓]{0,12}".prop_map(Value::from),
        ];
        leaf.prop_recursive(4, 48, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_acyclic_values_roundtrip(json in arb_json()) {
            let value = Data::from(json);
            let back = parse(stringify(&value)).expect("parse");
            prop_assert_eq!(back, value);
        }
    }
}
