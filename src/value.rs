//! Instance graphs.
//!
//! Composite instances live in a `Heap` arena and are addressed by `NodeId`;
//! a `Value::Ref` is a pointer into that arena, so aliasing and cycles are
//! just repeated ids. Identity of an instance is its node id.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize { self.0 }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A callable value. Equality is identity of the underlying closure.
#[derive(Clone)]
pub struct Func {
    name: Arc<str>,
    arity: usize,
    call: Arc<dyn Fn(&[Value]) -> Value + Send + Sync>,
}

impl Func {
    pub fn new(
        name: impl Into<Arc<str>>,
        arity: usize,
        call: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self { name: name.into(), arity, call: Arc::new(call) }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn arity(&self) -> usize { self.arity }

    pub fn call(&self, args: &[Value]) -> Value { (self.call)(args) }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Func({}/{})", self.name, self.arity)
    }
}

impl PartialEq for Func {
    fn eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.call, &other.call) }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    Function(Func),
    Ref(NodeId),
}

impl Value {
    pub fn is_undefined(&self) -> bool { matches!(self, Value::Undefined) }

    pub fn as_ref_id(&self) -> Option<NodeId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Kind name used in mismatch messages; composites need the heap.
    pub fn kind_name(&self, heap: &Heap) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Function(_) => "function",
            Value::Ref(id) => match heap.get(*id) {
                Some(Node::Object(_)) => "object",
                Some(Node::Array(_)) => "array",
                Some(Node::Map(_)) => "map",
                None => "dangling reference",
            },
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::String(s.to_string()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::String(s) }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self { Value::Number(n) }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}

impl From<NodeId> for Value {
    fn from(id: NodeId) -> Self { Value::Ref(id) }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Object(IndexMap<String, Value>),
    Array(Vec<Value>),
    /// Insertion-ordered entries; keys may themselves be composites.
    Map(Vec<(Value, Value)>),
}

// -------------------------------- Heap ------------------------------------ //

#[derive(Debug, Clone, Default)]
pub struct Heap {
    nodes: Vec<Node>,
}

impl Heap {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.nodes.len() }

    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> { self.nodes.get(id.0) }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> { self.nodes.get_mut(id.0) }

    /// Drop every node allocated after `len`. Used to roll back a failed
    /// speculative decode.
    pub(crate) fn truncate(&mut self, len: usize) { self.nodes.truncate(len) }

    pub fn object<K, I>(&mut self, props: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let map = props.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Value::Ref(self.alloc(Node::Object(map)))
    }

    pub fn array(&mut self, items: Vec<Value>) -> Value {
        Value::Ref(self.alloc(Node::Array(items)))
    }

    pub fn map(&mut self, entries: Vec<(Value, Value)>) -> Value {
        Value::Ref(self.alloc(Node::Map(entries)))
    }

    /// Set a property on an object node. Returns false if `id` is not an object.
    pub fn set(&mut self, id: NodeId, property: impl Into<String>, value: Value) -> bool {
        match self.get_mut(id) {
            Some(Node::Object(props)) => {
                props.insert(property.into(), value);
                true
            }
            _ => false,
        }
    }

    /// Append to an array node. Returns false if `id` is not an array.
    pub fn push(&mut self, id: NodeId, value: Value) -> bool {
        match self.get_mut(id) {
            Some(Node::Array(items)) => {
                items.push(value);
                true
            }
            _ => false,
        }
    }

    pub fn object_props(&self, value: &Value) -> Option<&IndexMap<String, Value>> {
        match value {
            Value::Ref(id) => match self.get(*id) {
                Some(Node::Object(props)) => Some(props),
                _ => None,
            },
            _ => None,
        }
    }

    /// Property lookup through a reference; `Undefined` counts as absent.
    pub fn property<'a>(&'a self, value: &Value, name: &str) -> Option<&'a Value> {
        self.object_props(value)?.get(name).filter(|v| !v.is_undefined())
    }

    pub fn array_items(&self, value: &Value) -> Option<&[Value]> {
        match value {
            Value::Ref(id) => match self.get(*id) {
                Some(Node::Array(items)) => Some(items),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn map_entries(&self, value: &Value) -> Option<&[(Value, Value)]> {
        match value {
            Value::Ref(id) => match self.get(*id) {
                Some(Node::Map(entries)) => Some(entries),
                _ => None,
            },
            _ => None,
        }
    }

    /// One-line rendering for error messages. Composites are not expanded.
    pub fn preview(&self, value: &Value) -> String {
        match value {
            Value::Null => "null".into(),
            Value::Undefined => "undefined".into(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => format!("{s:?}"),
            Value::Date(d) => d.to_rfc3339(),
            Value::Function(f) => format!("fn {}/{}", f.name(), f.arity()),
            Value::Ref(id) => format!("{}{id}", value.kind_name(self)),
        }
    }

    // ---------------------------- plain JSON ------------------------------ //

    /// Build a fresh tree of nodes from plain JSON.
    pub fn import_json(&mut self, json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(s.clone()),
            Json::Array(xs) => {
                let items = xs.iter().map(|x| self.import_json(x)).collect();
                self.array(items)
            }
            Json::Object(map) => {
                let props: IndexMap<String, Value> =
                    map.iter().map(|(k, v)| (k.clone(), self.import_json(v))).collect();
                Value::Ref(self.alloc(Node::Object(props)))
            }
        }
    }

    /// Render as plain JSON. Back-edges become `"<cycle>"`, maps become
    /// `[key, value]` pair lists.
    pub fn export_json(&self, value: &Value) -> Json {
        let mut on_stack = HashSet::new();
        self.export_inner(value, &mut on_stack)
    }

    fn export_inner(&self, value: &Value, on_stack: &mut HashSet<NodeId>) -> Json {
        match value {
            Value::Null | Value::Undefined => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => crate::encode::json_number(*n).unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Date(d) => Json::String(d.to_rfc3339()),
            Value::Function(f) => Json::String(format!("<fn {}>", f.name())),
            Value::Ref(id) => {
                if !on_stack.insert(*id) {
                    return Json::String("<cycle>".into());
                }
                let out = match self.get(*id) {
                    None => Json::Null,
                    Some(Node::Object(props)) => {
                        let mut m = serde_json::Map::new();
                        for (k, v) in props {
                            if !v.is_undefined() {
                                m.insert(k.clone(), self.export_inner(v, on_stack));
                            }
                        }
                        Json::Object(m)
                    }
                    Some(Node::Array(items)) => {
                        Json::Array(items.iter().map(|v| self.export_inner(v, on_stack)).collect())
                    }
                    Some(Node::Map(entries)) => Json::Array(
                        entries
                            .iter()
                            .map(|(k, v)| {
                                Json::Array(vec![
                                    self.export_inner(k, on_stack),
                                    self.export_inner(v, on_stack),
                                ])
                            })
                            .collect(),
                    ),
                };
                on_stack.remove(id);
                out
            }
        }
    }

    // ------------------------- structural equality ------------------------ //

    /// Structural equality across two heaps that also requires the aliasing
    /// shape to agree: nodes are paired one-to-one, so two references to the
    /// same node on one side must map to the same node on the other.
    pub fn structurally_equal(&self, a: &Value, other: &Heap, b: &Value) -> bool {
        let mut pairs = Pairing::default();
        self.eq_inner(a, other, b, &mut pairs)
    }

    fn eq_inner(&self, a: &Value, other: &Heap, b: &Value, pairs: &mut Pairing) -> bool {
        match (a, b) {
            (Value::Ref(x), Value::Ref(y)) => {
                match (pairs.fwd.get(x), pairs.bwd.get(y)) {
                    (Some(px), Some(py)) => return px == y && py == x,
                    (None, None) => {}
                    _ => return false,
                }
                pairs.fwd.insert(*x, *y);
                pairs.bwd.insert(*y, *x);
                match (self.get(*x), other.get(*y)) {
                    (Some(Node::Object(pa)), Some(Node::Object(pb))) => {
                        let da: Vec<_> = pa.iter().filter(|(_, v)| !v.is_undefined()).collect();
                        let db: Vec<_> = pb.iter().filter(|(_, v)| !v.is_undefined()).collect();
                        da.len() == db.len()
                            && da.iter().all(|(k, va)| match pb.get(*k) {
                                Some(vb) => self.eq_inner(va, other, vb, pairs),
                                None => false,
                            })
                    }
                    (Some(Node::Array(xa)), Some(Node::Array(xb))) => {
                        xa.len() == xb.len()
                            && xa.iter().zip(xb).all(|(va, vb)| self.eq_inner(va, other, vb, pairs))
                    }
                    (Some(Node::Map(ea)), Some(Node::Map(eb))) => {
                        ea.len() == eb.len()
                            && ea.iter().zip(eb).all(|((ka, va), (kb, vb))| {
                                self.eq_inner(ka, other, kb, pairs) && self.eq_inner(va, other, vb, pairs)
                            })
                    }
                    _ => false,
                }
            }
            (Value::Ref(_), _) | (_, Value::Ref(_)) => false,
            _ => a == b,
        }
    }
}

#[derive(Default)]
struct Pairing {
    fwd: HashMap<NodeId, NodeId>,
    bwd: HashMap<NodeId, NodeId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn import_then_export_is_identity_for_trees() {
        let src = json!({"a": [1, 2.5, "x"], "b": {"c": null, "d": true}});
        let mut heap = Heap::new();
        let v = heap.import_json(&src);
        assert_eq!(heap.export_json(&v), src);
    }

    #[test]
    fn export_marks_back_edges() {
        let mut heap = Heap::new();
        let v = heap.object([("name", Value::from("loop"))]);
        let id = v.as_ref_id().unwrap();
        heap.set(id, "me", v.clone());
        assert_eq!(heap.export_json(&v), json!({"name": "loop", "me": "<cycle>"}));
    }

    #[test]
    fn structural_equality_respects_aliasing() {
        let mut a = Heap::new();
        let shared = a.object([("n", Value::from(1.0))]);
        let root_a = a.array(vec![shared.clone(), shared]);

        let mut b = Heap::new();
        let x = b.object([("n", Value::from(1.0))]);
        let y = b.object([("n", Value::from(1.0))]);
        let root_b = b.array(vec![x, y]);

        assert!(a.structurally_equal(&root_a, &a, &root_a));
        assert!(!a.structurally_equal(&root_a, &b, &root_b));
    }

    #[test]
    fn undefined_property_reads_as_absent() {
        let mut heap = Heap::new();
        let v = heap.object([("a", Value::Undefined), ("b", Value::Null)]);
        assert!(heap.property(&v, "a").is_none());
        assert_eq!(heap.property(&v, "b"), Some(&Value::Null));
    }
}
