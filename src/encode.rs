//! Instance → DTO.
//!
//! Graph encoding wraps each composite as `{ ref: {id, category, typeName}, <payload> }`
//! and emits a bare `{ ref }` token on every later occurrence of the same
//! `(type, node)`. Tree encoding inlines payloads and fails on a cycle.
use serde_json::{Map, Value as Json, json};

use crate::context::{ConversionContext, ConversionOptions, Encoding};
use crate::error::{ErrorKind, Failure, PathSegment};
use crate::schema::TypeRegistry;
use crate::shape;
use crate::types::{Literal, Scalar, TypeId, TypeKind};
use crate::value::{Heap, Node, NodeId, Value};
use crate::visited::InstanceKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Full payload written (or being written) under this id.
    Emitted(u64),
    /// Id handed out to a non-owning reference; payload still owed.
    Reserved(u64),
    /// Tree mode: currently being inlined.
    OnStack,
}

pub(crate) fn to_dto(
    reg: &TypeRegistry,
    heap: &Heap,
    ty: TypeId,
    value: &Value,
    options: &ConversionOptions,
) -> Result<Json, Failure> {
    if options.validate {
        crate::validate::validate(reg, heap, ty, value)?;
    }
    let mut enc = Encoder { reg, heap, ctx: ConversionContext::new(options) };
    let out = enc.encode(ty, value);
    enc.report_unpaid_reservations();
    let result = enc.ctx.into_result(out.unwrap_or(Json::Null));
    tracing::debug!(
        type_name = %reg.display_name(ty),
        encoding = ?options.encoding(),
        violations = result.as_ref().err().map_or(0, Failure::len),
        "to_dto"
    );
    result
}

/// JSON number for `n`, integral when exact. `None` for NaN and infinities.
pub(crate) fn json_number(n: f64) -> Option<Json> {
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n < 9.223_372_036_854_775_808e18 {
        Some(Json::from(n as i64))
    } else {
        serde_json::Number::from_f64(n).map(Json::Number)
    }
}

struct Encoder<'r, 'h, 'o> {
    reg: &'r TypeRegistry,
    heap: &'h Heap,
    ctx: ConversionContext<'o, InstanceKey, Slot>,
}

impl Encoder<'_, '_, '_> {
    fn mismatch(&mut self, expected: String, value: &Value) {
        let found = value.kind_name(self.heap).to_string();
        let preview = self.heap.preview(value);
        self.ctx.report_value(ErrorKind::TypeMismatch { expected, found }, preview);
    }

    fn node_of(&self, value: &Value, want: fn(&Node) -> bool) -> Option<NodeId> {
        value.as_ref_id().filter(|id| self.heap.get(*id).is_some_and(want))
    }

    fn ref_json(&self, id: u64, category: &str, type_name: String) -> Json {
        json!({ "id": id, "category": category, "typeName": type_name })
    }

    fn token(&self, id: u64, category: &str, type_name: String) -> Json {
        json!({ "ref": self.ref_json(id, category, type_name) })
    }

    /// The shared composite protocol. `node` is the instance identity, when
    /// the value has one; `body` produces the payload entries.
    fn composite(
        &mut self,
        cid: TypeId,
        node: Option<NodeId>,
        body: impl FnOnce(&mut Self) -> Option<Map<String, Json>>,
    ) -> Option<Json> {
        let reg = self.reg;
        let category = reg.get(cid).kind().category();
        match self.ctx.options.encoding() {
            Encoding::Tree => {
                if let Some(n) = node {
                    if self.ctx.visited.contains(&(cid, n)) {
                        self.ctx.report(ErrorKind::CycleInTreeEncoding { type_name: reg.display_name(cid) });
                        return None;
                    }
                    self.ctx.visited.insert((cid, n), Slot::OnStack);
                }
                let payload = body(self);
                if let Some(n) = node {
                    self.ctx.visited.remove(&(cid, n));
                }
                payload.map(Json::Object)
            }
            Encoding::Graph => {
                let id = match node.and_then(|n| self.ctx.visited.get(&(cid, n)).copied()) {
                    Some(Slot::Emitted(id)) => return Some(self.token(id, category, reg.display_name(cid))),
                    Some(Slot::Reserved(id)) => id,
                    _ => self.ctx.next_id(),
                };
                if let Some(n) = node {
                    // marked before descending so back-edges find it
                    self.ctx.visited.insert((cid, n), Slot::Emitted(id));
                }
                let payload = body(self)?;
                let mut out = Map::new();
                out.insert("ref".into(), self.ref_json(id, category, reg.display_name(cid)));
                out.extend(payload);
                Some(Json::Object(out))
            }
        }
    }

    fn encode(&mut self, ty: TypeId, value: &Value) -> Option<Json> {
        let reg = self.reg;
        let cid = match reg.concrete(ty) {
            Ok(c) => c,
            Err(e) => {
                self.ctx.report(e);
                return None;
            }
        };
        match reg.get(cid).kind() {
            TypeKind::Simple(s) => self.encode_scalar(s, value),
            TypeKind::Optional(inner) => {
                if value.is_undefined() { Some(Json::Null) } else { self.encode(*inner, value) }
            }
            TypeKind::Link(_) => unreachable!("concrete() never yields a link"),
            TypeKind::Object(_) | TypeKind::Subtype { .. } => {
                let Some(n) = self.node_of(value, |n| matches!(n, Node::Object(_))) else {
                    self.mismatch(reg.display_name(cid), value);
                    return None;
                };
                self.composite(cid, Some(n), |enc| {
                    let object = enc.encode_properties(cid, value)?;
                    Some(Map::from_iter([("object".to_string(), Json::Object(object))]))
                })
            }
            TypeKind::Array(item) => {
                let Some(n) = self.node_of(value, |n| matches!(n, Node::Array(_))) else {
                    self.mismatch("array".into(), value);
                    return None;
                };
                self.composite(cid, Some(n), |enc| {
                    let items = enc.heap.array_items(value).unwrap_or_default();
                    let mut out = Vec::with_capacity(items.len());
                    let mut ok = true;
                    for (i, el) in items.iter().enumerate() {
                        enc.ctx.enter(PathSegment::Index(i));
                        match enc.encode(*item, el) {
                            Some(j) => out.push(j),
                            None => ok = false,
                        }
                        enc.ctx.leave();
                    }
                    ok.then(|| Map::from_iter([("array".to_string(), Json::Array(out))]))
                })
            }
            TypeKind::Map { key, value: val_ty } => {
                let Some(n) = self.node_of(value, |n| matches!(n, Node::Map(_))) else {
                    self.mismatch("map".into(), value);
                    return None;
                };
                self.composite(cid, Some(n), |enc| {
                    let entries = enc.heap.map_entries(value).unwrap_or_default();
                    let mut out = Vec::with_capacity(entries.len());
                    let mut ok = true;
                    for (i, (k, v)) in entries.iter().enumerate() {
                        enc.ctx.enter(PathSegment::MapKey(i));
                        let kj = enc.encode(*key, k);
                        enc.ctx.leave();
                        enc.ctx.enter(PathSegment::MapValue(i));
                        let vj = enc.encode(*val_ty, v);
                        enc.ctx.leave();
                        match (kj, vj) {
                            (Some(kj), Some(vj)) => out.push(Json::Array(vec![kj, vj])),
                            _ => ok = false,
                        }
                    }
                    ok.then(|| Map::from_iter([("map".to_string(), Json::Array(out))]))
                })
            }
            TypeKind::Union(members) => self.composite(cid, value.as_ref_id(), |enc| {
                let names = shape::member_names(enc.reg, members);
                let Some(pos) = members.iter().position(|m| crate::validate::matches(enc.reg, enc.heap, *m, value)) else {
                    let preview = enc.heap.preview(value);
                    enc.ctx.report_value(
                        ErrorKind::NoMatchingMember {
                            union: enc.reg.display_name(cid),
                            reason: format!("tried {} members in order", members.len()),
                        },
                        preview,
                    );
                    return None;
                };
                let payload = enc.encode(members[pos], value)?;
                Some(Map::from_iter([
                    ("typeInUnion".to_string(), Json::String(names[pos].clone())),
                    ("union".to_string(), payload),
                ]))
            }),
            TypeKind::TaggedUnion { discriminator, members } => self.composite(cid, value.as_ref_id(), |enc| {
                let member = enc.select_tagged(cid, members, discriminator, value)?;
                let payload = enc.encode(member, value)?;
                Some(Map::from_iter([("taggedUnion".to_string(), payload)]))
            }),
            TypeKind::Intersection(members) => self.composite(cid, value.as_ref_id(), |enc| {
                let mut out = Map::new();
                let mut ok = true;
                for (m, name) in members.iter().zip(shape::member_names(enc.reg, members)) {
                    enc.ctx.enter(PathSegment::Member(name.clone()));
                    match enc.encode(*m, value) {
                        Some(j) => {
                            out.insert(name, j);
                        }
                        None => ok = false,
                    }
                    enc.ctx.leave();
                }
                ok.then(|| Map::from_iter([("intersection".to_string(), Json::Object(out))]))
            }),
            TypeKind::EntityReference(target) => self.encode_entity_reference(cid, *target, value),
            TypeKind::ObjReference(target) => self.encode_obj_reference(*target, value),
            TypeKind::Functional { .. } => {
                self.ctx.report(ErrorKind::NotSerializable { type_name: reg.display_name(cid) });
                None
            }
        }
    }

    fn encode_scalar(&mut self, s: &Scalar, value: &Value) -> Option<Json> {
        if !s.matches(value) {
            self.mismatch(s.name(), value);
            return None;
        }
        match value {
            Value::Null | Value::Undefined => Some(Json::Null),
            Value::Bool(b) => Some(Json::Bool(*b)),
            Value::String(st) => Some(Json::String(st.clone())),
            Value::Date(d) => Some(Json::String(d.to_rfc3339())),
            Value::Number(n) => {
                let out = json_number(*n);
                if out.is_none() {
                    self.ctx.report_value(
                        ErrorKind::ValidationError {
                            constraint: "finite".into(),
                            message: "non-finite numbers have no JSON form".into(),
                        },
                        n.to_string(),
                    );
                }
                out
            }
            Value::Function(_) | Value::Ref(_) => None,
        }
    }

    fn encode_properties(&mut self, cid: TypeId, value: &Value) -> Option<Map<String, Json>> {
        let reg = self.reg;
        let props = match shape::properties(reg, cid) {
            Ok(p) => p,
            Err(e) => {
                self.ctx.report(e);
                return None;
            }
        };
        let mut out = Map::new();
        if self.ctx.options.include_type_info {
            out.insert(self.ctx.options.type_info_prop_name.clone(), Json::String(reg.display_name(cid)));
        }
        let mut ok = true;
        for (name, pty) in props.iter() {
            if shape::is_functional(reg, *pty) {
                continue;
            }
            self.ctx.enter(PathSegment::Property(name.clone()));
            match self.heap.property(value, name) {
                Some(v) => match self.encode(*pty, v) {
                    Some(j) => {
                        out.insert(name.clone(), j);
                    }
                    None => ok = false,
                },
                None if shape::is_optional(reg, *pty) => {}
                None => {
                    self.ctx.report(ErrorKind::MissingProperty { property: name.clone() });
                    ok = false;
                }
            }
            self.ctx.leave();
        }
        ok.then_some(out)
    }

    fn select_tagged(&mut self, cid: TypeId, members: &[TypeId], discriminator: &str, value: &Value) -> Option<TypeId> {
        let reg = self.reg;
        let Some(tag) = self.heap.property(value, discriminator).and_then(Literal::from_value) else {
            self.ctx.report(ErrorKind::MissingProperty { property: discriminator.to_string() });
            return None;
        };
        let member = shape::member_for_tag(reg, cid, members, discriminator, &tag);
        if member.is_none() {
            self.ctx.report_value(
                ErrorKind::NoMatchingMember {
                    union: reg.display_name(cid),
                    reason: format!("no member tagged {tag} on `{discriminator}`"),
                },
                tag.to_string(),
            );
        }
        member
    }

    /// Only the identifier fields of the referenced object are written.
    fn encode_entity_reference(&mut self, cid: TypeId, target: TypeId, value: &Value) -> Option<Json> {
        let reg = self.reg;
        let target = match reg.concrete(target) {
            Ok(t) => t,
            Err(e) => {
                self.ctx.report(e);
                return None;
            }
        };
        let Some(n) = self.node_of(value, |n| matches!(n, Node::Object(_))) else {
            self.mismatch(format!("reference to {}", reg.display_name(target)), value);
            return None;
        };
        let (Some(identifier), Ok(props)) = (shape::identifier(reg, target), shape::properties(reg, target)) else {
            self.ctx.report(ErrorKind::Definition(format!(
                "`{}` cannot be referenced: no identifier",
                reg.display_name(target)
            )));
            return None;
        };
        self.composite(cid, Some(n), |enc| {
            let mut out = Map::new();
            let mut ok = true;
            for name in &identifier {
                enc.ctx.enter(PathSegment::Property(name.clone()));
                match (enc.heap.property(value, name), props.get(name)) {
                    (Some(v), Some(pty)) => match enc.encode(*pty, v) {
                        Some(j) => {
                            out.insert(name.clone(), j);
                        }
                        None => ok = false,
                    },
                    _ => {
                        enc.ctx.report(ErrorKind::MissingProperty { property: name.clone() });
                        ok = false;
                    }
                }
                enc.ctx.leave();
            }
            ok.then(|| Map::from_iter([("reference".to_string(), Json::Object(out))]))
        })
    }

    /// Graph mode writes only a token; the target must be emitted in full
    /// somewhere else in the same DTO.
    fn encode_obj_reference(&mut self, target: TypeId, value: &Value) -> Option<Json> {
        let reg = self.reg;
        let tid = match reg.concrete(target) {
            Ok(t) => t,
            Err(e) => {
                self.ctx.report(e);
                return None;
            }
        };
        if self.ctx.options.encoding() == Encoding::Tree {
            return self.encode(tid, value);
        }
        if !shape::is_object(reg, tid) {
            self.mismatch("reference to an object type".into(), value);
            return None;
        }
        let Some(n) = self.node_of(value, |n| matches!(n, Node::Object(_))) else {
            self.mismatch(reg.display_name(tid), value);
            return None;
        };
        let id = match self.ctx.visited.get(&(tid, n)).copied() {
            Some(Slot::Emitted(id) | Slot::Reserved(id)) => id,
            _ => {
                let id = self.ctx.next_id();
                self.ctx.visited.insert((tid, n), Slot::Reserved(id));
                id
            }
        };
        Some(self.token(id, "Object", reg.display_name(tid)))
    }

    fn report_unpaid_reservations(&mut self) {
        let mut ids: Vec<u64> = self
            .ctx
            .visited
            .iter()
            .filter_map(|(_, slot)| match slot {
                Slot::Reserved(id) => Some(*id),
                _ => None,
            })
            .collect();
        ids.sort_unstable();
        for id in ids {
            self.ctx.report(ErrorKind::DanglingReference { id });
        }
    }
}
