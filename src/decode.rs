//! DTO → instance.
//!
//! Every DTO id is registered against its node before the payload is read,
//! so back-references resolve to the node under construction. A token whose
//! id has not been seen yet gets a placeholder node that the full occurrence
//! later fills in place. Nothing allocated by a failed call stays on the heap.
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Value as Json};

use crate::context::{ConversionContext, ConversionOptions};
use crate::error::{ErrorKind, Failure, PathSegment};
use crate::schema::TypeRegistry;
use crate::shape;
use crate::types::{Literal, Scalar, TypeId, TypeKind};
use crate::value::{Heap, Node, NodeId, Value};

pub(crate) fn from_dto(
    reg: &TypeRegistry,
    heap: &mut Heap,
    ty: TypeId,
    dto: &Json,
    options: &ConversionOptions,
) -> Result<Value, Failure> {
    let start = heap.len();
    let mut dec = Decoder {
        reg,
        heap: &mut *heap,
        ctx: ConversionContext::new(options),
        placeholders: HashSet::new(),
        aliases: HashMap::new(),
    };
    let out = dec.decode(ty, dto);
    let mut dangling: Vec<u64> = dec.placeholders.iter().copied().collect();
    dangling.sort_unstable();
    for id in dangling {
        dec.ctx.report(ErrorKind::DanglingReference { id });
    }
    let mut result = dec.ctx.into_result(out.unwrap_or(Value::Undefined));
    if options.validate {
        if let Ok(value) = &result {
            if let Err(f) = crate::validate::validate(reg, heap, ty, value) {
                result = Err(f);
            }
        }
    }
    if result.is_err() {
        heap.truncate(start);
    }
    tracing::debug!(
        type_name = %reg.display_name(ty),
        nodes = heap.len().saturating_sub(start),
        violations = result.as_ref().err().map_or(0, Failure::len),
        "from_dto"
    );
    result
}

fn json_kind(dto: &Json) -> &'static str {
    match dto {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn ref_id(dto: &Json) -> Option<u64> { dto.get("ref")?.get("id")?.as_u64() }

fn is_token(dto: &Json) -> bool {
    dto.as_object().is_some_and(|o| o.len() == 1 && o.contains_key("ref"))
}

struct Decoder<'r, 'h, 'o> {
    reg: &'r TypeRegistry,
    heap: &'h mut Heap,
    ctx: ConversionContext<'o, u64, Value>,
    /// Ids seen only as tokens so far.
    placeholders: HashSet<u64>,
    /// Union/tagged wrapper id → id of the payload it wraps.
    aliases: HashMap<u64, u64>,
}

impl Decoder<'_, '_, '_> {
    fn invalid(&mut self, reason: impl Into<String>) {
        self.ctx.report(ErrorKind::InvalidDto { reason: reason.into() });
    }

    fn mismatch(&mut self, expected: String, dto: &Json) {
        let found = json_kind(dto).to_string();
        self.ctx.report_value(ErrorKind::TypeMismatch { expected, found }, dto.to_string());
    }

    fn canonical(&self, mut id: u64) -> u64 {
        for _ in 0..=self.aliases.len() {
            match self.aliases.get(&id) {
                Some(next) => id = *next,
                None => break,
            }
        }
        id
    }

    /// Node for DTO id `id`: the placeholder a token already created, or a
    /// fresh one. Registered before the caller reads the payload.
    fn claim(&mut self, id: Option<u64>, fresh: Node) -> NodeId {
        if let Some(id) = id {
            if self.placeholders.remove(&id) {
                if let Some(Value::Ref(n)) = self.ctx.visited.get(&id).cloned() {
                    if let Some(slot) = self.heap.get_mut(n) {
                        *slot = fresh;
                    }
                    return n;
                }
            }
        }
        let n = self.heap.alloc(fresh);
        if let Some(id) = id {
            self.ctx.visited.insert(id, Value::Ref(n));
        }
        n
    }

    fn resolve_token(&mut self, cid: TypeId, id: u64) -> Option<Value> {
        let id = self.canonical(id);
        if let Some(v) = self.ctx.visited.get(&id) {
            return Some(v.clone());
        }
        let fresh = match self.reg.get(cid).kind() {
            TypeKind::Array(_) => Node::Array(Vec::new()),
            TypeKind::Map { .. } => Node::Map(Vec::new()),
            TypeKind::Object(_) | TypeKind::Subtype { .. } | TypeKind::EntityReference(_) => {
                Node::Object(IndexMap::new())
            }
            other => {
                let category = other.category();
                self.invalid(format!("forward reference to {category} id {id}"));
                return None;
            }
        };
        let n = self.heap.alloc(fresh);
        self.ctx.visited.insert(id, Value::Ref(n));
        self.placeholders.insert(id);
        Some(Value::Ref(n))
    }

    fn payload<'d>(&mut self, obj: &'d Map<String, Json>, key: &str) -> Option<&'d Json> {
        let out = obj.get(key);
        if out.is_none() {
            self.invalid(format!("missing `{key}` payload"));
        }
        out
    }

    /// The shared composite protocol: tokens resolve by id, full payloads go
    /// to `body` together with their id, if any.
    fn composite(
        &mut self,
        cid: TypeId,
        dto: &Json,
        body: impl FnOnce(&mut Self, Option<u64>, &Map<String, Json>) -> Option<Value>,
    ) -> Option<Value> {
        let Some(obj) = dto.as_object() else {
            self.mismatch(format!("{} DTO", self.reg.display_name(cid)), dto);
            return None;
        };
        let id = match obj.get("ref") {
            None => None,
            Some(r) => match r.get("id").and_then(Json::as_u64) {
                Some(id) => Some(id),
                None => {
                    self.invalid("`ref` without a numeric id");
                    return None;
                }
            },
        };
        if let Some(id) = id {
            if obj.len() == 1 {
                return self.resolve_token(cid, id);
            }
            let seen = self.ctx.visited.contains(&id) || self.aliases.contains_key(&id);
            if seen && !self.placeholders.contains(&id) {
                self.invalid(format!("id {id} carries more than one payload"));
                return None;
            }
        }
        body(self, id, obj)
    }

    fn decode(&mut self, ty: TypeId, dto: &Json) -> Option<Value> {
        let reg = self.reg;
        let cid = match reg.concrete(ty) {
            Ok(c) => c,
            Err(e) => {
                self.ctx.report(e);
                return None;
            }
        };
        match reg.get(cid).kind() {
            TypeKind::Simple(s) => self.decode_scalar(s, dto),
            TypeKind::Optional(inner) => {
                if dto.is_null() && !shape::accepts_null(reg, *inner) {
                    Some(Value::Undefined)
                } else {
                    self.decode(*inner, dto)
                }
            }
            TypeKind::Link(_) => unreachable!("concrete() never yields a link"),
            TypeKind::Object(_) | TypeKind::Subtype { .. } => self.composite(cid, dto, |dec, id, obj| {
                let payload = dec.payload(obj, "object")?;
                dec.decode_object(cid, id, payload, None)
            }),
            TypeKind::Array(item) => self.composite(cid, dto, |dec, id, obj| {
                let payload = dec.payload(obj, "array")?;
                let Some(items) = payload.as_array() else {
                    dec.mismatch("array payload".into(), payload);
                    return None;
                };
                let n = dec.claim(id, Node::Array(Vec::with_capacity(items.len())));
                for (i, el) in items.iter().enumerate() {
                    dec.ctx.enter(PathSegment::Index(i));
                    let v = dec.decode(*item, el).unwrap_or(Value::Undefined);
                    dec.heap.push(n, v);
                    dec.ctx.leave();
                }
                Some(Value::Ref(n))
            }),
            TypeKind::Map { key, value } => self.composite(cid, dto, |dec, id, obj| {
                let payload = dec.payload(obj, "map")?;
                let Some(entries) = payload.as_array() else {
                    dec.mismatch("map payload".into(), payload);
                    return None;
                };
                let n = dec.claim(id, Node::Map(Vec::with_capacity(entries.len())));
                for (i, entry) in entries.iter().enumerate() {
                    let Some(pair) = entry.as_array().filter(|a| a.len() == 2) else {
                        dec.ctx.enter(PathSegment::Index(i));
                        dec.invalid("map entry is not a [key, value] pair");
                        dec.ctx.leave();
                        continue;
                    };
                    dec.ctx.enter(PathSegment::MapKey(i));
                    let kv = dec.decode(*key, &pair[0]).unwrap_or(Value::Undefined);
                    dec.ctx.leave();
                    dec.ctx.enter(PathSegment::MapValue(i));
                    let vv = dec.decode(*value, &pair[1]).unwrap_or(Value::Undefined);
                    dec.ctx.leave();
                    if let Some(Node::Map(map)) = dec.heap.get_mut(n) {
                        map.push((kv, vv));
                    }
                }
                Some(Value::Ref(n))
            }),
            TypeKind::Union(members) => self.composite(cid, dto, |dec, id, obj| {
                let payload = dec.payload(obj, "union")?;
                dec.alias(id, payload)?;
                match obj.get("typeInUnion") {
                    Some(Json::String(name)) => {
                        let names = shape::member_names(reg, members);
                        let Some(pos) = names.iter().position(|n| n == name) else {
                            dec.ctx.report_value(
                                ErrorKind::NoMatchingMember {
                                    union: reg.display_name(cid),
                                    reason: "`typeInUnion` names no member".into(),
                                },
                                name.clone(),
                            );
                            return None;
                        };
                        dec.ctx.enter(PathSegment::Member(name.clone()));
                        let out = dec.decode(members[pos], payload);
                        dec.ctx.leave();
                        out
                    }
                    Some(other) => {
                        dec.mismatch("member name".into(), other);
                        None
                    }
                    None => {
                        let found = members.iter().find_map(|m| dec.attempt(*m, payload));
                        if found.is_none() {
                            dec.ctx.report(ErrorKind::NoMatchingMember {
                                union: reg.display_name(cid),
                                reason: format!("none of {} members decodes the payload", members.len()),
                            });
                        }
                        found
                    }
                }
            }),
            TypeKind::TaggedUnion { discriminator, members } => self.composite(cid, dto, |dec, id, obj| {
                let payload = dec.payload(obj, "taggedUnion")?;
                dec.alias(id, payload)?;
                if is_token(payload) {
                    let first = *members.first()?;
                    return dec.decode(first, payload);
                }
                let raw = payload.get("object").and_then(|o| o.get(discriminator.as_str()));
                let Some(tag) = raw.and_then(Literal::from_json) else {
                    dec.ctx.enter(PathSegment::Property(discriminator.clone()));
                    dec.ctx.report(ErrorKind::MissingProperty { property: discriminator.clone() });
                    dec.ctx.leave();
                    return None;
                };
                let Some(member) = shape::member_for_tag(reg, cid, members, discriminator, &tag) else {
                    dec.ctx.report_value(
                        ErrorKind::NoMatchingMember {
                            union: reg.display_name(cid),
                            reason: format!("no member tagged {tag} on `{discriminator}`"),
                        },
                        tag.to_string(),
                    );
                    return None;
                };
                dec.decode(member, payload)
            }),
            TypeKind::Intersection(members) => self.composite(cid, dto, |dec, id, obj| {
                let payload = dec.payload(obj, "intersection")?;
                let Some(parts) = payload.as_object() else {
                    dec.mismatch("intersection payload".into(), payload);
                    return None;
                };
                dec.decode_intersection(cid, members, id, parts)
            }),
            TypeKind::EntityReference(target) => self.composite(cid, dto, |dec, id, obj| {
                let payload = dec.payload(obj, "reference")?;
                dec.decode_entity_reference(*target, id, payload)
            }),
            TypeKind::ObjReference(target) => self.decode(*target, dto),
            TypeKind::Functional { .. } => {
                self.ctx.report(ErrorKind::NotSerializable { type_name: reg.display_name(cid) });
                None
            }
        }
    }

    fn decode_scalar(&mut self, s: &Scalar, dto: &Json) -> Option<Value> {
        let out = match (s, dto) {
            (Scalar::Boolean, Json::Bool(b)) => Some(Value::Bool(*b)),
            (Scalar::Number, Json::Number(n)) => n.as_f64().map(Value::Number),
            (Scalar::String, Json::String(st)) => Some(Value::String(st.clone())),
            (Scalar::Date, Json::String(st)) => DateTime::parse_from_rfc3339(st)
                .ok()
                .map(|d| Value::Date(d.with_timezone(&Utc))),
            (Scalar::Literal(l), _) => Literal::from_json(dto).filter(|got| got == l).map(|l| l.to_value()),
            (Scalar::Null, Json::Null) => Some(Value::Null),
            (Scalar::Undefined | Scalar::Void, Json::Null) => Some(Value::Undefined),
            _ => None,
        };
        if out.is_none() {
            self.mismatch(s.name(), dto);
        }
        out
    }

    /// Register a wrapper id as an alias of the id its payload carries.
    fn alias(&mut self, wrapper: Option<u64>, payload: &Json) -> Option<()> {
        let (Some(w), Some(inner)) = (wrapper, ref_id(payload)) else { return Some(()) };
        if self.placeholders.contains(&w) {
            self.invalid(format!("forward reference to union wrapper id {w}"));
            return None;
        }
        if self.aliases.contains_key(&w) {
            self.invalid(format!("id {w} carries more than one payload"));
            return None;
        }
        self.aliases.insert(w, inner);
        Some(())
    }

    /// Decode `ty`; on failure undo every allocation, registration and
    /// violation it produced.
    fn attempt(&mut self, ty: TypeId, dto: &Json) -> Option<Value> {
        let heap_len = self.heap.len();
        let cp = self.ctx.visited.checkpoint();
        let errors = self.ctx.violation_count();
        let placeholders = self.placeholders.clone();
        let aliases = self.aliases.clone();
        let out = self.decode(ty, dto);
        if out.is_some() && self.ctx.violation_count() == errors {
            return out;
        }
        self.heap.truncate(heap_len);
        self.ctx.visited.rollback(cp);
        self.ctx.truncate_violations(errors);
        self.placeholders = placeholders;
        self.aliases = aliases;
        None
    }

    fn decode_object(&mut self, cid: TypeId, id: Option<u64>, payload: &Json, into: Option<NodeId>) -> Option<Value> {
        let reg = self.reg;
        let props = match shape::properties(reg, cid) {
            Ok(p) => p,
            Err(e) => {
                self.ctx.report(e);
                return None;
            }
        };
        let Some(fields) = payload.as_object() else {
            self.mismatch("object payload".into(), payload);
            return None;
        };
        let n = match into {
            Some(n) => n,
            None => self.claim(id, Node::Object(IndexMap::new())),
        };
        for (name, pty) in props.iter() {
            if shape::is_functional(reg, *pty) {
                continue;
            }
            self.ctx.enter(PathSegment::Property(name.clone()));
            match fields.get(name) {
                Some(j) => {
                    if let Some(v) = self.decode(*pty, j) {
                        self.heap.set(n, name.clone(), v);
                    }
                }
                None if shape::is_optional(reg, *pty) => {}
                None => self.ctx.report(ErrorKind::MissingProperty { property: name.clone() }),
            }
            self.ctx.leave();
        }
        Some(Value::Ref(n))
    }

    /// Object intersections merge every member payload into one node, and
    /// every member id maps to it. Other intersections decode each member and
    /// keep the last value.
    fn decode_intersection(
        &mut self,
        cid: TypeId,
        members: &[TypeId],
        id: Option<u64>,
        parts: &Map<String, Json>,
    ) -> Option<Value> {
        let reg = self.reg;
        let names = shape::member_names(reg, members);
        let concrete: Vec<Option<TypeId>> = members.iter().map(|m| reg.concrete(*m).ok()).collect();
        let all_objects = concrete.iter().all(|c| c.is_some_and(|c| shape::is_object(reg, c)));

        if !all_objects {
            let mut last = None;
            for (m, name) in members.iter().zip(&names) {
                self.ctx.enter(PathSegment::Member(name.clone()));
                match parts.get(name) {
                    Some(d) => last = self.decode(*m, d).or(last),
                    None => self.ctx.report(ErrorKind::MissingProperty { property: name.clone() }),
                }
                self.ctx.leave();
            }
            return last;
        }

        let member_ids: Vec<u64> = names.iter().filter_map(|n| parts.get(n).and_then(ref_id)).collect();
        let pending = id.into_iter().chain(member_ids.iter().copied()).find(|i| self.placeholders.contains(i));
        // a member already decoded under another type is the node to extend
        let existing = member_ids
            .iter()
            .map(|i| self.canonical(*i))
            .filter(|i| !self.placeholders.contains(i))
            .find_map(|i| self.ctx.visited.get(&i).and_then(Value::as_ref_id));
        let merged = match (pending, existing) {
            (None, Some(n)) => n,
            _ => self.claim(pending.or(id), Node::Object(IndexMap::new())),
        };
        for i in id.into_iter().chain(member_ids) {
            if !self.ctx.visited.contains(&i) {
                self.ctx.visited.insert(i, Value::Ref(merged));
            }
        }

        for ((name, c), m) in names.iter().zip(concrete).zip(members) {
            self.ctx.enter(PathSegment::Member(name.clone()));
            match parts.get(name) {
                None => self.ctx.report(ErrorKind::MissingProperty { property: name.clone() }),
                Some(d) if is_token(d) => {
                    let earlier = ref_id(d)
                        .map(|i| self.canonical(i))
                        .and_then(|i| self.ctx.visited.get(&i))
                        .and_then(Value::as_ref_id);
                    if let Some(n) = earlier.filter(|n| *n != merged) {
                        self.absorb(n, merged);
                    }
                }
                Some(d) => match (c, d.get("object")) {
                    (Some(c), Some(payload)) => {
                        self.decode_object(c, None, payload, Some(merged));
                    }
                    _ => self.invalid(format!("member `{}` has no object payload", reg.display_name(*m))),
                },
            }
            self.ctx.leave();
        }
        tracing::trace!(intersection = %reg.display_name(cid), node = %merged, "merged intersection");
        Some(Value::Ref(merged))
    }

    /// Copy the properties of object `from` that `into` does not have yet.
    fn absorb(&mut self, from: NodeId, into: NodeId) {
        let Some(Node::Object(props)) = self.heap.get(from).cloned() else { return };
        for (name, v) in props {
            if self.heap.property(&Value::Ref(into), &name).is_none() {
                self.heap.set(into, name, v);
            }
        }
    }

    /// A stub object holding only the identifier fields.
    fn decode_entity_reference(&mut self, target: TypeId, id: Option<u64>, payload: &Json) -> Option<Value> {
        let reg = self.reg;
        let target = match reg.concrete(target) {
            Ok(t) => t,
            Err(e) => {
                self.ctx.report(e);
                return None;
            }
        };
        let (Some(identifier), Ok(props)) = (shape::identifier(reg, target), shape::properties(reg, target)) else {
            self.ctx.report(ErrorKind::Definition(format!(
                "`{}` cannot be referenced: no identifier",
                reg.display_name(target)
            )));
            return None;
        };
        let Some(fields) = payload.as_object() else {
            self.mismatch("reference payload".into(), payload);
            return None;
        };
        let n = self.claim(id, Node::Object(IndexMap::new()));
        for name in &identifier {
            self.ctx.enter(PathSegment::Property(name.clone()));
            match (fields.get(name), props.get(name)) {
                (Some(j), Some(pty)) => {
                    if let Some(v) = self.decode(*pty, j) {
                        self.heap.set(n, name.clone(), v);
                    }
                }
                _ => self.ctx.report(ErrorKind::MissingProperty { property: name.clone() }),
            }
            self.ctx.leave();
        }
        Some(Value::Ref(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectDef, TypeDef};
    use serde_json::json;

    fn node_registry() -> (TypeRegistry, TypeId) {
        let mut reg = TypeRegistry::default();
        let root = reg.root();
        let me = reg.link(root, "Node");
        let next = reg.anonymous(TypeDef::optional(me));
        let node = reg
            .add_type(root, "Node", ObjectDef::new().property("label", reg.string()).property("next", next))
            .unwrap();
        (reg, node)
    }

    #[test]
    fn back_reference_rebuilds_the_cycle() {
        let (reg, node) = node_registry();
        let dto = json!({
            "ref": {"id": 1, "category": "Object", "typeName": "Node"},
            "object": {"label": "me", "next": {"ref": {"id": 1, "category": "Object", "typeName": "Node"}}}
        });
        let mut heap = Heap::new();
        let v = reg.ty(node).from_dto(&mut heap, &dto, &ConversionOptions::graph()).unwrap();
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.property(&v, "next"), Some(&v));
    }

    #[test]
    fn null_optional_reads_as_absent() {
        let (reg, node) = node_registry();
        let dto = json!({"object": {"label": "x", "next": null}});
        let mut heap = Heap::new();
        let v = reg.ty(node).from_dto(&mut heap, &dto, &ConversionOptions::tree()).unwrap();
        assert!(heap.property(&v, "next").is_none());
    }

    #[test]
    fn forward_token_is_filled_by_later_payload() {
        let mut reg = TypeRegistry::default();
        let root = reg.root();
        let item = reg.add_type(root, "Item", ObjectDef::new().property("n", reg.number())).unwrap();
        let pointer = reg.anonymous(TypeDef::obj_reference(item));
        let pair = reg
            .add_type(root, "Pair", ObjectDef::new().property("first", pointer).property("owner", item))
            .unwrap();
        let dto = json!({
            "ref": {"id": 1, "category": "Object", "typeName": "Pair"},
            "object": {
                "first": {"ref": {"id": 2, "category": "Object", "typeName": "Item"}},
                "owner": {"ref": {"id": 2, "category": "Object", "typeName": "Item"}, "object": {"n": 5}}
            }
        });
        let mut heap = Heap::new();
        let v = reg.ty(pair).from_dto(&mut heap, &dto, &ConversionOptions::graph()).unwrap();
        let first = heap.property(&v, "first").unwrap().clone();
        assert_eq!(heap.property(&v, "owner"), Some(&first));
        assert_eq!(heap.property(&first, "n"), Some(&Value::Number(5.0)));
    }

    #[test]
    fn dangling_token_fails_and_leaves_heap_untouched() {
        let (reg, node) = node_registry();
        let dto = json!({
            "ref": {"id": 1, "category": "Object", "typeName": "Node"},
            "object": {"label": "a", "next": {"ref": {"id": 9, "category": "Object", "typeName": "Node"}}}
        });
        let mut heap = Heap::new();
        heap.object([("unrelated", Value::Null)]);
        let failure = reg.ty(node).from_dto(&mut heap, &dto, &ConversionOptions::graph()).unwrap_err();
        assert_eq!(failure.violations[0].kind, ErrorKind::DanglingReference { id: 9 });
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn union_without_member_name_takes_first_decodable() {
        let mut reg = TypeRegistry::default();
        let root = reg.root();
        let named = reg.add_type(root, "Named", ObjectDef::new().property("name", reg.string())).unwrap();
        let counted = reg.add_type(root, "Counted", ObjectDef::new().property("count", reg.number())).unwrap();
        let u = reg.add_type(root, "Either", TypeDef::union([named, counted])).unwrap();
        let mut heap = Heap::new();
        let v = reg
            .ty(u)
            .from_dto(&mut heap, &json!({"union": {"object": {"count": 3}}}), &ConversionOptions::tree())
            .unwrap();
        assert_eq!(heap.property(&v, "count"), Some(&Value::Number(3.0)));
        // the failed attempt at `Named` left nothing behind
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn union_wrapper_id_with_two_payloads_is_rejected() {
        let mut reg = TypeRegistry::default();
        let root = reg.root();
        let named = reg.add_type(root, "Named", ObjectDef::new().property("name", reg.string())).unwrap();
        let u = reg.add_type(root, "OnlyNamed", TypeDef::union([named])).unwrap();
        let list = reg.anonymous(TypeDef::array(u));
        let wrapper = |inner: u64, name: &str| {
            json!({
                "ref": {"id": 2, "category": "Union", "typeName": "OnlyNamed"},
                "typeInUnion": "Named",
                "union": {"ref": {"id": inner, "category": "Object", "typeName": "Named"}, "object": {"name": name}}
            })
        };
        let dto = json!({
            "ref": {"id": 1, "category": "Array", "typeName": "array"},
            "array": [wrapper(3, "a"), wrapper(4, "b")]
        });
        let mut heap = Heap::new();
        let failure = reg.ty(list).from_dto(&mut heap, &dto, &ConversionOptions::graph()).unwrap_err();
        assert!(failure.any(|k| matches!(k, ErrorKind::InvalidDto { reason } if reason.contains("id 2"))));
        assert!(heap.is_empty());
    }

    #[test]
    fn dates_parse_from_rfc3339() {
        let reg = TypeRegistry::default();
        let mut heap = Heap::new();
        let v = reg
            .ty(reg.date())
            .from_dto(&mut heap, &json!("2024-03-01T12:00:00+02:00"), &ConversionOptions::tree())
            .unwrap();
        let Value::Date(d) = v else { panic!("expected a date") };
        assert_eq!(d.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        let bad = reg.ty(reg.date()).from_dto(&mut heap, &json!("yesterday"), &ConversionOptions::tree());
        assert!(bad.is_err());
    }
}
