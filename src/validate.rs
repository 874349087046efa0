//! Structural validation over instance graphs.
//!
//! A `(type, node)` pair is marked visited before its children are walked,
//! so revisiting it (a cycle, or a shared node) succeeds immediately.
use crate::context::ConversionContext;
use crate::error::{ErrorKind, Failure, PathSegment};
use crate::schema::TypeRegistry;
use crate::shape;
use crate::types::{Literal, TypeId, TypeKind};
use crate::value::{Heap, Node, Value};
use crate::visited::InstanceKey;

pub(crate) fn validate(reg: &TypeRegistry, heap: &Heap, ty: TypeId, value: &Value) -> Result<(), Failure> {
    let mut v = Validator { reg, heap, ctx: ConversionContext::with_defaults() };
    v.visit(ty, value);
    let result = v.ctx.into_result(());
    tracing::debug!(
        type_name = %reg.display_name(ty),
        violations = result.as_ref().err().map_or(0, Failure::len),
        "validate"
    );
    result
}

/// Whether `value` is a valid instance of `ty`, without collecting errors.
pub(crate) fn matches(reg: &TypeRegistry, heap: &Heap, ty: TypeId, value: &Value) -> bool {
    let mut v = Validator { reg, heap, ctx: ConversionContext::with_defaults() };
    v.visit(ty, value);
    v.ctx.violation_count() == 0
}

struct Validator<'r, 'h> {
    reg: &'r TypeRegistry,
    heap: &'h Heap,
    ctx: ConversionContext<'static, InstanceKey, ()>,
}

impl Validator<'_, '_> {
    fn mismatch(&mut self, expected: String, value: &Value) {
        let found = value.kind_name(self.heap).to_string();
        let preview = self.heap.preview(value);
        self.ctx.report_value(ErrorKind::TypeMismatch { expected, found }, preview);
    }

    /// Try `ty` against `value`; on failure forget its violations and any
    /// nodes it marked visited.
    fn attempt(&mut self, ty: TypeId, value: &Value) -> bool {
        let errors = self.ctx.violation_count();
        let cp = self.ctx.visited.checkpoint();
        self.visit(ty, value);
        if self.ctx.violation_count() == errors {
            return true;
        }
        self.ctx.truncate_violations(errors);
        self.ctx.visited.rollback(cp);
        false
    }

    fn visit(&mut self, ty: TypeId, value: &Value) {
        let cid = match self.reg.concrete(ty) {
            Ok(c) => c,
            Err(e) => return self.ctx.report(e),
        };
        if self.visit_shape(cid, value) {
            self.run_constraints(cid, value);
        }
    }

    /// False when `value` does not have the right shape; constraints are
    /// skipped then.
    fn visit_shape(&mut self, cid: TypeId, value: &Value) -> bool {
        let reg = self.reg;
        match reg.get(cid).kind() {
            TypeKind::Simple(s) => {
                if !s.matches(value) {
                    self.mismatch(s.name(), value);
                    return false;
                }
                true
            }
            TypeKind::Optional(inner) => {
                if !value.is_undefined() {
                    self.visit(*inner, value);
                }
                !value.is_undefined()
            }
            TypeKind::Link(_) => unreachable!("concrete() never yields a link"),
            TypeKind::Object(_) | TypeKind::Subtype { .. } => self.visit_object(cid, value),
            TypeKind::Array(item) => {
                let Some(id) = value.as_ref_id().filter(|id| matches!(self.heap.get(*id), Some(Node::Array(_)))) else {
                    self.mismatch("array".into(), value);
                    return false;
                };
                if self.ctx.visited.insert((cid, id), ()).is_some() {
                    return true;
                }
                let items = self.heap.array_items(value).unwrap_or_default();
                for (i, el) in items.iter().enumerate() {
                    self.ctx.enter(PathSegment::Index(i));
                    self.visit(*item, el);
                    self.ctx.leave();
                }
                true
            }
            TypeKind::Map { key, value: val_ty } => {
                let Some(id) = value.as_ref_id().filter(|id| matches!(self.heap.get(*id), Some(Node::Map(_)))) else {
                    self.mismatch("map".into(), value);
                    return false;
                };
                if self.ctx.visited.insert((cid, id), ()).is_some() {
                    return true;
                }
                let entries = self.heap.map_entries(value).unwrap_or_default();
                for (i, (k, v)) in entries.iter().enumerate() {
                    self.ctx.enter(PathSegment::MapKey(i));
                    self.visit(*key, k);
                    self.ctx.leave();
                    self.ctx.enter(PathSegment::MapValue(i));
                    self.visit(*val_ty, v);
                    self.ctx.leave();
                }
                true
            }
            TypeKind::Union(members) => {
                if members.iter().any(|m| self.attempt(*m, value)) {
                    return true;
                }
                let preview = self.heap.preview(value);
                self.ctx.report_value(
                    ErrorKind::NoMatchingMember {
                        union: reg.display_name(cid),
                        reason: format!("tried {} members in order", members.len()),
                    },
                    preview,
                );
                false
            }
            TypeKind::TaggedUnion { discriminator, members } => {
                match self.select_tagged(cid, members, discriminator, value) {
                    Some(member) => {
                        self.visit(member, value);
                        true
                    }
                    None => false,
                }
            }
            TypeKind::Intersection(members) => {
                for (m, name) in members.iter().zip(shape::member_names(reg, members)) {
                    self.ctx.enter(PathSegment::Member(name));
                    self.visit(*m, value);
                    self.ctx.leave();
                }
                true
            }
            TypeKind::EntityReference(target) => self.visit_entity_reference(*target, value),
            TypeKind::ObjReference(target) => {
                self.visit(*target, value);
                true
            }
            TypeKind::Functional { params, .. } => match value {
                Value::Function(f) if f.arity() == params.len() => true,
                _ => {
                    self.mismatch(format!("function of {} parameters", params.len()), value);
                    false
                }
            },
        }
    }

    fn visit_object(&mut self, cid: TypeId, value: &Value) -> bool {
        let reg = self.reg;
        let Some(id) = value.as_ref_id().filter(|id| matches!(self.heap.get(*id), Some(Node::Object(_)))) else {
            self.mismatch(reg.display_name(cid), value);
            return false;
        };
        if self.ctx.visited.insert((cid, id), ()).is_some() {
            return true;
        }
        let props = match shape::properties(reg, cid) {
            Ok(p) => p,
            Err(e) => {
                self.ctx.report(e);
                return false;
            }
        };
        for (name, pty) in props.iter() {
            self.ctx.enter(PathSegment::Property(name.clone()));
            match self.heap.property(value, name) {
                Some(v) => self.visit(*pty, v),
                None if shape::is_optional(reg, *pty) => {}
                None => self.ctx.report(ErrorKind::MissingProperty { property: name.clone() }),
            }
            self.ctx.leave();
        }
        true
    }

    /// Resolve the tagged-union member for `value`, reporting exactly one
    /// violation when it cannot be determined.
    fn select_tagged(&mut self, cid: TypeId, members: &[TypeId], discriminator: &str, value: &Value) -> Option<TypeId> {
        let reg = self.reg;
        if self.heap.object_props(value).is_none() {
            self.mismatch(reg.display_name(cid), value);
            return None;
        }
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

    fn visit_entity_reference(&mut self, target: TypeId, value: &Value) -> bool {
        let reg = self.reg;
        let target = match reg.concrete(target) {
            Ok(t) => t,
            Err(e) => {
                self.ctx.report(e);
                return false;
            }
        };
        if self.heap.object_props(value).is_none() {
            self.mismatch(format!("reference to {}", reg.display_name(target)), value);
            return false;
        }
        let (Some(identifier), Ok(props)) = (shape::identifier(reg, target), shape::properties(reg, target)) else {
            self.ctx.report(ErrorKind::Definition(format!(
                "`{}` cannot be referenced: no identifier",
                reg.display_name(target)
            )));
            return false;
        };
        for name in &identifier {
            self.ctx.enter(PathSegment::Property(name.clone()));
            match (self.heap.property(value, name), props.get(name)) {
                (Some(v), Some(pty)) => self.visit(*pty, v),
                _ => self.ctx.report(ErrorKind::MissingProperty { property: name.clone() }),
            }
            self.ctx.leave();
        }
        true
    }

    /// Constraints of the type and of every type it derives from, base first.
    fn run_constraints(&mut self, cid: TypeId, value: &Value) {
        let reg = self.reg;
        let mut chain = vec![cid];
        let mut cursor = reg.get(cid).derived_from();
        while let Some(base) = cursor {
            if chain.contains(&base) {
                break;
            }
            chain.push(base);
            cursor = reg.get(base).derived_from();
        }
        for t in chain.iter().rev() {
            for c in reg.get(*t).validators() {
                if let Err(message) = c.check(self.heap, value) {
                    let preview = self.heap.preview(value);
                    self.ctx.report_value(
                        ErrorKind::ValidationError { constraint: c.name().to_string(), message },
                        preview,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::Constraint;
    use crate::types::{ObjectDef, TypeDef};

    fn person_registry() -> (TypeRegistry, TypeId) {
        let mut reg = TypeRegistry::default();
        let root = reg.root();
        let me = reg.link(root, "Person");
        let friend = reg.anonymous(TypeDef::optional(me));
        let age = reg.anonymous(TypeDef::number().integer().min(0.0));
        let person = reg
            .add_type(
                root,
                "Person",
                ObjectDef::new().property("name", reg.string()).property("age", age).property("friend", friend),
            )
            .unwrap();
        (reg, person)
    }

    #[test]
    fn self_reference_terminates_and_succeeds() {
        let (reg, person) = person_registry();
        let mut heap = Heap::new();
        let p = heap.object([("name", Value::from("Narcissus")), ("age", Value::from(30.0))]);
        heap.set(p.as_ref_id().unwrap(), "friend", p.clone());
        assert!(reg.ty(person).validate(&heap, &p).is_ok());
    }

    #[test]
    fn collects_every_violation_with_paths() {
        let (reg, person) = person_registry();
        let mut heap = Heap::new();
        let friend = heap.object([("name", Value::from(7.0)), ("age", Value::from(-1.5))]);
        let p = heap.object([("age", Value::from(3.0)), ("friend", friend)]);
        let failure = reg.ty(person).validate(&heap, &p).unwrap_err();
        let rendered: Vec<String> = failure.iter().map(|v| format!("{} {}", v.path, v.kind)).collect();
        assert_eq!(
            rendered,
            [
                "$.name missing required property `name`",
                "$.friend.name expected string, found number",
                "$.friend.age integer: must be an integer",
                "$.friend.age min: must be >= 0",
            ]
        );
    }

    #[test]
    fn extra_properties_are_ignored() {
        let (reg, person) = person_registry();
        let mut heap = Heap::new();
        let p = heap.object([("name", Value::from("a")), ("age", Value::from(1.0)), ("zzz", Value::Null)]);
        assert!(reg.ty(person).validate(&heap, &p).is_ok());
    }

    #[test]
    fn derived_type_runs_base_constraints_too() {
        let mut reg = TypeRegistry::default();
        let root = reg.root();
        let base = reg.add_type(root, "Score", TypeDef::number().min(0.0)).unwrap();
        let derived = reg.derive(base).unwrap().less_than(10.0);
        let capped = reg.add_type(root, "SmallScore", derived).unwrap();
        let heap = Heap::new();
        assert!(reg.ty(capped).validate(&heap, &Value::Number(5.0)).is_ok());
        let f = reg.ty(capped).validate(&heap, &Value::Number(-20.0)).unwrap_err();
        assert_eq!(f.len(), 1);
        let f = reg.ty(capped).validate(&heap, &Value::Number(20.0)).unwrap_err();
        assert_eq!(f.len(), 1);
        // the base is untouched
        assert!(reg.ty(base).validate(&heap, &Value::Number(20.0)).is_ok());
    }

    #[test]
    fn panicking_constraint_does_not_abort_siblings() {
        let mut reg = TypeRegistry::default();
        let root = reg.root();
        let bad = reg.anonymous(TypeDef::string().constraint(Constraint::new(
            "explodes",
            |_, _| panic!("bad predicate"),
            |_, _| String::new(),
        )));
        let obj = reg
            .add_type(root, "T", ObjectDef::new().property("a", bad).property("b", reg.number()))
            .unwrap();
        let mut heap = Heap::new();
        let v = heap.object([("a", Value::from("x")), ("b", Value::from("not a number"))]);
        let f = reg.ty(obj).validate(&heap, &v).unwrap_err();
        assert_eq!(f.len(), 2);
        assert!(matches!(f.violations[0].kind, ErrorKind::ValidationError { .. }));
        assert!(matches!(f.violations[1].kind, ErrorKind::TypeMismatch { .. }));
    }

    #[test]
    fn tagged_union_garbled_tag_is_one_error() {
        let mut reg = TypeRegistry::default();
        let root = reg.root();
        let ct = reg.anonymous(TypeDef::literal("circle"));
        let st = reg.anonymous(TypeDef::literal("square"));
        let circle = reg.add_type(root, "Circle", ObjectDef::new().property("kind", ct).property("r", reg.number())).unwrap();
        let square = reg.add_type(root, "Square", ObjectDef::new().property("kind", st).property("side", reg.number())).unwrap();
        let shape = reg.add_type(root, "Shape", TypeDef::tagged_union("kind", [circle, square])).unwrap();

        let mut heap = Heap::new();
        let missing = heap.object([("r", Value::from(1.0))]);
        let f = reg.ty(shape).validate(&heap, &missing).unwrap_err();
        assert_eq!(f.len(), 1);
        let garbled = heap.object([("kind", Value::from("hexagon"))]);
        let f = reg.ty(shape).validate(&heap, &garbled).unwrap_err();
        assert_eq!(f.len(), 1);
        assert!(matches!(f.violations[0].kind, ErrorKind::NoMatchingMember { .. }));

        let ok = heap.object([("kind", Value::from("square")), ("side", Value::from(2.0))]);
        assert!(reg.ty(shape).validate(&heap, &ok).is_ok());
    }

    #[test]
    fn functional_checks_arity() {
        let mut reg = TypeRegistry::default();
        let f_ty = reg.anonymous(TypeDef::functional([reg.number()], reg.void()));
        let heap = Heap::new();
        let f = crate::value::Func::new("log", 1, |_| Value::Undefined);
        assert!(reg.ty(f_ty).validate(&heap, &Value::Function(f)).is_ok());
        let g = crate::value::Func::new("nop", 0, |_| Value::Undefined);
        assert!(reg.ty(f_ty).validate(&heap, &Value::Function(g)).is_err());
    }
}
