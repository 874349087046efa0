//! Type descriptors.
//!
//! Every category is one variant of the closed `TypeKind` enum; behavior is
//! dispatched by pattern match in `validate`, `encode` and `decode`. Types
//! refer to each other by `TypeId` into the owning `TypeRegistry` arena.
use std::fmt;

use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use serde_json::Value as Json;

use crate::constraint::Constraint;
use crate::schema::SchemaId;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) usize);

impl TypeId {
    pub fn index(self) -> usize { self.0 }
}

// ------------------------------ Literals ---------------------------------- //

/// Literal value; hashable so discriminator tags can key a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(OrderedFloat<f64>),
    String(String),
}

impl Literal {
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Literal::Null, Value::Null) => true,
            (Literal::Bool(a), Value::Bool(b)) => a == b,
            (Literal::Number(a), Value::Number(b)) => a.0 == *b,
            (Literal::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Literal::Null),
            Value::Bool(b) => Some(Literal::Bool(*b)),
            Value::Number(n) => Some(Literal::Number(OrderedFloat(*n))),
            Value::String(s) => Some(Literal::String(s.clone())),
            _ => None,
        }
    }

    pub fn from_json(json: &Json) -> Option<Self> {
        match json {
            Json::Null => Some(Literal::Null),
            Json::Bool(b) => Some(Literal::Bool(*b)),
            Json::Number(n) => n.as_f64().map(|f| Literal::Number(OrderedFloat(f))),
            Json::String(s) => Some(Literal::String(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number(n) => Value::Number(n.0),
            Literal::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Number(n) => write!(f, "{}", n.0),
            Literal::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self { Literal::String(s.to_string()) }
}

impl From<f64> for Literal {
    fn from(n: f64) -> Self { Literal::Number(OrderedFloat(n)) }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self { Literal::Bool(b) }
}

// ------------------------------- Kinds ------------------------------------ //

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Boolean,
    Number,
    String,
    Date,
    Literal(Literal),
    Null,
    Undefined,
    /// Function return type; accepts `undefined`.
    Void,
}

impl Scalar {
    pub fn name(&self) -> String {
        match self {
            Scalar::Boolean => "boolean".into(),
            Scalar::Number => "number".into(),
            Scalar::String => "string".into(),
            Scalar::Date => "date".into(),
            Scalar::Literal(l) => format!("literal {l}"),
            Scalar::Null => "null".into(),
            Scalar::Undefined => "undefined".into(),
            Scalar::Void => "void".into(),
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Scalar::Boolean, Value::Bool(_)) => true,
            (Scalar::Number, Value::Number(_)) => true,
            (Scalar::String, Value::String(_)) => true,
            (Scalar::Date, Value::Date(_)) => true,
            (Scalar::Literal(l), v) => l.matches(v),
            (Scalar::Null, Value::Null) => true,
            (Scalar::Undefined | Scalar::Void, Value::Undefined) => true,
            _ => false,
        }
    }
}

/// A property pair that must point at each other's owner types.
#[derive(Debug, Clone, PartialEq)]
pub struct Inverse {
    pub property: String,
    pub target: TypeId,
    pub target_property: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectType {
    /// Declaration order drives error and DTO ordering.
    pub properties: IndexMap<String, TypeId>,
    /// Property subset forming the entity key.
    pub identifier: Option<Vec<String>>,
    pub inverses: Vec<Inverse>,
}

/// Deferred reference into a schema, resolved by path.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkTarget {
    pub schema: SchemaId,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Simple(Scalar),
    Object(ObjectType),
    Array(TypeId),
    Map { key: TypeId, value: TypeId },
    Union(Vec<TypeId>),
    TaggedUnion { discriminator: String, members: Vec<TypeId> },
    Intersection(Vec<TypeId>),
    /// Object whose property set extends `supertype`'s.
    Subtype { supertype: TypeId, object: ObjectType },
    Optional(TypeId),
    Link(LinkTarget),
    EntityReference(TypeId),
    ObjReference(TypeId),
    Functional { params: Vec<TypeId>, returns: TypeId },
}

impl TypeKind {
    /// Wire `category` of the `ref` wrapper.
    pub fn category(&self) -> &'static str {
        match self {
            TypeKind::Simple(_) => "Simple",
            TypeKind::Object(_) | TypeKind::Subtype { .. } | TypeKind::ObjReference(_) => "Object",
            TypeKind::Array(_) => "Array",
            TypeKind::Map { .. } => "Map",
            TypeKind::Union(_) => "Union",
            TypeKind::TaggedUnion { .. } => "TaggedUnion",
            TypeKind::Intersection(_) => "Intersection",
            TypeKind::Optional(_) => "Optional",
            TypeKind::Link(_) => "Link",
            TypeKind::EntityReference(_) => "EntityReference",
            TypeKind::Functional { .. } => "Functional",
        }
    }

    pub fn object(&self) -> Option<&ObjectType> {
        match self {
            TypeKind::Object(o) | TypeKind::Subtype { object: o, .. } => Some(o),
            _ => None,
        }
    }
}

// -------------------------------- Type ------------------------------------ //

#[derive(Debug, Clone)]
pub struct Type {
    pub(crate) name: Option<String>,
    pub(crate) schema: Option<SchemaId>,
    pub(crate) kind: TypeKind,
    pub(crate) validators: Vec<Constraint>,
    pub(crate) derived_from: Option<TypeId>,
}

impl Type {
    pub fn name(&self) -> Option<&str> { self.name.as_deref() }

    pub fn schema(&self) -> Option<SchemaId> { self.schema }

    pub fn kind(&self) -> &TypeKind { &self.kind }

    pub fn validators(&self) -> &[Constraint] { &self.validators }

    pub fn derived_from(&self) -> Option<TypeId> { self.derived_from }
}

// ------------------------------- Builders --------------------------------- //

/// Definition of a type before registration: kind plus attached constraints.
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub(crate) kind: TypeKind,
    pub(crate) validators: Vec<Constraint>,
    pub(crate) derived_from: Option<TypeId>,
}

impl TypeDef {
    pub fn new(kind: TypeKind) -> Self {
        Self { kind, validators: Vec::new(), derived_from: None }
    }

    pub fn simple(scalar: Scalar) -> Self { Self::new(TypeKind::Simple(scalar)) }
    pub fn boolean() -> Self { Self::simple(Scalar::Boolean) }
    pub fn number() -> Self { Self::simple(Scalar::Number) }
    pub fn string() -> Self { Self::simple(Scalar::String) }
    pub fn date() -> Self { Self::simple(Scalar::Date) }
    pub fn null() -> Self { Self::simple(Scalar::Null) }
    pub fn undefined() -> Self { Self::simple(Scalar::Undefined) }
    pub fn void() -> Self { Self::simple(Scalar::Void) }

    pub fn literal(value: impl Into<Literal>) -> Self {
        Self::simple(Scalar::Literal(value.into()))
    }

    pub fn array(item: TypeId) -> Self { Self::new(TypeKind::Array(item)) }

    pub fn map(key: TypeId, value: TypeId) -> Self { Self::new(TypeKind::Map { key, value }) }

    pub fn union(members: impl IntoIterator<Item = TypeId>) -> Self {
        Self::new(TypeKind::Union(members.into_iter().collect()))
    }

    pub fn tagged_union(
        discriminator: impl Into<String>,
        members: impl IntoIterator<Item = TypeId>,
    ) -> Self {
        Self::new(TypeKind::TaggedUnion {
            discriminator: discriminator.into(),
            members: members.into_iter().collect(),
        })
    }

    pub fn intersection(members: impl IntoIterator<Item = TypeId>) -> Self {
        Self::new(TypeKind::Intersection(members.into_iter().collect()))
    }

    pub fn optional(inner: TypeId) -> Self { Self::new(TypeKind::Optional(inner)) }

    pub fn entity_reference(target: TypeId) -> Self { Self::new(TypeKind::EntityReference(target)) }

    pub fn obj_reference(target: TypeId) -> Self { Self::new(TypeKind::ObjReference(target)) }

    pub fn functional(params: impl IntoIterator<Item = TypeId>, returns: TypeId) -> Self {
        Self::new(TypeKind::Functional { params: params.into_iter().collect(), returns })
    }

    /// Attach a constraint. Constraints run in attachment order.
    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.validators.push(constraint);
        self
    }

    pub fn kind(&self) -> &TypeKind { &self.kind }
}

/// Builder for object and subtype definitions.
#[derive(Debug, Clone, Default)]
pub struct ObjectDef {
    object: ObjectType,
    supertype: Option<TypeId>,
    validators: Vec<Constraint>,
}

impl ObjectDef {
    pub fn new() -> Self { Self::default() }

    pub fn property(mut self, name: impl Into<String>, ty: TypeId) -> Self {
        self.object.properties.insert(name.into(), ty);
        self
    }

    pub fn identifier<S: Into<String>>(mut self, props: impl IntoIterator<Item = S>) -> Self {
        self.object.identifier = Some(props.into_iter().map(Into::into).collect());
        self
    }

    pub fn inverse(
        mut self,
        property: impl Into<String>,
        target: TypeId,
        target_property: impl Into<String>,
    ) -> Self {
        self.object.inverses.push(Inverse {
            property: property.into(),
            target,
            target_property: target_property.into(),
        });
        self
    }

    /// Turn this definition into a subtype of `supertype`.
    pub fn extends(mut self, supertype: TypeId) -> Self {
        self.supertype = Some(supertype);
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.validators.push(constraint);
        self
    }
}

impl From<ObjectDef> for TypeDef {
    fn from(def: ObjectDef) -> Self {
        let kind = match def.supertype {
            Some(supertype) => TypeKind::Subtype { supertype, object: def.object },
            None => TypeKind::Object(def.object),
        };
        TypeDef { kind, validators: def.validators, derived_from: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_matching_is_exact() {
        let l = Literal::from("circle");
        assert!(l.matches(&Value::from("circle")));
        assert!(!l.matches(&Value::from("square")));
        assert!(Literal::from(2.0).matches(&Value::Number(2.0)));
        assert_eq!(Literal::from_json(&serde_json::json!(2)), Some(Literal::from(2.0)));
    }

    #[test]
    fn void_and_undefined_accept_undefined_only() {
        assert!(Scalar::Void.matches(&Value::Undefined));
        assert!(Scalar::Undefined.matches(&Value::Undefined));
        assert!(!Scalar::Undefined.matches(&Value::Null));
        assert!(Scalar::Null.matches(&Value::Null));
    }

    #[test]
    fn object_def_with_supertype_becomes_subtype() {
        let def: TypeDef = ObjectDef::new().extends(TypeId(0)).into();
        assert!(matches!(def.kind(), TypeKind::Subtype { supertype: TypeId(0), .. }));
        assert_eq!(def.kind().category(), "Object");
    }
}
