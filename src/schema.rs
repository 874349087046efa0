//! Named, nestable schemas and the registry that owns every type.
//!
//! The registry is an arena: types are addressed by `TypeId`, schemas by
//! `SchemaId`. A schema maps short names to types and names to child
//! schemas; the parent pointer is a back-reference only. Links resolve in an
//! explicit phase (`resolve_links`) into a status table.
use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::error::{ErrorKind, Failure, Path, PathSegment, Violation};
use crate::handle::TypeHandle;
use crate::types::{LinkTarget, Literal, Type, TypeDef, TypeId, TypeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateStatus {
    Invalid,
    InValidation,
    Valid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkStatus {
    Unresolved,
    Resolved(TypeId),
    Error(ErrorKind),
}

#[derive(Debug, Clone)]
pub struct TypeSchema {
    name: String,
    parent: Option<SchemaId>,
    types: IndexMap<String, TypeId>,
    children: IndexMap<String, SchemaId>,
    status: ValidateStatus,
}

impl TypeSchema {
    pub fn name(&self) -> &str { &self.name }
    pub fn parent(&self) -> Option<SchemaId> { self.parent }
    pub fn types(&self) -> &IndexMap<String, TypeId> { &self.types }
    pub fn children(&self) -> &IndexMap<String, SchemaId> { &self.children }
    pub fn status(&self) -> ValidateStatus { self.status }
}

/// Ids of the shared anonymous simple types every registry starts with.
#[derive(Debug, Clone, Copy)]
struct Builtins {
    boolean: TypeId,
    number: TypeId,
    string: TypeId,
    date: TypeId,
    null: TypeId,
    undefined: TypeId,
    void: TypeId,
}

#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: Vec<Type>,
    schemas: Vec<TypeSchema>,
    links: HashMap<TypeId, LinkStatus>,
    /// Discriminator tables of tagged unions, built with the links.
    tags: HashMap<TypeId, HashMap<Literal, TypeId>>,
    builtins: Builtins,
}

impl Default for TypeRegistry {
    fn default() -> Self { Self::new("root") }
}

impl TypeRegistry {
    pub fn new(root_name: impl Into<String>) -> Self {
        let mut reg = Self {
            types: Vec::new(),
            schemas: vec![TypeSchema {
                name: root_name.into(),
                parent: None,
                types: IndexMap::new(),
                children: IndexMap::new(),
                status: ValidateStatus::Invalid,
            }],
            links: HashMap::new(),
            tags: HashMap::new(),
            builtins: Builtins {
                boolean: TypeId(0),
                number: TypeId(0),
                string: TypeId(0),
                date: TypeId(0),
                null: TypeId(0),
                undefined: TypeId(0),
                void: TypeId(0),
            },
        };
        reg.builtins = Builtins {
            boolean: reg.anonymous(TypeDef::boolean()),
            number: reg.anonymous(TypeDef::number()),
            string: reg.anonymous(TypeDef::string()),
            date: reg.anonymous(TypeDef::date()),
            null: reg.anonymous(TypeDef::null()),
            undefined: reg.anonymous(TypeDef::undefined()),
            void: reg.anonymous(TypeDef::void()),
        };
        reg
    }

    pub fn root(&self) -> SchemaId { SchemaId(0) }

    pub fn boolean(&self) -> TypeId { self.builtins.boolean }
    pub fn number(&self) -> TypeId { self.builtins.number }
    pub fn string(&self) -> TypeId { self.builtins.string }
    pub fn date(&self) -> TypeId { self.builtins.date }
    pub fn null(&self) -> TypeId { self.builtins.null }
    pub fn undefined(&self) -> TypeId { self.builtins.undefined }
    pub fn void(&self) -> TypeId { self.builtins.void }

    pub fn get(&self, id: TypeId) -> &Type { &self.types[id.0] }

    pub fn schema(&self, id: SchemaId) -> &TypeSchema { &self.schemas[id.0] }

    pub fn ty(&self, id: TypeId) -> TypeHandle<'_> { TypeHandle::new(self, id) }

    pub fn type_count(&self) -> usize { self.types.len() }

    pub fn status(&self, id: SchemaId) -> ValidateStatus { self.schemas[id.0].status }

    // ------------------------------ building ------------------------------ //

    pub fn add_schema(&mut self, parent: SchemaId, name: impl Into<String>) -> Result<SchemaId, ErrorKind> {
        let name = name.into();
        check_segment(&name)?;
        if self.schemas[parent.0].children.contains_key(&name) {
            return Err(ErrorKind::Definition(format!(
                "schema `{}` already has a sub-schema `{name}`",
                self.schemas[parent.0].name
            )));
        }
        let id = SchemaId(self.schemas.len());
        self.schemas.push(TypeSchema {
            name: name.clone(),
            parent: Some(parent),
            types: IndexMap::new(),
            children: IndexMap::new(),
            status: ValidateStatus::Invalid,
        });
        self.schemas[parent.0].children.insert(name, id);
        self.invalidate(parent);
        Ok(id)
    }

    /// Register a type that belongs to no schema namespace.
    pub fn anonymous(&mut self, def: impl Into<TypeDef>) -> TypeId {
        let def = def.into();
        let id = TypeId(self.types.len());
        self.types.push(Type {
            name: None,
            schema: None,
            kind: def.kind,
            validators: def.validators,
            derived_from: def.derived_from,
        });
        id
    }

    /// Shorthand for an anonymous link to `path` relative to `schema`.
    pub fn link(&mut self, schema: SchemaId, path: impl Into<String>) -> TypeId {
        let target = LinkTarget { schema, path: path.into() };
        self.anonymous(TypeDef::new(TypeKind::Link(target)))
    }

    pub fn add_type(
        &mut self,
        schema: SchemaId,
        name: impl Into<String>,
        def: impl Into<TypeDef>,
    ) -> Result<TypeId, ErrorKind> {
        let name = name.into();
        check_segment(&name)?;
        if self.schemas[schema.0].types.contains_key(&name) {
            return Err(ErrorKind::Definition(format!(
                "schema `{}` already has a type `{name}`",
                self.schemas[schema.0].name
            )));
        }
        let id = self.anonymous(def);
        self.types[id.0].name = Some(name.clone());
        self.types[id.0].schema = Some(schema);
        self.schemas[schema.0].types.insert(name.clone(), id);
        self.invalidate(schema);
        tracing::info!(schema = %self.qualified_schema_name(schema), type_name = %name, "type added");
        Ok(id)
    }

    /// Unregister `name`. The type stays in the arena (direct references
    /// keep working); links by path no longer find it.
    pub fn remove_type(&mut self, schema: SchemaId, name: &str) -> Option<TypeId> {
        let id = self.schemas[schema.0].types.shift_remove(name)?;
        self.invalidate(schema);
        tracing::info!(schema = %self.qualified_schema_name(schema), type_name = %name, "type removed");
        Some(id)
    }

    /// New definition of the same kind as `base`, pointing back at it;
    /// constraints chained onto the result run after `base`'s own.
    pub fn derive(&self, base: TypeId) -> Result<TypeDef, ErrorKind> {
        let base = self.concrete(base)?;
        Ok(TypeDef {
            kind: self.types[base.0].kind.clone(),
            validators: Vec::new(),
            derived_from: Some(base),
        })
    }

    /// Flip `schema` and every ancestor to invalid; forget resolved links.
    fn invalidate(&mut self, schema: SchemaId) {
        let mut cursor = Some(schema);
        while let Some(id) = cursor {
            self.schemas[id.0].status = ValidateStatus::Invalid;
            cursor = self.schemas[id.0].parent;
        }
        self.links.clear();
        self.tags.clear();
    }

    // ------------------------------ lookup -------------------------------- //

    /// Resolve a `/`-separated path: leading segments name sub-schemas, the
    /// last names a type. A leading `/` starts from the root schema.
    pub fn get_type(&self, schema: SchemaId, path: &str) -> Option<TypeId> {
        let (mut cursor, rest) = match path.strip_prefix('/') {
            Some(rest) => (self.root(), rest),
            None => (schema, path),
        };
        let mut segments: Vec<&str> = rest.split('/').collect();
        let type_name = segments.pop()?;
        for seg in segments {
            cursor = *self.schemas[cursor.0].children.get(seg)?;
        }
        self.schemas[cursor.0].types.get(type_name).copied()
    }

    pub fn get_schema(&self, from: SchemaId, path: &str) -> Option<SchemaId> {
        let mut cursor = from;
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            cursor = *self.schemas[cursor.0].children.get(seg)?;
        }
        Some(cursor)
    }

    pub fn qualified_schema_name(&self, schema: SchemaId) -> String {
        let mut parts = Vec::new();
        let mut cursor = Some(schema);
        while let Some(id) = cursor {
            parts.push(self.schemas[id.0].name.as_str());
            cursor = self.schemas[id.0].parent;
        }
        parts.reverse();
        parts.join("/")
    }

    pub fn link_status(&self, link: TypeId) -> LinkStatus {
        self.links.get(&link).cloned().unwrap_or(LinkStatus::Unresolved)
    }

    fn lookup(&self, target: &LinkTarget) -> Result<TypeId, ErrorKind> {
        self.get_type(target.schema, &target.path).ok_or_else(|| ErrorKind::UnresolvedLink {
            schema: self.qualified_schema_name(target.schema),
            path: target.path.clone(),
        })
    }

    /// Follow links until a non-link type. Uses the resolution table when
    /// populated, otherwise a read-only lookup.
    pub fn concrete(&self, id: TypeId) -> Result<TypeId, ErrorKind> {
        let mut cursor = id;
        for _ in 0..=self.types.len() {
            let TypeKind::Link(target) = &self.types[cursor.0].kind else {
                return Ok(cursor);
            };
            cursor = match self.links.get(&cursor) {
                Some(LinkStatus::Resolved(t)) => *t,
                Some(LinkStatus::Error(e)) => return Err(e.clone()),
                _ => self.lookup(target)?,
            };
        }
        Err(ErrorKind::UnresolvedLink {
            schema: "<link cycle>".into(),
            path: self.display_name(id),
        })
    }

    /// Resolution phase: every link gets `Resolved` or `Error`.
    pub fn resolve_links(&mut self) -> usize {
        let mut errors = 0;
        let mut table = HashMap::new();
        for (i, ty) in self.types.iter().enumerate() {
            if let TypeKind::Link(target) = &ty.kind {
                let status = match self.lookup(target) {
                    Ok(t) => LinkStatus::Resolved(t),
                    Err(e) => {
                        errors += 1;
                        LinkStatus::Error(e)
                    }
                };
                tracing::trace!(link = %target.path, ?status, "link resolved");
                table.insert(TypeId(i), status);
            }
        }
        self.links = table;

        let mut tags = HashMap::new();
        for (i, ty) in self.types.iter().enumerate() {
            if let TypeKind::TaggedUnion { discriminator, members } = &ty.kind {
                tags.insert(TypeId(i), crate::shape::tag_table(self, members, discriminator));
            }
        }
        self.tags = tags;
        errors
    }

    pub(crate) fn tag_table(&self, union: TypeId) -> Option<&HashMap<Literal, TypeId>> {
        self.tags.get(&union)
    }

    /// Name for messages and `typeName`: the short name, or a structural
    /// description for anonymous types.
    pub fn display_name(&self, id: TypeId) -> String {
        let ty = &self.types[id.0];
        if let Some(name) = &ty.name {
            return name.clone();
        }
        let list = |ids: &[TypeId], sep: &str| {
            ids.iter().map(|t| self.display_name(*t)).collect::<Vec<_>>().join(sep)
        };
        match &ty.kind {
            TypeKind::Simple(s) => s.name(),
            TypeKind::Object(_) => "Object".into(),
            TypeKind::Subtype { supertype, .. } => format!("{} subtype", self.display_name(*supertype)),
            TypeKind::Array(item) => format!("Array<{}>", self.display_name(*item)),
            TypeKind::Map { key, value } => {
                format!("Map<{}, {}>", self.display_name(*key), self.display_name(*value))
            }
            TypeKind::Union(ms) => list(ms, " | "),
            TypeKind::TaggedUnion { members, .. } => list(members, " | "),
            TypeKind::Intersection(ms) => list(ms, " & "),
            TypeKind::Optional(inner) => format!("{}?", self.display_name(*inner)),
            TypeKind::Link(target) => target.path.rsplit('/').next().unwrap_or_default().to_string(),
            TypeKind::EntityReference(t) => format!("Ref<{}>", self.display_name(*t)),
            TypeKind::ObjReference(t) => format!("ObjRef<{}>", self.display_name(*t)),
            TypeKind::Functional { params, returns } => {
                format!("({}) => {}", list(params, ", "), self.display_name(*returns))
            }
        }
    }

    // ----------------------------- validation ----------------------------- //

    /// Validate every owned type's links, then every sub-schema, collecting
    /// all violations. A `Valid` schema is not re-checked.
    pub fn validate_schema(&mut self, schema: SchemaId) -> Result<(), Failure> {
        if self.links.is_empty() {
            self.resolve_links();
        }
        let mut visited_types = HashSet::new();
        let result = self.validate_schema_inner(schema, &mut visited_types);
        match &result {
            Ok(()) => tracing::info!(schema = %self.qualified_schema_name(schema), "schema valid"),
            Err(f) => tracing::info!(
                schema = %self.qualified_schema_name(schema),
                violations = f.len(),
                "schema invalid"
            ),
        }
        result
    }

    fn validate_schema_inner(
        &mut self,
        schema: SchemaId,
        visited_types: &mut HashSet<TypeId>,
    ) -> Result<(), Failure> {
        match self.schemas[schema.0].status {
            ValidateStatus::Valid => return Ok(()),
            ValidateStatus::InValidation => {
                let name = self.qualified_schema_name(schema);
                return Err(Failure::single(Violation::new(
                    Path::root(),
                    ErrorKind::SchemaNotValid { schema: name, reason: "schema validation cycle".into() },
                )));
            }
            ValidateStatus::Invalid => {}
        }
        self.schemas[schema.0].status = ValidateStatus::InValidation;

        let mut violations = Vec::new();
        let owned: Vec<(String, TypeId)> =
            self.schemas[schema.0].types.iter().map(|(k, v)| (k.clone(), *v)).collect();
        for (name, id) in owned {
            let root = Path::root().child(PathSegment::Property(name));
            violations.extend(crate::links::check_type(self, id, &root, visited_types));
        }
        let children: Vec<SchemaId> = self.schemas[schema.0].children.values().copied().collect();
        for child in children {
            if let Err(f) = self.validate_schema_inner(child, visited_types) {
                violations.extend(f.violations);
            }
        }

        self.schemas[schema.0].status = if violations.is_empty() {
            ValidateStatus::Valid
        } else {
            ValidateStatus::Invalid
        };
        crate::error::collect((), violations)
    }
}

fn check_segment(name: &str) -> Result<(), ErrorKind> {
    if name.is_empty() || name.contains('/') {
        return Err(ErrorKind::Definition(format!("invalid name `{name}`")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectDef;

    fn nested() -> (TypeRegistry, SchemaId, SchemaId) {
        let mut reg = TypeRegistry::new("app");
        let geo = reg.add_schema(reg.root(), "geo").unwrap();
        let shapes = reg.add_schema(geo, "shapes").unwrap();
        (reg, geo, shapes)
    }

    #[test]
    fn get_type_crosses_sub_schemas() {
        let (mut reg, _geo, shapes) = nested();
        let pt = reg.add_type(shapes, "Point", ObjectDef::new().property("x", reg.number())).unwrap();
        assert_eq!(reg.get_type(reg.root(), "geo/shapes/Point"), Some(pt));
        assert_eq!(reg.get_type(shapes, "Point"), Some(pt));
        assert_eq!(reg.get_type(shapes, "/geo/shapes/Point"), Some(pt));
        assert_eq!(reg.get_type(reg.root(), "geo/Point"), None);
        assert_eq!(reg.get_type(reg.root(), "nope/Point"), None);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut reg = TypeRegistry::default();
        let root = reg.root();
        reg.add_type(root, "A", TypeDef::string()).unwrap();
        assert!(reg.add_type(root, "A", TypeDef::number()).is_err());
        assert!(reg.add_type(root, "a/b", TypeDef::number()).is_err());
    }

    #[test]
    fn removing_a_type_invalidates_every_ancestor() {
        let (mut reg, geo, shapes) = nested();
        let root = reg.root();
        reg.add_type(shapes, "Point", TypeDef::string()).unwrap();
        reg.validate_schema(root).unwrap();
        assert_eq!(reg.status(root), ValidateStatus::Valid);
        assert_eq!(reg.status(geo), ValidateStatus::Valid);
        assert_eq!(reg.status(shapes), ValidateStatus::Valid);

        reg.remove_type(shapes, "Point").unwrap();
        assert_eq!(reg.status(shapes), ValidateStatus::Invalid);
        assert_eq!(reg.status(geo), ValidateStatus::Invalid);
        assert_eq!(reg.status(root), ValidateStatus::Invalid);

        reg.validate_schema(root).unwrap();
        assert_eq!(reg.status(root), ValidateStatus::Valid);
    }

    #[test]
    fn dangling_link_is_reported_at_schema_validation() {
        let mut reg = TypeRegistry::default();
        let root = reg.root();
        let missing = reg.link(root, "Missing");
        reg.add_type(root, "Holder", ObjectDef::new().property("m", missing)).unwrap();
        let failure = reg.validate_schema(root).unwrap_err();
        assert_eq!(failure.len(), 1);
        assert!(matches!(failure.violations[0].kind, ErrorKind::UnresolvedLink { .. }));
        assert_eq!(failure.violations[0].path.to_string(), "$.Holder.m");
        assert_eq!(reg.status(root), ValidateStatus::Invalid);
        assert!(matches!(reg.link_status(missing), LinkStatus::Error(_)));
    }

    #[test]
    fn links_resolve_after_late_registration() {
        let mut reg = TypeRegistry::default();
        let root = reg.root();
        let late = reg.link(root, "Late");
        assert!(reg.concrete(late).is_err());
        let t = reg.add_type(root, "Late", TypeDef::number()).unwrap();
        assert_eq!(reg.concrete(late), Ok(t));
        reg.resolve_links();
        assert_eq!(reg.link_status(late), LinkStatus::Resolved(t));
    }

    #[test]
    fn sub_schema_errors_are_accumulated_not_short_circuited() {
        let (mut reg, geo, shapes) = nested();
        let root = reg.root();
        let a = reg.link(geo, "Nope");
        let b = reg.link(shapes, "AlsoNope");
        reg.add_type(geo, "A", TypeDef::array(a)).unwrap();
        reg.add_type(shapes, "B", TypeDef::optional(b)).unwrap();
        let failure = reg.validate_schema(root).unwrap_err();
        assert_eq!(failure.len(), 2);
    }
}
