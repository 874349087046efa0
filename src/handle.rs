//! Borrowed view of one registered type; the public entry points.
use std::collections::HashSet;

use serde_json::Value as Json;

use crate::context::ConversionOptions;
use crate::error::{Failure, Path};
use crate::schema::TypeRegistry;
use crate::types::{Type, TypeId, TypeKind};
use crate::value::{Heap, Value};

#[derive(Debug, Clone, Copy)]
pub struct TypeHandle<'r> {
    registry: &'r TypeRegistry,
    id: TypeId,
}

impl<'r> TypeHandle<'r> {
    pub(crate) fn new(registry: &'r TypeRegistry, id: TypeId) -> Self {
        Self { registry, id }
    }

    pub fn id(&self) -> TypeId { self.id }

    pub fn registry(&self) -> &'r TypeRegistry { self.registry }

    pub fn def(&self) -> &'r Type { self.registry.get(self.id) }

    pub fn kind(&self) -> &'r TypeKind { &self.def().kind }

    pub fn name(&self) -> String { self.registry.display_name(self.id) }

    /// Structural check of `value`, reporting every violation.
    pub fn validate(&self, heap: &Heap, value: &Value) -> Result<(), Failure> {
        crate::validate::validate(self.registry, heap, self.id, value)
    }

    pub fn to_dto(&self, heap: &Heap, value: &Value, options: &ConversionOptions) -> Result<Json, Failure> {
        crate::encode::to_dto(self.registry, heap, self.id, value, options)
    }

    /// Rebuild an instance into `heap`. Nothing partial is kept on failure.
    pub fn from_dto(&self, heap: &mut Heap, dto: &Json, options: &ConversionOptions) -> Result<Value, Failure> {
        crate::decode::from_dto(self.registry, heap, self.id, dto, options)
    }

    /// Check that every link reachable from this type resolves, plus the
    /// shape rules that depend on resolution.
    pub fn validate_links(&self) -> Result<(), Failure> {
        let mut visited = HashSet::new();
        self.validate_links_with(&mut visited)
    }

    pub fn validate_links_with(&self, visited_types: &mut HashSet<TypeId>) -> Result<(), Failure> {
        let violations = crate::links::check_type(self.registry, self.id, &Path::root(), visited_types);
        crate::error::collect((), violations)
    }
}
