//! Schema definition files.
//!
//! ```json
//! {
//!   "name": "people",
//!   "types": {
//!     "Age": { "kind": "derive", "from": "number", "constraints": [{ "name": "min", "value": 0 }] },
//!     "Person": {
//!       "kind": "object",
//!       "properties": { "name": "string", "age": { "kind": "optional", "of": "@Age" } },
//!       "identifier": ["name"]
//!     }
//!   },
//!   "schemas": [ { "name": "nested", "types": {} } ]
//! }
//! ```
//!
//! Shorthand strings name a built-in (`"string"`, `"number"`, ...) or, with a
//! leading `@`, link to a type path resolved against the enclosing schema.
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value as Json;

use crate::constraint::Constraint;
use crate::error::ErrorKind;
use crate::schema::{SchemaId, TypeRegistry};
use crate::types::{LinkTarget, ObjectDef, TypeDef, TypeId, TypeKind};

// ---- Document ----

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDef {
    pub name: String,
    #[serde(default)]
    pub types: IndexMap<String, TypeExpr>,
    #[serde(default)]
    pub schemas: Vec<SchemaDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TypeExpr {
    Named(String),
    Kind(Box<KindExpr>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstraintExpr {
    pub name: String,
    #[serde(default)]
    pub value: Option<Json>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InverseExpr {
    pub property: String,
    pub target: TypeExpr,
    pub target_property: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum KindExpr {
    Literal {
        value: Json,
    },
    Object {
        #[serde(default)]
        properties: IndexMap<String, TypeExpr>,
        #[serde(default)]
        identifier: Option<Vec<String>>,
        #[serde(default)]
        inverses: Vec<InverseExpr>,
        #[serde(default)]
        extends: Option<TypeExpr>,
        #[serde(default)]
        constraints: Vec<ConstraintExpr>,
    },
    Array {
        items: TypeExpr,
        #[serde(default)]
        constraints: Vec<ConstraintExpr>,
    },
    Map {
        key: TypeExpr,
        value: TypeExpr,
    },
    Union {
        members: Vec<TypeExpr>,
    },
    TaggedUnion {
        discriminator: String,
        members: Vec<TypeExpr>,
    },
    Intersection {
        members: Vec<TypeExpr>,
    },
    Optional {
        of: TypeExpr,
    },
    EntityReference {
        target: TypeExpr,
    },
    ObjReference {
        target: TypeExpr,
    },
    Functional {
        #[serde(default)]
        params: Vec<TypeExpr>,
        returns: TypeExpr,
    },
    /// Same kind as `from`, with extra constraints run after the base ones.
    Derive {
        from: TypeExpr,
        #[serde(default)]
        constraints: Vec<ConstraintExpr>,
    },
}

// ---- Loading ----

/// Parse a definition document; errors name the JSON path.
pub fn parse(src: &str) -> Result<SchemaDef, ErrorKind> {
    crate::path_de::from_str_with_path(src)
}

/// Parse and build a registry whose root schema is the document's top level.
pub fn load_str(src: &str) -> Result<TypeRegistry, ErrorKind> {
    parse(src)?.build()
}

struct PendingDerive<'d> {
    schema: SchemaId,
    name: &'d str,
    base: TypeId,
    constraints: &'d [ConstraintExpr],
}

impl SchemaDef {
    pub fn build(&self) -> Result<TypeRegistry, ErrorKind> {
        let mut reg = TypeRegistry::new(self.name.clone());
        let root = reg.root();
        let mut pending = Vec::new();
        self.load_into(&mut reg, root, &mut pending)?;

        // a derive needs its base to resolve, which may itself be a derive
        while !pending.is_empty() {
            let before = pending.len();
            let mut blocked = Vec::new();
            for p in pending {
                match reg.derive(p.base) {
                    Ok(def) => {
                        let def = with_constraints(def, p.constraints).map_err(|e| in_type(&reg, p.schema, p.name, e))?;
                        reg.add_type(p.schema, p.name, def)?;
                    }
                    Err(ErrorKind::UnresolvedLink { .. }) => blocked.push(p),
                    Err(e) => return Err(in_type(&reg, p.schema, p.name, e)),
                }
            }
            if blocked.len() == before {
                let names: Vec<String> = blocked.iter().map(|p| qualified(&reg, p.schema, p.name)).collect();
                return Err(ErrorKind::Definition(format!(
                    "cannot derive {}: base type never resolves",
                    names.join(", ")
                )));
            }
            pending = blocked;
        }
        tracing::debug!(schema = %self.name, types = reg.type_count(), "definition loaded");
        Ok(reg)
    }

    fn load_into<'d>(
        &'d self,
        reg: &mut TypeRegistry,
        schema: SchemaId,
        pending: &mut Vec<PendingDerive<'d>>,
    ) -> Result<(), ErrorKind> {
        for child in &self.schemas {
            let id = reg.add_schema(schema, child.name.clone())?;
            child.load_into(reg, id, pending)?;
        }
        for (name, e) in &self.types {
            if let TypeExpr::Kind(k) = e {
                if let KindExpr::Derive { from, constraints } = k.as_ref() {
                    let base = expr(reg, schema, from).map_err(|err| in_type(reg, schema, name, err))?;
                    pending.push(PendingDerive { schema, name, base, constraints });
                    continue;
                }
            }
            let def = def_of(reg, schema, e).map_err(|err| in_type(reg, schema, name, err))?;
            reg.add_type(schema, name.clone(), def)?;
        }
        Ok(())
    }
}

fn qualified(reg: &TypeRegistry, schema: SchemaId, name: &str) -> String {
    format!("{}/{name}", reg.qualified_schema_name(schema))
}

fn in_type(reg: &TypeRegistry, schema: SchemaId, name: &str, e: ErrorKind) -> ErrorKind {
    let msg = match e {
        ErrorKind::Definition(m) => m,
        other => other.to_string(),
    };
    ErrorKind::Definition(format!("type `{}`: {msg}", qualified(reg, schema, name)))
}

fn builtin(reg: &TypeRegistry, name: &str) -> Option<TypeId> {
    Some(match name {
        "boolean" => reg.boolean(),
        "number" => reg.number(),
        "string" => reg.string(),
        "date" => reg.date(),
        "null" => reg.null(),
        "undefined" => reg.undefined(),
        "void" => reg.void(),
        _ => return None,
    })
}

fn with_constraints(mut def: TypeDef, constraints: &[ConstraintExpr]) -> Result<TypeDef, ErrorKind> {
    for c in constraints {
        def = def.constraint(Constraint::from_def(&c.name, c.value.as_ref()).map_err(ErrorKind::Definition)?);
    }
    Ok(def)
}

/// Type id for a nested expression: built-ins and links are shared,
/// everything else becomes an anonymous type.
fn expr(reg: &mut TypeRegistry, schema: SchemaId, e: &TypeExpr) -> Result<TypeId, ErrorKind> {
    if let TypeExpr::Named(name) = e {
        if let Some(id) = builtin(reg, name) {
            return Ok(id);
        }
        if let Some(path) = name.strip_prefix('@') {
            return Ok(reg.link(schema, path));
        }
    }
    let def = def_of(reg, schema, e)?;
    Ok(reg.anonymous(def))
}

fn exprs(reg: &mut TypeRegistry, schema: SchemaId, es: &[TypeExpr]) -> Result<Vec<TypeId>, ErrorKind> {
    es.iter().map(|e| expr(reg, schema, e)).collect()
}

fn def_of(reg: &mut TypeRegistry, schema: SchemaId, e: &TypeExpr) -> Result<TypeDef, ErrorKind> {
    let k = match e {
        TypeExpr::Named(name) => {
            if let Some(path) = name.strip_prefix('@') {
                return Ok(TypeDef::new(TypeKind::Link(LinkTarget { schema, path: path.to_string() })));
            }
            return match builtin(reg, name) {
                Some(id) => Ok(TypeDef::new(reg.get(id).kind().clone())),
                None => Err(ErrorKind::Definition(format!(
                    "unknown type `{name}`; write `@{name}` to reference a declared type"
                ))),
            };
        }
        TypeExpr::Kind(k) => k.as_ref(),
    };
    Ok(match k {
        KindExpr::Literal { value } => {
            let lit = crate::types::Literal::from_json(value)
                .ok_or_else(|| ErrorKind::Definition("literal must be null, a boolean, a number or a string".into()))?;
            TypeDef::literal(lit)
        }
        KindExpr::Object { properties, identifier, inverses, extends, constraints } => {
            let mut def = ObjectDef::new();
            for (name, p) in properties {
                def = def.property(name.clone(), expr(reg, schema, p)?);
            }
            if let Some(identifier) = identifier {
                def = def.identifier(identifier.iter().cloned());
            }
            for inv in inverses {
                let target = expr(reg, schema, &inv.target)?;
                def = def.inverse(inv.property.clone(), target, inv.target_property.clone());
            }
            if let Some(sup) = extends {
                def = def.extends(expr(reg, schema, sup)?);
            }
            with_constraints(def.into(), constraints)?
        }
        KindExpr::Array { items, constraints } => {
            with_constraints(TypeDef::array(expr(reg, schema, items)?), constraints)?
        }
        KindExpr::Map { key, value } => {
            let key = expr(reg, schema, key)?;
            TypeDef::map(key, expr(reg, schema, value)?)
        }
        KindExpr::Union { members } => TypeDef::union(exprs(reg, schema, members)?),
        KindExpr::TaggedUnion { discriminator, members } => {
            TypeDef::tagged_union(discriminator.clone(), exprs(reg, schema, members)?)
        }
        KindExpr::Intersection { members } => TypeDef::intersection(exprs(reg, schema, members)?),
        KindExpr::Optional { of } => TypeDef::optional(expr(reg, schema, of)?),
        KindExpr::EntityReference { target } => TypeDef::entity_reference(expr(reg, schema, target)?),
        KindExpr::ObjReference { target } => TypeDef::obj_reference(expr(reg, schema, target)?),
        KindExpr::Functional { params, returns } => {
            let params = exprs(reg, schema, params)?;
            TypeDef::functional(params, expr(reg, schema, returns)?)
        }
        KindExpr::Derive { .. } => {
            return Err(ErrorKind::Definition("`derive` is only allowed for named types".into()));
        }
    })
}
