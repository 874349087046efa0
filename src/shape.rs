//! Shape queries shared by the walkers: flattened subtype properties,
//! identifiers, discriminator tags, member naming.
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::error::ErrorKind;
use crate::schema::TypeRegistry;
use crate::types::{Literal, ObjectType, Scalar, TypeId, TypeKind};

/// Effective property set of an object or subtype. Ancestors come first;
/// an own property replaces a same-named ancestor one in place.
pub(crate) fn properties(reg: &TypeRegistry, id: TypeId) -> Result<Cow<'_, IndexMap<String, TypeId>>, ErrorKind> {
    match reg.get(id).kind() {
        TypeKind::Object(o) => Ok(Cow::Borrowed(&o.properties)),
        TypeKind::Subtype { .. } => {
            let chain = object_chain(reg, id)?;
            let mut out = IndexMap::new();
            for object in chain.iter().rev() {
                for (name, ty) in &object.properties {
                    out.insert(name.clone(), *ty);
                }
            }
            Ok(Cow::Owned(out))
        }
        other => Err(ErrorKind::TypeMismatch {
            expected: "object type".into(),
            found: other.category().into(),
        }),
    }
}

/// The subtype's own object first, then each supertype up to the root object.
fn object_chain(reg: &TypeRegistry, id: TypeId) -> Result<Vec<&ObjectType>, ErrorKind> {
    let subtype = reg.display_name(id);
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = id;
    loop {
        if !seen.insert(cursor) {
            return Err(ErrorKind::SubtypeShapeError { subtype, reason: "supertype chain is cyclic".into() });
        }
        match reg.get(cursor).kind() {
            TypeKind::Subtype { supertype, object } => {
                chain.push(object);
                cursor = reg.concrete(*supertype)?;
            }
            TypeKind::Object(object) => {
                chain.push(object);
                return Ok(chain);
            }
            other => {
                return Err(ErrorKind::SubtypeShapeError {
                    subtype,
                    reason: format!("supertype `{}` is a {}, not an object", reg.display_name(cursor), other.category()),
                });
            }
        }
    }
}

/// Whether every value of `sub` is a value of `sup` as far as structure
/// shows. Constraints are not compared.
pub(crate) fn assignable(reg: &TypeRegistry, sub: TypeId, sup: TypeId) -> bool {
    assignable_inner(reg, sub, sup, &mut HashSet::new())
}

fn assignable_inner(reg: &TypeRegistry, sub: TypeId, sup: TypeId, seen: &mut HashSet<(TypeId, TypeId)>) -> bool {
    let (Ok(sub), Ok(sup)) = (reg.concrete(sub), reg.concrete(sup)) else { return false };
    // a pair already under comparison holds unless something else fails
    if sub == sup || !seen.insert((sub, sup)) {
        return true;
    }
    if let Some(base) = reg.get(sub).derived_from() {
        if assignable_inner(reg, base, sup, seen) {
            return true;
        }
    }
    match (reg.get(sub).kind(), reg.get(sup).kind()) {
        (TypeKind::Optional(a), TypeKind::Optional(b)) => assignable_inner(reg, *a, *b, seen),
        (_, TypeKind::Optional(b)) => assignable_inner(reg, sub, *b, seen),
        (TypeKind::Union(ms), _) => ms.iter().all(|m| assignable_inner(reg, *m, sup, seen)),
        (_, TypeKind::Union(ms)) => ms.iter().any(|m| assignable_inner(reg, sub, *m, seen)),
        (TypeKind::Intersection(ms), _) => ms.iter().any(|m| assignable_inner(reg, *m, sup, seen)),
        (TypeKind::Simple(a), TypeKind::Simple(b)) => a == b || literal_fits(a, b),
        (TypeKind::Array(a), TypeKind::Array(b)) => assignable_inner(reg, *a, *b, seen),
        (TypeKind::Map { key: ka, value: va }, TypeKind::Map { key: kb, value: vb }) => {
            assignable_inner(reg, *ka, *kb, seen) && assignable_inner(reg, *va, *vb, seen)
        }
        (TypeKind::ObjReference(a), TypeKind::ObjReference(b))
        | (TypeKind::EntityReference(a), TypeKind::EntityReference(b)) => assignable_inner(reg, *a, *b, seen),
        (TypeKind::Object(_) | TypeKind::Subtype { .. }, TypeKind::Object(_) | TypeKind::Subtype { .. }) => {
            extends(reg, sub, sup)
        }
        _ => false,
    }
}

fn literal_fits(sub: &Scalar, sup: &Scalar) -> bool {
    matches!(
        (sub, sup),
        (Scalar::Literal(Literal::Null), Scalar::Null)
            | (Scalar::Literal(Literal::Bool(_)), Scalar::Boolean)
            | (Scalar::Literal(Literal::Number(_)), Scalar::Number)
            | (Scalar::Literal(Literal::String(_)), Scalar::String)
    )
}

/// `sub` is `sup` or has it on its supertype chain.
fn extends(reg: &TypeRegistry, sub: TypeId, sup: TypeId) -> bool {
    let mut cursor = sub;
    for _ in 0..=reg.type_count() {
        if cursor == sup {
            return true;
        }
        cursor = match reg.get(cursor).kind() {
            TypeKind::Subtype { supertype, .. } => match reg.concrete(*supertype) {
                Ok(next) => next,
                Err(_) => return false,
            },
            _ => return false,
        };
    }
    false
}

/// Identifier of an object type, inherited through supertypes.
pub(crate) fn identifier(reg: &TypeRegistry, id: TypeId) -> Option<Vec<String>> {
    let chain = match reg.get(id).kind() {
        TypeKind::Object(o) => vec![o],
        TypeKind::Subtype { .. } => object_chain(reg, id).ok()?,
        _ => return None,
    };
    chain.into_iter().find_map(|o| o.identifier.clone())
}

pub(crate) fn is_object(reg: &TypeRegistry, id: TypeId) -> bool {
    matches!(reg.get(id).kind(), TypeKind::Object(_) | TypeKind::Subtype { .. })
}

pub(crate) fn is_optional(reg: &TypeRegistry, id: TypeId) -> bool {
    reg.concrete(id).is_ok_and(|c| matches!(reg.get(c).kind(), TypeKind::Optional(_)))
}

pub(crate) fn is_functional(reg: &TypeRegistry, id: TypeId) -> bool {
    reg.concrete(id).is_ok_and(|c| matches!(reg.get(c).kind(), TypeKind::Functional { .. }))
}

/// Whether JSON `null` is a meaningful value of this type.
pub(crate) fn accepts_null(reg: &TypeRegistry, id: TypeId) -> bool {
    let Ok(c) = reg.concrete(id) else { return false };
    match reg.get(c).kind() {
        TypeKind::Simple(Scalar::Null) | TypeKind::Simple(Scalar::Literal(Literal::Null)) => true,
        TypeKind::Union(ms) => ms.iter().any(|m| accepts_null(reg, *m)),
        TypeKind::Optional(inner) => accepts_null(reg, *inner),
        _ => false,
    }
}

/// Follow Optional wrappers and container element types down to the
/// referenced object type.
pub(crate) fn element_type(reg: &TypeRegistry, id: TypeId) -> Result<TypeId, ErrorKind> {
    let mut cursor = reg.concrete(id)?;
    for _ in 0..reg.type_count() {
        cursor = match reg.get(cursor).kind() {
            TypeKind::Optional(inner) | TypeKind::Array(inner) => reg.concrete(*inner)?,
            TypeKind::Map { value, .. } => reg.concrete(*value)?,
            _ => return Ok(cursor),
        };
    }
    Ok(cursor)
}

/// Literal tag a tagged-union member declares for `discriminator`.
pub(crate) fn tag_of(reg: &TypeRegistry, member: TypeId, discriminator: &str) -> Result<Literal, String> {
    let member = reg.concrete(member).map_err(|e| e.to_string())?;
    let props = properties(reg, member).map_err(|e| e.to_string())?;
    let prop = props
        .get(discriminator)
        .ok_or_else(|| format!("member `{}` does not declare `{discriminator}`", reg.display_name(member)))?;
    let prop = reg.concrete(*prop).map_err(|e| e.to_string())?;
    match reg.get(prop).kind() {
        TypeKind::Simple(Scalar::Literal(l)) => Ok(l.clone()),
        _ => Err(format!(
            "member `{}` declares `{discriminator}` as {}, not a literal",
            reg.display_name(member),
            reg.display_name(prop)
        )),
    }
}

pub(crate) fn tag_table(reg: &TypeRegistry, members: &[TypeId], discriminator: &str) -> HashMap<Literal, TypeId> {
    let mut table = HashMap::new();
    for m in members {
        if let Ok(tag) = tag_of(reg, *m, discriminator) {
            table.entry(tag).or_insert(*m);
        }
    }
    table
}

/// Member for a discriminator value: precomputed table when links have been
/// resolved, otherwise a scan.
pub(crate) fn member_for_tag(
    reg: &TypeRegistry,
    union: TypeId,
    members: &[TypeId],
    discriminator: &str,
    tag: &Literal,
) -> Option<TypeId> {
    match reg.tag_table(union) {
        Some(table) => table.get(tag).copied(),
        None => members
            .iter()
            .copied()
            .find(|m| tag_of(reg, *m, discriminator).is_ok_and(|t| &t == tag)),
    }
}

/// Wire names of union/intersection members, made unique by position when
/// two members share a display name.
pub(crate) fn member_names(reg: &TypeRegistry, members: &[TypeId]) -> Vec<String> {
    let names: Vec<String> = members.iter().map(|m| reg.display_name(*m)).collect();
    names
        .iter()
        .enumerate()
        .map(|(i, n)| {
            if names.iter().filter(|o| *o == n).count() > 1 { format!("{n}#{i}") } else { n.clone() }
        })
        .collect()
}
