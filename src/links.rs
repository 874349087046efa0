//! Schema-time checks: every link reachable from a type resolves, and the
//! shape rules that can only be checked once links resolve (subtype chains,
//! tagged-union tags, entity identifiers, inverse pairs).
use std::collections::{HashMap, HashSet};

use crate::error::{ErrorKind, Path, PathSegment, Violation};
use crate::schema::TypeRegistry;
use crate::shape;
use crate::types::{ObjectType, TypeId, TypeKind};

pub(crate) fn check_type(
    reg: &TypeRegistry,
    id: TypeId,
    path: &Path,
    visited: &mut HashSet<TypeId>,
) -> Vec<Violation> {
    let mut out = Vec::new();
    walk(reg, id, path, visited, &mut out);
    out
}

fn walk(reg: &TypeRegistry, id: TypeId, path: &Path, visited: &mut HashSet<TypeId>, out: &mut Vec<Violation>) {
    if !visited.insert(id) {
        return;
    }
    let ty = reg.get(id);
    if let Some(base) = ty.derived_from() {
        walk(reg, base, path, visited, out);
    }
    match ty.kind() {
        TypeKind::Simple(_) => {}
        TypeKind::Link(_) => match reg.concrete(id) {
            Ok(target) => walk(reg, target, path, visited, out),
            Err(e) => out.push(Violation::new(path.clone(), e)),
        },
        TypeKind::Object(object) => check_object(reg, id, object, path, visited, out),
        TypeKind::Subtype { supertype, object } => {
            walk(reg, *supertype, path, visited, out);
            match shape::properties(reg, id) {
                // already reported while walking the supertype
                Err(ErrorKind::UnresolvedLink { .. }) => {}
                Err(e) => out.push(Violation::new(path.clone(), e)),
                Ok(_) => {
                    check_overrides(reg, id, *supertype, object, path, out);
                    check_object(reg, id, object, path, visited, out);
                }
            }
        }
        TypeKind::Array(item) | TypeKind::Optional(item) => walk(reg, *item, path, visited, out),
        TypeKind::Map { key, value } => {
            walk(reg, *key, path, visited, out);
            walk(reg, *value, path, visited, out);
        }
        TypeKind::Union(members) | TypeKind::Intersection(members) => {
            for m in members {
                walk(reg, *m, path, visited, out);
            }
        }
        TypeKind::TaggedUnion { discriminator, members } => {
            let mut seen = HashMap::new();
            for m in members {
                walk(reg, *m, path, visited, out);
                match shape::tag_of(reg, *m, discriminator) {
                    Ok(tag) => {
                        if let Some(prev) = seen.insert(tag.clone(), *m) {
                            out.push(Violation::new(
                                path.clone(),
                                ErrorKind::Definition(format!(
                                    "tag {tag} is declared by both `{}` and `{}`",
                                    reg.display_name(prev),
                                    reg.display_name(*m)
                                )),
                            ));
                        }
                    }
                    // unresolved members were reported by the walk above
                    Err(reason) if reg.concrete(*m).is_ok() => {
                        out.push(Violation::new(path.clone(), ErrorKind::Definition(reason)));
                    }
                    Err(_) => {}
                }
            }
        }
        TypeKind::EntityReference(target) => {
            walk(reg, *target, path, visited, out);
            if let Ok(t) = reg.concrete(*target) {
                if shape::identifier(reg, t).is_none() {
                    out.push(Violation::new(
                        path.clone(),
                        ErrorKind::Definition(format!(
                            "entity reference target `{}` declares no identifier",
                            reg.display_name(t)
                        )),
                    ));
                }
            }
        }
        TypeKind::ObjReference(target) => {
            walk(reg, *target, path, visited, out);
            if let Ok(t) = reg.concrete(*target) {
                if !shape::is_object(reg, t) {
                    out.push(Violation::new(
                        path.clone(),
                        ErrorKind::TypeMismatch {
                            expected: "object type".into(),
                            found: reg.display_name(t),
                        },
                    ));
                }
            }
        }
        TypeKind::Functional { params, returns } => {
            for p in params {
                walk(reg, *p, path, visited, out);
            }
            walk(reg, *returns, path, visited, out);
        }
    }
}

/// An own property that shadows an inherited one must narrow its type.
fn check_overrides(
    reg: &TypeRegistry,
    id: TypeId,
    supertype: TypeId,
    object: &ObjectType,
    path: &Path,
    out: &mut Vec<Violation>,
) {
    let Ok(sup) = reg.concrete(supertype) else { return };
    let Ok(inherited) = shape::properties(reg, sup) else { return };
    for (name, ty) in &object.properties {
        let Some(base) = inherited.get(name) else { continue };
        if !shape::assignable(reg, *ty, *base) {
            out.push(Violation::new(
                path.child(PathSegment::Property(name.clone())),
                ErrorKind::SubtypeShapeError {
                    subtype: reg.display_name(id),
                    reason: format!(
                        "`{name}` is {}, not assignable to inherited {}",
                        reg.display_name(*ty),
                        reg.display_name(*base)
                    ),
                },
            ));
        }
    }
}

fn check_object(
    reg: &TypeRegistry,
    id: TypeId,
    object: &ObjectType,
    path: &Path,
    visited: &mut HashSet<TypeId>,
    out: &mut Vec<Violation>,
) {
    for (name, ty) in &object.properties {
        walk(reg, *ty, &path.child(PathSegment::Property(name.clone())), visited, out);
    }
    let Ok(props) = shape::properties(reg, id) else { return };

    if let Some(identifier) = &object.identifier {
        for p in identifier.iter().filter(|p| !props.contains_key(*p)) {
            out.push(Violation::new(
                path.clone(),
                ErrorKind::Definition(format!("identifier property `{p}` is not declared")),
            ));
        }
    }

    let owner = reg.display_name(id);
    for inv in &object.inverses {
        let fail = |reason: String| {
            Violation::new(
                path.child(PathSegment::Property(inv.property.clone())),
                ErrorKind::InverseShapeError { owner: owner.clone(), property: inv.property.clone(), reason },
            )
        };
        let Some(own_prop) = props.get(&inv.property) else {
            out.push(fail("property is not declared".into()));
            continue;
        };
        let target = match reg.concrete(inv.target) {
            Ok(t) if shape::is_object(reg, t) => t,
            Ok(t) => {
                out.push(fail(format!("target `{}` is not an object type", reg.display_name(t))));
                continue;
            }
            Err(e) => {
                out.push(fail(e.to_string()));
                continue;
            }
        };
        let target_props = match shape::properties(reg, target) {
            Ok(p) => p,
            Err(e) => {
                out.push(fail(e.to_string()));
                continue;
            }
        };
        let Some(their_prop) = target_props.get(&inv.target_property) else {
            out.push(fail(format!(
                "`{}` declares no property `{}`",
                reg.display_name(target),
                inv.target_property
            )));
            continue;
        };
        match shape::element_type(reg, *own_prop) {
            Ok(t) if t == target => {}
            Ok(t) => out.push(fail(format!(
                "points at `{}`, expected `{}`",
                reg.display_name(t),
                reg.display_name(target)
            ))),
            Err(e) => out.push(fail(e.to_string())),
        }
        match shape::element_type(reg, *their_prop) {
            Ok(t) if t == id => {}
            Ok(t) => out.push(fail(format!(
                "`{}.{}` points at `{}`, expected `{owner}`",
                reg.display_name(target),
                inv.target_property,
                reg.display_name(t)
            ))),
            Err(e) => out.push(fail(e.to_string())),
        }
    }
}
