//! Path-qualified violations and the aggregated failure returned by every
//! entry point.
use std::fmt;

// ------------------------------- Paths ------------------------------------ //

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Property(String),
    Index(usize),
    MapKey(usize),
    MapValue(usize),
    /// Member of a union/intersection, by display name.
    Member(String),
}

/// Structural location from the call root, rendered as `$.a.b[0]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path(pub Vec<PathSegment>);

impl Path {
    pub fn root() -> Self { Self::default() }

    pub fn segments(&self) -> &[PathSegment] { &self.0 }

    pub fn is_root(&self) -> bool { self.0.is_empty() }

    pub fn child(&self, segment: PathSegment) -> Self {
        let mut out = self.clone();
        out.0.push(segment);
        out
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for seg in &self.0 {
            match seg {
                PathSegment::Property(name) => write!(f, ".{name}")?,
                PathSegment::Index(i) => write!(f, "[{i}]")?,
                PathSegment::MapKey(i) => write!(f, "{{key {i}}}")?,
                PathSegment::MapValue(i) => write!(f, "{{value {i}}}")?,
                PathSegment::Member(name) => write!(f, "<{name}>")?,
            }
        }
        Ok(())
    }
}

// ------------------------------- Kinds ------------------------------------ //

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ErrorKind {
    #[error("missing required property `{property}`")]
    MissingProperty { property: String },

    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// A named constraint rejected the value (or panicked while checking it).
    #[error("{constraint}: {message}")]
    ValidationError { constraint: String, message: String },

    #[error("type `{path}` does not exist in schema `{schema}`")]
    UnresolvedLink { schema: String, path: String },

    #[error("schema `{schema}` is not valid: {reason}")]
    SchemaNotValid { schema: String, reason: String },

    #[error("cycle in tree encoding at instance of `{type_name}`")]
    CycleInTreeEncoding { type_name: String },

    #[error("subtype `{subtype}`: {reason}")]
    SubtypeShapeError { subtype: String, reason: String },

    #[error("inverse `{owner}.{property}`: {reason}")]
    InverseShapeError { owner: String, property: String, reason: String },

    #[error("no member of `{union}` matches: {reason}")]
    NoMatchingMember { union: String, reason: String },

    #[error("reference id {id} never resolved to an instance")]
    DanglingReference { id: u64 },

    #[error("malformed DTO: {reason}")]
    InvalidDto { reason: String },

    #[error("values of `{type_name}` are not serializable")]
    NotSerializable { type_name: String },

    #[error("definition error: {0}")]
    Definition(String),
}

// ----------------------------- Violations --------------------------------- //

#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub path: Path,
    pub kind: ErrorKind,
    /// Short rendering of the offending value, when there is one.
    pub value: Option<String>,
}

impl Violation {
    pub fn new(path: Path, kind: ErrorKind) -> Self {
        Self { path, kind, value: None }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.kind)?;
        if let Some(v) = &self.value {
            write!(f, " (value: {v})")?;
        }
        Ok(())
    }
}

/// Every violation discovered by one call, in discovery order.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub struct Failure {
    pub violations: Vec<Violation>,
}

impl Failure {
    pub fn single(violation: Violation) -> Self {
        Self { violations: vec![violation] }
    }

    pub fn len(&self) -> usize { self.violations.len() }

    pub fn is_empty(&self) -> bool { self.violations.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &Violation> { self.violations.iter() }

    /// True if any violation matches `pred`.
    pub fn any(&self, pred: impl Fn(&ErrorKind) -> bool) -> bool {
        self.violations.iter().any(|v| pred(&v.kind))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.violations.len();
        write!(f, "{n} violation{}", if n == 1 { "" } else { "s" })?;
        for v in &self.violations {
            write!(f, "\n  {v}")?;
        }
        Ok(())
    }
}

/// Turn a list of violations into a result.
pub fn collect<T>(value: T, violations: Vec<Violation>) -> Result<T, Failure> {
    if violations.is_empty() { Ok(value) } else { Err(Failure { violations }) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_renders_properties_and_indices() {
        let p = Path::root()
            .child(PathSegment::Property("children".into()))
            .child(PathSegment::Index(2))
            .child(PathSegment::Property("name".into()));
        assert_eq!(p.to_string(), "$.children[2].name");
        assert_eq!(Path::root().to_string(), "$");
    }

    #[test]
    fn failure_display_lists_every_violation() {
        let f = Failure {
            violations: vec![
                Violation::new(Path::root(), ErrorKind::MissingProperty { property: "a".into() }),
                Violation::new(
                    Path::root().child(PathSegment::Property("b".into())),
                    ErrorKind::TypeMismatch { expected: "string".into(), found: "number".into() },
                ).with_value("3"),
            ],
        };
        let s = f.to_string();
        assert!(s.starts_with("2 violations"));
        assert!(s.contains("$: missing required property `a`"));
        assert!(s.contains("$.b: expected string, found number (value: 3)"));
    }
}
