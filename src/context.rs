//! Per-call conversion state and the options that drive it.
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Failure, Path, PathSegment, Violation};
use crate::visited::VisitedNodes;

pub const DEFAULT_TYPE_INFO_PROP: &str = "__type";

static DEFAULT_OPTIONS: Lazy<ConversionOptions> = Lazy::new(ConversionOptions::default);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// `ref` wrappers with ids; sharing and cycles survive.
    Graph,
    /// Payloads inlined; shared subtrees are duplicated, cycles rejected.
    Tree,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversionOptions {
    /// Validate the instance before encoding / the result after decoding.
    pub validate: bool,
    #[serde(rename = "isTreeDTO")]
    pub is_tree_dto: bool,
    pub include_type_info: bool,
    pub type_info_prop_name: String,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            validate: false,
            is_tree_dto: false,
            include_type_info: false,
            type_info_prop_name: DEFAULT_TYPE_INFO_PROP.to_string(),
        }
    }
}

impl ConversionOptions {
    pub fn graph() -> Self { Self::default() }

    pub fn tree() -> Self {
        Self { is_tree_dto: true, ..Self::default() }
    }

    pub fn validating(mut self) -> Self {
        self.validate = true;
        self
    }

    pub fn with_type_info(mut self, prop_name: Option<&str>) -> Self {
        self.include_type_info = true;
        if let Some(name) = prop_name {
            self.type_info_prop_name = name.to_string();
        }
        self
    }

    pub fn encoding(&self) -> Encoding {
        if self.is_tree_dto { Encoding::Tree } else { Encoding::Graph }
    }
}

/// State for exactly one top-level call: visited table, id counter,
/// violations, current path. Never shared between calls.
#[derive(Debug)]
pub struct ConversionContext<'o, K, R> {
    pub options: &'o ConversionOptions,
    pub visited: VisitedNodes<K, R>,
    next_id: u64,
    violations: Vec<Violation>,
    path: Vec<PathSegment>,
}

impl<K: std::hash::Hash + Eq + Clone, R> ConversionContext<'static, K, R> {
    /// Context with default options, for walks that take none.
    pub fn with_defaults() -> Self { ConversionContext::new(&DEFAULT_OPTIONS) }
}

impl<'o, K: std::hash::Hash + Eq + Clone, R> ConversionContext<'o, K, R> {
    pub fn new(options: &'o ConversionOptions) -> Self {
        Self {
            options,
            visited: VisitedNodes::new(),
            next_id: 1,
            violations: Vec::new(),
            path: Vec::new(),
        }
    }

    /// Monotonic reference id, starting at 1.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn enter(&mut self, segment: PathSegment) { self.path.push(segment) }

    pub fn leave(&mut self) { self.path.pop(); }

    pub fn path(&self) -> Path { Path(self.path.clone()) }

    pub fn report(&mut self, kind: ErrorKind) {
        let v = Violation::new(self.path(), kind);
        self.violations.push(v);
    }

    pub fn report_value(&mut self, kind: ErrorKind, preview: impl Into<String>) {
        let v = Violation::new(self.path(), kind).with_value(preview);
        self.violations.push(v);
    }

    pub fn extend(&mut self, violations: impl IntoIterator<Item = Violation>) {
        self.violations.extend(violations);
    }

    pub fn violation_count(&self) -> usize { self.violations.len() }

    pub fn truncate_violations(&mut self, len: usize) { self.violations.truncate(len) }

    pub fn into_result<T>(self, value: T) -> Result<T, Failure> {
        crate::error::collect(value, self.violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_deserialize_with_wire_names() {
        let opts: ConversionOptions = serde_json::from_value(serde_json::json!({
            "isTreeDTO": true,
            "includeTypeInfo": true
        }))
        .unwrap();
        assert_eq!(opts.encoding(), Encoding::Tree);
        assert!(opts.include_type_info);
        assert_eq!(opts.type_info_prop_name, "__type");
        assert!(!opts.validate);
    }

    #[test]
    fn ids_are_monotonic_and_paths_stack() {
        let mut ctx: ConversionContext<'static, u64, ()> = ConversionContext::with_defaults();
        assert_eq!(ctx.next_id(), 1);
        assert_eq!(ctx.next_id(), 2);
        ctx.enter(PathSegment::Property("a".into()));
        ctx.enter(PathSegment::Index(0));
        ctx.report(ErrorKind::MissingProperty { property: "b".into() });
        ctx.leave();
        ctx.leave();
        let failure = ctx.into_result(()).unwrap_err();
        assert_eq!(failure.violations[0].path.to_string(), "$.a[0]");
    }
}
