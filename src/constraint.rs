//! Named constraints attached to types, plus a small built-in set.
//!
//! A constraint is a predicate paired with a message formatter. All of a
//! type's constraints run on every check; a predicate that panics is isolated
//! and reported as a failed constraint rather than aborting the walk.
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as Json;

use crate::types::TypeDef;
use crate::value::{Heap, Value};

type Predicate = dyn Fn(&Heap, &Value) -> bool + Send + Sync;
type Formatter = dyn Fn(&Heap, &Value) -> String + Send + Sync;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("static regex")
});

#[derive(Clone)]
pub struct Constraint {
    name: Arc<str>,
    predicate: Arc<Predicate>,
    message: Arc<Formatter>,
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constraint({})", self.name)
    }
}

impl Constraint {
    pub fn new(
        name: impl Into<Arc<str>>,
        predicate: impl Fn(&Heap, &Value) -> bool + Send + Sync + 'static,
        message: impl Fn(&Heap, &Value) -> String + Send + Sync + 'static,
    ) -> Self {
        Self { name: name.into(), predicate: Arc::new(predicate), message: Arc::new(message) }
    }

    /// Constraint over scalar values only.
    pub fn scalar(
        name: impl Into<Arc<str>>,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
        message: impl Into<String>,
    ) -> Self {
        let message: String = message.into();
        Self::new(name, move |_, v| predicate(v), move |_, _| message.clone())
    }

    pub fn name(&self) -> &str { &self.name }

    /// `Err(message)` when the value is rejected or the predicate panicked.
    pub fn check(&self, heap: &Heap, value: &Value) -> Result<(), String> {
        match catch_unwind(AssertUnwindSafe(|| (self.predicate)(heap, value))) {
            Ok(true) => Ok(()),
            Ok(false) => Err(catch_unwind(AssertUnwindSafe(|| (self.message)(heap, value)))
                .unwrap_or_else(|_| format!("constraint `{}` failed", self.name))),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::warn!(constraint = %self.name, %reason, "constraint predicate panicked");
                Err(format!("constraint panicked: {reason}"))
            }
        }
    }

    // ----------------------------- built-ins ------------------------------ //

    pub fn min(bound: f64) -> Self {
        Self::scalar("min", move |v| v.as_f64().is_some_and(|n| n >= bound), format!("must be >= {bound}"))
    }

    pub fn max(bound: f64) -> Self {
        Self::scalar("max", move |v| v.as_f64().is_some_and(|n| n <= bound), format!("must be <= {bound}"))
    }

    pub fn greater_than(bound: f64) -> Self {
        Self::scalar("greaterThan", move |v| v.as_f64().is_some_and(|n| n > bound), format!("must be > {bound}"))
    }

    pub fn less_than(bound: f64) -> Self {
        Self::scalar("lessThan", move |v| v.as_f64().is_some_and(|n| n < bound), format!("must be < {bound}"))
    }

    pub fn positive() -> Self {
        Self::scalar("positive", |v| v.as_f64().is_some_and(|n| n > 0.0), "must be positive")
    }

    pub fn integer() -> Self {
        Self::scalar("integer", |v| v.as_f64().is_some_and(|n| n.fract() == 0.0), "must be an integer")
    }

    pub fn min_length(len: usize) -> Self {
        Self::scalar(
            "minLength",
            move |v| v.as_str().is_some_and(|s| s.chars().count() >= len),
            format!("length must be >= {len}"),
        )
    }

    pub fn max_length(len: usize) -> Self {
        Self::scalar(
            "maxLength",
            move |v| v.as_str().is_some_and(|s| s.chars().count() <= len),
            format!("length must be <= {len}"),
        )
    }

    pub fn non_empty() -> Self {
        Self::new(
            "nonEmpty",
            |heap, v| match v {
                Value::String(s) => !s.is_empty(),
                other => heap.array_items(other).is_some_and(|xs| !xs.is_empty()),
            },
            |_, _| "must not be empty".to_string(),
        )
    }

    pub fn pattern(regex: Regex) -> Self {
        let message = format!("must match /{}/", regex.as_str());
        Self::scalar("pattern", move |v| v.as_str().is_some_and(|s| regex.is_match(s)), message)
    }

    pub fn email() -> Self {
        Self::scalar("email", |v| v.as_str().is_some_and(|s| EMAIL.is_match(s)), "must be an email address")
    }

    pub fn min_items(len: usize) -> Self {
        Self::new(
            "minItems",
            move |heap, v| heap.array_items(v).is_some_and(|xs| xs.len() >= len),
            move |_, _| format!("must have at least {len} items"),
        )
    }

    pub fn max_items(len: usize) -> Self {
        Self::new(
            "maxItems",
            move |heap, v| heap.array_items(v).is_some_and(|xs| xs.len() <= len),
            move |_, _| format!("must have at most {len} items"),
        )
    }

    pub fn one_of(allowed: Vec<Value>) -> Self {
        let message = format!("must be one of {} allowed values", allowed.len());
        Self::scalar("oneOf", move |v| allowed.contains(v), message)
    }

    /// Allowed values given as JSON. Objects and arrays compare structurally
    /// against the checked value, whatever heap it lives in.
    pub fn one_of_json(allowed: &[Json]) -> Self {
        let mut scratch = Heap::new();
        let allowed: Vec<Value> = allowed.iter().map(|j| scratch.import_json(j)).collect();
        let message = format!("must be one of {} allowed values", allowed.len());
        Self::new(
            "oneOf",
            move |heap, v| allowed.iter().any(|a| scratch.structurally_equal(a, heap, v)),
            move |_, _| message.clone(),
        )
    }

    /// Build a built-in constraint from its definition-file form.
    pub fn from_def(name: &str, value: Option<&Json>) -> Result<Self, String> {
        let num = || value.and_then(Json::as_f64).ok_or_else(|| format!("`{name}` needs a numeric value"));
        let len = || {
            value
                .and_then(Json::as_u64)
                .map(|n| n as usize)
                .ok_or_else(|| format!("`{name}` needs a non-negative integer value"))
        };
        Ok(match name {
            "min" => Self::min(num()?),
            "max" => Self::max(num()?),
            "greaterThan" => Self::greater_than(num()?),
            "lessThan" => Self::less_than(num()?),
            "positive" => Self::positive(),
            "integer" => Self::integer(),
            "minLength" => Self::min_length(len()?),
            "maxLength" => Self::max_length(len()?),
            "nonEmpty" => Self::non_empty(),
            "email" => Self::email(),
            "minItems" => Self::min_items(len()?),
            "maxItems" => Self::max_items(len()?),
            "pattern" => {
                let src = value.and_then(Json::as_str).ok_or("`pattern` needs a string value")?;
                Self::pattern(Regex::new(src).map_err(|e| format!("bad pattern: {e}"))?)
            }
            "oneOf" => {
                let items = value.and_then(Json::as_array).ok_or("`oneOf` needs an array value")?;
                Self::one_of_json(items)
            }
            other => return Err(format!("unknown constraint `{other}`")),
        })
    }
}

/// Fluent shorthands for the built-ins.
impl TypeDef {
    pub fn min(self, bound: f64) -> Self { self.constraint(Constraint::min(bound)) }
    pub fn max(self, bound: f64) -> Self { self.constraint(Constraint::max(bound)) }
    pub fn greater_than(self, bound: f64) -> Self { self.constraint(Constraint::greater_than(bound)) }
    pub fn less_than(self, bound: f64) -> Self { self.constraint(Constraint::less_than(bound)) }
    pub fn positive(self) -> Self { self.constraint(Constraint::positive()) }
    pub fn integer(self) -> Self { self.constraint(Constraint::integer()) }
    pub fn min_length(self, len: usize) -> Self { self.constraint(Constraint::min_length(len)) }
    pub fn max_length(self, len: usize) -> Self { self.constraint(Constraint::max_length(len)) }
    pub fn non_empty(self) -> Self { self.constraint(Constraint::non_empty()) }
    pub fn pattern(self, regex: Regex) -> Self { self.constraint(Constraint::pattern(regex)) }
    pub fn email(self) -> Self { self.constraint(Constraint::email()) }
}
