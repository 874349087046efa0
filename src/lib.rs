//! Runtime type descriptors for instance graphs.
//!
//! Types are registered in a [`TypeRegistry`] (a tree of named schemas plus
//! anonymous types) and refer to each other by id or by path link, so
//! recursive and mutually recursive types are ordinary. Instances live in a
//! [`Heap`]; any graph of them, cycles and sharing included, can be
//! validated, encoded to a DTO and rebuilt from one through a [`TypeHandle`].
pub mod constraint;
pub mod context;
pub mod definition;
pub mod error;
pub mod handle;
pub mod path_de;
pub mod schema;
pub mod types;
pub mod value;
pub mod visited;

mod decode;
mod encode;
mod links;
mod shape;
mod validate;

pub use constraint::Constraint;
pub use context::{ConversionContext, ConversionOptions, Encoding};
pub use error::{ErrorKind, Failure, Path, PathSegment, Violation};
pub use handle::TypeHandle;
pub use schema::{LinkStatus, SchemaId, TypeRegistry, TypeSchema, ValidateStatus};
pub use types::{Literal, ObjectDef, Scalar, Type, TypeDef, TypeId, TypeKind};
pub use value::{Func, Heap, Node, NodeId, Value};

#[cfg(test)]
mod tests;
