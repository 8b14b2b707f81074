#![forbid(unsafe_code)]

//! Name resolution and method compilation for serialized source.

mod compile;
mod error;
mod resolver;
mod sugared;

pub use compile::{declare, define, define_declared, resolve_type_expr, Declarations, SelfBinder};
pub use error::CompileError;
pub use resolver::{Resolver, ResolverConfig, ResolverRef, SourceResolver};
pub use sugared::{BuiltinModule, SugaredValue};
