#![forbid(unsafe_code)]

pub mod graph;
pub mod ops;
pub mod types;
pub mod unit;
pub mod value;

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use graph::{type_of, Block, Graph, Node, NodeKind, ValueId, ValueInfo};
pub use ops::{find_operator, OperatorError, OperatorSchema, Symbol, CURRENT_OPERATOR_SET_VERSION};
pub use types::{
    ClassAttribute, ClassRegistry, ClassType, QualifiedName, QualifiedNameError, RegistryError,
    Type,
};
pub use unit::{Argument, CompilationUnit, Function, FunctionSchema, Module};
pub use value::{IValue, Tensor};

// Registry state stays consistent across a panicking writer: every write is
// a single insert or remove.
pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
