#![forbid(unsafe_code)]

//! Builtin operator sets.
//!
//! Serialized code names operators as `namespace::name` (through `torch.*`
//! or `ops.<namespace>.*`). Which operators exist depends on the operator set
//! version recorded in the source header: an entry is visible for versions in
//! `since..until`.

use std::fmt;

use thiserror::Error;

use crate::types::Type;

/// Newest operator set version this table describes.
pub const CURRENT_OPERATOR_SET_VERSION: u64 = 5;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    pub namespace: String,
    pub name: String,
}

impl Symbol {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn aten(name: impl Into<String>) -> Self {
        Self::new("aten", name)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.namespace, self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnKind {
    Tensor,
    Bool,
    Int,
    /// Same type as the first input.
    SameAsFirst,
    /// `Tensor` for tensor inputs, `bool` for scalars.
    Compare,
    /// Payload type of a `Future` input.
    Unwrap,
    Any,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorSchema {
    pub namespace: &'static str,
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub returns: ReturnKind,
    pub since: u64,
    pub until: Option<u64>,
}

impl OperatorSchema {
    pub fn available_in(&self, version: u64) -> bool {
        version >= self.since && self.until.is_none_or(|until| version < until)
    }

    pub fn accepts_arity(&self, n: usize) -> bool {
        (self.min_args..=self.max_args).contains(&n)
    }

    pub fn return_type(&self, inputs: &[Type]) -> Type {
        match self.returns {
            ReturnKind::Tensor => Type::Tensor,
            ReturnKind::Bool => Type::Bool,
            ReturnKind::Int => Type::Int,
            ReturnKind::SameAsFirst => inputs.first().cloned().unwrap_or(Type::Tensor),
            ReturnKind::Compare => match inputs.first() {
                Some(Type::Tensor) => Type::Tensor,
                _ => Type::Bool,
            },
            ReturnKind::Unwrap => match inputs.first() {
                Some(Type::Future(inner)) => (**inner).clone(),
                _ => Type::Any,
            },
            ReturnKind::Any => Type::Any,
        }
    }
}

const fn op(
    namespace: &'static str,
    name: &'static str,
    min_args: usize,
    max_args: usize,
    returns: ReturnKind,
) -> OperatorSchema {
    OperatorSchema {
        namespace,
        name,
        min_args,
        max_args,
        returns,
        since: 0,
        until: None,
    }
}

const fn versioned(schema: OperatorSchema, since: u64, until: Option<u64>) -> OperatorSchema {
    OperatorSchema {
        since,
        until,
        ..schema
    }
}

use ReturnKind::*;

static OPERATORS: &[OperatorSchema] = &[
    op("aten", "add", 2, 3, SameAsFirst),
    op("aten", "sub", 2, 3, SameAsFirst),
    op("aten", "mul", 2, 2, SameAsFirst),
    op("aten", "div", 2, 2, SameAsFirst),
    // Integer-style division was renamed when operator set 4 landed.
    versioned(op("aten", "floordiv", 2, 2, SameAsFirst), 0, Some(4)),
    versioned(op("aten", "floor_divide", 2, 2, SameAsFirst), 4, None),
    op("aten", "neg", 1, 1, SameAsFirst),
    op("aten", "relu", 1, 1, Tensor),
    op("aten", "sigmoid", 1, 1, Tensor),
    op("aten", "tanh", 1, 1, Tensor),
    op("aten", "matmul", 2, 2, Tensor),
    op("aten", "linear", 2, 3, Tensor),
    op("aten", "t", 1, 1, Tensor),
    op("aten", "contiguous", 1, 1, Tensor),
    op("aten", "zeros_like", 1, 1, Tensor),
    op("aten", "dim", 1, 1, Int),
    op("aten", "size", 1, 2, Any),
    op("aten", "eq", 2, 2, Compare),
    op("aten", "ne", 2, 2, Compare),
    op("aten", "lt", 2, 2, Compare),
    op("aten", "gt", 2, 2, Compare),
    op("aten", "le", 2, 2, Compare),
    op("aten", "ge", 2, 2, Compare),
    op("aten", "__and__", 2, 2, Bool),
    op("aten", "__or__", 2, 2, Bool),
    op("aten", "__not__", 1, 1, Bool),
    op("aten", "__getitem__", 2, 2, SameAsFirst),
    op("aten", "wait", 1, 1, Unwrap),
    op("prim", "NumToTensor", 1, 1, Tensor),
    versioned(op("quantized", "add", 4, 4, Tensor), 2, None),
    versioned(op("quantized", "linear", 4, 4, Tensor), 2, None),
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OperatorError {
    #[error("unknown builtin operator {0}")]
    Unknown(Symbol),
    #[error("builtin operator {symbol} is not available in operator set version {version}")]
    NotInVersion { symbol: Symbol, version: u64 },
}

/// Look up `symbol` in the operator set for `version`.
pub fn find_operator(symbol: &Symbol, version: u64) -> Result<&'static OperatorSchema, OperatorError> {
    let mut known = false;
    for schema in OPERATORS
        .iter()
        .filter(|s| s.namespace == symbol.namespace && s.name == symbol.name)
    {
        known = true;
        if schema.available_in(version) {
            return Ok(schema);
        }
    }
    if known {
        Err(OperatorError::NotInVersion {
            symbol: symbol.clone(),
            version,
        })
    } else {
        Err(OperatorError::Unknown(symbol.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_gates_renamed_operators() {
        let old = Symbol::aten("floordiv");
        let new = Symbol::aten("floor_divide");
        assert!(find_operator(&old, 3).is_ok());
        assert_eq!(
            find_operator(&old, 4),
            Err(OperatorError::NotInVersion {
                symbol: old.clone(),
                version: 4
            })
        );
        assert!(find_operator(&new, 3).is_err());
        assert!(find_operator(&new, CURRENT_OPERATOR_SET_VERSION).is_ok());
    }

    #[test]
    fn unknown_operators_are_distinguished() {
        let err = find_operator(&Symbol::aten("frobnicate"), 1).unwrap_err();
        assert_eq!(err.to_string(), "unknown builtin operator aten::frobnicate");
    }

    #[test]
    fn return_types_follow_inputs() {
        let eq = find_operator(&Symbol::aten("eq"), 0).unwrap();
        assert_eq!(eq.return_type(&[Type::Tensor, Type::Tensor]), Type::Tensor);
        assert_eq!(eq.return_type(&[Type::Int, Type::Int]), Type::Bool);
        let wait = find_operator(&Symbol::aten("wait"), 0).unwrap();
        assert_eq!(wait.return_type(&[Type::Future(Box::new(Type::Int))]), Type::Int);
    }
}
