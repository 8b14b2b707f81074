#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

/// Dense `f64` tensor. Storage is shared, so clones are cheap and a constant
/// table can be handed to the graph without copying data.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    sizes: Vec<usize>,
    data: Arc<[f64]>,
}

impl Tensor {
    /// Returns `None` when `data.len()` does not match the product of `sizes`.
    pub fn new(sizes: Vec<usize>, data: Vec<f64>) -> Option<Self> {
        let numel: usize = sizes.iter().product();
        if numel != data.len() {
            return None;
        }
        Some(Self {
            sizes,
            data: data.into(),
        })
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            sizes: Vec::new(),
            data: Arc::from([value]),
        }
    }

    pub fn from_vec(data: Vec<f64>) -> Self {
        Self {
            sizes: vec![data.len()],
            data: data.into(),
        }
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(sizes={:?})", self.sizes)
    }
}

/// A constant that can be embedded in a graph.
#[derive(Clone, Debug, PartialEq)]
pub enum IValue {
    None,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Tensor(Tensor),
    Tuple(Vec<IValue>),
}

impl IValue {
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            IValue::Tensor(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for IValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IValue::None => f.write_str("None"),
            IValue::Bool(b) => f.write_str(if *b { "True" } else { "False" }),
            IValue::Int(n) => write!(f, "{n}"),
            IValue::Double(x) if x.is_nan() => f.write_str("nan"),
            IValue::Double(x) if x.is_infinite() => {
                f.write_str(if *x > 0.0 { "inf" } else { "-inf" })
            }
            IValue::Double(x) => write!(f, "{x:?}"),
            IValue::Str(s) => write!(f, "{s:?}"),
            IValue::Tensor(t) => write!(f, "{t}"),
            IValue::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}
