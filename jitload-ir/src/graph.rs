#![forbid(unsafe_code)]

use std::fmt;

use jitload_ast::Span;

use crate::ops::Symbol;
use crate::types::Type;
use crate::value::IValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct ValueInfo {
    pub ty: Type,
    pub debug_name: Option<String>,
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Constant(IValue),
    Builtin {
        symbol: Symbol,
        inputs: Vec<ValueId>,
    },
    /// `inputs[0]` is the receiver.
    CallMethod {
        name: String,
        inputs: Vec<ValueId>,
    },
    CreateObject,
    GetAttr {
        name: String,
        input: ValueId,
    },
    Fork {
        target: String,
        inputs: Vec<ValueId>,
    },
    Annotate {
        input: ValueId,
    },
    TupleConstruct {
        inputs: Vec<ValueId>,
    },
    TupleIndex {
        input: ValueId,
        index: usize,
    },
    /// Outputs of the node are the branch blocks' outputs, pairwise.
    If {
        cond: ValueId,
        then_block: Block,
        else_block: Block,
    },
}

#[derive(Clone, Debug)]
pub struct Node {
    pub span: Span,
    pub kind: NodeKind,
    pub outputs: Vec<ValueId>,
}

#[derive(Clone, Debug, Default)]
pub struct Block {
    pub nodes: Vec<Node>,
    pub outputs: Vec<ValueId>,
}

/// Structured SSA graph. Nodes are appended to the innermost open block;
/// `push_block`/`pop_block` bracket the bodies of `If` nodes.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    values: Vec<ValueInfo>,
    inputs: Vec<ValueId>,
    root: Block,
    open: Vec<Block>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_value(&mut self, ty: Type) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueInfo {
            ty,
            debug_name: None,
        });
        id
    }

    fn current(&mut self) -> &mut Block {
        self.open.last_mut().unwrap_or(&mut self.root)
    }

    pub fn add_input(&mut self, name: &str, ty: Type) -> ValueId {
        let v = self.fresh_value(ty);
        self.set_debug_name(v, name);
        self.inputs.push(v);
        v
    }

    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    /// Ids must come from this graph.
    pub fn value_type(&self, v: ValueId) -> &Type {
        &self.values[v.0 as usize].ty
    }

    pub fn set_type(&mut self, v: ValueId, ty: Type) {
        self.values[v.0 as usize].ty = ty;
    }

    pub fn debug_name(&self, v: ValueId) -> Option<&str> {
        self.values[v.0 as usize].debug_name.as_deref()
    }

    pub fn set_debug_name(&mut self, v: ValueId, name: &str) {
        self.values[v.0 as usize].debug_name = Some(name.to_string());
    }

    pub fn insert_node(&mut self, kind: NodeKind, span: Span, output_types: Vec<Type>) -> Vec<ValueId> {
        let outputs: Vec<ValueId> = output_types
            .into_iter()
            .map(|ty| self.fresh_value(ty))
            .collect();
        self.current().nodes.push(Node {
            span,
            kind,
            outputs: outputs.clone(),
        });
        outputs
    }

    pub fn insert_node1(&mut self, kind: NodeKind, span: Span, ty: Type) -> ValueId {
        let v = self.fresh_value(ty);
        self.current().nodes.push(Node {
            span,
            kind,
            outputs: vec![v],
        });
        v
    }

    pub fn insert_constant(&mut self, value: IValue, span: Span) -> ValueId {
        let ty = type_of(&value);
        self.insert_node1(NodeKind::Constant(value), span, ty)
    }

    pub fn push_block(&mut self) {
        self.open.push(Block::default());
    }

    /// Close the innermost block opened with `push_block`.
    pub fn pop_block(&mut self, outputs: Vec<ValueId>) -> Option<Block> {
        let mut block = self.open.pop()?;
        block.outputs = outputs;
        Some(block)
    }

    pub fn register_output(&mut self, v: ValueId) {
        self.root.outputs.push(v);
    }

    pub fn outputs(&self) -> &[ValueId] {
        &self.root.outputs
    }

    pub fn nodes(&self) -> &[Node] {
        &self.root.nodes
    }

    /// All nodes, including those nested in `If` blocks, in program order.
    pub fn all_nodes(&self) -> Vec<&Node> {
        fn walk<'g>(block: &'g Block, out: &mut Vec<&'g Node>) {
            for node in &block.nodes {
                out.push(node);
                if let NodeKind::If {
                    then_block,
                    else_block,
                    ..
                } = &node.kind
                {
                    walk(then_block, out);
                    walk(else_block, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }

    /// The constant a value was defined by, if any.
    pub fn constant_value(&self, v: ValueId) -> Option<&IValue> {
        self.all_nodes().into_iter().find_map(|n| match &n.kind {
            NodeKind::Constant(c) if n.outputs == [v] => Some(c),
            _ => None,
        })
    }
}

pub fn type_of(value: &IValue) -> Type {
    match value {
        IValue::None => Type::NoneType,
        IValue::Bool(_) => Type::Bool,
        IValue::Int(_) => Type::Int,
        IValue::Double(_) => Type::Float,
        IValue::Str(_) => Type::Str,
        IValue::Tensor(_) => Type::Tensor,
        IValue::Tuple(items) => Type::Tuple(items.iter().map(type_of).collect()),
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, values: &[ValueId]) -> fmt::Result {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{v}")?;
    }
    Ok(())
}

impl Graph {
    fn fmt_block(&self, f: &mut fmt::Formatter<'_>, block: &Block, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        for node in &block.nodes {
            write!(f, "{pad}")?;
            for (i, out) in node.outputs.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{out} : {}", self.value_type(*out))?;
            }
            if !node.outputs.is_empty() {
                f.write_str(" = ")?;
            }
            match &node.kind {
                NodeKind::Constant(c) => writeln!(f, "prim::Constant[value={c}]()")?,
                NodeKind::Builtin { symbol, inputs } => {
                    write!(f, "{symbol}(")?;
                    write_list(f, inputs)?;
                    writeln!(f, ")")?;
                }
                NodeKind::CallMethod { name, inputs } => {
                    write!(f, "prim::CallMethod[name=\"{name}\"](")?;
                    write_list(f, inputs)?;
                    writeln!(f, ")")?;
                }
                NodeKind::CreateObject => writeln!(f, "prim::CreateObject()")?,
                NodeKind::GetAttr { name, input } => {
                    writeln!(f, "prim::GetAttr[name=\"{name}\"]({input})")?
                }
                NodeKind::Fork { target, inputs } => {
                    write!(f, "prim::fork[target=\"{target}\"](")?;
                    write_list(f, inputs)?;
                    writeln!(f, ")")?;
                }
                NodeKind::Annotate { input } => writeln!(f, "prim::annotate({input})")?,
                NodeKind::TupleConstruct { inputs } => {
                    f.write_str("prim::TupleConstruct(")?;
                    write_list(f, inputs)?;
                    writeln!(f, ")")?;
                }
                NodeKind::TupleIndex { input, index } => {
                    writeln!(f, "prim::TupleIndex[index={index}]({input})")?
                }
                NodeKind::If {
                    cond,
                    then_block,
                    else_block,
                } => {
                    writeln!(f, "prim::If({cond})")?;
                    writeln!(f, "{pad}  block0():")?;
                    self.fmt_block(f, then_block, depth + 2)?;
                    writeln!(f, "{pad}  block1():")?;
                    self.fmt_block(f, else_block, depth + 2)?;
                }
            }
        }
        if depth > 1 || !block.outputs.is_empty() {
            write!(f, "{pad}-> (")?;
            write_list(f, &block.outputs)?;
            writeln!(f, ")")?;
        }
        Ok(())
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("graph(")?;
        for (i, v) in self.inputs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v} : {}", self.value_type(*v))?;
        }
        writeln!(f, "):")?;
        self.fmt_block(f, &self.root, 1)
    }
}
