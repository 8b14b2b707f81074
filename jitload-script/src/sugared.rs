#![forbid(unsafe_code)]

//! Values that name something other than a plain graph value.
//!
//! Resolving an identifier in serialized source can land on a builtin
//! operator namespace, the constant table, a node of the class namespace,
//! and so on. Each of those answers attribute access and calls in its own
//! way; the compiler only turns them into graph values when it must.

use std::num::IntErrorKind;
use std::sync::Arc;

use jitload_ast::Span;
use jitload_ir::{ClassRegistry, ClassType, Graph, IValue, QualifiedName, Symbol, Tensor, ValueId};

use crate::error::CompileError;

/// Handle to a versioned builtin operator namespace.
///
/// `namespace == None` is the dispatch root (`ops`), whose attributes are
/// namespaces themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuiltinModule {
    pub namespace: Option<String>,
    pub version: u64,
}

impl BuiltinModule {
    pub fn root(version: u64) -> Self {
        Self {
            namespace: None,
            version,
        }
    }

    pub fn scoped(namespace: impl Into<String>, version: u64) -> Self {
        Self {
            namespace: Some(namespace.into()),
            version,
        }
    }
}

#[derive(Clone, Debug)]
pub enum SugaredValue<'a> {
    BuiltinModule(BuiltinModule),
    /// Checked against the operator table only when called.
    BuiltinFunction {
        symbol: Symbol,
        version: u64,
    },
    Constant(IValue),
    ConstantTable(&'a [Tensor]),
    ClassNamespace {
        path: QualifiedName,
        registry: &'a ClassRegistry,
    },
    Class(Arc<ClassType>),
    Fork,
    Annotate,
    /// `receiver.name` where `receiver` is an object of `class`.
    Method {
        receiver: ValueId,
        class: Arc<ClassType>,
        name: String,
    },
    Simple(ValueId),
}

impl<'a> SugaredValue<'a> {
    /// Short description used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            SugaredValue::BuiltinModule(BuiltinModule { namespace: None, .. }) => {
                "builtin operator root"
            }
            SugaredValue::BuiltinModule(_) => "builtin module",
            SugaredValue::BuiltinFunction { .. } => "builtin function",
            SugaredValue::Constant(_) => "constant",
            SugaredValue::ConstantTable(_) => "constant table",
            SugaredValue::ClassNamespace { .. } => "namespace",
            SugaredValue::Class(_) => "class",
            SugaredValue::Fork => "fork",
            SugaredValue::Annotate => "annotate",
            SugaredValue::Method { .. } => "method",
            SugaredValue::Simple(_) => "value",
        }
    }

    /// Attribute access that needs no knowledge of the function being
    /// compiled. Attributes of graph values are handled by the compiler.
    pub fn attr(
        &self,
        span: Span,
        graph: &mut Graph,
        field: &str,
    ) -> Result<SugaredValue<'a>, CompileError> {
        match self {
            SugaredValue::BuiltinModule(BuiltinModule {
                namespace: None,
                version,
            }) => Ok(SugaredValue::BuiltinModule(BuiltinModule::scoped(
                field, *version,
            ))),
            SugaredValue::BuiltinModule(BuiltinModule {
                namespace: Some(ns),
                version,
            }) => Ok(SugaredValue::BuiltinFunction {
                symbol: Symbol::new(ns.as_str(), field),
                version: *version,
            }),
            SugaredValue::ConstantTable(table) => constant_table_attr(table, span, graph, field),
            SugaredValue::ClassNamespace { path, registry } => {
                Ok(class_namespace_attr(path, registry, field))
            }
            other => Err(CompileError::new(
                format!("attribute lookup is not defined on a {}", other.kind()),
                span,
            )),
        }
    }

    /// Materialize as a graph value.
    pub fn as_value(&self, span: Span, graph: &mut Graph) -> Result<ValueId, CompileError> {
        match self {
            SugaredValue::Simple(v) => Ok(*v),
            SugaredValue::Constant(c) => Ok(graph.insert_constant(c.clone(), span)),
            other => Err(CompileError::new(
                format!("{} cannot be used as a value", other.kind()),
                span,
            )),
        }
    }
}

/// Parse `cN`: one ASCII letter, then a signed decimal offset. Offsets
/// beyond the range of `i64` saturate.
fn parse_constant_specifier(field: &str) -> Option<i64> {
    let mut chars = field.chars();
    let prefix = chars.next()?;
    if !prefix.is_ascii_alphabetic() {
        return None;
    }
    let digits = chars.as_str();
    if digits.is_empty() {
        return None;
    }
    match digits.parse::<i64>() {
        Ok(offset) => Some(offset),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Some(i64::MAX),
            IntErrorKind::NegOverflow => Some(i64::MIN),
            _ => None,
        },
    }
}

fn constant_table_attr<'a>(
    table: &'a [Tensor],
    span: Span,
    graph: &mut Graph,
    field: &str,
) -> Result<SugaredValue<'a>, CompileError> {
    let offset = parse_constant_specifier(field)
        .ok_or_else(|| CompileError::new(format!("invalid constant specifier: {field}"), span))?;
    let tensor = usize::try_from(offset)
        .ok()
        .and_then(|i| table.get(i))
        .ok_or_else(|| {
            CompileError::new(
                format!(
                    "constant index {offset} is out of bounds (constant table has {} entries)",
                    table.len()
                ),
                span,
            )
        })?;
    let v = graph.insert_constant(IValue::Tensor(tensor.clone()), span);
    Ok(SugaredValue::Simple(v))
}

fn class_namespace_attr<'a>(
    path: &QualifiedName,
    registry: &'a ClassRegistry,
    field: &str,
) -> SugaredValue<'a> {
    let path = path.child(field);
    match registry.get(&path) {
        Some(class) => SugaredValue::Class(class),
        None => SugaredValue::ClassNamespace { path, registry },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitload_ast::span_between;
    use jitload_ir::CompilationUnit;

    fn at() -> Span {
        span_between(0, 0)
    }

    #[test]
    fn constant_specifiers() {
        assert_eq!(parse_constant_specifier("c0"), Some(0));
        assert_eq!(parse_constant_specifier("c17"), Some(17));
        assert_eq!(parse_constant_specifier("k-1"), Some(-1));
        assert_eq!(parse_constant_specifier("c"), None);
        assert_eq!(parse_constant_specifier("cX"), None);
        assert_eq!(parse_constant_specifier("c1x"), None);
        assert_eq!(parse_constant_specifier("_1"), None);
        assert_eq!(parse_constant_specifier(""), None);
    }

    #[test]
    fn negative_offsets_are_out_of_bounds() {
        let table = [Tensor::scalar(1.0)];
        let mut g = Graph::new();
        let err = SugaredValue::ConstantTable(&table)
            .attr(at(), &mut g, "c-1")
            .unwrap_err();
        assert_eq!(
            err.message,
            "constant index -1 is out of bounds (constant table has 1 entries)"
        );
    }

    #[test]
    fn oversized_offsets_are_out_of_bounds() {
        assert_eq!(parse_constant_specifier("c99999999999999999999"), Some(i64::MAX));
        assert_eq!(parse_constant_specifier("c-99999999999999999999"), Some(i64::MIN));
        let table = [Tensor::scalar(1.0), Tensor::scalar(2.0)];
        let mut g = Graph::new();
        let err = SugaredValue::ConstantTable(&table)
            .attr(at(), &mut g, "c99999999999999999999")
            .unwrap_err();
        assert_eq!(
            err.message,
            format!("constant index {} is out of bounds (constant table has 2 entries)", i64::MAX)
        );
    }

    #[test]
    fn ops_root_scopes_any_namespace() {
        let mut g = Graph::new();
        for version in [0, 1, 7, u64::MAX] {
            let scoped = SugaredValue::BuiltinModule(BuiltinModule::root(version))
                .attr(at(), &mut g, "foo")
                .unwrap();
            match scoped {
                SugaredValue::BuiltinModule(BuiltinModule { namespace, version: v }) => {
                    assert_eq!(namespace.as_deref(), Some("foo"));
                    assert_eq!(v, version);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn namespaced_builtins_keep_their_version() {
        let mut g = Graph::new();
        let f = SugaredValue::BuiltinModule(BuiltinModule::scoped("aten", 3))
            .attr(at(), &mut g, "relu")
            .unwrap();
        match f {
            SugaredValue::BuiltinFunction { symbol, version } => {
                assert_eq!(symbol.to_string(), "aten::relu");
                assert_eq!(version, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn class_namespace_stops_at_registered_class() {
        let registry = ClassRegistry::new();
        let name = QualifiedName::from_dotted("__torch__.m.Net").unwrap();
        registry
            .create(name.clone(), Arc::new(CompilationUnit::new()))
            .unwrap();
        let mut g = Graph::new();
        let root = SugaredValue::ClassNamespace {
            path: QualifiedName::root("__torch__"),
            registry: &registry,
        };
        let m = root.attr(at(), &mut g, "m").unwrap();
        assert!(matches!(m, SugaredValue::ClassNamespace { .. }));
        match m.attr(at(), &mut g, "Net").unwrap() {
            SugaredValue::Class(c) => assert_eq!(c.name(), &name),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn only_simple_and_constant_values_materialize() {
        let mut g = Graph::new();
        let v = SugaredValue::Constant(IValue::Double(f64::INFINITY))
            .as_value(at(), &mut g)
            .unwrap();
        assert_eq!(g.constant_value(v), Some(&IValue::Double(f64::INFINITY)));
        let err = SugaredValue::Fork.as_value(at(), &mut g).unwrap_err();
        assert_eq!(err.message, "fork cannot be used as a value");
        assert!(SugaredValue::Fork.attr(at(), &mut g, "x").is_err());
    }
}
