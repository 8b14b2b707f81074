use std::sync::Arc;

use jitload_ir::{
    ClassRegistry, ClassType, CompilationUnit, Function, Graph, IValue, NodeKind, QualifiedName,
    Tensor, Type, ValueId,
};
use jitload_parse::parse_functions;
use jitload_script::{define, CompileError, ResolverRef, SourceResolver, SugaredValue};

fn new_class(registry: &ClassRegistry, name: &str) -> Arc<ClassType> {
    registry
        .create(
            QualifiedName::from_dotted(name).unwrap(),
            Arc::new(CompilationUnit::new()),
        )
        .unwrap()
}

fn define_src<'a>(
    class: &Arc<ClassType>,
    src: &str,
    registry: &'a ClassRegistry,
    constants: &'a [Tensor],
    version: u64,
) -> Result<Vec<Arc<Function>>, CompileError> {
    let defs = parse_functions(src, true).unwrap();
    let resolver: ResolverRef<'a> = Arc::new(SourceResolver::new(version, constants, registry));
    let resolvers = vec![resolver; defs.len()];
    let receiver = Arc::clone(class);
    let binder = move |g: &mut Graph, v: ValueId| {
        g.set_type(v, Type::Class(Arc::clone(&receiver)));
        SugaredValue::Simple(v)
    };
    define(class.compilation_unit(), class, &defs, &resolvers, &binder)
}

fn has_node(f: &Function, pred: impl Fn(&NodeKind) -> bool) -> bool {
    f.graph().all_nodes().into_iter().any(|n| pred(&n.kind))
}

#[test]
fn methods_may_reference_each_other_in_any_order() {
    let registry = ClassRegistry::new();
    let class = new_class(&registry, "__torch__.M");
    let src = "def a(self, x):\n    return self.b(x)\n\ndef b(self, x):\n    return self.a(x)\n";
    let functions = define_src(&class, src, &registry, &[], 3).unwrap();
    assert_eq!(functions.len(), 2);
    let a = class.method("a").unwrap();
    assert!(has_node(&a, |k| matches!(k, NodeKind::CallMethod { name, .. } if name == "b")));
    assert_eq!(a.schema().ret, Type::Tensor);
    assert!(class.method("b").is_some());
}

#[test]
fn failed_batch_registers_nothing() {
    let registry = ClassRegistry::new();
    let class = new_class(&registry, "__torch__.M");
    let src = "def ok(self, x):\n    return x\n\ndef bad(self, x):\n    return y\n";
    let err = define_src(&class, src, &registry, &[], 3).unwrap_err();
    assert_eq!(err.message, "undefined value y");
    assert!(class.methods().is_empty());
}

#[test]
fn redefining_a_method_is_rejected() {
    let registry = ClassRegistry::new();
    let class = new_class(&registry, "__torch__.M");
    define_src(&class, "def f(self, x):\n    return x\n", &registry, &[], 1).unwrap();
    let err = define_src(&class, "def f(self, x):\n    return x\n", &registry, &[], 1).unwrap_err();
    assert!(err.message.contains("already defined"), "{}", err.message);
    let err = define_src(
        &class,
        "def g(self, x):\n    return x\n\ndef g(self, x):\n    return x\n",
        &registry,
        &[],
        1,
    )
    .unwrap_err();
    assert!(err.message.contains("more than once"), "{}", err.message);
}

#[test]
fn constant_table_lookups() {
    let registry = ClassRegistry::new();
    let class = new_class(&registry, "__torch__.M");
    let constants: Vec<Tensor> = (0..5).map(|i| Tensor::scalar(i as f64)).collect();
    let snapshot = constants.clone();

    define_src(&class, "def f(self):\n    return CONSTANTS.c3\n", &registry, &constants, 1).unwrap();
    let f = class.method("f").unwrap();
    let out = f.graph().outputs()[0];
    assert_eq!(
        f.graph().constant_value(out),
        Some(&IValue::Tensor(constants[3].clone()))
    );

    let err = define_src(&class, "def g(self):\n    return CONSTANTS.c5\n", &registry, &constants, 1)
        .unwrap_err();
    assert_eq!(
        err.message,
        "constant index 5 is out of bounds (constant table has 5 entries)"
    );
    let err = define_src(&class, "def h(self):\n    return CONSTANTS.cX\n", &registry, &constants, 1)
        .unwrap_err();
    assert_eq!(err.message, "invalid constant specifier: cX");
    assert_eq!(constants, snapshot);
}

#[test]
fn builtins_are_checked_against_the_operator_set_version() {
    let registry = ClassRegistry::new();
    let class = new_class(&registry, "__torch__.M");
    let src = "def q(self, x):\n    return ops.quantized.add(x, x, x, x)\n";
    let err = define_src(&class, src, &registry, &[], 1).unwrap_err();
    assert_eq!(
        err.message,
        "builtin operator quantized::add is not available in operator set version 1"
    );
    define_src(&class, src, &registry, &[], 2).unwrap();

    let err = define_src(&class, "def d(self, x):\n    return torch.floordiv(x, x)\n", &registry, &[], 4)
        .unwrap_err();
    assert!(err.message.contains("not available"), "{}", err.message);

    let err = define_src(&class, "def u(self, x):\n    return ops.nosuch.op(x)\n", &registry, &[], 4)
        .unwrap_err();
    assert_eq!(err.message, "unknown builtin operator nosuch::op");

    let err = define_src(&class, "def r(self, x):\n    return torch.relu(x, x)\n", &registry, &[], 4)
        .unwrap_err();
    assert_eq!(err.message, "aten::relu expects 1 arguments but 2 were given");
}

#[test]
fn class_namespace_reaches_registered_classes() {
    let registry = ClassRegistry::new();
    let class = new_class(&registry, "__torch__.M");
    let other = new_class(&registry, "__torch__.foo.bar.MyClass");
    let src = "def make(self) -> __torch__.foo.bar.MyClass:\n    return __torch__.foo.bar.MyClass()\n";
    define_src(&class, src, &registry, &[], 1).unwrap();
    let make = class.method("make").unwrap();
    assert_eq!(make.schema().ret, Type::Class(Arc::clone(&other)));
    assert!(has_node(&make, |k| matches!(k, NodeKind::CreateObject)));

    let err = define_src(&class, "def bad(self):\n    return __torch__.foo.bar()\n", &registry, &[], 1)
        .unwrap_err();
    assert_eq!(err.message, "namespace is not callable");
}

#[test]
fn constructors_call_init() {
    let registry = ClassRegistry::new();
    let point = new_class(&registry, "__torch__.Point");
    define_src(&point, "def __init__(self, x: float):\n    pass\n", &registry, &[], 1).unwrap();
    let class = new_class(&registry, "__torch__.M");
    define_src(&class, "def make(self):\n    p = __torch__.Point(1.5)\n", &registry, &[], 1).unwrap();
    let make = class.method("make").unwrap();
    assert!(has_node(&make, |k| matches!(k, NodeKind::CallMethod { name, .. } if name == "__init__")));

    let err = define_src(&class, "def bad(self):\n    p = __torch__.Point()\n", &registry, &[], 1)
        .unwrap_err();
    assert_eq!(err.message, "__init__ is missing argument `x`");
}

#[test]
fn branches_merge_reassigned_variables() {
    let registry = ClassRegistry::new();
    let class = new_class(&registry, "__torch__.M");
    let src = "def f(self, x, flag: bool):\n    if flag:\n        y = x + 1\n    else:\n        y = x - 1\n    return y\n";
    define_src(&class, src, &registry, &[], 1).unwrap();
    let f = class.method("f").unwrap();
    let node = f
        .graph()
        .nodes()
        .iter()
        .find(|n| matches!(n.kind, NodeKind::If { .. }))
        .unwrap();
    assert_eq!(node.outputs.len(), 1);
    assert_eq!(f.graph().outputs(), node.outputs.as_slice());
    assert_eq!(f.graph().value_type(node.outputs[0]), &Type::Tensor);
}

#[test]
fn variables_bound_in_one_branch_do_not_escape() {
    let registry = ClassRegistry::new();
    let class = new_class(&registry, "__torch__.M");
    let src = "def f(self, x, flag: bool):\n    if flag:\n        y = x\n    return y\n";
    let err = define_src(&class, src, &registry, &[], 1).unwrap_err();
    assert_eq!(err.message, "undefined value y");
}

#[test]
fn return_must_come_last() {
    let registry = ClassRegistry::new();
    let class = new_class(&registry, "__torch__.M");
    let src = "def f(self, x):\n    return x\n    x = x\n";
    let err = define_src(&class, src, &registry, &[], 1).unwrap_err();
    assert!(err.message.starts_with("return is only supported"), "{}", err.message);
}

#[test]
fn attributes_fork_and_annotate() {
    let registry = ClassRegistry::new();
    let class = new_class(&registry, "__torch__.M");
    class.add_attribute("weight", Type::Tensor).unwrap();
    let src = "\
def forward(self, x):
    fut = fork(self.project, x, scale=2.0)
    y = torch.wait(fut)
    z = annotate(Optional[Tensor], None)
    return y

def project(self, x, scale: float):
    return torch.matmul(x, self.weight)
";
    define_src(&class, src, &registry, &[], 3).unwrap();
    let forward = class.method("forward").unwrap();
    assert!(has_node(&forward, |k| matches!(k, NodeKind::Fork { target, .. } if target == "project")));
    assert!(has_node(&forward, |k| matches!(k, NodeKind::Annotate { .. })));
    let project = class.method("project").unwrap();
    assert!(has_node(&project, |k| matches!(k, NodeKind::GetAttr { name, .. } if name == "weight")));

    let err = define_src(&class, "def g(self, x):\n    return self.missing\n", &registry, &[], 3)
        .unwrap_err();
    assert_eq!(err.message, "__torch__.M has no attribute or method `missing`");
}

#[test]
fn declared_return_types_are_enforced() {
    let registry = ClassRegistry::new();
    let class = new_class(&registry, "__torch__.M");
    let err = define_src(&class, "def f(self, n: int) -> Tensor:\n    return n\n", &registry, &[], 1)
        .unwrap_err();
    assert_eq!(err.message, "`f` returns int but is declared to return Tensor");
    define_src(&class, "def g(self, n: int) -> int:\n    return n\n", &registry, &[], 1).unwrap();
    assert_eq!(class.method("g").unwrap().schema().ret, Type::Int);
}
