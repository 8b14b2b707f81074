use std::sync::Arc;

use jitload_import::{import_libs, import_methods, import_methods_with_config, ImportConfig};
use jitload_ir::{ClassRegistry, IValue, Module, NodeKind, QualifiedName, Tensor, Type};
use miette::miette;

fn qualified(name: &str) -> QualifiedName {
    QualifiedName::from_dotted(name).unwrap()
}

fn no_imports(_: &str) -> miette::Result<()> {
    Ok(())
}

const NET: &str = "\
op_version_set = 3
import __torch__.helpers
import __torch__.a
import __torch__.helpers

def forward(self, x):
    return self.helper(x)

def helper(self, x):
    y = torch.relu(x)
    return y + CONSTANTS.c1
";

#[test]
fn methods_are_compiled_onto_the_module() {
    let registry = ClassRegistry::new();
    let module = Module::new(qualified("__torch__.Net"), &registry).unwrap();
    let constants = vec![Tensor::scalar(1.0), Tensor::from_vec(vec![2.0, 3.0])];
    let snapshot = constants.clone();
    let mut seen = Vec::new();

    import_methods(&module, NET, &constants, &registry, |path| {
        seen.push(path.to_string());
        Ok(())
    })
    .unwrap();

    assert_eq!(seen, ["__torch__.a", "__torch__.helpers"]);
    let forward = module.find_method("forward").unwrap();
    assert_eq!(forward.name().to_string(), "__torch__.Net.forward");
    assert!(forward.graph().nodes().iter().any(
        |n| matches!(&n.kind, NodeKind::CallMethod { name, .. } if name == "helper")
    ));
    let helper = module.find_method("helper").unwrap();
    assert!(helper.graph().all_nodes().into_iter().any(|n| {
        matches!(&n.kind, NodeKind::Constant(IValue::Tensor(t)) if *t == constants[1])
    }));
    assert_eq!(constants, snapshot);
}

#[test]
fn callback_failure_aborts_before_definitions() {
    let registry = ClassRegistry::new();
    let module = Module::new(qualified("__torch__.Net"), &registry).unwrap();
    let src = "op_version_set = 1\nimport c\nimport a\nimport b\n\ndef f(self, x):\n    return x\n";
    let mut seen = Vec::new();
    let err = import_methods(&module, src, &[], &registry, |path| {
        seen.push(path.to_string());
        if path == "b" {
            return Err(miette!("cannot load {path}"));
        }
        Ok(())
    })
    .unwrap_err();
    assert_eq!(err.to_string(), "cannot load b");
    assert_eq!(seen, ["a", "b"]);
    assert!(module.find_method("f").is_none());
}

#[test]
fn compile_errors_carry_source_and_leave_module_untouched() {
    let registry = ClassRegistry::new();
    let module = Module::new(qualified("__torch__.Net"), &registry).unwrap();
    let src = "op_version_set = 1\n\ndef f(self, x):\n    return x\n\ndef g(self, x):\n    return nope\n";
    let err = import_methods(&module, src, &[], &registry, no_imports).unwrap_err();
    assert_eq!(err.to_string(), "compile error: undefined value nope");
    assert!(err.source_code().is_some());
    assert!(module.find_method("f").is_none());
}

#[test]
fn malformed_headers_are_parse_errors() {
    let registry = ClassRegistry::new();
    let module = Module::new(qualified("__torch__.Net"), &registry).unwrap();
    let err = import_methods(&module, "op_version_set = 1.5\n", &[], &registry, no_imports).unwrap_err();
    assert_eq!(
        err.to_string(),
        "parse error: expected an integral version but found 1.5"
    );
    let err = import_methods(&module, "version = 1\n", &[], &registry, no_imports).unwrap_err();
    assert!(err.to_string().contains("expected an assignment to op_version_set"));
    let err = import_methods(&module, "op_version_set = 1\nimport\n", &[], &registry, no_imports).unwrap_err();
    assert!(err.to_string().contains("empty import statement"));
}

#[test]
fn configured_header_and_version_bound() {
    let registry = ClassRegistry::new();
    let module = Module::new(qualified("__torch__.Net"), &registry).unwrap();
    let config = ImportConfig::from_toml_str("version_marker = \"format\"\nmax_supported_version = 2\n").unwrap();
    let err = import_methods_with_config(&config, &module, "format = 3\n", &[], &registry, no_imports)
        .unwrap_err();
    assert!(err.to_string().contains("unsupported operator set version 3"));
    import_methods_with_config(
        &config,
        &module,
        "format = 2\n\ndef f(self, x):\n    return ops.quantized.linear(x, x, x, x)\n",
        &[],
        &registry,
        no_imports,
    )
    .unwrap();
    assert!(module.find_method("f").is_some());
}

const LIB: &str = "\
op_version_set = 2
import x
class Foo:
    weight : Tensor

    def forward(self, x):
        return torch.matmul(x, self.weight)

import y
class Bar:
    def __init__(self, scale: float):
        pass

    def make(self) -> __torch__.lib.Foo:
        return __torch__.lib.Foo()
";

#[test]
fn each_class_gets_its_own_compilation_unit() {
    let registry = ClassRegistry::new();
    let mut seen = Vec::new();
    let classes = import_libs(&qualified("__torch__.lib"), LIB, &[], &registry, |path| {
        seen.push(path.to_string());
        Ok(())
    })
    .unwrap();

    assert_eq!(seen, ["x", "y"]);
    let names: Vec<String> = classes.iter().map(|c| c.name().to_string()).collect();
    assert_eq!(names, ["__torch__.lib.Foo", "__torch__.lib.Bar"]);
    assert!(!Arc::ptr_eq(
        classes[0].compilation_unit(),
        classes[1].compilation_unit()
    ));
    assert_eq!(classes[0].attribute("weight"), Some(Type::Tensor));
    assert!(classes[0].method("forward").is_some());
    let make = classes[1].method("make").unwrap();
    assert_eq!(make.schema().ret, Type::Class(Arc::clone(&classes[0])));
    assert!(registry.contains(&qualified("__torch__.lib.Foo")));
    assert!(registry.contains(&qualified("__torch__.lib.Bar")));
}

#[test]
fn failed_library_import_unregisters_its_classes() {
    let registry = ClassRegistry::new();
    let src = "op_version_set = 1\nclass A:\n    def f(self, x):\n        return x\nclass B:\n    def g(self, x):\n        return missing\n";
    let err = import_libs(&qualified("__torch__.lib"), src, &[], &registry, no_imports).unwrap_err();
    assert_eq!(err.to_string(), "compile error: undefined value missing");
    assert!(registry.is_empty());
}

#[test]
fn library_classes_must_be_new() {
    let registry = ClassRegistry::new();
    let src = "op_version_set = 1\nclass A:\n    pass\nclass A:\n    pass\n";
    let err = import_libs(&qualified("__torch__.lib"), src, &[], &registry, no_imports).unwrap_err();
    assert_eq!(err.to_string(), "compile error: class __torch__.lib.A is already defined");
    assert!(registry.is_empty());

    let existing = Module::new(qualified("__torch__.lib.B"), &registry).unwrap();
    let src = "op_version_set = 1\nclass C:\n    pass\nclass B:\n    pass\n";
    let err = import_libs(&qualified("__torch__.lib"), src, &[], &registry, no_imports).unwrap_err();
    assert!(err.to_string().contains("class __torch__.lib.B is already defined"));
    assert!(!registry.contains(&qualified("__torch__.lib.C")));
    assert!(registry.get(existing.class_type().name()).is_some());
}

#[test]
fn parse_failures_register_nothing() {
    let registry = ClassRegistry::new();
    let src = "op_version_set = 1\nclass A:\n    pass\ndef stray(self):\n    pass\n";
    let err = import_libs(&qualified("__torch__.lib"), src, &[], &registry, no_imports).unwrap_err();
    assert!(err.to_string().starts_with("parse error: expected `class`"), "{err}");
    assert!(registry.is_empty());
}

#[test]
fn classes_may_use_classes_defined_later_in_the_file() {
    let registry = ClassRegistry::new();
    let src = "\
op_version_set = 1
class A:
    def make(self, x):
        b = __torch__.lib.B(2.0)
        return b.get(x)
class B:
    def __init__(self, scale: float):
        pass

    def get(self, x):
        return x
";
    let classes = import_libs(&qualified("__torch__.lib"), src, &[], &registry, no_imports).unwrap();
    let make = classes[0].method("make").unwrap();
    let calls: Vec<&str> = make
        .graph()
        .nodes()
        .iter()
        .filter_map(|n| match &n.kind {
            NodeKind::CallMethod { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(calls, ["__init__", "get"]);
    assert_eq!(make.schema().ret, Type::Tensor);
    assert!(classes[1].method("__init__").is_some());
}
