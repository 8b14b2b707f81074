#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::graph::Graph;
use crate::types::{ClassRegistry, ClassType, QualifiedName, RegistryError, Type};
use crate::{read_lock, write_lock};

#[derive(Clone, Debug, PartialEq)]
pub struct Argument {
    pub name: String,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionSchema {
    pub name: String,
    pub args: Vec<Argument>,
    pub ret: Type,
}

impl fmt::Display for FunctionSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} : {}", a.name, a.ty)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// A compiled function or method.
#[derive(Debug)]
pub struct Function {
    name: QualifiedName,
    schema: FunctionSchema,
    graph: Graph,
}

impl Function {
    pub fn new(name: QualifiedName, schema: FunctionSchema, graph: Graph) -> Self {
        Self {
            name,
            schema,
            graph,
        }
    }

    pub fn name(&self) -> &QualifiedName {
        &self.name
    }

    pub fn schema(&self) -> &FunctionSchema {
        &self.schema
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

/// Owner of compiled functions. Each class type points at exactly one unit;
/// several classes may share a unit.
#[derive(Debug, Default)]
pub struct CompilationUnit {
    functions: RwLock<BTreeMap<QualifiedName, Arc<Function>>>,
}

impl CompilationUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_function(&self, function: Function) -> Result<Arc<Function>, RegistryError> {
        let mut functions = write_lock(&self.functions);
        if functions.contains_key(function.name()) {
            return Err(RegistryError::DuplicateFunction(function.name().clone()));
        }
        let function = Arc::new(function);
        functions.insert(function.name().clone(), Arc::clone(&function));
        Ok(function)
    }

    pub fn find_function(&self, name: &QualifiedName) -> Option<Arc<Function>> {
        read_lock(&self.functions).get(name).cloned()
    }

    /// All functions, ordered by qualified name.
    pub fn functions(&self) -> Vec<Arc<Function>> {
        read_lock(&self.functions).values().cloned().collect()
    }
}

/// A live object whose methods are filled in by importing source text.
#[derive(Debug, Clone)]
pub struct Module {
    class_type: Arc<ClassType>,
}

impl Module {
    /// Create the module's class type (with a fresh compilation unit) and
    /// register it under `name`.
    pub fn new(name: QualifiedName, registry: &ClassRegistry) -> Result<Self, RegistryError> {
        let unit = Arc::new(CompilationUnit::new());
        let class_type = registry.create(name, unit)?;
        Ok(Self { class_type })
    }

    pub fn from_class(class_type: Arc<ClassType>) -> Self {
        Self { class_type }
    }

    pub fn class_type(&self) -> &Arc<ClassType> {
        &self.class_type
    }

    pub fn find_method(&self, name: &str) -> Option<Arc<Function>> {
        self.class_type.method(name)
    }
}
