#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::unit::{CompilationUnit, Function};
use crate::{read_lock, write_lock};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QualifiedNameError {
    #[error("qualified name must not be empty")]
    Empty,
    #[error("qualified name `{0}` contains an empty segment")]
    EmptySegment(String),
}

/// Dotted path such as `__torch__.foo.Bar`. Always has at least one segment
/// and no segment is empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    atoms: Vec<String>,
}

impl QualifiedName {
    pub fn from_dotted(dotted: &str) -> Result<Self, QualifiedNameError> {
        if dotted.is_empty() {
            return Err(QualifiedNameError::Empty);
        }
        let atoms: Vec<String> = dotted.split('.').map(str::to_string).collect();
        if atoms.iter().any(String::is_empty) {
            return Err(QualifiedNameError::EmptySegment(dotted.to_string()));
        }
        Ok(Self { atoms })
    }

    /// Single-segment name. `name` must be non-empty and dot-free.
    pub fn root(name: &str) -> Self {
        debug_assert!(!name.is_empty() && !name.contains('.'));
        Self {
            atoms: vec![name.to_string()],
        }
    }

    /// `prefix.name`. `name` must be a single non-empty segment.
    pub fn child(&self, name: &str) -> Self {
        debug_assert!(!name.is_empty() && !name.contains('.'));
        let mut atoms = self.atoms.clone();
        atoms.push(name.to_string());
        Self { atoms }
    }

    pub fn atoms(&self) -> &[String] {
        &self.atoms
    }

    /// Last segment.
    pub fn name(&self) -> &str {
        self.atoms.last().map_or("", String::as_str)
    }

    pub fn prefix(&self) -> Option<Self> {
        if self.atoms.len() < 2 {
            return None;
        }
        Some(Self {
            atoms: self.atoms[..self.atoms.len() - 1].to_vec(),
        })
    }

    pub fn qualified_name(&self) -> String {
        self.atoms.join(".")
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Tensor,
    Int,
    Float,
    Bool,
    Str,
    NoneType,
    Any,
    List(Box<Type>),
    Optional(Box<Type>),
    Tuple(Vec<Type>),
    Future(Box<Type>),
    Class(Arc<ClassType>),
}

impl Type {
    pub fn as_class(&self) -> Option<&Arc<ClassType>> {
        match self {
            Type::Class(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor => f.write_str("Tensor"),
            Type::Int => f.write_str("int"),
            Type::Float => f.write_str("float"),
            Type::Bool => f.write_str("bool"),
            Type::Str => f.write_str("str"),
            Type::NoneType => f.write_str("NoneType"),
            Type::Any => f.write_str("Any"),
            Type::List(t) => write!(f, "List[{t}]"),
            Type::Optional(t) => write!(f, "Optional[{t}]"),
            Type::Future(t) => write!(f, "Future[{t}]"),
            Type::Tuple(items) => {
                f.write_str("Tuple[")?;
                for (i, t) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{t}")?;
                }
                f.write_str("]")
            }
            Type::Class(c) => write!(f, "{}", c.name()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassAttribute {
    pub name: String,
    pub ty: Type,
}

/// A user-defined class. Its methods live in the owning compilation unit
/// under `<class name>.<method>`.
pub struct ClassType {
    name: QualifiedName,
    unit: Arc<CompilationUnit>,
    attributes: RwLock<Vec<ClassAttribute>>,
}

impl ClassType {
    /// Create an unregistered class type. Most callers want
    /// `ClassRegistry::create` instead.
    pub fn new(name: QualifiedName, unit: Arc<CompilationUnit>) -> Arc<Self> {
        Arc::new(Self {
            name,
            unit,
            attributes: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &QualifiedName {
        &self.name
    }

    pub fn compilation_unit(&self) -> &Arc<CompilationUnit> {
        &self.unit
    }

    pub fn add_attribute(&self, name: &str, ty: Type) -> Result<(), RegistryError> {
        let mut attrs = write_lock(&self.attributes);
        if attrs.iter().any(|a| a.name == name) {
            return Err(RegistryError::DuplicateAttribute {
                class: self.name.clone(),
                attribute: name.to_string(),
            });
        }
        attrs.push(ClassAttribute {
            name: name.to_string(),
            ty,
        });
        Ok(())
    }

    pub fn attribute(&self, name: &str) -> Option<Type> {
        read_lock(&self.attributes)
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.ty.clone())
    }

    pub fn attributes(&self) -> Vec<ClassAttribute> {
        read_lock(&self.attributes).clone()
    }

    pub fn method(&self, name: &str) -> Option<Arc<Function>> {
        self.unit.find_function(&self.name.child(name))
    }

    pub fn methods(&self) -> Vec<Arc<Function>> {
        self.unit
            .functions()
            .into_iter()
            .filter(|f| f.name().prefix().as_ref() == Some(&self.name))
            .collect()
    }
}

impl PartialEq for ClassType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for ClassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassType")
            .field("name", &self.name.qualified_name())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("class {0} is already defined")]
    DuplicateClass(QualifiedName),
    #[error("function {0} is already defined")]
    DuplicateFunction(QualifiedName),
    #[error("class {class} already has an attribute named `{attribute}`")]
    DuplicateAttribute {
        class: QualifiedName,
        attribute: String,
    },
}

/// Class types by qualified name.
///
/// Shared between every resolver built over it. Registering the same name
/// twice is an error, not a replacement.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: RwLock<HashMap<QualifiedName, Arc<ClassType>>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &QualifiedName) -> Option<Arc<ClassType>> {
        read_lock(&self.classes).get(name).cloned()
    }

    pub fn contains(&self, name: &QualifiedName) -> bool {
        read_lock(&self.classes).contains_key(name)
    }

    pub fn create(
        &self,
        name: QualifiedName,
        unit: Arc<CompilationUnit>,
    ) -> Result<Arc<ClassType>, RegistryError> {
        let mut classes = write_lock(&self.classes);
        if classes.contains_key(&name) {
            return Err(RegistryError::DuplicateClass(name));
        }
        let class = ClassType::new(name.clone(), unit);
        classes.insert(name, Arc::clone(&class));
        Ok(class)
    }

    pub fn remove(&self, name: &QualifiedName) -> Option<Arc<ClassType>> {
        write_lock(&self.classes).remove(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<QualifiedName> {
        let mut names: Vec<_> = read_lock(&self.classes).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        read_lock(&self.classes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_names_round_trip() {
        let q = QualifiedName::from_dotted("__torch__.foo.Bar").unwrap();
        assert_eq!(q.atoms().len(), 3);
        assert_eq!(q.name(), "Bar");
        assert_eq!(q.prefix().unwrap().to_string(), "__torch__.foo");
        assert_eq!(q.to_string(), "__torch__.foo.Bar");
        assert_eq!(QualifiedName::from_dotted("__torch__.foo").unwrap().child("Bar"), q);
    }

    #[test]
    fn malformed_dotted_names_are_rejected() {
        assert_eq!(QualifiedName::from_dotted(""), Err(QualifiedNameError::Empty));
        assert!(matches!(
            QualifiedName::from_dotted("a..b"),
            Err(QualifiedNameError::EmptySegment(_))
        ));
        assert!(QualifiedName::from_dotted("a.").is_err());
    }

    #[test]
    fn registry_rejects_duplicates_and_supports_removal() {
        let registry = ClassRegistry::new();
        let name = QualifiedName::from_dotted("__torch__.A").unwrap();
        let unit = Arc::new(CompilationUnit::new());
        registry.create(name.clone(), Arc::clone(&unit)).unwrap();
        assert_eq!(
            registry.create(name.clone(), unit).unwrap_err(),
            RegistryError::DuplicateClass(name.clone())
        );
        assert!(registry.remove(&name).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn class_attributes_are_unique() {
        let class = ClassType::new(
            QualifiedName::from_dotted("__torch__.A").unwrap(),
            Arc::new(CompilationUnit::new()),
        );
        class.add_attribute("weight", Type::Tensor).unwrap();
        assert!(class.add_attribute("weight", Type::Int).is_err());
        assert_eq!(class.attribute("weight"), Some(Type::Tensor));
        assert_eq!(class.attribute("bias"), None);
    }
}
