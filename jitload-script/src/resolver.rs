#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use jitload_ir::{ClassRegistry, ClassType, IValue, QualifiedName, Tensor};
use serde::{Deserialize, Serialize};

use crate::sugared::{BuiltinModule, SugaredValue};

/// Name lookup for the free identifiers of a definition.
pub trait Resolver<'a> {
    fn resolve_value(&self, name: &str) -> Option<SugaredValue<'a>>;

    /// `name` is a dotted class name.
    fn resolve_type(&self, name: &str) -> Option<Arc<ClassType>>;

    /// Operator set version that builtins (including lowered operators)
    /// are checked against.
    fn version(&self) -> u64;
}

pub type ResolverRef<'a> = Arc<dyn Resolver<'a> + 'a>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Sentinel identifier under which user classes are addressed.
    pub namespace_root: String,
    /// Namespace that `torch.<op>` dispatches into.
    pub builtin_namespace: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            namespace_root: "__torch__".to_string(),
            builtin_namespace: "aten".to_string(),
        }
    }
}

/// Resolver for one unit of serialized source.
///
/// The environment is fixed at construction. Classes are looked up in the
/// registry on every request, so classes registered later are visible.
pub struct SourceResolver<'a> {
    version: u64,
    env: HashMap<&'static str, SugaredValue<'a>>,
    namespace_root: QualifiedName,
    registry: &'a ClassRegistry,
}

impl<'a> SourceResolver<'a> {
    pub fn new(version: u64, constants: &'a [Tensor], registry: &'a ClassRegistry) -> Self {
        Self::with_config(&ResolverConfig::default(), version, constants, registry)
    }

    /// `config.namespace_root` must be a single non-empty segment.
    pub fn with_config(
        config: &ResolverConfig,
        version: u64,
        constants: &'a [Tensor],
        registry: &'a ClassRegistry,
    ) -> Self {
        let env = HashMap::from([
            (
                "torch",
                SugaredValue::BuiltinModule(BuiltinModule::scoped(
                    config.builtin_namespace.as_str(),
                    version,
                )),
            ),
            ("ops", SugaredValue::BuiltinModule(BuiltinModule::root(version))),
            ("CONSTANTS", SugaredValue::ConstantTable(constants)),
            ("fork", SugaredValue::Fork),
            ("annotate", SugaredValue::Annotate),
            ("inf", SugaredValue::Constant(IValue::Double(f64::INFINITY))),
            ("nan", SugaredValue::Constant(IValue::Double(f64::NAN))),
        ]);
        Self {
            version,
            env,
            namespace_root: QualifiedName::root(&config.namespace_root),
            registry,
        }
    }
}

impl<'a> Resolver<'a> for SourceResolver<'a> {
    fn resolve_value(&self, name: &str) -> Option<SugaredValue<'a>> {
        if let Some(v) = self.env.get(name) {
            tracing::trace!(name, kind = v.kind(), "resolved from environment");
            return Some(v.clone());
        }
        if name == self.namespace_root.name() {
            tracing::trace!(name, "resolved class namespace root");
            return Some(SugaredValue::ClassNamespace {
                path: self.namespace_root.clone(),
                registry: self.registry,
            });
        }
        tracing::trace!(name, "unresolved");
        None
    }

    fn resolve_type(&self, name: &str) -> Option<Arc<ClassType>> {
        let qualified = QualifiedName::from_dotted(name).ok()?;
        self.registry.get(&qualified)
    }

    fn version(&self) -> u64 {
        self.version
    }
}
