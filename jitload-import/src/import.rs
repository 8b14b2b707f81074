#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use jitload_ast::ClassDef;
use jitload_ir::{ClassRegistry, ClassType, CompilationUnit, Graph, Module, QualifiedName, Tensor, Type, ValueId};
use jitload_lex::Lexer;
use jitload_parse::Parser;
use jitload_script::{
    declare, define, define_declared, resolve_type_expr, CompileError, Declarations, ResolverRef,
    SourceResolver, SugaredValue,
};
use miette::{Diagnostic, Report};

use crate::config::ImportConfig;
use crate::header::{parse_imports, parse_version_number};

fn with_source<E>(err: E, src: &str) -> Report
where
    E: Diagnostic + Send + Sync + 'static,
{
    Report::new(err).with_source_code(src.to_owned())
}

/// Every receiver is an object of `class`.
fn bind_self<'a>(class: &Arc<ClassType>) -> impl Fn(&mut Graph, ValueId) -> SugaredValue<'a> + use<'a> {
    let class = Arc::clone(class);
    move |graph: &mut Graph, v: ValueId| {
        graph.set_type(v, Type::Class(Arc::clone(&class)));
        SugaredValue::Simple(v)
    }
}

fn notify_imports<F>(parser: &mut Parser<'_>, callback: &mut F, src: &str) -> miette::Result<()>
where
    F: FnMut(&str) -> miette::Result<()>,
{
    let imports = parse_imports(parser).map_err(|e| with_source(e, src))?;
    tracing::debug!(count = imports.len(), "parsed imports");
    for import in &imports {
        tracing::trace!(%import, "notifying import");
        callback(import.as_str())?;
    }
    Ok(())
}

/// Compile the methods in `src` onto `module`'s class.
///
/// `callback` sees each distinct import path once, in sorted order, before
/// any definition is parsed. An error from it aborts the import.
pub fn import_methods<F>(
    module: &Module,
    src: &str,
    constants: &[Tensor],
    registry: &ClassRegistry,
    callback: F,
) -> miette::Result<()>
where
    F: FnMut(&str) -> miette::Result<()>,
{
    import_methods_with_config(&ImportConfig::default(), module, src, constants, registry, callback)
}

#[tracing::instrument(level = "debug", skip_all, fields(module = %module.class_type().name()))]
pub fn import_methods_with_config<F>(
    config: &ImportConfig,
    module: &Module,
    src: &str,
    constants: &[Tensor],
    registry: &ClassRegistry,
    mut callback: F,
) -> miette::Result<()>
where
    F: FnMut(&str) -> miette::Result<()>,
{
    config.validate()?;
    let tokens = Lexer::new(src).lex().map_err(|e| with_source(e, src))?;
    let mut parser = Parser::new(&tokens);
    let version = parse_version_number(&mut parser, config).map_err(|e| with_source(e, src))?;
    tracing::debug!(version, "parsed operator set version");
    notify_imports(&mut parser, &mut callback, src)?;

    let resolver: ResolverRef<'_> = Arc::new(SourceResolver::with_config(
        &config.resolver,
        version,
        constants,
        registry,
    ));
    let mut definitions = Vec::new();
    while !parser.at_eof() {
        definitions.push(parser.parse_function(true).map_err(|e| with_source(e, src))?);
    }
    tracing::debug!(count = definitions.len(), "parsed method definitions");

    let class = module.class_type();
    let resolvers = vec![resolver; definitions.len()];
    let binder = bind_self(class);
    define(class.compilation_unit(), class, &definitions, &resolvers, &binder)
        .map_err(|e| with_source(e, src))?;
    Ok(())
}

/// Compile every `class` in `src` as `qualifier.<ClassName>`, each with its
/// own compilation unit, and register them in `registry`.
///
/// Nothing stays registered when the call fails.
pub fn import_libs<F>(
    qualifier: &QualifiedName,
    src: &str,
    constants: &[Tensor],
    registry: &ClassRegistry,
    callback: F,
) -> miette::Result<Vec<Arc<ClassType>>>
where
    F: FnMut(&str) -> miette::Result<()>,
{
    import_libs_with_config(&ImportConfig::default(), qualifier, src, constants, registry, callback)
}

#[tracing::instrument(level = "debug", skip_all, fields(qualifier = %qualifier))]
pub fn import_libs_with_config<F>(
    config: &ImportConfig,
    qualifier: &QualifiedName,
    src: &str,
    constants: &[Tensor],
    registry: &ClassRegistry,
    mut callback: F,
) -> miette::Result<Vec<Arc<ClassType>>>
where
    F: FnMut(&str) -> miette::Result<()>,
{
    config.validate()?;
    let tokens = Lexer::new(src).lex().map_err(|e| with_source(e, src))?;
    let mut parser = Parser::new(&tokens);
    let version = parse_version_number(&mut parser, config).map_err(|e| with_source(e, src))?;
    tracing::debug!(version, "parsed operator set version");

    // Each block is an import list followed by one class. Blocks never share
    // a resolver.
    let mut blocks: Vec<(ClassDef, ResolverRef<'_>)> = Vec::new();
    while !parser.at_eof() {
        notify_imports(&mut parser, &mut callback, src)?;
        let resolver: ResolverRef<'_> = Arc::new(SourceResolver::with_config(
            &config.resolver,
            version,
            constants,
            registry,
        ));
        let class_def = parser.parse_class().map_err(|e| with_source(e, src))?;
        blocks.push((class_def, resolver));
    }
    tracing::debug!(count = blocks.len(), "parsed classes");

    let mut names = Vec::with_capacity(blocks.len());
    let mut seen = BTreeSet::new();
    for (class_def, _) in &blocks {
        let name = qualifier.child(&class_def.name.node);
        if registry.contains(&name) || !seen.insert(name.clone()) {
            return Err(with_source(
                CompileError::new(format!("class {name} is already defined"), class_def.name.span),
                src,
            ));
        }
        names.push(name);
    }

    let mut classes = Vec::with_capacity(blocks.len());
    for (name, (class_def, _)) in names.into_iter().zip(&blocks) {
        match registry.create(name, Arc::new(CompilationUnit::new())) {
            Ok(class) => {
                tracing::debug!(class = %class.name(), "registered class");
                classes.push(class);
            }
            Err(e) => {
                unregister(registry, &classes);
                return Err(with_source(
                    CompileError::new(e.to_string(), class_def.name.span),
                    src,
                ));
            }
        }
    }

    if let Err(e) = compile_classes(&blocks, &classes) {
        unregister(registry, &classes);
        return Err(with_source(e, src));
    }
    Ok(classes)
}

/// Declare attributes and method schemas of every class of a file, then
/// compile the bodies, so any class may use any other one's methods.
fn compile_classes(
    blocks: &[(ClassDef, ResolverRef<'_>)],
    classes: &[Arc<ClassType>],
) -> Result<(), CompileError> {
    for ((class_def, resolver), class) in blocks.iter().zip(classes) {
        for attr in &class_def.attributes {
            let ty = resolve_type_expr(resolver.as_ref(), &attr.ty)?;
            class
                .add_attribute(&attr.name.node, ty)
                .map_err(|e| CompileError::new(e.to_string(), attr.name.span))?;
        }
    }
    let mut declarations = Declarations::new();
    for ((class_def, resolver), class) in blocks.iter().zip(classes) {
        let resolvers = vec![Arc::clone(resolver); class_def.defs.len()];
        declare(&mut declarations, class.compilation_unit(), class, &class_def.defs, &resolvers)?;
    }
    for ((class_def, resolver), class) in blocks.iter().zip(classes) {
        let resolvers = vec![Arc::clone(resolver); class_def.defs.len()];
        let binder = bind_self(class);
        define_declared(
            &declarations,
            class.compilation_unit(),
            class,
            &class_def.defs,
            &resolvers,
            &binder,
        )?;
    }
    Ok(())
}

fn unregister(registry: &ClassRegistry, classes: &[Arc<ClassType>]) {
    for class in classes {
        registry.remove(class.name());
        tracing::debug!(class = %class.name(), "unregistered class after failed import");
    }
}
