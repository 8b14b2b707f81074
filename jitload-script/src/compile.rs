#![forbid(unsafe_code)]

//! Lowering of parsed method definitions into graphs.
//!
//! A batch of definitions is compiled as one unit: every schema is declared
//! first so methods may call each other in any order, and nothing is
//! registered in the compilation unit until every body compiled.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use jitload_ast::{
    span_between, AssignStmt, BinOp, CallArg, Def, Expr, ExprKind, Ident, IfStmt, Span, Stmt,
    TypeExpr, UnaryOp,
};
use jitload_ir::{
    find_operator, Argument, Block, ClassType, CompilationUnit, Function, FunctionSchema, Graph,
    IValue, NodeKind, OperatorSchema, QualifiedName, Symbol, Type, ValueId,
};

use crate::error::CompileError;
use crate::resolver::{Resolver, ResolverRef};
use crate::sugared::SugaredValue;

/// Binds the receiver parameter of every method in a batch.
pub type SelfBinder<'s, 'a> = dyn Fn(&mut Graph, ValueId) -> SugaredValue<'a> + 's;

/// Method schemas declared ahead of compilation, keyed by class.
///
/// Bodies compiled against a set of declarations see every method declared
/// in it, including those of classes whose bodies are not compiled yet.
#[derive(Debug, Default)]
pub struct Declarations {
    classes: HashMap<QualifiedName, BTreeMap<String, FunctionSchema>>,
}

impl Declarations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self, class: &QualifiedName, method: &str) -> Option<&FunctionSchema> {
        self.classes.get(class)?.get(method)
    }

    pub fn contains_class(&self, class: &QualifiedName) -> bool {
        self.classes.contains_key(class)
    }
}

/// Compile `definitions` as methods of `class` and register them in `cu`.
///
/// `resolvers[i]` resolves the free names of `definitions[i]`.
pub fn define<'a>(
    cu: &CompilationUnit,
    class: &Arc<ClassType>,
    definitions: &[Def],
    resolvers: &[ResolverRef<'a>],
    self_binder: &SelfBinder<'_, 'a>,
) -> Result<Vec<Arc<Function>>, CompileError> {
    let mut declarations = Declarations::new();
    declare(&mut declarations, cu, class, definitions, resolvers)?;
    define_declared(&declarations, cu, class, definitions, resolvers, self_binder)
}

/// Declare the schemas of `definitions` as methods of `class`.
///
/// A class may be declared once per set of declarations.
pub fn declare<'a>(
    declarations: &mut Declarations,
    cu: &CompilationUnit,
    class: &Arc<ClassType>,
    definitions: &[Def],
    resolvers: &[ResolverRef<'a>],
) -> Result<(), CompileError> {
    check_pairing(definitions, resolvers)?;
    let span = definitions.first().map_or(span_between(0, 0), |d| d.span);
    if declarations.contains_class(class.name()) {
        return Err(CompileError::new(
            format!("methods of {} are already declared", class.name()),
            span,
        ));
    }

    let mut declared: BTreeMap<String, FunctionSchema> = BTreeMap::new();
    for (def, resolver) in definitions.iter().zip(resolvers) {
        let name = &def.name.node;
        if declared.contains_key(name) {
            return Err(CompileError::new(
                format!("method `{name}` is defined more than once"),
                def.name.span,
            ));
        }
        if cu.find_function(&class.name().child(name)).is_some() {
            return Err(CompileError::new(
                format!("method `{name}` is already defined on {}", class.name()),
                def.name.span,
            ));
        }
        let schema = declare_schema(def, resolver.as_ref(), class)?;
        tracing::trace!(%schema, "declared");
        declared.insert(name.clone(), schema);
    }
    declarations.classes.insert(class.name().clone(), declared);
    Ok(())
}

/// Compile and register the bodies of methods previously passed to
/// [`declare`] for `class`.
///
/// Nothing is registered in `cu` unless every body compiles.
#[tracing::instrument(level = "debug", skip_all, fields(class = %class.name(), count = definitions.len()))]
pub fn define_declared<'a>(
    declarations: &Declarations,
    cu: &CompilationUnit,
    class: &Arc<ClassType>,
    definitions: &[Def],
    resolvers: &[ResolverRef<'a>],
    self_binder: &SelfBinder<'_, 'a>,
) -> Result<Vec<Arc<Function>>, CompileError> {
    check_pairing(definitions, resolvers)?;

    let mut graphs = Vec::with_capacity(definitions.len());
    for (def, resolver) in definitions.iter().zip(resolvers) {
        let compiler = FunctionCompiler {
            cu,
            class,
            declarations,
            resolver: resolver.as_ref(),
            graph: Graph::new(),
            env: HashMap::new(),
        };
        graphs.push(compiler.compile(def, self_binder)?);
    }

    let mut functions = Vec::with_capacity(graphs.len());
    for (def, graph) in definitions.iter().zip(graphs) {
        let Some(schema) = declarations.schema(class.name(), &def.name.node).cloned() else {
            continue;
        };
        let function = cu
            .register_function(Function::new(class.name().child(&def.name.node), schema, graph))
            .map_err(|e| CompileError::new(e.to_string(), def.name.span))?;
        tracing::debug!(method = %function.name(), "registered method");
        functions.push(function);
    }
    Ok(functions)
}

fn check_pairing<'a>(definitions: &[Def], resolvers: &[ResolverRef<'a>]) -> Result<(), CompileError> {
    if definitions.len() != resolvers.len() {
        return Err(CompileError::new(
            format!(
                "{} definitions were paired with {} resolvers",
                definitions.len(),
                resolvers.len()
            ),
            definitions.first().map_or(span_between(0, 0), |d| d.span),
        ));
    }
    Ok(())
}

fn declare_schema<'a>(
    def: &Def,
    resolver: &dyn Resolver<'a>,
    class: &Arc<ClassType>,
) -> Result<FunctionSchema, CompileError> {
    if def.params.is_empty() {
        return Err(CompileError::new(
            format!("method `{}` must take `self` as its first parameter", def.name.node),
            def.name.span,
        ));
    }
    let mut args = Vec::with_capacity(def.params.len());
    for (i, param) in def.params.iter().enumerate() {
        let ty = match &param.ty {
            _ if i == 0 => Type::Class(Arc::clone(class)),
            Some(ty) => resolve_type_expr(resolver, ty)?,
            None => Type::Tensor,
        };
        args.push(Argument {
            name: param.name.node.clone(),
            ty,
        });
    }
    let ret = match &def.ret {
        Some(ty) => resolve_type_expr(resolver, ty)?,
        None if def.returns_value() => Type::Tensor,
        None => Type::NoneType,
    };
    Ok(FunctionSchema {
        name: def.name.node.clone(),
        args,
        ret,
    })
}

/// Resolve a type annotation. Class names go through `resolver`.
pub fn resolve_type_expr<'a>(resolver: &dyn Resolver<'a>, ty: &TypeExpr) -> Result<Type, CompileError> {
    let name = ty.dotted();
    let mut args = ty
        .args
        .iter()
        .map(|a| resolve_type_expr(resolver, a))
        .collect::<Result<Vec<_>, _>>()?;
    let resolved = match (name.as_str(), args.len()) {
        ("Tensor", 0) => Type::Tensor,
        ("int", 0) => Type::Int,
        ("float", 0) => Type::Float,
        ("bool", 0) => Type::Bool,
        ("str", 0) => Type::Str,
        ("None" | "NoneType", 0) => Type::NoneType,
        ("Any", 0) => Type::Any,
        ("List", 1) => Type::List(Box::new(args.remove(0))),
        ("Optional", 1) => Type::Optional(Box::new(args.remove(0))),
        ("Future", 1) => Type::Future(Box::new(args.remove(0))),
        ("Tuple", _) => Type::Tuple(args),
        (_, 0) => match resolver.resolve_type(&name) {
            Some(class) => Type::Class(class),
            None => return Err(CompileError::new(format!("unknown type {name}"), ty.span)),
        },
        _ => {
            return Err(CompileError::new(
                format!("unknown type {name} with {} type arguments", args.len()),
                ty.span,
            ));
        }
    };
    Ok(resolved)
}

/// Reinterpret the first argument of `annotate(...)` as a type.
fn type_expr_from(expr: &Expr) -> Option<TypeExpr> {
    match &expr.kind {
        ExprKind::Ident(id) => Some(TypeExpr {
            span: expr.span,
            path: vec![id.clone()],
            args: Vec::new(),
        }),
        ExprKind::NoneLit => Some(TypeExpr {
            span: expr.span,
            path: vec![Ident::new(expr.span, "None".to_string())],
            args: Vec::new(),
        }),
        ExprKind::Member { base, member } => {
            let mut ty = type_expr_from(base)?;
            if !ty.args.is_empty() {
                return None;
            }
            ty.path.push(member.clone());
            ty.span = expr.span;
            Some(ty)
        }
        ExprKind::Subscript { base, index } => {
            let mut ty = type_expr_from(base)?;
            if !ty.args.is_empty() {
                return None;
            }
            ty.args = index.iter().map(type_expr_from).collect::<Option<Vec<_>>>()?;
            ty.span = expr.span;
            Some(ty)
        }
        _ => None,
    }
}

/// Whether a value of type `actual` may flow where `declared` is expected.
fn assignable(actual: &Type, declared: &Type) -> bool {
    match (actual, declared) {
        _ if actual == declared => true,
        (Type::Any, _) | (_, Type::Any) => true,
        (Type::NoneType, Type::Optional(_)) => true,
        (Type::Optional(a), Type::Optional(d)) => assignable(a, d),
        (a, Type::Optional(d)) => assignable(a, d),
        (Type::Tuple(a), Type::Tuple(d)) => {
            a.len() == d.len() && a.iter().zip(d).all(|(a, d)| assignable(a, d))
        }
        (Type::List(a), Type::List(d)) | (Type::Future(a), Type::Future(d)) => assignable(a, d),
        _ => false,
    }
}

/// Common type of a variable assigned in both branches of an `if`.
fn unify(a: &Type, b: &Type) -> Option<Type> {
    match (a, b) {
        _ if a == b => Some(a.clone()),
        (Type::Any, _) | (_, Type::Any) => Some(Type::Any),
        (Type::NoneType, Type::Optional(_)) | (Type::Optional(_), Type::NoneType) => {
            Some(if a == &Type::NoneType { b.clone() } else { a.clone() })
        }
        (Type::NoneType, t) | (t, Type::NoneType) => Some(Type::Optional(Box::new(t.clone()))),
        (Type::Optional(inner), t) | (t, Type::Optional(inner)) if **inner == *t => {
            Some(Type::Optional(inner.clone()))
        }
        _ => None,
    }
}

fn binop_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::Div => "div",
        BinOp::Eq => "eq",
        BinOp::Ne => "ne",
        BinOp::Lt => "lt",
        BinOp::Gt => "gt",
        BinOp::Le => "le",
        BinOp::Ge => "ge",
        BinOp::And => "__and__",
        BinOp::Or => "__or__",
    }
}

fn misplaced_return(span: Span) -> CompileError {
    CompileError::new(
        "return is only supported as the last statement of a function",
        span,
    )
}

fn simple(value: Option<&SugaredValue<'_>>) -> Option<ValueId> {
    match value {
        Some(SugaredValue::Simple(v)) => Some(*v),
        _ => None,
    }
}

type Env<'a> = HashMap<String, SugaredValue<'a>>;

struct FunctionCompiler<'c, 'a> {
    cu: &'c CompilationUnit,
    class: &'c Arc<ClassType>,
    declarations: &'c Declarations,
    resolver: &'c dyn Resolver<'a>,
    graph: Graph,
    env: Env<'a>,
}

impl<'c, 'a> FunctionCompiler<'c, 'a> {
    fn compile(mut self, def: &Def, self_binder: &SelfBinder<'_, 'a>) -> Result<Graph, CompileError> {
        let schema = self
            .declarations
            .schema(self.class.name(), &def.name.node)
            .cloned()
            .ok_or_else(|| {
                CompileError::new(
                    format!("method `{}` was never declared", def.name.node),
                    def.name.span,
                )
            })?;

        for (i, (param, arg)) in def.params.iter().zip(&schema.args).enumerate() {
            let bound = if i == 0 {
                let v = self.graph.add_input(&param.name.node, Type::Any);
                self_binder(&mut self.graph, v)
            } else {
                SugaredValue::Simple(self.graph.add_input(&param.name.node, arg.ty.clone()))
            };
            self.env.insert(param.name.node.clone(), bound);
        }

        let out = match self.emit_body(&def.body)? {
            Some((v, span)) => {
                let actual = self.graph.value_type(v);
                if !assignable(actual, &schema.ret) {
                    return Err(CompileError::new(
                        format!(
                            "`{}` returns {actual} but is declared to return {}",
                            schema.name, schema.ret
                        ),
                        span,
                    ));
                }
                v
            }
            None => {
                if !assignable(&Type::NoneType, &schema.ret) {
                    return Err(CompileError::new(
                        format!(
                            "`{}` is declared to return {} but does not return a value",
                            schema.name, schema.ret
                        ),
                        def.name.span,
                    ));
                }
                self.graph.insert_constant(IValue::None, def.span)
            }
        };
        self.graph.register_output(out);
        Ok(self.graph)
    }

    /// Top-level statements; a trailing `return` yields the returned value.
    fn emit_body(&mut self, stmts: &[Stmt]) -> Result<Option<(ValueId, Span)>, CompileError> {
        for (i, stmt) in stmts.iter().enumerate() {
            if let Stmt::Return(ret) = stmt {
                if i + 1 != stmts.len() {
                    return Err(misplaced_return(ret.span));
                }
                let v = match &ret.expr {
                    Some(expr) => self.emit_expr(expr)?,
                    None => self.graph.insert_constant(IValue::None, ret.span),
                };
                return Ok(Some((v, ret.span)));
            }
            self.emit_stmt(stmt)?;
        }
        Ok(None)
    }

    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Assign(assign) => self.emit_assign(assign),
            Stmt::If(stmt) => self.emit_if(stmt),
            Stmt::Pass(_) => Ok(()),
            Stmt::Expr(expr) => self.emit_sugared(expr).map(drop),
            Stmt::Return(ret) => Err(misplaced_return(ret.span)),
        }
    }

    fn emit_assign(&mut self, assign: &AssignStmt) -> Result<(), CompileError> {
        let mut value = self.emit_sugared(&assign.expr)?;
        if let Some(ty) = &assign.ty {
            let ty = resolve_type_expr(self.resolver, ty)?;
            let v = value.as_value(assign.expr.span, &mut self.graph)?;
            let actual = self.graph.value_type(v);
            if !assignable(actual, &ty) {
                return Err(CompileError::new(
                    format!(
                        "cannot assign a value of type {actual} to `{}` of type {ty}",
                        assign.target.node
                    ),
                    assign.expr.span,
                ));
            }
            let annotated = self
                .graph
                .insert_node1(NodeKind::Annotate { input: v }, assign.span, ty);
            value = SugaredValue::Simple(annotated);
        }
        if let SugaredValue::Simple(v) = value {
            if self.graph.debug_name(v).is_none() {
                self.graph.set_debug_name(v, &assign.target.node);
            }
        }
        self.env.insert(assign.target.node.clone(), value);
        Ok(())
    }

    fn emit_if(&mut self, stmt: &IfStmt) -> Result<(), CompileError> {
        let cond = self.emit_expr(&stmt.cond)?;
        let before = self.env.clone();
        let (mut then_block, then_env) = self.emit_branch(&stmt.then_body, &before, stmt.span)?;
        let (mut else_block, else_env) = self.emit_branch(&stmt.else_body, &before, stmt.span)?;

        // Variables bound to a value in both branches, where at least one
        // branch rebinds them, become outputs of the `If` node.
        let names: BTreeSet<&String> = then_env.keys().chain(else_env.keys()).collect();
        let mut merged = Vec::new();
        let mut types = Vec::new();
        for name in names {
            let (Some(t), Some(e)) = (simple(then_env.get(name)), simple(else_env.get(name))) else {
                continue;
            };
            let prior = simple(before.get(name));
            if prior == Some(t) && prior == Some(e) {
                continue;
            }
            let (tt, et) = (self.graph.value_type(t), self.graph.value_type(e));
            let ty = unify(tt, et).ok_or_else(|| {
                CompileError::new(
                    format!(
                        "variable `{name}` has type {tt} in the true branch and {et} in the false branch"
                    ),
                    stmt.span,
                )
            })?;
            then_block.outputs.push(t);
            else_block.outputs.push(e);
            merged.push(name.clone());
            types.push(ty);
        }

        let outputs = self.graph.insert_node(
            NodeKind::If {
                cond,
                then_block,
                else_block,
            },
            stmt.span,
            types,
        );
        self.env = before;
        for (name, out) in merged.into_iter().zip(outputs) {
            self.graph.set_debug_name(out, &name);
            self.env.insert(name, SugaredValue::Simple(out));
        }
        Ok(())
    }

    fn emit_branch(
        &mut self,
        body: &[Stmt],
        before: &Env<'a>,
        span: Span,
    ) -> Result<(Block, Env<'a>), CompileError> {
        self.env = before.clone();
        self.graph.push_block();
        for stmt in body {
            self.emit_stmt(stmt)?;
        }
        let block = self
            .graph
            .pop_block(Vec::new())
            .ok_or_else(|| CompileError::new("unbalanced block nesting", span))?;
        Ok((block, std::mem::take(&mut self.env)))
    }

    fn lookup(&self, name: &Ident) -> Result<SugaredValue<'a>, CompileError> {
        if let Some(v) = self.env.get(&name.node) {
            return Ok(v.clone());
        }
        self.resolver
            .resolve_value(&name.node)
            .ok_or_else(|| CompileError::new(format!("undefined value {}", name.node), name.span))
    }

    fn emit_sugared(&mut self, expr: &Expr) -> Result<SugaredValue<'a>, CompileError> {
        match &expr.kind {
            ExprKind::Ident(name) => self.lookup(name),
            ExprKind::Member { base, member } => {
                let base = self.emit_sugared(base)?;
                self.attr(base, member)
            }
            ExprKind::Call { callee, args } => {
                let callee = self.emit_sugared(callee)?;
                self.call(callee, args, expr.span)
            }
            _ => self.emit_expr(expr).map(SugaredValue::Simple),
        }
    }

    fn emit_expr(&mut self, expr: &Expr) -> Result<ValueId, CompileError> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Call { .. } => {
                let value = self.emit_sugared(expr)?;
                value.as_value(span, &mut self.graph)
            }
            ExprKind::IntLit(n) => {
                let n = i64::try_from(*n).map_err(|_| {
                    CompileError::new(format!("integer literal {n} is out of range"), span)
                })?;
                Ok(self.graph.insert_constant(IValue::Int(n), span))
            }
            ExprKind::FloatLit(x) => Ok(self.graph.insert_constant(IValue::Double(*x), span)),
            ExprKind::StringLit(s) => Ok(self.graph.insert_constant(IValue::Str(s.clone()), span)),
            ExprKind::BoolLit(b) => Ok(self.graph.insert_constant(IValue::Bool(*b), span)),
            ExprKind::NoneLit => Ok(self.graph.insert_constant(IValue::None, span)),
            ExprKind::Tuple(items) => {
                let inputs = items
                    .iter()
                    .map(|e| self.emit_expr(e))
                    .collect::<Result<Vec<_>, _>>()?;
                let ty = Type::Tuple(inputs.iter().map(|v| self.graph.value_type(*v).clone()).collect());
                Ok(self
                    .graph
                    .insert_node1(NodeKind::TupleConstruct { inputs }, span, ty))
            }
            ExprKind::Unary { op, expr: inner } => {
                let v = self.emit_expr(inner)?;
                let name = match op {
                    UnaryOp::Neg => "neg",
                    UnaryOp::Not => "__not__",
                };
                self.emit_builtin(Symbol::aten(name), self.resolver.version(), vec![v], span)
            }
            ExprKind::Binary { left, op, right } => {
                let l = self.emit_expr(left)?;
                let r = self.emit_expr(right)?;
                self.emit_builtin(Symbol::aten(binop_name(*op)), self.resolver.version(), vec![l, r], span)
            }
            ExprKind::Subscript { base, index } => self.emit_subscript(base, index, span),
        }
    }

    fn emit_subscript(&mut self, base: &Expr, index: &[Expr], span: Span) -> Result<ValueId, CompileError> {
        let base = self.emit_expr(base)?;
        if let Type::Tuple(elems) = self.graph.value_type(base).clone() {
            if let [Expr {
                kind: ExprKind::IntLit(i),
                span: index_span,
            }] = index
            {
                let Some(ty) = usize::try_from(*i).ok().and_then(|i| elems.get(i)).cloned() else {
                    return Err(CompileError::new(
                        format!("tuple index {i} is out of range for {}", Type::Tuple(elems)),
                        *index_span,
                    ));
                };
                let index = *i as usize;
                return Ok(self
                    .graph
                    .insert_node1(NodeKind::TupleIndex { input: base, index }, span, ty));
            }
        }
        let [index] = index else {
            return Err(CompileError::new("subscripts take exactly one index", span));
        };
        let index = self.emit_expr(index)?;
        self.emit_builtin(Symbol::aten("__getitem__"), self.resolver.version(), vec![base, index], span)
    }

    fn builtin_schema(
        &self,
        symbol: &Symbol,
        version: u64,
        arity: usize,
        span: Span,
    ) -> Result<&'static OperatorSchema, CompileError> {
        let schema = find_operator(symbol, version).map_err(|e| CompileError::new(e.to_string(), span))?;
        if !schema.accepts_arity(arity) {
            let expected = if schema.min_args == schema.max_args {
                format!("{}", schema.min_args)
            } else {
                format!("{} to {}", schema.min_args, schema.max_args)
            };
            return Err(CompileError::new(
                format!("{symbol} expects {expected} arguments but {arity} were given"),
                span,
            ));
        }
        Ok(schema)
    }

    fn emit_builtin(
        &mut self,
        symbol: Symbol,
        version: u64,
        inputs: Vec<ValueId>,
        span: Span,
    ) -> Result<ValueId, CompileError> {
        let schema = self.builtin_schema(&symbol, version, inputs.len(), span)?;
        let types: Vec<Type> = inputs.iter().map(|v| self.graph.value_type(*v).clone()).collect();
        let ty = schema.return_type(&types);
        Ok(self
            .graph
            .insert_node1(NodeKind::Builtin { symbol, inputs }, span, ty))
    }

    /// Builtins take positional arguments only.
    fn positional_inputs(&mut self, symbol: &Symbol, args: &[CallArg]) -> Result<Vec<ValueId>, CompileError> {
        args.iter()
            .map(|arg| match arg {
                CallArg::Positional(e) => self.emit_expr(e),
                CallArg::Named { name, .. } => Err(CompileError::new(
                    format!("{symbol} does not accept keyword argument `{}`", name.node),
                    name.span,
                )),
            })
            .collect()
    }

    /// Schema of `name` on `class`. Declared but not yet compiled methods,
    /// of any class, take precedence over registered ones.
    fn method_schema(&self, class: &Arc<ClassType>, name: &str) -> Option<FunctionSchema> {
        if let Some(schema) = self.declarations.schema(class.name(), name) {
            return Some(schema.clone());
        }
        if class.name() == self.class.name() {
            return self
                .cu
                .find_function(&class.name().child(name))
                .map(|f| f.schema().clone());
        }
        class.method(name).map(|f| f.schema().clone())
    }

    fn attr(&mut self, base: SugaredValue<'a>, field: &Ident) -> Result<SugaredValue<'a>, CompileError> {
        let v = match base {
            SugaredValue::Simple(v) => v,
            other => return other.attr(field.span, &mut self.graph, &field.node),
        };
        let ty = self.graph.value_type(v).clone();
        let Type::Class(class) = &ty else {
            return Err(CompileError::new(
                format!("type {ty} has no attribute `{}`", field.node),
                field.span,
            ));
        };
        if self.method_schema(class, &field.node).is_some() {
            return Ok(SugaredValue::Method {
                receiver: v,
                class: Arc::clone(class),
                name: field.node.clone(),
            });
        }
        if let Some(attr_ty) = class.attribute(&field.node) {
            let out = self.graph.insert_node1(
                NodeKind::GetAttr {
                    name: field.node.clone(),
                    input: v,
                },
                field.span,
                attr_ty,
            );
            return Ok(SugaredValue::Simple(out));
        }
        Err(CompileError::new(
            format!("{} has no attribute or method `{}`", class.name(), field.node),
            field.span,
        ))
    }

    fn call(
        &mut self,
        callee: SugaredValue<'a>,
        args: &[CallArg],
        span: Span,
    ) -> Result<SugaredValue<'a>, CompileError> {
        match callee {
            SugaredValue::BuiltinFunction { symbol, version } => {
                let inputs = self.positional_inputs(&symbol, args)?;
                self.emit_builtin(symbol, version, inputs, span)
                    .map(SugaredValue::Simple)
            }
            SugaredValue::Method {
                receiver,
                class,
                name,
            } => {
                let schema = self.method_schema(&class, &name).ok_or_else(|| {
                    CompileError::new(format!("{} has no method `{name}`", class.name()), span)
                })?;
                let mut inputs = vec![receiver];
                inputs.extend(self.match_args(&schema, args, span)?);
                let out = self.graph.insert_node1(
                    NodeKind::CallMethod { name, inputs },
                    span,
                    schema.ret,
                );
                Ok(SugaredValue::Simple(out))
            }
            SugaredValue::Class(class) => self.construct(class, args, span),
            SugaredValue::Fork => self.emit_fork(args, span),
            SugaredValue::Annotate => self.emit_annotate(args, span),
            SugaredValue::Simple(v) => Err(CompileError::new(
                format!("cannot call a value of type {}", self.graph.value_type(v)),
                span,
            )),
            other => Err(CompileError::new(
                format!("{} is not callable", other.kind()),
                span,
            )),
        }
    }

    /// Bind call arguments to the non-receiver parameters of `schema`.
    fn match_args(
        &mut self,
        schema: &FunctionSchema,
        args: &[CallArg],
        span: Span,
    ) -> Result<Vec<ValueId>, CompileError> {
        let params = schema.args.get(1..).unwrap_or_default();
        let positional = args
            .iter()
            .filter(|a| matches!(a, CallArg::Positional(_)))
            .count();
        if positional > params.len() {
            return Err(CompileError::new(
                format!(
                    "{} expects {} arguments but {positional} were given",
                    schema.name,
                    params.len()
                ),
                span,
            ));
        }

        let mut slots: Vec<Option<ValueId>> = vec![None; params.len()];
        let mut next = 0;
        for arg in args {
            let (slot, expr) = match arg {
                CallArg::Positional(expr) => {
                    next += 1;
                    (next - 1, expr)
                }
                CallArg::Named { name, value } => {
                    let slot = params.iter().position(|p| p.name == name.node).ok_or_else(|| {
                        CompileError::new(
                            format!("{} has no parameter named `{}`", schema.name, name.node),
                            name.span,
                        )
                    })?;
                    if slots[slot].is_some() {
                        return Err(CompileError::new(
                            format!(
                                "{} got multiple values for parameter `{}`",
                                schema.name, name.node
                            ),
                            name.span,
                        ));
                    }
                    (slot, value)
                }
            };
            let v = self.emit_expr(expr)?;
            let param = &params[slot];
            let actual = self.graph.value_type(v);
            if !assignable(actual, &param.ty) {
                return Err(CompileError::new(
                    format!(
                        "argument `{}` of {} expects {} but got {actual}",
                        param.name, schema.name, param.ty
                    ),
                    expr.span,
                ));
            }
            slots[slot] = Some(v);
        }

        slots
            .into_iter()
            .zip(params)
            .map(|(slot, param)| {
                slot.ok_or_else(|| {
                    CompileError::new(
                        format!("{} is missing argument `{}`", schema.name, param.name),
                        span,
                    )
                })
            })
            .collect()
    }

    fn construct(
        &mut self,
        class: Arc<ClassType>,
        args: &[CallArg],
        span: Span,
    ) -> Result<SugaredValue<'a>, CompileError> {
        let obj = self
            .graph
            .insert_node1(NodeKind::CreateObject, span, Type::Class(Arc::clone(&class)));
        match self.method_schema(&class, "__init__") {
            Some(init) => {
                let mut inputs = vec![obj];
                inputs.extend(self.match_args(&init, args, span)?);
                self.graph.insert_node1(
                    NodeKind::CallMethod {
                        name: "__init__".to_string(),
                        inputs,
                    },
                    span,
                    Type::NoneType,
                );
            }
            None if !args.is_empty() => {
                return Err(CompileError::new(
                    format!("{} takes no constructor arguments", class.name()),
                    span,
                ));
            }
            None => {}
        }
        Ok(SugaredValue::Simple(obj))
    }

    fn emit_fork(&mut self, args: &[CallArg], span: Span) -> Result<SugaredValue<'a>, CompileError> {
        let Some((CallArg::Positional(target), rest)) = args.split_first() else {
            return Err(CompileError::new(
                "fork expects a callable as its first argument",
                span,
            ));
        };
        let (name, inputs, ret) = match self.emit_sugared(target)? {
            SugaredValue::Method {
                receiver,
                class,
                name,
            } => {
                let schema = self.method_schema(&class, &name).ok_or_else(|| {
                    CompileError::new(format!("{} has no method `{name}`", class.name()), span)
                })?;
                let mut inputs = vec![receiver];
                inputs.extend(self.match_args(&schema, rest, span)?);
                (name, inputs, schema.ret)
            }
            SugaredValue::BuiltinFunction { symbol, version } => {
                let inputs = self.positional_inputs(&symbol, rest)?;
                let schema = self.builtin_schema(&symbol, version, inputs.len(), span)?;
                let types: Vec<Type> = inputs.iter().map(|v| self.graph.value_type(*v).clone()).collect();
                (symbol.to_string(), inputs, schema.return_type(&types))
            }
            other => {
                return Err(CompileError::new(
                    format!("fork expects a method or builtin operator, found {}", other.kind()),
                    target.span,
                ));
            }
        };
        let out = self.graph.insert_node1(
            NodeKind::Fork {
                target: name,
                inputs,
            },
            span,
            Type::Future(Box::new(ret)),
        );
        Ok(SugaredValue::Simple(out))
    }

    fn emit_annotate(&mut self, args: &[CallArg], span: Span) -> Result<SugaredValue<'a>, CompileError> {
        let [CallArg::Positional(ty_expr), CallArg::Positional(value)] = args else {
            return Err(CompileError::new("annotate expects a type and a value", span));
        };
        let ty = type_expr_from(ty_expr).ok_or_else(|| {
            CompileError::new("expected a type as the first argument of annotate", ty_expr.span)
        })?;
        let ty = resolve_type_expr(self.resolver, &ty)?;
        let v = self.emit_expr(value)?;
        let actual = self.graph.value_type(v);
        if !assignable(actual, &ty) {
            return Err(CompileError::new(
                format!("cannot annotate a value of type {actual} as {ty}"),
                value.span,
            ));
        }
        let out = self
            .graph
            .insert_node1(NodeKind::Annotate { input: v }, span, ty);
        Ok(SugaredValue::Simple(out))
    }
}
