//! Expression-level type inference.
//!
//! Walks the AST, generates constraints through the [`InferenceContext`],
//! and produces a type plus an effect row for every expression. Also holds
//! the environments and registries the checker builds from declarations:
//! the [`TypeEnv`], sum types, effects and annotation resolution.

use std::collections::{BTreeMap, BTreeSet};

use im::OrdMap;
use sable_ast::{
    EffectAnnotation, Expr, ExprKind, FnDecl, Lit, Pattern, PatternKind, Span, TypeAnnotation,
};
use sable_types::{
    EffectRow, EffectVarId, FunctionType, Given, Label, Substitution, Type, TypeScheme, TypeVarId,
    VarNames, VarRef, free_type_vars, sanitize_type_pair_display, vars_in_order,
};

use crate::signature::{EnvVars, generalize};
use crate::solver::{Resolution, TraitRegistry, solve};
use crate::trace::InferRule;
use crate::{
    FreshVars, InferError, InferenceContext, Obligation, PendingMatch, Provenance, Reason,
};

// ---------------------------------------------------------------------------
// Type environment
// ---------------------------------------------------------------------------

/// Maps names to type schemes.
///
/// Globals (constructors, trait operations, effect operations, checked
/// top-level definitions) live in a persistent map so that every parallel
/// inference can take its own copy cheaply. Locals are a stack of scopes.
#[derive(Debug, Clone, Default)]
pub struct TypeEnv {
    globals: OrdMap<String, TypeScheme>,
    scopes: Vec<BTreeMap<String, TypeScheme>>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_global(&mut self, name: impl Into<String>, scheme: TypeScheme) {
        self.globals.insert(name.into(), scheme);
    }

    pub fn contains_global(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    /// Look up a name, innermost scope first.
    pub fn lookup(&self, name: &str) -> Option<&TypeScheme> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
    }

    /// Bind a name in the innermost scope.
    pub fn bind(&mut self, name: impl Into<String>, scheme: TypeScheme) {
        if self.scopes.is_empty() {
            self.scopes.push(BTreeMap::new());
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), scheme);
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(BTreeMap::new());
    }

    pub fn pop_scope(&mut self) {
        debug_assert!(!self.scopes.is_empty(), "pop_scope called with no scopes");
        self.scopes.pop();
    }

    /// Variables free in the local scopes under `subst`.
    ///
    /// Globals are closed schemes and contribute nothing.
    pub fn free_vars(&self, subst: &Substitution) -> EnvVars {
        let mut vars = EnvVars::default();
        for scheme in self.scopes.iter().flat_map(|scope| scope.values()) {
            for var in vars_in_order(&subst.apply(&scheme.ty)) {
                match var {
                    VarRef::Type(v) if !scheme.type_vars.contains(&v) => {
                        vars.types.insert(v);
                    }
                    VarRef::Effect(e) if !scheme.effect_vars.contains(&e) => {
                        vars.effects.insert(e);
                    }
                    _ => {}
                }
            }
        }
        vars
    }
}

// ---------------------------------------------------------------------------
// Sum types
// ---------------------------------------------------------------------------

/// A constructor of a sum type. Field types mention the type's parameters.
#[derive(Debug, Clone)]
pub struct ConstructorInfo {
    pub name: String,
    pub type_name: String,
    pub fields: Vec<Type>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct SumTypeInfo {
    pub name: String,
    pub params: Vec<TypeVarId>,
    pub param_names: Vec<String>,
    pub variants: Vec<ConstructorInfo>,
    pub span: Span,
}

impl SumTypeInfo {
    /// `Maybe a` for `type Maybe a = ...`.
    pub fn result_type(&self) -> Type {
        Type::named(
            self.name.clone(),
            self.params.iter().map(|p| Type::Var(*p)).collect(),
        )
    }

    /// The scheme of a constructor used as a value: `a -> Maybe a pure` for
    /// `Some`, `Maybe a` for `None`.
    pub fn constructor_scheme(&self, ctor: &ConstructorInfo) -> TypeScheme {
        let ty = if ctor.fields.is_empty() {
            self.result_type()
        } else {
            Type::function(ctor.fields.clone(), self.result_type(), EffectRow::pure())
        };
        let mut names = VarNames::new();
        for (var, name) in self.params.iter().zip(&self.param_names) {
            names.types.insert(*var, name.clone());
        }
        TypeScheme {
            type_vars: self.params.clone(),
            effect_vars: Vec::new(),
            givens: Vec::new(),
            names,
            ty,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SumTypeRegistry {
    types: BTreeMap<String, SumTypeInfo>,
    /// Constructor name to owning type name.
    constructors: BTreeMap<String, String>,
}

impl SumTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type, replacing any earlier registration of the same name.
    pub fn register(&mut self, info: SumTypeInfo) {
        for variant in &info.variants {
            self.constructors
                .insert(variant.name.clone(), info.name.clone());
        }
        self.types.insert(info.name.clone(), info);
    }

    pub fn lookup_type(&self, name: &str) -> Option<&SumTypeInfo> {
        self.types.get(name)
    }

    pub fn lookup_constructor(&self, name: &str) -> Option<(&SumTypeInfo, &ConstructorInfo)> {
        let info = self.types.get(self.constructors.get(name)?)?;
        let ctor = info.variants.iter().find(|v| v.name == name)?;
        Some((info, ctor))
    }

    pub fn contains_constructor(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Number of type parameters, for kind checks.
    pub fn arity(&self, name: &str) -> Option<usize> {
        self.types.get(name).map(|info| info.params.len())
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// An operation of a declared effect, e.g. `print : String -> Unit` of `IO`.
#[derive(Debug, Clone)]
pub struct EffectOpInfo {
    pub name: String,
    /// The operation as a function whose effect row is `can <Effect>`.
    pub scheme: TypeScheme,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct EffectInfo {
    pub name: String,
    pub operations: Vec<EffectOpInfo>,
    pub span: Span,
}

#[derive(Debug, Clone, Default)]
pub struct EffectRegistry {
    effects: BTreeMap<String, EffectInfo>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: EffectInfo) {
        self.effects.insert(info.name.clone(), info);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.effects.contains_key(name)
    }
}

/// Everything declarations register before inference starts. Read-only
/// once inference begins.
#[derive(Debug, Clone, Default)]
pub struct Registries {
    pub sum_types: SumTypeRegistry,
    pub traits: TraitRegistry,
    pub effects: EffectRegistry,
}

// ---------------------------------------------------------------------------
// Annotation resolution
// ---------------------------------------------------------------------------

/// Type and effect variables named by annotations in one signature.
#[derive(Debug, Clone, Default)]
pub struct AnnotationScope {
    type_vars: Vec<(String, TypeVarId)>,
    effect_vars: Vec<(String, EffectVarId)>,
    /// Whether unseen variable names introduce new variables.
    open: bool,
}

impl AnnotationScope {
    /// A scope in which every new variable name introduces a variable.
    pub fn open() -> Self {
        Self {
            open: true,
            ..Self::default()
        }
    }

    /// A scope limited to the given variables, as in a type definition.
    pub fn closed(type_vars: Vec<(String, TypeVarId)>) -> Self {
        Self {
            type_vars,
            effect_vars: Vec::new(),
            open: false,
        }
    }

    pub fn with_type_var(mut self, name: &str, var: TypeVarId) -> Self {
        self.type_vars.push((name.to_string(), var));
        self
    }

    pub fn type_var(&self, name: &str) -> Option<TypeVarId> {
        self.type_vars
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    fn type_var_or_insert(
        &mut self,
        name: &str,
        fresh: &mut impl FreshVars,
        span: Span,
    ) -> Result<TypeVarId, InferError> {
        if let Some(var) = self.type_var(name) {
            return Ok(var);
        }
        if !self.open {
            return Err(InferError::UnknownType {
                name: name.to_string(),
                span,
            });
        }
        let var = fresh.fresh_type_var();
        self.type_vars.push((name.to_string(), var));
        Ok(var)
    }

    fn effect_var_or_insert(
        &mut self,
        name: &str,
        fresh: &mut impl FreshVars,
        span: Span,
    ) -> Result<EffectVarId, InferError> {
        if let Some((_, var)) = self.effect_vars.iter().find(|(n, _)| n == name) {
            return Ok(*var);
        }
        if !self.open {
            return Err(InferError::UnknownEffect {
                name: name.to_string(),
                span,
            });
        }
        let var = fresh.fresh_effect_var();
        self.effect_vars.push((name.to_string(), var));
        Ok(var)
    }

    /// Quantify `ty` over every variable of the scope, in the order the
    /// annotation introduced them.
    pub fn scheme(&self, ty: Type, givens: Vec<Given>) -> TypeScheme {
        TypeScheme {
            type_vars: self.type_vars.iter().map(|(_, v)| *v).collect(),
            effect_vars: self.effect_vars.iter().map(|(_, v)| *v).collect(),
            givens,
            names: self.names(),
            ty,
        }
    }

    /// Declared names of every variable in the scope.
    pub fn names(&self) -> VarNames {
        let mut names = VarNames::new();
        for (name, var) in &self.type_vars {
            names.types.insert(*var, name.clone());
        }
        for (name, var) in &self.effect_vars {
            names.effects.insert(*var, name.clone());
        }
        names
    }
}

fn is_var_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_lowercase())
}

fn primitive_type(name: &str) -> Option<Type> {
    match name {
        "Int" => Some(Type::Int),
        "Float" => Some(Type::Float),
        "Bool" => Some(Type::Bool),
        "String" => Some(Type::String),
        "Unit" => Some(Type::Unit),
        _ => None,
    }
}

/// The type an `impl` head names: a primitive or a bare sum type
/// constructor, together with its arity.
pub fn impl_head_type(name: &str, sum_types: &SumTypeRegistry) -> Option<(Type, usize)> {
    if let Some(ty) = primitive_type(name) {
        return Some((ty, 0));
    }
    let arity = sum_types.arity(name)?;
    Some((Type::named(name, Vec::new()), arity))
}

/// Resolve a syntactic annotation to a type.
pub fn resolve_annotation(
    ann: &TypeAnnotation,
    scope: &mut AnnotationScope,
    regs: &Registries,
    fresh: &mut impl FreshVars,
    span: Span,
) -> Result<Type, InferError> {
    match ann {
        TypeAnnotation::Named(name) => resolve_applied(name, &[], scope, regs, fresh, span),
        TypeAnnotation::Applied(name, args) => {
            resolve_applied(name, args, scope, regs, fresh, span)
        }
        TypeAnnotation::Function {
            params,
            ret,
            effect,
        } => {
            let params = params
                .iter()
                .map(|p| resolve_annotation(p, scope, regs, fresh, span))
                .collect::<Result<Vec<_>, _>>()?;
            let ret = resolve_annotation(ret, scope, regs, fresh, span)?;
            let effects = resolve_effects(effect, scope, regs, fresh, span)?;
            Ok(Type::function(params, ret, effects))
        }
        TypeAnnotation::Tuple(elems) => {
            let elems = elems
                .iter()
                .map(|e| resolve_annotation(e, scope, regs, fresh, span))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Type::Tuple(elems))
        }
    }
}

fn resolve_applied(
    name: &str,
    args: &[TypeAnnotation],
    scope: &mut AnnotationScope,
    regs: &Registries,
    fresh: &mut impl FreshVars,
    span: Span,
) -> Result<Type, InferError> {
    let args = args
        .iter()
        .map(|a| resolve_annotation(a, scope, regs, fresh, span))
        .collect::<Result<Vec<_>, _>>()?;

    if is_var_name(name) {
        let var = scope.type_var_or_insert(name, fresh, span)?;
        return Ok(Type::app(Type::Var(var), args));
    }
    if let Some(ty) = primitive_type(name) {
        if !args.is_empty() {
            return Err(InferError::KindMismatch {
                name: name.to_string(),
                expected: 0,
                actual: args.len(),
                span,
            });
        }
        return Ok(ty);
    }
    match regs.sum_types.arity(name) {
        Some(arity) if arity == args.len() => Ok(Type::named(name, args)),
        Some(arity) => Err(InferError::KindMismatch {
            name: name.to_string(),
            expected: arity,
            actual: args.len(),
            span,
        }),
        None => Err(InferError::UnknownType {
            name: name.to_string(),
            span,
        }),
    }
}

fn resolve_effects(
    effect: &EffectAnnotation,
    scope: &mut AnnotationScope,
    regs: &Registries,
    fresh: &mut impl FreshVars,
    span: Span,
) -> Result<EffectRow, InferError> {
    match effect {
        EffectAnnotation::Pure => Ok(EffectRow::pure()),
        EffectAnnotation::Var(name) => {
            Ok(EffectRow::var(scope.effect_var_or_insert(name, fresh, span)?))
        }
        EffectAnnotation::Row { effects, rest } => {
            let mut labels = Vec::with_capacity(effects.len());
            for name in effects {
                if !regs.effects.contains(name) {
                    return Err(InferError::UnknownEffect {
                        name: name.clone(),
                        span,
                    });
                }
                labels.push(Label::new(name.clone()));
            }
            match rest {
                Some(rest) => Ok(EffectRow::open(
                    labels,
                    scope.effect_var_or_insert(rest, fresh, span)?,
                )),
                None => Ok(EffectRow::closed(labels)),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Expression inference
// ---------------------------------------------------------------------------

/// The result of inferring an expression: its type and the effects
/// evaluating it may perform.
#[derive(Debug, Clone, PartialEq)]
pub struct Typed {
    pub ty: Type,
    pub effects: EffectRow,
}

impl Typed {
    fn pure(ty: Type) -> Self {
        Self {
            ty,
            effects: EffectRow::pure(),
        }
    }
}

pub fn lit_type(lit: &Lit) -> Type {
    match lit {
        Lit::Int(_) => Type::Int,
        Lit::Float(_) => Type::Float,
        Lit::Bool(_) => Type::Bool,
        Lit::String(_) => Type::String,
        Lit::Unit => Type::Unit,
    }
}

/// Only syntactic values are generalized at `let`.
fn is_generalizable(expr: &Expr) -> bool {
    matches!(
        expr.node,
        ExprKind::Lambda { .. } | ExprKind::Var(_) | ExprKind::Lit(_)
    )
}

fn describe_callee(func: &Expr) -> String {
    match &func.node {
        ExprKind::Var(name) => format!("`{name}`"),
        _ => "this function".to_string(),
    }
}

/// Infer the type and effects of an expression.
pub fn infer_expr(
    expr: &Expr,
    env: &mut TypeEnv,
    ctx: &mut InferenceContext,
    regs: &Registries,
) -> Result<Typed, InferError> {
    let span = expr.span;
    match &expr.node {
        ExprKind::Lit(lit) => {
            let ty = lit_type(lit);
            ctx.record_step(InferRule::Literal, "literal", &ty, "", span);
            Ok(Typed::pure(ty))
        }

        ExprKind::Var(name) => {
            let scheme = env.lookup(name).cloned().ok_or_else(|| {
                InferError::UnboundVariable {
                    name: name.clone(),
                    span,
                }
            })?;
            let ty = ctx.instantiate(&scheme, span);
            ctx.record_step(InferRule::VarLookup, name, &ty, "instantiate", span);
            Ok(Typed::pure(ty))
        }

        ExprKind::Lambda { params, body } => {
            env.push_scope();
            let result = infer_lambda(params, body, env, ctx, regs);
            env.pop_scope();
            let (param_tys, body) = result?;
            let latent = if body.effects.is_closed() {
                EffectRow::open(body.effects.labels, ctx.fresh_effect_var())
            } else {
                body.effects
            };
            let ty = Type::function(param_tys, body.ty, latent);
            ctx.record_step(InferRule::Lambda, "fn", &ty, "", span);
            Ok(Typed::pure(ty))
        }

        ExprKind::Call { func, args } => infer_call(func, args, span, env, ctx, regs),

        ExprKind::Let {
            pattern,
            annotation,
            value,
            body,
        } => {
            let bound = infer_expr(value, env, ctx, regs)?;
            if let Some(annotation) = annotation {
                let mut scope = AnnotationScope::open();
                let declared =
                    resolve_annotation(&annotation.node, &mut scope, regs, ctx, annotation.span)?;
                ctx.record_names(&scope.names());
                ctx.unify(
                    &declared,
                    &bound.ty,
                    &Provenance::new(annotation.span, Reason::LetAnnotation),
                )?;
            }

            env.push_scope();
            let result = bind_let(pattern, value, &bound.ty, env, ctx, regs)
                .and_then(|()| infer_expr(body, env, ctx, regs));
            env.pop_scope();
            let rest = result?;

            let effects = ctx.join_effects(
                &[bound.effects, rest.effects],
                &Provenance::new(span, Reason::CallEffects),
            )?;
            ctx.record_step(InferRule::Let, "let", &rest.ty, "", span);
            Ok(Typed {
                ty: rest.ty,
                effects,
            })
        }

        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            let cond = infer_expr(condition, env, ctx, regs)?;
            ctx.unify(
                &Type::Bool,
                &cond.ty,
                &Provenance::new(condition.span, Reason::IfCondition),
            )?;
            let then_typed = infer_expr(then_branch, env, ctx, regs)?;
            let else_typed = infer_expr(else_branch, env, ctx, regs)?;
            ctx.unify(
                &then_typed.ty,
                &else_typed.ty,
                &Provenance::new(else_branch.span, Reason::IfBranches),
            )?;
            let effects = ctx.join_effects(
                &[cond.effects, then_typed.effects, else_typed.effects],
                &Provenance::new(span, Reason::CallEffects),
            )?;
            ctx.record_step(InferRule::If, "if", &then_typed.ty, "", span);
            Ok(Typed {
                ty: then_typed.ty,
                effects,
            })
        }

        ExprKind::Match { scrutinee, arms } => {
            let scrut = infer_expr(scrutinee, env, ctx, regs)?;
            let mut effects = vec![scrut.effects];
            let mut first: Option<(Type, Span)> = None;

            for arm in arms {
                env.push_scope();
                let result = infer_pattern(&arm.pattern, &scrut.ty, env, ctx, regs)
                    .and_then(|()| infer_expr(&arm.body, env, ctx, regs));
                env.pop_scope();
                let typed = result?;

                let Some((first_ty, first_span)) = first.clone() else {
                    first = Some((typed.ty, arm.body.span));
                    effects.push(typed.effects);
                    continue;
                };
                let prov = Provenance::new(arm.body.span, Reason::MatchArms);
                if let Err(err) = ctx.unify(&first_ty, &typed.ty, &prov) {
                    return Err(match err {
                        InferError::TypeMismatch { .. } => InferError::PatternArmMismatch {
                            first: ctx.apply(&first_ty),
                            other: ctx.apply(&typed.ty),
                            first_span,
                            other_span: arm.body.span,
                        },
                        other => other,
                    });
                }
                effects.push(typed.effects);
            }

            ctx.record_match(PendingMatch {
                scrutinee: scrut.ty.clone(),
                patterns: arms.iter().map(|arm| arm.pattern.clone()).collect(),
                span,
            });
            let ty = match first {
                Some((ty, _)) => ty,
                None => ctx.fresh_type(),
            };
            let effects = ctx.join_effects(&effects, &Provenance::new(span, Reason::CallEffects))?;
            ctx.record_step(InferRule::Match, "match", &ty, "", span);
            Ok(Typed { ty, effects })
        }

        ExprKind::Annotated {
            expr: inner,
            annotation,
        } => {
            let typed = infer_expr(inner, env, ctx, regs)?;
            let mut scope = AnnotationScope::open();
            let declared =
                resolve_annotation(&annotation.node, &mut scope, regs, ctx, annotation.span)?;
            ctx.record_names(&scope.names());
            ctx.unify(
                &declared,
                &typed.ty,
                &Provenance::new(annotation.span, Reason::TypeAscription),
            )?;
            ctx.record_step(InferRule::Annotation, "ascription", &declared, "", span);
            Ok(Typed {
                ty: declared,
                effects: typed.effects,
            })
        }

        ExprKind::Tuple(elems) => {
            let mut tys = Vec::with_capacity(elems.len());
            let mut effects = Vec::with_capacity(elems.len());
            for elem in elems {
                let typed = infer_expr(elem, env, ctx, regs)?;
                tys.push(typed.ty);
                effects.push(typed.effects);
            }
            let ty = Type::Tuple(tys);
            let effects = ctx.join_effects(&effects, &Provenance::new(span, Reason::CallEffects))?;
            ctx.record_step(InferRule::Tuple, "tuple", &ty, "", span);
            Ok(Typed { ty, effects })
        }
    }
}

fn infer_lambda(
    params: &[Pattern],
    body: &Expr,
    env: &mut TypeEnv,
    ctx: &mut InferenceContext,
    regs: &Registries,
) -> Result<(Vec<Type>, Typed), InferError> {
    let mut param_tys = Vec::with_capacity(params.len());
    for param in params {
        let ty = ctx.fresh_type();
        infer_pattern(param, &ty, env, ctx, regs)?;
        param_tys.push(ty);
    }
    let body = infer_expr(body, env, ctx, regs)?;
    Ok((param_tys, body))
}

fn infer_call(
    func: &Expr,
    args: &[Expr],
    span: Span,
    env: &mut TypeEnv,
    ctx: &mut InferenceContext,
    regs: &Registries,
) -> Result<Typed, InferError> {
    let callee = infer_expr(func, env, ctx, regs)?;
    let mut effects = vec![callee.effects.clone()];
    let mut arg_tys = Vec::with_capacity(args.len());
    for arg in args {
        let typed = infer_expr(arg, env, ctx, regs)?;
        effects.push(typed.effects);
        arg_tys.push((typed.ty, arg.span));
    }

    let ft = match ctx.apply(&callee.ty) {
        Type::Function(ft) => {
            if ft.params.len() != args.len() {
                return Err(InferError::ArityMismatch {
                    what: describe_callee(func),
                    expected: ft.params.len(),
                    actual: args.len(),
                    span,
                });
            }
            ft
        }
        other => {
            let params = (0..args.len()).map(|_| ctx.fresh_type()).collect();
            let ret = ctx.fresh_type();
            let latent = ctx.fresh_effects();
            let ft = FunctionType::with_effects(params, ret, latent);
            ctx.unify(
                &other,
                &Type::Function(ft.clone()),
                &Provenance::new(func.span, Reason::CalledValue),
            )?;
            ft
        }
    };

    for (index, (param, (arg_ty, arg_span))) in ft.params.iter().zip(&arg_tys).enumerate() {
        ctx.unify(
            param,
            arg_ty,
            &Provenance::new(*arg_span, Reason::FunctionArg { param_index: index }),
        )?;
    }
    effects.push(ft.effects.clone());
    let effects = ctx.join_effects(&effects, &Provenance::new(span, Reason::CallEffects))?;
    let ret = *ft.ret;
    ctx.record_step(InferRule::Call, &describe_callee(func), &ret, "", span);
    Ok(Typed { ty: ret, effects })
}

/// Bind the pattern of a `let`, generalizing syntactic values bound to a
/// plain name.
fn bind_let(
    pattern: &Pattern,
    value: &Expr,
    ty: &Type,
    env: &mut TypeEnv,
    ctx: &mut InferenceContext,
    regs: &Registries,
) -> Result<(), InferError> {
    let PatternKind::Var(name) = &pattern.node else {
        return infer_pattern(pattern, ty, env, ctx, regs);
    };
    if !is_generalizable(value) {
        env.bind(name.clone(), TypeScheme::mono(ctx.apply(ty)));
        return Ok(());
    }

    // Obligations over variables only this binding can see move into its
    // scheme. The rest belong to the enclosing definition, and their
    // variables stay monomorphic here.
    let mut fixed = env.free_vars(ctx.substitution());
    let generalized: BTreeSet<TypeVarId> = free_type_vars(&ctx.apply(ty))
        .into_iter()
        .filter(|v| !fixed.types.contains(v))
        .collect();
    let (local, pending): (Vec<Obligation>, Vec<Obligation>) =
        ctx.take_obligations().into_iter().partition(|ob| {
            let vars = free_type_vars(&ctx.apply(&ob.ty));
            !vars.is_empty() && vars.is_subset(&generalized)
        });
    for ob in &pending {
        fixed.types.extend(free_type_vars(&ctx.apply(&ob.ty)));
    }
    ctx.defer_obligations(pending);

    let (scheme, deferred) = generalize(ty, local, ctx.substitution(), &fixed, ctx.names())?;
    ctx.defer_obligations(deferred);
    ctx.record_step(InferRule::LetGen, name, &scheme.ty, "generalize", pattern.span);
    env.bind(name.clone(), scheme);
    Ok(())
}

/// Check a pattern against the type of the value it matches, binding its
/// variables in the innermost scope.
pub fn infer_pattern(
    pattern: &Pattern,
    expected: &Type,
    env: &mut TypeEnv,
    ctx: &mut InferenceContext,
    regs: &Registries,
) -> Result<(), InferError> {
    let span = pattern.span;
    match &pattern.node {
        PatternKind::Wildcard => Ok(()),
        PatternKind::Var(name) => {
            env.bind(name.clone(), TypeScheme::mono(expected.clone()));
            Ok(())
        }
        PatternKind::Lit(lit) => ctx.unify(
            expected,
            &lit_type(lit),
            &Provenance::new(span, Reason::PatternMatch),
        ),
        PatternKind::Constructor { name, args } => {
            let (info, ctor) = regs.sum_types.lookup_constructor(name).ok_or_else(|| {
                InferError::UnknownConstructor {
                    name: name.clone(),
                    span,
                }
            })?;
            if ctor.fields.len() != args.len() {
                return Err(InferError::ArityMismatch {
                    what: format!("constructor `{name}`"),
                    expected: ctor.fields.len(),
                    actual: args.len(),
                    span,
                });
            }
            let mut fresh = Substitution::new();
            for param in &info.params {
                let var = ctx.fresh_type();
                fresh = fresh.with_type(*param, var);
            }
            let fields: Vec<Type> = ctor.fields.iter().map(|f| fresh.apply(f)).collect();
            ctx.unify(
                expected,
                &fresh.apply(&info.result_type()),
                &Provenance::new(span, Reason::PatternMatch),
            )?;
            for (arg, field) in args.iter().zip(&fields) {
                infer_pattern(arg, field, env, ctx, regs)?;
            }
            Ok(())
        }
        PatternKind::Tuple(elems) => {
            let tys: Vec<Type> = elems.iter().map(|_| ctx.fresh_type()).collect();
            ctx.unify(
                expected,
                &Type::Tuple(tys.clone()),
                &Provenance::new(span, Reason::PatternMatch),
            )?;
            for (elem, ty) in elems.iter().zip(&tys) {
                infer_pattern(elem, ty, env, ctx, regs)?;
            }
            Ok(())
        }
    }
}

/// Infer a top-level definition: a function when it has parameters, a
/// value otherwise. Functions evaluate purely; their body's effects become
/// the latent effect of the function type.
pub fn infer_fn_body(
    decl: &FnDecl,
    env: &mut TypeEnv,
    ctx: &mut InferenceContext,
    regs: &Registries,
) -> Result<Typed, InferError> {
    if decl.params.is_empty() {
        return infer_expr(&decl.body, env, ctx, regs);
    }
    env.push_scope();
    let result = infer_lambda(&decl.params, &decl.body, env, ctx, regs);
    env.pop_scope();
    let (params, body) = result?;
    Ok(Typed::pure(Type::function(params, body.ty, body.effects)))
}

// ---------------------------------------------------------------------------
// Checking against a declared signature
// ---------------------------------------------------------------------------

/// Check a definition against a declared scheme.
///
/// The scheme's variables are used directly, without instantiation, and
/// must come out of inference as distinct unconstrained variables: a body
/// that fixes `a` to `Int` is less general than its signature. Residual
/// trait obligations must be covered by `allowed` (the declared `given`
/// clauses). Returns the obligations discharged by implementations.
pub fn check_against_signature(
    decl: &FnDecl,
    declared: &TypeScheme,
    allowed: &[Given],
    env: &mut TypeEnv,
    ctx: &mut InferenceContext,
    regs: &Registries,
) -> Result<Vec<Resolution>, InferError> {
    let span = decl.span;
    let prov = Provenance::new(span, Reason::DeclaredSignature);

    match (&declared.ty, decl.params.is_empty()) {
        (Type::Function(expected), false) => {
            if expected.params.len() != decl.params.len() {
                return Err(InferError::ArityMismatch {
                    what: format!("the signature of `{}`", decl.name.node),
                    expected: expected.params.len(),
                    actual: decl.params.len(),
                    span,
                });
            }
            let typed = infer_fn_body(decl, env, ctx, regs)?;
            let Type::Function(actual) = &typed.ty else {
                ctx.unify(&declared.ty, &typed.ty, &prov)?;
                return Ok(Vec::new());
            };
            for (e, a) in expected.params.iter().zip(&actual.params) {
                ctx.unify(e, a, &prov)?;
            }
            ctx.unify(&expected.ret, &actual.ret, &prov)?;
            ctx.subeffect(&actual.effects, &expected.effects, &prov)?;
        }
        (_, true) => {
            let typed = infer_fn_body(decl, env, ctx, regs)?;
            ctx.unify(&declared.ty, &typed.ty, &prov)?;
            ctx.unify_effects(
                &EffectRow::pure(),
                &typed.effects,
                &Provenance::new(span, Reason::TopLevelValue),
            )?;
        }
        (_, false) => {
            return Err(InferError::ArityMismatch {
                what: format!("the signature of `{}`", decl.name.node),
                expected: 0,
                actual: decl.params.len(),
                span,
            });
        }
    }

    check_rigid(declared, ctx, span)?;

    let obligations = ctx.take_obligations();
    let solved = solve(obligations, ctx.substitution(), &regs.traits)?;

    let allowed: Vec<(String, Type)> = allowed
        .iter()
        .map(|g| (g.trait_name.clone(), ctx.apply(&g.ty)))
        .collect();
    let declared_vars: Vec<TypeVarId> = declared
        .type_vars
        .iter()
        .filter_map(|v| match ctx.apply(&Type::Var(*v)) {
            Type::Var(w) => Some(w),
            _ => None,
        })
        .collect();
    let mut names = VarNames::new();
    for (var, renamed) in declared.type_vars.iter().zip(&declared_vars) {
        if let Some(name) = declared.names.types.get(var) {
            names.types.insert(*renamed, name.clone());
        }
    }

    for ob in &solved.residual {
        if free_type_vars(&ob.ty)
            .iter()
            .any(|v| !declared_vars.contains(v))
        {
            return Err(InferError::AmbiguousTrait {
                trait_name: ob.trait_name.clone(),
                ty: ob.ty.clone(),
                span: ob.provenance.span,
            });
        }
        if !allowed
            .iter()
            .any(|(trait_name, ty)| *trait_name == ob.trait_name && *ty == ob.ty)
        {
            return Err(InferError::MissingGiven {
                requirement: Given::new(ob.trait_name.clone(), ob.ty.clone()).display_with(&names),
                span: ob.provenance.span,
            });
        }
    }
    Ok(solved.resolved)
}

/// Every declared variable must still be a distinct variable.
fn check_rigid(declared: &TypeScheme, ctx: &InferenceContext, span: Span) -> Result<(), InferError> {
    let mut seen_types = Vec::new();
    let mut rigid = true;
    for var in &declared.type_vars {
        match ctx.apply(&Type::Var(*var)) {
            Type::Var(w) if !seen_types.contains(&w) => seen_types.push(w),
            _ => rigid = false,
        }
    }
    let mut seen_effects = Vec::new();
    for var in &declared.effect_vars {
        let row = ctx.apply_effects(&EffectRow::var(*var));
        match row.rest {
            Some(tail) if row.labels.is_empty() && !seen_effects.contains(&tail) => {
                seen_effects.push(tail)
            }
            _ => rigid = false,
        }
    }
    if rigid {
        return Ok(());
    }
    let (declared_text, inferred_text) =
        sanitize_type_pair_display(&declared.ty, &ctx.apply(&declared.ty));
    Err(InferError::SignatureTooGeneral {
        declared: declared_text,
        inferred: inferred_text,
        span,
    })
}
