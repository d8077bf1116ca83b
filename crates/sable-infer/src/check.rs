//! Module checking.
//!
//! Registers declarations (types, effects, traits, impls), then infers
//! every top-level definition:
//!
//! 1. Unannotated definitions are grouped into strongly connected
//!    components by reference and inferred in dependency order. Components
//!    whose dependencies are all done form a wave and may run in parallel.
//! 2. Annotated definitions and impl operations are checked against their
//!    declared signatures, all independently.
//!
//! A failure stays local to its binding: it yields one diagnostic, and
//! definitions referring to it report `DependencyFailed`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sable_ast::{
    DeclKind, EffectDecl, EffectOperation, FnDecl, ImplBlock, Module, Span, Spanned, TraitDef,
    TypeAnnotation, TypeDef, TypeVariant, fn_free_vars,
};
use sable_diag::{Category, Diagnostic};
use sable_types::{EffectRow, Given, Label, Substitution, Type, TypeScheme, free_type_vars};
use serde::Serialize;

use crate::exhaustive::check_exhaustiveness;
use crate::signature::{EnvVars, InferredSignature, generalize, group_by_trait};
use crate::solver::{ImplInfo, Resolution, TraitInfo, TraitMethodInfo, solve};
use crate::trace::{InferStep, UnifyStep};
use crate::typeck::{
    AnnotationScope, ConstructorInfo, EffectInfo, EffectOpInfo, Registries, SumTypeInfo, TypeEnv,
    check_against_signature, impl_head_type, infer_fn_body, resolve_annotation,
};
use crate::{
    FreshVars, InferError, InferenceContext, Obligation, PendingMatch, Provenance, Reason,
    VarPool, VarSupply, span_to_location,
};

/// Library configuration for one check pass.
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Record unification and inference traces per binding.
    pub trace: bool,
    /// Worker threads for independent bindings. `1` checks sequentially.
    pub jobs: usize,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            trace: false,
            jobs: 1,
        }
    }
}

/// Trace of one binding (or recursive binding group).
#[derive(Debug, Clone, Serialize)]
pub struct BindingTrace {
    pub binding: String,
    pub unify: Vec<UnifyStep>,
    pub infer: Vec<InferStep>,
}

/// The result of checking a module.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    /// Signatures of trait operations and successfully checked definitions,
    /// ordered by name.
    pub signatures: Vec<InferredSignature>,
    pub diagnostics: Vec<Diagnostic>,
    /// Bindings that failed, ordered by name.
    pub failed: Vec<String>,
    /// Trait obligations discharged by implementations, per binding.
    pub resolutions: Vec<(String, Resolution)>,
    pub traces: Vec<BindingTrace>,
}

impl CheckReport {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn signature(&self, name: &str) -> Option<&InferredSignature> {
        self.signatures.iter().find(|sig| sig.name == name)
    }

    /// The `--show-types` report: one entry per signature.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for sig in &self.signatures {
            out.push_str(&sig.render());
            out.push('\n');
        }
        out
    }
}

/// Check every declaration of a module.
pub fn check_module(module: &Module, options: &CheckOptions) -> CheckReport {
    let mut checker = ModuleChecker::new(options);
    checker.register_declarations(module);
    checker.infer_components();
    checker.check_declared();
    checker.finish()
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

fn synthetic(name: &str) -> Spanned<String> {
    Spanned::new(name.to_string(), Span::synthetic())
}

/// `type Maybe a = Some a | None`
fn prelude_maybe() -> TypeDef {
    TypeDef {
        name: synthetic("Maybe"),
        params: vec!["a".to_string()],
        variants: vec![
            TypeVariant {
                name: synthetic("Some"),
                fields: vec![TypeAnnotation::Named("a".to_string())],
            },
            TypeVariant {
                name: synthetic("None"),
                fields: Vec::new(),
            },
        ],
    }
}

/// `effect IO with print : String -> Unit`
fn prelude_io() -> EffectDecl {
    EffectDecl {
        name: synthetic("IO"),
        operations: vec![EffectOperation {
            name: synthetic("print"),
            params: vec![TypeAnnotation::Named("String".to_string())],
            return_annotation: TypeAnnotation::Named("Unit".to_string()),
            span: Span::synthetic(),
        }],
    }
}

// ---------------------------------------------------------------------------
// Checker state
// ---------------------------------------------------------------------------

/// A definition checked against a declared scheme: an annotated function
/// or an impl operation.
struct DeclaredTask<'m> {
    label: String,
    decl: &'m FnDecl,
    declared: TypeScheme,
    allowed: Vec<Given>,
    /// Annotated functions appear in the report; impl operations do not.
    reported: bool,
}

/// Result of inferring one component or checking one declared task.
#[derive(Default)]
struct Outcome {
    schemes: Vec<(String, TypeScheme, Span)>,
    failures: Vec<(String, InferError)>,
    warnings: Vec<Diagnostic>,
    resolutions: Vec<(String, Resolution)>,
    trace: Option<BindingTrace>,
}

struct ModuleChecker<'m> {
    options: &'m CheckOptions,
    pool: Arc<VarPool>,
    supply: VarSupply,
    regs: Registries,
    env: TypeEnv,
    diagnostics: Vec<Diagnostic>,
    signatures: Vec<InferredSignature>,
    resolutions: Vec<(String, Resolution)>,
    traces: Vec<BindingTrace>,
    /// Names that must not be used by dependents.
    failed: BTreeSet<String>,
    inferred: Vec<&'m FnDecl>,
    declared: Vec<DeclaredTask<'m>>,
}

impl<'m> ModuleChecker<'m> {
    fn new(options: &'m CheckOptions) -> Self {
        let pool = VarPool::new();
        let supply = pool.supply();
        Self {
            options,
            pool,
            supply,
            regs: Registries::default(),
            env: TypeEnv::new(),
            diagnostics: Vec::new(),
            signatures: Vec::new(),
            resolutions: Vec::new(),
            traces: Vec::new(),
            failed: BTreeSet::new(),
            inferred: Vec::new(),
            declared: Vec::new(),
        }
    }

    fn declaration_error(&mut self, message: String, span: Span) {
        let mut diag = Diagnostic::error(Category::Declaration, message);
        if !span.is_synthetic() {
            diag = diag.at(span_to_location(span));
        }
        self.diagnostics.push(diag);
    }

    fn binding_failed(&mut self, binding: &str, err: &InferError) {
        self.diagnostics.push(err.to_diagnostic(binding));
        self.failed.insert(binding.to_string());
    }

    fn bind_global(&mut self, name: &str, scheme: TypeScheme, span: Span) -> bool {
        if self.env.contains_global(name) {
            self.declaration_error(format!("`{name}` is defined more than once"), span);
            return false;
        }
        self.env.bind_global(name, scheme);
        true
    }

    // -- registration ------------------------------------------------------

    fn register_declarations(&mut self, module: &'m Module) {
        let mut types = Vec::new();
        let mut effects = Vec::new();
        let mut traits = Vec::new();
        let mut impls = Vec::new();
        for decl in &module.declarations {
            match &decl.node {
                DeclKind::TypeDef(def) => types.push(def),
                DeclKind::EffectDecl(def) => effects.push(def),
                DeclKind::TraitDef(def) => traits.push(def),
                DeclKind::ImplBlock(block) => impls.push(block),
                DeclKind::Function(_) => {}
            }
        }

        let maybe = prelude_maybe();
        let io = prelude_io();
        let shadows_maybe = types.iter().any(|def| {
            def.name.node == "Maybe"
                || def
                    .variants
                    .iter()
                    .any(|v| v.name.node == "Some" || v.name.node == "None")
        });
        let mut all_types: Vec<&TypeDef> = Vec::new();
        if !shadows_maybe {
            all_types.push(&maybe);
        }
        all_types.extend(types);
        self.register_type_defs(&all_types);

        let shadows_io = effects.iter().any(|def| def.name.node == "IO");
        if !shadows_io {
            self.register_effect(&io);
        }
        for def in effects {
            self.register_effect(def);
        }

        let trait_names: BTreeSet<&str> = traits.iter().map(|t| t.name.node.as_str()).collect();
        for def in traits {
            self.register_trait(def, &trait_names);
        }
        for block in impls {
            self.register_impl(block);
        }
        for decl in module.functions() {
            self.register_function(decl);
        }
    }

    fn register_type_defs(&mut self, defs: &[&TypeDef]) {
        // Names first, so fields may refer to any declared type.
        let mut accepted = Vec::new();
        for def in defs {
            let name = &def.name.node;
            if self.regs.sum_types.lookup_type(name).is_some()
                || impl_head_type(name, &self.regs.sum_types).is_some()
            {
                self.declaration_error(format!("type `{name}` is defined more than once"), def.name.span);
                continue;
            }
            let params: Vec<(String, _)> = def
                .params
                .iter()
                .map(|p| (p.clone(), self.supply.fresh_type_var()))
                .collect();
            self.regs.sum_types.register(SumTypeInfo {
                name: name.clone(),
                params: params.iter().map(|(_, v)| *v).collect(),
                param_names: def.params.clone(),
                variants: Vec::new(),
                span: def.name.span,
            });
            accepted.push((*def, params));
        }

        for (def, params) in accepted {
            let mut variants: Vec<ConstructorInfo> = Vec::new();
            for variant in &def.variants {
                let ctor = &variant.name.node;
                if self.regs.sum_types.contains_constructor(ctor)
                    || variants.iter().any(|v| v.name == *ctor)
                {
                    self.declaration_error(
                        format!("constructor `{ctor}` is defined more than once"),
                        variant.name.span,
                    );
                    continue;
                }
                let mut scope = AnnotationScope::closed(params.clone());
                let fields: Result<Vec<Type>, InferError> = variant
                    .fields
                    .iter()
                    .map(|f| {
                        resolve_annotation(f, &mut scope, &self.regs, &mut self.supply, variant.name.span)
                    })
                    .collect();
                match fields {
                    Ok(fields) => variants.push(ConstructorInfo {
                        name: ctor.clone(),
                        type_name: def.name.node.clone(),
                        fields,
                        span: variant.name.span,
                    }),
                    Err(err) => {
                        let label = def.name.node.clone();
                        self.binding_failed(&label, &err);
                    }
                }
            }
            let Some(mut info) = self.regs.sum_types.lookup_type(&def.name.node).cloned() else {
                continue;
            };
            info.variants = variants;
            for ctor in &info.variants {
                let scheme = info.constructor_scheme(ctor);
                self.bind_global(&ctor.name, scheme, ctor.span);
            }
            self.regs.sum_types.register(info);
        }
    }

    fn register_effect(&mut self, def: &EffectDecl) {
        let name = &def.name.node;
        if self.regs.effects.contains(name) {
            self.declaration_error(format!("effect `{name}` is defined more than once"), def.name.span);
            return;
        }
        // The label must be known before operation signatures mention it.
        self.regs.effects.register(EffectInfo {
            name: name.clone(),
            operations: Vec::new(),
            span: def.name.span,
        });

        let mut operations = Vec::new();
        for op in &def.operations {
            let mut scope = AnnotationScope::open();
            let resolved = self.resolve_operation(op, &mut scope);
            match resolved {
                Ok((params, ret)) => {
                    let ty = Type::function(
                        params,
                        ret,
                        EffectRow::closed(vec![Label::new(name.clone())]),
                    );
                    let scheme = scope.scheme(ty, Vec::new());
                    if self.bind_global(&op.name.node, scheme.clone(), op.name.span) {
                        operations.push(EffectOpInfo {
                            name: op.name.node.clone(),
                            scheme,
                            span: op.span,
                        });
                    }
                }
                Err(err) => self.binding_failed(&op.name.node, &err),
            }
        }
        self.regs.effects.register(EffectInfo {
            name: name.clone(),
            operations,
            span: def.name.span,
        });
    }

    fn resolve_operation(
        &mut self,
        op: &EffectOperation,
        scope: &mut AnnotationScope,
    ) -> Result<(Vec<Type>, Type), InferError> {
        let params = op
            .params
            .iter()
            .map(|p| resolve_annotation(p, scope, &self.regs, &mut self.supply, op.span))
            .collect::<Result<Vec<_>, _>>()?;
        let ret = resolve_annotation(&op.return_annotation, scope, &self.regs, &mut self.supply, op.span)?;
        Ok((params, ret))
    }

    fn register_trait(&mut self, def: &TraitDef, trait_names: &BTreeSet<&str>) {
        let name = &def.name.node;
        if self.regs.traits.lookup_trait(name).is_some() {
            self.declaration_error(format!("trait `{name}` is defined more than once"), def.name.span);
            return;
        }
        let param_name = &def.type_param.node;
        let param_arity = match trait_param_arity(def) {
            Ok(arity) => arity,
            Err(uses) => {
                self.declaration_error(
                    format!(
                        "trait parameter `{param_name}` of `{name}` is applied to {uses} in different methods"
                    ),
                    def.type_param.span,
                );
                return;
            }
        };
        let param = self.supply.fresh_type_var();

        let mut methods = Vec::new();
        for method in &def.methods {
            let method_name = &method.name.node;
            if methods.iter().any(|m: &TraitMethodInfo| m.name == *method_name) {
                self.declaration_error(
                    format!("`{method_name}` is declared twice in trait `{name}`"),
                    method.name.span,
                );
                continue;
            }
            let mut scope = AnnotationScope::open().with_type_var(param_name, param);
            let ty = match resolve_annotation(
                &method.annotation.node,
                &mut scope,
                &self.regs,
                &mut self.supply,
                method.annotation.span,
            ) {
                Ok(ty) => ty,
                Err(err) => {
                    self.binding_failed(method_name, &err);
                    continue;
                }
            };

            let mut givens = vec![Given::new(name.clone(), Type::Var(param))];
            let mut valid = true;
            for bound in &method.given {
                match self.resolve_bound(bound, &scope, trait_names) {
                    Some(given) => givens.push(given),
                    None => valid = false,
                }
            }
            if !valid {
                continue;
            }

            let scheme = scope.scheme(ty, group_by_trait(givens));
            if self.bind_global(method_name, scheme.clone(), method.name.span) {
                self.signatures.push(InferredSignature::from_scheme(
                    method_name,
                    &scheme,
                    method.span,
                ));
                methods.push(TraitMethodInfo {
                    name: method_name.clone(),
                    scheme,
                    span: method.span,
                });
            }
        }

        self.regs.traits.register_trait(TraitInfo {
            name: name.clone(),
            param,
            param_name: param_name.clone(),
            param_arity,
            methods,
            span: def.name.span,
        });
    }

    /// Resolve a `given Tr v` clause against the variables of a signature.
    fn resolve_bound(
        &mut self,
        bound: &sable_ast::TraitBound,
        scope: &AnnotationScope,
        trait_names: &BTreeSet<&str>,
    ) -> Option<Given> {
        let trait_name = &bound.trait_name.node;
        if !trait_names.contains(trait_name.as_str()) {
            self.declaration_error(
                format!("`given` names unknown trait `{trait_name}`"),
                bound.trait_name.span,
            );
            return None;
        }
        let var_name = &bound.type_var.node;
        match scope.type_var(var_name) {
            Some(var) => Some(Given::new(trait_name.clone(), Type::Var(var))),
            None => {
                self.declaration_error(
                    format!("`given {trait_name} {var_name}` names a variable the signature does not mention"),
                    bound.type_var.span,
                );
                None
            }
        }
    }

    fn register_impl(&mut self, block: &'m ImplBlock) {
        let trait_name = &block.trait_name.node;
        let type_name = &block.type_name.node;
        let Some(info) = self.regs.traits.lookup_trait(trait_name).cloned() else {
            self.declaration_error(
                format!("impl of unknown trait `{trait_name}`"),
                block.trait_name.span,
            );
            return;
        };
        let Some((head, arity)) = impl_head_type(type_name, &self.regs.sum_types) else {
            self.declaration_error(
                format!("impl of `{trait_name}` for unknown type `{type_name}`"),
                block.type_name.span,
            );
            return;
        };
        if self.regs.traits.lookup_impl(trait_name, type_name).is_some() {
            self.declaration_error(
                format!("`{trait_name}` is implemented for `{type_name}` more than once"),
                block.type_name.span,
            );
            return;
        }
        if arity != info.param_arity {
            let mut diag = Diagnostic::error(
                Category::KindMismatch,
                format!(
                    "`{trait_name}` is implemented for types taking {} parameter(s), but `{type_name}` takes {arity}",
                    info.param_arity
                ),
            );
            if !block.type_name.span.is_synthetic() {
                diag = diag.at(span_to_location(block.type_name.span));
            }
            self.diagnostics.push(diag);
            return;
        }

        let mut provided: Vec<&str> = Vec::new();
        for method in &block.methods {
            let method_name = method.name.node.as_str();
            if provided.contains(&method_name) {
                self.declaration_error(
                    format!("`{method_name}` is defined twice in `impl {trait_name} {type_name}`"),
                    method.name.span,
                );
                continue;
            }
            provided.push(method_name);
            let Some(required) = info.method(method_name) else {
                self.declaration_error(
                    format!("`{method_name}` is not an operation of trait `{trait_name}`"),
                    method.name.span,
                );
                continue;
            };
            let (declared, allowed) = specialize_method(&required.scheme, &info, &head);
            self.declared.push(DeclaredTask {
                label: block.method_label(method_name),
                decl: method,
                declared,
                allowed,
                reported: false,
            });
        }
        for required in &info.methods {
            if !provided.contains(&required.name.as_str()) {
                self.declaration_error(
                    format!(
                        "`impl {trait_name} {type_name}` is missing operation `{}`",
                        required.name
                    ),
                    block.type_name.span,
                );
            }
        }

        self.regs.traits.register_impl(ImplInfo {
            trait_name: trait_name.clone(),
            type_name: type_name.clone(),
            methods: provided.iter().map(|m| m.to_string()).collect(),
            span: block.type_name.span,
        });
    }

    fn register_function(&mut self, decl: &'m FnDecl) {
        let name = &decl.name.node;
        let Some(annotation) = &decl.annotation else {
            if self.env.contains_global(name) || self.inferred.iter().any(|f| f.name.node == *name) {
                self.declaration_error(format!("`{name}` is defined more than once"), decl.name.span);
            } else {
                self.inferred.push(decl);
            }
            return;
        };
        if self.inferred.iter().any(|f| f.name.node == *name) {
            self.declaration_error(format!("`{name}` is defined more than once"), decl.name.span);
            return;
        }

        let mut scope = AnnotationScope::open();
        let ty = match resolve_annotation(
            &annotation.node,
            &mut scope,
            &self.regs,
            &mut self.supply,
            annotation.span,
        ) {
            Ok(ty) => ty,
            Err(err) => {
                self.binding_failed(name, &err);
                return;
            }
        };
        let trait_names: Vec<String> = self.regs.traits.traits().map(|t| t.name.clone()).collect();
        let trait_names: BTreeSet<&str> = trait_names.iter().map(String::as_str).collect();
        let mut givens = Vec::new();
        for bound in &decl.given {
            match self.resolve_bound(bound, &scope, &trait_names) {
                Some(given) => givens.push(given),
                None => {
                    self.failed.insert(name.clone());
                    return;
                }
            }
        }
        let declared = scope.scheme(ty, group_by_trait(givens));
        if !self.bind_global(name, declared.clone(), decl.name.span) {
            return;
        }
        self.declared.push(DeclaredTask {
            label: name.clone(),
            decl,
            allowed: declared.givens.clone(),
            declared,
            reported: true,
        });
    }

    // -- inference ---------------------------------------------------------

    fn infer_components(&mut self) {
        let fns = std::mem::take(&mut self.inferred);
        let index: BTreeMap<&str, usize> = fns
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.node.as_str(), i))
            .collect();
        let refs: Vec<BTreeSet<String>> = fns
            .iter()
            .map(|f| fn_free_vars(f).into_iter().collect())
            .collect();
        let deps: Vec<Vec<usize>> = refs
            .iter()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| index.get(n.as_str()).copied())
                    .collect()
            })
            .collect();

        for wave in dependency_waves(&deps) {
            let mut runnable: Vec<Vec<usize>> = Vec::new();
            for component in wave {
                let failed_dep = component
                    .iter()
                    .flat_map(|&m| refs[m].iter())
                    .find(|name| self.failed.contains(*name))
                    .cloned();
                match failed_dep {
                    Some(dependency) => {
                        for &m in &component {
                            let err = InferError::DependencyFailed {
                                dependency: dependency.clone(),
                                span: fns[m].name.span,
                            };
                            self.binding_failed(&fns[m].name.node, &err);
                        }
                    }
                    None => runnable.push(component),
                }
            }

            let env = &self.env;
            let regs = &self.regs;
            let pool = &self.pool;
            let options = self.options;
            let outcomes = run_parallel(&runnable, options.jobs, |component| {
                let members: Vec<&FnDecl> = component.iter().map(|&m| fns[m]).collect();
                infer_component(&members, env, regs, pool, options)
            });
            for outcome in outcomes {
                self.absorb(outcome, true);
            }
        }
    }

    fn check_declared(&mut self) {
        let tasks = std::mem::take(&mut self.declared);
        let mut runnable = Vec::new();
        for task in tasks {
            let failed_dep = fn_free_vars(task.decl)
                .into_iter()
                .filter(|name| self.failed.contains(name))
                .min();
            match failed_dep {
                Some(dependency) => {
                    let err = InferError::DependencyFailed {
                        dependency,
                        span: task.decl.name.span,
                    };
                    self.binding_failed(&task.label, &err);
                }
                None => runnable.push(task),
            }
        }

        let env = &self.env;
        let regs = &self.regs;
        let pool = &self.pool;
        let options = self.options;
        let outcomes = run_parallel(&runnable, options.jobs, |task| {
            check_declared_task(task, env, regs, pool, options)
        });
        for outcome in outcomes {
            self.absorb(outcome, false);
        }
    }

    fn absorb(&mut self, outcome: Outcome, bind: bool) {
        for (name, scheme, span) in outcome.schemes {
            self.signatures
                .push(InferredSignature::from_scheme(&name, &scheme, span));
            if bind {
                self.env.bind_global(name, scheme);
            }
        }
        for (name, err) in &outcome.failures {
            self.binding_failed(name, err);
        }
        self.diagnostics.extend(outcome.warnings);
        self.resolutions.extend(outcome.resolutions);
        self.traces.extend(outcome.trace);
    }

    fn finish(mut self) -> CheckReport {
        self.signatures.sort_by(|a, b| a.name.cmp(&b.name));
        CheckReport {
            signatures: self.signatures,
            diagnostics: self.diagnostics,
            failed: self.failed.into_iter().collect(),
            resolutions: self.resolutions,
            traces: self.traces,
        }
    }
}

/// The kind a trait's parameter is used at: how many arguments it is
/// applied to in the method signatures. Mixed uses are an error, reported
/// with the arities seen.
fn trait_param_arity(def: &TraitDef) -> Result<usize, String> {
    fn visit(ann: &TypeAnnotation, param: &str, seen: &mut BTreeSet<usize>) {
        match ann {
            TypeAnnotation::Named(name) if name == param => {
                seen.insert(0);
            }
            TypeAnnotation::Named(_) => {}
            TypeAnnotation::Applied(name, args) => {
                if name == param {
                    seen.insert(args.len());
                }
                for arg in args {
                    visit(arg, param, seen);
                }
            }
            TypeAnnotation::Function { params, ret, .. } => {
                for p in params {
                    visit(p, param, seen);
                }
                visit(ret, param, seen);
            }
            TypeAnnotation::Tuple(elems) => {
                for e in elems {
                    visit(e, param, seen);
                }
            }
        }
    }
    let mut seen = BTreeSet::new();
    for method in &def.methods {
        visit(&method.annotation.node, &def.type_param.node, &mut seen);
    }
    match seen.len() {
        0 => Ok(0),
        1 => Ok(seen.into_iter().next().unwrap_or(0)),
        _ => Err(seen
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(" and ")
            + " arguments"),
    }
}

/// A trait method's scheme with the trait parameter fixed to an impl head.
///
/// Givens on the (now concrete) head are the impl itself and are dropped;
/// the remaining ones are what the operation body may assume.
fn specialize_method(scheme: &TypeScheme, info: &TraitInfo, head: &Type) -> (TypeScheme, Vec<Given>) {
    let fixed = Substitution::new().with_type(info.param, head.clone());
    let givens: Vec<Given> = scheme
        .givens
        .iter()
        .map(|g| Given::new(g.trait_name.clone(), fixed.apply(&g.ty)))
        .filter(|g| g.ty.head_var().is_some())
        .collect();
    let mut names = scheme.names.clone();
    names.types.remove(&info.param);
    let declared = TypeScheme {
        type_vars: scheme
            .type_vars
            .iter()
            .copied()
            .filter(|v| *v != info.param)
            .collect(),
        effect_vars: scheme.effect_vars.clone(),
        givens: givens.clone(),
        names,
        ty: fixed.apply(&scheme.ty),
    };
    (declared, givens)
}

/// Tarjan's strongly connected components, dependencies first, grouped into
/// waves whose components only depend on earlier waves.
fn dependency_waves(deps: &[Vec<usize>]) -> Vec<Vec<Vec<usize>>> {
    struct Tarjan<'a> {
        deps: &'a [Vec<usize>],
        index: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next: usize,
        components: Vec<Vec<usize>>,
    }

    impl Tarjan<'_> {
        fn enter(&mut self, v: usize) {
            self.index[v] = Some(self.next);
            self.lowlink[v] = self.next;
            self.next += 1;
            self.stack.push(v);
            self.on_stack[v] = true;
        }

        /// Depth-first from `root` over an explicit stack of (vertex, next edge).
        fn visit(&mut self, root: usize) {
            self.enter(root);
            let mut work = vec![(root, 0)];
            while let Some((v, edge)) = work.pop() {
                if let Some(&w) = self.deps[v].get(edge) {
                    work.push((v, edge + 1));
                    match self.index[w] {
                        None => {
                            self.enter(w);
                            work.push((w, 0));
                        }
                        Some(index) if self.on_stack[w] => {
                            self.lowlink[v] = self.lowlink[v].min(index);
                        }
                        Some(_) => {}
                    }
                    continue;
                }

                if Some(self.lowlink[v]) == self.index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = self.stack.pop() {
                        self.on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    component.sort_unstable();
                    self.components.push(component);
                }
                if let Some(&(parent, _)) = work.last() {
                    self.lowlink[parent] = self.lowlink[parent].min(self.lowlink[v]);
                }
            }
        }
    }

    let n = deps.len();
    let mut tarjan = Tarjan {
        deps,
        index: vec![None; n],
        lowlink: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next: 0,
        components: Vec::new(),
    };
    for v in 0..n {
        if tarjan.index[v].is_none() {
            tarjan.visit(v);
        }
    }

    let mut component_of = vec![0; n];
    for (c, component) in tarjan.components.iter().enumerate() {
        for &v in component {
            component_of[v] = c;
        }
    }
    let mut level = vec![0usize; tarjan.components.len()];
    for (c, component) in tarjan.components.iter().enumerate() {
        level[c] = component
            .iter()
            .flat_map(|&v| deps[v].iter())
            .map(|&w| component_of[w])
            .filter(|&d| d != c)
            .map(|d| level[d] + 1)
            .max()
            .unwrap_or(0);
    }

    let mut waves: Vec<Vec<Vec<usize>>> = Vec::new();
    for (c, component) in tarjan.components.into_iter().enumerate() {
        if waves.len() <= level[c] {
            waves.resize_with(level[c] + 1, Vec::new);
        }
        waves[level[c]].push(component);
    }
    for wave in &mut waves {
        wave.sort_by_key(|component| component[0]);
    }
    waves
}

/// Run `work` over `items` on up to `jobs` scoped threads, returning the
/// results in item order.
fn run_parallel<T: Sync, R: Send>(
    items: &[T],
    jobs: usize,
    work: impl Fn(&T) -> R + Sync,
) -> Vec<R> {
    if jobs <= 1 || items.len() <= 1 {
        return items.iter().map(work).collect();
    }
    let next = AtomicUsize::new(0);
    let mut results: Vec<(usize, R)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..jobs.min(items.len()))
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();
                    loop {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        let Some(item) = items.get(i) else {
                            break;
                        };
                        done.push((i, work(item)));
                    }
                    done
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
            })
            .collect()
    });
    results.sort_by_key(|(i, _)| *i);
    results.into_iter().map(|(_, r)| r).collect()
}

fn new_context(pool: &Arc<VarPool>, options: &CheckOptions) -> InferenceContext {
    let mut ctx = InferenceContext::new(pool.supply());
    if options.trace {
        ctx.enable_tracing();
    }
    ctx
}

fn take_trace(ctx: &mut InferenceContext, binding: String) -> Option<BindingTrace> {
    if !ctx.is_tracing() {
        return None;
    }
    let (unify, infer) = ctx.take_traces();
    Some(BindingTrace {
        binding,
        unify,
        infer,
    })
}

fn exhaustiveness_warnings(
    binding: &str,
    matches: Vec<PendingMatch>,
    ctx: &InferenceContext,
    regs: &Registries,
) -> Vec<Diagnostic> {
    let mut warnings = Vec::new();
    for pending in matches {
        let patterns: Vec<&sable_ast::Pattern> = pending.patterns.iter().collect();
        let missing = check_exhaustiveness(&ctx.apply(&pending.scrutinee), &patterns, &regs.sum_types);
        if missing.is_empty() {
            continue;
        }
        let listed: Vec<String> = missing.iter().map(|m| format!("`{m}`")).collect();
        let mut diag = Diagnostic::warning(
            Category::NonExhaustive,
            format!("non-exhaustive match: missing {}", listed.join(", ")),
        )
        .in_binding(binding)
        .with_help(Category::NonExhaustive.example_fix());
        if !pending.span.is_synthetic() {
            diag = diag.at(span_to_location(pending.span));
        }
        warnings.push(diag);
    }
    warnings
}

/// Infer one strongly connected component of unannotated definitions.
///
/// Members are monomorphic within the component and generalized together
/// once every body is inferred.
fn infer_component(
    members: &[&FnDecl],
    env: &TypeEnv,
    regs: &Registries,
    pool: &Arc<VarPool>,
    options: &CheckOptions,
) -> Outcome {
    let mut ctx = new_context(pool, options);
    let mut env = env.clone();
    env.push_scope();
    let mono: Vec<Type> = members.iter().map(|_| ctx.fresh_type()).collect();
    for (decl, ty) in members.iter().zip(&mono) {
        env.bind(decl.name.node.clone(), TypeScheme::mono(ty.clone()));
    }

    let label = members
        .iter()
        .map(|m| m.name.node.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let result = infer_members(members, &mono, &mut env, &mut ctx, regs);
    let mut outcome = Outcome::default();
    match result {
        Ok(done) => {
            outcome.schemes = done.schemes;
            outcome.warnings = done.warnings;
            outcome.resolutions = done.resolutions;
        }
        Err((k, err)) => {
            let culprit = members[k].name.node.clone();
            for (j, member) in members.iter().enumerate() {
                if j == k {
                    continue;
                }
                outcome.failures.push((
                    member.name.node.clone(),
                    InferError::DependencyFailed {
                        dependency: culprit.clone(),
                        span: member.name.span,
                    },
                ));
            }
            outcome.failures.insert(0, (culprit, err));
        }
    }
    outcome.trace = take_trace(&mut ctx, label);
    outcome
}

struct Inferred {
    schemes: Vec<(String, TypeScheme, Span)>,
    warnings: Vec<Diagnostic>,
    resolutions: Vec<(String, Resolution)>,
}

fn infer_members(
    members: &[&FnDecl],
    mono: &[Type],
    env: &mut TypeEnv,
    ctx: &mut InferenceContext,
    regs: &Registries,
) -> Result<Inferred, (usize, InferError)> {
    let mut owned: Vec<Vec<Obligation>> = Vec::with_capacity(members.len());
    let mut matches = Vec::with_capacity(members.len());
    for (k, decl) in members.iter().enumerate() {
        infer_member(decl, &mono[k], env, ctx, regs).map_err(|err| (k, err))?;
        owned.push(ctx.take_obligations());
        matches.push(ctx.take_matches());
    }

    let mut inferred = Inferred {
        schemes: Vec::new(),
        warnings: Vec::new(),
        resolutions: Vec::new(),
    };
    let mut residual = Vec::with_capacity(members.len());
    for (k, obligations) in owned.into_iter().enumerate() {
        let solved = solve(obligations, ctx.substitution(), &regs.traits).map_err(|err| (k, err))?;
        let name = &members[k].name.node;
        inferred
            .resolutions
            .extend(solved.resolved.into_iter().map(|r| (name.clone(), r)));
        residual.push(solved.residual);
    }

    for (k, decl) in members.iter().enumerate() {
        let ty_vars = free_type_vars(&ctx.apply(&mono[k]));
        let mut relevant = residual[k].clone();
        for (j, others) in residual.iter().enumerate() {
            if j == k {
                continue;
            }
            relevant.extend(
                others
                    .iter()
                    .filter(|ob| free_type_vars(&ob.ty).is_subset(&ty_vars))
                    .cloned(),
            );
        }
        let (scheme, _) = generalize(
            &mono[k],
            relevant,
            ctx.substitution(),
            &EnvVars::default(),
            ctx.names(),
        )
        .map_err(|err| (k, err))?;
        inferred
            .schemes
            .push((decl.name.node.clone(), scheme, decl.span));
    }

    for (decl, pending) in members.iter().zip(matches) {
        inferred
            .warnings
            .extend(exhaustiveness_warnings(&decl.name.node, pending, ctx, regs));
    }
    Ok(inferred)
}

fn infer_member(
    decl: &FnDecl,
    mono: &Type,
    env: &mut TypeEnv,
    ctx: &mut InferenceContext,
    regs: &Registries,
) -> Result<(), InferError> {
    let typed = infer_fn_body(decl, env, ctx, regs)?;
    if decl.params.is_empty() {
        ctx.unify_effects(
            &EffectRow::pure(),
            &typed.effects,
            &Provenance::new(decl.body.span, Reason::TopLevelValue),
        )?;
    }
    ctx.unify(
        mono,
        &typed.ty,
        &Provenance::new(decl.span, Reason::Recursion),
    )
}

fn check_declared_task(
    task: &DeclaredTask<'_>,
    env: &TypeEnv,
    regs: &Registries,
    pool: &Arc<VarPool>,
    options: &CheckOptions,
) -> Outcome {
    let mut ctx = new_context(pool, options);
    let mut env = env.clone();
    let mut outcome = Outcome::default();
    match check_against_signature(task.decl, &task.declared, &task.allowed, &mut env, &mut ctx, regs) {
        Ok(resolved) => {
            if task.reported {
                outcome
                    .schemes
                    .push((task.label.clone(), task.declared.clone(), task.decl.span));
            }
            outcome.resolutions = resolved
                .into_iter()
                .map(|r| (task.label.clone(), r))
                .collect();
            let matches = ctx.take_matches();
            outcome.warnings = exhaustiveness_warnings(&task.label, matches, &ctx, regs);
        }
        Err(err) => outcome.failures.push((task.label.clone(), err)),
    }
    outcome.trace = take_trace(&mut ctx, task.label.clone());
    outcome
}
