//! HM type inference with traits and effect rows for Sable.
//!
//! This crate implements:
//! - Hindley-Milner inference over multi-parameter, effect-carrying functions
//! - Rémy-style effect row unification (`pure`, `can IO`, `can c`)
//! - Trait obligations resolved against a (trait, constructor) registry, with
//!   the unresolvable ones generalized into `given` clauses
//! - Deterministic signature rendering
//!
//! Constraints carry provenance so that a failed unification can point at
//! the source location and explain why the constraint was generated.

pub mod check;
pub mod error;
pub mod exhaustive;
pub mod signature;
pub mod solver;
pub mod trace;
pub mod typeck;
pub mod unify;

#[cfg(test)]
mod typeck_tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use sable_ast::Span;
use sable_types::{
    EffectRow, EffectVarId, FunctionType, Substitution, Type, TypeVarId, VarNames,
    sanitize_type_display,
};

use crate::trace::{InferRule, InferStep, UnifyStep};

// Re-export for convenience.
pub use check::{BindingTrace, CheckOptions, CheckReport, check_module};
pub use error::InferError;
pub use sable_diag::{Category, Diagnostic, DiagnosticError, SourceLocation};
pub use sable_types::TypeScheme;
pub use signature::InferredSignature;
pub use unify::{Unifier, UnifyError};

// ---------------------------------------------------------------------------
// Fresh variables
// ---------------------------------------------------------------------------

/// Each supply requests `VAR_BLOCK_SIZE` ids at a time so that the atomic
/// increment happens once per block rather than once per variable.
const VAR_BLOCK_SIZE: u32 = 1024;

fn alloc_var_block(counter: &AtomicU32) -> u32 {
    counter.fetch_add(VAR_BLOCK_SIZE, Ordering::Relaxed)
}

/// Shared counters for type and effect variable ids within one check pass.
///
/// Every inference draws its ids from a [`VarSupply`] backed by the same
/// pool, so no two bindings ever produce the same `TypeVarId` or
/// `EffectVarId`, even when they are inferred on different threads. This
/// keeps schemes from one binding from colliding with the variables of
/// another when both meet in a shared environment.
#[derive(Debug, Default)]
pub struct VarPool {
    next_type_var: AtomicU32,
    next_effect_var: AtomicU32,
}

impl VarPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A supply that allocates blocks from this pool on demand.
    pub fn supply(self: &Arc<Self>) -> VarSupply {
        VarSupply {
            pool: Some(Arc::clone(self)),
            next_type: 0,
            type_end: 0,
            next_effect: 0,
            effect_end: 0,
        }
    }
}

/// Source of fresh variables.
pub trait FreshVars {
    fn fresh_type_var(&mut self) -> TypeVarId;
    fn fresh_effect_var(&mut self) -> EffectVarId;
}

/// Hands out fresh variable ids, either from a [`VarPool`] or from a
/// private counter.
#[derive(Debug)]
pub struct VarSupply {
    pool: Option<Arc<VarPool>>,
    next_type: u32,
    type_end: u32,
    next_effect: u32,
    effect_end: u32,
}

impl VarSupply {
    /// A standalone supply counting up from the given offsets.
    pub fn with_offsets(type_offset: u32, effect_offset: u32) -> Self {
        Self {
            pool: None,
            next_type: type_offset,
            type_end: u32::MAX,
            next_effect: effect_offset,
            effect_end: u32::MAX,
        }
    }
}

impl Default for VarSupply {
    fn default() -> Self {
        Self::with_offsets(0, 0)
    }
}

impl FreshVars for VarSupply {
    fn fresh_type_var(&mut self) -> TypeVarId {
        if self.next_type == self.type_end
            && let Some(pool) = &self.pool
        {
            self.next_type = alloc_var_block(&pool.next_type_var);
            self.type_end = self.next_type + VAR_BLOCK_SIZE;
        }
        let id = self.next_type;
        self.next_type += 1;
        TypeVarId(id)
    }

    fn fresh_effect_var(&mut self) -> EffectVarId {
        if self.next_effect == self.effect_end
            && let Some(pool) = &self.pool
        {
            self.next_effect = alloc_var_block(&pool.next_effect_var);
            self.effect_end = self.next_effect + VAR_BLOCK_SIZE;
        }
        let id = self.next_effect;
        self.next_effect += 1;
        EffectVarId(id)
    }
}

// ---------------------------------------------------------------------------
// Provenance: why a constraint exists
// ---------------------------------------------------------------------------

/// Tracks the origin of a type constraint for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub span: Span,
    pub reason: Reason,
}

impl Provenance {
    pub fn new(span: Span, reason: Reason) -> Self {
        Self { span, reason }
    }
}

/// Why a type constraint was generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// Argument at position `param_index` of a call.
    FunctionArg { param_index: usize },
    /// The callee of a call must be a function.
    CalledValue,
    /// The effects of a call must fit the surrounding computation.
    CallEffects,
    IfCondition,
    IfBranches,
    MatchArms,
    /// A pattern must fit the type of the value it matches.
    PatternMatch,
    TypeAscription,
    LetAnnotation,
    /// A definition must match its declared signature.
    DeclaredSignature,
    /// A top-level value must evaluate without effects.
    TopLevelValue,
    /// A recursive reference to a definition being inferred.
    Recursion,
    /// Instantiating a scheme copies its `given` clauses.
    TraitBound { trait_name: String },
}

// ---------------------------------------------------------------------------
// Trait obligations
// ---------------------------------------------------------------------------

/// A deferred trait obligation: `ty` must implement `trait_name`.
///
/// Obligations are collected during inference and handed to the solver
/// once the binding (or binding group) is fully inferred.
#[derive(Debug, Clone, PartialEq)]
pub struct Obligation {
    pub trait_name: String,
    pub ty: Type,
    pub provenance: Provenance,
}

/// A match expression recorded for the exhaustiveness pass.
#[derive(Debug, Clone)]
pub struct PendingMatch {
    pub scrutinee: Type,
    pub patterns: Vec<sable_ast::Pattern>,
    pub span: Span,
}

// ---------------------------------------------------------------------------
// InferenceContext
// ---------------------------------------------------------------------------

/// Inference state for one binding or binding group.
///
/// Owns the unifier (and with it the fresh-variable supply), the current
/// substitution, collected trait obligations and declared variable names.
/// Delegates fresh variable generation to the owned `Unifier`.
#[derive(Debug)]
pub struct InferenceContext {
    unifier: Unifier,
    substitution: Substitution,
    obligations: Vec<Obligation>,
    /// Names declared by annotations for the variables created from them.
    names: VarNames,
    matches: Vec<PendingMatch>,
    infer_trace: Option<Vec<InferStep>>,
}

impl InferenceContext {
    pub fn new(supply: VarSupply) -> Self {
        Self {
            unifier: Unifier::new(supply),
            substitution: Substitution::new(),
            obligations: Vec::new(),
            names: VarNames::new(),
            matches: Vec::new(),
            infer_trace: None,
        }
    }

    /// Enable step-by-step unification and inference tracing.
    pub fn enable_tracing(&mut self) {
        self.unifier.enable_tracing();
        self.infer_trace = Some(Vec::new());
    }

    pub fn is_tracing(&self) -> bool {
        self.unifier.is_tracing()
    }

    pub fn unify_trace(&self) -> &[UnifyStep] {
        self.unifier.unify_trace()
    }

    /// Drain both traces recorded so far.
    pub fn take_traces(&mut self) -> (Vec<UnifyStep>, Vec<InferStep>) {
        let unify = self.unifier.take_unify_trace();
        let infer = self.infer_trace.as_mut().map(std::mem::take).unwrap_or_default();
        (unify, infer)
    }

    pub fn fresh_type(&mut self) -> Type {
        Type::Var(self.fresh_type_var())
    }

    /// A fresh, open, empty effect row: `can e`.
    pub fn fresh_effects(&mut self) -> EffectRow {
        EffectRow::var(self.fresh_effect_var())
    }

    pub fn substitution(&self) -> &Substitution {
        &self.substitution
    }

    pub fn apply(&self, ty: &Type) -> Type {
        self.substitution.apply(ty)
    }

    pub fn apply_effects(&self, row: &EffectRow) -> EffectRow {
        self.substitution.apply_effects(row)
    }

    /// Unify two types, recording the binding or reporting the conflict
    /// against the types as they stood before this step.
    pub fn unify(
        &mut self,
        expected: &Type,
        actual: &Type,
        provenance: &Provenance,
    ) -> Result<(), InferError> {
        match self.unifier.unify(expected, actual, &self.substitution) {
            Ok(next) => {
                self.substitution = next;
                Ok(())
            }
            Err(err) => Err(self.type_failure(err, expected, actual, provenance)),
        }
    }

    pub fn unify_effects(
        &mut self,
        expected: &EffectRow,
        actual: &EffectRow,
        provenance: &Provenance,
    ) -> Result<(), InferError> {
        match self
            .unifier
            .unify_effects(expected, actual, &self.substitution)
        {
            Ok(next) => {
                self.substitution = next;
                Ok(())
            }
            Err(_) => Err(InferError::EffectMismatch {
                expected: self.apply_effects(expected),
                actual: self.apply_effects(actual),
                reason: provenance.reason.clone(),
                span: provenance.span,
            }),
        }
    }

    /// Require every effect of `sub` to be allowed by `sup`.
    ///
    /// A closed `sub` is opened with a fresh tail first, so `pure` fits
    /// any row and `can IO` fits any row containing `IO`.
    pub fn subeffect(
        &mut self,
        sub: &EffectRow,
        sup: &EffectRow,
        provenance: &Provenance,
    ) -> Result<(), InferError> {
        let sub = self.apply_effects(sub);
        let sub = if sub.is_closed() {
            EffectRow::open(sub.labels, self.fresh_effect_var())
        } else {
            sub
        };
        self.unify_effects(sup, &sub, provenance)
    }

    /// The smallest row containing all of `rows`.
    pub fn join_effects(
        &mut self,
        rows: &[EffectRow],
        provenance: &Provenance,
    ) -> Result<EffectRow, InferError> {
        let rows: Vec<EffectRow> = rows
            .iter()
            .map(|row| self.apply_effects(row))
            .filter(|row| !row.is_pure())
            .collect();
        match rows.as_slice() {
            [] => Ok(EffectRow::pure()),
            [single] => Ok(single.clone()),
            _ => {
                let joined = self.fresh_effects();
                for row in &rows {
                    self.subeffect(row, &joined, provenance)?;
                }
                Ok(self.apply_effects(&joined))
            }
        }
    }

    /// Record that `ty` must implement `trait_name`.
    pub fn constrain_trait(&mut self, ty: Type, trait_name: &str, provenance: Provenance) {
        self.obligations.push(Obligation {
            trait_name: trait_name.to_string(),
            ty,
            provenance,
        });
    }

    pub fn obligations(&self) -> &[Obligation] {
        &self.obligations
    }

    pub fn take_obligations(&mut self) -> Vec<Obligation> {
        std::mem::take(&mut self.obligations)
    }

    /// Hand obligations back to the enclosing definition.
    pub fn defer_obligations(&mut self, obligations: Vec<Obligation>) {
        self.obligations.extend(obligations);
    }

    /// Instantiate a scheme with fresh variables.
    ///
    /// The scheme's `given` clauses become new obligations on the fresh
    /// variables. A polymorphic function whose outermost effect row is
    /// closed gets a fresh tail, so a `pure` function may be used wherever
    /// some effect is allowed.
    pub fn instantiate(&mut self, scheme: &TypeScheme, span: Span) -> Type {
        if scheme.is_mono() && scheme.givens.is_empty() {
            return scheme.ty.clone();
        }
        let mut fresh = Substitution::new();
        for var in &scheme.type_vars {
            let ty = self.fresh_type();
            fresh = fresh.with_type(*var, ty);
        }
        for var in &scheme.effect_vars {
            let row = self.fresh_effects();
            fresh = fresh.with_effect(*var, row);
        }
        for given in &scheme.givens {
            let reason = Reason::TraitBound {
                trait_name: given.trait_name.clone(),
            };
            self.constrain_trait(
                fresh.apply(&given.ty),
                &given.trait_name,
                Provenance::new(span, reason),
            );
        }
        match fresh.apply(&scheme.ty) {
            Type::Function(ft) if ft.effects.is_closed() => {
                let tail = self.fresh_effect_var();
                Type::Function(FunctionType {
                    effects: EffectRow::open(ft.effects.labels, tail),
                    ..ft
                })
            }
            ty => ty,
        }
    }

    /// Remember the declared names of the variables an ascription
    /// introduced, so generalization can print them.
    pub fn record_names(&mut self, names: &VarNames) {
        for (var, name) in &names.types {
            self.names.types.entry(*var).or_insert_with(|| name.clone());
        }
        for (var, name) in &names.effects {
            self.names.effects.entry(*var).or_insert_with(|| name.clone());
        }
    }

    pub fn names(&self) -> &VarNames {
        &self.names
    }

    pub fn record_match(&mut self, pending: PendingMatch) {
        self.matches.push(pending);
    }

    pub fn take_matches(&mut self) -> Vec<PendingMatch> {
        std::mem::take(&mut self.matches)
    }

    /// Append an inference step when tracing is on.
    pub fn record_step(&mut self, rule: InferRule, expr: &str, ty: &Type, detail: &str, span: Span) {
        let Some(trace) = self.infer_trace.as_mut() else {
            return;
        };
        let resolved = self.substitution.apply(ty);
        trace.push(InferStep {
            expr: expr.to_string(),
            ty: sanitize_type_display(&resolved),
            rule,
            detail: detail.to_string(),
            span: (!span.is_synthetic()).then_some((span.start, span.end)),
        });
    }

    fn type_failure(
        &self,
        err: UnifyError,
        expected: &Type,
        actual: &Type,
        provenance: &Provenance,
    ) -> InferError {
        match err {
            UnifyError::OccursCheck { var, ty } => InferError::OccursCheck {
                var,
                ty,
                span: provenance.span,
            },
            other => {
                let expected = self.apply(expected);
                let actual = self.apply(actual);
                let top_level = matches!(
                    &other,
                    UnifyError::TypeMismatch { expected: e, actual: a } if *e == expected && *a == actual
                );
                InferError::TypeMismatch {
                    expected,
                    actual,
                    reason: provenance.reason.clone(),
                    span: provenance.span,
                    detail: (!top_level).then(|| other.to_string()),
                }
            }
        }
    }
}

impl FreshVars for InferenceContext {
    fn fresh_type_var(&mut self) -> TypeVarId {
        self.unifier.fresh_type_var()
    }

    fn fresh_effect_var(&mut self) -> EffectVarId {
        self.unifier.fresh_effect_var()
    }
}

/// Convert an AST span to a diagnostic location.
pub fn span_to_location(span: Span) -> SourceLocation {
    SourceLocation {
        file_id: span.file.0,
        start: span.start,
        end: span.end,
    }
}
