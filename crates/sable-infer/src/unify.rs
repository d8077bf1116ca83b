//! Structural unification over types and effect rows.
//!
//! The unifier never mutates a substitution: every successful step returns
//! a new [`Substitution`] and the caller decides whether to keep it. This
//! makes failed unifications free to discard, since the previous
//! substitution is untouched.

use sable_types::{
    EffectRow, Label, Substitution, Type, TypeVarId, occurs, sanitize_effect_pair_display,
    sanitize_type_display, sanitize_type_pair_display,
};

use crate::trace::{UnifyAction, UnifyStep};
use crate::{FreshVars, VarSupply};

/// Why two types could not be unified.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UnifyError {
    #[error("{}", mismatch_detail(.expected, .actual))]
    TypeMismatch { expected: Type, actual: Type },
    #[error("{}", effect_detail(.expected, .actual))]
    EffectMismatch {
        expected: EffectRow,
        actual: EffectRow,
    },
    #[error("`{}` occurs in `{}`", sanitize_type_display(&Type::Var(*.var)), sanitize_type_display(.ty))]
    OccursCheck { var: TypeVarId, ty: Type },
}

fn mismatch_detail(expected: &Type, actual: &Type) -> String {
    let (expected, actual) = sanitize_type_pair_display(expected, actual);
    format!("`{expected}` is not compatible with `{actual}`")
}

fn effect_detail(expected: &EffectRow, actual: &EffectRow) -> String {
    let (expected, actual) = sanitize_effect_pair_display(expected, actual);
    format!("effects `{expected}` and `{actual}` are not compatible")
}

/// Performs unification and owns the fresh-variable state it needs for row
/// rewriting.
#[derive(Debug)]
pub struct Unifier {
    supply: VarSupply,
    /// When true, unification steps are recorded for observability tools.
    tracing: bool,
    /// Unification trace steps (populated only when `tracing` is true).
    unify_trace: Vec<UnifyStep>,
}

impl Unifier {
    pub fn new(supply: VarSupply) -> Self {
        Self {
            supply,
            tracing: false,
            unify_trace: Vec::new(),
        }
    }

    /// Enable step-by-step unification tracing.
    pub fn enable_tracing(&mut self) {
        self.tracing = true;
    }

    pub fn is_tracing(&self) -> bool {
        self.tracing
    }

    pub fn unify_trace(&self) -> &[UnifyStep] {
        &self.unify_trace
    }

    pub fn take_unify_trace(&mut self) -> Vec<UnifyStep> {
        std::mem::take(&mut self.unify_trace)
    }

    /// Unify two types under `subst`, returning the extended substitution.
    pub fn unify(
        &mut self,
        expected: &Type,
        actual: &Type,
        subst: &Substitution,
    ) -> Result<Substitution, UnifyError> {
        let expected = subst.apply(expected);
        let actual = subst.apply(actual);

        match (&expected, &actual) {
            // Identical types: nothing to do.
            _ if expected == actual => {
                self.push_unify_step(UnifyAction::Identity, &expected, &actual, "types already equal");
                Ok(subst.clone())
            }

            // Type variable on either side: bind it.
            (Type::Var(v), _) => self.bind_type_var(*v, &actual, subst),
            (_, Type::Var(v)) => self.bind_type_var(*v, &expected, subst),

            (Type::Named(n1, args1), Type::Named(n2, args2))
                if n1 == n2 && args1.len() == args2.len() =>
            {
                self.push_unify_step(
                    UnifyAction::Decompose,
                    &expected,
                    &actual,
                    "same constructor: unify arguments pairwise",
                );
                self.unify_all(args1, args2, subst)
            }

            (Type::App(h1, args1), Type::App(h2, args2)) => {
                self.push_unify_step(
                    UnifyAction::Decompose,
                    &expected,
                    &actual,
                    "App(F, args) ~ App(G, args): unify heads and trailing arguments",
                );
                if args1.len() <= args2.len() {
                    let split = args2.len() - args1.len();
                    let head = Type::app((**h2).clone(), args2[..split].to_vec());
                    let subst = self.unify(h1, &head, subst)?;
                    self.unify_all(args1, &args2[split..], &subst)
                } else {
                    let split = args1.len() - args2.len();
                    let head = Type::app((**h1).clone(), args1[..split].to_vec());
                    let subst = self.unify(&head, h2, subst)?;
                    self.unify_all(&args1[split..], args2, &subst)
                }
            }

            // `f a` against `Result e a`: f := Result e.
            (Type::App(head, args), Type::Named(name, named_args))
                if named_args.len() >= args.len() =>
            {
                self.push_unify_step(
                    UnifyAction::Decompose,
                    &expected,
                    &actual,
                    "variable head against constructor: split off trailing arguments",
                );
                let split = named_args.len() - args.len();
                let partial = Type::Named(name.clone(), named_args[..split].to_vec());
                let subst = self.unify(head, &partial, subst)?;
                self.unify_all(args, &named_args[split..], &subst)
            }
            (Type::Named(name, named_args), Type::App(head, args))
                if named_args.len() >= args.len() =>
            {
                self.push_unify_step(
                    UnifyAction::Decompose,
                    &expected,
                    &actual,
                    "constructor against variable head: split off trailing arguments",
                );
                let split = named_args.len() - args.len();
                let partial = Type::Named(name.clone(), named_args[..split].to_vec());
                let subst = self.unify(&partial, head, subst)?;
                self.unify_all(&named_args[split..], args, &subst)
            }

            (Type::Function(f1), Type::Function(f2)) if f1.params.len() == f2.params.len() => {
                self.push_unify_step(
                    UnifyAction::Decompose,
                    &expected,
                    &actual,
                    "function ~ function: unify params, result and effects",
                );
                let subst = self.unify_all(&f1.params, &f2.params, subst)?;
                let subst = self.unify(&f1.ret, &f2.ret, &subst)?;
                self.unify_effects(&f1.effects, &f2.effects, &subst)
            }

            (Type::Tuple(elems1), Type::Tuple(elems2)) if elems1.len() == elems2.len() => {
                self.push_unify_step(
                    UnifyAction::Decompose,
                    &expected,
                    &actual,
                    "tuple ~ tuple: unify elements pairwise",
                );
                self.unify_all(elems1, elems2, subst)
            }

            _ => {
                self.push_unify_step(UnifyAction::Error, &expected, &actual, "type mismatch");
                Err(UnifyError::TypeMismatch { expected, actual })
            }
        }
    }

    fn unify_all(
        &mut self,
        expected: &[Type],
        actual: &[Type],
        subst: &Substitution,
    ) -> Result<Substitution, UnifyError> {
        let mut subst = subst.clone();
        for (e, a) in expected.iter().zip(actual) {
            subst = self.unify(e, a, &subst)?;
        }
        Ok(subst)
    }

    /// Unify two effect rows.
    ///
    /// Closed rows must carry the same labels. An open row absorbs the
    /// labels it is missing through its tail; two open rows with distinct
    /// tails are rewritten onto one fresh shared tail.
    pub fn unify_effects(
        &mut self,
        expected: &EffectRow,
        actual: &EffectRow,
        subst: &Substitution,
    ) -> Result<Substitution, UnifyError> {
        let expected = subst.apply_effects(expected);
        let actual = subst.apply_effects(actual);
        if expected == actual {
            return Ok(subst.clone());
        }
        self.push_effect_step(UnifyAction::UnifyEffects, &expected, &actual, "unify effect rows");

        let only_expected: Vec<Label> = expected
            .labels
            .iter()
            .filter(|l| !actual.has(l))
            .cloned()
            .collect();
        let only_actual: Vec<Label> = actual
            .labels
            .iter()
            .filter(|l| !expected.has(l))
            .cloned()
            .collect();
        let mismatch = || UnifyError::EffectMismatch {
            expected: expected.clone(),
            actual: actual.clone(),
        };

        match (expected.rest, actual.rest) {
            (None, None) => {
                if only_expected.is_empty() && only_actual.is_empty() {
                    Ok(subst.clone())
                } else {
                    self.push_effect_step(UnifyAction::Error, &expected, &actual, "closed rows differ");
                    Err(mismatch())
                }
            }
            (Some(r), None) => {
                if !only_expected.is_empty() {
                    self.push_effect_step(
                        UnifyAction::Error,
                        &expected,
                        &actual,
                        "closed row lacks required effects",
                    );
                    return Err(mismatch());
                }
                self.push_effect_step(
                    UnifyAction::BindEffectVar,
                    &expected,
                    &actual,
                    &format!("e{} := closed({})", r.0, only_actual.len()),
                );
                Ok(subst.with_effect(r, EffectRow::closed(only_actual)))
            }
            (None, Some(r)) => {
                if !only_actual.is_empty() {
                    self.push_effect_step(
                        UnifyAction::Error,
                        &expected,
                        &actual,
                        "closed row lacks required effects",
                    );
                    return Err(mismatch());
                }
                self.push_effect_step(
                    UnifyAction::BindEffectVar,
                    &expected,
                    &actual,
                    &format!("e{} := closed({})", r.0, only_expected.len()),
                );
                Ok(subst.with_effect(r, EffectRow::closed(only_expected)))
            }
            (Some(r1), Some(r2)) if r1 == r2 => {
                // Same tail, different labels: no finite row satisfies both.
                self.push_effect_step(UnifyAction::Error, &expected, &actual, "rows share a tail");
                Err(mismatch())
            }
            (Some(r1), Some(r2)) => {
                if only_expected.is_empty() && only_actual.is_empty() {
                    self.push_effect_step(
                        UnifyAction::BindEffectVar,
                        &expected,
                        &actual,
                        &format!("e{} := e{}", r1.0, r2.0),
                    );
                    return Ok(subst.with_effect(r1, EffectRow::var(r2)));
                }
                let tail = self.supply.fresh_effect_var();
                self.push_effect_step(
                    UnifyAction::RemyDecompose,
                    &expected,
                    &actual,
                    &format!("e{} and e{} share fresh tail e{}", r1.0, r2.0, tail.0),
                );
                Ok(subst
                    .with_effect(r1, EffectRow::open(only_actual, tail))
                    .with_effect(r2, EffectRow::open(only_expected, tail)))
            }
        }
    }

    /// Bind a type variable to a type, with occurs check.
    fn bind_type_var(
        &mut self,
        var: TypeVarId,
        ty: &Type,
        subst: &Substitution,
    ) -> Result<Substitution, UnifyError> {
        if let Type::Var(v) = ty
            && *v == var
        {
            return Ok(subst.clone());
        }

        if occurs(var, ty, subst) {
            self.push_unify_step(
                UnifyAction::OccursCheck,
                &Type::Var(var),
                ty,
                "infinite type prevented",
            );
            return Err(UnifyError::OccursCheck {
                var,
                ty: ty.clone(),
            });
        }

        self.push_unify_step(
            UnifyAction::Bind,
            &Type::Var(var),
            ty,
            &format!("t{} := {}", var.0, sanitize_type_display(ty)),
        );
        Ok(subst.with_type(var, ty.clone()))
    }

    fn push_unify_step(&mut self, action: UnifyAction, left: &Type, right: &Type, detail: &str) {
        if self.tracing {
            let (left, right) = sanitize_type_pair_display(left, right);
            self.unify_trace.push(UnifyStep {
                step: self.unify_trace.len() + 1,
                action,
                left,
                right,
                detail: detail.to_string(),
            });
        }
    }

    fn push_effect_step(
        &mut self,
        action: UnifyAction,
        left: &EffectRow,
        right: &EffectRow,
        detail: &str,
    ) {
        if self.tracing {
            let (left, right) = sanitize_effect_pair_display(left, right);
            self.unify_trace.push(UnifyStep {
                step: self.unify_trace.len() + 1,
                action,
                left,
                right,
                detail: detail.to_string(),
            });
        }
    }
}

impl FreshVars for Unifier {
    fn fresh_type_var(&mut self) -> TypeVarId {
        self.supply.fresh_type_var()
    }

    fn fresh_effect_var(&mut self) -> sable_types::EffectVarId {
        self.supply.fresh_effect_var()
    }
}
