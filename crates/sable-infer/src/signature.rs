//! Generalization and signature rendering.
//!
//! `generalize` turns a fully inferred type plus its residual obligations
//! into a [`TypeScheme`]. [`InferredSignature`] renders a scheme the way the
//! `--show-types` report prints it:
//!
//! ```text
//! map : forall f c a b. (f a - (a -> b can c) -> f b can c)
//!   given Functor f
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use sable_ast::Span;
use sable_types::{
    EffectRow, EffectVarId, Given, Substitution, Type, TypeScheme, TypeVarId, VarNames, VarRef,
    alphabetic_var_name, display_type_with, effect_var_occurrences, free_type_vars,
    vars_in_order,
};

use crate::{InferError, Obligation};

/// Variables that must stay monomorphic: they are free in the environment.
#[derive(Debug, Clone, Default)]
pub struct EnvVars {
    pub types: BTreeSet<TypeVarId>,
    pub effects: BTreeSet<EffectVarId>,
}

/// Generalize `ty` over every variable not free in `env`.
///
/// Effect tails that occur exactly once, in the effect of the function or
/// of a function it returns, are closed: nothing else can observe them, so
/// `a -> a can e` becomes `a -> a pure`. Residual obligations must mention
/// only variables of the type or the environment, otherwise the obligation
/// is ambiguous. Obligations over environment variables are returned to
/// the caller unchanged.
pub fn generalize(
    ty: &Type,
    residual: Vec<Obligation>,
    subst: &Substitution,
    env: &EnvVars,
    hints: &VarNames,
) -> Result<(TypeScheme, Vec<Obligation>), InferError> {
    let ty = subst.apply(ty);
    let closing = close_singleton_tails(&ty, &residual, env);
    let ty = closing.apply(&ty);

    let mut givens: Vec<Given> = Vec::new();
    let mut deferred = Vec::new();
    let type_vars_in_ty = free_type_vars(&ty);
    for mut ob in residual {
        ob.ty = closing.apply(&subst.apply(&ob.ty));
        let vars = free_type_vars(&ob.ty);
        if vars
            .iter()
            .any(|v| !type_vars_in_ty.contains(v) && !env.types.contains(v))
        {
            return Err(InferError::AmbiguousTrait {
                trait_name: ob.trait_name,
                ty: ob.ty,
                span: ob.provenance.span,
            });
        }
        if vars.iter().all(|v| env.types.contains(v)) {
            deferred.push(ob);
            continue;
        }
        let given = Given::new(ob.trait_name, ob.ty);
        if !givens.contains(&given) {
            givens.push(given);
        }
    }

    let mut type_vars = Vec::new();
    let mut effect_vars = Vec::new();
    for var in vars_in_order(&ty) {
        match var {
            VarRef::Type(v) if !env.types.contains(&v) => type_vars.push(v),
            VarRef::Effect(e) if !env.effects.contains(&e) => effect_vars.push(e),
            _ => {}
        }
    }

    Ok((
        TypeScheme {
            names: transfer_hints(hints, subst, &type_vars, &effect_vars),
            type_vars,
            effect_vars,
            givens: group_by_trait(givens),
            ty,
        },
        deferred,
    ))
}

/// Closing substitution for effect tails only the result can observe.
fn close_singleton_tails(ty: &Type, residual: &[Obligation], env: &EnvVars) -> Substitution {
    let mut counts = effect_var_occurrences(ty);
    for ob in residual {
        for (var, n) in effect_var_occurrences(&ob.ty) {
            *counts.entry(var).or_insert(0) += n;
        }
    }
    let mut closing = Substitution::new();
    let mut current = Some(ty);
    while let Some(Type::Function(ft)) = current {
        if let Some(tail) = ft.effects.rest
            && counts.get(&tail) == Some(&1)
            && !env.effects.contains(&tail)
        {
            closing = closing.with_effect(tail, EffectRow::pure());
        }
        current = Some(&ft.ret);
    }
    closing
}

/// Carry declared names over to the variables they were unified with.
fn transfer_hints(
    hints: &VarNames,
    subst: &Substitution,
    type_vars: &[TypeVarId],
    effect_vars: &[EffectVarId],
) -> VarNames {
    let mut names = VarNames::new();
    for (var, name) in &hints.types {
        if let Type::Var(target) = subst.apply(&Type::Var(*var))
            && type_vars.contains(&target)
        {
            names.types.entry(target).or_insert_with(|| name.clone());
        }
    }
    for (var, name) in &hints.effects {
        let row = subst.apply_effects(&EffectRow::var(*var));
        if row.labels.is_empty()
            && let Some(target) = row.rest
            && effect_vars.contains(&target)
        {
            names.effects.entry(target).or_insert_with(|| name.clone());
        }
    }
    names
}

/// Order givens by trait in first-use order, keeping first-use order of
/// the constrained types within each trait.
pub fn group_by_trait(givens: Vec<Given>) -> Vec<Given> {
    let mut order: Vec<String> = Vec::new();
    let mut by_trait: BTreeMap<String, Vec<Given>> = BTreeMap::new();
    for given in givens {
        if !order.contains(&given.trait_name) {
            order.push(given.trait_name.clone());
        }
        let group = by_trait.entry(given.trait_name.clone()).or_default();
        if !group.contains(&given) {
            group.push(given);
        }
    }
    order
        .into_iter()
        .flat_map(|name| by_trait.remove(&name).unwrap_or_default())
        .collect()
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// The printable signature of one top-level binding.
#[derive(Debug, Clone, PartialEq)]
pub struct InferredSignature {
    pub name: String,
    /// Quantified variables in print order.
    pub quantifiers: Vec<VarRef>,
    pub givens: Vec<Given>,
    pub ty: Type,
    /// Canonical display names for every quantified variable.
    pub names: VarNames,
    pub span: Span,
}

impl InferredSignature {
    pub fn from_scheme(name: &str, scheme: &TypeScheme, span: Span) -> Self {
        let quantified: BTreeSet<VarRef> = scheme
            .type_vars
            .iter()
            .map(|v| VarRef::Type(*v))
            .chain(scheme.effect_vars.iter().map(|e| VarRef::Effect(*e)))
            .collect();

        // Given-constrained variables, then effects, then the rest.
        let mut quantifiers: Vec<VarRef> = Vec::new();
        for given in &scheme.givens {
            for var in vars_in_order(&given.ty) {
                if quantified.contains(&var) && !quantifiers.contains(&var) {
                    quantifiers.push(var);
                }
            }
        }
        let appearance = vars_in_order(&scheme.ty);
        for var in appearance.iter().chain(quantified.iter()) {
            if matches!(var, VarRef::Effect(_))
                && quantified.contains(var)
                && !quantifiers.contains(var)
            {
                quantifiers.push(*var);
            }
        }
        for var in appearance.iter().chain(quantified.iter()) {
            if quantified.contains(var) && !quantifiers.contains(var) {
                quantifiers.push(*var);
            }
        }

        let mut naming_order = appearance;
        for var in &quantifiers {
            if !naming_order.contains(var) {
                naming_order.push(*var);
            }
        }

        Self {
            name: name.to_string(),
            names: canonical_names(&naming_order, &scheme.names),
            quantifiers,
            givens: scheme.givens.clone(),
            ty: scheme.ty.clone(),
            span,
        }
    }

    pub fn render(&self) -> String {
        self.to_string()
    }

    fn var_name(&self, var: &VarRef) -> String {
        let name = match var {
            VarRef::Type(v) => self.names.types.get(v),
            VarRef::Effect(e) => self.names.effects.get(e),
        };
        match (name, var) {
            (Some(name), _) => name.clone(),
            (None, VarRef::Type(v)) => format!("t{}", v.0),
            (None, VarRef::Effect(e)) => format!("e{}", e.0),
        }
    }
}

/// Assign display names: a declared name is kept when no other variable
/// claims it; everything else takes the next unused canonical name.
fn canonical_names(order: &[VarRef], hints: &VarNames) -> VarNames {
    let hint = |var: &VarRef| match var {
        VarRef::Type(v) => hints.types.get(v),
        VarRef::Effect(e) => hints.effects.get(e),
    };
    let mut claims: BTreeMap<&str, usize> = BTreeMap::new();
    for var in order {
        if let Some(name) = hint(var) {
            *claims.entry(name.as_str()).or_insert(0) += 1;
        }
    }
    let kept = |var: &VarRef| hint(var).filter(|name| claims.get(name.as_str()) == Some(&1));
    let used: BTreeSet<String> = order.iter().filter_map(kept).cloned().collect();

    let mut names = VarNames::new();
    let mut next = 0;
    for var in order {
        let name = match kept(var) {
            Some(name) => name.clone(),
            None => loop {
                let candidate = alphabetic_var_name(next);
                next += 1;
                if !used.contains(&candidate) {
                    break candidate;
                }
            },
        };
        match var {
            VarRef::Type(v) => names.types.insert(*v, name),
            VarRef::Effect(e) => names.effects.insert(*e, name),
        };
    }
    names
}

impl fmt::Display for InferredSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ty = display_type_with(&self.ty, &self.names);
        if self.quantifiers.is_empty() {
            write!(f, "{} : {ty}", self.name)?;
        } else {
            let vars: Vec<String> = self.quantifiers.iter().map(|v| self.var_name(v)).collect();
            write!(f, "{} : forall {}. ({ty})", self.name, vars.join(" "))?;
        }
        if !self.givens.is_empty() {
            let givens: Vec<String> = self
                .givens
                .iter()
                .map(|g| g.display_with(&self.names))
                .collect();
            write!(f, "\n  given {}", givens.join(", "))?;
        }
        Ok(())
    }
}
