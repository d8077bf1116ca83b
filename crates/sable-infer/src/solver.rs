//! Trait registry and obligation solving.
//!
//! Implementations are keyed by (trait, head constructor). An obligation
//! whose type has a concrete head is discharged by looking up that key; one
//! whose head is still a type variable cannot be decided yet and is kept as
//! a residual, which generalization turns into a `given` clause.

use std::collections::BTreeMap;

use sable_ast::Span;
use sable_types::{Given, Substitution, Type, TypeScheme, TypeVarId};

use crate::{InferError, Obligation};

/// A declared trait.
#[derive(Debug, Clone)]
pub struct TraitInfo {
    pub name: String,
    /// The trait's type parameter, quantified in every method scheme.
    pub param: TypeVarId,
    pub param_name: String,
    /// How many type arguments the parameter takes (`Functor f` has 1).
    pub param_arity: usize,
    pub methods: Vec<TraitMethodInfo>,
    pub span: Span,
}

impl TraitInfo {
    pub fn method(&self, name: &str) -> Option<&TraitMethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// A method required by a trait.
///
/// The scheme quantifies over the trait parameter and the method's own
/// variables; its first given is always the trait itself on the parameter.
#[derive(Debug, Clone)]
pub struct TraitMethodInfo {
    pub name: String,
    pub scheme: TypeScheme,
    pub span: Span,
}

/// A registered `impl Trait Type`.
#[derive(Debug, Clone)]
pub struct ImplInfo {
    pub trait_name: String,
    pub type_name: String,
    pub methods: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, Default)]
pub struct TraitRegistry {
    traits: BTreeMap<String, TraitInfo>,
    impls: BTreeMap<(String, String), ImplInfo>,
    method_owner: BTreeMap<String, String>,
}

/// What the registry says about one obligation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveOutcome {
    /// Discharged by the implementation for this head constructor.
    Resolved {
        type_name: String,
        operations: Vec<String>,
    },
    /// The head is a type variable; decided by whoever instantiates it.
    Deferred,
    /// No implementation can apply.
    Unresolved,
}

impl TraitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_trait(&mut self, info: TraitInfo) {
        for method in &info.methods {
            self.method_owner
                .insert(method.name.clone(), info.name.clone());
        }
        self.traits.insert(info.name.clone(), info);
    }

    pub fn register_impl(&mut self, info: ImplInfo) {
        self.impls
            .insert((info.trait_name.clone(), info.type_name.clone()), info);
    }

    pub fn lookup_trait(&self, name: &str) -> Option<&TraitInfo> {
        self.traits.get(name)
    }

    pub fn lookup_impl(&self, trait_name: &str, type_name: &str) -> Option<&ImplInfo> {
        self.impls
            .get(&(trait_name.to_string(), type_name.to_string()))
    }

    /// The trait declaring a method with this name.
    pub fn method_owner(&self, method: &str) -> Option<&TraitInfo> {
        self.method_owner
            .get(method)
            .and_then(|owner| self.traits.get(owner))
    }

    pub fn traits(&self) -> impl Iterator<Item = &TraitInfo> {
        self.traits.values()
    }

    /// Decide one goal against the registered implementations.
    pub fn solve_goal(&self, trait_name: &str, ty: &Type) -> SolveOutcome {
        match ty.head_constructor() {
            Some(head) => match self.lookup_impl(trait_name, head) {
                Some(info) => SolveOutcome::Resolved {
                    type_name: info.type_name.clone(),
                    operations: info.methods.clone(),
                },
                None => SolveOutcome::Unresolved,
            },
            None if ty.head_var().is_some() => SolveOutcome::Deferred,
            None => SolveOutcome::Unresolved,
        }
    }
}

/// An obligation discharged by a concrete implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub trait_name: String,
    pub type_name: String,
    /// Operations the implementation supplies, in declaration order.
    pub operations: Vec<String>,
    /// Use site of the trait operation that raised the obligation.
    pub span: Span,
}

/// Result of solving a batch of obligations.
#[derive(Debug, Clone, Default)]
pub struct Solved {
    pub resolved: Vec<Resolution>,
    /// Obligations on type-variable heads, deduplicated, in first-use order.
    pub residual: Vec<Obligation>,
}

impl Solved {
    /// The residual obligations as `given` clauses.
    pub fn givens(&self) -> Vec<Given> {
        self.residual
            .iter()
            .map(|ob| Given::new(ob.trait_name.clone(), ob.ty.clone()))
            .collect()
    }
}

/// Discharge every obligation the registry can decide.
///
/// Fails on the first obligation with a concrete head and no
/// implementation.
pub fn solve(
    obligations: Vec<Obligation>,
    subst: &Substitution,
    registry: &TraitRegistry,
) -> Result<Solved, InferError> {
    let mut solved = Solved::default();
    for mut ob in obligations {
        ob.ty = subst.apply(&ob.ty);
        match registry.solve_goal(&ob.trait_name, &ob.ty) {
            SolveOutcome::Resolved {
                type_name,
                operations,
            } => solved.resolved.push(Resolution {
                trait_name: ob.trait_name,
                type_name,
                operations,
                span: ob.provenance.span,
            }),
            SolveOutcome::Deferred => {
                let duplicate = solved
                    .residual
                    .iter()
                    .any(|seen| seen.trait_name == ob.trait_name && seen.ty == ob.ty);
                if !duplicate {
                    solved.residual.push(ob);
                }
            }
            SolveOutcome::Unresolved => {
                return Err(InferError::UnresolvedTrait {
                    trait_name: ob.trait_name,
                    ty: ob.ty,
                    span: ob.provenance.span,
                });
            }
        }
    }
    Ok(solved)
}
