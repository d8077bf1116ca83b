//! Type representations for Sable.
//!
//! This crate defines the semantic types used by the type checker and
//! inference engine. These are distinct from syntactic type annotations
//! (which live in `sable-ast`).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use im::OrdMap;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique identifier for a type variable during inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeVarId(pub u32);

/// Unique identifier for an effect row variable during inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectVarId(pub u32);

/// An effect name inside a row (`IO`, `State`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub String);

impl Label {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A semantic type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Float,
    Bool,
    String,
    Unit,

    /// Inference variable.
    Var(TypeVarId),

    /// Nominal type constructor applied to zero or more arguments.
    /// `Named("Maybe", [])` is the bare constructor a trait parameter of
    /// kind `* -> *` resolves to.
    Named(String, Vec<Type>),

    /// Application whose head is not (yet) a known constructor, e.g. `f a`
    /// for a higher-kinded trait parameter `f`.
    App(Box<Type>, Vec<Type>),

    Function(FunctionType),

    /// Fixed-size product of two or more element types: `(Int, a)`.
    Tuple(Vec<Type>),
}

/// A function type: ordered parameters, a result, and the effects the call
/// may perform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub ret: Box<Type>,
    pub effects: EffectRow,
}

impl FunctionType {
    pub fn with_effects(params: Vec<Type>, ret: Type, effects: EffectRow) -> Self {
        Self {
            params,
            ret: Box::new(ret),
            effects,
        }
    }
}

impl Type {
    pub fn named(name: impl Into<String>, args: Vec<Type>) -> Type {
        Type::Named(name.into(), args)
    }

    /// Apply `head` to `args`, folding into a named application when the
    /// head is a known constructor and flattening nested applications.
    pub fn app(head: Type, args: Vec<Type>) -> Type {
        if args.is_empty() {
            return head;
        }
        match head {
            Type::Named(name, mut prefix) => {
                prefix.extend(args);
                Type::Named(name, prefix)
            }
            Type::App(inner, mut prefix) => {
                prefix.extend(args);
                Type::App(inner, prefix)
            }
            other => Type::App(Box::new(other), args),
        }
    }

    pub fn function(params: Vec<Type>, ret: Type, effects: EffectRow) -> Type {
        Type::Function(FunctionType::with_effects(params, ret, effects))
    }

    /// Name of the concrete type constructor at the head of this type, the
    /// key trait implementations are registered under.
    pub fn head_constructor(&self) -> Option<&str> {
        match self {
            Type::Int => Some("Int"),
            Type::Float => Some("Float"),
            Type::Bool => Some("Bool"),
            Type::String => Some("String"),
            Type::Unit => Some("Unit"),
            Type::Named(name, _) => Some(name),
            Type::Var(_) | Type::App(_, _) | Type::Function(_) | Type::Tuple(_) => None,
        }
    }

    /// The variable at the head of this type, if the head is unresolved.
    pub fn head_var(&self) -> Option<TypeVarId> {
        match self {
            Type::Var(v) => Some(*v),
            Type::App(head, _) => head.head_var(),
            _ => None,
        }
    }

    fn is_atomic(&self) -> bool {
        match self {
            Type::Named(_, args) => args.is_empty(),
            Type::App(_, _) | Type::Function(_) => false,
            _ => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Effect rows
// ---------------------------------------------------------------------------

/// Effect row representation.
///
/// `labels` is kept sorted and deduplicated. A row without `rest` is closed;
/// the closed empty row is `pure`. An open row may still be extended with
/// more effects through its tail variable, which is how effect
/// polymorphism (`can c`) is expressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct EffectRow {
    pub labels: Vec<Label>,
    pub rest: Option<EffectVarId>,
}

impl EffectRow {
    /// Closed empty effect row (`pure`).
    pub fn pure() -> Self {
        Self::default()
    }

    /// Closed effect row.
    pub fn closed(labels: Vec<Label>) -> Self {
        Self {
            labels: normalize_labels(labels),
            rest: None,
        }
    }

    /// Open effect row with a tail variable.
    pub fn open(labels: Vec<Label>, rest: EffectVarId) -> Self {
        Self {
            labels: normalize_labels(labels),
            rest: Some(rest),
        }
    }

    /// Open empty row: just the effect variable `rest`.
    pub fn var(rest: EffectVarId) -> Self {
        Self {
            labels: Vec::new(),
            rest: Some(rest),
        }
    }

    pub fn is_pure(&self) -> bool {
        self.labels.is_empty() && self.rest.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.rest.is_none()
    }

    pub fn has(&self, label: &Label) -> bool {
        self.labels.binary_search(label).is_ok()
    }

    /// The row with its tail dropped.
    pub fn close(&self) -> EffectRow {
        EffectRow {
            labels: self.labels.clone(),
            rest: None,
        }
    }
}

fn normalize_labels(mut labels: Vec<Label>) -> Vec<Label> {
    labels.sort();
    labels.dedup();
    labels
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

/// Display names for variables, used when rendering signatures.
///
/// Variables without a name fall back to `t{id}` / `e{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarNames {
    pub types: BTreeMap<TypeVarId, String>,
    pub effects: BTreeMap<EffectVarId, String>,
}

impl VarNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.effects.is_empty()
    }

    fn type_name(&self, var: TypeVarId) -> String {
        self.types
            .get(&var)
            .cloned()
            .unwrap_or_else(|| format!("t{}", var.0))
    }

    fn effect_name(&self, var: EffectVarId) -> String {
        self.effects
            .get(&var)
            .cloned()
            .unwrap_or_else(|| format!("e{}", var.0))
    }
}

/// Render a type with the given variable names.
pub fn display_type_with(ty: &Type, names: &VarNames) -> String {
    let mut out = String::new();
    write_type(ty, names, &mut out);
    out
}

/// Render an effect row the way it appears after a function's result:
/// `pure`, `can c`, `can IO`, `can IO, c`.
pub fn display_effects_with(row: &EffectRow, names: &VarNames) -> String {
    if row.is_pure() {
        return "pure".to_string();
    }
    let mut parts: Vec<String> = row.labels.iter().map(|l| l.0.clone()).collect();
    if let Some(rest) = row.rest {
        parts.push(names.effect_name(rest));
    }
    format!("can {}", parts.join(", "))
}

fn write_type(ty: &Type, names: &VarNames, out: &mut String) {
    match ty {
        Type::Int => out.push_str("Int"),
        Type::Float => out.push_str("Float"),
        Type::Bool => out.push_str("Bool"),
        Type::String => out.push_str("String"),
        Type::Unit => out.push_str("Unit"),
        Type::Var(v) => out.push_str(&names.type_name(*v)),
        Type::Named(name, args) => {
            out.push_str(name);
            for arg in args {
                out.push(' ');
                write_operand(arg, names, out);
            }
        }
        Type::App(head, args) => {
            write_operand(head, names, out);
            for arg in args {
                out.push(' ');
                write_operand(arg, names, out);
            }
        }
        Type::Tuple(elems) => {
            out.push('(');
            for (i, elem) in elems.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_type(elem, names, out);
            }
            out.push(')');
        }
        Type::Function(ft) => {
            for (i, param) in ft.params.iter().enumerate() {
                if i > 0 {
                    out.push_str(" - ");
                }
                write_arrow_part(param, names, out);
            }
            if ft.params.is_empty() {
                out.push_str("Unit");
            }
            out.push_str(" -> ");
            write_arrow_part(&ft.ret, names, out);
            out.push(' ');
            out.push_str(&display_effects_with(&ft.effects, names));
        }
    }
}

fn write_operand(ty: &Type, names: &VarNames, out: &mut String) {
    if ty.is_atomic() {
        write_type(ty, names, out);
    } else {
        out.push('(');
        write_type(ty, names, out);
        out.push(')');
    }
}

fn write_arrow_part(ty: &Type, names: &VarNames, out: &mut String) {
    if matches!(ty, Type::Function(_)) {
        out.push('(');
        write_type(ty, names, out);
        out.push(')');
    } else {
        write_type(ty, names, out);
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", display_type_with(self, &VarNames::new()))
    }
}

impl fmt::Display for EffectRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", display_effects_with(self, &VarNames::new()))
    }
}

/// Canonical variable names: `a`..`z`, then `a1`..`z1`, and so on.
pub fn alphabetic_var_name(index: usize) -> String {
    let letter = (b'a' + (index % 26) as u8) as char;
    let suffix = index / 26;
    if suffix == 0 {
        letter.to_string()
    } else {
        format!("{letter}{suffix}")
    }
}

/// Display two types with one shared variable namespace.
///
/// This keeps mismatch messages consistent: the same inference variable
/// appears with the same canonical name on both sides.
pub fn sanitize_type_pair_display(left: &Type, right: &Type) -> (String, String) {
    let mut names = VarNames::new();
    let mut next = 0usize;
    for var in vars_in_order(left).into_iter().chain(vars_in_order(right)) {
        let fresh = match var {
            VarRef::Type(v) => !names.types.contains_key(&v),
            VarRef::Effect(v) => !names.effects.contains_key(&v),
        };
        if !fresh {
            continue;
        }
        let name = alphabetic_var_name(next);
        next += 1;
        match var {
            VarRef::Type(v) => {
                names.types.insert(v, name);
            }
            VarRef::Effect(v) => {
                names.effects.insert(v, name);
            }
        }
    }
    (
        display_type_with(left, &names),
        display_type_with(right, &names),
    )
}

/// Display one type with canonical variable names.
pub fn sanitize_type_display(ty: &Type) -> String {
    sanitize_type_pair_display(ty, &Type::Unit).0
}

/// Display two effect rows with one shared namespace for their tails.
pub fn sanitize_effect_pair_display(left: &EffectRow, right: &EffectRow) -> (String, String) {
    let mut names = VarNames::new();
    for rest in [left.rest, right.rest].into_iter().flatten() {
        if !names.effects.contains_key(&rest) {
            let name = alphabetic_var_name(names.effects.len());
            names.effects.insert(rest, name);
        }
    }
    (
        display_effects_with(left, &names),
        display_effects_with(right, &names),
    )
}

// ---------------------------------------------------------------------------
// Type schemes (forall-quantified types)
// ---------------------------------------------------------------------------

/// A residual trait obligation attached to a scheme: `given Functor f`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Given {
    pub trait_name: String,
    pub ty: Type,
}

impl Given {
    pub fn new(trait_name: impl Into<String>, ty: Type) -> Self {
        Self {
            trait_name: trait_name.into(),
            ty,
        }
    }

    pub fn display_with(&self, names: &VarNames) -> String {
        let mut out = format!("{} ", self.trait_name);
        write_operand(&self.ty, names, &mut out);
        out
    }
}

/// A type scheme: `forall a c. T given Tr a`.
///
/// Type schemes arise from generalization and from declared signatures.
/// Each use instantiates the scheme with fresh variables and copies the
/// `givens` onto them as new trait obligations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeScheme {
    pub type_vars: Vec<TypeVarId>,
    pub effect_vars: Vec<EffectVarId>,
    /// Trait obligations over the quantified variables, in first-use order.
    pub givens: Vec<Given>,
    /// Declared names for quantified variables, used by the printer.
    pub names: VarNames,
    pub ty: Type,
}

impl TypeScheme {
    /// Create a monomorphic scheme (no quantified variables).
    pub fn mono(ty: Type) -> Self {
        Self {
            type_vars: Vec::new(),
            effect_vars: Vec::new(),
            givens: Vec::new(),
            names: VarNames::new(),
            ty,
        }
    }

    /// Is this scheme monomorphic (no quantified variables)?
    pub fn is_mono(&self) -> bool {
        self.type_vars.is_empty() && self.effect_vars.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Free variable computation
// ---------------------------------------------------------------------------

/// A type or effect variable, in the order it appears in a rendered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VarRef {
    Type(TypeVarId),
    Effect(EffectVarId),
}

/// Collect all free type variables in a type.
pub fn free_type_vars(ty: &Type) -> BTreeSet<TypeVarId> {
    vars_in_order(ty)
        .into_iter()
        .filter_map(|var| match var {
            VarRef::Type(v) => Some(v),
            VarRef::Effect(_) => None,
        })
        .collect()
}

/// Collect all free effect variables in a type.
pub fn free_effect_vars(ty: &Type) -> BTreeSet<EffectVarId> {
    vars_in_order(ty)
        .into_iter()
        .filter_map(|var| match var {
            VarRef::Effect(v) => Some(v),
            VarRef::Type(_) => None,
        })
        .collect()
}

/// Free variables in left-to-right order of first appearance, following
/// the order the type is rendered in (a function's effect comes after its
/// result).
pub fn vars_in_order(ty: &Type) -> Vec<VarRef> {
    let mut seen = BTreeSet::new();
    let mut order = Vec::new();
    visit_vars(ty, &mut |var| {
        if seen.insert(var) {
            order.push(var);
        }
    });
    order
}

/// How many times each effect variable occurs in a type.
pub fn effect_var_occurrences(ty: &Type) -> BTreeMap<EffectVarId, usize> {
    let mut counts = BTreeMap::new();
    visit_vars(ty, &mut |var| {
        if let VarRef::Effect(v) = var {
            *counts.entry(v).or_insert(0) += 1;
        }
    });
    counts
}

fn visit_vars(ty: &Type, visit: &mut impl FnMut(VarRef)) {
    match ty {
        Type::Var(v) => visit(VarRef::Type(*v)),
        Type::Named(_, args) => {
            for arg in args {
                visit_vars(arg, visit);
            }
        }
        Type::App(head, args) => {
            visit_vars(head, visit);
            for arg in args {
                visit_vars(arg, visit);
            }
        }
        Type::Function(ft) => {
            for param in &ft.params {
                visit_vars(param, visit);
            }
            visit_vars(&ft.ret, visit);
            if let Some(rest) = ft.effects.rest {
                visit(VarRef::Effect(rest));
            }
        }
        Type::Tuple(elems) => {
            for elem in elems {
                visit_vars(elem, visit);
            }
        }
        Type::Int | Type::Float | Type::Bool | Type::String | Type::Unit => {}
    }
}

/// Does `var` occur in `ty` once `subst` is applied?
pub fn occurs(var: TypeVarId, ty: &Type, subst: &Substitution) -> bool {
    free_type_vars(&subst.apply(ty)).contains(&var)
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

/// Maps type variables and effect variables to their resolved types/rows.
///
/// Substitutions are persistent: `with_type` and `with_effect` return a new
/// substitution sharing structure with the old one, which stays valid and
/// unchanged. Bindings are triangular (a bound type may mention other bound
/// variables); `apply` follows them to a fixpoint, so applying the result
/// again changes nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution {
    type_map: OrdMap<TypeVarId, Type>,
    effect_map: OrdMap<EffectVarId, EffectRow>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(&self, var: TypeVarId, ty: Type) -> Self {
        Self {
            type_map: self.type_map.update(var, ty),
            effect_map: self.effect_map.clone(),
        }
    }

    pub fn with_effect(&self, var: EffectVarId, row: EffectRow) -> Self {
        Self {
            type_map: self.type_map.clone(),
            effect_map: self.effect_map.update(var, row),
        }
    }

    pub fn lookup_type(&self, var: TypeVarId) -> Option<&Type> {
        self.type_map.get(&var)
    }

    pub fn lookup_effect(&self, var: EffectVarId) -> Option<&EffectRow> {
        self.effect_map.get(&var)
    }

    pub fn len(&self) -> usize {
        self.type_map.len() + self.effect_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.type_map.is_empty() && self.effect_map.is_empty()
    }

    /// Apply this substitution to a type, replacing all bound variables.
    pub fn apply(&self, ty: &Type) -> Type {
        match ty {
            Type::Var(v) => match self.lookup_type(*v) {
                Some(resolved) => self.apply(resolved),
                None => ty.clone(),
            },
            Type::Named(name, args) => {
                Type::Named(name.clone(), args.iter().map(|a| self.apply(a)).collect())
            }
            Type::App(head, args) => {
                Type::app(self.apply(head), args.iter().map(|a| self.apply(a)).collect())
            }
            Type::Function(ft) => Type::Function(FunctionType {
                params: ft.params.iter().map(|p| self.apply(p)).collect(),
                ret: Box::new(self.apply(&ft.ret)),
                effects: self.apply_effects(&ft.effects),
            }),
            Type::Tuple(elems) => Type::Tuple(elems.iter().map(|e| self.apply(e)).collect()),
            Type::Int | Type::Float | Type::Bool | Type::String | Type::Unit => ty.clone(),
        }
    }

    /// Apply this substitution to an effect row, merging resolved tails.
    pub fn apply_effects(&self, row: &EffectRow) -> EffectRow {
        match row.rest {
            None => row.clone(),
            Some(var) => match self.lookup_effect(var) {
                Some(resolved) => {
                    let resolved = self.apply_effects(resolved);
                    let mut labels = row.labels.clone();
                    labels.extend(resolved.labels);
                    EffectRow {
                        labels: normalize_labels(labels),
                        rest: resolved.rest,
                    }
                }
                None => row.clone(),
            },
        }
    }

    /// Sequential composition: the result behaves like applying `self` and
    /// then `later`.
    ///
    /// `later` is expected to have been computed over types already
    /// resolved by `self`, which is how successive unification steps
    /// produce it.
    pub fn compose(&self, later: &Substitution) -> Substitution {
        let mut type_map = OrdMap::new();
        for (var, ty) in self.type_map.iter() {
            let resolved = later.apply(&self.apply(ty));
            if resolved != Type::Var(*var) {
                type_map.insert(*var, resolved);
            }
        }
        for (var, ty) in later.type_map.iter() {
            if !type_map.contains_key(var) && !self.type_map.contains_key(var) {
                type_map.insert(*var, later.apply(ty));
            }
        }

        let mut effect_map = OrdMap::new();
        for (var, row) in self.effect_map.iter() {
            let resolved = later.apply_effects(&self.apply_effects(row));
            if resolved != EffectRow::var(*var) {
                effect_map.insert(*var, resolved);
            }
        }
        for (var, row) in later.effect_map.iter() {
            if !effect_map.contains_key(var) && !self.effect_map.contains_key(var) {
                effect_map.insert(*var, later.apply_effects(row));
            }
        }

        Substitution {
            type_map,
            effect_map,
        }
    }
}
