//! AST node definitions and source spans for Sable.
//!
//! This crate defines the declaration tree the checker consumes. Parsing
//! happens elsewhere; trees arrive already built, usually deserialized from
//! JSON. Every node carries a [`Span`] for source location tracking.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Identifies a source file in the compilation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u32);

/// A byte offset range within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub file: FileId,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(file: FileId, start: u32, end: u32) -> Self {
        Self { file, start, end }
    }

    /// A synthetic span for compiler-generated nodes.
    pub fn synthetic() -> Self {
        Self {
            file: FileId(u32::MAX),
            start: 0,
            end: 0,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.file == FileId(u32::MAX)
    }
}

/// A value paired with its source location.
///
/// Hand-written trees may omit `span`; it then defaults to
/// [`Span::synthetic`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spanned<T> {
    pub node: T,
    #[serde(default = "Span::synthetic")]
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            node: f(self.node),
            span: self.span,
        }
    }
}

// ---------------------------------------------------------------------------
// Literal values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Lit {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Unit,
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

pub type Expr = Spanned<ExprKind>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    /// Literal value.
    Lit(Lit),

    /// Variable, constructor, trait operation or effect operation reference.
    Var(String),

    /// Lambda: `fn p1 p2 -> body`.
    Lambda { params: Vec<Pattern>, body: Box<Expr> },

    /// Function application: `func a1 a2`. All arguments are supplied at
    /// once; there is no implicit currying.
    Call { func: Box<Expr>, args: Vec<Expr> },

    /// Let binding: `let pattern = value` followed by `body`.
    Let {
        pattern: Pattern,
        annotation: Option<Spanned<TypeAnnotation>>,
        value: Box<Expr>,
        body: Box<Expr>,
    },

    /// If expression: `if cond then a else b`.
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },

    /// Match expression: `match scrutinee | pat -> body ...`.
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },

    /// Type ascription: `(expr : Type)`.
    Annotated {
        expr: Box<Expr>,
        annotation: Spanned<TypeAnnotation>,
    },

    /// Tuple: `(a, b)`, two or more elements.
    Tuple(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: Expr,
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

pub type Pattern = Spanned<PatternKind>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatternKind {
    /// Matches anything, binds nothing.
    Wildcard,

    /// Binds the matched value to a name.
    Var(String),

    /// Matches a literal value.
    Lit(Lit),

    /// Matches a sum type constructor: `Some x`, `None`.
    Constructor { name: String, args: Vec<Pattern> },

    /// Destructures a tuple: `(x, _)`.
    Tuple(Vec<Pattern>),
}

impl PatternKind {
    /// True for patterns that match every value of their type without
    /// inspecting it.
    pub fn is_catch_all(&self) -> bool {
        matches!(self, PatternKind::Wildcard | PatternKind::Var(_))
    }
}

// ---------------------------------------------------------------------------
// Type annotations
// ---------------------------------------------------------------------------

/// A syntactic type annotation (not a semantic type, that's in `sable-types`).
///
/// Names starting with a lowercase letter are type variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeAnnotation {
    Named(String),
    Applied(String, Vec<TypeAnnotation>),
    /// `p1 - p2 -> ret effect`.
    Function {
        params: Vec<TypeAnnotation>,
        ret: Box<TypeAnnotation>,
        effect: EffectAnnotation,
    },
    /// `(a, b)`.
    Tuple(Vec<TypeAnnotation>),
}

/// A syntactic effect annotation used on function types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectAnnotation {
    /// `pure`
    Pure,
    /// `can c`
    Var(String),
    /// `can IO, State` or `can IO, c`
    Row {
        effects: Vec<String>,
        rest: Option<String>,
    },
}

/// A trait bound in a `given` clause: `given Functor f`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitBound {
    pub trait_name: Spanned<String>,
    pub type_var: Spanned<String>,
}

// ---------------------------------------------------------------------------
// Top-level declarations
// ---------------------------------------------------------------------------

pub type Decl = Spanned<DeclKind>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeclKind {
    /// Function or value definition.
    Function(FnDecl),

    /// Sum type definition: `type Maybe a = Some a | None`.
    TypeDef(TypeDef),

    /// Trait definition: `trait Functor f with map : ...`.
    TraitDef(TraitDef),

    /// Effect declaration: `effect IO with print : String -> Unit`.
    EffectDecl(EffectDecl),

    /// Implementation block: `impl Functor Maybe with map m f = ...`.
    ImplBlock(ImplBlock),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnDecl {
    pub name: Spanned<String>,
    #[serde(default)]
    pub params: Vec<Pattern>,
    #[serde(default)]
    pub annotation: Option<Spanned<TypeAnnotation>>,
    #[serde(default)]
    pub given: Vec<TraitBound>,
    pub body: Expr,
    #[serde(default = "Span::synthetic")]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: Spanned<String>,
    #[serde(default)]
    pub params: Vec<String>,
    pub variants: Vec<TypeVariant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeVariant {
    pub name: Spanned<String>,
    #[serde(default)]
    pub fields: Vec<TypeAnnotation>,
}

/// A trait definition: `trait Monad m with wrap : a -> m a pure ...`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitDef {
    pub name: Spanned<String>,
    pub type_param: Spanned<String>,
    pub methods: Vec<TraitMethod>,
}

/// A required operation within a trait definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitMethod {
    pub name: Spanned<String>,
    pub annotation: Spanned<TypeAnnotation>,
    /// Extra obligations beyond the trait itself.
    #[serde(default)]
    pub given: Vec<TraitBound>,
    #[serde(default = "Span::synthetic")]
    pub span: Span,
}

/// An effect declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDecl {
    pub name: Spanned<String>,
    pub operations: Vec<EffectOperation>,
}

/// An operation signature inside an effect declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectOperation {
    pub name: Spanned<String>,
    #[serde(default)]
    pub params: Vec<TypeAnnotation>,
    pub return_annotation: TypeAnnotation,
    #[serde(default = "Span::synthetic")]
    pub span: Span,
}

/// An implementation block: `impl Functor Maybe with ...`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplBlock {
    pub trait_name: Spanned<String>,
    pub type_name: Spanned<String>,
    pub methods: Vec<FnDecl>,
}

impl ImplBlock {
    /// Display label used when diagnostics name one of this block's methods.
    pub fn method_label(&self, method: &str) -> String {
        format!(
            "{method} (impl {} {})",
            self.trait_name.node, self.type_name.node
        )
    }
}

/// A complete source file / module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub declarations: Vec<Decl>,
    #[serde(default = "Span::synthetic")]
    pub span: Span,
}

impl Module {
    pub fn functions(&self) -> impl Iterator<Item = &FnDecl> {
        self.declarations.iter().filter_map(|decl| match &decl.node {
            DeclKind::Function(f) => Some(f),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Free variable analysis
// ---------------------------------------------------------------------------

/// Compute the set of free variable names in an expression.
///
/// A variable is "free" if it is referenced (`Var`) but not bound by an
/// enclosing `Let`, `Lambda`, or pattern match within the expression.
///
/// The checker uses this to order top-level definitions by dependency.
pub fn free_vars(expr: &Expr) -> HashSet<String> {
    let mut free = HashSet::new();
    let mut bound = HashSet::new();
    collect_free_vars(&expr.node, &mut free, &mut bound);
    free
}

/// Free variables of a function body once its parameters are bound.
pub fn fn_free_vars(decl: &FnDecl) -> HashSet<String> {
    let mut free = HashSet::new();
    let mut bound = HashSet::new();
    for param in &decl.params {
        collect_pattern_bindings(&param.node, &mut bound);
    }
    collect_free_vars(&decl.body.node, &mut free, &mut bound);
    free
}

fn collect_free_vars(kind: &ExprKind, free: &mut HashSet<String>, bound: &mut HashSet<String>) {
    match kind {
        ExprKind::Var(name) => {
            if !bound.contains(name) {
                free.insert(name.clone());
            }
        }
        ExprKind::Lit(_) => {}
        ExprKind::Let {
            pattern,
            value,
            body,
            ..
        } => {
            collect_free_vars(&value.node, free, bound);
            let mut inner_bound = bound.clone();
            collect_pattern_bindings(&pattern.node, &mut inner_bound);
            collect_free_vars(&body.node, free, &mut inner_bound);
        }
        ExprKind::Lambda { params, body } => {
            let mut inner_bound = bound.clone();
            for p in params {
                collect_pattern_bindings(&p.node, &mut inner_bound);
            }
            collect_free_vars(&body.node, free, &mut inner_bound);
        }
        ExprKind::Call { func, args } => {
            collect_free_vars(&func.node, free, bound);
            for a in args {
                collect_free_vars(&a.node, free, bound);
            }
        }
        ExprKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            collect_free_vars(&condition.node, free, bound);
            collect_free_vars(&then_branch.node, free, bound);
            collect_free_vars(&else_branch.node, free, bound);
        }
        ExprKind::Match { scrutinee, arms } => {
            collect_free_vars(&scrutinee.node, free, bound);
            for arm in arms {
                let mut arm_bound = bound.clone();
                collect_pattern_bindings(&arm.pattern.node, &mut arm_bound);
                collect_free_vars(&arm.body.node, free, &mut arm_bound);
            }
        }
        ExprKind::Annotated { expr, .. } => {
            collect_free_vars(&expr.node, free, bound);
        }
        ExprKind::Tuple(elems) => {
            for e in elems {
                collect_free_vars(&e.node, free, bound);
            }
        }
    }
}

fn collect_pattern_bindings(pattern: &PatternKind, bound: &mut HashSet<String>) {
    match pattern {
        PatternKind::Var(name) => {
            bound.insert(name.clone());
        }
        PatternKind::Constructor { args, .. } | PatternKind::Tuple(args) => {
            for arg in args {
                collect_pattern_bindings(&arg.node, bound);
            }
        }
        PatternKind::Wildcard | PatternKind::Lit(_) => {}
    }
}
