//! Tracing types for checker observability.
//!
//! These types capture step-by-step traces of unification and inference so
//! the CLI can emit them as JSON lines. All tracing is opt-in via
//! `Unifier::enable_tracing()` and costs nothing when disabled.

use serde::Serialize;

// ---------------------------------------------------------------------------
// Unification trace
// ---------------------------------------------------------------------------

/// A single step in a unification trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifyStep {
    pub step: usize,
    pub action: UnifyAction,
    pub left: String,
    pub right: String,
    pub detail: String,
}

/// What action was taken during a unification step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifyAction {
    /// Types are already identical, no-op.
    Identity,
    /// Structural recursion: `Maybe a ~ Maybe b` becomes `a ~ b`.
    Decompose,
    /// Type variable bound to a type (e.g. `t0 := Int`).
    Bind,
    /// Entered effect row unification.
    UnifyEffects,
    /// Effect tail bound to the labels it was missing.
    BindEffectVar,
    /// Both rows open: a fresh shared tail was created.
    RemyDecompose,
    /// Occurs check fired.
    OccursCheck,
    Error,
}

// ---------------------------------------------------------------------------
// Inference trace
// ---------------------------------------------------------------------------

/// A single step in an inference trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferStep {
    pub expr: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub rule: InferRule,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<(u32, u32)>,
}

/// Which inference rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InferRule {
    Literal,
    VarLookup,
    Lambda,
    Call,
    Let,
    LetGen,
    If,
    Match,
    Annotation,
    Tuple,
    Generalize,
    Solve,
}
