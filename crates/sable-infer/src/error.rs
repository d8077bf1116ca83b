//! Inference failures and their conversion to diagnostics.

use sable_ast::Span;
use sable_diag::{Category, Diagnostic};
use sable_types::{
    EffectRow, Type, TypeVarId, sanitize_effect_pair_display, sanitize_type_display,
    sanitize_type_pair_display,
};

use crate::{Reason, span_to_location};

/// Why a binding failed to type check.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferError {
    #[error("{}", mismatch_message(.expected, .actual, .reason))]
    TypeMismatch {
        expected: Type,
        actual: Type,
        reason: Reason,
        span: Span,
        /// The innermost conflict, when it differs from the outer types.
        detail: Option<String>,
    },

    #[error("{}", effect_mismatch_message(.expected, .actual, .reason))]
    EffectMismatch {
        expected: EffectRow,
        actual: EffectRow,
        reason: Reason,
        span: Span,
    },

    #[error("{}", occurs_message(.var, .ty))]
    OccursCheck { var: TypeVarId, ty: Type, span: Span },

    #[error("no implementation of `{trait_name}` for `{}`", sanitize_type_display(.ty))]
    UnresolvedTrait {
        trait_name: String,
        ty: Type,
        span: Span,
    },

    #[error("{what} expects {} but {} supplied", count(.expected, "argument"), supplied(.actual))]
    ArityMismatch {
        what: String,
        expected: usize,
        actual: usize,
        span: Span,
    },

    #[error("{}", arm_message(.first, .other))]
    PatternArmMismatch {
        first: Type,
        other: Type,
        first_span: Span,
        other_span: Span,
    },

    #[error("unbound variable `{name}`")]
    UnboundVariable { name: String, span: Span },

    #[error("unknown type `{name}`")]
    UnknownType { name: String, span: Span },

    #[error("unknown effect `{name}`")]
    UnknownEffect { name: String, span: Span },

    #[error("unknown constructor `{name}`")]
    UnknownConstructor { name: String, span: Span },

    #[error("`{name}` takes {} but is used with {actual}", count(.expected, "type parameter"))]
    KindMismatch {
        name: String,
        expected: usize,
        actual: usize,
        span: Span,
    },

    #[error("ambiguous `{trait_name}` requirement on `{}`: the type is not determined by the signature", sanitize_type_display(.ty))]
    AmbiguousTrait {
        trait_name: String,
        ty: Type,
        span: Span,
    },

    #[error("the declared signature is more general than the definition: `{declared}` is declared, but the body only has `{inferred}`")]
    SignatureTooGeneral {
        declared: String,
        inferred: String,
        span: Span,
    },

    #[error("the body requires `{requirement}`, which is not listed in `given`")]
    MissingGiven { requirement: String, span: Span },

    #[error("depends on `{dependency}`, which failed to type check")]
    DependencyFailed { dependency: String, span: Span },
}

fn count(n: &usize, noun: &str) -> String {
    if *n == 1 {
        format!("1 {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

fn supplied(n: &usize) -> String {
    if *n == 1 {
        "1 was".to_string()
    } else {
        format!("{n} were")
    }
}

fn mismatch_message(expected: &Type, actual: &Type, reason: &Reason) -> String {
    let (expected, actual) = sanitize_type_pair_display(expected, actual);
    match reason {
        Reason::FunctionArg { param_index } => format!(
            "type mismatch in argument {}: expected `{expected}`, got `{actual}`",
            param_index + 1
        ),
        Reason::CalledValue => {
            format!("cannot call a value of type `{expected}` as `{actual}`")
        }
        Reason::IfCondition => format!("if condition must be `Bool`, got `{actual}`"),
        Reason::IfBranches => {
            format!("if and else branches have different types: `{expected}` vs `{actual}`")
        }
        Reason::PatternMatch => {
            format!("pattern of type `{actual}` cannot match a value of type `{expected}`")
        }
        Reason::TypeAscription => {
            format!("type ascription mismatch: expected `{expected}`, got `{actual}`")
        }
        Reason::LetAnnotation => {
            format!("let annotation mismatch: declared `{expected}`, but the value has type `{actual}`")
        }
        Reason::DeclaredSignature => format!(
            "definition does not match its signature: declared `{expected}`, but the body has type `{actual}`"
        ),
        Reason::Recursion => {
            format!("recursive use expects `{expected}`, but the definition has type `{actual}`")
        }
        _ => format!("type mismatch: expected `{expected}`, got `{actual}`"),
    }
}

fn effect_mismatch_message(expected: &EffectRow, actual: &EffectRow, reason: &Reason) -> String {
    let (expected, actual) = sanitize_effect_pair_display(expected, actual);
    match reason {
        Reason::TopLevelValue => {
            format!("top-level value must be `pure`, but evaluating it has effects `{actual}`")
        }
        Reason::CallEffects => {
            format!("call performs `{actual}`, which is not allowed here (`{expected}`)")
        }
        _ => format!("effect mismatch: expected `{expected}`, got `{actual}`"),
    }
}

fn occurs_message(var: &TypeVarId, ty: &Type) -> String {
    let (var, ty) = sanitize_type_pair_display(&Type::Var(*var), ty);
    format!("infinite type: `{var}` would have to equal `{ty}`")
}

fn arm_message(first: &Type, other: &Type) -> String {
    let (first, other) = sanitize_type_pair_display(first, other);
    format!("match arms have different types: `{first}` vs `{other}`")
}

impl InferError {
    pub fn span(&self) -> Span {
        match self {
            InferError::TypeMismatch { span, .. }
            | InferError::EffectMismatch { span, .. }
            | InferError::OccursCheck { span, .. }
            | InferError::UnresolvedTrait { span, .. }
            | InferError::ArityMismatch { span, .. }
            | InferError::UnboundVariable { span, .. }
            | InferError::UnknownType { span, .. }
            | InferError::UnknownEffect { span, .. }
            | InferError::UnknownConstructor { span, .. }
            | InferError::KindMismatch { span, .. }
            | InferError::AmbiguousTrait { span, .. }
            | InferError::SignatureTooGeneral { span, .. }
            | InferError::MissingGiven { span, .. }
            | InferError::DependencyFailed { span, .. } => *span,
            InferError::PatternArmMismatch { other_span, .. } => *other_span,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            InferError::TypeMismatch { .. } | InferError::EffectMismatch { .. } => {
                Category::TypeMismatch
            }
            InferError::OccursCheck { .. } => Category::OccursCheck,
            InferError::UnresolvedTrait { .. } => Category::UnresolvedTrait,
            InferError::ArityMismatch { .. } => Category::ArityMismatch,
            InferError::PatternArmMismatch { .. } => Category::PatternArmMismatch,
            InferError::UnboundVariable { .. }
            | InferError::UnknownType { .. }
            | InferError::UnknownEffect { .. }
            | InferError::UnknownConstructor { .. } => Category::UndefinedName,
            InferError::KindMismatch { .. } => Category::KindMismatch,
            InferError::AmbiguousTrait { .. } => Category::AmbiguousTrait,
            InferError::SignatureTooGeneral { .. } => Category::SignatureTooGeneral,
            InferError::MissingGiven { .. } => Category::MissingGiven,
            InferError::DependencyFailed { .. } => Category::DependencyFailed,
        }
    }

    /// Render as a diagnostic attributed to `binding`.
    pub fn to_diagnostic(&self, binding: &str) -> Diagnostic {
        let category = self.category();
        let mut diag = Diagnostic::error(category, self.to_string()).in_binding(binding);
        let span = self.span();
        if !span.is_synthetic() {
            diag = diag.at(span_to_location(span));
        }
        match self {
            InferError::PatternArmMismatch {
                first,
                other,
                first_span,
                ..
            } => {
                let (first, other) = sanitize_type_pair_display(first, other);
                if !first_span.is_synthetic() {
                    diag = diag.with_label(
                        span_to_location(*first_span),
                        format!("first arm has type `{first}`"),
                    );
                }
                diag.with_help(format!(
                    "every arm must produce the same type; this arm produces `{other}`"
                ))
            }
            InferError::TypeMismatch {
                detail: Some(detail),
                ..
            } => diag.with_help(format!("the conflict: {detail}")),
            InferError::MissingGiven { requirement, .. } => {
                diag.with_help(format!("add `given {requirement}` to the signature"))
            }
            _ => diag.with_help(category.example_fix()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_ast::FileId;

    #[test]
    fn argument_mismatch_message_is_one_based() {
        let err = InferError::TypeMismatch {
            expected: Type::Int,
            actual: Type::String,
            reason: Reason::FunctionArg { param_index: 0 },
            span: Span::synthetic(),
            detail: None,
        };
        assert_eq!(
            err.to_string(),
            "type mismatch in argument 1: expected `Int`, got `String`"
        );
        assert_eq!(err.category(), Category::TypeMismatch);
    }

    #[test]
    fn arity_message_pluralizes() {
        let err = InferError::ArityMismatch {
            what: "`add`".to_string(),
            expected: 2,
            actual: 1,
            span: Span::synthetic(),
        };
        assert_eq!(err.to_string(), "`add` expects 2 arguments but 1 was supplied");
    }

    #[test]
    fn arm_mismatch_diagnostic_points_at_both_arms() {
        let file = FileId(0);
        let err = InferError::PatternArmMismatch {
            first: Type::String,
            other: Type::Int,
            first_span: Span::new(file, 10, 20),
            other_span: Span::new(file, 30, 31),
        };
        let diag = err.to_diagnostic("classify");
        assert_eq!(diag.category, Category::PatternArmMismatch);
        assert_eq!(diag.binding.as_deref(), Some("classify"));
        assert_eq!(diag.location.map(|l| l.start), Some(30));
        assert_eq!(diag.labels.len(), 1);
        assert_eq!(diag.labels[0].location.start, 10);
        assert!(diag.message.contains("`String` vs `Int`"));
    }

    #[test]
    fn effect_mismatch_on_top_level_value() {
        let err = InferError::EffectMismatch {
            expected: EffectRow::pure(),
            actual: EffectRow::closed(vec![sable_types::Label::new("IO")]),
            reason: Reason::TopLevelValue,
            span: Span::synthetic(),
        };
        assert!(err.to_string().contains("`can IO`"));
        assert!(err.to_diagnostic("greeting").location.is_none());
    }
}
