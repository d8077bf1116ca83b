//! Error reporting and diagnostics for Sable.
//!
//! Every failure the checker reports becomes a [`Diagnostic`]: a category
//! with a stable code, the binding it belongs to, and a byte range.
//! User-facing output never shows raw inference variables; callers render
//! types with canonical names before building a message.
//!
//! `sable-infer` builds them; the CLI prints them through `Display`.

use std::fmt;

// ---------------------------------------------------------------------------
// Diagnostic severity and categories
// ---------------------------------------------------------------------------

/// Errors fail the binding; warnings never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// What kind of failure a diagnostic reports. Each maps to one code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Type mismatch: expected X, got Y (including effect conflicts).
    TypeMismatch,
    /// A variable would have to contain itself.
    OccursCheck,
    /// No implementation of a trait for a concrete type.
    UnresolvedTrait,
    /// Arity mismatch in function call or constructor pattern.
    ArityMismatch,
    /// Match arms have incompatible types.
    PatternArmMismatch,
    /// Unbound variable, constructor, type or effect.
    UndefinedName,
    /// A trait obligation on a variable that does not appear in the type.
    AmbiguousTrait,
    /// A body is less polymorphic than its declared signature.
    SignatureTooGeneral,
    /// A body needs a trait obligation its signature does not declare.
    MissingGiven,
    /// A definition depends on another definition that failed to check.
    DependencyFailed,
    /// Pattern matching: non-exhaustive match.
    NonExhaustive,
    /// Malformed declaration (duplicate impl, unknown trait, missing method).
    Declaration,
    /// A type constructor is used at the wrong number of parameters.
    KindMismatch,
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::TypeMismatch,
        Category::OccursCheck,
        Category::UnresolvedTrait,
        Category::ArityMismatch,
        Category::PatternArmMismatch,
        Category::UndefinedName,
        Category::AmbiguousTrait,
        Category::SignatureTooGeneral,
        Category::MissingGiven,
        Category::DependencyFailed,
        Category::NonExhaustive,
        Category::Declaration,
        Category::KindMismatch,
    ];

    pub fn all() -> &'static [Category] {
        &Self::ALL
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::TypeMismatch => "type_mismatch",
            Category::OccursCheck => "occurs_check",
            Category::UnresolvedTrait => "unresolved_trait",
            Category::ArityMismatch => "arity_mismatch",
            Category::PatternArmMismatch => "pattern_arm_mismatch",
            Category::UndefinedName => "undefined_name",
            Category::AmbiguousTrait => "ambiguous_trait",
            Category::SignatureTooGeneral => "signature_too_general",
            Category::MissingGiven => "missing_given",
            Category::DependencyFailed => "dependency_failed",
            Category::NonExhaustive => "non_exhaustive",
            Category::Declaration => "declaration",
            Category::KindMismatch => "kind_mismatch",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Category::TypeMismatch => "E0001",
            Category::OccursCheck => "E0002",
            Category::UnresolvedTrait => "E0003",
            Category::ArityMismatch => "E0004",
            Category::PatternArmMismatch => "E0005",
            Category::UndefinedName => "E0006",
            Category::AmbiguousTrait => "E0007",
            Category::SignatureTooGeneral => "E0008",
            Category::MissingGiven => "E0009",
            Category::DependencyFailed => "E0010",
            Category::NonExhaustive => "E0011",
            Category::Declaration => "E0012",
            Category::KindMismatch => "E0013",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Category::TypeMismatch => "Two types or effect rows that must agree do not.",
            Category::OccursCheck => "A type would have to contain itself (infinite type).",
            Category::UnresolvedTrait => "No implementation of the trait exists for the type.",
            Category::ArityMismatch => "A call or constructor pattern has the wrong number of arguments.",
            Category::PatternArmMismatch => "Match arms produce incompatible types.",
            Category::UndefinedName => "A name is used that no declaration or binding introduces.",
            Category::AmbiguousTrait => {
                "A trait obligation constrains a variable that never reaches the signature."
            }
            Category::SignatureTooGeneral => {
                "The definition is less polymorphic than its declared signature."
            }
            Category::MissingGiven => {
                "The definition needs a trait obligation its signature does not declare."
            }
            Category::DependencyFailed => "The definition uses another definition that failed.",
            Category::NonExhaustive => "A match does not cover every constructor of its scrutinee.",
            Category::Declaration => "A type, trait, effect or impl declaration is malformed.",
            Category::KindMismatch => {
                "A type constructor is used with the wrong number of parameters."
            }
        }
    }

    pub fn example_fix(self) -> &'static str {
        match self {
            Category::TypeMismatch => {
                "Adjust the expression or the annotation so both sides agree."
            }
            Category::OccursCheck => "Check for a value being passed to itself.",
            Category::UnresolvedTrait => "Add an `impl` for the type or use a different type.",
            Category::ArityMismatch => "Pass exactly as many arguments as the function takes.",
            Category::PatternArmMismatch => "Make every arm return the same type.",
            Category::UndefinedName => "Define the missing name or fix the spelling.",
            Category::AmbiguousTrait => "Annotate the expression so the type is determined.",
            Category::SignatureTooGeneral => {
                "Generalize the body or narrow the declared signature."
            }
            Category::MissingGiven => "Add the obligation to the signature's `given` list.",
            Category::DependencyFailed => "Fix the errors reported for the dependency first.",
            Category::NonExhaustive => "Add an arm for each missing constructor, or a `_` arm.",
            Category::Declaration => "Follow the help text to fix the declaration.",
            Category::KindMismatch => {
                "Implement the trait for a constructor with the expected parameter count."
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Source locations (independent of sable-ast's Span)
// ---------------------------------------------------------------------------

/// Byte range of a diagnostic, converted from a `sable-ast` span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file_id: u32,
    pub start: u32,
    pub end: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}..{}", self.file_id, self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// One reported failure or warning.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// `E00xx`, derived from the category.
    pub code: Option<String>,
    pub severity: Severity,
    pub category: Category,
    /// Top-level binding the diagnostic belongs to, if any.
    pub binding: Option<String>,
    pub message: String,
    /// Where it went wrong.
    pub location: Option<SourceLocation>,
    /// Additional labeled spans (e.g., "first arm has this type").
    pub labels: Vec<DiagLabel>,
    pub help: Option<String>,
}

/// A secondary location, rendered as a `note:` line.
#[derive(Debug, Clone)]
pub struct DiagLabel {
    pub location: SourceLocation,
    pub message: String,
}

impl Diagnostic {
    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, category, message)
    }

    pub fn warning(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, message)
    }

    fn new(severity: Severity, category: Category, message: impl Into<String>) -> Self {
        Self {
            code: Some(category.code().to_string()),
            severity,
            category,
            binding: None,
            message: message.into(),
            location: None,
            labels: Vec::new(),
            help: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn in_binding(mut self, name: impl Into<String>) -> Self {
        self.binding = Some(name.into());
        self
    }

    pub fn with_label(mut self, location: SourceLocation, message: impl Into<String>) -> Self {
        self.labels.push(DiagLabel {
            location,
            message: message.into(),
        });
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        match &self.code {
            Some(code) => write!(f, "{prefix}[{code}]")?,
            None => write!(f, "{prefix}")?,
        }
        if let Some(binding) = &self.binding {
            write!(f, " in `{binding}`")?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(location) = &self.location {
            write!(f, "\n  --> {location}")?;
        }
        for label in &self.labels {
            write!(f, "\n  note: {} ({})", label.message, label.location)?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error type for crates that produce diagnostics
// ---------------------------------------------------------------------------

/// Diagnostics carried through `Result`; displays the first.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", .0.first().map(|d| d.to_string()).unwrap_or_default())]
pub struct DiagnosticError(pub Vec<Diagnostic>);

impl DiagnosticError {
    pub fn single(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }

    pub fn multiple(diags: Vec<Diagnostic>) -> Self {
        Self(diags)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(start: u32, end: u32) -> SourceLocation {
        SourceLocation {
            file_id: 0,
            start,
            end,
        }
    }

    #[test]
    fn diagnostic_builder() {
        let diag = Diagnostic::error(Category::UnresolvedTrait, "no instance of `Functor` for `Int`")
            .at(loc(10, 20))
            .in_binding("bad")
            .with_help("add `impl Functor Int`");

        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.code.as_deref(), Some("E0003"));
        assert_eq!(diag.category, Category::UnresolvedTrait);
        assert_eq!(diag.binding.as_deref(), Some("bad"));
        assert!(diag.is_error());
        assert!(diag.help.unwrap().contains("impl Functor Int"));
    }

    #[test]
    fn diagnostic_display() {
        let diag = Diagnostic::error(Category::PatternArmMismatch, "match arms disagree")
            .in_binding("classify")
            .at(loc(4, 9))
            .with_label(loc(30, 34), "this arm has type `Int`");
        let s = format!("{diag}");
        assert!(s.starts_with("error[E0005] in `classify`: match arms disagree"));
        assert!(s.contains("--> 0:4..9"));
        assert!(s.contains("note: this arm has type `Int` (0:30..34)"));
    }

    #[test]
    fn warnings_are_not_errors() {
        let diag = Diagnostic::warning(Category::NonExhaustive, "missing `None`");
        assert!(!diag.is_error());
        assert!(diag.to_string().starts_with("warning[E0011]"));
    }

    #[test]
    fn diagnostic_error_displays_first_diagnostic() {
        let err = DiagnosticError::multiple(vec![
            Diagnostic::error(Category::UndefinedName, "unbound variable `x`"),
            Diagnostic::error(Category::TypeMismatch, "second"),
        ]);
        assert_eq!(err.diagnostics().len(), 2);
        assert_eq!(err.to_string(), "error[E0006]: unbound variable `x`");
    }

    #[test]
    fn category_metadata_is_stable_and_unique() {
        let mut codes = std::collections::BTreeSet::new();
        for cat in Category::all() {
            assert!(!cat.as_str().is_empty());
            assert!(!cat.description().is_empty());
            assert!(!cat.example_fix().is_empty());
            assert!(
                codes.insert(cat.code()),
                "duplicate diagnostic code detected: {}",
                cat.code()
            );
        }
    }
}
