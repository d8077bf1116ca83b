//! Tests for inference, trait resolution and module checking.
//!
//! Each test builds declarations by hand and checks the rendered
//! signatures or the diagnostics. Verbose, but we know exactly what goes in.

use sable_ast::*;
use sable_types::{EffectRow, Type};

use crate::typeck::*;
use crate::{
    Category, CheckOptions, CheckReport, InferError, InferenceContext, Reason, VarSupply,
    check_module,
};

// ---------------------------------------------------------------------------
// Helpers for constructing AST nodes
// ---------------------------------------------------------------------------

fn s() -> Span {
    Span::new(FileId(0), 0, 1)
}

fn sp<T>(node: T) -> Spanned<T> {
    Spanned::new(node, s())
}

fn at<T>(node: T, start: u32, end: u32) -> Spanned<T> {
    Spanned::new(node, Span::new(FileId(0), start, end))
}

fn lit_int(n: i64) -> Expr {
    sp(ExprKind::Lit(Lit::Int(n)))
}

fn lit_bool(b: bool) -> Expr {
    sp(ExprKind::Lit(Lit::Bool(b)))
}

fn lit_str(value: &str) -> Expr {
    sp(ExprKind::Lit(Lit::String(value.to_string())))
}

fn var(name: &str) -> Expr {
    sp(ExprKind::Var(name.to_string()))
}

fn call(func: Expr, args: Vec<Expr>) -> Expr {
    sp(ExprKind::Call {
        func: Box::new(func),
        args,
    })
}

fn lambda(params: &[&str], body: Expr) -> Expr {
    sp(ExprKind::Lambda {
        params: params.iter().map(|p| pvar(p)).collect(),
        body: Box::new(body),
    })
}

fn let_in(name: &str, value: Expr, body: Expr) -> Expr {
    sp(ExprKind::Let {
        pattern: pvar(name),
        annotation: None,
        value: Box::new(value),
        body: Box::new(body),
    })
}

fn ascribe(expr: Expr, annotation: TypeAnnotation) -> Expr {
    sp(ExprKind::Annotated {
        expr: Box::new(expr),
        annotation: sp(annotation),
    })
}

fn if_then_else(condition: Expr, then_branch: Expr, else_branch: Expr) -> Expr {
    sp(ExprKind::If {
        condition: Box::new(condition),
        then_branch: Box::new(then_branch),
        else_branch: Box::new(else_branch),
    })
}

fn match_expr(scrutinee: Expr, arms: Vec<(Pattern, Expr)>) -> Expr {
    sp(ExprKind::Match {
        scrutinee: Box::new(scrutinee),
        arms: arms
            .into_iter()
            .map(|(pattern, body)| MatchArm { pattern, body })
            .collect(),
    })
}

fn pvar(name: &str) -> Pattern {
    sp(PatternKind::Var(name.to_string()))
}

fn ptuple(elems: Vec<Pattern>) -> Pattern {
    sp(PatternKind::Tuple(elems))
}

fn tuple(elems: Vec<Expr>) -> Expr {
    sp(ExprKind::Tuple(elems))
}

fn pctor(name: &str, args: Vec<Pattern>) -> Pattern {
    sp(PatternKind::Constructor {
        name: name.to_string(),
        args,
    })
}

fn tn(name: &str) -> TypeAnnotation {
    TypeAnnotation::Named(name.to_string())
}

fn tapp(name: &str, args: Vec<TypeAnnotation>) -> TypeAnnotation {
    TypeAnnotation::Applied(name.to_string(), args)
}

fn tfn(params: Vec<TypeAnnotation>, ret: TypeAnnotation, effect: EffectAnnotation) -> TypeAnnotation {
    TypeAnnotation::Function {
        params,
        ret: Box::new(ret),
        effect,
    }
}

fn can(name: &str) -> EffectAnnotation {
    EffectAnnotation::Var(name.to_string())
}

fn bound(trait_name: &str, type_var: &str) -> TraitBound {
    TraitBound {
        trait_name: sp(trait_name.to_string()),
        type_var: sp(type_var.to_string()),
    }
}

fn fn_decl(name: &str, params: &[&str], body: Expr) -> FnDecl {
    FnDecl {
        name: sp(name.to_string()),
        params: params.iter().map(|p| pvar(p)).collect(),
        annotation: None,
        given: Vec::new(),
        body,
        span: s(),
    }
}

fn func(name: &str, params: &[&str], body: Expr) -> Decl {
    sp(DeclKind::Function(fn_decl(name, params, body)))
}

fn annotated(
    name: &str,
    params: &[&str],
    annotation: TypeAnnotation,
    given: Vec<TraitBound>,
    body: Expr,
) -> Decl {
    let mut decl = fn_decl(name, params, body);
    decl.annotation = Some(sp(annotation));
    decl.given = given;
    sp(DeclKind::Function(decl))
}

fn trait_def(name: &str, param: &str, methods: Vec<(&str, TypeAnnotation)>) -> Decl {
    sp(DeclKind::TraitDef(TraitDef {
        name: sp(name.to_string()),
        type_param: sp(param.to_string()),
        methods: methods
            .into_iter()
            .map(|(method, annotation)| TraitMethod {
                name: sp(method.to_string()),
                annotation: sp(annotation),
                given: Vec::new(),
                span: s(),
            })
            .collect(),
    }))
}

fn impl_block(trait_name: &str, type_name: &str, methods: Vec<FnDecl>) -> Decl {
    sp(DeclKind::ImplBlock(ImplBlock {
        trait_name: sp(trait_name.to_string()),
        type_name: sp(type_name.to_string()),
        methods,
    }))
}

fn type_def(name: &str, params: &[&str], variants: Vec<(&str, Vec<TypeAnnotation>)>) -> Decl {
    sp(DeclKind::TypeDef(TypeDef {
        name: sp(name.to_string()),
        params: params.iter().map(|p| p.to_string()).collect(),
        variants: variants
            .into_iter()
            .map(|(variant, fields)| TypeVariant {
                name: sp(variant.to_string()),
                fields,
            })
            .collect(),
    }))
}

fn module(declarations: Vec<Decl>) -> Module {
    Module {
        declarations,
        span: s(),
    }
}

fn check(declarations: Vec<Decl>) -> CheckReport {
    check_module(&module(declarations), &CheckOptions::default())
}

fn rendered(report: &CheckReport, name: &str) -> String {
    report
        .signature(name)
        .unwrap_or_else(|| panic!("no signature for `{name}`: {:?}", report.diagnostics))
        .render()
}

fn only_error(report: &CheckReport) -> &sable_diag::Diagnostic {
    let errors: Vec<_> = report.diagnostics.iter().filter(|d| d.is_error()).collect();
    assert_eq!(errors.len(), 1, "expected one error, got {errors:#?}");
    errors[0]
}

// ---------------------------------------------------------------------------
// Trait fixtures
// ---------------------------------------------------------------------------

/// `trait Functor f with map : f a - (a -> b can c) -> f b can c`
fn functor_trait() -> Decl {
    trait_def(
        "Functor",
        "f",
        vec![(
            "map",
            tfn(
                vec![
                    tapp("f", vec![tn("a")]),
                    tfn(vec![tn("a")], tn("b"), can("c")),
                ],
                tapp("f", vec![tn("b")]),
                can("c"),
            ),
        )],
    )
}

/// `trait Monad m with wrap : a -> m a pure; bind : m a - (a -> m b can c) -> m b can c`
fn monad_trait() -> Decl {
    trait_def(
        "Monad",
        "m",
        vec![
            (
                "wrap",
                tfn(vec![tn("a")], tapp("m", vec![tn("a")]), EffectAnnotation::Pure),
            ),
            (
                "bind",
                tfn(
                    vec![
                        tapp("m", vec![tn("a")]),
                        tfn(vec![tn("a")], tapp("m", vec![tn("b")]), can("c")),
                    ],
                    tapp("m", vec![tn("b")]),
                    can("c"),
                ),
            ),
        ],
    )
}

/// `trait Show a with show : a -> String pure`
fn show_trait() -> Decl {
    trait_def(
        "Show",
        "a",
        vec![("show", tfn(vec![tn("a")], tn("String"), EffectAnnotation::Pure))],
    )
}

/// `map m f = match m | Some x -> Some (f x) | None -> None`
fn maybe_map() -> FnDecl {
    fn_decl(
        "map",
        &["m", "f"],
        match_expr(
            var("m"),
            vec![
                (
                    pctor("Some", vec![pvar("x")]),
                    call(var("Some"), vec![call(var("f"), vec![var("x")])]),
                ),
                (pctor("None", vec![]), var("None")),
            ],
        ),
    )
}

/// `bind m f = match m | Some x -> f x | None -> None`
fn maybe_bind() -> FnDecl {
    fn_decl(
        "bind",
        &["m", "f"],
        match_expr(
            var("m"),
            vec![
                (pctor("Some", vec![pvar("x")]), call(var("f"), vec![var("x")])),
                (pctor("None", vec![]), var("None")),
            ],
        ),
    )
}

// ---------------------------------------------------------------------------
// Trait operations and implementations
// ---------------------------------------------------------------------------

#[test]
fn functor_map_over_maybe() {
    let report = check(vec![
        functor_trait(),
        impl_block("Functor", "Maybe", vec![maybe_map()]),
    ]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(
        rendered(&report, "map"),
        "map : forall f c a b. (f a - (a -> b can c) -> f b can c)\n  given Functor f"
    );
}

#[test]
fn monad_wrap_over_maybe() {
    let wrap = fn_decl("wrap", &["a"], call(var("Some"), vec![var("a")]));
    let report = check(vec![
        monad_trait(),
        impl_block("Monad", "Maybe", vec![wrap, maybe_bind()]),
    ]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(
        rendered(&report, "wrap"),
        "wrap : forall m a. (a -> m a pure)\n  given Monad m"
    );
}

#[test]
fn report_lists_trait_operations_alphabetically() {
    let wrap = fn_decl("wrap", &["a"], call(var("Some"), vec![var("a")]));
    let report = check(vec![
        monad_trait(),
        functor_trait(),
        impl_block("Monad", "Maybe", vec![wrap, maybe_bind()]),
        impl_block("Functor", "Maybe", vec![maybe_map()]),
    ]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    insta::assert_snapshot!(report.render().trim_end(), @r"
    bind : forall m c a b. (m a - (a -> m b can c) -> m b can c)
      given Monad m
    map : forall f c a b. (f a - (a -> b can c) -> f b can c)
      given Functor f
    wrap : forall m a. (a -> m a pure)
      given Monad m
    ");
}

#[test]
fn map_on_type_without_functor_is_unresolved() {
    let report = check(vec![
        functor_trait(),
        type_def("Wrapper", &["a"], vec![("Wrap", vec![tn("a")])]),
        func(
            "bad",
            &["u"],
            call(
                var("map"),
                vec![call(var("Wrap"), vec![var("u")]), lambda(&["x"], var("x"))],
            ),
        ),
    ]);
    let diag = only_error(&report);
    assert_eq!(diag.category, Category::UnresolvedTrait);
    assert_eq!(diag.binding.as_deref(), Some("bad"));
    assert!(diag.message.contains("`Functor`"), "{}", diag.message);
    assert_eq!(report.failed, vec!["bad".to_string()]);
    assert!(report.signature("bad").is_none());
}

#[test]
fn map_on_maybe_resolves_the_impl() {
    let report = check(vec![
        functor_trait(),
        impl_block("Functor", "Maybe", vec![maybe_map()]),
        func(
            "bump",
            &["m"],
            call(
                var("map"),
                vec![
                    call(var("Some"), vec![var("m")]),
                    lambda(&["x"], var("x")),
                ],
            ),
        ),
    ]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(rendered(&report, "bump"), "bump : forall a. (a -> Maybe a pure)");
    assert!(
        report
            .resolutions
            .iter()
            .any(|(binding, r)| binding == "bump"
                && r.trait_name == "Functor"
                && r.type_name == "Maybe"
                && r.operations == ["map"])
    );
}

#[test]
fn generic_use_of_trait_operation_keeps_given() {
    let report = check(vec![
        functor_trait(),
        func(
            "same",
            &["xs"],
            call(var("map"), vec![var("xs"), lambda(&["x"], var("x"))]),
        ),
    ]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(
        rendered(&report, "same"),
        "same : forall a b. (a b -> a b pure)\n  given Functor a"
    );
}

#[test]
fn two_traits_on_one_variable_form_a_conjunction() {
    let eq_trait = trait_def(
        "Eq",
        "a",
        vec![(
            "eq",
            tfn(vec![tn("a"), tn("a")], tn("Bool"), EffectAnnotation::Pure),
        )],
    );
    let report = check(vec![
        eq_trait,
        show_trait(),
        func(
            "both",
            &["x"],
            if_then_else(
                call(var("eq"), vec![var("x"), var("x")]),
                call(var("show"), vec![var("x")]),
                lit_str("no"),
            ),
        ),
    ]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(
        rendered(&report, "both"),
        "both : forall a. (a -> String pure)\n  given Eq a, Show a"
    );
}

#[test]
fn impl_more_specific_than_trait_is_rejected() {
    // map m f = match m | Some x -> Some 1 | None -> None
    let map = fn_decl(
        "map",
        &["m", "f"],
        match_expr(
            var("m"),
            vec![
                (
                    pctor("Some", vec![pvar("x")]),
                    call(var("Some"), vec![lit_int(1)]),
                ),
                (pctor("None", vec![]), var("None")),
            ],
        ),
    );
    let report = check(vec![
        functor_trait(),
        impl_block("Functor", "Maybe", vec![map]),
    ]);
    let diag = only_error(&report);
    assert_eq!(diag.category, Category::SignatureTooGeneral);
    assert_eq!(diag.binding.as_deref(), Some("map (impl Functor Maybe)"));
    // The trait operation itself is still reported.
    assert!(report.signature("map").is_some());
}

#[test]
fn impl_for_wrong_kind_is_rejected() {
    let report = check(vec![
        functor_trait(),
        impl_block("Functor", "Int", vec![maybe_map()]),
    ]);
    let diag = only_error(&report);
    assert_eq!(diag.category, Category::KindMismatch);
}

#[test]
fn duplicate_and_incomplete_impls_are_declaration_errors() {
    let wrap = || fn_decl("wrap", &["a"], call(var("Some"), vec![var("a")]));
    let report = check(vec![
        monad_trait(),
        impl_block("Monad", "Maybe", vec![wrap(), maybe_bind()]),
        impl_block("Monad", "Maybe", vec![wrap(), maybe_bind()]),
    ]);
    assert_eq!(only_error(&report).category, Category::Declaration);

    let report = check(vec![monad_trait(), impl_block("Monad", "Maybe", vec![wrap()])]);
    let diag = only_error(&report);
    assert_eq!(diag.category, Category::Declaration);
    assert!(diag.message.contains("missing operation `bind`"), "{}", diag.message);
}

#[test]
fn impl_of_unknown_trait_is_a_declaration_error() {
    let report = check(vec![impl_block("Functor", "Maybe", vec![maybe_map()])]);
    let diag = only_error(&report);
    assert_eq!(diag.category, Category::Declaration);
    assert!(diag.message.contains("unknown trait `Functor`"));
}

// ---------------------------------------------------------------------------
// Annotated definitions
// ---------------------------------------------------------------------------

#[test]
fn missing_given_is_reported_with_declared_names() {
    let report = check(vec![
        show_trait(),
        annotated(
            "describe",
            &["x"],
            tfn(vec![tn("a")], tn("String"), EffectAnnotation::Pure),
            vec![],
            call(var("show"), vec![var("x")]),
        ),
    ]);
    let diag = only_error(&report);
    assert_eq!(diag.category, Category::MissingGiven);
    assert_eq!(
        diag.help.as_deref(),
        Some("add `given Show a` to the signature")
    );
}

#[test]
fn declared_given_covers_the_requirement() {
    let report = check(vec![
        show_trait(),
        annotated(
            "describe",
            &["x"],
            tfn(vec![tn("a")], tn("String"), EffectAnnotation::Pure),
            vec![bound("Show", "a")],
            call(var("show"), vec![var("x")]),
        ),
    ]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(
        rendered(&report, "describe"),
        "describe : forall a. (a -> String pure)\n  given Show a"
    );
}

#[test]
fn annotation_keeps_declared_variable_names() {
    let report = check(vec![annotated(
        "apply",
        &["f", "x"],
        tfn(
            vec![tfn(vec![tn("a")], tn("b"), can("e")), tn("a")],
            tn("b"),
            can("e"),
        ),
        vec![],
        call(var("f"), vec![var("x")]),
    )]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(
        rendered(&report, "apply"),
        "apply : forall e a b. ((a -> b can e) - a -> b can e)"
    );
}

#[test]
fn ascription_names_survive_in_unannotated_bindings() {
    // f x = (x : elem)
    // g y = let z : item = y in z
    let let_annotated = sp(ExprKind::Let {
        pattern: pvar("z"),
        annotation: Some(sp(tn("item"))),
        value: Box::new(var("y")),
        body: Box::new(var("z")),
    });
    let report = check(vec![
        func("f", &["x"], ascribe(var("x"), tn("elem"))),
        func("g", &["y"], let_annotated),
    ]);
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(rendered(&report, "f"), "f : forall elem. (elem -> elem pure)");
    assert_eq!(rendered(&report, "g"), "g : forall item. (item -> item pure)");
}

#[test]
fn annotation_more_general_than_body_is_rejected() {
    let report = check(vec![annotated(
        "coerce",
        &["x"],
        tfn(vec![tn("a")], tn("b"), EffectAnnotation::Pure),
        vec![],
        var("x"),
    )]);
    assert_eq!(only_error(&report).category, Category::SignatureTooGeneral);
}

#[test]
fn pure_annotation_rejects_effectful_body() {
    let report = check(vec![annotated(
        "shout",
        &["s"],
        tfn(vec![tn("String")], tn("Unit"), EffectAnnotation::Pure),
        vec![],
        call(var("print"), vec![var("s")]),
    )]);
    assert_eq!(only_error(&report).category, Category::TypeMismatch);
}

#[test]
fn unknown_type_in_annotation_fails_the_binding() {
    let report = check(vec![annotated(
        "size",
        &["x"],
        tfn(vec![tn("Vector")], tn("Int"), EffectAnnotation::Pure),
        vec![],
        lit_int(0),
    )]);
    let diag = only_error(&report);
    assert_eq!(diag.category, Category::UndefinedName);
    assert_eq!(report.failed, vec!["size".to_string()]);
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

#[test]
fn identity_is_pure() {
    let report = check(vec![func("id", &["x"], var("x"))]);
    assert_eq!(rendered(&report, "id"), "id : forall a. (a -> a pure)");
}

#[test]
fn calling_effectful_parameter_propagates_its_effect() {
    let report = check(vec![func(
        "apply",
        &["f", "x"],
        call(var("f"), vec![var("x")]),
    )]);
    assert_eq!(
        rendered(&report, "apply"),
        "apply : forall c a b. ((a -> b can c) - a -> b can c)"
    );
}

#[test]
fn effect_operation_adds_its_label() {
    let report = check(vec![func(
        "greet",
        &["name"],
        call(var("print"), vec![var("name")]),
    )]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(rendered(&report, "greet"), "greet : String -> Unit can IO");
}

#[test]
fn lambda_value_is_pure() {
    let report = check(vec![func("konst", &[], lambda(&["x"], lit_int(1)))]);
    assert_eq!(rendered(&report, "konst"), "konst : forall a. (a -> Int pure)");
}

#[test]
fn effectful_top_level_value_is_rejected() {
    let report = check(vec![func(
        "greeting",
        &[],
        call(var("print"), vec![lit_str("hi")]),
    )]);
    let diag = only_error(&report);
    assert_eq!(diag.category, Category::TypeMismatch);
    assert!(
        diag.message.contains("top-level value must be `pure`"),
        "{}",
        diag.message
    );
}

#[test]
fn top_level_value_without_quantifiers() {
    let report = check(vec![func("answer", &[], lit_int(42))]);
    assert_eq!(rendered(&report, "answer"), "answer : Int");
}

// ---------------------------------------------------------------------------
// Pattern matching
// ---------------------------------------------------------------------------

#[test]
fn arms_with_different_types_report_both_locations() {
    let body = sp(ExprKind::Match {
        scrutinee: Box::new(var("m")),
        arms: vec![
            MatchArm {
                pattern: pctor("Some", vec![pvar("x")]),
                body: at(ExprKind::Lit(Lit::Int(1)), 20, 21),
            },
            MatchArm {
                pattern: pctor("None", vec![]),
                body: at(ExprKind::Var("None".to_string()), 30, 34),
            },
        ],
    });
    let report = check(vec![func("classify", &["m"], body)]);
    let diag = only_error(&report);
    assert_eq!(diag.category, Category::PatternArmMismatch);
    assert_eq!(diag.location.map(|l| l.start), Some(30));
    assert_eq!(diag.labels.len(), 1);
    assert_eq!(diag.labels[0].location.start, 20);
    assert!(diag.message.contains("`Int` vs `Maybe"), "{}", diag.message);
}

#[test]
fn non_exhaustive_match_is_a_warning() {
    let report = check(vec![func(
        "unwrap",
        &["m"],
        match_expr(var("m"), vec![(pctor("Some", vec![pvar("x")]), var("x"))]),
    )]);
    assert!(!report.has_errors());
    assert_eq!(report.diagnostics.len(), 1);
    let warning = &report.diagnostics[0];
    assert_eq!(warning.category, Category::NonExhaustive);
    assert_eq!(warning.message, "non-exhaustive match: missing `None`");
    assert_eq!(
        rendered(&report, "unwrap"),
        "unwrap : forall a. (Maybe a -> a pure)"
    );
}

#[test]
fn constructor_pattern_arity_is_checked() {
    let report = check(vec![func(
        "broken",
        &["m"],
        match_expr(
            var("m"),
            vec![(pctor("Some", vec![pvar("x"), pvar("y")]), var("x"))],
        ),
    )]);
    assert_eq!(only_error(&report).category, Category::ArityMismatch);
}

#[test]
fn user_sum_types_sit_beside_the_prelude() {
    let report = check(vec![
        type_def(
            "Shape",
            &[],
            vec![("Circle", vec![tn("Float")]), ("Dot", vec![])],
        ),
        func(
            "is_dot",
            &["s"],
            match_expr(
                var("s"),
                vec![
                    (pctor("Dot", vec![]), lit_bool(true)),
                    (sp(PatternKind::Wildcard), lit_bool(false)),
                ],
            ),
        ),
        func("nothing", &[], var("None")),
    ]);
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(rendered(&report, "is_dot"), "is_dot : Shape -> Bool pure");
    assert_eq!(rendered(&report, "nothing"), "nothing : forall a. (Maybe a)");
}

#[test]
fn arms_with_conflicting_effects_are_an_arm_mismatch() {
    // pick b = match b | True -> fn u -> print "a" | False -> (fn u -> u : Unit -> Unit pure)
    let report = check(vec![func(
        "pick",
        &["b"],
        match_expr(
            var("b"),
            vec![
                (
                    sp(PatternKind::Lit(Lit::Bool(true))),
                    lambda(&["u"], call(var("print"), vec![lit_str("a")])),
                ),
                (
                    sp(PatternKind::Lit(Lit::Bool(false))),
                    ascribe(
                        lambda(&["u"], var("u")),
                        tfn(vec![tn("Unit")], tn("Unit"), EffectAnnotation::Pure),
                    ),
                ),
            ],
        ),
    )]);
    assert_eq!(only_error(&report).category, Category::PatternArmMismatch);
}

#[test]
fn match_over_recursive_type_is_checked() {
    // type List a = Cons a (List a) | Nil
    // len l = match l | Cons x xs -> 1 | Nil -> 0
    // second l = match l | Cons x (Cons y ys) -> y | Nil -> 0
    let list = || {
        type_def(
            "List",
            &["a"],
            vec![
                ("Cons", vec![tn("a"), tapp("List", vec![tn("a")])]),
                ("Nil", vec![]),
            ],
        )
    };
    let report = check(vec![
        list(),
        func(
            "len",
            &["l"],
            match_expr(
                var("l"),
                vec![
                    (pctor("Cons", vec![pvar("x"), pvar("xs")]), lit_int(1)),
                    (pctor("Nil", vec![]), lit_int(0)),
                ],
            ),
        ),
        func(
            "second",
            &["l"],
            match_expr(
                var("l"),
                vec![
                    (
                        pctor(
                            "Cons",
                            vec![pvar("x"), pctor("Cons", vec![pvar("y"), pvar("ys")])],
                        ),
                        var("y"),
                    ),
                    (pctor("Nil", vec![]), lit_int(0)),
                ],
            ),
        ),
    ]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(rendered(&report, "len"), "len : forall a. (List a -> Int pure)");
    assert_eq!(rendered(&report, "second"), "second : List Int -> Int pure");
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].category, Category::NonExhaustive);
    assert_eq!(
        report.diagnostics[0].message,
        "non-exhaustive match: missing `Cons _ Nil`"
    );
}

#[test]
fn swap_exchanges_tuple_elements() {
    // swap p = match p | (x, y) -> (y, x)
    let report = check(vec![func(
        "swap",
        &["p"],
        match_expr(
            var("p"),
            vec![(ptuple(vec![pvar("x"), pvar("y")]), tuple(vec![var("y"), var("x")]))],
        ),
    )]);
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(rendered(&report, "swap"), "swap : forall a b. ((a, b) -> (b, a) pure)");
}

#[test]
fn tuple_annotation_keeps_declared_names() {
    // fst : (a, b) -> a pure
    // fst p = match p | (x, _) -> x
    let report = check(vec![annotated(
        "fst",
        &["p"],
        tfn(
            vec![TypeAnnotation::Tuple(vec![tn("a"), tn("b")])],
            tn("a"),
            EffectAnnotation::Pure,
        ),
        Vec::new(),
        match_expr(
            var("p"),
            vec![(ptuple(vec![pvar("x"), sp(PatternKind::Wildcard)]), var("x"))],
        ),
    )]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(rendered(&report, "fst"), "fst : forall a b. ((a, b) -> a pure)");
}

#[test]
fn tuple_match_reports_missing_element_case() {
    // both p = match p | (True, x) -> x
    let report = check(vec![func(
        "both",
        &["p"],
        match_expr(
            var("p"),
            vec![(
                ptuple(vec![sp(PatternKind::Lit(Lit::Bool(true))), pvar("x")]),
                var("x"),
            )],
        ),
    )]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(rendered(&report, "both"), "both : forall a. ((Bool, a) -> a pure)");
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(
        report.diagnostics[0].message,
        "non-exhaustive match: missing `(False, _)`"
    );
}

#[test]
fn tuples_of_different_sizes_do_not_unify() {
    // triple = ((1, 2) : (Int, Int, Int))
    let report = check(vec![func(
        "triple",
        &[],
        ascribe(
            tuple(vec![lit_int(1), lit_int(2)]),
            TypeAnnotation::Tuple(vec![tn("Int"), tn("Int"), tn("Int")]),
        ),
    )]);
    assert_eq!(only_error(&report).category, Category::TypeMismatch);
    assert!(report.signature("triple").is_none());
}

// ---------------------------------------------------------------------------
// Failures and isolation
// ---------------------------------------------------------------------------

#[test]
fn unbound_variable() {
    let report = check(vec![func("f", &["x"], var("y"))]);
    let diag = only_error(&report);
    assert_eq!(diag.category, Category::UndefinedName);
    assert_eq!(diag.message, "unbound variable `y`");
}

#[test]
fn call_with_too_few_arguments() {
    let report = check(vec![
        func("add", &["x", "y"], var("x")),
        func("use_add", &["n"], call(var("add"), vec![var("n")])),
    ]);
    let diag = only_error(&report);
    assert_eq!(diag.category, Category::ArityMismatch);
    assert_eq!(diag.message, "`add` expects 2 arguments but 1 was supplied");
}

#[test]
fn self_application_fails_occurs_check() {
    let report = check(vec![func(
        "omega",
        &["x"],
        call(var("x"), vec![var("x")]),
    )]);
    assert_eq!(only_error(&report).category, Category::OccursCheck);
}

#[test]
fn dependents_of_a_failed_binding_report_dependency_failure() {
    let report = check(vec![
        func("broken", &["x"], var("missing")),
        func("user", &["y"], call(var("broken"), vec![var("y")])),
        func("fine", &["z"], var("z")),
    ]);
    assert_eq!(report.failed, vec!["broken".to_string(), "user".to_string()]);
    let dependent = report
        .diagnostics
        .iter()
        .find(|d| d.binding.as_deref() == Some("user"))
        .expect("diagnostic for user");
    assert_eq!(dependent.category, Category::DependencyFailed);
    assert_eq!(
        dependent.message,
        "depends on `broken`, which failed to type check"
    );
    assert!(report.signature("fine").is_some());
}

#[test]
fn duplicate_definition_is_a_declaration_error() {
    let report = check(vec![
        func("twice", &["x"], var("x")),
        func("twice", &["y"], lit_int(1)),
    ]);
    assert_eq!(only_error(&report).category, Category::Declaration);
}

// ---------------------------------------------------------------------------
// Polymorphism
// ---------------------------------------------------------------------------

#[test]
fn let_bound_lambda_is_generalized() {
    // pair x = let id = fn y -> y in if id true then id x else x
    let body = let_in(
        "id",
        lambda(&["y"], var("y")),
        if_then_else(
            call(var("id"), vec![lit_bool(true)]),
            call(var("id"), vec![var("x")]),
            var("x"),
        ),
    );
    let report = check(vec![func("pair", &["x"], body)]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(rendered(&report, "pair"), "pair : forall a. (a -> a pure)");
}

#[test]
fn let_bound_lambda_keeps_its_trait_obligation() {
    // both u = let s = fn x -> show x in let a = s 1 in s "hi"
    let body = let_in(
        "s",
        lambda(&["x"], call(var("show"), vec![var("x")])),
        let_in(
            "a",
            call(var("s"), vec![lit_int(1)]),
            call(var("s"), vec![lit_str("hi")]),
        ),
    );
    let report = check(vec![
        show_trait(),
        impl_block("Show", "Int", vec![fn_decl("show", &["n"], lit_str("int"))]),
        impl_block("Show", "String", vec![fn_decl("show", &["t"], var("t"))]),
        func("both", &["u"], body),
    ]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(rendered(&report, "both"), "both : forall a. (a -> String pure)");
    let resolved: Vec<&str> = report
        .resolutions
        .iter()
        .filter(|(binding, _)| binding == "both")
        .map(|(_, r)| r.type_name.as_str())
        .collect();
    assert!(resolved.contains(&"Int") && resolved.contains(&"String"), "{resolved:?}");
}

#[test]
fn let_bound_lambda_over_outer_variable_defers_its_obligation() {
    // wrap y = let s = fn x -> show y in s 1
    let body = let_in(
        "s",
        lambda(&["x"], call(var("show"), vec![var("y")])),
        call(var("s"), vec![lit_int(1)]),
    );
    let report = check(vec![show_trait(), func("wrap", &["y"], body)]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(
        rendered(&report, "wrap"),
        "wrap : forall a. (a -> String pure)\n  given Show a"
    );
}

#[test]
fn top_level_bindings_are_used_polymorphically() {
    let report = check(vec![
        func("id", &["x"], var("x")),
        func(
            "both",
            &[],
            if_then_else(
                call(var("id"), vec![lit_bool(true)]),
                call(var("id"), vec![lit_int(1)]),
                lit_int(2),
            ),
        ),
    ]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(rendered(&report, "both"), "both : Int");
}

#[test]
fn mutual_recursion_is_inferred_together() {
    let report = check(vec![
        func("ping", &["n"], call(var("pong"), vec![var("n")])),
        func("pong", &["n"], call(var("ping"), vec![var("n")])),
    ]);
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(rendered(&report, "ping"), "ping : forall a b. (a -> b pure)");
    assert_eq!(rendered(&report, "pong"), "pong : forall a b. (a -> b pure)");
}

// ---------------------------------------------------------------------------
// Expression-level inference
// ---------------------------------------------------------------------------

fn infer(expr: &Expr) -> Result<Typed, InferError> {
    let mut ctx = InferenceContext::new(VarSupply::with_offsets(0, 0));
    let mut env = TypeEnv::new();
    let typed = infer_expr(expr, &mut env, &mut ctx, &Registries::default())?;
    Ok(Typed {
        ty: ctx.apply(&typed.ty),
        effects: ctx.apply_effects(&typed.effects),
    })
}

#[test]
fn literal_has_primitive_type() {
    let typed = infer(&lit_str("hi")).unwrap();
    assert_eq!(typed.ty, Type::String);
    assert_eq!(typed.effects, EffectRow::pure());
}

#[test]
fn lambda_has_open_latent_effect() {
    let typed = infer(&lambda(&["x"], var("x"))).unwrap();
    let Type::Function(ft) = &typed.ty else {
        panic!("expected a function, got {:?}", typed.ty);
    };
    assert_eq!(ft.params[0], *ft.ret);
    assert!(!ft.effects.is_closed());
    assert!(ft.effects.labels.is_empty());
    assert_eq!(typed.effects, EffectRow::pure());
}

#[test]
fn if_branches_must_agree() {
    let err = infer(&if_then_else(lit_bool(true), lit_int(1), lit_str("no"))).unwrap_err();
    match err {
        InferError::TypeMismatch { reason, .. } => assert_eq!(reason, Reason::IfBranches),
        other => panic!("expected TypeMismatch, got {other:?}"),
    }
}

#[test]
fn if_condition_must_be_bool() {
    let err = infer(&if_then_else(lit_int(0), lit_int(1), lit_int(2))).unwrap_err();
    assert!(err.to_string().contains("if condition must be `Bool`"));
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

fn chain_module(len: usize) -> Module {
    let mut decls = vec![functor_trait(), impl_block("Functor", "Maybe", vec![maybe_map()])];
    decls.push(func("step0", &["x"], call(var("Some"), vec![var("x")])));
    for i in 1..len {
        let prev = format!("step{}", i - 1);
        let body = if i % 3 == 0 {
            call(var("map"), vec![var("x"), var(&prev)])
        } else {
            call(var(&prev), vec![var("x")])
        };
        decls.push(func(&format!("step{i}"), &["x"], body));
        decls.push(func(&format!("leaf{i}"), &["y"], call(var("Some"), vec![var("y")])));
    }
    decls.push(func("oops", &["z"], var("nowhere")));
    module(decls)
}

#[test]
fn parallel_check_matches_sequential() {
    let module = chain_module(24);
    let sequential = check_module(&module, &CheckOptions::default());
    let parallel = check_module(
        &module,
        &CheckOptions {
            trace: false,
            jobs: 4,
        },
    );
    assert_eq!(sequential.render(), parallel.render());
    assert_eq!(sequential.failed, parallel.failed);
    let messages = |r: &CheckReport| -> Vec<String> {
        r.diagnostics.iter().map(|d| d.to_string()).collect()
    };
    assert_eq!(messages(&sequential), messages(&parallel));
}

#[test]
fn traces_are_recorded_per_binding() {
    let options = CheckOptions {
        trace: true,
        jobs: 1,
    };
    let report = check_module(
        &module(vec![func("apply", &["f", "x"], call(var("f"), vec![var("x")]))]),
        &options,
    );
    assert_eq!(report.traces.len(), 1);
    let trace = &report.traces[0];
    assert_eq!(trace.binding, "apply");
    assert!(!trace.unify.is_empty());
    assert!(!trace.infer.is_empty());
    let json = serde_json::to_string(trace).unwrap();
    assert!(json.contains("\"binding\":\"apply\""));

    let quiet = check_module(
        &module(vec![func("apply", &["f", "x"], call(var("f"), vec![var("x")]))]),
        &CheckOptions::default(),
    );
    assert!(quiet.traces.is_empty());
}
