//! Generated Sable modules and types for the checker benchmarks.

use sable_ast::{
    Decl, DeclKind, EffectAnnotation, Expr, ExprKind, FileId, FnDecl, ImplBlock, Lit, MatchArm,
    Module, Pattern, PatternKind, Span, Spanned, TraitDef, TraitMethod, TypeAnnotation,
};
use sable_types::{EffectRow, EffectVarId, Type, TypeVarId};

fn sp<T>(node: T) -> Spanned<T> {
    Spanned::new(node, Span::new(FileId(0), 0, 0))
}

fn var(name: &str) -> Expr {
    sp(ExprKind::Var(name.to_string()))
}

fn pvar(name: &str) -> Pattern {
    sp(PatternKind::Var(name.to_string()))
}

fn call(func: &str, args: Vec<Expr>) -> Expr {
    sp(ExprKind::Call {
        func: Box::new(var(func)),
        args,
    })
}

fn function(name: &str, params: &[&str], body: Expr) -> FnDecl {
    FnDecl {
        name: sp(name.to_string()),
        params: params.iter().map(|p| pvar(p)).collect(),
        annotation: None,
        given: Vec::new(),
        body,
        span: Span::new(FileId(0), 0, 0),
    }
}

fn decl(f: FnDecl) -> Decl {
    sp(DeclKind::Function(f))
}

/// `trait Functor f with map`, plus `impl Functor Maybe`.
pub fn functor_decls() -> Vec<Decl> {
    let named = |n: &str| TypeAnnotation::Named(n.to_string());
    let applied =
        |head: &str, arg: &str| TypeAnnotation::Applied(head.to_string(), vec![named(arg)]);
    let map_annotation = TypeAnnotation::Function {
        params: vec![
            applied("f", "a"),
            TypeAnnotation::Function {
                params: vec![named("a")],
                ret: Box::new(named("b")),
                effect: EffectAnnotation::Var("c".to_string()),
            },
        ],
        ret: Box::new(applied("f", "b")),
        effect: EffectAnnotation::Var("c".to_string()),
    };
    let functor = TraitDef {
        name: sp("Functor".to_string()),
        type_param: sp("f".to_string()),
        methods: vec![TraitMethod {
            name: sp("map".to_string()),
            annotation: sp(map_annotation),
            given: Vec::new(),
            span: Span::new(FileId(0), 0, 0),
        }],
    };
    let map_body = sp(ExprKind::Match {
        scrutinee: Box::new(var("m")),
        arms: vec![
            MatchArm {
                pattern: sp(PatternKind::Constructor {
                    name: "Some".to_string(),
                    args: vec![pvar("x")],
                }),
                body: call("Some", vec![call("f", vec![var("x")])]),
            },
            MatchArm {
                pattern: sp(PatternKind::Constructor {
                    name: "None".to_string(),
                    args: Vec::new(),
                }),
                body: var("None"),
            },
        ],
    });
    vec![
        sp(DeclKind::TraitDef(functor)),
        sp(DeclKind::ImplBlock(ImplBlock {
            trait_name: sp("Functor".to_string()),
            type_name: sp("Maybe".to_string()),
            methods: vec![function("map", &["m", "f"], map_body)],
        })),
    ]
}

/// Each definition depends on the previous one, so every component is its
/// own wave.
pub fn build_chain_module(len: usize) -> Module {
    let mut declarations = functor_decls();
    declarations.push(decl(function("step0", &["x"], call("Some", vec![var("x")]))));
    for idx in 1..len.max(1) {
        let prev = format!("step{}", idx - 1);
        let body = if idx % 4 == 0 {
            call("map", vec![call("Some", vec![var("x")]), var("id")])
        } else {
            call(&prev, vec![var("x")])
        };
        declarations.push(decl(function(&format!("step{idx}"), &["x"], body)));
    }
    declarations.push(decl(function("id", &["y"], var("y"))));
    Module {
        declarations,
        span: Span::synthetic(),
    }
}

/// Definitions that depend only on the prelude: one wave, all parallel.
pub fn build_independent_module(len: usize) -> Module {
    let mut declarations = functor_decls();
    for idx in 0..len.max(1) {
        let body = sp(ExprKind::Lambda {
            params: vec![pvar("y")],
            body: Box::new(call(
                "map",
                vec![
                    call("Some", vec![var("x")]),
                    sp(ExprKind::Lambda {
                        params: vec![pvar("z")],
                        body: Box::new(sp(ExprKind::Lit(Lit::Int(idx as i64)))),
                    }),
                ],
            )),
        });
        declarations.push(decl(function(&format!("lift{idx}"), &["x"], body)));
    }
    Module {
        declarations,
        span: Span::synthetic(),
    }
}

/// `t0 -> t1 -> ... -> Int` against `Int -> Int -> ... -> t_n`, nested
/// through return positions.
pub fn build_unify_pair(depth: usize) -> (Type, Type) {
    let mut left = Type::Int;
    let mut right = Type::Var(TypeVarId(depth as u32));
    for idx in 0..depth {
        let tail = EffectRow::var(EffectVarId(idx as u32));
        left = Type::function(vec![Type::Var(TypeVarId(idx as u32))], left, tail);
        right = Type::function(
            vec![Type::named("Maybe", vec![Type::Int])],
            right,
            EffectRow::pure(),
        );
    }
    (left, right)
}
