//! Exhaustiveness checking for match expressions.
//!
//! After inference resolves the scrutinee type, this module checks whether
//! the arms' patterns cover every value. Finite types (`Bool`, `Unit`, sum
//! types) are split by constructor and checked field by field; infinite
//! types (`Int`, `Float`, `String`) and unresolved types need a catch-all.
//!
//! Missing cases are reported as witness patterns such as `None` or
//! `Some False`. A non-exhaustive match is a warning, never an error.

use sable_ast::{Lit, Pattern, PatternKind};
use sable_types::{Substitution, Type};

use crate::typeck::SumTypeRegistry;

static WILDCARD: PatternKind = PatternKind::Wildcard;

/// Constructor name standing for the single shape of a tuple type.
const TUPLE: &str = "(,)";

/// Witness patterns for the values no arm matches. Empty means exhaustive.
pub fn check_exhaustiveness(
    scrutinee_ty: &Type,
    patterns: &[&Pattern],
    sum_types: &SumTypeRegistry,
) -> Vec<String> {
    let rows: Vec<Vec<&PatternKind>> = patterns.iter().map(|p| vec![&p.node]).collect();
    missing_rows(&rows, std::slice::from_ref(scrutinee_ty), sum_types)
        .into_iter()
        .filter_map(|mut witness| witness.pop())
        .collect()
}

/// One constructor of a finite type, with the types of its fields.
struct Ctor {
    name: String,
    fields: Vec<Type>,
}

fn constructors_of(ty: &Type, sum_types: &SumTypeRegistry) -> Option<Vec<Ctor>> {
    let nullary = |name: &str| Ctor {
        name: name.to_string(),
        fields: Vec::new(),
    };
    match ty {
        Type::Bool => Some(vec![nullary("True"), nullary("False")]),
        Type::Unit => Some(vec![nullary("()")]),
        Type::Tuple(elems) => Some(vec![Ctor {
            name: TUPLE.to_string(),
            fields: elems.clone(),
        }]),
        Type::Named(name, args) => {
            let info = sum_types.lookup_type(name)?;
            let mut subst = Substitution::new();
            for (param, arg) in info.params.iter().zip(args) {
                subst = subst.with_type(*param, arg.clone());
            }
            Some(
                info.variants
                    .iter()
                    .map(|variant| Ctor {
                        name: variant.name.clone(),
                        fields: variant.fields.iter().map(|f| subst.apply(f)).collect(),
                    })
                    .collect(),
            )
        }
        _ => None,
    }
}

/// Does `pat` match values built with `ctor`? Returns the sub-patterns for
/// the constructor's fields.
fn specialize<'p>(pat: &'p PatternKind, ctor: &Ctor) -> Option<Vec<&'p PatternKind>> {
    match pat {
        PatternKind::Wildcard | PatternKind::Var(_) => Some(vec![&WILDCARD; ctor.fields.len()]),
        PatternKind::Constructor { name, args } if *name == ctor.name => {
            Some(args.iter().map(|a| &a.node).collect())
        }
        PatternKind::Tuple(elems) if ctor.name == TUPLE => {
            Some(elems.iter().map(|e| &e.node).collect())
        }
        PatternKind::Lit(Lit::Bool(true)) if ctor.name == "True" => Some(Vec::new()),
        PatternKind::Lit(Lit::Bool(false)) if ctor.name == "False" => Some(Vec::new()),
        PatternKind::Lit(Lit::Unit) if ctor.name == "()" => Some(Vec::new()),
        _ => None,
    }
}

/// Witness vectors (one pattern per column) for values matched by no row.
///
/// The first column is split by constructor only when its head
/// constructors cover the whole type. Otherwise only the catch-all rows
/// can match the missing constructors, so the search continues on those
/// rows alone. Every split consumes a constructor pattern, which keeps
/// recursive types finite.
fn missing_rows(
    rows: &[Vec<&PatternKind>],
    tys: &[Type],
    sum_types: &SumTypeRegistry,
) -> Vec<Vec<String>> {
    let Some((first_ty, rest_tys)) = tys.split_first() else {
        return if rows.is_empty() { vec![Vec::new()] } else { Vec::new() };
    };

    let ctors = constructors_of(first_ty, sum_types).unwrap_or_default();
    let heads: Vec<&str> = rows.iter().filter_map(|row| head_name(row[0])).collect();
    let complete = !ctors.is_empty() && ctors.iter().all(|c| heads.contains(&c.name.as_str()));
    if complete {
        return split_rows(rows, &ctors, rest_tys, sum_types);
    }

    let defaults: Vec<Vec<&PatternKind>> = rows
        .iter()
        .filter(|row| row[0].is_catch_all())
        .map(|row| row[1..].to_vec())
        .collect();
    let sub_witnesses = missing_rows(&defaults, rest_tys, sum_types);
    let missing: Vec<String> = if heads.is_empty() || ctors.is_empty() {
        vec!["_".to_string()]
    } else {
        ctors
            .iter()
            .filter(|c| !heads.contains(&c.name.as_str()))
            .map(|c| render_ctor(&c.name, &vec!["_".to_string(); c.fields.len()]))
            .collect()
    };
    let mut witnesses = Vec::new();
    for head in &missing {
        for sub in &sub_witnesses {
            let mut witness = vec![head.clone()];
            witness.extend_from_slice(sub);
            witnesses.push(witness);
        }
    }
    witnesses
}

/// Specialize the matrix by each constructor in turn.
fn split_rows(
    rows: &[Vec<&PatternKind>],
    ctors: &[Ctor],
    rest_tys: &[Type],
    sum_types: &SumTypeRegistry,
) -> Vec<Vec<String>> {
    let mut witnesses = Vec::new();
    for ctor in ctors {
        let specialized: Vec<Vec<&PatternKind>> = rows
            .iter()
            .filter_map(|row| {
                let mut fields = specialize(row[0], ctor)?;
                fields.extend_from_slice(&row[1..]);
                Some(fields)
            })
            .collect();
        let mut column_tys = ctor.fields.clone();
        column_tys.extend_from_slice(rest_tys);
        for sub in missing_rows(&specialized, &column_tys, sum_types) {
            let (args, rest) = sub.split_at(ctor.fields.len());
            let mut witness = vec![render_ctor(&ctor.name, args)];
            witness.extend_from_slice(rest);
            witnesses.push(witness);
        }
    }
    witnesses
}

/// The constructor a pattern starts with, if it is not a catch-all.
fn head_name(pat: &PatternKind) -> Option<&str> {
    match pat {
        PatternKind::Constructor { name, .. } => Some(name.as_str()),
        PatternKind::Tuple(_) => Some(TUPLE),
        PatternKind::Lit(Lit::Bool(true)) => Some("True"),
        PatternKind::Lit(Lit::Bool(false)) => Some("False"),
        PatternKind::Lit(Lit::Unit) => Some("()"),
        _ => None,
    }
}

fn render_ctor(name: &str, args: &[String]) -> String {
    if name == TUPLE {
        return format!("({})", args.join(", "));
    }
    let mut out = name.to_string();
    for arg in args {
        if arg.contains(' ') && !arg.starts_with('(') {
            out.push_str(&format!(" ({arg})"));
        } else {
            out.push(' ');
            out.push_str(arg);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_ast::{Span, Spanned};
    use sable_types::TypeVarId;

    use crate::typeck::{ConstructorInfo, SumTypeInfo};

    fn pat(kind: PatternKind) -> Pattern {
        Spanned::new(kind, Span::synthetic())
    }

    fn ctor(name: &str, args: Vec<Pattern>) -> Pattern {
        pat(PatternKind::Constructor {
            name: name.to_string(),
            args,
        })
    }

    fn registry() -> SumTypeRegistry {
        let a = TypeVarId(0);
        let mut registry = SumTypeRegistry::new();
        registry.register(SumTypeInfo {
            name: "Maybe".to_string(),
            params: vec![a],
            param_names: vec!["a".to_string()],
            variants: vec![
                ConstructorInfo {
                    name: "Some".to_string(),
                    type_name: "Maybe".to_string(),
                    fields: vec![Type::Var(a)],
                    span: Span::synthetic(),
                },
                ConstructorInfo {
                    name: "None".to_string(),
                    type_name: "Maybe".to_string(),
                    fields: vec![],
                    span: Span::synthetic(),
                },
            ],
            span: Span::synthetic(),
        });
        registry
    }

    fn maybe(arg: Type) -> Type {
        Type::named("Maybe", vec![arg])
    }

    fn check(ty: &Type, patterns: &[Pattern]) -> Vec<String> {
        let refs: Vec<&Pattern> = patterns.iter().collect();
        check_exhaustiveness(ty, &refs, &registry())
    }

    #[test]
    fn catch_all_covers_everything() {
        assert!(check(&Type::Int, &[pat(PatternKind::Var("n".to_string()))]).is_empty());
    }

    #[test]
    fn infinite_type_needs_catch_all() {
        let missing = check(&Type::Int, &[pat(PatternKind::Lit(Lit::Int(0)))]);
        assert_eq!(missing, vec!["_"]);
    }

    #[test]
    fn bool_needs_both_literals() {
        let only_true = [pat(PatternKind::Lit(Lit::Bool(true)))];
        assert_eq!(check(&Type::Bool, &only_true), vec!["False"]);
        let both = [
            pat(PatternKind::Lit(Lit::Bool(true))),
            pat(PatternKind::Lit(Lit::Bool(false))),
        ];
        assert!(check(&Type::Bool, &both).is_empty());
    }

    #[test]
    fn missing_variant_is_reported() {
        let patterns = [ctor("Some", vec![pat(PatternKind::Wildcard)])];
        assert_eq!(check(&maybe(Type::Int), &patterns), vec!["None"]);
    }

    #[test]
    fn nested_patterns_are_checked() {
        let patterns = [
            ctor("Some", vec![pat(PatternKind::Lit(Lit::Bool(true)))]),
            ctor("None", vec![]),
        ];
        assert_eq!(check(&maybe(Type::Bool), &patterns), vec!["Some False"]);
    }

    #[test]
    fn nested_patterns_covering_every_case_are_exhaustive() {
        let patterns = [
            ctor("Some", vec![pat(PatternKind::Lit(Lit::Bool(true)))]),
            ctor("Some", vec![pat(PatternKind::Lit(Lit::Bool(false)))]),
            ctor("None", vec![]),
        ];
        assert!(check(&maybe(Type::Bool), &patterns).is_empty());
    }

    #[test]
    fn deep_witness_is_parenthesized() {
        let patterns = [
            ctor("None", vec![]),
            ctor("Some", vec![ctor("Some", vec![pat(PatternKind::Wildcard)])]),
        ];
        assert_eq!(
            check(&maybe(maybe(Type::Int)), &patterns),
            vec!["Some None"]
        );
        let patterns = [ctor("None", vec![]), ctor("Some", vec![ctor("None", vec![])])];
        assert_eq!(
            check(&maybe(maybe(Type::Int)), &patterns),
            vec!["Some (Some _)"]
        );
    }

    fn list_registry() -> SumTypeRegistry {
        let a = TypeVarId(0);
        let list = Type::named("List", vec![Type::Var(a)]);
        let mut registry = SumTypeRegistry::new();
        registry.register(SumTypeInfo {
            name: "List".to_string(),
            params: vec![a],
            param_names: vec!["a".to_string()],
            variants: vec![
                ConstructorInfo {
                    name: "Cons".to_string(),
                    type_name: "List".to_string(),
                    fields: vec![Type::Var(a), list],
                    span: Span::synthetic(),
                },
                ConstructorInfo {
                    name: "Nil".to_string(),
                    type_name: "List".to_string(),
                    fields: vec![],
                    span: Span::synthetic(),
                },
            ],
            span: Span::synthetic(),
        });
        registry
    }

    fn check_list(patterns: &[Pattern]) -> Vec<String> {
        let refs: Vec<&Pattern> = patterns.iter().collect();
        let ty = Type::named("List", vec![Type::Int]);
        check_exhaustiveness(&ty, &refs, &list_registry())
    }

    #[test]
    fn recursive_type_with_every_constructor_is_exhaustive() {
        let patterns = [
            ctor(
                "Cons",
                vec![
                    pat(PatternKind::Var("x".to_string())),
                    pat(PatternKind::Var("xs".to_string())),
                ],
            ),
            ctor("Nil", vec![]),
        ];
        assert!(check_list(&patterns).is_empty());
    }

    #[test]
    fn recursive_type_reports_missing_nested_case() {
        let patterns = [
            ctor(
                "Cons",
                vec![
                    pat(PatternKind::Wildcard),
                    ctor(
                        "Cons",
                        vec![pat(PatternKind::Wildcard), pat(PatternKind::Wildcard)],
                    ),
                ],
            ),
            ctor("Nil", vec![]),
        ];
        assert_eq!(check_list(&patterns), vec!["Cons _ Nil"]);
    }

    #[test]
    fn missing_constructor_with_fields_uses_wildcards() {
        assert_eq!(check_list(&[ctor("Nil", vec![])]), vec!["Cons _ _"]);
    }

    #[test]
    fn tuple_columns_are_checked_together() {
        let ty = Type::Tuple(vec![Type::Bool, Type::named("Maybe", vec![Type::Int])]);
        let patterns = [
            pat(PatternKind::Tuple(vec![
                pat(PatternKind::Lit(Lit::Bool(true))),
                pat(PatternKind::Wildcard),
            ])),
            pat(PatternKind::Tuple(vec![
                pat(PatternKind::Lit(Lit::Bool(false))),
                ctor("None", vec![]),
            ])),
        ];
        assert_eq!(check(&ty, &patterns), vec!["(False, Some _)"]);
    }

    #[test]
    fn tuple_witness_inside_constructor_is_not_double_wrapped() {
        let ty = Type::named("Maybe", vec![Type::Tuple(vec![Type::Bool, Type::Int])]);
        let patterns = [
            ctor("None", vec![]),
            ctor(
                "Some",
                vec![pat(PatternKind::Tuple(vec![
                    pat(PatternKind::Lit(Lit::Bool(true))),
                    pat(PatternKind::Wildcard),
                ]))],
            ),
        ];
        assert_eq!(check(&ty, &patterns), vec!["Some (False, _)"]);
    }

    #[test]
    fn unknown_scrutinee_needs_catch_all() {
        let ty = Type::Var(TypeVarId(9));
        assert_eq!(check(&ty, &[ctor("None", vec![])]), vec!["_"]);
    }
}
