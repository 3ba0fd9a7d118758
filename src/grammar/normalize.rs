//! Final grammar normalization.
//!
//! Transforms a grammar into canonical form where:
//! - Every rule body is `Choices(alts)` or a leaf expression
//! - Each alternative in Choices is `Sequence(elems)` or a leaf
//! - Each element of a Sequence is a leaf: ByteString, CharacterClass,
//!   CharacterClassStar, RuleRef, Repeat, TagDispatch, or EmptyString
//! - No nested Choices or Sequences as Sequence elements

use super::builder::GrammarBuilder;
use super::{Expr, ExprId, Grammar, RuleId};

/// Normalize a grammar into canonical form.
///
/// Nested Choices/Sequences in Sequence elements are extracted into
/// auxiliary rules. Rule ids of the original rules are preserved.
pub fn normalize_grammar(grammar: &Grammar) -> Grammar {
    let mut builder = GrammarBuilder::new();

    // First pass: create all original rules (so RuleIds are preserved)
    for rule in grammar.rules() {
        builder.add_rule(&rule.name);
    }

    // Second pass: normalize each rule body, possibly adding auxiliary rules
    for (i, rule) in grammar.rules().iter().enumerate() {
        let body = normalize_expr(grammar, &mut builder, rule.body);
        builder.update_rule_body(RuleId(i as u32), body);
    }

    builder.build(grammar.root_rule()).unwrap()
}

/// Normalize an expression. If it's a Sequence, ensure all elements are leaves.
fn normalize_expr(grammar: &Grammar, builder: &mut GrammarBuilder, expr_id: ExprId) -> ExprId {
    match grammar.get_expr(expr_id) {
        Expr::EmptyString => builder.add_empty_string(),
        Expr::ByteString(bytes) => builder.add_byte_string(bytes),
        Expr::CharacterClass { negated, ranges } => {
            builder.add_character_class(*negated, ranges.clone())
        }
        Expr::CharacterClassStar { negated, ranges } => {
            builder.add_character_class_star(*negated, ranges.clone())
        }
        Expr::RuleRef(rule_id) => builder.add_rule_ref(*rule_id),
        Expr::Repeat { rule, min, max } => builder.add_repeat(*rule, *min, *max),
        Expr::TagDispatch(td) => builder.add_tag_dispatch(td.clone()),

        Expr::Sequence(elems) => {
            let new_elems: Vec<ExprId> = elems
                .iter()
                .map(|&eid| normalize_sequence_element(grammar, builder, eid))
                .collect();
            builder.add_sequence(new_elems)
        }

        Expr::Choices(alts) => {
            let mut new_alts: Vec<ExprId> = Vec::new();
            for &eid in alts {
                let normalized = normalize_expr(grammar, builder, eid);
                // Flatten nested Choices: Choices([A, Choices([B, C])]) → Choices([A, B, C])
                if let Expr::Choices(inner) = &builder.exprs[normalized.0 as usize] {
                    new_alts.extend_from_slice(inner);
                } else {
                    new_alts.push(normalized);
                }
            }
            builder.add_choices(new_alts)
        }
    }
}

/// Normalize a sequence element. If it's a Choices or Sequence, extract to auxiliary rule.
fn normalize_sequence_element(
    grammar: &Grammar,
    builder: &mut GrammarBuilder,
    expr_id: ExprId,
) -> ExprId {
    match grammar.get_expr(expr_id) {
        Expr::Choices(_) | Expr::Sequence(_) => {
            let aux_name = format!("__aux_{}", builder.num_rules());
            let aux_rule = builder.add_rule(&aux_name);
            let normalized = normalize_expr(grammar, builder, expr_id);
            builder.update_rule_body(aux_rule, normalized);
            builder.add_rule_ref(aux_rule)
        }
        // Leaves are fine as-is
        _ => normalize_expr(grammar, builder, expr_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_sequence_extracted() {
        let mut b = GrammarBuilder::new();
        let a = b.add_byte_string(b"a");
        let c = b.add_byte_string(b"b");
        let inner = b.add_sequence(vec![a, c]);
        let d = b.add_byte_string(b"c");
        let outer = b.add_sequence(vec![inner, d]);
        let root = b.add_rule_with_hint("root", outer);
        let grammar = b.build(root).unwrap();

        let normalized = normalize_grammar(&grammar);
        assert_eq!(normalized.num_rules(), 2);
        assert_eq!(
            normalized.to_string(),
            "root ::= (__aux_1 \"c\")\n__aux_1 ::= (\"a\" \"b\")"
        );
    }

    #[test]
    fn test_nested_choices_flattened() {
        let mut b = GrammarBuilder::new();
        let a = b.add_byte_string(b"a");
        let c = b.add_byte_string(b"b");
        let inner = b.add_choices(vec![a, c]);
        let d = b.add_byte_string(b"c");
        let outer = b.add_choices(vec![inner, d]);
        let root = b.add_rule_with_hint("root", outer);
        let grammar = b.build(root).unwrap();

        let normalized = normalize_grammar(&grammar);
        assert_eq!(normalized.to_string(), "root ::= (\"a\" | \"b\" | \"c\")");
    }

    #[test]
    fn test_rule_ids_preserved() {
        let mut b = GrammarBuilder::new();
        let digit_class = b.add_character_class(false, vec![(0x30, 0x39)]);
        let digit = b.add_rule_with_hint("digit", digit_class);
        let digit_ref = b.add_rule_ref(digit);
        let seq = b.add_sequence(vec![digit_ref]);
        let root = b.add_rule_with_hint("root", seq);
        let grammar = b.build(root).unwrap();

        let normalized = normalize_grammar(&grammar);
        assert_eq!(normalized.root_rule(), root);
        assert_eq!(normalized.get_rule(digit).name, "digit");
    }
}
