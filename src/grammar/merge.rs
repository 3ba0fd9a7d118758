//! Sub-grammar splicing.
//!
//! Copies every rule and expression of a sub-grammar into a
//! `GrammarBuilder`, remapping rule ids and uniquifying rule names.
//! Used to embed grammars produced by the JSON-schema, EBNF and regex
//! converters into a larger grammar under construction.

use super::builder::GrammarBuilder;
use super::{Expr, ExprId, Grammar, RuleId, TagDispatch};

/// Splice `sub` into `builder`. Returns the remapped root rule id.
pub fn merge_grammar(builder: &mut GrammarBuilder, sub: &Grammar) -> RuleId {
    // First pass: allocate all rules so references can be remapped.
    let rule_map: Vec<RuleId> = sub
        .rules()
        .iter()
        .map(|rule| builder.add_empty_rule_with_hint(&rule.name))
        .collect();

    // Second pass: copy rule bodies with remapped references.
    for (i, rule) in sub.rules().iter().enumerate() {
        let body = copy_expr(builder, sub, rule.body, &rule_map);
        builder.update_rule_body(rule_map[i], body);
    }

    rule_map[sub.root_rule().0 as usize]
}

fn copy_expr(
    builder: &mut GrammarBuilder,
    sub: &Grammar,
    expr_id: ExprId,
    rule_map: &[RuleId],
) -> ExprId {
    match sub.get_expr(expr_id) {
        Expr::EmptyString => builder.add_empty_string(),
        Expr::ByteString(bytes) => builder.add_byte_string(bytes),
        Expr::CharacterClass { negated, ranges } => {
            builder.add_character_class(*negated, ranges.clone())
        }
        Expr::CharacterClassStar { negated, ranges } => {
            builder.add_character_class_star(*negated, ranges.clone())
        }
        Expr::RuleRef(rule) => {
            let mapped = rule_map[rule.0 as usize];
            builder.add_rule_ref(mapped)
        }
        Expr::Repeat { rule, min, max } => {
            let mapped = rule_map[rule.0 as usize];
            builder.add_repeat(mapped, *min, *max)
        }
        Expr::TagDispatch(td) => {
            let remapped = TagDispatch {
                tag_rule_pairs: td
                    .tag_rule_pairs
                    .iter()
                    .map(|(trigger, rule)| (trigger.clone(), rule_map[rule.0 as usize]))
                    .collect(),
                stop_eos: td.stop_eos,
                stop_strings: td.stop_strings.clone(),
                loop_after_dispatch: td.loop_after_dispatch,
                excludes: td.excludes.clone(),
            };
            builder.add_tag_dispatch(remapped)
        }
        Expr::Sequence(elems) => {
            let copied = elems
                .iter()
                .map(|&eid| copy_expr(builder, sub, eid, rule_map))
                .collect();
            builder.add_sequence(copied)
        }
        Expr::Choices(alts) => {
            let copied = alts
                .iter()
                .map(|&eid| copy_expr(builder, sub, eid, rule_map))
                .collect();
            builder.add_choices(copied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_remaps_rule_refs() {
        // sub: root ::= item, item ::= [0-9]
        let sub = Grammar::from_ebnf("root ::= item\nitem ::= [0-9]", "root").unwrap();

        let mut builder = GrammarBuilder::new();
        // Occupy rule slots so the merged ids shift.
        let e = builder.add_empty_string();
        builder.add_rule_with_hint("existing", e);

        let merged_root = merge_grammar(&mut builder, &sub);
        assert_eq!(merged_root, RuleId(1));
        assert_eq!(builder.num_rules(), 3);

        let g = builder.build(merged_root).unwrap();
        // The merged root's body must reference the merged item rule, not id 1.
        match g.get_expr(g.get_rule(merged_root).body) {
            Expr::RuleRef(r) => assert_eq!(*r, RuleId(2)),
            other => panic!("expected RuleRef, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_uniquifies_names() {
        let sub = Grammar::from_ebnf(r#"root ::= "x""#, "root").unwrap();

        let mut builder = GrammarBuilder::new();
        let r1 = merge_grammar(&mut builder, &sub);
        let r2 = merge_grammar(&mut builder, &sub);
        assert_eq!(builder.rule_name(r1), "root");
        assert_eq!(builder.rule_name(r2), "root_1");
    }

    #[test]
    fn test_merge_recursive_grammar() {
        // sub: root ::= "a" root | ""
        let sub = Grammar::from_ebnf(r#"root ::= "a" root | """#, "root").unwrap();

        let mut builder = GrammarBuilder::new();
        let root = merge_grammar(&mut builder, &sub);
        let g = builder.build(root).unwrap();
        assert_eq!(g.to_string(), "root ::= ((\"a\" root) | \"\")");
    }
}
