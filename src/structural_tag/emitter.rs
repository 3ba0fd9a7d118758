//! Grammar emission.
//!
//! Recursively lowers an analyzed format tree into grammar rules. Each
//! format visit returns a rule id; results are cached under the format's
//! fingerprint so identical subtrees share one rule. The hardest path is
//! regex-with-excludes, which intersects the pattern FSM with a filter
//! FSM that rejects every string containing an excluded substring.

use std::collections::HashSet;

use rustc_hash::FxHashMap;

use super::fingerprint::{fingerprint, fingerprint_tag};
use super::format::{
    AnyTextFormat, ConstStringFormat, Format, GrammarFormat, JsonSchemaFormat, OrFormat,
    QwenXmlParameterFormat, RegexFormat, SequenceFormat, StructuralTag, TagFormat,
    TagsWithSeparatorFormat, TriggeredTagsFormat,
};
use crate::error::StructuralTagError;
use crate::fsm::{Automaton, FsmEdge, NfaGraph, StateId};
use crate::grammar::builder::GrammarBuilder;
use crate::grammar::merge::merge_grammar;
use crate::grammar::{ExprId, Grammar, RuleId, TagDispatch};
use crate::json_schema::json_schema_to_grammar;
use crate::qwen_xml::qwen_xml_to_ebnf;
use crate::regex::{regex_to_fsm, regex_to_grammar};

type Result<T> = std::result::Result<T, StructuralTagError>;

fn invalid(msg: impl Into<String>) -> StructuralTagError {
    StructuralTagError::InvalidStructuralTag(msg.into())
}

/// Emit the grammar for an analyzed structural tag.
pub fn emit(structural_tag: &StructuralTag) -> Result<Grammar> {
    let mut emitter = Emitter {
        builder: GrammarBuilder::new(),
        rule_cache: FxHashMap::default(),
    };
    let root_ref = emitter.visit(&structural_tag.format)?;
    emitter.finish(root_ref)
}

struct Emitter {
    builder: GrammarBuilder,
    /// Format fingerprint → emitted rule id.
    rule_cache: FxHashMap<String, RuleId>,
}

impl Emitter {
    /// Wrap the top-level rule in a fresh `root` rule and build.
    fn finish(mut self, rule: RuleId) -> Result<Grammar> {
        let rule_ref = self.builder.add_rule_ref(rule);
        let sequence = self.builder.add_sequence(vec![rule_ref]);
        let choices = self.builder.add_choices(vec![sequence]);
        let root = self.builder.add_rule_with_hint("root", choices);
        self.builder
            .build(root)
            .map_err(|e| invalid(format!("failed to build grammar: {}", e)))
    }

    fn visit(&mut self, format: &Format) -> Result<RuleId> {
        // TriggeredTags and TagsWithSeparator have coarse fingerprints
        // that omit sub-tree structure; caching them could alias two
        // different formats, so they are emitted inline every time.
        let cacheable = !matches!(
            format,
            Format::TriggeredTags(_) | Format::TagsWithSeparator(_)
        );
        let key = fingerprint(format);
        if cacheable {
            if let Some(&rule) = self.rule_cache.get(&key) {
                return Ok(rule);
            }
        }

        let rule = match format {
            Format::ConstString(f) => self.emit_const_string(f),
            Format::JsonSchema(f) => self.emit_json_schema(f)?,
            Format::QwenXmlParameter(f) => self.emit_qwen_xml_parameter(f)?,
            Format::AnyText(f) => self.emit_any_text(f),
            Format::Grammar(f) => self.emit_grammar(f)?,
            Format::Regex(f) => self.emit_regex(f)?,
            Format::Sequence(f) => self.emit_sequence(f)?,
            Format::Or(f) => self.emit_or(f)?,
            Format::Tag(f) => self.emit_tag(f)?,
            Format::TriggeredTags(f) => self.emit_triggered_tags(f)?,
            Format::TagsWithSeparator(f) => self.emit_tags_with_separator(f)?,
        };

        if cacheable {
            self.rule_cache.insert(key, rule);
        }
        Ok(rule)
    }

    /// Visit a tag held outside a `Format::Tag` wrapper, sharing the same
    /// fingerprint cache.
    fn visit_tag(&mut self, tag: &TagFormat) -> Result<RuleId> {
        let key = fingerprint_tag(tag);
        if let Some(&rule) = self.rule_cache.get(&key) {
            return Ok(rule);
        }
        let rule = self.emit_tag(tag)?;
        self.rule_cache.insert(key, rule);
        Ok(rule)
    }

    // ─── Leaf formats ────────────────────────────────────────────────

    fn emit_const_string(&mut self, format: &ConstStringFormat) -> RuleId {
        let expr = self.builder.add_byte_string(format.value.as_bytes());
        let sequence = self.builder.add_sequence(vec![expr]);
        let choices = self.builder.add_choices(vec![sequence]);
        self.builder.add_rule_with_hint("const_string", choices)
    }

    fn emit_json_schema(&mut self, format: &JsonSchemaFormat) -> Result<RuleId> {
        let sub = json_schema_to_grammar(&format.json_schema)
            .map_err(|e| invalid(format!("failed to convert JSON schema to grammar: {}", e)))?;
        Ok(merge_grammar(&mut self.builder, &sub))
    }

    fn emit_qwen_xml_parameter(&mut self, format: &QwenXmlParameterFormat) -> Result<RuleId> {
        let ebnf = qwen_xml_to_ebnf(&format.json_schema)
            .map_err(|e| invalid(format!("failed to convert Qwen XML parameter schema: {}", e)))?;
        let sub = Grammar::from_ebnf(&ebnf, "root")
            .map_err(|e| invalid(format!("failed to parse Qwen XML parameter grammar: {}", e)))?;
        Ok(merge_grammar(&mut self.builder, &sub))
    }

    fn emit_grammar(&mut self, format: &GrammarFormat) -> Result<RuleId> {
        let sub = Grammar::from_ebnf(&format.ebnf, "root")
            .map_err(|e| invalid(format!("failed to parse EBNF grammar: {}", e)))?;
        Ok(merge_grammar(&mut self.builder, &sub))
    }

    fn emit_any_text(&mut self, format: &AnyTextFormat) -> RuleId {
        if !format.detected_ends.is_empty() {
            let non_empty: Vec<String> = format
                .detected_ends
                .iter()
                .filter(|s| !s.is_empty())
                .cloned()
                .collect();
            debug_assert!(
                !non_empty.is_empty(),
                "at least one detected end string must be non-empty"
            );
            // The dispatch generates arbitrary text until one of the stop
            // strings appears, never containing an excluded substring.
            let dispatch = self.builder.add_tag_dispatch(TagDispatch {
                tag_rule_pairs: Vec::new(),
                stop_eos: false,
                stop_strings: non_empty,
                loop_after_dispatch: false,
                excludes: format.excludes.clone(),
            });
            self.builder.add_rule_with_hint("any_text", dispatch)
        } else {
            let star = self.builder.add_character_class_star(false, vec![(0, 0x10FFFF)]);
            let sequence = self.builder.add_sequence(vec![star]);
            let choices = self.builder.add_choices(vec![sequence]);
            self.builder.add_rule_with_hint("any_text", choices)
        }
    }

    // ─── Regex ───────────────────────────────────────────────────────

    fn emit_regex(&mut self, format: &RegexFormat) -> Result<RuleId> {
        // Without excludes the regex converter's grammar is spliced in
        // directly.
        if format.excludes.is_empty() {
            let sub = regex_to_grammar(&format.pattern)
                .map_err(|e| invalid(format!("failed to convert regex to grammar: {}", e)))?;
            return Ok(merge_grammar(&mut self.builder, &sub));
        }

        let pattern_fsm = regex_to_fsm(&format.pattern)
            .map_err(|e| invalid(format!("failed to build FSM from regex pattern: {}", e)))?;
        let filter = build_exclude_filter(&format.excludes);
        let product = Automaton::intersect(&pattern_fsm, &filter);

        if product.num_states() == 0 {
            return Err(invalid(
                "regex with excludes results in empty language (nothing matches)",
            ));
        }

        // Lower the product DFA to rules, one per state.
        let state_rules: Vec<RuleId> = (0..product.num_states())
            .map(|_| self.builder.add_empty_rule_with_hint("regex_state"))
            .collect();

        for (state_idx, &state_rule) in state_rules.iter().enumerate() {
            let state = StateId(state_idx as u32);
            let mut choice_seqs = Vec::new();

            if product.is_end(state) {
                let empty = self.builder.add_empty_string();
                choice_seqs.push(self.builder.add_sequence(vec![empty]));
            }

            for edge in product.fsm.edges(state) {
                if let FsmEdge::CharRange { min, max, target } = edge {
                    let class = self
                        .builder
                        .add_character_class(false, vec![(*min as u32, *max as u32)]);
                    let target_ref = self.builder.add_rule_ref(state_rules[target.0 as usize]);
                    choice_seqs.push(self.builder.add_sequence(vec![class, target_ref]));
                }
            }

            // A state with no edges and not accepting is unreachable in a
            // pruned intersection, but keep its rule well-formed.
            if choice_seqs.is_empty() {
                let empty = self.builder.add_empty_string();
                choice_seqs.push(self.builder.add_sequence(vec![empty]));
            }

            let choices = self.builder.add_choices(choice_seqs);
            self.builder.update_rule_body(state_rule, choices);
        }

        Ok(state_rules[product.start.0 as usize])
    }

    // ─── Containers ──────────────────────────────────────────────────

    fn emit_sequence(&mut self, format: &SequenceFormat) -> Result<RuleId> {
        let mut rule_refs = Vec::with_capacity(format.elements.len());
        for element in &format.elements {
            let rule = self.visit(element)?;
            rule_refs.push(self.builder.add_rule_ref(rule));
        }
        let sequence = self.builder.add_sequence(rule_refs);
        let choices = self.builder.add_choices(vec![sequence]);
        Ok(self.builder.add_rule_with_hint("sequence", choices))
    }

    fn emit_or(&mut self, format: &OrFormat) -> Result<RuleId> {
        let mut sequences = Vec::with_capacity(format.elements.len());
        for element in &format.elements {
            let rule = self.visit(element)?;
            let rule_ref = self.builder.add_rule_ref(rule);
            sequences.push(self.builder.add_sequence(vec![rule_ref]));
        }
        let choices = self.builder.add_choices(sequences);
        Ok(self.builder.add_rule_with_hint("or", choices))
    }

    // ─── Tags ────────────────────────────────────────────────────────

    fn emit_tag(&mut self, tag: &TagFormat) -> Result<RuleId> {
        let content_rule = self.visit(&tag.content)?;
        let alternative = self.tag_alternative(tag.begin.as_bytes(), content_rule, &tag.end);
        let choices = self.builder.add_choices(vec![alternative]);
        Ok(self.builder.add_rule_with_hint("tag", choices))
    }

    /// One `begin · content · end` sequence expression. With two or more
    /// end strings, a helper `tag_end` rule holds the end alternatives.
    fn tag_alternative(&mut self, begin: &[u8], content_rule: RuleId, ends: &[String]) -> ExprId {
        let begin_expr = self.builder.add_byte_string(begin);
        let content_ref = self.builder.add_rule_ref(content_rule);
        match ends.len() {
            // End was cleared by the analyzer (unbounded content).
            0 => self.builder.add_sequence(vec![begin_expr, content_ref]),
            1 => {
                let end_expr = self.str_or_empty(&ends[0]);
                self.builder
                    .add_sequence(vec![begin_expr, content_ref, end_expr])
            }
            _ => {
                let end_rule = self.end_choices_rule(ends, "tag_end");
                let end_ref = self.builder.add_rule_ref(end_rule);
                self.builder
                    .add_sequence(vec![begin_expr, content_ref, end_ref])
            }
        }
    }

    fn str_or_empty(&mut self, s: &str) -> ExprId {
        if s.is_empty() {
            self.builder.add_empty_string()
        } else {
            self.builder.add_byte_string(s.as_bytes())
        }
    }

    /// A rule whose body is the choice over the given end strings.
    fn end_choices_rule(&mut self, ends: &[String], hint: &str) -> RuleId {
        let sequences: Vec<ExprId> = ends
            .iter()
            .map(|end| {
                let expr = self.str_or_empty(end);
                self.builder.add_sequence(vec![expr])
            })
            .collect();
        let choices = self.builder.add_choices(sequences);
        self.builder.add_rule_with_hint(hint, choices)
    }

    // ─── TriggeredTags ───────────────────────────────────────────────

    fn emit_triggered_tags(&mut self, format: &TriggeredTagsFormat) -> Result<RuleId> {
        // Match each tag to exactly one trigger by prefix.
        let mut trigger_to_tags: Vec<Vec<usize>> = vec![Vec::new(); format.triggers.len()];
        let mut content_rules = Vec::with_capacity(format.tags.len());
        for (tag_idx, tag) in format.tags.iter().enumerate() {
            let mut matched = None;
            for (trigger_idx, trigger) in format.triggers.iter().enumerate() {
                if tag.begin.starts_with(trigger.as_str()) {
                    if matched.is_some() {
                        return Err(invalid(
                            "one tag matches multiple triggers in a triggered tags format",
                        ));
                    }
                    matched = Some(trigger_idx);
                }
            }
            let Some(matched) = matched else {
                return Err(invalid(
                    "one tag does not match any trigger in a triggered tags format",
                ));
            };
            trigger_to_tags[matched].push(tag_idx);
            content_rules.push(self.visit(&tag.content)?);
        }

        // Exactly one tag and nothing else: a plain choice over the tags,
        // with the detected terminator appended when inside a tag.
        if format.at_least_one && format.stop_after_first {
            let alternatives: Vec<ExprId> = format
                .tags
                .iter()
                .enumerate()
                .map(|(i, tag)| self.tag_alternative(tag.begin.as_bytes(), content_rules[i], &tag.end))
                .collect();
            let mut body = self.builder.add_choices(alternatives);

            if !format.detected_ends.is_empty() {
                let sub_rule = self.builder.add_rule_with_hint("triggered_tags_sub", body);
                let sub_ref = self.builder.add_rule_ref(sub_rule);
                let end_expr = if format.detected_ends.len() == 1 {
                    self.str_or_empty(&format.detected_ends[0])
                } else {
                    let end_rule = self.end_choices_rule(&format.detected_ends, "end_choices");
                    self.builder.add_rule_ref(end_rule)
                };
                let sequence = self.builder.add_sequence(vec![sub_ref, end_expr]);
                body = self.builder.add_choices(vec![sequence]);
            }

            return Ok(self.builder.add_rule_with_hint("triggered_tags", body));
        }

        // Normal case: free text interleaved with dispatched tags. Each
        // trigger gets a group rule over its tags, rendered as the begin
        // suffix after the trigger.
        let mut tag_rule_pairs = Vec::with_capacity(format.triggers.len());
        for (trigger_idx, trigger) in format.triggers.iter().enumerate() {
            let alternatives: Vec<ExprId> = trigger_to_tags[trigger_idx]
                .iter()
                .map(|&tag_idx| {
                    let tag = &format.tags[tag_idx];
                    self.tag_alternative(
                        tag.begin[trigger.len()..].as_bytes(),
                        content_rules[tag_idx],
                        &tag.end,
                    )
                })
                .collect();
            let choices = self.builder.add_choices(alternatives);
            let group_rule = self.builder.add_rule_with_hint("triggered_tags_group", choices);
            tag_rule_pairs.push((trigger.clone(), group_rule));
        }

        let loop_after_dispatch = !format.stop_after_first;
        let dispatch = if !format.detected_ends.is_empty() {
            let non_empty: Vec<String> = format
                .detected_ends
                .iter()
                .filter(|s| !s.is_empty())
                .cloned()
                .collect();
            TagDispatch {
                tag_rule_pairs,
                stop_eos: false,
                stop_strings: non_empty,
                loop_after_dispatch,
                excludes: format.excludes.clone(),
            }
        } else {
            TagDispatch {
                tag_rule_pairs,
                stop_eos: true,
                stop_strings: Vec::new(),
                loop_after_dispatch,
                excludes: format.excludes.clone(),
            }
        };
        let mut body = self.builder.add_tag_dispatch(dispatch);

        // at_least_one: generate one tag first (with its full begin, no
        // leading free text), then the dispatch loop.
        if format.at_least_one {
            let first_alternatives: Vec<ExprId> = format
                .tags
                .iter()
                .enumerate()
                .map(|(i, tag)| self.tag_alternative(tag.begin.as_bytes(), content_rules[i], &tag.end))
                .collect();
            let first_choices = self.builder.add_choices(first_alternatives);
            let first_rule = self.builder.add_rule_with_hint("triggered_tags_first", first_choices);
            let dispatch_rule = self.builder.add_rule_with_hint("triggered_tags_sub", body);
            let first_ref = self.builder.add_rule_ref(first_rule);
            let dispatch_ref = self.builder.add_rule_ref(dispatch_rule);
            let sequence = self.builder.add_sequence(vec![first_ref, dispatch_ref]);
            body = self.builder.add_choices(vec![sequence]);
        }

        Ok(self.builder.add_rule_with_hint("triggered_tags", body))
    }

    // ─── TagsWithSeparator ───────────────────────────────────────────

    fn emit_tags_with_separator(&mut self, format: &TagsWithSeparatorFormat) -> Result<RuleId> {
        // A rule matching any one tag.
        let mut tag_sequences = Vec::with_capacity(format.tags.len());
        for tag in &format.tags {
            let tag_rule = self.visit_tag(tag)?;
            let tag_ref = self.builder.add_rule_ref(tag_rule);
            tag_sequences.push(self.builder.add_sequence(vec![tag_ref]));
        }
        let tags_choices = self.builder.add_choices(tag_sequences);
        let all_tags_rule = self
            .builder
            .add_rule_with_hint("tags_with_separator_tags", tags_choices);
        let all_tags_ref = self.builder.add_rule_ref(all_tags_rule);

        let end_exprs: Vec<ExprId> = format
            .detected_ends
            .iter()
            .filter(|end| !end.is_empty())
            .map(|end| self.builder.add_byte_string(end.as_bytes()))
            .collect();
        let has_ends = !end_exprs.is_empty();
        let separator_matches_end = format.detected_ends.iter().any(|end| end == &format.separator);

        // Stop-after-first, also forced when the separator itself is a
        // terminator (a second separator would end the sequence anyway).
        if format.stop_after_first || (has_ends && separator_matches_end) {
            let body = match (format.at_least_one, has_ends) {
                (true, false) => {
                    let sequence = self.builder.add_sequence(vec![all_tags_ref]);
                    self.builder.add_choices(vec![sequence])
                }
                (true, true) => {
                    let choices: Vec<ExprId> = end_exprs
                        .iter()
                        .map(|&end| self.builder.add_sequence(vec![all_tags_ref, end]))
                        .collect();
                    self.builder.add_choices(choices)
                }
                (false, false) => {
                    let sequence = self.builder.add_sequence(vec![all_tags_ref]);
                    let empty = self.builder.add_empty_string();
                    self.builder.add_choices(vec![sequence, empty])
                }
                (false, true) => {
                    let mut choices: Vec<ExprId> = end_exprs
                        .iter()
                        .map(|&end| self.builder.add_sequence(vec![all_tags_ref, end]))
                        .collect();
                    let bare_ends: Vec<ExprId> = end_exprs
                        .iter()
                        .map(|&end| self.builder.add_sequence(vec![end]))
                        .collect();
                    choices.extend(bare_ends);
                    self.builder.add_choices(choices)
                }
            };
            return Ok(self.builder.add_rule_with_hint("tags_with_separator", body));
        }

        // Normal recursive mode: sub ::= sep tags sub | END
        let sub_rule = self.builder.add_empty_rule_with_hint("tags_with_separator_sub");

        let end_expr = if !has_ends {
            self.builder.add_empty_string()
        } else if end_exprs.len() == 1 {
            self.builder.add_sequence(vec![end_exprs[0]])
        } else {
            let sequences: Vec<ExprId> = end_exprs
                .iter()
                .map(|&end| self.builder.add_sequence(vec![end]))
                .collect();
            self.builder.add_choices(sequences)
        };

        let mut sub_elements = Vec::new();
        if !format.separator.is_empty() {
            sub_elements.push(self.builder.add_byte_string(format.separator.as_bytes()));
        }
        sub_elements.push(all_tags_ref);
        sub_elements.push(self.builder.add_rule_ref(sub_rule));
        let sub_sequence = self.builder.add_sequence(sub_elements);
        let sub_body = self.builder.add_choices(vec![sub_sequence, end_expr]);
        self.builder.update_rule_body(sub_rule, sub_body);

        // Root: tags sub, plus END alone when the sequence may be empty.
        let sub_ref = self.builder.add_rule_ref(sub_rule);
        let first_sequence = self.builder.add_sequence(vec![all_tags_ref, sub_ref]);
        let mut choices = vec![first_sequence];
        if !format.at_least_one {
            choices.push(end_expr);
        }
        let body = self.builder.add_choices(choices);
        Ok(self.builder.add_rule_with_hint("tags_with_separator", body))
    }
}

/// Build the exclusion-rejecting filter FSM over bytes.
///
/// A trie of the exclude strings where each exclude's terminal state is
/// dead. Non-dead states are closed over all 256 bytes: bytes without a
/// trie edge first copy any root-originating edge for that byte, then
/// fall back to the root. Edges into dead states are removed afterwards,
/// and every surviving state accepts.
///
/// The fallback is a single-step back edge to the root rather than a
/// longest-proper-suffix failure link, so excludes that are proper
/// suffixes of another exclude's partial match may be over-accepted.
fn build_exclude_filter(excludes: &[String]) -> Automaton {
    let mut fsm = NfaGraph::new();
    let root = fsm.add_state();
    let mut dead: HashSet<StateId> = HashSet::new();

    for exclude in excludes {
        let mut current = root;
        for &byte in exclude.as_bytes() {
            current = match fsm.next_state(current, byte) {
                Some(next) => next,
                None => {
                    let next = fsm.add_state();
                    fsm.add_char_edge(current, byte, byte, next);
                    next
                }
            };
        }
        dead.insert(current);
    }

    // Close every live state over all bytes. Trie edges are single-byte,
    // so coverage tracking per byte is exact.
    let root_edges: Vec<FsmEdge> = fsm.edges(root).to_vec();
    for state_idx in 0..fsm.num_states() {
        let state = StateId(state_idx as u32);
        if dead.contains(&state) {
            continue;
        }

        let mut covered = [false; 256];
        for edge in fsm.edges(state) {
            if let FsmEdge::CharRange { min, max, .. } = edge {
                for byte in *min..=*max {
                    covered[byte as usize] = true;
                }
            }
        }

        if state != root {
            for edge in &root_edges {
                if let FsmEdge::CharRange { min, .. } = edge {
                    if !covered[*min as usize] {
                        covered[*min as usize] = true;
                        fsm.add_edge(state, edge.clone());
                    }
                }
            }
        }

        for byte in 0..=255u8 {
            if !covered[byte as usize] {
                fsm.add_char_edge(state, byte, byte, root);
            }
        }
    }

    // Remove edges into dead states; what remains never completes an
    // excluded substring.
    for state_idx in 0..fsm.num_states() {
        fsm.edges_mut(StateId(state_idx as u32)).retain(|edge| match edge {
            FsmEdge::CharRange { target, .. } => !dead.contains(target),
            FsmEdge::Epsilon(target) => !dead.contains(target),
        });
    }

    let ends: Vec<bool> = (0..fsm.num_states())
        .map(|state_idx| !dead.contains(&StateId(state_idx as u32)))
        .collect();

    Automaton {
        fsm,
        start: root,
        ends,
        is_dfa: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structural_tag::analyzer::analyze;
    use crate::structural_tag::parser::parse_structural_tag;

    fn emit_json(json: &str) -> Result<Grammar> {
        let mut st = parse_structural_tag(json)?;
        analyze(&mut st)?;
        emit(&st)
    }

    #[test]
    fn test_exclude_filter_rejects_substring() {
        let filter = build_exclude_filter(&["bad".to_string()]);
        assert!(filter.accepts(b""));
        assert!(filter.accepts(b"good"));
        assert!(filter.accepts(b"ba"));
        assert!(filter.accepts(b"bab"));
        assert!(!filter.accepts(b"bad"));
        assert!(!filter.accepts(b"xbady"));
        assert!(!filter.accepts(b"aabad"));
    }

    #[test]
    fn test_exclude_filter_multiple_patterns() {
        let filter = build_exclude_filter(&["foo".to_string(), "bar".to_string()]);
        assert!(filter.accepts(b"fobra x"));
        assert!(!filter.accepts(b"a foo b"));
        assert!(!filter.accepts(b"xxbar"));
    }

    #[test]
    fn test_exclude_filter_restarts_partial_match() {
        // "aab" contains "ab"; the partial match "a" must restart correctly.
        let filter = build_exclude_filter(&["ab".to_string()]);
        assert!(filter.accepts(b"aa"));
        assert!(!filter.accepts(b"aab"));
    }

    #[test]
    fn test_const_string_rule() {
        let grammar = emit_json(r#"{"format":{"type":"const_string","value":"hello"}}"#).unwrap();
        let printed = grammar.to_string();
        assert!(printed.contains("const_string ::= ((\"hello\"))"), "got: {}", printed);
        assert_eq!(grammar.root().name, "root");
    }

    #[test]
    fn test_deduplication_shares_rules() {
        let grammar = emit_json(
            r#"{"format":{"type":"sequence","elements":[
                {"type":"const_string","value":"x"},
                {"type":"const_string","value":"x"},
                {"type":"const_string","value":"y"}
            ]}}"#,
        )
        .unwrap();
        let printed = grammar.to_string();
        // One const_string rule for "x", one for "y", not three.
        assert_eq!(printed.matches("\"x\"").count(), 1, "got: {}", printed);
        assert_eq!(printed.matches("\"y\"").count(), 1, "got: {}", printed);
    }

    #[test]
    fn test_regex_with_excludes_empty_language() {
        let err = emit_json(
            r#"{"format":{"type":"regex","pattern":"bad","excludes":["bad"]}}"#,
        )
        .unwrap_err();
        assert!(err.message().contains("empty language"), "got: {}", err);
    }

    #[test]
    fn test_triggered_tags_unmatched_trigger() {
        let err = emit_json(
            r#"{"format":{"type":"triggered_tags","triggers":["<a"],"tags":[
                {"begin":"<b>","content":{"type":"const_string","value":"v"},"end":"</b>"}
            ]}}"#,
        )
        .unwrap_err();
        assert!(err.message().contains("does not match any trigger"), "got: {}", err);
    }

    #[test]
    fn test_triggered_tags_multiple_triggers_matched() {
        let err = emit_json(
            r#"{"format":{"type":"triggered_tags","triggers":["<t","<ta"],"tags":[
                {"begin":"<tag>","content":{"type":"const_string","value":"v"},"end":"</tag>"}
            ]}}"#,
        )
        .unwrap_err();
        assert!(err.message().contains("multiple triggers"), "got: {}", err);
    }

    #[test]
    fn test_triggered_tags_dispatch_configuration() {
        let grammar = emit_json(
            r#"{"format":{"type":"triggered_tags","triggers":["<t"],"tags":[
                {"begin":"<tag>","content":{"type":"const_string","value":"v"},"end":"</tag>"}
            ]}}"#,
        )
        .unwrap();
        let printed = grammar.to_string();
        assert!(printed.contains("TagDispatch((\"<t\", triggered_tags_group)"), "got: {}", printed);
        assert!(printed.contains("stop_eos=true"), "got: {}", printed);
        assert!(printed.contains("loop_after_dispatch=true"), "got: {}", printed);
        // The group renders the begin suffix after the trigger.
        assert!(printed.contains("\"ag>\""), "got: {}", printed);
    }

    #[test]
    fn test_triggered_tags_stop_after_first_single_choice() {
        let grammar = emit_json(
            r#"{"format":{"type":"triggered_tags","triggers":["<t"],
                "at_least_one":true,"stop_after_first":true,"tags":[
                {"begin":"<tag>","content":{"type":"const_string","value":"v"},"end":"</tag>"}
            ]}}"#,
        )
        .unwrap();
        let printed = grammar.to_string();
        assert!(!printed.contains("TagDispatch"), "got: {}", printed);
        assert!(printed.contains("\"<tag>\""), "got: {}", printed);
    }

    #[test]
    fn test_tags_with_separator_recursive_shape() {
        let grammar = emit_json(
            r#"{"format":{"type":"tags_with_separator","separator":",","tags":[
                {"begin":"a","content":{"type":"const_string","value":"v"},"end":"b"}
            ]}}"#,
        )
        .unwrap();
        let printed = grammar.to_string();
        assert!(printed.contains("tags_with_separator_sub"), "got: {}", printed);
        assert!(printed.contains("\",\""), "got: {}", printed);
    }

    #[test]
    fn test_tags_with_separator_at_least_one_stop_after_first() {
        let grammar = emit_json(
            r#"{"format":{"type":"tags_with_separator","separator":",",
                "at_least_one":true,"stop_after_first":true,"tags":[
                {"begin":"a","content":{"type":"const_string","value":"v"},"end":"b"}
            ]}}"#,
        )
        .unwrap();
        let printed = grammar.to_string();
        assert!(!printed.contains("tags_with_separator_sub"), "got: {}", printed);
    }

    #[test]
    fn test_grammar_format_spliced() {
        let grammar = emit_json(
            r#"{"format":{"type":"grammar","grammar":"root ::= \"ok\""}}"#,
        )
        .unwrap();
        assert!(grammar.to_string().contains("\"ok\""));
    }

    #[test]
    fn test_bad_embedded_grammar_wrapped() {
        let err = emit_json(
            r#"{"format":{"type":"grammar","grammar":"root == broken"}}"#,
        )
        .unwrap_err();
        assert!(err.message().contains("failed to parse EBNF grammar"), "got: {}", err);
    }
}
