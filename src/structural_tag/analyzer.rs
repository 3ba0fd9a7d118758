//! Structural-tag analysis pass.
//!
//! A single pre-order traversal that annotates the format tree in place:
//!
//! 1. Terminator propagation: `AnyText`, `TriggeredTags` and
//!    `TagsWithSeparator` nodes receive the end strings of the nearest
//!    enclosing tag as their `detected_ends`.
//! 2. Bounded/unbounded classification of `Sequence` and `Or` nodes,
//!    enforcing that only a sequence's last element may be unbounded and
//!    that an alternation is not mixed.
//! 3. A tag whose content is unbounded must have a non-empty end string;
//!    its `end` list is then cleared, since the terminators are consumed
//!    by the descendant's dispatch instead of being emitted as a suffix.

use std::cell::Cell;

use super::format::{Format, StructuralTag, TagFormat};
use super::RecursionGuard;
use crate::error::StructuralTagError;

type Result<T> = std::result::Result<T, StructuralTagError>;

fn invalid(msg: impl Into<String>) -> StructuralTagError {
    StructuralTagError::InvalidStructuralTag(msg.into())
}

/// Analyze a structural tag, mutating the format tree in place.
pub fn analyze(structural_tag: &mut StructuralTag) -> Result<()> {
    let depth = Cell::new(0);
    visit(&mut structural_tag.format, &[], &depth)
}

/// Visit a format. `enclosing_ends` is the end-string list of the nearest
/// enclosing tag (empty at the root), which is what a stack walk from the
/// innermost ancestor outward would find.
fn visit(format: &mut Format, enclosing_ends: &[String], depth: &Cell<usize>) -> Result<()> {
    let _guard = RecursionGuard::enter(depth)?;
    match format {
        Format::ConstString(_)
        | Format::JsonSchema(_)
        | Format::QwenXmlParameter(_)
        | Format::Grammar(_)
        | Format::Regex(_) => Ok(()),

        Format::AnyText(f) => {
            f.detected_ends = enclosing_ends.to_vec();
            Ok(())
        }

        Format::Sequence(f) => {
            let last = f.elements.len() - 1;
            for (i, element) in f.elements.iter_mut().enumerate() {
                visit(element, enclosing_ends, depth)?;
                if i < last && element.is_unbounded() {
                    return Err(invalid(format!(
                        "only the last element in a sequence can be unbounded, but element {} is unbounded",
                        i
                    )));
                }
            }
            f.unbounded = f.elements[last].is_unbounded();
            Ok(())
        }

        Format::Or(f) => {
            let mut any_unbounded = false;
            let mut all_unbounded = true;
            for element in f.elements.iter_mut() {
                visit(element, enclosing_ends, depth)?;
                let unbounded = element.is_unbounded();
                any_unbounded |= unbounded;
                all_unbounded &= unbounded;
            }
            if any_unbounded && !all_unbounded {
                return Err(invalid(
                    "all elements in an or format must be either unbounded or bounded, \
                     but this or format mixes both",
                ));
            }
            f.unbounded = any_unbounded;
            Ok(())
        }

        Format::Tag(f) => visit_tag_inner(f, depth),

        Format::TriggeredTags(f) => {
            for tag in &mut f.tags {
                visit_tag(tag, depth)?;
            }
            f.detected_ends = enclosing_ends.to_vec();
            Ok(())
        }

        Format::TagsWithSeparator(f) => {
            for tag in &mut f.tags {
                visit_tag(tag, depth)?;
            }
            f.detected_ends = enclosing_ends.to_vec();
            Ok(())
        }
    }
}

/// Visit a tag held directly (not wrapped in `Format::Tag`), counting it
/// as its own recursion level like any other format node.
fn visit_tag(tag: &mut TagFormat, depth: &Cell<usize>) -> Result<()> {
    let _guard = RecursionGuard::enter(depth)?;
    visit_tag_inner(tag, depth)
}

fn visit_tag_inner(tag: &mut TagFormat, depth: &Cell<usize>) -> Result<()> {
    // The tag's own end strings become the enclosing terminators for its
    // content subtree.
    let ends = tag.end.clone();
    visit(&mut tag.content, &ends, depth)?;

    if tag.content.is_unbounded() {
        if !tag.end.iter().any(|e| !e.is_empty()) {
            return Err(invalid(
                "when a tag's content is unbounded, at least one end string must be non-empty",
            ));
        }
        // The terminators now live on the unbounded descendant's
        // detected_ends; the tag itself emits no end suffix.
        tag.end.clear();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structural_tag::parser::parse_structural_tag;

    fn analyzed(json: &str) -> Result<StructuralTag> {
        let mut st = parse_structural_tag(json)?;
        analyze(&mut st)?;
        Ok(st)
    }

    #[test]
    fn test_any_text_gets_enclosing_tag_ends() {
        let st = analyzed(
            r#"{"format":{"type":"tag","begin":"<x>","content":{"type":"any_text"},"end":"</x>"}}"#,
        )
        .unwrap();
        match st.format {
            Format::Tag(tag) => {
                assert!(tag.end.is_empty(), "tag end must be cleared");
                match *tag.content {
                    Format::AnyText(ref f) => {
                        assert_eq!(f.detected_ends, vec!["</x>"]);
                    }
                    ref other => panic!("expected AnyText, got {:?}", other),
                }
            }
            other => panic!("expected Tag, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_tag_uses_nearest_enclosing_ends() {
        let st = analyzed(
            r#"{"format":{"type":"tag","begin":"<a>","content":
                {"type":"tag","begin":"<b>","content":{"type":"any_text"},"end":"</b>"},
               "end":"</a>"}}"#,
        )
        .unwrap();
        match st.format {
            Format::Tag(outer) => {
                // Outer tag content (the inner tag) is bounded, so its end stays.
                assert_eq!(outer.end, vec!["</a>"]);
                match *outer.content {
                    Format::Tag(ref inner) => {
                        assert!(inner.end.is_empty());
                        match *inner.content {
                            Format::AnyText(ref f) => assert_eq!(f.detected_ends, vec!["</b>"]),
                            ref other => panic!("expected AnyText, got {:?}", other),
                        }
                    }
                    ref other => panic!("expected Tag, got {:?}", other),
                }
            }
            other => panic!("expected Tag, got {:?}", other),
        }
    }

    #[test]
    fn test_root_any_text_has_no_detected_ends() {
        let st = analyzed(r#"{"format":{"type":"any_text"}}"#).unwrap();
        match st.format {
            Format::AnyText(f) => assert!(f.detected_ends.is_empty()),
            other => panic!("expected AnyText, got {:?}", other),
        }
    }

    #[test]
    fn test_sequence_unbounded_prefix_rejected() {
        let err = analyzed(
            r#"{"format":{"type":"sequence","elements":[
                {"type":"any_text"},
                {"type":"const_string","value":"x"}
            ]}}"#,
        )
        .unwrap_err();
        assert!(err.message().contains("last element"), "got: {}", err);
    }

    #[test]
    fn test_sequence_unbounded_tail_allowed() {
        let st = analyzed(
            r#"{"format":{"type":"sequence","elements":[
                {"type":"const_string","value":"x"},
                {"type":"any_text"}
            ]}}"#,
        )
        .unwrap();
        match st.format {
            Format::Sequence(f) => assert!(f.unbounded),
            other => panic!("expected Sequence, got {:?}", other),
        }
    }

    #[test]
    fn test_or_mixed_boundedness_rejected() {
        let err = analyzed(
            r#"{"format":{"type":"or","elements":[
                {"type":"any_text"},
                {"type":"const_string","value":"x"}
            ]}}"#,
        )
        .unwrap_err();
        assert!(err.message().contains("or format"), "got: {}", err);
    }

    #[test]
    fn test_or_all_bounded_ok() {
        let st = analyzed(
            r#"{"format":{"type":"or","elements":[
                {"type":"const_string","value":"a"},
                {"type":"const_string","value":"b"}
            ]}}"#,
        )
        .unwrap();
        match st.format {
            Format::Or(f) => assert!(!f.unbounded),
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn test_unbounded_tag_content_needs_non_empty_end() {
        let err = analyzed(
            r#"{"format":{"type":"tag","begin":"<x>","content":{"type":"any_text"},"end":""}}"#,
        )
        .unwrap_err();
        assert!(err.message().contains("non-empty"), "got: {}", err);
    }

    #[test]
    fn test_bounded_tag_content_keeps_end() {
        let st = analyzed(
            r#"{"format":{"type":"tag","begin":"<x>","content":{"type":"const_string","value":"v"},"end":"</x>"}}"#,
        )
        .unwrap();
        match st.format {
            Format::Tag(tag) => assert_eq!(tag.end, vec!["</x>"]),
            other => panic!("expected Tag, got {:?}", other),
        }
    }

    #[test]
    fn test_triggered_tags_inside_tag_gets_ends() {
        let st = analyzed(
            r#"{"format":{"type":"tag","begin":"<o>","content":
                {"type":"triggered_tags","triggers":["<t"],"tags":[
                    {"begin":"<tag>","content":{"type":"const_string","value":"a"},"end":"</tag>"}
                ]},
               "end":"</o>"}}"#,
        )
        .unwrap();
        match st.format {
            Format::Tag(tag) => {
                assert!(tag.end.is_empty());
                match *tag.content {
                    Format::TriggeredTags(ref f) => {
                        assert_eq!(f.detected_ends, vec!["</o>"]);
                    }
                    ref other => panic!("expected TriggeredTags, got {:?}", other),
                }
            }
            other => panic!("expected Tag, got {:?}", other),
        }
    }
}
