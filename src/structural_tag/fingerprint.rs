//! Format fingerprinting for deduplication.
//!
//! Computes a prefix-tagged canonical string per format subtree. The
//! emitter reuses the grammar rule of any format with an identical
//! fingerprint. The leaf, Sequence, Or and Tag encodings are injective;
//! TriggeredTags and TagsWithSeparator use coarse keys that omit the
//! sub-tree structure (the emitter never caches those variants, so a
//! collision cannot cause false reuse).

use super::format::{Format, TagFormat};

/// Compute the fingerprint of a format.
pub fn fingerprint(format: &Format) -> String {
    match format {
        Format::ConstString(f) => format!("CS:{}", f.value),
        Format::JsonSchema(f) => format!("JS:{}", f.json_schema),
        Format::QwenXmlParameter(f) => format!("QX:{}", f.json_schema),
        Format::Grammar(f) => format!("GR:{}", f.ebnf),

        Format::Regex(f) => {
            let mut result = format!("RX:{}", f.pattern);
            if !f.excludes.is_empty() {
                result.push_str(":X:");
                for s in &f.excludes {
                    result.push_str(s);
                    result.push('|');
                }
            }
            result
        }

        Format::AnyText(f) => {
            let mut result = String::from("AT:");
            for s in &f.excludes {
                result.push_str(s);
                result.push('|');
            }
            // Detected end strings affect the emitted grammar.
            result.push_str("E:");
            for s in &f.detected_ends {
                result.push_str(s);
                result.push('|');
            }
            result
        }

        Format::Sequence(f) => {
            let mut result = String::from("SQ[");
            for element in &f.elements {
                result.push_str(&fingerprint(element));
                result.push(',');
            }
            result.push(']');
            result
        }

        Format::Or(f) => {
            let mut result = String::from("OR[");
            for element in &f.elements {
                result.push_str(&fingerprint(element));
                result.push(',');
            }
            result.push(']');
            result
        }

        Format::Tag(f) => fingerprint_tag(f),

        // TriggeredTags are complex and rarely duplicated; the key is
        // deliberately coarse.
        Format::TriggeredTags(f) => {
            let mut result = String::from("TT:");
            for trigger in &f.triggers {
                result.push_str(trigger);
                result.push(',');
            }
            result.push(':');
            result.push_str(&format!("{},{}", f.at_least_one as u8, f.stop_after_first as u8));
            result
        }

        Format::TagsWithSeparator(f) => format!(
            "TS:{}:{},{}",
            f.separator, f.at_least_one as u8, f.stop_after_first as u8
        ),
    }
}

/// Fingerprint a tag held outside a `Format::Tag` wrapper.
pub fn fingerprint_tag(tag: &TagFormat) -> String {
    let mut result = format!("TG:{}:{{", tag.begin);
    result.push_str(&fingerprint(&tag.content));
    result.push_str("}:");
    for end in &tag.end {
        result.push_str(end);
        result.push('|');
    }
    result
}
