//! Structural-tag JSON parser.
//!
//! Validates the JSON specification and builds the typed format tree.
//! Format objects dispatch on their `"type"` field; objects without one
//! are tried against each variant in a fixed priority order, tag first.

use std::cell::Cell;

use serde_json::{Map, Value};

use super::format::{
    AnyTextFormat, ConstStringFormat, Format, GrammarFormat, JsonSchemaFormat,
    QwenXmlParameterFormat, RegexFormat, SequenceFormat, StructuralTag, TagFormat,
    TagsWithSeparatorFormat, TriggeredTagsFormat, OrFormat,
};
use super::RecursionGuard;
use crate::error::StructuralTagError;

type Result<T> = std::result::Result<T, StructuralTagError>;

fn invalid(msg: impl Into<String>) -> StructuralTagError {
    StructuralTagError::InvalidStructuralTag(msg.into())
}

/// Parse a structural-tag JSON string into a format tree.
pub fn parse_structural_tag(json: &str) -> Result<StructuralTag> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| StructuralTagError::InvalidJson(format!("failed to parse JSON: {}", e)))?;
    Parser::new().parse_root(&value)
}

struct Parser {
    depth: Cell<usize>,
}

impl Parser {
    fn new() -> Self {
        Self { depth: Cell::new(0) }
    }

    fn parse_root(&self, value: &Value) -> Result<StructuralTag> {
        let obj = value
            .as_object()
            .ok_or_else(|| invalid("structural tag must be an object"))?;
        // The type field is optional but must be "structural_tag" if present.
        if let Some(ty) = obj.get("type") {
            if ty.as_str() != Some("structural_tag") {
                return Err(invalid(
                    "structural tag's type must be the string \"structural_tag\"",
                ));
            }
        }
        let format_value = obj
            .get("format")
            .ok_or_else(|| invalid("structural tag must have a format field"))?;
        Ok(StructuralTag {
            format: self.parse_format(format_value)?,
        })
    }

    fn parse_format(&self, value: &Value) -> Result<Format> {
        let _guard = RecursionGuard::enter(&self.depth)?;
        let obj = value
            .as_object()
            .ok_or_else(|| invalid("format must be an object"))?;

        // If type is present, use it to determine the format.
        if let Some(ty) = obj.get("type") {
            let ty = ty
                .as_str()
                .ok_or_else(|| invalid("format's type must be a string"))?;
            return match ty {
                "const_string" => self.parse_const_string(obj).map(Format::ConstString),
                "json_schema" => self.parse_json_schema(obj).map(Format::JsonSchema),
                "qwen_xml_parameter" => {
                    self.parse_qwen_xml_parameter(obj).map(Format::QwenXmlParameter)
                }
                "any_text" => self.parse_any_text(obj).map(Format::AnyText),
                "grammar" => self.parse_grammar(obj).map(Format::Grammar),
                "regex" => self.parse_regex(obj).map(Format::Regex),
                "sequence" => self.parse_sequence(obj).map(Format::Sequence),
                "or" => self.parse_or(obj).map(Format::Or),
                "tag" => self.parse_tag(obj).map(Format::Tag),
                "triggered_tags" => self.parse_triggered_tags(obj).map(Format::TriggeredTags),
                "tags_with_separator" => {
                    self.parse_tags_with_separator(obj).map(Format::TagsWithSeparator)
                }
                other => Err(invalid(format!("format type not recognized: {}", other))),
            };
        }

        // No type: try every format one by one. Tag is prioritized.
        if let Ok(f) = self.parse_tag(obj) {
            return Ok(Format::Tag(f));
        }
        if let Ok(f) = self.parse_const_string(obj) {
            return Ok(Format::ConstString(f));
        }
        if let Ok(f) = self.parse_json_schema(obj) {
            return Ok(Format::JsonSchema(f));
        }
        if let Ok(f) = self.parse_any_text(obj) {
            return Ok(Format::AnyText(f));
        }
        if let Ok(f) = self.parse_sequence(obj) {
            return Ok(Format::Sequence(f));
        }
        if let Ok(f) = self.parse_or(obj) {
            return Ok(Format::Or(f));
        }
        if let Ok(f) = self.parse_triggered_tags(obj) {
            return Ok(Format::TriggeredTags(f));
        }
        if let Ok(f) = self.parse_tags_with_separator(obj) {
            return Ok(Format::TagsWithSeparator(f));
        }
        Err(invalid(format!("invalid format: {}", value)))
    }

    fn parse_const_string(&self, obj: &Map<String, Value>) -> Result<ConstStringFormat> {
        match obj.get("value").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => Ok(ConstStringFormat {
                value: s.to_string(),
            }),
            _ => Err(invalid(
                "const_string format must have a value field with a non-empty string",
            )),
        }
    }

    fn parse_json_schema(&self, obj: &Map<String, Value>) -> Result<JsonSchemaFormat> {
        Ok(JsonSchemaFormat {
            json_schema: Self::schema_field(obj, "json_schema format")?,
        })
    }

    fn parse_qwen_xml_parameter(&self, obj: &Map<String, Value>) -> Result<QwenXmlParameterFormat> {
        Ok(QwenXmlParameterFormat {
            json_schema: Self::schema_field(obj, "qwen_xml_parameter format")?,
        })
    }

    /// The `json_schema` field: an object or boolean, re-serialized as
    /// canonical JSON text.
    fn schema_field(obj: &Map<String, Value>, what: &str) -> Result<String> {
        match obj.get("json_schema") {
            Some(v @ Value::Object(_)) | Some(v @ Value::Bool(_)) => Ok(v.to_string()),
            _ => Err(invalid(format!(
                "{} must have a json_schema field with an object or boolean value",
                what
            ))),
        }
    }

    fn parse_any_text(&self, obj: &Map<String, Value>) -> Result<AnyTextFormat> {
        let Some(excludes_value) = obj.get("excludes") else {
            // Without excludes, the only allowed shape is {"type": "any_text"};
            // this keeps bare objects from matching as any_text in the
            // untyped fallback.
            if !obj.contains_key("type") || obj.len() != 1 {
                return Err(invalid(
                    "any_text format must not have any fields other than type",
                ));
            }
            return Ok(AnyTextFormat {
                excludes: Vec::new(),
                detected_ends: Vec::new(),
            });
        };
        let arr = excludes_value
            .as_array()
            .ok_or_else(|| invalid("any_text format's excludes field must be an array"))?;
        let mut excludes = Vec::with_capacity(arr.len());
        for item in arr {
            let s = item
                .as_str()
                .ok_or_else(|| invalid("any_text format's excludes array must contain strings"))?;
            excludes.push(s.to_string());
        }
        Ok(AnyTextFormat {
            excludes,
            detected_ends: Vec::new(),
        })
    }

    fn parse_grammar(&self, obj: &Map<String, Value>) -> Result<GrammarFormat> {
        match obj.get("grammar").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => Ok(GrammarFormat {
                ebnf: s.to_string(),
            }),
            _ => Err(invalid(
                "grammar format must have a grammar field with a non-empty string",
            )),
        }
    }

    fn parse_regex(&self, obj: &Map<String, Value>) -> Result<RegexFormat> {
        let pattern = match obj.get("pattern").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => {
                return Err(invalid(
                    "regex format must have a pattern field with a non-empty string",
                ))
            }
        };
        let excludes = Self::non_empty_string_array(obj, "excludes", "regex format")?;
        Ok(RegexFormat { pattern, excludes })
    }

    /// An optional array field of non-empty strings.
    fn non_empty_string_array(
        obj: &Map<String, Value>,
        field: &str,
        what: &str,
    ) -> Result<Vec<String>> {
        let Some(value) = obj.get(field) else {
            return Ok(Vec::new());
        };
        let arr = value
            .as_array()
            .ok_or_else(|| invalid(format!("{}'s {} field must be an array", what, field)))?;
        let mut strings = Vec::with_capacity(arr.len());
        for item in arr {
            match item.as_str() {
                Some(s) if !s.is_empty() => strings.push(s.to_string()),
                _ => {
                    return Err(invalid(format!(
                        "{}'s {} array must contain non-empty strings",
                        what, field
                    )))
                }
            }
        }
        Ok(strings)
    }

    fn parse_sequence(&self, obj: &Map<String, Value>) -> Result<SequenceFormat> {
        let arr = obj
            .get("elements")
            .and_then(|v| v.as_array())
            .ok_or_else(|| invalid("sequence format must have an elements field with an array"))?;
        let mut elements = Vec::with_capacity(arr.len());
        for element in arr {
            let parsed = self.parse_format(element)?;
            // Flatten nested sequences: inline their elements rather than nesting.
            if let Format::Sequence(nested) = parsed {
                elements.extend(nested.elements);
            } else {
                elements.push(parsed);
            }
        }
        if elements.is_empty() {
            return Err(invalid("sequence format must have at least one element"));
        }
        Ok(SequenceFormat {
            elements,
            unbounded: false,
        })
    }

    fn parse_or(&self, obj: &Map<String, Value>) -> Result<OrFormat> {
        let arr = obj
            .get("elements")
            .and_then(|v| v.as_array())
            .ok_or_else(|| invalid("or format must have an elements field with an array"))?;
        let mut elements = Vec::with_capacity(arr.len());
        for element in arr {
            elements.push(self.parse_format(element)?);
        }
        if elements.is_empty() {
            return Err(invalid("or format must have at least one element"));
        }
        Ok(OrFormat {
            elements,
            unbounded: false,
        })
    }

    /// Parse a tag from a JSON value, checking the optional type field.
    fn parse_tag_value(&self, value: &Value) -> Result<TagFormat> {
        let obj = value
            .as_object()
            .ok_or_else(|| invalid("tag format must be an object"))?;
        if let Some(ty) = obj.get("type") {
            if ty.as_str() != Some("tag") {
                return Err(invalid("tag format's type must be the string \"tag\""));
            }
        }
        self.parse_tag(obj)
    }

    fn parse_tag(&self, obj: &Map<String, Value>) -> Result<TagFormat> {
        let begin = obj
            .get("begin")
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid("tag format's begin field must be a string"))?
            .to_string();

        let content_value = obj
            .get("content")
            .ok_or_else(|| invalid("tag format must have a content field"))?;
        let content = self.parse_format(content_value)?;

        // end may be a single string or a non-empty array of strings.
        let end = match obj.get("end") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(arr)) => {
                if arr.is_empty() {
                    return Err(invalid("tag format's end array cannot be empty"));
                }
                let mut ends = Vec::with_capacity(arr.len());
                for item in arr {
                    let s = item.as_str().ok_or_else(|| {
                        invalid("tag format's end array must contain only strings")
                    })?;
                    ends.push(s.to_string());
                }
                ends
            }
            Some(_) => {
                return Err(invalid(
                    "tag format's end field must be a string or an array of strings",
                ))
            }
            None => return Err(invalid("tag format must have an end field")),
        };

        Ok(TagFormat {
            begin,
            content: Box::new(content),
            end,
        })
    }

    fn parse_tag_array(&self, obj: &Map<String, Value>, what: &str) -> Result<Vec<TagFormat>> {
        let arr = obj
            .get("tags")
            .and_then(|v| v.as_array())
            .ok_or_else(|| invalid(format!("{} must have a tags field with an array", what)))?;
        let mut tags = Vec::with_capacity(arr.len());
        for tag in arr {
            tags.push(self.parse_tag_value(tag)?);
        }
        if tags.is_empty() {
            return Err(invalid(format!("{}'s tags must be non-empty", what)));
        }
        Ok(tags)
    }

    fn bool_field(obj: &Map<String, Value>, field: &str) -> Result<bool> {
        match obj.get(field) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(invalid(format!("{} must be a boolean", field))),
        }
    }

    fn parse_triggered_tags(&self, obj: &Map<String, Value>) -> Result<TriggeredTagsFormat> {
        let triggers_arr = obj
            .get("triggers")
            .and_then(|v| v.as_array())
            .ok_or_else(|| invalid("triggered_tags format must have a triggers field with an array"))?;
        let mut triggers = Vec::with_capacity(triggers_arr.len());
        for trigger in triggers_arr {
            match trigger.as_str() {
                Some(s) if !s.is_empty() => triggers.push(s.to_string()),
                _ => {
                    return Err(invalid(
                        "triggered_tags format's triggers must be non-empty strings",
                    ))
                }
            }
        }
        if triggers.is_empty() {
            return Err(invalid("triggered_tags format's triggers must be non-empty"));
        }

        let tags = self.parse_tag_array(obj, "triggered_tags format")?;
        let excludes = Self::non_empty_string_array(obj, "excludes", "triggered_tags format")?;

        Ok(TriggeredTagsFormat {
            triggers,
            tags,
            excludes,
            at_least_one: Self::bool_field(obj, "at_least_one")?,
            stop_after_first: Self::bool_field(obj, "stop_after_first")?,
            detected_ends: Vec::new(),
        })
    }

    fn parse_tags_with_separator(&self, obj: &Map<String, Value>) -> Result<TagsWithSeparatorFormat> {
        let tags = self.parse_tag_array(obj, "tags_with_separator format")?;

        // separator is required but may be the empty string.
        let separator = obj
            .get("separator")
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid("tags_with_separator format's separator field must be a string"))?
            .to_string();

        Ok(TagsWithSeparatorFormat {
            tags,
            separator,
            at_least_one: Self::bool_field(obj, "at_least_one")?,
            stop_after_first: Self::bool_field(obj, "stop_after_first")?,
            detected_ends: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<StructuralTag> {
        parse_structural_tag(json)
    }

    #[test]
    fn test_const_string() {
        let st = parse(r#"{"type":"structural_tag","format":{"type":"const_string","value":"hello"}}"#)
            .unwrap();
        match st.format {
            Format::ConstString(f) => assert_eq!(f.value, "hello"),
            other => panic!("expected ConstString, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_json() {
        let err = parse("{not json").unwrap_err();
        assert!(matches!(err, StructuralTagError::InvalidJson(_)));
    }

    #[test]
    fn test_top_level_type_checked() {
        let err = parse(r#"{"type":"other","format":{"type":"any_text"}}"#).unwrap_err();
        assert!(matches!(err, StructuralTagError::InvalidStructuralTag(_)));
    }

    #[test]
    fn test_missing_format_field() {
        let err = parse(r#"{"type":"structural_tag"}"#).unwrap_err();
        assert!(err.message().contains("format field"));
    }

    #[test]
    fn test_empty_const_string_rejected() {
        assert!(parse(r#"{"format":{"type":"const_string","value":""}}"#).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = parse(r#"{"format":{"type":"wibble"}}"#).unwrap_err();
        assert!(err.message().contains("not recognized"));
    }

    #[test]
    fn test_untyped_tag_priority() {
        // An object with begin/content/end parses as a tag even without type.
        let st = parse(
            r#"{"format":{"begin":"<x>","content":{"type":"any_text"},"end":"</x>"}}"#,
        )
        .unwrap();
        assert!(matches!(st.format, Format::Tag(_)));
    }

    #[test]
    fn test_untyped_const_string() {
        let st = parse(r#"{"format":{"value":"v"}}"#).unwrap();
        assert!(matches!(st.format, Format::ConstString(_)));
    }

    #[test]
    fn test_bare_object_rejected() {
        let err = parse(r#"{"format":{}}"#).unwrap_err();
        assert!(err.message().contains("invalid format"));
    }

    #[test]
    fn test_any_text_with_extra_fields_rejected() {
        assert!(parse(r#"{"format":{"type":"any_text","extra":1}}"#).is_err());
    }

    #[test]
    fn test_any_text_excludes() {
        let st = parse(r#"{"format":{"type":"any_text","excludes":["bad"]}}"#).unwrap();
        match st.format {
            Format::AnyText(f) => assert_eq!(f.excludes, vec!["bad"]),
            other => panic!("expected AnyText, got {:?}", other),
        }
    }

    #[test]
    fn test_sequence_flattening() {
        let st = parse(
            r#"{"format":{"type":"sequence","elements":[
                {"type":"const_string","value":"a"},
                {"type":"sequence","elements":[
                    {"type":"const_string","value":"b"},
                    {"type":"const_string","value":"c"}
                ]}
            ]}}"#,
        )
        .unwrap();
        match st.format {
            Format::Sequence(f) => {
                assert_eq!(f.elements.len(), 3);
                assert!(f.elements.iter().all(|e| matches!(e, Format::ConstString(_))));
            }
            other => panic!("expected Sequence, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_sequence_rejected() {
        assert!(parse(r#"{"format":{"type":"sequence","elements":[]}}"#).is_err());
    }

    #[test]
    fn test_tag_end_string_normalized_to_list() {
        let st = parse(
            r#"{"format":{"type":"tag","begin":"<x>","content":{"type":"const_string","value":"v"},"end":"</x>"}}"#,
        )
        .unwrap();
        match st.format {
            Format::Tag(f) => assert_eq!(f.end, vec!["</x>"]),
            other => panic!("expected Tag, got {:?}", other),
        }
    }

    #[test]
    fn test_tag_empty_end_array_rejected() {
        assert!(parse(
            r#"{"format":{"type":"tag","begin":"<x>","content":{"type":"const_string","value":"v"},"end":[]}}"#,
        )
        .is_err());
    }

    #[test]
    fn test_tag_begin_may_be_empty() {
        let st = parse(
            r#"{"format":{"type":"tag","begin":"","content":{"type":"const_string","value":"v"},"end":"!"}}"#,
        )
        .unwrap();
        match st.format {
            Format::Tag(f) => assert_eq!(f.begin, ""),
            other => panic!("expected Tag, got {:?}", other),
        }
    }

    #[test]
    fn test_regex_excludes_must_be_non_empty() {
        assert!(parse(r#"{"format":{"type":"regex","pattern":"a+","excludes":[""]}}"#).is_err());
        assert!(parse(r#"{"format":{"type":"regex","pattern":"a+","excludes":["x"]}}"#).is_ok());
    }

    #[test]
    fn test_triggered_tags_defaults() {
        let st = parse(
            r#"{"format":{"type":"triggered_tags","triggers":["<t"],"tags":[
                {"begin":"<tag>","content":{"type":"const_string","value":"a"},"end":"</tag>"}
            ]}}"#,
        )
        .unwrap();
        match st.format {
            Format::TriggeredTags(f) => {
                assert!(!f.at_least_one);
                assert!(!f.stop_after_first);
                assert!(f.excludes.is_empty());
            }
            other => panic!("expected TriggeredTags, got {:?}", other),
        }
    }

    #[test]
    fn test_tags_with_separator_requires_separator() {
        assert!(parse(
            r#"{"format":{"type":"tags_with_separator","tags":[
                {"begin":"a","content":{"type":"const_string","value":"v"},"end":"b"}
            ]}}"#,
        )
        .is_err());
        let st = parse(
            r#"{"format":{"type":"tags_with_separator","separator":"","tags":[
                {"begin":"a","content":{"type":"const_string","value":"v"},"end":"b"}
            ]}}"#,
        )
        .unwrap();
        assert!(matches!(st.format, Format::TagsWithSeparator(_)));
    }

    #[test]
    fn test_qwen_xml_parameter_requires_explicit_type() {
        // Untyped fallback never reaches qwen_xml_parameter.
        let st = parse(r#"{"format":{"json_schema":{"type":"object"}}}"#).unwrap();
        assert!(matches!(st.format, Format::JsonSchema(_)));
    }

    #[test]
    fn test_json_schema_boolean_value() {
        let st = parse(r#"{"format":{"type":"json_schema","json_schema":true}}"#).unwrap();
        match st.format {
            Format::JsonSchema(f) => assert_eq!(f.json_schema, "true"),
            other => panic!("expected JsonSchema, got {:?}", other),
        }
    }

    #[test]
    fn test_recursion_depth_exceeded() {
        // Nest tags beyond the depth limit; each tag is one format level.
        let mut json = String::new();
        let depth = super::super::MAX_RECURSION_DEPTH + 1;
        json.push_str(r#"{"format":"#);
        for _ in 0..depth {
            json.push_str(r#"{"type":"tag","begin":"<x>","content":"#);
        }
        json.push_str(r#"{"type":"const_string","value":"v"}"#);
        for _ in 0..depth {
            json.push_str(r#","end":"</x>"}"#);
        }
        json.push('}');

        let err = parse(&json).unwrap_err();
        assert!(
            err.message().contains("recursion depth"),
            "unexpected error: {}",
            err
        );
    }
}
