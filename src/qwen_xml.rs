//! Qwen XML tool-calling parameter encoding.
//!
//! Translates a JSON schema describing tool parameters into an EBNF
//! grammar for the Qwen XML calling convention: one
//! `<parameter=NAME>\n VALUE \n</parameter>\n` block per property, in
//! declaration order, with optional properties skippable. String-typed
//! parameters are written as raw text; all other types use their JSON
//! encoding.

use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::json_schema::SchemaConverter;

/// Convert a tool-parameter JSON schema to EBNF text rooted at `root`.
pub fn qwen_xml_to_ebnf(schema: &str) -> Result<String> {
    let value: Value = serde_json::from_str(schema)?;

    if let Some(b) = value.as_bool() {
        if !b {
            bail!("false schema: no values are valid");
        }
        // Any parameters at all: an unconstrained block sequence.
        return Ok(concat!(
            "root ::= param*\n",
            "param ::= \"<parameter=\" param_name \">\\n\" param_text \"\\n</parameter>\\n\"\n",
            "param_name ::= [a-zA-Z0-9_-]+\n",
            "param_text ::= [^<]*\n",
        )
        .to_string());
    }

    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("schema must be an object or boolean"))?;
    let properties = obj
        .get("properties")
        .and_then(|v| v.as_object())
        .ok_or_else(|| anyhow!("parameter schema must have a properties object"))?;
    let required: BTreeSet<&str> = obj
        .get("required")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let mut converter = SchemaConverter::new();
    let mut root_parts: Vec<String> = Vec::new();
    let mut raw_text_used = false;

    for (i, (name, prop_schema)) in properties.iter().enumerate() {
        let value_expr = if is_plain_string_schema(prop_schema) {
            raw_text_used = true;
            "qwen_raw_text".to_string()
        } else {
            converter.visit(prop_schema, &format!("param_{}", i))?
        };

        let rule = format!("qwen_param_{}", i);
        converter.add_rule(
            &rule,
            &format!(
                "\"<parameter={}>\\n\" {} \"\\n</parameter>\\n\"",
                escape_name(name),
                value_expr
            ),
        );
        if required.contains(name.as_str()) {
            root_parts.push(rule);
        } else {
            root_parts.push(format!("{}?", rule));
        }
    }

    if raw_text_used {
        converter.add_rule("qwen_raw_text", "[^<]*");
    }

    let root_expr = if root_parts.is_empty() {
        "\"\"".to_string()
    } else {
        root_parts.join(" ")
    };
    Ok(converter.finish(&root_expr))
}

/// A string-typed schema with no further constraints is rendered as raw
/// text rather than a JSON-quoted string.
fn is_plain_string_schema(schema: &Value) -> bool {
    match schema.as_object() {
        Some(obj) => {
            obj.get("type").and_then(|v| v.as_str()) == Some("string")
                && !obj.contains_key("pattern")
                && !obj.contains_key("enum")
                && !obj.contains_key("const")
                && !obj.contains_key("minLength")
                && !obj.contains_key("maxLength")
        }
        None => false,
    }
}

fn escape_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' | '<' | '>' | '\n' | '\r' | '\t' => '_',
            c => c,
        })
        .collect()
}
