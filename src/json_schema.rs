//! JSON Schema to grammar converter.
//!
//! Converts a JSON Schema into an EBNF grammar string, then parses it
//! into a `Grammar`. The generated grammar constrains output to valid
//! JSON matching the schema.
//!
//! # Supported features
//! - Types: string, integer, number, boolean, null, array, object
//! - Constraints: enum, const, minLength/maxLength, pattern
//! - Arrays: items, prefixItems, minItems/maxItems
//! - Objects: properties, required, additionalProperties
//! - Composition: $ref (`#/$defs/`, `#/definitions/`), anyOf, oneOf,
//!   single-element allOf
//!
//! Numeric minimum/maximum bounds are accepted but not enforced.

use anyhow::{anyhow, bail, Result};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::grammar::Grammar;
use crate::regex::regex_to_ebnf;

/// Convert a JSON Schema string to a Grammar.
pub fn json_schema_to_grammar(schema: &str) -> Result<Grammar> {
    let ebnf = json_schema_to_ebnf(schema)?;
    Grammar::from_ebnf(&ebnf, "root")
}

/// Convert a JSON Schema string to an EBNF grammar string.
pub fn json_schema_to_ebnf(schema: &str) -> Result<String> {
    let value: Value = serde_json::from_str(schema)?;
    let mut converter = SchemaConverter::new();
    let root_expr = converter.visit(&value, "root")?;
    Ok(converter.finish(&root_expr))
}

// ---------------------------------------------------------------------------
// Shared JSON building blocks
// ---------------------------------------------------------------------------

/// Basic rules shared by every generated grammar, with their dependencies.
/// Only the rules actually referenced (transitively) are emitted.
const BASIC_RULES: &[(&str, &str, &[&str])] = &[
    ("basic_ws", r"[ \t\n\r]*", &[]),
    (
        "basic_escape",
        r#"["\\/bfnrt] | "u" [0-9a-fA-F]{4}"#,
        &[],
    ),
    (
        "basic_string_char",
        r#"[^"\\\u0000-\u001f] | "\\" basic_escape"#,
        &["basic_escape"],
    ),
    (
        "basic_string",
        r#""\"" basic_string_char* "\"""#,
        &["basic_string_char"],
    ),
    ("basic_integer", r#""-"? ("0" | [1-9] [0-9]*)"#, &[]),
    (
        "basic_number",
        r#"basic_integer ("." [0-9]+)? ([eE] [+\-]? [0-9]+)?"#,
        &["basic_integer"],
    ),
    ("basic_boolean", r#""true" | "false""#, &[]),
    ("basic_null", r#""null""#, &[]),
    (
        "basic_member",
        r#"basic_string basic_ws ":" basic_ws basic_any"#,
        &["basic_string", "basic_ws", "basic_any"],
    ),
    (
        "basic_object",
        r#""{" basic_ws (basic_member basic_ws ("," basic_ws basic_member basic_ws)*)? "}""#,
        &["basic_ws", "basic_member"],
    ),
    (
        "basic_array",
        r#""[" basic_ws (basic_any basic_ws ("," basic_ws basic_any basic_ws)*)? "]""#,
        &["basic_ws", "basic_any"],
    ),
    (
        "basic_any",
        "basic_object | basic_array | basic_string | basic_number | basic_boolean | basic_null",
        &["basic_object", "basic_array", "basic_string", "basic_number", "basic_boolean", "basic_null"],
    ),
];

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Builds up EBNF rules while walking a schema. Also used by the Qwen XML
/// parameter translator to render per-property value grammars.
pub(crate) struct SchemaConverter {
    rules: Vec<(String, String)>,
    cache: FxHashMap<String, String>,
    used_basics: BTreeSet<&'static str>,
    aux_counter: usize,
}

impl SchemaConverter {
    pub(crate) fn new() -> Self {
        Self {
            rules: Vec::new(),
            cache: FxHashMap::default(),
            used_basics: BTreeSet::new(),
            aux_counter: 0,
        }
    }

    /// Mark a basic rule (and its dependencies) as used; returns its name.
    pub(crate) fn use_basic(&mut self, name: &'static str) -> &'static str {
        let mut worklist = vec![name];
        while let Some(n) = worklist.pop() {
            if self.used_basics.insert(n) {
                if let Some((_, _, deps)) = BASIC_RULES.iter().find(|(rn, _, _)| *rn == n) {
                    worklist.extend(deps.iter().copied());
                }
            }
        }
        name
    }

    pub(crate) fn add_rule(&mut self, name: &str, body: &str) {
        self.rules.push((name.to_string(), body.to_string()));
    }

    fn fresh_name(&mut self, prefix: &str) -> String {
        self.aux_counter += 1;
        format!("{}_{}", prefix, self.aux_counter)
    }

    /// Render the accumulated rules as EBNF text with `root ::= root_expr`.
    pub(crate) fn finish(self, root_expr: &str) -> String {
        let mut out = format!("root ::= {}\n", root_expr);
        for (name, body) in &self.rules {
            out.push_str(&format!("{} ::= {}\n", name, body));
        }
        for (name, body, _) in BASIC_RULES {
            if self.used_basics.contains(name) {
                out.push_str(&format!("{} ::= {}\n", name, body));
            }
        }
        out
    }

    /// Visit a schema and return an EBNF expression for it.
    pub(crate) fn visit(&mut self, schema: &Value, hint: &str) -> Result<String> {
        // Boolean schemas
        if let Some(b) = schema.as_bool() {
            if b {
                return Ok(self.use_basic("basic_any").to_string());
            }
            bail!("false schema: no values are valid");
        }

        let obj = match schema.as_object() {
            Some(o) => o,
            None => bail!("schema must be an object or boolean"),
        };

        let cache_key = schema.to_string();
        if let Some(cached) = self.cache.get(&cache_key) {
            return Ok(cached.clone());
        }

        // Register definitions so $refs resolve, including recursive ones.
        if let Some(defs) = obj.get("$defs").or_else(|| obj.get("definitions")) {
            if let Some(defs_obj) = defs.as_object() {
                for (name, def_schema) in defs_obj {
                    let rule_name = sanitize_rule_name(name);
                    if self.rules.iter().any(|(n, _)| n == &rule_name) {
                        continue;
                    }
                    // Reserve the slot first so self-references work.
                    self.add_rule(&rule_name, "");
                    let expr = self.visit(def_schema, &rule_name)?;
                    let slot = self
                        .rules
                        .iter_mut()
                        .find(|(n, b)| n == &rule_name && b.is_empty())
                        .unwrap();
                    slot.1 = expr;
                }
            }
        }

        let expr = self.visit_dispatch(obj, schema, hint)?;
        self.cache.insert(cache_key, expr.clone());
        Ok(expr)
    }

    fn visit_dispatch(
        &mut self,
        obj: &serde_json::Map<String, Value>,
        schema: &Value,
        hint: &str,
    ) -> Result<String> {
        if let Some(ref_val) = obj.get("$ref") {
            let ref_str = ref_val
                .as_str()
                .ok_or_else(|| anyhow!("$ref must be a string"))?;
            if let Some(name) = ref_str
                .strip_prefix("#/$defs/")
                .or_else(|| ref_str.strip_prefix("#/definitions/"))
            {
                return Ok(sanitize_rule_name(name));
            }
            bail!("unsupported $ref: {}", ref_str);
        }

        if let Some(const_val) = obj.get("const") {
            return Ok(json_value_to_ebnf_literal(const_val));
        }

        if let Some(enum_val) = obj.get("enum") {
            let arr = enum_val
                .as_array()
                .ok_or_else(|| anyhow!("enum must be an array"))?;
            if arr.is_empty() {
                bail!("enum must not be empty");
            }
            let alts: Vec<String> = arr.iter().map(json_value_to_ebnf_literal).collect();
            return Ok(format!("({})", alts.join(" | ")));
        }

        if let Some(any_of) = obj.get("anyOf").or_else(|| obj.get("oneOf")) {
            let arr = any_of
                .as_array()
                .ok_or_else(|| anyhow!("anyOf/oneOf must be an array"))?;
            if arr.is_empty() {
                bail!("anyOf/oneOf must not be empty");
            }
            let mut alts = Vec::new();
            for (i, sub) in arr.iter().enumerate() {
                alts.push(self.visit(sub, &format!("{}_{}", hint, i))?);
            }
            return Ok(format!("({})", alts.join(" | ")));
        }

        if let Some(all_of) = obj.get("allOf") {
            if let Some(arr) = all_of.as_array() {
                if arr.len() == 1 {
                    return self.visit(&arr[0], hint);
                }
            }
            bail!("allOf with multiple schemas is not supported");
        }

        match obj.get("type") {
            Some(Value::String(t)) => self.visit_typed(obj, t, hint),
            Some(Value::Array(types)) => {
                if types.is_empty() {
                    bail!("type array must not be empty");
                }
                let mut alts = Vec::new();
                for t in types {
                    let t_str = t
                        .as_str()
                        .ok_or_else(|| anyhow!("type array must contain strings"))?;
                    alts.push(self.visit_typed(obj, t_str, hint)?);
                }
                Ok(format!("({})", alts.join(" | ")))
            }
            None => {
                // No type specified; infer from other keywords.
                if obj.contains_key("properties")
                    || obj.contains_key("required")
                    || obj.contains_key("additionalProperties")
                {
                    self.visit_typed(obj, "object", hint)
                } else if obj.contains_key("items") || obj.contains_key("prefixItems") {
                    self.visit_typed(obj, "array", hint)
                } else if obj.contains_key("pattern")
                    || obj.contains_key("minLength")
                    || obj.contains_key("maxLength")
                {
                    self.visit_typed(obj, "string", hint)
                } else {
                    Ok(self.use_basic("basic_any").to_string())
                }
            }
            Some(other) => bail!("unexpected type value: {}", other),
        }
    }

    fn visit_typed(
        &mut self,
        obj: &serde_json::Map<String, Value>,
        type_name: &str,
        hint: &str,
    ) -> Result<String> {
        match type_name {
            "string" => self.visit_string(obj),
            "integer" => Ok(self.use_basic("basic_integer").to_string()),
            "number" => Ok(self.use_basic("basic_number").to_string()),
            "boolean" => Ok(self.use_basic("basic_boolean").to_string()),
            "null" => Ok(self.use_basic("basic_null").to_string()),
            "array" => self.visit_array(obj, hint),
            "object" => self.visit_object(obj, hint),
            _ => bail!("unknown type: {}", type_name),
        }
    }

    fn visit_string(&mut self, obj: &serde_json::Map<String, Value>) -> Result<String> {
        if let Some(pattern) = obj.get("pattern").and_then(|v| v.as_str()) {
            let ebnf = regex_to_ebnf(pattern)?;
            let body = ebnf.strip_prefix("root ::= ").unwrap_or(&ebnf).trim();
            let name = self.fresh_name("string_pattern");
            self.add_rule(&name, body);
            return Ok(format!("\"\\\"\" {} \"\\\"\"", name));
        }

        let min_len = obj.get("minLength").and_then(|v| v.as_u64()).unwrap_or(0);
        let max_len = obj.get("maxLength").and_then(|v| v.as_u64());

        if min_len == 0 && max_len.is_none() {
            return Ok(self.use_basic("basic_string").to_string());
        }
        let char_rule = self.use_basic("basic_string_char");
        let rep = match max_len {
            Some(max) if max < min_len => bail!("minLength exceeds maxLength"),
            Some(max) => format!("{}{{{},{}}}", char_rule, min_len, max),
            None => format!("{}{{{},}}", char_rule, min_len),
        };
        Ok(format!("\"\\\"\" {} \"\\\"\"", rep))
    }

    fn visit_array(&mut self, obj: &serde_json::Map<String, Value>, hint: &str) -> Result<String> {
        let ws = self.use_basic("basic_ws");
        let min_items = obj.get("minItems").and_then(|v| v.as_u64()).unwrap_or(0);
        let max_items = obj.get("maxItems").and_then(|v| v.as_u64());

        // Fixed prefix items
        let mut fixed: Vec<String> = Vec::new();
        if let Some(prefix) = obj.get("prefixItems").and_then(|v| v.as_array()) {
            for (i, item_schema) in prefix.iter().enumerate() {
                fixed.push(self.visit(item_schema, &format!("{}_item_{}", hint, i))?);
            }
        }

        // Schema for items beyond the fixed prefix
        let additional = match obj.get("items") {
            Some(Value::Bool(false)) => None,
            Some(items_schema) => Some(self.visit(items_schema, &format!("{}_items", hint))?),
            None => None,
        };

        if !fixed.is_empty() {
            // Tuple-style array; additional items follow unbounded.
            let mut parts = vec![format!("\"[\" {}", ws)];
            for (i, elem) in fixed.iter().enumerate() {
                if i > 0 {
                    parts.push(format!("\",\" {}", ws));
                }
                parts.push(format!("{} {}", elem, ws));
            }
            if let Some(addl) = additional {
                parts.push(format!("(\",\" {} {} {})*", ws, addl, ws));
            }
            parts.push("\"]\"".to_string());
            return Ok(format!("({})", parts.join(" ")));
        }

        let item = match additional {
            Some(item) => item,
            // No item schema at all: only the empty array is valid.
            None => return Ok(format!("(\"[\" {} \"]\")", ws)),
        };

        if min_items == 0 && max_items.is_none() {
            return Ok(format!(
                "(\"[\" {ws} ({item} {ws} (\",\" {ws} {item} {ws})*)? \"]\")",
                ws = ws,
                item = item
            ));
        }

        // Bounded: first element + a counted rest rule.
        let rest = self.fresh_name(&format!("{}_rest", hint));
        self.add_rule(&rest, &format!("\",\" {} {} {}", ws, item, ws));
        let rest_counts = |min: u64, max: Option<u64>| match max {
            Some(max) => format!("{}{{{},{}}}", rest, min, max),
            None => format!("{}{{{},}}", rest, min),
        };

        if min_items == 0 {
            let max = max_items.unwrap(); // min==0 and max==None handled above
            if max == 0 {
                return Ok(format!("(\"[\" {} \"]\")", ws));
            }
            Ok(format!(
                "(\"[\" {ws} ({item} {ws} {rest})? \"]\")",
                ws = ws,
                item = item,
                rest = rest_counts(0, Some(max - 1))
            ))
        } else {
            if let Some(max) = max_items {
                if max < min_items {
                    bail!("minItems exceeds maxItems");
                }
            }
            Ok(format!(
                "(\"[\" {ws} {item} {ws} {rest} \"]\")",
                ws = ws,
                item = item,
                rest = rest_counts(min_items - 1, max_items.map(|m| m - 1))
            ))
        }
    }

    fn visit_object(&mut self, obj: &serde_json::Map<String, Value>, hint: &str) -> Result<String> {
        let ws = self.use_basic("basic_ws");
        let properties = obj.get("properties").and_then(|v| v.as_object());
        let required: BTreeSet<&str> = obj
            .get("required")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        if let Some(props) = properties {
            if props.is_empty() {
                return Ok(format!("(\"{{\" {} \"}}\")", ws));
            }
            // One rule per property: "name" ws ":" ws value
            let mut prop_rules: Vec<(String, bool)> = Vec::new();
            for (name, prop_schema) in props {
                let value = self.visit(prop_schema, &format!("{}_{}", hint, sanitize_rule_name(name)))?;
                let rule = self.fresh_name(&format!("{}_prop", hint));
                self.add_rule(
                    &rule,
                    &format!("{} {} \":\" {} {}", ebnf_str_literal(&format!("\"{}\"", name)), ws, ws, value),
                );
                prop_rules.push((rule, required.contains(name.as_str())));
            }

            // Members: properties appear in declaration order; optional
            // ones may be skipped. `tails[k]` covers properties k..n given
            // that some property was already emitted.
            let n = prop_rules.len();
            let sep = format!("{} \",\" {}", ws, ws);
            let mut tails: Vec<String> = vec![String::new(); n + 1];
            for k in (0..n).rev() {
                let (rule, is_required) = &prop_rules[k];
                let step = if *is_required {
                    format!("{} {}", sep, rule)
                } else {
                    format!("({} {})?", sep, rule)
                };
                tails[k] = if tails[k + 1].is_empty() {
                    step
                } else {
                    format!("{} {}", step, tails[k + 1])
                };
            }

            // The first present property is one of the leading properties,
            // up to and including the first required one.
            let mut alts: Vec<String> = Vec::new();
            for (k, (rule, is_required)) in prop_rules.iter().enumerate() {
                let alt = if tails[k + 1].is_empty() {
                    rule.clone()
                } else {
                    format!("{} {}", rule, tails[k + 1])
                };
                alts.push(alt);
                if *is_required {
                    break;
                }
            }
            if !prop_rules.iter().any(|(_, req)| *req) {
                alts.push("\"\"".to_string());
            }

            let members = format!("({})", alts.join(" | "));
            return Ok(format!("(\"{{\" {} {} {} \"}}\")", ws, members, ws));
        }

        // No fixed properties: map-style object when additionalProperties
        // allows it, otherwise only the empty object.
        match obj.get("additionalProperties") {
            Some(Value::Bool(false)) | None => Ok(format!("(\"{{\" {} \"}}\")", ws)),
            Some(Value::Bool(true)) => {
                let member = self.use_basic("basic_member");
                Ok(format!(
                    "(\"{{\" {ws} ({member} {ws} (\",\" {ws} {member} {ws})*)? \"}}\")",
                    ws = ws,
                    member = member
                ))
            }
            Some(schema) => {
                let value = self.visit(schema, &format!("{}_additional", hint))?;
                let string = self.use_basic("basic_string");
                let member = self.fresh_name(&format!("{}_member", hint));
                self.add_rule(&member, &format!("{} {} \":\" {} {}", string, ws, ws, value));
                Ok(format!(
                    "(\"{{\" {ws} ({member} {ws} (\",\" {ws} {member} {ws})*)? \"}}\")",
                    ws = ws,
                    member = member
                ))
            }
        }
    }
}

/// Turn a rule-name candidate into EBNF-safe form.
fn sanitize_rule_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() || out.as_bytes()[0].is_ascii_digit() {
        out.insert(0, '_');
    }
    out
}

/// Serialize a JSON value and escape it as an EBNF string literal.
fn json_value_to_ebnf_literal(value: &Value) -> String {
    ebnf_str_literal(&value.to_string())
}

/// Escape arbitrary text as an EBNF string literal.
fn ebnf_str_literal(text: &str) -> String {
    let mut out = String::from("\"");
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::grammar_to_nfa;

    fn accepts(schema: &str, input: &str) -> bool {
        let grammar = json_schema_to_grammar(schema).unwrap();
        match grammar_to_nfa(&grammar) {
            Ok(nfa) => nfa.accepts(input.as_bytes()),
            Err(e) => panic!("schema grammar is not FSM-convertible: {}", e),
        }
    }

    #[test]
    fn test_boolean_schema_true() {
        let g = json_schema_to_grammar("true").unwrap();
        assert!(g.num_rules() > 1);
    }

    #[test]
    fn test_boolean_schema_false_fails() {
        assert!(json_schema_to_grammar("false").is_err());
    }

    #[test]
    fn test_const() {
        let schema = r#"{"const": "hello"}"#;
        assert!(accepts(schema, "\"hello\""));
        assert!(!accepts(schema, "\"world\""));
    }

    #[test]
    fn test_enum() {
        let schema = r#"{"enum": ["a", 1, true]}"#;
        assert!(accepts(schema, "\"a\""));
        assert!(accepts(schema, "1"));
        assert!(accepts(schema, "true"));
        assert!(!accepts(schema, "\"b\""));
    }

    #[test]
    fn test_integer() {
        let schema = r#"{"type": "integer"}"#;
        assert!(accepts(schema, "0"));
        assert!(accepts(schema, "-42"));
        assert!(accepts(schema, "123"));
        assert!(!accepts(schema, "01"));
        assert!(!accepts(schema, "1.5"));
    }

    #[test]
    fn test_number() {
        let schema = r#"{"type": "number"}"#;
        assert!(accepts(schema, "3.25"));
        assert!(accepts(schema, "-1e10"));
        assert!(accepts(schema, "7"));
        assert!(!accepts(schema, "abc"));
    }

    #[test]
    fn test_string() {
        let schema = r#"{"type": "string"}"#;
        assert!(accepts(schema, "\"hi\""));
        assert!(accepts(schema, "\"\""));
        assert!(accepts(schema, "\"a\\nb\""));
        assert!(!accepts(schema, "hi"));
    }

    #[test]
    fn test_string_length_bounds() {
        let schema = r#"{"type": "string", "minLength": 2, "maxLength": 3}"#;
        assert!(!accepts(schema, "\"a\""));
        assert!(accepts(schema, "\"ab\""));
        assert!(accepts(schema, "\"abc\""));
        assert!(!accepts(schema, "\"abcd\""));
    }

    #[test]
    fn test_string_pattern() {
        let schema = r#"{"type": "string", "pattern": "[0-9]{3}"}"#;
        assert!(accepts(schema, "\"123\""));
        assert!(!accepts(schema, "\"12\""));
    }

    #[test]
    fn test_array_of_integers() {
        let schema = r#"{"type": "array", "items": {"type": "integer"}}"#;
        assert!(accepts(schema, "[]"));
        assert!(accepts(schema, "[1]"));
        assert!(accepts(schema, "[1, 2, 3]"));
        assert!(!accepts(schema, "[1, \"a\"]"));
    }

    #[test]
    fn test_array_bounds() {
        let schema = r#"{"type": "array", "items": {"type": "integer"}, "minItems": 1, "maxItems": 2}"#;
        assert!(!accepts(schema, "[]"));
        assert!(accepts(schema, "[1]"));
        assert!(accepts(schema, "[1,2]"));
        assert!(!accepts(schema, "[1,2,3]"));
    }

    #[test]
    fn test_object_required_properties() {
        let schema = r#"{
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"}
            },
            "required": ["name", "age"],
            "additionalProperties": false
        }"#;
        assert!(accepts(schema, r#"{"name": "bob", "age": 3}"#));
        assert!(accepts(schema, r#"{"name":"bob","age":3}"#));
        assert!(!accepts(schema, r#"{"name": "bob"}"#));
        assert!(!accepts(schema, r#"{}"#));
    }

    #[test]
    fn test_object_optional_properties() {
        let schema = r#"{
            "type": "object",
            "properties": {
                "a": {"type": "integer"},
                "b": {"type": "integer"}
            },
            "required": ["a"]
        }"#;
        assert!(accepts(schema, r#"{"a": 1}"#));
        assert!(accepts(schema, r#"{"a": 1, "b": 2}"#));
        assert!(!accepts(schema, r#"{"b": 2}"#));
    }

    #[test]
    fn test_object_all_optional() {
        let schema = r#"{
            "type": "object",
            "properties": {
                "a": {"type": "integer"},
                "b": {"type": "integer"}
            }
        }"#;
        assert!(accepts(schema, r#"{}"#));
        assert!(accepts(schema, r#"{"a": 1}"#));
        assert!(accepts(schema, r#"{"b": 2}"#));
        assert!(accepts(schema, r#"{"a": 1, "b": 2}"#));
    }

    #[test]
    fn test_map_object() {
        let schema = r#"{"type": "object", "additionalProperties": {"type": "integer"}}"#;
        assert!(accepts(schema, r#"{}"#));
        assert!(accepts(schema, r#"{"x": 1, "y": 2}"#));
        assert!(!accepts(schema, r#"{"x": "s"}"#));
    }

    #[test]
    fn test_any_of() {
        let schema = r#"{"anyOf": [{"type": "integer"}, {"type": "boolean"}]}"#;
        assert!(accepts(schema, "5"));
        assert!(accepts(schema, "false"));
        assert!(!accepts(schema, "\"s\""));
    }

    #[test]
    fn test_type_array() {
        let schema = r#"{"type": ["integer", "null"]}"#;
        assert!(accepts(schema, "1"));
        assert!(accepts(schema, "null"));
        assert!(!accepts(schema, "true"));
    }

    #[test]
    fn test_ref_to_defs() {
        let schema = r##"{
            "$defs": {"num": {"type": "integer"}},
            "type": "array",
            "items": {"$ref": "#/$defs/num"}
        }"##;
        assert!(accepts(schema, "[1,2]"));
        assert!(!accepts(schema, "[true]"));
    }

    #[test]
    fn test_prefix_items() {
        let schema = r#"{
            "type": "array",
            "prefixItems": [{"type": "integer"}, {"type": "boolean"}],
            "items": false
        }"#;
        assert!(accepts(schema, "[1, true]"));
        assert!(!accepts(schema, "[true, 1]"));
    }

    #[test]
    fn test_untyped_schema_accepts_any_json() {
        let schema = r#"{}"#;
        let grammar = json_schema_to_grammar(schema).unwrap();
        // basic_any is recursive, so no FSM; check the grammar shape instead.
        assert!(grammar.to_string().contains("basic_any"));
    }
}
