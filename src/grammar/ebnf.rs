//! EBNF parser: parses EBNF grammar strings into `Grammar`.
//!
//! Supports:
//! - String literals with UTF-8 and escape sequences
//! - Character classes with Unicode ranges, negation
//! - Rule references
//! - Sequences, choices (|), grouping with parentheses
//! - Quantifiers: *, +, ?, {n}, {n,m}, {n,}
//! - Comments: # to end of line
//!
//! Parsing is two-phase: the text is first parsed into a lightweight
//! syntax tree with unresolved rule names, which is then lowered into a
//! `GrammarBuilder`. This lets rule bodies reference rules defined later
//! in the text.

use anyhow::{anyhow, bail, Result};
use rustc_hash::FxHashMap;

use super::builder::GrammarBuilder;
use super::{ExprId, Grammar, RuleId};

impl Grammar {
    /// Parse an EBNF grammar string. `root_name` selects the root rule.
    pub fn from_ebnf(ebnf: &str, root_name: &str) -> Result<Grammar> {
        let defs = Parser::new(ebnf).parse_grammar()?;
        Lowerer::lower_grammar(defs, root_name)
    }
}

// ─── Syntax tree ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Node {
    Empty,
    /// A literal, already decoded to UTF-8 bytes.
    Str(Vec<u8>),
    Class {
        negated: bool,
        ranges: Vec<(u32, u32)>,
    },
    Ref(String),
    Seq(Vec<Node>),
    Choice(Vec<Node>),
    Repeat(Box<Node>, u32, Option<u32>),
}

// ─── Escape handling ─────────────────────────────────────────────────

fn hex_value(c: u8) -> Option<u32> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as u32),
        b'a'..=b'f' => Some((c - b'a' + 10) as u32),
        b'A'..=b'F' => Some((c - b'A' + 10) as u32),
        _ => None,
    }
}

// ─── Parser ──────────────────────────────────────────────────────────

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn err(&self, msg: &str) -> anyhow::Error {
        let (line, col) = self.line_col();
        anyhow!("EBNF parse error at line {}, column {}: {}", line, col, msg)
    }

    fn line_col(&self) -> (usize, usize) {
        let mut line = 1;
        let mut col = 1;
        for &b in &self.input[..self.pos.min(self.input.len())] {
            if b == b'\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (line, col)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') => {
                    self.advance();
                }
                Some(b'#') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn is_name_char(c: u8, is_first: bool) -> bool {
        c == b'_'
            || c == b'-'
            || c == b'.'
            || c.is_ascii_alphabetic()
            || (!is_first && c.is_ascii_digit())
    }

    fn parse_name(&mut self) -> Option<String> {
        let start = self.pos;
        let mut first = true;
        while let Some(c) = self.peek() {
            if Self::is_name_char(c, first) {
                self.advance();
                first = false;
            } else {
                break;
            }
        }
        if self.pos == start {
            None
        } else {
            Some(String::from_utf8_lossy(&self.input[start..self.pos]).to_string())
        }
    }

    /// Check whether an identifier followed by `::=` starts at the current
    /// position, i.e. the next rule definition begins here.
    fn at_rule_start(&mut self) -> bool {
        let saved = self.pos;
        let result = match self.parse_name() {
            None => false,
            Some(_) => {
                self.skip_trivia();
                self.input[self.pos..].starts_with(b"::=")
            }
        };
        self.pos = saved;
        result
    }

    fn parse_grammar(&mut self) -> Result<Vec<(String, Node)>> {
        let mut defs: Vec<(String, Node)> = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek().is_none() {
                break;
            }
            let name = self
                .parse_name()
                .ok_or_else(|| self.err("expected rule name"))?;
            self.skip_trivia();
            if !self.input[self.pos..].starts_with(b"::=") {
                return Err(self.err(&format!("expected '::=' after rule name '{}'", name)));
            }
            self.pos += 3;
            let body = self.parse_choices()?;
            if defs.iter().any(|(n, _)| n == &name) {
                bail!("duplicate rule definition: '{}'", name);
            }
            defs.push((name, body));
        }
        if defs.is_empty() {
            bail!("EBNF grammar contains no rules");
        }
        Ok(defs)
    }

    fn parse_choices(&mut self) -> Result<Node> {
        let mut alts = vec![self.parse_sequence()?];
        loop {
            self.skip_trivia();
            if self.peek() == Some(b'|') {
                self.advance();
                alts.push(self.parse_sequence()?);
            } else {
                break;
            }
        }
        if alts.len() == 1 {
            Ok(alts.pop().unwrap())
        } else {
            Ok(Node::Choice(alts))
        }
    }

    fn parse_sequence(&mut self) -> Result<Node> {
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None | Some(b'|') | Some(b')') => break,
                Some(c) if Self::is_name_char(c, true) => {
                    if self.at_rule_start() {
                        break;
                    }
                    let name = self.parse_name().unwrap();
                    items.push(self.parse_quantifier(Node::Ref(name))?);
                }
                Some(b'"') => {
                    let bytes = self.parse_string_literal()?;
                    let node = if bytes.is_empty() {
                        Node::Empty
                    } else {
                        Node::Str(bytes)
                    };
                    items.push(self.parse_quantifier(node)?);
                }
                Some(b'[') => {
                    let node = self.parse_char_class()?;
                    items.push(self.parse_quantifier(node)?);
                }
                Some(b'(') => {
                    self.advance();
                    let inner = self.parse_choices()?;
                    self.skip_trivia();
                    if self.advance() != Some(b')') {
                        return Err(self.err("expected ')'"));
                    }
                    items.push(self.parse_quantifier(inner)?);
                }
                Some(c) => {
                    return Err(self.err(&format!("unexpected character '{}'", c as char)));
                }
            }
        }
        match items.len() {
            0 => Ok(Node::Empty),
            1 => Ok(items.pop().unwrap()),
            _ => Ok(Node::Seq(items)),
        }
    }

    fn parse_quantifier(&mut self, node: Node) -> Result<Node> {
        match self.peek() {
            Some(b'*') => {
                self.advance();
                Ok(Node::Repeat(Box::new(node), 0, None))
            }
            Some(b'+') => {
                self.advance();
                Ok(Node::Repeat(Box::new(node), 1, None))
            }
            Some(b'?') => {
                self.advance();
                Ok(Node::Repeat(Box::new(node), 0, Some(1)))
            }
            Some(b'{') => {
                self.advance();
                self.skip_trivia();
                let min = self.parse_integer()?;
                self.skip_trivia();
                let (min, max) = match self.advance() {
                    Some(b'}') => (min, Some(min)),
                    Some(b',') => {
                        self.skip_trivia();
                        if self.peek() == Some(b'}') {
                            self.advance();
                            (min, None)
                        } else {
                            let max = self.parse_integer()?;
                            self.skip_trivia();
                            if self.advance() != Some(b'}') {
                                return Err(self.err("expected '}' in repetition"));
                            }
                            (min, Some(max))
                        }
                    }
                    _ => return Err(self.err("expected ',' or '}' in repetition")),
                };
                if let Some(max) = max {
                    if min > max {
                        return Err(self.err("repetition min exceeds max"));
                    }
                }
                Ok(Node::Repeat(Box::new(node), min, max))
            }
            _ => Ok(node),
        }
    }

    fn parse_integer(&mut self) -> Result<u32> {
        let mut n: u32 = 0;
        let mut any = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                n = n
                    .checked_mul(10)
                    .and_then(|n| n.checked_add((c - b'0') as u32))
                    .ok_or_else(|| self.err("repetition count overflows"))?;
                self.advance();
                any = true;
            } else {
                break;
            }
        }
        if !any {
            return Err(self.err("expected integer"));
        }
        Ok(n)
    }

    fn parse_string_literal(&mut self) -> Result<Vec<u8>> {
        self.advance(); // opening "
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None | Some(b'\n') | Some(b'\r') => {
                    return Err(self.err("unterminated string literal"));
                }
                Some(b'"') => {
                    self.advance();
                    return Ok(bytes);
                }
                // \xHH in a string literal is a raw byte, which is how
                // non-ASCII text round-trips through generated EBNF.
                Some(b'\\') if self.input.get(self.pos + 1) == Some(&b'x') => {
                    self.advance();
                    self.advance();
                    let mut cp = 0u32;
                    let mut any = false;
                    while let Some(d) = self.peek().and_then(hex_value) {
                        cp = cp * 16 + d;
                        self.advance();
                        any = true;
                    }
                    if !any {
                        return Err(self.err("invalid \\x escape: no hex digits"));
                    }
                    if cp > 0xff {
                        return Err(self.err("\\x escape does not fit in a byte"));
                    }
                    bytes.push(cp as u8);
                }
                Some(b'\\') => {
                    let cp = self.parse_escape(&[])?;
                    push_codepoint(&mut bytes, cp)?;
                }
                Some(_) => {
                    let cp = self.parse_utf8_char()?;
                    push_codepoint(&mut bytes, cp)?;
                }
            }
        }
    }

    fn parse_char_class(&mut self) -> Result<Node> {
        self.advance(); // opening [
        let mut negated = false;
        if self.peek() == Some(b'^') {
            self.advance();
            negated = true;
        }

        const CLASS_ESCAPES: &[(u8, u32)] = &[(b'-', 0x2d), (b']', 0x5d), (b'^', 0x5e)];

        let mut ranges: Vec<(u32, u32)> = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.err("unclosed character class")),
                Some(b']') => {
                    self.advance();
                    break;
                }
                _ => {
                    let lo = self.parse_class_char(CLASS_ESCAPES)?;
                    // Range if a '-' follows and it is not the closing position
                    if self.peek() == Some(b'-') && self.input.get(self.pos + 1) != Some(&b']') {
                        self.advance();
                        let hi = self.parse_class_char(CLASS_ESCAPES)?;
                        if lo > hi {
                            return Err(self.err("character class range is reversed"));
                        }
                        ranges.push((lo, hi));
                    } else {
                        ranges.push((lo, lo));
                    }
                }
            }
        }
        if ranges.is_empty() {
            return Err(self.err("empty character class"));
        }
        Ok(Node::Class { negated, ranges })
    }

    fn parse_class_char(&mut self, extra_escapes: &[(u8, u32)]) -> Result<u32> {
        if self.peek() == Some(b'\\') {
            self.parse_escape(extra_escapes)
        } else {
            self.parse_utf8_char()
        }
    }

    /// Decode one UTF-8 character at the current position.
    fn parse_utf8_char(&mut self) -> Result<u32> {
        let rest = &self.input[self.pos..];
        let s = std::str::from_utf8(rest)
            .map_err(|_| self.err("invalid UTF-8 in grammar text"))?;
        let c = s.chars().next().ok_or_else(|| self.err("unexpected end of input"))?;
        self.pos += c.len_utf8();
        Ok(c as u32)
    }

    /// Parse an escape sequence starting at `\`. Returns the codepoint.
    fn parse_escape(&mut self, extra_escapes: &[(u8, u32)]) -> Result<u32> {
        self.advance(); // backslash
        let c = self
            .advance()
            .ok_or_else(|| self.err("truncated escape sequence"))?;
        for &(ch, cp) in extra_escapes {
            if c == ch {
                return Ok(cp);
            }
        }
        match c {
            b'\'' => Ok(0x27),
            b'"' => Ok(0x22),
            b'?' => Ok(0x3f),
            b'\\' => Ok(0x5c),
            b'a' => Ok(0x07),
            b'b' => Ok(0x08),
            b'f' => Ok(0x0c),
            b'n' => Ok(0x0a),
            b'r' => Ok(0x0d),
            b't' => Ok(0x09),
            b'v' => Ok(0x0b),
            b'0' => Ok(0x00),
            b'e' => Ok(0x1b),
            b'x' => {
                // \xHH... (variable length hex)
                let mut cp = 0u32;
                let mut any = false;
                while let Some(d) = self.peek().and_then(hex_value) {
                    cp = cp * 16 + d;
                    self.advance();
                    any = true;
                }
                if !any {
                    return Err(self.err("invalid \\x escape: no hex digits"));
                }
                Ok(cp)
            }
            b'u' => self.parse_fixed_hex(4),
            b'U' => self.parse_fixed_hex(8),
            _ => Err(self.err(&format!("invalid escape sequence: \\{}", c as char))),
        }
    }

    fn parse_fixed_hex(&mut self, count: usize) -> Result<u32> {
        let mut cp = 0u32;
        for _ in 0..count {
            let d = self
                .advance()
                .and_then(hex_value)
                .ok_or_else(|| self.err("invalid hex digit in unicode escape"))?;
            cp = cp * 16 + d;
        }
        Ok(cp)
    }
}

/// Append a codepoint to a byte buffer as UTF-8.
fn push_codepoint(bytes: &mut Vec<u8>, cp: u32) -> Result<()> {
    if cp < 0x80 {
        bytes.push(cp as u8);
        return Ok(());
    }
    match char::from_u32(cp) {
        Some(c) => {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            Ok(())
        }
        None => bail!("invalid codepoint in string literal: U+{:04X}", cp),
    }
}

// ─── Lowering ────────────────────────────────────────────────────────

struct Lowerer {
    builder: GrammarBuilder,
    rule_ids: FxHashMap<String, RuleId>,
}

impl Lowerer {
    fn lower_grammar(defs: Vec<(String, Node)>, root_name: &str) -> Result<Grammar> {
        let mut lowerer = Lowerer {
            builder: GrammarBuilder::new(),
            rule_ids: FxHashMap::default(),
        };

        // Register all rule names first so bodies can reference any rule.
        for (name, _) in &defs {
            let id = lowerer.builder.add_rule(name);
            lowerer.rule_ids.insert(name.clone(), id);
        }

        for (name, body) in &defs {
            let body_expr = lowerer.lower(body, name)?;
            let id = lowerer.rule_ids[name];
            lowerer.builder.update_rule_body(id, body_expr);
        }

        let root = *lowerer
            .rule_ids
            .get(root_name)
            .ok_or_else(|| anyhow!("root rule '{}' not found in EBNF grammar", root_name))?;
        lowerer.builder.build(root)
    }

    fn lower(&mut self, node: &Node, rule_name: &str) -> Result<ExprId> {
        match node {
            Node::Empty => Ok(self.builder.add_empty_string()),
            Node::Str(bytes) => Ok(self.builder.add_byte_string(bytes)),
            Node::Class { negated, ranges } => {
                Ok(self.builder.add_character_class(*negated, ranges.clone()))
            }
            Node::Ref(name) => {
                let id = *self
                    .rule_ids
                    .get(name)
                    .ok_or_else(|| anyhow!("reference to undefined rule '{}'", name))?;
                Ok(self.builder.add_rule_ref(id))
            }
            Node::Seq(items) => {
                let exprs = items
                    .iter()
                    .map(|n| self.lower(n, rule_name))
                    .collect::<Result<Vec<_>>>()?;
                Ok(self.builder.add_sequence(exprs))
            }
            Node::Choice(items) => {
                let exprs = items
                    .iter()
                    .map(|n| self.lower(n, rule_name))
                    .collect::<Result<Vec<_>>>()?;
                Ok(self.builder.add_choices(exprs))
            }
            Node::Repeat(inner, min, max) => self.lower_repeat(inner, *min, *max, rule_name),
        }
    }

    fn lower_repeat(
        &mut self,
        inner: &Node,
        min: u32,
        max: Option<u32>,
        rule_name: &str,
    ) -> Result<ExprId> {
        // Character classes star directly; `c+` becomes `c c*`.
        if let Node::Class { negated, ranges } = inner {
            match (min, max) {
                (0, None) => {
                    return Ok(self.builder.add_character_class_star(*negated, ranges.clone()));
                }
                (1, None) => {
                    let class = self.builder.add_character_class(*negated, ranges.clone());
                    let star = self.builder.add_character_class_star(*negated, ranges.clone());
                    return Ok(self.builder.add_sequence(vec![class, star]));
                }
                _ => {}
            }
        }

        // `x?` is a plain choice with the empty string.
        if min == 0 && max == Some(1) {
            let lowered = self.lower(inner, rule_name)?;
            let empty = self.builder.add_empty_string();
            return Ok(self.builder.add_choices(vec![lowered, empty]));
        }

        // General case: an auxiliary rule repeated {min, max}.
        let aux = self
            .builder
            .add_empty_rule_with_hint(&format!("{}_quant", rule_name));
        let body = self.lower(inner, rule_name)?;
        self.builder.update_rule_body(aux, body);
        Ok(self.builder.add_repeat(aux, min, max))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Expr;

    #[test]
    fn test_simple_rule() {
        let g = Grammar::from_ebnf(r#"root ::= "yes" | "no""#, "root").unwrap();
        assert_eq!(g.num_rules(), 1);
        assert_eq!(g.to_string(), "root ::= (\"yes\" | \"no\")");
    }

    #[test]
    fn test_rule_references_and_order() {
        // A rule may reference one defined later.
        let g = Grammar::from_ebnf("root ::= item item\nitem ::= [a-z]", "root").unwrap();
        assert_eq!(g.num_rules(), 2);
        assert_eq!(g.root().name, "root");
    }

    #[test]
    fn test_undefined_reference_fails() {
        let err = Grammar::from_ebnf("root ::= missing", "root").unwrap_err();
        assert!(err.to_string().contains("undefined rule"));
    }

    #[test]
    fn test_missing_root_fails() {
        assert!(Grammar::from_ebnf(r#"main ::= "x""#, "root").is_err());
    }

    #[test]
    fn test_duplicate_rule_fails() {
        let ebnf = "root ::= \"a\"\nroot ::= \"b\"";
        assert!(Grammar::from_ebnf(ebnf, "root").is_err());
    }

    #[test]
    fn test_char_class_star() {
        let g = Grammar::from_ebnf("root ::= [a-z]*", "root").unwrap();
        match g.get_expr(g.root().body) {
            Expr::CharacterClassStar { negated, ranges } => {
                assert!(!negated);
                assert_eq!(ranges, &[(0x61, 0x7a)]);
            }
            other => panic!("expected CharacterClassStar, got {:?}", other),
        }
    }

    #[test]
    fn test_char_class_plus() {
        let g = Grammar::from_ebnf("root ::= [0-9]+", "root").unwrap();
        assert_eq!(g.to_string(), "root ::= ([0-9] [0-9]*)");
    }

    #[test]
    fn test_negated_class_and_escapes() {
        let g = Grammar::from_ebnf(r#"root ::= [^"\\] "\n""#, "root").unwrap();
        let s = g.to_string();
        assert!(s.contains("[^\"\\\\]"), "got: {}", s);
        assert!(s.contains("\"\\n\""), "got: {}", s);
    }

    #[test]
    fn test_optional_is_choice_with_empty() {
        let g = Grammar::from_ebnf(r#"root ::= "-"? [0-9]"#, "root").unwrap();
        assert_eq!(g.to_string(), "root ::= ((\"-\" | \"\") [0-9])");
    }

    #[test]
    fn test_bounded_repetition_creates_aux_rule() {
        let g = Grammar::from_ebnf(r#"root ::= ("ab"){2,4}"#, "root").unwrap();
        assert_eq!(g.num_rules(), 2);
        let s = g.to_string();
        assert!(s.contains("root_quant{2,4}"), "got: {}", s);
    }

    #[test]
    fn test_comments_and_whitespace() {
        let ebnf = "# leading comment\nroot ::= \"a\" # trailing\n  | \"b\"\n";
        let g = Grammar::from_ebnf(ebnf, "root").unwrap();
        assert_eq!(g.to_string(), "root ::= (\"a\" | \"b\")");
    }

    #[test]
    fn test_empty_string_literal() {
        let g = Grammar::from_ebnf(r#"root ::= "a" | """#, "root").unwrap();
        assert_eq!(g.to_string(), "root ::= (\"a\" | \"\")");
    }

    #[test]
    fn test_unicode_escape_encodes_utf8() {
        let g = Grammar::from_ebnf(r#"root ::= "\u00e9""#, "root").unwrap();
        match g.get_expr(g.root().body) {
            Expr::ByteString(bytes) => assert_eq!(bytes, "é".as_bytes()),
            other => panic!("expected ByteString, got {:?}", other),
        }
    }

    #[test]
    fn test_hex_escape_is_raw_byte() {
        let g = Grammar::from_ebnf(r#"root ::= "\xc3\xa9""#, "root").unwrap();
        match g.get_expr(g.root().body) {
            Expr::ByteString(bytes) => assert_eq!(bytes, "é".as_bytes()),
            other => panic!("expected ByteString, got {:?}", other),
        }
    }

    #[test]
    fn test_unterminated_string_fails() {
        assert!(Grammar::from_ebnf("root ::= \"abc", "root").is_err());
    }

    #[test]
    fn test_grouping_with_quantifier() {
        let g = Grammar::from_ebnf(r#"root ::= ("," [0-9])*"#, "root").unwrap();
        let s = g.to_string();
        assert!(s.contains("root_quant{0,}"), "got: {}", s);
    }
}
