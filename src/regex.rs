//! Regex-to-grammar conversion.
//!
//! Converts a regular expression pattern to an EBNF grammar string,
//! then parses it into a `Grammar`. Follows JavaScript regex semantics.
//!
//! # Supported features
//! - Literals, character classes `[a-z]`, negated `[^...]`
//! - Quantifiers: `*`, `+`, `?`, `{n}`, `{n,}`, `{n,m}`
//! - Groups: `(...)`, `(?:...)`, `(?<name>...)`
//! - Alternation: `|`
//! - Escapes: `\d`, `\w`, `\s`, `\D`, `\W`, `\S`, `\uXXXX`, `\u{XXXXX}`, `\xHH`
//! - Any char: `.`
//! - Anchors: `^`, `$` (ignored)
//!
//! # Unsupported (errors)
//! - Lookahead/lookbehind: `(?=...)`, `(?!...)`, `(?<=...)`, `(?<!...)`
//! - Backreferences: `\1`, `\k<name>`
//! - Unicode properties: `\p{...}`, `\P{...}`
//! - Word boundaries: `\b`, `\B`

use anyhow::{anyhow, bail, Result};

use crate::fsm::{grammar_to_nfa, Automaton};
use crate::grammar::Grammar;

/// Convert a regex pattern to a Grammar with a single `root` rule.
pub fn regex_to_grammar(pattern: &str) -> Result<Grammar> {
    let ebnf = regex_to_ebnf(pattern)?;
    Grammar::from_ebnf(&ebnf, "root")
}

/// Convert a regex pattern to an EBNF grammar string like `root ::= [a-z]+\n`.
pub fn regex_to_ebnf(pattern: &str) -> Result<String> {
    let body = Cursor::new(pattern).convert()?;
    Ok(format!("root ::= {}\n", body))
}

/// Compile a regex pattern into a byte-level DFA.
pub fn regex_to_fsm(pattern: &str) -> Result<Automaton> {
    let grammar = regex_to_grammar(pattern)?;
    let nfa = grammar_to_nfa(&grammar)?;
    Ok(nfa.to_dfa())
}

struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(pattern: &'a str) -> Self {
        Self {
            input: pattern.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Main entry: parse the whole pattern.
    fn convert(&mut self) -> Result<String> {
        if self.peek() == Some(b'^') {
            self.advance(); // leading anchor, ignored
        }

        let result = self.parse_alternation()?;

        if self.peek() == Some(b'$') {
            self.advance(); // trailing anchor, ignored
        }

        if !self.at_end() {
            bail!(
                "unexpected character at position {}: '{}'",
                self.pos,
                self.input[self.pos] as char
            );
        }

        if result.is_empty() {
            Ok("\"\"".to_string())
        } else {
            Ok(result)
        }
    }

    /// Parse alternation: `a|b|c`
    fn parse_alternation(&mut self) -> Result<String> {
        let mut alternatives = vec![self.parse_sequence()?];

        while self.peek() == Some(b'|') {
            self.advance();
            alternatives.push(self.parse_sequence()?);
        }

        if alternatives.len() == 1 {
            Ok(alternatives.pop().unwrap())
        } else {
            let parts: Vec<String> = alternatives
                .into_iter()
                .map(|a| if a.is_empty() { "\"\"".to_string() } else { a })
                .collect();
            Ok(format!("({})", parts.join(" | ")))
        }
    }

    /// Parse a sequence of quantified atoms.
    fn parse_sequence(&mut self) -> Result<String> {
        let mut segments = Vec::new();

        while !self.at_end() {
            match self.peek() {
                Some(b'|') | Some(b')') | Some(b'$') => break,
                _ => {
                    let atom = self.parse_quantified_atom()?;
                    if !atom.is_empty() {
                        segments.push(atom);
                    }
                }
            }
        }

        Ok(segments.join(" "))
    }

    fn parse_quantified_atom(&mut self) -> Result<String> {
        let atom = self.parse_atom()?;
        if self.at_end() || atom.is_empty() {
            return Ok(atom);
        }

        let quantified = match self.peek() {
            Some(b'*') => {
                self.advance();
                format!("{}*", atom)
            }
            Some(b'+') => {
                self.advance();
                format!("{}+", atom)
            }
            Some(b'?') => {
                self.advance();
                format!("{}?", atom)
            }
            Some(b'{') => {
                let (min, max) = self.parse_repetition()?;
                match max {
                    Some(m) if m == min => format!("{}{{{}}}", atom, min),
                    Some(m) => format!("{}{{{},{}}}", atom, min, m),
                    None => format!("{}{{{},}}", atom, min),
                }
            }
            _ => return Ok(atom),
        };

        // A '?' after a quantifier is the non-greedy modifier; greedy and
        // non-greedy matching accept the same language.
        if self.peek() == Some(b'?') {
            self.advance();
        }
        if matches!(self.peek(), Some(b'*') | Some(b'+') | Some(b'{')) {
            bail!("consecutive quantifiers are not supported at position {}", self.pos);
        }
        Ok(quantified)
    }

    /// Parse a single atom: literal, escape, group, char class, or dot.
    fn parse_atom(&mut self) -> Result<String> {
        match self.peek() {
            None => Ok(String::new()),
            Some(b'(') => self.parse_group(),
            Some(b'[') => self.parse_char_class(),
            Some(b'.') => {
                self.advance();
                // Any character (full Unicode range)
                Ok("[\\u0000-\\U0010ffff]".to_string())
            }
            Some(b'\\') => self.parse_escape(),
            Some(b'^') => {
                self.advance(); // mid-pattern anchor, ignored
                Ok(String::new())
            }
            Some(ch) if is_metachar(ch) => {
                bail!("unexpected metacharacter '{}' at position {}", ch as char, self.pos);
            }
            Some(_) => {
                // One literal character (UTF-8 aware)
                let rest = &self.input[self.pos..];
                let s = std::str::from_utf8(rest).map_err(|_| anyhow!("invalid UTF-8 in pattern"))?;
                let c = s.chars().next().unwrap();
                self.pos += c.len_utf8();
                Ok(codepoint_to_ebnf_literal(c as u32))
            }
        }
    }

    /// Parse a parenthesized group.
    fn parse_group(&mut self) -> Result<String> {
        self.advance(); // (

        if self.peek() == Some(b'?') {
            self.advance();
            match self.peek() {
                Some(b':') => {
                    self.advance(); // non-capturing group
                }
                Some(b'<') => {
                    self.advance();
                    match self.peek() {
                        Some(b'=') | Some(b'!') => {
                            bail!("lookbehind assertions are not supported");
                        }
                        _ => {
                            // Named capture group (?<name>...); skip the name
                            while self.peek() != Some(b'>') {
                                if self.at_end() {
                                    bail!("unterminated named group");
                                }
                                self.advance();
                            }
                            self.advance();
                        }
                    }
                }
                Some(b'=') | Some(b'!') => {
                    bail!("lookahead assertions are not supported");
                }
                _ => bail!("unsupported group modifier"),
            }
        }

        let inner = self.parse_alternation()?;

        if self.advance() != Some(b')') {
            bail!("unmatched '(' at position {}", self.pos);
        }

        if inner.is_empty() {
            Ok("\"\"".to_string())
        } else {
            Ok(format!("({})", inner))
        }
    }

    /// Parse a character class `[...]`.
    fn parse_char_class(&mut self) -> Result<String> {
        self.advance(); // [
        let mut result = String::from("[");

        if self.peek() == Some(b'^') {
            self.advance();
            result.push('^');
        }

        // Allow ] as the first char in a class
        if self.peek() == Some(b']') {
            self.advance();
            result.push_str("\\]");
        }

        while self.peek() != Some(b']') {
            if self.at_end() {
                bail!("unclosed character class");
            }

            if self.peek() == Some(b'\\') {
                let esc = self.parse_class_escape()?;
                result.push_str(&esc);
                continue;
            }

            let ch = self.advance().unwrap();
            if self.peek() == Some(b'-') && self.input.get(self.pos + 1) != Some(&b']') {
                self.advance(); // consume -
                push_class_char(&mut result, ch);
                result.push('-');
                if self.peek() == Some(b'\\') {
                    let esc = self.parse_class_escape()?;
                    result.push_str(&esc);
                } else if let Some(end) = self.advance() {
                    push_class_char(&mut result, end);
                }
            } else {
                push_class_char(&mut result, ch);
            }
        }

        self.advance(); // ]
        result.push(']');
        Ok(result)
    }

    /// Parse an escape inside a character class (returns class-body text).
    fn parse_class_escape(&mut self) -> Result<String> {
        self.advance(); // backslash
        let ch = match self.peek() {
            None => bail!("truncated escape"),
            Some(c) => c,
        };
        let mapped = match ch {
            b'd' => "0-9",
            b'D' => "\\u0000-/:-\\U0010ffff",
            b'w' => "a-zA-Z0-9_",
            b'W' => "\\u0000-/:-@\\[-\\^`\\{-\\U0010ffff",
            b's' => "\\t\\n\\r \\u000b\\u000c",
            b'S' => "\\u0000-\\u0008\\u000e-\\u001f!-\\U0010ffff",
            b'u' => return self.parse_unicode_escape_for_class(),
            b'x' => {
                self.advance();
                let hex = self.read_hex(2)?;
                return Ok(format!("\\u00{}", hex));
            }
            b'n' => "\\n",
            b'r' => "\\r",
            b't' => "\\t",
            b'f' => "\\u000c",
            b'v' => "\\u000b",
            b'-' => "\\-",
            b']' => "\\]",
            b'\\' => "\\\\",
            b'^' => "\\^",
            _ => {
                self.advance();
                return Ok((ch as char).to_string());
            }
        };
        self.advance();
        Ok(mapped.to_string())
    }

    /// Parse an escape sequence outside character classes.
    fn parse_escape(&mut self) -> Result<String> {
        self.advance(); // backslash
        let ch = match self.peek() {
            None => bail!("truncated escape"),
            Some(c) => c,
        };
        let mapped = match ch {
            b'd' => "[0-9]",
            b'D' => "[^0-9]",
            b'w' => "[a-zA-Z0-9_]",
            b'W' => "[^a-zA-Z0-9_]",
            b's' => "[\\t\\n\\r \\u000b\\u000c]",
            b'S' => "[^\\t\\n\\r \\u000b\\u000c]",
            b'b' | b'B' => bail!("word boundaries (\\b, \\B) are not supported"),
            b'p' | b'P' => bail!("unicode property escapes (\\p, \\P) are not supported"),
            b'1'..=b'9' | b'k' => bail!("backreferences are not supported"),
            b'u' => return self.parse_unicode_escape(),
            b'x' => {
                self.advance();
                let hex = self.read_hex(2)?;
                let byte = u8::from_str_radix(&hex, 16).unwrap();
                return Ok(if byte < 0x80 {
                    codepoint_to_ebnf_literal(byte as u32)
                } else {
                    format!("\"\\x{}\"", hex)
                });
            }
            b'n' => "\"\\n\"",
            b'r' => "\"\\r\"",
            b't' => "\"\\t\"",
            b'f' => "\"\\x0c\"",
            b'v' => "\"\\x0b\"",
            b'0' => "\"\\x00\"",
            _ => {
                self.advance();
                return Ok(codepoint_to_ebnf_literal(ch as u32));
            }
        };
        self.advance();
        Ok(mapped.to_string())
    }

    /// Parse `\uXXXX` or `\u{XXXXX}` into an EBNF literal.
    fn parse_unicode_escape(&mut self) -> Result<String> {
        self.advance(); // u
        let cp = self.read_unicode_codepoint()?;
        Ok(codepoint_to_ebnf_literal(cp))
    }

    /// Parse `\uXXXX` or `\u{XXXXX}` inside a character class.
    fn parse_unicode_escape_for_class(&mut self) -> Result<String> {
        self.advance(); // u
        let cp = self.read_unicode_codepoint()?;
        if cp <= 0xffff {
            Ok(format!("\\u{:04x}", cp))
        } else {
            Ok(format!("\\U{:08x}", cp))
        }
    }

    fn read_unicode_codepoint(&mut self) -> Result<u32> {
        if self.peek() == Some(b'{') {
            self.advance();
            let mut hex = String::new();
            while self.peek() != Some(b'}') {
                if self.at_end() {
                    bail!("unterminated unicode escape");
                }
                hex.push(self.advance().unwrap() as char);
            }
            self.advance(); // }
            u32::from_str_radix(&hex, 16)
                .map_err(|_| anyhow!("invalid unicode escape: \\u{{{}}}", hex))
        } else {
            let hex = self.read_hex(4)?;
            u32::from_str_radix(&hex, 16).map_err(|_| anyhow!("invalid unicode escape: \\u{}", hex))
        }
    }

    /// Parse `{n}`, `{n,}`, or `{n,m}`.
    fn parse_repetition(&mut self) -> Result<(u32, Option<u32>)> {
        self.advance(); // {
        let min = self.read_int()?;

        match self.advance() {
            Some(b'}') => Ok((min, Some(min))),
            Some(b',') => {
                if self.peek() == Some(b'}') {
                    self.advance();
                    Ok((min, None))
                } else {
                    let max = self.read_int()?;
                    if self.advance() != Some(b'}') {
                        bail!("expected '}}' in repetition");
                    }
                    Ok((min, Some(max)))
                }
            }
            _ => bail!("expected ',' or '}}' in repetition"),
        }
    }

    fn read_int(&mut self) -> Result<u32> {
        let mut n: u32 = 0;
        let mut any = false;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                n = n * 10 + (ch - b'0') as u32;
                self.advance();
                any = true;
            } else {
                break;
            }
        }
        if !any {
            bail!("expected integer in repetition");
        }
        Ok(n)
    }

    fn read_hex(&mut self, count: usize) -> Result<String> {
        let mut s = String::new();
        for _ in 0..count {
            match self.advance() {
                Some(ch) if ch.is_ascii_hexdigit() => s.push(ch as char),
                _ => bail!("expected hex digit"),
            }
        }
        Ok(s)
    }
}

fn is_metachar(ch: u8) -> bool {
    matches!(ch, b'*' | b'+' | b'?' | b'{' | b'}' | b'|' | b')' | b'^' | b'$')
}

/// Escape a raw byte for an EBNF character class body.
fn push_class_char(out: &mut String, ch: u8) {
    match ch {
        b']' => out.push_str("\\]"),
        b'\\' => out.push_str("\\\\"),
        b'^' => out.push_str("\\^"),
        b'-' => out.push_str("\\-"),
        _ => out.push(ch as char),
    }
}

/// Convert a Unicode codepoint to an EBNF string literal.
fn codepoint_to_ebnf_literal(cp: u32) -> String {
    if let Some(c) = char::from_u32(cp) {
        match c {
            '"' => "\"\\\"\"".to_string(),
            '\\' => "\"\\\\\"".to_string(),
            '\n' => "\"\\n\"".to_string(),
            '\r' => "\"\\r\"".to_string(),
            '\t' => "\"\\t\"".to_string(),
            c if c.is_ascii_graphic() || c == ' ' => format!("\"{}\"", c),
            _ => {
                let mut buf = [0u8; 4];
                let s = c.encode_utf8(&mut buf);
                let mut r = String::from("\"");
                for &b in s.as_bytes() {
                    r.push_str(&format!("\\x{:02x}", b));
                }
                r.push('"');
                r
            }
        }
    } else {
        format!("\"\\x{:02x}\"", cp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepts(pattern: &str, input: &str) -> bool {
        regex_to_fsm(pattern).unwrap().accepts(input.as_bytes())
    }

    #[test]
    fn test_literal() {
        assert_eq!(regex_to_ebnf("abc").unwrap(), "root ::= \"a\" \"b\" \"c\"\n");
        assert!(accepts("abc", "abc"));
        assert!(!accepts("abc", "ab"));
    }

    #[test]
    fn test_char_class_plus() {
        assert!(accepts("[a-z]+", "abc"));
        assert!(accepts("[a-z]+", "z"));
        assert!(!accepts("[a-z]+", ""));
        assert!(!accepts("[a-z]+", "aB"));
    }

    #[test]
    fn test_alternation_and_groups() {
        assert!(accepts("(cat|dog)s?", "cat"));
        assert!(accepts("(cat|dog)s?", "dogs"));
        assert!(!accepts("(cat|dog)s?", "cats?"));
    }

    #[test]
    fn test_repetition_bounds() {
        assert!(accepts("[0-9]{2,4}", "12"));
        assert!(accepts("[0-9]{2,4}", "1234"));
        assert!(!accepts("[0-9]{2,4}", "1"));
        assert!(!accepts("[0-9]{2,4}", "12345"));
    }

    #[test]
    fn test_exact_repetition() {
        assert!(accepts("a{3}", "aaa"));
        assert!(!accepts("a{3}", "aa"));
        assert!(!accepts("a{3}", "aaaa"));
    }

    #[test]
    fn test_dot_matches_any() {
        assert!(accepts("a.c", "abc"));
        assert!(accepts("a.c", "axc"));
        assert!(accepts("a.c", "aéc"));
        assert!(!accepts("a.c", "ac"));
    }

    #[test]
    fn test_digit_escape() {
        assert!(accepts(r"\d+", "123"));
        assert!(!accepts(r"\d+", "12a"));
    }

    #[test]
    fn test_word_escape_in_class() {
        assert!(accepts(r"[\w]+", "ab_9"));
        assert!(!accepts(r"[\w]+", "a b"));
    }

    #[test]
    fn test_anchors_ignored() {
        assert!(accepts("^abc$", "abc"));
    }

    #[test]
    fn test_negated_class() {
        assert!(accepts("[^0-9]", "x"));
        assert!(!accepts("[^0-9]", "5"));
    }

    #[test]
    fn test_escaped_metachar() {
        assert!(accepts(r"a\.b", "a.b"));
        assert!(!accepts(r"a\.b", "axb"));
    }

    #[test]
    fn test_non_greedy_accepted() {
        assert!(accepts("a+?b", "aab"));
    }

    #[test]
    fn test_email_like_pattern() {
        let pattern = r"[a-z]+@[a-z]+\.[a-z]{2,4}";
        assert!(accepts(pattern, "user@example.com"));
        assert!(!accepts(pattern, "user@example"));
    }

    #[test]
    fn test_lookahead_rejected() {
        assert!(regex_to_ebnf("(?=abc)").is_err());
        assert!(regex_to_ebnf("(?<=a)b").is_err());
    }

    #[test]
    fn test_backreference_rejected() {
        assert!(regex_to_ebnf(r"(a)\1").is_err());
    }

    #[test]
    fn test_word_boundary_rejected() {
        assert!(regex_to_ebnf(r"\bword\b").is_err());
    }

    #[test]
    fn test_named_group() {
        assert!(accepts("(?<year>[0-9]{4})", "2024"));
    }

    #[test]
    fn test_unicode_escape() {
        assert!(accepts(r"\u00e9", "é"));
    }
}
