//! Core grammar types: rules, expressions, and the expression arena.
//!
//! A [`Grammar`] is a list of named rules plus a flat arena of expressions.
//! Rules and expressions reference each other through [`RuleId`] and
//! [`ExprId`] indices, which keeps the structure cheap to clone and walk.

pub mod builder;
pub mod ebnf;
pub mod merge;
pub mod normalize;

use std::fmt;

/// Index into the grammar's rule list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleId(pub u32);

/// Index into the grammar's expression arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

/// A grammar rule: a named production with a body expression.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub body: ExprId,
}

/// Configuration of a tag-dispatch expression.
///
/// A tag dispatch generates free text until one of the `tag_rule_pairs`
/// triggers is produced, at which point generation continues with the
/// paired rule. After the rule completes, generation either loops back
/// into free text (`loop_after_dispatch`) or stops. Free text may end at
/// EOS (`stop_eos`) or at one of the `stop_strings`, and never contains
/// any of the `excludes` substrings.
#[derive(Debug, Clone, PartialEq)]
pub struct TagDispatch {
    pub tag_rule_pairs: Vec<(String, RuleId)>,
    pub stop_eos: bool,
    pub stop_strings: Vec<String>,
    pub loop_after_dispatch: bool,
    pub excludes: Vec<String>,
}

/// A grammar expression node.
///
/// Expressions are stored in an arena (`Grammar.exprs`) and referenced by
/// `ExprId`. This gives cache-friendly access without lifetime issues.
#[derive(Debug, Clone)]
pub enum Expr {
    /// The empty string `""`.
    EmptyString,

    /// A literal byte string (UTF-8 encoded).
    ByteString(Vec<u8>),

    /// A character class matching Unicode codepoint ranges, e.g. `[a-z0-9]`.
    /// When `negated` is true, matches any codepoint NOT in the ranges.
    CharacterClass {
        negated: bool,
        /// Inclusive ranges of Unicode codepoints: `(lower, upper)`.
        ranges: Vec<(u32, u32)>,
    },

    /// Kleene star of a character class, e.g. `[a-z]*`.
    CharacterClassStar {
        negated: bool,
        ranges: Vec<(u32, u32)>,
    },

    /// A reference to another rule.
    RuleRef(RuleId),

    /// An ordered sequence of expressions (concatenation).
    Sequence(Vec<ExprId>),

    /// A choice between expressions (alternation / union).
    Choices(Vec<ExprId>),

    /// Bounded repetition of a rule: `rule{min, max}`.
    /// `max = None` means unbounded.
    Repeat {
        rule: RuleId,
        min: u32,
        max: Option<u32>,
    },

    /// Free text interleaved with trigger-dispatched sub-rules.
    TagDispatch(TagDispatch),
}

/// An immutable context-free grammar.
///
/// Constructed via `GrammarBuilder` or `Grammar::from_ebnf()`.
#[derive(Debug, Clone)]
pub struct Grammar {
    pub(crate) rules: Vec<Rule>,
    pub(crate) exprs: Vec<Expr>,
    pub(crate) root_rule: RuleId,
}

impl Grammar {
    /// Get the root rule id.
    pub fn root_rule(&self) -> RuleId {
        self.root_rule
    }

    /// Get a rule by id.
    pub fn get_rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.0 as usize]
    }

    /// Get an expression by id.
    pub fn get_expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    /// Number of rules in the grammar.
    pub fn num_rules(&self) -> usize {
        self.rules.len()
    }

    /// Iterate over all rules.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Get the root rule.
    pub fn root(&self) -> &Rule {
        self.get_rule(self.root_rule)
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{} ::= ", rule.name)?;
            self.fmt_expr(f, rule.body)?;
        }
        Ok(())
    }
}

impl Grammar {
    fn fmt_expr(&self, f: &mut fmt::Formatter<'_>, id: ExprId) -> fmt::Result {
        match self.get_expr(id) {
            Expr::EmptyString => write!(f, "\"\""),
            Expr::ByteString(bytes) => {
                write!(f, "\"")?;
                for &b in bytes {
                    Self::fmt_byte(f, b)?;
                }
                write!(f, "\"")
            }
            Expr::CharacterClass { negated, ranges } => {
                Self::fmt_char_class(f, *negated, ranges)?;
                Ok(())
            }
            Expr::CharacterClassStar { negated, ranges } => {
                Self::fmt_char_class(f, *negated, ranges)?;
                write!(f, "*")
            }
            Expr::RuleRef(rule_id) => {
                write!(f, "{}", self.rules[rule_id.0 as usize].name)
            }
            Expr::Sequence(exprs) => {
                write!(f, "(")?;
                for (i, &eid) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    self.fmt_expr(f, eid)?;
                }
                write!(f, ")")
            }
            Expr::Choices(exprs) => {
                write!(f, "(")?;
                for (i, &eid) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    self.fmt_expr(f, eid)?;
                }
                write!(f, ")")
            }
            Expr::Repeat { rule, min, max } => {
                let name = &self.rules[rule.0 as usize].name;
                match max {
                    Some(max) => write!(f, "{}{{{},{}}}", name, min, max),
                    None => write!(f, "{}{{{},}}", name, min),
                }
            }
            Expr::TagDispatch(td) => {
                write!(f, "TagDispatch(")?;
                for (trigger, rule) in &td.tag_rule_pairs {
                    write!(f, "(\"{}\", {}), ", trigger, self.rules[rule.0 as usize].name)?;
                }
                write!(f, "stop_eos={}, stop_strings=(", td.stop_eos)?;
                for (i, s) in td.stop_strings.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\"", s)?;
                }
                write!(f, "), loop_after_dispatch={}", td.loop_after_dispatch)?;
                if !td.excludes.is_empty() {
                    write!(f, ", excludes=(")?;
                    for (i, s) in td.excludes.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "\"{}\"", s)?;
                    }
                    write!(f, ")")?;
                }
                write!(f, ")")
            }
        }
    }

    fn fmt_byte(f: &mut fmt::Formatter<'_>, b: u8) -> fmt::Result {
        match b {
            b'\\' => write!(f, "\\\\"),
            b'"' => write!(f, "\\\""),
            b'\n' => write!(f, "\\n"),
            b'\r' => write!(f, "\\r"),
            b'\t' => write!(f, "\\t"),
            0x20..=0x7e => write!(f, "{}", b as char),
            _ => write!(f, "\\x{:02x}", b),
        }
    }

    fn fmt_char_class(f: &mut fmt::Formatter<'_>, negated: bool, ranges: &[(u32, u32)]) -> fmt::Result {
        write!(f, "[")?;
        if negated {
            write!(f, "^")?;
        }
        for &(lo, hi) in ranges {
            Self::fmt_char_class_char(f, lo)?;
            if lo != hi {
                write!(f, "-")?;
                Self::fmt_char_class_char(f, hi)?;
            }
        }
        write!(f, "]")
    }

    fn fmt_char_class_char(f: &mut fmt::Formatter<'_>, cp: u32) -> fmt::Result {
        match cp {
            0x5c => write!(f, "\\\\"),
            0x5d => write!(f, "\\]"),
            0x5e => write!(f, "\\^"),
            0x2d => write!(f, "\\-"),
            0x09 => write!(f, "\\t"),
            0x0a => write!(f, "\\n"),
            0x0d => write!(f, "\\r"),
            cp if (0x20..=0x7e).contains(&cp) => {
                // ASCII printable is always a valid char
                write!(f, "{}", char::from_u32(cp).unwrap())
            }
            cp if cp <= 0xffff => write!(f, "\\u{:04x}", cp),
            cp => write!(f, "\\U{:08x}", cp),
        }
    }
}
