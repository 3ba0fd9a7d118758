//! The structural-tag format tree.
//!
//! A [`Format`] is a node in the constraint tree described by a
//! structural-tag JSON specification. The tree is built once by the
//! parser, annotated in place by the analyzer (`detected_ends`,
//! `unbounded`, clearing of `Tag.end`), and then read by the
//! fingerprinter and emitter.

/// A parsed structural tag: the root of a format tree.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralTag {
    pub format: Format,
}

/// One node of the constraint tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Format {
    ConstString(ConstStringFormat),
    JsonSchema(JsonSchemaFormat),
    QwenXmlParameter(QwenXmlParameterFormat),
    AnyText(AnyTextFormat),
    Grammar(GrammarFormat),
    Regex(RegexFormat),
    Sequence(SequenceFormat),
    Or(OrFormat),
    Tag(TagFormat),
    TriggeredTags(TriggeredTagsFormat),
    TagsWithSeparator(TagsWithSeparatorFormat),
}

/// Matches exactly `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstStringFormat {
    pub value: String,
}

/// Matches any instance of the JSON schema (serialized canonical text).
#[derive(Debug, Clone, PartialEq)]
pub struct JsonSchemaFormat {
    pub json_schema: String,
}

/// Matches the Qwen XML tool-calling encoding of the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct QwenXmlParameterFormat {
    pub json_schema: String,
}

/// Matches arbitrary text up to (but not including) any terminator in
/// `detected_ends`, never containing any substring in `excludes`.
/// `detected_ends` is filled by the analyzer from the nearest enclosing tag.
#[derive(Debug, Clone, PartialEq)]
pub struct AnyTextFormat {
    pub excludes: Vec<String>,
    pub detected_ends: Vec<String>,
}

/// Embeds a user-supplied EBNF grammar verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct GrammarFormat {
    pub ebnf: String,
}

/// Matches `pattern`, minus any string containing a substring in `excludes`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegexFormat {
    pub pattern: String,
    pub excludes: Vec<String>,
}

/// Concatenation. Only the last element may be unbounded.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceFormat {
    pub elements: Vec<Format>,
    /// Set by the analyzer: true when the last element is unbounded.
    pub unbounded: bool,
}

/// Alternation. Elements must be all bounded or all unbounded.
#[derive(Debug, Clone, PartialEq)]
pub struct OrFormat {
    pub elements: Vec<Format>,
    /// Set by the analyzer: true when the elements are unbounded.
    pub unbounded: bool,
}

/// `begin · content · (one of end)`.
///
/// When `content` is unbounded, the analyzer clears `end`: the
/// terminators move to the unbounded descendant's `detected_ends` and
/// are consumed by its dispatch rather than emitted as a suffix.
#[derive(Debug, Clone, PartialEq)]
pub struct TagFormat {
    pub begin: String,
    pub content: Box<Format>,
    pub end: Vec<String>,
}

/// Free text interleaved with tags whose `begin` starts with a trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggeredTagsFormat {
    pub triggers: Vec<String>,
    pub tags: Vec<TagFormat>,
    pub excludes: Vec<String>,
    pub at_least_one: bool,
    pub stop_after_first: bool,
    pub detected_ends: Vec<String>,
}

/// Tags joined by `separator` (which may be empty).
#[derive(Debug, Clone, PartialEq)]
pub struct TagsWithSeparatorFormat {
    pub tags: Vec<TagFormat>,
    pub separator: String,
    pub at_least_one: bool,
    pub stop_after_first: bool,
    pub detected_ends: Vec<String>,
}

impl Format {
    /// Whether this format can produce arbitrary-length output without a
    /// self-contained terminator. For Sequence/Or the analyzer must have
    /// run first.
    pub fn is_unbounded(&self) -> bool {
        match self {
            Format::AnyText(_) | Format::TriggeredTags(_) | Format::TagsWithSeparator(_) => true,
            Format::Sequence(f) => f.unbounded,
            Format::Or(f) => f.unbounded,
            Format::ConstString(_)
            | Format::JsonSchema(_)
            | Format::QwenXmlParameter(_)
            | Format::Grammar(_)
            | Format::Regex(_)
            | Format::Tag(_) => false,
        }
    }
}
