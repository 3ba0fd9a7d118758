//! Structural-tag to grammar compilation for constrained decoding.
//!
//! A *structural tag* is a declarative JSON specification of a
//! constrained output format: a tree of format nodes such as literals,
//! JSON-schema regions, regexes with exclusions, sequences, alternations,
//! tagged regions with begin/end markers, trigger-dispatched tag sets and
//! separated tag collections. This crate compiles such a specification
//! into a single normalized context-free [`Grammar`] that a downstream
//! constrained-decoding engine can consume.
//!
//! # Usage
//!
//! ```rust
//! let grammar = structag::structural_tag_to_grammar(r#"{
//!     "type": "structural_tag",
//!     "format": {"type": "const_string", "value": "hello"}
//! }"#).unwrap();
//!
//! assert_eq!(grammar.root().name, "root");
//! println!("{}", grammar);
//! ```
//!
//! Errors are returned through [`StructuralTagError`], split into
//! `InvalidJson` (the input is not JSON) and `InvalidStructuralTag`
//! (every structural or semantic problem after that).
//!
//! # Modules
//!
//! - [`structural_tag`] -- the parse → analyze → emit pipeline
//! - [`grammar`] -- grammar types, builder, EBNF parser, normalizer
//! - [`json_schema`] -- JSON Schema to grammar conversion
//! - [`regex`] -- regex to grammar / FSM conversion
//! - [`qwen_xml`] -- Qwen XML tool-calling parameter encoding
//! - [`fsm`] -- byte-level automata (construction, determinization,
//!   intersection)

pub mod error;
pub mod fsm;
pub mod grammar;
pub mod json_schema;
pub mod qwen_xml;
pub mod regex;
pub mod structural_tag;

pub use error::StructuralTagError;
pub use grammar::Grammar;
pub use structural_tag::structural_tag_to_grammar;
