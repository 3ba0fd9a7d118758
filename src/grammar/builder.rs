use anyhow::{bail, Result};
use rustc_hash::FxHashMap;

use super::{Expr, ExprId, Grammar, Rule, RuleId, TagDispatch};

/// Sentinel body for rules whose body has not been set yet.
const UNSET_BODY: ExprId = ExprId(u32::MAX);

/// Programmatic grammar construction.
///
/// Rules can be added with an exact name (`add_rule`) or with a hint that
/// is uniquified against previously used names (`add_rule_with_hint`,
/// `add_empty_rule_with_hint`). Rule bodies may be filled in after the
/// rule exists, which is how recursive rules are built.
///
/// # Example
/// ```
/// use structag::grammar::builder::GrammarBuilder;
///
/// let mut b = GrammarBuilder::new();
/// let hello = b.add_byte_string(b"hello");
/// let root = b.add_rule_with_hint("root", hello);
/// let grammar = b.build(root).unwrap();
/// assert_eq!(grammar.num_rules(), 1);
/// ```
pub struct GrammarBuilder {
    pub(crate) rules: Vec<Rule>,
    pub(crate) exprs: Vec<Expr>,
    /// Next numeric suffix per hint, for unique rule naming.
    name_counters: FxHashMap<String, u32>,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            exprs: Vec::new(),
            name_counters: FxHashMap::default(),
        }
    }

    /// Add a new rule with the given exact name and no body yet.
    /// The body must be set later with `update_rule_body`.
    pub fn add_rule(&mut self, name: &str) -> RuleId {
        let id = RuleId(self.rules.len() as u32);
        self.name_counters.entry(name.to_string()).or_insert(0);
        self.rules.push(Rule {
            name: name.to_string(),
            body: UNSET_BODY,
        });
        id
    }

    /// Add a rule named after `hint` (uniquified) with no body yet.
    pub fn add_empty_rule_with_hint(&mut self, hint: &str) -> RuleId {
        let name = self.unique_name(hint);
        let id = RuleId(self.rules.len() as u32);
        self.rules.push(Rule {
            name,
            body: UNSET_BODY,
        });
        id
    }

    /// Add a rule named after `hint` (uniquified) with the given body.
    pub fn add_rule_with_hint(&mut self, hint: &str, body: ExprId) -> RuleId {
        let id = self.add_empty_rule_with_hint(hint);
        self.update_rule_body(id, body);
        id
    }

    /// Set the body expression of a rule.
    pub fn update_rule_body(&mut self, rule: RuleId, body: ExprId) {
        self.rules[rule.0 as usize].body = body;
    }

    /// Add an expression to the arena and return its id.
    pub fn add_expr(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(expr);
        id
    }

    /// Add an empty string expression.
    pub fn add_empty_string(&mut self) -> ExprId {
        self.add_expr(Expr::EmptyString)
    }

    /// Add a byte string expression.
    pub fn add_byte_string(&mut self, bytes: &[u8]) -> ExprId {
        self.add_expr(Expr::ByteString(bytes.to_vec()))
    }

    /// Add a character class expression.
    pub fn add_character_class(&mut self, negated: bool, ranges: Vec<(u32, u32)>) -> ExprId {
        self.add_expr(Expr::CharacterClass { negated, ranges })
    }

    /// Add a character class star expression (`[...]*`).
    pub fn add_character_class_star(&mut self, negated: bool, ranges: Vec<(u32, u32)>) -> ExprId {
        self.add_expr(Expr::CharacterClassStar { negated, ranges })
    }

    /// Add a rule reference expression.
    pub fn add_rule_ref(&mut self, rule: RuleId) -> ExprId {
        self.add_expr(Expr::RuleRef(rule))
    }

    /// Add a sequence expression (concatenation).
    pub fn add_sequence(&mut self, exprs: Vec<ExprId>) -> ExprId {
        self.add_expr(Expr::Sequence(exprs))
    }

    /// Add a choices expression (alternation).
    pub fn add_choices(&mut self, exprs: Vec<ExprId>) -> ExprId {
        self.add_expr(Expr::Choices(exprs))
    }

    /// Add a repeat expression.
    pub fn add_repeat(&mut self, rule: RuleId, min: u32, max: Option<u32>) -> ExprId {
        self.add_expr(Expr::Repeat { rule, min, max })
    }

    /// Add a tag dispatch expression.
    pub fn add_tag_dispatch(&mut self, dispatch: TagDispatch) -> ExprId {
        self.add_expr(Expr::TagDispatch(dispatch))
    }

    /// Look up a rule by name.
    pub fn find_rule(&self, name: &str) -> Option<RuleId> {
        self.rules
            .iter()
            .position(|r| r.name == name)
            .map(|i| RuleId(i as u32))
    }

    /// Number of rules added so far.
    pub fn num_rules(&self) -> usize {
        self.rules.len()
    }

    /// Get the name of a rule.
    pub fn rule_name(&self, rule: RuleId) -> &str {
        &self.rules[rule.0 as usize].name
    }

    /// Build the grammar with the given root rule.
    pub fn build(self, root_rule: RuleId) -> Result<Grammar> {
        if root_rule.0 as usize >= self.rules.len() {
            bail!("root rule id {} out of range", root_rule.0);
        }
        for rule in &self.rules {
            if rule.body == UNSET_BODY {
                bail!("rule '{}' has no body", rule.name);
            }
        }
        Ok(Grammar {
            rules: self.rules,
            exprs: self.exprs,
            root_rule,
        })
    }

    fn unique_name(&mut self, hint: &str) -> String {
        if !self.name_counters.contains_key(hint) {
            self.name_counters.insert(hint.to_string(), 0);
            return hint.to_string();
        }
        // A suffixed candidate can itself already be taken (e.g. merged
        // sub-grammars carrying their own `name_1` rules), so probe until
        // a free name is found.
        let mut counter = self.name_counters[hint];
        loop {
            counter += 1;
            let candidate = format!("{}_{}", hint, counter);
            if !self.name_counters.contains_key(&candidate) {
                self.name_counters.insert(hint.to_string(), counter);
                self.name_counters.insert(candidate.clone(), 0);
                return candidate;
            }
        }
    }
}

impl Default for GrammarBuilder {
    fn default() -> Self {
        Self::new()
    }
}
