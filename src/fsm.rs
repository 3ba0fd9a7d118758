//! Byte-level finite state machines.
//!
//! Provides a mutable adjacency-list NFA ([`NfaGraph`]), an automaton
//! wrapper with start/accepting states ([`Automaton`]), subset
//! construction, and product intersection. Character classes are lowered
//! to byte transitions with proper multi-byte UTF-8 handling, so every
//! automaton here runs over raw bytes.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use anyhow::{bail, Result};

use crate::grammar::{Expr, ExprId, Grammar, RuleId};

/// A state index in an FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u32);

/// An edge in the FSM.
#[derive(Debug, Clone, PartialEq)]
pub enum FsmEdge {
    /// Transition on a byte in `[min, max]` (inclusive).
    CharRange { min: u8, max: u8, target: StateId },
    /// Free (epsilon) transition.
    Epsilon(StateId),
}

/// A mutable finite state machine (adjacency list representation).
///
/// States are numbered 0..n-1 and stored as `Vec<Vec<FsmEdge>>`.
#[derive(Debug, Clone, Default)]
pub struct NfaGraph {
    edges: Vec<Vec<FsmEdge>>,
}

impl NfaGraph {
    pub fn new() -> Self {
        Self { edges: Vec::new() }
    }

    /// Add a new state and return its id.
    pub fn add_state(&mut self) -> StateId {
        let id = StateId(self.edges.len() as u32);
        self.edges.push(Vec::new());
        id
    }

    /// Number of states.
    pub fn num_states(&self) -> usize {
        self.edges.len()
    }

    /// Add an edge from `from`.
    pub fn add_edge(&mut self, from: StateId, edge: FsmEdge) {
        self.edges[from.0 as usize].push(edge);
    }

    /// Shorthand: add a char-range edge.
    pub fn add_char_edge(&mut self, from: StateId, min: u8, max: u8, target: StateId) {
        self.add_edge(from, FsmEdge::CharRange { min, max, target });
    }

    /// Shorthand: add an epsilon edge.
    pub fn add_epsilon(&mut self, from: StateId, target: StateId) {
        self.add_edge(from, FsmEdge::Epsilon(target));
    }

    /// Get all edges from a state.
    pub fn edges(&self, state: StateId) -> &[FsmEdge] {
        &self.edges[state.0 as usize]
    }

    /// Get all edges from a state, mutably.
    pub fn edges_mut(&mut self, state: StateId) -> &mut Vec<FsmEdge> {
        &mut self.edges[state.0 as usize]
    }

    /// Follow a single-byte transition (first matching char edge).
    pub fn next_state(&self, from: StateId, byte: u8) -> Option<StateId> {
        for edge in self.edges(from) {
            if let FsmEdge::CharRange { min, max, target } = edge {
                if byte >= *min && byte <= *max {
                    return Some(*target);
                }
            }
        }
        None
    }

    /// Compute the epsilon closure of a set of states (BFS).
    pub fn epsilon_closure(&self, states: &BTreeSet<StateId>) -> BTreeSet<StateId> {
        let mut closure = states.clone();
        let mut queue: VecDeque<StateId> = states.iter().copied().collect();

        while let Some(s) = queue.pop_front() {
            for edge in &self.edges[s.0 as usize] {
                if let FsmEdge::Epsilon(target) = edge {
                    if closure.insert(*target) {
                        queue.push_back(*target);
                    }
                }
            }
        }
        closure
    }
}

/// An FSM with designated start and accepting states.
#[derive(Debug, Clone)]
pub struct Automaton {
    pub fsm: NfaGraph,
    pub start: StateId,
    /// `ends[i]` is true if state `i` is an accepting state.
    pub ends: Vec<bool>,
    pub is_dfa: bool,
}

impl Automaton {
    /// Number of states.
    pub fn num_states(&self) -> usize {
        self.fsm.num_states()
    }

    /// Check if a state is accepting.
    pub fn is_end(&self, state: StateId) -> bool {
        self.ends.get(state.0 as usize).copied().unwrap_or(false)
    }

    /// Test whether the automaton accepts a byte string (NFA simulation).
    pub fn accepts(&self, input: &[u8]) -> bool {
        if self.num_states() == 0 {
            return false;
        }
        let mut current: BTreeSet<StateId> = BTreeSet::new();
        current.insert(self.start);
        let mut current = self.fsm.epsilon_closure(&current);

        for &byte in input {
            let mut next = BTreeSet::new();
            for &state in &current {
                for edge in self.fsm.edges(state) {
                    if let FsmEdge::CharRange { min, max, target } = edge {
                        if byte >= *min && byte <= *max {
                            next.insert(*target);
                        }
                    }
                }
            }
            if next.is_empty() {
                return false;
            }
            current = self.fsm.epsilon_closure(&next);
        }

        current.iter().any(|s| self.is_end(*s))
    }

    /// Convert NFA to DFA via subset construction.
    pub fn to_dfa(&self) -> Automaton {
        let mut dfa = NfaGraph::new();
        let mut dfa_ends = Vec::new();

        // Map from NFA state sets → DFA state id
        let mut state_map: HashMap<BTreeSet<StateId>, StateId> = HashMap::new();
        let mut worklist: VecDeque<BTreeSet<StateId>> = VecDeque::new();

        // Initial state = epsilon closure of start
        let start_set = {
            let mut s = BTreeSet::new();
            s.insert(self.start);
            self.fsm.epsilon_closure(&s)
        };

        let dfa_start = dfa.add_state();
        dfa_ends.push(start_set.iter().any(|s| self.is_end(*s)));
        state_map.insert(start_set.clone(), dfa_start);
        worklist.push_back(start_set);

        while let Some(nfa_states) = worklist.pop_front() {
            let dfa_state = state_map[&nfa_states];

            // For each distinct byte interval, compute the target NFA state set
            for (min, max, targets) in self.collect_intervals(&nfa_states) {
                let target_set = self.fsm.epsilon_closure(&targets);
                if target_set.is_empty() {
                    continue;
                }
                let dfa_target = match state_map.get(&target_set) {
                    Some(&existing) => existing,
                    None => {
                        let new_id = dfa.add_state();
                        dfa_ends.push(target_set.iter().any(|s| self.is_end(*s)));
                        state_map.insert(target_set.clone(), new_id);
                        worklist.push_back(target_set);
                        new_id
                    }
                };
                dfa.add_char_edge(dfa_state, min, max, dfa_target);
            }
        }

        Automaton {
            fsm: dfa,
            start: dfa_start,
            ends: dfa_ends,
            is_dfa: true,
        }
    }

    /// Collect distinct byte intervals and their target NFA states from a
    /// set of NFA states.
    ///
    /// Splits overlapping char-range edges into non-overlapping intervals,
    /// each mapped to the union of target states reachable on that interval.
    fn collect_intervals(&self, nfa_states: &BTreeSet<StateId>) -> Vec<(u8, u8, BTreeSet<StateId>)> {
        let mut ranges: Vec<(u8, u8, StateId)> = Vec::new();
        for &state in nfa_states {
            for edge in self.fsm.edges(state) {
                if let FsmEdge::CharRange { min, max, target } = edge {
                    ranges.push((*min, *max, *target));
                }
            }
        }

        if ranges.is_empty() {
            return Vec::new();
        }

        // Collect all boundary points
        let mut points: BTreeSet<u16> = BTreeSet::new();
        for &(min, max, _) in &ranges {
            points.insert(min as u16);
            if (max as u16) < 255 {
                points.insert(max as u16 + 1);
            }
        }

        // Build non-overlapping intervals
        let points: Vec<u16> = points.into_iter().collect();
        let mut result = Vec::new();

        for (i, &start) in points.iter().enumerate() {
            let end = if i + 1 < points.len() {
                points[i + 1] - 1
            } else {
                255
            };

            let mut targets = BTreeSet::new();
            for &(min, max, target) in &ranges {
                if (min as u16) <= start && end <= (max as u16) {
                    targets.insert(target);
                }
            }

            if !targets.is_empty() {
                result.push((start as u8, end as u8, targets));
            }
        }

        // Merge adjacent intervals with identical target sets
        let mut merged: Vec<(u8, u8, BTreeSet<StateId>)> = Vec::new();
        for (min, max, targets) in result {
            if let Some(last) = merged.last_mut() {
                if last.2 == targets && last.1.checked_add(1) == Some(min) {
                    last.1 = max;
                    continue;
                }
            }
            merged.push((min, max, targets));
        }

        merged
    }

    /// Intersect two automata via product construction.
    ///
    /// Inputs are determinized first if needed. The result is pruned to
    /// states that can reach an accepting state; an empty language is
    /// returned as an automaton with zero states.
    pub fn intersect(a: &Automaton, b: &Automaton) -> Automaton {
        let a_dfa;
        let a = if a.is_dfa {
            a
        } else {
            a_dfa = a.to_dfa();
            &a_dfa
        };
        let b_dfa;
        let b = if b.is_dfa {
            b
        } else {
            b_dfa = b.to_dfa();
            &b_dfa
        };

        let mut fsm = NfaGraph::new();
        let mut ends = Vec::new();
        let mut pair_map: HashMap<(StateId, StateId), StateId> = HashMap::new();
        let mut worklist: VecDeque<(StateId, StateId)> = VecDeque::new();

        let start_pair = (a.start, b.start);
        let start = fsm.add_state();
        ends.push(a.is_end(a.start) && b.is_end(b.start));
        pair_map.insert(start_pair, start);
        worklist.push_back(start_pair);

        while let Some((sa, sb)) = worklist.pop_front() {
            let from = pair_map[&(sa, sb)];
            for ea in a.fsm.edges(sa) {
                let (a_min, a_max, a_target) = match ea {
                    FsmEdge::CharRange { min, max, target } => (*min, *max, *target),
                    FsmEdge::Epsilon(_) => continue,
                };
                for eb in b.fsm.edges(sb) {
                    let (b_min, b_max, b_target) = match eb {
                        FsmEdge::CharRange { min, max, target } => (*min, *max, *target),
                        FsmEdge::Epsilon(_) => continue,
                    };
                    let lo = a_min.max(b_min);
                    let hi = a_max.min(b_max);
                    if lo > hi {
                        continue;
                    }
                    let target_pair = (a_target, b_target);
                    let target = match pair_map.get(&target_pair) {
                        Some(&existing) => existing,
                        None => {
                            let new_id = fsm.add_state();
                            ends.push(a.is_end(a_target) && b.is_end(b_target));
                            pair_map.insert(target_pair, new_id);
                            worklist.push_back(target_pair);
                            new_id
                        }
                    };
                    fsm.add_char_edge(from, lo, hi, target);
                }
            }
        }

        prune_to_coaccessible(Automaton {
            fsm,
            start,
            ends,
            is_dfa: true,
        })
    }
}

/// Drop states that cannot reach an accepting state. Returns a renumbered
/// automaton; zero states if the start state itself is dropped.
fn prune_to_coaccessible(automaton: Automaton) -> Automaton {
    let n = automaton.num_states();

    // Reverse adjacency over char edges
    let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); n];
    for s in 0..n {
        for edge in automaton.fsm.edges(StateId(s as u32)) {
            if let FsmEdge::CharRange { target, .. } = edge {
                reverse[target.0 as usize].push(s);
            }
        }
    }

    // BFS backwards from accepting states
    let mut useful = vec![false; n];
    let mut queue: VecDeque<usize> = VecDeque::new();
    for (s, &is_end) in automaton.ends.iter().enumerate() {
        if is_end {
            useful[s] = true;
            queue.push_back(s);
        }
    }
    while let Some(s) = queue.pop_front() {
        for &p in &reverse[s] {
            if !useful[p] {
                useful[p] = true;
                queue.push_back(p);
            }
        }
    }

    if !useful
        .get(automaton.start.0 as usize)
        .copied()
        .unwrap_or(false)
    {
        return Automaton {
            fsm: NfaGraph::new(),
            start: StateId(0),
            ends: Vec::new(),
            is_dfa: true,
        };
    }

    // Renumber surviving states
    let mut remap: Vec<Option<StateId>> = vec![None; n];
    let mut fsm = NfaGraph::new();
    let mut ends = Vec::new();
    for s in 0..n {
        if useful[s] {
            remap[s] = Some(fsm.add_state());
            ends.push(automaton.ends[s]);
        }
    }
    for s in 0..n {
        let Some(from) = remap[s] else { continue };
        for edge in automaton.fsm.edges(StateId(s as u32)) {
            if let FsmEdge::CharRange { min, max, target } = edge {
                if let Some(to) = remap[target.0 as usize] {
                    fsm.add_char_edge(from, *min, *max, to);
                }
            }
        }
    }

    Automaton {
        fsm,
        start: remap[automaton.start.0 as usize].unwrap(),
        ends,
        is_dfa: automaton.is_dfa,
    }
}

// ---------------------------------------------------------------------------
// UTF-8 byte-level NFA construction for character classes
// ---------------------------------------------------------------------------

/// Build NFA transitions for a character class, properly handling multi-byte UTF-8.
fn build_char_class_nfa(
    fsm: &mut NfaGraph,
    negated: bool,
    ranges: &[(u32, u32)],
    start: StateId,
    end: StateId,
) {
    let effective_ranges = if negated {
        complement_codepoint_ranges(ranges)
    } else {
        ranges.to_vec()
    };

    for &(lo, hi) in &effective_ranges {
        add_codepoint_range_nfa(fsm, lo, hi, start, end);
    }
}

/// Compute the complement of codepoint ranges (all Unicode codepoints NOT in ranges).
/// Excludes surrogates (U+D800-U+DFFF).
fn complement_codepoint_ranges(ranges: &[(u32, u32)]) -> Vec<(u32, u32)> {
    let mut sorted = ranges.to_vec();
    sorted.sort_by_key(|&(lo, _)| lo);
    // Merge overlapping ranges
    let mut merged: Vec<(u32, u32)> = Vec::new();
    for (lo, hi) in sorted {
        if let Some(last) = merged.last_mut() {
            if lo <= last.1 + 1 {
                last.1 = last.1.max(hi);
                continue;
            }
        }
        merged.push((lo, hi));
    }

    let mut complement = Vec::new();
    let mut prev_end: u32 = 0;
    for &(lo, hi) in &merged {
        if lo > prev_end {
            complement.push((prev_end, lo - 1));
        }
        prev_end = hi.saturating_add(1);
    }
    if prev_end <= 0x10FFFF {
        complement.push((prev_end, 0x10FFFF));
    }

    // Remove surrogates from complement ranges
    let mut result = Vec::new();
    for &(lo, hi) in &complement {
        if hi < 0xD800 || lo > 0xDFFF {
            result.push((lo, hi));
        } else {
            if lo < 0xD800 {
                result.push((lo, 0xD7FF));
            }
            if hi > 0xDFFF {
                result.push((0xE000, hi));
            }
        }
    }
    result
}

/// Add NFA paths for a contiguous codepoint range [lo, hi].
/// Creates proper multi-byte UTF-8 byte-sequence transitions.
fn add_codepoint_range_nfa(fsm: &mut NfaGraph, lo: u32, hi: u32, start: StateId, end: StateId) {
    // ASCII range (1-byte UTF-8)
    let ascii_lo = lo;
    let ascii_hi = hi.min(0x7F);
    if ascii_lo <= ascii_hi {
        fsm.add_char_edge(start, ascii_lo as u8, ascii_hi as u8, end);
    }

    // 2-byte range: U+0080 - U+07FF
    let two_lo = lo.max(0x80);
    let two_hi = hi.min(0x7FF);
    if two_lo <= two_hi {
        add_utf8_nfa_range(fsm, two_lo, two_hi, start, end);
    }

    // 3-byte range: U+0800 - U+D7FF (before surrogates)
    let three_lo = lo.max(0x800);
    let three_hi = hi.min(0xD7FF);
    if three_lo <= three_hi {
        add_utf8_nfa_range(fsm, three_lo, three_hi, start, end);
    }

    // 3-byte range: U+E000 - U+FFFF (after surrogates)
    let three_lo2 = lo.max(0xE000);
    let three_hi2 = hi.min(0xFFFF);
    if three_lo2 <= three_hi2 {
        add_utf8_nfa_range(fsm, three_lo2, three_hi2, start, end);
    }

    // 4-byte range: U+10000 - U+10FFFF
    let four_lo = lo.max(0x10000);
    let four_hi = hi.min(0x10FFFF);
    if four_lo <= four_hi {
        add_utf8_nfa_range(fsm, four_lo, four_hi, start, end);
    }
}

/// Encode a codepoint to UTF-8 bytes.
fn encode_codepoint_utf8(cp: u32) -> Vec<u8> {
    let c = char::from_u32(cp).expect("valid codepoint");
    let mut buf = [0u8; 4];
    let s = c.encode_utf8(&mut buf);
    s.as_bytes().to_vec()
}

/// Add NFA transitions for a range of codepoints that all have the same
/// UTF-8 byte length. Uses recursive splitting by byte position.
fn add_utf8_nfa_range(fsm: &mut NfaGraph, lo: u32, hi: u32, start: StateId, end: StateId) {
    let lo_bytes = encode_codepoint_utf8(lo);
    let hi_bytes = encode_codepoint_utf8(hi);
    debug_assert_eq!(lo_bytes.len(), hi_bytes.len());
    add_utf8_byte_range(fsm, &lo_bytes, &hi_bytes, 0, start, end);
}

/// Recursive helper: add NFA transitions for UTF-8 byte sequences.
/// `depth` is the current byte position being processed.
fn add_utf8_byte_range(
    fsm: &mut NfaGraph,
    lo: &[u8],
    hi: &[u8],
    depth: usize,
    start: StateId,
    end: StateId,
) {
    if depth == lo.len() - 1 {
        // Last byte: single CharRange transition
        fsm.add_char_edge(start, lo[depth], hi[depth], end);
        return;
    }

    if lo[depth] == hi[depth] {
        // Same byte at this position: add transition and recurse
        let mid = fsm.add_state();
        fsm.add_char_edge(start, lo[depth], hi[depth], mid);
        add_utf8_byte_range(fsm, lo, hi, depth + 1, mid, end);
        return;
    }

    // Different bytes: split into up to 3 sub-ranges
    // Part 1: lo[depth] with suffix lo[depth+1..] to max (0xBF...)
    {
        let s = fsm.add_state();
        fsm.add_char_edge(start, lo[depth], lo[depth], s);
        let mut hi_full = lo.to_vec();
        for i in depth + 1..lo.len() {
            hi_full[i] = 0xBF;
        }
        add_utf8_byte_range(fsm, lo, &hi_full, depth + 1, s, end);
    }

    // Part 2: intermediate bytes with full continuation range
    if lo[depth] + 1 <= hi[depth].saturating_sub(1) {
        let s = fsm.add_state();
        fsm.add_char_edge(start, lo[depth] + 1, hi[depth] - 1, s);
        let mut lo_min = lo.to_vec();
        let mut hi_max = hi.to_vec();
        for i in depth + 1..lo.len() {
            lo_min[i] = 0x80;
            hi_max[i] = 0xBF;
        }
        add_utf8_byte_range(fsm, &lo_min, &hi_max, depth + 1, s, end);
    }

    // Part 3: hi[depth] with suffix min (0x80...) to hi[depth+1..]
    {
        let s = fsm.add_state();
        fsm.add_char_edge(start, hi[depth], hi[depth], s);
        let mut lo_min = hi.to_vec();
        for i in depth + 1..hi.len() {
            lo_min[i] = 0x80;
        }
        add_utf8_byte_range(fsm, &lo_min, hi, depth + 1, s, end);
    }
}

// ---------------------------------------------------------------------------
// Grammar → NFA
// ---------------------------------------------------------------------------

/// Check whether an expression tree is "inlineable": contains only
/// byte-level operations and references to already-known inlineable rules.
fn is_inlineable(grammar: &Grammar, expr_id: ExprId, known: &HashSet<RuleId>) -> bool {
    match grammar.get_expr(expr_id) {
        Expr::EmptyString
        | Expr::ByteString(_)
        | Expr::CharacterClass { .. }
        | Expr::CharacterClassStar { .. } => true,
        Expr::TagDispatch(_) => false,
        Expr::RuleRef(rid) => known.contains(rid),
        Expr::Repeat { rule, .. } => known.contains(rule),
        Expr::Sequence(es) => es.iter().all(|e| is_inlineable(grammar, *e, known)),
        Expr::Choices(es) => es.iter().all(|e| is_inlineable(grammar, *e, known)),
    }
}

/// Compute the set of rules whose bodies can be inlined into a single NFA.
/// Self-referencing and mutually-recursive rules are never inlineable.
fn find_inlineable_rules(grammar: &Grammar) -> HashSet<RuleId> {
    let mut inlineable = HashSet::new();
    loop {
        let mut changed = false;
        for (i, rule) in grammar.rules().iter().enumerate() {
            let rid = RuleId(i as u32);
            if !inlineable.contains(&rid) && is_inlineable(grammar, rule.body, &inlineable) {
                inlineable.insert(rid);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    inlineable
}

/// Build a single NFA for the grammar's root rule, inlining every rule
/// reference. Fails if the grammar is recursive or contains constructs
/// with no FSM equivalent.
pub fn grammar_to_nfa(grammar: &Grammar) -> Result<Automaton> {
    let inlineable = find_inlineable_rules(grammar);
    if !inlineable.contains(&grammar.root_rule()) {
        bail!("grammar is recursive or not byte-level; cannot convert to an FSM");
    }

    let mut fsm = NfaGraph::new();
    let start = fsm.add_state();
    let end = fsm.add_state();
    build_expr_nfa(grammar, &mut fsm, grammar.root().body, start, end);

    let mut ends = vec![false; fsm.num_states()];
    ends[end.0 as usize] = true;

    Ok(Automaton {
        fsm,
        start,
        ends,
        is_dfa: false,
    })
}

/// Build an NFA fragment for an expression between `start` and `end`,
/// inlining all rule references. Only called on inlineable expressions.
fn build_expr_nfa(grammar: &Grammar, fsm: &mut NfaGraph, expr_id: ExprId, start: StateId, end: StateId) {
    match grammar.get_expr(expr_id) {
        Expr::EmptyString => {
            fsm.add_epsilon(start, end);
        }

        Expr::ByteString(bytes) => {
            if bytes.is_empty() {
                fsm.add_epsilon(start, end);
                return;
            }
            let mut prev = start;
            for (i, &byte) in bytes.iter().enumerate() {
                let next = if i + 1 == bytes.len() {
                    end
                } else {
                    fsm.add_state()
                };
                fsm.add_char_edge(prev, byte, byte, next);
                prev = next;
            }
        }

        Expr::CharacterClass { negated, ranges } => {
            build_char_class_nfa(fsm, *negated, ranges, start, end);
        }

        Expr::CharacterClassStar { negated, ranges } => {
            fsm.add_epsilon(start, end);
            // Char class transitions looping back to start
            let effective_ranges = if *negated {
                complement_codepoint_ranges(ranges)
            } else {
                ranges.to_vec()
            };
            for &(lo, hi) in &effective_ranges {
                add_codepoint_range_nfa(fsm, lo, hi, start, start);
            }
        }

        Expr::RuleRef(rule_id) => {
            let body = grammar.get_rule(*rule_id).body;
            build_expr_nfa(grammar, fsm, body, start, end);
        }

        Expr::Sequence(exprs) => {
            if exprs.is_empty() {
                fsm.add_epsilon(start, end);
                return;
            }
            let mut prev = start;
            for (i, &eid) in exprs.iter().enumerate() {
                let next = if i + 1 == exprs.len() {
                    end
                } else {
                    fsm.add_state()
                };
                build_expr_nfa(grammar, fsm, eid, prev, next);
                prev = next;
            }
        }

        Expr::Choices(exprs) => {
            for &eid in exprs {
                build_expr_nfa(grammar, fsm, eid, start, end);
            }
        }

        Expr::Repeat { rule, min, max } => {
            let body = grammar.get_rule(*rule).body;
            let min = *min;
            let max = *max;
            let mut prev = start;

            // Mandatory repetitions
            for i in 0..min {
                let next = if max == Some(min) && i + 1 == min {
                    end
                } else {
                    fsm.add_state()
                };
                build_expr_nfa(grammar, fsm, body, prev, next);
                prev = next;
            }

            if let Some(max) = max {
                // Optional repetitions up to max
                for i in min..max {
                    if prev != end {
                        fsm.add_epsilon(prev, end);
                    }
                    let next = if i + 1 == max { end } else { fsm.add_state() };
                    build_expr_nfa(grammar, fsm, body, prev, next);
                    prev = next;
                }
            } else {
                // Unbounded: epsilon to end + self-loop
                fsm.add_epsilon(prev, end);
                build_expr_nfa(grammar, fsm, body, prev, prev);
            }
        }

        Expr::TagDispatch(_) => {
            unreachable!("tag dispatch is never inlineable");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::builder::GrammarBuilder;

    fn nfa_for(ebnf: &str) -> Automaton {
        let grammar = Grammar::from_ebnf(ebnf, "root").unwrap();
        grammar_to_nfa(&grammar).unwrap()
    }

    #[test]
    fn test_fsm_basic_construction() {
        let mut fsm = NfaGraph::new();
        let s0 = fsm.add_state();
        let s1 = fsm.add_state();
        let s2 = fsm.add_state();

        fsm.add_char_edge(s0, b'a', b'a', s1);
        fsm.add_char_edge(s1, b'b', b'b', s2);

        assert_eq!(fsm.num_states(), 3);
        assert_eq!(fsm.edges(s0).len(), 1);
        assert_eq!(fsm.next_state(s0, b'a'), Some(s1));
        assert_eq!(fsm.next_state(s0, b'b'), None);
    }

    #[test]
    fn test_epsilon_closure() {
        let mut fsm = NfaGraph::new();
        let s0 = fsm.add_state();
        let s1 = fsm.add_state();
        let s2 = fsm.add_state();
        let s3 = fsm.add_state();

        fsm.add_epsilon(s0, s1);
        fsm.add_epsilon(s1, s2);
        fsm.add_char_edge(s2, b'x', b'x', s3);

        let mut start = BTreeSet::new();
        start.insert(s0);
        let closure = fsm.epsilon_closure(&start);

        assert!(closure.contains(&s0));
        assert!(closure.contains(&s1));
        assert!(closure.contains(&s2));
        assert!(!closure.contains(&s3));
    }

    #[test]
    fn test_nfa_accepts_string() {
        let nfa = nfa_for(r#"root ::= "ab""#);
        assert!(nfa.accepts(b"ab"));
        assert!(!nfa.accepts(b"a"));
        assert!(!nfa.accepts(b"abc"));
        assert!(!nfa.accepts(b"ba"));
        assert!(!nfa.accepts(b""));
    }

    #[test]
    fn test_nfa_choices() {
        let nfa = nfa_for(r#"root ::= "cat" | "dog""#);
        assert!(nfa.accepts(b"cat"));
        assert!(nfa.accepts(b"dog"));
        assert!(!nfa.accepts(b"cow"));
    }

    #[test]
    fn test_nfa_char_class_star() {
        let nfa = nfa_for("root ::= [a-z]*");
        assert!(nfa.accepts(b""));
        assert!(nfa.accepts(b"a"));
        assert!(nfa.accepts(b"abc"));
        assert!(!nfa.accepts(b"A"));
        assert!(!nfa.accepts(b"a1"));
    }

    #[test]
    fn test_nfa_repeat_bounds() {
        let nfa = nfa_for(r#"root ::= ("ab"){1,2}"#);
        assert!(!nfa.accepts(b""));
        assert!(nfa.accepts(b"ab"));
        assert!(nfa.accepts(b"abab"));
        assert!(!nfa.accepts(b"ababab"));
    }

    #[test]
    fn test_nfa_negated_class() {
        let nfa = nfa_for("root ::= [^a-z]");
        assert!(!nfa.accepts(b"a"));
        assert!(nfa.accepts(b"A"));
        assert!(nfa.accepts(b"0"));
        // Multi-byte UTF-8 outside the range
        assert!(nfa.accepts("é".as_bytes()));
        assert!(!nfa.accepts(b""));
    }

    #[test]
    fn test_nfa_multibyte_char_class() {
        // [é-é] is the 2-byte range U+00E9
        let nfa = nfa_for("root ::= [\\u00e9]");
        assert!(nfa.accepts("é".as_bytes()));
        assert!(!nfa.accepts(b"e"));
    }

    #[test]
    fn test_recursive_grammar_rejected() {
        let grammar = Grammar::from_ebnf(r#"root ::= "a" root | """#, "root").unwrap();
        assert!(grammar_to_nfa(&grammar).is_err());
    }

    #[test]
    fn test_tag_dispatch_rejected() {
        let mut b = GrammarBuilder::new();
        let e = b.add_empty_string();
        let group = b.add_rule_with_hint("group", e);
        let td = b.add_tag_dispatch(crate::grammar::TagDispatch {
            tag_rule_pairs: vec![("<t".to_string(), group)],
            stop_eos: true,
            stop_strings: vec![],
            loop_after_dispatch: true,
            excludes: vec![],
        });
        let root = b.add_rule_with_hint("root", td);
        let grammar = b.build(root).unwrap();
        assert!(grammar_to_nfa(&grammar).is_err());
    }

    #[test]
    fn test_to_dfa_preserves_language() {
        let nfa = nfa_for(r#"root ::= "a" | "ab""#);
        let dfa = nfa.to_dfa();
        assert!(dfa.is_dfa);
        assert!(dfa.accepts(b"a"));
        assert!(dfa.accepts(b"ab"));
        assert!(!dfa.accepts(b"b"));
        assert!(!dfa.accepts(b"abc"));
        assert!(!dfa.accepts(b""));
    }

    #[test]
    fn test_intersect_basic() {
        // [a-m]+ ∩ [h-z]+ = [h-m]+
        let a = nfa_for("root ::= [a-m]+");
        let b = nfa_for("root ::= [h-z]+");
        let product = Automaton::intersect(&a, &b);
        assert!(product.accepts(b"h"));
        assert!(product.accepts(b"hml"));
        assert!(!product.accepts(b"a"));
        assert!(!product.accepts(b"z"));
        assert!(!product.accepts(b""));
    }

    #[test]
    fn test_intersect_empty_language() {
        let a = nfa_for(r#"root ::= "x""#);
        let b = nfa_for(r#"root ::= "y""#);
        let product = Automaton::intersect(&a, &b);
        assert_eq!(product.num_states(), 0);
        assert!(!product.accepts(b"x"));
        assert!(!product.accepts(b""));
    }

    #[test]
    fn test_intersect_prunes_dead_states() {
        // "ab" ∩ ("ab" | "ax"): the "ax" branch dies after 'a'
        let a = nfa_for(r#"root ::= "ab""#).to_dfa();
        let b = nfa_for(r#"root ::= "ab" | "ax""#).to_dfa();
        let product = Automaton::intersect(&a, &b);
        assert!(product.accepts(b"ab"));
        assert!(!product.accepts(b"ax"));
        // Every surviving state can reach an accepting state
        assert_eq!(product.num_states(), 3);
    }

    #[test]
    fn test_collect_intervals_overlap() {
        // Two overlapping ranges: [a-d] and [c-f]
        let mut fsm = NfaGraph::new();
        let s0 = fsm.add_state();
        let s1 = fsm.add_state();
        let s2 = fsm.add_state();

        fsm.add_char_edge(s0, b'a', b'd', s1);
        fsm.add_char_edge(s0, b'c', b'f', s2);

        let automaton = Automaton {
            fsm,
            start: s0,
            ends: vec![false, true, true],
            is_dfa: false,
        };

        let mut states = BTreeSet::new();
        states.insert(s0);
        let intervals = automaton.collect_intervals(&states);

        // Should split into: [a-b]→{s1}, [c-d]→{s1,s2}, [e-f]→{s2}
        assert_eq!(intervals.len(), 3);
        assert_eq!((intervals[0].0, intervals[0].1), (b'a', b'b'));
        assert!(intervals[0].2.contains(&s1) && !intervals[0].2.contains(&s2));
        assert_eq!((intervals[1].0, intervals[1].1), (b'c', b'd'));
        assert!(intervals[1].2.contains(&s1) && intervals[1].2.contains(&s2));
        assert_eq!((intervals[2].0, intervals[2].1), (b'e', b'f'));
        assert!(!intervals[2].2.contains(&s1) && intervals[2].2.contains(&s2));
    }
}
