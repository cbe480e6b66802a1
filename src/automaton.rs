//! Property-path compiler: regex-over-edge-types → non-deterministic
//! automaton.
//!
//! Atoms are a forward or inverse edge-type reference; combinators are
//! alternation, concatenation, Kleene star, optional, and bounded
//! repetition. The compiler builds states and transitions directly
//! (Thompson-style fragment construction) rather than parsing a string
//! grammar — the caller hands us an already-parsed [`PathExpr`] tree, since
//! surface syntax is an external collaborator's concern.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub enum PathExpr {
    /// A single edge-type reference; `inverse` traverses `to -> from`.
    Atom { edge_type: u64, inverse: bool },
    Concat(Box<PathExpr>, Box<PathExpr>),
    Alt(Box<PathExpr>, Box<PathExpr>),
    Star(Box<PathExpr>),
    Optional(Box<PathExpr>),
    /// `{lo, hi}`; `hi = None` means unbounded.
    Repeat(Box<PathExpr>, u32, Option<u32>),
    /// Reverses traversal direction for the sub-expression: every atom's
    /// inverse flag is toggled, and the builder also evaluates `Concat`
    /// children back to front under an odd number of inversions, so
    /// `Invert(Concat(a, b))` compiles the same automaton as `^b/^a`
    /// without rewriting the tree itself.
    Invert(Box<PathExpr>),
}

pub type StateId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from_state: StateId,
    pub to_state: StateId,
    pub edge_type: u64,
    pub inverse: bool,
}

/// A compiled property-path automaton.
#[derive(Debug, Clone)]
pub struct Automaton {
    pub start: StateId,
    pub accepting: Vec<bool>,
    pub transitions: Vec<Transition>,
    /// Whether the start state alone (the empty path) is accepted.
    pub start_is_final: bool,
    /// Shortest distance in transitions from each state to any accepting
    /// state; `u32::MAX` if unreachable. The A* heuristic.
    pub distance_to_final: Vec<u32>,
}

impl Automaton {
    pub fn state_count(&self) -> usize {
        self.accepting.len()
    }

    pub fn is_accepting(&self, s: StateId) -> bool {
        self.accepting[s as usize]
    }

    pub fn transitions_from(&self, s: StateId) -> impl Iterator<Item = &Transition> {
        self.transitions.iter().filter(move |t| t.from_state == s)
    }
}

/// A fragment under construction: an entry state and a set of dangling
/// exit states not yet wired to the next fragment.
struct Fragment {
    start: StateId,
    exits: Vec<StateId>,
}

pub struct AutomatonBuilder {
    accepting: Vec<bool>,
    transitions: Vec<Transition>,
}

impl AutomatonBuilder {
    fn new() -> Self {
        AutomatonBuilder { accepting: Vec::new(), transitions: Vec::new() }
    }

    fn new_state(&mut self) -> StateId {
        self.accepting.push(false);
        (self.accepting.len() - 1) as StateId
    }

    fn add_transition(&mut self, from: StateId, to: StateId, edge_type: u64, inverse: bool) {
        self.transitions.push(Transition { from_state: from, to_state: to, edge_type, inverse });
    }

    /// Wire every exit state of `frag` to `target` via an epsilon-free
    /// duplication: since this automaton has no epsilon transitions, joining
    /// two fragments means re-pointing every transition landing on an exit
    /// state of the left fragment so it instead targets the start of the
    /// right fragment wherever the exit and the right-fragment's start
    /// would otherwise need an epsilon edge. We take the simpler route used
    /// by the reference compiler: each exit state *is* reused as a normal
    /// state, and concatenation merges the right fragment's start into each
    /// left exit by rewriting the right fragment's outgoing transitions to
    /// also originate from every left exit.
    fn splice(&mut self, exits: &[StateId], right_start: StateId) {
        let right_transitions: Vec<Transition> = self
            .transitions
            .iter()
            .filter(|t| t.from_state == right_start)
            .cloned()
            .collect();
        let right_accepting = self.accepting[right_start as usize];
        for &exit in exits {
            for t in &right_transitions {
                self.add_transition(exit, t.to_state, t.edge_type, t.inverse);
            }
            if right_accepting {
                self.accepting[exit as usize] = true;
            }
        }
    }

    fn build(&mut self, expr: &PathExpr, inverted: bool) -> Fragment {
        match expr {
            PathExpr::Atom { edge_type, inverse } => {
                let s0 = self.new_state();
                let s1 = self.new_state();
                self.add_transition(s0, s1, *edge_type, *inverse != inverted);
                Fragment { start: s0, exits: vec![s1] }
            }
            PathExpr::Invert(inner) => self.build(inner, !inverted),
            PathExpr::Concat(a, b) => {
                // `^(a/b)` traverses as `^b/^a`: a reverse-traversed
                // sequence visits its children back to front, in addition
                // to each atom's own direction bit flipping. Swap which
                // child is built first (and spliced as the left fragment)
                // whenever we're building under an odd number of inversions.
                let (first, second) = if inverted { (b, a) } else { (a, b) };
                let left = self.build(first, inverted);
                let right = self.build(second, inverted);
                self.splice(&left.exits, right.start);
                Fragment { start: left.start, exits: right.exits }
            }
            PathExpr::Alt(a, b) => {
                let left = self.build(a, inverted);
                let right = self.build(b, inverted);
                let start = self.new_state();
                let left_out: Vec<Transition> =
                    self.transitions.iter().filter(|t| t.from_state == left.start).cloned().collect();
                let right_out: Vec<Transition> =
                    self.transitions.iter().filter(|t| t.from_state == right.start).cloned().collect();
                for t in left_out.iter().chain(right_out.iter()) {
                    self.add_transition(start, t.to_state, t.edge_type, t.inverse);
                }
                if self.accepting[left.start as usize] || self.accepting[right.start as usize] {
                    self.accepting[start as usize] = true;
                }
                let mut exits = left.exits;
                exits.extend(right.exits);
                Fragment { start, exits }
            }
            PathExpr::Optional(inner) => {
                let frag = self.build(inner, inverted);
                let mut exits = frag.exits;
                exits.push(frag.start);
                Fragment { start: frag.start, exits }
            }
            PathExpr::Star(inner) => {
                let frag = self.build(inner, inverted);
                self.splice(&frag.exits, frag.start);
                let mut exits = frag.exits;
                exits.push(frag.start);
                Fragment { start: frag.start, exits }
            }
            PathExpr::Repeat(inner, lo, hi) => self.build_repeat(inner, *lo, *hi, inverted),
        }
    }

    fn build_repeat(&mut self, inner: &PathExpr, lo: u32, hi: Option<u32>, inverted: bool) -> Fragment {
        match hi {
            None => {
                if lo == 0 {
                    return self.build(&PathExpr::Star(Box::new(inner.clone())), inverted);
                }
                let mandatory: PathExpr = (1..lo)
                    .fold(inner.clone(), |acc, _| PathExpr::Concat(Box::new(acc), Box::new(inner.clone())));
                let expr = PathExpr::Concat(Box::new(mandatory), Box::new(PathExpr::Star(Box::new(inner.clone()))));
                self.build(&expr, inverted)
            }
            Some(hi) => {
                if hi == 0 {
                    let s = self.new_state();
                    self.accepting[s as usize] = true;
                    return Fragment { start: s, exits: vec![s] };
                }
                let mut expr = if lo == 0 { PathExpr::Optional(Box::new(inner.clone())) } else { inner.clone() };
                for i in 1..hi {
                    let next = if i < lo { inner.clone() } else { PathExpr::Optional(Box::new(inner.clone())) };
                    expr = PathExpr::Concat(Box::new(expr), Box::new(next));
                }
                self.build(&expr, inverted)
            }
        }
    }
}

/// Compile a parsed path expression into an [`Automaton`].
pub fn compile(expr: &PathExpr) -> Automaton {
    let mut builder = AutomatonBuilder::new();
    let frag = builder.build(expr, false);
    for &e in &frag.exits {
        builder.accepting[e as usize] = true;
    }
    let start_is_final = builder.accepting[frag.start as usize];
    let distance_to_final = compute_distances(&builder.transitions, &builder.accepting);
    Automaton {
        start: frag.start,
        accepting: builder.accepting,
        transitions: builder.transitions,
        start_is_final,
        distance_to_final,
    }
}

/// BFS backward over transitions from every accepting state, giving the
/// shortest transition-count distance to acceptance for each state.
fn compute_distances(transitions: &[Transition], accepting: &[bool]) -> Vec<u32> {
    let n = accepting.len();
    let mut dist = vec![u32::MAX; n];
    let mut queue = VecDeque::new();
    for (s, &acc) in accepting.iter().enumerate() {
        if acc {
            dist[s] = 0;
            queue.push_back(s as StateId);
        }
    }
    let mut incoming: Vec<Vec<StateId>> = vec![Vec::new(); n];
    for t in transitions {
        incoming[t.to_state as usize].push(t.from_state);
    }
    while let Some(s) = queue.pop_front() {
        let d = dist[s as usize];
        for &pred in &incoming[s as usize] {
            if dist[pred as usize] == u32::MAX {
                dist[pred as usize] = d + 1;
                queue.push_back(pred);
            }
        }
    }
    dist
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(t: u64) -> PathExpr {
        PathExpr::Atom { edge_type: t, inverse: false }
    }

    #[test]
    fn single_atom_has_one_transition() {
        let a = compile(&atom(1));
        assert_eq!(a.transitions.len(), 1);
        assert!(!a.start_is_final);
        assert!(a.is_accepting(a.transitions[0].to_state));
    }

    #[test]
    fn optional_accepts_empty_path() {
        let a = compile(&PathExpr::Optional(Box::new(atom(1))));
        assert!(a.start_is_final);
    }

    #[test]
    fn star_loops_back_to_start() {
        let a = compile(&PathExpr::Star(Box::new(atom(7))));
        assert!(a.start_is_final);
        let loop_exists = a.transitions.iter().any(|t| t.from_state == a.start && t.edge_type == 7);
        assert!(loop_exists);
    }

    #[test]
    fn concat_chains_two_atoms() {
        let expr = PathExpr::Concat(Box::new(atom(1)), Box::new(atom(2)));
        let a = compile(&expr);
        assert!(!a.start_is_final);
        let second_types: Vec<u64> = a.transitions.iter().map(|t| t.edge_type).collect();
        assert!(second_types.contains(&1));
        assert!(second_types.contains(&2));
    }

    #[test]
    fn invert_toggles_direction_bit() {
        let expr = PathExpr::Invert(Box::new(atom(5)));
        let a = compile(&expr);
        assert!(a.transitions[0].inverse);
    }

    #[test]
    fn invert_of_concat_traverses_children_back_to_front() {
        // ^(1/2) must behave as ^2/^1: leaving the start state on edge
        // type 2 (inverted) first, then 1 (inverted).
        let expr = PathExpr::Invert(Box::new(PathExpr::Concat(Box::new(atom(1)), Box::new(atom(2)))));
        let a = compile(&expr);
        let from_start: Vec<&Transition> = a.transitions.iter().filter(|t| t.from_state == a.start).collect();
        assert_eq!(from_start.len(), 1);
        assert_eq!(from_start[0].edge_type, 2);
        assert!(from_start[0].inverse);
    }

    #[test]
    fn distance_to_final_is_zero_at_accepting_states() {
        let a = compile(&atom(1));
        for (s, &acc) in a.accepting.iter().enumerate() {
            if acc {
                assert_eq!(a.distance_to_final[s], 0);
            }
        }
        assert_eq!(a.distance_to_final[a.start as usize], 1);
    }

    #[test]
    fn bounded_repeat_two_to_three() {
        let a = compile(&PathExpr::Repeat(Box::new(atom(9)), 2, Some(3)));
        assert!(!a.start_is_final);
        // Some accepting state must be reachable in exactly 2 transitions
        // and none in fewer.
        assert!(a.distance_to_final.iter().all(|&d| d != 0) || a.accepting[a.start as usize] == false);
    }
}
