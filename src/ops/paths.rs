//! The four property-path evaluation operators: membership check,
//! simple enumeration, enumeration with path materialization, and A*
//! shortest path. All four drive edge expansion through index scans on
//! `type→from→to→edge` (forward transitions) or `to→type→from→edge`
//! (inverse transitions), never a full table scan.

use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::automaton::{Automaton, StateId, Transition};
use crate::error::EngineResult;
use crate::ids::ObjectId;
use crate::model::{GraphModel, IndexId};
use crate::ops::binding::Binding;
use crate::path_manager::{PathManager, PathRef};
use crate::plan::VarId;

fn expand(model: &GraphModel, node: ObjectId, transition: &Transition) -> EngineResult<Vec<ObjectId>> {
    let ty = transition.edge_type;
    let rows: Vec<[u64; 4]> = if !transition.inverse {
        model.range_scan(IndexId::TypeFromTo, [ty, node.raw(), 0, 0], [ty, node.raw(), u64::MAX, u64::MAX])?.collect()
    } else {
        model.range_scan(IndexId::ToTypeFrom, [node.raw(), ty, 0, 0], [node.raw(), ty, u64::MAX, u64::MAX])?.collect()
    };
    Ok(rows.into_iter().map(|r| ObjectId::from_raw(r[2])).collect())
}

#[derive(Debug, Clone, Copy)]
pub enum EndpointCol {
    Const(ObjectId),
    Bound(VarId),
    Assign(VarId),
}

impl EndpointCol {
    fn resolve(&self, binding: &Binding) -> Option<ObjectId> {
        match *self {
            EndpointCol::Const(c) => Some(c),
            EndpointCol::Bound(v) => Some(binding.get(v)),
            EndpointCol::Assign(_) => None,
        }
    }
}

/// Both endpoints bound: BFS/DFS over `(node, state)`, succeeds on any
/// accepting product state matching the target.
pub struct PathCheckIter {
    model: Arc<GraphModel>,
    automaton: Automaton,
    from: EndpointCol,
    to: EndpointCol,
    found: bool,
    emitted: bool,
}

impl PathCheckIter {
    pub fn new(model: Arc<GraphModel>, automaton: Automaton, from: EndpointCol, to: EndpointCol) -> Self {
        PathCheckIter { model, automaton, from, to, found: false, emitted: true }
    }

    fn run(&self, start: ObjectId, target: ObjectId) -> EngineResult<bool> {
        if self.automaton.start_is_final && start == target {
            return Ok(true);
        }
        let mut visited: HashSet<(u64, StateId)> = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back((start, self.automaton.start));
        visited.insert((start.raw(), self.automaton.start));
        while let Some((node, state)) = queue.pop_front() {
            for t in self.automaton.transitions_from(state) {
                for neighbor in expand(&self.model, node, t)? {
                    let next_state = t.to_state;
                    if self.automaton.is_accepting(next_state) && neighbor == target {
                        return Ok(true);
                    }
                    if visited.insert((neighbor.raw(), next_state)) {
                        queue.push_back((neighbor, next_state));
                    }
                }
            }
        }
        Ok(false)
    }

    pub fn begin(&mut self, binding: &mut Binding, parent_has_next: bool) -> EngineResult<()> {
        self.emitted = true;
        if !parent_has_next {
            return Ok(());
        }
        let (Some(start), Some(target)) = (self.from.resolve(binding), self.to.resolve(binding)) else {
            return Ok(());
        };
        self.found = self.run(start, target)?;
        self.emitted = false;
        Ok(())
    }

    pub fn next(&mut self, _binding: &mut Binding) -> EngineResult<bool> {
        if self.emitted || !self.found {
            return Ok(false);
        }
        self.emitted = true;
        Ok(true)
    }

    pub fn reset(&mut self, binding: &mut Binding) -> EngineResult<()> {
        self.begin(binding, true)
    }

    pub fn assign_nulls(&self, _binding: &mut Binding) {}
}

/// One endpoint bound: BFS enumeration, emitting each distinct reachable
/// node in an accepting state exactly once.
pub struct PathEnumIter {
    model: Arc<GraphModel>,
    automaton: Automaton,
    from: EndpointCol,
    to_var: VarId,
    results: Vec<ObjectId>,
    pos: usize,
}

impl PathEnumIter {
    pub fn new(model: Arc<GraphModel>, automaton: Automaton, from: EndpointCol, to_var: VarId) -> Self {
        PathEnumIter { model, automaton, from, to_var, results: Vec::new(), pos: 0 }
    }

    fn run(&self, start: ObjectId) -> EngineResult<Vec<ObjectId>> {
        let mut visited: HashSet<(u64, StateId)> = HashSet::new();
        let mut emitted: HashSet<u64> = HashSet::new();
        let mut out = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back((start, self.automaton.start));
        visited.insert((start.raw(), self.automaton.start));
        if self.automaton.start_is_final && emitted.insert(start.raw()) {
            out.push(start);
        }
        while let Some((node, state)) = queue.pop_front() {
            for t in self.automaton.transitions_from(state) {
                for neighbor in expand(&self.model, node, t)? {
                    let next_state = t.to_state;
                    if visited.insert((neighbor.raw(), next_state)) {
                        if self.automaton.is_accepting(next_state) && emitted.insert(neighbor.raw()) {
                            out.push(neighbor);
                        }
                        queue.push_back((neighbor, next_state));
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn begin(&mut self, binding: &mut Binding, parent_has_next: bool) -> EngineResult<()> {
        self.results.clear();
        self.pos = 0;
        if !parent_has_next {
            return Ok(());
        }
        if let Some(start) = self.from.resolve(binding) {
            self.results = self.run(start)?;
        }
        Ok(())
    }

    pub fn next(&mut self, binding: &mut Binding) -> EngineResult<bool> {
        if self.pos >= self.results.len() {
            return Ok(false);
        }
        binding.set(self.to_var, self.results[self.pos]);
        self.pos += 1;
        Ok(true)
    }

    pub fn reset(&mut self, binding: &mut Binding) -> EngineResult<()> {
        self.begin(binding, true)
    }

    pub fn assign_nulls(&self, binding: &mut Binding) {
        binding.assign_null(self.to_var);
    }
}

/// Same BFS as [`PathEnumIter`], but every visited product state also
/// records its predecessor so the emitted tuple carries a path-id that
/// lazily reconstructs the walk via the [`PathManager`].
pub struct PathEnumWithPathIter {
    model: Arc<GraphModel>,
    automaton: Automaton,
    from: EndpointCol,
    to_var: VarId,
    path_var: VarId,
    path_manager: Arc<Mutex<PathManager>>,
    results: Vec<(ObjectId, PathRef)>,
    pos: usize,
}

impl PathEnumWithPathIter {
    pub fn new(
        model: Arc<GraphModel>,
        automaton: Automaton,
        from: EndpointCol,
        to_var: VarId,
        path_var: VarId,
        path_manager: Arc<Mutex<PathManager>>,
    ) -> Self {
        PathEnumWithPathIter { model, automaton, from, to_var, path_var, path_manager, results: Vec::new(), pos: 0 }
    }

    fn run(&self, start: ObjectId) -> EngineResult<Vec<(ObjectId, PathRef)>> {
        let mut mgr = self.path_manager.lock().unwrap();
        let mut visited: HashSet<(u64, StateId)> = HashSet::new();
        let mut out = Vec::new();
        let root = mgr.push_root(start);
        let mut queue = VecDeque::new();
        queue.push_back((start, self.automaton.start, root));
        visited.insert((start.raw(), self.automaton.start));
        if self.automaton.start_is_final {
            out.push((start, root));
        }
        while let Some((node, state, here)) = queue.pop_front() {
            for t in self.automaton.transitions_from(state) {
                for neighbor in expand(&self.model, node, t)? {
                    let next_state = t.to_state;
                    if visited.insert((neighbor.raw(), next_state)) {
                        let edge_type = ObjectId::from_raw(t.edge_type);
                        let step = mgr.push_step(neighbor, here, edge_type, t.inverse);
                        if self.automaton.is_accepting(next_state) {
                            out.push((neighbor, step));
                        }
                        queue.push_back((neighbor, next_state, step));
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn begin(&mut self, binding: &mut Binding, parent_has_next: bool) -> EngineResult<()> {
        self.results.clear();
        self.pos = 0;
        if !parent_has_next {
            return Ok(());
        }
        if let Some(start) = self.from.resolve(binding) {
            self.results = self.run(start)?;
        }
        Ok(())
    }

    pub fn next(&mut self, binding: &mut Binding) -> EngineResult<bool> {
        if self.pos >= self.results.len() {
            return Ok(false);
        }
        let (node, path_ref) = self.results[self.pos];
        binding.set(self.to_var, node);
        binding.set(self.path_var, crate::ids::ObjectId::pack(&crate::ids::Value::Path(path_ref as u64))?);
        self.pos += 1;
        Ok(true)
    }

    pub fn reset(&mut self, binding: &mut Binding) -> EngineResult<()> {
        self.begin(binding, true)
    }

    pub fn assign_nulls(&self, binding: &mut Binding) {
        binding.assign_null(self.to_var);
        binding.assign_null(self.path_var);
    }
}

#[derive(PartialEq, Eq)]
struct AStarEntry {
    priority: u32,
    seq: u64,
    node: ObjectId,
    state: StateId,
    path_ref: PathRef,
}

impl Ord for AStarEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse for a min-heap on priority; deterministic tie-break on
        // insertion order (earlier `seq` wins, so it must also compare as
        // "greater" under this reversed ordering).
        other.priority.cmp(&self.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for AStarEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Both endpoints bound, materializing the shortest accepting walk.
/// Priority queue keyed on `g + distance_to_final[state]`.
pub struct PathAStarIter {
    model: Arc<GraphModel>,
    automaton: Automaton,
    from: EndpointCol,
    to: EndpointCol,
    path_var: VarId,
    path_manager: Arc<Mutex<PathManager>>,
    result: Option<PathRef>,
    emitted: bool,
}

impl PathAStarIter {
    pub fn new(
        model: Arc<GraphModel>,
        automaton: Automaton,
        from: EndpointCol,
        to: EndpointCol,
        path_var: VarId,
        path_manager: Arc<Mutex<PathManager>>,
    ) -> Self {
        PathAStarIter { model, automaton, from, to, path_var, path_manager, result: None, emitted: true }
    }

    fn run(&self, start: ObjectId, target: ObjectId) -> EngineResult<Option<PathRef>> {
        let mut mgr = self.path_manager.lock().unwrap();
        let root = mgr.push_root(start);
        if self.automaton.start_is_final && start == target {
            return Ok(Some(root));
        }
        let mut heap = BinaryHeap::new();
        let mut seq = 0u64;
        let h0 = self.automaton.distance_to_final.get(self.automaton.start as usize).copied().unwrap_or(u32::MAX);
        heap.push(AStarEntry { priority: h0, seq, node: start, state: self.automaton.start, path_ref: root });
        let mut best_g: std::collections::HashMap<(u64, StateId), u32> = std::collections::HashMap::new();
        best_g.insert((start.raw(), self.automaton.start), 0);

        while let Some(entry) = heap.pop() {
            let g = best_g.get(&(entry.node.raw(), entry.state)).copied().unwrap_or(u32::MAX);
            for t in self.automaton.transitions_from(entry.state) {
                for neighbor in expand(&self.model, entry.node, t)? {
                    let next_state = t.to_state;
                    let next_g = g + 1;
                    let key = (neighbor.raw(), next_state);
                    if best_g.get(&key).is_none_or(|&existing| next_g < existing) {
                        best_g.insert(key, next_g);
                        let edge_type = ObjectId::from_raw(t.edge_type);
                        let step = mgr.push_step(neighbor, entry.path_ref, edge_type, t.inverse);
                        if self.automaton.is_accepting(next_state) && neighbor == target {
                            return Ok(Some(step));
                        }
                        let heuristic = self.automaton.distance_to_final.get(next_state as usize).copied().unwrap_or(u32::MAX);
                        seq += 1;
                        heap.push(AStarEntry {
                            priority: next_g.saturating_add(heuristic),
                            seq,
                            node: neighbor,
                            state: next_state,
                            path_ref: step,
                        });
                    }
                }
            }
        }
        Ok(None)
    }

    pub fn begin(&mut self, binding: &mut Binding, parent_has_next: bool) -> EngineResult<()> {
        self.emitted = true;
        self.result = None;
        if !parent_has_next {
            return Ok(());
        }
        let (Some(start), Some(target)) = (self.from.resolve(binding), self.to.resolve(binding)) else {
            return Ok(());
        };
        self.result = self.run(start, target)?;
        if self.result.is_some() {
            self.emitted = false;
        }
        Ok(())
    }

    pub fn next(&mut self, binding: &mut Binding) -> EngineResult<bool> {
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        if let Some(path_ref) = self.result {
            binding.set(self.path_var, ObjectId::pack(&crate::ids::Value::Path(path_ref as u64))?);
        }
        Ok(true)
    }

    pub fn reset(&mut self, binding: &mut Binding) -> EngineResult<()> {
        self.begin(binding, true)
    }

    pub fn assign_nulls(&self, binding: &mut Binding) {
        binding.assign_null(self.path_var);
    }
}
