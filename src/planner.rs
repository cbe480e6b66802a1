//! Logical-to-physical planner: basic-graph-pattern join ordering, filter
//! conjunct pushdown, and optional-block wrapping. Translates a
//! [`crate::plan::Where`] into a tree of tuple-id operators.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::automaton::compile;
use crate::error::{EngineError, EngineResult};
use crate::ids::ObjectId;
use crate::model::{GraphModel, IndexId};
use crate::ops::filter::FilterIter;
use crate::ops::index_scan::{IndexScan, ScanColumn};
use crate::ops::joins::{HashJoin, LeftOuterJoin, NestedLoopJoin};
use crate::ops::paths::{EndpointCol, PathAStarIter, PathCheckIter, PathEnumIter, PathEnumWithPathIter};
use crate::ops::TupleOp;
use crate::path_manager::PathManager;
use crate::plan::{Atom, BasicGraphPattern, FilterExpr, PathAtom, Term, VarId, Where};
use crate::storage::config::EngineConfig;

pub struct Planner {
    model: Arc<GraphModel>,
    path_manager: Arc<Mutex<PathManager>>,
    config: EngineConfig,
}

impl Planner {
    pub fn new(model: Arc<GraphModel>, path_manager: Arc<Mutex<PathManager>>, config: EngineConfig) -> Self {
        Planner { model, path_manager, config }
    }

    /// Plans a full `WHERE` clause, returning the root operator and the
    /// total binding width (the caller's variable count plus any scratch
    /// columns the planner minted for don't-care positions, e.g. an
    /// unnamed edge variable).
    pub fn plan_where(&self, w: &Where, var_count: VarId) -> EngineResult<(Box<TupleOp>, VarId)> {
        let mut bound = HashSet::new();
        let mut scratch = var_count;
        let mut constants = HashMap::new();
        if let Some(filter) = &w.filter {
            self.collect_pushdown(filter, &mut constants);
        }
        let mut root = self.plan_pattern(&w.pattern, &mut bound, &mut scratch, &constants)?;
        if let Some(filter) = &w.filter {
            if let Some(remaining) = self.strip_pushed(filter, &constants) {
                root = Box::new(TupleOp::Filter(FilterIter::new(root, remaining, self.model.clone())));
            }
        }
        Ok((root, scratch))
    }

    fn split_conjuncts<'a>(&self, expr: &'a FilterExpr, out: &mut Vec<&'a FilterExpr>) {
        match expr {
            FilterExpr::And(a, b) => {
                self.split_conjuncts(a, out);
                self.split_conjuncts(b, out);
            }
            other => out.push(other),
        }
    }

    fn collect_pushdown(&self, filter: &FilterExpr, constants: &mut HashMap<VarId, ObjectId>) {
        let mut conjuncts = Vec::new();
        self.split_conjuncts(filter, &mut conjuncts);
        for c in conjuncts {
            if let FilterExpr::Eq(Term::Var(v), Term::Const(c)) | FilterExpr::Eq(Term::Const(c), Term::Var(v)) = c {
                constants.insert(*v, *c);
            }
        }
    }

    fn is_pushed(&self, expr: &FilterExpr, constants: &HashMap<VarId, ObjectId>) -> bool {
        match expr {
            FilterExpr::Eq(Term::Var(v), Term::Const(_)) | FilterExpr::Eq(Term::Const(_), Term::Var(v)) => {
                constants.contains_key(v)
            }
            _ => false,
        }
    }

    fn strip_pushed(&self, filter: &FilterExpr, constants: &HashMap<VarId, ObjectId>) -> Option<FilterExpr> {
        let mut conjuncts = Vec::new();
        self.split_conjuncts(filter, &mut conjuncts);
        conjuncts
            .into_iter()
            .filter(|c| !self.is_pushed(c, constants))
            .cloned()
            .reduce(|a, b| FilterExpr::And(Box::new(a), Box::new(b)))
    }

    fn atom_vars(&self, atom: &Atom) -> Vec<VarId> {
        fn push(t: &Term, out: &mut Vec<VarId>) {
            if let Term::Var(v) = t {
                out.push(*v);
            }
        }
        let mut out = Vec::new();
        match atom {
            Atom::Label { node, label } => {
                push(node, &mut out);
                push(label, &mut out);
            }
            Atom::Property { object, key, value } => {
                push(object, &mut out);
                push(key, &mut out);
                push(value, &mut out);
            }
            Atom::Edge { from, to, ty, edge_var } => {
                push(from, &mut out);
                push(to, &mut out);
                push(ty, &mut out);
                if let Some(v) = edge_var {
                    out.push(*v);
                }
            }
            Atom::Path(p) => {
                push(&p.from, &mut out);
                push(&p.to, &mut out);
                if let Some(v) = p.path_var {
                    out.push(v);
                }
            }
            Atom::IsolatedVar(v) => out.push(*v),
            Atom::IsolatedTerm(t) => push(t, &mut out),
        }
        out
    }

    fn is_bound_term(&self, t: &Term, bound: &HashSet<VarId>, constants: &HashMap<VarId, ObjectId>) -> bool {
        match t {
            Term::Const(_) => true,
            Term::Var(v) => bound.contains(v) || constants.contains_key(v),
        }
    }

    /// Estimated output cardinality weighted by remaining unbound columns,
    /// per the catalog's independence-per-column assumption.
    fn estimate_cost(&self, atom: &Atom, bound: &HashSet<VarId>, constants: &HashMap<VarId, ObjectId>) -> f64 {
        let catalog = self.model.catalog();
        let graph = self.model.graph();
        let is_bound = |t: &Term| self.is_bound_term(t, bound, constants);
        match atom {
            Atom::Label { node, label } => {
                let base = match label {
                    Term::Const(c) => catalog.label_count(graph, c.raw()).max(1) as f64,
                    Term::Var(_) => catalog.nodes_count(graph).max(1) as f64,
                };
                let unbound = [is_bound(node), is_bound(label)].iter().filter(|b| !**b).count() as f64;
                base * (1.0 + unbound)
            }
            Atom::Property { object, key, value } => {
                let base = match key {
                    Term::Const(c) => catalog.key_count(graph, c.raw()).max(1) as f64,
                    Term::Var(_) => catalog.nodes_count(graph).max(1) as f64,
                };
                let unbound = [is_bound(object), is_bound(key), is_bound(value)].iter().filter(|b| !**b).count() as f64;
                base * (1.0 + unbound)
            }
            Atom::Edge { from, to, ty, edge_var: _ } => {
                let base = match ty {
                    Term::Const(c) => catalog.type_count(graph, c.raw()).max(1) as f64,
                    Term::Var(_) => catalog.edges_count(graph).max(1) as f64,
                };
                let unbound = [is_bound(from), is_bound(to), is_bound(ty)].iter().filter(|b| !**b).count() as f64;
                base * (1.0 + unbound)
            }
            Atom::Path(p) => {
                let unbound = [is_bound(&p.from), is_bound(&p.to)].iter().filter(|b| !**b).count() as f64;
                // Path traversal fans out over every transition at every
                // step, so weight unbound endpoints more heavily than a
                // single-hop edge atom would.
                catalog.edges_count(graph).max(1) as f64 * (1.0 + 2.0 * unbound)
            }
            Atom::IsolatedVar(_) | Atom::IsolatedTerm(_) => 1.0,
        }
    }

    fn scan_col(&self, t: &Term, bound: &HashSet<VarId>, constants: &HashMap<VarId, ObjectId>) -> ScanColumn {
        match t {
            Term::Const(c) => ScanColumn::Const(*c),
            Term::Var(v) => {
                if let Some(&c) = constants.get(v) {
                    // Still constrains the scan to `c`, but (unlike a bare
                    // `Const`) also writes `c` into the binding, so a
                    // variable resolved purely by pushdown still shows up
                    // bound for anything downstream (projection, further
                    // joins) that reaches for it.
                    ScanColumn::ConstAssign(*v, c)
                } else if bound.contains(v) {
                    ScanColumn::Bound(*v)
                } else {
                    ScanColumn::Assign(*v)
                }
            }
        }
    }

    fn build_atom_op(
        &self,
        atom: &Atom,
        bound: &HashSet<VarId>,
        constants: &HashMap<VarId, ObjectId>,
        scratch: &mut VarId,
    ) -> EngineResult<Box<TupleOp>> {
        let col = |t: &Term| self.scan_col(t, bound, constants);
        match atom {
            Atom::Label { node, label } => {
                let index = if self.is_bound_term(label, bound, constants) { IndexId::LabelNode } else { IndexId::NodeLabel };
                let columns = if index == IndexId::LabelNode { vec![col(label), col(node)] } else { vec![col(node), col(label)] };
                Ok(Box::new(TupleOp::IndexScan(IndexScan::new(self.model.clone(), index, columns))))
            }
            Atom::Property { object, key, value } => {
                let index = if self.is_bound_term(object, bound, constants) { IndexId::ObjectKeyValue } else { IndexId::KeyValueObject };
                let columns = if index == IndexId::ObjectKeyValue {
                    vec![col(object), col(key), col(value)]
                } else {
                    vec![col(key), col(value), col(object)]
                };
                Ok(Box::new(TupleOp::IndexScan(IndexScan::new(self.model.clone(), index, columns))))
            }
            Atom::Edge { from, to, ty, edge_var } => {
                let fb = self.is_bound_term(from, bound, constants);
                let tb = self.is_bound_term(to, bound, constants);
                let yb = self.is_bound_term(ty, bound, constants);
                let index = match (yb, fb, tb) {
                    (true, true, _) => IndexId::TypeFromTo,
                    (true, false, true) => IndexId::TypeToFrom,
                    (true, false, false) => IndexId::TypeFromTo,
                    (false, true, _) => IndexId::FromToType,
                    (false, false, true) => IndexId::ToTypeFrom,
                    (false, false, false) => IndexId::FromToType,
                };
                let edge_col = match edge_var {
                    Some(v) => col(&Term::Var(*v)),
                    None => {
                        let s = *scratch;
                        *scratch += 1;
                        ScanColumn::Assign(s)
                    }
                };
                let columns = match index {
                    IndexId::FromToType => vec![col(from), col(to), col(ty), edge_col],
                    IndexId::ToTypeFrom => vec![col(to), col(ty), col(from), edge_col],
                    IndexId::TypeFromTo => vec![col(ty), col(from), col(to), edge_col],
                    IndexId::TypeToFrom => vec![col(ty), col(to), col(from), edge_col],
                    _ => unreachable!(),
                };
                Ok(Box::new(TupleOp::IndexScan(IndexScan::new(self.model.clone(), index, columns))))
            }
            Atom::Path(p) => self.build_path_op(p, bound, constants),
            Atom::IsolatedVar(v) => {
                let scratch_col = {
                    let s = *scratch;
                    *scratch += 1;
                    ScanColumn::Assign(s)
                };
                Ok(Box::new(TupleOp::IndexScan(IndexScan::new(
                    self.model.clone(),
                    IndexId::NodeLabel,
                    vec![ScanColumn::Assign(*v), scratch_col],
                ))))
            }
            Atom::IsolatedTerm(_) => Err(EngineError::semantic("isolated constant term carries no variable to bind")),
        }
    }

    fn build_path_op(&self, p: &PathAtom, bound: &HashSet<VarId>, constants: &HashMap<VarId, ObjectId>) -> EngineResult<Box<TupleOp>> {
        let automaton = compile(&p.regex);
        let resolve = |t: &Term| -> EndpointCol {
            match t {
                Term::Const(c) => EndpointCol::Const(*c),
                Term::Var(v) => {
                    if let Some(&c) = constants.get(v) {
                        EndpointCol::Const(c)
                    } else if bound.contains(v) {
                        EndpointCol::Bound(*v)
                    } else {
                        EndpointCol::Assign(*v)
                    }
                }
            }
        };
        let from = resolve(&p.from);
        let to_bound = self.is_bound_term(&p.to, bound, constants);

        if to_bound {
            let to = resolve(&p.to);
            if let Some(path_var) = p.path_var {
                Ok(Box::new(TupleOp::PathAStar(PathAStarIter::new(
                    self.model.clone(),
                    automaton,
                    from,
                    to,
                    path_var,
                    self.path_manager.clone(),
                ))))
            } else {
                Ok(Box::new(TupleOp::PathCheck(PathCheckIter::new(self.model.clone(), automaton, from, to))))
            }
        } else {
            let to_var = match &p.to {
                Term::Var(v) => *v,
                Term::Const(_) => return Err(EngineError::semantic("path target must be a variable when unbound")),
            };
            match p.path_var {
                Some(path_var) => Ok(Box::new(TupleOp::PathEnumWithPath(PathEnumWithPathIter::new(
                    self.model.clone(),
                    automaton,
                    from,
                    to_var,
                    path_var,
                    self.path_manager.clone(),
                )))),
                None => Ok(Box::new(TupleOp::PathEnum(PathEnumIter::new(self.model.clone(), automaton, from, to_var)))),
            }
        }
    }

    fn plan_pattern(
        &self,
        pattern: &BasicGraphPattern,
        bound: &mut HashSet<VarId>,
        scratch: &mut VarId,
        constants: &HashMap<VarId, ObjectId>,
    ) -> EngineResult<Box<TupleOp>> {
        let mut remaining: Vec<&Atom> = pattern.atoms.iter().collect();
        let mut root: Option<Box<TupleOp>> = None;
        let mut root_vars: HashSet<VarId> = HashSet::new();

        while !remaining.is_empty() {
            let mut best_idx = 0;
            let mut best_cost = f64::INFINITY;
            for (i, atom) in remaining.iter().enumerate() {
                let cost = self.estimate_cost(atom, bound, constants);
                if cost < best_cost {
                    best_cost = cost;
                    best_idx = i;
                }
            }
            let atom = remaining.remove(best_idx);
            let atom_vars = self.atom_vars(atom);
            let has_bound_prefix = atom_vars.iter().any(|v| bound.contains(v) || constants.contains_key(v));
            let scan = self.build_atom_op(atom, bound, constants, scratch)?;

            root = Some(match root {
                None => scan,
                Some(prev) => {
                    if has_bound_prefix || root_vars.is_empty() {
                        Box::new(TupleOp::NestedLoopJoin(NestedLoopJoin::new(prev, scan)))
                    } else {
                        let common: Vec<VarId> = atom_vars.iter().filter(|v| root_vars.contains(v)).cloned().collect();
                        let common_set: HashSet<VarId> = common.iter().cloned().collect();
                        let left_vars: Vec<VarId> = root_vars.iter().filter(|v| !common_set.contains(v)).cloned().collect();
                        let right_vars: Vec<VarId> = atom_vars.iter().filter(|v| !common_set.contains(v)).cloned().collect();
                        Box::new(TupleOp::HashJoin(HashJoin::new(
                            prev,
                            scan,
                            common,
                            left_vars,
                            right_vars,
                            self.config.hash_join_bucket_count,
                            self.config.hash_join_small_hash_bytes,
                        )))
                    }
                }
            });
            for v in atom_vars {
                bound.insert(v);
                root_vars.insert(v);
            }
        }

        for opt in &pattern.optional {
            let mut opt_bound = bound.clone();
            let opt_plan = self.plan_pattern(opt, &mut opt_bound, scratch, constants)?;
            let new_vars: HashSet<VarId> = opt_bound.difference(bound).cloned().collect();
            if new_vars.is_empty() {
                // The hoisting pass: a block binding nothing new is redundant
                // (its assertions are already implied by the parent scope).
                continue;
            }
            let left = root.ok_or_else(|| EngineError::semantic("optional block with no outer pattern to attach to"))?;
            root = Some(Box::new(TupleOp::LeftOuterJoin(LeftOuterJoin::new(left, opt_plan))));
            bound.extend(new_vars);
        }

        root.ok_or_else(|| EngineError::semantic("empty basic graph pattern"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::binding::Binding;
    use crate::plan::{Atom, BasicGraphPattern};

    fn planner_with_fixture() -> (Planner, ObjectId, ObjectId, ObjectId) {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::default();
        let model = Arc::new(GraphModel::open(dir.path(), &config, "default").unwrap());

        let alice = model.intern("alice", false).unwrap();
        let bob = model.intern("bob", false).unwrap();
        let knows = model.intern("knows", true).unwrap();
        let person = model.intern("Person", true).unwrap();
        model.insert_node(false);
        model.insert_node(false);
        model.insert_label(alice, person).unwrap();
        model.insert_label(bob, person).unwrap();
        model.insert_edge(alice, bob, knows).unwrap();
        model.insert_edge(bob, alice, knows).unwrap();

        let planner = Planner::new(model, Arc::new(Mutex::new(PathManager::new())), config);
        (planner, alice, bob, knows)
    }

    #[test]
    fn single_edge_atom_plans_to_an_index_scan() {
        let (planner, alice, bob, knows) = planner_with_fixture();
        let pattern = BasicGraphPattern {
            atoms: vec![Atom::Edge { from: Term::Const(alice), to: Term::Var(0), ty: Term::Const(knows), edge_var: None }],
            optional: vec![],
        };
        let w = Where { filter: None, pattern };
        let (mut op, width) = planner.plan_where(&w, 1).unwrap();
        // one scratch var minted for the unnamed edge id
        assert_eq!(width, 2);
        let mut binding = Binding::new(width as usize);
        op.begin(&mut binding, true).unwrap();
        assert!(op.next(&mut binding).unwrap());
        assert_eq!(binding.get(0), bob);
        assert!(!op.next(&mut binding).unwrap());
    }

    #[test]
    fn two_atom_pattern_joins_on_shared_variable() {
        let (planner, alice, bob, knows) = planner_with_fixture();
        // ?a knows bob, ?a knows ?b  (binds through the shared ?a)
        let pattern = BasicGraphPattern {
            atoms: vec![
                Atom::Edge { from: Term::Var(0), to: Term::Const(bob), ty: Term::Const(knows), edge_var: None },
                Atom::Edge { from: Term::Var(0), to: Term::Var(1), ty: Term::Const(knows), edge_var: None },
            ],
            optional: vec![],
        };
        let w = Where { filter: None, pattern };
        let (mut op, width) = planner.plan_where(&w, 2).unwrap();
        let mut binding = Binding::new(width as usize);
        op.begin(&mut binding, true).unwrap();
        let mut seen = Vec::new();
        while op.next(&mut binding).unwrap() {
            seen.push((binding.get(0), binding.get(1)));
        }
        assert!(seen.contains(&(alice, bob)));
    }

    #[test]
    fn filter_pushdown_restricts_scan_without_a_residual_filter_op() {
        let (planner, alice, bob, knows) = planner_with_fixture();
        let pattern = BasicGraphPattern {
            atoms: vec![Atom::Edge { from: Term::Var(0), to: Term::Var(1), ty: Term::Const(knows), edge_var: None }],
            optional: vec![],
        };
        let filter = FilterExpr::Eq(Term::Var(0), Term::Const(alice));
        let w = Where { filter: Some(filter), pattern };
        let (mut op, width) = planner.plan_where(&w, 2).unwrap();
        // pushdown folds the Eq into the scan bound, so the root is still
        // the plain IndexScan — not wrapped in a Filter operator.
        assert!(matches!(*op, TupleOp::IndexScan(_)));
        let mut binding = Binding::new(width as usize);
        op.begin(&mut binding, true).unwrap();
        assert!(op.next(&mut binding).unwrap());
        assert_eq!(binding.get(0), alice);
        assert_eq!(binding.get(1), bob);
        assert!(!op.next(&mut binding).unwrap());
    }

    #[test]
    fn optional_block_introducing_no_new_variable_is_hoisted_away() {
        let (planner, alice, bob, knows) = planner_with_fixture();
        let outer = BasicGraphPattern {
            atoms: vec![Atom::Edge { from: Term::Const(alice), to: Term::Var(0), ty: Term::Const(knows), edge_var: None }],
            optional: vec![BasicGraphPattern {
                atoms: vec![Atom::Edge { from: Term::Const(alice), to: Term::Var(0), ty: Term::Const(knows), edge_var: None }],
                optional: vec![],
            }],
        };
        let w = Where { filter: None, pattern: outer };
        let (mut op, width) = planner.plan_where(&w, 1).unwrap();
        assert!(!matches!(*op, TupleOp::LeftOuterJoin(_)));
        let mut binding = Binding::new(width as usize);
        op.begin(&mut binding, true).unwrap();
        assert!(op.next(&mut binding).unwrap());
        assert_eq!(binding.get(0), bob);
    }

    #[test]
    fn optional_block_introducing_a_new_variable_wraps_in_left_outer_join() {
        let (planner, alice, bob, knows) = planner_with_fixture();
        let outer = BasicGraphPattern {
            atoms: vec![Atom::Edge { from: Term::Const(alice), to: Term::Var(0), ty: Term::Const(knows), edge_var: None }],
            optional: vec![BasicGraphPattern {
                atoms: vec![Atom::Edge { from: Term::Var(0), to: Term::Var(1), ty: Term::Const(knows), edge_var: None }],
                optional: vec![],
            }],
        };
        let w = Where { filter: None, pattern: outer };
        let (mut op, width) = planner.plan_where(&w, 2).unwrap();
        assert!(matches!(*op, TupleOp::LeftOuterJoin(_)));
        let mut binding = Binding::new(width as usize);
        op.begin(&mut binding, true).unwrap();
        assert!(op.next(&mut binding).unwrap());
        assert_eq!(binding.get(0), bob);
        assert_eq!(binding.get(1), alice);
    }

    #[test]
    fn isolated_var_atom_scans_every_node() {
        let (planner, _alice, _bob, _knows) = planner_with_fixture();
        let pattern = BasicGraphPattern { atoms: vec![Atom::IsolatedVar(0)], optional: vec![] };
        let w = Where { filter: None, pattern };
        let (mut op, width) = planner.plan_where(&w, 1).unwrap();
        let mut binding = Binding::new(width as usize);
        op.begin(&mut binding, true).unwrap();
        let mut count = 0;
        while op.next(&mut binding).unwrap() {
            count += 1;
        }
        assert_eq!(count, 2);
    }
}
