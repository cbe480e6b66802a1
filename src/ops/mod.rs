//! The tuple-id operator tree: pull-based iterators over
//! `(begin, next, reset, assign_nulls)`, composed as an enum rather than a
//! trait object so the planner can match on shape when choosing a strategy
//! (e.g. picking hash vs. nested-loop join at a particular node) without a
//! vtable indirection on every `next()` call.

pub mod binding;
pub mod filter;
pub mod index_scan;
pub mod joins;
pub mod paths;

use crate::error::EngineResult;
use binding::Binding;
use filter::FilterIter;
use index_scan::IndexScan;
use joins::{HashJoin, LeftOuterJoin, NestedLoopJoin};
use paths::{PathAStarIter, PathCheckIter, PathEnumIter, PathEnumWithPathIter};

pub enum TupleOp {
    IndexScan(IndexScan),
    NestedLoopJoin(NestedLoopJoin),
    HashJoin(HashJoin),
    LeftOuterJoin(LeftOuterJoin),
    PathCheck(PathCheckIter),
    PathEnum(PathEnumIter),
    PathEnumWithPath(PathEnumWithPathIter),
    PathAStar(PathAStarIter),
    Filter(FilterIter),
}

impl TupleOp {
    pub fn begin(&mut self, binding: &mut Binding, parent_has_next: bool) -> EngineResult<()> {
        match self {
            TupleOp::IndexScan(op) => op.begin(binding, parent_has_next),
            TupleOp::NestedLoopJoin(op) => op.begin(binding, parent_has_next),
            TupleOp::HashJoin(op) => op.begin(binding, parent_has_next),
            TupleOp::LeftOuterJoin(op) => op.begin(binding, parent_has_next),
            TupleOp::PathCheck(op) => op.begin(binding, parent_has_next),
            TupleOp::PathEnum(op) => op.begin(binding, parent_has_next),
            TupleOp::PathEnumWithPath(op) => op.begin(binding, parent_has_next),
            TupleOp::PathAStar(op) => op.begin(binding, parent_has_next),
            TupleOp::Filter(op) => op.begin(binding, parent_has_next),
        }
    }

    pub fn next(&mut self, binding: &mut Binding) -> EngineResult<bool> {
        match self {
            TupleOp::IndexScan(op) => op.next(binding),
            TupleOp::NestedLoopJoin(op) => op.next(binding),
            TupleOp::HashJoin(op) => op.next(binding),
            TupleOp::LeftOuterJoin(op) => op.next(binding),
            TupleOp::PathCheck(op) => op.next(binding),
            TupleOp::PathEnum(op) => op.next(binding),
            TupleOp::PathEnumWithPath(op) => op.next(binding),
            TupleOp::PathAStar(op) => op.next(binding),
            TupleOp::Filter(op) => op.next(binding),
        }
    }

    pub fn reset(&mut self, binding: &mut Binding) -> EngineResult<()> {
        match self {
            TupleOp::IndexScan(op) => op.reset(binding),
            TupleOp::NestedLoopJoin(op) => op.reset(binding),
            TupleOp::HashJoin(op) => op.reset(binding),
            TupleOp::LeftOuterJoin(op) => op.reset(binding),
            TupleOp::PathCheck(op) => op.reset(binding),
            TupleOp::PathEnum(op) => op.reset(binding),
            TupleOp::PathEnumWithPath(op) => op.reset(binding),
            TupleOp::PathAStar(op) => op.reset(binding),
            TupleOp::Filter(op) => op.reset(binding),
        }
    }

    pub fn assign_nulls(&self, binding: &mut Binding) {
        match self {
            TupleOp::IndexScan(op) => op.assign_nulls(binding),
            TupleOp::NestedLoopJoin(op) => op.assign_nulls(binding),
            TupleOp::HashJoin(op) => op.assign_nulls(binding),
            TupleOp::LeftOuterJoin(op) => op.assign_nulls(binding),
            TupleOp::PathCheck(op) => op.assign_nulls(binding),
            TupleOp::PathEnum(op) => op.assign_nulls(binding),
            TupleOp::PathEnumWithPath(op) => op.assign_nulls(binding),
            TupleOp::PathAStar(op) => op.assign_nulls(binding),
            TupleOp::Filter(op) => op.assign_nulls(binding),
        }
    }
}
