//! Join operators over the tuple-id tree: nested-loop, hash, and
//! left-outer.

use std::collections::HashMap;

use crate::error::EngineResult;
use crate::ops::binding::Binding;
use crate::ops::TupleOp;
use crate::plan::VarId;
use crate::storage::objects::murmur3_32;

pub struct NestedLoopJoin {
    left: Box<TupleOp>,
    right: Box<TupleOp>,
    left_has_current: bool,
}

impl NestedLoopJoin {
    pub fn new(left: Box<TupleOp>, right: Box<TupleOp>) -> Self {
        NestedLoopJoin { left, right, left_has_current: false }
    }

    pub fn begin(&mut self, binding: &mut Binding, parent_has_next: bool) -> EngineResult<()> {
        self.left.begin(binding, parent_has_next)?;
        self.left_has_current = self.left.next(binding)?;
        self.right.begin(binding, self.left_has_current)?;
        Ok(())
    }

    pub fn next(&mut self, binding: &mut Binding) -> EngineResult<bool> {
        loop {
            if self.left_has_current && self.right.next(binding)? {
                return Ok(true);
            }
            self.left_has_current = self.left.next(binding)?;
            if !self.left_has_current {
                return Ok(false);
            }
            self.right.reset(binding)?;
        }
    }

    pub fn reset(&mut self, binding: &mut Binding) -> EngineResult<()> {
        self.left.reset(binding)?;
        self.left_has_current = self.left.next(binding)?;
        self.right.reset(binding)?;
        Ok(())
    }

    pub fn assign_nulls(&self, binding: &mut Binding) {
        self.left.assign_nulls(binding);
        self.right.assign_nulls(binding);
    }
}

pub struct HashJoin {
    left: Box<TupleOp>,
    right: Box<TupleOp>,
    common_vars: Vec<VarId>,
    left_vars: Vec<VarId>,
    right_vars: Vec<VarId>,
    bucket_count: usize,
    small_hash_bytes: usize,
    results: Vec<Binding>,
    pos: usize,
}

impl HashJoin {
    pub fn new(
        left: Box<TupleOp>,
        right: Box<TupleOp>,
        common_vars: Vec<VarId>,
        left_vars: Vec<VarId>,
        right_vars: Vec<VarId>,
        bucket_count: usize,
        small_hash_bytes: usize,
    ) -> Self {
        HashJoin {
            left,
            right,
            common_vars,
            left_vars,
            right_vars,
            bucket_count,
            small_hash_bytes,
            results: Vec::new(),
            pos: 0,
        }
    }

    fn bucket_of(&self, row: &Binding) -> usize {
        let mut bytes = Vec::with_capacity(self.common_vars.len() * 8);
        for &v in &self.common_vars {
            bytes.extend_from_slice(&row.get(v).raw().to_le_bytes());
        }
        let h = murmur3_32(&bytes, 0);
        let mask = (self.bucket_count as u32).next_power_of_two() - 1;
        (h & mask) as usize % self.bucket_count
    }

    fn merge(&self, left_row: &Binding, right_row: &Binding, out: &mut Binding) {
        for &v in &self.left_vars {
            out.set(v, left_row.get(v));
        }
        for &v in &self.common_vars {
            out.set(v, left_row.get(v));
        }
        for &v in &self.right_vars {
            out.set(v, right_row.get(v));
        }
    }

    fn compute(&self, left_rows: &[Binding], right_rows: &[Binding]) -> Vec<Binding> {
        let n = self.bucket_count.max(1);
        let mut left_buckets: Vec<Vec<&Binding>> = vec![Vec::new(); n];
        let mut right_buckets: Vec<Vec<&Binding>> = vec![Vec::new(); n];
        for r in left_rows {
            left_buckets[self.bucket_of(r)].push(r);
        }
        for r in right_rows {
            right_buckets[self.bucket_of(r)].push(r);
        }

        let width = left_rows.first().or(right_rows.first()).map(|r| r.width()).unwrap_or(0);
        let mut out = Vec::new();
        for b in 0..n {
            let lb = &left_buckets[b];
            let rb = &right_buckets[b];
            if lb.is_empty() || rb.is_empty() {
                continue;
            }
            let build_is_left = lb.len() <= rb.len();
            let build_len = if build_is_left { lb.len() } else { rb.len() };
            let small_bytes = build_len * width * 8;

            if small_bytes < self.small_hash_bytes {
                // Build side is small enough to fit a secondary in-memory
                // hash: build it on the smaller side and probe with the
                // other.
                let (build, probe, build_is_left_for_merge) =
                    if build_is_left { (lb, rb, true) } else { (rb, lb, false) };
                let mut index: HashMap<Vec<u64>, Vec<&Binding>> = HashMap::new();
                for &row in build {
                    index.entry(self.key_of(row)).or_default().push(row);
                }
                for &probe_row in probe {
                    if let Some(matches) = index.get(&self.key_of(probe_row)) {
                        for &build_row in matches {
                            let mut row = Binding::new(width);
                            if build_is_left_for_merge {
                                self.merge(build_row, probe_row, &mut row);
                            } else {
                                self.merge(probe_row, build_row, &mut row);
                            }
                            out.push(row);
                        }
                    }
                }
            } else {
                // Bucket too large for a worthwhile secondary hash: fall
                // back to a plain nested loop over it.
                for &l in lb {
                    for &r in rb {
                        if self.keys_match(l, r) {
                            let mut row = Binding::new(width);
                            self.merge(l, r, &mut row);
                            out.push(row);
                        }
                    }
                }
            }
        }
        out
    }

    fn key_of(&self, row: &Binding) -> Vec<u64> {
        self.common_vars.iter().map(|&v| row.get(v).raw()).collect()
    }

    fn keys_match(&self, a: &Binding, b: &Binding) -> bool {
        self.common_vars.iter().all(|&v| a.get(v) == b.get(v))
    }

    pub fn begin(&mut self, binding: &mut Binding, parent_has_next: bool) -> EngineResult<()> {
        self.results.clear();
        self.pos = 0;
        if !parent_has_next {
            return Ok(());
        }
        self.left.begin(binding, true)?;
        let mut left_rows = Vec::new();
        while self.left.next(binding)? {
            left_rows.push(binding.clone());
        }
        self.right.begin(binding, true)?;
        let mut right_rows = Vec::new();
        while self.right.next(binding)? {
            right_rows.push(binding.clone());
        }
        self.results = self.compute(&left_rows, &right_rows);
        Ok(())
    }

    pub fn next(&mut self, binding: &mut Binding) -> EngineResult<bool> {
        if self.pos >= self.results.len() {
            return Ok(false);
        }
        *binding = self.results[self.pos].clone();
        self.pos += 1;
        Ok(true)
    }

    pub fn reset(&mut self, binding: &mut Binding) -> EngineResult<()> {
        self.begin(binding, true)
    }

    pub fn assign_nulls(&self, binding: &mut Binding) {
        self.left.assign_nulls(binding);
        self.right.assign_nulls(binding);
    }
}

pub struct LeftOuterJoin {
    left: Box<TupleOp>,
    right: Box<TupleOp>,
    left_has_current: bool,
    matched_current: bool,
    /// Set after emitting a no-match row: the left tuple must stay in the
    /// binding for that `next()` call's return, so advancing past it is
    /// deferred to the *following* call rather than done before returning.
    pending_advance: bool,
}

impl LeftOuterJoin {
    pub fn new(left: Box<TupleOp>, right: Box<TupleOp>) -> Self {
        LeftOuterJoin { left, right, left_has_current: false, matched_current: false, pending_advance: false }
    }

    pub fn begin(&mut self, binding: &mut Binding, parent_has_next: bool) -> EngineResult<()> {
        self.pending_advance = false;
        self.left.begin(binding, parent_has_next)?;
        self.left_has_current = self.left.next(binding)?;
        self.matched_current = false;
        self.right.begin(binding, self.left_has_current)?;
        Ok(())
    }

    pub fn next(&mut self, binding: &mut Binding) -> EngineResult<bool> {
        if self.pending_advance {
            self.pending_advance = false;
            self.advance_left(binding)?;
        }
        loop {
            if !self.left_has_current {
                return Ok(false);
            }
            if self.right.next(binding)? {
                self.matched_current = true;
                return Ok(true);
            }
            if !self.matched_current {
                self.right.assign_nulls(binding);
                self.matched_current = true;
                self.pending_advance = true;
                return Ok(true);
            }
            self.advance_left(binding)?;
        }
    }

    fn advance_left(&mut self, binding: &mut Binding) -> EngineResult<()> {
        self.left_has_current = self.left.next(binding)?;
        self.matched_current = false;
        if self.left_has_current {
            self.right.reset(binding)?;
        }
        Ok(())
    }

    pub fn reset(&mut self, binding: &mut Binding) -> EngineResult<()> {
        self.pending_advance = false;
        self.left.reset(binding)?;
        self.left_has_current = self.left.next(binding)?;
        self.matched_current = false;
        if self.left_has_current {
            self.right.reset(binding)?;
        }
        Ok(())
    }

    pub fn assign_nulls(&self, binding: &mut Binding) {
        self.left.assign_nulls(binding);
        self.right.assign_nulls(binding);
    }
}
