//! WHERE-clause filter evaluation and the `Filter` wrapper operator.

use crate::error::EngineResult;
use crate::ids::{ObjectId, Value};
use crate::model::GraphModel;
use crate::ops::binding::Binding;
use crate::ops::TupleOp;
use crate::plan::{FilterExpr, Term};
use std::sync::Arc;

fn resolve(term: Term, binding: &Binding) -> ObjectId {
    match term {
        Term::Var(v) => binding.get(v),
        Term::Const(c) => c,
    }
}

/// Evaluate a filter expression against the current binding. Comparisons
/// other than equality/inequality fall back to [`ObjectId::total_cmp`],
/// which orders by kind first, so a `Lt`/`Gt` across incompatible kinds
/// returns a well-defined (if not numerically meaningful) answer rather
/// than erroring.
pub fn evaluate(expr: &FilterExpr, binding: &Binding, model: &GraphModel) -> EngineResult<bool> {
    Ok(match expr {
        FilterExpr::Eq(a, b) => resolve(*a, binding) == resolve(*b, binding),
        FilterExpr::Ne(a, b) => resolve(*a, binding) != resolve(*b, binding),
        FilterExpr::Lt(a, b) => resolve(*a, binding).total_cmp(resolve(*b, binding))?.is_lt(),
        FilterExpr::Le(a, b) => resolve(*a, binding).total_cmp(resolve(*b, binding))?.is_le(),
        FilterExpr::Gt(a, b) => resolve(*a, binding).total_cmp(resolve(*b, binding))?.is_gt(),
        FilterExpr::Ge(a, b) => resolve(*a, binding).total_cmp(resolve(*b, binding))?.is_ge(),
        FilterExpr::And(a, b) => evaluate(a, binding, model)? && evaluate(b, binding, model)?,
        FilterExpr::Or(a, b) => evaluate(a, binding, model)? || evaluate(b, binding, model)?,
        FilterExpr::Not(a) => !evaluate(a, binding, model)?,
        FilterExpr::Like(var, pattern) => {
            let value = binding.get(*var);
            if value.is_null() {
                false
            } else {
                let text = match value.unpack()? {
                    Value::String(s) | Value::Iri(s) => s,
                    Value::External { .. } => model.resolve_string(value)?,
                    _ => return Ok(false),
                };
                let re = regex::Regex::new(pattern)
                    .map_err(|e| crate::error::EngineError::semantic(format!("invalid LIKE pattern: {e}")))?;
                re.is_match(&text)
            }
        }
    })
}

/// Wraps a child tuple-id operator, skipping tuples that fail the filter.
pub struct FilterIter {
    child: Box<TupleOp>,
    expr: FilterExpr,
    model: Arc<GraphModel>,
}

impl FilterIter {
    pub fn new(child: Box<TupleOp>, expr: FilterExpr, model: Arc<GraphModel>) -> Self {
        FilterIter { child, expr, model }
    }

    pub fn begin(&mut self, binding: &mut Binding, parent_has_next: bool) -> EngineResult<()> {
        self.child.begin(binding, parent_has_next)
    }

    pub fn next(&mut self, binding: &mut Binding) -> EngineResult<bool> {
        while self.child.next(binding)? {
            if evaluate(&self.expr, binding, &self.model)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn reset(&mut self, binding: &mut Binding) -> EngineResult<()> {
        self.child.reset(binding)
    }

    pub fn assign_nulls(&self, binding: &mut Binding) {
        self.child.assign_nulls(binding);
    }
}
