//! Storage, planning, and execution core for a quad-store graph query
//! engine: object-identifier encoding, paged B+ tree storage, a
//! cost-based join-order planner, an NFA property-path evaluator, and the
//! pull-based tuple-id and value-level execution operators.
//!
//! Surface query syntax, a server transport, and bulk loaders are external
//! collaborators' concerns and live outside this crate; [`Engine`] accepts
//! an already-validated [`plan::PlanRoot`].

pub mod automaton;
pub mod error;
pub mod exec;
pub mod ids;
pub mod model;
pub mod ops;
pub mod path_manager;
pub mod plan;
pub mod planner;
pub mod storage;

use std::path::Path;
use std::sync::{Arc, Mutex};

use log::info;

use error::{EngineError, EngineResult};
use exec::{Aggregate as ExecAggregate, ExternalMergeSort, OrderKey, Projection, Row};
use ids::ObjectId;
use model::GraphModel;
use ops::binding::Binding;
use path_manager::PathManager;
use plan::{PlanRoot, VarId, Where};
use planner::Planner;
use storage::config::EngineConfig;

/// The process-scoped services (buffer pool, catalog, string manager, path
/// manager) threaded explicitly through every query rather than reached
/// via ambient singletons, plus the planner built on top of them.
pub struct Engine {
    model: Arc<GraphModel>,
    path_manager: Arc<Mutex<PathManager>>,
    config: EngineConfig,
    scratch_dir: std::path::PathBuf,
}

/// A streamed query result: one row per projected variable, still encoded
/// as [`ObjectId`]s. Decoding to display strings is the caller's concern
/// (via [`GraphModel::resolve_string`]).
pub type QueryResult = Vec<Row>;

impl Engine {
    pub fn open(db_folder: impl AsRef<Path>, graph_name: &str) -> EngineResult<Self> {
        let config = EngineConfig::default();
        let model = Arc::new(GraphModel::open(db_folder.as_ref(), &config, graph_name)?);
        info!("engine opened at {}", db_folder.as_ref().display());
        Ok(Engine {
            model,
            path_manager: Arc::new(Mutex::new(PathManager::new())),
            scratch_dir: db_folder.as_ref().join("scratch"),
            config,
        })
    }

    pub fn model(&self) -> &Arc<GraphModel> {
        &self.model
    }

    fn planner(&self) -> Planner {
        Planner::new(self.model.clone(), self.path_manager.clone(), self.config.clone())
    }

    /// Execute a logical plan root to completion, returning every result
    /// tuple. A streaming cursor API is the natural next step but isn't
    /// needed by anything in this crate's own test surface.
    pub fn execute(&self, root: &PlanRoot, var_count: VarId) -> EngineResult<QueryResult> {
        match root {
            PlanRoot::Select { projection, distinct, order_by, limit, body } => {
                let mut rows = self.run_select(body, projection, var_count)?;
                if !order_by.is_empty() {
                    rows = self.sort(rows, order_by)?;
                }
                if *distinct {
                    rows = if order_by.is_empty() { exec::distinct_hash(rows) } else { exec::distinct_ordered(rows) };
                }
                if let Some(limit) = limit {
                    rows.truncate(*limit as usize);
                }
                Ok(rows)
            }
            PlanRoot::OrderBy { keys, body } => {
                let mut rows = self.execute(body, var_count)?;
                rows = self.sort(rows, keys)?;
                Ok(rows)
            }
            PlanRoot::Distinct { body } => {
                let rows = self.execute(body, var_count)?;
                Ok(exec::distinct_hash(rows))
            }
            PlanRoot::GroupBy { keys, aggregates, body } => self.run_group_by(body, keys, aggregates, var_count),
            PlanRoot::Describe { node, body } => self.run_describe(body, *node, var_count),
        }
    }

    fn run_select(&self, body: &Where, projection: &[VarId], var_count: VarId) -> EngineResult<QueryResult> {
        let planner = self.planner();
        let (op, width) = planner.plan_where(body, var_count)?;
        let mut binding = Binding::new(width as usize);
        let mut proj = Projection::new(op, projection.to_vec());
        proj.drain(&mut binding)
    }

    fn sort(&self, rows: QueryResult, keys: &[(VarId, bool)]) -> EngineResult<QueryResult> {
        let order_keys: Vec<OrderKey> = keys.iter().map(|&(v, asc)| (v as usize, asc)).collect();
        let sorter = ExternalMergeSort::new(&self.scratch_dir, 512);
        sorter.sort(rows, &order_keys)
    }

    fn run_group_by(
        &self,
        body: &Where,
        keys: &[VarId],
        aggregates: &[plan::Aggregate],
        var_count: VarId,
    ) -> EngineResult<QueryResult> {
        let planner = self.planner();
        let (op, width) = planner.plan_where(body, var_count)?;
        let mut binding = Binding::new(width as usize);

        // The projection list for grouping is `keys` followed by each
        // aggregate's input variable (bare `COUNT(*)` has none).
        let mut proj_vars: Vec<VarId> = keys.to_vec();
        let mut agg_cols = Vec::with_capacity(aggregates.len());
        for agg in aggregates {
            match agg.arg {
                Some(v) => {
                    agg_cols.push(Some(proj_vars.len()));
                    proj_vars.push(v);
                }
                None => agg_cols.push(None),
            }
        }

        let mut proj = Projection::new(op, proj_vars);
        let rows = proj.drain(&mut binding)?;
        let exec_aggregates: Vec<ExecAggregate> = aggregates.to_vec();
        let sorter = ExternalMergeSort::new(&self.scratch_dir, 512);
        exec::group_by(rows, keys.len(), &exec_aggregates, &agg_cols, &self.model, &sorter)
    }

    fn run_describe(&self, body: &Where, node: plan::Term, var_count: VarId) -> EngineResult<QueryResult> {
        let planner = self.planner();
        let (op, width) = planner.plan_where(body, var_count)?;
        let mut binding = Binding::new(width as usize);
        let describe_var = match node {
            plan::Term::Var(v) => v,
            plan::Term::Const(_) => return Err(EngineError::semantic("DESCRIBE target must be a variable")),
        };
        let mut proj = Projection::new(op, vec![describe_var]);
        proj.drain(&mut binding)
    }

    pub fn resolve(&self, id: ObjectId) -> EngineResult<ids::Value> {
        id.unpack()
    }

    pub fn flush(&self) -> EngineResult<()> {
        self.model.flush()
    }
}
