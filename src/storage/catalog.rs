//! Persisted cardinality counts, scoped per graph. Loaded on startup,
//! mutated under a single mutex on every insert, flushed on shutdown; the
//! planner's cost model reads these as its only source of selectivity
//! estimates.
//!
//! Binary format (`catalog.dat`, little-endian): `uint32 graph_count`, then
//! per graph: `uint32 name_len`, `name_len` name bytes, six `uint64`
//! counters (`nodes`, `anonymous_nodes`, `edges`, `self_ref_from_eq_to`,
//! `self_ref_from_eq_type`, `self_ref_to_eq_type`), then four
//! length-prefixed `(uint64 id, uint64 count)` tables in order: per-label,
//! per-key, per-type, per-value-kind. `from=to=type` is not stored as a
//! seventh scalar — an edge satisfying all three pairwise predicates
//! already increments each of the three pairwise counters, so the
//! all-equal population is always a subset of each and is not separately
//! tracked.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use log::info;
use parking_lot::Mutex;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(pub u32);

#[derive(Debug, Clone, Default)]
struct GraphRecord {
    name: String,
    nodes: u64,
    anonymous_nodes: u64,
    edges: u64,
    self_ref_from_eq_to: u64,
    self_ref_from_eq_type: u64,
    self_ref_to_eq_type: u64,
    labels: HashMap<u64, u64>,
    keys: HashMap<u64, u64>,
    types: HashMap<u64, u64>,
    kinds: HashMap<u64, u64>,
}

struct Inner {
    path: PathBuf,
    graphs: Vec<GraphRecord>,
    by_name: HashMap<String, GraphId>,
}

pub struct Catalog {
    inner: Mutex<Inner>,
}

impl Catalog {
    pub fn open(db_folder: impl AsRef<Path>) -> EngineResult<Self> {
        let path = db_folder.as_ref().join("catalog.dat");
        let (graphs, by_name) = if path.exists() {
            Self::load(&path)?
        } else {
            (Vec::new(), HashMap::new())
        };
        Ok(Catalog { inner: Mutex::new(Inner { path, graphs, by_name }) })
    }

    fn load(path: &Path) -> EngineResult<(Vec<GraphRecord>, HashMap<String, GraphId>)> {
        let f = File::open(path).map_err(|e| EngineError::io(path, e))?;
        let mut r = BufReader::new(f);
        let graph_count = read_u32(&mut r, path)?;
        let mut graphs = Vec::with_capacity(graph_count as usize);
        let mut by_name = HashMap::new();
        for i in 0..graph_count {
            let name_len = read_u32(&mut r, path)? as usize;
            let mut name_bytes = vec![0u8; name_len];
            r.read_exact(&mut name_bytes).map_err(|e| EngineError::io(path, e))?;
            let name = String::from_utf8_lossy(&name_bytes).into_owned();
            let nodes = read_u64(&mut r, path)?;
            let anonymous_nodes = read_u64(&mut r, path)?;
            let edges = read_u64(&mut r, path)?;
            let self_ref_from_eq_to = read_u64(&mut r, path)?;
            let self_ref_from_eq_type = read_u64(&mut r, path)?;
            let self_ref_to_eq_type = read_u64(&mut r, path)?;
            let labels = read_table(&mut r, path)?;
            let keys = read_table(&mut r, path)?;
            let types = read_table(&mut r, path)?;
            let kinds = read_table(&mut r, path)?;
            by_name.insert(name.clone(), GraphId(i));
            graphs.push(GraphRecord {
                name,
                nodes,
                anonymous_nodes,
                edges,
                self_ref_from_eq_to,
                self_ref_from_eq_type,
                self_ref_to_eq_type,
                labels,
                keys,
                types,
                kinds,
            });
        }
        Ok((graphs, by_name))
    }

    pub fn flush(&self) -> EngineResult<()> {
        let inner = self.inner.lock();
        let f = File::create(&inner.path).map_err(|e| EngineError::io(&inner.path, e))?;
        let mut w = BufWriter::new(f);
        w.write_all(&(inner.graphs.len() as u32).to_le_bytes())
            .map_err(|e| EngineError::io(&inner.path, e))?;
        for g in &inner.graphs {
            let name_bytes = g.name.as_bytes();
            w.write_all(&(name_bytes.len() as u32).to_le_bytes())
                .map_err(|e| EngineError::io(&inner.path, e))?;
            w.write_all(name_bytes).map_err(|e| EngineError::io(&inner.path, e))?;
            for v in [
                g.nodes,
                g.anonymous_nodes,
                g.edges,
                g.self_ref_from_eq_to,
                g.self_ref_from_eq_type,
                g.self_ref_to_eq_type,
            ] {
                w.write_all(&v.to_le_bytes()).map_err(|e| EngineError::io(&inner.path, e))?;
            }
            for table in [&g.labels, &g.keys, &g.types, &g.kinds] {
                write_table(&mut w, &inner.path, table)?;
            }
        }
        info!("catalog flushed: {} graph(s)", inner.graphs.len());
        Ok(())
    }

    pub fn graph(&self, name: &str) -> GraphId {
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.by_name.get(name) {
            return id;
        }
        let id = GraphId(inner.graphs.len() as u32);
        inner.graphs.push(GraphRecord { name: name.to_string(), ..Default::default() });
        inner.by_name.insert(name.to_string(), id);
        id
    }

    pub fn record_node(&self, graph: GraphId, anonymous: bool) {
        let mut inner = self.inner.lock();
        let g = &mut inner.graphs[graph.0 as usize];
        g.nodes += 1;
        if anonymous {
            g.anonymous_nodes += 1;
        }
    }

    pub fn record_edge(&self, graph: GraphId, from: u64, to: u64, ty: u64) {
        let mut inner = self.inner.lock();
        let g = &mut inner.graphs[graph.0 as usize];
        g.edges += 1;
        if from == to {
            g.self_ref_from_eq_to += 1;
        }
        if from == ty {
            g.self_ref_from_eq_type += 1;
        }
        if to == ty {
            g.self_ref_to_eq_type += 1;
        }
        *g.types.entry(ty).or_insert(0) += 1;
    }

    pub fn record_label(&self, graph: GraphId, label_id: u64) {
        let mut inner = self.inner.lock();
        *inner.graphs[graph.0 as usize].labels.entry(label_id).or_insert(0) += 1;
    }

    pub fn record_property(&self, graph: GraphId, key_id: u64, value_kind: u64) {
        let mut inner = self.inner.lock();
        let g = &mut inner.graphs[graph.0 as usize];
        *g.keys.entry(key_id).or_insert(0) += 1;
        *g.kinds.entry(value_kind).or_insert(0) += 1;
    }

    pub fn nodes_count(&self, graph: GraphId) -> u64 {
        self.inner.lock().graphs[graph.0 as usize].nodes
    }

    pub fn edges_count(&self, graph: GraphId) -> u64 {
        self.inner.lock().graphs[graph.0 as usize].edges
    }

    pub fn label_count(&self, graph: GraphId, label_id: u64) -> u64 {
        *self.inner.lock().graphs[graph.0 as usize].labels.get(&label_id).unwrap_or(&0)
    }

    pub fn key_count(&self, graph: GraphId, key_id: u64) -> u64 {
        *self.inner.lock().graphs[graph.0 as usize].keys.get(&key_id).unwrap_or(&0)
    }

    pub fn type_count(&self, graph: GraphId, type_id: u64) -> u64 {
        *self.inner.lock().graphs[graph.0 as usize].types.get(&type_id).unwrap_or(&0)
    }

    pub fn self_ref_from_eq_to(&self, graph: GraphId) -> u64 {
        self.inner.lock().graphs[graph.0 as usize].self_ref_from_eq_to
    }

    pub fn self_ref_from_eq_type(&self, graph: GraphId) -> u64 {
        self.inner.lock().graphs[graph.0 as usize].self_ref_from_eq_type
    }

    pub fn self_ref_to_eq_type(&self, graph: GraphId) -> u64 {
        self.inner.lock().graphs[graph.0 as usize].self_ref_to_eq_type
    }
}

fn read_u32(r: &mut impl Read, path: &Path) -> EngineResult<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(|e| EngineError::io(path, e))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read, path: &Path) -> EngineResult<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|e| EngineError::io(path, e))?;
    Ok(u64::from_le_bytes(buf))
}

fn read_table(r: &mut impl Read, path: &Path) -> EngineResult<HashMap<u64, u64>> {
    let count = read_u32(r, path)? as usize;
    let mut map = HashMap::with_capacity(count);
    for _ in 0..count {
        let id = read_u64(r, path)?;
        let count = read_u64(r, path)?;
        map.insert(id, count);
    }
    Ok(map)
}

fn write_table(w: &mut impl Write, path: &Path, table: &HashMap<u64, u64>) -> EngineResult<()> {
    w.write_all(&(table.len() as u32).to_le_bytes()).map_err(|e| EngineError::io(path, e))?;
    for (&id, &count) in table {
        w.write_all(&id.to_le_bytes()).map_err(|e| EngineError::io(path, e))?;
        w.write_all(&count.to_le_bytes()).map_err(|e| EngineError::io(path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_survive_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cat = Catalog::open(dir.path()).unwrap();
            let g = cat.graph("default");
            cat.record_node(g, false);
            cat.record_node(g, true);
            cat.record_edge(g, 1, 1, 2);
            cat.record_edge(g, 1, 2, 3);
            cat.record_label(g, 42);
            cat.record_property(g, 7, 6);
            cat.flush().unwrap();
        }
        let cat = Catalog::open(dir.path()).unwrap();
        let g = cat.graph("default");
        assert_eq!(cat.nodes_count(g), 2);
        assert_eq!(cat.edges_count(g), 2);
        assert_eq!(cat.self_ref_from_eq_to(g), 1);
        assert_eq!(cat.label_count(g, 42), 1);
        assert_eq!(cat.key_count(g, 7), 1);
    }

    #[test]
    fn graph_scoping_keeps_counts_independent() {
        let dir = tempfile::tempdir().unwrap();
        let cat = Catalog::open(dir.path()).unwrap();
        let g1 = cat.graph("g1");
        let g2 = cat.graph("g2");
        cat.record_node(g1, false);
        cat.record_node(g2, false);
        cat.record_node(g2, false);
        assert_eq!(cat.nodes_count(g1), 1);
        assert_eq!(cat.nodes_count(g2), 2);
    }

    #[test]
    fn type_counts_track_per_type_totals() {
        let dir = tempfile::tempdir().unwrap();
        let cat = Catalog::open(dir.path()).unwrap();
        let g = cat.graph("default");
        cat.record_edge(g, 10, 20, 99);
        cat.record_edge(g, 11, 21, 99);
        cat.record_edge(g, 12, 22, 100);
        assert_eq!(cat.type_count(g, 99), 2);
        assert_eq!(cat.type_count(g, 100), 1);
    }
}
