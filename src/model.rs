//! The quad-store graph model: nodes, edges, labels, and properties wired
//! on top of the storage substrate.
//!
//! Every index in this module is a [`BPlusTree<4>`] regardless of its
//! logical arity. Label and property indexes only need 2 or 3 columns;
//! rather than monomorphizing a distinct B+ tree instantiation per arity
//! (which the planner and index-scan operator would then need to dispatch
//! over generically), unused trailing columns are padded with
//! [`ObjectId::NULL`] — whose raw value is `0`, the low bit pattern, so a
//! constant padding column never perturbs the ordering of the real
//! columns that precede it in the key. This keeps a single index type
//! threaded through the planner and the tuple-id operators.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::error::EngineResult;
use crate::ids::{Kind, ObjectId, Value};
use crate::storage::buffer_pool::BufferPool;
use crate::storage::btree::BPlusTree;
use crate::storage::catalog::{Catalog, GraphId};
use crate::storage::config::EngineConfig;
use crate::storage::file_manager::FileManager;
use crate::storage::objects::{ExtendibleHash, ObjectFile};
use crate::storage::table::EdgeTable;

/// Identifies one of the eleven physical indexes a scan can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexId {
    FromToType,
    ToTypeFrom,
    TypeFromTo,
    TypeToFrom,
    SelfFromEqTo,
    SelfFromEqType,
    SelfToEqType,
    LabelNode,
    NodeLabel,
    ObjectKeyValue,
    KeyValueObject,
}

impl IndexId {
    /// Logical column arity before NULL padding — used by the planner to
    /// know how many columns of a scan constant/binding vector are real.
    pub fn arity(self) -> usize {
        use IndexId::*;
        match self {
            FromToType | ToTypeFrom | TypeFromTo | TypeToFrom | SelfFromEqTo | SelfFromEqType | SelfToEqType => 4,
            LabelNode | NodeLabel => 2,
            ObjectKeyValue | KeyValueObject => 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EdgeRecord {
    pub from: ObjectId,
    pub to: ObjectId,
    pub ty: ObjectId,
    pub edge: ObjectId,
}

pub struct GraphModel {
    pool: Arc<BufferPool>,
    catalog: Arc<Catalog>,
    strings: Arc<ExtendibleHash>,
    objects: Arc<ObjectFile>,
    edges_table: EdgeTable,
    from_to_type: BPlusTree<4>,
    to_type_from: BPlusTree<4>,
    type_from_to: BPlusTree<4>,
    type_to_from: BPlusTree<4>,
    self_from_eq_to: BPlusTree<4>,
    self_from_eq_type: BPlusTree<4>,
    self_to_eq_type: BPlusTree<4>,
    label_node: BPlusTree<4>,
    node_label: BPlusTree<4>,
    object_key_value: BPlusTree<4>,
    key_value_object: BPlusTree<4>,
    next_edge_no: AtomicU64,
    graph: GraphId,
}

impl GraphModel {
    pub fn open(db_folder: impl AsRef<Path>, config: &EngineConfig, graph_name: &str) -> EngineResult<Self> {
        let db_folder = db_folder.as_ref();
        let file_manager = FileManager::new(db_folder)?;
        let pool = Arc::new(BufferPool::new(file_manager, config));
        let objects = Arc::new(ObjectFile::open(db_folder.join("objects.dat"))?);
        let strings = Arc::new(ExtendibleHash::open(pool.clone(), objects.clone(), "hash_id.dir", "hash_id.buckets")?);
        let catalog = Arc::new(Catalog::open(db_folder)?);
        let edges_table = EdgeTable::open(pool.clone(), "edges.table")?;

        let from_to_type = BPlusTree::open(pool.clone(), "from_to_type_edge.dir", "from_to_type_edge.leaf")?;
        let to_type_from = BPlusTree::open(pool.clone(), "to_type_from_edge.dir", "to_type_from_edge.leaf")?;
        let type_from_to = BPlusTree::open(pool.clone(), "type_from_to_edge.dir", "type_from_to_edge.leaf")?;
        let type_to_from = BPlusTree::open(pool.clone(), "type_to_from_edge.dir", "type_to_from_edge.leaf")?;
        let self_from_eq_to = BPlusTree::open(pool.clone(), "self_from_eq_to.dir", "self_from_eq_to.leaf")?;
        let self_from_eq_type = BPlusTree::open(pool.clone(), "self_from_eq_type.dir", "self_from_eq_type.leaf")?;
        let self_to_eq_type = BPlusTree::open(pool.clone(), "self_to_eq_type.dir", "self_to_eq_type.leaf")?;
        let label_node = BPlusTree::open(pool.clone(), "label_node.dir", "label_node.leaf")?;
        let node_label = BPlusTree::open(pool.clone(), "node_label.dir", "node_label.leaf")?;
        let object_key_value = BPlusTree::open(pool.clone(), "object_key_value.dir", "object_key_value.leaf")?;
        let key_value_object = BPlusTree::open(pool.clone(), "key_value_object.dir", "key_value_object.leaf")?;

        let graph = catalog.graph(graph_name);
        let next_edge_no = AtomicU64::new(catalog.edges_count(graph));

        Ok(GraphModel {
            pool,
            catalog,
            strings,
            objects,
            edges_table,
            from_to_type,
            to_type_from,
            type_from_to,
            type_to_from,
            self_from_eq_to,
            self_from_eq_type,
            self_to_eq_type,
            label_node,
            node_label,
            object_key_value,
            key_value_object,
            next_edge_no,
            graph,
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn graph(&self) -> GraphId {
        self.graph
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Intern a string or IRI literal, packing it inline when short enough
    /// and otherwise routing it through the extendible hash / object file.
    pub fn intern(&self, text: &str, as_iri: bool) -> EngineResult<ObjectId> {
        let bytes = text.as_bytes();
        if bytes.len() <= 7 {
            let value = if as_iri { Value::Iri(text.to_string()) } else { Value::String(text.to_string()) };
            return ObjectId::pack(&value);
        }
        let offset = self.strings.intern(bytes, true)?;
        let kind = if as_iri { Kind::IriExtern } else { Kind::StringExtern };
        ObjectId::pack(&Value::External { kind, offset })
    }

    /// Resolve a string-like object identifier back to its bytes.
    pub fn resolve_string(&self, id: ObjectId) -> EngineResult<String> {
        match id.unpack()? {
            Value::String(s) | Value::Iri(s) => Ok(s),
            Value::External { offset, .. } => {
                let bytes = self.objects.read(offset)?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            other => Err(crate::error::EngineError::logic(format!("{other:?} is not string-like"))),
        }
    }

    pub fn insert_node(&self, anonymous: bool) {
        self.catalog.record_node(self.graph, anonymous);
    }

    pub fn insert_label(&self, node: ObjectId, label: ObjectId) -> EngineResult<()> {
        self.label_node.insert([label.raw(), node.raw(), 0, 0])?;
        self.node_label.insert([node.raw(), label.raw(), 0, 0])?;
        self.catalog.record_label(self.graph, label.raw());
        Ok(())
    }

    pub fn insert_property(&self, object: ObjectId, key: ObjectId, value: ObjectId) -> EngineResult<()> {
        self.object_key_value.insert([object.raw(), key.raw(), value.raw(), 0])?;
        self.key_value_object.insert([key.raw(), value.raw(), object.raw(), 0])?;
        self.catalog.record_property(self.graph, key.raw(), value.kind()? as u64);
        Ok(())
    }

    pub fn insert_edge(&self, from: ObjectId, to: ObjectId, ty: ObjectId) -> EngineResult<ObjectId> {
        let edge_no = self.next_edge_no.fetch_add(1, AtomicOrdering::SeqCst);
        let edge = ObjectId::pack(&Value::Edge(edge_no))?;
        self.edges_table.put(edge_no, (from.raw(), to.raw(), ty.raw()))?;

        self.from_to_type.insert([from.raw(), to.raw(), ty.raw(), edge.raw()])?;
        self.to_type_from.insert([to.raw(), ty.raw(), from.raw(), edge.raw()])?;
        self.type_from_to.insert([ty.raw(), from.raw(), to.raw(), edge.raw()])?;
        self.type_to_from.insert([ty.raw(), to.raw(), from.raw(), edge.raw()])?;

        if from.raw() == to.raw() {
            self.self_from_eq_to.insert([from.raw(), to.raw(), ty.raw(), edge.raw()])?;
        }
        if from.raw() == ty.raw() {
            self.self_from_eq_type.insert([from.raw(), to.raw(), ty.raw(), edge.raw()])?;
        }
        if to.raw() == ty.raw() {
            self.self_to_eq_type.insert([from.raw(), to.raw(), ty.raw(), edge.raw()])?;
        }

        self.catalog.record_edge(self.graph, from.raw(), to.raw(), ty.raw());
        Ok(edge)
    }

    fn tree(&self, index: IndexId) -> &BPlusTree<4> {
        match index {
            IndexId::FromToType => &self.from_to_type,
            IndexId::ToTypeFrom => &self.to_type_from,
            IndexId::TypeFromTo => &self.type_from_to,
            IndexId::TypeToFrom => &self.type_to_from,
            IndexId::SelfFromEqTo => &self.self_from_eq_to,
            IndexId::SelfFromEqType => &self.self_from_eq_type,
            IndexId::SelfToEqType => &self.self_to_eq_type,
            IndexId::LabelNode => &self.label_node,
            IndexId::NodeLabel => &self.node_label,
            IndexId::ObjectKeyValue => &self.object_key_value,
            IndexId::KeyValueObject => &self.key_value_object,
        }
    }

    /// Range scan over one of the eleven indexes. `lo`/`hi` are full
    /// 4-column bounds; callers scanning a lower-arity logical index pad
    /// the unused trailing columns with `0`/`SCAN_HI` as appropriate (the
    /// index-scan operator does this via [`IndexId::arity`]).
    pub fn range_scan(&self, index: IndexId, lo: [u64; 4], hi: [u64; 4]) -> EngineResult<impl Iterator<Item = [u64; 4]> + '_> {
        self.tree(index).get_range(lo, hi)
    }

    pub fn edge_triple(&self, edge: ObjectId) -> EngineResult<(ObjectId, ObjectId, ObjectId)> {
        let payload = edge.raw() & crate::ids::VALUE_MASK;
        let (f, t, y) = self.edges_table.get(payload)?;
        Ok((ObjectId::from_raw(f), ObjectId::from_raw(t), ObjectId::from_raw(y)))
    }

    pub fn flush(&self) -> EngineResult<()> {
        self.pool.flush()?;
        self.catalog.flush()
    }
}

pub const SCAN_LO: u64 = 0;
pub const SCAN_HI: u64 = u64::MAX;
