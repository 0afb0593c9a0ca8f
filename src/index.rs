//! # Vector index
//!
//! Named collections of `(id, vector, payload)` points searchable by cosine
//! similarity, plus **aliases** that name "the current collection".
//!
//! The lifecycle a collection goes through:
//!
//! ```text
//! create_collection ──► insert (xN) ──► seal ──► point_alias ──► search
//!                                                     │
//!                          previous target ◄──────────┘ (caller deletes it)
//! ```
//!
//! Only sealed collections answer searches, and readers always go through
//! an alias, so a reader sees either the old epoch or the new one, never a
//! collection that is half built. Searches already running against an old
//! collection keep their handle to it until they finish, even if it is
//! deleted in the meantime.
//!
//! [`HnswVectorIndex`] keeps every collection in process, each backed by a
//! [HNSW](https://arxiv.org/abs/1603.09320) graph from the `hora` crate.
//! HNSW candidates are re-scored with exact cosine similarity, so callers
//! get true scores in descending order.

use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::core::node::Node;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::error::{RagError, Result};

/// Similarity metric of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    Cosine,
}

// Graphs are built over unit vectors, where Euclidean order is cosine order.
// hora's own cosine metric yields NaN distances that panic its neighbour heap.
impl From<Distance> for Metric {
    fn from(distance: Distance) -> Self {
        match distance {
            Distance::Cosine => Metric::Euclidean,
        }
    }
}

/// A point to store: the vector of one corpus record and its canonical text.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedVector {
    pub id: usize,
    pub vector: Vec<f32>,
    pub payload: String,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: usize,
    pub payload: String,
    /// Cosine similarity in `[-1, 1]`, higher is closer.
    pub score: f32,
}

/// Storage contract for the pipeline.
///
/// All methods take `&self`; implementations handle their own locking so a
/// single index can serve concurrent searches while an ingestion fills a
/// fresh collection.
pub trait VectorIndex: Send + Sync {
    /// Create an empty collection. Fails if the name is taken.
    fn create_collection(&self, name: &str, dimension: usize, distance: Distance) -> Result<()>;

    /// Drop a collection and any alias pointing at it.
    ///
    /// Returns [`RagError::CollectionNotFound`] when there is nothing to drop.
    fn delete_collection(&self, name: &str) -> Result<()>;

    /// Add points to an unsealed collection. All-or-nothing per call.
    fn insert(&self, collection: &str, points: Vec<IndexedVector>) -> Result<()>;

    /// Finish a collection: no more inserts, searches allowed.
    fn seal(&self, collection: &str) -> Result<()>;

    /// Atomically point `alias` at `collection`, returning the previous target.
    fn point_alias(&self, alias: &str, collection: &str) -> Result<Option<String>>;

    /// Collection an alias currently points at.
    fn resolve_alias(&self, alias: &str) -> Option<String>;

    /// Top `k` points by cosine similarity, most similar first.
    ///
    /// `collection` may be a collection name or an alias.
    fn search(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredPoint>>;

    /// Number of stored points. Accepts aliases.
    fn len(&self, collection: &str) -> Result<usize>;
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in `[-1, 1]`; `0.0` for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    let denom = norm_a * norm_b;
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// L2-normalised copy of `v`; zero vectors are returned unchanged.
fn unit(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

struct Collection {
    dimension: usize,
    distance: Distance,
    hnsw: HNSWIndex<f32, usize>,
    payloads: HashMap<usize, String>,
    sealed: bool,
}

impl Collection {
    fn new(dimension: usize, distance: Distance) -> Self {
        Self {
            dimension,
            distance,
            hnsw: HNSWIndex::new(dimension, &HNSWParams::default()),
            payloads: HashMap::new(),
            sealed: false,
        }
    }
}

type SharedCollection = Arc<RwLock<Collection>>;

/// In-process index: one HNSW graph per collection.
///
/// Lock order is always `aliases` before `collections` before a single
/// collection.
#[derive(Default)]
pub struct HnswVectorIndex {
    aliases: RwLock<HashMap<String, String>>,
    collections: RwLock<HashMap<String, SharedCollection>>,
}

fn read<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| RagError::index(what, "lock poisoned"))
}

fn write<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| RagError::index(what, "lock poisoned"))
}

impl HnswVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Look up `name` (alias first) and take a handle on the collection.
    ///
    /// Both maps are read under one alias guard, so a concurrent repoint and
    /// delete cannot slip between resolving and fetching.
    fn handle(&self, name: &str) -> Result<SharedCollection> {
        let aliases = read(&self.aliases, name)?;
        let target = aliases.get(name).map(String::as_str).unwrap_or(name);
        let collections = read(&self.collections, target)?;
        collections
            .get(target)
            .cloned()
            .ok_or_else(|| RagError::CollectionNotFound(name.to_string()))
    }
}

impl VectorIndex for HnswVectorIndex {
    fn create_collection(&self, name: &str, dimension: usize, distance: Distance) -> Result<()> {
        if dimension == 0 {
            return Err(RagError::index(name, "dimension must be positive"));
        }
        let mut collections = write(&self.collections, name)?;
        if collections.contains_key(name) {
            return Err(RagError::index(name, "collection already exists"));
        }
        collections.insert(
            name.to_string(),
            Arc::new(RwLock::new(Collection::new(dimension, distance))),
        );
        info!(collection = name, dimension, ?distance, "collection created");
        Ok(())
    }

    fn delete_collection(&self, name: &str) -> Result<()> {
        let mut aliases = write(&self.aliases, name)?;
        let mut collections = write(&self.collections, name)?;
        if collections.remove(name).is_none() {
            return Err(RagError::CollectionNotFound(name.to_string()));
        }
        aliases.retain(|_, target| target != name);
        info!(collection = name, "collection deleted");
        Ok(())
    }

    fn insert(&self, collection: &str, points: Vec<IndexedVector>) -> Result<()> {
        let handle = self.handle(collection)?;
        let mut coll = write(&handle, collection)?;

        if coll.sealed {
            return Err(RagError::index(collection, "collection is sealed"));
        }
        for point in &points {
            if point.vector.len() != coll.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: coll.dimension,
                    actual: point.vector.len(),
                });
            }
            if coll.payloads.contains_key(&point.id) {
                return Err(RagError::index(
                    collection,
                    format!("duplicate point id {}", point.id),
                ));
            }
        }

        let count = points.len();
        for IndexedVector {
            id,
            vector,
            payload,
        } in points
        {
            coll.hnsw
                .add(&unit(&vector), id)
                .map_err(|e| RagError::index(collection, format!("add failed: {e}")))?;
            coll.payloads.insert(id, payload);
        }
        debug!(collection, count, total = coll.payloads.len(), "points inserted");
        Ok(())
    }

    fn seal(&self, collection: &str) -> Result<()> {
        let handle = self.handle(collection)?;
        let mut coll = write(&handle, collection)?;
        if coll.sealed {
            return Ok(());
        }
        if !coll.payloads.is_empty() {
            let metric = Metric::from(coll.distance);
            coll.hnsw
                .build(metric)
                .map_err(|e| RagError::index(collection, format!("build failed: {e}")))?;
        }
        coll.sealed = true;
        info!(collection, points = coll.payloads.len(), "collection sealed");
        Ok(())
    }

    fn point_alias(&self, alias: &str, collection: &str) -> Result<Option<String>> {
        let mut aliases = write(&self.aliases, alias)?;
        let collections = read(&self.collections, collection)?;
        let sealed = match collections.get(collection) {
            Some(handle) => read(handle, collection)?.sealed,
            None => return Err(RagError::CollectionNotFound(collection.to_string())),
        };
        if !sealed {
            return Err(RagError::index(collection, "cannot alias an unsealed collection"));
        }
        if collections.contains_key(alias) {
            return Err(RagError::index(alias, "alias shadows an existing collection"));
        }
        let previous = aliases.insert(alias.to_string(), collection.to_string());
        info!(alias, collection, ?previous, "alias repointed");
        Ok(previous)
    }

    fn resolve_alias(&self, alias: &str) -> Option<String> {
        self.aliases.read().ok()?.get(alias).cloned()
    }

    fn search(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredPoint>> {
        let handle = self.handle(collection)?;
        let coll = read(&handle, collection)?;

        if !coll.sealed {
            return Err(RagError::index(collection, "collection is still being built"));
        }
        if vector.len() != coll.dimension {
            return Err(RagError::DimensionMismatch {
                expected: coll.dimension,
                actual: vector.len(),
            });
        }
        if k == 0 || coll.payloads.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<ScoredPoint> = coll
            .hnsw
            .search_nodes(&unit(vector), k)
            .into_iter()
            .filter_map(|(node, _distance): (Node<f32, usize>, f32)| {
                let id = (*node.idx())?;
                let payload = coll.payloads.get(&id)?.clone();
                Some(ScoredPoint {
                    id,
                    payload,
                    score: cosine_similarity(vector, node.vectors()),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self, collection: &str) -> Result<usize> {
        let handle = self.handle(collection)?;
        let coll = read(&handle, collection)?;
        Ok(coll.payloads.len())
    }
}
