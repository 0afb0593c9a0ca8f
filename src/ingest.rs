//! # Corpus ingestion
//!
//! Every ingestion run is a new **epoch**: the corpus is embedded batch by
//! batch into a brand-new collection `<alias>__epoch<N>`, which is sealed
//! and only then swapped in behind the live alias. The previous epoch is
//! deleted afterwards. Queries keep hitting the old epoch until the swap,
//! so they never see a collection that is missing or half filled.
//!
//! ```text
//! records ─► chunks(batch_size) ─► canonical text (rayon) ─► embed (1 call) ─► insert
//!                                                                               │
//!                           seal ─► point alias ─► delete previous epoch ◄──────┘
//! ```
//!
//! Point ids are positions in the input (`batch_offset + position_in_batch`),
//! so they are stable for an unchanged corpus and meaningless across
//! corpora. Each batch's texts and vectors are dropped as soon as the batch
//! is stored, so peak memory tracks the batch size rather than the corpus.
//!
//! A failing batch (embedding error, timeout, rejected insert) is logged and
//! skipped; the run carries on and the report says what was lost.

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::corpus::CorpusRecord;
use crate::embedding::{Embedder, embed_blocking};
use crate::error::{RagError, Result};
use crate::index::{Distance, IndexedVector, VectorIndex};

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Collection the alias now points at.
    pub collection: String,
    pub epoch: u64,
    /// Records offered.
    pub records: usize,
    pub batches: usize,
    pub embed_calls: usize,
    /// Points stored in the new collection.
    pub indexed: usize,
    pub skipped_batches: usize,
    pub skipped_records: usize,
}

/// Builds collection epochs from a corpus.
pub struct Ingestor<E: ?Sized, I: ?Sized> {
    embedder: Arc<E>,
    index: Arc<I>,
    alias: String,
    embed_timeout: Duration,
    epoch: AtomicU64,
    // One rebuild at a time.
    running: Mutex<()>,
}

impl<E, I> Ingestor<E, I>
where
    E: Embedder + ?Sized + 'static,
    I: VectorIndex + ?Sized,
{
    pub fn new(
        embedder: Arc<E>,
        index: Arc<I>,
        alias: impl Into<String>,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            alias: alias.into(),
            embed_timeout,
            epoch: AtomicU64::new(0),
            running: Mutex::new(()),
        }
    }

    /// Name readers use.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Collection name of a given epoch.
    pub fn epoch_collection(&self, epoch: u64) -> String {
        format!("{}__epoch{}", self.alias, epoch)
    }

    /// Rebuild the index from `records`.
    ///
    /// # Errors
    /// Only whole-run failures are returned: a zero `batch_size`, or the index
    /// refusing to create, seal or alias the new collection. In those cases
    /// the live alias is left untouched.
    pub async fn ingest(&self, records: &[CorpusRecord], batch_size: usize) -> Result<IngestReport> {
        if batch_size == 0 {
            return Err(RagError::Config("batch_size must be at least 1".into()));
        }

        let _running = self.running.lock().await;
        let epoch = self.next_epoch();
        let staging = self.epoch_collection(epoch);

        // Leftover from an aborted run with the same epoch name. Never the
        // live one: the next epoch is always past it.
        ignore_missing(self.index.delete_collection(&staging))?;
        self.index
            .create_collection(&staging, self.embedder.dimension(), Distance::Cosine)?;

        let mut report = IngestReport {
            collection: staging.clone(),
            epoch,
            records: records.len(),
            batches: records.len().div_ceil(batch_size),
            ..IngestReport::default()
        };

        info!(
            collection = %staging,
            records = report.records,
            batches = report.batches,
            batch_size,
            "ingestion started"
        );

        let progress = ProgressBar::new(report.batches as u64);
        progress.set_style(
            ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} batches")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        progress.set_message("Processing and storing data");

        for (batch_no, batch) in records.chunks(batch_size).enumerate() {
            self.ingest_batch(&staging, batch_no, batch_no * batch_size, batch, &mut report)
                .await;
            progress.inc(1);
        }
        progress.finish_and_clear();

        if let Err(e) = self.publish(&staging) {
            error!(collection = %staging, error = %e, "publishing epoch failed");
            if let Err(cleanup) = ignore_missing(self.index.delete_collection(&staging)) {
                warn!(collection = %staging, error = %cleanup, "could not drop failed epoch");
            }
            return Err(e);
        }

        info!(
            collection = %staging,
            indexed = report.indexed,
            skipped_batches = report.skipped_batches,
            skipped_records = report.skipped_records,
            "ingestion finished"
        );
        Ok(report)
    }

    /// One past both our own counter and the epoch the alias serves, so an
    /// index shared with another ingestor never gets its live epoch reused.
    fn next_epoch(&self) -> u64 {
        let live = self
            .index
            .resolve_alias(&self.alias)
            .and_then(|target| self.parse_epoch(&target))
            .unwrap_or(0);
        let epoch = self.epoch.load(Ordering::SeqCst).max(live) + 1;
        self.epoch.store(epoch, Ordering::SeqCst);
        epoch
    }

    fn parse_epoch(&self, collection: &str) -> Option<u64> {
        collection
            .strip_prefix(self.alias.as_str())?
            .strip_prefix("__epoch")?
            .parse()
            .ok()
    }

    /// Seal `staging`, swap it in and retire whatever was live before.
    fn publish(&self, staging: &str) -> Result<()> {
        self.index.seal(staging)?;

        // A plain collection squatting on the alias name goes first.
        ignore_missing(self.index.delete_collection(&self.alias))?;

        let previous = self.index.point_alias(&self.alias, staging)?;
        if let Some(previous) = previous.filter(|p| p != staging) {
            if let Err(e) = ignore_missing(self.index.delete_collection(&previous)) {
                warn!(collection = %previous, error = %e, "could not drop previous epoch");
            }
        }
        Ok(())
    }

    async fn ingest_batch(
        &self,
        collection: &str,
        batch_no: usize,
        offset: usize,
        batch: &[CorpusRecord],
        report: &mut IngestReport,
    ) {
        let canonical: Vec<(usize, Result<String>)> = batch
            .par_iter()
            .enumerate()
            .map(|(position, record)| (offset + position, record.canonical_text()))
            .collect();

        let mut ids = Vec::with_capacity(canonical.len());
        let mut texts = Vec::with_capacity(canonical.len());
        for (id, text) in canonical {
            match text {
                Ok(text) => {
                    ids.push(id);
                    texts.push(text);
                }
                Err(e) => {
                    warn!(id, error = %e, "skipping record");
                    report.skipped_records += 1;
                }
            }
        }
        if texts.is_empty() {
            return;
        }

        let texts = Arc::new(texts);
        report.embed_calls += 1;
        let vectors =
            match embed_blocking(Arc::clone(&self.embedder), Arc::clone(&texts), self.embed_timeout)
                .await
            {
                Ok(vectors) => vectors,
                Err(e) => {
                    error!(batch = batch_no, error = %e, "error embedding batch; skipping");
                    report.skipped_batches += 1;
                    report.skipped_records += ids.len();
                    return;
                }
            };
        let texts = Arc::try_unwrap(texts).unwrap_or_else(|shared| (*shared).clone());

        let points: Vec<IndexedVector> = ids
            .into_iter()
            .zip(vectors)
            .zip(texts)
            .map(|((id, vector), payload)| IndexedVector {
                id,
                vector,
                payload,
            })
            .collect();
        let count = points.len();

        match self.index.insert(collection, points) {
            Ok(()) => {
                report.indexed += count;
                debug!(batch = batch_no, count, "batch stored");
            }
            Err(e) => {
                error!(batch = batch_no, error = %e, "error uploading batch; skipping");
                report.skipped_batches += 1;
                report.skipped_records += count;
            }
        }
    }
}

/// Treat "collection not found" as success.
fn ignore_missing(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::HnswVectorIndex;
    use crate::testing::{CountingEmbedder, StallingEmbedder};
    use serde_json::json;

    fn records(values: &[serde_json::Value]) -> Vec<CorpusRecord> {
        values
            .iter()
            .cloned()
            .map(|v| CorpusRecord::try_from(v).unwrap())
            .collect()
    }

    fn ingestor(
        embedder: Arc<CountingEmbedder>,
        index: Arc<HnswVectorIndex>,
    ) -> Ingestor<CountingEmbedder, HnswVectorIndex> {
        Ingestor::new(embedder, index, "studies", Duration::from_secs(5))
    }

    /// Ids stored in the live collection, found by searching with each payload.
    fn live_ids(index: &HnswVectorIndex, embedder: &CountingEmbedder, corpus: &[CorpusRecord]) -> Vec<usize> {
        let mut ids: Vec<usize> = corpus
            .iter()
            .map(|r| {
                let text = r.canonical_text().unwrap();
                let hits = index
                    .search("studies", &embedder.vector_for(&text), corpus.len())
                    .unwrap();
                hits.into_iter().find(|h| h.payload == text).unwrap().id
            })
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn three_records_in_batches_of_two() {
        let embedder = Arc::new(CountingEmbedder::new(8));
        let index = Arc::new(HnswVectorIndex::new());
        let corpus = records(&[json!({"a": 1}), json!({"a": 2}), json!({"a": 3})]);

        let report = ingestor(embedder.clone(), index.clone())
            .ingest(&corpus, 2)
            .await
            .unwrap();

        assert_eq!(embedder.calls(), vec![2, 1]);
        assert_eq!(report.embed_calls, 2);
        assert_eq!(report.batches, 2);
        assert_eq!(report.indexed, 3);
        assert_eq!(index.len("studies").unwrap(), 3);
        assert_eq!(live_ids(&index, &embedder, &corpus), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn embed_calls_are_ceil_n_over_b() {
        for (n, b) in [(0usize, 3usize), (1, 1), (7, 3), (9, 3), (10, 100)] {
            let embedder = Arc::new(CountingEmbedder::new(8));
            let index = Arc::new(HnswVectorIndex::new());
            let corpus = records(&(0..n).map(|i| json!({"i": i})).collect::<Vec<_>>());

            let report = ingestor(embedder.clone(), index.clone())
                .ingest(&corpus, b)
                .await
                .unwrap();

            assert_eq!(embedder.calls().len(), n.div_ceil(b), "n={n} b={b}");
            assert_eq!(embedder.calls().iter().sum::<usize>(), n);
            assert_eq!(report.indexed, n);
            assert_eq!(index.len("studies").unwrap(), n);
        }
    }

    #[tokio::test]
    async fn reingestion_is_idempotent() {
        let embedder = Arc::new(CountingEmbedder::new(8));
        let index = Arc::new(HnswVectorIndex::new());
        let ingestor = ingestor(embedder.clone(), index.clone());
        let corpus = records(&[json!({"a": "x"}), json!({"a": "yy"}), json!({"a": "zzz"})]);

        let first = ingestor.ingest(&corpus, 2).await.unwrap();
        let first_ids = live_ids(&index, &embedder, &corpus);
        let second = ingestor.ingest(&corpus, 2).await.unwrap();
        let second_ids = live_ids(&index, &embedder, &corpus);

        assert_eq!(first.indexed, second.indexed);
        assert_eq!(first_ids, second_ids);
        assert_eq!(second.epoch, first.epoch + 1);

        // The previous epoch is gone; only the live one remains.
        assert_eq!(index.collection_names(), vec![second.collection.clone()]);
        assert_eq!(index.resolve_alias("studies"), Some(second.collection));
    }

    #[tokio::test]
    async fn failed_batch_is_skipped() {
        let embedder = Arc::new(CountingEmbedder::new(8).failing_on(2));
        let index = Arc::new(HnswVectorIndex::new());
        let corpus = records(&(0..5).map(|i| json!({"i": i})).collect::<Vec<_>>());

        let report = ingestor(embedder.clone(), index.clone())
            .ingest(&corpus, 2)
            .await
            .unwrap();

        assert_eq!(embedder.calls(), vec![2, 2, 1]);
        assert_eq!(report.skipped_batches, 1);
        assert_eq!(report.skipped_records, 2);
        assert_eq!(report.indexed, 3);
        assert_eq!(index.len("studies").unwrap(), 3);
    }

    #[tokio::test]
    async fn timed_out_batch_is_skipped() {
        let index = Arc::new(HnswVectorIndex::new());
        let ingestor = Ingestor::new(
            Arc::new(StallingEmbedder::new(Duration::from_millis(300))),
            index.clone(),
            "studies",
            Duration::from_millis(20),
        );
        let corpus = records(&[json!({"a": 1})]);

        let report = ingestor.ingest(&corpus, 10).await.unwrap();

        assert_eq!(report.skipped_batches, 1);
        assert_eq!(report.indexed, 0);
        // The new epoch is live even though it is empty.
        assert_eq!(index.len("studies").unwrap(), 0);
    }

    #[tokio::test]
    async fn ingestors_sharing_an_index_never_reuse_the_live_epoch() {
        let embedder = Arc::new(CountingEmbedder::new(8));
        let index = Arc::new(HnswVectorIndex::new());
        let first = ingestor(embedder.clone(), index.clone());
        let second = ingestor(embedder.clone(), index.clone());
        let corpus = records(&[json!({"a": 1}), json!({"a": 2})]);

        let a = first.ingest(&corpus, 2).await.unwrap();
        let b = second.ingest(&corpus, 2).await.unwrap();
        assert_eq!(a.epoch, 1);
        assert_eq!(b.epoch, 2);
        assert_eq!(index.resolve_alias("studies"), Some(b.collection.clone()));
        assert_eq!(index.len("studies").unwrap(), 2);

        // The first ingestor picks up after the live epoch, not its own counter.
        let c = first.ingest(&corpus, 2).await.unwrap();
        assert_eq!(c.epoch, 3);
        assert_eq!(index.collection_names(), vec![c.collection]);
    }

    #[test]
    fn parse_epoch_only_accepts_own_alias() {
        let ingestor = ingestor(
            Arc::new(CountingEmbedder::new(8)),
            Arc::new(HnswVectorIndex::new()),
        );
        assert_eq!(ingestor.parse_epoch("studies__epoch12"), Some(12));
        assert_eq!(ingestor.parse_epoch("other__epoch12"), None);
        assert_eq!(ingestor.parse_epoch("studies__epochx"), None);
    }

    #[tokio::test]
    async fn zero_batch_size_is_rejected() {
        let index = Arc::new(HnswVectorIndex::new());
        let result = ingestor(Arc::new(CountingEmbedder::new(8)), index.clone())
            .ingest(&records(&[json!({"a": 1})]), 0)
            .await;

        assert!(matches!(result, Err(RagError::Config(_))));
        assert!(index.collection_names().is_empty());
    }

    #[tokio::test]
    async fn stale_plain_collection_under_alias_name_is_replaced() {
        let index = Arc::new(HnswVectorIndex::new());
        index.create_collection("studies", 8, Distance::Cosine).unwrap();

        let report = ingestor(Arc::new(CountingEmbedder::new(8)), index.clone())
            .ingest(&records(&[json!({"a": 1})]), 10)
            .await
            .unwrap();

        assert_eq!(index.resolve_alias("studies"), Some(report.collection));
        assert_eq!(index.len("studies").unwrap(), 1);
    }
}
