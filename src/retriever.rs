//! Query-time lookup of the passages most similar to a question.

use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::embedding::{Embedder, embed_blocking};
use crate::error::{RagError, Result};
use crate::index::VectorIndex;

pub struct Retriever<E: ?Sized, I: ?Sized> {
    embedder: Arc<E>,
    index: Arc<I>,
    collection: String,
    embed_timeout: Duration,
}

impl<E, I> Retriever<E, I>
where
    E: Embedder + ?Sized + 'static,
    I: VectorIndex + ?Sized,
{
    /// `collection` may be a collection name or an alias.
    pub fn new(
        embedder: Arc<E>,
        index: Arc<I>,
        collection: impl Into<String>,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            collection: collection.into(),
            embed_timeout,
        }
    }

    /// Up to `k` passages, most similar first.
    ///
    /// # Errors
    /// Embedding failures and timeouts, a missing collection, or a search
    /// error from the index.
    pub async fn try_retrieve(&self, query: &str, k: usize) -> Result<Vec<String>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let texts = Arc::new(vec![query.to_string()]);
        let vector = embed_blocking(Arc::clone(&self.embedder), texts, self.embed_timeout)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::provider("embedding", "no vector for query"))?;

        let hits = self.index.search(&self.collection, &vector, k)?;
        debug!(
            collection = %self.collection,
            k,
            hits = hits.len(),
            top_score = hits.first().map(|h| h.score),
            "retrieved"
        );
        Ok(hits.into_iter().map(|hit| hit.payload).collect())
    }

    /// Like [`try_retrieve`](Self::try_retrieve), but any failure is logged
    /// and yields no passages.
    pub async fn retrieve(&self, query: &str, k: usize) -> Vec<String> {
        match self.try_retrieve(query, k).await {
            Ok(passages) => passages,
            Err(e) => {
                warn!(collection = %self.collection, error = %e, "retrieval failed; continuing without context");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Distance, HnswVectorIndex, IndexedVector};
    use crate::testing::{StallingEmbedder, TableEmbedder};

    fn seeded_index() -> Arc<HnswVectorIndex> {
        let index = Arc::new(HnswVectorIndex::new());
        index.create_collection("osd", 2, Distance::Cosine).unwrap();
        index
            .insert(
                "osd",
                vec![
                    IndexedVector { id: 0, vector: vec![1.0, 0.0], payload: "doc1".into() },
                    IndexedVector { id: 1, vector: vec![0.9, 0.1], payload: "doc2".into() },
                    IndexedVector { id: 2, vector: vec![0.0, 1.0], payload: "doc3".into() },
                ],
            )
            .unwrap();
        index.seal("osd").unwrap();
        index
    }

    fn retriever(index: Arc<HnswVectorIndex>) -> Retriever<TableEmbedder, HnswVectorIndex> {
        let embedder = TableEmbedder::new(&[("bone loss", vec![1.0, 0.0]), ("plants", vec![0.0, 1.0])]);
        Retriever::new(Arc::new(embedder), index, "osd", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn returns_nearest_passages_in_order() {
        let retriever = retriever(seeded_index());

        assert_eq!(retriever.retrieve("bone loss", 2).await, vec!["doc1", "doc2"]);
        assert_eq!(retriever.retrieve("plants", 1).await, vec!["doc3"]);
    }

    #[tokio::test]
    async fn k_larger_than_collection_returns_everything() {
        let passages = retriever(seeded_index()).retrieve("bone loss", 10).await;
        assert_eq!(passages.len(), 3);
        assert_eq!(passages[0], "doc1");
    }

    #[tokio::test]
    async fn zero_k_skips_embedding() {
        // "unknown" would fail to embed.
        let passages = retriever(seeded_index()).try_retrieve("unknown", 0).await.unwrap();
        assert!(passages.is_empty());
    }

    #[tokio::test]
    async fn missing_collection_degrades_to_empty() {
        let retriever = retriever(Arc::new(HnswVectorIndex::new()));

        assert!(matches!(
            retriever.try_retrieve("bone loss", 3).await,
            Err(RagError::CollectionNotFound(_))
        ));
        assert!(retriever.retrieve("bone loss", 3).await.is_empty());
    }

    #[tokio::test]
    async fn embedding_timeout_degrades_to_empty() {
        let index = Arc::new(HnswVectorIndex::new());
        let retriever = Retriever::new(
            Arc::new(StallingEmbedder::new(Duration::from_millis(300))),
            index,
            "osd",
            Duration::from_millis(20),
        );

        assert!(matches!(
            retriever.try_retrieve("slow", 3).await,
            Err(RagError::Timeout { .. })
        ));
        assert!(retriever.retrieve("slow", 3).await.is_empty());
    }
}
