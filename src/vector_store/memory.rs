//! In-memory store sharing the pool lifecycle of the PostgreSQL one, used to
//! exercise ingestion and lifecycle code without a database.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::models::image::{ImageRecord, NewImageRecord, SimilarImage};
use crate::vector_store::pool::{ManagedPool, PoolHandle, PoolPhase};
use crate::vector_store::utils::check_dimensions;
use crate::vector_store::{StoreError, VectorStore};

#[derive(Debug, Clone)]
pub struct StoredRow {
    pub id: i32,
    pub filename: String,
    pub filepath: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Default)]
pub struct Table {
    pub rows: Vec<StoredRow>,
    pub next_id: i32,
}

pub struct MemoryPool;

#[async_trait]
impl ManagedPool for MemoryPool {
    async fn close(&self) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub struct MemoryStore {
    pub table: Arc<Mutex<Table>>,
    pool: PoolHandle<MemoryPool>,
    dimensions: usize,
    /// Simulates an unreachable database for `bootstrap()`.
    pub unreachable: AtomicBool,
    /// Added latency per operation, to keep leases in flight.
    pub op_delay: Mutex<Option<Duration>>,
    pub insert_calls: AtomicUsize,
    pub bootstrap_calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    /// Pool phase observed by every operation while it held its lease.
    pub observed_phases: Mutex<Vec<PoolPhase>>,
}

impl MemoryStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table {
                rows: Vec::new(),
                next_id: 1,
            })),
            pool: PoolHandle::new(),
            dimensions,
            unreachable: AtomicBool::new(false),
            op_delay: Mutex::new(None),
            insert_calls: AtomicUsize::new(0),
            bootstrap_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            observed_phases: Mutex::new(Vec::new()),
        }
    }

    pub async fn bootstrapped(dimensions: usize) -> Arc<Self> {
        let store = Arc::new(Self::new(dimensions));
        store.bootstrap().await.unwrap();
        store
    }

    pub fn filepaths(&self) -> Vec<String> {
        let table = self.table.lock().unwrap();
        table.rows.iter().map(|r| r.filepath.clone()).collect()
    }

    /// Run `f` against the table while holding a pool lease.
    async fn with_lease<T>(&self, f: impl FnOnce(&mut Table) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let _lease = self.pool.lease().await?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.observed_phases.lock().unwrap().push(self.pool.phase());
        let delay = *self.op_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = {
            let mut table = self.table.lock().unwrap();
            f(&mut table)
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn bootstrap(&self) -> Result<(), StoreError> {
        self.bootstrap_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.pool.open_with(|| async { Ok(MemoryPool) }).await?;
        Ok(())
    }

    async fn insert_batch(&self, records: &[NewImageRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let dimensions = self.dimensions;
        let records = records.to_vec();
        self.with_lease(move |table| {
            check_dimensions(&records, dimensions)?;
            let mut inserted = 0;
            for record in records {
                if table.rows.iter().any(|r| r.filepath == record.filepath) {
                    continue;
                }
                let id = table.next_id;
                table.next_id += 1;
                table.rows.push(StoredRow {
                    id,
                    filename: record.filename,
                    filepath: record.filepath,
                    embedding: record.embedding,
                });
                inserted += 1;
            }
            Ok(inserted)
        })
        .await
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SimilarImage>, StoreError> {
        if query.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        let query = query.to_vec();
        self.with_lease(move |table| {
            let mut scored: Vec<(f64, &StoredRow)> = table
                .rows
                .iter()
                .map(|row| (cosine_similarity(&query, &row.embedding), row))
                .collect();
            scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.id.cmp(&b.1.id)));
            Ok(scored
                .into_iter()
                .take(top_k)
                .map(|(similarity, row)| SimilarImage {
                    id: row.id,
                    filename: row.filename.clone(),
                    filepath: row.filepath.clone(),
                    similarity,
                })
                .collect())
        })
        .await
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<ImageRecord>, StoreError> {
        self.with_lease(move |table| {
            Ok(table
                .rows
                .iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .map(|row| ImageRecord {
                    id: row.id,
                    filename: row.filename.clone(),
                    filepath: row.filepath.clone(),
                })
                .collect())
        })
        .await
    }

    async fn count(&self) -> Result<i64, StoreError> {
        self.with_lease(|table| Ok(table.rows.len() as i64)).await
    }

    async fn shutdown(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }

    fn pool_phase(&self) -> PoolPhase {
        self.pool.phase()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, embedding: Vec<f32>) -> NewImageRecord {
        let filename = path.rsplit('/').next().unwrap_or(path).to_string();
        NewImageRecord::new(filename, path, embedding)
    }

    #[tokio::test]
    async fn test_duplicate_filepath_kept_once() {
        let store = MemoryStore::bootstrapped(2).await;
        let first = store
            .insert_batch(&[record("a.jpg", vec![1.0, 0.0]), record("a.jpg", vec![0.0, 1.0])])
            .await
            .unwrap();
        let second = store.insert_batch(&[record("a.jpg", vec![0.5, 0.5])]).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(store.filepaths(), vec!["a.jpg"]);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let store = MemoryStore::bootstrapped(2).await;
        assert_eq!(store.insert_batch(&[]).await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_search_orders_by_cosine_similarity() {
        let store = MemoryStore::bootstrapped(2).await;
        store
            .insert_batch(&[
                record("A", vec![1.0, 0.0]),
                record("B", vec![0.0, 1.0]),
                record("C", vec![0.9, 0.1]),
            ])
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 2).await.unwrap();
        let paths: Vec<&str> = hits.iter().map(|h| h.filepath.as_str()).collect();
        assert_eq!(paths, vec!["A", "C"]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_search_results_bounded_and_sorted() {
        let store = MemoryStore::bootstrapped(3).await;
        let records: Vec<NewImageRecord> = (0..20)
            .map(|i| {
                let t = i as f32 / 20.0;
                record(&format!("img/{i}.png"), vec![1.0 - t, t, 0.25])
            })
            .collect();
        store.insert_batch(&records).await.unwrap();

        for k in [1, 5, 20, 50] {
            let hits = store.search(&[0.3, 0.7, 0.0], k).await.unwrap();
            assert!(hits.len() <= k);
            for pair in hits.windows(2) {
                assert!(pair[0].similarity >= pair[1].similarity);
            }
        }
    }

    #[tokio::test]
    async fn test_search_empty_store() {
        let store = MemoryStore::bootstrapped(2).await;
        assert!(store.search(&[1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_pages_by_id() {
        let store = MemoryStore::bootstrapped(1).await;
        let records: Vec<NewImageRecord> = (0..5).map(|i| record(&format!("{i}.jpg"), vec![1.0])).collect();
        store.insert_batch(&records).await.unwrap();

        let page = store.list(2, 1).await.unwrap();
        assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 3]);
        assert!(store.list(10, 99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operations_fail_after_shutdown_until_bootstrap() {
        let store = MemoryStore::bootstrapped(2).await;
        store.insert_batch(&[record("a.jpg", vec![1.0, 0.0])]).await.unwrap();
        store.shutdown().await.unwrap();

        assert!(matches!(store.count().await, Err(StoreError::Unavailable(_))));
        assert!(matches!(store.search(&[1.0, 0.0], 1).await, Err(StoreError::Unavailable(_))));
        assert!(matches!(
            store.insert_batch(&[record("b.jpg", vec![0.0, 1.0])]).await,
            Err(StoreError::Unavailable(_))
        ));

        store.bootstrap().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ids_never_reused() {
        let store = MemoryStore::bootstrapped(1).await;
        store.insert_batch(&[record("a", vec![1.0])]).await.unwrap();
        store.insert_batch(&[record("a", vec![1.0]), record("b", vec![1.0])]).await.unwrap();
        let ids: Vec<i32> = store.list(10, 0).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_overlapping_inserts() {
        let store = MemoryStore::bootstrapped(2).await;
        *store.op_delay.lock().unwrap() = Some(Duration::from_millis(1));

        // Task i writes p{i}..p{i+4}, so neighbouring tasks collide on four paths.
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let batch: Vec<NewImageRecord> = (i..i + 5)
                        .map(|j| record(&format!("p{j}"), vec![1.0, j as f32]))
                        .collect();
                    store.insert_batch(&batch).await.unwrap()
                })
            })
            .collect();

        let mut inserted = 0;
        for task in tasks {
            inserted += task.await.unwrap();
        }

        let mut paths = store.filepaths();
        let total = paths.len();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), total);
        assert_eq!(total, 12);
        assert_eq!(inserted, 12);
        assert_eq!(store.count().await.unwrap(), 12);
    }
}
