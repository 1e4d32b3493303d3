//! Bounded-memory traversal of the hosts matching a predicate.

mod cursor;

pub use cursor::{ScanCursor, ScanOrder};

use staleward_model::HostRecord;
use tracing::{debug, trace};

use crate::error::ChunkFetchError;
use crate::staleness::HostPredicate;
use crate::storage::{ChunkRequest, HostSession};

pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Pulls matching hosts one chunk at a time in `(tenant_id, host_id)`
/// order. At most `chunk_size` records are held per chunk. Once the scan
/// ends or fails no further chunk is requested.
#[derive(Debug, Clone)]
pub struct ChunkedScanner {
    predicate: HostPredicate,
    chunk_size: usize,
    cursor: Option<ScanCursor>,
    chunks: usize,
    finished: bool,
}

impl ChunkedScanner {
    pub fn new(predicate: HostPredicate, chunk_size: usize) -> Self {
        let finished = predicate.is_never();
        Self {
            predicate,
            chunk_size: chunk_size.max(1),
            cursor: None,
            chunks: 0,
            finished,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunks_fetched(&self) -> usize {
        self.chunks
    }

    pub fn cursor(&self) -> Option<&ScanCursor> {
        self.cursor.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next non-empty chunk, or `None` at end of scan.
    pub async fn next_chunk(
        &mut self,
        session: &mut dyn HostSession,
    ) -> Result<Option<Vec<HostRecord>>, ChunkFetchError> {
        if self.finished {
            return Ok(None);
        }
        let chunk = self.chunks + 1;
        let request = ChunkRequest {
            predicate: self.predicate.clone(),
            order: ScanOrder::TenantThenHost,
            limit: self.chunk_size,
            after: self.cursor.clone(),
        };

        let page = match session.query(&request).await {
            Ok(page) => page,
            Err(source) => {
                self.finished = true;
                return Err(ChunkFetchError::Storage { chunk, source });
            }
        };

        if page.records.len() > self.chunk_size {
            self.finished = true;
            return Err(ChunkFetchError::Oversized {
                chunk,
                returned: page.records.len(),
                limit: self.chunk_size,
            });
        }
        if let Err(err) = self.check_order(chunk, &page.records) {
            self.finished = true;
            return Err(err);
        }

        let Some(last) = page.records.last() else {
            debug!(chunks = self.chunks, "scan exhausted");
            self.finished = true;
            return Ok(None);
        };
        self.cursor = Some(ScanCursor::from_record(last));
        self.chunks = chunk;
        if page.next.is_none() {
            self.finished = true;
        }
        trace!(
            chunk,
            records = page.records.len(),
            cursor = ?self.cursor,
            "fetched chunk"
        );
        Ok(Some(page.records))
    }

    fn check_order(
        &self,
        chunk: usize,
        records: &[HostRecord],
    ) -> Result<(), ChunkFetchError> {
        let mut previous = self.cursor.clone();
        for record in records {
            if let Some(prev) = &previous
                && !prev.precedes(record)
            {
                return Err(ChunkFetchError::OutOfOrder {
                    chunk,
                    tenant_id: record.tenant_id.clone(),
                    host_id: record.id,
                });
            }
            previous = Some(ScanCursor::from_record(record));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{HostStore, MemoryHostStore};
    use chrono::DateTime;
    use staleward_model::{HostId, TenantId};
    use std::collections::BTreeSet;

    fn hosts(count: usize) -> Vec<HostRecord> {
        (0..count)
            .map(|i| {
                HostRecord::new(
                    HostId::new(),
                    TenantId::new(format!("org-{}", i % 3)).unwrap(),
                    DateTime::from_timestamp(1_000 + i as i64, 0).unwrap(),
                    "puptoo",
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn chunk_size_three_over_twenty_five_hosts() {
        let store = MemoryHostStore::new();
        store.extend_hosts(hosts(25)).await;
        let mut session = store.open_session().await.unwrap();
        let mut scanner = ChunkedScanner::new(HostPredicate::Always, 3);

        let mut sizes = Vec::new();
        let mut seen = BTreeSet::new();
        while let Some(chunk) = scanner.next_chunk(session.as_mut()).await.unwrap()
        {
            sizes.push(chunk.len());
            for host in chunk {
                assert!(seen.insert(host.id), "host returned twice");
            }
        }
        assert_eq!(sizes, vec![3, 3, 3, 3, 3, 3, 3, 3, 1]);
        assert_eq!(seen.len(), 25);
        assert_eq!(scanner.chunks_fetched(), 9);
        // The short final page ends the scan without an extra query.
        assert_eq!(store.query_count().await, 9);
        assert!(scanner.next_chunk(session.as_mut()).await.unwrap().is_none());
        assert_eq!(store.query_count().await, 9);
    }

    #[tokio::test]
    async fn exact_multiple_ends_on_empty_page() {
        let store = MemoryHostStore::new();
        store.extend_hosts(hosts(6)).await;
        let mut session = store.open_session().await.unwrap();
        let mut scanner = ChunkedScanner::new(HostPredicate::Always, 3);

        let mut chunks = 0;
        while scanner.next_chunk(session.as_mut()).await.unwrap().is_some() {
            chunks += 1;
        }
        assert_eq!(chunks, 2);
        assert_eq!(store.query_count().await, 3);
    }

    #[tokio::test]
    async fn mixed_case_tenants_resume_in_byte_order() {
        let store = MemoryHostStore::new();
        let tenants = ["a", "B", "ab", "a-c", "Z", "a_b"];
        let records: Vec<_> = tenants
            .iter()
            .flat_map(|tenant| {
                (0..2).map(move |i| {
                    HostRecord::new(
                        HostId::new(),
                        TenantId::new(*tenant).unwrap(),
                        DateTime::from_timestamp(1_000 + i, 0).unwrap(),
                        "puptoo",
                    )
                })
            })
            .collect();
        store.extend_hosts(records).await;
        let mut session = store.open_session().await.unwrap();
        let mut scanner = ChunkedScanner::new(HostPredicate::Always, 5);

        let mut order = Vec::new();
        while let Some(chunk) = scanner.next_chunk(session.as_mut()).await.unwrap()
        {
            order.extend(chunk.into_iter().map(|host| host.tenant_id));
        }
        let names: Vec<&str> = order.iter().map(TenantId::as_str).collect();
        assert_eq!(
            names,
            [
                "B", "B", "Z", "Z", "a", "a", "a-c", "a-c", "a_b", "a_b", "ab",
                "ab"
            ]
        );
    }

    #[tokio::test]
    async fn never_predicate_skips_storage() {
        let store = MemoryHostStore::new();
        store.extend_hosts(hosts(4)).await;
        let mut session = store.open_session().await.unwrap();
        let mut scanner = ChunkedScanner::new(HostPredicate::Never, 10);
        assert!(scanner.next_chunk(session.as_mut()).await.unwrap().is_none());
        assert_eq!(store.query_count().await, 0);
    }

    #[tokio::test]
    async fn fetch_error_stops_the_scan() {
        let store = MemoryHostStore::new();
        store.extend_hosts(hosts(10)).await;
        store.fail_query_at(2).await;
        let mut session = store.open_session().await.unwrap();
        let mut scanner = ChunkedScanner::new(HostPredicate::Always, 3);

        assert!(scanner.next_chunk(session.as_mut()).await.unwrap().is_some());
        let err = scanner.next_chunk(session.as_mut()).await.unwrap_err();
        assert!(matches!(err, ChunkFetchError::Storage { chunk: 2, .. }));
        assert!(scanner.next_chunk(session.as_mut()).await.unwrap().is_none());
        assert_eq!(store.query_count().await, 2);
    }
}
