use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use staleward_model::{HostId, HostRecord, TenantId};
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::scan::ScanOrder;

use super::{
    ChunkPage, ChunkRequest, HostSession, HostStore, HostUpdate, PolicyRecord,
    StorageResult,
};

/// In-process host store. Keeps hosts in scan order and records session
/// lifecycle and writes so tests can assert on them.
#[derive(Clone, Default)]
pub struct MemoryHostStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    hosts: BTreeMap<(TenantId, HostId), HostRecord>,
    policies: Vec<PolicyRecord>,
    writes: Vec<HostUpdate>,
    sessions_opened: usize,
    sessions_closed: usize,
    queries: usize,
    fail_open: bool,
    fail_policy_loads: bool,
    fail_query_at: Option<usize>,
    fail_writes_for: BTreeSet<HostId>,
}

impl fmt::Debug for MemoryHostStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("MemoryHostStore");
        match self.state.try_lock() {
            Ok(state) => {
                debug
                    .field("hosts", &state.hosts.len())
                    .field("policies", &state.policies.len())
                    .field("sessions_opened", &state.sessions_opened)
                    .field("sessions_closed", &state.sessions_closed);
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl MemoryHostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_host(&self, host: HostRecord) {
        let mut state = self.state.lock().await;
        state.hosts.insert((host.tenant_id.clone(), host.id), host);
    }

    pub async fn extend_hosts(&self, hosts: impl IntoIterator<Item = HostRecord>) {
        let mut state = self.state.lock().await;
        for host in hosts {
            state.hosts.insert((host.tenant_id.clone(), host.id), host);
        }
    }

    pub async fn hosts(&self) -> Vec<HostRecord> {
        self.state.lock().await.hosts.values().cloned().collect()
    }

    /// Stores a policy row verbatim, bypassing validation.
    pub async fn put_policy_record(&self, record: PolicyRecord) {
        self.state.lock().await.policies.push(record);
    }

    pub async fn policy_records(&self) -> Vec<PolicyRecord> {
        self.state.lock().await.policies.clone()
    }

    pub async fn writes(&self) -> Vec<HostUpdate> {
        self.state.lock().await.writes.clone()
    }

    pub async fn sessions_opened(&self) -> usize {
        self.state.lock().await.sessions_opened
    }

    pub async fn sessions_closed(&self) -> usize {
        self.state.lock().await.sessions_closed
    }

    pub async fn query_count(&self) -> usize {
        self.state.lock().await.queries
    }

    pub async fn fail_open(&self, fail: bool) {
        self.state.lock().await.fail_open = fail;
    }

    pub async fn fail_policy_loads(&self, fail: bool) {
        self.state.lock().await.fail_policy_loads = fail;
    }

    /// Make the `n`th query (1-based, counted across sessions) fail.
    pub async fn fail_query_at(&self, n: usize) {
        self.state.lock().await.fail_query_at = Some(n);
    }

    pub async fn fail_write_for(&self, host_id: HostId) {
        self.state.lock().await.fail_writes_for.insert(host_id);
    }
}

#[async_trait]
impl HostStore for MemoryHostStore {
    async fn open_session(&self) -> StorageResult<Box<dyn HostSession>> {
        let mut state = self.state.lock().await;
        if state.fail_open {
            return Err(StorageError::Unavailable(
                "memory store configured to refuse sessions".into(),
            ));
        }
        state.sessions_opened += 1;
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<MemoryState>>,
    closed: bool,
}

impl MemorySession {
    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::SessionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl HostSession for MemorySession {
    async fn load_all_policies(&mut self) -> StorageResult<Vec<PolicyRecord>> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        if state.fail_policy_loads {
            return Err(StorageError::Unavailable(
                "policy table unreachable".into(),
            ));
        }
        Ok(state.policies.clone())
    }

    async fn load_policy(
        &mut self,
        tenant_id: &TenantId,
    ) -> StorageResult<Option<PolicyRecord>> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        Ok(state
            .policies
            .iter()
            .find(|record| record.tenant_id == tenant_id.as_str())
            .cloned())
    }

    async fn upsert_policy(&mut self, record: &PolicyRecord) -> StorageResult<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        state
            .policies
            .retain(|existing| existing.tenant_id != record.tenant_id);
        state.policies.push(record.clone());
        Ok(())
    }

    async fn delete_policy(
        &mut self,
        tenant_id: &TenantId,
    ) -> StorageResult<bool> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let before = state.policies.len();
        state
            .policies
            .retain(|existing| existing.tenant_id != tenant_id.as_str());
        Ok(state.policies.len() != before)
    }

    async fn query(&mut self, request: &ChunkRequest) -> StorageResult<ChunkPage> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        state.queries += 1;
        if state.fail_query_at == Some(state.queries) {
            return Err(StorageError::Unavailable(format!(
                "injected failure on query {}",
                state.queries
            )));
        }

        // The map key is already `(tenant_id, host_id)` in byte order.
        let lower = match (request.order, &request.after) {
            (ScanOrder::TenantThenHost, Some(cursor)) => Bound::Excluded((
                cursor.tenant_id.clone(),
                cursor.host_id,
            )),
            (ScanOrder::TenantThenHost, None) => Bound::Unbounded,
        };
        let records: Vec<HostRecord> = state
            .hosts
            .range((lower, Bound::Unbounded))
            .map(|(_, host)| host)
            .filter(|host| request.predicate.matches(host))
            .take(request.limit)
            .cloned()
            .collect();

        let next = if records.len() == request.limit {
            records.last().map(crate::scan::ScanCursor::from_record)
        } else {
            None
        };
        Ok(ChunkPage { records, next })
    }

    async fn write_host(&mut self, update: &HostUpdate) -> StorageResult<()> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        if state.fail_writes_for.contains(&update.id) {
            return Err(StorageError::Unavailable(format!(
                "injected write failure for host {}",
                update.id
            )));
        }
        let key = (update.tenant_id.clone(), update.id);
        let Some(host) = state.hosts.get_mut(&key) else {
            return Err(StorageError::HostNotFound(update.id));
        };
        host.groups = update.groups.clone();
        host.per_reporter_staleness = update.per_reporter_staleness.clone();
        state.writes.push(update.clone());
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<()> {
        if !self.closed {
            self.closed = true;
            self.state.lock().await.sessions_closed += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ScanCursor;
    use crate::staleness::HostPredicate;
    use chrono::DateTime;

    fn host(tenant: &str) -> HostRecord {
        HostRecord::new(
            HostId::new(),
            TenantId::new(tenant).unwrap(),
            DateTime::from_timestamp(1_000, 0).unwrap(),
            "puptoo",
        )
    }

    fn request(limit: usize, after: Option<ScanCursor>) -> ChunkRequest {
        ChunkRequest {
            predicate: HostPredicate::Always,
            order: ScanOrder::TenantThenHost,
            limit,
            after,
        }
    }

    #[tokio::test]
    async fn pages_follow_tenant_then_host_order() {
        let store = MemoryHostStore::new();
        store
            .extend_hosts([host("org-b"), host("org-a"), host("org-b")])
            .await;
        let mut session = store.open_session().await.unwrap();

        let first = session.query(&request(2, None)).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.records[0].tenant_id.as_str(), "org-a");
        let cursor = first.next.clone().unwrap();

        let second = session.query(&request(2, Some(cursor))).await.unwrap();
        assert_eq!(second.records.len(), 1);
        assert!(second.next.is_none());
        assert!(first.records[1].scan_key() < second.records[0].scan_key());
    }

    #[tokio::test]
    async fn closed_session_rejects_queries_and_counts_once() {
        let store = MemoryHostStore::new();
        let mut session = store.open_session().await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();

        assert!(matches!(
            session.query(&request(1, None)).await,
            Err(StorageError::SessionClosed)
        ));
        assert_eq!(store.sessions_opened().await, 1);
        assert_eq!(store.sessions_closed().await, 1);
    }

    #[tokio::test]
    async fn write_to_unknown_host_fails() {
        let store = MemoryHostStore::new();
        let mut session = store.open_session().await.unwrap();
        let update = HostUpdate {
            id: HostId::new(),
            tenant_id: TenantId::new("org-a").unwrap(),
            groups: Vec::new(),
            per_reporter_staleness: BTreeMap::new(),
        };
        assert!(matches!(
            session.write_host(&update).await,
            Err(StorageError::HostNotFound(_))
        ));
    }
}
