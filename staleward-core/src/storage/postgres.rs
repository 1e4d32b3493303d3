//! Postgres host store.
//!
//! Expects two tables (schema management lives outside this crate):
//!
//! ```text
//! hosts(id uuid, org_id text, host_type text null, last_check_in timestamptz,
//!       reporter text, groups jsonb null, per_reporter_staleness jsonb,
//!       attributes jsonb, primary key (org_id, id))
//! staleness(org_id text primary key,
//!           conventional_staleness_delta bigint,
//!           conventional_stale_warning_delta bigint,
//!           conventional_culling_delta bigint,
//!           immutable_staleness_delta bigint,
//!           immutable_stale_warning_delta bigint,
//!           immutable_culling_delta bigint)
//! ```
//!
//! Deltas are stored in seconds. Immutable hosts carry `host_type = 'edge'`.
//! Scans sort tenant ids with `COLLATE "C"`; an index on
//! `(org_id COLLATE "C", id)` serves the page query.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use staleward_model::{
    GroupRef, HostId, HostKind, HostRecord, ReporterStaleness, TenantId,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StorageError;
use crate::scan::{ScanCursor, ScanOrder};
use crate::staleness::{CheckInWindow, HostPredicate};

use super::{
    ChunkPage, ChunkRequest, HostSession, HostStore, HostUpdate, PolicyRecord,
    StorageResult, ThresholdSeconds,
};

const IMMUTABLE_HOST_TYPE: &str = "edge";

const HOST_COLUMNS: &str = "id, org_id, host_type, last_check_in, reporter, \
     groups, per_reporter_staleness, attributes";

const POLICY_COLUMNS: &str = "org_id, \
     conventional_staleness_delta, conventional_stale_warning_delta, \
     conventional_culling_delta, immutable_staleness_delta, \
     immutable_stale_warning_delta, immutable_culling_delta";

#[derive(Clone)]
pub struct PostgresHostStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresHostStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresHostStore")
            .field("pool_size", &self.pool.size())
            .field("idle", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresHostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lazily connecting pool sized for a single sequential job.
    pub fn connect_lazy(
        database_url: &str,
        max_connections: u32,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_lazy(database_url)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl HostStore for PostgresHostStore {
    async fn open_session(&self) -> StorageResult<Box<dyn HostSession>> {
        let conn = self.pool.acquire().await?;
        debug!("acquired postgres session");
        Ok(Box::new(PostgresSession { conn: Some(conn) }))
    }
}

/// One pooled connection held for the duration of a run.
struct PostgresSession {
    conn: Option<PoolConnection<Postgres>>,
}

impl PostgresSession {
    fn conn(&mut self) -> StorageResult<&mut PoolConnection<Postgres>> {
        self.conn.as_mut().ok_or(StorageError::SessionClosed)
    }
}

#[async_trait]
impl HostSession for PostgresSession {
    async fn load_all_policies(&mut self) -> StorageResult<Vec<PolicyRecord>> {
        let sql = format!("SELECT {POLICY_COLUMNS} FROM staleness ORDER BY org_id");
        let rows = sqlx::query_as::<_, PolicyRow>(&sql)
            .fetch_all(&mut **self.conn()?)
            .await?;
        Ok(rows.into_iter().map(PolicyRecord::from).collect())
    }

    async fn load_policy(
        &mut self,
        tenant_id: &TenantId,
    ) -> StorageResult<Option<PolicyRecord>> {
        let sql =
            format!("SELECT {POLICY_COLUMNS} FROM staleness WHERE org_id = $1");
        let row = sqlx::query_as::<_, PolicyRow>(&sql)
            .bind(tenant_id.as_str())
            .fetch_optional(&mut **self.conn()?)
            .await?;
        Ok(row.map(PolicyRecord::from))
    }

    async fn upsert_policy(&mut self, record: &PolicyRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO staleness (
                org_id,
                conventional_staleness_delta,
                conventional_stale_warning_delta,
                conventional_culling_delta,
                immutable_staleness_delta,
                immutable_stale_warning_delta,
                immutable_culling_delta
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (org_id) DO UPDATE SET
                conventional_staleness_delta = EXCLUDED.conventional_staleness_delta,
                conventional_stale_warning_delta = EXCLUDED.conventional_stale_warning_delta,
                conventional_culling_delta = EXCLUDED.conventional_culling_delta,
                immutable_staleness_delta = EXCLUDED.immutable_staleness_delta,
                immutable_stale_warning_delta = EXCLUDED.immutable_stale_warning_delta,
                immutable_culling_delta = EXCLUDED.immutable_culling_delta
            "#,
        )
        .bind(&record.tenant_id)
        .bind(record.conventional.stale)
        .bind(record.conventional.stale_warning)
        .bind(record.conventional.culled)
        .bind(record.immutable.stale)
        .bind(record.immutable.stale_warning)
        .bind(record.immutable.culled)
        .execute(&mut **self.conn()?)
        .await?;
        Ok(())
    }

    async fn delete_policy(
        &mut self,
        tenant_id: &TenantId,
    ) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM staleness WHERE org_id = $1")
            .bind(tenant_id.as_str())
            .execute(&mut **self.conn()?)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query(&mut self, request: &ChunkRequest) -> StorageResult<ChunkPage> {
        let mut builder = chunk_query(request);
        let rows = builder
            .build_query_as::<HostRow>()
            .fetch_all(&mut **self.conn()?)
            .await?;

        let records = rows
            .into_iter()
            .map(HostRecord::try_from)
            .collect::<StorageResult<Vec<_>>>()?;
        let next = if records.len() == request.limit {
            records.last().map(ScanCursor::from_record)
        } else {
            None
        };
        Ok(ChunkPage { records, next })
    }

    async fn write_host(&mut self, update: &HostUpdate) -> StorageResult<()> {
        let groups = serde_json::to_value(&update.groups)?;
        let per_reporter = serde_json::to_value(&update.per_reporter_staleness)?;
        let result = sqlx::query(
            r#"
            UPDATE hosts
            SET groups = $1, per_reporter_staleness = $2
            WHERE org_id = $3 AND id = $4
            "#,
        )
        .bind(groups)
        .bind(per_reporter)
        .bind(update.tenant_id.as_str())
        .bind(update.id.to_uuid())
        .execute(&mut **self.conn()?)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::HostNotFound(update.id));
        }
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<()> {
        if self.conn.take().is_some() {
            info!("released postgres session");
        }
        Ok(())
    }
}

/// Sort key for `order`. Tenant ids compare bytewise (`COLLATE "C"`) so the
/// database agrees with [`ScanCursor`] ordering whatever its default
/// collation is.
fn order_key(order: ScanOrder) -> &'static str {
    match order {
        ScanOrder::TenantThenHost => r#"org_id COLLATE "C", id"#,
    }
}

/// Keyset-paginated page query for `request`.
pub(crate) fn chunk_query(
    request: &ChunkRequest,
) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "SELECT {HOST_COLUMNS} FROM hosts WHERE "
    ));
    push_predicate(&mut builder, &request.predicate);

    let key = order_key(request.order);
    if let Some(cursor) = &request.after {
        builder.push(format!(" AND ({key}) > ("));
        builder.push_bind(cursor.tenant_id.to_string());
        builder.push(", ");
        builder.push_bind(cursor.host_id.to_uuid());
        builder.push(")");
    }

    builder.push(format!(" ORDER BY {key} LIMIT "));
    builder.push_bind(i64::try_from(request.limit).unwrap_or(i64::MAX));
    builder
}

/// Appends `predicate` as a parenthesized boolean SQL expression.
pub(crate) fn push_predicate(
    builder: &mut QueryBuilder<'static, Postgres>,
    predicate: &HostPredicate,
) {
    match predicate {
        HostPredicate::Never => {
            builder.push("FALSE");
        }
        HostPredicate::Always => {
            builder.push("TRUE");
        }
        HostPredicate::TenantIs(tenant) => {
            builder.push("org_id = ");
            builder.push_bind(tenant.to_string());
        }
        HostPredicate::TenantIn(set) if set.is_empty() => {
            builder.push("FALSE");
        }
        HostPredicate::TenantIn(set) => {
            builder.push("org_id = ANY(");
            builder.push_bind(tenant_list(set));
            builder.push(")");
        }
        HostPredicate::TenantNotIn(set) if set.is_empty() => {
            builder.push("TRUE");
        }
        HostPredicate::TenantNotIn(set) => {
            builder.push("NOT (org_id = ANY(");
            builder.push_bind(tenant_list(set));
            builder.push("))");
        }
        HostPredicate::KindIs(HostKind::Immutable) => {
            builder.push("host_type = ");
            builder.push_bind(IMMUTABLE_HOST_TYPE);
        }
        HostPredicate::KindIs(HostKind::Conventional) => {
            builder.push("host_type IS DISTINCT FROM ");
            builder.push_bind(IMMUTABLE_HOST_TYPE);
        }
        HostPredicate::CheckedIn(window) => push_window(builder, window),
        HostPredicate::MissingReporterStaleness(reporters) => {
            builder.push(
                "EXISTS (SELECT 1 FROM jsonb_each(per_reporter_staleness) \
                 AS prs(reporter, entry) WHERE prs.reporter = ANY(",
            );
            builder.push_bind(reporters.clone());
            // An absent key and an explicit JSON null both count as missing.
            builder.push(
                ") AND COALESCE(jsonb_typeof(prs.entry -> 'culled_timestamp'), \
                 'null') = 'null')",
            );
        }
        HostPredicate::And(terms) => push_joined(builder, terms, " AND ", "TRUE"),
        HostPredicate::Or(terms) => push_joined(builder, terms, " OR ", "FALSE"),
        HostPredicate::Not(inner) => {
            builder.push("NOT (");
            push_predicate(builder, inner);
            builder.push(")");
        }
    }
}

fn push_window(
    builder: &mut QueryBuilder<'static, Postgres>,
    window: &CheckInWindow,
) {
    match (window.after, window.not_after) {
        (None, None) => {
            builder.push("TRUE");
        }
        (Some(after), None) => {
            builder.push("last_check_in > ");
            builder.push_bind(after);
        }
        (None, Some(not_after)) => {
            builder.push("last_check_in <= ");
            builder.push_bind(not_after);
        }
        (Some(after), Some(not_after)) => {
            builder.push("(last_check_in > ");
            builder.push_bind(after);
            builder.push(" AND last_check_in <= ");
            builder.push_bind(not_after);
            builder.push(")");
        }
    }
}

fn push_joined(
    builder: &mut QueryBuilder<'static, Postgres>,
    terms: &[HostPredicate],
    separator: &str,
    empty: &str,
) {
    if terms.is_empty() {
        builder.push(empty);
        return;
    }
    builder.push("(");
    for (index, term) in terms.iter().enumerate() {
        if index > 0 {
            builder.push(separator);
        }
        push_predicate(builder, term);
    }
    builder.push(")");
}

fn tenant_list(set: &std::collections::BTreeSet<TenantId>) -> Vec<String> {
    set.iter().map(TenantId::to_string).collect()
}

#[derive(sqlx::FromRow)]
struct HostRow {
    id: Uuid,
    org_id: String,
    host_type: Option<String>,
    last_check_in: DateTime<Utc>,
    reporter: String,
    groups: Option<serde_json::Value>,
    per_reporter_staleness: serde_json::Value,
    attributes: serde_json::Value,
}

impl TryFrom<HostRow> for HostRecord {
    type Error = StorageError;

    fn try_from(row: HostRow) -> StorageResult<Self> {
        let tenant_id = TenantId::new(row.org_id).map_err(|err| {
            StorageError::InvalidRecord(format!("host {}: {err}", row.id))
        })?;
        let kind = match row.host_type.as_deref() {
            Some(IMMUTABLE_HOST_TYPE) => HostKind::Immutable,
            _ => HostKind::Conventional,
        };
        let groups: Option<Vec<GroupRef>> = match row.groups {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => Some(serde_json::from_value(value)?),
        };
        let per_reporter_staleness: BTreeMap<String, ReporterStaleness> =
            match row.per_reporter_staleness {
                serde_json::Value::Null => BTreeMap::new(),
                value => serde_json::from_value(value)?,
            };
        let attributes = match row.attributes {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(StorageError::InvalidRecord(format!(
                    "host {}: attributes must be an object, got {other}",
                    row.id
                )));
            }
        };

        Ok(HostRecord {
            id: HostId::from(row.id),
            tenant_id,
            kind,
            last_check_in: row.last_check_in,
            reporter: row.reporter,
            groups: HostRecord::normalize_groups(groups),
            per_reporter_staleness,
            attributes,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PolicyRow {
    org_id: String,
    conventional_staleness_delta: i64,
    conventional_stale_warning_delta: i64,
    conventional_culling_delta: i64,
    immutable_staleness_delta: i64,
    immutable_stale_warning_delta: i64,
    immutable_culling_delta: i64,
}

impl From<PolicyRow> for PolicyRecord {
    fn from(row: PolicyRow) -> Self {
        PolicyRecord {
            tenant_id: row.org_id,
            conventional: ThresholdSeconds {
                stale: row.conventional_staleness_delta,
                stale_warning: row.conventional_stale_warning_delta,
                culled: row.conventional_culling_delta,
            },
            immutable: ThresholdSeconds {
                stale: row.immutable_staleness_delta,
                stale_warning: row.immutable_stale_warning_delta,
                culled: row.immutable_culling_delta,
            },
        }
    }
}
