//! Explicit request context threaded through a run.

use std::fmt;

use chrono::{DateTime, Utc};
use staleward_model::TenantId;

/// Identity a tenant-scoped run acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TenantScope {
    #[default]
    All,
    Tenant(TenantContext),
}

impl TenantScope {
    pub fn tenant(&self) -> Option<&TenantContext> {
        match self {
            TenantScope::All => None,
            TenantScope::Tenant(ctx) => Some(ctx),
        }
    }
}

/// Values fixed for the whole run. `now` is captured once so every host is
/// classified against the same instant.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub request_id: Option<String>,
    pub now: DateTime<Utc>,
    pub scope: TenantScope,
}

impl RunContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            request_id: None,
            now,
            scope: TenantScope::All,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_scope(mut self, scope: TenantScope) -> Self {
        self.scope = scope;
        self
    }
}

/// Externally supplied pass/fail authorization check for tenant-scoped
/// runs.
pub trait TenantAccess: Send + Sync {
    fn permits(&self, tenant: &TenantContext) -> bool;
}

impl<F> TenantAccess for F
where
    F: Fn(&TenantContext) -> bool + Send + Sync,
{
    fn permits(&self, tenant: &TenantContext) -> bool {
        self(tenant)
    }
}

#[derive(Clone, Copy, Default)]
pub struct AllowAll;

impl TenantAccess for AllowAll {
    fn permits(&self, _tenant: &TenantContext) -> bool {
        true
    }
}

impl fmt::Debug for AllowAll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AllowAll")
    }
}
