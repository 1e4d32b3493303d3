//! # Staleward Core
//!
//! Engine for classifying inventory hosts by check-in staleness and for
//! running the maintenance jobs built on that classification.
//!
//! ## Overview
//!
//! - **Classification**: map a host's last check-in to
//!   `fresh`/`stale`/`stale_warning`/`culled` under its tenant's policy
//! - **Predicates**: turn "hosts in these states" into a storage filter,
//!   one branch per custom-policy tenant plus the default branch
//! - **Chunked scans**: keyset-paginated reads in `(tenant, host)` order
//! - **Emission**: one lifecycle event per host over a message bus
//! - **Jobs**: stale-host notification, host synchronization and the
//!   reporter staleness refresh, sharing one orchestrator
//!
//! ## Feature Flags
//!
//! - `postgres`: PostgreSQL host store (SQLx)
//! - `redis`: Redis stream event producer
//! - `database`: both of the above (default)
//!
//! Without adapters the in-memory store and bus are still available.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use staleward_core::{
//!     bus::{MemoryEventBus, Topics},
//!     context::RunContext,
//!     jobs::{JobKind, JobOrchestrator, JobSpec},
//!     policy::PolicyResolver,
//!     storage::MemoryHostStore,
//! };
//! use staleward_model::{PolicyDeltas, StalenessDeltas};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let deltas = StalenessDeltas::from_seconds(86_400, 604_800, 1_209_600)?;
//! let orchestrator = JobOrchestrator::new(
//!     Arc::new(MemoryHostStore::new()),
//!     Arc::new(MemoryEventBus::new()),
//!     PolicyResolver::new(PolicyDeltas::new(deltas, deltas)?),
//!     Topics {
//!         events: "platform.inventory.events".into(),
//!         notifications: "platform.notifications.ingress".into(),
//!     },
//! );
//! let summary = orchestrator
//!     .run(
//!         &JobSpec::new(JobKind::StaleHostNotification),
//!         &RunContext::new(Utc::now()),
//!     )
//!     .await?;
//! println!("delivered {} events", summary.delivered);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod bus;
pub mod context;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod policy;
pub mod scan;
pub mod staleness;
pub mod storage;

pub use error::{JobError, JobFailure, Result};
pub use jobs::{JobKind, JobOrchestrator, JobSpec, RunSummary, ShutdownSignal};
pub use policy::{PolicyResolver, PolicySet};
pub use staleness::{ClassifyPolicy, HostPredicate, PredicateBuilder, classify};
