use std::fmt;
use std::sync::Arc;

use staleward_model::HostRecord;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::bus::{EmitOutcome, EventBus, EventEmitter, SkipReason, Topics};
use crate::context::{AllowAll, RunContext, TenantAccess};
use crate::error::{HostEmitError, JobError, JobFailure, PolicyLoadError};
use crate::metrics::{JobMetrics, MetricsSink, NoopSink};
use crate::policy::{PolicyResolver, PolicySet};
use crate::scan::{ChunkedScanner, DEFAULT_CHUNK_SIZE};
use crate::staleness::{PredicateBuilder, classify};
use crate::storage::{HostSession, HostStore};

use super::{JobSpec, RunSummary, ShutdownSignal};

/// Lifecycle of one run. Every path ends in `Closed`, fatal errors
/// included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Scanning,
    Draining,
    Closed,
}

/// Drives one job run: resolve policies, build the predicate, scan in
/// chunks, emit per host, then release everything it acquired.
pub struct JobOrchestrator {
    store: Arc<dyn HostStore>,
    bus: Arc<dyn EventBus>,
    resolver: PolicyResolver,
    topics: Topics,
    chunk_size: usize,
    access: Arc<dyn TenantAccess>,
    metrics_sink: Arc<dyn MetricsSink>,
    shutdown: ShutdownSignal,
}

impl fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("resolver", &self.resolver)
            .field("topics", &self.topics)
            .field("chunk_size", &self.chunk_size)
            .field("shutdown", &self.shutdown.is_triggered())
            .finish_non_exhaustive()
    }
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn HostStore>,
        bus: Arc<dyn EventBus>,
        resolver: PolicyResolver,
        topics: Topics,
    ) -> Self {
        Self {
            store,
            bus,
            resolver,
            topics,
            chunk_size: DEFAULT_CHUNK_SIZE,
            access: Arc::new(AllowAll),
            metrics_sink: Arc::new(NoopSink),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_access(mut self, access: Arc<dyn TenantAccess>) -> Self {
        self.access = access;
        self
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = sink;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub async fn run(
        &self,
        spec: &JobSpec,
        ctx: &RunContext,
    ) -> Result<RunSummary, JobFailure> {
        let span = info_span!(
            "job_run",
            job = spec.kind.name(),
            request_id = ctx.request_id.as_deref().unwrap_or("-"),
        );
        self.run_inner(spec, ctx).instrument(span).await
    }

    async fn run_inner(
        &self,
        spec: &JobSpec,
        ctx: &RunContext,
    ) -> Result<RunSummary, JobFailure> {
        let mut summary = RunSummary::default();
        let mut phase = RunPhase::Init;
        info!(
            targets = ?spec.targets,
            chunk_size = self.chunk_size,
            "starting job"
        );

        if let Some(tenant) = ctx.scope.tenant()
            && !self.access.permits(tenant)
        {
            let error = JobError::TenantDenied(tenant.tenant_id().clone());
            error!(error = %error, "job refused before acquiring resources");
            return Err(JobFailure { error, summary });
        }

        let metrics = match JobMetrics::new(spec.kind.name()) {
            Ok(metrics) => metrics,
            Err(err) => {
                let error = JobError::from(err);
                error!(error = %error, "failed to set up job metrics");
                return Err(JobFailure { error, summary });
            }
        };

        let result = self
            .execute(spec, ctx, &mut summary, &mut phase, &metrics)
            .await;

        // Draining: the session and producer were released inside
        // `execute`; metrics go out on every path.
        advance(&mut phase, RunPhase::Draining);
        if let Err(err) = self
            .metrics_sink
            .push(spec.kind.metrics_job(), &metrics)
            .await
        {
            warn!(error = %err, "failed to push job metrics");
        }
        advance(&mut phase, RunPhase::Closed);

        match result {
            Ok(()) => {
                if summary.interrupted {
                    warn!(
                        scanned = summary.scanned,
                        delivered = summary.delivered,
                        failed = summary.failed,
                        skipped = summary.skipped,
                        "job interrupted by shutdown request"
                    );
                } else {
                    info!(
                        scanned = summary.scanned,
                        delivered = summary.delivered,
                        failed = summary.failed,
                        skipped = summary.skipped,
                        chunks = summary.chunks,
                        "job completed"
                    );
                }
                Ok(summary)
            }
            Err(error) => {
                error!(
                    error = %error,
                    scanned = summary.scanned,
                    delivered = summary.delivered,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "job aborted"
                );
                Err(JobFailure { error, summary })
            }
        }
    }

    /// Owns the storage session for the run and always closes it.
    async fn execute(
        &self,
        spec: &JobSpec,
        ctx: &RunContext,
        summary: &mut RunSummary,
        phase: &mut RunPhase,
        metrics: &JobMetrics,
    ) -> Result<(), JobError> {
        let mut session = self
            .store
            .open_session()
            .await
            .map_err(PolicyLoadError::Unreachable)?;

        let result = self
            .with_session(session.as_mut(), spec, ctx, summary, phase, metrics)
            .await;

        if let Err(err) = session.close().await {
            warn!(error = %err, "failed to close storage session");
        }
        result
    }

    async fn with_session(
        &self,
        session: &mut dyn HostSession,
        spec: &JobSpec,
        ctx: &RunContext,
        summary: &mut RunSummary,
        phase: &mut RunPhase,
        metrics: &JobMetrics,
    ) -> Result<(), JobError> {
        let policies = self.resolver.resolve_all(session).await?;

        let mut builder = PredicateBuilder::new(ctx.now);
        if let Some(tenant) = ctx.scope.tenant() {
            builder = builder.scoped_to(tenant.tenant_id().clone());
        }
        if let Some(extra) = spec.extra_predicate() {
            builder = builder.restrict(extra);
        }
        let predicate = builder.build(&spec.targets, &policies)?;

        let producer = self.bus.connect().await?;
        let mut emitter = EventEmitter::new(
            producer,
            self.topics.clone(),
            ctx.request_id.clone(),
            ctx.now,
        );

        advance(phase, RunPhase::Scanning);
        let scanner = ChunkedScanner::new(predicate, self.chunk_size);
        let scan_result = self
            .scan(
                scanner,
                session,
                &mut emitter,
                &policies,
                spec,
                ctx,
                summary,
                metrics,
            )
            .await;

        advance(phase, RunPhase::Draining);
        let flush_result = if emitter.is_usable() {
            emitter.flush().await
        } else {
            Ok(())
        };
        if let Err(err) = emitter.close().await {
            warn!(error = %err, "failed to close event producer");
        }

        scan_result?;
        flush_result?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn scan(
        &self,
        mut scanner: ChunkedScanner,
        session: &mut dyn HostSession,
        emitter: &mut EventEmitter,
        policies: &PolicySet,
        spec: &JobSpec,
        ctx: &RunContext,
        summary: &mut RunSummary,
        metrics: &JobMetrics,
    ) -> Result<(), JobError> {
        loop {
            if self.shutdown.is_triggered() {
                info!(chunks = summary.chunks, "shutdown requested, stopping scan");
                summary.interrupted = true;
                return Ok(());
            }

            let Some(chunk) = scanner.next_chunk(session).await? else {
                return Ok(());
            };
            summary.chunks += 1;
            debug!(chunk = summary.chunks, hosts = chunk.len(), "processing chunk");

            for mut host in chunk {
                summary.scanned += 1;
                metrics.scanned.inc();
                let _timer = metrics.processing_time.start_timer();

                match self
                    .process_host(&mut host, session, emitter, policies, spec, ctx)
                    .await
                {
                    Ok(outcome) => {
                        summary.record(&outcome);
                        metrics.record(&outcome);
                    }
                    Err(err) => {
                        summary.failed += 1;
                        metrics.failed.inc();
                        return Err(err.into());
                    }
                }
            }
        }
    }

    async fn process_host(
        &self,
        host: &mut HostRecord,
        session: &mut dyn HostSession,
        emitter: &mut EventEmitter,
        policies: &PolicySet,
        spec: &JobSpec,
        ctx: &RunContext,
    ) -> Result<EmitOutcome, crate::error::BusConnectionError> {
        let deltas = *policies.deltas_for(&host.tenant_id).for_kind(host.kind);
        let state = classify(host.last_check_in, &deltas, ctx.now);
        if !spec.targets.contains(&state) {
            let reason = SkipReason::OutsideTargetStates(state);
            debug!(host_id = %host.id, %reason, "skipping host");
            return Ok(EmitOutcome::Skipped(reason));
        }

        if let Some(transform) = spec.kind.transform() {
            let update = match transform.apply(host, &deltas) {
                Ok(update) => update,
                Err(err) => {
                    warn!(
                        host_id = %host.id,
                        transform = transform.name(),
                        error = %err,
                        "failed to recompute host staleness"
                    );
                    return Ok(EmitOutcome::HostFailed(
                        HostEmitError::Timestamps(err),
                    ));
                }
            };
            if let Err(err) = session.write_host(&update).await {
                warn!(
                    host_id = %host.id,
                    transform = transform.name(),
                    error = %err,
                    "failed to write host"
                );
                return Ok(EmitOutcome::HostFailed(HostEmitError::Write(err)));
            }
        }

        emitter.emit(host, spec.kind.event_kind(), &deltas).await
    }
}

fn advance(phase: &mut RunPhase, next: RunPhase) {
    if *phase != next {
        debug!(from = ?*phase, to = ?next, "run phase");
        *phase = next;
    }
}
