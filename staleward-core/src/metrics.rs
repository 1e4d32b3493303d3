//! Per-run Prometheus metrics and the push gateway sink.

use std::fmt;

use async_trait::async_trait;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::bus::EmitOutcome;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Metrics registry error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Invalid push gateway URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Push gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Push gateway answered {status}")]
    Rejected { status: u16 },
}

/// Counters for a single run, registered in a registry owned by that run.
#[derive(Clone)]
pub struct JobMetrics {
    registry: Registry,
    pub scanned: IntCounter,
    pub delivered: IntCounter,
    pub failed: IntCounter,
    pub skipped: IntCounter,
    pub processing_time: Histogram,
}

impl fmt::Debug for JobMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobMetrics")
            .field("scanned", &self.scanned.get())
            .field("delivered", &self.delivered.get())
            .field("failed", &self.failed.get())
            .field("skipped", &self.skipped.get())
            .finish()
    }
}

impl JobMetrics {
    pub fn new(job: &str) -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| -> Result<IntCounter, MetricsError> {
            let counter = IntCounter::with_opts(
                Opts::new(name, help).const_label("job", job),
            )?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let scanned = counter(
            "staleward_hosts_scanned_total",
            "Hosts read from storage by the job",
        )?;
        let delivered = counter(
            "staleward_events_delivered_total",
            "Host events accepted by the bus",
        )?;
        let failed = counter(
            "staleward_hosts_failed_total",
            "Hosts whose event could not be produced or delivered",
        )?;
        let skipped = counter(
            "staleward_hosts_skipped_total",
            "Hosts outside the target states when processed",
        )?;
        let processing_time = Histogram::with_opts(
            HistogramOpts::new(
                "staleward_host_processing_seconds",
                "Time spent processing one host",
            )
            .const_label("job", job),
        )?;
        registry.register(Box::new(processing_time.clone()))?;

        Ok(Self {
            registry,
            scanned,
            delivered,
            failed,
            skipped,
            processing_time,
        })
    }

    pub fn record(&self, outcome: &EmitOutcome) {
        match outcome {
            EmitOutcome::Delivered => self.delivered.inc(),
            EmitOutcome::HostFailed(_) => self.failed.inc(),
            EmitOutcome::Skipped(_) => self.skipped.inc(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format of every metric in the run registry.
    pub fn encode(&self) -> Result<Vec<u8>, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn push(
        &self,
        job: &str,
        metrics: &JobMetrics,
    ) -> Result<(), MetricsError>;
}

/// Discards metrics. Used when no push gateway is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl MetricsSink for NoopSink {
    async fn push(
        &self,
        job: &str,
        _metrics: &JobMetrics,
    ) -> Result<(), MetricsError> {
        debug!(job, "metrics push disabled");
        Ok(())
    }
}

/// Prometheus push gateway client. Replaces the job's metric group on each
/// push (`PUT /metrics/job/<job>`).
#[derive(Debug, Clone)]
pub struct PushGateway {
    client: reqwest::Client,
    base: Url,
    namespace: Option<String>,
}

impl PushGateway {
    pub fn new(
        base: &str,
        namespace: Option<String>,
    ) -> Result<Self, MetricsError> {
        Ok(Self {
            client: reqwest::Client::new(),
            base: Url::parse(base)?,
            namespace: namespace.filter(|ns| !ns.trim().is_empty()),
        })
    }

    /// `<job>-<namespace>` when a namespace is set.
    pub fn job_name(&self, job: &str) -> String {
        match &self.namespace {
            Some(namespace) => format!("{job}-{namespace}"),
            None => job.to_string(),
        }
    }

    pub fn push_url(&self, job: &str) -> Result<Url, MetricsError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(["metrics", "job", self.job_name(job).as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl MetricsSink for PushGateway {
    async fn push(
        &self,
        job: &str,
        metrics: &JobMetrics,
    ) -> Result<(), MetricsError> {
        let url = self.push_url(job)?;
        let body = metrics.encode()?;
        let response = self
            .client
            .put(url.clone())
            .header(
                reqwest::header::CONTENT_TYPE,
                TextEncoder::new().format_type(),
            )
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetricsError::Rejected {
                status: status.as_u16(),
            });
        }
        info!(%url, "pushed job metrics");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SkipReason;
    use staleward_model::StalenessState;

    #[test]
    fn outcomes_land_in_matching_counters() {
        let metrics = JobMetrics::new("host-synchronizer").unwrap();
        metrics.record(&EmitOutcome::Delivered);
        metrics.record(&EmitOutcome::Delivered);
        metrics.record(&EmitOutcome::Skipped(SkipReason::OutsideTargetStates(
            StalenessState::Fresh,
        )));
        assert_eq!(metrics.delivered.get(), 2);
        assert_eq!(metrics.skipped.get(), 1);
        assert_eq!(metrics.failed.get(), 0);

        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(text.contains(
            "staleward_events_delivered_total{job=\"host-synchronizer\"} 2"
        ));
    }

    #[test]
    fn push_url_appends_namespaced_job() {
        let gateway = PushGateway::new(
            "http://pushgateway:9091/",
            Some("inventory-prod".into()),
        )
        .unwrap();
        assert_eq!(
            gateway
                .push_url("inventory-stale-host-notification")
                .unwrap()
                .as_str(),
            "http://pushgateway:9091/metrics/job/inventory-stale-host-notification-inventory-prod"
        );

        let bare = PushGateway::new("http://pushgateway:9091", None).unwrap();
        assert_eq!(bare.job_name("job"), "job");
    }
}
