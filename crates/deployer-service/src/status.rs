//! Deploy status aggregation on the coordinator side.
//!
//! Workers push [`DeploymentReport`] snapshots; the aggregator merges them
//! into process-lifetime [`DeploymentRecord`]s and acknowledges every report.
//! A report replaces the state of every resource it names and leaves all
//! other resources untouched, so partial reports never regress earlier
//! state. Merges for one `deployment_id` are serialised by the map's entry
//! lock; reports for different deployments proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use deployer_proto::coordinator_server::Coordinator;
use deployer_proto::{Ack, DeploymentReport, ResourceState};
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::error::AggregationError;

/// Merged per-deployment rollout state, owned by the aggregator.
#[derive(Debug, Clone)]
pub struct DeploymentRecord {
    /// Deployment identifier.
    pub deployment_id: String,
    /// Last reported state per resource name.
    pub resources: HashMap<String, ResourceState>,
    /// When the first report for this deployment arrived.
    pub created_at: DateTime<Utc>,
    /// When the most recent report was merged.
    pub updated_at: DateTime<Utc>,
}

/// Single-writer store of deployment records.
#[derive(Debug, Default)]
pub struct StatusAggregator {
    records: DashMap<String, DeploymentRecord>,
}

impl StatusAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one report into the records.
    ///
    /// Creates the record on first sight of the `deployment_id`; otherwise
    /// replaces the state for each resource named by the report. The entry
    /// lock is held for the duration of the merge.
    pub fn report(&self, report: DeploymentReport) -> Result<(), AggregationError> {
        if report.deployment_id.is_empty() {
            return Err(AggregationError::EmptyDeploymentId);
        }

        let states = report
            .resources
            .into_iter()
            .map(|(name, value)| (name, decode_state(value)))
            .collect::<HashMap<_, _>>();
        let now = Utc::now();

        match self.records.entry(report.deployment_id) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                record.resources.extend(states);
                record.updated_at = now;
            }
            Entry::Vacant(vacant) => {
                let deployment_id = vacant.key().clone();
                vacant.insert(DeploymentRecord {
                    deployment_id,
                    resources: states,
                    created_at: now,
                    updated_at: now,
                });
            }
        }

        Ok(())
    }

    /// Copy of the record for a deployment, if one exists.
    ///
    /// Read-only accessor for tests and diagnostics; the wire contract
    /// stays merge-only.
    #[must_use]
    pub fn snapshot(&self, deployment_id: &str) -> Option<DeploymentRecord> {
        self.records.get(deployment_id).map(|r| r.clone())
    }

    /// Number of deployments with at least one merged report.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no report has been merged yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Unknown wire values decode to OTHER so a newer peer's states are merged
/// rather than dropped.
fn decode_state(value: i32) -> ResourceState {
    ResourceState::try_from(value).unwrap_or(ResourceState::Other)
}

/// gRPC facade over the aggregator.
#[derive(Debug, Clone)]
pub struct StatusService {
    aggregator: Arc<StatusAggregator>,
}

impl StatusService {
    /// Create the coordinator service around a shared aggregator.
    #[must_use]
    pub fn new(aggregator: Arc<StatusAggregator>) -> Self {
        Self { aggregator }
    }
}

#[tonic::async_trait]
impl Coordinator for StatusService {
    async fn update_deploy_status(
        &self,
        request: Request<DeploymentReport>,
    ) -> Result<Response<Ack>, Status> {
        let report = request.into_inner();
        let deployment_id = report.deployment_id.clone();
        let resources = report.resources.len();

        // Report errors ride in the acknowledgement, never a gRPC status.
        let ack = match self.aggregator.report(report) {
            Ok(()) => {
                info!(%deployment_id, resources, "deploy status report merged");
                Ack::ok()
            }
            Err(e) => {
                warn!(%deployment_id, error = %e, "deploy status report rejected");
                Ack::error(e.ack_code(), e.to_string())
            }
        };

        Ok(Response::new(ack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(deployment_id: &str, resources: &[(&str, ResourceState)]) -> DeploymentReport {
        DeploymentReport {
            deployment_id: deployment_id.to_owned(),
            resources: resources
                .iter()
                .map(|(name, state)| ((*name).to_owned(), *state as i32))
                .collect(),
        }
    }

    #[test]
    fn first_report_creates_record() {
        let aggregator = StatusAggregator::new();
        aggregator
            .report(report("dep-1", &[("web", ResourceState::Pending)]))
            .expect("merge");

        let record = aggregator.snapshot("dep-1").expect("record");
        assert_eq!(record.resources["web"], ResourceState::Pending);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn partial_report_does_not_regress_absent_resources() {
        let aggregator = StatusAggregator::new();
        aggregator
            .report(report(
                "dep-1",
                &[
                    ("a", ResourceState::Success),
                    ("b", ResourceState::Pending),
                ],
            ))
            .expect("merge");
        aggregator
            .report(report("dep-1", &[("b", ResourceState::Error)]))
            .expect("merge");

        let record = aggregator.snapshot("dep-1").expect("record");
        assert_eq!(record.resources["a"], ResourceState::Success);
        assert_eq!(record.resources["b"], ResourceState::Error);
        assert_eq!(record.resources.len(), 2);
    }

    #[test]
    fn empty_deployment_id_is_rejected() {
        let aggregator = StatusAggregator::new();
        let err = aggregator
            .report(report("", &[("a", ResourceState::Success)]))
            .expect_err("empty id");
        assert!(matches!(err, AggregationError::EmptyDeploymentId));
        assert_eq!(err.ack_code(), 400);
        assert!(aggregator.is_empty());
    }

    #[test]
    fn unknown_wire_state_decodes_to_other() {
        let aggregator = StatusAggregator::new();
        let mut bad = report("dep-1", &[]);
        bad.resources.insert("db".to_owned(), 42);
        aggregator.report(bad).expect("merge");

        let record = aggregator.snapshot("dep-1").expect("record");
        assert_eq!(record.resources["db"], ResourceState::Other);
    }

    #[tokio::test]
    async fn concurrent_reports_for_distinct_deployments() {
        let aggregator = Arc::new(StatusAggregator::new());

        let mut tasks = Vec::new();
        for i in 0..16 {
            let aggregator = Arc::clone(&aggregator);
            tasks.push(tokio::spawn(async move {
                aggregator.report(report(
                    &format!("dep-{i}"),
                    &[("web", ResourceState::Success)],
                ))
            }));
        }
        for task in tasks {
            task.await.expect("join").expect("merge");
        }

        assert_eq!(aggregator.len(), 16);
        for i in 0..16 {
            let record = aggregator.snapshot(&format!("dep-{i}")).expect("record");
            assert_eq!(record.resources["web"], ResourceState::Success);
        }
    }

    #[tokio::test]
    async fn grpc_facade_returns_error_ack_not_status() {
        let service = StatusService::new(Arc::new(StatusAggregator::new()));
        let response = service
            .update_deploy_status(Request::new(report("", &[])))
            .await
            .expect("call succeeds at the transport level");

        let ack = response.into_inner();
        assert_eq!(ack.code, 400);
        assert!(!ack.accepted());
    }
}
