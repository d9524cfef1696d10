//! Creating the same snapshot on many hosts.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use vsm_core::capability::Capability;
use vsm_provider::{Host, SnapshotOptions};

use crate::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub host: String,
    pub message: String,
}

/// Outcome of [`create_for_hosts`], by host name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<BulkFailure>,
    pub skipped: Vec<String>,
}

impl BulkReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.skipped.len()
    }
}

impl fmt::Display for BulkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped",
            self.succeeded.len(),
            self.failed.len(),
            self.skipped.len()
        )
    }
}

/// Snapshot every host in turn. A failure on one host never stops the rest.
pub fn create_for_hosts(
    hosts: &[Arc<Host>],
    name: &str,
    description: &str,
    options: SnapshotOptions,
) -> BulkReport {
    let mut report = BulkReport::default();

    for host in hosts {
        let compute_resource = host.compute_resource();
        if !compute_resource.capable(Capability::Snapshots) {
            info!(
                host = %host.name,
                compute_resource = compute_resource.name(),
                "Skipping host: compute resource does not support snapshots"
            );
            report.skipped.push(host.name.clone());
            continue;
        }

        let mut snapshot = Snapshot::new(Arc::clone(host));
        snapshot.set_name(name);
        snapshot.set_description(description);
        snapshot.set_options(options);

        match snapshot.create() {
            Ok(true) => {
                info!(host = %host.name, snapshot = name, "Snapshot created");
                report.succeeded.push(host.name.clone());
            }
            Ok(false) => {
                let message = if snapshot.errors().is_empty() {
                    "halted by callback".to_string()
                } else {
                    snapshot.errors().to_string()
                };
                warn!(host = %host.name, snapshot = name, error = %message, "Snapshot not created");
                report.failed.push(BulkFailure {
                    host: host.name.clone(),
                    message,
                });
            }
            Err(e) => {
                warn!(host = %host.name, snapshot = name, error = %e, "Snapshot creation failed");
                report.failed.push(BulkFailure {
                    host: host.name.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        "Bulk snapshot creation finished"
    );
    report
}
