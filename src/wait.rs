//! Rich wait errors with debugging context
//!
//! Provides detailed error information when wait operations time out.
//!
//! # Example
//!
//! ```ignore
//! match dependent::deploy(&client, &namespace, timings).await {
//!     Err(HarnessError::Wait(ConditionError::Timeout(err))) => {
//!         println!("Resource: {}", err.resource);
//!         println!("Last state: {}", err.last_state);
//!         println!("Elapsed: {:?}", err.elapsed);
//!     }
//!     _ => {}
//! }
//! ```

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use std::fmt;
use std::time::Duration;

/// Rich error context for a timed-out wait
#[derive(Debug, Clone)]
pub struct WaitError {
    /// What was being waited on (e.g., "statefulset/postgresql-db")
    pub resource: String,
    /// Description of the last observed state
    pub last_state: String,
    /// How long we waited before giving up
    pub elapsed: Duration,
    /// The timeout that was configured
    pub timeout: Duration,
    /// Number of times the condition was evaluated
    pub attempts: u32,
}

impl WaitError {
    /// Create a new WaitError
    pub fn new(resource: impl Into<String>, timeout: Duration, elapsed: Duration) -> Self {
        Self {
            resource: resource.into(),
            last_state: "unknown".to_string(),
            elapsed,
            timeout,
            attempts: 0,
        }
    }

    /// Set the last observed state
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.last_state = state.into();
        self
    }

    /// Set the number of evaluations
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "Wait timeout for {}", self.resource)?;
        writeln!(f, "├─ Last state: {}", self.last_state)?;
        writeln!(f, "├─ Attempts: {}", self.attempts)?;
        writeln!(f, "├─ Elapsed: {:?}", self.elapsed)?;
        write!(f, "└─ Timeout: {:?}", self.timeout)
    }
}

impl std::error::Error for WaitError {}

/// Helper trait for extracting a state description from K8s resources
pub trait ResourceState {
    /// Get a human-readable description of the resource's current state
    fn state_description(&self) -> String;
}

impl ResourceState for StatefulSet {
    fn state_description(&self) -> String {
        let spec_replicas = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let ready = self
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        let current = self
            .status
            .as_ref()
            .and_then(|s| s.current_replicas)
            .unwrap_or(0);

        format!("{ready}/{spec_replicas} ready, {current}/{spec_replicas} current")
    }
}

impl ResourceState for Pod {
    fn state_description(&self) -> String {
        let phase = self
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("Unknown");

        let containers = self
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref());

        match containers {
            Some(statuses) => {
                let total = statuses.len();
                let ready = statuses.iter().filter(|c| c.ready).count();

                let waiting_reasons: Vec<&str> = statuses
                    .iter()
                    .filter_map(|c| {
                        c.state
                            .as_ref()
                            .and_then(|s| s.waiting.as_ref())
                            .and_then(|w| w.reason.as_deref())
                    })
                    .collect();

                if waiting_reasons.is_empty() {
                    format!("phase={phase}, containers {ready}/{total} ready")
                } else {
                    format!(
                        "phase={phase}, containers {ready}/{total} ready, waiting: {}",
                        waiting_reasons.join(", ")
                    )
                }
            }
            None => format!("phase={phase}, no container status"),
        }
    }
}

/// Ready replica count of a StatefulSet, 0 when no status was reported
pub fn ready_replicas(sts: &StatefulSet) -> i32 {
    sts.status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}

/// Whether the pod reports the `Ready` condition as `True`
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{StatefulSetSpec, StatefulSetStatus};
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateWaiting, ContainerStatus, PodCondition, PodStatus,
    };

    #[test]
    fn test_wait_error_display() {
        let err = WaitError::new(
            "statefulset/postgresql-db",
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
        .with_state("0/1 ready, 1/1 current")
        .with_attempts(121);

        let output = err.to_string();
        assert!(output.contains("statefulset/postgresql-db"));
        assert!(output.contains("0/1 ready"));
        assert!(output.contains("121"));
        assert!(output.contains("60s"));
    }

    #[test]
    fn test_wait_error_builder_defaults() {
        let err = WaitError::new(
            "namespace/test",
            Duration::from_secs(120),
            Duration::from_secs(115),
        );

        assert_eq!(err.resource, "namespace/test");
        assert_eq!(err.timeout, Duration::from_secs(120));
        assert_eq!(err.elapsed, Duration::from_secs(115));
        assert_eq!(err.last_state, "unknown");
        assert_eq!(err.attempts, 0);
    }

    #[test]
    fn test_statefulset_state_description() {
        let sts = StatefulSet {
            spec: Some(StatefulSetSpec {
                replicas: Some(1),
                ..Default::default()
            }),
            status: Some(StatefulSetStatus {
                replicas: 1,
                ready_replicas: Some(0),
                current_replicas: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(sts.state_description(), "0/1 ready, 1/1 current");
        assert_eq!(ready_replicas(&sts), 0);
        assert_eq!(ready_replicas(&StatefulSet::default()), 0);
    }

    #[test]
    fn test_pod_state_description() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Pending".to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "keycloak".to_string(),
                    ready: false,
                    state: Some(ContainerState {
                        waiting: Some(ContainerStateWaiting {
                            reason: Some("CrashLoopBackOff".to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let state = pod.state_description();
        assert!(state.contains("phase=Pending"));
        assert!(state.contains("0/1 ready"));
        assert!(state.contains("CrashLoopBackOff"));
    }

    #[test]
    fn test_is_pod_ready() {
        let pod_with = |status: &str| Pod {
            status: Some(PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: status.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(is_pod_ready(&pod_with("True")));
        assert!(!is_pod_ready(&pod_with("False")));
        assert!(!is_pod_ready(&Pod::default()));
    }
}
