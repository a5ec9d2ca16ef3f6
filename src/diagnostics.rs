//! Failure diagnostics for test debugging
//!
//! When a test fails, the session saves the log of every pod in the test
//! namespace under the results directory, reports every managed resource
//! that is not ready, and prints a summary.
//!
//! Nothing here fails the run: each pod and each resource is handled on its
//! own, and problems are logged and skipped.

use crate::crd::{self, Keycloak, KeycloakStatus};
use crate::session::{improve_error_message, HarnessError};
use crate::wait::{is_pod_ready, ResourceState};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::api::{Api, ListParams, LogParams};
use kube::{Client, ResourceExt};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Characters of a pod log reported for an unready pod
pub const LOG_TAIL_CHARS: usize = 5000;

/// Directory under the results directory receiving pod logs
pub const POD_LOGS_DIR: &str = "pod-logs";

const LINE_WIDTH: usize = 80;
const HEAVY_LINE: &str = "━";
const LIGHT_LINE: &str = "─";
const SUMMARY_LOG_LINES: usize = 20;

/// The log of one pod
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticRecord {
    pub namespace: String,
    pub pod_name: String,
    pub log: String,
}

impl DiagnosticRecord {
    /// `<results_dir>/pod-logs/<namespace>-<pod>.txt`
    pub fn file_path(&self, results_dir: &Path) -> PathBuf {
        results_dir
            .join(POD_LOGS_DIR)
            .join(format!("{}-{}.txt", self.namespace, self.pod_name))
    }

    /// The last `max_chars` characters of the log
    pub fn tail(&self, max_chars: usize) -> &str {
        log_tail(&self.log, max_chars)
    }
}

fn log_tail(log: &str, max_chars: usize) -> &str {
    let total = log.chars().count();
    if total <= max_chars {
        return log;
    }
    let start = log
        .char_indices()
        .nth(total - max_chars)
        .map_or(log.len(), |(i, _)| i);
    &log[start..]
}

/// A managed resource found not ready
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadyResource {
    pub kind: String,
    pub name: String,
    /// Status rendered as YAML
    pub status: String,
}

/// Everything collected for one failed test
#[derive(Debug, Default)]
pub struct DiagnosticsReport {
    pub namespace: String,
    /// Pod logs, in pod list order
    pub pod_logs: Vec<DiagnosticRecord>,
    /// Files the pod logs were written to
    pub saved: Vec<PathBuf>,
    pub unready: Vec<UnreadyResource>,
    pub events: Vec<Event>,
}

impl DiagnosticsReport {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    fn heavy_line() -> String {
        HEAVY_LINE.repeat(LINE_WIDTH)
    }

    fn section_header(title: &str) -> String {
        let title_with_spaces = format!(" {title} ");
        let remaining = LINE_WIDTH.saturating_sub(title_with_spaces.chars().count() + 3);
        format!(
            "{}{}{}",
            LIGHT_LINE.repeat(3),
            title_with_spaces,
            LIGHT_LINE.repeat(remaining)
        )
    }
}

/// Collect diagnostics for `namespace`
///
/// Saves pod logs under `results_dir`, reports unready resources and
/// gathers namespace events.
pub async fn collect(client: &Client, namespace: &str, results_dir: &Path) -> DiagnosticsReport {
    let mut report = DiagnosticsReport::new(namespace);

    match save_pod_logs(client, namespace, results_dir).await {
        Ok((records, saved)) => {
            report.pod_logs = records;
            report.saved = saved;
        }
        Err(e) => error!(namespace = %namespace, error = %e, "Failed to list pods for diagnostics"),
    }

    report.unready = report_unready_resources(client, namespace).await;

    let events: Api<Event> = Api::namespaced(client.clone(), namespace);
    match events.list(&ListParams::default()).await {
        Ok(list) => report.events = list.items,
        Err(e) => warn!(namespace = %namespace, error = %e, "Failed to collect events for diagnostics"),
    }

    report
}

/// Fetch the log of every pod in `namespace` and write it to a file
///
/// Returns the fetched logs and the files written. A pod whose log cannot be
/// fetched or written is logged and skipped. Only a failing pod list is an
/// error.
pub async fn save_pod_logs(
    client: &Client,
    namespace: &str,
    results_dir: &Path,
) -> Result<(Vec<DiagnosticRecord>, Vec<PathBuf>), HarnessError> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pod_list = pods
        .list(&ListParams::default())
        .await
        .map_err(|e| HarnessError::ListError(improve_error_message(&e, "Pod", namespace)))?;

    let mut records = Vec::new();
    let mut saved = Vec::new();

    for pod in pod_list.items {
        let pod_name = pod.name_any();
        let log = match pods.logs(&pod_name, &LogParams::default()).await {
            Ok(log) => log,
            Err(e) => {
                error!(pod = %pod_name, error = %e, "Failed to get pod log");
                continue;
            }
        };

        let record = DiagnosticRecord {
            namespace: namespace.to_string(),
            pod_name,
            log,
        };
        let path = record.file_path(results_dir);
        match write_log(&path, &record.log).await {
            Ok(()) => {
                info!(pod = %record.pod_name, path = %path.display(), "Saved pod log");
                saved.push(path);
            }
            Err(e) => error!(pod = %record.pod_name, path = %path.display(), error = %e, "Failed to save pod log"),
        }
        records.push(record);
    }

    Ok((records, saved))
}

async fn write_log(path: &Path, log: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, log).await
}

/// Report every `Keycloak` that is not ready, with its StatefulSet and pods
pub async fn report_unready_resources(client: &Client, namespace: &str) -> Vec<UnreadyResource> {
    let keycloaks: Api<Keycloak> = Api::namespaced(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);

    let list = match keycloaks.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            warn!(namespace = %namespace, error = %e, "Failed to list Keycloaks for diagnostics");
            return Vec::new();
        }
    };

    let mut unready = Vec::new();
    for kc in list.items {
        if kc.status.as_ref().is_some_and(KeycloakStatus::is_ready) {
            continue;
        }

        let name = kc.name_any();
        let status = to_yaml(&kc.status);
        warn!(namespace = %namespace, "Keycloak {name} is not ready:\n{status}");
        unready.push(UnreadyResource {
            kind: "Keycloak".to_string(),
            name,
            status,
        });

        let sts_name = crd::statefulset_name(&kc);
        let sts = match statefulsets.get_opt(&sts_name).await {
            Ok(Some(sts)) => sts,
            Ok(None) => {
                warn!(namespace = %namespace, "StatefulSet {sts_name} not found");
                continue;
            }
            Err(e) => {
                warn!(namespace = %namespace, statefulset = %sts_name, error = %e, "Failed to get StatefulSet");
                continue;
            }
        };

        let status = to_yaml(&sts.status);
        warn!(namespace = %namespace, "StatefulSet {sts_name} status:\n{status}");
        unready.push(UnreadyResource {
            kind: "StatefulSet".to_string(),
            name: sts_name.clone(),
            status,
        });

        let Some(selector) = match_labels_selector(&sts) else {
            continue;
        };
        let selected = match pods.list(&ListParams::default().labels(&selector)).await {
            Ok(list) => list.items,
            Err(e) => {
                warn!(namespace = %namespace, selector = %selector, error = %e, "Failed to list pods");
                continue;
            }
        };

        for pod in selected.iter().filter(|p| !is_pod_ready(p)) {
            let pod_name = pod.name_any();
            match pods.logs(&pod_name, &LogParams::default()).await {
                Ok(log) => warn!(
                    namespace = %namespace,
                    state = %pod.state_description(),
                    "Pod {pod_name} is not ready, log tail:\n{}",
                    log_tail(&log, LOG_TAIL_CHARS)
                ),
                Err(e) => warn!(namespace = %namespace, pod = %pod_name, error = %e, "no pod log"),
            }
        }
    }

    unready
}

fn to_yaml<T: Serialize>(value: &T) -> String {
    serde_yaml::to_string(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}

/// `k=v,...` from the StatefulSet's `matchLabels`
fn match_labels_selector(sts: &StatefulSet) -> Option<String> {
    let labels = sts.spec.as_ref()?.selector.match_labels.as_ref()?;
    if labels.is_empty() {
        return None;
    }
    Some(
        labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

impl fmt::Display for DiagnosticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", Self::heavy_line())?;
        writeln!(f, "  OPERATOR TEST FAILED")?;
        writeln!(f, "{}", Self::heavy_line())?;
        writeln!(f)?;
        writeln!(f, "  Namespace: {}", self.namespace)?;

        if !self.unready.is_empty() {
            writeln!(f)?;
            writeln!(
                f,
                "{}",
                Self::section_header(&format!("Unready Resources ({})", self.unready.len()))
            )?;
            for resource in &self.unready {
                writeln!(f)?;
                writeln!(f, "[{}/{}]", resource.kind, resource.name)?;
                for line in resource.status.lines() {
                    writeln!(f, "  {line}")?;
                }
            }
        }

        if !self.pod_logs.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}", Self::section_header("Pod Logs"))?;

            for record in &self.pod_logs {
                writeln!(f)?;
                writeln!(f, "[{}]", record.pod_name)?;

                let lines: Vec<&str> = record.log.lines().collect();
                if lines.is_empty() {
                    writeln!(f, "  (no logs)")?;
                    continue;
                }
                let skipped = lines.len().saturating_sub(SUMMARY_LOG_LINES);
                if skipped > 0 {
                    writeln!(f, "  ... ({skipped} earlier lines)")?;
                }
                for line in &lines[skipped..] {
                    writeln!(f, "  {line}")?;
                }
            }
        }

        if !self.events.is_empty() {
            writeln!(f)?;
            writeln!(
                f,
                "{}",
                Self::section_header(&format!("Events ({})", self.events.len()))
            )?;
            writeln!(f)?;

            // Events without a timestamp go last
            let mut events: Vec<_> = self.events.iter().collect();
            events.sort_by_key(|event| (event.last_timestamp.is_none(), event.last_timestamp.clone()));

            for event in events {
                let timestamp = event
                    .last_timestamp
                    .as_ref()
                    .map(|t| t.0.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| "??:??:??".to_string());
                let kind = event.involved_object.kind.as_deref().unwrap_or("?");
                let name = event.involved_object.name.as_deref().unwrap_or("?");
                let reason = event.reason.as_deref().unwrap_or("Unknown");
                let message = event.message.as_deref().unwrap_or("");

                let max_msg_len = 45;
                let msg_display = if message.chars().count() > max_msg_len {
                    format!("{}...", message.chars().take(max_msg_len).collect::<String>())
                } else {
                    message.to_string()
                };

                writeln!(
                    f,
                    "  • {}  {:12}  {:10}  {}",
                    timestamp,
                    format!("{kind}/{name}"),
                    reason,
                    msg_display
                )?;
            }
        }

        if !self.saved.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}", Self::section_header("Saved"))?;
            writeln!(f)?;
            for path in &self.saved {
                writeln!(f, "  {}", path.display())?;
            }
        }

        writeln!(f)?;
        writeln!(f, "{}", Self::section_header("Debug"))?;
        writeln!(f)?;
        writeln!(f, "  kubectl -n {} get keycloaks,statefulsets,pods", self.namespace)?;
        writeln!(f, "  kubectl -n {} describe pods", self.namespace)?;
        writeln!(f, "  kubectl -n {} logs <pod>", self.namespace)?;
        writeln!(f)?;
        writeln!(f, "{}", Self::heavy_line())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{api_server, list, not_found, ok, server_error, text};
    use http::Method;
    use k8s_openapi::api::core::v1::ObjectReference;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::chrono::{TimeZone, Utc};
    use serde_json::json;

    const NS: &str = "keycloak-test-diag";

    fn pod(name: &str, ready: bool) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": name, "labels": { "app": "keycloak" } },
            "status": {
                "phase": "Running",
                "conditions": [{ "type": "Ready", "status": if ready { "True" } else { "False" } }]
            }
        })
    }

    fn unready_keycloak() -> serde_json::Value {
        json!({
            "apiVersion": "k8s.keycloak.org/v2alpha1",
            "kind": "Keycloak",
            "metadata": { "name": "example-kc" },
            "spec": { "instances": 1 },
            "status": {
                "conditions": [{ "type": "Ready", "status": false, "message": "Waiting for more replicas" }]
            }
        })
    }

    fn record(log: &str) -> DiagnosticRecord {
        DiagnosticRecord {
            namespace: NS.to_string(),
            pod_name: "example-kc-0".to_string(),
            log: log.to_string(),
        }
    }

    #[test]
    fn test_record_file_path() {
        let path = record("").file_path(Path::new("/tmp/results"));
        assert_eq!(
            path,
            PathBuf::from("/tmp/results/pod-logs/keycloak-test-diag-example-kc-0.txt")
        );
    }

    #[test]
    fn test_tail_counts_characters() {
        let r = record("héllo wörld");
        assert_eq!(r.tail(5), "wörld");
        assert_eq!(r.tail(100), "héllo wörld");
        assert_eq!(r.tail(0), "");
    }

    #[test]
    fn test_report_display() {
        let mut report = DiagnosticsReport::new(NS);
        report.pod_logs.push(record("Error: connection refused"));
        report.unready.push(UnreadyResource {
            kind: "Keycloak".to_string(),
            name: "example-kc".to_string(),
            status: "conditions: []\n".to_string(),
        });
        report.events.push(Event {
            reason: Some("BackOff".to_string()),
            message: Some("Back-off pulling image".to_string()),
            involved_object: ObjectReference {
                kind: Some("Pod".to_string()),
                name: Some("example-kc-0".to_string()),
                ..Default::default()
            },
            last_timestamp: Some(Time(Utc.with_ymd_and_hms(2024, 1, 15, 10, 42, 1).unwrap())),
            ..Default::default()
        });

        let output = report.to_string();

        assert!(output.contains("OPERATOR TEST FAILED"));
        assert!(output.contains("━━━"));
        assert!(output.contains("Unready Resources (1)"));
        assert!(output.contains("[Keycloak/example-kc]"));
        assert!(output.contains("[example-kc-0]"));
        assert!(output.contains("Error: connection refused"));
        assert!(output.contains("Events (1)"));
        assert!(output.contains("10:42:01"));
        assert!(output.contains("Pod/example-kc-0"));
        assert!(output.contains(&format!("kubectl -n {NS} describe pods")));
    }

    #[test]
    fn test_report_display_keeps_last_log_lines() {
        let log: Vec<String> = (0..30).map(|i| format!("line {i}")).collect();
        let mut report = DiagnosticsReport::new(NS);
        report.pod_logs.push(record(&log.join("\n")));

        let output = report.to_string();

        assert!(output.contains("(10 earlier lines)"));
        assert!(output.contains("line 29"));
        assert!(!output.contains("line 9\n"));
    }

    #[tokio::test]
    async fn test_collect_with_no_pods_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let server = api_server(|_, path| match path {
            p if p.ends_with("/pods") => list("v1", "PodList", vec![]),
            p if p.ends_with("/keycloaks") => list("k8s.keycloak.org/v2alpha1", "KeycloakList", vec![]),
            p if p.ends_with("/events") => list("v1", "EventList", vec![]),
            _ => not_found(),
        });

        let report = collect(&server.client, NS, dir.path()).await;

        assert!(report.pod_logs.is_empty());
        assert!(report.saved.is_empty());
        assert!(report.unready.is_empty());
        assert!(!dir.path().join(POD_LOGS_DIR).exists());
    }

    #[tokio::test]
    async fn test_save_pod_logs_skips_failing_pod() {
        let dir = tempfile::tempdir().unwrap();
        let server = api_server(|_, path| match path {
            p if p.ends_with("/pods") => {
                list("v1", "PodList", vec![pod("example-kc-0", true), pod("example-kc-1", true)])
            }
            p if p.ends_with("/example-kc-0/log") => text("started in 4.2s\n"),
            p if p.ends_with("/example-kc-1/log") => server_error(),
            _ => not_found(),
        });

        let (records, saved) = save_pod_logs(&server.client, NS, dir.path()).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(saved, vec![records[0].file_path(dir.path())]);
        assert_eq!(std::fs::read_to_string(&saved[0]).unwrap(), "started in 4.2s\n");
    }

    #[tokio::test]
    async fn test_save_pod_logs_reports_list_failure() {
        let dir = tempfile::tempdir().unwrap();
        let server = api_server(|_, _| server_error());

        let err = save_pod_logs(&server.client, NS, dir.path()).await.unwrap_err();

        assert!(matches!(err, HarnessError::ListError(_)));
    }

    #[tokio::test]
    async fn test_unready_keycloak_reports_statefulset_and_pod_logs() {
        let server = api_server(|method, path| match (method, path) {
            (&Method::GET, p) if p.ends_with("/keycloaks") => list(
                "k8s.keycloak.org/v2alpha1",
                "KeycloakList",
                vec![unready_keycloak()],
            ),
            (&Method::GET, p) if p.ends_with("/statefulsets/example-kc") => ok(json!({
                "apiVersion": "apps/v1",
                "kind": "StatefulSet",
                "metadata": { "name": "example-kc" },
                "spec": {
                    "serviceName": "example-kc-discovery",
                    "selector": { "matchLabels": { "app": "keycloak" } },
                    "template": {}
                },
                "status": { "replicas": 1, "readyReplicas": 0 }
            })),
            (&Method::GET, p) if p.ends_with("/pods") => {
                list("v1", "PodList", vec![pod("example-kc-0", false), pod("example-kc-1", true)])
            }
            (&Method::GET, p) if p.ends_with("/log") => text("ERROR: database unreachable"),
            _ => not_found(),
        });

        let unready = report_unready_resources(&server.client, NS).await;

        let names: Vec<String> = unready.iter().map(|r| format!("{}/{}", r.kind, r.name)).collect();
        assert_eq!(names, vec!["Keycloak/example-kc", "StatefulSet/example-kc"]);
        assert!(unready[0].status.contains("Waiting for more replicas"));
        assert!(unready[1].status.contains("readyReplicas: 0"));

        // Only the unready pod's log is fetched
        assert_eq!(server.count("GET", &format!("/api/v1/namespaces/{NS}/pods/example-kc-0/log")), 1);
        assert_eq!(server.count("GET", &format!("/api/v1/namespaces/{NS}/pods/example-kc-1/log")), 0);
    }

    #[tokio::test]
    async fn test_ready_keycloak_is_not_reported() {
        let server = api_server(|_, path| match path {
            p if p.ends_with("/keycloaks") => list(
                "k8s.keycloak.org/v2alpha1",
                "KeycloakList",
                vec![json!({
                    "apiVersion": "k8s.keycloak.org/v2alpha1",
                    "kind": "Keycloak",
                    "metadata": { "name": "example-kc" },
                    "spec": {},
                    "status": { "conditions": [{ "type": "Ready", "status": "True" }] }
                })],
            ),
            _ => not_found(),
        });

        let unready = report_unready_resources(&server.client, NS).await;

        assert!(unready.is_empty());
        assert!(!server.requests().iter().any(|r| r.contains("/statefulsets/")));
    }

    #[tokio::test]
    async fn test_missing_statefulset_does_not_stop_report() {
        let server = api_server(|_, path| match path {
            p if p.ends_with("/keycloaks") => list(
                "k8s.keycloak.org/v2alpha1",
                "KeycloakList",
                vec![unready_keycloak()],
            ),
            _ => not_found(),
        });

        let unready = report_unready_resources(&server.client, NS).await;

        assert_eq!(unready.len(), 1);
        assert_eq!(unready[0].kind, "Keycloak");
    }
}
