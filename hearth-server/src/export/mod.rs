//! Bulk Data export: async job manager with NDJSON materialization.
//!
//! One worker task per job walks the requested resource types through the
//! registered exporters and fills per-type NDJSON buffers. Job state is
//! shared behind a mutex so status polls read consistent snapshots; buffers
//! become read-only once the job is terminal.

pub mod handlers;

use chrono::{DateTime, Duration, Utc};
use hearth_backend::{CancelToken, GroupResolver, ResourceExporter};
use hearth_core::PlatformError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

pub const NDJSON_CONTENT_TYPE: &str = "application/fhir+ndjson";

/// Accepted `_outputFormat` spellings, all normalized to
/// [`NDJSON_CONTENT_TYPE`].
const ACCEPTED_FORMATS: &[&str] = &[
    "application/fhir+ndjson",
    "application/ndjson",
    "ndjson",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    InProgress,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in-progress",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

#[derive(Debug, Clone)]
pub struct OutputFile {
    pub resource_type: String,
    pub url: String,
    pub count: usize,
}

/// Optional kickoff modifiers (`_outputFormat`, `_typeFilter`).
#[derive(Debug, Clone, Default)]
pub struct KickoffOptions {
    pub output_format: Option<String>,
    pub type_filter: Vec<String>,
}

/// Who the export is scoped to.
#[derive(Debug, Clone)]
enum ExportScope {
    System,
    Patient(String),
    Group { patients: Vec<String> },
}

struct ExportJob {
    id: String,
    status: JobStatus,
    scope: ExportScope,
    resource_types: Vec<String>,
    since: Option<DateTime<Utc>>,
    output_format: String,
    type_filter: Vec<String>,
    request_time: DateTime<Utc>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    output_files: Vec<OutputFile>,
    total_types: usize,
    processed_types: usize,
    buffers: HashMap<String, Vec<u8>>,
    cancel: CancelToken,
}

/// Read-only view of a job for status polling.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub resource_types: Vec<String>,
    pub patient_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub output_format: String,
    pub type_filter: Vec<String>,
    pub request_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub output_files: Vec<OutputFile>,
    pub total_types: usize,
    pub processed_types: usize,
}

impl ExportJob {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            status: self.status,
            resource_types: self.resource_types.clone(),
            patient_id: match &self.scope {
                ExportScope::Patient(id) => Some(id.clone()),
                _ => None,
            },
            since: self.since,
            output_format: self.output_format.clone(),
            type_filter: self.type_filter.clone(),
            request_time: self.request_time,
            created_at: self.created_at,
            completed_at: self.completed_at,
            error_message: self.error_message.clone(),
            output_files: self.output_files.clone(),
            total_types: self.total_types,
            processed_types: self.processed_types,
        }
    }
}

struct Inner {
    jobs: Mutex<HashMap<String, Arc<Mutex<ExportJob>>>>,
    exporters: RwLock<HashMap<String, Arc<dyn ResourceExporter>>>,
    group_resolver: RwLock<Option<Arc<dyn GroupResolver>>>,
    max_concurrent_jobs: usize,
    job_ttl: Duration,
    /// Path prefix for the status/data URLs in output manifests
    base_path: String,
}

/// Process-wide export manager. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ExportManager {
    inner: Arc<Inner>,
}

impl ExportManager {
    pub fn new(max_concurrent_jobs: usize, job_ttl_hours: u64, base_path: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(HashMap::new()),
                exporters: RwLock::new(HashMap::new()),
                group_resolver: RwLock::new(None),
                max_concurrent_jobs,
                job_ttl: Duration::hours(job_ttl_hours as i64),
                base_path: base_path.trim_end_matches('/').to_string(),
            }),
        }
    }

    /// Register the exporter used for one resource type.
    pub fn register_exporter(&self, resource_type: &str, exporter: Arc<dyn ResourceExporter>) {
        self.inner
            .exporters
            .write()
            .unwrap()
            .insert(resource_type.to_string(), exporter);
    }

    pub fn set_group_resolver(&self, resolver: Arc<dyn GroupResolver>) {
        *self.inner.group_resolver.write().unwrap() = Some(resolver);
    }

    /// Resource types with a registered exporter, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .inner
            .exporters
            .read()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// System-level kickoff.
    pub fn kick_off(
        &self,
        types: Vec<String>,
        since: Option<DateTime<Utc>>,
    ) -> Result<JobSnapshot, PlatformError> {
        self.kick_off_system_with(types, since, KickoffOptions::default())
    }

    /// System-level kickoff with format and `_typeFilter` options.
    pub fn kick_off_system_with(
        &self,
        types: Vec<String>,
        since: Option<DateTime<Utc>>,
        options: KickoffOptions,
    ) -> Result<JobSnapshot, PlatformError> {
        self.start_job(ExportScope::System, types, since, options)
    }

    /// Patient-level kickoff.
    pub fn kick_off_for_patient(
        &self,
        types: Vec<String>,
        patient_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<JobSnapshot, PlatformError> {
        self.kick_off_patient_with(types, patient_id, since, KickoffOptions::default())
    }

    /// Patient-level kickoff with format and `_typeFilter` options.
    pub fn kick_off_patient_with(
        &self,
        types: Vec<String>,
        patient_id: &str,
        since: Option<DateTime<Utc>>,
        options: KickoffOptions,
    ) -> Result<JobSnapshot, PlatformError> {
        self.start_job(
            ExportScope::Patient(patient_id.to_string()),
            types,
            since,
            options,
        )
    }

    /// Group-level kickoff; the group is resolved to patient ids up front.
    pub async fn kick_off_group(
        &self,
        group_id: &str,
        types: Vec<String>,
        since: Option<DateTime<Utc>>,
    ) -> Result<JobSnapshot, PlatformError> {
        self.kick_off_group_with(group_id, types, since, KickoffOptions::default())
            .await
    }

    /// Group-level kickoff with format and `_typeFilter` options.
    pub async fn kick_off_group_with(
        &self,
        group_id: &str,
        types: Vec<String>,
        since: Option<DateTime<Utc>>,
        options: KickoffOptions,
    ) -> Result<JobSnapshot, PlatformError> {
        let resolver = self
            .inner
            .group_resolver
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| {
                PlatformError::Exception("no group resolver configured".to_string())
            })?;
        let patients = resolver
            .resolve_group(group_id)
            .await
            .map_err(|e| PlatformError::NotFound(format!("Group/{}: {}", group_id, e)))?;
        self.start_job(ExportScope::Group { patients }, types, since, options)
    }

    /// Kickoff with an explicit `_outputFormat`.
    pub fn kick_off_with_format(
        &self,
        types: Vec<String>,
        since: Option<DateTime<Utc>>,
        format: &str,
    ) -> Result<JobSnapshot, PlatformError> {
        self.kick_off_system_with(
            types,
            since,
            KickoffOptions {
                output_format: Some(format.to_string()),
                type_filter: Vec::new(),
            },
        )
    }

    fn start_job(
        &self,
        scope: ExportScope,
        types: Vec<String>,
        since: Option<DateTime<Utc>>,
        options: KickoffOptions,
    ) -> Result<JobSnapshot, PlatformError> {
        let KickoffOptions {
            output_format,
            type_filter,
        } = options;
        let output_format = match output_format.as_deref() {
            None => NDJSON_CONTENT_TYPE.to_string(),
            Some(f) if ACCEPTED_FORMATS.contains(&f) => NDJSON_CONTENT_TYPE.to_string(),
            Some(other) => {
                return Err(PlatformError::Value(format!(
                    "unsupported _outputFormat '{}'; only NDJSON is supported",
                    other
                )));
            }
        };

        let resource_types = if types.is_empty() {
            self.registered_types()
        } else {
            types
        };

        let mut jobs = self.inner.jobs.lock().unwrap();
        let active = jobs
            .values()
            .filter(|job| !job.lock().unwrap().status.is_terminal())
            .count();
        if active >= self.inner.max_concurrent_jobs {
            return Err(PlatformError::Processing(format!(
                "maximum number of concurrent export jobs reached ({})",
                self.inner.max_concurrent_jobs
            )));
        }

        let now = Utc::now();
        let job = ExportJob {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::InProgress,
            scope,
            total_types: resource_types.len(),
            resource_types,
            since,
            output_format,
            type_filter,
            request_time: now,
            created_at: now,
            completed_at: None,
            error_message: None,
            output_files: Vec::new(),
            processed_types: 0,
            buffers: HashMap::new(),
            cancel: CancelToken::new(),
        };
        let snapshot = job.snapshot();
        let shared = Arc::new(Mutex::new(job));
        jobs.insert(snapshot.id.clone(), shared.clone());
        drop(jobs);

        tracing::info!(
            job_id = %snapshot.id,
            types = ?snapshot.resource_types,
            "export job started"
        );

        let inner = self.inner.clone();
        tokio::spawn(run_job(inner, shared));

        Ok(snapshot)
    }

    pub fn get_status(&self, id: &str) -> Option<JobSnapshot> {
        self.inner
            .jobs
            .lock()
            .unwrap()
            .get(id)
            .map(|job| job.lock().unwrap().snapshot())
    }

    /// NDJSON bytes for one completed type.
    pub fn get_job_data(&self, id: &str, resource_type: &str) -> Result<Vec<u8>, PlatformError> {
        let job = self
            .inner
            .jobs
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("export job {}", id)))?;
        let job = job.lock().unwrap();
        if job.status != JobStatus::Complete {
            return Err(PlatformError::Processing(format!(
                "export job {} is {}",
                id,
                job.status.as_str()
            )));
        }
        job.buffers
            .get(resource_type)
            .cloned()
            .ok_or_else(|| {
                PlatformError::NotFound(format!(
                    "export job {} has no output for type {}",
                    id, resource_type
                ))
            })
    }

    /// Cancel (if running) and delete a job.
    pub fn delete_job(&self, id: &str) -> Result<(), PlatformError> {
        let removed = self.inner.jobs.lock().unwrap().remove(id);
        match removed {
            Some(job) => {
                job.lock().unwrap().cancel.cancel();
                tracing::info!(job_id = %id, "export job deleted");
                Ok(())
            }
            None => Err(PlatformError::NotFound(format!("export job {}", id))),
        }
    }

    /// Drop terminal jobs older than the TTL. Returns how many were removed.
    pub fn cleanup_expired_jobs(&self) -> usize {
        let cutoff = Utc::now() - self.inner.job_ttl;
        let mut jobs = self.inner.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|_, job| {
            let job = job.lock().unwrap();
            if !job.status.is_terminal() {
                return true;
            }
            job.completed_at.unwrap_or(job.created_at) > cutoff
        });
        before - jobs.len()
    }

}

/// Worker: export each requested type in order, then flip to terminal state.
async fn run_job(inner: Arc<Inner>, job: Arc<Mutex<ExportJob>>) {
    let (job_id, scope, types, since, type_filter, cancel) = {
        let job = job.lock().unwrap();
        (
            job.id.clone(),
            job.scope.clone(),
            job.resource_types.clone(),
            job.since,
            job.type_filter.clone(),
            job.cancel.clone(),
        )
    };

    for resource_type in &types {
        if cancel.is_cancelled() {
            fail_job(&job, "export cancelled");
            return;
        }

        let exporter = inner
            .exporters
            .read()
            .unwrap()
            .get(resource_type)
            .cloned();

        let resources = match &exporter {
            // a type with no registered exporter yields an empty file
            None => Ok(Vec::new()),
            Some(exporter) => match &scope {
                ExportScope::System => exporter.export_all(&cancel, since).await,
                ExportScope::Patient(patient_id) => {
                    exporter.export_by_patient(&cancel, patient_id, since).await
                }
                ExportScope::Group { patients } => {
                    let mut accumulated = Vec::new();
                    let mut failed = None;
                    for patient_id in patients {
                        match exporter.export_by_patient(&cancel, patient_id, since).await {
                            Ok(mut resources) => accumulated.append(&mut resources),
                            Err(e) => {
                                failed = Some(e);
                                break;
                            }
                        }
                    }
                    match failed {
                        Some(e) => Err(e),
                        None => Ok(accumulated),
                    }
                }
            },
        };

        let resources = match resources {
            Ok(resources) => apply_type_filter(resources, resource_type, &type_filter),
            Err(e) => {
                tracing::warn!(job_id = %job_id, resource_type = %resource_type, error = %e, "export failed");
                fail_job(&job, &format!("export of {} failed: {}", resource_type, e));
                return;
            }
        };

        let mut buffer = Vec::new();
        let count = resources.len();
        for resource in &resources {
            match serde_json::to_vec(resource) {
                Ok(mut line) => {
                    buffer.append(&mut line);
                    buffer.push(b'\n');
                }
                Err(e) => {
                    fail_job(&job, &format!("serialization failed for {}: {}", resource_type, e));
                    return;
                }
            }
        }

        let mut job = job.lock().unwrap();
        job.buffers.insert(resource_type.clone(), buffer);
        job.output_files.push(OutputFile {
            resource_type: resource_type.clone(),
            url: format!(
                "{}/$export-data/{}/{}",
                inner.base_path, job_id, resource_type
            ),
            count,
        });
        job.processed_types += 1;
        tracing::debug!(
            job_id = %job_id,
            resource_type = %resource_type,
            count,
            "export type materialized"
        );
    }

    let mut job = job.lock().unwrap();
    job.status = JobStatus::Complete;
    job.completed_at = Some(Utc::now());
    tracing::info!(job_id = %job_id, types = job.processed_types, "export job complete");
}

/// Apply `_typeFilter` entries of the form `Type?param=value[&...]` as
/// literal top-level equality filters on the matching type.
fn apply_type_filter(
    resources: Vec<Value>,
    resource_type: &str,
    filters: &[String],
) -> Vec<Value> {
    let pairs: Vec<(&str, &str)> = filters
        .iter()
        .filter_map(|f| f.split_once('?'))
        .filter(|(t, _)| *t == resource_type)
        .flat_map(|(_, query)| query.split('&').filter_map(|p| p.split_once('=')))
        .collect();
    if pairs.is_empty() {
        return resources;
    }
    resources
        .into_iter()
        .filter(|resource| {
            pairs.iter().all(|(key, value)| match resource.get(*key) {
                Some(Value::String(s)) => s == value,
                Some(other) => other.to_string() == *value,
                None => false,
            })
        })
        .collect()
}

fn fail_job(job: &Arc<Mutex<ExportJob>>, message: &str) {
    let mut job = job.lock().unwrap();
    job.status = JobStatus::Error;
    job.error_message = Some(message.to_string());
    job.completed_at = Some(Utc::now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_backend::MemoryBackend;
    use serde_json::{Value, json};
    use std::time::Duration as StdDuration;

    async fn wait_terminal(manager: &ExportManager, id: &str) -> JobSnapshot {
        for _ in 0..100 {
            let snapshot = manager.get_status(id).unwrap();
            if snapshot.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        panic!("export job {} never reached a terminal state", id);
    }

    fn manager_with_patients() -> (ExportManager, MemoryBackend) {
        let backend = MemoryBackend::new();
        backend.insert("Patient", "p1", json!({"resourceType": "Patient"}));
        backend.insert("Patient", "p2", json!({"resourceType": "Patient"}));

        let manager = ExportManager::new(4, 24, "/fhir");
        manager.register_exporter("Patient", Arc::new(backend.exporter("Patient")));
        manager.set_group_resolver(Arc::new(backend.clone()));
        (manager, backend)
    }

    #[tokio::test]
    async fn test_export_lifecycle() {
        let (manager, _backend) = manager_with_patients();

        let job = manager.kick_off(vec!["Patient".to_string()], None).unwrap();
        assert_eq!(job.status, JobStatus::InProgress);

        let done = wait_terminal(&manager, &job.id).await;
        assert_eq!(done.status, JobStatus::Complete);
        assert_eq!(done.output_files.len(), 1);
        assert_eq!(done.output_files[0].resource_type, "Patient");
        assert_eq!(done.output_files[0].count, 2);
        assert_eq!(
            done.output_files[0].url,
            format!("/fhir/$export-data/{}/Patient", job.id)
        );
        // transactionTime reflects kickoff, not completion
        assert_eq!(done.request_time, job.request_time);

        let data = manager.get_job_data(&job.id, "Patient").unwrap();
        let lines: Vec<Value> = String::from_utf8(data)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["resourceType"], "Patient");
    }

    #[tokio::test]
    async fn test_unregistered_type_yields_empty_file() {
        let (manager, _backend) = manager_with_patients();
        let job = manager
            .kick_off(vec!["Observation".to_string()], None)
            .unwrap();
        let done = wait_terminal(&manager, &job.id).await;
        assert_eq!(done.status, JobStatus::Complete);
        assert_eq!(done.output_files[0].count, 0);
        assert!(manager.get_job_data(&job.id, "Observation").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let manager = ExportManager::new(1, 24, "/fhir");
        manager.register_exporter("Patient", Arc::new(SlowExporter));

        let first = manager.kick_off(vec!["Patient".to_string()], None).unwrap();
        let err = manager
            .kick_off(vec!["Patient".to_string()], None)
            .unwrap_err();
        assert!(err.to_string().contains("concurrent export jobs"));

        wait_terminal(&manager, &first.id).await;
        // capacity is back once the first job is terminal
        assert!(manager.kick_off(vec!["Patient".to_string()], None).is_ok());
    }

    struct SlowExporter;

    #[async_trait::async_trait]
    impl ResourceExporter for SlowExporter {
        async fn export_all(
            &self,
            _cancel: &CancelToken,
            _since: Option<DateTime<Utc>>,
        ) -> hearth_backend::Result<Vec<Value>> {
            tokio::time::sleep(StdDuration::from_millis(50)).await;
            Ok(vec![json!({"resourceType": "Patient", "id": "slow"})])
        }

        async fn export_by_patient(
            &self,
            cancel: &CancelToken,
            _patient_id: &str,
            since: Option<DateTime<Utc>>,
        ) -> hearth_backend::Result<Vec<Value>> {
            self.export_all(cancel, since).await
        }
    }

    struct FailingExporter;

    #[async_trait::async_trait]
    impl ResourceExporter for FailingExporter {
        async fn export_all(
            &self,
            _cancel: &CancelToken,
            _since: Option<DateTime<Utc>>,
        ) -> hearth_backend::Result<Vec<Value>> {
            Err(hearth_backend::BackendError::Other("disk on fire".to_string()))
        }

        async fn export_by_patient(
            &self,
            cancel: &CancelToken,
            _patient_id: &str,
            since: Option<DateTime<Utc>>,
        ) -> hearth_backend::Result<Vec<Value>> {
            self.export_all(cancel, since).await
        }
    }

    #[tokio::test]
    async fn test_exporter_error_fails_job() {
        let manager = ExportManager::new(4, 24, "/fhir");
        manager.register_exporter("Patient", Arc::new(FailingExporter));

        let job = manager.kick_off(vec!["Patient".to_string()], None).unwrap();
        let done = wait_terminal(&manager, &job.id).await;
        assert_eq!(done.status, JobStatus::Error);
        assert!(done.error_message.unwrap().contains("disk on fire"));

        // data endpoint refuses non-complete jobs
        assert!(manager.get_job_data(&job.id, "Patient").is_err());
    }

    #[tokio::test]
    async fn test_patient_scoped_export() {
        let backend = MemoryBackend::new();
        backend.insert(
            "Observation",
            "o1",
            json!({"resourceType": "Observation", "subject": {"reference": "Patient/p1"}}),
        );
        backend.insert(
            "Observation",
            "o2",
            json!({"resourceType": "Observation", "subject": {"reference": "Patient/p2"}}),
        );
        let manager = ExportManager::new(4, 24, "/fhir");
        manager.register_exporter("Observation", Arc::new(backend.exporter("Observation")));

        let job = manager
            .kick_off_for_patient(vec!["Observation".to_string()], "p1", None)
            .unwrap();
        assert_eq!(job.patient_id.as_deref(), Some("p1"));
        let done = wait_terminal(&manager, &job.id).await;
        assert_eq!(done.output_files[0].count, 1);
    }

    #[tokio::test]
    async fn test_group_export_accumulates_members() {
        let (manager, backend) = manager_with_patients();
        backend.put_group("g1", vec!["p1".to_string(), "p2".to_string()]);

        let job = manager
            .kick_off_group("g1", vec!["Patient".to_string()], None)
            .await
            .unwrap();
        let done = wait_terminal(&manager, &job.id).await;
        assert_eq!(done.status, JobStatus::Complete);
        assert_eq!(done.output_files[0].count, 2);
    }

    #[tokio::test]
    async fn test_group_export_unknown_group() {
        let (manager, _backend) = manager_with_patients();
        let err = manager
            .kick_off_group("missing", vec!["Patient".to_string()], None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), 404);
    }

    #[tokio::test]
    async fn test_output_format_validation() {
        let (manager, _backend) = manager_with_patients();
        for ok in ["application/fhir+ndjson", "application/ndjson", "ndjson"] {
            let job = manager
                .kick_off_with_format(vec!["Patient".to_string()], None, ok)
                .unwrap();
            assert_eq!(job.output_format, NDJSON_CONTENT_TYPE);
            wait_terminal(&manager, &job.id).await;
        }
        assert!(manager
            .kick_off_with_format(vec!["Patient".to_string()], None, "text/csv")
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_job() {
        let (manager, _backend) = manager_with_patients();
        let job = manager.kick_off(vec!["Patient".to_string()], None).unwrap();
        wait_terminal(&manager, &job.id).await;

        assert!(manager.delete_job(&job.id).is_ok());
        assert!(manager.get_status(&job.id).is_none());
        assert!(manager.delete_job(&job.id).is_err());
    }

    #[tokio::test]
    async fn test_cleanup_expired_jobs() {
        let (manager, _backend) = manager_with_patients();
        let job = manager.kick_off(vec!["Patient".to_string()], None).unwrap();
        wait_terminal(&manager, &job.id).await;

        // with a generous TTL nothing is dropped
        assert_eq!(manager.cleanup_expired_jobs(), 0);

        let strict = ExportManager {
            inner: Arc::new(Inner {
                jobs: Mutex::new(manager.inner.jobs.lock().unwrap().clone()),
                exporters: RwLock::new(HashMap::new()),
                group_resolver: RwLock::new(None),
                max_concurrent_jobs: 4,
                job_ttl: Duration::zero(),
                base_path: "/fhir".to_string(),
            }),
        };
        assert_eq!(strict.cleanup_expired_jobs(), 1);
    }

    #[tokio::test]
    async fn test_type_filter_applied() {
        let backend = MemoryBackend::new();
        backend.insert(
            "Observation",
            "o1",
            json!({"resourceType": "Observation", "status": "final"}),
        );
        backend.insert(
            "Observation",
            "o2",
            json!({"resourceType": "Observation", "status": "preliminary"}),
        );
        let manager = ExportManager::new(4, 24, "/fhir");
        manager.register_exporter("Observation", Arc::new(backend.exporter("Observation")));

        let job = manager
            .kick_off_system_with(
                vec!["Observation".to_string()],
                None,
                KickoffOptions {
                    output_format: None,
                    type_filter: vec!["Observation?status=final".to_string()],
                },
            )
            .unwrap();
        let done = wait_terminal(&manager, &job.id).await;
        assert_eq!(done.output_files[0].count, 1);
        assert_eq!(done.type_filter.len(), 1);
    }

    #[tokio::test]
    async fn test_status_monotonic() {
        let (manager, _backend) = manager_with_patients();
        let job = manager.kick_off(vec!["Patient".to_string()], None).unwrap();
        let done = wait_terminal(&manager, &job.id).await;
        assert_eq!(done.status, JobStatus::Complete);
        // once terminal, later reads never regress
        for _ in 0..5 {
            assert_eq!(manager.get_status(&job.id).unwrap().status, JobStatus::Complete);
        }
    }
}
