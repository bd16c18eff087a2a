use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::client::Client;
use crate::error::{ApiError, ApiResult};
use crate::executor::{ApiRequest, Method, Params};
use crate::recruiting::types::{
  from_json, Application, ApplicationStatus, Candidate, CandidateCreate, Job, JobCreate, JobStatus,
};

fn to_body(payload: &impl Serialize) -> ApiResult<Value> {
  serde_json::to_value(payload).map_err(|e| ApiError::Invalid(e.to_string()))
}

/// Job postings (`/jobs`)
#[derive(Clone)]
pub struct Jobs {
  client: Client,
}

impl Jobs {
  pub fn new(client: Client) -> Self {
    Self { client }
  }

  pub async fn fetch_jobs(&self) -> ApiResult<Vec<Job>> {
    from_json(self.client.list("jobs", Params::new()).await?)
  }

  pub async fn fetch_job(&self, id: i64) -> ApiResult<Job> {
    from_json(self.client.get("jobs", id).await?)
  }

  /// Postings owned by the signed-in hiring manager, optionally by status.
  pub async fn fetch_my_jobs(&self, status: Option<JobStatus>) -> ApiResult<Vec<Job>> {
    let mut params = Params::new();
    if let Some(status) = status {
      params.insert("status".to_string(), status.as_str().to_string());
    }
    let request = ApiRequest::get("/jobs/my-jobs").with_params(params);
    from_json(self.client.invoke(request).await?)
  }

  /// Validates locally first; an invalid posting never reaches the network.
  pub async fn create_job(&self, job: &JobCreate) -> ApiResult<Job> {
    job.validate().map_err(|e| ApiError::Invalid(e.to_string()))?;
    let created = self.client.create("jobs", to_body(job)?).await?;
    debug!(id = %created["id"], "Job created");
    from_json(created)
  }

  pub async fn update_job_status(&self, id: i64, status: JobStatus) -> ApiResult<Job> {
    let request = ApiRequest::new(Method::Patch, format!("/jobs/{}/status", id))
      .with_body(json!({ "status": status.as_str() }));
    from_json(self.client.invoke(request).await?)
  }
}

/// Candidate profiles (`/candidates`)
#[derive(Clone)]
pub struct Candidates {
  client: Client,
}

impl Candidates {
  pub fn new(client: Client) -> Self {
    Self { client }
  }

  /// Supported filters: `email` (substring) and `skills` (comma-separated).
  pub async fn fetch_candidates(&self, params: Params) -> ApiResult<Vec<Candidate>> {
    from_json(self.client.list("candidates", params).await?)
  }

  pub async fn fetch_candidate(&self, id: i64) -> ApiResult<Candidate> {
    from_json(self.client.get("candidates", id).await?)
  }

  pub async fn create_candidate(&self, candidate: &CandidateCreate) -> ApiResult<Candidate> {
    from_json(self.client.create("candidates", to_body(candidate)?).await?)
  }
}

/// Job applications (`/applications`)
#[derive(Clone)]
pub struct Applications {
  client: Client,
}

impl Applications {
  pub fn new(client: Client) -> Self {
    Self { client }
  }

  /// Supported filters: `job_id`, `candidate_id` and `status`.
  pub async fn fetch_applications(&self, params: Params) -> ApiResult<Vec<Application>> {
    from_json(self.client.list("applications", params).await?)
  }

  pub async fn update_application_status(&self, id: i64, status: ApplicationStatus) -> ApiResult<Application> {
    let request = ApiRequest::new(Method::Put, format!("/applications/{}/status", id))
      .with_body(json!({ "status": status.as_str() }));
    from_json(self.client.invoke(request).await?)
  }
}
