//! Typed resources served by the recruiting API.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, ApiResult};

/// Convert a facade payload into a typed resource.
pub fn from_json<T: DeserializeOwned>(value: Value) -> ApiResult<T> {
  serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  #[default]
  Draft,
  Open,
  Closed,
}

impl JobStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      JobStatus::Draft => "draft",
      JobStatus::Open => "open",
      JobStatus::Closed => "closed",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SalaryRange {
  pub min: f64,
  pub max: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobValidationError {
  #[error("title must be between 5 and 100 characters")]
  Title,
  #[error("{0} must be at least 50 characters")]
  TooShort(&'static str),
  #[error("location must be at most 100 characters")]
  Location,
  #[error("minimum salary cannot be greater than maximum")]
  SalaryOrder,
  #[error("salary values cannot be negative")]
  NegativeSalary,
}

/// Payload for creating a job posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCreate {
  pub title: String,
  pub description: String,
  pub requirements: String,
  pub location: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub salary_range: Option<SalaryRange>,
  #[serde(default)]
  pub status: JobStatus,
}

impl JobCreate {
  /// Same limits the backend enforces, checked before anything is sent.
  pub fn validate(&self) -> Result<(), JobValidationError> {
    let title = self.title.chars().count();
    if !(5..=100).contains(&title) {
      return Err(JobValidationError::Title);
    }
    if self.description.chars().count() < 50 {
      return Err(JobValidationError::TooShort("description"));
    }
    if self.requirements.chars().count() < 50 {
      return Err(JobValidationError::TooShort("requirements"));
    }
    if self.location.chars().count() > 100 {
      return Err(JobValidationError::Location);
    }
    if let Some(salary) = &self.salary_range {
      if salary.min > salary.max {
        return Err(JobValidationError::SalaryOrder);
      }
      if salary.min < 0.0 || salary.max < 0.0 {
        return Err(JobValidationError::NegativeSalary);
      }
    }
    Ok(())
  }
}

/// A job posting as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
  pub id: i64,
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub requirements: String,
  #[serde(default)]
  pub location: String,
  pub salary_range: Option<SalaryRange>,
  #[serde(default)]
  pub status: JobStatus,
  pub hiring_manager_id: Option<i64>,
  pub created_at: Option<String>,
  pub updated_at: Option<String>,
}

// ============================================================================
// Candidates
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
  pub id: i64,
  pub first_name: String,
  pub last_name: String,
  pub email: String,
  pub phone: Option<String>,
  pub linkedin_profile: Option<String>,
  pub total_experience_years: Option<f64>,
  pub education: Option<String>,
  #[serde(default)]
  pub skills: Vec<String>,
  pub created_at: Option<String>,
  pub updated_at: Option<String>,
}

impl Candidate {
  pub fn full_name(&self) -> String {
    format!("{} {}", self.first_name, self.last_name)
  }
}

/// Payload for registering a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateCreate {
  pub first_name: String,
  pub last_name: String,
  pub email: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub linkedin_profile: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub skills: Vec<String>,
}

// ============================================================================
// Applications
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
  #[default]
  Applied,
  Reviewed,
  Interviewed,
  Offered,
  Hired,
  Rejected,
}

impl ApplicationStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      ApplicationStatus::Applied => "applied",
      ApplicationStatus::Reviewed => "reviewed",
      ApplicationStatus::Interviewed => "interviewed",
      ApplicationStatus::Offered => "offered",
      ApplicationStatus::Hired => "hired",
      ApplicationStatus::Rejected => "rejected",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
  pub id: i64,
  pub job_id: i64,
  pub candidate_id: i64,
  #[serde(default)]
  pub status: ApplicationStatus,
  pub matching_score: Option<f64>,
  pub notes: Option<String>,
  pub application_date: Option<String>,
  /// Present when the backend embeds details
  pub job: Option<Job>,
  pub candidate: Option<Candidate>,
}
