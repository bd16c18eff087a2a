//! Typed access to the recruiting resources: jobs, candidates, applications.

mod api;
mod types;

pub use api::{Applications, Candidates, Jobs};
pub use types::{
  from_json, Application, ApplicationStatus, Candidate, CandidateCreate, Job, JobCreate, JobStatus,
  JobValidationError, SalaryRange,
};
