//! Job lifecycle: submission, tracking, and progress snapshots.

mod registry;

pub use registry::{JobRegistry, Submission};

pub use crate::domain::job::{Job, JobId, JobKind, JobSnapshot, JobStatus};
