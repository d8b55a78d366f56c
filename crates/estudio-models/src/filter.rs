//! Listing filters for job queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Job, JobStatus};

/// Page size used when a listing does not ask for one.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Upper bound on a single page.
pub const MAX_LIST_LIMIT: usize = 500;

/// Filter applied to job listings.
///
/// `created_after` is inclusive and `created_before` exclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFilter {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl JobFilter {
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Effective page size, clamped to `MAX_LIST_LIMIT`.
    pub fn page_size(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT)
    }

    pub fn matches(&self, job: &Job) -> bool {
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        if let Some(project_id) = &self.project_id {
            if &job.project_id != project_id {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if &job.user_id != user_id {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if job.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if job.created_at >= before {
                return false;
            }
        }
        true
    }

    /// Filter, order newest first, then page.
    pub fn apply(&self, jobs: impl IntoIterator<Item = Job>) -> Vec<Job> {
        let mut matched: Vec<Job> = jobs.into_iter().filter(|j| self.matches(j)).collect();
        sort_newest_first(&mut matched);
        matched
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.page_size())
            .collect()
    }
}

/// Order by `created_at` descending, ties broken by id for a stable order.
pub fn sort_newest_first(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobSubmission, JobUpdate};
    use chrono::Duration;

    fn job_at(project: &str, offset_secs: i64) -> Job {
        let base = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Job::from_submission(
            JobSubmission::new(project, "u1", "s3://in"),
            base + Duration::seconds(offset_secs),
        )
        .unwrap()
    }

    #[test]
    fn test_orders_newest_first() {
        let jobs = vec![job_at("a", 0), job_at("b", 20), job_at("c", 10)];
        let listed = JobFilter::default().apply(jobs);
        let projects: Vec<_> = listed.iter().map(|j| j.project_id.as_str()).collect();
        assert_eq!(projects, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_filters_by_status() {
        let mut queued = job_at("a", 0);
        queued
            .apply(&JobUpdate::status(JobStatus::Queued), queued.created_at)
            .unwrap();
        let pending = job_at("b", 1);

        let listed = JobFilter::with_status(JobStatus::Queued).apply(vec![queued, pending]);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].project_id, "a");
    }

    #[test]
    fn test_time_range_bounds() {
        let jobs = vec![job_at("a", 0), job_at("b", 10), job_at("c", 20)];
        let filter = JobFilter {
            created_after: Some(jobs[1].created_at),
            created_before: Some(jobs[2].created_at),
            ..JobFilter::default()
        };
        let listed = filter.apply(jobs);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].project_id, "b");
    }

    #[test]
    fn test_paging() {
        let jobs: Vec<Job> = (0..10).map(|i| job_at("p", i)).collect();
        let filter = JobFilter {
            limit: Some(3),
            offset: Some(2),
            ..JobFilter::default()
        };
        let listed = filter.apply(jobs);
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].created_at, job_at("p", 7).created_at);
    }

    #[test]
    fn test_page_size_is_clamped() {
        let filter = JobFilter {
            limit: Some(10_000),
            ..JobFilter::default()
        };
        assert_eq!(filter.page_size(), MAX_LIST_LIMIT);
        assert_eq!(JobFilter::default().page_size(), DEFAULT_LIST_LIMIT);
    }
}
