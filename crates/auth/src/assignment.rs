use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use atrium_core::{OrganizationId, ProjectId, VendorId};

/// A vendor's assignment to a project.
///
/// Vendor visibility is derived from these at read time, so ending or
/// revoking an assignment takes effect on the very next request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectAssignment {
    pub vendor_id: VendorId,
    pub project_id: ProjectId,
    pub org_id: OrganizationId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ProjectAssignment {
    pub fn new(
        org_id: OrganizationId,
        vendor_id: VendorId,
        project_id: ProjectId,
        starts_at: DateTime<Utc>,
    ) -> Self {
        Self {
            vendor_id,
            project_id,
            org_id,
            starts_at,
            ends_at: None,
            revoked_at: None,
        }
    }

    pub fn ending_at(mut self, ends_at: DateTime<Utc>) -> Self {
        self.ends_at = Some(ends_at);
        self
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now
            && self.ends_at.is_none_or(|end| now < end)
            && self.revoked_at.is_none_or(|revoked| now < revoked)
    }
}
