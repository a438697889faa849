//! Records the guard layer reads before letting a request through.

use serde::{Deserialize, Serialize};

/// Column every tenant-isolated table carries.
pub const TENANT_COLUMN: &str = "tenant_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Inactive,
    Suspended,
}

impl TenantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Inactive => "inactive",
            TenantStatus::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Some(TenantStatus::Active),
            "inactive" => Some(TenantStatus::Inactive),
            "suspended" => Some(TenantStatus::Suspended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub subdomain: Option<String>,
    pub status: TenantStatus,
    pub contact_email: Option<String>,
    pub subscription_plan: Option<String>,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub role_id: Option<i64>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Admin,
    Teacher,
    Parent,
    Student,
}

impl RoleKind {
    pub const ALL: [RoleKind; 4] = [
        RoleKind::Admin,
        RoleKind::Teacher,
        RoleKind::Parent,
        RoleKind::Student,
    ];

    /// Name stored in the `roles` table.
    pub fn display_name(self) -> &'static str {
        match self {
            RoleKind::Admin => "Admin",
            RoleKind::Teacher => "Teacher",
            RoleKind::Parent => "Parent",
            RoleKind::Student => "Student",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(RoleKind::Admin),
            "teacher" => Some(RoleKind::Teacher),
            "parent" => Some(RoleKind::Parent),
            "student" => Some(RoleKind::Student),
            _ => None,
        }
    }

    /// Canonical role ids used by provisioning before per-tenant roles existed.
    pub fn from_canonical_id(role_id: i64) -> Option<Self> {
        match role_id {
            1 => Some(RoleKind::Admin),
            2 => Some(RoleKind::Teacher),
            3 => Some(RoleKind::Parent),
            4 => Some(RoleKind::Student),
            _ => None,
        }
    }

    /// Resolves a user's role: the stored role name wins, then the canonical
    /// id table. Anything else stays unresolved; there is no default role.
    pub fn resolve(stored_name: Option<&str>, role_id: Option<i64>) -> Option<Self> {
        stored_name
            .and_then(RoleKind::parse)
            .or_else(|| role_id.and_then(RoleKind::from_canonical_id))
    }
}

/// Guardian-to-student relation, with the tenant the student belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianLink {
    pub student_id: String,
    pub tenant_id: String,
}
