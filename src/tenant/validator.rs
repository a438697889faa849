//! Tenant access validation.
//!
//! Confirms that the acting user may work inside the requested tenant before
//! any data operation runs. Successful grants are remembered for a short
//! while; failures never are.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use super::backend::Backend;
use super::error::TenantError;
use super::guardian::GuardianScope;
use super::model::{RoleKind, Tenant};
use crate::cache::TtlCache;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AccessGrant {
    /// The user is a member of the tenant.
    Member { tenant: Tenant, role: Option<RoleKind> },
    /// Exempt role, scoped by guardian links instead of membership.
    Guardian {
        tenant: Option<Tenant>,
        scope: GuardianScope,
    },
}

impl AccessGrant {
    pub fn tenant(&self) -> Option<&Tenant> {
        match self {
            AccessGrant::Member { tenant, .. } => Some(tenant),
            AccessGrant::Guardian { tenant, .. } => tenant.as_ref(),
        }
    }

    pub fn guardian_scope(&self) -> Option<&GuardianScope> {
        match self {
            AccessGrant::Guardian { scope, .. } => Some(scope),
            AccessGrant::Member { .. } => None,
        }
    }

    pub fn is_member(&self) -> bool {
        matches!(self, AccessGrant::Member { .. })
    }
}

type GrantKey = (String, String);

pub struct TenantValidator {
    exempt_roles: Vec<RoleKind>,
    grants: TtlCache<GrantKey, AccessGrant>,
    remember: bool,
}

fn non_blank(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

impl TenantValidator {
    /// A zero `grant_ttl` turns grant caching off.
    pub fn new(exempt_roles: Vec<RoleKind>, grant_ttl: Duration, max_grants: usize) -> Self {
        Self {
            exempt_roles,
            grants: TtlCache::new(grant_ttl, max_grants),
            remember: !grant_ttl.is_zero(),
        }
    }

    pub fn is_exempt(&self, role: Option<RoleKind>) -> bool {
        role.map(|r| self.exempt_roles.contains(&r)).unwrap_or(false)
    }

    pub fn validate(
        &mut self,
        backend: &dyn Backend,
        user_id: Option<&str>,
        tenant_id: Option<&str>,
        context: &str,
    ) -> Result<AccessGrant, TenantError> {
        let Some(user_id) = non_blank(user_id) else {
            warn!(context, "tenant access denied: no authenticated user");
            return Err(TenantError::NotAuthenticated);
        };
        let tenant_id = non_blank(tenant_id);

        if let Some(t) = tenant_id {
            let key = (t.to_string(), user_id.to_string());
            if let Some(grant) = self.grants.get(&key) {
                debug!(context, user_id, tenant_id = t, "tenant access served from cache");
                return Ok(grant);
            }
        }

        match self.check(backend, user_id, tenant_id) {
            Ok(grant) => {
                if let (true, Some(t)) = (self.remember, tenant_id) {
                    self.grants
                        .insert((t.to_string(), user_id.to_string()), grant.clone());
                }
                Ok(grant)
            }
            Err(e) => {
                warn!(context, user_id, tenant_id = ?tenant_id, code = e.code(), error = %e, "tenant access denied");
                Err(e)
            }
        }
    }

    fn check(
        &self,
        backend: &dyn Backend,
        user_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<AccessGrant, TenantError> {
        let user = backend
            .find_user(user_id)?
            .ok_or_else(|| TenantError::UnknownUser {
                user_id: user_id.to_string(),
            })?;
        let stored_role = match user.role_id {
            Some(id) => backend.role_name(id)?,
            None => None,
        };
        let role = RoleKind::resolve(stored_role.as_deref(), user.role_id);

        if self.is_exempt(role) {
            let scope = GuardianScope::new(&user.id, backend.guardian_links(&user.id)?)?;
            let tenant = match tenant_id {
                Some(t) => {
                    if scope.students_in(t).is_empty() {
                        return Err(TenantError::access_denied(
                            "guardian has no linked students in this school",
                        ));
                    }
                    Some(active_tenant(backend, t)?)
                }
                None => None,
            };
            return Ok(AccessGrant::Guardian { tenant, scope });
        }

        let tenant_id = tenant_id.ok_or(TenantError::NoTenantContext)?;
        let tenant = active_tenant(backend, tenant_id)?;
        if user.tenant_id.as_deref() != Some(tenant_id) {
            return Err(TenantError::access_denied(
                "user does not belong to this tenant",
            ));
        }
        Ok(AccessGrant::Member { tenant, role })
    }

    pub fn forget_user(&mut self, user_id: &str) -> usize {
        self.grants.remove_where(|(_, u)| u == user_id)
    }

    pub fn forget_tenant(&mut self, tenant_id: &str) -> usize {
        self.grants.remove_where(|(t, _)| t == tenant_id)
    }

    pub fn clear(&mut self) {
        self.grants.clear();
    }
}

fn active_tenant(backend: &dyn Backend, tenant_id: &str) -> Result<Tenant, TenantError> {
    backend
        .find_tenant(tenant_id)?
        .filter(Tenant::is_active)
        .ok_or_else(|| TenantError::InvalidTenant {
            tenant_id: tenant_id.to_string(),
        })
}
