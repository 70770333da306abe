//! Security domains and permission grants.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::InstallError;

/// How far a permission may be granted. Ordered from most to least
/// restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantLevel {
    /// Fixed domain-mandated denial.
    NeverAllow,
    /// The user is asked on every use.
    Oneshot,
    /// The user is asked once per run.
    Session,
    /// The user is asked once, ever.
    Blanket,
    /// Fixed domain-mandated grant.
    AlwaysAllow,
}

/// A named trust tier fixing the permission ceiling for its suites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityDomain {
    /// Domain name recorded on installed suites.
    pub name: String,
    /// Whether suites in this domain count as trusted.
    pub trusted: bool,
    /// Ceiling for permissions not listed explicitly.
    pub default_ceiling: GrantLevel,
    /// Per-permission ceilings.
    pub ceilings: HashMap<String, GrantLevel>,
}

impl SecurityDomain {
    /// The ceiling for one permission.
    #[must_use]
    pub fn ceiling(&self, permission: &str) -> GrantLevel {
        self.ceilings
            .get(permission)
            .copied()
            .unwrap_or(self.default_ceiling)
    }

    /// A permissive trusted domain, every permission at blanket.
    #[must_use]
    pub fn trusted_default() -> Self {
        Self {
            name: "identified".to_owned(),
            trusted: true,
            default_ceiling: GrantLevel::Blanket,
            ceilings: HashMap::new(),
        }
    }

    /// A restrictive domain for unsigned suites, one-shot everywhere.
    #[must_use]
    pub fn unsigned_default() -> Self {
        Self {
            name: "unidentified".to_owned(),
            trusted: false,
            default_ceiling: GrantLevel::Oneshot,
            ceilings: HashMap::new(),
        }
    }
}

/// One granted permission on an installed suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    /// Permission name.
    pub name: String,
    /// Current grant level.
    pub level: GrantLevel,
}

/// Compute the initial grant set: domain ceilings intersected with the
/// suite's declared permission lists. A required permission the domain
/// denies is fatal; an optional one is silently dropped.
///
/// # Errors
///
/// Returns [`InstallError::Authorization`] naming the first required
/// permission the domain denies.
pub fn initial_grants(
    domain: &SecurityDomain,
    required: &[String],
    optional: &[String],
) -> Result<Vec<PermissionGrant>, InstallError> {
    let mut grants = Vec::new();
    for name in required {
        let level = domain.ceiling(name);
        if level == GrantLevel::NeverAllow {
            return Err(InstallError::Authorization(name.clone()));
        }
        grants.push(PermissionGrant {
            name: name.clone(),
            level,
        });
    }
    for name in optional {
        let level = domain.ceiling(name);
        if level == GrantLevel::NeverAllow {
            log::debug!("dropping optional permission '{name}' denied by domain");
            continue;
        }
        grants.push(PermissionGrant {
            name: name.clone(),
            level,
        });
    }
    Ok(grants)
}

/// Carry forward the user's previous per-permission decisions where the
/// new domain's ceiling still admits them.
///
/// A permission at a fixed level (always/never) stays at the new domain's
/// value. A previously one-shot/session/blanket decision carries forward
/// only when the new ceiling is not stricter than the decided level;
/// otherwise the grant stays at the new domain default rather than being
/// silently reshaped.
pub fn carry_forward(previous: &[PermissionGrant], grants: &mut [PermissionGrant], domain: &SecurityDomain) {
    for grant in grants.iter_mut() {
        let Some(old) = previous.iter().find(|p| p.name == grant.name) else {
            continue;
        };
        match old.level {
            GrantLevel::AlwaysAllow | GrantLevel::NeverAllow => {}
            decided => {
                if decided <= domain.ceiling(&grant.name) {
                    grant.level = decided;
                }
            }
        }
    }
}
