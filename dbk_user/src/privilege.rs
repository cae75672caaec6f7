//! Enabling the one token privilege the driver insists on.
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::os::{
    AdjustError, Adjustment, Luid, OsError, SecurityContext, ERROR_ACCESS_DENIED,
    ERROR_PRIVILEGE_NOT_HELD,
};

/// Proof that a privilege is enabled on this process's token.
///
/// Only [`PrivilegeEscalator::escalate`] can produce one, so holding a grant
/// is enough to show escalation happened before the device was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeGrant {
    privilege: String,
    luid: Luid,
}

impl PrivilegeGrant {
    pub fn privilege(&self) -> &str {
        &self.privilege
    }

    pub fn luid(&self) -> Luid {
        self.luid
    }
}

/// Enables privileges on the process token and remembers what was granted.
///
/// The token adjustment is process-wide and never revoked, so once a
/// privilege has been granted later requests are answered from the cache
/// without touching the token again.
pub struct PrivilegeEscalator<S> {
    security: S,
    grants: Vec<PrivilegeGrant>,
}

impl<S: SecurityContext> PrivilegeEscalator<S> {
    pub fn new(security: S) -> Self {
        Self {
            security,
            grants: Vec::new(),
        }
    }

    pub fn granted(&self, privilege: &str) -> Option<&PrivilegeGrant> {
        self.grants.iter().find(|g| g.privilege == privilege)
    }

    /// Enable `privilege` and verify the token really holds it.
    pub fn escalate(&mut self, privilege: &str) -> Result<PrivilegeGrant> {
        if let Some(grant) = self.granted(privilege) {
            debug!("{privilege} already granted");
            return Ok(grant.clone());
        }

        let luid = self
            .security
            .lookup_privilege(privilege)
            .map_err(|os| Error::LookupFailed {
                privilege: privilege.to_string(),
                os,
            })?;
        debug!(
            "{privilege} has LUID {:08X}:{:08X}",
            luid.high as u32, luid.low
        );

        match self.security.enable_privilege(luid) {
            Ok(Adjustment::Complete) => {}
            Ok(Adjustment::NotAllAssigned) => {
                warn!("{privilege} not assigned to the token (not elevated?)");
                return Err(Error::PartialGrant {
                    privilege: privilege.to_string(),
                });
            }
            Err(err) => return Err(classify_adjust_error(privilege, err)),
        }

        info!("{privilege} enabled");
        let grant = PrivilegeGrant {
            privilege: privilege.to_string(),
            luid,
        };
        self.grants.push(grant.clone());
        Ok(grant)
    }
}

fn classify_adjust_error(privilege: &str, err: AdjustError) -> Error {
    let privilege = privilege.to_string();
    match err {
        AdjustError::OpenToken(os @ OsError(ERROR_ACCESS_DENIED))
        | AdjustError::Adjust(os @ OsError(ERROR_ACCESS_DENIED | ERROR_PRIVILEGE_NOT_HELD)) => {
            Error::PermissionDenied { privilege, os }
        }
        AdjustError::OpenToken(os) | AdjustError::Adjust(os) => {
            Error::AdjustFailed { privilege, os }
        }
    }
}
