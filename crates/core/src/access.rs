use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::organizer::{OrganizerId, PersonId};
use crate::errors::ApplicationError;

/// The authenticated party behind a request, passed explicitly into every
/// service call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub person_id: PersonId,
    pub email: String,
    pub is_admin: bool,
    /// Organizers this caller may act for as staff.
    pub organizer_roles: BTreeSet<OrganizerId>,
    pub correlation_id: String,
}

impl Caller {
    pub fn person(person_id: PersonId, email: impl Into<String>) -> Self {
        Self {
            person_id,
            email: email.into(),
            is_admin: false,
            organizer_roles: BTreeSet::new(),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    /// Operator identity used by the CLI, the expiry sweep and the payment
    /// webhook.
    pub fn system(actor: &str) -> Self {
        Self {
            person_id: PersonId(format!("system:{actor}")),
            email: String::new(),
            is_admin: true,
            organizer_roles: BTreeSet::new(),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_organizer_role(mut self, organizer_id: OrganizerId) -> Self {
        self.organizer_roles.insert(organizer_id);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn owns(&self, person_id: &PersonId) -> bool {
        &self.person_id == person_id
    }

    pub fn actor(&self) -> &str {
        &self.person_id.0
    }
}

pub trait AuthorizationGate: Send + Sync {
    fn assert_organizer_access(
        &self,
        caller: &Caller,
        organizer_id: &OrganizerId,
    ) -> Result<(), ApplicationError>;

    fn assert_admin(&self, caller: &Caller) -> Result<(), ApplicationError>;
}

/// Admins pass every check; staff pass for the organizers in their role set.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoleGate;

impl AuthorizationGate for RoleGate {
    fn assert_organizer_access(
        &self,
        caller: &Caller,
        organizer_id: &OrganizerId,
    ) -> Result<(), ApplicationError> {
        if caller.is_admin || caller.organizer_roles.contains(organizer_id) {
            return Ok(());
        }
        Err(ApplicationError::Unauthorized(format!(
            "caller `{}` has no access to organizer `{}`",
            caller.person_id.0, organizer_id.0
        )))
    }

    fn assert_admin(&self, caller: &Caller) -> Result<(), ApplicationError> {
        if caller.is_admin {
            return Ok(());
        }
        Err(ApplicationError::Unauthorized(format!(
            "caller `{}` is not an administrator",
            caller.person_id.0
        )))
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::organizer::{OrganizerId, PersonId};
    use crate::errors::ApplicationError;

    use super::{AuthorizationGate, Caller, RoleGate};

    #[test]
    fn staff_pass_only_for_their_organizers() {
        let gate = RoleGate;
        let staff = Caller::person(PersonId("p-1".to_string()), "staff@example.no")
            .with_organizer_role(OrganizerId("org-1".to_string()));

        assert!(gate.assert_organizer_access(&staff, &OrganizerId("org-1".to_string())).is_ok());
        assert!(matches!(
            gate.assert_organizer_access(&staff, &OrganizerId("org-2".to_string())),
            Err(ApplicationError::Unauthorized(_))
        ));
        assert!(gate.assert_admin(&staff).is_err());
    }

    #[test]
    fn system_caller_is_admin() {
        let gate = RoleGate;
        let system = Caller::system("expiry-sweep");

        assert!(gate.assert_admin(&system).is_ok());
        assert!(gate.assert_organizer_access(&system, &OrganizerId("any".to_string())).is_ok());
        assert_eq!(system.actor(), "system:expiry-sweep");
    }
}
