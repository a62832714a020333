//! Role access control: permissions carried by roles and the checks
//! handlers run against the authenticated principal.

use crate::db::models::{Customer, Role};
use crate::error::CrmError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    CustomersRead,
    CustomersWrite,
    LeadsImport,
    LeadsDistribute,
    DebtsWrite,
    CreditReports,
    BankValidate,
    PaymentsWrite,
    CommsSend,
    AppointmentsWrite,
    DocprocManage,
    ContractsSend,
    TasksWrite,
    UsersManage,
    CommissionsRead,
}

impl Permission {
    pub const ALL: [Permission; 15] = [
        Permission::CustomersRead,
        Permission::CustomersWrite,
        Permission::LeadsImport,
        Permission::LeadsDistribute,
        Permission::DebtsWrite,
        Permission::CreditReports,
        Permission::BankValidate,
        Permission::PaymentsWrite,
        Permission::CommsSend,
        Permission::AppointmentsWrite,
        Permission::DocprocManage,
        Permission::ContractsSend,
        Permission::TasksWrite,
        Permission::UsersManage,
        Permission::CommissionsRead,
    ];
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Principal {
    /// `None` for the admin key principal.
    pub user_id: Option<i64>,
    pub name: String,
    pub role: String,
    pub permissions: HashSet<Permission>,
    pub own_customers_only: bool,
}

impl Principal {
    pub fn admin() -> Self {
        Self {
            user_id: None,
            name: "admin-key".to_string(),
            role: "admin".to_string(),
            permissions: Permission::ALL.into_iter().collect(),
            own_customers_only: false,
        }
    }

    pub fn from_role(user_id: i64, name: String, role: &Role) -> Self {
        Self {
            user_id: Some(user_id),
            name,
            role: role.name.clone(),
            permissions: role.permissions.iter().copied().collect(),
            own_customers_only: role.own_customers_only,
        }
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> Result<(), CrmError> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(CrmError::Forbidden(format!(
                "role `{}` lacks permission {:?}",
                self.role, permission
            )))
        }
    }

    pub fn can_access(&self, customer: &Customer) -> bool {
        !self.own_customers_only
            || (self.user_id.is_some() && customer.assigned_to == self.user_id)
    }

    /// Permission check plus ownership check for customer-scoped routes.
    pub fn require_customer(
        &self,
        permission: Permission,
        customer: &Customer,
    ) -> Result<(), CrmError> {
        self.require(permission)?;
        if self.can_access(customer) {
            Ok(())
        } else {
            Err(CrmError::Forbidden(format!(
                "customer {} is not assigned to you",
                customer.id
            )))
        }
    }

    /// Assignment filter applied to list queries for restricted roles.
    pub fn assignment_scope(&self) -> Option<i64> {
        if self.own_customers_only {
            Some(self.user_id.unwrap_or(-1))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Stage;
    use chrono::Utc;

    fn customer(assigned_to: Option<i64>) -> Customer {
        Customer {
            id: 7,
            stage: Stage::Lead,
            disposition_id: 1,
            disposition: "New Lead".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Byrne".to_string(),
            email: None,
            phone: None,
            address: None,
            city: None,
            state: None,
            zip: None,
            estimated_debt: None,
            assigned_to,
            source: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn agent_role() -> Role {
        Role {
            id: 3,
            name: "sales_agent".to_string(),
            permissions: vec![Permission::CustomersRead, Permission::CommsSend],
            own_customers_only: true,
        }
    }

    #[test]
    fn admin_holds_every_permission() {
        let admin = Principal::admin();
        for p in Permission::ALL {
            assert!(admin.require(p).is_ok());
        }
        assert!(admin.can_access(&customer(None)));
    }

    #[test]
    fn missing_permission_is_forbidden() {
        let agent = Principal::from_role(11, "Jo".into(), &agent_role());
        assert!(matches!(
            agent.require(Permission::UsersManage),
            Err(CrmError::Forbidden(_))
        ));
    }

    #[test]
    fn restricted_roles_only_see_their_customers() {
        let agent = Principal::from_role(11, "Jo".into(), &agent_role());
        assert!(agent.can_access(&customer(Some(11))));
        assert!(!agent.can_access(&customer(Some(12))));
        assert!(!agent.can_access(&customer(None)));
        assert_eq!(agent.assignment_scope(), Some(11));
        assert!(
            agent
                .require_customer(Permission::CustomersRead, &customer(Some(12)))
                .is_err()
        );
    }
}
