//! User, role and resource-role lookups owned by the surrounding platform.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;

use crate::error::FlowResult;
use crate::models::{ResourceRole, User, UserResourceRole};

/// Read-only view of the platform's identity data
#[async_trait]
pub trait RoleDirectory: Send + Sync + Debug {
    /// Organization-wide roles of a user
    async fn user_role_ids(&self, user_id: i64) -> FlowResult<Vec<i64>>;

    async fn user_resource_roles(&self, user_id: i64) -> FlowResult<Vec<UserResourceRole>>;

    /// Holders of each role, keyed by role id
    async fn user_ids_by_role_ids(
        &self,
        role_ids: &[i64],
    ) -> FlowResult<HashMap<i64, HashSet<i64>>>;

    /// Holders of each `"{resourceId}:{resourceRoleId}"`, keyed by identifier
    async fn user_ids_by_resource_role_identifiers(
        &self,
        identifiers: &[String],
    ) -> FlowResult<HashMap<String, HashSet<i64>>>;

    async fn users_by_ids(&self, user_ids: &[i64]) -> FlowResult<Vec<User>>;

    async fn resource_roles_by_ids(&self, ids: &[i64]) -> FlowResult<Vec<ResourceRole>>;
}

#[derive(Debug, Default)]
struct DirectoryState {
    users: HashMap<i64, User>,
    user_roles: HashMap<i64, HashSet<i64>>,
    resource_roles: HashMap<i64, ResourceRole>,
    user_resource_roles: Vec<UserResourceRole>,
}

/// Directory held in memory; used for development and tests
#[derive(Debug, Default)]
pub struct InMemoryRoleDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) {
        self.state.write().users.insert(user.id, user);
    }

    pub fn grant_role(&self, user_id: i64, role_id: i64) {
        self.state
            .write()
            .user_roles
            .entry(user_id)
            .or_default()
            .insert(role_id);
    }

    pub fn add_resource_role(&self, role: ResourceRole) {
        self.state.write().resource_roles.insert(role.id, role);
    }

    pub fn grant_resource_role(&self, grant: UserResourceRole) {
        let mut state = self.state.write();
        if !state.user_resource_roles.contains(&grant) {
            state.user_resource_roles.push(grant);
        }
    }
}

#[async_trait]
impl RoleDirectory for InMemoryRoleDirectory {
    async fn user_role_ids(&self, user_id: i64) -> FlowResult<Vec<i64>> {
        let state = self.state.read();
        let mut roles: Vec<i64> = state
            .user_roles
            .get(&user_id)
            .map(|roles| roles.iter().copied().collect())
            .unwrap_or_default();
        roles.sort_unstable();
        Ok(roles)
    }

    async fn user_resource_roles(&self, user_id: i64) -> FlowResult<Vec<UserResourceRole>> {
        Ok(self
            .state
            .read()
            .user_resource_roles
            .iter()
            .filter(|grant| grant.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn user_ids_by_role_ids(
        &self,
        role_ids: &[i64],
    ) -> FlowResult<HashMap<i64, HashSet<i64>>> {
        let state = self.state.read();
        let mut holders: HashMap<i64, HashSet<i64>> = HashMap::new();
        for (user_id, roles) in &state.user_roles {
            for role_id in role_ids.iter().filter(|r| roles.contains(r)) {
                holders.entry(*role_id).or_default().insert(*user_id);
            }
        }
        Ok(holders)
    }

    async fn user_ids_by_resource_role_identifiers(
        &self,
        identifiers: &[String],
    ) -> FlowResult<HashMap<String, HashSet<i64>>> {
        let wanted: HashSet<&str> = identifiers.iter().map(String::as_str).collect();
        let mut holders: HashMap<String, HashSet<i64>> = HashMap::new();
        for grant in &self.state.read().user_resource_roles {
            let identifier = grant.identifier();
            if wanted.contains(identifier.as_str()) {
                holders.entry(identifier).or_default().insert(grant.user_id);
            }
        }
        Ok(holders)
    }

    async fn users_by_ids(&self, user_ids: &[i64]) -> FlowResult<Vec<User>> {
        let state = self.state.read();
        Ok(user_ids
            .iter()
            .filter_map(|id| state.users.get(id).cloned())
            .collect())
    }

    async fn resource_roles_by_ids(&self, ids: &[i64]) -> FlowResult<Vec<ResourceRole>> {
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.resource_roles.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64) -> User {
        User {
            id,
            name: format!("user{id}"),
            account_name: format!("account{id}"),
            organization_id: 1,
        }
    }

    #[tokio::test]
    async fn test_role_holders() {
        let directory = InMemoryRoleDirectory::new();
        directory.add_user(user(1));
        directory.add_user(user(2));
        directory.grant_role(1, 10);
        directory.grant_role(2, 10);
        directory.grant_role(2, 11);

        let holders = directory.user_ids_by_role_ids(&[10, 11, 12]).await.unwrap();
        assert_eq!(holders[&10], HashSet::from([1, 2]));
        assert_eq!(holders[&11], HashSet::from([2]));
        assert!(!holders.contains_key(&12));
        assert_eq!(directory.user_role_ids(2).await.unwrap(), vec![10, 11]);
    }

    #[tokio::test]
    async fn test_resource_role_holders() {
        let directory = InMemoryRoleDirectory::new();
        let grant = UserResourceRole {
            user_id: 3,
            resource_id: 7,
            resource_role_id: 2,
        };
        directory.grant_resource_role(grant.clone());
        directory.grant_resource_role(grant);

        assert_eq!(directory.user_resource_roles(3).await.unwrap().len(), 1);
        let holders = directory
            .user_ids_by_resource_role_identifiers(&["7:2".to_string(), "8:2".to_string()])
            .await
            .unwrap();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders["7:2"], HashSet::from([3]));
    }
}
