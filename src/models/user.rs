use serde::{Deserialize, Serialize};

use super::approval::resource_role_identifier;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub account_name: String,
    pub organization_id: i64,
}

/// What kind of resource a resource role is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Project,
    Database,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRole {
    pub id: i64,
    pub resource_type: ResourceType,
    pub role_name: String,
}

/// A user holding a resource role on one concrete resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserResourceRole {
    pub user_id: i64,
    pub resource_id: i64,
    pub resource_role_id: i64,
}

impl UserResourceRole {
    pub fn identifier(&self) -> String {
        resource_role_identifier(self.resource_id, self.resource_role_id)
    }
}
