use serde::{Deserialize, Serialize};

use crate::models::User;

/// Who is calling, and whether the call already crossed a node boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user: User,
    /// Set on requests received from another node; such a request is served
    /// locally and never forwarded again
    pub forwarded: bool,
}

impl RequestContext {
    pub fn new(user: User) -> Self {
        Self {
            user,
            forwarded: false,
        }
    }

    pub fn forwarded(user: User) -> Self {
        Self {
            user,
            forwarded: true,
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user.id
    }

    pub fn organization_id(&self) -> i64 {
        self.user.organization_id
    }
}
