//! # Approval
//!
//! Approval policy inputs and approval permissions:
//!
//! - `directory`: users, roles and resource roles of the platform
//! - `risk`: the risk-level routing table per organization
//! - `resolver`: who may decide which approval node
//! - `external`: delegation to a third-party approval system

pub mod directory;
pub mod external;
pub mod resolver;
pub mod risk;

pub use directory::{InMemoryRoleDirectory, RoleDirectory};
pub use external::{ExternalApprovalClient, NoopExternalApprovalClient};
pub use resolver::{ApprovalPermissionResolver, ACTIONABLE_APPROVAL_STATUSES};
pub use risk::{RiskLevelSource, StaticRiskLevelSource};
