pub mod approval;
pub mod binding;
pub mod flow_instance;
pub mod node;
pub mod query;
pub mod request;
pub mod sequence;
pub mod task;
pub mod user;

// Re-export core models for easy access
pub use approval::{
    ApprovalCandidate, ApprovalFlowConfig, ApprovalNodeConfig, CandidateRef, RiskLevel,
};
pub use binding::{ElementBinding, ElementKind};
pub use flow_instance::{FlowInstance, NewFlowInstance};
pub use node::{ApprovalNode, ExecutionStrategy, GatewayNode, NodeInstance, NodeKind, TaskNode};
pub use query::{FlowInstanceFilter, FlowInstanceQuery, Page, Pagination};
pub use request::{CreateFlowInstanceReq, TaskParameters};
pub use sequence::Sequence;
pub use task::{ExecutorInfo, NewTask, TaskEntity, TaskStatus, TaskType};
pub use user::{ResourceRole, ResourceType, User, UserResourceRole};
