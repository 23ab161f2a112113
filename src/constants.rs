//! # System Constants
//!
//! Process variable names shared by the topology builder, the process engine
//! and the task executors, plus the defaults of node-local resources.

/// Process variables bound when a flow starts or written by executors
pub mod variables {
    /// Risk level published by the pre-check task; read by the risk gateway
    pub const RISK_LEVEL: &str = "risklevel";
    /// Decision of the most recent approval node
    pub const APPROVED: &str = "approved";
    /// Target task of the flow
    pub const TASK_ID: &str = "task_id";
    pub const PRE_CHECK_TASK_ID: &str = "pre_check_task_id";
    pub const ROLLBACK_TASK_ID: &str = "rollback_task_id";
    pub const FLOW_INSTANCE_ID: &str = "flow_instance_id";
    pub const CREATOR_ID: &str = "creator_id";
    pub const ORGANIZATION_ID: &str = "organization_id";
    pub const CONNECTION_ID: &str = "connection_id";
    pub const DATABASE_ID: &str = "database_id";
    pub const DATABASE_NAME: &str = "database_name";
    /// Statements of the submitted SQL content after dialect-aware splitting
    pub const SQL_STATEMENTS: &str = "sql_statements";
    pub const SITE_URL: &str = "site_url";
    /// Ordered database group a MULTIPLE_ASYNC step works on
    pub const DATABASE_GROUP_PREFIX: &str = "database_group_";
}

/// Metrics named by `FlowError::OverLimit`
pub mod limits {
    pub const SQL_CONTENT_LENGTH: &str = "sql_content_length";
    pub const EXPORT_OBJECT_COUNT: &str = "export_object_count";
    pub const APPLY_DATABASE_COUNT: &str = "apply_database_count";

    pub const ALL: [&str; 3] = [SQL_CONTENT_LENGTH, EXPORT_OBJECT_COUNT, APPLY_DATABASE_COUNT];
}

/// Lifecycle event names broadcast by the event publisher
pub mod events {
    pub const FLOW_CREATED: &str = "flow.created";
    pub const FLOW_APPROVED: &str = "flow.approved";
    pub const FLOW_REJECTED: &str = "flow.rejected";
    pub const FLOW_CANCELLED: &str = "flow.cancelled";
    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_FINISHED: &str = "task.finished";
}

/// Content returned for a task log that has not been written yet
pub const DEFAULT_LOG_CONTENT: &str = "No log content yet, the task may not have started.";

/// File name used when a binary response carries no content-disposition
pub const DEFAULT_DOWNLOAD_FILE_NAME: &str = "download.data";

/// Header naming the acting user of a forwarded request
pub const USER_HEADER: &str = "x-flowgate-user";

/// Risk level used when no pre-check result is available
pub const DEFAULT_RISK_LEVEL: i32 = 1;
