//! Execution-affinity checks, recomputed from the persisted task every time.

use crate::models::{ExecutorInfo, TaskEntity, TaskType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchChecker {
    local: ExecutorInfo,
}

impl DispatchChecker {
    pub fn new(local: ExecutorInfo) -> Self {
        Self { local }
    }

    pub fn local(&self) -> &ExecutorInfo {
        &self.local
    }

    pub fn is_this_machine(&self, executor: &ExecutorInfo) -> bool {
        *executor == self.local
    }

    /// A task nobody has started executing yet is treated as local
    pub fn is_task_on_this_machine(&self, task: &TaskEntity) -> bool {
        task.executor
            .as_ref()
            .map(|executor| self.is_this_machine(executor))
            .unwrap_or(true)
    }

    /// Node holding the task's node-local files
    ///
    /// Uploaded import files live where the upload landed, so an import is
    /// owned by its submitter rather than its executor.
    pub fn owner_of<'a>(&self, task: &'a TaskEntity) -> Option<&'a ExecutorInfo> {
        if task.task_type == TaskType::Import {
            task.submitter.as_ref()
        } else {
            task.executor.as_ref()
        }
    }

    pub fn is_owned_by_this_node(&self, task: &TaskEntity) -> bool {
        self.owner_of(task)
            .map(|owner| self.is_this_machine(owner))
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, TaskStatus};
    use chrono::Utc;

    fn task(task_type: TaskType, executor: Option<ExecutorInfo>, submitter: Option<ExecutorInfo>) -> TaskEntity {
        let mut task = NewTask {
            task_type,
            creator_id: 1,
            organization_id: 1,
            project_id: None,
            connection_id: None,
            database_id: None,
            database_name: None,
            parameters: serde_json::Value::Null,
            submitter,
            execution_expiration_interval_secs: 60,
        }
        .into_entity(1, Utc::now());
        task.executor = executor;
        task.status = TaskStatus::Running;
        task
    }

    #[test]
    fn test_ownership_follows_executor() {
        let a = ExecutorInfo::new("10.0.0.1", 8989);
        let b = ExecutorInfo::new("10.0.0.2", 8989);
        let on_a = task(TaskType::Async, Some(a.clone()), Some(b.clone()));

        let checker_a = DispatchChecker::new(a.clone());
        let checker_b = DispatchChecker::new(b.clone());
        assert!(checker_a.is_task_on_this_machine(&on_a));
        assert!(!checker_b.is_task_on_this_machine(&on_a));
        assert!(checker_a.is_owned_by_this_node(&on_a));

        // A restarted node comes back with the same identity and still owns it
        let restarted_a = DispatchChecker::new(ExecutorInfo::new("10.0.0.1", 8989));
        assert!(restarted_a.is_owned_by_this_node(&on_a));
    }

    #[test]
    fn test_import_is_owned_by_submitter() {
        let a = ExecutorInfo::new("10.0.0.1", 8989);
        let b = ExecutorInfo::new("10.0.0.2", 8989);
        let import = task(TaskType::Import, Some(a.clone()), Some(b.clone()));

        assert_eq!(DispatchChecker::new(a.clone()).owner_of(&import), Some(&b));
        assert!(!DispatchChecker::new(a).is_owned_by_this_node(&import));
        assert!(DispatchChecker::new(b).is_owned_by_this_node(&import));
    }

    #[test]
    fn test_unstarted_task_is_local() {
        let checker = DispatchChecker::new(ExecutorInfo::new("10.0.0.1", 8989));
        let pending = task(TaskType::Export, None, None);
        assert!(checker.is_task_on_this_machine(&pending));
        assert!(checker.is_owned_by_this_node(&pending));
    }
}
