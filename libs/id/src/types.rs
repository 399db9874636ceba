//! Typed ID definitions for the cluster data model.
//!
//! All ids are opaque values minted by the master. The agent only stores,
//! compares, and echoes them.

use crate::define_id;

// The master assigns an agent id on registration.
define_id!(AgentId);

// Framework ids are unique cluster-wide.
define_id!(FrameworkId);

// Executor ids are unique within a framework.
define_id!(ExecutorId);

// Task ids are unique within a framework.
define_id!(TaskId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framework_id_roundtrip() {
        let id = FrameworkId::new("f-2024-0001");
        let s = id.to_string();
        let parsed: FrameworkId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_task_id_empty() {
        let result: Result<TaskId, _> = "".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_task_id_whitespace_rejected() {
        let result: Result<TaskId, _> = "t 1".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::IllegalCharacter(' ')
        ));
    }

    #[test]
    fn test_executor_id_json_roundtrip() {
        let id = ExecutorId::new("default");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"default\"");
        let parsed: ExecutorId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_agent_id_json_rejects_empty() {
        let result: Result<AgentId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_task_id_ordering() {
        let a = TaskId::new("t1");
        let b = TaskId::new("t2");
        assert!(a < b);
    }
}
