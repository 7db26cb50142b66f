//! Wire types of the remote debugger's control API.
//!
//! The API speaks snake_case JSON; list responses wrap their payload in an
//! envelope that also carries paging fields.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Halted,
    Running,
    Done,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptLocation {
    #[serde(default)]
    pub function_name: Option<String>,
    pub line_number: u32,
    pub script_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptStackFrame {
    pub index: u32,
    pub location: ScriptLocation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptThread {
    pub id: u64,
    pub status: ThreadStatus,
    #[serde(default)]
    pub call_stack: Option<Vec<ScriptStackFrame>>,
}

impl ScriptThread {
    pub fn is_halted(&self) -> bool {
        self.status == ThreadStatus::Halted
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ThreadsEnvelope {
    #[serde(default)]
    pub script_threads: Vec<ScriptThread>,
}

/// One variable or object member. `scope` is set on frame variables
/// (`local` / `closure` / `global`) and absent on nested members.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectMember {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(rename = "type", default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Paged list envelope for variables and members.
#[derive(Debug, Default, Deserialize)]
pub struct MemberPage {
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub object_members: Vec<ObjectMember>,
}

impl MemberPage {
    /// Whether another page exists beyond this one.
    pub fn has_more(&self) -> bool {
        match (self.total, self.start) {
            (Some(total), Some(start)) => total > start + self.object_members.len() as u64,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakpointRequest {
    pub line_number: u32,
    pub script_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteBreakpoint {
    #[serde(default)]
    pub id: Option<i64>,
    pub line_number: u32,
    pub script_path: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct BreakpointsEnvelope {
    #[serde(default)]
    pub breakpoints: Vec<RemoteBreakpoint>,
}

#[derive(Debug, Deserialize)]
pub struct EvalResult {
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threads_envelope_parses_status_and_stack() {
        let raw = r#"{
            "_v": "2.0",
            "script_threads": [
                {
                    "id": 7,
                    "status": "halted",
                    "call_stack": [
                        {"index": 0, "location": {"function_name": "show()", "line_number": 18, "script_path": "/app_core/cartridge/controllers/Home.js"}}
                    ]
                },
                {"id": 9, "status": "running"}
            ]
        }"#;
        let env: ThreadsEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.script_threads.len(), 2);
        assert!(env.script_threads[0].is_halted());
        assert!(!env.script_threads[1].is_halted());
        let stack = env.script_threads[0].call_stack.as_ref().unwrap();
        assert_eq!(stack[0].location.line_number, 18);
    }

    #[test]
    fn member_page_detects_remaining_pages() {
        let page = MemberPage {
            start: Some(0),
            count: Some(2),
            total: Some(5),
            object_members: vec![
                ObjectMember { name: "a".into(), parent: None, value_type: None, value: None, scope: None },
                ObjectMember { name: "b".into(), parent: None, value_type: None, value: None, scope: None },
            ],
        };
        assert!(page.has_more());

        let last = MemberPage {
            start: Some(4),
            count: Some(2),
            total: Some(5),
            object_members: vec![ObjectMember {
                name: "e".into(),
                parent: None,
                value_type: None,
                value: None,
                scope: None,
            }],
        };
        assert!(!last.has_more());
    }

    #[test]
    fn member_page_without_totals_is_single_page() {
        let page: MemberPage = serde_json::from_str(r#"{"object_members": []}"#).unwrap();
        assert!(!page.has_more());
    }
}
