//! Frame and variable handle tables.
//!
//! The protocol hands the editor plain integers; every id resolves here to
//! an explicit composite value. Frames map to `(thread, frame-index)` pairs
//! and variable references to a tagged slot: either a scope's
//! already-fetched member list or a lazily-resolved object path. Handles
//! are only ever allocated, never reclaimed; the table is bounded by user
//! interaction, not data volume.

use crate::sdapi::types::ObjectMember;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRef {
    pub thread_id: u64,
    pub frame_index: u32,
}

#[derive(Debug, Clone)]
pub enum VariableSlot {
    /// One scope of a frame, with its variables already fetched.
    Scope { frame: FrameRef, members: Vec<ObjectMember> },
    /// A nested object, re-queried through the members API by path.
    Members { frame: FrameRef, object_path: String },
}

#[derive(Debug)]
pub struct HandleStore {
    next: AtomicI64,
    frames: DashMap<i64, FrameRef>,
    variables: DashMap<i64, VariableSlot>,
}

impl HandleStore {
    pub fn new() -> Self {
        Self {
            // 0 is reserved: the protocol uses variablesReference 0 for
            // "not expandable".
            next: AtomicI64::new(1),
            frames: DashMap::new(),
            variables: DashMap::new(),
        }
    }

    fn allocate(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    pub fn frame_handle(&self, frame: FrameRef) -> i64 {
        let id = self.allocate();
        self.frames.insert(id, frame);
        id
    }

    pub fn frame(&self, id: i64) -> Option<FrameRef> {
        self.frames.get(&id).map(|r| *r.value())
    }

    pub fn variable_handle(&self, slot: VariableSlot) -> i64 {
        let id = self.allocate();
        self.variables.insert(id, slot);
        id
    }

    pub fn variable(&self, id: i64) -> Option<VariableSlot> {
        self.variables.get(&id).map(|r| r.value().clone())
    }
}

/// Scope names the remote debugger reports, in presentation order.
pub const SCOPE_ORDER: [&str; 3] = ["local", "closure", "global"];

/// Partition frame variables by scope, keeping only non-empty partitions.
pub fn scope_partitions(members: Vec<ObjectMember>) -> Vec<(&'static str, Vec<ObjectMember>)> {
    let mut partitions: Vec<(&'static str, Vec<ObjectMember>)> =
        SCOPE_ORDER.iter().map(|name| (*name, Vec::new())).collect();

    for member in members {
        if let Some(slot) = partitions
            .iter_mut()
            .find(|(name, _)| member.scope.as_deref() == Some(*name))
        {
            slot.1.push(member);
        }
    }

    partitions.retain(|(_, members)| !members.is_empty());
    partitions
}

const PRIMITIVE_TYPES: [&str; 7] =
    ["string", "number", "boolean", "null", "undefined", "function", "symbol"];

/// Whether a member can be expanded further through the members API.
pub fn is_expandable(member: &ObjectMember) -> bool {
    match member.value_type.as_deref() {
        Some(t) => !PRIMITIVE_TYPES.contains(&t.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Object path for a member nested under `parent`.
pub fn child_path(parent: Option<&str>, name: &str) -> String {
    match parent {
        Some(parent) if !parent.is_empty() => format!("{}.{}", parent, name),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, value_type: &str, scope: Option<&str>) -> ObjectMember {
        ObjectMember {
            name: name.into(),
            parent: None,
            value_type: Some(value_type.into()),
            value: Some("x".into()),
            scope: scope.map(str::to_string),
        }
    }

    #[test]
    fn handles_start_above_zero_and_stay_distinct() {
        let store = HandleStore::new();
        let f1 = store.frame_handle(FrameRef { thread_id: 1, frame_index: 0 });
        let v1 = store.variable_handle(VariableSlot::Members {
            frame: FrameRef { thread_id: 1, frame_index: 0 },
            object_path: "order".into(),
        });
        assert!(f1 > 0 && v1 > 0);
        assert_ne!(f1, v1);
        assert_eq!(store.frame(f1), Some(FrameRef { thread_id: 1, frame_index: 0 }));
        assert!(store.frame(v1).is_none());
    }

    #[test]
    fn unknown_handles_resolve_to_none() {
        let store = HandleStore::new();
        assert!(store.frame(99).is_none());
        assert!(store.variable(99).is_none());
    }

    #[test]
    fn partitions_by_scope_and_drops_empty_ones() {
        let members = vec![
            member("a", "string", Some("local")),
            member("g", "dw.system.Site", Some("global")),
            member("b", "number", Some("local")),
        ];
        let partitions = scope_partitions(members);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].0, "local");
        assert_eq!(partitions[0].1.len(), 2);
        assert_eq!(partitions[1].0, "global");
    }

    #[test]
    fn expandability_follows_value_type() {
        assert!(is_expandable(&member("order", "dw.order.Order", None)));
        assert!(is_expandable(&member("items", "Array", None)));
        assert!(!is_expandable(&member("name", "String", None)));
        assert!(!is_expandable(&member("count", "Number", None)));
        assert!(!is_expandable(&ObjectMember {
            name: "mystery".into(),
            parent: None,
            value_type: None,
            value: None,
            scope: None,
        }));
    }

    #[test]
    fn child_paths_extend_dotted_chains() {
        assert_eq!(child_path(None, "order"), "order");
        assert_eq!(child_path(Some("order"), "customer"), "order.customer");
        assert_eq!(child_path(Some("order.customer"), "email"), "order.customer.email");
    }
}
