//! Sequence and throttle group bookkeeping.
//!
//! Groups are created lazily on first reference and dropped once their last
//! member leaves.

use std::collections::{HashMap, VecDeque};

use super::JobId;

// == Sequence Groups ==
/// Tracks, per group, the live members in enqueue order.
///
/// Only the head of a group may be admitted, so at most one member runs at a
/// time and members run strictly in the order they were enqueued.
#[derive(Debug, Default)]
pub(crate) struct SequenceGroups {
    groups: HashMap<String, VecDeque<JobId>>,
}

impl SequenceGroups {
    pub fn join(&mut self, group: &str, id: &str) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .push_back(id.to_string());
    }

    pub fn is_head(&self, group: &str, id: &str) -> bool {
        self.groups
            .get(group)
            .and_then(|members| members.front())
            .is_some_and(|head| head == id)
    }

    pub fn leave(&mut self, group: &str, id: &str) {
        if let Some(members) = self.groups.get_mut(group) {
            members.retain(|member| member != id);
            if members.is_empty() {
                self.groups.remove(group);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.groups.len()
    }
}

// == Throttle Groups ==
#[derive(Debug, Default)]
struct ThrottleGroup {
    members: usize,
    running: usize,
}

/// Tracks RUNNING counts for jobs sharing a throttle key.
#[derive(Debug, Default)]
pub(crate) struct ThrottleGroups {
    groups: HashMap<String, ThrottleGroup>,
}

impl ThrottleGroups {
    pub fn join(&mut self, key: &str) {
        self.groups.entry(key.to_string()).or_default().members += 1;
    }

    pub fn can_run(&self, key: &str, limit: usize) -> bool {
        self.groups
            .get(key)
            .map_or(true, |group| group.running < limit)
    }

    pub fn acquire(&mut self, key: &str) {
        if let Some(group) = self.groups.get_mut(key) {
            group.running += 1;
        }
    }

    pub fn release(&mut self, key: &str) {
        if let Some(group) = self.groups.get_mut(key) {
            group.running = group.running.saturating_sub(1);
        }
    }

    pub fn leave(&mut self, key: &str) {
        if let Some(group) = self.groups.get_mut(key) {
            group.members = group.members.saturating_sub(1);
            if group.members == 0 {
                self.groups.remove(key);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.groups.len()
    }
}
