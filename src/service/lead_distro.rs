use crate::db::models::SalesAgent;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How the next sales agent is picked for an incoming lead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistroMode {
    /// Lowest priority value wins; ties go to whoever waited longest.
    Priority,
    /// Cycle through active agents in user id order.
    #[default]
    RoundRobin,
    /// Keep `assigned_count / weight` level across agents.
    TimeRatio,
}

/// Pick the next agent from a snapshot. `cursor` is the user id that received
/// the previous round-robin assignment.
pub fn select_agent(mode: DistroMode, agents: &[SalesAgent], cursor: Option<i64>) -> Option<i64> {
    let mut active: Vec<&SalesAgent> = agents.iter().filter(|a| a.active).collect();
    if active.is_empty() {
        return None;
    }

    match mode {
        DistroMode::Priority => active
            .into_iter()
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| by_wait(a, b))
            })
            .map(|a| a.user_id),
        DistroMode::RoundRobin => {
            active.sort_by_key(|a| a.user_id);
            let next = cursor
                .and_then(|last| active.iter().find(|a| a.user_id > last))
                .or_else(|| active.first());
            next.map(|a| a.user_id)
        }
        DistroMode::TimeRatio => active
            .into_iter()
            .min_by(|a, b| by_ratio(a, b).then_with(|| by_wait(a, b)))
            .map(|a| a.user_id),
    }
}

/// Never-assigned agents first, then oldest assignment, then lowest id.
fn by_wait(a: &SalesAgent, b: &SalesAgent) -> Ordering {
    a.last_assigned_at
        .cmp(&b.last_assigned_at)
        .then_with(|| a.user_id.cmp(&b.user_id))
}

// a.count / a.weight vs b.count / b.weight without division
fn by_ratio(a: &SalesAgent, b: &SalesAgent) -> Ordering {
    let (wa, wb) = (a.weight.max(1) as i128, b.weight.max(1) as i128);
    (a.assigned_count as i128 * wb).cmp(&(b.assigned_count as i128 * wa))
}
