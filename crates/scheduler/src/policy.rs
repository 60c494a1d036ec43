//! Client selection policies and per-job client filters.

use std::collections::BTreeSet;

/// How the dispatch loop picks a client for the front job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Policy {
    /// Only clients whose server queue is empty. One job in flight per
    /// client at a time; completion pushes are the only unlock.
    #[default]
    ZeroQueue,
    /// The unlocked client with the smallest reported queue depth.
    LowestQueue,
    /// Cycle through the eligible clients in registration order.
    RoundRobin,
}

/// Per-job restriction of the eligible client set.
///
/// When `include` is set it alone decides eligibility; `exclude` applies
/// only to an unrestricted filter.
#[derive(Debug, Clone, Default)]
pub struct ClientFilter {
    pub include: Option<BTreeSet<String>>,
    pub exclude: BTreeSet<String>,
}

impl ClientFilter {
    /// Restrict the job to the named clients.
    pub fn include<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: Some(ids.into_iter().map(Into::into).collect()),
            exclude: BTreeSet::new(),
        }
    }

    /// Keep every client except the named ones.
    pub fn exclude<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: None,
            exclude: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, client_id: &str) -> bool {
        match &self.include {
            Some(include) => include.contains(client_id),
            None => !self.exclude.contains(client_id),
        }
    }
}

/// One eligible client as the selector sees it: its index in the pool's
/// registration order plus the state fields policies read.
pub(crate) struct Candidate {
    pub index: usize,
    pub locked: bool,
    pub queue_remaining: u32,
}

/// Pick a client index from the eligible set, or `None` when no client
/// qualifies this round.
///
/// The round-robin cursor advances only on a successful pick, so a
/// locked candidate at the cursor blocks the rotation instead of being
/// skipped.
pub(crate) fn select(policy: Policy, cursor: &mut usize, eligible: &[Candidate]) -> Option<usize> {
    match policy {
        Policy::ZeroQueue => eligible
            .iter()
            .find(|c| !c.locked && c.queue_remaining == 0)
            .map(|c| c.index),
        Policy::LowestQueue => {
            // First occurrence wins ties, so no min_by_key here.
            let mut best: Option<&Candidate> = None;
            for candidate in eligible.iter().filter(|c| !c.locked) {
                match best {
                    Some(current) if candidate.queue_remaining >= current.queue_remaining => {}
                    _ => best = Some(candidate),
                }
            }
            best.map(|c| c.index)
        }
        Policy::RoundRobin => {
            if eligible.is_empty() {
                return None;
            }
            let candidate = &eligible[*cursor % eligible.len()];
            if candidate.locked {
                return None;
            }
            *cursor = cursor.wrapping_add(1);
            Some(candidate.index)
        }
    }
}
