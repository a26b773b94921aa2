/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Node selection among candidates that already fit a service.
//!
//! These are pure functions over a small [`Candidate`] view so they can be
//! tested without building a whole [`ClusterSnapshot`](super::ClusterSnapshot).

use std::fmt;

use rand::Rng;
use tracing::error;

/// What a placement policy needs to know about a fitting node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate<'a> {
    pub name: &'a str,
    /// Size of the node's label set; fewer labels = more generic node.
    pub label_count: usize,
    /// Real containers plus tentatively placed ones.
    pub container_count: usize,
}

/// Process-wide node selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementPolicy {
    /// Uniform random choice.
    Random,
    /// Pack tightly: fewest labels, then **most** containers.
    Waterfill,
    /// Spread load: fewest labels, then **fewest** containers.
    #[default]
    Average,
    /// Fallback for unrecognised names: take the first candidate.
    FirstCandidate,
}

impl PlacementPolicy {
    /// Parse a configured policy name (case-insensitive).
    ///
    /// Unknown names fall back to [`PlacementPolicy::FirstCandidate`] and
    /// log an error rather than refusing to start.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "random" => PlacementPolicy::Random,
            "waterfill" => PlacementPolicy::Waterfill,
            "average" => PlacementPolicy::Average,
            other => {
                error!(
                    policy = other,
                    "unknown placement policy (valid: random, waterfill, average), \
                     falling back to first candidate"
                );
                PlacementPolicy::FirstCandidate
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlacementPolicy::Random => "random",
            PlacementPolicy::Waterfill => "waterfill",
            PlacementPolicy::Average => "average",
            PlacementPolicy::FirstCandidate => "first",
        }
    }

    /// Pick one of `candidates`, returning its index.
    ///
    /// Returns `None` only for an empty slice.  Sorting is stable, so ties
    /// keep the caller's order (alphabetical for a snapshot).
    pub fn select(self, candidates: &[Candidate<'_>]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        match self {
            PlacementPolicy::Random => Some(rand::thread_rng().gen_range(0..candidates.len())),
            PlacementPolicy::FirstCandidate => Some(0),
            PlacementPolicy::Waterfill => {
                let mut order: Vec<usize> = (0..candidates.len()).collect();
                order.sort_by(|&a, &b| {
                    let (ca, cb) = (&candidates[a], &candidates[b]);
                    ca.label_count
                        .cmp(&cb.label_count)
                        .then(cb.container_count.cmp(&ca.container_count))
                });
                order.first().copied()
            }
            PlacementPolicy::Average => {
                let mut order: Vec<usize> = (0..candidates.len()).collect();
                order.sort_by_key(|&i| (candidates[i].label_count, candidates[i].container_count));
                order.first().copied()
            }
        }
    }
}

impl fmt::Display for PlacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
