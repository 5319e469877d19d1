//! Periodic ticking of nodes at fixed update rates.

use crate::{fsc, scene::NodeID};
use std::collections::BTreeSet;

/// How often a node's per-frame update runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UpdateRate {
    #[default]
    Never,
    Always,
    Fps1,
    Fps2,
    Fps5,
    Fps10,
    Fps15,
    Fps20,
    Fps30,
    Fps40,
    Fps50,
    Fps60,
    Fps100,
    Fps120,
    /// 29.97 updates per second.
    Ntsc,
    /// 25 updates per second.
    Pal,
}

/// The nodes ticked at each [`UpdateRate`] and when each rate is next due.
#[derive(Clone, Debug)]
pub struct UpdateBuckets {
    buckets: Vec<UpdateBucket>,
}

#[derive(Clone, Debug)]
struct UpdateBucket {
    rate: UpdateRate,
    nodes: BTreeSet<NodeID>,
    last_update_time: Option<fsc>,
    next_update_time: fsc,
}

impl UpdateRate {
    /// All rates that cause a node to be ticked.
    pub const TICKING: [Self; 15] = [
        Self::Always,
        Self::Fps1,
        Self::Fps2,
        Self::Fps5,
        Self::Fps10,
        Self::Fps15,
        Self::Fps20,
        Self::Fps30,
        Self::Fps40,
        Self::Fps50,
        Self::Fps60,
        Self::Fps100,
        Self::Fps120,
        Self::Ntsc,
        Self::Pal,
    ];

    /// Returns the number of updates per second, or [`None`] for
    /// [`Never`](Self::Never) and [`Always`](Self::Always).
    pub fn frequency(&self) -> Option<fsc> {
        match self {
            Self::Never | Self::Always => None,
            Self::Fps1 => Some(1.0),
            Self::Fps2 => Some(2.0),
            Self::Fps5 => Some(5.0),
            Self::Fps10 => Some(10.0),
            Self::Fps15 => Some(15.0),
            Self::Fps20 => Some(20.0),
            Self::Fps30 => Some(30.0),
            Self::Fps40 => Some(40.0),
            Self::Fps50 => Some(50.0),
            Self::Fps60 => Some(60.0),
            Self::Fps100 => Some(100.0),
            Self::Fps120 => Some(120.0),
            Self::Ntsc => Some(29.97),
            Self::Pal => Some(25.0),
        }
    }
}

impl UpdateBuckets {
    pub fn new() -> Self {
        Self {
            buckets: UpdateRate::TICKING
                .into_iter()
                .map(|rate| UpdateBucket {
                    rate,
                    nodes: BTreeSet::new(),
                    last_update_time: None,
                    next_update_time: 0.0,
                })
                .collect(),
        }
    }

    /// Places the node in the bucket for the given rate. Nodes with rate
    /// [`UpdateRate::Never`] are not placed anywhere.
    pub fn add(&mut self, node: NodeID, rate: UpdateRate) {
        if let Some(bucket) = self.bucket_mut(rate) {
            bucket.nodes.insert(node);
        }
    }

    /// Removes the node from the bucket for the given rate.
    pub fn remove(&mut self, node: NodeID, rate: UpdateRate) {
        if let Some(bucket) = self.bucket_mut(rate) {
            bucket.nodes.remove(&node);
        }
    }

    /// Moves the node between buckets.
    pub fn change_rate(&mut self, node: NodeID, old_rate: UpdateRate, new_rate: UpdateRate) {
        self.remove(node, old_rate);
        self.add(node, new_rate);
    }

    /// Whether the node sits in the bucket for the given rate.
    pub fn contains(&self, node: NodeID, rate: UpdateRate) -> bool {
        self.buckets
            .iter()
            .find(|bucket| bucket.rate == rate)
            .is_some_and(|bucket| bucket.nodes.contains(&node))
    }

    /// Returns the number of buckets the node sits in.
    pub fn n_buckets_containing(&self, node: NodeID) -> usize {
        self.buckets
            .iter()
            .filter(|bucket| bucket.nodes.contains(&node))
            .count()
    }

    /// Collects the nodes due for an update at `current_time` together with
    /// the time elapsed since their bucket last ran, clamped to
    /// `max_time_delta`. The [`UpdateRate::Always`] bucket is due on every
    /// call. The first time a bucket runs, its time delta is zero.
    pub fn collect_due(&mut self, current_time: fsc, max_time_delta: fsc) -> Vec<(NodeID, fsc)> {
        let mut due = Vec::new();

        for bucket in &mut self.buckets {
            if let Some(frequency) = bucket.rate.frequency() {
                if current_time < bucket.next_update_time {
                    continue;
                }
                let period = 1.0 / frequency;
                bucket.next_update_time = if bucket.last_update_time.is_none() {
                    current_time + period
                } else {
                    (bucket.next_update_time + period).max(current_time)
                };
            }

            let time_delta = bucket
                .last_update_time
                .map_or(0.0, |last| (current_time - last).clamp(0.0, max_time_delta));
            bucket.last_update_time = Some(current_time);

            due.extend(bucket.nodes.iter().map(|&node| (node, time_delta)));
        }

        due
    }

    fn bucket_mut(&mut self, rate: UpdateRate) -> Option<&mut UpdateBucket> {
        self.buckets.iter_mut().find(|bucket| bucket.rate == rate)
    }
}

impl Default for UpdateBuckets {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use scene_utils::GenerationalArena;

    fn node_ids(n: usize) -> Vec<NodeID> {
        let mut arena = GenerationalArena::new();
        (0..n).map(|_| NodeID::from_idx(arena.insert(()))).collect()
    }

    #[test]
    fn never_rate_is_not_bucketed() {
        let mut buckets = UpdateBuckets::new();
        let ids = node_ids(1);
        buckets.add(ids[0], UpdateRate::Never);
        assert_eq!(buckets.n_buckets_containing(ids[0]), 0);
        assert!(buckets.collect_due(0.0, 1.0).is_empty());
    }

    #[test]
    fn changing_rate_keeps_node_in_one_bucket() {
        let mut buckets = UpdateBuckets::new();
        let ids = node_ids(1);
        buckets.add(ids[0], UpdateRate::Fps10);
        buckets.change_rate(ids[0], UpdateRate::Fps10, UpdateRate::Always);
        assert_eq!(buckets.n_buckets_containing(ids[0]), 1);
        assert!(buckets.contains(ids[0], UpdateRate::Always));
    }

    #[test]
    fn always_bucket_runs_every_call_with_clamped_delta() {
        let mut buckets = UpdateBuckets::new();
        let ids = node_ids(1);
        buckets.add(ids[0], UpdateRate::Always);

        assert_eq!(buckets.collect_due(1.0, 0.5), vec![(ids[0], 0.0)]);
        let due = buckets.collect_due(1.1, 0.5);
        assert_eq!(due.len(), 1);
        assert_abs_diff_eq!(due[0].1, 0.1, epsilon = 1e-12);
        assert_eq!(buckets.collect_due(3.0, 0.5), vec![(ids[0], 0.5)]);
    }

    #[test]
    fn rate_limited_bucket_runs_once_per_period() {
        let mut buckets = UpdateBuckets::new();
        let ids = node_ids(1);
        buckets.add(ids[0], UpdateRate::Fps2);

        assert_eq!(buckets.collect_due(0.0, 10.0).len(), 1);
        assert!(buckets.collect_due(0.2, 10.0).is_empty());
        assert!(buckets.collect_due(0.45, 10.0).is_empty());

        let due = buckets.collect_due(0.5, 10.0);
        assert_eq!(due.len(), 1);
        assert_abs_diff_eq!(due[0].1, 0.5);

        assert!(buckets.collect_due(0.9, 10.0).is_empty());
        assert_eq!(buckets.collect_due(1.0, 10.0).len(), 1);
    }
}
