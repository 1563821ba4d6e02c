//! Module containing the leader/follower topology of the platoon.
//!
//! The topology is an array-backed forest: each vehicle stores the index of
//! its immediate leader, or `None` for a head vehicle.  Acyclicity and index
//! ranges are checked once at construction, so downstream code can walk the
//! mapping without re-validating.

use crate::imports::*;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderTopology {
    leader: Vec<Option<usize>>,
}

impl LeaderTopology {
    pub fn new(leader: Vec<Option<usize>>) -> anyhow::Result<Self> {
        let n = leader.len();
        ensure!(n > 0, format_dbg!(n));
        for (i, l) in leader.iter().enumerate() {
            if let Some(l) = l {
                ensure!(*l < n, "vehicle {} names leader {} outside 0..{}", i, l, n);
                ensure!(*l != i, "vehicle {} cannot lead itself", i);
            }
        }
        // walk each chain upward; more than n hops means a cycle
        for start in 0..n {
            let mut cursor = leader[start];
            let mut hops = 0usize;
            while let Some(next) = cursor {
                hops += 1;
                ensure!(
                    hops <= n,
                    "cycle detected in leader topology starting from vehicle {}",
                    start
                );
                cursor = leader[next];
            }
        }
        Ok(Self { leader })
    }

    /// Straight platoon chain `0 <- 1 <- 2 <- ...` with vehicle 0 at the head
    pub fn chain(n_veh: usize) -> Self {
        let leader = (0..n_veh)
            .map(|i| if i == 0 { None } else { Some(i - 1) })
            .collect();
        // a chain is acyclic by construction
        Self { leader }
    }

    pub fn len(&self) -> usize {
        self.leader.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leader.is_empty()
    }

    /// Immediate leader of vehicle `i`, `None` for a head vehicle
    pub fn leader(&self, i: usize) -> Option<usize> {
        self.leader[i]
    }

    /// Leader index with the head convention of the original network tables:
    /// a head vehicle acts as its own leader.
    pub fn leader_or_self(&self, i: usize) -> usize {
        self.leader[i].unwrap_or(i)
    }

    /// Indices of head vehicles (no leader)
    pub fn heads(&self) -> impl Iterator<Item = usize> + '_ {
        self.leader
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.is_none().then_some(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_topology_shape() {
        let top = LeaderTopology::chain(4);
        assert_eq!(top.len(), 4);
        assert_eq!(top.leader(0), None);
        assert_eq!(top.leader(3), Some(2));
        assert_eq!(top.leader_or_self(0), 0);
        assert_eq!(top.heads().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_forest_with_two_heads_is_accepted() {
        let top = LeaderTopology::new(vec![None, Some(0), None, Some(2)]).unwrap();
        assert_eq!(top.heads().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        assert!(LeaderTopology::new(vec![Some(1), Some(0)]).is_err());
    }

    #[test]
    fn test_self_leadership_is_rejected() {
        assert!(LeaderTopology::new(vec![Some(0)]).is_err());
    }

    #[test]
    fn test_out_of_range_leader_is_rejected() {
        assert!(LeaderTopology::new(vec![None, Some(7)]).is_err());
    }
}
