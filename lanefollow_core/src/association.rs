//! Data association: gated candidate graph and global-nearest-neighbour
//! greedy assignment.
//!
//! # Algorithm
//! 1. For each (track, detection) pair that passed gating, add an edge to the
//!    sparse bipartite graph, costed by Mahalanobis d².
//! 2. Sort edges by (cost, track index, detection index).
//! 3. Walk the sorted list and accept every edge whose track and detection
//!    are both still free.
//!
//! Greedy GNN is not optimal assignment: a locally cheapest pair can block a
//! globally cheaper pairing. With well separated targets ahead of a car this
//! rarely matters, and the walk is deterministic for equal costs.

// ---------------------------------------------------------------------------
// Bipartite graph
// ---------------------------------------------------------------------------

/// A gate-passed association candidate.
#[derive(Clone, Debug)]
pub struct AssignEdge {
    pub track_idx: usize,
    pub meas_idx: usize,
    /// Mahalanobis distance squared (used as cost)
    pub cost: f64,
}

/// Sparse bipartite graph: edges between track indices and detection indices.
#[derive(Clone, Debug, Default)]
pub struct BipartiteGraph {
    pub edges: Vec<AssignEdge>,
    pub n_tracks: usize,
    pub n_meas: usize,
}

impl BipartiteGraph {
    pub fn new(n_tracks: usize, n_meas: usize) -> Self {
        Self {
            edges: Vec::new(),
            n_tracks,
            n_meas,
        }
    }

    pub fn add_edge(&mut self, track_idx: usize, meas_idx: usize, cost: f64) {
        self.edges.push(AssignEdge {
            track_idx,
            meas_idx,
            cost,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Greedy GNN
// ---------------------------------------------------------------------------

/// Assignment result: (track_idx, meas_idx) matched pairs.
#[derive(Clone, Debug, Default)]
pub struct Assignment {
    pub pairs: Vec<(usize, usize)>,
    /// Track indices that were NOT matched (missed detections)
    pub unmatched_tracks: Vec<usize>,
    /// Detection indices not matched (births or clutter)
    pub unmatched_meas: Vec<usize>,
}

/// Lowest-cost-first greedy assignment over the gated graph.
pub fn greedy_assign(graph: &BipartiteGraph) -> Assignment {
    let mut edges: Vec<&AssignEdge> = graph.edges.iter().collect();
    edges.sort_by(|a, b| {
        a.cost
            .total_cmp(&b.cost)
            .then(a.track_idx.cmp(&b.track_idx))
            .then(a.meas_idx.cmp(&b.meas_idx))
    });

    let mut track_used = vec![false; graph.n_tracks];
    let mut meas_used = vec![false; graph.n_meas];
    let mut pairs = Vec::new();

    for e in edges {
        if track_used[e.track_idx] || meas_used[e.meas_idx] {
            continue;
        }
        track_used[e.track_idx] = true;
        meas_used[e.meas_idx] = true;
        pairs.push((e.track_idx, e.meas_idx));
    }

    Assignment {
        pairs,
        unmatched_tracks: (0..graph.n_tracks).filter(|&i| !track_used[i]).collect(),
        unmatched_meas: (0..graph.n_meas).filter(|&j| !meas_used[j]).collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cheapest_pair_wins_contested_detection() {
        let mut graph = BipartiteGraph::new(2, 1);
        graph.add_edge(0, 0, 4.0);
        graph.add_edge(1, 0, 1.5);
        let ass = greedy_assign(&graph);
        assert_eq!(ass.pairs, vec![(1, 0)]);
        assert_eq!(ass.unmatched_tracks, vec![0]);
        assert!(ass.unmatched_meas.is_empty());
    }

    #[test]
    fn greedy_is_not_optimal() {
        // optimal total is 2+2=4 via (0,1),(1,0); greedy takes (0,0)=1 then
        // track 1 only gates with detection 0, which is gone.
        let mut graph = BipartiteGraph::new(2, 2);
        graph.add_edge(0, 0, 1.0);
        graph.add_edge(0, 1, 2.0);
        graph.add_edge(1, 0, 2.0);
        let ass = greedy_assign(&graph);
        assert_eq!(ass.pairs, vec![(0, 0)]);
        assert_eq!(ass.unmatched_tracks, vec![1]);
        assert_eq!(ass.unmatched_meas, vec![1]);
    }

    #[test]
    fn equal_costs_break_by_lower_track_index() {
        let mut graph = BipartiteGraph::new(2, 1);
        graph.add_edge(1, 0, 3.0);
        graph.add_edge(0, 0, 3.0);
        let ass = greedy_assign(&graph);
        assert_eq!(ass.pairs, vec![(0, 0)]);
    }

    #[test]
    fn empty_graph_leaves_everything_unmatched() {
        let graph = BipartiteGraph::new(3, 2);
        assert!(graph.is_empty());
        let ass = greedy_assign(&graph);
        assert!(ass.pairs.is_empty());
        assert_eq!(ass.unmatched_tracks, vec![0, 1, 2]);
        assert_eq!(ass.unmatched_meas, vec![0, 1]);
    }
}
