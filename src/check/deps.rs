//! Rate dependency graph
//!
//! Edges point from a rate to the rates it reads in the same step. Ordering
//! uses Kahn's algorithm; whatever is left unordered lies on or behind a
//! cycle, and each strongly connected component with a cycle is reported
//! once with a concrete path.

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Dependency graph over rate indices
pub struct DependencyGraph {
    graph: DiGraph<usize, ()>,
    nodes: Vec<NodeIndex>,
}

impl DependencyGraph {
    pub fn new(count: usize) -> Self {
        let mut graph = DiGraph::with_capacity(count, count);
        let nodes = (0..count).map(|i| graph.add_node(i)).collect();
        Self { graph, nodes }
    }

    /// Record that `rate` reads `on` in the same step
    pub fn add_dependency(&mut self, rate: usize, on: usize) {
        self.graph.update_edge(self.nodes[rate], self.nodes[on], ());
    }

    /// Rates with every dependency before its consumer. Among ready rates
    /// the earliest declared goes first, so the order is stable.
    ///
    /// On failure returns each cycle as a path that starts and ends at the
    /// same rate, e.g. `[a, b, a]`.
    pub fn topo_order(&self) -> Result<Vec<usize>, Vec<Vec<usize>>> {
        let count = self.nodes.len();
        let mut remaining: Vec<usize> = self
            .nodes
            .iter()
            .map(|&n| self.graph.neighbors_directed(n, Direction::Outgoing).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = remaining
            .iter()
            .enumerate()
            .filter(|(_, deps)| **deps == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(count);
        while let Some(Reverse(rate)) = ready.pop() {
            order.push(rate);
            for consumer in self
                .graph
                .neighbors_directed(self.nodes[rate], Direction::Incoming)
            {
                let c = self.graph[consumer];
                remaining[c] -= 1;
                if remaining[c] == 0 {
                    ready.push(Reverse(c));
                }
            }
        }

        if order.len() == count {
            Ok(order)
        } else {
            Err(self.cycles())
        }
    }

    /// One path per cyclic strongly connected component, ordered by the
    /// earliest declared member
    fn cycles(&self) -> Vec<Vec<usize>> {
        let mut cycles: Vec<Vec<usize>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
            })
            .filter_map(|scc| {
                let members: Vec<usize> = scc.iter().map(|&n| self.graph[n]).collect();
                self.cycle_path(&members)
            })
            .collect();
        cycles.sort_by_key(|path| path[0]);
        cycles
    }

    /// Walk from the earliest member back to itself inside the component
    fn cycle_path(&self, members: &[usize]) -> Option<Vec<usize>> {
        let start = members.iter().copied().min()?;
        let mut path = vec![start];
        let mut visited = vec![false; self.nodes.len()];
        visited[start] = true;
        if self.walk(start, start, members, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn walk(
        &self,
        current: usize,
        start: usize,
        members: &[usize],
        visited: &mut [bool],
        path: &mut Vec<usize>,
    ) -> bool {
        let mut next: Vec<usize> = self
            .graph
            .neighbors_directed(self.nodes[current], Direction::Outgoing)
            .map(|n| self.graph[n])
            .filter(|n| members.contains(n))
            .collect();
        next.sort_unstable();

        for n in next {
            if n == start {
                path.push(n);
                return true;
            }
            if !visited[n] {
                visited[n] = true;
                path.push(n);
                if self.walk(n, start, members, visited, path) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diamond_order() {
        // d reads b and c, both read a
        let mut g = DependencyGraph::new(4);
        g.add_dependency(1, 0);
        g.add_dependency(2, 0);
        g.add_dependency(3, 1);
        g.add_dependency(3, 2);
        assert_eq!(g.topo_order().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_forward_reference_order() {
        let mut g = DependencyGraph::new(2);
        g.add_dependency(0, 1);
        assert_eq!(g.topo_order().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_two_cycle_reported_once() {
        let mut g = DependencyGraph::new(3);
        g.add_dependency(0, 1);
        g.add_dependency(1, 0);
        g.add_dependency(2, 0);
        assert_eq!(g.topo_order().unwrap_err(), vec![vec![0, 1, 0]]);
    }

    #[test]
    fn test_self_loop() {
        let mut g = DependencyGraph::new(1);
        g.add_dependency(0, 0);
        assert_eq!(g.topo_order().unwrap_err(), vec![vec![0, 0]]);
    }

    #[test]
    fn test_separate_cycles() {
        let mut g = DependencyGraph::new(5);
        g.add_dependency(0, 1);
        g.add_dependency(1, 0);
        g.add_dependency(2, 3);
        g.add_dependency(3, 4);
        g.add_dependency(4, 2);
        let cycles = g.topo_order().unwrap_err();
        assert_eq!(cycles, vec![vec![0, 1, 0], vec![2, 3, 4, 2]]);
    }
}
