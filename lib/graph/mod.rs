//! Dependency graph between tasks.
//!
//! Vertices are task indices, labelled with the task name. An edge `a -> b`
//! means `b` consumes something `a` produces.

use rustc_hash::FxHashSet;
use std::collections::{BTreeMap, BTreeSet};

use crate::Error;

#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    labels: BTreeMap<usize, String>,
    successors: BTreeMap<usize, BTreeSet<usize>>,
    predecessors: BTreeMap<usize, BTreeSet<usize>>,
}

impl DependencyGraph {
    pub fn new() -> DependencyGraph {
        DependencyGraph::default()
    }

    pub fn num_vertices(&self) -> usize {
        self.labels.len()
    }

    pub fn has_vertex(&self, index: usize) -> bool {
        self.labels.contains_key(&index)
    }

    pub fn has_edge(&self, head: usize, tail: usize) -> bool {
        self.successors
            .get(&head)
            .map(|succs| succs.contains(&tail))
            .unwrap_or(false)
    }

    /// # Errors
    /// Error if a vertex with this index already exists.
    pub fn insert_vertex(&mut self, index: usize, label: &str) -> Result<(), Error> {
        if self.labels.contains_key(&index) {
            return Err(format!("duplicate vertex {}", index).into());
        }
        self.labels.insert(index, label.to_string());
        self.successors.insert(index, BTreeSet::new());
        self.predecessors.insert(index, BTreeSet::new());
        Ok(())
    }

    /// Adds the edge `head -> tail`. Adding an existing edge again is a no-op.
    pub fn insert_edge(&mut self, head: usize, tail: usize) -> Result<(), Error> {
        for index in [head, tail] {
            if !self.has_vertex(index) {
                return Err(Error::GraphVertexNotFound(index));
            }
        }
        self.successors.entry(head).or_default().insert(tail);
        self.predecessors.entry(tail).or_default().insert(head);
        Ok(())
    }

    /// Removes a vertex along with every edge touching it.
    pub fn remove_vertex(&mut self, index: usize) -> Result<(), Error> {
        if self.labels.remove(&index).is_none() {
            return Err(Error::GraphVertexNotFound(index));
        }
        for succ in self.successors.remove(&index).unwrap_or_default() {
            if let Some(preds) = self.predecessors.get_mut(&succ) {
                preds.remove(&index);
            }
        }
        for pred in self.predecessors.remove(&index).unwrap_or_default() {
            if let Some(succs) = self.successors.get_mut(&pred) {
                succs.remove(&index);
            }
        }
        Ok(())
    }

    pub fn successors(&self, index: usize) -> Result<&BTreeSet<usize>, Error> {
        self.successors
            .get(&index)
            .ok_or(Error::GraphVertexNotFound(index))
    }

    pub fn predecessors(&self, index: usize) -> Result<&BTreeSet<usize>, Error> {
        self.predecessors
            .get(&index)
            .ok_or(Error::GraphVertexNotFound(index))
    }

    /// Vertices reachable from `index` through at least one edge.
    pub fn reachable_from(&self, index: usize) -> Result<FxHashSet<usize>, Error> {
        let mut reached = FxHashSet::default();
        let mut stack: Vec<usize> = self.successors(index)?.iter().cloned().collect();
        while let Some(vertex) = stack.pop() {
            if reached.insert(vertex) {
                stack.extend(self.successors[&vertex].iter().cloned());
            }
        }
        Ok(reached)
    }

    /// Finds a cycle, returned as the vertices along it with the first one
    /// repeated at the end.
    pub fn find_cycle(&self) -> Option<Vec<usize>> {
        let mut finished = FxHashSet::default();
        let mut path = Vec::new();
        for &root in self.labels.keys() {
            if let Some(cycle) = self.cycle_through(root, &mut finished, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn cycle_through(
        &self,
        vertex: usize,
        finished: &mut FxHashSet<usize>,
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        if finished.contains(&vertex) {
            return None;
        }
        if let Some(start) = path.iter().position(|&v| v == vertex) {
            let mut cycle = path[start..].to_vec();
            cycle.push(vertex);
            return Some(cycle);
        }
        path.push(vertex);
        for &succ in &self.successors[&vertex] {
            if let Some(cycle) = self.cycle_through(succ, finished, path) {
                return Some(cycle);
            }
        }
        path.pop();
        finished.insert(vertex);
        None
    }

    /// Orders the vertices so that every edge points forward, breaking ties
    /// by index.
    pub fn topological_order(&self) -> Result<Vec<usize>, Error> {
        let mut indegree: BTreeMap<usize, usize> = self
            .predecessors
            .iter()
            .map(|(&v, preds)| (v, preds.len()))
            .collect();
        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&v, _)| v)
            .collect();
        let mut order = Vec::with_capacity(self.labels.len());
        while let Some(vertex) = ready.iter().next().cloned() {
            ready.remove(&vertex);
            order.push(vertex);
            for succ in &self.successors[&vertex] {
                if let Some(d) = indegree.get_mut(succ) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(*succ);
                    }
                }
            }
        }
        if order.len() != self.labels.len() {
            return Err("dependency graph contains a cycle".into());
        }
        Ok(order)
    }

    /// The graph in graphviz format.
    pub fn dot_graph(&self) -> String {
        let mut dot = String::from("digraph tasks {\n    node [shape=\"box\"];\n");
        for (index, label) in &self.labels {
            dot.push_str(&format!(
                "    {} [label=\"{}\"];\n",
                index,
                label.replace('"', "\\\"")
            ));
        }
        for (head, succs) in &self.successors {
            for tail in succs {
                dot.push_str(&format!("    {} -> {};\n", head, tail));
            }
        }
        dot.push('}');
        dot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 0 -> 1 -> 3, 0 -> 2 -> 3
    fn diamond() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (v, label) in ["a", "b", "c", "d"].iter().enumerate() {
            graph.insert_vertex(v, label).unwrap();
        }
        for (head, tail) in [(0, 1), (0, 2), (1, 3), (2, 3)] {
            graph.insert_edge(head, tail).unwrap();
        }
        graph
    }

    #[test]
    fn topological_order() {
        let mut graph = diamond();
        assert_eq!(graph.topological_order().unwrap(), vec![0, 1, 2, 3]);
        graph.insert_edge(3, 1).unwrap();
        assert!(graph.topological_order().is_err());
    }

    #[test]
    fn find_cycle() {
        let mut graph = diamond();
        assert!(graph.find_cycle().is_none());

        graph.insert_edge(3, 1).unwrap();
        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.contains(&1));
        assert!(cycle.contains(&3));
        assert!(!cycle.contains(&0));
    }

    #[test]
    fn self_loop() {
        let mut graph = DependencyGraph::new();
        graph.insert_vertex(7, "loop").unwrap();
        graph.insert_edge(7, 7).unwrap();
        assert_eq!(graph.find_cycle(), Some(vec![7, 7]));
    }

    #[test]
    fn remove_vertex() {
        let mut graph = diamond();
        graph.remove_vertex(1).unwrap();
        assert!(!graph.has_edge(0, 1));
        assert_eq!(graph.num_vertices(), 3);
        assert_eq!(graph.predecessors(3).unwrap().len(), 1);
        assert!(graph.remove_vertex(1).is_err());
        assert!(graph.insert_edge(0, 1).is_err());
    }

    #[test]
    fn reachable_from() {
        let graph = diamond();
        let reached = graph.reachable_from(2).unwrap();
        assert_eq!(reached.len(), 1);
        assert!(reached.contains(&3));
        assert_eq!(graph.reachable_from(0).unwrap().len(), 3);
        assert!(graph.reachable_from(9).is_err());
    }

    #[test]
    fn dot_graph() {
        let dot = diamond().dot_graph();
        assert!(dot.contains("2 [label=\"c\"];"));
        assert!(dot.contains("1 -> 3;"));
    }
}
