use rustc_hash::{FxHashMap, FxHashSet};

use crate::graph::DependencyGraph;
use crate::project::Task;
use crate::Error;

struct Slot {
    name: String,
    consumes: Vec<String>,
    produces: Vec<String>,
    // `None` while the task is running.
    task: Option<Box<dyn Task>>,
}

/// Keeps the registered tasks, the dependencies between them and which of
/// them have run.
///
/// There is an edge from task `a` to task `b` whenever `a` produces an
/// artifact `b` consumes. The graph is kept acyclic: a registration that
/// would close a cycle is refused.
pub struct Scheduler {
    slots: Vec<Slot>,
    by_name: FxHashMap<String, usize>,
    producers: FxHashMap<String, usize>,
    consumers: FxHashMap<String, Vec<usize>>,
    graph: DependencyGraph,
    done: FxHashSet<usize>,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            slots: Vec::new(),
            by_name: FxHashMap::default(),
            producers: FxHashMap::default(),
            consumers: FxHashMap::default(),
            graph: DependencyGraph::new(),
            done: FxHashSet::default(),
        }
    }

    pub fn register(&mut self, task: Box<dyn Task>) -> Result<(), Error> {
        let name = task.name().to_string();
        let consumes = task.consumes();
        let produces = task.produces();

        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateTask(name));
        }
        for artifact in &produces {
            if let Some(&producer) = self.producers.get(artifact) {
                return Err(Error::DuplicateProducer {
                    artifact: artifact.clone(),
                    first: self.slots[producer].name.clone(),
                    second: name,
                });
            }
        }

        let index = self.slots.len();
        self.graph.insert_vertex(index, &name)?;

        let mut edges = Vec::new();
        for artifact in &consumes {
            if let Some(&producer) = self.producers.get(artifact) {
                edges.push((producer, index));
            }
            if produces.contains(artifact) {
                edges.push((index, index));
            }
        }
        for artifact in &produces {
            for &consumer in self.consumers.get(artifact).into_iter().flatten() {
                edges.push((index, consumer));
            }
        }
        for (head, tail) in edges {
            self.graph.insert_edge(head, tail)?;
        }

        if let Some(cycle) = self.graph.find_cycle() {
            self.graph.remove_vertex(index)?;
            let names = cycle
                .into_iter()
                .map(|i| {
                    if i == index {
                        name.clone()
                    } else {
                        self.slots[i].name.clone()
                    }
                })
                .collect();
            return Err(Error::CyclicDependency(names));
        }

        for artifact in &produces {
            self.producers.insert(artifact.clone(), index);
        }
        for artifact in &consumes {
            self.consumers.entry(artifact.clone()).or_default().push(index);
        }
        self.by_name.insert(name.clone(), index);
        self.slots.push(Slot {
            name,
            consumes,
            produces,
            task: Some(task),
        });
        Ok(())
    }

    pub fn index_of(&self, name: &str) -> Result<usize, Error> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(name.to_string()))
    }

    pub fn name(&self, index: usize) -> &str {
        &self.slots[index].name
    }

    pub fn has_task(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.name.as_str()).collect()
    }

    pub fn consumes(&self, index: usize) -> &[String] {
        &self.slots[index].consumes
    }

    pub fn produces(&self, index: usize) -> &[String] {
        &self.slots[index].produces
    }

    /// The task producing `artifact`.
    pub fn producer(&self, artifact: &str) -> Option<usize> {
        self.producers.get(artifact).cloned()
    }

    pub fn is_done(&self, index: usize) -> bool {
        self.done.contains(&index)
    }

    pub fn mark_done(&mut self, index: usize) {
        self.done.insert(index);
    }

    /// Forgets that the task ran. Tasks depending on it are left alone.
    pub fn reset(&mut self, index: usize) {
        self.done.remove(&index);
    }

    pub fn reset_all(&mut self) {
        self.done.clear();
    }

    /// Takes a task out of its slot to run it.
    pub fn take(&mut self, index: usize) -> Result<Box<dyn Task>, Error> {
        let slot = &mut self.slots[index];
        slot.task
            .take()
            .ok_or_else(|| Error::TaskInProgress(slot.name.clone()))
    }

    pub fn restore(&mut self, index: usize, task: Box<dyn Task>) {
        self.slots[index].task = Some(task);
    }

    /// Every task that transitively consumes something the task produces, in
    /// an order they can run in.
    pub fn dependents(&self, index: usize) -> Result<Vec<usize>, Error> {
        let reachable = self.graph.reachable_from(index)?;
        Ok(self
            .graph
            .topological_order()?
            .into_iter()
            .filter(|i| reachable.contains(i))
            .collect())
    }

    /// The task graph in graphviz format.
    pub fn dot_graph(&self) -> String {
        self.graph.dot_graph()
    }
}

impl Default for Scheduler {
    fn default() -> Scheduler {
        Scheduler::new()
    }
}
