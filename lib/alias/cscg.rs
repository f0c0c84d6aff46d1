//! Context-insensitive and context-sensitive call graphs.

use rustc_hash::FxHashSet;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::alias::{Ctxt, ReceiverObjects};
use crate::program::{InstId, InstructionKind, MethodId, MethodRemap, Program};
use crate::store::Store;
use crate::Error;

/// A call graph without contexts.
#[derive(Clone, Debug, Default)]
pub struct CiCallGraph {
    roots: Vec<MethodId>,
    sites: BTreeMap<MethodId, BTreeSet<InstId>>,
    targets: BTreeMap<InstId, BTreeSet<MethodId>>,
    statics: FxHashSet<MethodId>,
    insensitive: FxHashSet<MethodId>,
}

impl CiCallGraph {
    pub fn new(roots: Vec<MethodId>) -> CiCallGraph {
        let insensitive = roots.iter().cloned().collect();
        CiCallGraph {
            roots,
            insensitive,
            ..CiCallGraph::default()
        }
    }

    fn with_program_flags(program: &Program) -> Result<CiCallGraph, Error> {
        let mut graph = CiCallGraph::new(program.roots());
        for m in program.method_ids() {
            let method = program.method(m)?;
            if method.is_static {
                graph.statics.insert(m);
            }
            if method.is_abstract || method.is_class_initializer {
                graph.insensitive.insert(m);
            }
        }
        Ok(graph)
    }

    /// Reads calls off the program model, replacing targets through `remap`.
    pub fn from_program(program: &Program, remap: &MethodRemap) -> Result<CiCallGraph, Error> {
        let mut graph = CiCallGraph::with_program_flags(program)?;
        for (i, inst) in program.instructions() {
            if let InstructionKind::Invoke { targets, .. } = &inst.kind {
                graph.sites.entry(inst.method).or_default().insert(i);
                for &target in targets {
                    if let Some(target) = remap.apply(program, target) {
                        graph.add_call(inst.method, i, target);
                    }
                }
            }
        }
        Ok(graph)
    }

    /// Builds the graph from the open relations `MI` and `IM`.
    pub fn from_store(program: &Program, store: &Store) -> Result<CiCallGraph, Error> {
        let ms = store.domain::<MethodId>("M")?;
        let is = store.domain::<InstId>("I")?;
        let mut graph = CiCallGraph::with_program_flags(program)?;
        for (m, i) in store.relation("MI")?.iter_ary2(0, 1)? {
            graph
                .sites
                .entry(*ms.get(m)?)
                .or_default()
                .insert(*is.get(i)?);
        }
        for (i, m) in store.relation("IM")?.iter_ary2(0, 1)? {
            let site = *is.get(i)?;
            graph.targets.entry(site).or_default().insert(*ms.get(m)?);
        }
        Ok(graph)
    }

    pub fn add_call(&mut self, caller: MethodId, site: InstId, callee: MethodId) {
        self.sites.entry(caller).or_default().insert(site);
        self.targets.entry(site).or_default().insert(callee);
    }

    pub fn set_static(&mut self, method: MethodId) {
        self.statics.insert(method);
    }

    /// Makes `method` run only in the epsilon context.
    pub fn set_insensitive(&mut self, method: MethodId) {
        self.insensitive.insert(method);
    }

    pub fn is_static(&self, method: MethodId) -> bool {
        self.statics.contains(&method)
    }

    pub fn is_insensitive(&self, method: MethodId) -> bool {
        self.insensitive.contains(&method)
    }

    pub fn roots(&self) -> &[MethodId] {
        &self.roots
    }

    /// The call sites in `method`.
    pub fn sites(&self, method: MethodId) -> impl Iterator<Item = InstId> + '_ {
        self.sites.get(&method).into_iter().flatten().cloned()
    }

    pub fn targets(&self, site: InstId) -> impl Iterator<Item = MethodId> + '_ {
        self.targets.get(&site).into_iter().flatten().cloned()
    }
}

/// How contexts are given to callees when building a `CallGraph`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContextPolicy {
    Insensitive,
    /// The caller's context extended by the call site.
    CallSite { k: usize },
    /// The contexts of the receiver objects.
    Object { k: usize },
}

/// A call graph whose nodes are methods paired with contexts.
#[derive(Clone, Debug, Default)]
pub struct CallGraph {
    roots: BTreeSet<(Ctxt, MethodId)>,
    nodes: BTreeSet<(Ctxt, MethodId)>,
    targets: BTreeMap<(Ctxt, InstId), BTreeSet<(Ctxt, MethodId)>>,
    callers: BTreeMap<(Ctxt, MethodId), BTreeSet<(Ctxt, InstId)>>,
}

impl CallGraph {
    /// Explores the methods reachable from the roots of `ci`, starting in
    /// the epsilon context.
    pub fn build(
        ci: &CiCallGraph,
        policy: ContextPolicy,
        receivers: &dyn ReceiverObjects,
    ) -> CallGraph {
        let mut graph = CallGraph::default();
        let mut queue = VecDeque::new();
        for &root in ci.roots() {
            let node = (Ctxt::epsilon(), root);
            graph.roots.insert(node.clone());
            if graph.nodes.insert(node.clone()) {
                queue.push_back(node);
            }
        }

        while let Some((ctxt, method)) = queue.pop_front() {
            for site in ci.sites(method) {
                for callee in ci.targets(site) {
                    for callee_ctxt in callee_ctxts(ci, policy, receivers, &ctxt, site, callee) {
                        let node = (callee_ctxt, callee);
                        graph.add_edge(ctxt.clone(), site, node.clone());
                        if graph.nodes.insert(node.clone()) {
                            queue.push_back(node);
                        }
                    }
                }
            }
        }
        debug!(
            "Context-sensitive call graph: {} nodes, {} call sites",
            graph.nodes.len(),
            graph.targets.len()
        );
        graph
    }

    /// Reads the graph from the open relations `rootCM`, `reachableCM` and
    /// `CICM` over the domains `C`, `I` and `M`.
    pub fn from_store(store: &Store) -> Result<CallGraph, Error> {
        let cs = store.domain::<Ctxt>("C")?;
        let is = store.domain::<InstId>("I")?;
        let ms = store.domain::<MethodId>("M")?;
        let mut graph = CallGraph::default();

        for (c, m) in store.relation("rootCM")?.iter_ary2(0, 1)? {
            graph.roots.insert((cs.get(c)?.clone(), *ms.get(m)?));
        }
        for (c, m) in store.relation("reachableCM")?.iter_ary2(0, 1)? {
            graph.nodes.insert((cs.get(c)?.clone(), *ms.get(m)?));
        }
        for tuple in store.relation("CICM")?.iter()? {
            let caller = cs.get(tuple[0])?.clone();
            let site = *is.get(tuple[1])?;
            let callee = (cs.get(tuple[2])?.clone(), *ms.get(tuple[3])?);
            graph.add_edge(caller, site, callee);
        }
        Ok(graph)
    }

    /// Closes the relations `from_store` read.
    pub fn free(store: &mut Store) -> Result<(), Error> {
        for name in &["rootCM", "reachableCM", "CICM"] {
            store.close_relation(name)?;
        }
        Ok(())
    }

    fn add_edge(&mut self, ctxt: Ctxt, site: InstId, callee: (Ctxt, MethodId)) {
        self.callers
            .entry(callee.clone())
            .or_default()
            .insert((ctxt.clone(), site));
        self.targets.entry((ctxt, site)).or_default().insert(callee);
    }

    /// The methods, with their contexts, `site` may call in `ctxt`.
    pub fn targets(&self, ctxt: &Ctxt, site: InstId) -> BTreeSet<(Ctxt, MethodId)> {
        self.targets
            .get(&(ctxt.clone(), site))
            .cloned()
            .unwrap_or_default()
    }

    /// The call sites, with their contexts, that may call `method` in `ctxt`.
    pub fn callers(&self, ctxt: &Ctxt, method: MethodId) -> BTreeSet<(Ctxt, InstId)> {
        self.callers
            .get(&(ctxt.clone(), method))
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self, ctxt: &Ctxt, site: InstId, callee_ctxt: &Ctxt, method: MethodId) -> bool {
        self.targets
            .get(&(ctxt.clone(), site))
            .map(|callees| callees.contains(&(callee_ctxt.clone(), method)))
            .unwrap_or(false)
    }

    /// The contexts `method` is reachable in.
    pub fn contexts(&self, method: MethodId) -> BTreeSet<Ctxt> {
        self.nodes
            .iter()
            .filter(|(_, m)| *m == method)
            .map(|(c, _)| c.clone())
            .collect()
    }

    pub fn roots(&self) -> &BTreeSet<(Ctxt, MethodId)> {
        &self.roots
    }

    pub fn reachable(&self) -> &BTreeSet<(Ctxt, MethodId)> {
        &self.nodes
    }
}

fn callee_ctxts(
    ci: &CiCallGraph,
    policy: ContextPolicy,
    receivers: &dyn ReceiverObjects,
    ctxt: &Ctxt,
    site: InstId,
    callee: MethodId,
) -> Vec<Ctxt> {
    if ci.is_insensitive(callee) {
        return vec![Ctxt::epsilon()];
    }
    match policy {
        ContextPolicy::Insensitive => vec![Ctxt::epsilon()],
        ContextPolicy::CallSite { k } => vec![ctxt.append(k, site)],
        ContextPolicy::Object { .. } if ci.is_static(callee) => vec![ctxt.clone()],
        ContextPolicy::Object { k } => match receivers.receiver(ctxt, site) {
            Some(object) => object.ctxts().iter().map(|o| o.truncate(k)).collect(),
            None => {
                trace!("No receiver objects for {} in {}", site, ctxt);
                Vec::new()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::{AbstractObject, NoReceivers};
    use crate::program::tests::sample_program;
    use rustc_hash::FxHashMap;

    fn c(sites: &[usize]) -> Ctxt {
        Ctxt::new(sites.iter().map(|&s| InstId(s)).collect())
    }

    /// m0 calls m1 at i1 and i2; m1 calls m2 at i3; m2 calls itself at i4.
    fn ci() -> CiCallGraph {
        let mut ci = CiCallGraph::new(vec![MethodId(0)]);
        ci.add_call(MethodId(0), InstId(1), MethodId(1));
        ci.add_call(MethodId(0), InstId(2), MethodId(1));
        ci.add_call(MethodId(1), InstId(3), MethodId(2));
        ci.add_call(MethodId(2), InstId(4), MethodId(2));
        ci
    }

    #[test]
    fn insensitive() {
        let graph = CallGraph::build(&ci(), ContextPolicy::Insensitive, &NoReceivers);
        assert_eq!(graph.reachable().len(), 3);
        let m2: Vec<Ctxt> = graph.contexts(MethodId(2)).into_iter().collect();
        assert_eq!(m2, vec![Ctxt::epsilon()]);
        assert!(graph.calls(&Ctxt::epsilon(), InstId(4), &Ctxt::epsilon(), MethodId(2)));
    }

    #[test]
    fn call_site_sensitive() {
        let graph = CallGraph::build(&ci(), ContextPolicy::CallSite { k: 2 }, &NoReceivers);
        let m1: Vec<Ctxt> = graph.contexts(MethodId(1)).into_iter().collect();
        assert_eq!(m1, vec![c(&[1]), c(&[2])]);
        let m2: Vec<Ctxt> = graph.contexts(MethodId(2)).into_iter().collect();
        assert_eq!(
            m2,
            vec![c(&[3, 1]), c(&[3, 2]), c(&[4, 3]), c(&[4, 4])]
        );
        let callers: Vec<(Ctxt, InstId)> =
            graph.callers(&c(&[3, 1]), MethodId(2)).into_iter().collect();
        assert_eq!(callers, vec![(c(&[1]), InstId(3))]);
        assert!(graph.calls(&c(&[3, 1]), InstId(4), &c(&[4, 3]), MethodId(2)));
        assert!(graph.targets(&Ctxt::epsilon(), InstId(3)).is_empty());
        assert_eq!(graph.roots().len(), 1);
    }

    #[test]
    fn object_sensitive() {
        let mut ci = ci();
        ci.set_static(MethodId(2));
        let mut receivers = FxHashMap::default();
        receivers.insert(
            (Ctxt::epsilon(), InstId(1)),
            AbstractObject::new(vec![c(&[7, 8])]),
        );
        let graph = CallGraph::build(&ci, ContextPolicy::Object { k: 1 }, &receivers);
        // i2 has no receiver facts, the static m2 copies the caller context.
        let m1: Vec<Ctxt> = graph.contexts(MethodId(1)).into_iter().collect();
        assert_eq!(m1, vec![c(&[7])]);
        let m2: Vec<Ctxt> = graph.contexts(MethodId(2)).into_iter().collect();
        assert_eq!(m2, vec![c(&[7])]);
    }

    #[test]
    fn from_program_roots_and_flags() {
        let program = sample_program();
        let ci = CiCallGraph::from_program(&program, &MethodRemap::new()).unwrap();
        assert_eq!(ci.roots(), &[MethodId(0), MethodId(3)]);
        assert!(ci.is_insensitive(MethodId(3)));
        assert!(ci.is_static(MethodId(2)));
        let graph = CallGraph::build(&ci, ContextPolicy::CallSite { k: 1 }, &NoReceivers);
        let m3: Vec<Ctxt> = graph.contexts(MethodId(3)).into_iter().collect();
        assert_eq!(m3, vec![Ctxt::epsilon()]);
        let m2: Vec<Ctxt> = graph.contexts(MethodId(2)).into_iter().collect();
        assert_eq!(m2, vec![c(&[2]), c(&[4])]);
    }

    #[test]
    fn from_store_requires_relations() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        assert!(matches!(
            CallGraph::from_store(&store),
            Err(Error::NotReady(_))
        ));
    }
}
