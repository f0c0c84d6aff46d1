use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeSet, VecDeque};

use crate::alias::Ctxt;
use crate::options::CtxtKind;
use crate::program::{InstId, MethodId, Program, VarId};
use crate::project::{Project, Task};
use crate::store::{Domain, RelSign, Store};
use crate::Error;

const PRODUCES: [&str; 9] = [
    "C", "CC", "CH", "CI", "epsilonM", "kcfaSenM", "kobjSenM", "ctxtCpyM", "epsilonV",
];

const SIGNATURES: [(&str, &str); 14] = [
    ("CC", "C0,C1:C0xC1"),
    ("CH", "C0,H0:C0_H0"),
    ("CI", "C0,I0:C0_I0"),
    ("epsilonM", "M0:M0"),
    ("kcfaSenM", "M0:M0"),
    ("kobjSenM", "M0:M0"),
    ("ctxtCpyM", "M0:M0"),
    ("epsilonV", "V0:V0"),
    ("refineH", "H0:H0"),
    ("refineI", "I0:I0"),
    ("refineM", "M0:M0"),
    ("refineV", "V0:V0"),
    ("IM", "I0,M0:I0xM0"),
    ("VH", "V0,H0:V0_H0"),
];

const REFINE_RELATIONS: [&str; 4] = ["refineH", "refineI", "refineM", "refineV"];

/// Computes the abstract contexts of every method.
///
/// Each method is analysed insensitively, k-call-site sensitively, k-object
/// sensitively or by copying the contexts of its callers, as chosen by the
/// options for static and instance methods. The entry method, class
/// initializers and abstract methods are always insensitive.
///
/// When refinement is enabled (`max_iters > 0`) every method starts out
/// insensitive. Every run after the first in a session then reads the
/// refinement relations: a site named in `refineH` or `refineI` gets its k
/// raised by one, a method named in `refineM` switches to its configured
/// kind, and a variable named in `refineV` is dropped from `epsilonV`.
#[derive(Default)]
pub struct ContextsTask {
    runs: usize,
    promoted: BTreeSet<MethodId>,
    refined_vars: BTreeSet<VarId>,
    kobj_bumps: FxHashMap<InstId, usize>,
    kcfa_bumps: FxHashMap<InstId, usize>,
}

/// How a context-sensitive method gets its contexts.
enum Preds {
    Insensitive,
    /// Call sites into the method, with the index of the calling method.
    CallSites(Vec<(usize, usize)>),
    /// Allocation sites of the receiver, with the index of the allocating
    /// method.
    Receivers(Vec<(usize, usize)>),
    /// Calling methods.
    Callers(Vec<usize>),
}

impl Preds {
    fn methods(&self) -> Vec<usize> {
        match self {
            Preds::Insensitive => Vec::new(),
            Preds::CallSites(sites) | Preds::Receivers(sites) => {
                sites.iter().map(|&(_, m)| m).collect()
            }
            Preds::Callers(methods) => methods.clone(),
        }
    }
}

impl ContextsTask {
    pub fn new() -> ContextsTask {
        ContextsTask::default()
    }

    /// Methods made context sensitive by refinement so far.
    pub fn promoted(&self) -> &BTreeSet<MethodId> {
        &self.promoted
    }

    /// The kind a method is analysed with when it is context sensitive.
    fn configured_kind(
        program: &Program,
        m: MethodId,
        inst: CtxtKind,
        stat: CtxtKind,
    ) -> Result<CtxtKind, Error> {
        let method = program.method(m)?;
        if program.main == Some(m) || method.is_class_initializer || method.is_abstract {
            Ok(CtxtKind::Insensitive)
        } else if method.is_static {
            Ok(stat)
        } else {
            Ok(inst)
        }
    }

    fn apply_refinements(&mut self, store: &mut Store) -> Result<(), Error> {
        for &name in &REFINE_RELATIONS {
            if !store.has_relation(name) || !store.is_persisted(name) {
                continue;
            }
            let indices: Vec<usize> = store.load_relation(name)?.iter_ary1(0)?.collect();
            store.close_relation(name)?;
            for &index in &indices {
                match name {
                    "refineH" => {
                        let site = *store.domain::<InstId>("H")?.get(index)?;
                        *self.kobj_bumps.entry(site).or_insert(0) += 1;
                    }
                    "refineI" => {
                        let site = *store.domain::<InstId>("I")?.get(index)?;
                        *self.kcfa_bumps.entry(site).or_insert(0) += 1;
                    }
                    "refineM" => {
                        self.promoted
                            .insert(*store.domain::<MethodId>("M")?.get(index)?);
                    }
                    _ => {
                        self.refined_vars
                            .insert(*store.domain::<VarId>("V")?.get(index)?);
                    }
                }
            }
            info!("Applied {} refinements from {}", indices.len(), name);
        }
        Ok(())
    }

    fn compute(&self, project: &mut Project) -> Result<(), Error> {
        let program = project.program().clone();
        let options = project.options().clone();
        let inst_kind = options.inst_ctxt_kind();
        let stat_kind = options.stat_ctxt_kind();
        let refining = options.max_iters() > 0;

        let store = project.store_mut();
        let ms = store.domain::<MethodId>("M")?.clone();
        let is = store.domain::<InstId>("I")?.clone();
        let hs = store.domain::<InstId>("H")?.clone();
        let vs = store.domain::<VarId>("V")?.clone();
        let im: Vec<(usize, usize)> = store.load_relation("IM")?.iter_ary2(0, 1)?.collect();
        store.close_relation("IM")?;
        let vh: Vec<(usize, usize)> = store.load_relation("VH")?.iter_ary2(0, 1)?.collect();
        store.close_relation("VH")?;

        let mut callers: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
        for &(i, m) in &im {
            callers.entry(m).or_default().push(i);
        }
        let mut points_to: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
        for &(v, h) in &vh {
            points_to.entry(v).or_default().push(h);
        }

        // The index in M of the method containing an instruction.
        let method_of = |site: InstId| -> Result<Option<usize>, Error> {
            ms.index_of(&program.instruction(site)?.method)
        };

        let num_m = ms.size();
        let mut kinds = Vec::with_capacity(num_m);
        let mut preds = Vec::with_capacity(num_m);
        let mut sensitive_i = vec![false; is.size()];
        // Variables of methods sensitive from the start keep their contexts.
        let mut sensitive_v: FxHashSet<VarId> = self.refined_vars.iter().cloned().collect();
        for (m, &method) in ms.iter() {
            let configured = ContextsTask::configured_kind(&program, method, inst_kind, stat_kind)?;
            let initial = if refining {
                CtxtKind::Insensitive
            } else {
                configured
            };
            if initial != CtxtKind::Insensitive {
                sensitive_v.extend(program.method(method)?.variables.iter().cloned());
            }
            let kind = if self.promoted.contains(&method) {
                configured
            } else {
                initial
            };
            let method_callers = callers.get(&m).map(|c| c.as_slice()).unwrap_or(&[]);
            let pred = match kind {
                CtxtKind::Insensitive => Preds::Insensitive,
                CtxtKind::CallSite => {
                    let mut sites = Vec::new();
                    for &i in method_callers {
                        sensitive_i[i] = true;
                        if let Some(caller) = method_of(*is.get(i)?)? {
                            sites.push((i, caller));
                        }
                    }
                    Preds::CallSites(sites)
                }
                CtxtKind::Object => {
                    let mut sites = Vec::new();
                    let this = program.method(method)?.this_var();
                    let v = match this {
                        Some(this) => vs.index_of(&this)?,
                        None => None,
                    };
                    if let Some(hs_of_this) = v.and_then(|v| points_to.get(&v)) {
                        for &h in hs_of_this {
                            if let Some(allocator) = method_of(*hs.get(h)?)? {
                                sites.push((h, allocator));
                            }
                        }
                    }
                    Preds::Receivers(sites)
                }
                CtxtKind::Copy => {
                    let mut methods = BTreeSet::new();
                    for &i in method_callers {
                        if let Some(caller) = method_of(*is.get(i)?)? {
                            methods.insert(caller);
                        }
                    }
                    Preds::Callers(methods.into_iter().collect())
                }
            };
            kinds.push(kind);
            preds.push(pred);
        }

        let kcfa = |site: InstId| options.kcfa_k() + self.kcfa_bumps.get(&site).unwrap_or(&0);
        let kobj = |site: InstId| options.kobj_k() + self.kobj_bumps.get(&site).unwrap_or(&0);

        // Least fixpoint of the contexts over the predecessor graph.
        let mut ctxts: Vec<BTreeSet<Ctxt>> = kinds
            .iter()
            .map(|kind| match kind {
                CtxtKind::Insensitive => std::iter::once(Ctxt::epsilon()).collect(),
                _ => BTreeSet::new(),
            })
            .collect();
        let mut succs: Vec<Vec<usize>> = vec![Vec::new(); num_m];
        for (m, pred) in preds.iter().enumerate() {
            for p in pred.methods() {
                succs[p].push(m);
            }
        }
        let mut queued = vec![false; num_m];
        let mut worklist = VecDeque::new();
        for (m, kind) in kinds.iter().enumerate() {
            if *kind != CtxtKind::Insensitive {
                queued[m] = true;
                worklist.push_back(m);
            }
        }
        let mut rounds = 0;
        while let Some(m) = worklist.pop_front() {
            queued[m] = false;
            rounds += 1;
            let mut new_ctxts = BTreeSet::new();
            match &preds[m] {
                Preds::Insensitive => continue,
                Preds::CallSites(sites) => {
                    for &(i, caller) in sites {
                        let site = *is.get(i)?;
                        for c in &ctxts[caller] {
                            new_ctxts.insert(c.append(kcfa(site), site));
                        }
                    }
                }
                Preds::Receivers(sites) => {
                    for &(h, allocator) in sites {
                        let site = *hs.get(h)?;
                        for c in &ctxts[allocator] {
                            new_ctxts.insert(c.append(kobj(site), site));
                        }
                    }
                }
                Preds::Callers(methods) => {
                    for &caller in methods {
                        new_ctxts.extend(ctxts[caller].iter().cloned());
                    }
                }
            }
            if new_ctxts != ctxts[m] {
                ctxts[m] = new_ctxts;
                for &succ in &succs[m] {
                    if !queued[succ] {
                        queued[succ] = true;
                        worklist.push_back(succ);
                    }
                }
            }
        }
        debug!("Contexts reached a fixpoint after {} steps", rounds);

        // (site index, site, method index, k) for every sensitive call site,
        // then for every allocation site.
        let mut invoke_sites = Vec::new();
        for (i, &site) in is.iter() {
            if sensitive_i[i] {
                if let Some(m) = method_of(site)? {
                    invoke_sites.push((i, site, m, kcfa(site)));
                }
            }
        }
        let mut alloc_sites = Vec::new();
        for (h, &site) in hs.iter() {
            if let Some(m) = method_of(site)? {
                alloc_sites.push((h, site, m, kobj(site)));
            }
        }

        let mut dom_c: Domain<Ctxt> = Domain::new("C");
        dom_c.get_or_add(Ctxt::epsilon());
        for &(_, site, m, k) in invoke_sites.iter().chain(&alloc_sites) {
            for c in &ctxts[m] {
                dom_c.get_or_add(c.append(k, site));
            }
        }

        let mut cc = Vec::new();
        let mut ci = Vec::new();
        let mut ch = Vec::new();
        for (sites, out) in [(&invoke_sites, &mut ci), (&alloc_sites, &mut ch)] {
            for &(index, site, m, k) in sites.iter() {
                for c in &ctxts[m] {
                    let old = dom_c.get_or_add(c.clone());
                    let new = dom_c.get_or_add(c.append(k, site));
                    cc.push(vec![old, new]);
                    out.push(vec![new, index]);
                }
            }
        }

        let mut by_kind: FxHashMap<CtxtKind, Vec<Vec<usize>>> = FxHashMap::default();
        for (m, kind) in kinds.iter().enumerate() {
            by_kind.entry(*kind).or_default().push(vec![m]);
        }
        let epsilon_v: Vec<Vec<usize>> = vs
            .iter()
            .filter(|(_, var)| !sensitive_v.contains(*var))
            .map(|(v, _)| vec![v])
            .collect();

        info!(
            "Contexts: {} in C, {} context-sensitive methods",
            dom_c.size(),
            kinds
                .iter()
                .filter(|k| **k != CtxtKind::Insensitive)
                .count()
        );
        store.insert_domain(dom_c);
        store.save_domain("C")?;

        let mut take = |kind: CtxtKind| by_kind.remove(&kind).unwrap_or_default();
        let relations = vec![
            ("CC", cc),
            ("CI", ci),
            ("CH", ch),
            ("epsilonM", take(CtxtKind::Insensitive)),
            ("kcfaSenM", take(CtxtKind::CallSite)),
            ("kobjSenM", take(CtxtKind::Object)),
            ("ctxtCpyM", take(CtxtKind::Copy)),
            ("epsilonV", epsilon_v),
        ];
        for (name, tuples) in relations {
            let relation = store.zero_relation(name)?;
            for tuple in &tuples {
                relation.add(tuple)?;
            }
            store.save_relation(name)?;
            store.close_relation(name)?;
        }
        Ok(())
    }
}

impl Task for ContextsTask {
    fn name(&self) -> &str {
        "ctxts"
    }

    fn consumes(&self) -> Vec<String> {
        ["M", "V", "H", "I", "IM", "VH"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn produces(&self) -> Vec<String> {
        PRODUCES.iter().map(|s| s.to_string()).collect()
    }

    fn signatures(&self) -> Vec<(String, RelSign)> {
        SIGNATURES
            .iter()
            .filter_map(|(name, sign)| sign.parse().ok().map(|sign| (name.to_string(), sign)))
            .collect()
    }

    fn run(&mut self, project: &mut Project) -> Result<(), Error> {
        let options = project.options();
        if options.inst_ctxt_kind() == CtxtKind::Copy {
            return Err(Error::InvalidOption {
                key: "inst.ctxt.kind".to_string(),
                message: "instance methods cannot copy contexts".to_string(),
            });
        }
        if options.stat_ctxt_kind() == CtxtKind::Object {
            return Err(Error::InvalidOption {
                key: "stat.ctxt.kind".to_string(),
                message: "static methods have no receiver object".to_string(),
            });
        }
        if self.runs == 0 {
            self.promoted.clear();
            self.refined_vars.clear();
            self.kobj_bumps.clear();
            self.kcfa_bumps.clear();
        } else {
            self.apply_refinements(project.store_mut())?;
        }
        self.compute(project)?;
        self.runs += 1;
        Ok(())
    }
}
