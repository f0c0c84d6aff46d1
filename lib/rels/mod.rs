//! Relations read directly off the program model.
//!
//! Each relation is filled over domains that must already be computed. A
//! program entity missing from its domain has its tuples skipped with a
//! warning rather than failing the whole relation.

use crate::program::{
    FieldId, InstId, InstructionKind, MethodId, MethodRemap, Program, TypeId, VarId,
};
use crate::project::{Project, Task};
use crate::store::{Domain, Element, RelSign, Store};
use crate::Error;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RelKind {
    /// `MI(m,i)`: method `m` contains call site `i`.
    MethodInvokes,
    /// `MH(m,h)`: method `m` contains allocation site `h`.
    MethodAllocs,
    /// `MV(m,v)`: `v` is a local variable of `m`.
    MethodVars,
    /// `thisMV(m,v)`: `v` is the receiver of instance method `m`.
    MethodThis,
    /// `IM(i,m)`: call site `i` may call `m`.
    InvokeTargets,
    /// `IinvkArg0(i,v)`: `v` is the receiver at call site `i`.
    InvokeReceiver,
    /// `EF(e,f)`: heap access `e` touches field `f`, or array elements.
    AccessedField,
    /// `checkCastVT(v,t)`: `v` is cast to `t`.
    CastTarget,
}

impl RelKind {
    pub fn name(&self) -> &'static str {
        match self {
            RelKind::MethodInvokes => "MI",
            RelKind::MethodAllocs => "MH",
            RelKind::MethodVars => "MV",
            RelKind::MethodThis => "thisMV",
            RelKind::InvokeTargets => "IM",
            RelKind::InvokeReceiver => "IinvkArg0",
            RelKind::AccessedField => "EF",
            RelKind::CastTarget => "checkCastVT",
        }
    }

    pub fn sign(&self) -> &'static str {
        match self {
            RelKind::MethodInvokes => "M0,I0:I0xM0",
            RelKind::MethodAllocs => "M0,H0:M0_H0",
            RelKind::MethodVars | RelKind::MethodThis => "M0,V0:M0_V0",
            RelKind::InvokeTargets => "I0,M0:I0xM0",
            RelKind::InvokeReceiver => "I0,V0:I0_V0",
            RelKind::AccessedField => "E0,F0:E0_F0",
            RelKind::CastTarget => "V0,T0:V0_T0",
        }
    }

    fn doms(&self) -> [&'static str; 2] {
        match self {
            RelKind::MethodInvokes => ["M", "I"],
            RelKind::MethodAllocs => ["M", "H"],
            RelKind::MethodVars | RelKind::MethodThis => ["M", "V"],
            RelKind::InvokeTargets => ["I", "M"],
            RelKind::InvokeReceiver => ["I", "V"],
            RelKind::AccessedField => ["E", "F"],
            RelKind::CastTarget => ["V", "T"],
        }
    }
}

/// Looks an element up, warning when it is missing so that the caller can
/// skip the tuple.
fn lookup<T: Element>(
    relation: &str,
    domain: &Domain<T>,
    element: &T,
) -> Result<Option<usize>, Error> {
    let index = domain.index_of(element)?;
    if index.is_none() {
        warn!(
            "{}: skipping tuple, {:?} is not in domain {}",
            relation,
            element,
            domain.name()
        );
    }
    Ok(index)
}

/// Pairs the method of every instruction in `insts` with the instruction.
fn by_method(
    relation: &str,
    program: &Program,
    methods: &Domain<MethodId>,
    insts: &Domain<InstId>,
) -> Result<Vec<Vec<usize>>, Error> {
    let mut tuples = Vec::new();
    for (index, &inst) in insts.iter() {
        let method = program.instruction(inst)?.method;
        if let Some(m) = lookup(relation, methods, &method)? {
            tuples.push(vec![m, index]);
        }
    }
    Ok(tuples)
}

pub struct RelTask {
    kind: RelKind,
    remap: MethodRemap,
}

impl RelTask {
    pub fn new(kind: RelKind) -> RelTask {
        RelTask {
            kind,
            remap: MethodRemap::new(),
        }
    }

    /// Replaces call targets by their remapped methods when filling `IM`.
    pub fn with_remap(mut self, remap: MethodRemap) -> RelTask {
        self.remap = remap;
        self
    }

    /// Computes the tuples of the relation, in column order of its sign.
    pub fn tuples(&self, program: &Program, store: &Store) -> Result<Vec<Vec<usize>>, Error> {
        let name = self.kind.name();
        let mut tuples = Vec::new();
        match self.kind {
            RelKind::MethodInvokes => {
                let m = store.domain::<MethodId>("M")?;
                tuples = by_method(name, program, m, store.domain::<InstId>("I")?)?;
            }
            RelKind::MethodAllocs => {
                let m = store.domain::<MethodId>("M")?;
                tuples = by_method(name, program, m, store.domain::<InstId>("H")?)?;
            }
            RelKind::MethodVars | RelKind::MethodThis => {
                let ms = store.domain::<MethodId>("M")?;
                let vs = store.domain::<VarId>("V")?;
                for (m, &method) in ms.iter() {
                    let method = program.method(method)?;
                    let vars: Vec<VarId> = if self.kind == RelKind::MethodThis {
                        method.this_var().into_iter().collect()
                    } else {
                        method.variables.clone()
                    };
                    for var in vars {
                        if let Some(v) = lookup(name, vs, &var)? {
                            tuples.push(vec![m, v]);
                        }
                    }
                }
            }
            RelKind::InvokeTargets => {
                let is = store.domain::<InstId>("I")?;
                let ms = store.domain::<MethodId>("M")?;
                for (i, &inst) in is.iter() {
                    if let InstructionKind::Invoke { targets, .. } = &program.instruction(inst)?.kind
                    {
                        for &target in targets {
                            let target = match self.remap.apply(program, target) {
                                Some(target) => target,
                                None => continue,
                            };
                            if let Some(m) = lookup(name, ms, &target)? {
                                tuples.push(vec![i, m]);
                            }
                        }
                    }
                }
            }
            RelKind::InvokeReceiver => {
                let is = store.domain::<InstId>("I")?;
                let vs = store.domain::<VarId>("V")?;
                for (i, &inst) in is.iter() {
                    if let InstructionKind::Invoke {
                        receiver: Some(receiver),
                        ..
                    } = &program.instruction(inst)?.kind
                    {
                        if let Some(v) = lookup(name, vs, receiver)? {
                            tuples.push(vec![i, v]);
                        }
                    }
                }
            }
            RelKind::AccessedField => {
                let es = store.domain::<InstId>("E")?;
                let fs = store.domain::<Option<FieldId>>("F")?;
                for (e, &inst) in es.iter() {
                    let field = program.instruction(inst)?.accessed_field();
                    if let Some(f) = lookup(name, fs, &field)? {
                        tuples.push(vec![e, f]);
                    }
                }
            }
            RelKind::CastTarget => {
                let vs = store.domain::<VarId>("V")?;
                let ts = store.domain::<TypeId>("T")?;
                for (_, inst) in program.instructions() {
                    if let InstructionKind::Cast { variable, target } = &inst.kind {
                        let v = lookup(name, vs, variable)?;
                        let t = lookup(name, ts, target)?;
                        if let (Some(v), Some(t)) = (v, t) {
                            tuples.push(vec![v, t]);
                        }
                    }
                }
            }
        }
        Ok(tuples)
    }
}

impl Task for RelTask {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn consumes(&self) -> Vec<String> {
        self.kind.doms().iter().map(|d| d.to_string()).collect()
    }

    fn produces(&self) -> Vec<String> {
        vec![self.kind.name().to_string()]
    }

    fn signatures(&self) -> Vec<(String, RelSign)> {
        match self.kind.sign().parse() {
            Ok(sign) => vec![(self.kind.name().to_string(), sign)],
            Err(_) => Vec::new(),
        }
    }

    fn run(&mut self, project: &mut Project) -> Result<(), Error> {
        let name = self.kind.name();
        let program = project.program().clone();
        let tuples = self.tuples(&program, project.store())?;

        let store = project.store_mut();
        let relation = store.zero_relation(name)?;
        for tuple in &tuples {
            relation.add(tuple)?;
        }
        debug!("Relation {}: {} tuples", name, relation.size()?);
        store.save_relation(name)?;
        store.close_relation(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doms::{DomKind, DomTask};
    use crate::options::OptionsBuilder;
    use crate::program::tests::sample_program;
    use crate::RC;
    use std::path::Path;

    fn project(dir: &Path, program: Program) -> Project {
        let options = OptionsBuilder::new().work_dir(dir.join("work")).build();
        let mut project = Project::new(options, RC::new(program));
        for kind in &[
            DomKind::Methods,
            DomKind::Invokes,
            DomKind::Allocs,
            DomKind::Vars,
            DomKind::HeapAccesses,
            DomKind::Fields,
            DomKind::Types,
        ] {
            project.register(Box::new(DomTask::new(*kind))).unwrap();
        }
        project
    }

    fn pairs(project: &mut Project, name: &str) -> Vec<(usize, usize)> {
        project.run_task(name).unwrap();
        let relation = project.store_mut().load_relation(name).unwrap();
        relation.iter_ary2(0, 1).unwrap().collect()
    }

    #[test]
    fn relations_of_sample_program() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(dir.path(), sample_program());
        for kind in &[
            RelKind::MethodInvokes,
            RelKind::MethodVars,
            RelKind::MethodThis,
            RelKind::InvokeTargets,
            RelKind::InvokeReceiver,
            RelKind::AccessedField,
        ] {
            project.register(Box::new(RelTask::new(*kind))).unwrap();
        }

        // I = [i1, i2, i4, i6]
        assert_eq!(
            pairs(&mut project, "MI"),
            vec![(0, 0), (0, 1), (1, 2), (2, 3)]
        );
        assert_eq!(
            pairs(&mut project, "IM"),
            vec![(0, 1), (1, 2), (2, 2), (3, 3)]
        );
        assert_eq!(pairs(&mut project, "thisMV"), vec![(1, 1)]);
        assert_eq!(pairs(&mut project, "MV").len(), 4);
        assert_eq!(pairs(&mut project, "IinvkArg0"), vec![(0, 0)]);
        // E = [i3], which writes f0 (index 1 in F)
        assert_eq!(pairs(&mut project, "EF"), vec![(0, 1)]);
    }

    #[test]
    fn remapped_targets() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(dir.path(), sample_program());
        let mut remap = MethodRemap::new();
        remap.insert("helper:()V@Util", "run:()V@T");
        remap.insert("<clinit>:()V@T", "missing:()V@Nowhere");
        project
            .register(Box::new(
                RelTask::new(RelKind::InvokeTargets).with_remap(remap),
            ))
            .unwrap();
        assert_eq!(pairs(&mut project, "IM"), vec![(0, 1), (1, 1), (2, 1)]);
    }

    #[test]
    fn cast_targets() {
        let dir = tempfile::tempdir().unwrap();
        let mut program = sample_program();
        program.instructions[2].kind = InstructionKind::Cast {
            variable: VarId(0),
            target: TypeId(0),
        };
        let mut project = project(dir.path(), program);
        project
            .register(Box::new(RelTask::new(RelKind::CastTarget)))
            .unwrap();
        assert_eq!(pairs(&mut project, "checkCastVT"), vec![(0, 0)]);
    }

    #[test]
    fn missing_domain() {
        let dir = tempfile::tempdir().unwrap();
        let options = OptionsBuilder::new().work_dir(dir.path()).build();
        let mut project = Project::new(options, RC::new(sample_program()));
        project
            .register(Box::new(RelTask::new(RelKind::MethodAllocs)))
            .unwrap();
        assert!(matches!(
            project.run_task("MH"),
            Err(Error::NotReady(_))
        ));
    }
}
