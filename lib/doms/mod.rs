//! Domains numbering the entities of the program model.
//!
//! | Domain | Elements |
//! |---|---|
//! | `M` | methods, the entry method first |
//! | `I` | call sites |
//! | `H` | allocation sites |
//! | `V` | reference variables |
//! | `E` | instance field and array element accesses |
//! | `F` | fields, index 0 standing for the elements of arrays |
//! | `L` | lock acquisitions |
//! | `T` | types |

use crate::program::{FieldId, InstId, Instruction, MethodId, Program, TypeId, VarId};
use crate::project::{Project, Task};
use crate::store::{Domain, Element};
use crate::Error;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DomKind {
    Methods,
    Invokes,
    Allocs,
    Vars,
    HeapAccesses,
    Fields,
    Locks,
    Types,
}

impl DomKind {
    pub fn name(&self) -> &'static str {
        match self {
            DomKind::Methods => "M",
            DomKind::Invokes => "I",
            DomKind::Allocs => "H",
            DomKind::Vars => "V",
            DomKind::HeapAccesses => "E",
            DomKind::Fields => "F",
            DomKind::Locks => "L",
            DomKind::Types => "T",
        }
    }
}

fn instructions_where<F>(program: &Program, name: &str, keep: F) -> Domain<InstId>
where
    F: Fn(&Instruction) -> bool,
{
    let mut domain = Domain::new(name);
    for (i, inst) in program.instructions() {
        if keep(inst) {
            domain.get_or_add(i);
        }
    }
    domain
}

pub fn methods(program: &Program) -> Domain<MethodId> {
    let mut domain = Domain::new("M");
    if let Some(main) = program.main {
        domain.get_or_add(main);
    }
    for m in program.method_ids() {
        domain.get_or_add(m);
    }
    domain
}

pub fn invokes(program: &Program) -> Domain<InstId> {
    instructions_where(program, "I", Instruction::is_invoke)
}

pub fn allocs(program: &Program) -> Domain<InstId> {
    instructions_where(program, "H", Instruction::is_alloc)
}

pub fn heap_accesses(program: &Program) -> Domain<InstId> {
    instructions_where(program, "E", Instruction::is_heap_access)
}

pub fn locks(program: &Program) -> Domain<InstId> {
    instructions_where(program, "L", Instruction::is_lock)
}

pub fn vars(program: &Program) -> Domain<VarId> {
    let mut domain = Domain::new("V");
    for v in 0..program.variables.len() {
        domain.get_or_add(VarId(v));
    }
    domain
}

pub fn fields(program: &Program) -> Domain<Option<FieldId>> {
    let mut domain = Domain::new("F");
    domain.get_or_add(None);
    for f in 0..program.fields.len() {
        domain.get_or_add(Some(FieldId(f)));
    }
    domain
}

pub fn types(program: &Program) -> Domain<TypeId> {
    let mut domain = Domain::new("T");
    for t in 0..program.types.len() {
        domain.get_or_add(TypeId(t));
    }
    domain
}

/// Computes one domain from the program model and saves it.
///
/// With `verbose` at 2 or more the domain is also described in
/// `<out dir>/<name>.xml`.
pub struct DomTask {
    kind: DomKind,
}

impl DomTask {
    pub fn new(kind: DomKind) -> DomTask {
        DomTask { kind }
    }

    fn publish<T: Element>(project: &mut Project, domain: Domain<T>) -> Result<(), Error> {
        let name = domain.name().to_string();
        info!("Domain {}: {} elements", name, domain.size());
        let program = project.program().clone();
        let out_dir = project.options().out_dir().to_path_buf();
        let verbose = project.options().verbose();

        let store = project.store_mut();
        store.insert_domain(domain);
        store.save_domain(&name)?;
        if verbose >= 2 {
            store.save_domain_xml(&name, &out_dir, &program)?;
        }
        Ok(())
    }
}

impl Task for DomTask {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn consumes(&self) -> Vec<String> {
        Vec::new()
    }

    fn produces(&self) -> Vec<String> {
        vec![self.kind.name().to_string()]
    }

    fn run(&mut self, project: &mut Project) -> Result<(), Error> {
        let program = project.program().clone();
        match self.kind {
            DomKind::Methods => DomTask::publish(project, methods(&program)),
            DomKind::Invokes => DomTask::publish(project, invokes(&program)),
            DomKind::Allocs => DomTask::publish(project, allocs(&program)),
            DomKind::Vars => DomTask::publish(project, vars(&program)),
            DomKind::HeapAccesses => DomTask::publish(project, heap_accesses(&program)),
            DomKind::Fields => DomTask::publish(project, fields(&program)),
            DomKind::Locks => DomTask::publish(project, locks(&program)),
            DomKind::Types => DomTask::publish(project, types(&program)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionsBuilder;
    use crate::program::tests::sample_program;
    use crate::RC;
    use std::fs;

    #[test]
    fn program_domains() {
        let program = sample_program();
        let m = methods(&program);
        assert_eq!(m.size(), 4);
        assert_eq!(m.get(0).unwrap(), &MethodId(0));

        let i = invokes(&program);
        let ids: Vec<InstId> = i.iter().map(|(_, inst)| *inst).collect();
        assert_eq!(ids, vec![InstId(1), InstId(2), InstId(4), InstId(6)]);
        assert_eq!(allocs(&program).size(), 2);
        assert_eq!(heap_accesses(&program).size(), 1);
        assert_eq!(locks(&program).size(), 1);

        let f = fields(&program);
        assert_eq!(f.size(), 3);
        assert_eq!(f.index_of(&None).unwrap(), Some(0));
        assert_eq!(f.index_of(&Some(FieldId(1))).unwrap(), Some(2));
    }

    #[test]
    fn task_saves_domain() {
        let dir = tempfile::tempdir().unwrap();
        let options = OptionsBuilder::new()
            .work_dir(dir.path().join("work"))
            .out_dir(dir.path().join("out"))
            .verbose(2)
            .build();
        let mut project = Project::new(options, RC::new(sample_program()));
        project.register(Box::new(DomTask::new(DomKind::Methods))).unwrap();
        project.run_task("M").unwrap();

        assert_eq!(project.store().domain_size("M").unwrap(), 4);
        let map = fs::read_to_string(dir.path().join("work/M.map")).unwrap();
        assert_eq!(map, "0\n1\n2\n3\n");
        let xml = fs::read_to_string(dir.path().join("out/M.xml")).unwrap();
        assert!(xml.contains("<M id=\"M1\" sign=\"run:()V@T\" file=\"T.java\" line=\"7\"/>"));
    }
}
