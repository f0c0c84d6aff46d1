//! End-to-end runs over the sample program with the built-in tasks.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::alias::{CallGraph, CiCallGraph, ContextPolicy, Ctxt, NoReceivers};
use crate::options::{CtxtKind, OptionsBuilder};
use crate::program::tests::sample_program;
use crate::program::{InstId, MethodId};
use crate::project::{FnTask, Project};
use crate::store::Store;
use crate::trace::{InstrScheme, Tracer};
use crate::RC;

fn builtin(dir: &Path, options: OptionsBuilder) -> Project {
    let options = options.work_dir(dir.join("work")).build();
    let mut project = Project::with_builtin_tasks(options, RC::new(sample_program())).unwrap();
    // Stands in for the points-to analysis: `this` of m1 points to i0.
    let pa = FnTask::new("pa", &["V", "H"], &["VH"], |project| {
        let store = project.store_mut();
        store.zero_relation("VH")?.add(&[1, 0])?;
        store.save_relation("VH")?;
        store.close_relation("VH")
    })
    .relation("VH", "V0,H0:V0_H0")
    .unwrap();
    project.register(Box::new(pa)).unwrap();
    project
}

fn ctxt(sites: &[usize]) -> Ctxt {
    Ctxt::new(sites.iter().map(|&s| InstId(s)).collect())
}

#[test]
fn contexts_survive_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let options = OptionsBuilder::new()
        .inst_ctxt_kind(CtxtKind::Object)
        .stat_ctxt_kind(CtxtKind::CallSite);
    let mut project = builtin(dir.path(), options);
    project.run_task("ctxts").unwrap();
    for name in &["M", "I", "H", "V", "IM", "pa", "ctxts"] {
        assert!(project.is_done(name).unwrap(), "{} did not run", name);
    }
    assert!(!project.is_done("F").unwrap());

    // A later session reads back what this one saved.
    let mut store = Store::new(dir.path().join("work"));
    let contexts = store.load_domain::<Ctxt>("C").unwrap();
    assert_eq!(contexts.size(), 5);
    assert_eq!(contexts.index_of(&ctxt(&[0])).unwrap(), Some(3));
    store
        .declare_relation("CI", "C0,I0:C0_I0".parse().unwrap())
        .unwrap();
    assert_eq!(store.load_relation("CI").unwrap().size().unwrap(), 2);
}

#[test]
fn refinement_rebuilds_downstream() {
    let dir = tempfile::tempdir().unwrap();
    let mut project = builtin(dir.path(), OptionsBuilder::new());
    project.run_task("ctxts").unwrap();
    let dependents = project.dependents("M").unwrap();
    assert!(dependents.iter().any(|task| task == "ctxts"));

    project.reset_task("ctxts").unwrap();
    assert!(!project.is_done("ctxts").unwrap());
    assert!(project.is_done("pa").unwrap());
    project.run_task("ctxts").unwrap();
    assert_eq!(project.store().domain_size("C").unwrap(), 3);
}

#[test]
fn call_graph_from_relations() {
    let dir = tempfile::tempdir().unwrap();
    let mut project = builtin(dir.path(), OptionsBuilder::new());
    project.run_task("MI").unwrap();
    project.run_task("IM").unwrap();
    let program = project.program().clone();
    let store = project.store_mut();
    store.load_relation("MI").unwrap();
    store.load_relation("IM").unwrap();
    let ci = CiCallGraph::from_store(&program, store).unwrap();

    let graph = CallGraph::build(&ci, ContextPolicy::CallSite { k: 1 }, &NoReceivers);
    let helper: Vec<Ctxt> = graph.contexts(MethodId(2)).into_iter().collect();
    assert_eq!(helper, vec![ctxt(&[2]), ctxt(&[4])]);
    let clinit: Vec<Ctxt> = graph.contexts(MethodId(3)).into_iter().collect();
    assert_eq!(clinit, vec![Ctxt::epsilon()]);
    assert!(graph.calls(&ctxt(&[1]), InstId(4), &ctxt(&[4]), MethodId(2)));
}

#[test]
fn traced_run_escapes() {
    let dir = tempfile::tempdir().unwrap();
    let trace = dir.path().join("trace.bin");
    let tracer = Tracer::init(&trace, 64, InstrScheme::all()).unwrap();
    let t = Arc::new(String::from("t"));
    let u = Arc::new(String::from("u"));
    // H is [i0, i5] and E is [i3].
    tracer.new_object(0, &t).unwrap();
    tracer.new_object(1, &u).unwrap();
    tracer
        .field_write(0, tracer.id(&t).unwrap(), 0, tracer.id(&u).unwrap())
        .unwrap();
    tracer.thread_start(tracer.id(&t).unwrap()).unwrap();
    tracer.field_read(0, tracer.id(&u).unwrap(), 0).unwrap();
    tracer.done().unwrap();

    let options = OptionsBuilder::new().trace_file(&trace).trace_block_size(64);
    let mut project = builtin(dir.path(), options);
    project.run_task("dynamic-thread-escape").unwrap();
    let store = project.store_mut();
    let visited: BTreeSet<usize> = store
        .load_relation("visitedE")
        .unwrap()
        .iter_ary1(0)
        .unwrap()
        .collect();
    assert_eq!(visited, vec![0].into_iter().collect());
    assert_eq!(store.load_relation("escE").unwrap().size().unwrap(), 1);
}
