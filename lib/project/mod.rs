//! Tasks and the project running them.
//!
//! A `Project` is one analysis session: it owns the options, the program
//! model, the store, the registered tasks and the record of which tasks have
//! run. `run_task` runs the producers of everything a task consumes first,
//! and never runs a task twice unless it has been reset.

use rustc_hash::FxHashMap;
use std::fs;
use std::path::Path;

use crate::options::Options;
use crate::program::Program;
use crate::refine::RefinementOutcome;
use crate::store::Store;
use crate::{Error, RC};

mod dlog;
mod registry;
mod scheduler;
mod solver;
mod task;

pub use self::dlog::DlogTask;
pub use self::registry::{Registry, TaskFactory};
pub use self::scheduler::Scheduler;
pub use self::solver::{ProcessSolver, Solver};
pub use self::task::{FnTask, Task};

pub struct Project {
    options: Options,
    program: RC<Program>,
    store: Store,
    scheduler: Scheduler,
    solver: Box<dyn Solver>,
    outcomes: FxHashMap<String, RefinementOutcome>,
}

impl Project {
    /// A project without any tasks.
    pub fn new(options: Options, program: RC<Program>) -> Project {
        let store = Store::new(options.work_dir());
        let solver = Box::new(ProcessSolver::from_options(&options));
        Project {
            options,
            program,
            store,
            scheduler: Scheduler::new(),
            solver,
            outcomes: FxHashMap::default(),
        }
    }

    /// A project with every built-in task, plus a task for each `.datalog`
    /// file found in the configured Datalog directories.
    pub fn with_builtin_tasks(options: Options, program: RC<Program>) -> Result<Project, Error> {
        options.validate()?;
        let mut project = Project::new(options, program);
        for task in Registry::builtin().create_all(&project.options)? {
            project.register(task)?;
        }
        let dirs = project.options.dlog_path().to_vec();
        for dir in dirs {
            project.register_dlog_dir(&dir)?;
        }
        Ok(project)
    }

    /// Registers a task for every `.datalog` file in `dir`.
    pub fn register_dlog_dir(&mut self, dir: &Path) -> Result<(), Error> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "datalog").unwrap_or(false) {
                files.push(path);
            }
        }
        files.sort();
        for file in files {
            let task = DlogTask::from_file(&file)?;
            debug!("Found Datalog task {} in {}", task.name(), file.display());
            self.register(Box::new(task))?;
        }
        Ok(())
    }

    pub fn register(&mut self, task: Box<dyn Task>) -> Result<(), Error> {
        let signatures = task.signatures();
        for (n, (name, sign)) in signatures.iter().enumerate() {
            if let Some((_, other)) = signatures[..n].iter().find(|(earlier, _)| earlier == name) {
                if other.minor_doms() != sign.minor_doms() {
                    return Err(Error::SchemaMismatch {
                        relation: name.clone(),
                        reason: format!(
                            "task {} declares it as both {} and {}",
                            task.name(),
                            other,
                            sign
                        ),
                    });
                }
            }
            if let Ok(existing) = self.store.relation(name) {
                if existing.sign().minor_doms() != sign.minor_doms() {
                    return Err(Error::SchemaMismatch {
                        relation: name.clone(),
                        reason: format!(
                            "task {} declares {} but it is {}",
                            task.name(),
                            sign,
                            existing.sign()
                        ),
                    });
                }
            }
        }
        self.scheduler.register(task)?;
        for (name, sign) in signatures {
            self.store.declare_relation(&name, sign)?;
        }
        Ok(())
    }

    pub fn set_solver(&mut self, solver: Box<dyn Solver>) {
        self.solver = solver;
    }

    /// Runs a task after everything it depends on, unless it already ran in
    /// this session.
    pub fn run_task(&mut self, name: &str) -> Result<(), Error> {
        let index = self.scheduler.index_of(name)?;
        if self.scheduler.is_done(index) {
            debug!("Task {} already done", name);
            return Ok(());
        }

        for artifact in self.scheduler.consumes(index).to_vec() {
            let producer = self.scheduler.producer(&artifact).ok_or_else(|| {
                Error::NotReady(format!("{} (consumed by {}, no producer)", artifact, name))
            })?;
            let producer = self.scheduler.name(producer).to_string();
            self.run_task(&producer)?;
        }

        let mut task = self.scheduler.take(index)?;
        info!("ENTER: {}", name);
        let result = task.run(self);
        self.scheduler.restore(index, task);
        result?;
        self.scheduler.mark_done(index);
        info!("LEAVE: {}", name);
        Ok(())
    }

    /// Marks a task as not run. Tasks depending on it keep their state; use
    /// `dependents` to reset them as well.
    pub fn reset_task(&mut self, name: &str) -> Result<(), Error> {
        let index = self.scheduler.index_of(name)?;
        self.scheduler.reset(index);
        Ok(())
    }

    pub fn is_done(&self, name: &str) -> Result<bool, Error> {
        Ok(self.scheduler.is_done(self.scheduler.index_of(name)?))
    }

    /// Names of the tasks transitively consuming what `name` produces.
    pub fn dependents(&self, name: &str) -> Result<Vec<String>, Error> {
        let index = self.scheduler.index_of(name)?;
        Ok(self
            .scheduler
            .dependents(index)?
            .into_iter()
            .map(|i| self.scheduler.name(i).to_string())
            .collect())
    }

    /// Runs the solver on a Datalog program against the store's work
    /// directory.
    pub fn solve(&self, datalog: &Path) -> Result<(), Error> {
        self.solver.solve(datalog, self.store.work_dir())
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn program(&self) -> &RC<Program> {
        &self.program
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn record_outcome(&mut self, name: &str, outcome: RefinementOutcome) {
        self.outcomes.insert(name.to_string(), outcome);
    }

    /// How the refinement task `name` ended, once it has run.
    pub fn outcome(&self, name: &str) -> Option<&RefinementOutcome> {
        self.outcomes.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn project(dir: &Path) -> Project {
        let options = crate::options::OptionsBuilder::new()
            .work_dir(dir.join("work"))
            .build();
        Project::new(options, RC::new(Program::default()))
    }

    fn counting(
        name: &str,
        consumes: &[&str],
        produces: &[&str],
        log: &Rc<RefCell<Vec<String>>>,
    ) -> Box<dyn Task> {
        let log = log.clone();
        let label = name.to_string();
        Box::new(FnTask::new(name, consumes, produces, move |_| {
            log.borrow_mut().push(label.clone());
            Ok(())
        }))
    }

    #[test]
    fn runs_dependencies_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(dir.path());
        let log = Rc::new(RefCell::new(Vec::new()));
        project.register(counting("b", &["x"], &["y"], &log)).unwrap();
        project.register(counting("c", &["x", "y"], &[], &log)).unwrap();
        project.register(counting("a", &[], &["x"], &log)).unwrap();

        project.run_task("c").unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);

        project.run_task("c").unwrap();
        project.run_task("b").unwrap();
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn reset_reruns_only_that_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(dir.path());
        let log = Rc::new(RefCell::new(Vec::new()));
        project.register(counting("a", &[], &["x"], &log)).unwrap();
        project.register(counting("b", &["x"], &[], &log)).unwrap();
        project.run_task("b").unwrap();

        project.reset_task("a").unwrap();
        project.run_task("b").unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b"]);
        project.run_task("a").unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b", "a"]);
        assert_eq!(project.dependents("a").unwrap(), vec!["b"]);
    }

    #[test]
    fn missing_producer() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(dir.path());
        let log = Rc::new(RefCell::new(Vec::new()));
        project.register(counting("b", &["x"], &[], &log)).unwrap();
        assert!(matches!(project.run_task("b"), Err(Error::NotReady(_))));
        assert!(log.borrow().is_empty());
        assert!(matches!(
            project.run_task("nope"),
            Err(Error::TaskNotFound(_))
        ));
    }

    #[test]
    fn failed_task_is_not_done() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(dir.path());
        let attempts = Rc::new(RefCell::new(0));
        let counter = attempts.clone();
        project
            .register(Box::new(FnTask::new("flaky", &[], &[], move |_| {
                *counter.borrow_mut() += 1;
                Err("boom".into())
            })))
            .unwrap();
        assert!(project.run_task("flaky").is_err());
        assert!(project.run_task("flaky").is_err());
        assert_eq!(*attempts.borrow(), 2);
        assert!(!project.is_done("flaky").unwrap());
    }

    #[test]
    fn task_cannot_run_itself() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(dir.path());
        project
            .register(Box::new(FnTask::new("selfish", &[], &[], |project| {
                project.run_task("selfish")
            })))
            .unwrap();
        assert!(matches!(
            project.run_task("selfish"),
            Err(Error::TaskInProgress(_))
        ));
    }

    #[test]
    fn signatures_must_agree() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(dir.path());
        let a = FnTask::new("a", &[], &["IM"], |_| Ok(()))
            .relation("IM", "I0,M0:I0_M0")
            .unwrap();
        let b = FnTask::new("b", &["IM"], &[], |_| Ok(()))
            .relation("IM", "M0,I0:M0_I0")
            .unwrap();
        project.register(Box::new(a)).unwrap();
        assert!(matches!(
            project.register(Box::new(b)),
            Err(Error::SchemaMismatch { .. })
        ));
        assert!(!project.scheduler().has_task("b"));
    }

    #[test]
    fn task_signatures_must_agree_with_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(dir.path());
        let task = FnTask::new("twice", &[], &["IM"], |_| Ok(()))
            .relation("IM", "I0,M0:I0_M0")
            .unwrap()
            .relation("IM", "M0,I0:M0_I0")
            .unwrap();
        assert!(matches!(
            project.register(Box::new(task)),
            Err(Error::SchemaMismatch { .. })
        ));
        assert!(!project.scheduler().has_task("twice"));
        assert!(!project.store().has_relation("IM"));
    }

    #[test]
    fn dlog_tasks_use_solver() {
        struct Recording(Rc<RefCell<Vec<String>>>);
        impl Solver for Recording {
            fn solve(&self, datalog: &Path, _work_dir: &Path) -> Result<(), Error> {
                self.0.borrow_mut().push(datalog.display().to_string());
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let dlog_dir = dir.path().join("dlog");
        fs::create_dir_all(&dlog_dir).unwrap();
        fs::write(
            dlog_dir.join("pa.datalog"),
            "# name=pa-dlog\nVH(v:V0,h:H0) output\n",
        )
        .unwrap();
        fs::write(dlog_dir.join("notes.txt"), "not a task").unwrap();

        let mut project = project(dir.path());
        let calls = Rc::new(RefCell::new(Vec::new()));
        project.set_solver(Box::new(Recording(calls.clone())));
        project.register_dlog_dir(&dlog_dir).unwrap();
        project
            .register(Box::new(FnTask::new("doms", &[], &["V", "H"], |_| Ok(()))))
            .unwrap();

        project.run_task("pa-dlog").unwrap();
        assert_eq!(calls.borrow().len(), 1);
        assert!(calls.borrow()[0].ends_with("pa.datalog"));
        assert!(project.store().has_relation("VH"));
    }
}
