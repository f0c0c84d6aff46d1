use std::collections::BTreeMap;

use crate::alias::ContextsTask;
use crate::doms::{DomKind, DomTask};
use crate::dynamic::ThreadEscapeTask;
use crate::options::Options;
use crate::program::MethodRemap;
use crate::project::Task;
use crate::refine::RefinementDriver;
use crate::rels::{RelKind, RelTask};
use crate::Error;

pub type TaskFactory = fn(&Options) -> Result<Box<dyn Task>, Error>;

/// Maps task names to the functions creating them.
#[derive(Clone, Default)]
pub struct Registry {
    factories: BTreeMap<String, TaskFactory>,
}

macro_rules! factory {
    ($name:ident, $task:expr) => {
        fn $name(_: &Options) -> Result<Box<dyn Task>, Error> {
            Ok(Box::new($task))
        }
    };
}

factory!(methods, DomTask::new(DomKind::Methods));
factory!(invokes, DomTask::new(DomKind::Invokes));
factory!(allocs, DomTask::new(DomKind::Allocs));
factory!(vars, DomTask::new(DomKind::Vars));
factory!(heap_accesses, DomTask::new(DomKind::HeapAccesses));
factory!(fields, DomTask::new(DomKind::Fields));
factory!(locks, DomTask::new(DomKind::Locks));
factory!(types, DomTask::new(DomKind::Types));
factory!(method_invokes, RelTask::new(RelKind::MethodInvokes));
factory!(method_allocs, RelTask::new(RelKind::MethodAllocs));
factory!(method_vars, RelTask::new(RelKind::MethodVars));
factory!(method_this, RelTask::new(RelKind::MethodThis));
factory!(invoke_receiver, RelTask::new(RelKind::InvokeReceiver));
factory!(accessed_field, RelTask::new(RelKind::AccessedField));
factory!(cast_target, RelTask::new(RelKind::CastTarget));
factory!(ctxts, ContextsTask::new());

fn invoke_targets(options: &Options) -> Result<Box<dyn Task>, Error> {
    let remap = match options.method_remap_file() {
        Some(path) => MethodRemap::from_file(path)?,
        None => MethodRemap::new(),
    };
    Ok(Box::new(RelTask::new(RelKind::InvokeTargets).with_remap(remap)))
}

fn monosite(options: &Options) -> Result<Box<dyn Task>, Error> {
    Ok(Box::new(RefinementDriver::monosite(options.max_iters())))
}

fn downcast(options: &Options) -> Result<Box<dyn Task>, Error> {
    Ok(Box::new(RefinementDriver::downcast(options.max_iters())))
}

fn thread_escape(options: &Options) -> Result<Box<dyn Task>, Error> {
    Ok(Box::new(ThreadEscapeTask::from_options(options)))
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Every task kestrel itself implements.
    pub fn builtin() -> Registry {
        let mut registry = Registry::new();
        let factories: [(&str, TaskFactory); 20] = [
            ("M", methods),
            ("I", invokes),
            ("H", allocs),
            ("V", vars),
            ("E", heap_accesses),
            ("F", fields),
            ("L", locks),
            ("T", types),
            ("MI", method_invokes),
            ("MH", method_allocs),
            ("MV", method_vars),
            ("thisMV", method_this),
            ("IM", invoke_targets),
            ("IinvkArg0", invoke_receiver),
            ("EF", accessed_field),
            ("checkCastVT", cast_target),
            ("ctxts", ctxts),
            ("monosite", monosite),
            ("downcast", downcast),
            ("dynamic-thread-escape", thread_escape),
        ];
        for (name, factory) in factories {
            registry.factories.insert(name.to_string(), factory);
        }
        registry
    }

    pub fn add(&mut self, name: &str, factory: TaskFactory) -> Result<(), Error> {
        if self.factories.contains_key(name) {
            return Err(Error::DuplicateTask(name.to_string()));
        }
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(|name| name.as_str()).collect()
    }

    pub fn create(&self, name: &str, options: &Options) -> Result<Box<dyn Task>, Error> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::TaskNotFound(name.to_string()))?;
        factory(options)
    }

    pub fn create_all(&self, options: &Options) -> Result<Vec<Box<dyn Task>>, Error> {
        self.factories
            .values()
            .map(|factory| factory(options))
            .collect()
    }
}
