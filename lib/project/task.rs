use std::fmt;

use crate::project::Project;
use crate::store::RelSign;
use crate::Error;

/// A unit of analysis.
///
/// A task names the artifacts (domains and relations) it consumes and the
/// ones it produces; the scheduler derives the order tasks run in from these
/// names alone. Tasks never call each other directly: a task that needs
/// another one to run asks the `Project`.
pub trait Task {
    fn name(&self) -> &str;

    fn consumes(&self) -> Vec<String>;

    fn produces(&self) -> Vec<String>;

    /// Signatures of the relations this task reads or writes, so the store
    /// knows about them before the task first runs.
    fn signatures(&self) -> Vec<(String, RelSign)> {
        Vec::new()
    }

    fn run(&mut self, project: &mut Project) -> Result<(), Error>;
}

type TaskBody = Box<dyn FnMut(&mut Project) -> Result<(), Error>>;

/// A task whose body is a closure.
pub struct FnTask {
    name: String,
    consumes: Vec<String>,
    produces: Vec<String>,
    signatures: Vec<(String, RelSign)>,
    body: TaskBody,
}

impl FnTask {
    pub fn new<F>(name: &str, consumes: &[&str], produces: &[&str], body: F) -> FnTask
    where
        F: FnMut(&mut Project) -> Result<(), Error> + 'static,
    {
        FnTask {
            name: name.to_string(),
            consumes: consumes.iter().map(|s| s.to_string()).collect(),
            produces: produces.iter().map(|s| s.to_string()).collect(),
            signatures: Vec::new(),
            body: Box::new(body),
        }
    }

    /// Declares the signature of a relation the task touches.
    pub fn relation(mut self, name: &str, sign: &str) -> Result<FnTask, Error> {
        self.signatures.push((name.to_string(), sign.parse()?));
        Ok(self)
    }
}

impl Task for FnTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn consumes(&self) -> Vec<String> {
        self.consumes.clone()
    }

    fn produces(&self) -> Vec<String> {
        self.produces.clone()
    }

    fn signatures(&self) -> Vec<(String, RelSign)> {
        self.signatures.clone()
    }

    fn run(&mut self, project: &mut Project) -> Result<(), Error> {
        (self.body)(project)
    }
}

impl fmt::Debug for FnTask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FnTask")
            .field("name", &self.name)
            .field("consumes", &self.consumes)
            .field("produces", &self.produces)
            .finish()
    }
}
