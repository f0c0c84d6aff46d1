use std::fs;
use std::path::Path;
use std::process::Command;

use crate::options::Options;
use crate::Error;

/// Evaluates a Datalog program over the relations in a work directory.
///
/// The solver reads the input relations of the program from `work_dir` and
/// writes its output relations back there before returning.
pub trait Solver {
    fn solve(&self, datalog: &Path, work_dir: &Path) -> Result<(), Error>;
}

/// Runs an external solver program and waits for it.
///
/// The solver is invoked as `program args... <datalog file>` with the
/// environment variables `BASEDIR` (the work directory), `SOLVER_MAX_HEAP`
/// and `SOLVER_VERBOSE` set.
#[derive(Clone, Debug)]
pub struct ProcessSolver {
    program: String,
    args: Vec<String>,
    max_heap: String,
    verbose: u32,
}

impl ProcessSolver {
    pub fn new<S: Into<String>>(program: S, args: Vec<String>) -> ProcessSolver {
        ProcessSolver {
            program: program.into(),
            args,
            max_heap: "1024m".to_string(),
            verbose: 1,
        }
    }

    pub fn from_options(options: &Options) -> ProcessSolver {
        ProcessSolver {
            program: options.solver_program().to_string(),
            args: options.solver_args().to_vec(),
            max_heap: options.solver_max_heap().to_string(),
            verbose: options.verbose(),
        }
    }
}

impl Solver for ProcessSolver {
    fn solve(&self, datalog: &Path, work_dir: &Path) -> Result<(), Error> {
        fs::create_dir_all(work_dir)?;
        debug!(
            "Running solver: {} {} {}",
            self.program,
            self.args.join(" "),
            datalog.display()
        );
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(datalog)
            .env("BASEDIR", work_dir)
            .env("SOLVER_MAX_HEAP", &self.max_heap)
            .env("SOLVER_VERBOSE", self.verbose.to_string())
            .output()?;

        if !output.stdout.is_empty() {
            trace!("{}", String::from_utf8_lossy(&output.stdout));
        }
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::SolverFailure {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}
