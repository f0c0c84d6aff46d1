//! Iterative refinement of a client analysis.
//!
//! A client analysis is run over the current abstraction. A feedback task
//! then judges its results, and a refinement task names the sites, methods
//! and variables whose abstraction should become more precise. The contexts
//! task and everything depending on it are reset, and the client runs again.
//! This goes on until nothing is refined or the iteration cap is reached.

use serde::{Deserialize, Serialize};

use crate::project::{Project, Task};
use crate::store::RelSign;
use crate::Error;

/// The refinement relations, in the order sizes are reported.
pub const REFINE_RELATIONS: [(&str, &str); 4] = [
    ("refineH", "H0:H0"),
    ("refineM", "M0:M0"),
    ("refineV", "V0:V0"),
    ("refineI", "I0:I0"),
];

/// How a refinement loop ended.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RefinementOutcome {
    /// Number of times the client analysis ran.
    pub iterations: usize,
    /// `true` if the loop stopped because nothing was refined, `false` if it
    /// gave up at the iteration cap.
    pub converged: bool,
    /// Sizes of `refineH`, `refineM`, `refineV` and `refineI` after each
    /// refinement step.
    pub refinements: Vec<[usize; 4]>,
}

#[derive(Clone, Debug)]
pub struct RefinementDriver {
    name: String,
    base: String,
    feedback: String,
    refinement: String,
    contexts: String,
    max_iters: usize,
}

impl RefinementDriver {
    pub fn new<S: Into<String>>(
        name: S,
        base: S,
        feedback: S,
        refinement: S,
        contexts: S,
        max_iters: usize,
    ) -> RefinementDriver {
        RefinementDriver {
            name: name.into(),
            base: base.into(),
            feedback: feedback.into(),
            refinement: refinement.into(),
            contexts: contexts.into(),
            max_iters,
        }
    }

    /// Refines until every dynamically dispatching call site the client
    /// cannot prove monomorphic has been tried.
    pub fn monosite(max_iters: usize) -> RefinementDriver {
        RefinementDriver::new(
            "monosite",
            "monosite-dlog",
            "monosite-feedback-dlog",
            "refine-hybrid-dlog",
            "ctxts",
            max_iters,
        )
    }

    /// Refines until every downcast the client cannot prove safe has been
    /// tried.
    pub fn downcast(max_iters: usize) -> RefinementDriver {
        RefinementDriver::new(
            "downcast",
            "downcast-dlog",
            "downcast-feedback-dlog",
            "refine-hybrid-dlog",
            "ctxts",
            max_iters,
        )
    }

    pub fn max_iters(&self) -> usize {
        self.max_iters
    }

    fn refinement_sizes(&self, project: &mut Project) -> Result<[usize; 4], Error> {
        let mut sizes = [0; 4];
        let store = project.store_mut();
        for (size, (name, _)) in sizes.iter_mut().zip(REFINE_RELATIONS.iter()) {
            *size = store.load_relation(name)?.size()?;
            store.close_relation(name)?;
        }
        Ok(sizes)
    }

    /// Resets the contexts task and everything downstream of it, so that the
    /// next run of the client recomputes them.
    fn invalidate(&self, project: &mut Project) -> Result<(), Error> {
        let dependents = project.dependents(&self.contexts)?;
        project.reset_task(&self.contexts)?;
        for task in dependents {
            project.reset_task(&task)?;
        }
        Ok(())
    }

    pub fn drive(&self, project: &mut Project) -> Result<RefinementOutcome, Error> {
        let mut outcome = RefinementOutcome::default();
        loop {
            project.run_task(&self.base)?;
            outcome.iterations += 1;
            if outcome.iterations > self.max_iters {
                info!(
                    "{}: giving up after {} iterations",
                    self.name, outcome.iterations
                );
                break;
            }

            project.run_task(&self.feedback)?;
            project.run_task(&self.refinement)?;
            let sizes = self.refinement_sizes(project)?;
            info!(
                "{}: iteration {} refines H={} M={} V={} I={}",
                self.name, outcome.iterations, sizes[0], sizes[1], sizes[2], sizes[3]
            );
            outcome.refinements.push(sizes);
            if sizes.iter().all(|&size| size == 0) {
                outcome.converged = true;
                break;
            }
            self.invalidate(project)?;
        }
        Ok(outcome)
    }
}

impl Task for RefinementDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn consumes(&self) -> Vec<String> {
        Vec::new()
    }

    fn produces(&self) -> Vec<String> {
        Vec::new()
    }

    fn signatures(&self) -> Vec<(String, RelSign)> {
        REFINE_RELATIONS
            .iter()
            .filter_map(|(name, sign)| sign.parse().ok().map(|sign| (name.to_string(), sign)))
            .collect()
    }

    fn run(&mut self, project: &mut Project) -> Result<(), Error> {
        let outcome = self.drive(project)?;
        project.record_outcome(&self.name, outcome);
        Ok(())
    }
}
