// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! A linear sequence of steps sharing one context, with compensation on failure.

use log::{debug, warn};

use crate::error::Result;

/// One step of a [`Pipeline`]. Steps read what earlier steps left in the context and record
/// what they did there, so that `rollback` can undo exactly that.
pub trait Step<C>: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(&self, ctx: &mut C) -> Result<()>;

    /// Undo the effect of a successful `execute` after a later step failed. Most steps have
    /// nothing to undo.
    fn rollback(&self, _ctx: &mut C) -> Result<()> {
        Ok(())
    }
}

pub struct Pipeline<C> {
    name: &'static str,
    steps: Vec<Box<dyn Step<C>>>,
}

impl<C> Pipeline<C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl Step<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order. When a step fails, the steps that already completed are rolled
    /// back in reverse order and the step's error is returned. A failing rollback is logged and
    /// the remaining rollbacks still run.
    pub fn run(&self, ctx: &mut C) -> Result<()> {
        for (i, step) in self.steps.iter().enumerate() {
            debug!("{}: {}", self.name, step.name());
            if let Err(e) = step.execute(ctx) {
                warn!("{}: step {} failed: {e}", self.name, step.name());
                for done in self.steps[..i].iter().rev() {
                    if let Err(rollback_err) = done.rollback(ctx) {
                        warn!(
                            "{}: rollback of {} failed: {rollback_err}",
                            self.name,
                            done.name()
                        );
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[derive(Default)]
    struct Trace {
        events: Vec<String>,
    }

    struct Record {
        name: &'static str,
        fail: bool,
        fail_rollback: bool,
    }

    impl Step<Trace> for Record {
        fn name(&self) -> &'static str {
            self.name
        }

        fn execute(&self, ctx: &mut Trace) -> Result<()> {
            if self.fail {
                return Err(Error::validation(self.name));
            }
            ctx.events.push(format!("+{}", self.name));
            Ok(())
        }

        fn rollback(&self, ctx: &mut Trace) -> Result<()> {
            ctx.events.push(format!("-{}", self.name));
            if self.fail_rollback {
                return Err(Error::validation("rollback"));
            }
            Ok(())
        }
    }

    fn step(name: &'static str, fail: bool, fail_rollback: bool) -> Record {
        Record {
            name,
            fail,
            fail_rollback,
        }
    }

    #[test]
    fn all_succeed() {
        let pipeline = Pipeline::new("test")
            .step(step("a", false, false))
            .step(step("b", false, false));
        let mut trace = Trace::default();
        pipeline.run(&mut trace).unwrap();
        assert_eq!(trace.events, vec!["+a", "+b"]);
        assert_eq!(pipeline.step_names(), vec!["a", "b"]);
    }

    #[test]
    fn failure_rolls_back_in_reverse() {
        let pipeline = Pipeline::new("test")
            .step(step("a", false, false))
            .step(step("b", false, true))
            .step(step("c", true, false))
            .step(step("d", false, false));
        let mut trace = Trace::default();
        let err = pipeline.run(&mut trace).unwrap_err();
        assert_eq!(err.to_string(), "invalid input: c");
        // The failed step itself is not rolled back, and a failing rollback does not stop the
        // others.
        assert_eq!(trace.events, vec!["+a", "+b", "-b", "-a"]);
    }
}
