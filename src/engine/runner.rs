mod diagnostics;
#[cfg(feature = "server")]
mod http;
#[cfg(feature = "live")]
mod watch;

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::{Composition, ExecutionPlan};
use crate::error::{BuildError, TaskFailure};
use crate::output::save_outputs;
use crate::{Pipeline, TaskContext};

#[cfg(feature = "live")]
pub(crate) use watch::watch;

pub use diagnostics::Diagnostics;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

struct Completion<'p> {
    name: &'p str,
    start: Instant,
    duration: Duration,
    result: Result<(), TaskFailure>,
}

/// Executes the plan phase by phase.
///
/// Every task of a phase is spawned on the rayon pool and the phase is
/// complete once the scope joined all of them. When any of them failed the
/// remaining phases are not started and the first failure observed is
/// returned; siblings that were already running are still allowed to finish.
pub(crate) fn run(pipeline: &Pipeline, plan: &ExecutionPlan) -> Result<Diagnostics, BuildError> {
    let mut diagnostics = Diagnostics::default();

    let total_tasks = plan.len() as u64;
    if total_tasks == 0 {
        return Ok(diagnostics);
    }

    let root_span = tracing::span!(Level::INFO, "building_tasks");
    root_span.pb_set_length(total_tasks);
    root_span.pb_set_style(&crate::utils::STYLE_BUILD);
    root_span.pb_set_message("Building tasks...");
    let _enter = root_span.enter();

    for (index, phase) in plan.phases().iter().enumerate() {
        let completions = Mutex::new(Vec::with_capacity(phase.tasks().len()));

        // nothing in the scope body may block: on a one-thread pool the
        // spawned tasks only run once the body returned
        rayon::scope(|s| {
            for name in phase.tasks() {
                let completions = &completions;
                let root_span = &root_span;

                s.spawn(move |_| {
                    let start = Instant::now();
                    let result = execute(pipeline, name);
                    let duration = start.elapsed();

                    root_span.pb_inc(1);
                    completions
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(Completion {
                            name,
                            start,
                            duration,
                            result,
                        });
                });
            }
        });

        let mut failures = Vec::new();
        let completions = completions
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);

        for completion in completions {
            match completion.result {
                Ok(()) => {
                    tracing::debug!(
                        task = completion.name,
                        "finished in {:.2?}",
                        completion.duration
                    );
                    diagnostics.execution_times.insert(
                        completion.name.to_owned(),
                        TaskExecution {
                            start: completion.start,
                            duration: completion.duration,
                        },
                    );
                }
                Err(failure) => {
                    tracing::warn!(task = completion.name, "task failed");
                    failures.push((completion.name, failure));
                }
            }
        }

        if let Some((task, failure)) = failures.into_iter().next() {
            return Err(BuildError::Task {
                task: task.to_owned(),
                phase: index + 1,
                failure,
            });
        }
    }

    tracing::info!("Build complete!");
    Ok(diagnostics)
}

/// Runs a single leaf and persists its outputs. Panics are caught and
/// reported as failures so that one broken stage never takes the host
/// process down.
fn execute(pipeline: &Pipeline, name: &str) -> Result<(), TaskFailure> {
    let Some(Composition::Leaf(action)) = pipeline.registry.get(name).map(|t| &t.composition)
    else {
        // plans only ever contain leaves
        return Ok(());
    };

    let span = tracing::span!(Level::INFO, "task", name);
    span.pb_set_style(&crate::utils::STYLE_TASK);
    span.pb_set_message(&format!("Running {name}"));
    let _enter = span.enter();

    let context = TaskContext {
        env: &pipeline.env,
        cache: &pipeline.cache,
        name,
    };

    match catch_unwind(AssertUnwindSafe(|| action(&context))) {
        Ok(Ok(outputs)) => {
            save_outputs(&outputs).map_err(|e| TaskFailure::Stream(e.into()))?;
            Ok(())
        }
        Ok(Err(error)) => Err(TaskFailure::classify(error)),
        Err(panic) => Err(TaskFailure::Panic(panic_message(panic))),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown payload")
    }
}
