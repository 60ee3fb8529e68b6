use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

use crate::engine::{ExecutionPlan, TaskExecution};

/// Timings collected while a plan ran.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    /// Execution metrics by task name. Only tasks that finished are listed.
    pub execution_times: HashMap<String, TaskExecution>,
}

impl Diagnostics {
    /// Number of tasks that ran to completion.
    pub fn completed(&self) -> usize {
        self.execution_times.len()
    }

    /// Sum of the durations of every task.
    pub fn busy(&self) -> Duration {
        self.execution_times.values().map(|t| t.duration).sum()
    }

    /// Renders the plan as a Mermaid diagram, one subgraph per phase, with
    /// every task coloured by its duration.
    ///
    /// * **Green**: Fast
    /// * **Yellow**: Moderate
    /// * **Red**: Slow
    /// * **Blue**: Did not run
    pub fn render_mermaid(&self, plan: &ExecutionPlan) -> String {
        let mut f = String::new();
        let _ = writeln!(f, "graph LR");

        let times = &self.execution_times;
        let (min_time, max_time) = times
            .values()
            .map(|t| t.duration.as_secs_f64())
            .fold(None, |acc: Option<(f64, f64)>, secs| match acc {
                None => Some((secs, secs)),
                Some((lo, hi)) => Some((lo.min(secs), hi.max(secs))),
            })
            .unwrap_or((0.0, 0.0));

        // all tasks took the same time
        let span = if (max_time - min_time).abs() < f64::EPSILON {
            1.0
        } else {
            max_time - min_time
        };

        let mut node = 0usize;
        for (index, phase) in plan.phases().iter().enumerate() {
            let _ = writeln!(f, "    subgraph phase{index}[\"phase {}\"]", index + 1);

            for task in phase.tasks() {
                let name = task.replace('"', "\\\"");

                let (label_extra, color_code) = match times.get(task) {
                    Some(exec) => {
                        let t = (exec.duration.as_secs_f64() - min_time) / span;
                        (format!("{:.2?}", exec.duration), heat(t))
                    }
                    None => ("skipped".to_string(), "#ADD8E6".to_string()),
                };

                let _ = writeln!(f, "        t{node}[\"{name}\\n{label_extra}\"]");
                let _ = writeln!(f, "        style t{node} fill:{color_code}");
                node += 1;
            }

            let _ = writeln!(f, "    end");
        }

        for index in 1..plan.phases().len() {
            let _ = writeln!(f, "    phase{} --> phase{index}", index - 1);
        }

        f
    }
}

/// 0.0 (green) through 0.5 (yellow) to 1.0 (red).
fn heat(t: f64) -> String {
    let (r, g, b) = if t < 0.5 {
        ((255.0 * t * 2.0) as u8, 255, 0)
    } else {
        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8, 0)
    };

    format!("#{r:02X}{g:02X}{b:02X}")
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::engine::plan::ExecutionPlan;

    #[test]
    fn test_heat_scale() {
        assert_eq!(heat(0.0), "#00FF00");
        assert_eq!(heat(0.5), "#FFFF00");
        assert_eq!(heat(1.0), "#FF0000");
    }

    #[test]
    fn test_render_mermaid() {
        let plan = ExecutionPlan::from_raw(vec![
            vec!["sprites".into(), "images".into()],
            vec!["styles".into()],
        ]);

        let mut diagnostics = Diagnostics::default();
        diagnostics.execution_times.insert(
            "sprites".into(),
            TaskExecution {
                start: Instant::now(),
                duration: Duration::from_millis(5),
            },
        );

        let mermaid = diagnostics.render_mermaid(&plan);
        assert!(mermaid.starts_with("graph LR\n"));
        assert!(mermaid.contains("subgraph phase0[\"phase 1\"]"));
        assert!(mermaid.contains("t1[\"images\\nskipped\"]"));
        assert!(mermaid.contains("style t1 fill:#ADD8E6"));
        assert!(mermaid.contains("phase0 --> phase1"));
        assert_eq!(diagnostics.completed(), 1);
    }
}
