//! Follow-up tasks synthesized from successful task output.

use agentx_types::{CycleId, Task};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::FollowUpRule;
use crate::orchestrator::decompose::TaskPlanner;

/// One task per array element at each matching rule's `output_field`.
///
/// Missing fields and non-array values produce nothing. Each follow-up
/// carries the element under `item` and the parent's id as `parent_id`.
pub fn follow_up_tasks(
    planner: &TaskPlanner<'_>,
    rules: &[FollowUpRule],
    cycle_id: &CycleId,
    parent: &Task,
    output: &Value,
) -> Vec<Task> {
    let mut tasks = Vec::new();

    for rule in rules
        .iter()
        .filter(|r| r.on_task_type == parent.task_type.as_str())
    {
        let Some(items) = output.get(&rule.output_field).and_then(Value::as_array) else {
            continue;
        };
        for item in items {
            let payload = json!({
                "item": item,
                "parent_task_type": parent.task_type,
            });
            let task = planner
                .task(cycle_id, &rule.emit_task_type, None, payload)
                .with_parent(parent.id.clone());
            debug!(
                parent_id = %parent.id,
                task_id = %task.id,
                task_type = %task.task_type,
                "Follow-up task"
            );
            tasks.push(task);
        }
    }

    tasks
}
