use std::path::Path;

use anyhow::Result;
use tablevault_engine::planner::PlanDecision;
use tablevault_engine::{plan_archive, CancellationToken};

use super::{close_context, load_config, open_context};

/// Execute the `plan` command: show each registry object's window and row count.
pub async fn execute(config_path: &Path) -> Result<()> {
    // 1. Parse and validate archive YAML
    let config = load_config(config_path)?;

    // 2. Plan without dumping, deleting or checkpointing
    let context = open_context(&config, CancellationToken::new()).await?;
    let result = plan_archive(&config, &context, None).await;
    close_context(context).await;
    let plan = result?;

    println!(
        "Archive '{}' plan (mode {}, tag {}):\n",
        config.archive, plan.run.mode, plan.run.tag
    );

    let mut objects = Vec::with_capacity(plan.objects.len());
    for object in &plan.objects {
        let table = object.entry.table_name.as_str();
        let json = match &object.decision {
            Ok(PlanDecision::Archive(p)) => {
                let window = p
                    .window
                    .map_or_else(|| "whole table".to_string(), |w| w.to_string());
                println!(
                    "  {table:<24} archive  {} row(s), {} mode, {window}",
                    p.matched_rows, p.mode
                );
                serde_json::json!({
                    "table": table,
                    "action": "archive",
                    "mode": p.mode.to_string(),
                    "window": p.window.map(|w| w.to_string()),
                    "rows": p.matched_rows,
                })
            }
            Ok(PlanDecision::Skip(skip)) => {
                println!("  {table:<24} skip     {}", skip.reason);
                serde_json::json!({
                    "table": table,
                    "action": "skip",
                    "reason": skip.reason.as_str(),
                    "window": skip.window.map(|w| w.to_string()),
                })
            }
            Err(err) => {
                println!("  {table:<24} error    {err}");
                serde_json::json!({
                    "table": table,
                    "action": "error",
                    "error": err.to_string(),
                })
            }
        };
        objects.push(json);
    }
    for rejected in &plan.rejected {
        println!("  Rejected: {rejected}");
    }

    let json = serde_json::json!({
        "archive": config.archive,
        "mode": plan.run.mode.to_string(),
        "tag": plan.run.tag,
        "objects": objects,
        "rejected": plan.rejected.iter().map(ToString::to_string).collect::<Vec<_>>(),
    });
    println!("@@PLAN_JSON@@{json}");

    Ok(())
}
