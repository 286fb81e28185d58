//! Plan command: predicate scan without building

use super::{CommandResult, docker_pipeline, load_context};
use convenient_stages::BuildPlan;
use std::path::Path;

/// Print the state of every stage and the stages a build would run.
pub async fn execute(
    config: &Path,
    revision: Option<String>,
    docker: &str,
    json: bool,
) -> CommandResult {
    let context = load_context(config, revision)?;
    let pipeline = docker_pipeline(docker);

    let plan = pipeline.plan(&context).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

fn print_plan(plan: &BuildPlan) {
    println!();
    for (stage, state) in &plan.stages {
        let mark = if state.is_dirty() { "✗" } else { "✓" };
        println!("  {} {:<14} {}", mark, stage.as_str(), state);
    }
    println!();

    if plan.is_noop() {
        println!("Nothing to build: every stage is cached");
    } else {
        let names: Vec<&str> = plan.to_run.iter().map(|s| s.as_str()).collect();
        println!("Would rebuild {} stage(s): {}", names.len(), names.join(" → "));
    }
}
