//! Build command: run the pipeline against docker

use super::{CommandResult, docker_pipeline, load_context};
use convenient_stages::BuildOutcome;
use std::path::Path;

/// Build the image described by `config`.
pub async fn execute(
    config: &Path,
    revision: Option<String>,
    docker: &str,
    json: bool,
) -> CommandResult {
    let context = load_context(config, revision)?;
    let pipeline = docker_pipeline(docker);

    let outcome = pipeline.run(&context).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_summary(&outcome);
    }
    Ok(())
}

fn print_summary(outcome: &BuildOutcome) {
    println!();
    println!("📊 Build Summary:");
    for output in &outcome.executed {
        println!(
            "  ⚡ {:<14} {} ({:.2}s)",
            output.stage.as_str(),
            output.reference,
            output.duration.as_secs_f64()
        );
    }
    for stage in &outcome.reused {
        println!("  ✓ {:<14} cached", stage.as_str());
    }
    println!();
    println!(
        "  Built:  {}  Reused: {}  Time: {:.2}s",
        outcome.executed.len(),
        outcome.reused.len(),
        outcome.duration.as_secs_f64()
    );
    println!("  Image:  {}", outcome.final_image);
}
