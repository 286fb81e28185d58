//! Stages command: print the stage chain

use super::CommandResult;
use convenient_stages::StageGraph;

/// Print each stage with its parent, in pipeline order.
pub fn execute() -> CommandResult {
    let graph = StageGraph::new();
    for (idx, stage) in graph.ordered_stages().iter().enumerate() {
        match graph.parent_of(*stage) {
            Some(parent) => println!("{:>2}. {:<14} ← {}", idx + 1, stage.as_str(), parent),
            None => println!("{:>2}. {:<14} (base image)", idx + 1, stage.as_str()),
        }
    }
    Ok(())
}
