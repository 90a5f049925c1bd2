//! Render the stack declaration to a CloudFormation template.
//!
//! Pure evaluation: no credentials, no network, no engine. What `deploy`
//! submits is exactly this JSON, so the output is also the thing to diff
//! in review or feed to external tooling.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::stack;

/// Synthesize the template.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub fn run_synth(config: &Config, output: Option<&Path>) -> Result<()> {
    let template = stack::synthesize(config)?;
    let resource_count = template.resources.len();
    let output_count = template.outputs.len();
    let json = template.to_json()?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Synthesized {} resources, {} outputs to {}",
                resource_count,
                output_count,
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}
