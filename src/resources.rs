//! Static view of the declared resource graph.
//!
//! Evaluates the declaration the same way `synth` does and prints what it
//! would deploy, with the explicit ordering edges. Useful for eyeballing
//! the graph without reading template JSON.

use anyhow::Result;

use crate::config::Config;
use crate::stack;

pub fn list_resources(config: &Config) -> Result<()> {
    let template = stack::synthesize(config)?;

    println!("{:<28} {:<32} DEPENDS ON", "LOGICAL ID", "TYPE");
    for (logical_id, resource) in &template.resources {
        let depends_on = if resource.depends_on.is_empty() {
            "-".to_string()
        } else {
            resource.depends_on.join(", ")
        };
        println!(
            "{:<28} {:<32} {}",
            logical_id, resource.resource_type, depends_on
        );
    }

    println!();
    let outputs: Vec<&str> = template.outputs.keys().map(String::as_str).collect();
    println!("outputs: {}", outputs.join(", "));

    Ok(())
}
