//! Read back the deployed stack's outputs.
//!
//! The table form is for humans; `--json` emits a flat key/value object
//! for scripts (e.g. piping the bucket name into an upload step).

use anyhow::{bail, Result};
use serde_json::json;

use crate::cloudformation::{CloudFormationClient, StackEngine};
use crate::config::Config;

pub async fn run_outputs(config: &Config, as_json: bool) -> Result<()> {
    let engine = CloudFormationClient::from_env(&config.stack.region)?;
    print_outputs(&engine, &config.stack.name, as_json).await
}

pub async fn print_outputs(engine: &dyn StackEngine, name: &str, as_json: bool) -> Result<()> {
    let description = match engine.describe_stack(name).await? {
        Some(description) => description,
        None => bail!("stack {} is not deployed", name),
    };

    if as_json {
        let mut object = serde_json::Map::new();
        for output in &description.outputs {
            object.insert(output.key.clone(), json!(output.value));
        }
        println!("{}", serde_json::to_string_pretty(&json!(object))?);
        return Ok(());
    }

    println!("stack: {} ({})", description.name, description.status);
    println!("id:    {}", description.stack_id);
    if description.outputs.is_empty() {
        println!("  no outputs reported yet");
        return Ok(());
    }
    println!("{:<20} VALUE", "OUTPUT");
    for output in &description.outputs {
        println!("{:<20} {}", output.key, output.value);
    }
    Ok(())
}
