//! Stack teardown driver.
//!
//! Deletion is engine-owned and runs in reverse dependency order; this
//! driver submits it, waits until the stack is gone, and reminds the
//! operator about anything the stack deliberately leaves behind.

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::time::Duration;

use crate::cloudformation::{CloudFormationClient, StackEngine};
use crate::config::Config;
use crate::deploy::wait_until_settled;
use crate::progress::{DeployProgressReporter, ProgressMode};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub async fn run_destroy(config: &Config, wait: bool, progress_mode: ProgressMode) -> Result<()> {
    let engine = CloudFormationClient::from_env(&config.stack.region)?;
    let reporter = progress_mode.reporter();
    destroy_stack(&engine, config, wait, reporter.as_ref(), POLL_INTERVAL).await
}

pub async fn destroy_stack(
    engine: &dyn StackEngine,
    config: &Config,
    wait: bool,
    progress: &dyn DeployProgressReporter,
    poll_interval: Duration,
) -> Result<()> {
    let name = &config.stack.name;

    if engine.describe_stack(name).await?.is_none() {
        println!("destroy {}", name);
        println!("  nothing to do: stack is not deployed");
        println!("ok");
        return Ok(());
    }

    let mut seen: HashSet<String> = HashSet::new();
    for event in engine.stack_events(name).await? {
        seen.insert(event.event_id);
    }

    engine.delete_stack(name).await?;

    if !wait {
        println!("destroy {}", name);
        println!("  submitted, not waiting");
        println!("ok");
        return Ok(());
    }

    let outcome = wait_until_settled(engine, name, progress, poll_interval, &mut seen).await?;
    match outcome.description {
        // Gone entirely, or still describable as deleted: both are success.
        None => {}
        Some(description) if description.status == "DELETE_COMPLETE" => {}
        Some(description) => {
            let mut detail = format!("stack {} ended in {}", name, description.status);
            if let Some(reason) = &description.status_reason {
                detail.push_str(&format!(" ({})", reason));
            }
            if let Some(event) = &outcome.first_failure {
                detail.push_str(&format!(
                    "; first failure: {} {}",
                    event.logical_id,
                    event.reason.clone().unwrap_or_else(|| event.status.clone())
                ));
            }
            bail!("destroy failed: {}", detail);
        }
    }

    println!("destroy {}", name);
    if config.bucket.retain_on_delete {
        println!("  note: the documents bucket is retained and must be removed manually");
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudformation::testing::{description, event, ScriptedEngine};
    use crate::progress::NoProgress;

    const TICK: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn absent_stack_is_a_no_op() {
        let engine = ScriptedEngine::describing(vec![None]);
        let config = Config::minimal();

        destroy_stack(&engine, &config, true, &NoProgress, TICK)
            .await
            .unwrap();

        assert!(engine.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn deletes_and_waits_until_gone() {
        let engine = ScriptedEngine::describing(vec![
            Some(description("bedrock-kb-with-s3-source", "CREATE_COMPLETE")),
            Some(description("bedrock-kb-with-s3-source", "DELETE_IN_PROGRESS")),
            None,
        ]);
        let config = Config::minimal();

        destroy_stack(&engine, &config, true, &NoProgress, TICK)
            .await
            .unwrap();

        assert_eq!(
            *engine.deleted.lock().unwrap(),
            vec!["bedrock-kb-with-s3-source".to_string()]
        );
    }

    #[tokio::test]
    async fn delete_failure_is_an_error() {
        let engine = ScriptedEngine::describing(vec![
            Some(description("bedrock-kb-with-s3-source", "CREATE_COMPLETE")),
            Some(description("bedrock-kb-with-s3-source", "DELETE_IN_PROGRESS")),
            Some(description("bedrock-kb-with-s3-source", "DELETE_FAILED")),
        ]);
        engine.event_batches.lock().unwrap().push_back(Vec::new());
        engine.event_batches.lock().unwrap().push_back(vec![event(
            "e1",
            "KnowledgeBaseRole",
            "DELETE_FAILED",
            Some("Role is in use"),
        )]);
        let config = Config::minimal();

        let err = destroy_stack(&engine, &config, true, &NoProgress, TICK)
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("DELETE_FAILED"), "unexpected: {}", err);
        assert!(err.contains("Role is in use"), "unexpected: {}", err);
    }

    #[tokio::test]
    async fn no_wait_returns_after_submission() {
        let engine = ScriptedEngine::describing(vec![Some(description(
            "bedrock-kb-with-s3-source",
            "CREATE_COMPLETE",
        ))]);
        let config = Config::minimal();

        destroy_stack(&engine, &config, false, &NoProgress, TICK)
            .await
            .unwrap();

        assert_eq!(engine.deleted.lock().unwrap().len(), 1);
    }
}
