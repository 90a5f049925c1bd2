//! Create-or-update deployment driver.
//!
//! Evaluates the declaration, submits it to the engine, and by default
//! waits until the engine settles, streaming resource events to the
//! progress reporter. The engine owns ordering, rollback, and idempotency;
//! this driver's job is to pick create vs update, surface what happened,
//! and translate a rolled-back operation into a failing exit.

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::time::Duration;

use crate::cloudformation::{
    CloudFormationClient, StackDescription, StackEngine, StackEvent, UpdateOutcome,
};
use crate::config::Config;
use crate::progress::{DeployEvent, DeployProgressReporter, ProgressMode};
use crate::stack;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub async fn run_deploy(config: &Config, wait: bool, progress_mode: ProgressMode) -> Result<()> {
    let engine = CloudFormationClient::from_env(&config.stack.region)?;
    let reporter = progress_mode.reporter();
    deploy_stack(&engine, config, wait, reporter.as_ref(), POLL_INTERVAL).await
}

pub async fn deploy_stack(
    engine: &dyn StackEngine,
    config: &Config,
    wait: bool,
    progress: &dyn DeployProgressReporter,
    poll_interval: Duration,
) -> Result<()> {
    let template = stack::synthesize(config)?;
    let body = template.to_json()?;
    let name = &config.stack.name;

    let existing = engine.describe_stack(name).await?;

    // Remember the events that predate this operation so only new ones
    // stream. A fresh create has none to remember.
    let mut seen: HashSet<String> = HashSet::new();
    if existing.is_some() {
        for event in engine.stack_events(name).await? {
            seen.insert(event.event_id);
        }
    }

    let action = match &existing {
        None => {
            engine.create_stack(name, &body).await?;
            "create"
        }
        Some(current) => {
            if !current.is_settled() {
                bail!(
                    "stack {} is {}; wait for the running operation to finish",
                    name,
                    current.status
                );
            }
            match engine.update_stack(name, &body).await? {
                UpdateOutcome::Started => "update",
                UpdateOutcome::NoChanges => {
                    println!("deploy {}", name);
                    println!("  no changes: the deployed stack already matches the declaration");
                    println!("ok");
                    return Ok(());
                }
            }
        }
    };

    if !wait {
        println!("deploy {}", name);
        println!("  action: {}", action);
        println!("  submitted, not waiting");
        println!("ok");
        return Ok(());
    }

    let outcome = wait_until_settled(engine, name, progress, poll_interval, &mut seen).await?;
    let description = match outcome.description {
        Some(description) => description,
        None => bail!("stack {} disappeared while waiting for {}", name, action),
    };

    if !deploy_succeeded(&description.status) {
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
        bail!("{} failed: {}", action, detail);
    }

    println!("deploy {}", name);
    println!("  action: {}", action);
    println!("  status: {}", description.status);
    for output in &description.outputs {
        println!("  {}: {}", output.key, output.value);
    }
    println!("ok");
    Ok(())
}

fn deploy_succeeded(status: &str) -> bool {
    status == "CREATE_COMPLETE" || status == "UPDATE_COMPLETE"
}

pub(crate) struct WaitOutcome {
    /// Last description before settling; `None` when the stack vanished.
    pub description: Option<StackDescription>,
    /// Earliest non-cancellation failure event, for the error message.
    pub first_failure: Option<StackEvent>,
}

/// Poll until the stack settles (or disappears), streaming status changes
/// and fresh resource events along the way.
pub(crate) async fn wait_until_settled(
    engine: &dyn StackEngine,
    name: &str,
    progress: &dyn DeployProgressReporter,
    poll_interval: Duration,
    seen: &mut HashSet<String>,
) -> Result<WaitOutcome> {
    let mut last_status = String::new();
    let mut first_failure: Option<StackEvent> = None;

    loop {
        let description = engine.describe_stack(name).await?;

        for event in fresh_events(engine, name, seen).await? {
            if first_failure.is_none()
                && event.status.ends_with("_FAILED")
                && !is_cancellation(&event)
            {
                first_failure = Some(event.clone());
            }
            progress.report(DeployEvent::Resource {
                timestamp: event.timestamp,
                logical_id: event.logical_id,
                resource_type: event.resource_type,
                status: event.status,
                reason: event.reason,
            });
        }

        match description {
            None => {
                return Ok(WaitOutcome {
                    description: None,
                    first_failure,
                })
            }
            Some(description) => {
                if description.status != last_status {
                    last_status = description.status.clone();
                    progress.report(DeployEvent::Status {
                        stack: name.to_string(),
                        status: description.status.clone(),
                    });
                }
                if description.is_settled() {
                    return Ok(WaitOutcome {
                        description: Some(description),
                        first_failure,
                    });
                }
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Events not seen before, oldest first. The engine reports newest first.
async fn fresh_events(
    engine: &dyn StackEngine,
    name: &str,
    seen: &mut HashSet<String>,
) -> Result<Vec<StackEvent>> {
    let mut events = engine.stack_events(name).await?;
    events.reverse();
    Ok(events
        .into_iter()
        .filter(|event| seen.insert(event.event_id.clone()))
        .collect())
}

/// Rollbacks cancel the still-pending resources; those events carry no
/// information about what went wrong.
fn is_cancellation(event: &StackEvent) -> bool {
    matches!(&event.reason, Some(reason) if reason.contains("cancelled"))
}
