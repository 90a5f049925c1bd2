//! Deployment progress reporting.
//!
//! Reports what the engine is doing while `kbstack deploy` or
//! `kbstack destroy` waits: stack status transitions and per-resource
//! events. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::Write;

/// A single progress event observed while polling the engine.
#[derive(Clone, Debug)]
pub enum DeployEvent {
    /// The stack's own status changed (e.g. CREATE_IN_PROGRESS).
    Status { stack: String, status: String },
    /// A resource inside the stack changed state.
    Resource {
        /// Engine-reported event time (RFC 3339), passed through verbatim.
        timestamp: String,
        logical_id: String,
        resource_type: String,
        status: String,
        reason: Option<String>,
    },
}

/// Reports deployment progress. Implementations write to stderr (human or
/// JSON).
pub trait DeployProgressReporter: Send + Sync {
    fn report(&self, event: DeployEvent);
}

/// Human-friendly progress on stderr:
/// `stack bedrock-kb-with-s3-source  CREATE_IN_PROGRESS`.
pub struct StderrProgress;

impl DeployProgressReporter for StderrProgress {
    fn report(&self, event: DeployEvent) {
        let line = human_line(&event);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl DeployProgressReporter for JsonProgress {
    fn report(&self, event: DeployEvent) {
        if let Ok(line) = serde_json::to_string(&json_object(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl DeployProgressReporter for NoProgress {
    fn report(&self, _event: DeployEvent) {}
}

fn human_line(event: &DeployEvent) -> String {
    match event {
        DeployEvent::Status { stack, status } => format!("stack {}  {}\n", stack, status),
        DeployEvent::Resource {
            timestamp: _,
            logical_id,
            resource_type,
            status,
            reason,
        } => match reason {
            Some(reason) => format!(
                "  {}  {}  {} ({})\n",
                logical_id, resource_type, status, reason
            ),
            None => format!("  {}  {}  {}\n", logical_id, resource_type, status),
        },
    }
}

fn json_object(event: &DeployEvent) -> serde_json::Value {
    match event {
        DeployEvent::Status { stack, status } => serde_json::json!({
            "event": "stack_status",
            "stack": stack,
            "status": status
        }),
        DeployEvent::Resource {
            timestamp,
            logical_id,
            resource_type,
            status,
            reason,
        } => serde_json::json!({
            "event": "resource_status",
            "timestamp": timestamp,
            "logical_id": logical_id,
            "resource_type": resource_type,
            "status": status,
            "reason": reason
        }),
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse the `--progress` flag; `None` means "pick by TTY".
    pub fn from_flag(flag: Option<&str>) -> anyhow::Result<Self> {
        match flag {
            None => Ok(Self::default_for_tty()),
            Some("off") => Ok(ProgressMode::Off),
            Some("human") => Ok(ProgressMode::Human),
            Some("json") => Ok(ProgressMode::Json),
            Some(other) => anyhow::bail!(
                "Unknown progress mode: '{}'. Must be off, human, or json.",
                other
            ),
        }
    }

    pub fn reporter(&self) -> Box<dyn DeployProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_lines_indent_resources_under_the_stack() {
        let status = DeployEvent::Status {
            stack: "bedrock-kb-with-s3-source".to_string(),
            status: "CREATE_IN_PROGRESS".to_string(),
        };
        assert_eq!(
            human_line(&status),
            "stack bedrock-kb-with-s3-source  CREATE_IN_PROGRESS\n"
        );

        let resource = DeployEvent::Resource {
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
            logical_id: "KbDocsBucket".to_string(),
            resource_type: "AWS::S3::Bucket".to_string(),
            status: "CREATE_COMPLETE".to_string(),
            reason: None,
        };
        assert_eq!(
            human_line(&resource),
            "  KbDocsBucket  AWS::S3::Bucket  CREATE_COMPLETE\n"
        );
    }

    #[test]
    fn human_lines_include_failure_reasons() {
        let resource = DeployEvent::Resource {
            timestamp: "2026-01-01T00:00:05.000Z".to_string(),
            logical_id: "KnowledgeBase".to_string(),
            resource_type: "AWS::Bedrock::KnowledgeBase".to_string(),
            status: "CREATE_FAILED".to_string(),
            reason: Some("No export named AossCollectionArn found".to_string()),
        };
        let line = human_line(&resource);
        assert!(line.contains("CREATE_FAILED"));
        assert!(line.contains("No export named AossCollectionArn found"));
    }

    #[test]
    fn json_objects_tag_the_event_kind() {
        let status = DeployEvent::Status {
            stack: "s".to_string(),
            status: "DELETE_IN_PROGRESS".to_string(),
        };
        assert_eq!(json_object(&status)["event"], "stack_status");

        let resource = DeployEvent::Resource {
            timestamp: "2026-01-01T00:00:05.000Z".to_string(),
            logical_id: "S3DataSource".to_string(),
            resource_type: "AWS::Bedrock::DataSource".to_string(),
            status: "CREATE_IN_PROGRESS".to_string(),
            reason: None,
        };
        let obj = json_object(&resource);
        assert_eq!(obj["event"], "resource_status");
        assert_eq!(obj["timestamp"], "2026-01-01T00:00:05.000Z");
        assert_eq!(obj["logical_id"], "S3DataSource");
        assert!(obj["reason"].is_null());
    }

    #[test]
    fn progress_flag_parses() {
        assert_eq!(
            ProgressMode::from_flag(Some("off")).unwrap(),
            ProgressMode::Off
        );
        assert_eq!(
            ProgressMode::from_flag(Some("json")).unwrap(),
            ProgressMode::Json
        );
        assert!(ProgressMode::from_flag(Some("fancy")).is_err());
    }
}
