//! Parsing of serialized Ganeti job-queue files.
//!
//! A job file holds one job with one or more operations. Each operation
//! yields one normalized [`JobEvent`]; files that fail to parse are the
//! caller's non-fatal skip case.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::models::JobEvent;

#[derive(Debug, Deserialize)]
struct RawJob {
    id: RawJobId,
    ops: Vec<RawOp>,
}

/// Job ids are serialized as numbers by some Ganeti versions and as
/// strings by others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawJobId {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawOp {
    input: RawInput,
    status: String,
    #[serde(default)]
    log: Vec<serde_json::Value>,
}

/// Operation input comes in two shapes: a list of target instances, or a
/// single named instance. The named form wins when both are present.
#[derive(Debug, Deserialize)]
struct RawInput {
    #[serde(rename = "OP_ID")]
    op_id: String,
    #[serde(default)]
    instance_name: Option<String>,
    #[serde(default)]
    instances: Option<Vec<String>>,
}

/// Returns true for file names the job queue uses for jobs.
pub fn is_job_file(name: &str) -> bool {
    name.starts_with("job-")
}

/// Routing key for an instance's operation events:
/// `ganeti.<prefix>.event.op`, where `<prefix>` is the instance-name
/// segment before the first dash.
pub fn routing_key(instance: &str) -> String {
    let prefix = instance.split('-').next().unwrap_or("");
    format!("ganeti.{}.event.op", prefix)
}

/// Parse a job file's content into one event per operation.
pub fn parse_job_events(data: &str) -> Result<Vec<JobEvent>> {
    let job: RawJob = serde_json::from_str(data).context("Malformed job file")?;

    let job_id = match job.id {
        RawJobId::Number(id) => id,
        RawJobId::Text(text) => text
            .parse::<u64>()
            .with_context(|| format!("Non-numeric job id '{}'", text))?,
    };

    if job.ops.is_empty() {
        bail!("Job {} has no operations", job_id);
    }

    let events = job
        .ops
        .into_iter()
        .map(|op| {
            let instance = match (&op.input.instance_name, &op.input.instances) {
                (Some(name), _) => name.clone(),
                (None, Some(list)) => list.join(" "),
                (None, None) => String::new(),
            };

            // Last line of the op log, if any, becomes the event message.
            let logmsg = op
                .log
                .last()
                .and_then(|entry| entry.as_array())
                .and_then(|fields| fields.last())
                .and_then(|msg| msg.as_str())
                .map(str::to_string);

            JobEvent::new(job_id, instance, op.input.op_id, op.status, logmsg)
        })
        .collect();

    Ok(events)
}
