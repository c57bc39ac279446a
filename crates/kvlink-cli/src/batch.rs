//! Line-oriented batch mode.
//!
//! Each input line is a JSON array holding an operation name followed by its
//! positional arguments, e.g. `["open", 1, "/tmp/t.db", true]`. Each line
//! produces exactly one JSON object on the output: `{"ok": <reply>}` or
//! `{"error": {"code": ..., "message": ...}}`.

use anyhow::{Context, Result};
use kvlink::{dispatch, Arg, Call, KvError, Registry, Reply};
use serde::Serialize;
use serde_json::Value;
use std::io::{BufRead, Write};
use tracing::{debug, warn};

const INVALID_REQUEST: &str = "invalid_request";

/// One output line.
#[derive(Debug, Serialize)]
struct BatchResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    ok: Option<Reply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<BatchError>,
}

#[derive(Debug, Serialize)]
struct BatchError {
    code: &'static str,
    message: String,
}

impl BatchResponse {
    fn success(reply: Reply) -> Self {
        Self {
            ok: Some(reply),
            error: None,
        }
    }

    fn failure(code: &'static str, message: String) -> Self {
        Self {
            ok: None,
            error: Some(BatchError { code, message }),
        }
    }
}

/// Counters reported after a batch completes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Instances still allocated at end of input.
    pub released: usize,
}

/// Convert one JSON scalar to a call argument.
fn to_arg(value: &Value) -> Option<Arg> {
    match value {
        Value::Bool(b) => Some(Arg::Boolean(*b)),
        Value::String(s) => Some(Arg::Text(s.clone())),
        Value::Number(n) => n.as_i64().map(Arg::Integer),
        _ => None,
    }
}

/// Parse one input line into a validated call.
fn parse_line(line: &str) -> std::result::Result<Call, BatchResponse> {
    let invalid = |message: String| BatchResponse::failure(INVALID_REQUEST, message);

    let value: Value =
        serde_json::from_str(line).map_err(|e| invalid(format!("malformed JSON: {}", e)))?;
    let items = value
        .as_array()
        .ok_or_else(|| invalid("request must be a JSON array".to_string()))?;
    let (operation, rest) = items
        .split_first()
        .ok_or_else(|| invalid("request is empty".to_string()))?;
    let operation = operation
        .as_str()
        .ok_or_else(|| invalid("operation name must be a string".to_string()))?;

    let mut args = Vec::with_capacity(rest.len());
    for (position, value) in rest.iter().enumerate() {
        let arg = to_arg(value).ok_or_else(|| {
            invalid(format!(
                "argument {} is not an integer, string or boolean: {}",
                position + 1,
                value
            ))
        })?;
        args.push(arg);
    }

    Call::from_args(operation, &args).map_err(|e| error_response(&e))
}

fn error_response(err: &KvError) -> BatchResponse {
    BatchResponse::failure(err.code(), err.to_string())
}

/// Run every request in `input` against `registry`, writing one response per
/// request to `output`. Instances left allocated at end of input are released.
pub fn run_batch<R: BufRead, W: Write>(
    input: R,
    mut output: W,
    registry: &mut Registry,
) -> Result<BatchSummary> {
    let mut summary = BatchSummary::default();

    for (index, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("reading batch line {}", index + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let response = match parse_line(trimmed) {
            Ok(call) => match dispatch(registry, call) {
                Ok(reply) => BatchResponse::success(reply),
                Err(e) => {
                    debug!("Batch line {} failed: {}", index + 1, e);
                    error_response(&e)
                }
            },
            Err(response) => response,
        };

        if response.error.is_some() {
            summary.failed += 1;
        } else {
            summary.succeeded += 1;
        }

        serde_json::to_writer(&mut output, &response)?;
        output.write_all(b"\n")?;
    }

    output.flush()?;

    summary.released = registry.release_all();
    if summary.released > 0 {
        warn!(
            "Released {} instance(s) left allocated at end of batch",
            summary.released
        );
    }

    Ok(summary)
}
