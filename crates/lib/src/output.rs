//! Output normalizer: turn an [`ExecutionOutcome`] into bounded, presentable text.

use crate::catalog::CommandKey;
use crate::disk::{parse_disk_usage, DiskRecord};
use crate::error::RelayError;
use crate::exec::ExecutionOutcome;

/// Byte budget for captured text shown to the operator.
pub const MAX_OUTPUT_BYTES: usize = 4000;

pub const DONE_NO_OUTPUT: &str = "✅ Done (no output)";
pub const LOG_EMPTY: &str = "📭 No log entries yet";

/// Presentable result of one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Stdout, or stderr when stdout is empty; sentinel when both are empty.
    pub text: String,
    pub exit_status: Option<i32>,
    pub truncated: bool,
    /// Only for [`CommandKey::DiskSpace`].
    pub disks: Option<Vec<DiskRecord>>,
}

/// Normalize an outcome. `key` is `None` for custom invocations.
pub fn normalize(key: Option<CommandKey>, outcome: ExecutionOutcome) -> Result<ExecutionResult, RelayError> {
    let (stdout, stderr, status) = match outcome {
        ExecutionOutcome::Completed {
            stdout,
            stderr,
            status,
        } => (stdout, stderr, status),
        ExecutionOutcome::Timeout { after } => return Err(RelayError::Timeout(after)),
        ExecutionOutcome::Fault { detail } => return Err(RelayError::ExecutionFault(detail)),
    };

    let captured = if !stdout.is_empty() { stdout } else { stderr };

    let disks = match key {
        Some(CommandKey::DiskSpace) => Some(parse_disk_usage(&captured)),
        _ => None,
    };

    if captured.is_empty() {
        let sentinel = match key {
            Some(CommandKey::Logs) => LOG_EMPTY,
            _ => DONE_NO_OUTPUT,
        };
        return Ok(ExecutionResult {
            text: sentinel.to_string(),
            exit_status: status,
            truncated: false,
            disks,
        });
    }

    let (text, truncated) = truncate_to_budget(captured, MAX_OUTPUT_BYTES);
    Ok(ExecutionResult {
        text,
        exit_status: status,
        truncated,
        disks,
    })
}

/// Keep the leading `max` bytes. The cut moves back to a char boundary, so only
/// multi-byte text can come out shorter than `max`.
pub fn truncate_to_budget(mut text: String, max: usize) -> (String, bool) {
    if text.len() <= max {
        return (text, false);
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    (text, true)
}
