//! Structured interpretation of execution logs
//!
//! The ledger emits one flat list of lines per transaction. Nesting is implicit:
//!
//! ```text
//! Program <id> invoke [<depth>]
//! Program log: ...
//! Program <id> consumed <n> of <m> compute units
//! Program <id> success | Program <id> failed: <reason>
//! ```
//!
//! [`LogInterpreter::parse`] rebuilds the call tree with a stack of open frames.
//! Truncated streams are normal under log size limits: frames left open at the
//! end close with `success = err.is_none()` instead of producing a parse error.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write as _;
use tracing::debug;

use crate::types::ExecutionError;

static INVOKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Program (\S+) invoke \[(\d+)\]$").expect("valid regex"));
static SUCCESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Program (\S+) success$").expect("valid regex"));
static FAILED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Program (\S+) failed: (.*)$").expect("valid regex"));
static CONSUMED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Program (\S+) consumed (\d+) of (\d+) compute units$").expect("valid regex")
});

const TRUNCATED_MARKER: &str = "Log truncated";

/// One program invocation and everything it logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFrame {
    pub program_id: String,
    /// Cross-program invocation depth; root frames are 0
    pub depth: u32,
    pub messages: Vec<String>,
    pub success: bool,
    pub children: Vec<LogFrame>,
    /// Reason from a `failed:` line
    pub failure: Option<String>,
    /// `(consumed, budget)` from the compute-units line
    pub compute_units: Option<(u64, u64)>,
    /// The stream ended before this frame closed
    pub truncated: bool,
    /// For each child, how many of this frame's messages preceded it
    child_positions: Vec<usize>,
}

impl LogFrame {
    fn open(program_id: &str, depth: u32) -> Self {
        Self {
            program_id: program_id.to_string(),
            depth,
            messages: Vec::new(),
            success: false,
            children: Vec::new(),
            failure: None,
            compute_units: None,
            truncated: false,
            child_positions: Vec::new(),
        }
    }

    fn push_child(&mut self, child: LogFrame) {
        self.child_positions.push(self.messages.len());
        self.children.push(child);
    }

    /// Messages of this frame and its descendants in stream order
    pub fn flatten_messages(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_messages(&mut out);
        out
    }

    fn collect_messages(&self, out: &mut Vec<String>) {
        let mut children = self.children.iter().zip(&self.child_positions).peekable();
        for (index, message) in self.messages.iter().enumerate() {
            while let Some((child, _)) = children.next_if(|(_, pos)| **pos <= index) {
                child.collect_messages(out);
            }
            out.push(message.clone());
        }
        for (child, _) in children {
            child.collect_messages(out);
        }
    }

    /// Frames (this one included) that reported failure, depth first
    pub fn failed_frames(&self) -> Vec<&LogFrame> {
        let mut out = Vec::new();
        if !self.success {
            out.push(self);
        }
        for child in &self.children {
            out.extend(child.failed_frames());
        }
        out
    }

    /// Indented tree rendering for terminals
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        let indent = "  ".repeat(self.depth as usize);
        let status = match (&self.failure, self.success, self.truncated) {
            (Some(reason), _, _) => format!("failed: {}", reason),
            (None, true, false) => "success".to_string(),
            (None, true, true) => "success (truncated)".to_string(),
            (None, false, true) => "failed (truncated)".to_string(),
            (None, false, false) => "failed".to_string(),
        };
        let _ = write!(out, "{}{} [{}]", indent, self.program_id, status);
        if let Some((consumed, budget)) = self.compute_units {
            let _ = write!(out, " {}/{} CU", consumed, budget);
        }
        out.push('\n');
        for message in &self.messages {
            let _ = writeln!(out, "{}  | {}", indent, message);
        }
        for child in &self.children {
            child.render_into(out);
        }
    }
}

/// Rebuilds nested call traces from raw log lines
#[derive(Debug, Clone, Copy, Default)]
pub struct LogInterpreter;

impl LogInterpreter {
    pub fn parse<S: AsRef<str>>(lines: &[S], err: Option<&ExecutionError>) -> Vec<LogFrame> {
        let overall_success = err.is_none();
        let mut roots: Vec<LogFrame> = Vec::new();
        let mut stack: Vec<LogFrame> = Vec::new();
        let mut truncated = false;

        for line in lines {
            let line = line.as_ref();

            if let Some(caps) = INVOKE.captures(line) {
                let depth = caps[2]
                    .parse::<u32>()
                    .map(|d| d.saturating_sub(1))
                    .unwrap_or(stack.len() as u32);
                stack.push(LogFrame::open(&caps[1], depth));
                continue;
            }

            if let Some(caps) = SUCCESS.captures(line) {
                if close(&mut stack, &mut roots, &caps[1], true, None, overall_success) {
                    continue;
                }
            } else if let Some(caps) = FAILED.captures(line) {
                let reason = caps[2].to_string();
                if close(&mut stack, &mut roots, &caps[1], false, Some(reason), overall_success) {
                    continue;
                }
            } else if line == TRUNCATED_MARKER {
                truncated = true;
            }

            if let Some(caps) = CONSUMED.captures(line) {
                if let Some(frame) = stack.last_mut() {
                    if frame.program_id == caps[1] {
                        let consumed = caps[2].parse().unwrap_or(0);
                        let budget = caps[3].parse().unwrap_or(0);
                        frame.compute_units = Some((consumed, budget));
                    }
                }
            }

            match stack.last_mut() {
                Some(frame) => frame.messages.push(line.to_string()),
                None => debug!(line = line, "Log line outside any invocation"),
            }
        }

        if !stack.is_empty() {
            debug!(
                open_frames = stack.len(),
                truncated_marker = truncated,
                "Log stream ended with open frames"
            );
        }
        while let Some(mut frame) = stack.pop() {
            frame.success = overall_success;
            frame.truncated = true;
            attach(&mut stack, &mut roots, frame);
        }

        roots
    }
}

/// Close the innermost open frame for `program_id`.
///
/// Frames above it that never closed are closed first as truncated. Returns
/// false when no open frame matches, so the caller keeps the line as a message.
fn close(
    stack: &mut Vec<LogFrame>,
    roots: &mut Vec<LogFrame>,
    program_id: &str,
    success: bool,
    failure: Option<String>,
    overall_success: bool,
) -> bool {
    let Some(position) = stack.iter().rposition(|f| f.program_id == program_id) else {
        return false;
    };

    while stack.len() > position + 1 {
        if let Some(mut dangling) = stack.pop() {
            dangling.success = overall_success;
            dangling.truncated = true;
            attach(stack, roots, dangling);
        }
    }

    if let Some(mut frame) = stack.pop() {
        frame.success = success;
        frame.failure = failure;
        attach(stack, roots, frame);
    }
    true
}

fn attach(stack: &mut [LogFrame], roots: &mut Vec<LogFrame>, frame: LogFrame) {
    match stack.last_mut() {
        Some(parent) => parent.push_child(frame),
        None => roots.push(frame),
    }
}

/// Render a whole trace
pub fn render_frames(frames: &[LogFrame]) -> String {
    frames.iter().map(LogFrame::render).collect()
}
