use std::io::{self, Write};

use console::style;
use serde_json::Value;
use too::agent::AgentEvent;
use too::models::response::Usage;
use too::models::tool::{ToolCall, ToolResult};

const MAX_STRING_LENGTH: usize = 40;
const MAX_RESULT_LINES: usize = 12;
const INDENT: &str = "    ";

/// Print the events of one turn as they arrive
pub fn render_event(event: &AgentEvent) {
    match event {
        AgentEvent::ContentDelta(text) => {
            print!("{}", text);
            // a failed flush only delays output
            let _ = io::stdout().flush();
        }
        AgentEvent::ToolCallStarted(call) => print_tool_request(call),
        AgentEvent::ToolCallFinished { name, result } => print_tool_result(name, result),
        AgentEvent::Error(message) => print_error(message),
    }
}

fn print_tool_request(call: &ToolCall) {
    println!();
    println!(
        "─── {} | {} ──────────────────────────",
        style(&call.name),
        style(&call.id).magenta().dim(),
    );
    for line in format_params(&Value::Object(call.arguments.clone()), 0) {
        println!("{}", line);
    }
}

fn print_tool_result(name: &str, result: &ToolResult) {
    if result.is_error {
        println!("{} {}", style(format!("{} failed:", name)).red(), result.output);
        return;
    }
    let lines: Vec<&str> = result.output.lines().collect();
    for line in lines.iter().take(MAX_RESULT_LINES) {
        println!("{}", style(line).dim());
    }
    if lines.len() > MAX_RESULT_LINES {
        println!(
            "{}",
            style(format!("... {} more lines", lines.len() - MAX_RESULT_LINES)).dim()
        );
    }
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", style("error:").red().bold(), message);
}

pub fn print_usage(usage: &Usage) {
    println!(
        "{} {} in, {} out, {} total",
        style("tokens:").dim(),
        usage.input_tokens,
        usage.output_tokens,
        usage.total_tokens
    );
}

/// Format tool arguments recursively with indentation, eliding long strings
fn format_params(value: &Value, depth: usize) -> Vec<String> {
    let indent = INDENT.repeat(depth);
    let mut lines = Vec::new();

    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) | Value::Array(_) => {
                        lines.push(format!("{}{}:", indent, style(key).dim()));
                        lines.extend(format_params(val, depth + 1));
                    }
                    _ => lines.push(format!("{}{}: {}", indent, style(key).dim(), scalar(val))),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) => {
                        lines.push(format!("{}-", indent));
                        lines.extend(format_params(item, depth + 1));
                    }
                    _ => lines.push(format!("{}- {}", indent, scalar(item))),
                }
            }
        }
        _ => lines.push(format!("{}{}", indent, scalar(value))),
    }
    lines
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) if s.chars().count() > MAX_STRING_LENGTH => {
            style(format!("[{} chars]", s.chars().count())).yellow().to_string()
        }
        Value::String(s) => style(s).green().to_string(),
        Value::Number(n) => style(n).blue().to_string(),
        Value::Bool(b) => style(b).blue().to_string(),
        Value::Null => style("null").dim().to_string(),
        other => other.to_string(),
    }
}
