// src/cli/handlers/commons.rs

use crate::core::sinks::{BufferCollector, SharedSink};
use crate::system::errors::RunnerError;
use crate::system::task::ProcessTask;
use anyhow::{Result, anyhow};
use colored::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Parses a vector of "KEY=VALUE" strings into a HashMap.
pub fn parse_key_value_pairs(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                map.insert(key.trim().to_string(), value.to_string());
            }
            _ => {
                return Err(anyhow!(
                    "Invalid format for key-value pair: '{}'. Expected 'KEY=VALUE'.",
                    pair
                ));
            }
        }
    }
    Ok(map)
}

/// A collector for one stream: capped at `max_chars` characters, unbounded when 0.
pub fn collector(max_chars: usize) -> Arc<BufferCollector> {
    if max_chars == 0 {
        Arc::new(BufferCollector::unbounded())
    } else {
        Arc::new(BufferCollector::new(max_chars))
    }
}

/// Shares `collector` as an output sink.
pub fn as_sink(collector: &Arc<BufferCollector>) -> SharedSink {
    Arc::clone(collector) as SharedSink
}

/// Prints the result line of a finished task and returns whether it succeeded.
///
/// A task succeeds when waiting for it raised nothing and its exit code is 0.
pub fn report_task(label: &str, task: &ProcessTask, outcome: &Result<bool, RunnerError>) -> bool {
    let (badge, ok) = match (outcome, task.exit_code()) {
        (Ok(_), Ok(0)) => ("OK".green().bold(), true),
        (Ok(_), Ok(code)) => (format!("EXIT {}", code).yellow().bold(), false),
        _ => ("FAILED".red().bold(), false),
    };
    println!("{} [{}] {}", "==>".cyan().bold(), badge, label.bold());
    if let Err(e) = outcome {
        println!("    {}", e.to_string().red());
    }
    ok
}

/// Prints collected output, noting when the collector ran out of room.
pub fn print_output(collector: &BufferCollector) {
    if collector.is_empty() {
        return;
    }
    print!("{}", collector.text());
    if collector.is_full() {
        println!(
            "{}",
            format!("... output truncated at {} characters", collector.max_size()).dimmed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value_pairs() {
        let pairs = vec!["A=1".to_string(), " B =x=y".to_string(), "EMPTY=".to_string()];
        let map = parse_key_value_pairs(&pairs).unwrap();
        assert_eq!(map.get("A").map(String::as_str), Some("1"));
        assert_eq!(map.get("B").map(String::as_str), Some("x=y"));
        assert_eq!(map.get("EMPTY").map(String::as_str), Some(""));

        assert!(parse_key_value_pairs(&["novalue".to_string()]).is_err());
        assert!(parse_key_value_pairs(&["=1".to_string()]).is_err());
    }

    #[test]
    fn test_collector_cap() {
        assert_eq!(collector(0).max_size(), 0);
        assert_eq!(collector(10).max_size(), 10);
    }
}
