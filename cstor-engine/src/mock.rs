//! Scripted command runner for testing and development.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::runner::{display_command, CommandOutput, CommandRunner};

/// Command runner that answers from a script table instead of forking.
///
/// Commands are matched on their full rendered argv (`"zpool import cp1"`),
/// then on the longest registered prefix. Each entry holds a queue of
/// outputs; the last output repeats once the queue drains. Unscripted
/// commands get the fallback output (exit 127 unless overridden).
///
/// Every invocation is recorded so tests can assert order and counts.
pub struct ScriptedRunner {
    exact: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    prefixes: Mutex<Vec<(String, CommandOutput)>>,
    fallback: Mutex<Option<CommandOutput>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            exact: Mutex::new(HashMap::new()),
            prefixes: Mutex::new(Vec::new()),
            fallback: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue an output for an exact command line.
    pub fn script(&self, command: &str, output: CommandOutput) -> &Self {
        if let Ok(mut exact) = self.exact.lock() {
            exact.entry(command.to_string()).or_default().push_back(output);
        }
        self
    }

    /// Answer every command line starting with `prefix`.
    pub fn script_prefix(&self, prefix: &str, output: CommandOutput) -> &Self {
        if let Ok(mut prefixes) = self.prefixes.lock() {
            prefixes.push((prefix.to_string(), output));
        }
        self
    }

    /// Output for commands with no script entry.
    pub fn fallback(&self, output: CommandOutput) -> &Self {
        if let Ok(mut fallback) = self.fallback.lock() {
            *fallback = Some(output);
        }
        self
    }

    /// All command lines run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// How many times an exact command line ran.
    pub fn count(&self, command: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == command).count()
    }

    /// Whether any command line starting with `prefix` ran.
    pub fn ran_prefix(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn answer(&self, line: &str) -> Result<CommandOutput> {
        {
            let mut exact = self.exact.lock().map_err(poisoned)?;
            if let Some(queue) = exact.get_mut(line) {
                let output = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                if let Some(output) = output {
                    return Ok(output);
                }
            }
        }

        {
            let prefixes = self.prefixes.lock().map_err(poisoned)?;
            let best = prefixes
                .iter()
                .filter(|(p, _)| line.starts_with(p.as_str()))
                .max_by_key(|(p, _)| p.len());
            if let Some((_, output)) = best {
                return Ok(output.clone());
            }
        }

        let fallback = self.fallback.lock().map_err(poisoned)?;
        Ok(fallback
            .clone()
            .unwrap_or_else(|| CommandOutput::failed(127, format!("no script for `{}`", line))))
    }
}

fn poisoned<T>(_: T) -> EngineError {
    EngineError::Internal("Lock poisoned".to_string())
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let line = display_command(program, args);
        debug!(command = %line, "Scripted command");

        self.calls
            .lock()
            .map_err(poisoned)?
            .push(line.clone());

        self.answer(&line)
    }
}
