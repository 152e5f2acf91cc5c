//! Scripted command runner for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{DnsChangeError, Result};
use crate::exec::{CommandOutput, CommandRunner};

#[derive(Clone, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<HashMap<String, CommandOutput>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, command: &str, output: CommandOutput) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), output);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(line.clone());
        self.responses
            .lock()
            .unwrap()
            .get(&line)
            .cloned()
            .ok_or_else(|| DnsChangeError::tool(program, format!("unscripted: {line}")))
    }
}
