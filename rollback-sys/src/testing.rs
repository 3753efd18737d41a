// SPDX-License-Identifier: GPL-3.0-only

//! Scripted executor for unit tests.
//!
//! Responses are matched against the rendered command line by prefix. A rule
//! added with [`ScriptedExecutor::once`] is consumed by its first match;
//! [`ScriptedExecutor::always`] rules stay. Unmatched commands succeed with
//! empty output. Every invocation is recorded in order.

use std::cell::RefCell;
use std::collections::HashSet;

use crate::error::Result;
use crate::exec::{CommandExecutor, CommandOutput, Invocation};

struct Rule {
    prefix: String,
    output: CommandOutput,
    once: bool,
}

#[derive(Default)]
pub struct ScriptedExecutor {
    rules: RefCell<Vec<Rule>>,
    calls: RefCell<Vec<Invocation>>,
    missing_tools: RefCell<HashSet<String>>,
}

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        status: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn fail(status: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        status,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always(&self, prefix: &str, output: CommandOutput) -> &Self {
        self.push(prefix, output, false)
    }

    pub fn once(&self, prefix: &str, output: CommandOutput) -> &Self {
        self.push(prefix, output, true)
    }

    fn push(&self, prefix: &str, output: CommandOutput, once: bool) -> &Self {
        self.rules.borrow_mut().push(Rule {
            prefix: prefix.to_string(),
            output,
            once,
        });
        self
    }

    pub fn without_tool(&self, program: &str) -> &Self {
        self.missing_tools.borrow_mut().insert(program.to_string());
        self
    }

    /// Rendered command lines in call order
    pub fn rendered(&self) -> Vec<String> {
        self.calls.borrow().iter().map(Invocation::render).collect()
    }

    /// Rendered command lines of mutating calls only
    pub fn mutations(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.mutating)
            .map(Invocation::render)
            .collect()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.rendered()
            .iter()
            .position(|line| line.starts_with(prefix))
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn execute(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.calls.borrow_mut().push(invocation.clone());
        let rendered = invocation.render();
        let mut rules = self.rules.borrow_mut();
        let Some(index) = rules
            .iter()
            .position(|rule| rendered.starts_with(&rule.prefix))
        else {
            return Ok(CommandOutput::default());
        };
        if rules[index].once {
            Ok(rules.remove(index).output)
        } else {
            Ok(rules[index].output.clone())
        }
    }

    fn tool_available(&self, program: &str) -> bool {
        !self.missing_tools.borrow().contains(program)
    }
}

/// `lvs --reportformat json` document for the given
/// `(vg, lv, attr, origin)` rows.
pub fn lvs_json(rows: &[(&str, &str, &str, &str)]) -> String {
    let records: Vec<serde_json::Value> = rows
        .iter()
        .map(|(vg, lv, attr, origin)| {
            serde_json::json!({
                "vg_name": vg,
                "lv_name": lv,
                "lv_attr": attr,
                "origin": origin,
                "lv_size": "10.00",
                "data_percent": if origin.is_empty() { "" } else { "3.25" },
            })
        })
        .collect();
    serde_json::json!({ "report": [ { "lv": records } ] }).to_string()
}
