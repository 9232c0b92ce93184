//! Console driver for the guided setup.

use log::info;
use serde_json::{Map, Value};
use std::{
    io::{self, BufRead, Write},
    path::Path,
};

use crate::{
    config::ConfigEntry,
    config_flow::{ConfigFlow, FlowResult, Form},
    error::Result,
};

pub const CONFIG_ENTRY_FILE: &str = "data/config_entry.json";

/// Prompts every field of `form`, returning the submitted input.
///
/// Blank answers are left out so the field's default applies.
fn prompt<R: BufRead, W: Write>(form: &Form, input: &mut R, output: &mut W) -> Result<Value> {
    if let Some(title) = form.placeholders.get("title") {
        writeln!(output, "== {} ==", title)?;
    }
    if let Some(error) = form.error() {
        writeln!(output, "Error: {}", error)?;
    }
    let mut answers = Map::new();
    for field in &form.fields {
        write!(output, "{}", field.name)?;
        if !field.options.is_empty() {
            write!(output, " ({})", field.options.join("/"))?;
        }
        match &field.default {
            Some(Value::String(default)) if default.is_empty() => {}
            Some(Value::String(default)) => write!(output, " [{}]", default)?,
            Some(default) => write!(output, " [{}]", default)?,
            None => {}
        }
        write!(output, ": ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "setup aborted").into());
        }
        let answer = line.trim();
        if !answer.is_empty() {
            answers.insert(field.name.clone(), Value::String(answer.to_string()));
        }
    }
    Ok(Value::Object(answers))
}

/// Runs the flow to completion against a line reader.
pub fn run_flow<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<ConfigEntry> {
    let mut flow = ConfigFlow::new();
    info!("Starting setup flow {}", flow.flow_id());
    let mut form = flow.form();
    loop {
        let answers = prompt(&form, input, output)?;
        match flow.submit(&answers) {
            FlowResult::Form(next) => form = next,
            FlowResult::CreateEntry(entry) => return Ok(entry),
        }
    }
}

/// Runs the flow on stdin/stdout and stores the resulting entry at `path`.
pub fn run_wizard(path: &Path) -> Result<ConfigEntry> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    let entry = run_flow(&mut input, &mut output)?;
    entry.save(path)?;
    writeln!(output, "Saved {} to {}", entry.title, path.display())?;
    Ok(entry)
}
