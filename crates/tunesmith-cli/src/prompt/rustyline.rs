use std::io::{self, Write};

use anyhow::Result;
use cliclack::spinner;
use console::style;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;
use tunesmith::models::content::Content;
use tunesmith::models::message::{Message, MessageContent, ToolRequest, ToolResponse};

use super::{parse_input, Input, InputType, Prompt};

const PROMPT: &str = "\x1b[1m\x1b[38;5;35m♪> \x1b[0m";
const MAX_STRING_LENGTH: usize = 40;
const MAX_RESULT_LINES: usize = 8;
const INDENT: &str = "    ";

pub struct RustylinePrompt {
    editor: DefaultEditor,
    spinner: cliclack::ProgressBar,
}

impl RustylinePrompt {
    pub fn new() -> Result<Self> {
        Ok(RustylinePrompt {
            editor: DefaultEditor::new()?,
            spinner: spinner(),
        })
    }
}

fn render_request(tool_request: &ToolRequest) {
    match &tool_request.tool_call {
        Ok(call) => {
            print_newline();
            println!(
                "─── {} ──────────────────────────",
                style(&call.name).magenta().dim()
            );
            print_params(&call.arguments, 0);
        }
        Err(e) => println!("{}", style(e.to_string()).red()),
    }
}

fn render_response(tool_response: &ToolResponse) {
    match &tool_response.tool_result {
        Ok(contents) => {
            for content in contents {
                match content {
                    Content::Text(text) => {
                        let lines: Vec<&str> = text.text.lines().collect();
                        for line in lines.iter().take(MAX_RESULT_LINES) {
                            println!("{}{}", INDENT, style(line).dim());
                        }
                        if lines.len() > MAX_RESULT_LINES {
                            println!(
                                "{}{}",
                                INDENT,
                                style(format!("... {} more lines", lines.len() - MAX_RESULT_LINES))
                                    .dim()
                            );
                        }
                    }
                    Content::Image(image) => {
                        println!("{}{}", INDENT, style(format!("[image: {}]", image.mime_type)).dim());
                    }
                }
            }
        }
        Err(e) => println!("{}{}", INDENT, style(e.to_string()).red()),
    }
}

/// Format and print parameters recursively with proper indentation and colors
fn print_params(value: &Value, depth: usize) {
    let indent = INDENT.repeat(depth);

    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) => {
                        println!("{}{}:", indent, style(key).dim());
                        print_params(val, depth + 1);
                    }
                    Value::Array(arr) => {
                        println!(
                            "{}{}: {}",
                            indent,
                            style(key).dim(),
                            style(format!("[{} items]", arr.len())).blue()
                        );
                    }
                    Value::String(s) => {
                        if s.len() > MAX_STRING_LENGTH {
                            let shown: String = s.chars().take(MAX_STRING_LENGTH).collect();
                            println!("{}{}: {}...", indent, style(key).dim(), style(shown).green());
                        } else {
                            println!("{}{}: {}", indent, style(key).dim(), style(s).green());
                        }
                    }
                    Value::Number(n) => {
                        println!("{}{}: {}", indent, style(key).dim(), style(n).blue());
                    }
                    Value::Bool(b) => {
                        println!("{}{}: {}", indent, style(key).dim(), style(b).blue());
                    }
                    Value::Null => {
                        println!("{}{}: {}", indent, style(key).dim(), style("null").dim());
                    }
                }
            }
        }
        other => println!("{}{}", indent, style(other).green()),
    }
}

fn print_newline() {
    println!();
}

impl Prompt for RustylinePrompt {
    fn render(&mut self, message: Box<Message>) {
        for message_content in &message.content {
            match message_content {
                MessageContent::Text(text) => println!("{}", text.text),
                MessageContent::ToolRequest(tool_request) => render_request(tool_request),
                MessageContent::ToolResponse(tool_response) => render_response(tool_response),
                MessageContent::Image(image) => {
                    println!("Image: [type: {}]", image.mime_type);
                }
            }
        }

        let _ = io::stdout().flush();
    }

    fn render_error(&mut self, error: &str) {
        eprintln!("{} {}", style("error:").red().bold(), error);
    }

    fn show_busy(&mut self) {
        self.spinner = spinner();
        self.spinner.start("Finding the right tracks...");
    }

    fn hide_busy(&self) {
        self.spinner.stop("");
    }

    fn get_input(&mut self) -> Result<Input> {
        let line = match self.editor.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                return Ok(Input {
                    input_type: InputType::Exit,
                    content: None,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let input = parse_input(&line);
        match input.input_type {
            InputType::Message => {
                let _ = self.editor.add_history_entry(line.trim());
            }
            InputType::Help => {
                println!("Commands:");
                println!("exit | quit - Exit the session");
                println!("/? | /help - Display this help message");
                println!("Ctrl+C - Interrupt (resets the conversation to before the interrupted request)");
            }
            _ => {}
        }
        Ok(input)
    }

    fn close(&self) {
        println!("{}", style("Goodbye, enjoy the music!").dim());
    }
}
