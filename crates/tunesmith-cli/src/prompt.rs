use anyhow::Result;
use tunesmith::models::message::Message;

pub mod rustyline;

pub trait Prompt {
    fn render(&mut self, message: Box<Message>);
    fn render_error(&mut self, error: &str);
    fn get_input(&mut self) -> Result<Input>;
    fn show_busy(&mut self);
    fn hide_busy(&self);
    fn close(&self);
    fn ready(&self) {
        println!();
        println!("Tunesmith is ready! Ask for recommendations or a new playlist. Type \"exit\" to leave.");
        println!();
    }
}

#[derive(Debug, PartialEq)]
pub struct Input {
    pub input_type: InputType,
    pub content: Option<String>, // Optional content as sometimes the user may be issuing a command eg. (Exit)
}

#[derive(Debug, PartialEq)]
pub enum InputType {
    AskAgain, // Ask the user for input again. Control flow command.
    Message,  // User sent a message
    Exit,     // User wants to exit the session
    Help,     // User asked for the command list
}

impl Input {
    fn of(input_type: InputType) -> Self {
        Self {
            input_type,
            content: None,
        }
    }
}

/// Interpret one line typed by the user
pub fn parse_input(line: &str) -> Input {
    let text = line.trim();
    let command = text.trim_start_matches('/');
    if text.is_empty() {
        Input::of(InputType::AskAgain)
    } else if command.eq_ignore_ascii_case("exit") || command.eq_ignore_ascii_case("quit") {
        Input::of(InputType::Exit)
    } else if text == "/?" || text.eq_ignore_ascii_case("/help") {
        Input::of(InputType::Help)
    } else {
        Input {
            input_type: InputType::Message,
            content: Some(text.to_string()),
        }
    }
}
