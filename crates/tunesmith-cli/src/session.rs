use anyhow::Result;
use futures::StreamExt;

use crate::prompt::{InputType, Prompt};
use tunesmith::agent::Agent;
use tunesmith::models::message::Message;
use tunesmith::models::role::Role;

/// An interactive conversation; the history grows for as long as the session runs
pub struct Session<'a> {
    agent: Agent,
    prompt: Box<dyn Prompt + 'a>,
    messages: Vec<Message>,
}

impl<'a> Session<'a> {
    pub fn new(agent: Agent, prompt: Box<dyn Prompt + 'a>) -> Self {
        Session {
            agent,
            prompt,
            messages: Vec::new(),
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        let tool_count = self.agent.registry().tools().len();
        self.prompt
            .render(raw_message(&format!("Connected {} tools.\n", tool_count)));
        self.prompt.ready();

        loop {
            let input = self.prompt.get_input()?;
            match input.input_type {
                InputType::Message => {
                    if let Some(content) = &input.content {
                        self.messages.push(Message::user().with_text(content));
                    }
                }
                InputType::Exit => break,
                InputType::AskAgain | InputType::Help => continue,
            }

            self.prompt.show_busy();
            self.agent_process_messages().await;
            self.prompt.hide_busy();
        }
        self.prompt.close();
        Ok(())
    }

    async fn agent_process_messages(&mut self) {
        let mut stream = match self.agent.reply(&self.messages).await {
            Ok(stream) => stream,
            Err(e) => {
                self.prompt.render_error(&e.to_string());
                return;
            }
        };
        loop {
            tokio::select! {
                response = stream.next() => {
                    match response {
                        Some(Ok(message)) => {
                            self.messages.push(message.clone());
                            self.prompt.render(Box::new(message));
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "reply failed");
                            self.prompt.render_error(&e.to_string());
                            break;
                        }
                        None => break,
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    drop(stream);
                    // Drop the assistant's partial work and the user message that started it
                    while let Some(message) = self.messages.pop() {
                        if message.role == Role::User && !message.text().is_empty() {
                            break;
                        }
                    }

                    self.prompt.render(raw_message(" Interrupt: Resetting conversation to before the last sent message...\n"));
                    break;
                }
            }
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

fn raw_message(content: &str) -> Box<Message> {
    Box::new(Message::assistant().with_text(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{parse_input, Input};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tunesmith::models::tool::Tool;
    use tunesmith::providers::base::{Provider, Usage};
    use tunesmith::registry::ToolRegistry;

    /// Feeds canned lines and records what the session shows
    struct ScriptedPrompt {
        lines: VecDeque<&'static str>,
        rendered: Arc<Mutex<Vec<String>>>,
        errors: Arc<Mutex<Vec<String>>>,
    }

    impl Prompt for ScriptedPrompt {
        fn render(&mut self, message: Box<Message>) {
            self.rendered.lock().unwrap().push(message.text());
        }

        fn render_error(&mut self, error: &str) {
            self.errors.lock().unwrap().push(error.to_string());
        }

        fn get_input(&mut self) -> Result<Input> {
            Ok(self
                .lines
                .pop_front()
                .map(parse_input)
                .unwrap_or(Input {
                    input_type: InputType::Exit,
                    content: None,
                }))
        }

        fn show_busy(&mut self) {}
        fn hide_busy(&self) {}
        fn close(&self) {}
        fn ready(&self) {}
    }

    /// Replies with the size of the history it was shown
    struct CountingProvider;

    #[async_trait]
    impl Provider for CountingProvider {
        async fn complete(
            &self,
            _system: &str,
            messages: &[Message],
            _tools: &[Tool],
        ) -> anyhow::Result<(Message, Usage)> {
            let last = messages.last().map(|m| m.text()).unwrap_or_default();
            anyhow::ensure!(last != "break", "model unavailable");
            Ok((
                Message::assistant().with_text(format!("{} messages so far", messages.len())),
                Usage::default(),
            ))
        }
    }

    fn session(
        lines: Vec<&'static str>,
    ) -> (Session<'static>, Arc<Mutex<Vec<String>>>, Arc<Mutex<Vec<String>>>) {
        let rendered = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let prompt = ScriptedPrompt {
            lines: lines.into(),
            rendered: rendered.clone(),
            errors: errors.clone(),
        };
        let agent = Agent::new(Box::new(CountingProvider), ToolRegistry::empty());
        (Session::new(agent, Box::new(prompt)), rendered, errors)
    }

    #[tokio::test]
    async fn test_history_is_reused_across_turns() {
        let (mut session, rendered, _) =
            session(vec!["chill playlist please", "", "call it Sunday", "QUIT", "never read"]);
        session.start().await.unwrap();

        let rendered = rendered.lock().unwrap();
        assert_eq!(
            *rendered,
            vec![
                "Connected 0 tools.\n".to_string(),
                "1 messages so far".to_string(),
                "3 messages so far".to_string(),
            ]
        );
        assert_eq!(session.messages().len(), 4);
    }

    #[tokio::test]
    async fn test_errors_are_shown_and_session_continues() {
        let (mut session, rendered, errors) = session(vec!["break", "hello", "exit"]);
        session.start().await.unwrap();

        assert_eq!(errors.lock().unwrap().len(), 1);
        assert!(errors.lock().unwrap()[0].contains("model unavailable"));
        assert_eq!(rendered.lock().unwrap().last().unwrap(), "2 messages so far");
    }
}
