use anyhow::{anyhow, Result};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::message::{Message, ToolRequest};
use crate::policy::{ConversationPolicy, PlaylistTally};
use crate::providers::base::Provider;
use crate::registry::ToolRegistry;

pub const DEFAULT_MAX_TURNS: usize = 12;
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Where a reply currently stands
enum LoopState {
    /// Ask the model what to do next; `turn` counts reasoning steps from 1
    Reasoning { turn: usize },
    /// Run the tool requests from the last reasoning step, in order
    Acting {
        turn: usize,
        requests: Vec<ToolRequest>,
    },
    Done,
}

/// Agent integrates a hosted LLM with the tools it may use on the user's behalf
pub struct Agent {
    provider: Box<dyn Provider>,
    registry: ToolRegistry,
    policy: ConversationPolicy,
    max_turns: usize,
    tool_timeout: Duration,
}

impl Agent {
    /// Create a new Agent with the default conversation policy
    pub fn new(provider: Box<dyn Provider>, registry: ToolRegistry) -> Self {
        Self {
            provider,
            registry,
            policy: ConversationPolicy::default(),
            max_turns: DEFAULT_MAX_TURNS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: ConversationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn with_tool_timeout(mut self, tool_timeout: Duration) -> Self {
        self.tool_timeout = tool_timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn system_prompt(&self) -> AgentResult<String> {
        self.policy
            .render(&self.registry.instructions())
            .map_err(|e| AgentError::Internal(e.to_string()))
    }

    /// Validate and run one tool request. Every failure comes back as a value for the model.
    async fn act(&self, request: &ToolRequest, tally: &mut PlaylistTally) -> AgentResult<Vec<Content>> {
        let call = request.tool_call.clone()?;
        if self.registry.get(&call.name).is_none() {
            return Err(AgentError::ToolNotFound(call.name));
        }
        self.policy.check(&call, tally)?;

        info!(tool = %call.name, arguments = %call.arguments, "calling tool");
        match tokio::time::timeout(self.tool_timeout, self.registry.call(call.clone())).await {
            Ok(Ok(contents)) => {
                tally.record(&call);
                Ok(contents)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AgentError::ExecutionError(format!(
                "{} did not finish within {}s",
                call.name,
                self.tool_timeout.as_secs_f32()
            ))),
        }
    }

    /// Create a stream that yields each message as it's generated by the agent.
    /// This includes both the assistant's responses and the tool observations.
    pub async fn reply(&self, messages: &[Message]) -> Result<BoxStream<'_, Result<Message>>> {
        let mut messages = messages.to_vec();
        let tools = self.registry.tools().to_vec();
        let system_prompt = self.system_prompt()?;

        Ok(Box::pin(async_stream::try_stream! {
            let mut state = LoopState::Reasoning { turn: 1 };
            let mut tally = PlaylistTally::default();
            loop {
                state = match state {
                    LoopState::Reasoning { turn } => {
                        if turn > self.max_turns {
                            warn!(max_turns = self.max_turns, "giving up without a final answer");
                            Err::<(), _>(AgentError::TurnLimitExceeded(self.max_turns))?;
                        }

                        let (response, usage) = self.provider.complete(
                            &system_prompt,
                            &messages,
                            &tools,
                        ).await?;
                        debug!(turn, ?usage, "reasoning step complete");

                        messages.push(response.clone());
                        let requests: Vec<ToolRequest> =
                            response.tool_requests().into_iter().cloned().collect();
                        yield response;

                        // Let the caller render the reasoning step before tools start running
                        tokio::task::yield_now().await;

                        if requests.is_empty() {
                            LoopState::Done
                        } else {
                            LoopState::Acting { turn, requests }
                        }
                    }
                    LoopState::Acting { turn, requests } => {
                        let mut observation = Message::user();
                        for request in &requests {
                            let result = self.act(request, &mut tally).await;
                            if let Err(e) = &result {
                                warn!(id = %request.id, error = %e, "tool request failed");
                            }
                            observation = observation.with_tool_response(request.id.clone(), result);
                        }

                        messages.push(observation.clone());
                        yield observation;
                        LoopState::Reasoning { turn: turn + 1 }
                    }
                    LoopState::Done => break,
                };
            }
        }))
    }

    /// Run a reply to completion, appending every message it produces to `messages`,
    /// and return the final assistant text
    pub async fn respond(&self, messages: &mut Vec<Message>) -> Result<String> {
        let mut stream = self.reply(messages).await?;
        let mut last = None;
        while let Some(message) = stream.try_next().await? {
            messages.push(message.clone());
            last = Some(message);
        }
        last.map(|message| message.text())
            .ok_or_else(|| anyhow!("the model returned no messages"))
    }
}
