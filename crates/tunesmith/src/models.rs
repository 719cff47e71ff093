//! These models represent the objects passed around by the agent
//!
//! Three formats meet here:
//! - the OpenAI chat completions format, sent from the agent to the model
//! - the MCP tool format, exchanged with the servers that provide tools
//! - the plain `{ "message" }` / `{ "response" }` bodies of the chat endpoint
//!
//! We always convert those into the internal structs at the edges, so the agent loop only
//! ever deals with the types below.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
