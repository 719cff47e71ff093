use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tunesmith::models::message::Message;

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

// Each request starts a fresh conversation from the caller's message alone
async fn handler(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    let Some(agent) = state.agent else {
        return Json(ErrorResponse {
            error: "Agent not initialized".to_string(),
        })
        .into_response();
    };

    let mut messages = vec![Message::user().with_text(request.message)];
    match agent.respond(&mut messages).await {
        Ok(response) => Json(ChatResponse { response }).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "chat request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;
    use tunesmith::agent::Agent;
    use tunesmith::models::tool::Tool;
    use tunesmith::providers::base::{Provider, Usage};
    use tunesmith::registry::ToolRegistry;

    /// Answers with the last user text after a short pause, so concurrent requests overlap
    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        async fn complete(
            &self,
            _system: &str,
            messages: &[Message],
            _tools: &[Tool],
        ) -> anyhow::Result<(Message, Usage)> {
            let last = messages.last().map(|m| m.text()).unwrap_or_default();
            anyhow::ensure!(messages.len() == 1, "history leaked between requests");
            if last == "fail" {
                anyhow::bail!("Server error: 503 Service Unavailable");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok((
                Message::assistant().with_text(format!("echo: {}", last)),
                Usage::default(),
            ))
        }
    }

    fn app(agent: Option<Agent>) -> Router {
        routes(AppState::new(agent))
    }

    fn echo_agent() -> Agent {
        Agent::new(Box::new(EchoProvider), ToolRegistry::empty())
    }

    fn chat_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_chat_returns_final_answer() {
        let response = app(Some(echo_agent()))
            .oneshot(chat_request(json!({"message": "hello"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"response": "echo: hello"}));
    }

    #[tokio::test]
    async fn test_uninitialized_agent() {
        let response = app(None)
            .oneshot(chat_request(json!({"message": "make me a playlist"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"error": "Agent not initialized"})
        );
    }

    #[tokio::test]
    async fn test_model_failure_becomes_error_payload() {
        let response = app(Some(echo_agent()))
            .oneshot(chat_request(json!({"message": "fail"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let response = app(Some(echo_agent()))
            .oneshot(chat_request(json!({"text": "wrong field"})))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_isolated() {
        let router = app(Some(echo_agent()));

        let requests = (0..8).map(|i| {
            let router = router.clone();
            async move {
                let response = router
                    .oneshot(chat_request(json!({"message": format!("request {}", i)})))
                    .await
                    .unwrap();
                (i, json_body(response).await)
            }
        });

        let handles: Vec<_> = requests.map(tokio::spawn).collect();
        for handle in handles {
            let (i, body) = handle.await.unwrap();
            assert_eq!(body, json!({"response": format!("echo: request {}", i)}));
        }
    }
}
