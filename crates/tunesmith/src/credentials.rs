//! Startup checks that the Spotify and Groq credentials exist and are accepted.
//!
//! Variables are read through a lookup function rather than the process environment
//! directly, so each check can be exercised in isolation. Nothing here is fatal: the caller
//! decides what to do with a [`CredentialReport`].

use reqwest::{Client, Response, StatusCode};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

pub const SPOTIFY_CLIENT_ID: &str = "SPOTIFY_CLIENT_ID";
pub const SPOTIFY_CLIENT_SECRET: &str = "SPOTIFY_CLIENT_SECRET";
pub const SPOTIFY_REDIRECT_URI: &str = "SPOTIFY_REDIRECT_URI";
pub const GROQ_API_KEY: &str = "GROQ_API_KEY";

pub const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const GROQ_MODELS_URL: &str = "https://api.groq.com/openai/v1/models";

const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of checking one integration
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Valid,
    /// Required variables that are unset or empty; no request was made
    Missing(Vec<&'static str>),
    /// The service answered but refused the credentials
    Rejected { status: u16, body: String },
    /// The service could not be reached
    Unreachable(String),
}

impl CheckOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, CheckOutcome::Valid)
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOutcome::Valid => write!(f, "valid"),
            CheckOutcome::Missing(vars) => write!(f, "missing {}", vars.join(", ")),
            CheckOutcome::Rejected { status, body } => {
                write!(f, "rejected with status {}: {}", status, body)
            }
            CheckOutcome::Unreachable(reason) => write!(f, "unreachable: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CredentialReport {
    pub spotify: CheckOutcome,
    pub groq: CheckOutcome,
}

impl CredentialReport {
    pub fn all_valid(&self) -> bool {
        self.spotify.is_valid() && self.groq.is_valid()
    }
}

impl fmt::Display for CredentialReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Spotify: {}", self.spotify)?;
        write!(f, "Groq: {}", self.groq)
    }
}

/// Reads a variable, treating empty values as unset
pub type Lookup<'a> = &'a (dyn Fn(&str) -> Option<String> + Send + Sync);

pub fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub struct CredentialValidator {
    client: Client,
    spotify_token_url: String,
    groq_models_url: String,
}

impl CredentialValidator {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder().timeout(CHECK_TIMEOUT).build()?;
        Ok(Self {
            client,
            spotify_token_url: SPOTIFY_TOKEN_URL.to_string(),
            groq_models_url: GROQ_MODELS_URL.to_string(),
        })
    }

    pub fn with_endpoints(
        mut self,
        spotify_token_url: impl Into<String>,
        groq_models_url: impl Into<String>,
    ) -> Self {
        self.spotify_token_url = spotify_token_url.into();
        self.groq_models_url = groq_models_url.into();
        self
    }

    /// Exchange the client id and secret for an app token
    pub async fn check_spotify(&self, lookup: Lookup<'_>) -> CheckOutcome {
        let id = lookup(SPOTIFY_CLIENT_ID);
        let secret = lookup(SPOTIFY_CLIENT_SECRET);
        let redirect = lookup(SPOTIFY_REDIRECT_URI);

        let missing: Vec<&'static str> = [
            (SPOTIFY_CLIENT_ID, id.is_none()),
            (SPOTIFY_CLIENT_SECRET, secret.is_none()),
            (SPOTIFY_REDIRECT_URI, redirect.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        let (Some(id), Some(secret), Some(_)) = (id, secret, redirect) else {
            warn!(missing = ?missing, "Spotify credentials are incomplete");
            return CheckOutcome::Missing(missing);
        };

        let response = self
            .client
            .post(&self.spotify_token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", id.as_str()),
                ("client_secret", secret.as_str()),
            ])
            .send()
            .await;
        let outcome = classify(response).await;
        log_outcome("Spotify", &outcome);
        outcome
    }

    /// List models with the API key
    pub async fn check_groq(&self, lookup: Lookup<'_>) -> CheckOutcome {
        let Some(key) = lookup(GROQ_API_KEY) else {
            warn!("Groq API key is not set");
            return CheckOutcome::Missing(vec![GROQ_API_KEY]);
        };

        let response = self
            .client
            .get(&self.groq_models_url)
            .bearer_auth(key)
            .send()
            .await;
        let outcome = classify(response).await;
        log_outcome("Groq", &outcome);
        outcome
    }

    pub async fn check_all(&self, lookup: Lookup<'_>) -> CredentialReport {
        let spotify = self.check_spotify(lookup).await;
        let groq = self.check_groq(lookup).await;
        let report = CredentialReport { spotify, groq };
        if report.all_valid() {
            info!("all credentials validated");
        }
        report
    }

    pub async fn check_env(&self) -> CredentialReport {
        self.check_all(&env_lookup).await
    }
}

/// Only a 200 counts as valid; any other answer is kept with its status and body
async fn classify(response: reqwest::Result<Response>) -> CheckOutcome {
    match response {
        Ok(response) if response.status() == StatusCode::OK => CheckOutcome::Valid,
        Ok(response) => {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            CheckOutcome::Rejected { status, body }
        }
        Err(e) => CheckOutcome::Unreachable(e.to_string()),
    }
}

fn log_outcome(service: &str, outcome: &CheckOutcome) {
    match outcome {
        CheckOutcome::Valid => info!(service, "credentials are valid"),
        CheckOutcome::Rejected { status, body } => {
            warn!(service, status, body = %body, "credentials were rejected")
        }
        other => warn!(service, outcome = %other, "credential check failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn full_env() -> HashMap<String, String> {
        vars(&[
            (SPOTIFY_CLIENT_ID, "client-id"),
            (SPOTIFY_CLIENT_SECRET, "client-secret"),
            (SPOTIFY_REDIRECT_URI, "http://127.0.0.1:8888/callback"),
            (GROQ_API_KEY, "gsk_test"),
        ])
    }

    async fn setup() -> (MockServer, CredentialValidator) {
        let server = MockServer::start().await;
        let validator = CredentialValidator::new().unwrap().with_endpoints(
            format!("{}/api/token", server.uri()),
            format!("{}/openai/v1/models", server.uri()),
        );
        (server, validator)
    }

    #[tokio::test]
    async fn test_valid_credentials() {
        let (server, validator) = setup().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=client-id"))
            .and(body_string_contains("client_secret=client-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "token",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/openai/v1/models"))
            .and(header("authorization", "Bearer gsk_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let env = full_env();
        let lookup = move |name: &str| env.get(name).cloned();
        let report = validator.check_all(&lookup).await;

        assert_eq!(report.spotify, CheckOutcome::Valid);
        assert_eq!(report.groq, CheckOutcome::Valid);
        assert!(report.all_valid());
    }

    #[tokio::test]
    async fn test_missing_secret_makes_no_request() {
        let (server, validator) = setup().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut env = full_env();
        env.remove(SPOTIFY_CLIENT_SECRET);
        let lookup = move |name: &str| env.get(name).cloned();

        let outcome = validator.check_spotify(&lookup).await;
        assert_eq!(outcome, CheckOutcome::Missing(vec![SPOTIFY_CLIENT_SECRET]));
        assert!(!outcome.is_valid());
    }

    #[tokio::test]
    async fn test_missing_groq_key() {
        let (server, validator) = setup().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let lookup = |_: &str| -> Option<String> { None };
        assert_eq!(
            validator.check_groq(&lookup).await,
            CheckOutcome::Missing(vec![GROQ_API_KEY])
        );
    }

    #[tokio::test]
    async fn test_rejected_credentials_keep_status_and_body() {
        let (server, validator) = setup().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_client"}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/openai/v1/models"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Invalid API Key"))
            .mount(&server)
            .await;

        let env = full_env();
        let lookup = move |name: &str| env.get(name).cloned();
        let report = validator.check_all(&lookup).await;

        assert_eq!(
            report.spotify,
            CheckOutcome::Rejected {
                status: 400,
                body: r#"{"error":"invalid_client"}"#.to_string()
            }
        );
        assert_eq!(
            report.groq,
            CheckOutcome::Rejected {
                status: 401,
                body: "Invalid API Key".to_string()
            }
        );
        assert!(!report.all_valid());
        assert!(report.to_string().contains("Groq: rejected with status 401"));
    }

    #[tokio::test]
    async fn test_other_success_statuses_are_not_valid() {
        let (server, validator) = setup().await;
        Mock::given(method("GET"))
            .and(path("/openai/v1/models"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let lookup = |_: &str| -> Option<String> { Some("gsk_test".to_string()) };
        assert_eq!(
            validator.check_groq(&lookup).await,
            CheckOutcome::Rejected {
                status: 204,
                body: String::new()
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let validator = CredentialValidator::new()
            .unwrap()
            .with_endpoints("http://127.0.0.1:1/api/token", "http://127.0.0.1:1/models");
        let env = full_env();
        let lookup = move |name: &str| env.get(name).cloned();

        assert!(matches!(
            validator.check_groq(&lookup).await,
            CheckOutcome::Unreachable(_)
        ));
    }
}
