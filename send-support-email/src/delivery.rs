use crate::SupportFormError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::warn;

const RESEND_API_URL: &str = "https://api.resend.com/emails";
const API_KEY_VARIABLE: &str = "RESEND_API_KEY";

/// One outgoing mail, ready to hand to the delivery provider.
#[derive(Clone, Debug)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait EmailDelivery {
    fn create() -> Self
    where
        Self: Sized;

    async fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError>;
}

/// Delivers mail through the Resend HTTP API.
pub struct ResendMailer {
    client: Client,
    api_key: String,
}

#[async_trait]
impl EmailDelivery for ResendMailer {
    fn create() -> Self {
        // An absent key is not checked here. The API rejects the send and the
        // failure surfaces through the normal delivery-error path.
        let api_key = std::env::var(API_KEY_VARIABLE).unwrap_or_default();
        Self {
            client: Client::new(),
            api_key,
        }
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError> {
        let payload = SendEmailPayload {
            from: &email.from,
            to: [&email.to],
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
        };
        let response = self
            .client
            .post(Self::api_url().as_ref())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(DeliveryError::Transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = match response.json::<SendEmailErrorResponse>().await {
            Ok(body) => body.message,
            Err(error) => {
                warn!("Could not parse error response from the delivery API: {error}");
                None
            }
        };
        Err(DeliveryError::Api { status, message })
    }
}

impl ResendMailer {
    fn api_url() -> Cow<'static, str> {
        std::env::var("RESEND_API_URL")
            .map(Cow::Owned)
            .unwrap_or(RESEND_API_URL.into())
    }
}

#[derive(Serialize)]
struct SendEmailPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct SendEmailErrorResponse {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug)]
pub enum DeliveryError {
    Transport(reqwest::Error),
    Api {
        status: StatusCode,
        message: Option<String>,
    },
}

impl DeliveryError {
    pub fn into_support_form_error(self) -> SupportFormError {
        match self {
            DeliveryError::Transport(error) => {
                SupportFormError::Unexpected(format!("Error calling the delivery API: {error}"))
            }
            DeliveryError::Api { message, .. } => {
                SupportFormError::Delivery(message.unwrap_or_else(|| "Email failed".into()))
            }
        }
    }
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Transport(error) => write!(f, "Transport error: {error}"),
            DeliveryError::Api {
                status,
                message: Some(message),
            } => write!(f, "Delivery API returned {status}: {message}"),
            DeliveryError::Api {
                status,
                message: None,
            } => write!(f, "Delivery API returned {status}"),
        }
    }
}

impl std::error::Error for DeliveryError {}
