use axum::{
    body::Body,
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::post,
    Router,
};
use hyper::header;
use log::debug;
use serde::Deserialize;
use serde_json::json;
use std::{borrow::Cow, future::Future, sync::Arc};
use tokio::sync::watch::{self, error::RecvError, Receiver, Sender};

pub const FAKE_RESEND_PORT: u16 = 5284;
pub const FAKE_RESEND_API_KEY: &str = "re_arbitrary_api_key";
const EMAILS_PATH: &str = "/emails";

/// Stand-in for the Resend email API which records the payloads it accepts.
pub struct FakeResendServer {
    config: FakeResendConfig,
    sender: Arc<Sender<ReceivedEmail>>,
    receiver: tokio::sync::Mutex<Receiver<ReceivedEmail>>,
}

#[derive(Clone)]
struct FakeResendConfig {
    required_api_key: Cow<'static, str>,
    rejection: Option<(u16, String)>,
    return_invalid_response: bool,
}

#[derive(Clone)]
struct AppState {
    config: FakeResendConfig,
    sender: Arc<Sender<ReceivedEmail>>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct ReceivedEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl FakeResendServer {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(ReceivedEmail::default());
        Self {
            config: FakeResendConfig {
                required_api_key: FAKE_RESEND_API_KEY.into(),
                rejection: None,
                return_invalid_response: false,
            },
            sender: Arc::new(sender),
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }

    pub fn setup_environment() {
        std::env::set_var(
            "RESEND_API_URL",
            format!("http://localhost:{FAKE_RESEND_PORT}{EMAILS_PATH}"),
        );
        std::env::set_var("RESEND_API_KEY", FAKE_RESEND_API_KEY);
    }

    pub fn reject_with(mut self, status: u16, message: impl AsRef<str>) -> Self {
        self.config.rejection = Some((status, message.as_ref().into()));
        self
    }

    pub fn return_invalid_response(mut self) -> Self {
        self.config.return_invalid_response = true;
        self
    }

    /// The listener is bound before the future is spawned, so requests sent
    /// right after `tokio::spawn(server.serve())` cannot be refused.
    pub fn serve(&self) -> impl Future<Output = ()> + Send + 'static {
        let state = AppState {
            config: self.config.clone(),
            sender: Arc::clone(&self.sender),
        };
        let listener = std::net::TcpListener::bind(format!("0.0.0.0:{FAKE_RESEND_PORT}")).unwrap();
        listener.set_nonblocking(true).unwrap();
        async move {
            let app = Router::new()
                .route(EMAILS_PATH, post(send_email))
                .with_state(state);
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        }
    }

    pub async fn last_email(&self) -> Result<ReceivedEmail, RecvError> {
        let mut receiver = self.receiver.lock().await;
        receiver.changed().await?;
        let email = receiver.borrow_and_update().clone();
        drop(receiver);
        Ok(email)
    }
}

impl Default for FakeResendServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn send_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ReceivedEmail>,
) -> Response<Body> {
    debug!("Received email payload: {payload:?}");
    if state.config.return_invalid_response {
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("Invalid response"))
            .unwrap();
    }
    let expected_authorization = format!("Bearer {}", state.config.required_api_key);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some(expected_authorization.as_str());
    if !authorized {
        return Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "statusCode": 401,
                    "name": "validation_error",
                    "message": "API key is invalid",
                })
                .to_string(),
            ))
            .unwrap();
    }
    if let Some((status, message)) = &state.config.rejection {
        return Response::builder()
            .status(*status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "statusCode": status,
                    "name": "application_error",
                    "message": message,
                })
                .to_string(),
            ))
            .unwrap();
    }
    state.sender.send(payload).unwrap();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "id": "fake-email-id" }).to_string(),
        ))
        .unwrap()
}
