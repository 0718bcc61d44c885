mod delivery;

use delivery::{DeliveryError, EmailDelivery, OutgoingEmail, ResendMailer};
use lambda_http::{
    http::{Method, StatusCode},
    run, service_fn, Body, Error, Request, RequestPayloadExt, Response,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::OnceLock;
use tracing::{error, warn};

const FROM_ADDRESS: &str = "Scouta Support <support@scout-a.com>";
const TO_ADDRESS: &str = "support@scout-a.com";
const SUBJECT_PREFIX: &str = "[Support] ";

// Deliberately loose: it matches what the web form already accepts, not RFC 5322.
const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

const MAX_FIELD_CHARS: usize = 8000;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let handler = SupportEmailHandler::<ResendMailer>::new();
    run(service_fn(|event| handler.handle(event))).await
}

struct SupportEmailHandler<MailerT: EmailDelivery> {
    mailer: MailerT,
}

impl<MailerT: EmailDelivery> SupportEmailHandler<MailerT> {
    fn new() -> Self {
        Self {
            mailer: MailerT::create(),
        }
    }

    async fn handle(&self, event: Request) -> Result<Response<Body>, Error> {
        if event.method() != Method::POST {
            let error = SupportFormError::MethodNotAllowed;
            error.log();
            return Ok(error.into_response());
        }
        match self.process_submission(event).await {
            Ok(()) => Ok(success_response()),
            Err(error) => {
                error.log();
                Ok(error.into_response())
            }
        }
    }

    async fn process_submission(&self, event: Request) -> Result<(), SupportFormError> {
        let message = match event.payload::<SupportFormMessage>() {
            Ok(Some(message)) => message,
            Ok(None) => SupportFormMessage::default(),
            Err(error) => {
                return Err(SupportFormError::Unexpected(format!(
                    "Error parsing request body: {error}"
                )))
            }
        };
        if message.is_spam() {
            // Bots which fill the hidden field get the same response as a real
            // submission, so the detection stays invisible to them.
            warn!("Honeypot field was filled in; dropping submission");
            return Ok(());
        }
        let validated = message.validate()?;
        self.mailer
            .send(&validated.to_email())
            .await
            .map_err(DeliveryError::into_support_form_error)
    }
}

fn success_response() -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(json!({ "ok": true }).to_string().into())
        .unwrap()
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(EMAIL_PATTERN).unwrap())
}

/// Bounds a free-text field to its first `MAX_FIELD_CHARS` characters before
/// it is embedded in an outgoing mail.
fn clamp(value: &str) -> &str {
    match value.char_indices().nth(MAX_FIELD_CHARS) {
        Some((boundary, _)) => &value[..boundary],
        None => value,
    }
}

#[derive(Deserialize, Debug, Default)]
struct SupportFormMessage {
    name: Option<String>,
    email: Option<String>,
    subject: Option<String>,
    message: Option<String>,
    hp: Option<String>,
}

impl SupportFormMessage {
    fn is_spam(&self) -> bool {
        self.hp.as_deref().is_some_and(|value| !value.trim().is_empty())
    }

    fn validate(&self) -> Result<ValidatedSupportFormMessage, SupportFormError> {
        let SupportFormMessage {
            name: Some(name),
            email: Some(email),
            subject: Some(subject),
            message: Some(message),
            ..
        } = self
        else {
            return Err(SupportFormError::MissingFields);
        };

        if [name, email, subject, message]
            .iter()
            .any(|field| field.is_empty())
        {
            return Err(SupportFormError::MissingFields);
        }
        if !email_pattern().is_match(email) {
            return Err(SupportFormError::InvalidEmail);
        }

        Ok(ValidatedSupportFormMessage {
            name,
            email,
            subject,
            message,
        })
    }
}

struct ValidatedSupportFormMessage<'a> {
    name: &'a str,
    email: &'a str,
    subject: &'a str,
    message: &'a str,
}

impl ValidatedSupportFormMessage<'_> {
    fn to_email(&self) -> OutgoingEmail {
        OutgoingEmail {
            from: FROM_ADDRESS.into(),
            to: TO_ADDRESS.into(),
            subject: format!("{SUBJECT_PREFIX}{}", clamp(self.subject)),
            html: self.html_body(),
            text: self.text_body(),
        }
    }

    // Field values are clamped but not HTML-escaped. The form has always
    // behaved this way and the mail only ever goes to the support inbox.
    fn html_body(&self) -> String {
        format!(
            r#"<div style="font-family:Inter,Segoe UI,Arial,sans-serif">
  <h2>New Support Message</h2>
  <p><strong>From:</strong> {name} &lt;{email}&gt;</p>
  <p><strong>Subject:</strong> {subject}</p>
  <pre style="white-space:pre-wrap;background:#f6f7f9;padding:12px;border-radius:8px;border:1px solid #e5e7eb">{message}</pre>
</div>
"#,
            name = clamp(self.name),
            email = clamp(self.email),
            subject = clamp(self.subject),
            message = clamp(self.message),
        )
    }

    fn text_body(&self) -> String {
        format!(
            "New Support Message\nFrom: {name} <{email}>\nSubject: {subject}\n\n{message}\n",
            name = clamp(self.name),
            email = clamp(self.email),
            subject = clamp(self.subject),
            message = clamp(self.message),
        )
    }
}

#[derive(Debug)]
enum SupportFormError {
    MethodNotAllowed,
    MissingFields,
    InvalidEmail,
    Delivery(String),
    Unexpected(String),
}

impl SupportFormError {
    fn log(&self) {
        match self {
            SupportFormError::MethodNotAllowed => {
                error!("Rejected support form submission with wrong HTTP method");
            }
            SupportFormError::MissingFields => {
                error!("Client error processing support form: missing required fields");
            }
            SupportFormError::InvalidEmail => {
                error!("Client error processing support form: invalid email address");
            }
            SupportFormError::Delivery(description) => {
                error!("Error delivering support email: {description}");
            }
            SupportFormError::Unexpected(description) => {
                error!("Unexpected error processing support form: {description}");
            }
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            SupportFormError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            SupportFormError::MissingFields | SupportFormError::InvalidEmail => {
                StatusCode::BAD_REQUEST
            }
            SupportFormError::Delivery(_) | SupportFormError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn public_message(&self) -> &str {
        match self {
            SupportFormError::MethodNotAllowed => "Method Not Allowed",
            SupportFormError::MissingFields => "Missing required fields",
            SupportFormError::InvalidEmail => "Invalid email",
            SupportFormError::Delivery(description) | SupportFormError::Unexpected(description) => {
                description
            }
        }
    }

    fn into_response(self) -> Response<Body> {
        let mut builder = Response::builder()
            .status(self.status_code())
            .header("Content-Type", "application/json");
        if let SupportFormError::MethodNotAllowed = self {
            builder = builder.header("Allow", "POST");
        }
        builder
            .body(json!({ "error": self.public_message() }).to_string().into())
            .unwrap()
    }
}

impl std::fmt::Display for SupportFormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupportFormError::MethodNotAllowed => write!(f, "Method not allowed"),
            SupportFormError::MissingFields => write!(f, "Missing required fields"),
            SupportFormError::InvalidEmail => write!(f, "Invalid email address"),
            SupportFormError::Delivery(description) => write!(f, "Delivery error: {description}"),
            SupportFormError::Unexpected(description) => {
                write!(f, "Unexpected error: {description}")
            }
        }
    }
}

impl std::error::Error for SupportFormError {}
