use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::io::Cursor;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A credential or key required by the attempted operation is missing.
    #[error("{0}")]
    Configuration(String),
    /// Login, token exchange or refresh failed.
    #[error("{0}")]
    Authentication(String),
    /// Non-success result code unrelated to authentication.
    #[error("{0}")]
    Vendor(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Request failed: {0}")]
    Transport(String),
    /// The gateway rejected the session token.
    #[error("Token invalid")]
    InvalidToken,
    #[error("Token storage: {0}")]
    Storage(String),
    #[error("Encryption: {0}")]
    Crypto(String),
    #[error("Unable to format metrics")]
    FormatError,
}

impl Error {
    pub fn status(&self) -> Status {
        match self {
            Error::Authentication(_) | Error::InvalidToken => Status::Unauthorized,
            _ => Status::InternalServerError,
        }
    }
}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        log::error!("{} {} failed: {}", request.method(), request.uri(), self);

        let body = serde_json::json!({ "error": self.to_string() }).to_string();
        Response::build()
            .status(self.status())
            .sized_body(body.len(), Cursor::new(body))
            .header(ContentType::JSON)
            .ok()
    }
}
