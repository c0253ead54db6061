use std::io::Cursor;

use rocket::http::{ContentType, Status};
use rocket::response;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PimbinError>;

#[derive(Error, Debug)]
pub enum PimbinError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("content type not allowed: {0}")]
    Policy(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("User already exists: {0}")]
    UserAlreadyExists(String),

    #[error("Paste id already taken: {0}")]
    PasteIdTaken(String),

    #[error("database error {0:?}")]
    Db(#[from] diesel::result::Error),

    #[error("connection pool error {0:?}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("migration error {0:?}")]
    Migration(#[from] diesel_migrations::RunMigrationsError),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("background task failed {0:?}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no token provided")]
    NoToken,

    #[error("invalid token provided")]
    InvalidToken,

    #[error("paste {0} is not owned by {1}")]
    NotOwner(String, String),
}

impl From<multer::Error> for PimbinError {
    fn from(err: multer::Error) -> Self {
        match err {
            multer::Error::StreamSizeExceeded { limit } => {
                PimbinError::Validation(format!("request body exceeds {limit} bytes"))
            }
            multer::Error::FieldSizeExceeded { limit, field_name } => PimbinError::Validation(
                format!("part {field_name:?} exceeds {limit} bytes"),
            ),
            multer::Error::StreamReadFailed(source) => {
                PimbinError::Other(anyhow!("reading request body failed: {source}"))
            }
            other => PimbinError::Validation(format!("malformed multipart body: {other}")),
        }
    }
}

impl PimbinError {
    pub fn status(&self) -> Status {
        match self {
            PimbinError::Validation(_) => Status::BadRequest,
            PimbinError::Policy(_) => Status::UnsupportedMediaType,
            PimbinError::Auth(AuthError::NotOwner(..)) => Status::Forbidden,
            PimbinError::Auth(_) => Status::Unauthorized,
            PimbinError::NotFound(_) => Status::NotFound,
            PimbinError::UserAlreadyExists(_) | PimbinError::PasteIdTaken(_) => Status::Conflict,
            _ => Status::InternalServerError,
        }
    }
}

impl<'r> response::Responder<'r, 'static> for PimbinError {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let err_str = if status == Status::InternalServerError {
            log::error!("got a generic error! {:?}", self);
            String::from("internal storage error\n")
        } else {
            format!("{}\n", self)
        };
        response::Response::build()
            .sized_body(err_str.len(), Cursor::new(err_str))
            .status(status)
            .header(ContentType::Text)
            .ok()
    }
}
