use serde::Serialize;
use time::format_description::well_known::Rfc3339;

use crate::users::entity::User;
use crate::users::forms::FieldError;

/// Public part of a user returned to the client. Never carries the
/// password hash.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: String,
    pub created_at: Option<String>,
    pub active: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            created_at: user.created_at.and_then(|t| t.format(&Rfc3339).ok()),
            active: user.active,
        }
    }
}

/// Response returned after a successful login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub username: String,
    pub remember_me: bool,
}

/// Authenticated-state read for the presentation layer.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub authenticated: bool,
    pub identity: Option<String>,
}

/// Body returned when the login form fails validation.
#[derive(Debug, Serialize)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}
