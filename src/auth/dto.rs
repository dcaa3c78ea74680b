use serde::{Deserialize, Serialize};

/// Form body shared by `/login` and `/signup`. Fields are optional so that a
/// missing one maps to the route's own status code instead of a form rejection.
#[derive(Deserialize)]
pub struct CredentialsForm {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl CredentialsForm {
    /// Both fields, if present and non-blank. The username is returned as sent.
    pub fn fields(&self) -> Option<(&str, &str)> {
        let username = self.username.as_deref().filter(|u| !u.trim().is_empty())?;
        let password = self.password.as_deref().filter(|p| !p.is_empty())?;
        Some((username, password))
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}
