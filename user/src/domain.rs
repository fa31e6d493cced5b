use chrono::{DateTime, Utc};
use common::error::DomainError;
use uuid::Uuid;

const MAX_FIELD_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: &str, email: &str) -> Result<Self, DomainError> {
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name: validate_name(name)?,
            email: validate_email(email)?,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies new details. Returns the updated user and the names of the
    /// fields that changed, or `None` when nothing changed.
    pub fn with_details(
        &self,
        name: &str,
        email: &str,
    ) -> Result<Option<(User, Vec<String>)>, DomainError> {
        let name = validate_name(name)?;
        let email = validate_email(email)?;

        let mut changed = Vec::new();
        if name != self.name {
            changed.push("name".to_string());
        }
        if email != self.email {
            changed.push("email".to_string());
        }
        if changed.is_empty() {
            return Ok(None);
        }

        let updated = User {
            name,
            email,
            updated_at: Utc::now(),
            ..self.clone()
        };
        Ok(Some((updated, changed)))
    }

    pub fn to_proto(&self) -> proto::user::User {
        proto::user::User {
            id: self.id.to_string(),
            name: self.name.clone(),
            email: self.email.clone(),
            created_at: self.created_at.timestamp(),
            updated_at: self.updated_at.timestamp(),
        }
    }
}

pub fn parse_id(id: &str) -> Result<Uuid, DomainError> {
    Uuid::parse_str(id.trim()).map_err(|e| DomainError::validation(format!("invalid user ID: {e}")))
}

fn validate_name(name: &str) -> Result<String, DomainError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name is required"));
    }
    if name.chars().count() > MAX_FIELD_LEN {
        return Err(DomainError::validation("name must be at most 255 characters"));
    }
    Ok(name.to_owned())
}

fn validate_email(email: &str) -> Result<String, DomainError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(DomainError::validation("email is required"));
    }
    if email.chars().count() > MAX_FIELD_LEN || !is_plausible_email(email) {
        return Err(DomainError::validation(format!("invalid email: {email}")));
    }
    Ok(email.to_owned())
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}
