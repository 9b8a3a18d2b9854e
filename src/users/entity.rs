use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::gateway::Mapping;

/// One user account. Mirrors a row of the users table; `id` and
/// `created_at` are `None` until storage assigns them. `password` holds
/// plaintext only transiently between construction and `save_user`; rows
/// read back carry the stored hash.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: String,
    pub created_at: Option<OffsetDateTime>,
    pub active: bool,
}

impl Default for User {
    fn default() -> Self {
        Self {
            id: None,
            username: None,
            email: None,
            password: None,
            role: "user".to_string(),
            created_at: None,
            active: true,
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        _ => false,
    }
}

impl User {
    /// Builds a user from an untyped mapping (a form submission or a
    /// storage row). Present-and-non-empty values win; everything else
    /// falls back to the field default. A zero id counts as "not yet
    /// persisted".
    pub fn from_mapping(data: &Mapping) -> Self {
        let id = match data.get("id") {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.parse::<i64>().ok(),
            _ => None,
        }
        .filter(|id| *id != 0);

        let created_at = non_empty_str(data.get("created_at"))
            .and_then(|s| OffsetDateTime::parse(&s, &Rfc3339).ok());

        Self {
            id,
            username: non_empty_str(data.get("username")),
            email: non_empty_str(data.get("email")),
            password: non_empty_str(data.get("password")),
            role: non_empty_str(data.get("role")).unwrap_or_else(|| "user".to_string()),
            created_at,
            // Presence plus boolean coercion, not emptiness: absent means
            // the default (true).
            active: data.get("active").map_or(true, truthy),
        }
    }

    /// Flattens the user back into a mapping. All seven keys are always
    /// present; `created_at` travels as an RFC 3339 string.
    pub fn to_mapping(&self) -> Mapping {
        let mut data = Mapping::new();
        data.insert("id".into(), self.id.map_or(Value::Null, Value::from));
        data.insert(
            "username".into(),
            self.username.clone().map_or(Value::Null, Value::from),
        );
        data.insert(
            "email".into(),
            self.email.clone().map_or(Value::Null, Value::from),
        );
        data.insert(
            "password".into(),
            self.password.clone().map_or(Value::Null, Value::from),
        );
        data.insert("role".into(), Value::from(self.role.clone()));
        data.insert(
            "created_at".into(),
            self.created_at
                .and_then(|t| t.format(&Rfc3339).ok())
                .map_or(Value::Null, Value::from),
        );
        data.insert("active".into(), Value::from(self.active));
        data
    }
}
