use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

/// How a field is rendered and which value handling applies to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Text,
    Password,
    Checkbox,
    Submit,
}

/// Input filters applied before any validation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Trim,
    StripTags,
}

/// Declarative description of one form field: name, kind, filters,
/// length bounds and the presentational attributes the rendering layer
/// consumes verbatim. Pure data, interpreted by `validate_login` and
/// served as-is to whoever draws the form.
#[derive(Debug, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: InputKind,
    pub label: &'static str,
    pub required: bool,
    pub filters: &'static [Filter],
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    pub attrs: &'static [(&'static str, &'static str)],
}

/// The login form contract. The checkbox travels as "1"/"0" and defaults
/// to unchecked when absent from the submission.
pub const LOGIN_FORM: &[FieldSpec] = &[
    FieldSpec {
        name: "username",
        kind: InputKind::Text,
        label: "Usuario",
        required: true,
        filters: &[Filter::Trim, Filter::StripTags],
        min_len: Some(3),
        max_len: Some(50),
        attrs: &[
            ("id", "username"),
            ("class", "form-control"),
            ("placeholder", "Nombre de usuario"),
            ("autofocus", "autofocus"),
        ],
    },
    FieldSpec {
        name: "password",
        kind: InputKind::Password,
        label: "Contraseña",
        required: true,
        filters: &[Filter::Trim],
        min_len: Some(6),
        max_len: None,
        attrs: &[
            ("id", "password"),
            ("class", "form-control"),
            ("placeholder", "Contraseña"),
        ],
    },
    FieldSpec {
        name: "remember_me",
        kind: InputKind::Checkbox,
        label: "Recordarme",
        required: false,
        filters: &[],
        min_len: None,
        max_len: None,
        attrs: &[("id", "remember_me")],
    },
    FieldSpec {
        name: "submit",
        kind: InputKind::Submit,
        label: "",
        required: false,
        filters: &[],
        min_len: None,
        max_len: None,
        attrs: &[("id", "submitbtn"), ("class", "btn btn-primary"), ("value", "Entrar")],
    },
];

const MSG_REQUIRED: &str = "Este campo es obligatorio y no puede estar vacío";

fn msg_too_short(min: usize) -> String {
    format!("Debe tener al menos {min} caracteres")
}

fn msg_too_long(max: usize) -> String {
    format!("No puede tener más de {max} caracteres")
}

/// One field-scoped validation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// The filtered values of an accepted login submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginData {
    pub username: String,
    pub password: String,
    pub remember_me: bool,
}

fn apply_filters(field: &FieldSpec, raw: &str) -> String {
    lazy_static! {
        static ref TAG_RE: Regex = Regex::new(r"<[^>]*>").unwrap();
    }
    let mut value = raw.to_string();
    for filter in field.filters {
        value = match filter {
            Filter::Trim => value.trim().to_string(),
            Filter::StripTags => TAG_RE.replace_all(&value, "").into_owned(),
        };
    }
    value
}

fn field_messages(field: &FieldSpec, value: &str) -> Vec<String> {
    let mut messages = Vec::new();
    if value.is_empty() {
        if field.required {
            messages.push(MSG_REQUIRED.to_string());
        }
        // Length rules only apply once a value was supplied.
        return messages;
    }
    let length = value.chars().count();
    if let Some(min) = field.min_len {
        if length < min {
            messages.push(msg_too_short(min));
        }
    }
    if let Some(max) = field.max_len {
        if length > max {
            messages.push(msg_too_long(max));
        }
    }
    messages
}

/// Runs the login form contract over a raw submission. Returns the
/// filtered values, or every field-scoped message when validation fails.
pub fn validate_login(raw: &HashMap<String, String>) -> Result<LoginData, Vec<FieldError>> {
    let mut errors = Vec::new();
    let mut username = String::new();
    let mut password = String::new();
    let mut remember_me = false;

    for field in LOGIN_FORM {
        match field.kind {
            InputKind::Submit => {}
            InputKind::Checkbox => {
                remember_me = raw.get(field.name).map(String::as_str) == Some("1");
            }
            InputKind::Text | InputKind::Password => {
                let value =
                    apply_filters(field, raw.get(field.name).map(String::as_str).unwrap_or(""));
                for message in field_messages(field, &value) {
                    errors.push(FieldError {
                        field: field.name,
                        message,
                    });
                }
                match field.name {
                    "username" => username = value,
                    "password" => password = value,
                    _ => {}
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(LoginData {
            username,
            password,
            remember_me,
        })
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn contract_declares_the_four_fields() {
        let names: Vec<_> = LOGIN_FORM.iter().map(|f| f.name).collect();
        assert_eq!(names, ["username", "password", "remember_me", "submit"]);
        assert_eq!(LOGIN_FORM[0].min_len, Some(3));
        assert_eq!(LOGIN_FORM[0].max_len, Some(50));
        assert_eq!(LOGIN_FORM[1].min_len, Some(6));
        assert_eq!(LOGIN_FORM[1].kind, InputKind::Password);
    }

    #[test]
    fn accepts_a_valid_submission_and_trims() {
        let data = validate_login(&submission(&[
            ("username", "  ana  "),
            ("password", " secreto "),
            ("remember_me", "1"),
        ]))
        .expect("valid submission");
        assert_eq!(data.username, "ana");
        assert_eq!(data.password, "secreto");
        assert!(data.remember_me);
    }

    #[test]
    fn remember_me_defaults_to_unchecked() {
        let data = validate_login(&submission(&[
            ("username", "ana"),
            ("password", "secreto"),
        ]))
        .expect("valid submission");
        assert!(!data.remember_me);

        let data = validate_login(&submission(&[
            ("username", "ana"),
            ("password", "secreto"),
            ("remember_me", "0"),
        ]))
        .expect("valid submission");
        assert!(!data.remember_me);
    }

    #[test]
    fn short_username_cites_the_minimum() {
        let errors = validate_login(&submission(&[
            ("username", "ab"),
            ("password", "secreto"),
        ]))
        .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "username");
        assert_eq!(errors[0].message, "Debe tener al menos 3 caracteres");
    }

    #[test]
    fn long_username_cites_the_maximum() {
        let long = "a".repeat(51);
        let errors = validate_login(&submission(&[
            ("username", &long),
            ("password", "secreto"),
        ]))
        .unwrap_err();
        assert_eq!(errors[0].field, "username");
        assert_eq!(errors[0].message, "No puede tener más de 50 caracteres");

        // Exactly at the bound is fine.
        let at_bound = "a".repeat(50);
        assert!(validate_login(&submission(&[
            ("username", &at_bound),
            ("password", "secreto"),
        ]))
        .is_ok());
    }

    #[test]
    fn short_password_cites_the_minimum() {
        let errors = validate_login(&submission(&[
            ("username", "ana"),
            ("password", "12345"),
        ]))
        .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "password");
        assert_eq!(errors[0].message, "Debe tener al menos 6 caracteres");
    }

    #[test]
    fn bounds_count_characters_not_bytes() {
        // Four characters, seven bytes in UTF-8.
        let data = validate_login(&submission(&[
            ("username", "ñoñó"),
            ("password", "señora"),
        ]))
        .expect("multibyte input within bounds");
        assert_eq!(data.username, "ñoñó");
    }

    #[test]
    fn missing_fields_yield_required_messages() {
        let errors = validate_login(&HashMap::new()).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.message == MSG_REQUIRED));
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, ["username", "password"]);
    }

    #[test]
    fn tags_are_stripped_before_length_checks() {
        let data = validate_login(&submission(&[
            ("username", "<b>anita</b>"),
            ("password", "secreto"),
        ]))
        .expect("tags stripped, length ok");
        assert_eq!(data.username, "anita");

        // Stripping may push the value under the minimum.
        let errors = validate_login(&submission(&[
            ("username", "<i>ab</i>"),
            ("password", "secreto"),
        ]))
        .unwrap_err();
        assert_eq!(errors[0].message, "Debe tener al menos 3 caracteres");
    }

    #[test]
    fn whitespace_only_input_is_treated_as_missing() {
        let errors = validate_login(&submission(&[
            ("username", "   "),
            ("password", "secreto"),
        ]))
        .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "username");
        assert_eq!(errors[0].message, MSG_REQUIRED);
    }
}
