//! # Forms
//!
//! Public payloads and their validation rules.
//!
//! | Field   | Rule                          |
//! |---------|-------------------------------|
//! | name    | 2-100 chars after trimming    |
//! | email   | `local@domain.tld`, <= 254    |
//! | subject | 3-200 chars after trimming    |
//! | message | 10-5000 chars after trimming  |
//!
//! Every failing field is reported, not just the first.
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const NAME_LEN: (usize, usize) = (2, 100);
pub const SUBJECT_LEN: (usize, usize) = (3, 200);
pub const MESSAGE_LEN: (usize, usize) = (10, 5000);
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_FEEDBACK_LEN: usize = 2000;
pub const MAX_PAGE_LEN: usize = 200;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$").unwrap()
});

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

impl ContactForm {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        check_len(&mut errors, "name", &self.name, NAME_LEN);

        let email = self.email.trim();
        if email.len() > MAX_EMAIL_LEN || !is_email(email) {
            errors.push(FieldError::new("email", "Please enter a valid email address"));
        }

        check_len(&mut errors, "subject", &self.subject, SUBJECT_LEN);
        check_len(&mut errors, "message", &self.message, MESSAGE_LEN);

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Trimmed copy, email lowercased.
    pub fn normalized(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            subject: self.subject.trim().to_string(),
            message: self.message.trim().to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FeedbackForm {
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
}

impl FeedbackForm {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if !(1..=5).contains(&self.rating) {
            errors.push(FieldError::new("rating", "Rating must be between 1 and 5"));
        }

        if let Some(message) = &self.message {
            if message.trim().chars().count() > MAX_FEEDBACK_LEN {
                errors.push(FieldError::new(
                    "message",
                    format!("Message must be at most {MAX_FEEDBACK_LEN} characters"),
                ));
            }
        }

        if let Some(page) = &self.page {
            if page.chars().count() > MAX_PAGE_LEN {
                errors.push(FieldError::new("page", "Page is too long"));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

pub fn is_email(input: &str) -> bool {
    EMAIL.is_match(input)
}

fn check_len(errors: &mut Vec<FieldError>, field: &str, value: &str, (min, max): (usize, usize)) {
    let len = value.trim().chars().count();

    if len < min {
        errors.push(FieldError::new(
            field,
            format!("{} must be at least {min} characters", capitalize(field)),
        ));
    } else if len > max {
        errors.push(FieldError::new(
            field,
            format!("{} must be at most {max} characters", capitalize(field)),
        ));
    }
}

fn capitalize(field: &str) -> String {
    let mut chars = field.chars();

    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ContactForm {
        ContactForm {
            name: "Grace Hopper".into(),
            email: "grace@navy.mil".into(),
            subject: "Compilers".into(),
            message: "Would love to chat about your research.".into(),
        }
    }

    fn fields(errors: Vec<FieldError>) -> Vec<String> {
        errors.into_iter().map(|e| e.field).collect()
    }

    #[test]
    fn test_valid_form() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_short_fields() {
        let form = ContactForm {
            name: " a ".into(),
            subject: "hi".into(),
            message: "too short".into(),
            ..valid()
        };

        assert_eq!(
            fields(form.validate().unwrap_err()),
            vec!["name", "subject", "message"]
        );
    }

    #[test]
    fn test_malformed_email() {
        for email in ["", "plain", "a@b", "a@@b.com", "a b@c.com", "@example.com"] {
            let form = ContactForm {
                email: email.into(),
                ..valid()
            };

            assert_eq!(fields(form.validate().unwrap_err()), vec!["email"], "{email}");
        }
    }

    #[test]
    fn test_long_message() {
        let form = ContactForm {
            message: "x".repeat(MESSAGE_LEN.1 + 1),
            ..valid()
        };

        let errors = form.validate().unwrap_err();
        assert_eq!(errors[0].message, "Message must be at most 5000 characters");
    }

    #[test]
    fn test_normalized() {
        let form = ContactForm {
            name: "  Grace ".into(),
            email: " Grace@Navy.MIL ".into(),
            ..valid()
        }
        .normalized();

        assert_eq!(form.name, "Grace");
        assert_eq!(form.email, "grace@navy.mil");
    }

    #[test]
    fn test_feedback_rating() {
        let mut feedback = FeedbackForm {
            rating: 0,
            ..Default::default()
        };
        assert!(feedback.validate().is_err());

        feedback.rating = 4;
        assert!(feedback.validate().is_ok());

        feedback.message = Some("y".repeat(MAX_FEEDBACK_LEN + 1));
        assert_eq!(fields(feedback.validate().unwrap_err()), vec!["message"]);
    }
}
