//! Payload shape rules for the ownership hierarchy.
//!
//! # Responsibility
//! - Normalize and bound user-provided text before any write.
//! - Check order bounds and per-specification item capacity.
//!
//! # Invariants
//! - Every function is pure and validates its whole input or fails.
//! - Lengths are counted in Unicode scalar values after trimming.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const MAX_PROJECT_TITLE_CHARS: usize = 100;
pub const MAX_SPECIFICATION_CHARS: usize = 5000;
pub const MAX_ITEM_CONTENT_CHARS: usize = 1000;
pub const MAX_DISPLAY_NAME_CHARS: usize = 100;
pub const MAX_EMAIL_CHARS: usize = 255;
/// Upper bound on live bullet items per specification.
pub const MAX_BULLET_ITEMS: usize = 10;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

/// Bounded text field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    ProjectTitle,
    SpecificationContent,
    ItemContent,
    DisplayName,
}

impl TextField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProjectTitle => "title",
            Self::SpecificationContent => "specification.content",
            Self::ItemContent => "bullet_item.content",
            Self::DisplayName => "display_name",
        }
    }

    pub fn max_chars(self) -> usize {
        match self {
            Self::ProjectTitle => MAX_PROJECT_TITLE_CHARS,
            Self::SpecificationContent => MAX_SPECIFICATION_CHARS,
            Self::ItemContent => MAX_ITEM_CONTENT_CHARS,
            Self::DisplayName => MAX_DISPLAY_NAME_CHARS,
        }
    }
}

/// Exact rule that rejected a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Field is empty after trimming.
    Blank(TextField),
    /// Field exceeds its maximum length after trimming.
    TooLong {
        field: TextField,
        max_chars: usize,
        actual_chars: usize,
    },
    /// Order is outside `0..MAX_BULLET_ITEMS`.
    OrderOutOfRange { order: i64 },
    /// Specification already holds `MAX_BULLET_ITEMS` live items.
    ItemLimitReached { live_count: usize },
    /// Email does not match the accepted address shape.
    InvalidEmail(String),
    /// Email already belongs to another user.
    EmailTaken(String),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blank(field) => write!(f, "{} must not be blank", field.as_str()),
            Self::TooLong {
                field,
                max_chars,
                actual_chars,
            } => write!(
                f,
                "{} must be at most {max_chars} characters, got {actual_chars}",
                field.as_str()
            ),
            Self::OrderOutOfRange { order } => write!(
                f,
                "order must be between 0 and {}, got {order}",
                MAX_BULLET_ITEMS - 1
            ),
            Self::ItemLimitReached { live_count } => write!(
                f,
                "maximum number of bullet items ({MAX_BULLET_ITEMS}) reached, found {live_count}"
            ),
            Self::InvalidEmail(value) => write!(f, "invalid email address: `{value}`"),
            Self::EmailTaken(value) => write!(f, "email `{value}` is registered to another user"),
        }
    }
}

impl Error for ValidationError {}

/// Trims `value` and checks it against the bounds of `field`.
pub fn normalize_text(field: TextField, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Blank(field));
    }
    let actual_chars = trimmed.chars().count();
    if actual_chars > field.max_chars() {
        return Err(ValidationError::TooLong {
            field,
            max_chars: field.max_chars(),
            actual_chars,
        });
    }
    Ok(trimmed.to_string())
}

pub fn validate_project_title(title: &str) -> Result<String, ValidationError> {
    normalize_text(TextField::ProjectTitle, title)
}

pub fn validate_specification_content(content: &str) -> Result<String, ValidationError> {
    normalize_text(TextField::SpecificationContent, content)
}

pub fn validate_item_content(content: &str) -> Result<String, ValidationError> {
    normalize_text(TextField::ItemContent, content)
}

pub fn validate_display_name(name: &str) -> Result<String, ValidationError> {
    normalize_text(TextField::DisplayName, name)
}

/// Checks `0 <= order < MAX_BULLET_ITEMS`.
pub fn validate_order(order: i64) -> Result<(), ValidationError> {
    if (0..MAX_BULLET_ITEMS as i64).contains(&order) {
        Ok(())
    } else {
        Err(ValidationError::OrderOutOfRange { order })
    }
}

/// Checks that one more live item fits into a specification.
pub fn validate_item_capacity(live_count: usize) -> Result<(), ValidationError> {
    if live_count < MAX_BULLET_ITEMS {
        Ok(())
    } else {
        Err(ValidationError::ItemLimitReached { live_count })
    }
}

/// Lowercases, trims and shape-checks an email address.
pub fn normalize_email(email: &str) -> Result<String, ValidationError> {
    let normalized = email.trim().to_lowercase();
    if normalized.chars().count() > MAX_EMAIL_CHARS || !EMAIL_RE.is_match(&normalized) {
        return Err(ValidationError::InvalidEmail(email.trim().to_string()));
    }
    Ok(normalized)
}
