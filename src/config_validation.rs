//! Field-level validation for the YAML test plan.
//!
//! Validators return a [`ValidationError`] naming the offending field;
//! [`ValidationContext`] collects them under a dotted path so one pass
//! reports every problem in the file.

use thiserror::Error;

use crate::actor::ActorDescriptor;
use crate::load_models::Stage;

/// Validation error with context about which field failed.
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Field '{field}': {message}")]
    FieldError { field: String, message: String },

    #[error("Field '{field}' is required but not provided")]
    RequiredField { field: String },

    #[error("Field '{field}': value {value} is out of range ({min} to {max})")]
    OutOfRange {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Field '{field}': invalid format - {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Multiple validation errors: {0}")]
    Multiple(String),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation context for building error messages.
pub struct ValidationContext {
    field_path: Vec<String>,
    errors: Vec<ValidationError>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self {
            field_path: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Enter a nested field context.
    pub fn enter(&mut self, field: &str) {
        self.field_path.push(field.to_string());
    }

    /// Exit the current field context.
    pub fn exit(&mut self) {
        self.field_path.pop();
    }

    pub fn current_path(&self) -> String {
        self.field_path.join(".")
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Add a field error at the current path.
    pub fn field_error(&mut self, message: String) {
        self.add_error(ValidationError::FieldError {
            field: self.current_path(),
            message,
        });
    }

    /// Runs `check` inside `field` and records its error, if any.
    pub fn check(&mut self, field: &str, check: impl FnOnce() -> ValidationResult<()>) {
        self.enter(field);
        if let Err(e) = check() {
            self.field_error(e.to_string());
        }
        self.exit();
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Consume the context and return a result.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
            Err(ValidationError::Multiple(messages.join("; ")))
        }
    }
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Validator for URLs.
pub struct UrlValidator;

impl UrlValidator {
    pub fn validate(url: &str) -> ValidationResult<()> {
        if url.is_empty() {
            return Err(ValidationError::InvalidFormat {
                field: "url".to_string(),
                message: "URL cannot be empty".to_string(),
            });
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ValidationError::InvalidFormat {
                field: "url".to_string(),
                message: format!("URL must start with http:// or https://, got: {}", url),
            });
        }

        reqwest::Url::parse(url).map_err(|e| ValidationError::InvalidFormat {
            field: "url".to_string(),
            message: format!("{}: {}", url, e),
        })?;

        Ok(())
    }
}

/// Upper bound on `maxVUs`, well under the VU semaphore's permit limit.
pub const MAX_VUS_LIMIT: u64 = 100_000;

/// Validator for numeric ranges.
pub struct RangeValidator;

impl RangeValidator {
    pub fn validate_u64(value: u64, min: u64, max: u64, field: &str) -> ValidationResult<()> {
        if value < min || value > max {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_non_negative_f64(value: f64, field: &str) -> ValidationResult<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: value.to_string(),
                min: "0".to_string(),
                max: "unlimited".to_string(),
            });
        }
        Ok(())
    }
}

/// Validator for ramp stages.
pub struct StageValidator;

impl StageValidator {
    pub fn validate(stages: &[Stage]) -> ValidationResult<()> {
        if stages.is_empty() {
            return Err(ValidationError::RequiredField {
                field: "stages".to_string(),
            });
        }

        for (idx, stage) in stages.iter().enumerate() {
            RangeValidator::validate_non_negative_f64(stage.target, &format!("stages[{}].target", idx))?;
        }

        if stages.iter().all(|s| s.duration.is_zero()) {
            return Err(ValidationError::FieldError {
                field: "stages".to_string(),
                message: "total ramp duration must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Validator for actor descriptors.
pub struct ActorValidator;

impl ActorValidator {
    /// Ids may be absolute URLs or root-relative paths.
    pub fn validate(actor: &ActorDescriptor) -> ValidationResult<()> {
        match actor.id.as_deref() {
            None | Some("") => Err(ValidationError::RequiredField {
                field: "id".to_string(),
            }),
            Some(id) if id.starts_with('/') => Ok(()),
            Some(id) => UrlValidator::validate(id),
        }
    }
}
