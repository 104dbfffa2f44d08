//! Request body validation and input sanitization.
//!
//! Bodies are checked against a [`BodySchema`] declared per route. The schema
//! is an allow-list: any field it does not name is rejected, every named field
//! is validated by its [`FieldRule`], and absent optional fields come back as
//! an explicit `null` in the sanitized output so handlers can apply their own
//! defaults.
//!
//! All errors for a body are collected into one [`ValidationResult`] rather
//! than failing on the first one.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length, in characters, of a sanitized free-text value.
pub const MAX_SANITIZED_LENGTH: usize = 1000;

/// Characters stripped by [`sanitize_string`].
pub const STRIPPED_CHARACTERS: [char; 9] = ['<', '>', '"', '\'', '%', ';', '(', ')', '&'];

/// Exact length of a hyphenated UUID.
pub const UUID_LENGTH: usize = 36;

#[allow(clippy::expect_used)]
static UUID_V4_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .expect("UUID pattern is a valid regex")
});

// =============================================================================
// Result Types
// =============================================================================

/// A single field-level validation failure.
///
/// `value` holds the offending input for server-side diagnostics only; it is
/// never serialized into responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing)]
    pub value: Option<Value>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value,
        }
    }
}

/// Outcome of validating a request body.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    /// Present only when `is_valid` is true.
    pub sanitized_data: Option<Map<String, Value>>,
}

impl ValidationResult {
    fn from_parts(errors: Vec<ValidationError>, sanitized: Map<String, Value>) -> Self {
        if errors.is_empty() {
            Self {
                is_valid: true,
                errors,
                sanitized_data: Some(sanitized),
            }
        } else {
            Self {
                is_valid: false,
                errors,
                sanitized_data: None,
            }
        }
    }

    fn invalid(error: ValidationError) -> Self {
        Self {
            is_valid: false,
            errors: vec![error],
            sanitized_data: None,
        }
    }
}

// =============================================================================
// Schemas
// =============================================================================

/// A per-route description of an acceptable JSON body.
pub trait BodySchema: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Validate a parsed JSON body.
    fn validate(&self, body: &Value) -> ValidationResult;
}

/// How a single field is checked and sanitized.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRule {
    /// A hyphenated, version-4 shaped UUID (case-insensitive), unpadded.
    Uuid,
    /// Free text, passed through [`sanitize_string`] after a length check.
    Text { max_len: usize },
    Boolean,
}

impl FieldRule {
    fn apply(&self, field: &str, value: &Value) -> Result<Value, ValidationError> {
        match self {
            FieldRule::Uuid => {
                let raw = value.as_str().ok_or_else(|| {
                    ValidationError::new(
                        field,
                        format!("{field} must be a string"),
                        Some(value.clone()),
                    )
                })?;
                validate_uuid(field, raw).map(Value::String)
            }
            FieldRule::Text { max_len } => {
                let raw = value.as_str().ok_or_else(|| {
                    ValidationError::new(
                        field,
                        format!("{field} must be a string"),
                        Some(value.clone()),
                    )
                })?;
                if raw.chars().count() > *max_len {
                    return Err(ValidationError::new(
                        field,
                        format!("{field} cannot exceed {max_len} characters"),
                        None,
                    ));
                }
                Ok(Value::String(sanitize_string(raw)))
            }
            FieldRule::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                _ => Err(ValidationError::new(
                    field,
                    format!("{field} must be a boolean"),
                    Some(value.clone()),
                )),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct FieldSpec {
    name: String,
    rule: FieldRule,
    required: bool,
}

/// Allow-list schema for a JSON object body.
///
/// ```rust,ignore
/// let schema = ObjectSchema::new("inventory_note")
///     .required("facility_id", FieldRule::Uuid)
///     .optional("note", FieldRule::Text { max_len: 500 });
/// ```
#[derive(Debug, Clone)]
pub struct ObjectSchema {
    name: String,
    fields: Vec<FieldSpec>,
}

impl ObjectSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn required(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            rule,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            rule,
            required: false,
        });
        self
    }

    fn allows(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.name == field)
    }
}

impl BodySchema for ObjectSchema {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, body: &Value) -> ValidationResult {
        let Some(object) = body.as_object() else {
            return ValidationResult::invalid(ValidationError::new(
                "body",
                "Request body must be a JSON object",
                None,
            ));
        };

        let mut errors = Vec::new();
        let mut sanitized = Map::new();

        for spec in &self.fields {
            match object.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    errors.push(ValidationError::new(
                        &spec.name,
                        format!("{} is required", spec.name),
                        None,
                    ));
                }
                None | Some(Value::Null) => {
                    sanitized.insert(spec.name.clone(), Value::Null);
                }
                Some(value) => match spec.rule.apply(&spec.name, value) {
                    Ok(clean) => {
                        sanitized.insert(spec.name.clone(), clean);
                    }
                    Err(e) => errors.push(e),
                },
            }
        }

        let unexpected: Vec<&str> = object
            .keys()
            .map(String::as_str)
            .filter(|key| !self.allows(key))
            .collect();
        if !unexpected.is_empty() {
            let names = unexpected.join(", ");
            errors.push(ValidationError::new(
                names.clone(),
                format!("Unexpected fields: {names}"),
                Some(Value::from(unexpected)),
            ));
        }

        ValidationResult::from_parts(errors, sanitized)
    }
}

/// Schema for the dev "seed facility data" request.
///
/// Accepts a single optional `facility_id`; when absent the sanitized body
/// carries `"facility_id": null` and the handler picks its default facility.
pub fn seed_request_schema() -> ObjectSchema {
    ObjectSchema::new("seed_request").optional("facility_id", FieldRule::Uuid)
}

/// Validate a seed request body.
pub fn validate_seed_request(body: &Value) -> ValidationResult {
    seed_request_schema().validate(body)
}

// =============================================================================
// Field Validators
// =============================================================================

/// Validate a UUID-v4 shaped identifier for the named field.
///
/// The raw value must be exactly [`UUID_LENGTH`] characters and match the
/// v4 pattern (any letter case). Surrounding whitespace counts toward the
/// length, so padded input is rejected; an accepted value is already
/// trimmed.
pub fn validate_uuid(field: &str, raw: &str) -> Result<String, ValidationError> {
    if raw.chars().count() != UUID_LENGTH {
        return Err(ValidationError::new(
            field,
            format!("{field} must be exactly {UUID_LENGTH} characters"),
            Some(Value::String(raw.to_string())),
        ));
    }

    if !UUID_V4_PATTERN.is_match(raw) {
        return Err(ValidationError::new(
            field,
            format!("{field} must be a valid UUID"),
            Some(Value::String(raw.to_string())),
        ));
    }

    Ok(raw.to_string())
}

/// Validate a facility identifier.
pub fn validate_facility_id(raw: &str) -> Result<String, ValidationError> {
    validate_uuid("facility_id", raw)
}

/// Neutralize free-text input.
///
/// Strips [`STRIPPED_CHARACTERS`], trims surrounding whitespace and truncates
/// to [`MAX_SANITIZED_LENGTH`] characters. Applying it to its own output is a
/// no-op.
pub fn sanitize_string(input: &str) -> String {
    let stripped: String = input
        .chars()
        .filter(|c| !STRIPPED_CHARACTERS.contains(c))
        .collect();

    let truncated: String = stripped
        .trim()
        .chars()
        .take(MAX_SANITIZED_LENGTH)
        .collect();

    truncated.trim_end().to_string()
}
