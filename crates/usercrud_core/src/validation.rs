//! Field validation for user records.
//!
//! # Responsibility
//! - Reject malformed user input before it reaches storage.
//! - Report every failing field at once, in declaration order.
//!
//! # Invariants
//! - The process-wide rule set is built exactly once and is read-only
//!   afterwards; callers on any thread share it without locking.
//! - Custom rules run only on non-empty values.
//! - A field reports at most one violation: the first rule that fails.

use crate::model::user::{User, UserStatus};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Name under which the status enumeration rule is registered.
pub const STATUS_RULE: &str = "status";

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$",
    )
    .expect("valid email regex")
});

static USER_VALIDATOR: Lazy<UserValidator> = Lazy::new(|| {
    UserValidator::builder()
        .register_rule(STATUS_RULE, is_known_status)
        .and_then(|builder| builder.build())
        .expect("built-in user rule set is consistent")
});

/// Returns the shared, process-wide user validator.
pub fn user_validator() -> &'static UserValidator {
    &USER_VALIDATOR
}

/// Custom rule predicate. Receives a non-empty field value.
pub type CustomRule = fn(&str) -> bool;

/// Why a field failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationReason {
    /// Required value is empty.
    Missing,
    /// Value is present but malformed.
    Invalid,
}

impl ViolationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Invalid => "invalid",
        }
    }
}

/// One field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// External (JSON) field name.
    pub field: &'static str,
    pub reason: ViolationReason,
}

impl Display for Violation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' is {}", self.field, self.reason.as_str())
    }
}

/// Non-empty ordered list of violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    violations: Vec<Violation>,
}

impl ValidationErrors {
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Returns the violation reported for `field`, if any.
    pub fn for_field(&self, field: &str) -> Option<&Violation> {
        self.violations.iter().find(|v| v.field == field)
    }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, violation) in self.violations.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

impl Error for ValidationErrors {}

/// Errors raised while assembling a rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSetError {
    /// A custom rule name was registered twice.
    DuplicateRule(&'static str),
    /// A field references a custom rule that was never registered.
    UnknownRule {
        field: &'static str,
        rule: &'static str,
    },
}

impl Display for RuleSetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateRule(name) => write!(f, "validation rule `{name}` already registered"),
            Self::UnknownRule { field, rule } => {
                write!(f, "field `{field}` references unknown rule `{rule}`")
            }
        }
    }
}

impl Error for RuleSetError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Required,
    Email,
    Custom(&'static str),
}

struct FieldRules {
    name: &'static str,
    value: fn(&User) -> &str,
    rules: &'static [Rule],
}

fn user_fields() -> Vec<FieldRules> {
    vec![
        FieldRules {
            name: "user_name",
            value: |user| user.user_name.as_str(),
            rules: &[Rule::Required],
        },
        FieldRules {
            name: "first_name",
            value: |user| user.first_name.as_str(),
            rules: &[Rule::Required],
        },
        FieldRules {
            name: "last_name",
            value: |user| user.last_name.as_str(),
            rules: &[Rule::Required],
        },
        FieldRules {
            name: "email",
            value: |user| user.email.as_str(),
            rules: &[Rule::Required, Rule::Email],
        },
        FieldRules {
            name: "user_status",
            value: |user| user.status.as_str(),
            rules: &[Rule::Required, Rule::Custom(STATUS_RULE)],
        },
    ]
}

/// Collects custom rules before the rule set is frozen.
#[derive(Default)]
pub struct UserValidatorBuilder {
    custom: HashMap<&'static str, CustomRule>,
}

impl UserValidatorBuilder {
    /// Registers a named custom rule.
    ///
    /// # Errors
    /// - `DuplicateRule` when `name` is already registered on this builder.
    pub fn register_rule(
        mut self,
        name: &'static str,
        rule: CustomRule,
    ) -> Result<Self, RuleSetError> {
        if self.custom.contains_key(name) {
            return Err(RuleSetError::DuplicateRule(name));
        }
        self.custom.insert(name, rule);
        Ok(self)
    }

    /// Freezes the rule set.
    ///
    /// # Errors
    /// - `UnknownRule` when a field refers to an unregistered custom rule.
    pub fn build(self) -> Result<UserValidator, RuleSetError> {
        let fields = user_fields();
        for field in &fields {
            for rule in field.rules {
                if let Rule::Custom(name) = rule {
                    if !self.custom.contains_key(name) {
                        return Err(RuleSetError::UnknownRule {
                            field: field.name,
                            rule: *name,
                        });
                    }
                }
            }
        }
        Ok(UserValidator {
            fields,
            custom: self.custom,
        })
    }
}

/// Immutable rule set for user records.
pub struct UserValidator {
    fields: Vec<FieldRules>,
    custom: HashMap<&'static str, CustomRule>,
}

impl UserValidator {
    pub fn builder() -> UserValidatorBuilder {
        UserValidatorBuilder::default()
    }

    /// Validates every field and returns all violations together.
    pub fn validate(&self, user: &User) -> Result<(), ValidationErrors> {
        let violations = self
            .fields
            .iter()
            .filter_map(|field| {
                self.check_field(field, (field.value)(user))
                    .map(|reason| Violation {
                        field: field.name,
                        reason,
                    })
            })
            .collect::<Vec<_>>();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors { violations })
        }
    }

    fn check_field(&self, field: &FieldRules, value: &str) -> Option<ViolationReason> {
        for rule in field.rules {
            match rule {
                Rule::Required => {
                    if value.is_empty() {
                        return Some(ViolationReason::Missing);
                    }
                }
                // Format rules do not apply to absent optional values.
                _ if value.is_empty() => return None,
                Rule::Email => {
                    if !EMAIL_RE.is_match(value) {
                        return Some(ViolationReason::Invalid);
                    }
                }
                Rule::Custom(name) => {
                    let passes = self.custom.get(name).is_some_and(|rule| rule(value));
                    if !passes {
                        return Some(ViolationReason::Invalid);
                    }
                }
            }
        }
        None
    }
}

fn is_known_status(value: &str) -> bool {
    UserStatus::from_code(value).is_some()
}
