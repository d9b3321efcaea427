//! Field templates for driver-authored credential and connection forms.
//!
//! Drivers describe their own fields; the control plane validates submitted
//! maps against the template before anything is sealed or persisted, so
//! unknown or malformed fields never reach the vault.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use hg_domain::{Error, Result};

/// Kind of a template field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FieldKind {
    Text,
    /// Sealed into the vault; never logged or echoed.
    Secret,
    /// File content, submitted as a string (e.g. a private key).
    File,
    Enum { values: Vec<String> },
    Number { min: Option<f64>, max: Option<f64> },
    Bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateField {
    pub name: String,
    pub label: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

/// An ordered field schema. Credential and connection templates share the
/// same validation walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub fields: Vec<TemplateField>,
}

pub type CredentialTemplate = Template;
pub type ConnectionTemplate = Template;

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(
        mut self,
        name: impl Into<String>,
        label: impl Into<String>,
        kind: FieldKind,
        required: bool,
    ) -> Self {
        self.fields.push(TemplateField {
            name: name.into(),
            label: label.into(),
            kind,
            required,
        });
        self
    }

    /// Walk `values` against the template. Rejects unknown keys, missing
    /// required fields, and values of the wrong shape.
    pub fn validate(&self, values: &BTreeMap<String, Value>) -> Result<()> {
        for key in values.keys() {
            if !self.fields.iter().any(|f| &f.name == key) {
                return Err(Error::validation(format!(
                    "unknown field \"{key}\" for template {}",
                    self.name
                )));
            }
        }

        for field in &self.fields {
            let value = match values.get(&field.name) {
                Some(v) => v,
                None if field.required => {
                    return Err(Error::validation(format!(
                        "missing required field \"{}\"",
                        field.name
                    )));
                }
                None => continue,
            };
            self.check_value(field, value)?;
        }
        Ok(())
    }

    fn check_value(&self, field: &TemplateField, value: &Value) -> Result<()> {
        let fail = |expected: &str| {
            Err(Error::validation(format!(
                "field \"{}\" must be {expected}",
                field.name
            )))
        };

        match &field.kind {
            FieldKind::Text | FieldKind::Secret | FieldKind::File => {
                if !value.is_string() {
                    return fail("a string");
                }
            }
            FieldKind::Enum { values } => match value.as_str() {
                Some(s) if values.iter().any(|v| v == s) => {}
                _ => {
                    return Err(Error::validation(format!(
                        "field \"{}\" must be one of {values:?}",
                        field.name
                    )));
                }
            },
            FieldKind::Number { min, max } => {
                let Some(n) = value.as_f64() else {
                    return fail("a number");
                };
                if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
                    return Err(Error::validation(format!(
                        "field \"{}\" is out of range",
                        field.name
                    )));
                }
            }
            FieldKind::Bool => {
                if !value.is_boolean() {
                    return fail("a boolean");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ssh_template() -> Template {
        Template::new("ssh")
            .field("username", "Username", FieldKind::Text, true)
            .field("password", "Password", FieldKind::Secret, false)
            .field("private_key", "Private key", FieldKind::File, false)
            .field(
                "auth_method",
                "Auth method",
                FieldKind::Enum {
                    values: vec!["password".into(), "key".into()],
                },
                true,
            )
            .field(
                "port",
                "Port",
                FieldKind::Number {
                    min: Some(1.0),
                    max: Some(65535.0),
                },
                false,
            )
            .field("compression", "Compression", FieldKind::Bool, false)
    }

    fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn valid_submission_passes() {
        let submitted = values(&[
            ("username", json!("root")),
            ("auth_method", json!("password")),
            ("password", json!("hunter2")),
            ("port", json!(2222)),
            ("compression", json!(true)),
        ]);
        ssh_template().validate(&submitted).unwrap();
    }

    #[test]
    fn unknown_field_is_rejected() {
        let submitted = values(&[
            ("username", json!("root")),
            ("auth_method", json!("key")),
            ("backdoor", json!("x")),
        ]);
        let err = ssh_template().validate(&submitted).unwrap_err();
        assert!(err.message().contains("backdoor"));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let submitted = values(&[("username", json!("root"))]);
        let err = ssh_template().validate(&submitted).unwrap_err();
        assert!(err.message().contains("auth_method"));
    }

    #[test]
    fn enum_member_is_enforced() {
        let submitted = values(&[
            ("username", json!("root")),
            ("auth_method", json!("carrier-pigeon")),
        ]);
        assert!(ssh_template().validate(&submitted).is_err());
    }

    #[test]
    fn number_range_is_enforced() {
        let submitted = values(&[
            ("username", json!("root")),
            ("auth_method", json!("key")),
            ("port", json!(70000)),
        ]);
        assert!(ssh_template().validate(&submitted).is_err());
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let submitted = values(&[
            ("username", json!(42)),
            ("auth_method", json!("key")),
        ]);
        assert!(ssh_template().validate(&submitted).is_err());
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let submitted = values(&[
            ("username", json!("root")),
            ("auth_method", json!("key")),
        ]);
        ssh_template().validate(&submitted).unwrap();
    }
}
