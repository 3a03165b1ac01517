//! Actor descriptors: the configured targets and the property values
//! expected on each fetched representation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::checks::Check;

/// One configured actor to walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorDescriptor {
    /// Actor IRI. Optional here so a descriptor without one can be reported
    /// and skipped instead of failing the whole config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Any other expected property
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActorDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: None,
            kind: None,
            extra: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_type(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    /// The default target: the service actor at the root of `base_url`.
    pub fn service_root(base_url: &str) -> Self {
        Self::new(format!("{}/", base_url.trim_end_matches('/')))
            .with_name("self")
            .with_type("Service")
    }

    /// `(propertyName, expectedValue)` pairs asserted against the fetched
    /// object. Every property except `id`.
    pub fn expected_properties(&self) -> Vec<(String, Value)> {
        let mut properties = Vec::with_capacity(self.extra.len() + 2);
        if let Some(name) = &self.name {
            properties.push(("name".to_string(), Value::String(name.clone())));
        }
        if let Some(kind) = &self.kind {
            properties.push(("type".to_string(), Value::String(kind.clone())));
        }
        for (key, value) in &self.extra {
            if key != "id" {
                properties.push((key.clone(), value.clone()));
            }
        }
        properties
    }

    /// Resolves a root-relative id (`/users/alice`) against `base_url`.
    pub fn resolve_against(&mut self, base_url: &str) {
        if let Some(id) = &self.id {
            if id.starts_with('/') {
                self.id = Some(format!("{}{}", base_url.trim_end_matches('/'), id));
            }
        }
    }

    /// Generic ActivityPub checks, a body check, and one property check per
    /// expected property.
    pub fn checks(&self) -> Vec<Check> {
        let mut checks = crate::checks::activity_pub_checks();
        checks.push(Check::HasBody);
        checks.extend(
            self.expected_properties()
                .into_iter()
                .map(|(name, expected)| Check::Property { name, expected }),
        );
        checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_service_root_defaults() {
        let actor = ActorDescriptor::service_root("https://social.example/");
        assert_eq!(actor.id.as_deref(), Some("https://social.example/"));
        assert_eq!(actor.name.as_deref(), Some("self"));
        assert_eq!(actor.kind.as_deref(), Some("Service"));
    }

    #[test]
    fn test_expected_properties_exclude_id() {
        let actor = ActorDescriptor::new("https://x/")
            .with_type("Person")
            .with_property("preferredUsername", json!("alice"));

        let props = actor.expected_properties();
        assert_eq!(
            props,
            vec![
                ("type".to_string(), json!("Person")),
                ("preferredUsername".to_string(), json!("alice")),
            ]
        );
    }

    #[test]
    fn test_checks_include_one_per_property() {
        let actor = ActorDescriptor::service_root("https://x");
        let names: Vec<String> = actor.checks().iter().map(Check::name).collect();
        assert_eq!(
            names,
            vec![
                "status 200",
                "is ActivityPub",
                "has body",
                "property NAME",
                "property TYPE"
            ]
        );
    }

    #[test]
    fn test_deserialize_from_yaml_with_extra_properties() {
        let yaml = r#"
id: /users/alice
type: Person
preferredUsername: alice
manuallyApprovesFollowers: false
"#;
        let mut actor: ActorDescriptor = serde_yaml::from_str(yaml).unwrap();
        actor.resolve_against("http://fedbox.local/");

        assert_eq!(actor.id.as_deref(), Some("http://fedbox.local/users/alice"));
        assert_eq!(actor.extra.get("manuallyApprovesFollowers"), Some(&json!(false)));
        assert_eq!(actor.expected_properties().len(), 3);
    }

    #[test]
    fn test_missing_id_deserializes() {
        let actor: ActorDescriptor = serde_yaml::from_str("name: ghost").unwrap();
        assert!(actor.id.is_none());
    }

    #[test]
    fn test_absolute_id_is_untouched() {
        let mut actor = ActorDescriptor::new("https://other.example/actor");
        actor.resolve_against("https://x");
        assert_eq!(actor.id.as_deref(), Some("https://other.example/actor"));
    }
}
