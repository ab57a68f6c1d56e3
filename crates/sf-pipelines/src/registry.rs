//! Component metadata registry: per org, component type → name →
//! attributes of the downloaded components.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::settings::ComponentTypeSettings;

/// Markers that make an Apex class a test class.
const TEST_MARKERS: [&str; 3] = ["@isTest", "testMethod", "testmethod"];

pub fn is_test_class(body: &str) -> bool {
    TEST_MARKERS.iter().any(|marker| body.contains(marker))
}

/// What the workbench remembers about one remote component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentAttributes {
    pub id: String,
    pub url: String,
    /// Field holding the source.
    pub body: String,
    pub extension: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub is_test: bool,
}

impl ComponentAttributes {
    /// Attributes of a query record, `None` when it lacks an id or name.
    ///
    /// Returns the component name alongside.
    pub fn from_record(
        component_type: &str,
        settings: &ComponentTypeSettings,
        record: &Value,
    ) -> Option<(String, Self)> {
        let name = record.get("Name")?.as_str()?.to_string();
        let id = record.get("Id")?.as_str()?.to_string();
        let url = record
            .pointer("/attributes/url")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| format!("sobjects/{component_type}/{id}"));
        let is_test = component_type == "ApexClass"
            && record
                .get(&settings.body)
                .and_then(Value::as_str)
                .is_some_and(is_test_class);

        Some((
            name,
            Self {
                id,
                url,
                body: settings.body.clone(),
                extension: settings.extension.clone(),
                component_type: component_type.to_string(),
                is_test,
            },
        ))
    }

    /// Local file name: component name plus extension.
    pub fn file_name(&self, name: &str) -> String {
        format!("{name}{}", self.extension)
    }
}

/// Every component of one org, by type and name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentMetadata {
    types: BTreeMap<String, BTreeMap<String, ComponentAttributes>>,
}

impl ComponentMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.types.values().all(BTreeMap::is_empty)
    }

    pub fn component_types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Components of one type.
    pub fn of_type(&self, component_type: &str) -> Option<&BTreeMap<String, ComponentAttributes>> {
        self.types.get(component_type)
    }

    pub fn get(&self, component_type: &str, name: &str) -> Option<&ComponentAttributes> {
        self.types.get(component_type)?.get(name)
    }

    /// Replace every component of a type.
    pub fn set_type(&mut self, component_type: impl Into<String>, components: BTreeMap<String, ComponentAttributes>) {
        self.types.insert(component_type.into(), components);
    }

    pub fn insert(&mut self, name: impl Into<String>, attributes: ComponentAttributes) {
        self.types
            .entry(attributes.component_type.clone())
            .or_default()
            .insert(name.into(), attributes);
    }

    pub fn remove(&mut self, component_type: &str, name: &str) -> Option<ComponentAttributes> {
        self.types.get_mut(component_type)?.remove(name)
    }

    /// Find a component by its remote id.
    pub fn find_by_id(&self, id: &str) -> Option<(&str, &ComponentAttributes)> {
        self.types
            .values()
            .flat_map(|components| components.iter())
            .find(|(_, attributes)| attributes.id == id)
            .map(|(name, attributes)| (name.as_str(), attributes))
    }

    /// `type-->name` → id for every component.
    pub fn component_ids(&self) -> BTreeMap<String, String> {
        self.types
            .iter()
            .flat_map(|(component_type, components)| {
                components.iter().map(move |(name, attributes)| {
                    (format!("{component_type}-->{name}"), attributes.id.clone())
                })
            })
            .collect()
    }

    /// Ids of Apex classes flagged as tests.
    pub fn test_class_ids(&self) -> Vec<String> {
        self.of_type("ApexClass")
            .map(|classes| {
                classes
                    .values()
                    .filter(|attributes| attributes.is_test)
                    .map(|attributes| attributes.id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn class_settings() -> ComponentTypeSettings {
        ComponentTypeSettings {
            soql: "SELECT Id, Name, Body FROM ApexClass".into(),
            body: "Body".into(),
            extension: ".cls".into(),
            folder: "classes".into(),
        }
    }

    #[test]
    fn test_from_record_detects_tests() {
        let record = json!({
            "attributes": {"type": "ApexClass", "url": "/services/data/v62.0/sobjects/ApexClass/01p1"},
            "Id": "01p1",
            "Name": "AccountServiceTest",
            "Body": "@isTest private class AccountServiceTest {}"
        });
        let (name, attributes) =
            ComponentAttributes::from_record("ApexClass", &class_settings(), &record).unwrap();

        assert_eq!(name, "AccountServiceTest");
        assert!(attributes.is_test);
        assert_eq!(attributes.url, "/services/data/v62.0/sobjects/ApexClass/01p1");
        assert_eq!(attributes.file_name(&name), "AccountServiceTest.cls");
    }

    #[test]
    fn test_markers() {
        assert!(is_test_class("static testMethod void run()"));
        assert!(is_test_class("static testmethod void run()"));
        assert!(!is_test_class("public class AccountService {}"));
    }

    #[test]
    fn test_lookups() {
        let mut metadata = ComponentMetadata::new();
        let record = json!({"Id": "01p2", "Name": "Helper", "Body": "@isTest class Helper {}"});
        let (name, attributes) =
            ComponentAttributes::from_record("ApexClass", &class_settings(), &record).unwrap();
        metadata.insert(name, attributes);

        assert_eq!(metadata.test_class_ids(), vec!["01p2".to_string()]);
        assert_eq!(
            metadata.component_ids().get("ApexClass-->Helper").map(String::as_str),
            Some("01p2")
        );
        assert_eq!(metadata.find_by_id("01p2").map(|(n, _)| n), Some("Helper"));

        metadata.remove("ApexClass", "Helper");
        assert!(metadata.is_empty());
    }

    #[test]
    fn test_serialized_shape() {
        let mut metadata = ComponentMetadata::new();
        metadata.insert(
            "Foo",
            ComponentAttributes {
                id: "01q1".into(),
                url: "sobjects/ApexTrigger/01q1".into(),
                body: "Body".into(),
                extension: ".trigger".into(),
                component_type: "ApexTrigger".into(),
                is_test: false,
            },
        );
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["ApexTrigger"]["Foo"]["type"], "ApexTrigger");
    }
}
