//! SObject completions built from describe results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The parts of an sobject describe the completions use.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SObjectDescribe {
    pub name: String,
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub layoutable: bool,
    #[serde(default)]
    pub triggerable: bool,
    #[serde(default)]
    pub custom: bool,
    #[serde(default)]
    pub fields: Vec<FieldDescribe>,
    #[serde(default)]
    pub child_relationships: Vec<ChildRelationship>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescribe {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub precision: Option<i64>,
    #[serde(default)]
    pub scale: Option<i64>,
    #[serde(default)]
    pub length: Option<i64>,
    #[serde(default)]
    pub picklist_values: Vec<PicklistValue>,
    #[serde(default)]
    pub reference_to: Vec<String>,
    #[serde(default)]
    pub relationship_name: Option<String>,
}

impl FieldDescribe {
    /// Completion trigger text, e.g. `Amount__c(Amount)\tCurrency(16, 2)`.
    pub fn completion_label(&self, with_label: bool) -> String {
        let name = if with_label {
            format!("{}({})", self.name, self.label)
        } else {
            self.name.clone()
        };
        format!("{name}\t{}", self.type_description())
    }

    pub fn type_description(&self) -> String {
        let precision = self.precision.unwrap_or(0);
        let scale = self.scale.unwrap_or(0);
        match self.field_type.as_str() {
            "double" => format!("Double({precision}, {scale})"),
            "currency" => format!("Currency({precision}, {scale})"),
            "date" => "Date".to_string(),
            "datetime" => "Datetime".to_string(),
            "boolean" => "Boolean".to_string(),
            "reference" => "Reference".to_string(),
            other => format!("{}({})", capitalize(other), self.length.unwrap_or(0)),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PicklistValue {
    #[serde(default)]
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildRelationship {
    #[serde(default)]
    pub relationship_name: Option<String>,
    #[serde(rename = "childSObject")]
    pub child_sobject: String,
}

/// Completion data of one sobject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SObjectCompletion {
    pub name: String,
    pub key_prefix: Option<String>,
    pub layoutable: bool,
    pub triggerable: bool,
    /// Completion label → field name.
    pub fields: BTreeMap<String, String>,
    #[serde(rename = "picklist_fields")]
    pub picklist_fields: BTreeMap<String, Vec<PicklistValue>>,
    /// Relationship name → parent sobject.
    pub parent_relationships: BTreeMap<String, String>,
    /// Relationship name → child sobject.
    pub child_relationships: BTreeMap<String, String>,
}

/// Completions of an org, keyed by lower-cased sobject name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SObjectCompletions {
    pub sobjects: BTreeMap<String, SObjectCompletion>,
    /// Relationship name → every sobject it points to across the org.
    pub parent_relationships: BTreeMap<String, Vec<String>>,
}

impl SObjectCompletions {
    /// Build completions from sobject describe bodies. Bodies that are not
    /// describes (no `name`) are skipped.
    pub fn from_describes<'a>(describes: impl IntoIterator<Item = &'a Value>, with_label: bool) -> Self {
        let mut completions = Self::default();
        for body in describes {
            let Ok(describe) = SObjectDescribe::deserialize(body) else {
                continue;
            };
            completions.add(&describe, with_label);
        }
        completions
    }

    fn add(&mut self, describe: &SObjectDescribe, with_label: bool) {
        let mut entry = SObjectCompletion {
            name: describe.name.clone(),
            key_prefix: describe.key_prefix.clone(),
            layoutable: describe.layoutable,
            triggerable: describe.triggerable,
            ..SObjectCompletion::default()
        };

        for field in &describe.fields {
            entry
                .fields
                .insert(field.completion_label(with_label), field.name.clone());

            if field.field_type == "picklist" {
                entry
                    .picklist_fields
                    .insert(field.name.clone(), field.picklist_values.clone());
            }

            // Polymorphic references have no single parent to complete into.
            let [parent] = field.reference_to.as_slice() else {
                continue;
            };
            let Some(relationship) = field.relationship_name.as_deref().filter(|r| !r.is_empty()) else {
                continue;
            };
            let parents = self
                .parent_relationships
                .entry(relationship.to_string())
                .or_default();
            if !parents.contains(parent) {
                parents.push(parent.clone());
            }
            entry
                .parent_relationships
                .insert(relationship.to_string(), parent.clone());
        }

        for child in &describe.child_relationships {
            if let Some(relationship) = child.relationship_name.as_deref().filter(|r| !r.is_empty()) {
                entry
                    .child_relationships
                    .insert(relationship.to_string(), child.child_sobject.clone());
            }
        }

        self.sobjects.insert(describe.name.to_lowercase(), entry);
    }

    pub fn get(&self, sobject: &str) -> Option<&SObjectCompletion> {
        self.sobjects.get(&sobject.to_lowercase())
    }
}
