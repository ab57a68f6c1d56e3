//! Reference data lookups, cached per org.
//!
//! Each lookup is keyed `(org, kind)` in an [`OrgCache`] and fetched at most
//! once; concurrent first lookups share the fetch. Lookups that the
//! component registry or the completions store can answer never touch the
//! network.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use busbar_sf_client::{ApiResult, OrgIdentity};
use busbar_sf_orchestrator::{Operation, OrgCache, ResourceKind};
use serde_json::{json, Value};

use crate::error::{Error, ErrorKind, Result};
use crate::pipelines::Pipelines;
use crate::registry::ComponentAttributes;

/// Id of the implicit `Master` record type every layoutable sobject has.
pub const MASTER_RECORD_TYPE_ID: &str = "012000000000000AAA";

const USERS_SOQL: &str =
    "SELECT Id, FirstName, LastName FROM User WHERE LastName != null AND IsActive = true";
const RECORD_TYPES_SOQL: &str = "SELECT Id, Name, SobjectType FROM RecordType";

/// `LastName FirstName` → user id.
pub type Users = BTreeMap<String, String>;
/// Class name → attributes.
pub type Classes = BTreeMap<String, ComponentAttributes>;
/// SObject name → describe-global entry.
pub type SObjectIndex = BTreeMap<String, Value>;
/// `"SObject, RecordTypeName"` → record type id.
pub type RecordTypes = BTreeMap<String, String>;

/// Reference data of every org the session has touched.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    pub users: OrgCache<Arc<Users>>,
    pub classes: OrgCache<Arc<Classes>>,
    pub sobjects: OrgCache<Arc<SObjectIndex>>,
    pub recordtypes: OrgCache<Arc<RecordTypes>>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything cached for an org.
    pub fn invalidate_org(&self, org: &OrgIdentity) {
        self.users.invalidate_org(org);
        self.classes.invalidate_org(org);
        self.sobjects.invalidate_org(org);
        self.recordtypes.invalidate_org(org);
    }
}

/// A 15 or 18 character User id.
fn is_user_id(value: &str) -> bool {
    value.starts_with("005")
        && matches!(value.len(), 15 | 18)
        && value.chars().all(|c| c.is_ascii_alphanumeric())
}

fn checked(result: ApiResult) -> Result<ApiResult> {
    match Error::from_result(&result) {
        Some(err) => Err(err),
        None => Ok(result),
    }
}

/// Users keyed by display name.
pub fn index_users(records: &[Value]) -> Users {
    records
        .iter()
        .filter_map(|user| {
            let id = user.get("Id")?.as_str()?;
            let last = user.get("LastName")?.as_str()?;
            let name = match user.get("FirstName").and_then(Value::as_str) {
                Some(first) if !first.is_empty() => format!("{last} {first}"),
                _ => last.to_string(),
            };
            Some((name, id.to_string()))
        })
        .collect()
}

/// Describe-global entries keyed by sobject name.
pub fn index_sobjects(describe_global: &Value) -> SObjectIndex {
    describe_global
        .get("sobjects")
        .and_then(Value::as_array)
        .map(|sobjects| {
            sobjects
                .iter()
                .filter_map(|s| Some((s.get("name")?.as_str()?.to_string(), s.clone())))
                .collect()
        })
        .unwrap_or_default()
}

/// Record types by `"SObject, Name"`, plus `Master` for layoutable sobjects.
pub fn index_recordtypes(records: &[Value], sobjects: &SObjectIndex) -> RecordTypes {
    let mut recordtypes: RecordTypes = records
        .iter()
        .filter_map(|rt| {
            let sobject = rt.get("SobjectType")?.as_str()?;
            let name = rt.get("Name")?.as_str()?;
            let id = rt.get("Id")?.as_str()?;
            Some((format!("{sobject}, {name}"), id.to_string()))
        })
        .collect();

    for (name, describe) in sobjects {
        if describe.get("layoutable").and_then(Value::as_bool) == Some(true) {
            recordtypes.insert(format!("{name}, Master"), MASTER_RECORD_TYPE_ID.to_string());
        }
    }
    recordtypes
}

impl Pipelines {
    /// Active users of the org.
    pub async fn populate_users(&self) -> Result<Arc<Users>> {
        let api = self.api().clone();
        self.context()
            .cache()
            .users
            .populate(self.org(), ResourceKind::Users, || async move {
                let result = checked(api.query_all(USERS_SOQL, false).await)?;
                Ok(Arc::new(index_users(result.records())))
            })
            .await
    }

    /// Apex classes, from the component registry when a project exists.
    pub async fn populate_classes(&self) -> Result<Arc<Classes>> {
        let ctx = self.context();
        if let Some(classes) = ctx
            .store()
            .load_components(self.org())?
            .and_then(|metadata| metadata.of_type("ApexClass").cloned())
        {
            return Ok(Arc::new(classes));
        }

        let api = self.api().clone();
        let settings = ctx.settings().component("ApexClass")?.clone();
        ctx.cache()
            .classes
            .populate(self.org(), ResourceKind::Classes, || async move {
                let result = checked(api.query_all(&settings.soql, false).await)?;
                Ok(Arc::new(
                    result
                        .records()
                        .iter()
                        .filter_map(|record| ComponentAttributes::from_record("ApexClass", &settings, record))
                        .collect(),
                ))
            })
            .await
    }

    /// Describe-global index, from stored completions when present.
    pub async fn populate_sobjects_describe(&self) -> Result<Arc<SObjectIndex>> {
        let ctx = self.context();
        if let Some(completions) = ctx.store().load_completions(self.org())? {
            return Ok(Arc::new(
                completions
                    .sobjects
                    .values()
                    .map(|entry| {
                        (
                            entry.name.clone(),
                            json!({
                                "name": entry.name,
                                "keyPrefix": entry.key_prefix,
                                "layoutable": entry.layoutable,
                                "triggerable": entry.triggerable,
                            }),
                        )
                    })
                    .collect(),
            ));
        }

        let api = self.api().clone();
        ctx.cache()
            .sobjects
            .populate(self.org(), ResourceKind::SObjectDescribe, || async move {
                let result = checked(api.describe_global().await)?;
                Ok(Arc::new(index_sobjects(&result.body)))
            })
            .await
    }

    /// Record types of every sobject.
    pub async fn populate_sobject_recordtypes(&self) -> Result<Arc<RecordTypes>> {
        if let Some(cached) = self
            .context()
            .cache()
            .recordtypes
            .get(self.org(), &ResourceKind::RecordTypes)
        {
            return Ok(cached);
        }

        let sobjects = self.populate_sobjects_describe().await?;
        let api = self.api().clone();
        self.context()
            .cache()
            .recordtypes
            .populate(self.org(), ResourceKind::RecordTypes, || async move {
                let result = checked(api.query_all(RECORD_TYPES_SOQL, false).await)?;
                Ok(Arc::new(index_recordtypes(result.records(), &sobjects)))
            })
            .await
    }

    /// `type-->name` → id for every registered component.
    pub fn populate_components(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .context()
            .store()
            .load_components(self.org())?
            .map(|metadata| metadata.component_ids())
            .unwrap_or_default())
    }

    /// Id of an active user given as `LastName FirstName`. A User id is
    /// accepted as is.
    pub async fn resolve_user(&self, user: &str) -> Result<String> {
        let users = self.populate_users().await?;
        if let Some(id) = users.get(user) {
            return Ok(id.clone());
        }
        if is_user_id(user) {
            return Ok(user.to_string());
        }
        Err(Error::new(ErrorKind::Registry(format!(
            "no active user named {user}"
        ))))
    }

    /// Id of an Apex class by name, ignoring case.
    pub async fn resolve_class(&self, class_name: &str) -> Result<String> {
        let classes = self.populate_classes().await?;
        classes
            .get(class_name)
            .or_else(|| {
                classes
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(class_name))
                    .map(|(_, attributes)| attributes)
            })
            .map(|attributes| attributes.id.clone())
            .ok_or_else(|| {
                Error::new(ErrorKind::Registry(format!(
                    "{class_name} is not an Apex class of this org"
                )))
            })
    }

    /// Run a lookup on a worker, then continue on the loop with its value.
    /// A failed lookup ends the chain like any failed step.
    pub(crate) fn after_lookup<V, F, C>(
        &self,
        step: String,
        lookup: F,
        on_found: C,
    ) -> Operation<std::result::Result<V, String>>
    where
        V: Clone + Send + Sync + 'static,
        F: Future<Output = Result<V>> + Send + 'static,
        C: FnOnce(V) + Send + 'static,
    {
        self.context().single(
            step.clone(),
            format!("{step} Succeed"),
            async move { lookup.await.map_err(|err| err.to_string()) },
            move |found| {
                if let Ok(value) = found {
                    on_found(value)
                }
            },
        )
    }

    /// Registered Apex class ids for `names`; a name the registry does not
    /// know is taken to be an id already.
    pub fn class_ids(&self, names: &[String]) -> Result<Vec<String>> {
        let components = self.populate_components()?;
        Ok(names
            .iter()
            .map(|name| {
                components
                    .get(&format!("ApexClass-->{name}"))
                    .cloned()
                    .unwrap_or_else(|| name.clone())
            })
            .collect())
    }

    /// Ids of every registered test class.
    pub fn populate_all_test_classes(&self) -> Result<Vec<String>> {
        let metadata = self
            .context()
            .store()
            .load_components(self.org())?
            .ok_or_else(|| {
                Error::new(ErrorKind::Registry(
                    "no component cache, create a new project first".to_string(),
                ))
            })?;
        Ok(metadata.test_class_ids())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_users() {
        let users = index_users(&[
            json!({"Id": "0051", "FirstName": "Ada", "LastName": "Lovelace"}),
            json!({"Id": "0052", "FirstName": null, "LastName": "Integration"}),
        ]);
        assert_eq!(users.get("Lovelace Ada").map(String::as_str), Some("0051"));
        assert_eq!(users.get("Integration").map(String::as_str), Some("0052"));
    }

    #[test]
    fn test_is_user_id() {
        assert!(is_user_id("005000000000001"));
        assert!(is_user_id("005000000000001AAA"));
        assert!(!is_user_id("Lovelace Ada"));
        assert!(!is_user_id("001000000000001"));
    }

    #[test]
    fn test_master_record_type_for_layoutable_only() {
        let sobjects = index_sobjects(&json!({"sobjects": [
            {"name": "Account", "layoutable": true},
            {"name": "AccountHistory", "layoutable": false}
        ]}));
        let recordtypes = index_recordtypes(
            &[json!({"Id": "0121", "Name": "Partner", "SobjectType": "Account"})],
            &sobjects,
        );

        assert_eq!(recordtypes.get("Account, Partner").map(String::as_str), Some("0121"));
        assert_eq!(
            recordtypes.get("Account, Master").map(String::as_str),
            Some(MASTER_RECORD_TYPE_ID)
        );
        assert!(!recordtypes.contains_key("AccountHistory, Master"));
    }
}
