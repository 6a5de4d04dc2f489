//! TargetWriter: create-or-reconcile against the Magento 2 REST API.
//!
//! Every resource goes through the same small state machine:
//!
//! ```text
//! Attempting --ok--------------------------------------------> Done(Created)
//! Attempting --slug taken (once)--> Attempting
//! Attempting --duplicate/reserved--> ConflictDetected -> Searching
//! Searching  --no match--> GivenUp
//! Searching  --no match, slug taken (once)--> Attempting
//! Searching  --match-->    Reconciling --no override / update ok--> Done(Found)
//! Reconciling --update rejected--> GivenUp
//! ```
//!
//! Transport failures bubble up as fatal `Connection` errors; everything
//! else ends in `Done` or `GivenUp` for the single entity.
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{MigrateError, MigrateResult};
use crate::payload::group_code;
use crate::record::{scalar_to_string, value_as_bool, value_as_i64};
use crate::target::{classify, ApiReply, ReplyClass, SearchCriteria, StoreScope, TargetApi};

/// Final outcome for one entity.
#[derive(Debug)]
pub enum ReconciliationResult {
    Created(i64),
    /// Already present on the target. `existing` is the fetched record.
    Found {
        id: i64,
        existing: Value,
        updated: bool,
    },
    Failed(MigrateError),
}

impl ReconciliationResult {
    pub fn target_id(&self) -> Option<i64> {
        match self {
            ReconciliationResult::Created(id) | ReconciliationResult::Found { id, .. } => Some(*id),
            ReconciliationResult::Failed(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum WriteState {
    Attempting,
    ConflictDetected(String),
    Searching(String),
    Reconciling(Value),
    Done(ReconciliationResult),
    GivenUp(MigrateError),
}

impl WriteState {
    fn name(&self) -> &'static str {
        match self {
            WriteState::Attempting => "attempting",
            WriteState::ConflictDetected(_) => "conflict_detected",
            WriteState::Searching(_) => "searching",
            WriteState::Reconciling(_) => "reconciling",
            WriteState::Done(_) => "done",
            WriteState::GivenUp(_) => "given_up",
        }
    }
}

/// A target entity kind plus its natural key.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Group { set_id: i64, name: String },
    Attribute { code: String },
    Category { name: String, parent_id: i64 },
    Product { sku: String, scope: StoreScope },
}

impl Resource {
    pub fn entity(&self) -> &'static str {
        match self {
            Resource::Group { .. } => "attribute group",
            Resource::Attribute { .. } => "attribute",
            Resource::Category { .. } => "category",
            Resource::Product {
                scope: StoreScope::Default,
                ..
            } => "product",
            Resource::Product { .. } => "product store view",
        }
    }

    pub fn key(&self) -> String {
        match self {
            Resource::Group { set_id, name } => format!("{set_id}/{name}"),
            Resource::Attribute { code } => code.clone(),
            Resource::Category { name, parent_id } => format!("{parent_id}/{name}"),
            Resource::Product {
                sku,
                scope: StoreScope::Default,
            } => sku.clone(),
            Resource::Product { sku, scope } => format!("{sku}@{scope}"),
        }
    }

    fn scope(&self) -> StoreScope {
        match self {
            Resource::Product { scope, .. } => *scope,
            _ => StoreScope::Default,
        }
    }

    fn create_path(&self) -> &'static str {
        match self {
            Resource::Group { .. } => "/products/attribute-sets/groups",
            Resource::Attribute { .. } => "/products/attributes",
            Resource::Category { .. } => "/categories",
            Resource::Product { .. } => "/products",
        }
    }

    fn conflict_markers(&self) -> &'static [&'static str] {
        match self {
            Resource::Group { .. } => &["already exists", "can't be saved"],
            Resource::Attribute { .. } => &["already exists", "reserved by system"],
            Resource::Category { .. } | Resource::Product { .. } => &["already exists"],
        }
    }

    /// Resources with a URL key that can be bumped on collision.
    fn has_slug(&self) -> bool {
        matches!(self, Resource::Category { .. } | Resource::Product { .. })
    }

    /// Magento answers a duplicate category with the URL-key message, so a
    /// taken slug is looked up by name and parent before it is bumped.
    fn searches_taken_slug(&self) -> bool {
        matches!(self, Resource::Category { .. })
    }

    fn id_field(&self) -> &'static str {
        match self {
            Resource::Group { .. } => "attribute_group_id",
            Resource::Attribute { .. } => "attribute_id",
            Resource::Category { .. } | Resource::Product { .. } => "id",
        }
    }

    /// Top-level key wrapping the entity in request bodies.
    fn envelope_key(&self) -> &'static str {
        match self {
            Resource::Group { .. } => "group",
            Resource::Attribute { .. } => "attribute",
            Resource::Category { .. } => "category",
            Resource::Product { .. } => "product",
        }
    }
}

/// Sends payloads and reconciles conflicts.
pub struct TargetWriter<'a> {
    api: &'a dyn TargetApi,
    url_key_suffix: String,
}

impl<'a> TargetWriter<'a> {
    pub fn new(api: &'a dyn TargetApi, url_key_suffix: &str) -> Self {
        Self {
            api,
            url_key_suffix: url_key_suffix.to_string(),
        }
    }

    /// Drive `resource` to `Done` or `GivenUp`. Only fatal errors are `Err`.
    pub async fn write(&self, resource: &Resource, body: Value) -> MigrateResult<ReconciliationResult> {
        let mut body = body;
        let mut slug_bumped = false;
        let mut slug_taken = false;
        let mut state = WriteState::Attempting;
        loop {
            debug!(entity = resource.entity(), key = %resource.key(), state = state.name(), "writer: step");
            state = match state {
                WriteState::Attempting => {
                    let reply = self
                        .api
                        .post(resource.scope(), resource.create_path(), &body)
                        .await?;
                    match classify(&reply, resource.conflict_markers(), resource.has_slug()) {
                        ReplyClass::Success => match reply_id(&reply, resource.id_field()) {
                            Some(id) => {
                                info!(entity = resource.entity(), key = %resource.key(), id, "created");
                                WriteState::Done(ReconciliationResult::Created(id))
                            }
                            None => WriteState::GivenUp(write_error(
                                resource,
                                "create reply carried no id".to_string(),
                            )),
                        },
                        ReplyClass::ValueTaken(msg)
                            if resource.searches_taken_slug() && !slug_bumped =>
                        {
                            slug_taken = true;
                            WriteState::ConflictDetected(msg)
                        }
                        ReplyClass::ValueTaken(msg) => {
                            self.bump_or_give_up(resource, &mut body, &mut slug_bumped, msg)
                        }
                        ReplyClass::Conflict(msg) => WriteState::ConflictDetected(msg),
                        ReplyClass::Rejected(msg) => WriteState::GivenUp(write_error(resource, msg)),
                    }
                }
                WriteState::ConflictDetected(msg) => {
                    debug!(entity = resource.entity(), key = %resource.key(), message = %msg, "writer: conflict");
                    WriteState::Searching(msg)
                }
                WriteState::Searching(msg) => match self.search(resource).await? {
                    Some(existing) => WriteState::Reconciling(existing),
                    None if slug_taken => {
                        self.bump_or_give_up(resource, &mut body, &mut slug_bumped, msg)
                    }
                    None => WriteState::GivenUp(conflict_error(resource, msg)),
                },
                WriteState::Reconciling(existing) => self.reconcile(resource, &body, existing).await?,
                WriteState::Done(result) => return Ok(result),
                WriteState::GivenUp(err) => return Ok(ReconciliationResult::Failed(err)),
            };
        }
    }

    /// One retry with the suffixed url_key; a second clash gives up.
    fn bump_or_give_up(
        &self,
        resource: &Resource,
        body: &mut Value,
        slug_bumped: &mut bool,
        msg: String,
    ) -> WriteState {
        if !*slug_bumped && bump_url_key(body, resource.envelope_key(), &self.url_key_suffix) {
            *slug_bumped = true;
            warn!(entity = resource.entity(), key = %resource.key(), "url key taken; retrying with suffix");
            WriteState::Attempting
        } else {
            WriteState::GivenUp(conflict_error(resource, msg))
        }
    }

    /// Natural-key lookup; returns the full existing record.
    async fn search(&self, resource: &Resource) -> MigrateResult<Option<Value>> {
        match resource {
            Resource::Group { set_id, name } => {
                let criteria = SearchCriteria::new()
                    .eq("attribute_set_id", set_id)
                    .eq("attribute_group_name", name);
                let reply = self
                    .api
                    .get(
                        StoreScope::Default,
                        "/products/attribute-sets/groups/list",
                        &criteria.to_query(),
                    )
                    .await?;
                Ok(search_items(&reply).into_iter().find(|item| {
                    item.get("attribute_group_name")
                        .and_then(Value::as_str)
                        .is_some_and(|n| n.eq_ignore_ascii_case(name))
                }))
            }
            Resource::Attribute { code } => {
                self.fetch(StoreScope::Default, &attribute_path(code)).await
            }
            Resource::Category { name, parent_id } => {
                let criteria = SearchCriteria::new()
                    .eq("name", name)
                    .eq("parent_id", parent_id);
                let reply = self
                    .api
                    .get(StoreScope::Default, "/categories/list", &criteria.to_query())
                    .await?;
                Ok(search_items(&reply).into_iter().next())
            }
            Resource::Product { sku, scope } => self.fetch(*scope, &product_path(sku)).await,
        }
    }

    async fn fetch(&self, scope: StoreScope, path: &str) -> MigrateResult<Option<Value>> {
        let reply = self.api.get(scope, path, &[]).await?;
        Ok((reply.is_success() && reply.body.is_object()).then_some(reply.body))
    }

    async fn reconcile(
        &self,
        resource: &Resource,
        body: &Value,
        existing: Value,
    ) -> MigrateResult<WriteState> {
        let Some(id) = existing.get(resource.id_field()).and_then(value_as_i64) else {
            return Ok(WriteState::GivenUp(write_error(
                resource,
                "matched record has no id".to_string(),
            )));
        };
        let Some((path, update)) = override_for(resource, body, &existing) else {
            info!(entity = resource.entity(), key = %resource.key(), id, "found existing");
            return Ok(WriteState::Done(ReconciliationResult::Found {
                id,
                existing,
                updated: false,
            }));
        };
        let reply = self.api.put(resource.scope(), &path, &update).await?;
        if reply.is_success() {
            info!(entity = resource.entity(), key = %resource.key(), id, "found existing; updated");
            Ok(WriteState::Done(ReconciliationResult::Found {
                id,
                existing,
                updated: true,
            }))
        } else {
            Ok(WriteState::GivenUp(write_error(
                resource,
                format!("update rejected: {} {}", reply.status, reply.error_text()),
            )))
        }
    }

    /// `POST /products/attribute-sets/attributes`. The target answers with
    /// the entity attribute id, either bare or inside an object.
    pub async fn assign_attribute(&self, code: &str, body: &Value) -> MigrateResult<ReconciliationResult> {
        let reply = self
            .api
            .post(StoreScope::Default, "/products/attribute-sets/attributes", body)
            .await?;
        let id = value_as_i64(&reply.body).or_else(|| reply.id_field("attribute_id"));
        Ok(match (reply.is_success(), id) {
            (true, Some(id)) => ReconciliationResult::Created(id),
            _ => ReconciliationResult::Failed(MigrateError::Write {
                entity: "attribute assignment",
                key: code.to_string(),
                reason: format!("{} {}", reply.status, reply.error_text()),
            }),
        })
    }

    /// `PUT /categories/{id}` with custom attributes only.
    pub async fn update_category(&self, target_id: i64, body: &Value) -> MigrateResult<ReconciliationResult> {
        let reply = self
            .api
            .put(StoreScope::Default, &format!("/categories/{target_id}"), body)
            .await?;
        Ok(if reply.is_success() {
            ReconciliationResult::Found {
                id: target_id,
                existing: reply.body,
                updated: true,
            }
        } else {
            ReconciliationResult::Failed(MigrateError::Write {
                entity: "category attributes",
                key: target_id.to_string(),
                reason: format!("{} {}", reply.status, reply.error_text()),
            })
        })
    }
}

/// Update path and body for a matched record, or `None` when nothing needs
/// to change.
///
/// Attributes: only hidden ones are touched. The existing record is sent
/// back with `is_visible` set and the source label, minus `attribute_code`.
/// Products: the new payload overwrites the existing product.
fn override_for(resource: &Resource, body: &Value, existing: &Value) -> Option<(String, Value)> {
    match resource {
        Resource::Attribute { code } => {
            let visible = existing.get("is_visible").and_then(value_as_bool).unwrap_or(true);
            if visible {
                return None;
            }
            let mut update = existing.as_object()?.clone();
            update.insert("is_visible".into(), Value::Bool(true));
            if let Some(label) = body
                .pointer("/attribute/default_frontend_label")
                .and_then(scalar_to_string)
            {
                update.insert("default_frontend_label".into(), Value::String(label));
            }
            update.remove("attribute_code");
            Some((attribute_path(code), json!({ "attribute": update })))
        }
        Resource::Product { sku, .. } => Some((product_path(sku), body.clone())),
        Resource::Group { .. } | Resource::Category { .. } => None,
    }
}

/// Append `suffix` to the payload's url_key, creating one from the name when
/// absent. Returns false when there is nothing to derive a key from.
fn bump_url_key(body: &mut Value, envelope: &str, suffix: &str) -> bool {
    let Some(entity) = body.get_mut(envelope).and_then(Value::as_object_mut) else {
        return false;
    };
    let name = entity
        .get("name")
        .and_then(Value::as_str)
        .map(group_code);
    let attrs = entity
        .entry("custom_attributes")
        .or_insert_with(|| json!([]));
    let Some(attrs) = attrs.as_array_mut() else {
        return false;
    };
    if let Some(slot) = attrs
        .iter_mut()
        .find(|a| a.get("attribute_code").and_then(Value::as_str) == Some("url_key"))
    {
        let current = slot.get("value").and_then(scalar_to_string).unwrap_or_default();
        slot["value"] = Value::String(format!("{current}{suffix}"));
        return true;
    }
    match name.filter(|n| !n.is_empty()) {
        Some(base) => {
            attrs.push(json!({"attribute_code": "url_key", "value": format!("{base}{suffix}")}));
            true
        }
        None => false,
    }
}

fn reply_id(reply: &ApiReply, field: &str) -> Option<i64> {
    reply.id_field(field).or_else(|| value_as_i64(&reply.body))
}

fn search_items(reply: &ApiReply) -> Vec<Value> {
    if !reply.is_success() {
        return Vec::new();
    }
    reply
        .body
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn attribute_path(code: &str) -> String {
    format!("/products/attributes/{}", urlencoding::encode(code))
}

fn product_path(sku: &str) -> String {
    format!("/products/{}", urlencoding::encode(sku))
}

fn conflict_error(resource: &Resource, message: String) -> MigrateError {
    MigrateError::ConflictOnCreate {
        entity: resource.entity(),
        key: resource.key(),
        message,
    }
}

fn write_error(resource: &Resource, reason: String) -> MigrateError {
    MigrateError::Write {
        entity: resource.entity(),
        key: resource.key(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTarget;

    fn product_body(sku: &str, url_key: &str) -> Value {
        json!({
            "product": {
                "sku": sku,
                "name": "Rugged Tablet",
                "status": 1,
                "visibility": 4,
                "price": 199.5,
                "custom_attributes": [{"attribute_code": "url_key", "value": url_key}]
            },
            "saveOptions": true
        })
    }

    fn product(sku: &str) -> Resource {
        Resource::Product {
            sku: sku.into(),
            scope: StoreScope::Default,
        }
    }

    #[tokio::test]
    async fn reserved_attribute_is_found_and_made_visible() {
        let target = FakeTarget::default().with_reserved_attribute(json!({
            "attribute_id": 73,
            "attribute_code": "manufacturer",
            "is_visible": false,
            "frontend_input": "select",
            "scope": "global",
            "default_frontend_label": "manufacturer"
        }));
        let writer = TargetWriter::new(&target, "-1");
        let body = json!({"attribute": {"attribute_code": "manufacturer", "default_frontend_label": "Manufacturer"}});
        let out = writer
            .write(&Resource::Attribute { code: "manufacturer".into() }, body)
            .await
            .unwrap();

        match out {
            ReconciliationResult::Found { id, updated, .. } => {
                assert_eq!(id, 73);
                assert!(updated);
            }
            other => panic!("unexpected {other:?}"),
        }
        let put = target.last("PUT", "/products/attributes/manufacturer").unwrap();
        let a = &put["attribute"];
        assert_eq!(a["is_visible"], true);
        assert_eq!(a["default_frontend_label"], "Manufacturer");
        assert_eq!(a["frontend_input"], "select");
        assert_eq!(a["scope"], "global");
        assert!(a.get("attribute_code").is_none());
    }

    #[tokio::test]
    async fn visible_existing_attribute_is_left_alone() {
        let target = FakeTarget::default().with_reserved_attribute(json!({
            "attribute_id": 80, "attribute_code": "color", "is_visible": true
        }));
        let writer = TargetWriter::new(&target, "-1");
        let out = writer
            .write(&Resource::Attribute { code: "color".into() }, json!({"attribute": {"attribute_code": "color"}}))
            .await
            .unwrap();
        assert!(matches!(out, ReconciliationResult::Found { id: 80, updated: false, .. }));
        assert_eq!(target.count("PUT", "/products/attributes/color"), 0);
    }

    #[tokio::test]
    async fn url_key_conflict_retries_exactly_once() {
        let target = FakeTarget::default().with_taken_url_key("rugged-tablet");
        let writer = TargetWriter::new(&target, "-1");
        let out = writer
            .write(&product("TAB-5"), product_body("TAB-5", "rugged-tablet"))
            .await
            .unwrap();
        assert!(matches!(out, ReconciliationResult::Created(_)));
        assert_eq!(target.count("POST", "/products"), 2);
        let sent = target.last("POST", "/products").unwrap();
        assert_eq!(sent["product"]["custom_attributes"][0]["value"], "rugged-tablet-1");
    }

    #[tokio::test]
    async fn second_url_key_conflict_gives_up() {
        let target = FakeTarget::default()
            .with_taken_url_key("rugged-tablet")
            .with_taken_url_key("rugged-tablet-1");
        let writer = TargetWriter::new(&target, "-1");
        let out = writer
            .write(&product("TAB-5"), product_body("TAB-5", "rugged-tablet"))
            .await
            .unwrap();
        match out {
            ReconciliationResult::Failed(err) => assert_eq!(err.kind(), "conflict_on_create"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(target.count("POST", "/products"), 2);
    }

    #[tokio::test]
    async fn creating_twice_converges_on_one_product() {
        let target = FakeTarget::default();
        let writer = TargetWriter::new(&target, "-1");
        let first = writer
            .write(&product("TAB-5"), product_body("TAB-5", "rugged-tablet"))
            .await
            .unwrap();
        let ReconciliationResult::Created(id) = first else {
            panic!("expected create, got {first:?}");
        };
        let second = writer
            .write(&product("TAB-5"), product_body("TAB-5", "rugged-tablet"))
            .await
            .unwrap();
        assert!(matches!(second, ReconciliationResult::Found { id: found, updated: true, .. } if found == id));
        assert_eq!(target.product_count(), 1);

        let stored = target.product("TAB-5").unwrap();
        assert_eq!(stored["status"], 1);
        assert_eq!(stored["visibility"], 4);
        assert_eq!(stored["price"], 199.5);
    }

    #[tokio::test]
    async fn duplicate_group_is_matched_case_insensitively() {
        let target = FakeTarget::default().with_group(10, 55, "General");
        let writer = TargetWriter::new(&target, "-1");
        let out = writer
            .write(
                &Resource::Group { set_id: 10, name: "general".into() },
                json!({"group": {"attribute_group_name": "general", "attribute_set_id": 10}}),
            )
            .await
            .unwrap();
        assert!(matches!(out, ReconciliationResult::Found { id: 55, updated: false, .. }));
    }

    #[tokio::test]
    async fn rejected_create_is_a_write_failure() {
        let target = FakeTarget::default().with_reply(
            "POST",
            "/products/attributes",
            ApiReply::new(400, json!({"message": "Invalid value of \"%1\" provided for the %2 field.", "parameters": ["x", "frontend_input"]})),
        );
        let writer = TargetWriter::new(&target, "-1");
        let out = writer
            .write(&Resource::Attribute { code: "x".into() }, json!({"attribute": {}}))
            .await
            .unwrap();
        match out {
            ReconciliationResult::Failed(MigrateError::Write { reason, .. }) => {
                assert!(reason.contains("frontend_input"), "{reason}")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn category_body(name: &str, parent_id: i64, url_key: &str) -> Value {
        json!({"category": {
            "name": name,
            "parent_id": parent_id,
            "custom_attributes": [{"attribute_code": "url_key", "value": url_key}]
        }})
    }

    #[tokio::test]
    async fn taken_category_slug_finds_the_same_category() {
        let target = FakeTarget::default();
        let writer = TargetWriter::new(&target, "-1");
        let work = Resource::Category { name: "Work".into(), parent_id: 2 };
        let first = writer.write(&work, category_body("Work", 2, "work")).await.unwrap();
        let ReconciliationResult::Created(id) = first else {
            panic!("expected create, got {first:?}");
        };
        let second = writer.write(&work, category_body("Work", 2, "work")).await.unwrap();
        assert!(matches!(second, ReconciliationResult::Found { id: found, updated: false, .. } if found == id));
        assert_eq!(target.count("POST", "/categories"), 2);
        assert_eq!(target.count("GET", "/categories/list"), 1);
    }

    #[tokio::test]
    async fn taken_category_slug_without_match_is_bumped_once() {
        let target = FakeTarget::default();
        let writer = TargetWriter::new(&target, "-1");
        let sale = Resource::Category { name: "Sale".into(), parent_id: 2 };
        writer.write(&sale, category_body("Sale", 2, "sale")).await.unwrap();

        let other = Resource::Category { name: "Clearance".into(), parent_id: 2 };
        let out = writer.write(&other, category_body("Clearance", 2, "sale")).await.unwrap();
        assert!(matches!(out, ReconciliationResult::Created(_)));
        let sent = target.last("POST", "/categories").unwrap();
        assert_eq!(sent["category"]["custom_attributes"][0]["value"], "sale-1");
        assert_eq!(target.count("POST", "/categories"), 3);
    }

    #[test]
    fn url_key_is_derived_from_name_when_absent() {
        let mut body = json!({"category": {"name": "Work Wear", "custom_attributes": []}});
        assert!(bump_url_key(&mut body, "category", "-1"));
        assert_eq!(body["category"]["custom_attributes"][0]["value"], "work-wear-1");
        let mut nameless = json!({"category": {}});
        assert!(!bump_url_key(&mut nameless, "category", "-1"));
    }
}
