//! In-memory stand-ins for both Magento installations.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::config::{MappingTables, MigrationConfig};
use crate::error::{MigrateError, MigrateResult, System};
use crate::payload::{group_code, AssetFetcher, FetchedAsset};
use crate::record::scalar_to_string;
use crate::source::{
    AttributeGroupRow, CategoryAttributeValue, EavValue, MediaRow, SourceApi, SourceStore,
    SuperAttributeRow, TierPriceRow, ValueScope,
};
use crate::target::{ApiReply, StoreScope, TargetApi, URL_KEY_TAKEN};

pub fn test_config(mappings: MappingTables) -> MigrationConfig {
    let raw = json!({
        "magento_domain": "https://m1.example.com",
        "api_user": "migrator",
        "api_key": "secret",
        "db_host": "127.0.0.1",
        "db_name": "magento1",
        "db_user": "root",
        "magento2_domain": "https://m2.example.com",
        "rest_endpoint": "/rest/all/V1"
    });
    let mut cfg = MigrationConfig::from_json(&raw.to_string()).expect("test config");
    cfg.mappings = mappings;
    cfg
}

// ---------------------------------------------------------------- source api

#[derive(Default)]
pub struct FakeSource {
    products: Vec<Value>,
    attribute_info: HashMap<i64, Value>,
    failing_attributes: HashSet<i64>,
    failing_products: HashSet<i64>,
    attribute_lists: HashMap<i64, Vec<Value>>,
    tree: Option<Value>,
}

impl FakeSource {
    pub fn with_product(mut self, summary: Value) -> Self {
        self.products.push(summary);
        self
    }

    pub fn with_attribute_info(mut self, id: i64, info: Value) -> Self {
        self.attribute_info.insert(id, info);
        self
    }

    pub fn failing_attribute_info(mut self, id: i64) -> Self {
        self.failing_attributes.insert(id);
        self
    }

    pub fn failing_product_info(mut self, id: i64) -> Self {
        self.failing_products.insert(id);
        self
    }

    pub fn with_attribute_list(mut self, set_id: i64, items: Value) -> Self {
        let items = items.as_array().cloned().unwrap_or_default();
        self.attribute_lists.insert(set_id, items);
        self
    }

    pub fn with_category_tree(mut self, tree: Value) -> Self {
        self.tree = Some(tree);
        self
    }
}

#[async_trait]
impl SourceApi for FakeSource {
    async fn product_list(&self) -> MigrateResult<Vec<Value>> {
        Ok(self.products.clone())
    }

    async fn product_info(&self, product_id: i64) -> MigrateResult<Value> {
        if self.failing_products.contains(&product_id) {
            return Err(MigrateError::fetch("soap resource", product_id, "Product not exists."));
        }
        Ok(json!({}))
    }

    async fn attribute_info(&self, attribute_id: i64) -> MigrateResult<Value> {
        if self.failing_attributes.contains(&attribute_id) {
            return Err(MigrateError::fetch(
                "soap resource",
                attribute_id,
                "Requested attribute not found.",
            ));
        }
        Ok(self
            .attribute_info
            .get(&attribute_id)
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    async fn attribute_list(&self, set_id: i64) -> MigrateResult<Vec<Value>> {
        Ok(self.attribute_lists.get(&set_id).cloned().unwrap_or_default())
    }

    async fn category_tree(&self) -> MigrateResult<Value> {
        self.tree
            .clone()
            .ok_or_else(|| MigrateError::fetch("soap resource", "catalog_category.tree", "empty"))
    }

    async fn category_info(&self, _category_id: i64) -> MigrateResult<Value> {
        Ok(json!({}))
    }
}

// -------------------------------------------------------------- source store

#[derive(Default)]
pub struct FakeStore {
    groups: BTreeMap<i64, Vec<(AttributeGroupRow, Vec<Value>)>>,
    option_labels: HashMap<i64, Vec<String>>,
    store_labels: HashMap<(i64, i64), String>,
    categories: HashMap<i64, Vec<i64>>,
    values: HashMap<i64, Vec<EavValue>>,
    website_stores: BTreeMap<i64, Vec<i64>>,
    category_values: Vec<CategoryAttributeValue>,
}

impl FakeStore {
    pub fn with_group(mut self, set_id: i64, group: AttributeGroupRow, rows: Vec<Value>) -> Self {
        self.groups.entry(set_id).or_default().push((group, rows));
        self
    }

    pub fn with_option_labels(mut self, attribute_id: i64, labels: &[&str]) -> Self {
        self.option_labels
            .insert(attribute_id, labels.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_option_label(mut self, option_id: i64, store_id: i64, label: &str) -> Self {
        self.store_labels
            .insert((option_id, store_id), label.to_string());
        self
    }

    pub fn with_categories(mut self, product_id: i64, ids: &[i64]) -> Self {
        self.categories.insert(product_id, ids.to_vec());
        self
    }

    /// `(attribute_code, store_id, value)` rows for one product.
    pub fn with_values(mut self, product_id: i64, rows: Vec<(&str, i64, Option<&str>)>) -> Self {
        let rows = rows
            .into_iter()
            .map(|(code, store_id, value)| EavValue {
                attribute_code: code.to_string(),
                store_id,
                value: value.map(str::to_string),
            })
            .collect();
        self.values.insert(product_id, rows);
        self
    }

    pub fn with_website_stores(mut self, website_id: i64, stores: &[i64]) -> Self {
        self.website_stores.insert(website_id, stores.to_vec());
        self
    }

    pub fn website_stores_now(&self) -> BTreeMap<i64, Vec<i64>> {
        self.website_stores.clone()
    }

    pub fn with_category_value(mut self, category_id: i64, code: &str, value: Option<&str>) -> Self {
        self.category_values.push(CategoryAttributeValue {
            category_id,
            attribute_code: code.to_string(),
            value: value.map(str::to_string),
        });
        self
    }
}

#[async_trait]
impl SourceStore for FakeStore {
    async fn attribute_groups(&self, set_id: i64) -> MigrateResult<Vec<AttributeGroupRow>> {
        Ok(self
            .groups
            .get(&set_id)
            .map(|g| g.iter().map(|(row, _)| row.clone()).collect())
            .unwrap_or_default())
    }

    async fn group_attributes(
        &self,
        set_id: i64,
        group_id: i64,
    ) -> MigrateResult<Vec<Map<String, Value>>> {
        Ok(self
            .groups
            .get(&set_id)
            .and_then(|g| g.iter().find(|(row, _)| row.attribute_group_id == group_id))
            .map(|(_, rows)| rows.iter().filter_map(|r| r.as_object().cloned()).collect())
            .unwrap_or_default())
    }

    async fn attribute_option_labels(&self, attribute_id: i64) -> MigrateResult<Vec<String>> {
        Ok(self.option_labels.get(&attribute_id).cloned().unwrap_or_default())
    }

    async fn attribute_frontend_label(&self, _attribute_id: i64) -> MigrateResult<Option<String>> {
        Ok(None)
    }

    async fn option_label(&self, option_id: i64, store_id: i64) -> MigrateResult<Option<String>> {
        Ok(self.store_labels.get(&(option_id, store_id)).cloned())
    }

    async fn product_category_ids(&self, product_id: i64) -> MigrateResult<Vec<i64>> {
        Ok(self.categories.get(&product_id).cloned().unwrap_or_default())
    }

    async fn media_gallery(&self, _product_id: i64) -> MigrateResult<Vec<MediaRow>> {
        Ok(Vec::new())
    }

    async fn tier_prices(&self, _product_id: i64) -> MigrateResult<Vec<TierPriceRow>> {
        Ok(Vec::new())
    }

    async fn super_attributes(&self, _product_id: i64) -> MigrateResult<Vec<SuperAttributeRow>> {
        Ok(Vec::new())
    }

    async fn super_links(&self, _parent_id: i64) -> MigrateResult<Vec<i64>> {
        Ok(Vec::new())
    }

    async fn product_values(
        &self,
        product_id: i64,
        scope: ValueScope,
    ) -> MigrateResult<Vec<EavValue>> {
        let mut rows: Vec<EavValue> = self
            .values
            .get(&product_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|v| scope == ValueScope::AllStores || v.store_id == 0)
            .collect();
        rows.sort_by_key(|v| v.store_id);
        Ok(rows)
    }

    async fn website_stores(&self) -> MigrateResult<BTreeMap<i64, Vec<i64>>> {
        Ok(self.website_stores.clone())
    }

    async fn category_attribute_values(&self) -> MigrateResult<Vec<CategoryAttributeValue>> {
        Ok(self.category_values.clone())
    }
}

// -------------------------------------------------------------------- target

#[derive(Debug, Clone)]
pub struct Request {
    pub method: &'static str,
    pub scope: StoreScope,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Value,
}

#[derive(Default)]
struct TargetState {
    log: Vec<Request>,
    scripted: HashMap<(String, String), VecDeque<ApiReply>>,
    next_id: i64,
    attributes: BTreeMap<String, Value>,
    reserved: HashSet<String>,
    attribute_options: HashMap<String, Value>,
    set_attributes: HashMap<i64, Value>,
    groups: Vec<Value>,
    categories: Vec<Value>,
    products: BTreeMap<String, Value>,
    /// url_key -> owning sku (or category id).
    url_keys: HashMap<String, String>,
    /// Requests past this many fail at the transport level.
    outage_after: Option<usize>,
}

impl TargetState {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        1000 + self.next_id
    }
}

/// Stateful enough to exercise create, conflict, search and update paths.
#[derive(Default)]
pub struct FakeTarget {
    state: Mutex<TargetState>,
    scopes: BTreeSet<i64>,
}

fn ok(body: Value) -> ApiReply {
    ApiReply::new(200, body)
}

fn fail(status: u16, message: &str, params: &[&str]) -> ApiReply {
    ApiReply::new(status, json!({"message": message, "parameters": params}))
}

fn url_key_of(entity: &Value) -> Option<String> {
    entity
        .get("custom_attributes")?
        .as_array()?
        .iter()
        .find(|a| a.get("attribute_code").and_then(Value::as_str) == Some("url_key"))
        .and_then(|a| a.get("value"))
        .and_then(scalar_to_string)
}

/// `(field, value)` pairs from a searchCriteria query.
fn filters(query: &[(String, String)]) -> Vec<(String, String)> {
    let fields = query.iter().filter(|(k, _)| k.ends_with("[field]"));
    let values = query.iter().filter(|(k, _)| k.ends_with("[value]"));
    fields
        .zip(values)
        .map(|((_, f), (_, v))| (f.clone(), v.clone()))
        .collect()
}

fn search(items: &[Value], query: &[(String, String)]) -> ApiReply {
    let wanted = filters(query);
    let found: Vec<Value> = items
        .iter()
        .filter(|item| {
            wanted.iter().all(|(f, v)| {
                item.get(f)
                    .and_then(scalar_to_string)
                    .is_some_and(|s| s.eq_ignore_ascii_case(v))
            })
        })
        .cloned()
        .collect();
    ok(json!({"items": found, "total_count": found.len()}))
}

fn decode(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

impl FakeTarget {
    /// The target drops off the network after `requests` calls.
    pub fn with_outage_after(self, requests: usize) -> Self {
        self.state.lock().unwrap().outage_after = Some(requests);
        self
    }

    pub fn with_reply(self, method: &str, path: &str, reply: ApiReply) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    /// An attribute the target refuses to create again ("reserved by system").
    pub fn with_reserved_attribute(self, attribute: Value) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            let code = attribute["attribute_code"].as_str().unwrap_or_default().to_string();
            st.reserved.insert(code.clone());
            st.attributes.insert(code, attribute);
        }
        self
    }

    pub fn with_attribute_options(self, code: &str, options: Value) -> Self {
        self.state
            .lock()
            .unwrap()
            .attribute_options
            .insert(code.to_string(), options);
        self
    }

    pub fn with_taken_url_key(self, url_key: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .url_keys
            .insert(url_key.to_string(), "someone-else".to_string());
        self
    }

    pub fn with_group(self, set_id: i64, group_id: i64, name: &str) -> Self {
        self.state.lock().unwrap().groups.push(json!({
            "attribute_group_id": group_id,
            "attribute_group_name": name,
            "attribute_set_id": set_id
        }));
        self
    }

    pub fn with_set_attributes(self, set_id: i64, attributes: Value) -> Self {
        self.state
            .lock()
            .unwrap()
            .set_attributes
            .insert(set_id, attributes);
        self
    }

    pub fn with_store_scope(mut self, store_id: i64) -> Self {
        self.scopes.insert(store_id);
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn requests_in(&self, scope: StoreScope) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.scope == scope)
            .collect()
    }

    pub fn bodies(&self, method: &str, path: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .map(|r| r.body)
            .collect()
    }

    pub fn last(&self, method: &str, path: &str) -> Option<Value> {
        self.bodies(method, path).pop()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.bodies(method, path).len()
    }

    pub fn product(&self, sku: &str) -> Option<Value> {
        self.state.lock().unwrap().products.get(sku).cloned()
    }

    pub fn product_count(&self) -> usize {
        self.state.lock().unwrap().products.len()
    }

    fn handle(
        &self,
        method: &'static str,
        scope: StoreScope,
        path: &str,
        query: &[(String, String)],
        body: Value,
    ) -> MigrateResult<ApiReply> {
        let mut st = self.state.lock().unwrap();
        st.log.push(Request {
            method,
            scope,
            path: path.to_string(),
            query: query.to_vec(),
            body: body.clone(),
        });
        if st.outage_after.is_some_and(|n| st.log.len() > n) {
            return Err(MigrateError::connection(System::Target, "connection reset by peer"));
        }
        if let Some(reply) = st
            .scripted
            .get_mut(&(method.to_string(), path.to_string()))
            .and_then(VecDeque::pop_front)
        {
            return Ok(reply);
        }
        Ok(route(&mut st, method, path, query, &body))
    }
}

fn route(
    st: &mut TargetState,
    method: &str,
    path: &str,
    query: &[(String, String)],
    body: &Value,
) -> ApiReply {
    let segs: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match (method, segs.as_slice()) {
        ("GET", ["products", "attributes", code, "options"]) => {
            match st.attribute_options.get(&decode(code)) {
                Some(options) => ok(options.clone()),
                None => fail(404, "The attribute with a \"%1\" attributeCode doesn't exist.", &[*code]),
            }
        }
        ("GET", ["products", "attribute-sets", "groups", "list"]) => search(&st.groups, query),
        ("GET", ["products", "attribute-sets", set, "attributes"]) => {
            let set: i64 = set.parse().unwrap_or_default();
            ok(st.set_attributes.get(&set).cloned().unwrap_or_else(|| json!([])))
        }
        ("GET", ["products", "attributes", code]) => match st.attributes.get(&decode(code)) {
            Some(a) => ok(a.clone()),
            None => fail(404, "The attribute with a \"%1\" attributeCode doesn't exist.", &[*code]),
        },
        ("POST", ["products", "attributes"]) => {
            let mut attr = body["attribute"].clone();
            let code = attr["attribute_code"].as_str().unwrap_or_default().to_string();
            if st.reserved.contains(&code) {
                return fail(
                    400,
                    "The attribute code \"%1\" is reserved by system. Please try another attribute code",
                    &[code.as_str()],
                );
            }
            if st.attributes.contains_key(&code) {
                return fail(400, "An attribute with the same code (%1) already exists.", &[code.as_str()]);
            }
            attr["attribute_id"] = json!(st.id());
            st.attributes.insert(code, attr.clone());
            ok(attr)
        }
        ("PUT", ["products", "attributes", code]) => {
            let code = decode(code);
            let Some(existing) = st.attributes.get_mut(&code) else {
                return fail(404, "The attribute with a \"%1\" attributeCode doesn't exist.", &[code.as_str()]);
            };
            if let (Some(dst), Some(src)) = (existing.as_object_mut(), body["attribute"].as_object()) {
                for (k, v) in src {
                    dst.insert(k.clone(), v.clone());
                }
            }
            ok(existing.clone())
        }
        ("POST", ["products", "attribute-sets", "groups"]) => {
            let mut group = body["group"].clone();
            let name = group["attribute_group_name"].as_str().unwrap_or_default().to_string();
            let set = group["attribute_set_id"].clone();
            let exists = st.groups.iter().any(|g| {
                g["attribute_set_id"] == set
                    && g["attribute_group_name"]
                        .as_str()
                        .is_some_and(|n| n.eq_ignore_ascii_case(&name))
            });
            if exists {
                return fail(400, "The attribute group can't be saved.", &[]);
            }
            group["attribute_group_id"] = json!(st.id());
            st.groups.push(group.clone());
            ok(group)
        }
        ("POST", ["products", "attribute-sets", "attributes"]) => ok(json!(st.id())),
        ("POST", ["products"]) => {
            let mut product = body["product"].clone();
            let sku = product["sku"].as_str().unwrap_or_default().to_string();
            if st.products.contains_key(&sku) {
                return fail(400, "The product with SKU \"%1\" already exists.", &[sku.as_str()]);
            }
            if let Some(key) = url_key_of(&product) {
                if st.url_keys.get(&key).is_some_and(|owner| *owner != sku) {
                    return fail(400, URL_KEY_TAKEN, &[]);
                }
                st.url_keys.insert(key, sku.clone());
            }
            product["id"] = json!(st.id());
            st.products.insert(sku, product.clone());
            ok(product)
        }
        ("GET", ["products", sku]) => match st.products.get(&decode(sku)) {
            Some(p) => ok(p.clone()),
            None => fail(404, "The product that was requested doesn't exist.", &[]),
        },
        ("PUT", ["products", sku]) => {
            let sku = decode(sku);
            let Some(id) = st.products.get(&sku).map(|p| p["id"].clone()) else {
                return fail(404, "The product that was requested doesn't exist.", &[]);
            };
            let mut product = body["product"].clone();
            product["id"] = id;
            st.products.insert(sku, product.clone());
            ok(product)
        }
        ("POST", ["categories"]) => {
            let mut category = body["category"].clone();
            // Magento derives a missing category url_key from the name.
            let key = url_key_of(&category)
                .or_else(|| category["name"].as_str().map(group_code))
                .filter(|k| !k.is_empty());
            if key.as_ref().is_some_and(|k| st.url_keys.contains_key(k)) {
                return fail(400, URL_KEY_TAKEN, &[]);
            }
            let id = st.id();
            if let Some(key) = key {
                st.url_keys.insert(key, id.to_string());
            }
            category["id"] = json!(id);
            st.categories.push(category.clone());
            ok(category)
        }
        ("GET", ["categories", "list"]) => search(&st.categories, query),
        ("PUT", ["categories", _id]) => ok(body["category"].clone()),
        _ => fail(404, "Request does not match any route.", &[]),
    }
}

#[async_trait]
impl TargetApi for FakeTarget {
    async fn get(
        &self,
        scope: StoreScope,
        path: &str,
        query: &[(String, String)],
    ) -> MigrateResult<ApiReply> {
        self.handle("GET", scope, path, query, Value::Null)
    }

    async fn post(&self, scope: StoreScope, path: &str, body: &Value) -> MigrateResult<ApiReply> {
        self.handle("POST", scope, path, &[], body.clone())
    }

    async fn put(&self, scope: StoreScope, path: &str, body: &Value) -> MigrateResult<ApiReply> {
        self.handle("PUT", scope, path, &[], body.clone())
    }

    fn has_scope(&self, scope: StoreScope) -> bool {
        match scope {
            StoreScope::Default => true,
            StoreScope::Store(id) => self.scopes.contains(&id),
        }
    }
}

// -------------------------------------------------------------------- assets

#[derive(Default)]
pub struct FakeAssets {
    files: HashMap<String, FetchedAsset>,
}

impl FakeAssets {
    pub fn with(mut self, url: &str, bytes: &[u8], content_type: &str) -> Self {
        self.files.insert(
            url.to_string(),
            FetchedAsset {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl AssetFetcher for FakeAssets {
    async fn fetch(&self, url: &str) -> MigrateResult<FetchedAsset> {
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| MigrateError::fetch("image", url, "http 404 Not Found"))
    }
}
