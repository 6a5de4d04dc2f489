use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};
use url::Url;

use super::{ApiReply, StoreScope, TargetApi};
use crate::config::MigrationConfig;
use crate::error::{classify_reqwest, MigrateError, MigrateResult, System};

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

/// Magento 2 REST client.
///
/// Auth: `POST {rest_endpoint}/integration/admin/token` with the admin
/// credentials returns a bare JSON string used as a bearer token afterwards.
/// Store-view writes go through per-store endpoints (`/rest/<code>/V1`).
#[derive(Debug, Clone)]
pub struct RestClient {
    base_url: String,
    default_endpoint: String,
    store_endpoints: BTreeMap<i64, String>,
    http: Client,
    token: String,
}

impl RestClient {
    pub fn new(
        base_url: &str,
        default_endpoint: &str,
        store_endpoints: BTreeMap<i64, String>,
        timeout: Duration,
    ) -> MigrateResult<Self> {
        let parsed = Url::parse(base_url).map_err(|e| {
            MigrateError::Config(format!("magento2_domain is not a valid url ({base_url}): {e}"))
        })?;
        let http = Client::builder()
            .user_agent("mage-migrate/0.1 (rest)")
            .timeout(timeout)
            .build()
            .map_err(|e| MigrateError::connection(System::Target, e))?;
        Ok(Self {
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            default_endpoint: default_endpoint.to_string(),
            store_endpoints,
            http,
            token: String::new(),
        })
    }

    /// Build from config and exchange admin credentials for a token.
    pub async fn connect(cfg: &MigrationConfig) -> MigrateResult<Self> {
        let mut client = Self::new(
            &cfg.magento2_domain,
            &cfg.rest_endpoint,
            cfg.store_endpoints.clone(),
            cfg.timeout(),
        )?;
        client.token = client
            .admin_token(&cfg.api_user, cfg.target_password())
            .await?;
        info!(
            base_url = %client.base_url,
            store_endpoints = client.store_endpoints.len(),
            "m2: admin token acquired"
        );
        Ok(client)
    }

    #[instrument(skip(self, password))]
    async fn admin_token(&self, username: &str, password: &str) -> MigrateResult<String> {
        let url = format!(
            "{}{}/integration/admin/token",
            self.base_url, self.default_endpoint
        );
        let resp = self
            .http
            .post(&url)
            .json(&json!({"username": username, "password": password}))
            .send()
            .await
            .map_err(|e| MigrateError::connection(System::Target, e))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| MigrateError::connection(System::Target, e))?;
        if !status.is_success() {
            return Err(MigrateError::connection(
                System::Target,
                format!(
                    "token request failed: {status} url={url} body={}",
                    truncate_for_log(body, 256)
                ),
            ));
        }
        match serde_json::from_str::<Value>(&body) {
            Ok(Value::String(token)) if !token.is_empty() => Ok(token),
            _ => Err(MigrateError::connection(
                System::Target,
                format!("token response was not a string: {}", truncate_for_log(body, 256)),
            )),
        }
    }

    fn endpoint(&self, scope: StoreScope) -> MigrateResult<&str> {
        match scope {
            StoreScope::Default => Ok(self.default_endpoint.as_str()),
            StoreScope::Store(id) => self
                .store_endpoints
                .get(&id)
                .map(String::as_str)
                .ok_or_else(|| MigrateError::Write {
                    entity: "store endpoint",
                    key: id.to_string(),
                    reason: "no REST endpoint configured for target store".into(),
                }),
        }
    }

    fn url(&self, scope: StoreScope, path: &str) -> MigrateResult<String> {
        let path = path.trim_start_matches('/');
        Ok(format!("{}{}/{path}", self.base_url, self.endpoint(scope)?))
    }

    async fn send(
        &self,
        method: Method,
        scope: StoreScope,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> MigrateResult<ApiReply> {
        let url = self.url(scope, path)?;
        let mut req = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json");
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| classify_reqwest(e, System::Target))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| classify_reqwest(e, System::Target))?;
        debug!(
            %method,
            %url,
            status = status.as_u16(),
            body = %truncate_for_log(text.clone(), 300),
            "m2: response"
        );

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(ApiReply::new(status.as_u16(), body))
    }
}

#[async_trait]
impl TargetApi for RestClient {
    async fn get(
        &self,
        scope: StoreScope,
        path: &str,
        query: &[(String, String)],
    ) -> MigrateResult<ApiReply> {
        self.send(Method::GET, scope, path, query, None).await
    }

    async fn post(&self, scope: StoreScope, path: &str, body: &Value) -> MigrateResult<ApiReply> {
        self.send(Method::POST, scope, path, &[], Some(body)).await
    }

    async fn put(&self, scope: StoreScope, path: &str, body: &Value) -> MigrateResult<ApiReply> {
        self.send(Method::PUT, scope, path, &[], Some(body)).await
    }

    fn has_scope(&self, scope: StoreScope) -> bool {
        self.endpoint(scope).is_ok()
    }
}
