//! Magento 1 SOAP V1 client.
//!
//! Endpoint: `{magento_domain}/api/soap/`
//!
//! Calls used:
//! - `login(username, apiKey)` -> session id
//! - `call(sessionId, resourcePath, args)` -> rpc/encoded value
//! - `endSession(sessionId)`
//!
//! Replies come back SOAP-encoded: associative arrays as `ns2:Map` with
//! `item/key/value` children, lists as `SOAP-ENC:Array`, scalars typed with
//! `xsi:type`. [`decode_envelope`] turns that into `serde_json::Value`.
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use serde_json::{Map, Number, Value};
use tracing::{debug, info, instrument, warn};

use super::SourceApi;
use crate::error::{MigrateError, MigrateResult, System};

const ENVELOPE_OPEN: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/" "#,
    r#"xmlns:ns1="urn:Magento" xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
    r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
    r#"xmlns:SOAP-ENC="http://schemas.xmlsoap.org/soap/encoding/" "#,
    r#"SOAP-ENV:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">"#,
    "<SOAP-ENV:Body>"
);
const ENVELOPE_CLOSE: &str = "</SOAP-ENV:Body></SOAP-ENV:Envelope>";

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

/// Arguments for `call`, encoded SOAP-ENC style.
#[derive(Debug, Clone)]
pub enum SoapArg {
    Int(i64),
    Str(String),
    Nil,
    /// Positional arguments; the server unpacks them into the method call.
    List(Vec<SoapArg>),
}

impl SoapArg {
    fn write(&self, tag: &str, out: &mut String) {
        match self {
            SoapArg::Int(v) => {
                out.push_str(&format!(r#"<{tag} xsi:type="xsd:int">{v}</{tag}>"#));
            }
            SoapArg::Str(v) => {
                out.push_str(&format!(
                    r#"<{tag} xsi:type="xsd:string">{}</{tag}>"#,
                    escape(v.as_str())
                ));
            }
            SoapArg::Nil => {
                out.push_str(&format!(r#"<{tag} xsi:nil="true"/>"#));
            }
            SoapArg::List(items) => {
                out.push_str(&format!(
                    r#"<{tag} SOAP-ENC:arrayType="xsd:ur-type[{}]" xsi:type="SOAP-ENC:Array">"#,
                    items.len()
                ));
                for item in items {
                    item.write("item", out);
                }
                out.push_str(&format!("</{tag}>"));
            }
        }
    }
}

fn envelope(method: &str, params: &[(&str, SoapArg)]) -> String {
    let mut out = String::from(ENVELOPE_OPEN);
    out.push_str(&format!("<ns1:{method}>"));
    for (name, arg) in params {
        arg.write(name, &mut out);
    }
    out.push_str(&format!("</ns1:{method}>"));
    out.push_str(ENVELOPE_CLOSE);
    out
}

/// Minimal element tree; attribute keys are stored by local name.
#[derive(Debug, Default)]
struct Node {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn open_node(e: &quick_xml::events::BytesStart<'_>) -> Node {
    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
    let attrs = e
        .attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_string();
            let value = attr.unescape_value().unwrap_or_default().to_string();
            (key, value)
        })
        .collect();
    Node {
        name,
        attrs,
        ..Node::default()
    }
}

fn parse_tree(xml: &str) -> Result<Node, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(open_node(&e)),
            Ok(Event::Empty(e)) => {
                let node = open_node(&e);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&e.unescape().unwrap_or_default());
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                let Some(node) = stack.pop() else {
                    return Err("unbalanced closing tag".into());
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "xml error at position {}: {e}",
                    reader.buffer_position()
                ))
            }
        }
    }

    root.ok_or_else(|| "empty document".to_string())
}

fn decode_node(node: &Node) -> Value {
    if node.attr("nil").map(|v| v == "true" || v == "1").unwrap_or(false) {
        return Value::Null;
    }
    let ty = node.attr("type").unwrap_or("");
    let ty_local = ty.rsplit(':').next().unwrap_or(ty);

    if ty_local == "Map" {
        let mut obj = Map::new();
        for item in node.children.iter().filter(|c| c.name == "item") {
            let key = item.child("key").map(|k| k.text.clone()).unwrap_or_default();
            let value = item.child("value").map(decode_node).unwrap_or(Value::Null);
            obj.insert(key, value);
        }
        return Value::Object(obj);
    }

    let all_items = !node.children.is_empty() && node.children.iter().all(|c| c.name == "item");
    if ty_local == "Array" || all_items {
        return Value::Array(node.children.iter().map(decode_node).collect());
    }

    if !node.children.is_empty() {
        let mut obj = Map::new();
        for child in &node.children {
            obj.insert(child.name.clone(), decode_node(child));
        }
        return Value::Object(obj);
    }

    match ty_local {
        "int" | "integer" | "long" => node
            .text
            .trim()
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or_else(|_| Value::String(node.text.clone())),
        "float" | "double" => node
            .text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(node.text.clone())),
        "boolean" => Value::Bool(matches!(node.text.trim(), "true" | "1")),
        _ => Value::String(node.text.clone()),
    }
}

/// Outcome of decoding a SOAP reply body.
#[derive(Debug, Clone, PartialEq)]
pub enum SoapReply {
    Value(Value),
    Fault { code: String, message: String },
}

/// Decode a full SOAP envelope into the return value of the single method
/// response it carries, or the fault.
pub fn decode_envelope(xml: &str) -> Result<SoapReply, String> {
    let root = parse_tree(xml)?;
    if root.name != "Envelope" {
        return Err(format!("expected Envelope, got {}", root.name));
    }
    let body = root.child("Body").ok_or("envelope without Body")?;
    let response = body.children.first().ok_or("empty SOAP body")?;

    if response.name == "Fault" {
        let text = |n: &str| response.child(n).map(|c| c.text.clone()).unwrap_or_default();
        return Ok(SoapReply::Fault {
            code: text("faultcode"),
            message: text("faultstring"),
        });
    }

    Ok(SoapReply::Value(
        response.children.first().map(decode_node).unwrap_or(Value::Null),
    ))
}

#[derive(Debug)]
enum PostError {
    Transport(reqwest::Error),
    Malformed(String),
}

impl std::fmt::Display for PostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostError::Transport(e) => write!(f, "{e}"),
            PostError::Malformed(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SoapClient {
    endpoint: String,
    http: Client,
    session: String,
}

impl SoapClient {
    /// Open a SOAP session. Login faults are fatal: nothing else can run.
    #[instrument(skip(api_key))]
    pub async fn connect(
        magento_domain: &str,
        api_user: &str,
        api_key: &str,
        timeout: Duration,
    ) -> MigrateResult<Self> {
        let endpoint = format!("{}/api/soap/", magento_domain.trim_end_matches('/'));
        let http = Client::builder()
            .user_agent("mage-migrate/0.1 (soap)")
            .timeout(timeout)
            .build()
            .map_err(|e| MigrateError::connection(System::SourceApi, e))?;

        let mut client = Self {
            endpoint,
            http,
            session: String::new(),
        };
        let body = envelope(
            "login",
            &[
                ("username", SoapArg::Str(api_user.to_string())),
                ("apiKey", SoapArg::Str(api_key.to_string())),
            ],
        );
        let session = match client.post("login", body).await {
            Ok(SoapReply::Value(Value::String(s))) if !s.is_empty() => s,
            Ok(SoapReply::Value(other)) => {
                return Err(MigrateError::connection(
                    System::SourceApi,
                    format!("login returned no session id: {other}"),
                ))
            }
            Ok(SoapReply::Fault { code, message }) => {
                return Err(MigrateError::connection(
                    System::SourceApi,
                    format!("login fault {code}: {message}"),
                ))
            }
            Err(e) => return Err(MigrateError::connection(System::SourceApi, e)),
        };
        client.session = session;
        info!(endpoint = %client.endpoint, "soap: session opened");
        Ok(client)
    }

    pub async fn end_session(&self) {
        let body = envelope("endSession", &[("sessionId", SoapArg::Str(self.session.clone()))]);
        match self.post("endSession", body).await {
            Ok(SoapReply::Value(_)) => debug!("soap: session closed"),
            Ok(SoapReply::Fault { code, message }) => {
                warn!(%code, %message, "soap: endSession fault")
            }
            Err(e) => warn!(error = %e, "soap: endSession failed"),
        }
    }

    /// POST an envelope; transport errors are kept apart from unreadable replies.
    async fn post(&self, action: &str, body: String) -> Result<SoapReply, PostError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", format!("urn:Action#{action}"))
            .body(body)
            .send()
            .await
            .map_err(PostError::Transport)?;
        let status = resp.status();
        let text = resp.text().await.map_err(PostError::Transport)?;

        // Faults arrive as HTTP 500 with a well-formed envelope.
        match decode_envelope(&text) {
            Ok(reply) => Ok(reply),
            Err(parse) => Err(PostError::Malformed(format!(
                "{action} failed: {status} url={} parse={parse} body={}",
                self.endpoint,
                truncate_for_log(text, 512)
            ))),
        }
    }

    /// `call(sessionId, resourcePath, args)`. A transport failure mid-run is a
    /// lost source, not a bad entity.
    pub async fn call(&self, resource: &str, args: Option<SoapArg>) -> MigrateResult<Value> {
        let mut params = vec![
            ("sessionId", SoapArg::Str(self.session.clone())),
            ("resourcePath", SoapArg::Str(resource.to_string())),
        ];
        let arg_desc = args.as_ref().map(|a| format!("{a:?}")).unwrap_or_default();
        if let Some(args) = args {
            params.push(("args", args));
        }
        debug!(resource, args = %arg_desc, "soap: call");
        match self.post(resource, envelope("call", &params)).await {
            Err(PostError::Transport(e)) if e.is_connect() || e.is_timeout() => {
                Err(MigrateError::connection(System::SourceApi, e))
            }
            Err(e) => Err(MigrateError::fetch(
                "soap resource",
                format!("{resource}({arg_desc})"),
                e,
            )),
            Ok(SoapReply::Fault { code, message }) => Err(MigrateError::fetch(
                "soap resource",
                format!("{resource}({arg_desc})"),
                format!("fault {code}: {message}"),
            )),
            Ok(SoapReply::Value(v)) => Ok(v),
        }
    }
}

fn into_list(v: Value) -> Vec<Value> {
    match v {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        Value::Object(obj) => obj.into_iter().map(|(_, v)| v).collect(),
        other => vec![other],
    }
}

/// `(productId, storeView, attributes, identifierType)`. Without the explicit
/// `id` type Magento tries the value as a SKU first.
fn product_info_args(product_id: i64) -> SoapArg {
    SoapArg::List(vec![
        SoapArg::Str(product_id.to_string()),
        SoapArg::Nil,
        SoapArg::Nil,
        SoapArg::Str("id".to_string()),
    ])
}

#[async_trait]
impl SourceApi for SoapClient {
    async fn product_list(&self) -> MigrateResult<Vec<Value>> {
        let list = into_list(self.call("catalog_product.list", None).await?);
        info!(product_count = list.len(), "soap: products listed");
        Ok(list)
    }

    async fn product_info(&self, product_id: i64) -> MigrateResult<Value> {
        self.call("catalog_product.info", Some(product_info_args(product_id)))
            .await
    }

    async fn attribute_info(&self, attribute_id: i64) -> MigrateResult<Value> {
        self.call(
            "product_attribute.info",
            Some(SoapArg::Str(attribute_id.to_string())),
        )
        .await
    }

    async fn attribute_list(&self, set_id: i64) -> MigrateResult<Vec<Value>> {
        let v = self
            .call("product_attribute.list", Some(SoapArg::Int(set_id)))
            .await?;
        Ok(into_list(v))
    }

    async fn category_tree(&self) -> MigrateResult<Value> {
        self.call("catalog_category.tree", None).await
    }

    async fn category_info(&self, category_id: i64) -> MigrateResult<Value> {
        self.call(
            "catalog_category.info",
            Some(SoapArg::Str(category_id.to_string())),
        )
        .await
    }
}
