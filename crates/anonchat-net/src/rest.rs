//! Hosted backend over its REST surface.
//!
//! Rows are read and written through the table endpoints
//! (`/rest/v1/messages`, `/rest/v1/message_likes`) using the filter syntax
//! of the backend (`parent_id=is.null`, `order=timestamp.desc`, ...). Like
//! toggling goes through the `toggle_message_like` remote procedure so the
//! relation row and the counter change atomically.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use anonchat_shared::constants::{LIKES_TABLE, MESSAGES_TABLE, TOGGLE_LIKE_RPC};
use anonchat_shared::{group_replies, Identity, Message, MessageId, NewMessage};

use crate::config::BackendConfig;
use crate::error::{GatewayError, Result};
use crate::gateway::{ChangeFeed, Gateway};
use crate::realtime;

#[derive(Debug, Deserialize)]
struct LikeRow {
    message_id: MessageId,
}

/// Gateway to the hosted backend. Construct once at startup and share it
/// behind an `Arc<dyn Gateway>`.
#[derive(Debug, Clone)]
pub struct HostedGateway {
    http: reqwest::Client,
    config: BackendConfig,
}

impl HostedGateway {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.anon_key)
            .map_err(|e| GatewayError::Config(format!("API key is not a valid header: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.anon_key))
            .map_err(|e| GatewayError::Config(format!("API key is not a valid header: {e}")))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            config,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let url = self.config.rest_url(table)?;
        debug!(%url, ?query, "select");
        let resp = self.http.get(url).query(query).send().await?;
        let body = check(resp).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Turn a non-success response into [`GatewayError::Status`] carrying the
/// backend's error body.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(GatewayError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Gateway for HostedGateway {
    async fn fetch_top_level(&self) -> Result<Vec<Message>> {
        self.select(
            MESSAGES_TABLE,
            &[
                ("select", "*"),
                ("parent_id", "is.null"),
                ("order", "timestamp.desc"),
            ],
        )
        .await
    }

    async fn fetch_replies(&self) -> Result<HashMap<MessageId, Vec<Message>>> {
        let rows: Vec<Message> = self
            .select(
                MESSAGES_TABLE,
                &[
                    ("select", "*"),
                    ("parent_id", "not.is.null"),
                    ("order", "timestamp.asc"),
                ],
            )
            .await?;
        Ok(group_replies(rows))
    }

    async fn fetch_all(&self) -> Result<Vec<Message>> {
        self.select(
            MESSAGES_TABLE,
            &[("select", "*"), ("order", "timestamp.desc")],
        )
        .await
    }

    async fn fetch_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let filter = format!("eq.{id}");
        let rows: Vec<Message> = self
            .select(MESSAGES_TABLE, &[("select", "*"), ("id", filter.as_str())])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_likes(&self, identity: &Identity) -> Result<HashSet<MessageId>> {
        let filter = format!("eq.{identity}");
        let rows: Vec<LikeRow> = self
            .select(LIKES_TABLE, &[("select", "message_id"), ("user_id", filter.as_str())])
            .await?;
        Ok(rows.into_iter().map(|r| r.message_id).collect())
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        let url = self.config.rest_url(MESSAGES_TABLE)?;
        let resp = self
            .http
            .post(url)
            .header("Prefer", "return=representation")
            .json(&[message])
            .send()
            .await?;
        let body = check(resp).await?.text().await?;
        let rows: Vec<Message> = serde_json::from_str(&body)?;
        let row = rows.into_iter().next().ok_or(GatewayError::EmptyResponse)?;
        debug!(id = %row.id, "inserted message");
        Ok(row)
    }

    async fn update_reply_count(&self, id: &MessageId, count: u32) -> Result<()> {
        let url = self.config.rest_url(MESSAGES_TABLE)?;
        let filter = format!("eq.{id}");
        let resp = self
            .http
            .patch(url)
            .query(&[("id", filter.as_str())])
            .header("Prefer", "return=minimal")
            .json(&json!({ "replies": count }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn toggle_like(&self, id: &MessageId, identity: &Identity) -> Result<()> {
        let url = self.config.rest_url(&format!("rpc/{TOGGLE_LIKE_RPC}"))?;
        let resp = self
            .http
            .post(url)
            .json(&json!({
                "message_id": id.as_str(),
                "user_id": identity.as_str(),
            }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<ChangeFeed> {
        realtime::subscribe(&self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::{HeaderMap as Headers, Method, StatusCode, Uri};
    use axum::Router;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    const PARENT: &str = "3f1c2a9e-7b4d-4c1e-9a2b-5d6e7f8a9b0c";
    const CHILD: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";

    /// One request as the stub backend received it.
    #[derive(Debug, Clone)]
    struct Seen {
        method: Method,
        path: String,
        query: String,
        prefer: Option<String>,
        apikey: Option<String>,
        body: String,
    }

    #[derive(Clone)]
    struct Stub {
        seen: Arc<Mutex<Vec<Seen>>>,
        status: StatusCode,
        body: String,
    }

    async fn record(
        State(stub): State<Stub>,
        method: Method,
        uri: Uri,
        headers: Headers,
        body: String,
    ) -> (StatusCode, String) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        stub.seen.lock().await.push(Seen {
            method,
            path: uri.path().to_string(),
            query: uri.query().unwrap_or_default().to_string(),
            prefer: header("prefer"),
            apikey: header("apikey"),
            body,
        });
        (stub.status, stub.body.clone())
    }

    /// Serve every request with the same canned response.
    async fn stub(status: StatusCode, body: Value) -> (HostedGateway, Arc<Mutex<Vec<Seen>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let state = Stub {
            seen: Arc::clone(&seen),
            status,
            body: body.to_string(),
        };
        let app = Router::new().fallback(record).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = BackendConfig::new(&format!("http://{addr}"), "anon-key").unwrap();
        (HostedGateway::new(config).unwrap(), seen)
    }

    async fn only_request(seen: &Mutex<Vec<Seen>>) -> Seen {
        let seen = seen.lock().await;
        assert_eq!(seen.len(), 1);
        seen[0].clone()
    }

    fn row(id: &str, parent: Option<&str>, content: &str) -> Value {
        json!({
            "id": id,
            "content": content,
            "username": "anon-abc",
            "timestamp": "2024-05-01T10:00:00+00:00",
            "tags": ["news"],
            "likes": 2,
            "replies": 1,
            "reactions": [],
            "liked_by": [],
            "parent_id": parent
        })
    }

    fn identity() -> Identity {
        Identity::new("anon-tester")
    }

    #[tokio::test]
    async fn test_top_level_filter_and_decode() {
        let (gw, seen) = stub(StatusCode::OK, json!([row(PARENT, None, "halo")])).await;

        let rows = gw.fetch_top_level().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id.as_str(), PARENT);
        assert_eq!(rows[0].like_count, 2);

        let req = only_request(&seen).await;
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.path, "/rest/v1/messages");
        assert!(req.query.contains("parent_id=is.null"));
        assert!(req.query.contains("order=timestamp.desc"));
        assert_eq!(req.apikey.as_deref(), Some("anon-key"));
    }

    #[tokio::test]
    async fn test_replies_filter_and_grouping() {
        let (gw, seen) = stub(StatusCode::OK, json!([row(CHILD, Some(PARENT), "re")])).await;

        let replies = gw.fetch_replies().await.unwrap();
        assert_eq!(replies[&MessageId::new(PARENT)].len(), 1);

        let req = only_request(&seen).await;
        assert!(req.query.contains("parent_id=not.is.null"));
        assert!(req.query.contains("order=timestamp.asc"));
    }

    #[tokio::test]
    async fn test_likes_query_by_identity() {
        let (gw, seen) = stub(StatusCode::OK, json!([{ "message_id": PARENT }])).await;

        let liked = gw.fetch_likes(&identity()).await.unwrap();
        assert!(liked.contains(&MessageId::new(PARENT)));

        let req = only_request(&seen).await;
        assert_eq!(req.path, format!("/rest/v1/{LIKES_TABLE}"));
        assert!(req.query.contains("user_id=eq.anon-tester"));
    }

    #[tokio::test]
    async fn test_insert_returns_stored_row() {
        let (gw, seen) = stub(StatusCode::CREATED, json!([row(PARENT, None, "halo")])).await;
        let draft = anonchat_shared::Draft::parse("halo", "news").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let payload = NewMessage::from_draft(&draft, &identity(), at, None);

        let stored = gw.insert_message(&payload).await.unwrap();
        assert_eq!(stored.id.as_str(), PARENT);

        let req = only_request(&seen).await;
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.prefer.as_deref(), Some("return=representation"));
        let sent: Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(sent[0]["content"], "halo");
        assert_eq!(sent[0]["username"], "anon-tester");
        assert_eq!(sent[0]["tags"], json!(["news"]));
    }

    #[tokio::test]
    async fn test_insert_without_row_is_an_error() {
        let (gw, _) = stub(StatusCode::CREATED, json!([])).await;
        let draft = anonchat_shared::Draft::parse("halo", "").unwrap();
        let payload = NewMessage::from_draft(&draft, &identity(), Utc::now(), None);

        assert!(matches!(
            gw.insert_message(&payload).await,
            Err(GatewayError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn test_reply_count_patch() {
        let (gw, seen) = stub(StatusCode::NO_CONTENT, json!(null)).await;

        gw.update_reply_count(&MessageId::new(PARENT), 3).await.unwrap();

        let req = only_request(&seen).await;
        assert_eq!(req.method, Method::PATCH);
        assert!(req.query.contains(&format!("id=eq.{PARENT}")));
        assert_eq!(req.prefer.as_deref(), Some("return=minimal"));
        let sent: Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(sent, json!({ "replies": 3 }));
    }

    #[tokio::test]
    async fn test_toggle_like_calls_rpc() {
        let (gw, seen) = stub(StatusCode::OK, json!(null)).await;

        gw.toggle_like(&MessageId::new(PARENT), &identity())
            .await
            .unwrap();

        let req = only_request(&seen).await;
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.path, format!("/rest/v1/rpc/{TOGGLE_LIKE_RPC}"));
        let sent: Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(sent, json!({ "message_id": PARENT, "user_id": "anon-tester" }));
    }

    #[tokio::test]
    async fn test_error_status_keeps_body() {
        let (gw, _) = stub(StatusCode::UNAUTHORIZED, json!({ "message": "bad key" })).await;

        match gw.fetch_all().await {
            Err(GatewayError::Status { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("bad key"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
