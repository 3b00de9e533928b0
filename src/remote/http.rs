//! HTTP client for the remote learning platform
//!
//! Nodes live under `{base}/api/{courses|sections|lessons|steps}`. Bodies
//! are flat JSON objects: `{ id, parent_id, position, kind, ...payload }`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::auth::TokenSource;
use super::client::RemoteClient;
use super::types::{CreateAck, RemoteError, RemoteNode, RemoteWrite};
use crate::config::RemoteConfig;
use crate::context::SyncContext;
use crate::tree::{NodeKind, Payload};

/// reqwest based [`RemoteClient`]
pub struct HttpRemoteClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl HttpRemoteClient {
    pub fn new(config: &RemoteConfig, tokens: Arc<dyn TokenSource>) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RemoteError::Transient(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    fn collection_url(&self, kind: NodeKind) -> String {
        format!("{}/api/{}", self.base_url, kind.plural())
    }

    fn node_url(&self, kind: NodeKind, remote_id: i64) -> String {
        format!("{}/{}", self.collection_url(kind), remote_id)
    }

    fn request(
        &self,
        ctx: &SyncContext,
        method: Method,
        url: &str,
    ) -> Result<RequestBuilder, RemoteError> {
        let token = self
            .tokens
            .token_for(ctx.user_id)
            .ok_or(RemoteError::Auth(ctx.user_id))?;

        tracing::debug!("{} {} (user {})", method, url, ctx.user_id);
        Ok(self.client.request(method, url).bearer_auth(token))
    }
}

#[derive(Serialize)]
struct NodeBody<'a> {
    parent_id: Option<i64>,
    position: i32,
    #[serde(flatten)]
    payload: &'a Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    captcha_token: Option<&'a str>,
}

impl<'a> NodeBody<'a> {
    fn new(write: &'a RemoteWrite, captcha_token: Option<&'a str>) -> Self {
        Self {
            parent_id: write.parent_id,
            position: write.position,
            payload: &write.payload,
            captcha_token,
        }
    }
}

#[derive(Deserialize)]
struct NodeDto {
    id: i64,
    #[serde(default)]
    parent_id: Option<i64>,
    position: i32,
    #[serde(flatten)]
    payload: Payload,
}

impl From<NodeDto> for RemoteNode {
    fn from(dto: NodeDto) -> Self {
        RemoteNode {
            id: dto.id,
            parent_id: dto.parent_id,
            position: dto.position,
            payload: dto.payload,
        }
    }
}

#[derive(Deserialize)]
struct CreatedDto {
    id: Value,
    #[serde(default)]
    position: Option<i32>,
    #[serde(default)]
    captcha_token: Option<String>,
}

#[derive(Deserialize)]
struct ChallengeDto {
    captcha: String,
}

#[derive(Deserialize)]
struct ChildrenDto {
    ids: Vec<i64>,
}

/// The platform answers with either a numeric id or a site key string
fn identifier_from(value: Value) -> Result<String, RemoteError> {
    match value {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s),
        other => Err(RemoteError::Decode(format!("unexpected identifier {}", other))),
    }
}

fn send_error(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::Decode(e.to_string())
    } else {
        RemoteError::Transient(e.to_string())
    }
}

async fn check(
    response: Response,
    kind: NodeKind,
    remote_id: Option<i64>,
) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if let (StatusCode::NOT_FOUND, Some(id)) = (status, remote_id) {
        return Err(RemoteError::NotFound { kind, id });
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(RemoteError::Transient(format!("{} request failed with {}: {}", kind, status, body)))
    } else {
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

async fn read_node(response: Response) -> Result<RemoteNode, RemoteError> {
    let dto: NodeDto = response
        .json()
        .await
        .map_err(|e| RemoteError::Decode(e.to_string()))?;
    Ok(dto.into())
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn create(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        write: &RemoteWrite,
        challenge_token: Option<&str>,
    ) -> Result<CreateAck, RemoteError> {
        let url = self.collection_url(kind);
        let response = self
            .request(ctx, Method::POST, &url)?
            .json(&NodeBody::new(write, challenge_token))
            .send()
            .await
            .map_err(send_error)?;

        if response.status() == StatusCode::FORBIDDEN {
            let body = response.text().await.map_err(send_error)?;
            return match serde_json::from_str::<ChallengeDto>(&body) {
                Ok(challenge) => Ok(CreateAck {
                    identifier: challenge.captcha,
                    position: None,
                    challenge_token: None,
                }),
                Err(_) => Err(RemoteError::Rejected { status: 403, body }),
            };
        }

        let created: CreatedDto = check(response, kind, None)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        Ok(CreateAck {
            identifier: identifier_from(created.id)?,
            position: created.position,
            challenge_token: created.captcha_token,
        })
    }

    async fn update(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        remote_id: i64,
        write: &RemoteWrite,
    ) -> Result<RemoteNode, RemoteError> {
        let url = self.node_url(kind, remote_id);
        let response = self
            .request(ctx, Method::PUT, &url)?
            .json(&NodeBody::new(write, None))
            .send()
            .await
            .map_err(send_error)?;

        read_node(check(response, kind, Some(remote_id)).await?).await
    }

    async fn get(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        remote_id: i64,
    ) -> Result<RemoteNode, RemoteError> {
        let url = self.node_url(kind, remote_id);
        let response = self
            .request(ctx, Method::GET, &url)?
            .send()
            .await
            .map_err(send_error)?;

        read_node(check(response, kind, Some(remote_id)).await?).await
    }

    async fn delete(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        remote_id: i64,
    ) -> Result<(), RemoteError> {
        let url = self.node_url(kind, remote_id);
        let response = self
            .request(ctx, Method::DELETE, &url)?
            .send()
            .await
            .map_err(send_error)?;

        check(response, kind, Some(remote_id)).await?;
        Ok(())
    }

    async fn list_children(
        &self,
        ctx: &SyncContext,
        kind: NodeKind,
        remote_id: i64,
    ) -> Result<Vec<i64>, RemoteError> {
        if kind.child().is_none() {
            return Ok(Vec::new());
        }

        let url = format!("{}/children", self.node_url(kind, remote_id));
        let response = self
            .request(ctx, Method::GET, &url)?
            .send()
            .await
            .map_err(send_error)?;

        let children: ChildrenDto = check(response, kind, Some(remote_id))
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        Ok(children.ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::StaticTokens;
    use crate::test_support::{lesson, section};

    fn client() -> HttpRemoteClient {
        let config = RemoteConfig {
            base_url: "https://platform.example/".to_string(),
            tokens: String::new(),
            timeout_secs: 5,
        };
        HttpRemoteClient::new(&config, Arc::new(StaticTokens::parse("7:secret"))).unwrap()
    }

    #[test]
    fn test_urls() {
        let client = client();
        assert_eq!(client.collection_url(NodeKind::Step), "https://platform.example/api/steps");
        assert_eq!(
            client.node_url(NodeKind::Lesson, 42),
            "https://platform.example/api/lessons/42"
        );
    }

    #[test]
    fn test_request_requires_credentials() {
        let client = client();
        assert!(client.request(&SyncContext::new(7), Method::GET, "https://platform.example").is_ok());
        assert!(matches!(
            client.request(&SyncContext::new(8), Method::GET, "https://platform.example"),
            Err(RemoteError::Auth(8))
        ));
    }

    #[test]
    fn test_body_is_flat() {
        let write = RemoteWrite {
            parent_id: Some(3),
            position: 2,
            payload: lesson("Ownership"),
        };
        let json = serde_json::to_value(NodeBody::new(&write, Some("tok"))).unwrap();

        assert_eq!(json["parent_id"], 3);
        assert_eq!(json["position"], 2);
        assert_eq!(json["kind"], "lesson");
        assert_eq!(json["title"], "Ownership");
        assert_eq!(json["captcha_token"], "tok");

        let json = serde_json::to_value(NodeBody::new(&write, None)).unwrap();
        assert!(json.get("captcha_token").is_none());
    }

    #[test]
    fn test_node_dto_parsing() {
        let dto: NodeDto = serde_json::from_str(
            r#"{"id": 9, "parent_id": 4, "position": 3, "kind": "section", "title": "Traits"}"#,
        )
        .unwrap();
        let node = RemoteNode::from(dto);

        assert_eq!(node.id, 9);
        assert_eq!(node.parent_id, Some(4));
        assert_eq!(node.position, 3);
        assert_eq!(node.payload, section("Traits"));
    }

    #[test]
    fn test_identifier_forms() {
        assert_eq!(identifier_from(serde_json::json!(77)).unwrap(), "77");
        assert_eq!(identifier_from(serde_json::json!("site-key")).unwrap(), "site-key");
        assert!(identifier_from(serde_json::json!(null)).is_err());
    }
}
