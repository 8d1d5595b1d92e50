//! HTTP client for the network controller API.

use std::time::Duration;

use async_trait::async_trait;
use chainring_index::{MemberRecord, NetworkId, NetworkRecord, NodeId};
use chainring_topology::{
    members_path, new_network_path, random_network_name, ClientError, ControllerClient, ObjectRef,
    NETWORKS_PATH, PEERS_PATH, STATUS_PATH,
};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

/// Header carrying the controller API token.
pub const AUTH_HEADER: &str = "X-ZT1-Auth";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Controller client speaking the controller's JSON API.
#[derive(Debug, Clone)]
pub struct HttpController {
    base: String,
    token: Option<String>,
    http: Client,
}

impl HttpController {
    /// Client for the API rooted at `base_url`.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, ClientError> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self { base, token, http })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, format!("{}{}", self.base, path));
        match &self.token {
            Some(token) => req.header(AUTH_HEADER, token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, path: &str) -> Result<Value, ClientError> {
        let resp = req
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = resp.status();
        debug!("{} -> {}", path, status);
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        resp.json()
            .await
            .map_err(|e| ClientError::Decode(format!("{}: {}", path, e)))
    }

    async fn get(&self, path: &str) -> Result<Value, ClientError> {
        self.send(self.request(Method::GET, path), path).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        self.send(self.request(Method::POST, path).json(&body), path)
            .await
    }
}

fn decode<T: serde::de::DeserializeOwned>(path: &str, value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::Decode(format!("{}: {}", path, e)))
}

/// Network listings are arrays of IDs, member listings objects keyed by ID.
fn listed_ids(path: &str, value: Value) -> Result<Vec<String>, ClientError> {
    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect()),
        Value::Object(map) => Ok(map.into_iter().map(|(k, _)| k).collect()),
        other => Err(ClientError::Decode(format!("{}: unexpected listing {}", path, other))),
    }
}

#[async_trait]
impl ControllerClient for HttpController {
    async fn create_network(&self, ctlr: &NodeId) -> Result<NetworkRecord, ClientError> {
        let path = new_network_path(ctlr);
        let data = self.post(&path, json!({"name": random_network_name()})).await?;
        decode(&path, data)
    }

    async fn create_member(&self, net: &NetworkId, node: &NodeId) -> Result<MemberRecord, ClientError> {
        let path = ObjectRef::Member(net.clone(), node.clone()).path();
        let data = self.post(&path, json!({})).await?;
        decode(&path, data)
    }

    async fn configure_object(&self, target: &ObjectRef, fragment: Value) -> Result<Value, ClientError> {
        self.post(&target.path(), fragment).await
    }

    async fn delete_object(&self, target: &ObjectRef) -> Result<(), ClientError> {
        let path = target.path();
        let resp = self
            .request(Method::DELETE, &path)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = resp.status();
        // already gone counts as deleted
        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!("DELETE {} -> {}", path, status);
            return Ok(());
        }
        Err(ClientError::Status {
            status: status.as_u16(),
            path,
        })
    }

    async fn get_object_data(&self, target: &ObjectRef) -> Result<Value, ClientError> {
        self.get(&target.path()).await
    }

    async fn get_object_ids(&self, net: Option<&NetworkId>) -> Result<Vec<String>, ClientError> {
        let path = match net {
            Some(net) => members_path(net),
            None => NETWORKS_PATH.to_string(),
        };
        let value = self.get(&path).await?;
        listed_ids(&path, value)
    }

    async fn get_peer_ids(&self) -> Result<Vec<NodeId>, ClientError> {
        let value = self.get(PEERS_PATH).await?;
        let Value::Array(peers) = value else {
            return Err(ClientError::Decode(format!("{}: expected an array", PEERS_PATH)));
        };
        Ok(peers
            .iter()
            .filter(|p| p["role"] == "LEAF")
            .filter_map(|p| p["address"].as_str())
            .filter_map(|a| NodeId::parse(a).ok())
            .collect())
    }

    async fn controller_id(&self) -> Result<NodeId, ClientError> {
        let value = self.get(STATUS_PATH).await?;
        let address = value["address"]
            .as_str()
            .ok_or_else(|| ClientError::Decode(format!("{}: no address", STATUS_PATH)))?;
        NodeId::parse(address).map_err(|e| ClientError::Decode(format!("{}: {}", STATUS_PATH, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, post};
    use axum::{Json, Router};

    const TOKEN: &str = "s3cret";

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok()) == Some(TOKEN)
    }

    /// A controller stand-in serving canned answers.
    async fn serve() -> String {
        let app = Router::new()
            .route(
                "/status",
                get(|headers: HeaderMap| async move {
                    if !authorized(&headers) {
                        return Err(AxumStatus::UNAUTHORIZED);
                    }
                    Ok(Json(json!({"address": "c0ffee0000", "online": true})))
                }),
            )
            .route(
                "/peer",
                get(|| async {
                    Json(json!([
                        {"address": "02beefdead", "role": "LEAF"},
                        {"address": "778cde7190", "role": "PLANET"},
                        {"address": "03beefdead", "role": "LEAF"},
                    ]))
                }),
            )
            .route(
                "/controller/network",
                get(|| async { Json(json!(["c0ffee0000000001"])) }),
            )
            .route(
                "/controller/network/:net/member",
                get(|| async { Json(json!({"02beefdead": 3, "03beefdead": 1})) }),
            )
            .route(
                "/controller/network/:net",
                post(|Path(net): Path<String>, Json(body): Json<Value>| async move {
                    let id = net.replace("______", "000001");
                    Json(json!({"id": id, "name": body["name"], "routes": [], "revision": 1}))
                })
                .delete(|Path(net): Path<String>| async move {
                    if net == "c0ffee0000000001" {
                        AxumStatus::OK
                    } else {
                        AxumStatus::NOT_FOUND
                    }
                }),
            )
            .route(
                "/controller/network/:net/member/:node",
                get(|| async { AxumStatus::NOT_FOUND }).post(
                    |Path((net, node)): Path<(String, String)>, Json(body): Json<Value>| async move {
                        Json(json!({
                            "id": node,
                            "nwid": net,
                            "authorized": body["authorized"].as_bool().unwrap_or(false),
                        }))
                    },
                ),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn token_header_is_sent() {
        let base = serve().await;
        let client = HttpController::new(&base, Some(TOKEN.into())).unwrap();
        assert_eq!(client.controller_id().await.unwrap().as_str(), "c0ffee0000");

        let anonymous = HttpController::new(&base, None).unwrap();
        assert!(matches!(
            anonymous.controller_id().await,
            Err(ClientError::Status { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn listings() {
        let client = HttpController::new(&serve().await, Some(TOKEN.into())).unwrap();
        let peers = client.get_peer_ids().await.unwrap();
        assert_eq!(
            peers.iter().map(NodeId::as_str).collect::<Vec<_>>(),
            vec!["02beefdead", "03beefdead"]
        );

        let nets = client.get_object_ids(None).await.unwrap();
        assert_eq!(nets, vec!["c0ffee0000000001"]);
        let net = NetworkId::parse(&nets[0]).unwrap();
        let mut members = client.get_object_ids(Some(&net)).await.unwrap();
        members.sort();
        assert_eq!(members, vec!["02beefdead", "03beefdead"]);
    }

    #[tokio::test]
    async fn mutations() {
        let client = HttpController::new(&serve().await, None).unwrap();
        let ctlr = NodeId::parse("c0ffee0000").unwrap();
        let net = client.create_network(&ctlr).await.unwrap();
        assert_eq!(net.id.as_str(), "c0ffee0000000001");
        assert!(!net.name.is_empty());

        let node = NodeId::parse("02beefdead").unwrap();
        let member = client.create_member(&net.id, &node).await.unwrap();
        assert_eq!(member.id, node);
        assert!(!member.authorized);

        let target = ObjectRef::Member(net.id.clone(), node);
        assert!(matches!(
            client.get_object_data(&target).await,
            Err(ClientError::NotFound(_))
        ));

        client
            .delete_object(&ObjectRef::Network(net.id.clone()))
            .await
            .unwrap();
        let absent = NetworkId::parse("c0ffee00000000ff").unwrap();
        client.delete_object(&ObjectRef::Network(absent)).await.unwrap();
    }
}
