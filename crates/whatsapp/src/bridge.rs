use std::time::Duration;

use {
    async_trait::async_trait,
    reqwest::StatusCode,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, de::DeserializeOwned},
    serde_json::{Value, json},
    tracing::{debug, info},
    zapgate_channels::{ChatProvider, PairingOutcome, ProviderError},
    zapgate_common::{CanonicalNumber, DeliveryId, InstanceKey, OutboundMessage},
};

/// HTTP client for the WhatsApp bridge sidecar.
pub struct BridgeProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<Secret<String>>,
}

#[derive(Deserialize)]
struct ExistsReply {
    exists: bool,
    #[serde(default)]
    jid: Option<String>,
}

#[derive(Deserialize)]
struct SendReply {
    id: String,
}

#[derive(Deserialize)]
struct LidReply {
    #[serde(default)]
    phone: Option<String>,
}

#[derive(Deserialize)]
struct PairReply {
    #[serde(default)]
    qr: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

impl BridgeProvider {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<Secret<String>>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(format!("build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn instance_url(&self, instance: &InstanceKey, tail: &str) -> String {
        format!("{}/instances/{}{tail}", self.base_url, instance)
    }

    async fn call(
        &self,
        method: reqwest::Method,
        instance: &InstanceKey,
        tail: &str,
        body: Option<Value>,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut req = self
            .client
            .request(method, self.instance_url(instance, tail));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose_secret());
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::CONFLICT => ProviderError::NotConnected(instance.clone()),
            s if s.is_client_error() => ProviderError::Rejected(format!("{s}: {text}")),
            s => ProviderError::Transport(format!("bridge returned {s}: {text}")),
        })
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        instance: &InstanceKey,
        tail: &str,
        body: Option<Value>,
    ) -> Result<T, ProviderError> {
        self.call(reqwest::Method::POST, instance, tail, body)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Transport(format!("malformed bridge reply: {e}")))
    }
}

#[async_trait]
impl ChatProvider for BridgeProvider {
    fn id(&self) -> &str {
        "bridge"
    }

    async fn exists(
        &self,
        instance: &InstanceKey,
        number: &CanonicalNumber,
    ) -> Result<bool, ProviderError> {
        let jid = number.jid();
        let reply: ExistsReply = self
            .call_json(instance, "/exists", Some(json!({ "jid": jid })))
            .await?;

        // The network may answer for a different account than the one asked
        // about; that means the asked-for identifier itself is not registered.
        if reply.exists
            && let Some(answered) = reply.jid.as_deref()
            && answered != jid
        {
            debug!(instance = %instance, asked = %jid, answered, "existence check redirected");
            return Ok(false);
        }
        Ok(reply.exists)
    }

    async fn send(
        &self,
        instance: &InstanceKey,
        to: &CanonicalNumber,
        message: &OutboundMessage,
    ) -> Result<DeliveryId, ProviderError> {
        let reply: SendReply = self
            .call_json(
                instance,
                "/messages",
                Some(json!({ "jid": to.jid(), "message": message })),
            )
            .await?;
        Ok(DeliveryId(reply.id))
    }

    async fn lid_to_phone(
        &self,
        instance: &InstanceKey,
        lid: &str,
    ) -> Result<Option<String>, ProviderError> {
        let reply: LidReply = self
            .call_json(instance, "/lid", Some(json!({ "lid": format!("{lid}@lid") })))
            .await?;
        Ok(reply.phone.filter(|p| !p.is_empty()))
    }

    async fn pair(&self, instance: &InstanceKey) -> Result<PairingOutcome, ProviderError> {
        let reply: PairReply = self.call_json(instance, "/pair", None).await?;
        match reply {
            PairReply { qr: Some(qr), .. } if !qr.is_empty() => Ok(PairingOutcome::Qr(qr)),
            PairReply {
                status: Some(status),
                phone,
                ..
            } if status == "logged_in" => {
                info!(instance = %instance, "bridge reports device already logged in");
                Ok(PairingOutcome::AlreadyPaired {
                    phone: phone.unwrap_or_default(),
                })
            },
            _ => Err(ProviderError::Transport(
                "pair reply carried neither a QR code nor a login".into(),
            )),
        }
    }

    async fn disconnect(&self, instance: &InstanceKey) -> Result<(), ProviderError> {
        self.call(reqwest::Method::POST, instance, "/disconnect", None)
            .await
            .map(drop)
    }

    async fn forget(&self, instance: &InstanceKey) -> Result<(), ProviderError> {
        self.call(reqwest::Method::DELETE, instance, "", None)
            .await
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher};

    fn provider(url: &str) -> BridgeProvider {
        BridgeProvider::new(url, Some(Secret::new("tok".into())), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn exists_true() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/instances/t1/exists")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::Json(json!({"jid": "5511988053918@s.whatsapp.net"})))
            .with_header("content-type", "application/json")
            .with_body(r#"{"exists": true, "jid": "5511988053918@s.whatsapp.net"}"#)
            .create_async()
            .await;

        let found = provider(&server.url())
            .exists(&"t1".into(), &CanonicalNumber::new("5511988053918"))
            .await
            .unwrap();
        assert!(found);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn redirected_answer_counts_as_missing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/instances/t1/exists")
            .with_header("content-type", "application/json")
            .with_body(r#"{"exists": true, "jid": "551188053918@s.whatsapp.net"}"#)
            .create_async()
            .await;

        let found = provider(&server.url())
            .exists(&"t1".into(), &CanonicalNumber::new("5511988053918"))
            .await
            .unwrap();
        assert!(!found);
    }

    #[tokio::test]
    async fn conflict_maps_to_not_connected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/instances/t1/exists")
            .with_status(409)
            .create_async()
            .await;

        let err = provider(&server.url())
            .exists(&"t1".into(), &CanonicalNumber::new("5511988053918"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConnected(_)));
    }

    #[tokio::test]
    async fn send_posts_tagged_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/instances/t1/messages")
            .match_body(Matcher::PartialJson(json!({
                "jid": "5511988053918@s.whatsapp.net",
                "message": {"type": "text", "text": "hi"}
            })))
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "3EB0ABC"}"#)
            .create_async()
            .await;

        let id = provider(&server.url())
            .send(
                &"t1".into(),
                &CanonicalNumber::new("5511988053918"),
                &OutboundMessage::text("hi"),
            )
            .await
            .unwrap();
        assert_eq!(id, DeliveryId("3EB0ABC".into()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn pair_variants() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/instances/qr/pair")
            .with_header("content-type", "application/json")
            .with_body(r#"{"qr": "2@abc"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/instances/in/pair")
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "logged_in", "phone": "5541991968071"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/instances/bad/pair")
            .with_status(500)
            .create_async()
            .await;

        let p = provider(&server.url());
        assert_eq!(
            p.pair(&"qr".into()).await.unwrap(),
            PairingOutcome::Qr("2@abc".into())
        );
        assert_eq!(
            p.pair(&"in".into()).await.unwrap(),
            PairingOutcome::AlreadyPaired {
                phone: "5541991968071".into()
            }
        );
        assert!(matches!(
            p.pair(&"bad".into()).await,
            Err(ProviderError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn lid_lookup() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/instances/t1/lid")
            .match_body(Matcher::Json(json!({"lid": "123456789012345@lid"})))
            .with_header("content-type", "application/json")
            .with_body(r#"{"phone": "5512988053918@s.whatsapp.net"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/instances/t1/lid")
            .match_body(Matcher::Json(json!({"lid": "999@lid"})))
            .with_header("content-type", "application/json")
            .with_body(r#"{"phone": null}"#)
            .create_async()
            .await;

        let p = provider(&server.url());
        assert_eq!(
            p.lid_to_phone(&"t1".into(), "123456789012345").await.unwrap(),
            Some("5512988053918@s.whatsapp.net".into())
        );
        assert_eq!(p.lid_to_phone(&"t1".into(), "999").await.unwrap(), None);
    }

    #[tokio::test]
    async fn no_token_sends_no_authorization() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/instances/t1/exists")
            .match_header("authorization", Matcher::Missing)
            .with_header("content-type", "application/json")
            .with_body(r#"{"exists": false}"#)
            .create_async()
            .await;

        let p = BridgeProvider::new(server.url(), None, Duration::from_secs(5)).unwrap();
        assert!(
            !p.exists(&"t1".into(), &CanonicalNumber::new("5511988053918"))
                .await
                .unwrap()
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn forget_issues_delete() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/instances/t1")
            .with_status(204)
            .create_async()
            .await;
        provider(&server.url()).forget(&"t1".into()).await.unwrap();
        mock.assert_async().await;
    }
}
