use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::{NotificationError, WhatsAppMessage, WhatsAppSender};
use crate::config::WhatsAppConfig;

const TEMPLATE_LANGUAGE: &str = "en_US";

/// WhatsApp Cloud API client for template messages.
#[derive(Clone)]
pub struct WhatsAppCloudClient {
    client: reqwest::Client,
    config: WhatsAppConfig,
}

impl WhatsAppCloudClient {
    pub fn new(config: WhatsAppConfig) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/messages",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.phone_number_id
        )
    }

    fn payload(message: &WhatsAppMessage) -> serde_json::Value {
        let parameters: Vec<_> = message
            .params
            .iter()
            .map(|p| json!({ "type": "text", "parameter_name": p.name, "text": p.value }))
            .collect();

        json!({
            "messaging_product": "whatsapp",
            "to": message.to,
            "type": "template",
            "template": {
                "name": message.template,
                "language": { "code": TEMPLATE_LANGUAGE },
                "components": [{ "type": "body", "parameters": parameters }],
            },
        })
    }
}

#[async_trait]
impl WhatsAppSender for WhatsAppCloudClient {
    #[instrument(skip(self, message), fields(template = %message.template))]
    async fn send(&self, message: WhatsAppMessage) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.config.access_token)
            .json(&Self::payload(&message))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), %body, "WhatsApp API rejected message");
            return Err(NotificationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        info!(to = %message.to, "WhatsApp template sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::TemplateParam;
    use assert_matches::assert_matches;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> WhatsAppCloudClient {
        WhatsAppCloudClient::new(WhatsAppConfig {
            api_base_url: base.to_string(),
            phone_number_id: "1098765".into(),
            access_token: "wa-token".into(),
        })
        .unwrap()
    }

    fn message() -> WhatsAppMessage {
        WhatsAppMessage {
            to: "+923001234567".into(),
            template: "order_shipped".into(),
            params: vec![
                TemplateParam::new("customer_name", "Ayesha"),
                TemplateParam::new("tracking_id", "TCS-99812"),
            ],
        }
    }

    #[tokio::test]
    async fn posts_template_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1098765/messages"))
            .and(header("authorization", "Bearer wa-token"))
            .and(body_partial_json(json!({
                "to": "+923001234567",
                "template": { "name": "order_shipped", "language": { "code": "en_US" } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "messages": [] })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server.uri()).send(message()).await.unwrap();
    }

    #[tokio::test]
    async fn surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("template not approved"))
            .mount(&server)
            .await;

        let result = client(&server.uri()).send(message()).await;
        assert_matches!(
            result,
            Err(NotificationError::Api { status: 400, body }) if body == "template not approved"
        );
    }

    #[test]
    fn payload_carries_named_parameters_in_order() {
        let payload = WhatsAppCloudClient::payload(&message());
        let params = &payload["template"]["components"][0]["parameters"];
        assert_eq!(params[0]["parameter_name"], "customer_name");
        assert_eq!(params[1]["text"], "TCS-99812");
    }
}
