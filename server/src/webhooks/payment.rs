//! Payment Provider
//!
//! Stripe-style billing events: `{id, type, created, livemode, data: {object}}`,
//! signed with `Stripe-Signature: t=<unix>,v1=<hex>`. Only authenticity is
//! checked here; billing business logic lives elsewhere.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::error::WebhookError;
use super::events::{BillingEvent, EventPayload, InboundEvent, BILLING_EVENT_TYPES};
use super::provider::WebhookProvider;
use super::signing::verify_payment_signature;

/// Header carrying the comma-separated signature list.
pub const PAYMENT_SIGNATURE_HEADER: &str = "stripe-signature";

const PROVIDER_ID: &str = "stripe";

#[derive(Debug, Deserialize)]
struct PaymentEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    #[serde(default)]
    livemode: bool,
    account: Option<String>,
    data: PaymentEventData,
}

#[derive(Debug, Deserialize)]
struct PaymentEventData {
    object: serde_json::Value,
}

pub struct PaymentProvider {
    secret: Option<String>,
    tolerance_secs: i64,
}

impl PaymentProvider {
    pub fn new(secret: Option<String>, tolerance_secs: i64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }
}

impl WebhookProvider for PaymentProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), WebhookError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| WebhookError::signature(PROVIDER_ID, "webhook secret not configured"))?;
        let header = headers
            .get(PAYMENT_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| WebhookError::signature(PROVIDER_ID, "missing signature header"))?;

        verify_payment_signature(
            secret,
            body,
            header,
            self.tolerance_secs,
            Utc::now().timestamp(),
        )
        .map_err(|e| WebhookError::signature(PROVIDER_ID, e.to_string()))
    }

    fn parse(&self, body: &[u8]) -> Result<Vec<InboundEvent>, WebhookError> {
        let event: PaymentEvent = serde_json::from_slice(body)
            .map_err(|e| WebhookError::schema(PROVIDER_ID, e.to_string()))?;

        let object = &event.data.object;
        if !object.is_object() {
            return Err(WebhookError::schema(PROVIDER_ID, "data.object must be an object"));
        }
        let field = |name: &str| object.get(name).and_then(|v| v.as_str()).map(String::from);

        let payload = if BILLING_EVENT_TYPES.contains(&event.event_type.as_str()) {
            EventPayload::Billing(BillingEvent {
                event_type: event.event_type.clone(),
                object_id: field("id"),
                customer_id: field("customer"),
                livemode: event.livemode,
            })
        } else {
            EventPayload::Unrecognized(event.data.object.clone())
        };

        Ok(vec![InboundEvent {
            provider: PROVIDER_ID,
            event_id: event.id,
            account_id: event.account,
            occurred_at: DateTime::from_timestamp(event.created, 0).unwrap_or_else(Utc::now),
            kind: event.event_type,
            payload,
        }])
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use serde_json::json;

    use super::*;
    use crate::webhooks::signing::sign_payment_payload;

    const SECRET: &str = "whsec_test";

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(PAYMENT_SIGNATURE_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn verifies_fresh_signature() {
        let provider = PaymentProvider::new(Some(SECRET.into()), 300);
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_payment_payload(SECRET, Utc::now().timestamp(), body);
        assert!(provider.verify(&headers(&header), body).is_ok());
    }

    #[test]
    fn rejects_stale_signature() {
        let provider = PaymentProvider::new(Some(SECRET.into()), 300);
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_payment_payload(SECRET, Utc::now().timestamp() - 301, body);
        assert!(matches!(
            provider.verify(&headers(&header), body),
            Err(WebhookError::SignatureInvalid { .. })
        ));
    }

    #[test]
    fn rejects_without_secret_or_header() {
        let body = b"{}";
        let header = sign_payment_payload(SECRET, Utc::now().timestamp(), body);
        assert!(PaymentProvider::new(None, 300)
            .verify(&headers(&header), body)
            .is_err());
        assert!(PaymentProvider::new(Some(SECRET.into()), 300)
            .verify(&HeaderMap::new(), body)
            .is_err());
    }

    #[test]
    fn parses_billing_event() {
        let provider = PaymentProvider::new(Some(SECRET.into()), 300);
        let body = json!({
            "id": "evt_123",
            "type": "invoice.paid",
            "created": 1_700_000_000,
            "livemode": false,
            "data": {"object": {"id": "in_1", "customer": "cus_9"}}
        });
        let events = provider.parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "evt_123");
        assert_eq!(events[0].kind, "invoice.paid");
        match &events[0].payload {
            EventPayload::Billing(b) => {
                assert_eq!(b.object_id.as_deref(), Some("in_1"));
                assert_eq!(b.customer_id.as_deref(), Some("cus_9"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn unknown_types_are_unrecognized_and_bad_shapes_rejected() {
        let provider = PaymentProvider::new(Some(SECRET.into()), 300);
        let body = json!({
            "id": "evt_2", "type": "payout.paid", "created": 1,
            "data": {"object": {"id": "po_1"}}
        });
        let events = provider.parse(body.to_string().as_bytes()).unwrap();
        assert!(matches!(events[0].payload, EventPayload::Unrecognized(_)));

        let missing_data = json!({"id": "evt_3", "type": "invoice.paid", "created": 1});
        assert!(matches!(
            provider.parse(missing_data.to_string().as_bytes()),
            Err(WebhookError::SchemaInvalid { .. })
        ));
        let scalar_object =
            json!({"id": "e", "type": "invoice.paid", "created": 1, "data": {"object": 5}});
        assert!(provider.parse(scalar_object.to_string().as_bytes()).is_err());
    }
}
