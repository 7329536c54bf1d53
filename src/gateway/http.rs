use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use super::{
    ChargeRequest, ChargeResponse, ChargeStatus, GatewayError, PaymentGateway, TransferRail,
    TransferRequest, TransferResponse,
};

#[derive(Debug, Serialize)]
struct ChargeBody<'a> {
    transaction_id: Uuid,
    amount: String,
    currency: &'a str,
    customer_ref: &'a str,
}

#[derive(Debug, Serialize)]
struct TransferBody<'a> {
    account_id: &'a str,
    amount: String,
    currency: &'a str,
    reference: &'a str,
}

/// JSON-over-HTTP client for the bank's charge and transfer API
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl HttpGateway {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self::with_circuit_breaker(base_url, api_key, 3, 60)
    }

    /// Creates a client with custom circuit breaker configuration
    pub fn with_circuit_breaker(
        base_url: String,
        api_key: Option<String>,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        HttpGateway {
            client,
            base_url,
            api_key,
            circuit_breaker,
        }
    }

    /// Returns the current state of the circuit breaker
    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned + Send,
    {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let result = self
            .circuit_breaker
            .call(async move {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(GatewayError::Upstream(status.as_u16()));
                }
                Ok(response.json::<R>().await?)
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(GatewayError::CircuitOpen(
                "payment gateway circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl PaymentGateway for HttpGateway {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn charge(&self, request: ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        let body = ChargeBody {
            transaction_id: request.transaction_id,
            amount: request.amount.amount_string(),
            currency: request.amount.currency().code(),
            customer_ref: &request.customer_ref,
        };
        let response: ChargeResponse = self.post_json("charges", &body).await?;

        if response.status == ChargeStatus::Completed && response.external_id.is_none() {
            return Err(GatewayError::InvalidResponse(
                "completed charge without external_id".to_string(),
            ));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl TransferRail for HttpGateway {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferResponse, GatewayError> {
        let body = TransferBody {
            account_id: &request.account_id,
            amount: request.amount.amount_string(),
            currency: request.amount.currency().code(),
            reference: &request.reference,
        };
        self.post_json("transfers", &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Currency, Money, PayoutStatus};

    fn charge_request() -> ChargeRequest {
        ChargeRequest {
            transaction_id: Uuid::new_v4(),
            amount: Money::from_minor(249_700, Currency::zar()),
            customer_ref: "cust-42".to_string(),
        }
    }

    #[test]
    fn test_circuit_breaker_starts_closed() {
        let gateway = HttpGateway::new("https://bank.example".to_string(), None);
        assert_eq!(gateway.circuit_state(), "closed");
    }

    #[tokio::test]
    async fn test_charge_completed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/charges")
            .match_header("authorization", "Bearer secret")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "amount": "2497.00",
                "currency": "ZAR",
                "customer_ref": "cust-42"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"completed","external_id":"FNB-1","failure_reason":null}"#)
            .create_async()
            .await;

        let gateway = HttpGateway::new(server.url(), Some("secret".to_string()));
        let response = gateway.charge(charge_request()).await.unwrap();

        assert_eq!(response.status, ChargeStatus::Completed);
        assert_eq!(response.external_id.as_deref(), Some("FNB-1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_charge_declined_is_not_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/charges")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"failed","external_id":null,"failure_reason":"insufficient funds"}"#)
            .create_async()
            .await;

        let gateway = HttpGateway::new(server.url(), None);
        let response = gateway.charge(charge_request()).await.unwrap();
        assert_eq!(response.status, ChargeStatus::Failed);
        assert_eq!(response.failure_reason.as_deref(), Some("insufficient funds"));
    }

    #[tokio::test]
    async fn test_completed_charge_requires_external_id() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/charges")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"completed","external_id":null,"failure_reason":null}"#)
            .create_async()
            .await;

        let gateway = HttpGateway::new(server.url(), None);
        let result = gateway.charge(charge_request()).await;
        assert!(matches!(result, Err(GatewayError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_transfer_posts_reference() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/transfers")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "account_id": "6212345678903",
                "amount": "499.40",
                "reference": "d-1:reserve:1"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"completed","transfer_id":"TR-9","failure_reason":null}"#)
            .create_async()
            .await;

        let gateway = HttpGateway::new(server.url(), None);
        let response = gateway
            .transfer(TransferRequest {
                account_id: "6212345678903".to_string(),
                amount: Money::from_minor(49_940, Currency::zar()),
                reference: "d-1:reserve:1".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(response.status, PayoutStatus::Completed);
        assert_eq!(response.transfer_id.as_deref(), Some("TR-9"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_failures() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/charges")
            .with_status(500)
            .expect_at_least(3)
            .create_async()
            .await;

        let gateway = HttpGateway::with_circuit_breaker(server.url(), None, 3, 30);

        for _ in 0..3 {
            let result = gateway.charge(charge_request()).await;
            assert!(matches!(result, Err(GatewayError::Upstream(500))));
        }

        let result = gateway.charge(charge_request()).await;
        assert!(matches!(result, Err(GatewayError::CircuitOpen(_))));
        assert_eq!(gateway.circuit_state(), "open");
    }
}
