use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;
use ws_api_types::{
    ContractAddress, MinedReceipt, NewWaveEvent, TxHash, WalletAddress, WaveError, WaveRecord,
    WaveRow,
};
use ws_chain_client::{ContractGateway, GatewayFactory, Listener, SubscriptionHandle, WaveSink};

pub const DEFAULT_RELAY_URL: &str = "http://localhost:8545";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Builds [`RelayGateway`]s that share one HTTP client.
///
/// Reads `WAVESYNC_RELAY_URL` from environment at construction time when no
/// endpoint is given (default: `http://localhost:8545`).
#[derive(Clone)]
pub struct RelayFactory {
    endpoint: String,
    contract: ContractAddress,
    poll_interval: Duration,
    http: reqwest::Client,
}

impl RelayFactory {
    pub fn new(endpoint: Option<String>, contract: ContractAddress) -> Self {
        let endpoint = endpoint
            .or_else(|| std::env::var("WAVESYNC_RELAY_URL").ok())
            .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            contract,
            poll_interval: DEFAULT_POLL_INTERVAL,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn gateway(&self, signer: Option<WalletAddress>) -> RelayGateway {
        RelayGateway {
            endpoint: self.endpoint.clone(),
            contract: self.contract.clone(),
            signer,
            poll_interval: self.poll_interval,
            http: self.http.clone(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }
}

impl GatewayFactory for RelayFactory {
    fn build(&self, signer: Option<&WalletAddress>) -> Result<Arc<dyn ContractGateway>, WaveError> {
        Ok(Arc::new(self.gateway(signer.cloned())))
    }
}

// ── Relay REST API types ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct WaveRequest<'a> {
    from: &'a str,
    message: &'a str,
    gas_limit: u64,
}

#[derive(Debug, Deserialize)]
struct WaveResponse {
    tx_hash: String,
}

#[derive(Debug, Deserialize)]
struct ReceiptResponse {
    tx_hash: String,
    block_number: u64,
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    latest_block: u64,
    #[serde(default)]
    events: Vec<NewWaveEvent>,
}

#[derive(Debug, Deserialize)]
struct RelayErrorResponse {
    error: String,
}

struct PollingSubscription {
    listener: Arc<Listener>,
    task: JoinHandle<()>,
}

impl PollingSubscription {
    fn stop(self) {
        self.listener.silence();
        self.task.abort();
    }
}

/// HTTP adapter for a guestbook contract relay.
///
/// Live events are polled; each subscription owns one polling task that stops
/// on `unsubscribe` or when the gateway is dropped.
pub struct RelayGateway {
    endpoint: String,
    contract: ContractAddress,
    signer: Option<WalletAddress>,
    poll_interval: Duration,
    http: reqwest::Client,
    subscriptions: Mutex<HashMap<Uuid, PollingSubscription>>,
}

impl RelayGateway {
    fn contract_url(&self, path: &str) -> String {
        format!("{}/contracts/{}/{}", self.endpoint, self.contract, path)
    }

    fn receipt_url(&self, handle: &TxHash) -> String {
        format!("{}/tx/{}/receipt", self.endpoint, handle)
    }

    async fn poll_receipt(&self, handle: &TxHash) -> Result<Option<ReceiptResponse>, WaveError> {
        let response = self
            .http
            .get(self.receipt_url(handle))
            .send()
            .await
            .map_err(WaveError::network)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WaveError::NetworkError(format!(
                "receipt HTTP {status}: {}",
                error_message(&text)
            )));
        }

        let receipt = response
            .json::<ReceiptResponse>()
            .await
            .map_err(|err| WaveError::NetworkError(format!("receipt parse: {err}")))?;
        Ok(Some(receipt))
    }
}

impl Drop for RelayGateway {
    fn drop(&mut self) {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, subscription) in subscriptions.drain() {
            subscription.stop();
        }
    }
}

#[async_trait]
impl ContractGateway for RelayGateway {
    fn contract(&self) -> &ContractAddress {
        &self.contract
    }

    fn signer(&self) -> Option<&WalletAddress> {
        self.signer.as_ref()
    }

    async fn fetch_history(&self) -> Result<Vec<WaveRecord>, WaveError> {
        let response = self
            .http
            .get(self.contract_url("waves"))
            .send()
            .await
            .map_err(WaveError::network)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WaveError::ContractCallError(format!(
                "getAllWaves HTTP {status}: {}",
                error_message(&text)
            )));
        }

        let rows: Vec<WaveRow> = response
            .json()
            .await
            .map_err(|err| WaveError::ContractCallError(format!("getAllWaves parse: {err}")))?;

        Ok(rows.into_iter().map(WaveRecord::from).collect())
    }

    async fn submit_wave(&self, message: &str, gas_limit: u64) -> Result<TxHash, WaveError> {
        let Some(from) = self.signer.as_ref() else {
            return Err(WaveError::NotConnected);
        };

        let body = WaveRequest {
            from: from.as_str(),
            message,
            gas_limit,
        };
        let response = self
            .http
            .post(self.contract_url("wave"))
            .json(&body)
            .send()
            .await
            .map_err(|err| WaveError::SubmissionError(err.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(submit_error(status, &text));
        }

        let parsed: WaveResponse = serde_json::from_str(&text)
            .map_err(|err| WaveError::SubmissionError(format!("wave response parse: {err}")))?;
        debug!(tx_hash = %parsed.tx_hash, %from, "relay accepted wave");
        Ok(TxHash(parsed.tx_hash))
    }

    async fn await_mined(&self, handle: &TxHash) -> Result<MinedReceipt, WaveError> {
        loop {
            if let Some(receipt) = self.poll_receipt(handle).await? {
                return receipt_outcome(receipt);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn subscribe(&self, sink: WaveSink) -> Result<SubscriptionHandle, WaveError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| WaveError::NetworkError(format!("no async runtime for polling: {err}")))?;

        let handle = SubscriptionHandle::new();
        let listener = Arc::new(Listener::new(sink));
        let task = runtime.spawn(poll_events(
            self.http.clone(),
            self.contract_url("events"),
            self.poll_interval,
            Arc::clone(&listener),
        ));

        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle.id, PollingSubscription { listener, task });
        debug!(%handle, contract = %self.contract, "relay subscription opened");
        Ok(handle)
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), WaveError> {
        let removed = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.id);
        if let Some(subscription) = removed {
            subscription.stop();
            debug!(%handle, "relay subscription closed");
        }
        Ok(())
    }
}

async fn poll_events(
    http: reqwest::Client,
    events_url: String,
    poll_interval: Duration,
    listener: Arc<Listener>,
) {
    let mut interval = tokio::time::interval(poll_interval);
    let mut cursor: Option<u64> = None;

    loop {
        interval.tick().await;
        if !listener.is_active() {
            return;
        }

        let url = match cursor {
            Some(block) => format!("{events_url}?name=NewWave&from_block={}", block + 1),
            None => format!("{events_url}?name=NewWave"),
        };
        let page = match fetch_events(&http, &url).await {
            Ok(page) => page,
            Err(err) => {
                warn!(error = %err, "NewWave poll failed");
                continue;
            }
        };

        for event in page.events {
            if !listener.deliver(WaveRecord::from(event)) {
                return;
            }
        }
        cursor = Some(cursor.map_or(page.latest_block, |block| block.max(page.latest_block)));
    }
}

async fn fetch_events(http: &reqwest::Client, url: &str) -> Result<EventsResponse, WaveError> {
    let response = http.get(url).send().await.map_err(WaveError::network)?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(WaveError::NetworkError(format!(
            "events HTTP {status}: {}",
            error_message(&text)
        )));
    }
    response
        .json()
        .await
        .map_err(|err| WaveError::NetworkError(format!("events parse: {err}")))
}

fn receipt_outcome(receipt: ReceiptResponse) -> Result<MinedReceipt, WaveError> {
    match receipt.status.as_str() {
        "success" => Ok(MinedReceipt {
            tx_hash: TxHash(receipt.tx_hash),
            block_number: receipt.block_number,
        }),
        "reverted" => Err(WaveError::TransactionReverted(
            receipt
                .reason
                .unwrap_or_else(|| "execution reverted".to_owned()),
        )),
        other => Err(WaveError::NetworkError(format!(
            "unexpected receipt status '{other}' for {}",
            receipt.tx_hash
        ))),
    }
}

fn submit_error(status: reqwest::StatusCode, body: &str) -> WaveError {
    if status == reqwest::StatusCode::FORBIDDEN {
        return WaveError::UserRejected;
    }
    WaveError::SubmissionError(format!("wave HTTP {status}: {}", error_message(body)))
}

/// Pulls `error` out of a relay error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<RelayErrorResponse>(body) {
        Ok(parsed) => parsed.error,
        Err(_) => body.trim().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(status: &str, reason: Option<&str>) -> ReceiptResponse {
        ReceiptResponse {
            tx_hash: "0xabc".to_owned(),
            block_number: 42,
            status: status.to_owned(),
            reason: reason.map(str::to_owned),
        }
    }

    #[test]
    fn successful_receipt_maps_to_mined() {
        assert_eq!(
            receipt_outcome(receipt("success", None)),
            Ok(MinedReceipt {
                tx_hash: TxHash("0xabc".to_owned()),
                block_number: 42,
            })
        );
    }

    #[test]
    fn reverted_receipt_keeps_reason() {
        assert_eq!(
            receipt_outcome(receipt("reverted", Some("Wait 15m"))),
            Err(WaveError::TransactionReverted("Wait 15m".to_owned()))
        );
        assert_eq!(
            receipt_outcome(receipt("reverted", None)),
            Err(WaveError::TransactionReverted("execution reverted".to_owned()))
        );
    }

    #[test]
    fn forbidden_submit_is_user_rejection() {
        assert_eq!(
            submit_error(reqwest::StatusCode::FORBIDDEN, r#"{"error":"denied"}"#),
            WaveError::UserRejected
        );
        assert_eq!(
            submit_error(reqwest::StatusCode::BAD_GATEWAY, r#"{"error":"node down"}"#),
            WaveError::SubmissionError("wave HTTP 502 Bad Gateway: node down".to_owned())
        );
    }

    #[test]
    fn events_page_parses_contract_rows() -> Result<(), serde_json::Error> {
        let page: EventsResponse = serde_json::from_str(
            r#"{"latest_block": 12, "events": [
                {"from": "0xAbC", "timestamp": 1700000000, "message": "gm", "block_number": 12}
            ]}"#,
        )?;
        assert_eq!(page.latest_block, 12);
        let records: Vec<WaveRecord> = page.events.into_iter().map(WaveRecord::from).collect();
        assert_eq!(records, vec![WaveRecord::new("0xabc", 1_700_000_000, "gm")]);
        Ok(())
    }

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let factory = RelayFactory::new(
            Some("http://relay.local:8545/".to_owned()),
            ContractAddress::new("0xC0FFEE"),
        );
        let gateway = factory.gateway(None);
        assert_eq!(factory.endpoint(), "http://relay.local:8545");
        assert_eq!(
            gateway.contract_url("waves"),
            "http://relay.local:8545/contracts/0xc0ffee/waves"
        );
    }

    #[test]
    fn subscribing_outside_a_runtime_is_reported() {
        let factory = RelayFactory::new(Some(DEFAULT_RELAY_URL.to_owned()), ContractAddress::new("0x1"));
        let gateway = factory.gateway(None);
        let result = gateway.subscribe(Arc::new(|_| {}));
        assert!(matches!(result, Err(WaveError::NetworkError(_))));
    }

    #[tokio::test]
    async fn unsubscribe_stops_polling_task() -> Result<(), WaveError> {
        let factory = RelayFactory::new(Some("http://127.0.0.1:9".to_owned()), ContractAddress::new("0x1"))
            .with_poll_interval(Duration::from_millis(5));
        let gateway = factory.gateway(None);

        let handle = gateway.subscribe(Arc::new(|_| {}))?;
        assert_eq!(gateway.subscriptions.lock().unwrap().len(), 1);

        gateway.unsubscribe(&handle)?;
        assert!(gateway.subscriptions.lock().unwrap().is_empty());
        gateway.unsubscribe(&handle)?;
        Ok(())
    }
}
