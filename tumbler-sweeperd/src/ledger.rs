//! HTTP ledger client for the sweep daemon.
//!
//! Implements the [`LedgerClient`] port against a ledger node's JSON API.
//! The node owns signing: it holds the sweep signing context and accepts
//! transfer submissions on behalf of addresses it can spend from.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tumbler_common::{Address, Amount, LedgerClient, TransferStatus, TxRef};

pub struct HttpLedger {
    base_url: String,
    client: reqwest::Client,
}

impl HttpLedger {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct SubmitResponse {
    tx_ref: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: TransferStatus,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: Amount,
}

#[async_trait]
impl LedgerClient for HttpLedger {
    async fn submit_transfer(
        &self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<TxRef> {
        let response = self
            .client
            .post(format!("{}/transfers", self.base_url))
            .json(&serde_json::json!({
                "from": from,
                "to": to,
                "amount": amount,
            }))
            .send()
            .await
            .context("submit transfer request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "ledger rejected submission with status {}",
                response.status()
            ));
        }
        let body: SubmitResponse = response
            .json()
            .await
            .context("malformed submit response")?;
        Ok(TxRef::new(body.tx_ref))
    }

    async fn get_status(&self, tx_ref: &TxRef) -> Result<TransferStatus> {
        let response = self
            .client
            .get(format!("{}/transfers/{}", self.base_url, tx_ref))
            .send()
            .await
            .context("status request failed")?;
        let body: StatusResponse = response
            .json()
            .await
            .context("malformed status response")?;
        Ok(body.status)
    }

    async fn get_balance(&self, address: &Address) -> Result<Amount> {
        let response = self
            .client
            .get(format!("{}/balances/{}", self.base_url, address))
            .send()
            .await
            .context("balance request failed")?;
        let body: BalanceResponse = response
            .json()
            .await
            .context("malformed balance response")?;
        Ok(body.balance)
    }
}
