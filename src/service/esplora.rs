// Copyright 2021-2022 Farcaster Devs
//
// This library is free software; you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public
// License as published by the Free Software Foundation; either
// version 3 of the License, or (at your option) any later version.
//
// This library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this library; if not, write to the Free Software
// Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301, USA

//! Esplora REST client: resolves the contract UTXO, broadcasts finalized spends and recovers the
//! secret from a broadcast claim.

use std::str::FromStr;

use async_trait::async_trait;
use bitcoin::util::address::Address;
use bitcoin::{OutPoint, Transaction, Txid};
use reqwest::StatusCode;

use crate::blockchain::Network;
use crate::consensus;
use crate::crypto::Secret;
use crate::script::LockingScript;
use crate::service::{Error, PreimageDiscovery, Submitter, UtxoResolver};
use crate::transaction::{self, Utxo};

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
struct EsploraStatus {
    confirmed: bool,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
struct EsploraUtxo {
    txid: Txid,
    vout: u32,
    value: u64,
    status: EsploraStatus,
}

/// Esplora HTTP API client.
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: reqwest::Client,
    base: String,
}

impl EsploraClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Public Blockstream instance for the network. There is no public instance for local
    /// networks, a local electrs is assumed.
    pub fn default_url(network: Network) -> &'static str {
        match network {
            Network::Mainnet => "https://blockstream.info/api",
            Network::Testnet => "https://blockstream.info/testnet/api",
            Network::Local => "http://127.0.0.1:3002",
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    async fn get_text(&self, path: &str) -> Result<String, Error> {
        let response = self.client.get(self.endpoint(path)).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::from_status(status, body));
        }
        Ok(body)
    }

    /// Fetch and parse a transaction.
    pub async fn fetch_transaction(&self, txid: &Txid) -> Result<Transaction, Error> {
        let hex = self.get_text(&format!("tx/{}/hex", txid)).await?;
        consensus::from_hex::<Transaction>(&hex).map_err(|e| Error::Decode(e.to_string()))
    }

    async fn list_utxos(&self, address: &Address) -> Result<Vec<EsploraUtxo>, Error> {
        let body = self.get_text(&format!("address/{}/utxo", address)).await?;
        serde_json::from_str(&body).map_err(|e| Error::Decode(e.to_string()))
    }

    async fn fetch_utxo(&self, utxo: EsploraUtxo, address: &Address) -> Result<Utxo, Error> {
        log::debug!(
            "Resolved {}:{} ({} sats, confirmed: {}) for {}",
            utxo.txid,
            utxo.vout,
            utxo.value,
            utxo.status.confirmed,
            address
        );
        let hex = self.get_text(&format!("tx/{}/hex", utxo.txid)).await?;
        let raw_tx = hex::decode(hex.trim()).map_err(|e| Error::Decode(e.to_string()))?;
        Ok(Utxo {
            txid: utxo.txid,
            vout: utxo.vout,
            value: utxo.value,
            raw_tx,
        })
    }
}

/// First confirmed output, or the first output if none is confirmed yet.
fn select_utxo(utxos: Vec<EsploraUtxo>) -> Option<EsploraUtxo> {
    let confirmed = utxos.iter().position(|u| u.status.confirmed).unwrap_or(0);
    utxos.into_iter().nth(confirmed)
}

// Node rejections meaning the transaction is already in the mempool or in a block.
const ALREADY_KNOWN: &[&str] = &[
    "txn-already-in-mempool",
    "txn-already-known",
    "Transaction already in block chain",
    "Transaction outputs already in utxo set",
];

fn already_known(reason: &str) -> bool {
    ALREADY_KNOWN.iter().any(|known| reason.contains(known))
}

#[async_trait]
impl UtxoResolver for EsploraClient {
    async fn resolve(&self, address: &Address) -> Result<Utxo, Error> {
        let utxo = select_utxo(self.list_utxos(address).await?)
            .ok_or_else(|| Error::NotFound(format!("no UTXO found for {}", address)))?;
        self.fetch_utxo(utxo, address).await
    }

    async fn resolve_outpoint(
        &self,
        address: &Address,
        outpoint: &OutPoint,
    ) -> Result<Utxo, Error> {
        let utxo = self
            .list_utxos(address)
            .await?
            .into_iter()
            .find(|u| u.txid == outpoint.txid && u.vout == outpoint.vout)
            .ok_or_else(|| Error::NotFound(format!("{} is not unspent at {}", outpoint, address)))?;
        self.fetch_utxo(utxo, address).await
    }
}

#[async_trait]
impl Submitter for EsploraClient {
    async fn submit(&self, tx: &Transaction) -> Result<Txid, Error> {
        let response = self
            .client
            .post(self.endpoint("tx"))
            .body(consensus::to_hex(tx))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return Txid::from_str(body.trim()).map_err(|e| Error::Decode(e.to_string()));
        }
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            if already_known(&body) {
                log::debug!("Transaction {} already known: {}", tx.txid(), body);
                return Ok(tx.txid());
            }
            return Err(Error::Broadcast(body));
        }
        Err(Error::from_status(status, body))
    }
}

#[async_trait]
impl PreimageDiscovery for EsploraClient {
    async fn discover(&self, txid: &Txid, script: &LockingScript) -> Result<Secret, Error> {
        let tx = self.fetch_transaction(txid).await?;
        transaction::extract_preimage(&tx, script).map_err(|e| match e {
            transaction::Error::MissingPreimage => {
                Error::NotFound(format!("transaction {} does not reveal a preimage", txid))
            }
            e => Error::new(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bitcoin::{TxIn, TxOut};

    use crate::service::responder;

    const ADDRESS: &str = "2Mx9P4FTMPxrh7ggipRxWxzaVCV4MbmHBMX";

    fn funding() -> (Address, Transaction) {
        let address = Address::from_str(ADDRESS).unwrap();
        let tx = Transaction {
            version: 2,
            lock_time: 0,
            input: vec![TxIn::default()],
            output: vec![TxOut {
                value: 7_800,
                script_pubkey: address.script_pubkey(),
            }],
        };
        (address, tx)
    }

    fn listing(tx: &Transaction) -> String {
        format!(
            r#"[{{"txid":"{}","vout":0,"value":7800,"status":{{"confirmed":true}}}}]"#,
            tx.txid()
        )
    }

    const UTXOS: &str = r#"[
        {"txid":"4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b","vout":1,"value":1000,"status":{"confirmed":false}},
        {"txid":"0e3e2357e806b6cdb1f70b54c3a3a17b6714ee1f0e68bebb44a74b1efd512098","vout":0,"value":5460,"status":{"confirmed":true,"block_height":2000000,"block_hash":"000000000000000000000000000000000000000000000000000000000000abcd","block_time":1700000000}}
    ]"#;

    #[test]
    fn endpoints() {
        let client = EsploraClient::new("https://blockstream.info/testnet/api/");
        assert_eq!(
            client.endpoint("address/2Mx9P4FTMPxrh7ggipRxWxzaVCV4MbmHBMX/utxo"),
            "https://blockstream.info/testnet/api/address/2Mx9P4FTMPxrh7ggipRxWxzaVCV4MbmHBMX/utxo"
        );
        assert_eq!(
            client.endpoint("/tx"),
            "https://blockstream.info/testnet/api/tx"
        );
        assert_eq!(
            EsploraClient::default_url(Network::Testnet),
            "https://blockstream.info/testnet/api"
        );
    }

    #[test]
    fn prefers_confirmed_utxo() {
        let utxos: Vec<EsploraUtxo> = serde_json::from_str(UTXOS).unwrap();
        assert_eq!(utxos.len(), 2);
        let selected = select_utxo(utxos.clone()).unwrap();
        assert_eq!(selected.vout, 0);
        assert_eq!(selected.value, 5460);
        let unconfirmed = select_utxo(utxos[..1].to_vec()).unwrap();
        assert_eq!(unconfirmed.vout, 1);
        assert!(select_utxo(vec![]).is_none());
    }

    #[tokio::test]
    async fn submit_maps_rejections() {
        let (_, tx) = funding();
        let (url, requests) = responder::serve(vec![
            (200, tx.txid().to_string()),
            (
                400,
                r#"sendrawtransaction RPC error: {"code":-25,"message":"bad-txns-inputs-missingorspent"}"#.into(),
            ),
            (
                400,
                r#"sendrawtransaction RPC error: {"code":-26,"message":"txn-already-in-mempool"}"#.into(),
            ),
            (429, "Too Many Requests".into()),
            (503, "Service Unavailable".into()),
        ])
        .await;
        let client = EsploraClient::new(url);

        assert_eq!(client.submit(&tx).await.unwrap(), tx.txid());
        match client.submit(&tx).await {
            Err(Error::Broadcast(reason)) => assert!(reason.contains("missingorspent")),
            res => panic!("unexpected {:?}", res),
        }
        // a retried broadcast already accepted by the node
        assert_eq!(client.submit(&tx).await.unwrap(), tx.txid());
        let limited = client.submit(&tx).await.unwrap_err();
        assert!(matches!(limited, Error::Network(_)));
        assert!(limited.is_transient());
        let unavailable = client.submit(&tx).await.unwrap_err();
        assert!(matches!(unavailable, Error::Network(_)));

        let requests = requests.await.unwrap();
        assert_eq!(requests.len(), 5);
        assert!(requests[0].starts_with("POST /tx "));
        assert!(requests[0].ends_with(&consensus::to_hex(&tx)));
    }

    #[tokio::test]
    async fn resolve_fetches_the_funding_transaction() {
        let (address, tx) = funding();
        let hex = consensus::to_hex(&tx);
        let (url, requests) = responder::serve(vec![
            (200, listing(&tx)),
            (200, hex.clone()),
            (200, listing(&tx)),
            (200, hex.clone()),
            (200, listing(&tx)),
            (200, "[]".into()),
            (404, "Address not found".into()),
        ])
        .await;
        let client = EsploraClient::new(url);

        let utxo = client.resolve(&address).await.unwrap();
        assert_eq!(utxo.outpoint(), OutPoint::new(tx.txid(), 0));
        assert_eq!(utxo.value, 7_800);
        assert_eq!(utxo.transaction().unwrap(), tx);

        let outpoint = OutPoint::new(tx.txid(), 0);
        let utxo = client.resolve_outpoint(&address, &outpoint).await.unwrap();
        assert_eq!(utxo.outpoint(), outpoint);
        let spent = OutPoint::new(tx.txid(), 1);
        assert!(matches!(
            client.resolve_outpoint(&address, &spent).await,
            Err(Error::NotFound(_))
        ));

        assert!(matches!(
            client.resolve(&address).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            client.resolve(&address).await,
            Err(Error::NotFound(_))
        ));

        let requests = requests.await.unwrap();
        assert!(requests[0].starts_with(&format!("GET /address/{}/utxo ", ADDRESS)));
        assert!(requests[1].starts_with(&format!("GET /tx/{}/hex ", tx.txid())));
    }
}
