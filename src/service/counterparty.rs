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

//! Counterparty JSON-RPC client used as transaction template provider. The API composes the
//! unsigned `create_send` and `create_sweep` transactions spending from the contract address.

use async_trait::async_trait;
use bitcoin::Transaction;
use serde_json::{json, Value};

use crate::consensus;
use crate::service::{Error, TemplateProvider, TemplateRequest};
use crate::swap::{Encoding, PaymentMode};

/// Public testnet Counterparty API.
pub const DEFAULT_URL: &str = "https://public.coindaddy.io:14001/api/";

#[derive(Serialize, Debug)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize, Debug)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize, Debug)]
struct RpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcError>,
}

impl RpcResponse {
    fn into_result(self) -> Result<String, Error> {
        match (self.result, self.error) {
            (_, Some(RpcError { code, message })) => Err(Error::Response { code, message }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(Error::Decode("missing result".into())),
        }
    }
}

/// Counterparty API client authenticated with HTTP basic auth.
#[derive(Debug, Clone)]
pub struct CounterpartyClient {
    client: reqwest::Client,
    url: String,
    user: String,
    password: String,
}

impl CounterpartyClient {
    pub fn new(url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// The API method composing the payment.
    pub fn method(mode: &PaymentMode) -> &'static str {
        match mode {
            PaymentMode::Send { .. } => "create_send",
            PaymentMode::Sweep { .. } => "create_sweep",
        }
    }

    /// The API parameters for the request. Unconfirmed inputs are always allowed so a freshly
    /// funded contract can be spent.
    pub fn params(request: &TemplateRequest) -> Value {
        let source = request.source.to_string();
        let destination = request.destination.to_string();
        let pubkey = request.identifier.to_string();
        match &request.mode {
            PaymentMode::Send { asset, quantity } => json!({
                "source": source,
                "asset": asset,
                "destination": destination,
                "pubkey": pubkey,
                "quantity": quantity,
                "allow_unconfirmed_inputs": true,
            }),
            PaymentMode::Sweep { flags, encoding } => {
                let mut params = json!({
                    "source": source,
                    "destination": destination,
                    "pubkey": pubkey,
                    "flags": flags,
                    "allow_unconfirmed_inputs": true,
                });
                match encoding {
                    Some(Encoding::PubkeyHash) => {
                        params["encoding"] = json!("pubkeyhash");
                    }
                    Some(Encoding::Multisig) => {
                        params["encoding"] = json!("multisig");
                        params["dust_return_pubkey"] = json!(pubkey);
                    }
                    None => (),
                }
                params
            }
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<String, Error> {
        let payload = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        log::trace!("{} answered {}: {}", method, status, body);
        match serde_json::from_str::<RpcResponse>(&body) {
            Ok(rpc) if rpc.error.is_some() || status.is_success() => rpc.into_result(),
            Ok(_) => Err(Error::from_status(status, body)),
            Err(_) if !status.is_success() => Err(Error::from_status(status, body)),
            Err(e) => Err(Error::Decode(e.to_string())),
        }
    }
}

#[async_trait]
impl TemplateProvider for CounterpartyClient {
    async fn create_template(&self, request: &TemplateRequest) -> Result<Transaction, Error> {
        let method = Self::method(&request.mode);
        log::debug!("Requesting {} template from {}", method, request.source);
        let hex = self.call(method, Self::params(request)).await?;
        consensus::from_hex::<Transaction>(&hex).map_err(|e| Error::Decode(e.to_string()))
    }
}
