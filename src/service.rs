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

//! External collaborators of the spend pipeline: the transaction template provider, the UTXO
//! resolver, the submitter and the preimage discovery.
//!
//! Each collaborator is an async trait so the orchestrator can be driven by the HTTP clients of
//! this module ([`CounterpartyClient`], [`EsploraClient`]) or by in-memory implementations.
//! Only [`Error::Network`] is transient, see [`retry`].

use std::error;

use async_trait::async_trait;
use bitcoin::util::address::Address;
use bitcoin::util::key::PublicKey;
use bitcoin::{OutPoint, Transaction, Txid};
use thiserror::Error;

use crate::crypto::Secret;
use crate::script::LockingScript;
use crate::swap::PaymentMode;
use crate::transaction::Utxo;
use crate::ErrorCategory;

pub mod counterparty;
pub mod esplora;
pub mod retry;

pub use counterparty::CounterpartyClient;
pub use esplora::EsploraClient;
pub use retry::{retry, RetryPolicy};

/// A list of possible errors returned by the external collaborators.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport failure or temporary unavailability of the service.
    #[error("Network error: {0}")]
    Network(String),
    /// Well-formed error returned by the service.
    #[error("Service error {code}: {message}")]
    Response {
        /// Error code returned by the service.
        code: i64,
        /// Error message returned by the service.
        message: String,
    },
    /// The requested resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
    /// The transaction was rejected by the submitter.
    #[error("Transaction rejected: {0}")]
    Broadcast(String),
    /// The service answered with data that cannot be decoded.
    #[error("Cannot decode response: {0}")]
    Decode(String),
    /// Any service error not part of this list.
    #[error("Service error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new service error of type [`Self::Other`] with an arbitrary payload.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::Other(error.into())
    }

    /// Consumes the `Error`, returning its inner error (if any).
    ///
    /// If this [`enum@Error`] was constructed via [`new`] then this function will return [`Some`],
    /// otherwise it will return [`None`].
    ///
    /// [`new`]: Error::new
    ///
    pub fn into_inner(self) -> Option<Box<dyn error::Error + Send + Sync>> {
        match self {
            Self::Other(error) => Some(error),
            _ => None,
        }
    }

    /// Only transport failures are worth retrying, a well-formed answer is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(_) => ErrorCategory::Network,
            Self::Broadcast(_) => ErrorCategory::Broadcast,
            Self::Response { .. } | Self::NotFound(_) | Self::Decode(_) | Self::Other(_) => {
                ErrorCategory::Response
            }
        }
    }

    /// Classify a non-success HTTP status: server errors and rate limiting are transient.
    pub(crate) fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Self::Network(format!("{}: {}", status, body))
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Self::NotFound(body)
        } else {
            Self::Response {
                code: status.as_u16().into(),
                message: body,
            }
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_status(status, e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Request sent to the transaction template provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRequest {
    /// The contract address the funds are spent from.
    pub source: Address,
    /// Where the funds go.
    pub destination: Address,
    /// Public key of the spender, revealed in the unlocking stack.
    pub identifier: PublicKey,
    /// What the template transfers.
    pub mode: PaymentMode,
}

/// Produces an unsigned transaction skeleton; only its outputs are used.
#[async_trait]
pub trait TemplateProvider: Send + Sync {
    async fn create_template(&self, request: &TemplateRequest) -> Result<Transaction, Error>;
}

/// Resolves a spendable output of an address.
#[async_trait]
pub trait UtxoResolver: Send + Sync {
    /// Return the first spendable output, or [`Error::NotFound`].
    async fn resolve(&self, address: &Address) -> Result<Utxo, Error>;

    /// Return the output if it is an unspent output of the address, or [`Error::NotFound`].
    async fn resolve_outpoint(&self, address: &Address, outpoint: &OutPoint)
        -> Result<Utxo, Error>;
}

/// Broadcasts a finalized transaction. Submitting a transaction the ledger already knows
/// returns its id.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, tx: &Transaction) -> Result<Txid, Error>;
}

/// Recovers the secret revealed by a claim transaction.
#[async_trait]
pub trait PreimageDiscovery: Send + Sync {
    async fn discover(&self, txid: &Txid, script: &LockingScript) -> Result<Secret, Error>;
}

/// Single-threaded HTTP responder answering canned responses, one per connection.
#[cfg(test)]
pub(crate) mod responder {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// Serve the responses in order and return the base URL with a handle resolving to the raw
    /// requests received.
    pub(crate) async fn serve(responses: Vec<(u16, String)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut requests = vec![];
            for (code, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut socket).await);
                let response = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    code,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
            requests
        });
        (url, handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = vec![];
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}
