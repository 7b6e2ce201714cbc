//! Client side of the internal shard-to-shard lookup protocol.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tracing::error;

use crate::error::LookupError;
use crate::lookup::codec;
use crate::lookup::wire;
use crate::lookup::wire::InternalLookupResponse;
use crate::lookup::wire::InternalRunQueryRequest;
use crate::lookup::wire::InternalRunQueryResponse;
use crate::lookup::wire::InternalRunSetQueryIntResponse;
use crate::lookup::wire::request_kind;

/// A handle to one remote shard's lookup endpoint.
///
/// `padding_length` is the number of extra bytes the client must transmit
/// after the serialized request so that every request of the current fan-out
/// batch occupies the same number of bytes on the wire.
#[async_trait]
pub trait RemoteLookupClient: Send + Sync {
    /// Send a serialized [`InternalLookupRequest`](crate::lookup::InternalLookupRequest)
    /// and return the shard's response.
    async fn get_values(
        &self,
        serialized_request: &[u8],
        padding_length: usize,
    ) -> Result<InternalLookupResponse, LookupError>;

    /// The address this client talks to.
    fn address(&self) -> &str;
}

/// TCP-backed remote lookup client. One instance is pooled per remote shard;
/// each call opens a short-lived connection.
pub struct RemoteLookupClientImpl {
    address: String,
}

impl RemoteLookupClientImpl {
    /// Create a client for the shard listening at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into() }
    }

    /// Run a string set-algebra query on the remote shard's local data.
    pub async fn run_query(&self, query: String) -> Result<InternalRunQueryResponse, LookupError> {
        let request = InternalRunQueryRequest { query };
        self.roundtrip(request_kind::RUN_QUERY, &request, 0).await
    }

    /// Run a uint32 set-algebra query on the remote shard's local data.
    pub async fn run_set_query_int(
        &self,
        query: String,
    ) -> Result<InternalRunSetQueryIntResponse, LookupError> {
        let request = InternalRunQueryRequest { query };
        self.roundtrip(request_kind::RUN_SET_QUERY_INT, &request, 0).await
    }

    async fn roundtrip<Request, Response>(
        &self,
        kind: u8,
        request: &Request,
        padding_length: usize,
    ) -> Result<Response, LookupError>
    where
        Request: Serialize,
        Response: DeserializeOwned,
    {
        let serialized = wire::serialize(request)?;
        self.exchange(kind, &serialized, padding_length).await
    }

    async fn exchange<Response>(
        &self,
        kind: u8,
        serialized_request: &[u8],
        padding_length: usize,
    ) -> Result<Response, LookupError>
    where
        Response: DeserializeOwned,
    {
        let mut stream = TcpStream::connect(&self.address).await.map_err(|err| {
            error!(address = %self.address, error = %err, "remote lookup connect failed");
            LookupError::internal(format!("connect to {} failed: {err}", self.address))
        })?;
        let mut payload = Vec::with_capacity(1 + serialized_request.len());
        payload.push(kind);
        payload.extend_from_slice(serialized_request);
        codec::write_frame(&mut stream, &payload, padding_length)
            .await
            .map_err(|err| LookupError::internal(format!("remote lookup send failed: {err}")))?;
        let frame = codec::read_frame(&mut stream)
            .await
            .map_err(|err| LookupError::internal(format!("remote lookup receive failed: {err}")))?;
        wire::deserialize(&frame)
    }
}

#[async_trait]
impl RemoteLookupClient for RemoteLookupClientImpl {
    async fn get_values(
        &self,
        serialized_request: &[u8],
        padding_length: usize,
    ) -> Result<InternalLookupResponse, LookupError> {
        self.exchange(request_kind::LOOKUP, serialized_request, padding_length).await
    }

    fn address(&self) -> &str {
        &self.address
    }
}
