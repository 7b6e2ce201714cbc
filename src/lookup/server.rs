//! Server side of the internal shard-to-shard lookup protocol.
//!
//! Accepts length-framed, padded [`InternalLookupRequest`]s, strips the
//! padding during decode, resolves the keys against the local shard, and
//! answers with a framed [`InternalLookupResponse`]. Connections are cheap:
//! a remote client may open one per request or keep one per peer.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::ErrorCode;
use crate::lookup::Lookup;
use crate::lookup::RequestContext;
use crate::lookup::codec;
use crate::lookup::wire;
use crate::lookup::wire::InternalLookupRequest;
use crate::lookup::wire::InternalLookupResponse;
use crate::lookup::wire::SingleLookupResult;

/// Serves the internal lookup protocol over the local shard.
pub struct InternalLookupServer {
    local_lookup: Arc<dyn Lookup>,
}

impl InternalLookupServer {
    /// Create a server answering from `local_lookup`.
    pub fn new(local_lookup: Arc<dyn Lookup>) -> Self {
        Self { local_lookup }
    }

    /// Accept and serve connections until the listener fails.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "internal lookup server listening");
        let local_lookup = self.local_lookup;
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(peer = %peer, "internal lookup connection accepted");
            let local_lookup = Arc::clone(&local_lookup);
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, local_lookup).await {
                    // EOF after the last frame is the normal shutdown path.
                    if err.kind() != std::io::ErrorKind::UnexpectedEof {
                        warn!(peer = %peer, error = %err, "internal lookup connection failed");
                    }
                }
            });
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    local_lookup: Arc<dyn Lookup>,
) -> std::io::Result<()> {
    loop {
        let frame = codec::read_frame(&mut stream).await?;
        let Some((&kind, body)) = frame.split_first() else {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "empty frame"));
        };
        let payload = match kind {
            wire::request_kind::LOOKUP => {
                let request: InternalLookupRequest = wire::deserialize(body)
                    .map_err(|err| invalid_data(err.to_string()))?;
                let response = process_request(&local_lookup, request)
                    .await
                    .map_err(|err| std::io::Error::other(err.to_string()))?;
                wire::serialize(&response)
            }
            wire::request_kind::RUN_QUERY => {
                let request: wire::InternalRunQueryRequest = wire::deserialize(body)
                    .map_err(|err| invalid_data(err.to_string()))?;
                let response = local_lookup
                    .run_query(&RequestContext::default(), request.query)
                    .await
                    .map_err(|err| std::io::Error::other(err.to_string()))?;
                wire::serialize(&response)
            }
            wire::request_kind::RUN_SET_QUERY_INT => {
                let request: wire::InternalRunQueryRequest = wire::deserialize(body)
                    .map_err(|err| invalid_data(err.to_string()))?;
                let response = local_lookup
                    .run_set_query_int(&RequestContext::default(), request.query)
                    .await
                    .map_err(|err| std::io::Error::other(err.to_string()))?;
                wire::serialize(&response)
            }
            other => {
                // A peer speaking another protocol; there is no way to
                // answer it meaningfully.
                return Err(invalid_data(format!("unknown request kind {other}")));
            }
        }
        .map_err(|err| std::io::Error::other(err.to_string()))?;
        codec::write_frame(&mut stream, &payload, 0).await?;
    }
}

fn invalid_data(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message)
}

/// Resolve one request against the local shard.
///
/// With `lookup_sets`, keys are first resolved in the string-set namespace;
/// keys absent there are retried in the uint32-set namespace. The namespaces
/// are disjoint, so the second pass can never overwrite a string-set hit.
async fn process_request(
    local_lookup: &Arc<dyn Lookup>,
    request: InternalLookupRequest,
) -> Result<InternalLookupResponse, crate::error::LookupError> {
    let context = RequestContext {
        log_context: request.log_context.clone(),
        consented_debug_config: request.consented_debug_config.clone(),
    };
    if !request.lookup_sets {
        return local_lookup.get_key_values(&context, request.keys).await;
    }

    let mut response = local_lookup.get_key_value_set(&context, request.keys).await?;
    let missing: Vec<String> = response
        .kv_pairs
        .iter()
        .filter(|(_, result)| {
            matches!(result, SingleLookupResult::Status(status) if status.code == ErrorCode::NotFound)
        })
        .map(|(key, _)| key.clone())
        .collect();
    if !missing.is_empty() {
        let uint_response = local_lookup.get_uint32_value_set(&context, missing).await?;
        for (key, result) in uint_response.kv_pairs {
            if matches!(result, SingleLookupResult::UintsetValues(_)) {
                response.kv_pairs.insert(key, result);
            }
        }
    }
    Ok(response)
}
