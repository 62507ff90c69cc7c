//! Remote inference client
//!
//! Builds the same wire format the server speaks and dispatches it over
//! `http://` (POST to the root) or `shm+unix://` (socket-framed shared
//! memory, see [`crate::shm`]). Non-200 answers surface as `RemoteFailed`;
//! a response carrying error records is a failure even with status 200.

use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::shm::{self, ShmSegment};
use crate::tensor::Tensor;
use crate::value::{from_value, to_value, TensorValue};
use crate::wire;
use flatbuffers::FlatBufferBuilder;
use std::path::Path;
use tokio::net::UnixStream;
use tokio::signal::unix::{signal, SignalKind};
use tracing::warn;

/// Default size of the client-created shared-memory segment
pub const DEFAULT_SHM_SIZE: usize = 64 << 20;

/// Serialize a top-level infer `Request`
pub fn encode_infer_request(
    config: &str,
    inputs: &[Tensor],
    input_names: &[String],
    output_names: &[String],
) -> Vec<u8> {
    let mut fbb = FlatBufferBuilder::with_capacity(1024);
    let config = (!config.is_empty()).then(|| fbb.create_string(config));
    let input_names = (!input_names.is_empty()).then(|| {
        let offsets: Vec<_> = input_names.iter().map(|s| fbb.create_string(s)).collect();
        fbb.create_vector(&offsets)
    });
    let output_names = (!output_names.is_empty()).then(|| {
        let offsets: Vec<_> = output_names.iter().map(|s| fbb.create_string(s)).collect();
        fbb.create_vector(&offsets)
    });
    let tensor_offsets: Vec<_> = inputs.iter().map(|t| t.build(&mut fbb)).collect();
    let input_tensors = (!tensor_offsets.is_empty()).then(|| fbb.create_vector(&tensor_offsets));
    let infer = wire::InferRequest::create(
        &mut fbb,
        &wire::InferRequestArgs {
            config,
            input_names,
            input_tensors,
            output_names,
        },
    );
    let request = wire::Request::create(&mut fbb, wire::req::INFER_REQUEST, infer.as_union_value());
    fbb.finish(request, None);
    fbb.finished_data().to_vec()
}

/// Serialize a top-level metadata `Request`
pub fn encode_metadata_request() -> Vec<u8> {
    let mut fbb = FlatBufferBuilder::with_capacity(64);
    let md = wire::MetadataRequest::create(&mut fbb);
    let request = wire::Request::create(&mut fbb, wire::req::METADATA_REQUEST, md.as_union_value());
    fbb.finish(request, None);
    fbb.finished_data().to_vec()
}

/// Decode an infer response, treating a non-empty error list as failure
pub fn parse_infer_response(bytes: &[u8]) -> Result<Vec<Tensor>> {
    let response = wire::root_as_infer_response(bytes).map_err(|e| Error::decode(e.to_string()))?;
    if let Some(first) = response.errors().into_iter().flatten().next() {
        return Err(Error::RemoteFailed {
            status: first.code() as u16,
            body: first.message().unwrap_or_default().to_owned(),
        });
    }
    response
        .output_tensors()
        .into_iter()
        .flatten()
        .map(Tensor::from_wire)
        .collect()
}

/// A session on the shared-memory transport
///
/// Creates the segment, hands its id to the server, and installs a signal
/// handler that removes the segment before the process dies.
#[derive(Debug)]
pub struct ShmClient {
    stream: UnixStream,
    segment: ShmSegment,
}

impl ShmClient {
    pub async fn connect(socket: impl AsRef<Path>, shm_size: usize) -> Result<Self> {
        let mut stream = UnixStream::connect(socket.as_ref()).await?;
        let segment = ShmSegment::create(shm_size)?;

        let shm_id = segment.id();
        tokio::spawn(async move {
            let (Ok(mut interrupt), Ok(mut terminate)) =
                (signal(SignalKind::interrupt()), signal(SignalKind::terminate()))
            else {
                return;
            };
            tokio::select! {
                _ = interrupt.recv() => {}
                _ = terminate.recv() => {}
            }
            warn!("caught signal, removing shared-memory segment {shm_id}");
            unsafe {
                libc::shmctl(shm_id, libc::IPC_RMID, std::ptr::null_mut());
            }
            std::process::exit(1);
        });

        shm::write_u32(&mut stream, segment.id() as u32).await?;
        Ok(ShmClient { stream, segment })
    }

    /// One request/response exchange; only framing crosses the socket
    pub async fn call(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        self.segment.write(0, request)?;
        shm::write_u32(&mut self.stream, 0).await?;
        shm::write_u32(&mut self.stream, request.len() as u32).await?;
        let start = shm::read_u32(&mut self.stream).await? as usize;
        let len = shm::read_u32(&mut self.stream).await? as usize;
        self.segment.read(start, len)
    }
}

/// A connected remote model endpoint
#[derive(Debug)]
pub enum RemoteClient {
    Http { client: reqwest::Client, uri: String },
    Shm(ShmClient),
}

impl RemoteClient {
    /// Connect by URI scheme: `http://` or `shm+unix://<socket path>`
    pub async fn connect(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| Error::transport(format!("no scheme in uri '{uri}'")))?;
        match scheme {
            "http" => Ok(RemoteClient::Http {
                client: reqwest::Client::new(),
                uri: uri.to_owned(),
            }),
            "shm+unix" => Ok(RemoteClient::Shm(
                ShmClient::connect(rest, DEFAULT_SHM_SIZE).await?,
            )),
            other => Err(Error::transport(format!("unhandled scheme: {other}"))),
        }
    }

    async fn call(&mut self, body: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            RemoteClient::Http { client, uri } => {
                let response = client
                    .post(uri.as_str())
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| Error::transport(format!("failed to send request: {e}")))?;
                let status = response.status().as_u16();
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| Error::transport(format!("failed to read body: {e}")))?;
                if status != 200 {
                    return Err(Error::RemoteFailed {
                        status,
                        body: String::from_utf8_lossy(&bytes).into_owned(),
                    });
                }
                Ok(bytes.to_vec())
            }
            RemoteClient::Shm(shm) => shm.call(&body).await,
        }
    }

    /// Multi-input, multi-output inference over raw tensors
    pub async fn infer_raw(
        &mut self,
        config: &str,
        inputs: &[Tensor],
        input_names: &[String],
        output_names: &[String],
    ) -> Result<Vec<Tensor>> {
        let request = encode_infer_request(config, inputs, input_names, output_names);
        let body = self.call(request).await?;
        parse_infer_response(&body)
    }

    /// Fetch the server's model metadata
    pub async fn metadata(&mut self) -> Result<Metadata> {
        let body = self.call(encode_metadata_request()).await?;
        let response =
            wire::root_as_metadata_response(&body).map_err(|e| Error::decode(e.to_string()))?;
        Ok(Metadata::from_wire(response))
    }
}

/// Multi-input, multi-output inference. Empty name lists fall back to the
/// server's defaults.
pub async fn infer_multi(
    uri: &str,
    config: &str,
    inputs: Vec<Tensor>,
    input_names: &[String],
    output_names: &[String],
) -> Result<Vec<Tensor>> {
    RemoteClient::connect(uri)
        .await?
        .infer_raw(config, &inputs, input_names, output_names)
        .await
}

/// Single-input, single-output convenience wrapper with automatic value
/// conversion. Anything but exactly one output is `UnexpectedOutputCount`.
pub async fn infer<V: TensorValue, O: TensorValue>(uri: &str, input: &V) -> Result<O> {
    let tensor = from_value(input)?;
    let outputs = infer_multi(uri, "", vec![tensor], &[], &[]).await?;
    if outputs.len() != 1 {
        return Err(Error::UnexpectedOutputCount {
            expected: 1,
            actual: outputs.len(),
        });
    }
    to_value(&outputs[0])
}

/// Fetch metadata from a remote server
pub async fn metadata(uri: &str) -> Result<Metadata> {
    RemoteClient::connect(uri).await?.metadata().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::ElementType;

    #[test]
    fn test_encode_infer_request_round_trip() {
        let tensor = from_value(&vec![1.0f32, 2.0]).unwrap();
        let bytes = encode_infer_request(
            "cfg",
            &[tensor.clone()],
            &["input0".to_string()],
            &["output0".to_string()],
        );
        let root = wire::root_as_request(&bytes).unwrap();
        assert_eq!(root.req_type(), wire::req::INFER_REQUEST);
        let infer = root.req_as_infer_request().unwrap();
        assert_eq!(infer.config(), Some("cfg"));
        assert_eq!(infer.input_names().unwrap().get(0), "input0");
        assert_eq!(infer.output_names().unwrap().get(0), "output0");
        let sent = Tensor::from_wire(infer.input_tensors().unwrap().get(0)).unwrap();
        assert_eq!(sent, tensor);
    }

    #[test]
    fn test_encode_infer_request_omits_empty_fields() {
        let bytes = encode_infer_request("", &[], &[], &[]);
        let infer = wire::root_as_request(&bytes)
            .unwrap()
            .req_as_infer_request()
            .unwrap();
        assert!(infer.config().is_none());
        assert!(infer.input_names().is_none());
        assert!(infer.input_tensors().is_none());
        assert!(infer.output_names().is_none());
    }

    #[test]
    fn test_encode_metadata_request() {
        let bytes = encode_metadata_request();
        let root = wire::root_as_request(&bytes).unwrap();
        assert_eq!(root.req_type(), wire::req::METADATA_REQUEST);
        assert!(root.req_as_metadata_request().is_some());
    }

    #[test]
    fn test_parse_infer_response_outputs() {
        let tensor =
            Tensor::from_bytes(vec![0u8; 8], vec![1], ElementType::Float64).unwrap();
        let mut ctx = crate::context::RequestContext::detached();
        let bytes = ctx.encode_infer_response(&[tensor.clone()]);
        let outputs = parse_infer_response(&bytes).unwrap();
        assert_eq!(outputs, vec![tensor]);
    }

    #[test]
    fn test_parse_infer_response_errors_are_failures() {
        let bytes = crate::context::encode_error_response(400, "apply failed: nope");
        let err = parse_infer_response(&bytes).unwrap_err();
        match err {
            Error::RemoteFailed { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("nope"));
            }
            other => panic!("expected RemoteFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_scheme_is_rejected() {
        let err = futures_util::future::FutureExt::now_or_never(RemoteClient::connect(
            "grpc+http://localhost:9000",
        ))
        .expect("scheme parsing is synchronous")
        .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
