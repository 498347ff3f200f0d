use anyhow::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::io_util::Interruptible;
use crate::proxy::error::MalformedMessage;
use crate::proxy::target::OriginTarget;

use super::super::codec::{HttpMessage, encode_headers};

/// Client headers that never travel to the origin; the forwarder writes its own.
const REPLACED_HEADERS: [&str; 3] = ["host", "connection", "proxy-connection"];

/// Encodes the client's request for the origin: same method, origin-form target, `HTTP/1.1`,
/// client headers in order, then `Connection: close` and the origin `Host`, then the body.
pub(crate) fn build_origin_request(
    request: &HttpMessage,
    origin: &OriginTarget,
) -> Result<Vec<u8>> {
    let method = request
        .method()
        .ok_or_else(|| MalformedMessage::new("request line missing method"))?;

    let mut buffer = Vec::with_capacity(256);
    buffer.extend_from_slice(method.as_bytes());
    buffer.extend_from_slice(b" ");
    buffer.extend_from_slice(origin.path.as_bytes());
    buffer.extend_from_slice(b" HTTP/1.1\r\n");

    encode_headers(
        &mut buffer,
        request
            .headers
            .iter()
            .filter(|header| !REPLACED_HEADERS.contains(&header.lower_name())),
    );
    buffer.extend_from_slice(b"Connection: close\r\n");
    buffer.extend_from_slice(b"Host: ");
    buffer.extend_from_slice(origin.host_header().as_bytes());
    buffer.extend_from_slice(b"\r\n\r\n");

    if let Some(body) = &request.body {
        buffer.extend_from_slice(body);
    }
    Ok(buffer)
}

pub(crate) async fn send_origin_request<W>(
    origin_writer: &mut W,
    request: &HttpMessage,
    origin: &OriginTarget,
    io: &Interruptible,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let encoded = build_origin_request(request, origin)?;
    io.run(
        origin_writer.write_all(&encoded),
        "writing request to origin",
    )
    .await?;
    io.run(origin_writer.flush(), "flushing request to origin")
        .await?;
    Ok(encoded.len() as u64)
}
