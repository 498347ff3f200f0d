use anyhow::Result;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::trace;

use crate::io_util::Interruptible;
use crate::proxy::error::MalformedMessage;
use crate::util::trim_line_ending;

use super::headers::{HeaderAccumulator, HeaderLine, encode_headers};
use super::line::read_line;

/// A request or response: the headline, the headers in wire order, and the
/// `Content-Length`-delimited body when one was announced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpMessage {
    pub headline: String,
    pub headers: Vec<HeaderLine>,
    pub body: Option<Bytes>,
}

impl HttpMessage {
    /// First token of a request line.
    pub fn method(&self) -> Option<&str> {
        self.headline.split_whitespace().next()
    }

    /// Second token of a request line.
    pub fn target(&self) -> Option<&str> {
        self.headline.split_whitespace().nth(1)
    }

    /// Headline, headers and blank line as they go on the wire.
    pub fn encode_head(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(256);
        buffer.extend_from_slice(self.headline.as_bytes());
        buffer.extend_from_slice(b"\r\n");
        encode_headers(&mut buffer, &self.headers);
        buffer.extend_from_slice(b"\r\n");
        buffer
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MessageLimits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

/// A parsed headline and header section whose body is still unread on the stream.
#[derive(Debug)]
pub struct MessageHead {
    pub message: HttpMessage,
    /// Last positive `Content-Length`, if any.
    pub body_length: Option<usize>,
}

/// Reads one message, buffering its `Content-Length` body. `Ok(None)` means the peer closed
/// the stream, or sent a blank headline, before a message started.
pub async fn read_http_message<S>(
    reader: &mut BufReader<S>,
    io: &Interruptible,
    limits: MessageLimits,
) -> Result<Option<HttpMessage>>
where
    S: AsyncRead + Unpin,
{
    let Some(MessageHead {
        mut message,
        body_length,
    }) = read_message_head(reader, io, limits.max_header_bytes).await?
    else {
        return Ok(None);
    };
    if let Some(length) = body_length {
        message.body = Some(read_body(reader, io, length, limits.max_body_bytes).await?);
    }
    Ok(Some(message))
}

/// Reads a headline and header section and leaves the body on the stream. A stream that ends
/// before the headline is malformed.
pub async fn expect_message_head<S>(
    reader: &mut BufReader<S>,
    io: &Interruptible,
    max_header_bytes: usize,
) -> Result<MessageHead>
where
    S: AsyncRead + Unpin,
{
    match read_message_head(reader, io, max_header_bytes).await? {
        Some(head) => Ok(head),
        None => Err(MalformedMessage::new("stream closed before headline").into()),
    }
}

async fn read_message_head<S>(
    reader: &mut BufReader<S>,
    io: &Interruptible,
    max_header_bytes: usize,
) -> Result<Option<MessageHead>>
where
    S: AsyncRead + Unpin,
{
    let Some(raw_headline) = read_line(reader, io, max_header_bytes, "reading headline").await?
    else {
        return Ok(None);
    };
    let headline = trim_line_ending(&raw_headline).trim().to_string();
    if headline.is_empty() {
        trace!("blank headline");
        return Ok(None);
    }

    let mut headers = HeaderAccumulator::new(max_header_bytes.saturating_sub(raw_headline.len()));
    loop {
        let budget = headers.remaining().max(1);
        let Some(line) = read_line(reader, io, budget, "reading header section").await? else {
            break;
        };
        if !headers.push_line(&line)? {
            break;
        }
    }

    let body_length = headers.body_length();
    Ok(Some(MessageHead {
        message: HttpMessage {
            headline,
            headers: headers.into_headers(),
            body: None,
        },
        body_length,
    }))
}

async fn read_body<S>(
    reader: &mut BufReader<S>,
    io: &Interruptible,
    length: usize,
    max_body_bytes: usize,
) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    if length > max_body_bytes {
        return Err(MalformedMessage::new(format!(
            "Content-Length {length} exceeds limit of {max_body_bytes} bytes"
        ))
        .into());
    }

    let mut body = vec![0u8; length];
    let mut filled = 0usize;
    while filled < length {
        let read = io
            .run(reader.read(&mut body[filled..]), "reading message body")
            .await?;
        if read == 0 {
            return Err(MalformedMessage::new(format!(
                "stream closed after {filled} of {length} body bytes"
            ))
            .into());
        }
        filled += read;
    }
    Ok(Bytes::from(body))
}
