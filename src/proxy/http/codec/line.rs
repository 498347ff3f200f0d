use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::io_util::Interruptible;
use crate::proxy::error::MalformedMessage;

/// Reads one `\n`-terminated line, line ending included.
///
/// Returns `Ok(None)` when the stream ends before any byte of the line arrives. A stream that
/// ends part-way through a line, a line longer than `max_len`, or a line that is not UTF-8 is a
/// `MalformedMessage`.
pub(crate) async fn read_line<S>(
    reader: &mut BufReader<S>,
    io: &Interruptible,
    max_len: usize,
    context: &str,
) -> Result<Option<String>>
where
    S: AsyncRead + Unpin,
{
    let mut collected = Vec::new();

    loop {
        let available = io.run(reader.fill_buf(), context).await?;

        if available.is_empty() {
            if collected.is_empty() {
                return Ok(None);
            }
            return Err(MalformedMessage::new(format!("connection closed while {context}")).into());
        }

        let newline_pos = available.iter().position(|byte| *byte == b'\n');
        let consume = newline_pos.map(|idx| idx + 1).unwrap_or(available.len());

        if collected.len().saturating_add(consume) > max_len {
            return Err(MalformedMessage::new(format!(
                "line exceeds limit of {max_len} bytes while {context}"
            ))
            .into());
        }

        collected.extend_from_slice(&available[..consume]);
        reader.consume(consume);

        if newline_pos.is_some() {
            break;
        }
    }

    String::from_utf8(collected)
        .map(Some)
        .map_err(|_| MalformedMessage::new(format!("invalid UTF-8 while {context}")).into())
}
