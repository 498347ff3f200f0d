use anyhow::Result;

use crate::proxy::error::MalformedMessage;
use crate::util::trim_line_ending;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderLine {
    pub name: String,
    pub value: String,
    lower_name: String,
}

impl HeaderLine {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let name_string = name.into();
        let lower_name = name_string.to_ascii_lowercase();
        let value_string = value.into();
        Self {
            name: name_string,
            value: value_string,
            lower_name,
        }
    }

    pub fn lower_name(&self) -> &str {
        &self.lower_name
    }

    pub fn is(&self, lower_name: &str) -> bool {
        self.lower_name == lower_name
    }
}

/// Appends `Name: Value\r\n` for every header, in order.
pub fn encode_headers<'a, I>(buffer: &mut Vec<u8>, headers: I)
where
    I: IntoIterator<Item = &'a HeaderLine>,
{
    for header in headers {
        buffer.extend_from_slice(header.name.as_bytes());
        buffer.extend_from_slice(b": ");
        buffer.extend_from_slice(header.value.as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }
}

/// Collects a header section line by line.
pub(crate) struct HeaderAccumulator {
    headers: Vec<HeaderLine>,
    content_length: Option<i64>,
    total_bytes: usize,
    max_bytes: usize,
}

impl HeaderAccumulator {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            headers: Vec::new(),
            content_length: None,
            total_bytes: 0,
            max_bytes,
        }
    }

    /// Records one raw header line. Returns `false` once the blank line ending the section is
    /// seen. Lines without a colon are skipped.
    pub fn push_line(&mut self, line: &str) -> Result<bool> {
        self.reserve(line.len())?;
        let trimmed = trim_line_ending(line);
        if trimmed.is_empty() {
            return Ok(false);
        }

        let Some((name, value)) = trimmed.split_once(':') else {
            return Ok(true);
        };
        let header = HeaderLine::new(name.trim(), value.trim());
        if header.is("content-length") {
            let length = header.value.parse::<i64>().map_err(|_| {
                MalformedMessage::new(format!("invalid Content-Length '{}'", header.value))
            })?;
            self.content_length = Some(length);
        }
        self.headers.push(header);
        Ok(true)
    }

    /// Bytes of header section still allowed.
    pub fn remaining(&self) -> usize {
        self.max_bytes.saturating_sub(self.total_bytes)
    }

    /// The last `Content-Length` seen, if it announced a body.
    pub fn body_length(&self) -> Option<usize> {
        self.content_length
            .filter(|length| *length > 0)
            .map(|length| usize::try_from(length).unwrap_or(usize::MAX))
    }

    pub fn into_headers(self) -> Vec<HeaderLine> {
        self.headers
    }

    fn reserve(&mut self, bytes: usize) -> Result<()> {
        let total = self.total_bytes.saturating_add(bytes);
        if total > self.max_bytes {
            return Err(MalformedMessage::new(format!(
                "header section exceeds limit of {} bytes",
                self.max_bytes
            ))
            .into());
        }
        self.total_bytes = total;
        Ok(())
    }
}
