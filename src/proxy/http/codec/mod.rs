mod headers;
mod line;
mod message;

pub use headers::{HeaderLine, encode_headers};
pub use message::{
    HttpMessage, MessageHead, MessageLimits, expect_message_head, read_http_message,
};
