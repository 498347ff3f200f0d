#![allow(dead_code)]

mod harness;
mod http_utils;
mod logging;
mod net;
mod origin;
mod proxy_client;

pub use harness::{ProxyHarness, ProxyHarnessBuilder};
pub use http_utils::{read_http_response, read_response_bytes, read_until_double_crlf};
pub use logging::LogCapture;
pub use net::{find_free_port, wait_for_listener};
pub use origin::TestOrigin;
pub use proxy_client::ProxyClient;
