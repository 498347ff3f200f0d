#![no_main]

use std::io::{Cursor, Read};
use std::pin::Pin;
use std::sync::OnceLock;
use std::task::{Context, Poll};

use libfuzzer_sys::fuzz_target;
use tokio::io::{AsyncRead, BufReader, ReadBuf};

use proxycache::proxy::http::fuzzing::parse_http_message;

/// Serves the input in small reads so line assembly crosses buffer boundaries.
struct TrickleRead {
    inner: Cursor<Vec<u8>>,
    step: usize,
}

impl AsyncRead for TrickleRead {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let step = self.step;
        let unfilled = buf.initialize_unfilled();
        let limit = unfilled.len().min(step);
        let read = Read::read(&mut self.inner, &mut unfilled[..limit])?;
        buf.advance(read);
        Poll::Ready(Ok(()))
    }
}

fn runtime() -> &'static tokio::runtime::Runtime {
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("build tokio runtime")
    })
}

fuzz_target!(|data: &[u8]| {
    let Some((&first, payload)) = data.split_first() else {
        return;
    };
    let step = usize::from(first % 16) + 1;
    let max_header_bytes = payload.len().clamp(1, 16 * 1024);

    runtime().block_on(async {
        let mut reader = BufReader::with_capacity(
            32,
            TrickleRead {
                inner: Cursor::new(payload.to_vec()),
                step,
            },
        );
        let _ = parse_http_message(&mut reader, max_header_bytes).await;
    });
});
