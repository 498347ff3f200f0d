#![no_main]

use libfuzzer_sys::fuzz_target;

use proxycache::proxy::http::fuzzing::parse_request_target;

fuzz_target!(|data: &[u8]| {
    let target = String::from_utf8_lossy(data);
    parse_request_target(target.as_ref());
    parse_request_target(&format!("http://{target}"));
    parse_request_target(&format!("/{target}"));
});
