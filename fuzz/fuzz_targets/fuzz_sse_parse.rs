#![no_main]
use florentine::providers::compatible::{drain_sse_payloads, SsePayload};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Feed the body in two arbitrary chunks, as the network would.
    let split = data.first().map_or(0, |b| usize::from(*b) % (data.len() + 1));
    let mut buffer = data[..split].to_vec();
    let mut payloads = drain_sse_payloads(&mut buffer);
    buffer.extend_from_slice(&data[split..]);
    payloads.extend(drain_sse_payloads(&mut buffer));

    for payload in payloads {
        if let SsePayload::Data(text) = payload {
            assert!(!text.contains('\n'));
        }
    }
});
