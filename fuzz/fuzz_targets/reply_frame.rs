#![no_main]

use libfuzzer_sys::fuzz_target;
use trio_link::framing::{decode_reply, parse_reply, ReplyParser};
use trio_link::telnet::TelnetFilter;

const MAX_STREAM_BYTES: usize = 8192;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    let command_len = usize::from(data[0]) % (data.len() - 1);
    let chunk = usize::from(data[1]).max(1);
    let command = &data[2..2 + command_len];
    let stream = &data[2 + command_len..];
    let stream = &stream[..stream.len().min(MAX_STREAM_BYTES)];

    let mut filter = TelnetFilter::new();
    let mut payload = Vec::new();
    let mut replies = Vec::new();
    filter.feed(stream, &mut payload, &mut replies);

    let whole = parse_reply(command, &payload);

    let mut parser = ReplyParser::new(command);
    let mut incremental = None;
    for piece in payload.chunks(chunk) {
        if let Some((reply, _rest)) = parser.push(piece) {
            incremental = Some(reply);
            break;
        }
    }
    assert_eq!(whole, incremental, "chunked parse diverged");

    if let Some(reply) = whole {
        let text = String::from_utf8_lossy(command);
        let _ = decode_reply(&text, &reply);
    }
});
