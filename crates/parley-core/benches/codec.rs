//! Codec benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use parley_core::{codec, Message};
use serde_json::json;

fn offer_message() -> Message {
    let data = json!({
        "sdp": {
            "type": "offer",
            "sdp": "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n"
        }
    });
    let data = match data {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    Message::unicast("alice", "lobby", "bob", data)
}

fn encode_benchmark(c: &mut Criterion) {
    let msg = offer_message();

    c.bench_function("encode_offer", |b| {
        b.iter(|| black_box(codec::encode(&msg).unwrap()))
    });
}

fn decode_benchmark(c: &mut Criterion) {
    let encoded = codec::encode(&offer_message()).unwrap();

    c.bench_function("decode_offer", |b| {
        b.iter(|| black_box(codec::decode(&encoded).unwrap()))
    });
}

criterion_group!(benches, encode_benchmark, decode_benchmark);
criterion_main!(benches);
