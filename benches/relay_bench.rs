//! Benchmarks for the per-request hot paths: SSE decoding and transcript folding.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use prompt_gateway::transcript::{fold, Message, Role};
use prompt_gateway::upstream::sse::SseDecoder;

fn bench_sse_decode(c: &mut Criterion) {
    // 1,000 small deltas, roughly what a long answer streams.
    let mut payload = Vec::new();
    for i in 0..1_000 {
        payload.extend_from_slice(
            format!(
                "event: response.output_text.delta\ndata: {{\"type\":\"response.output_text.delta\",\"delta\":\"tok{i} \"}}\n\n"
            )
            .as_bytes(),
        );
    }

    // Feed it in awkward 37-byte chunks so frames straddle chunk boundaries.
    c.bench_function("sse_decode_1k_frames_37b_chunks", |b| {
        b.iter(|| {
            let mut decoder = SseDecoder::new();
            let mut frames = 0;
            for chunk in payload.chunks(37) {
                frames += decoder.push(black_box(chunk)).map_or(0, |f| f.len());
            }
            black_box(frames);
        })
    });
}

fn bench_fold(c: &mut Criterion) {
    let messages: Vec<Message> = (0..200)
        .map(|i| {
            let role = match i % 4 {
                0 => Role::System,
                1 => Role::User,
                2 => Role::Assistant,
                _ => Role::Developer,
            };
            Message::new(role, format!("message number {i} with a bit of text"))
        })
        .collect();

    c.bench_function("fold_200_messages", |b| {
        b.iter(|| black_box(fold(black_box(&messages))))
    });
}

criterion_group!(benches, bench_sse_decode, bench_fold);
criterion_main!(benches);
