//! Windowed-alignment throughput across corpus sizes, including the anchor
//! discovery pass each window boundary depends on.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use mastering_pipeline::anchor::AnchorEngine;
use mastering_pipeline::align;
use mastering_pipeline::book::{BookIndexer, PlainTextBookParser};
use mastering_pipeline::config::{AlignParams, AnchorParams, BookIndexParams};
use mastering_pipeline::model::asr::AsrToken;
use mastering_pipeline::model::book::BookIndex;

fn synthetic_corpus(word_count: usize) -> (BookIndex, Vec<AsrToken>) {
    let mut text = String::new();
    let mut in_sentence = 0;
    for i in 0..word_count {
        text.push_str("word");
        text.push_str(&i.to_string());
        in_sentence += 1;
        if in_sentence >= 12 {
            text.push_str(". ");
            in_sentence = 0;
        } else {
            text.push(' ');
        }
        if i > 0 && i % 240 == 0 {
            text.push_str("\n\n");
        }
    }

    let indexer = BookIndexer::new(Box::new(PlainTextBookParser), BookIndexParams::default());
    let book = indexer.build("bench-corpus", text.as_bytes()).expect("synthetic corpus indexes cleanly");

    let tokens = book
        .words
        .iter()
        .enumerate()
        .map(|(idx, word)| AsrToken {
            text: word.text.clone(),
            start_sec: idx as f64 * 0.3,
            end_sec: idx as f64 * 0.3 + 0.25,
            confidence: Some(0.95),
        })
        .collect();

    (book, tokens)
}

fn bench_run_alignment(c: &mut Criterion) {
    let anchor_params = AnchorParams::default();
    let align_params = AlignParams::default();
    let mut group = c.benchmark_group("run_alignment");

    for word_count in [200usize, 1_000, 5_000] {
        let (book, tokens) = synthetic_corpus(word_count);
        let engine = AnchorEngine::new(&anchor_params);
        let anchor_result = engine.discover(&book, &tokens).expect("anchor discovery never fails");

        group.throughput(Throughput::Elements(word_count as u64));
        group.bench_with_input(
            BenchmarkId::new("words", word_count),
            &(book, tokens, anchor_result),
            |b, (book, tokens, anchor_result)| {
                b.iter(|| black_box(align::run_alignment(book, tokens, anchor_result, &align_params).expect("alignment never fails")));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_run_alignment);
criterion_main!(benches);
