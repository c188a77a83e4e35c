use criterion::{Criterion, criterion_group, criterion_main};
use faq_chat::config::DocumentConfig;
use faq_chat::embeddings::{ChunkingConfig, chunk_documents, split_text};
use faq_chat::etl::{RawFaqData, preprocess_raw_data};
use std::hint::black_box;

fn synthetic_faq(entries: usize) -> RawFaqData {
    (0..entries)
        .map(|i| {
            let question = format!("[판매관리][배송 {}] 배송 문의 {}번은 어떻게 처리하나요?", i % 7, i);
            let answer = "주문 확인 후 영업일 기준 2일 이내에 발송됩니다. 도서산간 지역은 추가 배송비가 발생할 수 있습니다. "
                .repeat(1 + i % 5)
                + "위 도움말이 도움이 되었나요?";
            (question, answer)
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let raw = synthetic_faq(500);
    let documents = preprocess_raw_data(&raw);
    let chunking = ChunkingConfig::default();
    let document_config = DocumentConfig::default();
    let long_answer = "정산은 구매확정일로부터 1영업일 뒤에 진행됩니다. ".repeat(400);

    c.bench_function("preprocess", |b| {
        b.iter(|| preprocess_raw_data(black_box(&raw)))
    });
    c.bench_function("chunking", |b| {
        b.iter(|| {
            chunk_documents(
                black_box(&documents),
                black_box(&chunking),
                black_box(&document_config),
            )
        })
    });
    c.bench_function("split_text", |b| {
        b.iter(|| split_text(black_box(&long_answer), 256, 20))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
