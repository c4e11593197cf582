use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use html::{ParseLimits, parse_document, parse_fragment, serialize_document, tokenize};

const SMALL_BLOCKS: usize = 64;
const LARGE_BLOCKS: usize = 20_000;

fn make_blocks(n: usize) -> String {
    let mut out = String::with_capacity(n * 64);
    out.push_str("<!doctype html><title>bench</title><style>.box{margin:0}</style>");
    for i in 0..n {
        out.push_str("<div class=box data-ast-id=\"");
        out.push_str(&i.to_string());
        out.push_str("\"><span>hello &amp; bye</span><img src=x><p>para<li>item</div>");
    }
    out
}

fn make_rawtext_adversarial(bytes: usize) -> String {
    let mut body = String::with_capacity(bytes + 32);
    body.push_str("<script>");
    while body.len() < bytes {
        body.push_str("</scri<pt");
    }
    body.push_str("</script>");
    body
}

fn bench_tokenize(c: &mut Criterion) {
    let input = make_blocks(SMALL_BLOCKS);
    c.bench_function("tokenize_small", |b| {
        b.iter(|| black_box(tokenize(black_box(&input)).len()));
    });
    let raw = make_rawtext_adversarial(256 * 1024);
    c.bench_function("tokenize_rawtext_adversarial", |b| {
        b.iter(|| black_box(tokenize(black_box(&raw)).len()));
    });
}

fn bench_parse(c: &mut Criterion) {
    let limits = ParseLimits::default();
    let small = make_blocks(SMALL_BLOCKS);
    let large = make_blocks(LARGE_BLOCKS);
    c.bench_function("parse_document_small", |b| {
        b.iter(|| black_box(parse_document(black_box(&small), &limits).map(|d| d.live_count())));
    });
    c.bench_function("parse_document_large", |b| {
        b.iter(|| black_box(parse_document(black_box(&large), &limits).map(|d| d.live_count())));
    });
    c.bench_function("parse_fragment_small", |b| {
        b.iter(|| black_box(parse_fragment(black_box(&small), &limits).map(|d| d.live_count())));
    });
}

fn bench_serialize(c: &mut Criterion) {
    let limits = ParseLimits::default();
    let large = make_blocks(LARGE_BLOCKS);
    c.bench_function("serialize_large", |b| {
        b.iter_batched(
            || parse_document(&large, &limits).ok(),
            |doc| black_box(doc.map(|d| serialize_document(&d).len())),
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_tokenize, bench_parse, bench_serialize);
criterion_main!(benches);
