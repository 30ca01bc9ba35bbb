use std::str::from_utf8;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use parser::raw_request::RawRequest;
use parser::Method;

const METHODS: [&[u8]; 8] = [
    b"GET", b"PUT", b"POST", b"HEAD", b"TRACE", b"DELETE", b"CONNECT", b"OPTIONS",
];

fn benchmark(c: &mut Criterion) {
    for method in METHODS {
        c.bench_with_input(
            BenchmarkId::new("method", from_utf8(method).unwrap()),
            black_box(&method),
            |b, i| {
                b.iter(|| {
                    let mut buf = RawRequest::new(i);
                    let _ = parse_method(&mut buf);
                })
            },
        );
    }
}

criterion_group!(benches, benchmark);
criterion_main!(benches);

#[inline(never)]
fn parse_method(buf: &mut RawRequest<'_>) -> Option<Method> {
    loop {
        match buf.next() {
            None => return None,
            Some(&b' ') => return Method::try_from(buf.slice_skip(1).ok()?).ok(),
            Some(&b) if b.is_ascii_uppercase() => {}
            Some(_) => return None,
        }
    }
}
