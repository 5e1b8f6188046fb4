use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use crawl_scout::link_graph::LinkGraph;
use crawl_scout::url_utils::fingerprint;
use std::collections::BTreeMap;
use tempfile::TempDir;

fn bench_fingerprint(c: &mut Criterion) {
    let urls: Vec<String> = (0..1000)
        .map(|i| format!("http://abcdefghijklmnop.onion/listing/{i}/"))
        .collect();

    c.bench_function("fingerprint_1000_urls", |b| {
        b.iter(|| {
            for url in &urls {
                black_box(fingerprint(url));
            }
        });
    });
}

// Each page links to ten siblings, roughly what a listing page looks like
fn populated_graph(dir: &TempDir, pages: usize) -> LinkGraph {
    let mut graph = LinkGraph::open(dir.path().join("bench.json"), usize::MAX).unwrap();
    for i in 0..pages {
        let url = format!("http://abcdefghijklmnop.onion/page/{i}");
        let children: BTreeMap<_, _> = (0..10)
            .map(|j| {
                let child = format!("http://abcdefghijklmnop.onion/page/{}", i * 10 + j);
                (fingerprint(&child), child)
            })
            .collect();
        graph.record(fingerprint(&url), url, children).unwrap();
    }
    graph
}

fn bench_graph_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_flush");
    group.sample_size(20);

    for pages in [100, 1000, 5000] {
        group.bench_with_input(BenchmarkId::from_parameter(pages), &pages, |b, &pages| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().unwrap();
                    let graph = populated_graph(&dir, pages);
                    (dir, graph)
                },
                |(_dir, mut graph)| black_box(graph.flush().unwrap()),
                criterion::BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fingerprint, bench_graph_flush);
criterion_main!(benches);
