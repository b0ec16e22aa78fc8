//! Benchmarks for path-tree construction and file-name charset inference

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use evidence_unpacker::archive::UnpackedTree;
use evidence_unpacker::config::CharsetConfig;
use evidence_unpacker::utils::CharsetInferrer;
use std::path::Path;

/// Paths spread over a few hundred directories, like an exported log bundle
fn entry_paths(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("host_{}/var/log/app_{}/part_{}.log", i % 16, i % 300, i))
        .collect()
}

fn bench_tree_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_construction");

    for count in [100usize, 1_000, 10_000].iter() {
        let paths = entry_paths(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &paths, |b, paths| {
            b.iter(|| {
                let mut tree = UnpackedTree::new("bundle.zip", Path::new("/out"), "bundle.zip_1");
                for path in paths {
                    black_box(tree.add_node(path, Some(path.as_bytes())));
                }
                tree.len()
            });
        });
    }

    group.finish();
}

fn bench_charset_inference(c: &mut Criterion) {
    let mut group = c.benchmark_group("charset_inference");
    let inferrer = CharsetInferrer::new(&CharsetConfig::default());

    // "报告" / "日志" in GBK
    let gbk: Vec<Vec<u8>> = (0..200)
        .map(|i| {
            let mut name = if i % 2 == 0 {
                b"\xb1\xa8\xb8\xe6".to_vec()
            } else {
                b"\xc8\xd5\xd6\xbe".to_vec()
            };
            name.extend_from_slice(format!("_{i}.txt").as_bytes());
            name
        })
        .collect();
    let ascii: Vec<Vec<u8>> = (0..200)
        .map(|i| format!("report_{i}.txt").into_bytes())
        .collect();

    for (label, names) in [("gbk", &gbk), ("ascii", &ascii)] {
        let refs: Vec<&[u8]> = names.iter().map(Vec::as_slice).collect();
        group.bench_function(label, |b| b.iter(|| black_box(inferrer.infer(&refs))));
    }

    group.finish();
}

criterion_group!(benches, bench_tree_construction, bench_charset_inference);
criterion_main!(benches);
