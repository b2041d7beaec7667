//! Benchmarks for search, filtering and suggestions over instance pages

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use fleetdesk_core::{
    ExtendedFilterCriteria, Instance, MatchMode, SearchOptions, TextPredicate, TriState, filter,
    search, suggestions,
};

// Create a realistic fleet
fn create_test_instances(count: usize) -> Vec<Instance> {
    let models = ["llama-3-8b", "llama-3-70b", "mistral-7b", "qwen-2-72b", "phi-3-mini"];
    let clusters = ["us-east", "us-west", "eu-central", "ap-south"];
    let stages = ["prod", "staging", "dev", "canary"];

    (0..count)
        .map(|i| {
            let stage = stages[i % stages.len()];
            let id = i64::try_from(i).unwrap_or(i64::MAX);
            let mut instance = Instance::new(id, format!("{stage}-svc-{i}"));
            instance.model_name = models[i % models.len()].to_string();
            instance.cluster_name = clusters[i % clusters.len()].to_string();
            instance.image_tag = format!("registry.local/inference:v{}.{}", i % 7, i % 13);
            instance.description = Some(format!(
                "{stage} inference service for {} serving batch and streaming traffic",
                instance.model_name
            ));
            instance.replicas = Some(i64::try_from(i % 8).unwrap_or(0) + 1);
            instance.quant_mode = Some(i % 3 == 0);
            instance.priorities = vec![if i % 4 == 0 { "high" } else { "normal" }.to_string()];
            instance
        })
        .collect()
}

fn bench_search_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_scaling");
    let options = SearchOptions::default();

    for &count in &[10, 100, 1000, 5000] {
        let instances = create_test_instances(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("substring", count), &instances, |b, instances| {
            b.iter(|| search(black_box(instances), black_box("llama"), &options));
        });
    }

    group.finish();
}

fn bench_match_modes(c: &mut Criterion) {
    let instances = create_test_instances(1000);
    let mut group = c.benchmark_group("match_modes");

    for (mode, term) in [
        (MatchMode::Substring, "prod"),
        (MatchMode::Exact, "prod"),
        (MatchMode::Pattern, r"v[0-3]\.1\d"),
    ] {
        let options = SearchOptions::default().with_mode(mode);
        group.bench_with_input(BenchmarkId::from_parameter(mode), &term, |b, term| {
            b.iter(|| search(black_box(&instances), black_box(term), &options));
        });
    }

    group.finish();
}

fn bench_filter(c: &mut Criterion) {
    let instances = create_test_instances(1000);
    let criteria = ExtendedFilterCriteria::new()
        .any_of("cluster_name", ["us-east", "eu-central"])
        .range("replicas", Some(2.0), Some(6.0))
        .flag("quant_mode", TriState::True)
        .with_text(TextPredicate::new("llama"));

    c.bench_function("filter_combined_1000", |b| {
        b.iter(|| filter(black_box(&instances), black_box(&criteria)));
    });
}

fn bench_suggestions(c: &mut Criterion) {
    let instances = create_test_instances(1000);

    c.bench_function("suggestions_1000", |b| {
        b.iter(|| suggestions(black_box(&instances), black_box("sta"), None, 10));
    });
}

criterion_group!(
    benches,
    bench_search_scaling,
    bench_match_modes,
    bench_filter,
    bench_suggestions
);
criterion_main!(benches);
