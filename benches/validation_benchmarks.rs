use std::hint::black_box;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use liquid_template_validator::{MemoryStore, Validator, ValidatorOptions};

/// Generate a converter-style template with the given number of lines
fn generate_template(lines: usize, scenario: &str) -> String {
    let mut content = vec![
        "{".to_string(),
        "    \"resourceType\": \"Bundle\",".to_string(),
        "    \"entry\": [".to_string(),
    ];

    for i in 0..lines {
        let line = match (scenario, i % 8) {
            (_, 0) => format!("{{% evaluate id{} using 'ID/Patient' Data: msg.PID -%}}", i),
            (_, 1) => format!("{{% include 'Resource/Patient' ID: id{} -%}}", i - 1),
            (_, 2) => "{% if msg.PID.5 %}".to_string(),
            (_, 3) => "    \"name\": \"{{ msg.PID.5.1 | escape_special_chars }}\",".to_string(),
            (_, 4) => "{% endif %}".to_string(),
            ("mixed_errors", 5) => "{% for x in (1..5000) %}{{ x..y }}".to_string(),
            ("mixed_errors", 6) => "{% endif %}{{ }}".to_string(),
            (_, 5) => "{% for x in msg.NK1 %}{{ x.2 | upcase }}".to_string(),
            (_, 6) => "{% endfor %}".to_string(),
            _ => format!("{{% assign v{} = msg.OBX | size %}}", i),
        };
        content.push(line);
    }

    content.push("    ]".to_string());
    content.push("}".to_string());
    content.join("\n")
}

/// Benchmark validation with different error densities
fn bench_validation_scenarios(c: &mut Criterion) {
    let validator = Validator::default();
    let mut group = c.benchmark_group("validation_scenarios");

    for scenario in ["all_valid", "mixed_errors"] {
        let content = generate_template(1_000, scenario);

        group.throughput(Throughput::Bytes(content.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("scenario", scenario),
            &content,
            |b, content| b.iter(|| black_box(validator.validate(black_box(content)))),
        );
    }

    group.finish();
}

/// Benchmark validation scalability with different template sizes
fn bench_validation_scalability(c: &mut Criterion) {
    let validator = Validator::default();
    let mut group = c.benchmark_group("validation_scalability");

    for size in [100, 1_000, 5_000, 9_000] {
        let content = generate_template(size, "all_valid");

        group.throughput(Throughput::Bytes(content.len() as u64));
        group.bench_with_input(BenchmarkId::new("lines", size), &content, |b, content| {
            b.iter(|| black_box(validator.validate(black_box(content))))
        });
    }

    group.finish();
}

/// Benchmark include existence checks against a slow store
fn bench_include_checks(c: &mut Criterion) {
    let content = generate_template(400, "all_valid");
    let mut group = c.benchmark_group("include_checks");
    group.sample_size(10);

    let memory = ValidatorOptions::default()
        .with_store(MemoryStore::new().with_template("HL7/Resource/_Patient.liquid", "{}"))
        .with_namespace("HL7");
    let memory = Validator::new(memory);
    group.bench_function("memory_store", |b| {
        b.iter(|| black_box(memory.validate(black_box(&content))))
    });

    let slow = ValidatorOptions::default()
        .with_store(|_: &str| {
            std::thread::sleep(Duration::from_micros(200));
            true
        })
        .with_namespace("HL7");
    let slow = Validator::new(slow);
    group.bench_function("slow_store", |b| {
        b.iter(|| black_box(slow.validate(black_box(&content))))
    });

    group.finish();
}

criterion_group!(
    validation_benches,
    bench_validation_scenarios,
    bench_validation_scalability,
    bench_include_checks
);

criterion_main!(validation_benches);
