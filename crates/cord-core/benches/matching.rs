use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cord_core::{cleanup_url, CompiledRule, ContextTransformation, MatchPatterns, ProviderRule, RuleType};

fn rule() -> ProviderRule {
    ProviderRule {
        id: "bench".to_string(),
        rule_type: RuleType::Allow,
        match_patterns: MatchPatterns {
            domain: Some("*.cord.com".to_string()),
            path: Some("users/:user".to_string()),
            query_params: Some([("tab".to_string(), ":tab".to_string())].into_iter().collect()),
            ..Default::default()
        },
        name_template: None,
        context_transformation: ContextTransformation::Replace(
            [("page".to_string(), "{{user}} ({{tab}}) {{url.pathname}}".to_string())]
                .into_iter()
                .collect(),
        ),
        observe_dom_mutations: false,
    }
}

fn bench_matching(c: &mut Criterion) {
    let compiled = CompiledRule::new(&rule());
    let hit = cleanup_url("https://www.cord.com/users/andrei?tab=threads").unwrap();
    let miss = cleanup_url("https://www.cord.com/settings/profile").unwrap();

    c.bench_function("cleanup_url", |b| {
        b.iter(|| cleanup_url(black_box("https://www.cord.com/users/andrei?tab=threads#top")))
    });
    c.bench_function("match_hit", |b| b.iter(|| compiled.match_url(black_box(&hit))));
    c.bench_function("match_miss", |b| b.iter(|| compiled.match_url(black_box(&miss))));
}

criterion_group!(benches, bench_matching);
criterion_main!(benches);
