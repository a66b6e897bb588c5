use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use trainrisk::recalc::BatchConfig;
use trainrisk::{
    Activity, CalculationStrategy, CancellationToken, DivergenceCalculator, HrSample, InMemorySource,
    InMemoryStore, InternalLoadEstimator, RecalculationOrchestrator, RollingRatioEngine, RolloutPlan,
    RolloutStage, Sex, Sport, UserHistory, UserPipeline, UserProfile,
};

// Performance benchmarks for the load pipeline
//
// Sizes are chosen around realistic histories: a season is a few hundred
// days, a full account history a few thousand.

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 1).unwrap()
}

fn stream(samples: u32) -> Vec<HrSample> {
    (0..samples)
        .map(|i| HrSample {
            offset_seconds: i,
            bpm: 120 + (i % 40) as u16,
        })
        .collect()
}

fn create_history(user: &str, days: i64, with_streams: bool) -> UserHistory {
    UserHistory {
        profile: UserProfile {
            resting_hr: Some(52),
            max_hr: Some(188),
            sex: Sex::Female,
            ..UserProfile::new(user)
        },
        activities: (0..days)
            .filter(|d| d % 7 != 3)
            .map(|d| Activity {
                id: format!("{}-{}", user, d),
                date: start_date() + Duration::days(d),
                sport: Sport::Running,
                duration_seconds: 3600,
                distance_km: Some(Decimal::from(5 + d % 6)),
                elevation_gain_m: Some(dec!(80)),
                hr_samples: if with_streams { Some(stream(3600)) } else { None },
                avg_hr: Some(138),
            })
            .collect(),
    }
}

fn bench_internal_load(c: &mut Criterion) {
    let estimator = InternalLoadEstimator::new();
    let profile = create_history("hr", 1, true).profile;
    let hr_profile =
        trainrisk::internal_load::HrProfile::from_user(&profile, estimator.config()).unwrap();

    let mut group = c.benchmark_group("Internal Load");

    for &samples in &[60u32, 600, 3600, 14400] {
        let activity = Activity {
            hr_samples: Some(stream(samples)),
            duration_seconds: samples,
            ..create_history("hr", 1, false).activities.remove(0)
        };

        group.throughput(Throughput::Elements(samples as u64));
        group.bench_with_input(BenchmarkId::new("stream", samples), &activity, |b, activity| {
            b.iter(|| estimator.estimate(black_box(activity), Ok(&hr_profile), CalculationStrategy::Enhanced));
        });
    }

    group.finish();
}

fn bench_rolling_ratios(c: &mut Criterion) {
    let engine = RollingRatioEngine::new();
    let mut group = c.benchmark_group("Rolling Ratios");

    for &days in &[90i64, 365, 1825] {
        let series: Vec<(NaiveDate, Decimal)> = (0..days)
            .map(|d| (start_date() + Duration::days(d), Decimal::from(d % 11)))
            .collect();

        group.throughput(Throughput::Elements(days as u64));
        group.bench_with_input(BenchmarkId::new("compute_series", days), &series, |b, series| {
            b.iter(|| engine.compute_series(black_box(series)));
        });
    }

    group.finish();
}

fn bench_divergence(c: &mut Criterion) {
    c.bench_function("divergence", |b| {
        b.iter(|| DivergenceCalculator::divergence(black_box(dec!(1.27)), black_box(dec!(0.94))))
    });
}

fn bench_user_pipeline(c: &mut Criterion) {
    let pipeline = UserPipeline::default();
    let mut group = c.benchmark_group("User Pipeline");
    group.sample_size(20);

    for &days in &[90i64, 365] {
        let history = create_history("pipe", days, true);

        group.throughput(Throughput::Elements(days as u64));
        group.bench_with_input(BenchmarkId::new("enhanced", days), &history, |b, history| {
            b.iter(|| pipeline.run(black_box(history), CalculationStrategy::Enhanced));
        });
        group.bench_with_input(BenchmarkId::new("legacy", days), &history, |b, history| {
            b.iter(|| pipeline.run(black_box(history), CalculationStrategy::Legacy));
        });
    }

    group.finish();
}

fn bench_batch_recalculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Batch Recalculation");
    group.sample_size(10);

    for &users in &[10usize, 100] {
        let source = InMemorySource::new(
            (0..users)
                .map(|u| create_history(&format!("user-{}", u), 180, false))
                .collect(),
        );
        let orchestrator = RecalculationOrchestrator::with_config(
            UserPipeline::default(),
            BatchConfig {
                num_threads: None,
                show_progress: false,
                as_of: None,
            },
        );
        let plan = RolloutPlan::new(RolloutStage::General);

        group.throughput(Throughput::Elements(users as u64));
        group.bench_with_input(BenchmarkId::new("recalculate_all", users), &source, |b, source| {
            b.iter(|| {
                let store = InMemoryStore::new();
                orchestrator.recalculate_all(source, &plan, &store, &CancellationToken::new())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_internal_load,
    bench_rolling_ratios,
    bench_divergence,
    bench_user_pipeline,
    bench_batch_recalculation
);
criterion_main!(benches);
