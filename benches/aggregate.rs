use antarctic_meteo::{Aggregator, FieldSelection, Granularity, Observation, Query, TargetZone};
use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

/// A month of ten-minute samples for one station.
fn month_of_samples() -> Vec<Observation> {
    let start = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
    (0..31 * 24 * 6)
        .map(|i| {
            let phase = i as f64 / 144.0;
            Observation::new("89064", start + Duration::minutes(10 * i))
                .with_temperature(-3.0 + 4.0 * phase.sin())
                .with_pressure(985.0 + phase.cos())
                .with_wind_speed(8.0 + 3.0 * (phase * 2.0).sin().abs())
        })
        .collect()
}

fn query(granularity: Granularity) -> Query {
    Query::builder()
        .station("89064")
        .start(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap())
        .end(Utc.with_ymd_and_hms(2021, 2, 1, 0, 0, 0).unwrap())
        .granularity(granularity)
        .zone(TargetZone::parse("Europe/Madrid").unwrap())
        .fields(FieldSelection::All)
        .build()
}

fn bench_aggregate(c: &mut Criterion) {
    let observations = month_of_samples();
    let aggregator = Aggregator::default();

    for granularity in [Granularity::Raw, Granularity::Hourly, Granularity::Daily] {
        let query = query(granularity);
        c.bench_function(&format!("aggregate_month_{}", granularity), |b| {
            b.iter(|| aggregator.aggregate(black_box(&observations), black_box(&query)))
        });
    }
}

criterion_group!(benches, bench_aggregate);
criterion_main!(benches);
