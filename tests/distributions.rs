//! Invariant 3: empirical inter-arrival mean converges to `1/lambda`.

use pacer::distributions::InterArrival;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn exponential_inter_arrival_converges_to_expected_mean() {
    let lambda = 500.0;
    let dist = InterArrival::new("exponential", lambda).unwrap();
    let mut rng = StdRng::seed_from_u64(99);

    let n = 20_000;
    let total: f64 = (0..n).map(|_| dist.next(&mut rng)).sum();
    let empirical_mean = total / n as f64;
    let expected_mean = 1.0 / lambda;

    let relative_error = (empirical_mean - expected_mean).abs() / expected_mean;
    assert!(
        relative_error < 0.05,
        "empirical mean {empirical_mean} vs expected {expected_mean}, error {relative_error}"
    );
}

#[test]
fn uniform_inter_arrival_converges_to_midpoint() {
    let dist = InterArrival::new("uniform:0.001,0.003", 1.0).unwrap();
    let mut rng = StdRng::seed_from_u64(7);

    let n = 20_000;
    let total: f64 = (0..n).map(|_| dist.next(&mut rng)).sum();
    let empirical_mean = total / n as f64;
    assert!(
        (empirical_mean - 0.002).abs() < 0.0001,
        "empirical mean {empirical_mean} not near uniform midpoint 0.002"
    );
}

#[test]
fn zero_or_negative_lambda_is_always_zero() {
    for lambda in [0.0, -1.0, -100.0] {
        let dist = InterArrival::new("exponential", lambda).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(dist.next(&mut rng), 0.0);
        }
    }
}
