use approx::assert_abs_diff_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rust_mlpe::{
    kfold_cv, Algorithm, Dataset, EarlyStoppingConfig, Error, LbfgsConfig, LmConfig,
    NetworkBuilder, OutputKind, StoppingCriteria,
};

fn noisy_line(n: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let rows: Vec<Vec<f64>> = (0..n)
        .map(|_| {
            let x: f64 = rng.gen_range(-2.0..2.0);
            let noise: f64 = rng.gen_range(-0.05..0.05);
            vec![x, 2.0 * x + 1.0 + noise]
        })
        .collect();
    Dataset::from_rows(&rows).unwrap()
}

/// Two interleaved half-moons, labelled 0 and 1.
fn moons(n: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let rows: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            let t: f64 = rng.gen_range(0.0..std::f64::consts::PI);
            let label = i % 2;
            let (x, y) = if label == 0 {
                (t.cos(), t.sin())
            } else {
                (1.0 - t.cos(), 0.5 - t.sin())
            };
            vec![x, y, label as f64]
        })
        .collect();
    Dataset::from_rows(&rows).unwrap()
}

#[test]
fn linear_regression_recovery() {
    let data = noisy_line(50, 0);
    let mut net = NetworkBuilder::new(1, 1).unwrap().build_with_seed(1).unwrap();
    let before = net.rms_error(&data).unwrap();

    let mut rng = StdRng::seed_from_u64(2);
    for alg in [
        Algorithm::Lm(LmConfig::default()),
        Algorithm::Lbfgs(LbfgsConfig::default()),
    ] {
        let mut trained = net.clone();
        trained.train(&data, &alg, &mut rng).unwrap();
        let after = trained.rms_error(&data).unwrap();
        assert!(after <= 0.5 * before, "{alg:?}: before {before}, after {after}");
        assert!(after < 0.25, "{alg:?}: after {after}");
        let y = trained.process_vec(&[0.5]).unwrap();
        assert_abs_diff_eq!(y[0], 2.0, epsilon = 0.25);
    }

    // untouched by the clones above
    net.train(&data, &Algorithm::default(), &mut rng).unwrap();
    assert!(net.rms_error(&data).unwrap() < 0.1);
}

#[test]
fn classifier_error_counting() {
    let mut net = NetworkBuilder::new(1, 3)
        .unwrap()
        .output(OutputKind::Classifier)
        .unwrap()
        .build_with_seed(0)
        .unwrap();
    net.set_weights(&vec![0.0; net.weight_count()]).unwrap();
    net.set_weight(0, 0, 1, 0, 5.0).unwrap();

    // x = 1 predicts class 0, x = -1 predicts class 1 (ties resolve to the first).
    let data = Dataset::from_rows(&[
        vec![1.0, 0.0],
        vec![-1.0, 0.0],
        vec![1.0, 2.0],
        vec![-1.0, 1.0],
    ])
    .unwrap();
    assert_eq!(net.classification_error_count(&data).unwrap(), 2);
    assert_abs_diff_eq!(
        net.relative_classification_error(&data).unwrap(),
        0.5,
        epsilon = 1e-12
    );
}

#[test]
fn lm_classifier_learns_moons() {
    let train = moons(120, 3);
    let test = moons(60, 4);
    let mut net = NetworkBuilder::new(2, 2)
        .unwrap()
        .hidden(6)
        .unwrap()
        .output(OutputKind::Classifier)
        .unwrap()
        .build_with_seed(5)
        .unwrap();
    let mut rng = StdRng::seed_from_u64(6);
    let report = net
        .train_lm(&train, &LmConfig::default(), &mut rng)
        .unwrap();
    assert!(report.ngrad > 0 && report.nhess > 0 && report.ncholesky > 0);
    assert!(net.relative_classification_error(&test).unwrap() < 0.2);
    assert!(net.avg_cross_entropy(&test).unwrap().is_finite());
}

#[test]
fn lbfgs_classifier_uses_cross_entropy() {
    let train = moons(100, 7);
    let mut net = NetworkBuilder::new(2, 2)
        .unwrap()
        .hidden(5)
        .unwrap()
        .output(OutputKind::Classifier)
        .unwrap()
        .build_with_seed(8)
        .unwrap();
    let before = net.error_natural(&train).unwrap();
    let cfg = LbfgsConfig {
        decay: 0.001,
        restarts: 1,
        stopping: StoppingCriteria {
            max_its: 300,
            ..StoppingCriteria::default()
        },
    };
    let mut rng = StdRng::seed_from_u64(9);
    net.train_lbfgs(&train, &cfg, &mut rng).unwrap();
    assert!(net.error_natural(&train).unwrap() < 0.5 * before);
}

#[test]
fn bounded_and_ranged_outputs_stay_in_range() {
    let data = noisy_line(40, 10);
    let mut rng = StdRng::seed_from_u64(11);

    let mut bounded = NetworkBuilder::new(1, 1)
        .unwrap()
        .hidden(4)
        .unwrap()
        .output(OutputKind::Bounded { b: -4.0, d: 1.0 })
        .unwrap()
        .build_with_seed(12)
        .unwrap();
    bounded.train(&data, &Algorithm::default(), &mut rng).unwrap();

    let mut ranged = NetworkBuilder::new(1, 1)
        .unwrap()
        .hidden(4)
        .unwrap()
        .output(OutputKind::Ranged { a: -4.0, b: 6.0 })
        .unwrap()
        .build_with_seed(13)
        .unwrap();
    ranged.train(&data, &Algorithm::default(), &mut rng).unwrap();

    for x in [-10.0, -2.0, 0.0, 2.0, 10.0] {
        assert!(bounded.process_vec(&[x]).unwrap()[0] > -4.0);
        let r = ranged.process_vec(&[x]).unwrap()[0];
        assert!((-4.0..=6.0).contains(&r));
    }
    assert!(ranged.rms_error(&data).unwrap() < 0.3);
}

#[test]
fn early_stopping_on_windows() {
    let series: Vec<f64> = (0..200).map(|i| (i as f64 * 0.15).sin()).collect();
    // three lagged values predict the next one
    let data = Dataset::from_windows(&series, 4, 1).unwrap();
    let idx: Vec<usize> = (0..data.len()).collect();
    let (train_idx, valid_idx): (Vec<usize>, Vec<usize>) = idx.iter().partition(|&&i| i % 4 != 0);
    let train = data.select(&train_idx);
    let validation = data.select(&valid_idx);

    let mut net = NetworkBuilder::new(3, 1)
        .unwrap()
        .hidden(5)
        .unwrap()
        .build_with_seed(14)
        .unwrap();
    let mut rng = StdRng::seed_from_u64(15);
    let report = net
        .train_es(&train, &validation, &EarlyStoppingConfig::default(), &mut rng)
        .unwrap();
    assert!(report.ngrad > 0);
    assert_eq!(report.nhess, 0);
    assert!(net.rms_error(&validation).unwrap() < 0.1);
}

#[test]
fn invalid_configs_fail_before_training() {
    let data = noisy_line(10, 16);
    let mut net = NetworkBuilder::new(1, 1).unwrap().build_with_seed(17).unwrap();
    let weights = net.weights().to_vec();
    let mut rng = StdRng::seed_from_u64(18);

    let never_stops = LbfgsConfig {
        stopping: StoppingCriteria {
            epsg: 0.0,
            epsf: 0.0,
            epsx: 0.0,
            max_its: 0,
        },
        ..LbfgsConfig::default()
    };
    let err = net.train_lbfgs(&data, &never_stops, &mut rng).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));

    let err = net
        .train_lm(&data, &LmConfig { decay: f64::NAN, restarts: 1 }, &mut rng)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));

    let wide = Dataset::from_rows(&[vec![0.0, 1.0, 2.0]]).unwrap();
    let err = net.train(&wide, &Algorithm::default(), &mut rng).unwrap_err();
    assert!(matches!(err, Error::InvalidShape(_)));

    assert_eq!(net.weights(), &weights[..]);
}

#[test]
fn small_decay_is_raised_to_minimum() {
    let data = noisy_line(20, 19);
    let base = NetworkBuilder::new(1, 1).unwrap().build_with_seed(20).unwrap();

    let mut a = base.clone();
    let mut b = base;
    a.train_lm(&data, &LmConfig { decay: 0.0, restarts: 1 }, &mut StdRng::seed_from_u64(21))
        .unwrap();
    b.train_lm(&data, &LmConfig { decay: 0.001, restarts: 1 }, &mut StdRng::seed_from_u64(21))
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn kfold_cross_validation() {
    let data = noisy_line(30, 22);
    let net = NetworkBuilder::new(1, 1).unwrap().build_with_seed(23).unwrap();
    let mut rng = StdRng::seed_from_u64(24);
    let (report, cv) = kfold_cv(&net, &data, &Algorithm::default(), 5, &mut rng).unwrap();
    assert!(report.nhess >= 5);
    assert!(cv.rms_error < 0.1);
    assert_eq!(cv.avg_ce, 0.0);

    let moons = moons(40, 25);
    let classifier = NetworkBuilder::new(2, 2)
        .unwrap()
        .hidden(4)
        .unwrap()
        .output(OutputKind::Classifier)
        .unwrap()
        .build_with_seed(26)
        .unwrap();
    let (_, cv) = kfold_cv(&classifier, &moons, &Algorithm::default(), 4, &mut rng).unwrap();
    assert!((0.0..=1.0).contains(&cv.rel_cls_error));
    assert!(cv.avg_ce.is_finite() && cv.avg_ce > 0.0);
}
