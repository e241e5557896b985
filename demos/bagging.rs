use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rust_mlpe::{Algorithm, Dataset, EarlyStoppingConfig, Ensemble, NetworkBuilder};

fn main() -> rust_mlpe::Result<()> {
    let mut rng = StdRng::seed_from_u64(0);
    let rows: Vec<Vec<f64>> = (0..150)
        .map(|_| {
            let x: f64 = rng.gen_range(-2.0..2.0);
            let noise: f64 = rng.gen_range(-0.1..0.1);
            vec![x, x * x - 1.0 + noise]
        })
        .collect();
    let data = Dataset::from_rows(&rows)?;

    let builder = NetworkBuilder::new(1, 1)?.hidden(5)?;

    let mut bagged = Ensemble::from_builder(&builder, 10, &mut rng)?;
    let (report, oob) = bagged.bagging(&data, &Algorithm::default(), &mut rng)?;
    println!(
        "bagging: {} hessians, out-of-bag rms={:.4}, train rms={:.4}",
        report.nhess,
        oob.rms_error,
        bagged.rms_error(&data)?
    );

    let mut stopped = Ensemble::from_builder(&builder, 10, &mut rng)?;
    let report = stopped.train_es(&data, &EarlyStoppingConfig::default(), &mut rng)?;
    println!(
        "early stopping: {} gradients, train rms={:.4}",
        report.ngrad,
        stopped.rms_error(&data)?
    );

    let flat = bagged.serialize();
    let restored = Ensemble::deserialize(&flat)?;
    println!(
        "f(1.5) = {:.4} (restored {:.4}, true {:.4})",
        bagged.process_vec(&[1.5])?[0],
        restored.process_vec(&[1.5])?[0],
        1.5 * 1.5 - 1.0
    );
    Ok(())
}
