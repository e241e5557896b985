use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rust_mlpe::{kfold_cv, Algorithm, Dataset, LmConfig, NetworkBuilder};

fn main() -> rust_mlpe::Result<()> {
    // y = sin(x0) + 0.5 * x1 with a little uniform noise.
    let mut rng = StdRng::seed_from_u64(0);
    let rows: Vec<Vec<f64>> = (0..200)
        .map(|_| {
            let x0: f64 = rng.gen_range(-3.0..3.0);
            let x1: f64 = rng.gen_range(-1.0..1.0);
            let noise: f64 = rng.gen_range(-0.02..0.02);
            vec![x0, x1, x0.sin() + 0.5 * x1 + noise]
        })
        .collect();
    let data = Dataset::from_rows(&rows)?;

    let mut net = NetworkBuilder::new(2, 1)?.hidden(8)?.build_with_seed(1)?;
    let algorithm = Algorithm::Lm(LmConfig {
        decay: 0.001,
        restarts: 3,
    });

    let report = net.train(&data, &algorithm, &mut rng)?;
    println!(
        "trained: {} gradients, {} hessians, {} cholesky factorizations",
        report.ngrad, report.nhess, report.ncholesky
    );
    println!(
        "train rms={:.4} avg={:.4}",
        net.rms_error(&data)?,
        net.avg_error(&data)?
    );

    let (_, cv) = kfold_cv(&net, &data, &algorithm, 5, &mut rng)?;
    println!("5-fold cv: rms={:.4} avg={:.4}", cv.rms_error, cv.avg_error);

    let y = net.process_vec(&[1.0, 0.5])?;
    println!("f(1.0, 0.5) = {:.4} (true {:.4})", y[0], 1.0_f64.sin() + 0.25);
    Ok(())
}
