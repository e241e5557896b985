use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rust_mlpe::{Algorithm, Dataset, LbfgsConfig, NetworkBuilder, OutputKind, StoppingCriteria};

fn main() -> rust_mlpe::Result<()> {
    // Three uniform blobs in 2D, one per class.
    let mut rng = StdRng::seed_from_u64(0);
    let centers = [[-1.0, -1.0], [1.0, -1.0], [0.0, 1.0]];
    let mut rows = Vec::new();
    for (class, center) in centers.iter().enumerate() {
        for _ in 0..100 {
            let x0 = center[0] + rng.gen_range(-0.6..0.6);
            let x1 = center[1] + rng.gen_range(-0.6..0.6);
            rows.push(vec![x0, x1, class as f64]);
        }
    }
    let data = Dataset::from_rows(&rows)?;

    let mut net = NetworkBuilder::new(2, 3)?
        .hidden(6)?
        .output(OutputKind::Classifier)?
        .build_with_seed(0)?;

    let algorithm = Algorithm::Lbfgs(LbfgsConfig {
        decay: 0.001,
        restarts: 2,
        stopping: StoppingCriteria {
            max_its: 500,
            ..StoppingCriteria::default()
        },
    });
    net.train(&data, &algorithm, &mut rng)?;

    let report = net.all_errors(&data)?;
    println!(
        "misclassified={} rel={:.3} avg_ce={:.4} bits",
        net.classification_error_count(&data)?,
        report.rel_cls_error,
        report.avg_ce
    );

    let p = net.process_vec(&[0.0, 1.0])?;
    println!("p(class | (0, 1)) = {p:.3?}");

    for k in 0..net.layer_count()? {
        println!("layer {k}: {} neurons", net.layer_size(k)?);
    }
    Ok(())
}
