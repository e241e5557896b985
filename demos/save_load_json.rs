#[cfg(not(feature = "serde"))]
fn main() {
    println!("enable the `serde` feature: cargo run --example save_load_json --features serde");
}

#[cfg(feature = "serde")]
fn main() -> rust_mlpe::Result<()> {
    use rand::SeedableRng;
    use rust_mlpe::{Algorithm, Dataset, Network, NetworkBuilder, OutputKind};

    let rows = vec![
        vec![0.0, 0.0, 0.0],
        vec![0.0, 1.0, 1.0],
        vec![1.0, 0.0, 1.0],
        vec![1.0, 1.0, 0.0],
    ];
    let data = Dataset::from_rows(&rows)?;

    let mut net = NetworkBuilder::new(2, 2)?
        .hidden(4)?
        .output(OutputKind::Classifier)?
        .build_with_seed(0)?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(1);
    net.train(&data, &Algorithm::default(), &mut rng)?;

    let json = net.to_json_string_pretty()?;
    let loaded = Network::from_json_str(&json)?;
    assert_eq!(loaded.serialize(), net.serialize());

    println!("{} bytes of json", json.len());
    println!("p(xor | (1, 0)) = {:.3?}", loaded.process_vec(&[1.0, 0.0])?);
    Ok(())
}
