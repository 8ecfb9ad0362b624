use efficient_tsvd::{Algorithm, TruncatedSvd, TSVDParams};
use ndarray::Array2;

fn main() {
    // Create a simple test matrix
    let data = Array2::from_shape_vec((3, 3), vec![1.0, 4.0, 4.0, 2.0, 2.0, 2.0, 5.0, 1.0, 1.0]).unwrap();

    for algorithm in [Algorithm::EigDQ, Algorithm::Jacobi] {
        let params = TSVDParams::new(2)
            .with_algorithm(algorithm)
            .with_jacobi_limits(20, 1e-9);
        let mut tsvd = TruncatedSvd::<f64>::new(params);
        let scores = tsvd.fit_transform(data.view()).expect("TSVD fit_transform failed");
        let model = tsvd.model().expect("model is set after fit_transform");

        println!("TSVD backend test works with algorithm '{}'!", algorithm);
        println!("Components shape: {:?}", model.components().dim());
        println!("Scores shape: {:?}", scores.dim());
        println!("Singular values: {:?}", model.singular_values());
        println!("Explained variance ratio: {:?}", model.explained_variance_ratio().unwrap());
        if let Some(report) = model.convergence() {
            println!("Jacobi sweeps: {} (converged: {})", report.sweeps, report.converged);
        }
    }
}
