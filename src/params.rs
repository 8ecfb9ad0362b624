use crate::error::{Result, TsvdError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Strategy used to extract the top singular subspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Eigendecomposition of the Gram matrix by the linear algebra backend.
    /// Exposed under the name `"full"`.
    EigDQ,
    /// Cyclic Jacobi sweeps on the Gram matrix, bounded by `n_iterations` and `tol`.
    Jacobi,
}

impl Algorithm {
    /// The public name of the algorithm as accepted by `set_params`.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::EigDQ => "full",
            Algorithm::Jacobi => "jacobi",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = TsvdError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(Algorithm::EigDQ),
            "jacobi" => Ok(Algorithm::Jacobi),
            other => Err(TsvdError::invalid_parameter(
                "algorithm",
                format!("unsupported algorithm '{}', expected 'full' or 'jacobi'", other),
            )),
        }
    }
}

/// A single value in a parameter map returned by `get_params` or passed to `set_params`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(usize),
    Float(f64),
    Text(String),
    /// A shape that has not been bound by a fit yet.
    Unset,
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<Option<usize>> for ParamValue {
    fn from(v: Option<usize>) -> Self {
        v.map_or(ParamValue::Unset, ParamValue::Int)
    }
}

/// Configuration for a truncated SVD fit.
///
/// `n_rows` and `n_cols` are bound from the input shape by the estimator at fit time;
/// the free `fit` functions read the shape from the matrix directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TSVDParams {
    /// Number of singular components to keep (K). Must satisfy `1 <= K <= n_cols`.
    pub n_components: usize,
    pub algorithm: Algorithm,
    /// Maximum number of Jacobi sweeps. Ignored by the `full` strategy.
    pub n_iterations: usize,
    /// Jacobi convergence threshold on the largest off-diagonal entry.
    pub tol: f64,
    pub n_rows: Option<usize>,
    pub n_cols: Option<usize>,
}

impl Default for TSVDParams {
    fn default() -> Self {
        TSVDParams {
            n_components: 1,
            algorithm: Algorithm::EigDQ,
            n_iterations: 15,
            tol: 1e-7,
            n_rows: None,
            n_cols: None,
        }
    }
}

const PARAM_NAMES: [&str; 6] = ["n_components", "algorithm", "tol", "n_iterations", "n_rows", "n_cols"];

impl TSVDParams {
    /// Default parameters keeping `n_components` components.
    pub fn new(n_components: usize) -> Self {
        TSVDParams {
            n_components,
            ..Default::default()
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Sets the Jacobi sweep cap and tolerance.
    pub fn with_jacobi_limits(mut self, n_iterations: usize, tol: f64) -> Self {
        self.n_iterations = n_iterations;
        self.tol = tol;
        self
    }

    /// Checks the parameters against an input of shape `(n_rows, n_cols)`.
    ///
    /// # Errors
    /// Returns `InvalidParameter` if `n_rows < 1`, `n_components < 1`, `n_components > n_cols`,
    /// or, for the Jacobi strategy, if `tol` is negative or non-finite or `n_iterations < 1`.
    pub fn validate(&self, n_rows: usize, n_cols: usize) -> Result<()> {
        if n_rows < 1 {
            return Err(TsvdError::invalid_parameter(
                "n_rows",
                "input matrix must have at least one row",
            ));
        }
        if self.n_components < 1 {
            return Err(TsvdError::invalid_parameter(
                "n_components",
                "must be at least 1",
            ));
        }
        if self.n_components > n_cols {
            return Err(TsvdError::invalid_parameter(
                "n_components",
                format!(
                    "n_components ({}) must not exceed the number of columns ({})",
                    self.n_components, n_cols
                ),
            ));
        }
        if self.algorithm == Algorithm::Jacobi {
            if !self.tol.is_finite() || self.tol < 0.0 {
                return Err(TsvdError::invalid_parameter(
                    "tol",
                    format!("must be a finite non-negative number, got {}", self.tol),
                ));
            }
            if self.n_iterations < 1 {
                return Err(TsvdError::invalid_parameter(
                    "n_iterations",
                    "the Jacobi strategy needs at least one sweep",
                ));
            }
        }
        Ok(())
    }

    /// Returns the parameters as a name-keyed map.
    pub fn get_params(&self) -> BTreeMap<String, ParamValue> {
        let mut params = BTreeMap::new();
        params.insert("n_components".to_string(), ParamValue::from(self.n_components));
        params.insert("algorithm".to_string(), ParamValue::from(self.algorithm.name()));
        params.insert("tol".to_string(), ParamValue::from(self.tol));
        params.insert("n_iterations".to_string(), ParamValue::from(self.n_iterations));
        params.insert("n_rows".to_string(), ParamValue::from(self.n_rows));
        params.insert("n_cols".to_string(), ParamValue::from(self.n_cols));
        params
    }

    /// Returns a copy of these parameters with `updates` applied.
    ///
    /// `n_iter` is accepted as an alias of `n_iterations`. `self` is left untouched
    /// when any update is rejected.
    ///
    /// # Errors
    /// Returns `InvalidParameter` naming the key if it is unknown or its value has the wrong type.
    pub fn set_params<K: AsRef<str>>(&self, updates: &BTreeMap<K, ParamValue>) -> Result<TSVDParams> {
        let mut updated = self.clone();
        for (key, value) in updates {
            let key = key.as_ref();
            match key {
                "n_components" => updated.n_components = expect_int(key, value)?,
                "algorithm" => {
                    updated.algorithm = match value {
                        ParamValue::Text(name) => name.parse()?,
                        other => return Err(wrong_type(key, "a string", other)),
                    }
                }
                "tol" => {
                    updated.tol = match value {
                        ParamValue::Float(v) => *v,
                        ParamValue::Int(v) => *v as f64,
                        other => return Err(wrong_type(key, "a number", other)),
                    }
                }
                "n_iterations" | "n_iter" => updated.n_iterations = expect_int(key, value)?,
                "n_rows" => updated.n_rows = expect_optional_int(key, value)?,
                "n_cols" => updated.n_cols = expect_optional_int(key, value)?,
                unknown => {
                    return Err(TsvdError::invalid_parameter(
                        unknown,
                        format!("unknown parameter, valid parameters are {:?}", PARAM_NAMES),
                    ))
                }
            }
        }
        Ok(updated)
    }
}

fn expect_int(key: &str, value: &ParamValue) -> Result<usize> {
    match value {
        ParamValue::Int(v) => Ok(*v),
        other => Err(wrong_type(key, "a non-negative integer", other)),
    }
}

fn expect_optional_int(key: &str, value: &ParamValue) -> Result<Option<usize>> {
    match value {
        ParamValue::Int(v) => Ok(Some(*v)),
        ParamValue::Unset => Ok(None),
        other => Err(wrong_type(key, "a non-negative integer or unset", other)),
    }
}

fn wrong_type(key: &str, expected: &str, got: &ParamValue) -> TsvdError {
    TsvdError::invalid_parameter(key, format!("expected {}, got {:?}", expected, got))
}

#[cfg(test)]
mod params_tests {
    use super::*;

    fn updates(pairs: &[(&str, ParamValue)]) -> BTreeMap<String, ParamValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_algorithm_names_parse() {
        assert_eq!("full".parse::<Algorithm>().unwrap(), Algorithm::EigDQ);
        assert_eq!("jacobi".parse::<Algorithm>().unwrap(), Algorithm::Jacobi);
        assert_eq!(Algorithm::EigDQ.to_string(), "full");
    }

    #[test]
    fn test_unknown_algorithm_is_invalid_parameter() {
        match "arpack".parse::<Algorithm>() {
            Err(TsvdError::InvalidParameter { name, .. }) => assert_eq!(name, "algorithm"),
            other => panic!("expected InvalidParameter, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_too_many_components() {
        let params = TSVDParams::new(4);
        match params.validate(3, 3) {
            Err(TsvdError::InvalidParameter { name, .. }) => assert_eq!(name, "n_components"),
            other => panic!("expected InvalidParameter, got {:?}", other),
        }
        assert!(params.validate(3, 4).is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_components_and_rows() {
        assert!(TSVDParams::new(0).validate(3, 3).is_err());
        match TSVDParams::new(1).validate(0, 3) {
            Err(TsvdError::InvalidParameter { name, .. }) => assert_eq!(name, "n_rows"),
            other => panic!("expected InvalidParameter, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_jacobi_limits() {
        let negative_tol = TSVDParams::new(1)
            .with_algorithm(Algorithm::Jacobi)
            .with_jacobi_limits(10, -1.0);
        assert!(negative_tol.validate(3, 3).is_err());

        let no_sweeps = TSVDParams::new(1)
            .with_algorithm(Algorithm::Jacobi)
            .with_jacobi_limits(0, 1e-7);
        assert!(no_sweeps.validate(3, 3).is_err());

        // The full strategy ignores the Jacobi limits.
        let full = TSVDParams::new(1).with_jacobi_limits(0, f64::NAN);
        assert!(full.validate(3, 3).is_ok());
    }

    #[test]
    fn test_get_params_keys_and_values() {
        let params = TSVDParams::default();
        let map = params.get_params();
        let keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["algorithm", "n_cols", "n_components", "n_iterations", "n_rows", "tol"]
        );
        assert_eq!(map["algorithm"], ParamValue::Text("full".to_string()));
        assert_eq!(map["n_components"], ParamValue::Int(1));
        assert_eq!(map["n_iterations"], ParamValue::Int(15));
        assert_eq!(map["n_rows"], ParamValue::Unset);
    }

    #[test]
    fn test_get_params_serializes_to_json() {
        let params = TSVDParams::new(2).with_algorithm(Algorithm::Jacobi);
        let json = serde_json::to_value(params.get_params()).unwrap();
        assert_eq!(json["algorithm"], "jacobi");
        assert_eq!(json["n_components"], 2);
        assert!(json["n_cols"].is_null());
    }

    #[test]
    fn test_set_params_round_trip() {
        let params = TSVDParams::default();
        let updated = params
            .set_params(&updates(&[
                ("n_components", ParamValue::Int(2)),
                ("algorithm", ParamValue::from("jacobi")),
                ("n_iter", ParamValue::Int(20)),
                ("tol", ParamValue::Float(1e-9)),
            ]))
            .unwrap();
        assert_eq!(updated.n_components, 2);
        assert_eq!(updated.algorithm, Algorithm::Jacobi);
        assert_eq!(updated.n_iterations, 20);
        assert_eq!(updated.tol, 1e-9);
        // Original is unchanged.
        assert_eq!(params, TSVDParams::default());

        let restored = updated.set_params(&params.get_params()).unwrap();
        assert_eq!(restored, params);
    }

    #[test]
    fn test_set_params_rejects_unknown_key() {
        let result = TSVDParams::default().set_params(&updates(&[("n_oversamples", ParamValue::Int(5))]));
        match result {
            Err(TsvdError::InvalidParameter { name, .. }) => assert_eq!(name, "n_oversamples"),
            other => panic!("expected InvalidParameter, got {:?}", other),
        }
    }

    #[test]
    fn test_set_params_rejects_wrong_type() {
        let result = TSVDParams::default().set_params(&updates(&[("n_components", ParamValue::Float(2.5))]));
        match result {
            Err(TsvdError::InvalidParameter { name, .. }) => assert_eq!(name, "n_components"),
            other => panic!("expected InvalidParameter, got {:?}", other),
        }
        assert!(TSVDParams::default()
            .set_params(&updates(&[("algorithm", ParamValue::Int(1))]))
            .is_err());
    }
}
