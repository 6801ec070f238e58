//! Model registry
//!
//! A closed set of model identifiers, each paired with a constructor and a
//! default hyperparameter grid. Adding a model means adding a variant here;
//! nothing is resolved by name at runtime beyond parsing the identifier.

use super::adaboost::AdaBoost;
use super::extra_trees::ExtraTrees;
use super::gradient_boosting::GradientBoosting;
use super::grid::{floats, ints, strs, ParamGrid, ParamSet, ParamValue};
use super::linear_models::LogisticRegression;
use super::naive_bayes::BernoulliNaiveBayes;
use super::random_forest::{MaxFeatures, RandomForest};
use super::svm::{LinearSvm, SvmLoss};
use crate::error::{AnomalyError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Common estimator surface used by the nested cross-validation loop.
pub trait Estimator: Send {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<i64>) -> Result<()>;
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<i64>>;
    /// Continuous ranking score per row: a probability or a signed margin,
    /// larger meaning more anomalous.
    fn decision_scores(&self, x: &Array2<f64>) -> Result<Array1<f64>>;
    fn feature_importances(&self) -> Option<Array1<f64>>;
}

/// Identifier of a trainable model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelId {
    LogisticRegression,
    NaiveBayes,
    RandomForest,
    Adaboost,
    LinearSvm,
    ExtraTrees,
    GradientBoosting,
}

impl ModelId {
    pub const ALL: [ModelId; 7] = [
        ModelId::LogisticRegression,
        ModelId::NaiveBayes,
        ModelId::RandomForest,
        ModelId::Adaboost,
        ModelId::LinearSvm,
        ModelId::ExtraTrees,
        ModelId::GradientBoosting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::LogisticRegression => "logistic_regression",
            ModelId::NaiveBayes => "naive_bayes",
            ModelId::RandomForest => "random_forest",
            ModelId::Adaboost => "adaboost",
            ModelId::LinearSvm => "linear_svm",
            ModelId::ExtraTrees => "extra_trees",
            ModelId::GradientBoosting => "gradient_boosting",
        }
    }

    /// Hyperparameter names this model accepts; anything else is rejected at
    /// submission time.
    pub fn recognized_keys(&self) -> &'static [&'static str] {
        match self {
            ModelId::LogisticRegression => &["C", "penalty", "solver"],
            ModelId::NaiveBayes => &["alpha", "binarize"],
            ModelId::RandomForest => &["n_estimators", "max_features", "max_depth"],
            ModelId::Adaboost => &["n_estimators", "learning_rate"],
            ModelId::LinearSvm => &["C", "loss"],
            ModelId::ExtraTrees => &["n_estimators", "max_features", "max_depth"],
            ModelId::GradientBoosting => &["n_estimators", "learning_rate", "max_depth"],
        }
    }

    pub fn default_grid(&self) -> ParamGrid {
        match self {
            ModelId::LogisticRegression => ParamGrid::new(vec![
                ("C".to_string(), floats(&[0.1, 1.0, 10.0])),
                ("penalty".to_string(), strs(&["l2"])),
                ("solver".to_string(), strs(&["liblinear"])),
            ]),
            ModelId::NaiveBayes => ParamGrid::new(vec![
                ("alpha".to_string(), floats(&[0.1, 0.5, 1.0, 2.0])),
                ("binarize".to_string(), floats(&[0.0])),
            ]),
            ModelId::RandomForest => ParamGrid::new(vec![
                ("n_estimators".to_string(), ints(&[100, 200, 300])),
                ("max_features".to_string(), strs(&["sqrt", "log2"])),
                (
                    "max_depth".to_string(),
                    vec![ParamValue::Null, ParamValue::Int(10), ParamValue::Int(20)],
                ),
            ]),
            ModelId::Adaboost => ParamGrid::new(vec![
                ("n_estimators".to_string(), ints(&[50, 100, 200])),
                ("learning_rate".to_string(), floats(&[0.5, 1.0, 1.5])),
            ]),
            ModelId::LinearSvm => ParamGrid::new(vec![
                ("C".to_string(), floats(&[0.1, 1.0, 10.0])),
                ("loss".to_string(), strs(&["hinge", "squared_hinge"])),
            ]),
            ModelId::ExtraTrees => ParamGrid::new(vec![
                ("n_estimators".to_string(), ints(&[200, 300, 500])),
                ("max_features".to_string(), strs(&["sqrt", "log2"])),
                (
                    "max_depth".to_string(),
                    vec![ParamValue::Null, ParamValue::Int(10), ParamValue::Int(20)],
                ),
            ]),
            ModelId::GradientBoosting => ParamGrid::new(vec![
                ("n_estimators".to_string(), ints(&[100, 200, 300])),
                ("learning_rate".to_string(), floats(&[0.05, 0.1, 0.2])),
                ("max_depth".to_string(), ints(&[2, 3, 4])),
            ]),
        }
    }

    /// Build an unfitted model from a parameter assignment.
    pub fn build(&self, params: &ParamSet, seed: u64) -> Result<AnyModel> {
        match self {
            ModelId::LogisticRegression => {
                let c = params.get_f64("C").unwrap_or(1.0);
                if let Ok(penalty) = params.get_str("penalty") {
                    if penalty != "l2" {
                        return Err(AnomalyError::InvalidParameter {
                            name: "penalty".to_string(),
                            value: penalty.to_string(),
                            reason: "only l2 is supported".to_string(),
                        });
                    }
                }
                if let Ok(solver) = params.get_str("solver") {
                    if solver != "liblinear" {
                        return Err(AnomalyError::InvalidParameter {
                            name: "solver".to_string(),
                            value: solver.to_string(),
                            reason: "only liblinear is supported".to_string(),
                        });
                    }
                }
                Ok(AnyModel::Logistic(LogisticRegression::new().with_c(c)))
            }
            ModelId::NaiveBayes => {
                let alpha = params.get_f64("alpha").unwrap_or(1.0);
                let binarize = params.get_f64("binarize").unwrap_or(0.0);
                Ok(AnyModel::NaiveBayes(
                    BernoulliNaiveBayes::new()
                        .with_alpha(alpha)
                        .with_binarize(binarize),
                ))
            }
            ModelId::RandomForest => {
                let n = params.get_usize("n_estimators").unwrap_or(100);
                let max_features = parse_max_features(params)?;
                let max_depth = params.get_opt_usize("max_depth").unwrap_or(None);
                Ok(AnyModel::RandomForest(
                    RandomForest::new(n, seed)
                        .with_max_features(max_features)
                        .with_max_depth(max_depth),
                ))
            }
            ModelId::Adaboost => {
                let n = params.get_usize("n_estimators").unwrap_or(50);
                let lr = params.get_f64("learning_rate").unwrap_or(1.0);
                Ok(AnyModel::Adaboost(AdaBoost::new(n, lr)))
            }
            ModelId::LinearSvm => {
                let c = params.get_f64("C").unwrap_or(1.0);
                let loss = match params.get_str("loss").unwrap_or("squared_hinge") {
                    "hinge" => SvmLoss::Hinge,
                    "squared_hinge" => SvmLoss::SquaredHinge,
                    other => {
                        return Err(AnomalyError::InvalidParameter {
                            name: "loss".to_string(),
                            value: other.to_string(),
                            reason: "expected hinge or squared_hinge".to_string(),
                        })
                    }
                };
                Ok(AnyModel::LinearSvm(
                    LinearSvm::new().with_c(c).with_loss(loss),
                ))
            }
            ModelId::ExtraTrees => {
                let n = params.get_usize("n_estimators").unwrap_or(200);
                let max_features = parse_max_features(params)?;
                let max_depth = params.get_opt_usize("max_depth").unwrap_or(None);
                Ok(AnyModel::ExtraTrees(
                    ExtraTrees::new(n, seed)
                        .with_max_features(max_features)
                        .with_max_depth(max_depth),
                ))
            }
            ModelId::GradientBoosting => {
                let n = params.get_usize("n_estimators").unwrap_or(100);
                let lr = params.get_f64("learning_rate").unwrap_or(0.1);
                let depth = params.get_usize("max_depth").unwrap_or(3);
                Ok(AnyModel::GradientBoosting(
                    GradientBoosting::new(n)
                        .with_learning_rate(lr)
                        .with_max_depth(depth),
                ))
            }
        }
    }
}

fn parse_max_features(params: &ParamSet) -> Result<MaxFeatures> {
    match params.get_str("max_features") {
        Ok("sqrt") => Ok(MaxFeatures::Sqrt),
        Ok("log2") => Ok(MaxFeatures::Log2),
        Ok(other) => Err(AnomalyError::InvalidParameter {
            name: "max_features".to_string(),
            value: other.to_string(),
            reason: "expected sqrt or log2".to_string(),
        }),
        Err(_) => Ok(MaxFeatures::Sqrt),
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = AnomalyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "logistic_regression" => Ok(ModelId::LogisticRegression),
            "naive_bayes" => Ok(ModelId::NaiveBayes),
            "random_forest" => Ok(ModelId::RandomForest),
            "adaboost" => Ok(ModelId::Adaboost),
            "linear_svm" => Ok(ModelId::LinearSvm),
            "extra_trees" => Ok(ModelId::ExtraTrees),
            "gradient_boosting" => Ok(ModelId::GradientBoosting),
            other => Err(AnomalyError::ConfigError(format!(
                "unknown model '{other}'"
            ))),
        }
    }
}

/// A model instance behind a closed enum; dispatch never leaves this module.
#[derive(Debug, Clone)]
pub enum AnyModel {
    Logistic(LogisticRegression),
    NaiveBayes(BernoulliNaiveBayes),
    RandomForest(RandomForest),
    Adaboost(AdaBoost),
    LinearSvm(LinearSvm),
    ExtraTrees(ExtraTrees),
    GradientBoosting(GradientBoosting),
}

fn to_f64(y: &Array1<i64>) -> Array1<f64> {
    y.mapv(|v| v as f64)
}

fn to_labels(predictions: Array1<f64>) -> Array1<i64> {
    predictions.mapv(|p| if p > 0.5 { 1i64 } else { 0i64 })
}

impl Estimator for AnyModel {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<i64>) -> Result<()> {
        match self {
            AnyModel::Logistic(m) => m.fit(x, &to_f64(y)).map(|_| ()),
            AnyModel::NaiveBayes(m) => m.fit(x, y).map(|_| ()),
            AnyModel::RandomForest(m) => m.fit(x, &to_f64(y)).map(|_| ()),
            AnyModel::Adaboost(m) => m.fit(x, &to_f64(y)).map(|_| ()),
            AnyModel::LinearSvm(m) => m.fit(x, &to_f64(y)).map(|_| ()),
            AnyModel::ExtraTrees(m) => m.fit(x, &to_f64(y)).map(|_| ()),
            AnyModel::GradientBoosting(m) => m.fit(x, &to_f64(y)).map(|_| ()),
        }
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<i64>> {
        let raw = match self {
            AnyModel::Logistic(m) => m.predict(x)?,
            AnyModel::NaiveBayes(m) => m.predict(x)?,
            AnyModel::RandomForest(m) => m.predict(x)?,
            AnyModel::Adaboost(m) => m.predict(x)?,
            AnyModel::LinearSvm(m) => m.predict(x)?,
            AnyModel::ExtraTrees(m) => m.predict(x)?,
            AnyModel::GradientBoosting(m) => m.predict(x)?,
        };
        Ok(to_labels(raw))
    }

    fn decision_scores(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        match self {
            AnyModel::Logistic(m) => m.predict_proba(x),
            AnyModel::NaiveBayes(m) => m.predict_proba(x),
            AnyModel::RandomForest(m) => m.predict_proba(x),
            AnyModel::Adaboost(m) => m.decision_function(x),
            AnyModel::LinearSvm(m) => m.decision_function(x),
            AnyModel::ExtraTrees(m) => m.predict_proba(x),
            AnyModel::GradientBoosting(m) => m.predict_proba(x),
        }
    }

    fn feature_importances(&self) -> Option<Array1<f64>> {
        match self {
            AnyModel::Logistic(m) => m.feature_importances(),
            AnyModel::NaiveBayes(m) => m.feature_importances(),
            AnyModel::RandomForest(m) => m.feature_importances().cloned(),
            AnyModel::Adaboost(m) => m.feature_importances(),
            AnyModel::LinearSvm(m) => m.feature_importances(),
            AnyModel::ExtraTrees(m) => m.feature_importances().cloned(),
            AnyModel::GradientBoosting(m) => m.feature_importances().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_model_id_round_trip() {
        for id in ModelId::ALL {
            assert_eq!(id.as_str().parse::<ModelId>().unwrap(), id);
        }
    }

    #[test]
    fn test_unknown_model_rejected() {
        assert!("svm_rbf".parse::<ModelId>().is_err());
    }

    #[test]
    fn test_default_grid_keys_are_recognized() {
        for id in ModelId::ALL {
            let grid = id.default_grid();
            assert!(grid.validate(id.recognized_keys(), id.as_str()).is_ok());
        }
    }

    #[test]
    fn test_default_grid_candidate_counts() {
        assert_eq!(ModelId::LogisticRegression.default_grid().candidates().len(), 3);
        assert_eq!(ModelId::NaiveBayes.default_grid().candidates().len(), 4);
        assert_eq!(ModelId::RandomForest.default_grid().candidates().len(), 18);
        assert_eq!(ModelId::Adaboost.default_grid().candidates().len(), 9);
        assert_eq!(ModelId::LinearSvm.default_grid().candidates().len(), 6);
        assert_eq!(ModelId::ExtraTrees.default_grid().candidates().len(), 18);
        assert_eq!(ModelId::GradientBoosting.default_grid().candidates().len(), 27);
    }

    #[test]
    fn test_every_model_fits_and_scores() {
        let x = array![
            [0.0, 0.1],
            [0.2, 0.0],
            [0.1, 0.2],
            [5.0, 5.1],
            [5.2, 5.0],
            [5.1, 5.2],
        ];
        let y = array![0i64, 0, 0, 1, 1, 1];

        for id in ModelId::ALL {
            let params = id.default_grid().candidates().into_iter().next().unwrap();
            let mut model = id.build(&params, 42).unwrap();
            model.fit(&x, &y).unwrap();

            let preds = model.predict(&x).unwrap();
            assert_eq!(preds.len(), y.len(), "{id}");

            let scores = model.decision_scores(&x).unwrap();
            assert_eq!(scores.len(), y.len(), "{id}");
            // Scores should rank an obvious positive above an obvious negative
            assert!(scores[3] > scores[0], "{id}");
        }
    }

    #[test]
    fn test_invalid_solver_rejected() {
        let params = ParamSet::new(vec![(
            "solver".to_string(),
            ParamValue::Str("lbfgs".to_string()),
        )]);
        assert!(ModelId::LogisticRegression.build(&params, 42).is_err());
    }
}
