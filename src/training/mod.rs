//! Model training: estimators, hyperparameter search and nested
//! cross-validation.

pub mod adaboost;
pub mod cross_validation;
pub mod decision_tree;
pub mod extra_trees;
pub mod gradient_boosting;
pub mod grid;
pub mod linear_models;
pub mod naive_bayes;
pub mod random_forest;
pub mod registry;
pub mod svm;
pub mod trainer;

pub use adaboost::AdaBoost;
pub use cross_validation::{FoldSplit, StratifiedKFold};
pub use decision_tree::DecisionTree;
pub use extra_trees::ExtraTrees;
pub use gradient_boosting::GradientBoosting;
pub use grid::{ParamGrid, ParamSet, ParamValue};
pub use linear_models::LogisticRegression;
pub use naive_bayes::BernoulliNaiveBayes;
pub use random_forest::{MaxFeatures, RandomForest};
pub use registry::{AnyModel, Estimator, ModelId};
pub use svm::{LinearSvm, SvmLoss};
pub use trainer::{
    evaluate_models, FeatureRank, FoldOutcome, FoldStatus, ModelReport, ModelRequest,
    NestedCvConfig, NullProgress, ProgressSink, TrainingReport, TrainingRequest,
};
