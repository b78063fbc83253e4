pub mod rnaduplex_integration;
pub mod xgboost_model;
