//! gesture-classifiers: sequential gesture recognition from sensor streams.
//!
//! This crate provides labelled datasets (static vectors, time series and
//! regression pairs), sequence classifiers (discrete HMMs trained with
//! Baum-Welch, DTW templates), statistical classifiers (MinDist, KNN, GMM),
//! a linear regressor, and the pre-processing, feature-extraction and
//! post-processing stages that a [`pipeline::GestureRecognitionPipeline`]
//! chains around one model.
//!
//! Everything that can be persisted uses the keyword-token text format in
//! [`io::tokens`]; stages and models are re-created from their type tags by
//! [`factory`].
pub mod clustering;
pub mod config;
pub mod data;
pub mod error;
pub mod factory;
pub mod feature_extraction;
pub mod io;
pub mod math;
pub mod models;
pub mod pipeline;
pub mod postprocessing;
pub mod preprocessing;
pub mod regression;
pub mod stats;
