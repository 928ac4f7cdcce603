pub mod classifier_trait;
pub mod dtw;
pub mod gmm;
pub mod hidden_markov_model;
pub mod hmm;
pub mod knn;
pub mod min_dist;

pub use classifier_trait::{Classifier, ClassifierCore, Prediction};
pub use dtw::Dtw;
pub use gmm::Gmm;
pub use hidden_markov_model::{HiddenMarkovModel, HmmModelType};
pub use hmm::Hmm;
pub use knn::Knn;
pub use min_dist::MinDist;
