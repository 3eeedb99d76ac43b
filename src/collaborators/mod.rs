//! Narrow contracts to the services around the bidding engine. Each one is a
//! trait object injected at construction so the engine runs without them.

pub mod audit;
pub mod notifier;
pub mod payment;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator rejected request: {0}")]
    Rejected(String),
}
