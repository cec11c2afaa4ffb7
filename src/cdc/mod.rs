pub mod applier;
pub mod bridge;
pub mod producer;
