/// Flow execution listener contract, loader and chain
pub mod listener;

/// Continuation key consistency decorator
pub mod key_proxy;

/// Transition-time key materializer
pub mod key_materializer;

/// Commit-and-clear helper and transaction runner
pub mod commit_and_clear;

/// Persistence lifecycle state machine
pub mod persistence_listener;
