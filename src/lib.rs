// Environment-driven configuration
pub mod config;

// Key derivation and token encryption
pub mod crypto;

// Error taxonomy for the custody core
pub mod error;

// OAuth handshake, token exchange, and refresh orchestration
pub mod oauth;

// Durable handshake-state and token-record storage
pub mod store;
