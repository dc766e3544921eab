//! Discord Integration - slash commands over the interactions webhook
//!
//! This crate provides the Discord interface for stockbot:
//! - **Signatures** (`signature`) - Ed25519 check over `timestamp || body`
//! - **Manifest** (`manifest`) - The commands we register, with their response mode
//! - **Router** (`router`, `handlers`) - Ping, fast and deferred command paths
//! - **Dispatcher** (`dispatcher`) - Exactly-once follow-up delivery for deferred work
//! - **Sync** (`sync`) - Diffs the manifest against the registered commands and applies it
//! - **REST** (`rest`) - reqwest client for registration, follow-ups and channel posts
//!
//! # Getting Started
//!
//! 1. Create an application at https://discord.com/developers/applications
//! 2. Set `STOCKBOT_DISCORD_PUBLIC_KEY`, `STOCKBOT_DISCORD_APPLICATION_ID`, `STOCKBOT_DISCORD_BOT_TOKEN`
//! 3. Register the manifest with `stockbot sync`
//! 4. Point the Interactions Endpoint URL at `https://<host>/discord/interactions`
//!
//! # Architecture
//!
//! ```text
//! Webhook → SignatureVerifier → InteractionRouter → Handler → AnalysisService
//!                                      ↓                 ↓
//!                          immediate HTTP reply   ResponseDispatcher → follow-up
//! ```
//!
//! # Key Types
//!
//! - `SignatureVerifier` - Rejects anything not signed by the application key
//! - `InteractionRouter` - Produces the acknowledgment and any pending follow-up
//! - `ResponseDispatcher` - Retries transient follow-up failures until the token expires
//! - `CommandSyncer` - Reconciles registered commands with the manifest

pub mod dispatcher;
pub mod handlers;
pub mod interactions;
pub mod manifest;
pub mod messages;
pub mod rest;
pub mod router;
pub mod signature;
pub mod sync;
