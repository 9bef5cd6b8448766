//! # ralph
//!
//! An autonomous test-driven code-fixing agent: point it at a file and a
//! test command and it iterates LLM-proposed edits until the suite
//! passes, a budget runs out, or the loop is detectably stuck.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!                 │ Orchestrator │
//!                 └──────┬───────┘
//!        ┌───────────────┼────────────────┐
//!        ▼               ▼                ▼
//! ┌────────────┐  ┌────────────┐  ┌─────────────┐
//! │ Simple loop│  │ Full loop  │  │ Tier engine │
//! │ (Artisan)  │  │ (Lib/Art/  │  │ (N chained  │
//! │            │  │  Critic)   │  │  configs)   │
//! └─────┬──────┘  └─────┬──────┘  └──────┬──────┘
//!       └───────────────┴────────────────┘
//!                       ▼
//!          Provider Router → vendor adapters
//! ```
//!
//! ## Run flow
//! 1. Simple mode: Artisan + test runner, up to N cheap attempts
//! 2. Escalation: failed attempts compressed into a bounded summary
//! 3. Full mode: Librarian → Artisan → Critic with the failure history
//! 4. Optional tier engine: the same idea generalized to N model tiers
//!
//! ## Modules
//! - `engine`: the three control loops
//! - `agents`: Librarian / Artisan / Critic roles
//! - `llm`: provider router and vendor adapters
//! - `iteration` / `entropy`: budget accounting and the circuit breaker
//! - `summary`: failure-history compression
//! - `audit` / `session`: best-effort persistence

pub mod agents;
pub mod audit;
pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod entropy;
pub mod iteration;
pub mod llm;
pub mod orchestrator;
pub mod pricing;
pub mod records;
pub mod report;
pub mod runner;
pub mod session;
pub mod summary;
pub mod tiers;

pub use config::Config;
pub use orchestrator::{Orchestrator, RunOptions};
