//! Session lifecycle: the remote-viewing game from image pick to feedback.
//!
//! ## Overview
//!
//! A session pairs two images. The viewer writes an impression of the
//! unseen target, a judge picks the image the impression matches best, and
//! a wager placed on that pick decides after settlement which image counts
//! as the target. The orchestrator owns the state machine; the sweeper
//! picks up anything that stalled between steps.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘          │         │                                        │
//!                       │         v                                        │
//!   sweeper.rs ───────> │  orchestrator.rs  (SessionOrchestrator, Step)    │
//!   (interval)          │     │              │               │             │
//!                       │     v              v               v             │
//!                       │  judge/        investment/      images.rs        │
//!                       │  JudgeGateway  InvestmentGateway ImageSource     │
//!                       │     │              │                             │
//!                       │     v              v                             │
//!                       │  store.rs  (Store trait, Repository)             │
//!                       │    ├─ db.rs      (SqliteStore)                   │
//!                       │    └─ memory.rs  (MemoryStore)                   │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module   | Responsibility                                            |
//! |----------|-----------------------------------------------------------|
//! | `models` | `Session`, `SessionStatus`, `InvestmentRecord`, `ImageIdx` |
//! | `stats`  | Win/loss aggregation over resolved sessions               |
//!
//! ## Status Flow
//!
//! `new → unjudged → judged → investing → invested → resolved → shown`
//!
//! 1. `POST /api/sessions/{id}/activate` stores the impression (→ unjudged)
//!    and spawns judge → invest → execute in the background.
//! 2. The sweeper snapshots unjudged, judged, investing and invested
//!    sessions each interval and applies one transition to each.
//! 3. Resolution waits for the wager to settle; `POST .../feedback` marks
//!    the outcome as shown.

pub mod api;
pub mod db;
pub mod images;
pub mod investment;
pub mod judge;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod stats;
pub mod store;
pub mod sweeper;
