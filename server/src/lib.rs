//! # Admission Server Library
//!
//! This library implements deferred client admission for a multiplayer game
//! server: when a client connects, its admission is not finalized until every
//! interested server-side gate has asynchronously agreed to let it in, one of
//! them has refused it, or the admission layer has run out of patience.
//!
//! ## Core Responsibilities
//!
//! ### Verdict Aggregation
//! Each gate independently registers against a connecting client, publishes
//! progress text, and eventually approves or refuses. The engine folds those
//! verdicts into a single outcome: admission requires unanimous approval,
//! while the first refusal ends the evaluation immediately. Refusing is
//! cheap and must never wait on a slow-but-approving gate.
//!
//! ### Interactive Evaluation
//! Gates can go beyond yes/no: a gate may present an interactive card (a
//! form, a queue notice, a rules prompt) to the connecting client and receive
//! the answer before deciding. Gates can also leave handover data for the
//! session establishment step that runs after admission.
//!
//! ### Keeping the Client Alive
//! Evaluations may take arbitrarily long, far longer than any transport's
//! handshake timeout. A periodic keep-alive tick is emitted for the owning
//! transport to translate into its own ping, and the same tick re-runs the
//! aggregation pass so a stalled notification can never strand a decided
//! client.
//!
//! ## Architecture Design
//!
//! ### One Lock, One Writer
//! All mutable state of one evaluation — gate verdicts, handover data, the
//! pending card, the lifecycle flags — sits behind a single mutex, so every
//! aggregation pass sees a consistent snapshot and the terminal transition
//! happens exactly once no matter how many gate threads and timer ticks race.
//! Gate closures and outcome events are only run after the lock is released.
//!
//! ### Explicit Ownership
//! The [`admission::AdmissionManager`] holds the only strong reference to
//! each evaluation. Gates work through weak [`handle::DeferralHandle`]s:
//! when the client disconnects mid-evaluation the strong reference is
//! dropped and every outstanding gate callback degrades to a logged no-op.
//!
//! ### Event-Loop Agnosticism
//! The engine schedules its keep-alive through the [`scheduler::Scheduler`]
//! trait; [`scheduler::TokioScheduler`] backs it on this server's runtime.
//!
//! ## Module Organization
//!
//! - [`deferral`] — the per-client aggregation state machine
//! - [`handle`] — weak, gate-facing capability handles
//! - [`admission`] — pending-connection ownership, capacity and patience
//! - [`card`] — the single in-flight interactive card
//! - [`handover`] — key/value data passed between gates and into the session
//! - [`scheduler`] — periodic scheduling abstraction and tokio backing
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::admission::AdmissionManager;
//! use server::scheduler::TokioScheduler;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut admission = AdmissionManager::new(64, Duration::from_secs(120));
//!     let mut conn = admission.begin("203.0.113.9:30120".parse().unwrap()).unwrap();
//!
//!     // Hand weak handles to every interested gate, then mark the
//!     // notification pass as finished.
//!     let gate_view = conn.deferral.handle();
//!     gate_view.register("allowlist", "membership lookup");
//!     conn.deferral.mark_events_run();
//!     conn.deferral.evaluate();
//!     conn.deferral
//!         .start_timer(&TokioScheduler, Duration::from_millis(shared::KEEPALIVE_INTERVAL_MS));
//!
//!     // Gates now work asynchronously; outcomes arrive as events.
//!     while let Some(event) = conn.events.recv().await {
//!         let done = event.is_terminal();
//!         // ... forward to the wire protocol ...
//!         if done {
//!             break;
//!         }
//!     }
//!     admission.finish(conn.client_id);
//! }
//! ```

pub mod admission;
pub mod card;
pub mod deferral;
pub mod handle;
pub mod handover;
pub mod scheduler;
