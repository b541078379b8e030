//! # causerie-realtime
//!
//! The signaling and delivery core: presence registry, call-session state
//! machine, persist-then-deliver message dispatch, and order-stable
//! history sync. Every connection worker shares these service objects;
//! each is internally synchronized.

pub mod calls;
pub mod dispatch;
pub mod registry;
pub mod sync;

use std::sync::Arc;

use causerie_store::Database;

/// The durable store as shared by the realtime services. The lock also
/// defines persistence order: for a single sender, messages are persisted
/// in lock-acquisition order.
pub type SharedStore = Arc<tokio::sync::Mutex<Database>>;

pub use calls::{CallOutcome, CallSessionManager, InitiateOutcome};
pub use dispatch::{Delivery, MessageDispatcher};
pub use registry::{ConnectionRegistry, Unregistered};
pub use sync::{ConversationSync, HistoryPage};
