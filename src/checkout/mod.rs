//! Buyer-side checkout flow.
//!
//! The orchestrator sequences the detail, location, payment, and receipt
//! steps on top of the order, stock, and payment services. All checkout
//! state lives in a [`store::SessionStore`] keyed by buyer, so a buyer can
//! abandon the flow and resume it later without duplicating orders.

pub mod orchestrator;
pub mod session;
pub mod store;

pub use orchestrator::{
    CheckoutBackend, CheckoutOrchestrator, ConfirmOutcome, LiveBackend, QuantityOutcome,
    SaveOutcome,
};
pub use session::{CheckoutSession, CheckoutStep};
pub use store::{InMemorySessionStore, SessionStore};
