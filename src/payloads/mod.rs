//! # Payloads and flavours.
//!
//! A payload is one unit of work handed to the runtime. Its [`Flavour`] picks
//! the backend that executes it:
//!
//! ```text
//!   Payload::task / Payload::returning   ──► Flavour::Native   (coordinating runtime)
//!                                        ──► Flavour::Isolated (dedicated runtime thread)
//!   Payload::blocking / blocking_returning ─► Flavour::Thread  (one OS thread each)
//! ```
//!
//! - [`Payload`] fire-and-forget work; must finish without a value.
//! - [`Call`] typed work whose result is relayed to a blocked caller.
//! - [`Value`] type-erased value produced by a payload body.

mod call;
mod flavour;
mod payload;
mod value;

pub use call::Call;
pub use flavour::{Flavour, PayloadKind};
pub use payload::{Payload, PayloadResult};
pub use value::Value;

pub(crate) use payload::{Body, CooperativeBody};
