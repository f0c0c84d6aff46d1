//! Abstract contexts and context-sensitive call graphs.
//!
//! A [`Ctxt`] is a bounded sequence of call or allocation sites. The
//! [`ContextsTask`] decides, per method, which contexts it is analysed in and
//! publishes them as the domain `C` with the relations linking contexts to
//! sites. The [`CallGraph`] pairs methods with those contexts.

mod cscg;
mod ctxt;
mod ctxts;
mod obj;

pub use self::cscg::{CallGraph, CiCallGraph, ContextPolicy};
pub use self::ctxt::Ctxt;
pub use self::ctxts::ContextsTask;
pub use self::obj::{AbstractObject, NoReceivers, ReceiverObjects};
