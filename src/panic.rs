//! Panic payload formatting.
//!
//! Handler panics are caught at the dispatch boundary and reported as
//! [`Exception::Panic`](crate::dispatch::Exception::Panic) carrying the
//! rendered payload.

use std::any::Any;

/// Render a caught panic payload as text.
///
/// `panic!` payloads are a `&'static str` or a `String`; anything else falls
/// back to its `Debug` rendering.
///
/// ```
/// use tcpacket::panic::panic_message;
///
/// assert_eq!(panic_message(&"boom"), "boom");
/// assert_eq!(panic_message(&String::from("boom")), "boom");
/// assert!(panic_message(&5_u32).contains("Any"));
/// ```
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        format!("{payload:?}")
    }
}
