//! Formatting for panic payloads caught at task and handler boundaries.

use std::{any::Any, fmt};

/// Displays a caught panic payload.
///
/// `String` and `&'static str` payloads are shown verbatim; anything else is
/// shown as an opaque placeholder.
///
/// ```
/// use hubwire::panic::PanicPayload;
///
/// let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
/// assert_eq!(PanicPayload(payload.as_ref()).to_string(), "boom");
/// ```
pub struct PanicPayload<'a>(pub &'a (dyn Any + Send));

impl fmt::Display for PanicPayload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            f.write_str("<non-string panic payload>")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PanicPayload;

    #[test]
    fn formats_owned_and_static_strings() {
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("bad frame"));
        assert_eq!(PanicPayload(owned.as_ref()).to_string(), "bad frame");
        let number: Box<dyn std::any::Any + Send> = Box::new(5_u32);
        assert_eq!(
            PanicPayload(number.as_ref()).to_string(),
            "<non-string panic payload>"
        );
    }
}
