//! Assertion helpers for response `Message`s, analogous to the teacher's
//! `TestResponse::assert_ok()`/`assert_not_found()` chain — there the
//! discriminant is an HTTP status code, here it's `FixedMeta.is_error` plus
//! the `error.kind` a timeout or handler failure is reported under.

use mycelia_core::message::Message;

/// Extension trait so assertions read as `response.assert_success()` instead
/// of a free function taking the message by reference.
pub trait MessageAssertions: Sized {
    fn assert_success(self) -> Self;
    fn assert_error(self) -> Self;
    fn assert_error_kind(self, kind: &str) -> Self;
}

impl MessageAssertions for Message {
    /// Assert this response was not marked an error. Returns `self` for
    /// chaining into a further `.body()`/`json()` read.
    fn assert_success(self) -> Self {
        assert!(!self.meta.fixed.is_error, "expected a success response, got an error: {:?}", self.body);
        self
    }

    fn assert_error(self) -> Self {
        assert!(self.meta.fixed.is_error, "expected an error response, got: {:?}", self.body);
        self
    }

    /// Assert this is an error response carrying `error.kind == kind`
    /// (the shape timeouts and synthetic handler errors both use).
    fn assert_error_kind(self, kind: &str) -> Self {
        assert!(self.meta.fixed.is_error, "expected an error response, got: {:?}", self.body);
        let actual = self.body.get("error").and_then(|e| e.get("kind")).and_then(|k| k.as_str());
        assert_eq!(actual, Some(kind), "expected error kind {kind:?}, got body: {:?}", self.body);
        self
    }
}
