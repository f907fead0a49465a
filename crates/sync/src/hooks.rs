//! Boundary traits implemented by the embedding UI shell.
//!
//! Toast rendering and page routing live outside this subsystem; the
//! engine only ever hands them short, non-technical notices and a single
//! "go to the default view" instruction.

/// User-visible notices.
///
/// Messages are generic by design: transport failures must never surface as
/// raw errors.
pub trait Notifier: Send + Sync {
    /// A positive confirmation (login, merge completed, logout).
    fn success(&self, message: &str);

    /// A degraded-but-recoverable condition.
    fn warning(&self, message: &str);
}

/// Page navigation at the boundary.
pub trait Navigator: Send + Sync {
    /// Navigate to the default view (used after logout).
    fn to_default_view(&self);
}

/// Notifier that drops every notice; for tests and headless embedding.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn success(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
}

/// Navigator that stays put; for tests and headless embedding.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn to_default_view(&self) {}
}
