//! Capability traits consumed by the scheduler.
//!
//! The engine never talks to the OS directly. Window enumeration,
//! template matching and click injection are injected through these
//! traits by the application's composition root; the platform crate
//! provides the real adapters, tests provide mocks.

use crate::WindowSelector;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Opaque platform window identifier (HWND / CGWindowID / test id).
pub type WindowHandle = usize;

/// Errors surfaced by capability implementations. The scheduler treats
/// all of them as a failed detection for the current tick.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("template match failed: {0}")]
    Match(String),
    #[error("injection failed: {0}")]
    Injection(String),
    #[error("not implemented on this platform")]
    NotImplemented,
}

/// Outcome of a visibility check for one template.
#[derive(Debug, Clone, Copy)]
pub struct Match {
    /// Confidence reached the caller's threshold.
    pub visible: bool,
    /// Best normalized similarity found, in [0, 1].
    pub confidence: f32,
}

/// Location of the best match, in window-relative logical coordinates.
#[derive(Debug, Clone, Copy)]
pub struct MatchRegion {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl MatchRegion {
    /// Center point, the click target.
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// Resolves a window selector to zero or more window handles.
pub trait WindowLocator: Send + Sync {
    /// All windows matching the selector, in platform enumeration
    /// order. Empty when none match; "not found" is not an error.
    fn find_all(&self, selector: &WindowSelector) -> Vec<WindowHandle>;
}

/// Checks template visibility inside a window.
pub trait TemplateMatcher: Send + Sync {
    /// Whether the template is visible above `threshold`, plus the
    /// best confidence seen.
    fn check_visible(
        &self,
        window: WindowHandle,
        template: &Path,
        threshold: f32,
    ) -> Result<Match, CapabilityError>;

    /// Location of the best match at or above `threshold`, if any.
    fn find_location(
        &self,
        window: WindowHandle,
        template: &Path,
        threshold: f32,
    ) -> Result<Option<MatchRegion>, CapabilityError>;
}

/// Delivers a synthetic click to a window without stealing focus.
pub trait InputInjector: Send + Sync {
    fn click(
        &self,
        window: WindowHandle,
        x: i32,
        y: i32,
        action: crate::ClickAction,
    ) -> Result<(), CapabilityError>;
}

/// Injector that logs instead of clicking. Useful for UI development
/// and dry runs.
pub struct NoopInjector;

impl InputInjector for NoopInjector {
    fn click(
        &self,
        window: WindowHandle,
        x: i32,
        y: i32,
        action: crate::ClickAction,
    ) -> Result<(), CapabilityError> {
        debug!(window, x, y, ?action, "NoopInjector: would ghost-click");
        Ok(())
    }
}

/// The full set of collaborators the scheduler needs, bundled for
/// injection at construction time.
#[derive(Clone)]
pub struct Capabilities {
    pub locator: Arc<dyn WindowLocator>,
    pub matcher: Arc<dyn TemplateMatcher>,
    pub injector: Arc<dyn InputInjector>,
}
