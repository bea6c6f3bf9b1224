//! OS adapters for the ghostclick scheduler.
//!
//! Implements the `ghostclick-core` capability traits on top of the
//! platform window system:
//! - [`window`]: window enumeration, selector matching, capture
//! - [`matcher`]: ZNCC template matching against window captures
//! - [`injector`]: process-targeted clicks that leave the cursor alone

pub mod error;
pub mod injector;
pub mod matcher;
pub mod window;

pub use error::{PlatformError, PlatformResult};
pub use injector::GhostClickInjector;
pub use matcher::{template_capture_scale, NccMatcher};
pub use window::{
    find_all_windows, find_window, list_windows, PlatformWindowLocator, WindowEntry, WindowRect,
};

use ghostclick_core::Capabilities;
use std::sync::Arc;

/// The live OS capability set, ready to hand to the scheduler.
pub fn capabilities() -> Capabilities {
    Capabilities {
        locator: Arc::new(PlatformWindowLocator),
        matcher: Arc::new(NccMatcher),
        injector: Arc::new(GhostClickInjector),
    }
}
