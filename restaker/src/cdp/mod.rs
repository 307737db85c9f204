//! Chrome DevTools Protocol implementation of the automation surface
//!
//! [`CdpSurface`] starts a local Chrome/Chromium with the wallet extension
//! loaded, then talks to it over DevTools WebSockets: one browser-level
//! connection for target management and one connection per page.

mod browser;
mod connection;
mod page;
mod recorder;

pub use browser::{CdpBrowser, CdpSurface};
pub use connection::{CdpConnection, CdpEvent};
pub use page::CdpPage;
pub use recorder::{FrameEntry, FrameManifest, ScreencastRecorder};
