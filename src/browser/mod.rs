pub mod fingerprint;
pub mod launcher;
pub mod probe;

pub use launcher::{ChromeFactory, ChromeSession};
pub use probe::{Locator, Probe};
