#![deny(clippy::all)]

pub use crate::config::{ConfigError, TrackerConfig};
pub use crate::driver::{BrowserDriver, DriverError, DriverGuard, DriverLauncher, Screenshot};
pub use crate::extract::{
    ExtractionResult, FieldExtractor, FieldSource, FieldSpec, FieldValue, Normalizer,
    SelectorResolver,
};
pub use crate::profile::{ProfileError, ProfileSet, SiteProfile};
pub use crate::record::ProductRecord;
pub use crate::report::{ReportFiles, Reporter};
pub use crate::session::{SessionState, TrackError, TrackOutcome, TrackingSession};

pub mod config;
pub mod driver;
pub mod extract;
pub mod profile;
pub mod record;
pub mod report;
pub mod session;
