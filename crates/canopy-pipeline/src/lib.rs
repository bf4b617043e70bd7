//! Canopy Pipeline - Scene processing, publication, and zonal statistics
//!
//! [`run::Pipeline`] drives one compositing run end to end;
//! [`zonal::ZonalEngine`] can also be run on its own against an already
//! published artifact.

pub mod atomic;
pub mod fetch;
pub mod progress;
pub mod publish;
pub mod run;
pub mod scene;
pub mod zonal;

pub use progress::{RunPhase, RunProgress};
pub use run::{Pipeline, RunOptions, RunOutcome, RunReport};
pub use zonal::{ZonalEngine, ZonalReport, ZonalTarget};
