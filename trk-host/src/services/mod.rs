//! Service layer for trk-host

pub mod palette_store;

pub use palette_store::{PaletteStore, PaletteSummary, SnapshotInfo, SnapshotRef, Versioned};
