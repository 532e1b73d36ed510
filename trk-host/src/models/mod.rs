//! Data models for trk-host

pub mod canvas;
pub mod job;

pub use canvas::{
    CanvasDoc, Group, Node, NodeCreate, NodePatch, PaletteCreate, PalettePatch, Size,
    VersionToken, XY,
};
pub use job::{Artifact, JobId, JobInputs, JobStatusResponse, JobSummary};
