//! Inference backends: descriptors, model catalogs and the local model slot

pub mod catalog;
pub mod descriptor;
pub mod lifecycle;
