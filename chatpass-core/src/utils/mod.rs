// src/utils/mod.rs
pub mod clock;
pub mod logbook;
pub mod revision;
pub mod fence;
