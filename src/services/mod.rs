// src/services/mod.rs
pub mod endpoints;
pub mod normalizer;
pub mod translator;
pub mod upstream;
