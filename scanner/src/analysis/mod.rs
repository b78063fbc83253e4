pub mod features;
pub mod prefilter;
pub mod scoring;
pub mod windows;
