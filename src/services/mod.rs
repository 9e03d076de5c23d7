pub mod api;
pub mod chapters;
pub mod controller;
pub mod progress;
pub mod stream;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
