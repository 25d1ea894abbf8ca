//! Cross-module tests driving the nucleus through its public surface.

mod helpers;
mod property;
mod unit;
