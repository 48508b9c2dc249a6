pub mod args;

pub use args::{Args, Command, FilterPreset, SortOption, ViewArgs};
