pub mod allocation;
pub mod catalog;
pub mod level_updater;
pub mod selector;
