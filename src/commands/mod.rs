//! CLI command implementations.

pub mod boot;
pub mod build;
pub mod show;

pub use boot::cmd_boot_image;
pub use build::cmd_build;
pub use show::{cmd_show, ShowTarget};
