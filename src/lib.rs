//! rockbuilder - bootable Ubuntu image builder for the Rock 5B.
//!
//! Pipeline: cross-compile the kernel, package it with companion
//! payloads into debs, assemble an ext4 rootfs by installing a base
//! distribution plus those debs inside a chroot, then synthesize a FAT
//! boot partition whose extlinux entry references the rootfs by its
//! filesystem UUID.

pub mod bootimg;
pub mod ccache;
pub mod clean;
pub mod cleanup;
pub mod commands;
pub mod config;
pub mod download;
pub mod kernel;
pub mod package;
pub mod preflight;
pub mod process;
pub mod report;
pub mod retry;
pub mod rootfs;
pub mod stage;
pub mod timing;
