//! extlinux boot-loader entry handling.
//!
//! The entry's `append` line embeds `root=UUID=<uuid> rw`. Rewriting an
//! existing entry must touch only the root= token so operator-added
//! options (console speed, loglevel) survive; synthesizing a fresh entry
//! happens when no conf exists at all.

use crate::config::{DEVICE, DTB_NAME};

/// Path of the entry record inside the boot partition.
pub const ENTRY_PATH: &str = "extlinux/extlinux.conf";

/// Kernel command line options every entry carries besides root=.
pub const BASE_APPEND_OPTIONS: &str = "rw rootwait console=ttyS2,1500000";

/// A boot-loader entry record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtlinuxEntry {
    pub label: String,
    pub kernel: String,
    pub initrd: String,
    pub fdt: Option<String>,
    pub append: String,
}

impl ExtlinuxEntry {
    /// Minimal entry embedding the given root filesystem UUID.
    pub fn minimal(uuid: &str, with_dtb: bool) -> Self {
        Self {
            label: DEVICE.to_string(),
            kernel: format!("/{}", super::KERNEL_FILENAME),
            initrd: format!("/{}", super::INITRD_FILENAME),
            fdt: with_dtb.then(|| format!("/{}", DTB_NAME)),
            append: format!("root=UUID={} {}", uuid, BASE_APPEND_OPTIONS),
        }
    }

    /// Render the full extlinux.conf contents for this entry.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("default {}\n", self.label));
        out.push_str("timeout 3\n\n");
        out.push_str(&format!("label {}\n", self.label));
        out.push_str(&format!("    kernel {}\n", self.kernel));
        out.push_str(&format!("    initrd {}\n", self.initrd));
        if let Some(fdt) = &self.fdt {
            out.push_str(&format!("    fdt {}\n", fdt));
        }
        out.push_str(&format!("    append {}\n", self.append));
        out
    }
}

/// Rewrite the root filesystem identifier in an existing conf.
///
/// Returns the new contents and whether a root= token was found. Only
/// the token is replaced; every other option on the append line stays.
pub fn rewrite_root_uuid(content: &str, uuid: &str) -> (String, bool) {
    let mut replaced = false;
    let lines: Vec<String> = content
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if !trimmed.starts_with("append") {
                return line.to_string();
            }
            let indent_len = line.len() - trimmed.len();
            let (indent, rest) = line.split_at(indent_len);
            let rewritten: Vec<String> = rest
                .split_whitespace()
                .map(|token| {
                    if token.starts_with("root=") {
                        replaced = true;
                        format!("root=UUID={}", uuid)
                    } else {
                        token.to_string()
                    }
                })
                .collect();
            format!("{}{}", indent, rewritten.join(" "))
        })
        .collect();

    let mut out = lines.join("\n");
    if content.ends_with('\n') {
        out.push('\n');
    }
    (out, replaced)
}

/// Extract the UUID currently referenced by a conf, if any.
pub fn extract_root_uuid(content: &str) -> Option<String> {
    for line in content.lines() {
        if !line.trim_start().starts_with("append") {
            continue;
        }
        for token in line.split_whitespace() {
            if let Some(value) = token.strip_prefix("root=UUID=") {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
default rock5b
timeout 3

label rock5b
    kernel /Image
    initrd /initrd.img
    fdt /rk3588-rock-5b.dtb
    append root=UUID=11111111-2222-3333-4444-555555555555 rw rootwait console=ttyS2,1500000
";

    #[test]
    fn test_rewrite_replaces_only_root_token() {
        let uuid = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee";
        let (out, replaced) = rewrite_root_uuid(SAMPLE, uuid);
        assert!(replaced);
        assert!(out.contains(&format!("root=UUID={}", uuid)));
        assert!(!out.contains("11111111"));
        // Operator options survive.
        assert!(out.contains("console=ttyS2,1500000"));
        assert!(out.contains("rootwait"));
        // Non-append lines untouched.
        assert!(out.contains("    kernel /Image"));
    }

    #[test]
    fn test_rewrite_handles_partuuid_style_token() {
        let conf = "label x\n    append root=PARTUUID=deadbeef-01 rw\n";
        let (out, replaced) = rewrite_root_uuid(conf, "new-uuid");
        assert!(replaced);
        assert!(out.contains("root=UUID=new-uuid"));
        assert!(!out.contains("PARTUUID"));
    }

    #[test]
    fn test_rewrite_reports_missing_token() {
        let conf = "label x\n    kernel /Image\n";
        let (out, replaced) = rewrite_root_uuid(conf, "u");
        assert!(!replaced);
        assert_eq!(out, conf);
    }

    #[test]
    fn test_round_trip_extract_after_rewrite() {
        let uuid = "2c1f3a44-9f0e-4f7c-9f3a-0f8a6f2d5e11";
        let (out, _) = rewrite_root_uuid(SAMPLE, uuid);
        assert_eq!(extract_root_uuid(&out).unwrap(), uuid);
    }

    #[test]
    fn test_minimal_entry_renders_complete_record() {
        let uuid = "2c1f3a44-9f0e-4f7c-9f3a-0f8a6f2d5e11";
        let entry = ExtlinuxEntry::minimal(uuid, true);
        let conf = entry.render();
        assert!(conf.contains("label rock5b"));
        assert!(conf.contains("kernel /Image"));
        assert!(conf.contains("initrd /initrd.img"));
        assert!(conf.contains("fdt /rk3588-rock-5b.dtb"));
        assert_eq!(extract_root_uuid(&conf).unwrap(), uuid);
    }

    #[test]
    fn test_minimal_entry_without_dtb() {
        let conf = ExtlinuxEntry::minimal("u", false).render();
        assert!(!conf.contains("fdt"));
    }
}
