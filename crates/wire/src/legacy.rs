// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unframed text commands for drivers that predate the framed protocol.

/// `MONITOR <oid> <name> <dsloc> <update_remotes>\n`
pub fn monitor_command(oid: i32, name: &str, ds_location: &str, update_remotes: bool) -> String {
    let flag = if update_remotes { 1 } else { 0 };
    format!("MONITOR {oid} {name} {ds_location} {flag}\n")
}

/// `STOPMONITOR <oid> <name>\n`
pub fn stop_monitor_command(oid: i32, name: &str) -> String {
    format!("STOPMONITOR {oid} {name}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_command_formats_flag_as_digit() {
        assert_eq!(monitor_command(7, "node7", "/var/lib/ds", true), "MONITOR 7 node7 /var/lib/ds 1\n");
        assert_eq!(monitor_command(7, "node7", "-", false), "MONITOR 7 node7 - 0\n");
    }

    #[test]
    fn stop_monitor_command_formats() {
        assert_eq!(stop_monitor_command(3, "node3"), "STOPMONITOR 3 node3\n");
    }
}
