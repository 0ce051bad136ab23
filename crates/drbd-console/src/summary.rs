//! Plain-text status summary printed by `--no-ui`.

use std::fmt::Write as _;

use drbd_model::{Connection, EventDispatcher, FlagState, Resource, StateFlagged, Volume};
use owo_colors::OwoColorize;

fn badge(state: FlagState, color: bool) -> String {
    let text = format!("[{}]", state.label());
    if !color {
        return text;
    }
    match state {
        FlagState::Norm => text.green().to_string(),
        FlagState::Mark => text.cyan().to_string(),
        FlagState::Warn => text.yellow().to_string(),
        FlagState::Alert => text.red().bold().to_string(),
    }
}

fn sync_progress(volume: &Volume) -> String {
    if volume.replication_state().is_resync_target() {
        let perc = volume.sync_perc();
        format!(" {}.{:02}%", perc / 100, perc % 100)
    } else {
        String::new()
    }
}

fn write_volume(out: &mut String, volume: &Volume, color: bool) {
    let _ = writeln!(
        out,
        "  volume {:<3} minor {:<5} {:<12} {}",
        volume.number(),
        volume.minor(),
        volume.disk_state().label(),
        badge(volume.state(), color)
    );
}

fn write_connection(out: &mut String, connection: &Connection, color: bool) {
    let _ = writeln!(
        out,
        "  connection {:<12} {:<14} {:<10} {}",
        connection.name(),
        connection.connection_state().label(),
        connection.role().label(),
        badge(connection.state(), color)
    );
    for peer in connection.volumes().values() {
        let _ = writeln!(
            out,
            "    peer volume {:<3} {:<12} {:<14} {}{}",
            peer.number(),
            peer.disk_state().label(),
            peer.replication_state().label(),
            badge(peer.state(), color),
            sync_progress(peer)
        );
    }
}

fn write_resource(out: &mut String, resource: &Resource, color: bool) {
    let name = if color {
        resource.name().bold().to_string()
    } else {
        resource.name().to_string()
    };
    let _ = writeln!(
        out,
        "{name} {:<10} {}",
        resource.role().label(),
        badge(resource.state(), color)
    );
    for volume in resource.volumes().values() {
        write_volume(out, volume, color);
    }
    for connection in resource.connections().values() {
        write_connection(out, connection, color);
    }
}

/// Renders every resource (or only problem resources) and the message log.
#[must_use]
pub fn render_summary(dispatcher: &EventDispatcher, problems_only: bool, color: bool) -> String {
    let directory = dispatcher.directory();
    let mut out = String::new();
    if problems_only {
        for resource in directory.problem_resources() {
            write_resource(&mut out, resource, color);
        }
    } else {
        for resource in directory.resources().values() {
            write_resource(&mut out, resource, color);
        }
    }
    let _ = writeln!(
        out,
        "{} resources, {} with problems",
        directory.len(),
        directory.problem_names().len()
    );
    if dispatcher.log().has_entries() {
        out.push_str("Messages:\n");
        for entry in dispatcher.log().iter() {
            let _ = writeln!(out, "  {entry}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    fn dispatcher(lines: &[&str]) -> EventDispatcher {
        let mut dispatcher = EventDispatcher::new();
        for line in lines {
            dispatcher.process_line(line).expect("valid event");
        }
        dispatcher
    }

    const EVENTS: &[&str] = &[
        "exists resource name:r0 role:Primary",
        "exists device name:r0 volume:0 minor:1 disk:UpToDate",
        "exists connection name:r0 peer-node-id:1 conn-name:alpha connection:Connected role:Secondary",
        "exists peer-device name:r0 peer-node-id:1 conn-name:alpha volume:0 replication:SyncSource peer-disk:UpToDate",
        "exists resource name:r1 role:Secondary",
        "exists connection name:r1 peer-node-id:2 conn-name:beta connection:StandAlone role:Unknown",
        "exists -",
    ];

    #[test]
    fn renders_all_resources_without_color() {
        let summary = render_summary(&dispatcher(EVENTS), false, false);
        expect![[r#"
            r0 Primary    [MARK]
              volume 0   minor 1     UpToDate     [NORM]
              connection alpha        Connected      Secondary  [MARK]
                peer volume 0   UpToDate     SyncSource     [WARN]
            r1 Secondary  [MARK]
              connection beta         StandAlone     Unknown    [ALERT]
            2 resources, 2 with problems
        "#]]
        .assert_eq(&summary);
    }

    #[test]
    fn resync_target_shows_progress() {
        let mut events = EVENTS.to_vec();
        events.insert(
            6,
            "exists peer-device name:r1 peer-node-id:2 conn-name:beta volume:0 replication:SyncTarget peer-disk:UpToDate done:45.07",
        );
        let summary = render_summary(&dispatcher(&events), true, false);
        assert!(summary.contains("    peer volume 0   UpToDate     SyncTarget     [WARN] 45.07%\n"));
    }

    #[test]
    fn problem_filter_skips_healthy_resources() {
        let events = [
            "exists resource name:a role:Primary",
            "exists resource name:b role:Unknown",
            "exists -",
            "change resource name:a role:Unknown",
            "change resource name:b role:Secondary",
        ];
        let summary = render_summary(&dispatcher(&events), true, false);
        assert!(summary.starts_with("a Unknown    [ALERT]\n"));
        assert!(!summary.contains("b Secondary"));
        assert!(summary.contains("2 resources, 1 with problems"));
    }

    #[test]
    fn log_entries_follow_the_resources() {
        let mut dispatcher = dispatcher(&["exists -"]);
        let _ = dispatcher.process_line("change resource name:ghost role:Primary");
        let summary = render_summary(&dispatcher, false, false);
        let messages = summary.split_once("Messages:\n").map(|(_, rest)| rest);
        assert!(messages.is_some_and(|rest| rest.contains("ALERT Event references nonexistent resource 'ghost'")));
    }
}
