use super::*;

/// Builds the action menu for the selected detail row, or for the
/// resource itself outside the detail view.
pub(super) fn open_command_menu(state: &mut UiState, console: &Console) {
    let Some(resource) = state.selected.clone() else {
        push_alert(state, "No resource selected", LogLevel::Info);
        return;
    };
    let directory = console.dispatcher.directory();
    let row = if state.view == View::Detail {
        selected_detail_row(state, directory).unwrap_or(DetailRow::Resource)
    } else {
        DetailRow::Resource
    };
    let drbdadm = &console.drbdadm;
    let (title, items) = match row {
        DetailRow::Resource => {
            let mut items: Vec<CmdLine> = ResourceAction::ALL
                .iter()
                .map(|action| drbdadm.resource(*action, &resource))
                .collect();
            items.push(drbdadm.adjust_all());
            (format!("Resource {resource}"), items)
        }
        DetailRow::Volume(number) => (
            format!("Volume {resource}/{number}"),
            VolumeAction::ALL
                .iter()
                .map(|action| drbdadm.volume(*action, &resource, number))
                .collect(),
        ),
        DetailRow::PeerVolume(peer, number) => (
            format!("Peer volume {resource}:{peer}/{number}"),
            PeerVolumeAction::ALL
                .iter()
                .map(|action| drbdadm.peer_volume(*action, &resource, &peer, number))
                .collect(),
        ),
        DetailRow::Connection(peer) => (
            format!("Connection {resource}:{peer}"),
            ConnectionAction::ALL
                .iter()
                .map(|action| drbdadm.connection(*action, &resource, &peer))
                .collect(),
        ),
    };
    state.menu = Some(Menu {
        title,
        items,
        index: 0,
    });
}

/// Queues the highlighted menu command and closes the menu.
pub(super) fn submit_menu(state: &mut UiState, console: &Console) {
    let Some(menu) = state.menu.take() else {
        return;
    };
    let Some(command) = menu.items.into_iter().nth(menu.index) else {
        return;
    };
    let description = command.description().to_owned();
    let activate = !console.config.tasks.suspend_new;
    match console.queue.add_entry(command, activate) {
        Ok(id) => {
            let queue_name = if activate {
                QueueKind::Ready
            } else {
                QueueKind::Waiting
            };
            info!(id, %description, "task queued from menu");
            push_alert(
                state,
                &format!("Queued task {id} ({queue_name}): {description}"),
                LogLevel::Info,
            );
        }
        Err(err) => push_alert(state, &format!("{description}: {err}"), LogLevel::Alert),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TaskAction {
    Activate,
    Suspend,
    Terminate { force: bool },
    Remove,
}

pub(super) fn apply_task_action(state: &mut UiState, queue: &TaskQueue, action: TaskAction) {
    let Some(id) = queue.selected_id(state.task_tab) else {
        push_alert(state, "No task selected", LogLevel::Info);
        return;
    };
    let (done, failure) = match action {
        TaskAction::Activate => (queue.activate_entry(id), "Only suspended tasks can be activated"),
        TaskAction::Suspend => (queue.inactivate_entry(id), "Only pending tasks can be suspended"),
        TaskAction::Terminate { force } => {
            (queue.terminate_task(id, force), "Only active tasks can be terminated")
        }
        TaskAction::Remove => (
            queue.remove_entry(id),
            "Active tasks must be terminated before removal",
        ),
    };
    if !done {
        push_alert(state, failure, LogLevel::Warn);
    }
    move_task_selection(state, queue, 0);
}

/// Writes the current view and task settings back to the config file.
pub(super) fn save_settings(state: &mut UiState, console: &mut Console) {
    console.config.display.problem_mode = state.problem_mode;
    let Some(path) = console.config_path.clone() else {
        push_alert(state, "No configuration path available", LogLevel::Warn);
        return;
    };
    match console.config.save(&path) {
        Ok(()) => push_alert(
            state,
            &format!("Configuration saved to {}", path.display()),
            LogLevel::Info,
        ),
        Err(err) => {
            warn!(error = %err, "saving configuration failed");
            push_alert(state, &err.to_string(), LogLevel::Alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drbd_tasks::{ProcessError, ProcessFactory, SubProcess};

    struct NoProcess;

    impl ProcessFactory for NoProcess {
        fn create(&self) -> Result<Arc<dyn SubProcess>, ProcessError> {
            Err(ProcessError::Unavailable("test".into()))
        }
    }

    fn console(lines: &[&str], suspend_new: bool) -> Console {
        let mut dispatcher = EventDispatcher::new();
        for line in lines {
            dispatcher.process_line(line).expect("valid event");
        }
        let mut config = ConsoleConfig::default();
        config.tasks.suspend_new = suspend_new;
        Console {
            dispatcher,
            queue: TaskQueue::new(Arc::new(NoProcess)),
            drbdadm: DrbdAdm::default(),
            config,
            config_path: None,
        }
    }

    const EVENTS: &[&str] = &[
        "exists resource name:r0 role:Primary",
        "exists device name:r0 volume:0 minor:1 disk:UpToDate",
        "exists connection name:r0 conn-name:peer connection:Connected role:Secondary",
        "exists peer-device name:r0 conn-name:peer volume:0 replication:Established peer-disk:UpToDate",
        "exists -",
    ];

    #[test]
    fn menu_matches_the_selected_row() {
        let console = console(EVENTS, true);
        let mut state = UiState::new(&console.config);
        resolve_selection(&mut state, console.dispatcher.directory());

        open_command_menu(&mut state, &console);
        let menu = state.menu.take().expect("resource menu");
        assert_eq!(menu.title, "Resource r0");
        assert_eq!(menu.items.len(), ResourceAction::ALL.len() + 1);

        state.view = View::Detail;
        move_detail(&mut state, console.dispatcher.directory(), 2);
        open_command_menu(&mut state, &console);
        let menu = state.menu.take().expect("connection menu");
        assert_eq!(menu.title, "Connection r0:peer");
        assert_eq!(
            menu.items[0].to_string(),
            "/usr/sbin/drbdadm connect r0:peer"
        );

        move_detail(&mut state, console.dispatcher.directory(), 1);
        open_command_menu(&mut state, &console);
        let menu = state.menu.take().expect("peer volume menu");
        assert_eq!(menu.title, "Peer volume r0:peer/0");
        let targets: Vec<String> = menu.items.iter().map(ToString::to_string).collect();
        assert_eq!(
            targets,
            [
                "/usr/sbin/drbdadm pause-sync r0:peer/0",
                "/usr/sbin/drbdadm resume-sync r0:peer/0",
                "/usr/sbin/drbdadm verify r0:peer/0",
                "/usr/sbin/drbdadm invalidate-remote r0:peer/0",
            ]
        );

        move_detail(&mut state, console.dispatcher.directory(), -2);
        open_command_menu(&mut state, &console);
        let menu = state.menu.take().expect("volume menu");
        assert_eq!(menu.title, "Volume r0/0");
    }

    #[test]
    fn suspended_submission_waits_for_activation() {
        let console = console(EVENTS, true);
        let mut state = UiState::new(&console.config);
        resolve_selection(&mut state, console.dispatcher.directory());
        open_command_menu(&mut state, &console);
        if let Some(menu) = state.menu.as_mut() {
            menu.index = 1;
        }
        submit_menu(&mut state, &console);
        assert!(state.menu.is_none());
        assert_eq!(console.queue.len(QueueKind::Waiting), 1);
        let task = &console.queue.snapshot(QueueKind::Waiting)[0];
        assert_eq!(task.description, "Stop resource, resource r0");

        state.task_tab = QueueKind::Waiting;
        move_task_selection(&state, &console.queue, 0);
        apply_task_action(&mut state, &console.queue, TaskAction::Suspend);
        assert_eq!(
            state.alerts.back().map(|alert| alert.text.as_str()),
            Some("Only pending tasks can be suspended")
        );
        apply_task_action(&mut state, &console.queue, TaskAction::Remove);
        assert!(console.queue.is_empty());
    }

    #[test]
    fn menu_without_selection_reports_it() {
        let console = console(&["exists -"], false);
        let mut state = UiState::new(&console.config);
        open_command_menu(&mut state, &console);
        assert!(state.menu.is_none());
        assert_eq!(
            state.alerts.back().map(|alert| alert.text.as_str()),
            Some("No resource selected")
        );
    }
}
