use super::*;

const PAGE_STEP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum KeyOutcome {
    Continue,
    Quit,
    /// Clear the terminal and draw everything again.
    Repaint,
    /// Restart the events source with an empty model.
    Reinitialize,
}

pub(super) fn handle_key(
    key: KeyEvent,
    console: &mut Console,
    state: &mut UiState,
) -> anyhow::Result<KeyOutcome> {
    if state.menu.is_some() {
        handle_menu_key(key, console, state);
        return Ok(KeyOutcome::Continue);
    }

    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('c') if ctrl => return Ok(KeyOutcome::Quit),
        KeyCode::Char('l') if ctrl => return Ok(KeyOutcome::Repaint),
        KeyCode::F(5) => return Ok(KeyOutcome::Repaint),
        KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(KeyOutcome::Quit),
        KeyCode::Char('R') => return Ok(KeyOutcome::Reinitialize),
        KeyCode::Tab => state.view = state.view.next(),
        KeyCode::BackTab => {
            state.view = state.view.next().next().next();
        }
        KeyCode::Char('p') | KeyCode::Char('P') => {
            toggle_problem_mode(state, console.dispatcher.directory());
        }
        KeyCode::Char('m') | KeyCode::Char('M') => {
            console.dispatcher.log_mut().clear();
            push_alert(state, "Message log cleared", LogLevel::Info);
        }
        KeyCode::Char('w') | KeyCode::Char('W') => save_settings(state, console),
        KeyCode::Char('c') | KeyCode::Char('C') if state.view != View::Tasks => {
            open_command_menu(state, console);
        }
        _ if state.view == View::Tasks => handle_task_key(key, &console.queue, state),
        _ => handle_navigation_key(key, console.dispatcher.directory(), state),
    }
    Ok(KeyOutcome::Continue)
}

fn handle_navigation_key(key: KeyEvent, directory: &ResourceDirectory, state: &mut UiState) {
    let detail = state.view == View::Detail;
    match key.code {
        KeyCode::Up if detail => move_detail(state, directory, -1),
        KeyCode::Down if detail => move_detail(state, directory, 1),
        KeyCode::Up => move_selection(state, directory, false, 1),
        KeyCode::Down => move_selection(state, directory, true, 1),
        KeyCode::PageUp | KeyCode::Left if detail => move_selection(state, directory, false, 1),
        KeyCode::PageDown | KeyCode::Right if detail => move_selection(state, directory, true, 1),
        KeyCode::PageUp => move_selection(state, directory, false, PAGE_STEP),
        KeyCode::PageDown => move_selection(state, directory, true, PAGE_STEP),
        KeyCode::Home => select_edge(state, directory, false),
        KeyCode::End => select_edge(state, directory, true),
        KeyCode::Enter if state.view == View::Overview => state.view = View::Detail,
        KeyCode::Esc if detail => state.view = View::Overview,
        _ => {}
    }
}

fn handle_task_key(key: KeyEvent, queue: &TaskQueue, state: &mut UiState) {
    match key.code {
        KeyCode::Left => {
            state.task_tab = next_task_tab(state.task_tab, false);
            move_task_selection(state, queue, 0);
        }
        KeyCode::Right => {
            state.task_tab = next_task_tab(state.task_tab, true);
            move_task_selection(state, queue, 0);
        }
        KeyCode::Up => move_task_selection(state, queue, -1),
        KeyCode::Down => move_task_selection(state, queue, 1),
        KeyCode::PageUp => move_task_selection(state, queue, -(PAGE_STEP as isize)),
        KeyCode::PageDown => move_task_selection(state, queue, PAGE_STEP as isize),
        KeyCode::Char('a') | KeyCode::Char('A') => {
            apply_task_action(state, queue, TaskAction::Activate);
        }
        KeyCode::Char('s') | KeyCode::Char('S') => {
            apply_task_action(state, queue, TaskAction::Suspend);
        }
        KeyCode::Char('x') => {
            apply_task_action(state, queue, TaskAction::Terminate { force: false });
        }
        KeyCode::Char('X') => {
            apply_task_action(state, queue, TaskAction::Terminate { force: true });
        }
        KeyCode::Char('r') => apply_task_action(state, queue, TaskAction::Remove),
        _ => {}
    }
}

fn handle_menu_key(key: KeyEvent, console: &Console, state: &mut UiState) {
    let Some(menu) = state.menu.as_mut() else {
        return;
    };
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => state.menu = None,
        KeyCode::Up => menu.index = menu.index.saturating_sub(1),
        KeyCode::Down => {
            menu.index = (menu.index + 1).min(menu.items.len().saturating_sub(1));
        }
        KeyCode::Home => menu.index = 0,
        KeyCode::End => menu.index = menu.items.len().saturating_sub(1),
        KeyCode::Enter => submit_menu(state, console),
        _ => {}
    }
}

pub(super) fn handle_mouse(event: MouseEvent, console: &Console, state: &mut UiState) {
    let forward = match event.kind {
        MouseEventKind::ScrollDown => true,
        MouseEventKind::ScrollUp => false,
        _ => return,
    };
    let directory = console.dispatcher.directory();
    match state.view {
        View::Overview => move_selection(state, directory, forward, 1),
        View::Detail => move_detail(state, directory, if forward { 1 } else { -1 }),
        View::Tasks => move_task_selection(state, &console.queue, if forward { 1 } else { -1 }),
        View::Log => {}
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

    fn console() -> Console {
        let mut dispatcher = EventDispatcher::new();
        for line in [
            "exists resource name:r0 role:Primary",
            "exists resource name:r1 role:Unknown",
            "exists -",
            "change resource name:r9 role:Primary",
        ] {
            let _ = dispatcher.process_line(line);
        }
        Console {
            dispatcher,
            queue: TaskQueue::new(Arc::new(NoProcess)),
            drbdadm: DrbdAdm::default(),
            config: ConsoleConfig::default(),
            config_path: None,
        }
    }

    fn press(code: KeyCode, console: &mut Console, state: &mut UiState) -> KeyOutcome {
        handle_key(KeyEvent::new(code, KeyModifiers::NONE), console, state).expect("key handled")
    }

    #[test]
    fn global_keys() {
        let mut console = console();
        let mut state = UiState::new(&console.config);
        resolve_selection(&mut state, console.dispatcher.directory());

        assert_eq!(press(KeyCode::Char('q'), &mut console, &mut state), KeyOutcome::Quit);
        assert_eq!(press(KeyCode::F(5), &mut console, &mut state), KeyOutcome::Repaint);
        assert_eq!(
            handle_key(
                KeyEvent::new(KeyCode::Char('l'), KeyModifiers::CONTROL),
                &mut console,
                &mut state
            )
            .expect("key handled"),
            KeyOutcome::Repaint
        );
        assert_eq!(press(KeyCode::Char('R'), &mut console, &mut state), KeyOutcome::Reinitialize);

        for view in View::ALL.iter().skip(1) {
            press(KeyCode::Tab, &mut console, &mut state);
            assert_eq!(state.view, *view);
        }
        press(KeyCode::BackTab, &mut console, &mut state);
        assert_eq!(state.view, View::Tasks);
    }

    #[test]
    fn problem_toggle_and_log_clear() {
        let mut console = console();
        let mut state = UiState::new(&console.config);
        resolve_selection(&mut state, console.dispatcher.directory());
        assert_eq!(state.selected.as_deref(), Some("r0"));

        press(KeyCode::Char('p'), &mut console, &mut state);
        assert!(state.problem_mode);
        assert_eq!(state.selected.as_deref(), Some("r1"));

        assert!(console.dispatcher.log().has_entries());
        press(KeyCode::Char('m'), &mut console, &mut state);
        assert!(!console.dispatcher.log().has_entries());
    }

    #[test]
    fn menu_captures_keys_until_closed() {
        let mut console = console();
        let mut state = UiState::new(&console.config);
        resolve_selection(&mut state, console.dispatcher.directory());
        press(KeyCode::Char('c'), &mut console, &mut state);
        assert!(state.menu.is_some());
        assert_eq!(press(KeyCode::Char('q'), &mut console, &mut state), KeyOutcome::Continue);
        assert!(state.menu.is_none());

        press(KeyCode::Char('c'), &mut console, &mut state);
        press(KeyCode::Down, &mut console, &mut state);
        press(KeyCode::Enter, &mut console, &mut state);
        assert!(state.menu.is_none());
        assert_eq!(console.queue.total_len(), 1);
        assert_eq!(console.queue.len(QueueKind::Waiting), 0);
    }
}
