use super::*;

const MAX_ALERTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum View {
    Overview,
    Detail,
    Tasks,
    Log,
}

impl View {
    pub(super) const ALL: [Self; 4] = [Self::Overview, Self::Detail, Self::Tasks, Self::Log];

    pub(super) fn next(self) -> Self {
        match self {
            Self::Overview => Self::Detail,
            Self::Detail => Self::Tasks,
            Self::Tasks => Self::Log,
            Self::Log => Self::Overview,
        }
    }

    pub(super) fn title(self) -> &'static str {
        match self {
            Self::Overview => "Resources",
            Self::Detail => "Detail",
            Self::Tasks => "Tasks",
            Self::Log => "Messages",
        }
    }
}

/// One line of the resource detail view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum DetailRow {
    Resource,
    Volume(u16),
    Connection(SmolStr),
    PeerVolume(SmolStr, u16),
}

pub(super) struct Menu {
    pub(super) title: String,
    pub(super) items: Vec<CmdLine>,
    pub(super) index: usize,
}

pub(super) struct Alert {
    pub(super) level: LogLevel,
    pub(super) text: String,
}

pub(super) struct UiState {
    pub(super) view: View,
    pub(super) problem_mode: bool,
    pub(super) selected: Option<SmolStr>,
    pub(super) detail_index: usize,
    pub(super) task_tab: QueueKind,
    pub(super) menu: Option<Menu>,
    pub(super) alerts: VecDeque<Alert>,
    pub(super) palette: Palette,
    pub(super) dirty: bool,
}

impl UiState {
    pub(super) fn new(config: &ConsoleConfig) -> Self {
        Self {
            view: View::Overview,
            problem_mode: config.display.problem_mode,
            selected: None,
            detail_index: 0,
            task_tab: QueueKind::Active,
            menu: None,
            alerts: VecDeque::with_capacity(MAX_ALERTS + 1),
            palette: Palette::for_scheme(config.display.color_scheme),
            dirty: true,
        }
    }
}

pub(super) fn push_alert(state: &mut UiState, text: &str, level: LogLevel) {
    if state.alerts.len() >= MAX_ALERTS {
        state.alerts.pop_front();
    }
    state.alerts.push_back(Alert {
        level,
        text: text.to_string(),
    });
    state.dirty = true;
}

/// Keeps the selection on the remembered name, or the closest remaining one.
fn anchor<V>(map: &OrderedMap<SmolStr, V>, current: Option<&SmolStr>) -> Option<SmolStr> {
    let Some(current) = current else {
        return map.first().map(|(name, _)| name.clone());
    };
    if map.contains_key(current.as_str()) {
        return Some(current.clone());
    }
    map.ceiling(current.as_str())
        .or_else(|| map.floor(current.as_str()))
        .map(|(name, _)| name.clone())
}

fn step<V>(
    map: &OrderedMap<SmolStr, V>,
    current: Option<&SmolStr>,
    forward: bool,
    count: usize,
) -> Option<SmolStr> {
    let mut name = anchor(map, current)?;
    for _ in 0..count {
        let neighbor = if forward {
            map.greater(name.as_str())
        } else {
            map.less(name.as_str())
        };
        match neighbor {
            Some((next, _)) => name = next.clone(),
            None => break,
        }
    }
    Some(name)
}

pub(super) fn resolve_selection(state: &mut UiState, directory: &ResourceDirectory) {
    let selected = if state.problem_mode {
        anchor(directory.problem_names(), state.selected.as_ref())
    } else {
        anchor(directory.resources(), state.selected.as_ref())
    };
    if selected != state.selected {
        state.detail_index = 0;
    }
    state.selected = selected;
    let rows = detail_rows(state, directory).len();
    state.detail_index = state.detail_index.min(rows.saturating_sub(1));
}

pub(super) fn move_selection(
    state: &mut UiState,
    directory: &ResourceDirectory,
    forward: bool,
    count: usize,
) {
    let selected = if state.problem_mode {
        step(directory.problem_names(), state.selected.as_ref(), forward, count)
    } else {
        step(directory.resources(), state.selected.as_ref(), forward, count)
    };
    if selected != state.selected {
        state.detail_index = 0;
    }
    state.selected = selected;
}

pub(super) fn select_edge(state: &mut UiState, directory: &ResourceDirectory, last: bool) {
    let edge = match (state.problem_mode, last) {
        (true, false) => directory.problem_names().first().map(|(name, _)| name.clone()),
        (true, true) => directory.problem_names().last().map(|(name, _)| name.clone()),
        (false, false) => directory.resources().first().map(|(name, _)| name.clone()),
        (false, true) => directory.resources().last().map(|(name, _)| name.clone()),
    };
    state.selected = edge;
    state.detail_index = 0;
}

pub(super) fn toggle_problem_mode(state: &mut UiState, directory: &ResourceDirectory) {
    state.problem_mode = !state.problem_mode;
    resolve_selection(state, directory);
}

/// Rows of the selected resource: itself, its volumes, then every
/// connection followed by its peer volumes.
pub(super) fn detail_rows(state: &UiState, directory: &ResourceDirectory) -> Vec<DetailRow> {
    let Some(resource) = state
        .selected
        .as_ref()
        .and_then(|name| directory.resource(name))
    else {
        return Vec::new();
    };
    let mut rows = vec![DetailRow::Resource];
    rows.extend(resource.volumes().keys().map(|number| DetailRow::Volume(*number)));
    for connection in resource.connections().values() {
        rows.push(DetailRow::Connection(connection.name().clone()));
        rows.extend(
            connection
                .volumes()
                .keys()
                .map(|number| DetailRow::PeerVolume(connection.name().clone(), *number)),
        );
    }
    rows
}

pub(super) fn move_detail(state: &mut UiState, directory: &ResourceDirectory, delta: isize) {
    let rows = detail_rows(state, directory).len();
    if rows == 0 {
        state.detail_index = 0;
        return;
    }
    state.detail_index = state
        .detail_index
        .saturating_add_signed(delta)
        .min(rows - 1);
}

pub(super) fn selected_detail_row(
    state: &UiState,
    directory: &ResourceDirectory,
) -> Option<DetailRow> {
    detail_rows(state, directory)
        .into_iter()
        .nth(state.detail_index)
}

/// Moves the task cursor through the current tab.
pub(super) fn move_task_selection(state: &UiState, queue: &TaskQueue, delta: isize) {
    let ids: Vec<TaskId> = queue
        .snapshot(state.task_tab)
        .iter()
        .map(|task| task.id)
        .collect();
    if ids.is_empty() {
        queue.set_selected_id(state.task_tab, None);
        return;
    }
    let position = queue
        .selected_id(state.task_tab)
        .and_then(|id| ids.iter().position(|candidate| *candidate == id));
    let next = match position {
        Some(position) => position.saturating_add_signed(delta).min(ids.len() - 1),
        None => 0,
    };
    queue.set_selected_id(state.task_tab, Some(ids[next]));
}

/// Gives every non-empty tab a selection after queue changes.
pub(super) fn sync_task_selection(state: &mut UiState, queue: &TaskQueue) {
    for kind in QueueKind::ALL {
        if queue.selected_id(kind).is_none() && queue.len(kind) > 0 {
            let first = queue.with_entries(kind, None, |mut iter| iter.next().map(|view| view.id));
            queue.set_selected_id(kind, first);
        }
    }
    state.dirty = true;
}

pub(super) fn next_task_tab(kind: QueueKind, forward: bool) -> QueueKind {
    let tabs = QueueKind::ALL;
    let index = tabs.iter().position(|tab| *tab == kind).unwrap_or(0);
    let next = if forward {
        (index + 1) % tabs.len()
    } else {
        (index + tabs.len() - 1) % tabs.len()
    };
    tabs[next]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(lines: &[&str]) -> ResourceDirectory {
        let mut dispatcher = EventDispatcher::new();
        for line in lines {
            dispatcher.process_line(line).expect("valid event");
        }
        dispatcher.directory().clone()
    }

    fn state() -> UiState {
        UiState::new(&ConsoleConfig::default())
    }

    const RESOURCES: &[&str] = &[
        "exists resource name:alpha role:Primary",
        "exists resource name:bravo role:Unknown",
        "exists resource name:charlie role:Secondary",
        "exists resource name:delta role:Unknown",
        "exists -",
    ];

    #[test]
    fn navigation_walks_names_in_order() {
        let directory = directory(RESOURCES);
        let mut state = state();
        resolve_selection(&mut state, &directory);
        assert_eq!(state.selected.as_deref(), Some("alpha"));

        move_selection(&mut state, &directory, true, 2);
        assert_eq!(state.selected.as_deref(), Some("charlie"));
        move_selection(&mut state, &directory, true, 10);
        assert_eq!(state.selected.as_deref(), Some("delta"));
        move_selection(&mut state, &directory, false, 1);
        assert_eq!(state.selected.as_deref(), Some("charlie"));
        select_edge(&mut state, &directory, false);
        assert_eq!(state.selected.as_deref(), Some("alpha"));
    }

    #[test]
    fn problem_mode_only_visits_problem_resources() {
        let directory = directory(RESOURCES);
        let mut state = state();
        state.selected = Some("charlie".into());
        toggle_problem_mode(&mut state, &directory);
        // charlie is healthy, the next problem resource takes over
        assert_eq!(state.selected.as_deref(), Some("delta"));
        move_selection(&mut state, &directory, false, 1);
        assert_eq!(state.selected.as_deref(), Some("bravo"));
        move_selection(&mut state, &directory, false, 1);
        assert_eq!(state.selected.as_deref(), Some("bravo"));
    }

    #[test]
    fn selection_survives_removal_of_the_selected_resource() {
        let mut dispatcher = EventDispatcher::new();
        for line in RESOURCES {
            dispatcher.process_line(line).expect("valid event");
        }
        let mut state = state();
        state.selected = Some("delta".into());
        dispatcher
            .process_line("destroy resource name:delta")
            .expect("destroy");
        resolve_selection(&mut state, dispatcher.directory());
        assert_eq!(state.selected.as_deref(), Some("charlie"));

        dispatcher
            .process_line("destroy resource name:alpha")
            .expect("destroy");
        state.selected = Some("alpha".into());
        resolve_selection(&mut state, dispatcher.directory());
        assert_eq!(state.selected.as_deref(), Some("bravo"));

        dispatcher.reset();
        resolve_selection(&mut state, dispatcher.directory());
        assert_eq!(state.selected, None);
    }

    #[test]
    fn detail_rows_follow_the_resource_layout() {
        let directory = directory(&[
            "exists resource name:r0 role:Primary",
            "exists device name:r0 volume:1 minor:2 disk:UpToDate",
            "exists device name:r0 volume:0 minor:1 disk:UpToDate",
            "exists connection name:r0 conn-name:peer connection:Connected role:Secondary",
            "exists peer-device name:r0 conn-name:peer volume:0 replication:Established peer-disk:UpToDate",
            "exists -",
        ]);
        let mut state = state();
        resolve_selection(&mut state, &directory);
        assert_eq!(
            detail_rows(&state, &directory),
            vec![
                DetailRow::Resource,
                DetailRow::Volume(0),
                DetailRow::Volume(1),
                DetailRow::Connection("peer".into()),
                DetailRow::PeerVolume("peer".into(), 0),
            ]
        );
        move_detail(&mut state, &directory, 10);
        assert_eq!(
            selected_detail_row(&state, &directory),
            Some(DetailRow::PeerVolume("peer".into(), 0))
        );
        move_detail(&mut state, &directory, -2);
        assert_eq!(
            selected_detail_row(&state, &directory),
            Some(DetailRow::Volume(1))
        );
    }

    #[test]
    fn alerts_keep_the_latest_entries() {
        let mut state = state();
        for index in 0..7 {
            push_alert(&mut state, &format!("alert {index}"), LogLevel::Warn);
        }
        let texts: Vec<_> = state.alerts.iter().map(|alert| alert.text.as_str()).collect();
        assert_eq!(texts, ["alert 3", "alert 4", "alert 5", "alert 6"]);
    }

    #[test]
    fn task_tabs_wrap_around() {
        assert_eq!(next_task_tab(QueueKind::Active, true), QueueKind::Ready);
        assert_eq!(next_task_tab(QueueKind::Finished, true), QueueKind::Active);
        assert_eq!(next_task_tab(QueueKind::Active, false), QueueKind::Finished);
    }
}
