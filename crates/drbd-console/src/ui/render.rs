use super::*;

fn panel_block(title: &str, palette: &Palette) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(palette.accent))
        .title(Span::styled(
            format!(" {title} "),
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        ))
}

fn header_style(palette: &Palette) -> Style {
    Style::default().fg(palette.dim).add_modifier(Modifier::BOLD)
}

fn label_style(palette: &Palette) -> Style {
    Style::default().fg(palette.dim)
}

fn value_style(palette: &Palette) -> Style {
    Style::default().fg(palette.text)
}

fn row_style(palette: &Palette, selected: bool) -> Style {
    if selected {
        palette.selected()
    } else {
        Style::default()
    }
}

fn flag_span(state: FlagState, palette: &Palette) -> Span<'static> {
    Span::styled(format!("{:<5}", state.label()), palette.flag(state))
}

/// Scroll offset that keeps `selected` inside a window of `height` rows.
fn window_start(selected: usize, height: usize) -> usize {
    if height == 0 {
        0
    } else {
        selected.saturating_sub(height - 1)
    }
}

pub(super) fn render_ui(
    area: Rect,
    frame: &mut ratatui::Frame<'_>,
    state: &UiState,
    console: &Console,
) {
    let alert_height = state.alerts.len().min(4) as u16;
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(alert_height),
            Constraint::Length(1),
        ])
        .split(area);
    render_header(layout[0], frame, state, console);
    match state.view {
        View::Overview => render_overview(layout[1], frame, state, console),
        View::Detail => render_detail(layout[1], frame, state, console),
        View::Tasks => render_tasks(layout[1], frame, state, console),
        View::Log => render_log(layout[1], frame, state, console),
    }
    render_alerts(layout[2], frame, state);
    render_footer(layout[3], frame, state);
    if let Some(menu) = state.menu.as_ref() {
        render_menu(area, frame, menu, &state.palette);
    }
}

fn render_header(area: Rect, frame: &mut ratatui::Frame<'_>, state: &UiState, console: &Console) {
    let palette = &state.palette;
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(30), Constraint::Length(48)])
        .split(area);
    let selected = View::ALL
        .iter()
        .position(|view| *view == state.view)
        .unwrap_or(0);
    let tabs = Tabs::new(View::ALL.iter().map(|view| view.title()))
        .select(selected)
        .style(label_style(palette))
        .highlight_style(
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_widget(tabs, cols[0]);

    let directory = console.dispatcher.directory();
    let queue = &console.queue;
    let tracking = if console.dispatcher.has_initial_state() {
        Span::styled("live", Style::default().fg(palette.norm))
    } else {
        Span::styled("loading", Style::default().fg(palette.warn))
    };
    let status = Line::from(vec![
        tracking,
        Span::styled("  res ", label_style(palette)),
        Span::styled(directory.len().to_string(), value_style(palette)),
        Span::styled("  problems ", label_style(palette)),
        Span::styled(
            directory.problem_names().len().to_string(),
            if directory.problem_names().is_empty() {
                value_style(palette)
            } else {
                Style::default().fg(palette.alert)
            },
        ),
        Span::styled("  tasks ", label_style(palette)),
        Span::styled(
            format!(
                "{}/{}",
                queue.len(QueueKind::Active),
                queue.len(QueueKind::Ready)
            ),
            value_style(palette),
        ),
    ]);
    frame.render_widget(Paragraph::new(status), cols[1]);
}

fn render_overview(area: Rect, frame: &mut ratatui::Frame<'_>, state: &UiState, console: &Console) {
    let palette = &state.palette;
    let directory = console.dispatcher.directory();
    let title = if state.problem_mode {
        "Resources (problems only)"
    } else {
        "Resources"
    };
    let block = panel_block(title, palette);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let resources: Vec<_> = if state.problem_mode {
        directory.problem_resources().collect()
    } else {
        directory.resources().values().collect()
    };
    let mut lines = vec![Line::from(vec![
        Span::styled(format!("{:<24}", "RESOURCE"), header_style(palette)),
        Span::styled(format!("{:<11}", "ROLE"), header_style(palette)),
        Span::styled(format!("{:<6}", "STATE"), header_style(palette)),
        Span::styled(format!("{:>5} {:>5}", "VOLS", "CONNS"), header_style(palette)),
    ])];
    if resources.is_empty() {
        let text = if !console.dispatcher.has_initial_state() {
            "Waiting for the initial state..."
        } else if state.problem_mode {
            "All resources are healthy"
        } else {
            "No resources"
        };
        lines.push(Line::from(Span::styled(text, label_style(palette))));
    }
    let position = resources
        .iter()
        .position(|resource| Some(resource.name()) == state.selected.as_ref())
        .unwrap_or(0);
    let rows = usize::from(inner.height.saturating_sub(1));
    for resource in resources.iter().skip(window_start(position, rows)).take(rows) {
        let selected = Some(resource.name()) == state.selected.as_ref();
        let mut line = Line::from(vec![
            Span::styled(format!("{:<24}", resource.name()), value_style(palette)),
            Span::styled(format!("{:<11}", resource.role().label()), value_style(palette)),
            flag_span(resource.state(), palette),
            Span::raw(" "),
            Span::styled(
                format!(
                    "{:>5} {:>5}",
                    resource.volumes().len(),
                    resource.connections().len()
                ),
                label_style(palette),
            ),
        ]);
        line.style = row_style(palette, selected);
        lines.push(line);
    }
    frame.render_widget(Paragraph::new(lines), inner);
}

fn render_detail(area: Rect, frame: &mut ratatui::Frame<'_>, state: &UiState, console: &Console) {
    let palette = &state.palette;
    let directory = console.dispatcher.directory();
    let Some(resource) = state
        .selected
        .as_ref()
        .and_then(|name| directory.resource(name))
    else {
        let block = panel_block("Detail", palette);
        frame.render_widget(
            Paragraph::new(Span::styled("No resource selected", label_style(palette)))
                .block(block),
            area,
        );
        return;
    };
    let block = panel_block(&format!("Resource {}", resource.name()), palette);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let mut lines = Vec::new();
    for (index, row) in detail_rows(state, directory).iter().enumerate() {
        let mut line = match row {
            DetailRow::Resource => {
                let mut spans = vec![
                    Span::styled(format!("{:<28}", resource.name()), value_style(palette)),
                    Span::styled(format!("{:<11}", resource.role().label()), value_style(palette)),
                    flag_span(resource.state(), palette),
                ];
                if resource.has_role_alert() {
                    spans.push(Span::styled(" role unknown", Style::default().fg(palette.alert)));
                }
                if resource.has_quorum_alert() {
                    spans.push(Span::styled(" no quorum", Style::default().fg(palette.alert)));
                }
                Line::from(spans)
            }
            DetailRow::Volume(number) => {
                let Some(volume) = resource.volume(*number) else {
                    continue;
                };
                let minor = if volume.minor() < 0 {
                    "-".to_string()
                } else {
                    volume.minor().to_string()
                };
                let mut spans = vec![
                    Span::styled(format!("  volume {number:<5} minor {minor:<8}"), label_style(palette)),
                    Span::styled(format!("{:<14}", volume.disk_state().label()), value_style(palette)),
                    flag_span(volume.state(), palette),
                ];
                if volume.has_quorum_alert() {
                    spans.push(Span::styled(" no quorum", Style::default().fg(palette.alert)));
                }
                Line::from(spans)
            }
            DetailRow::Connection(name) => {
                let Some(connection) = resource.connection(name) else {
                    continue;
                };
                let node = connection
                    .node_id()
                    .map_or_else(|| "-".to_string(), |id| id.to_string());
                Line::from(vec![
                    Span::styled(format!("  connection {name:<12} node {node:<4}"), label_style(palette)),
                    Span::styled(
                        format!("{:<14}", connection.connection_state().label()),
                        value_style(palette),
                    ),
                    Span::styled(format!("{:<11}", connection.role().label()), value_style(palette)),
                    flag_span(connection.state(), palette),
                ])
            }
            DetailRow::PeerVolume(name, number) => {
                let Some(volume) = resource
                    .connection(name)
                    .and_then(|connection| connection.volume(*number))
                else {
                    continue;
                };
                let mut spans = vec![
                    Span::styled(format!("    peer volume {number:<5}"), label_style(palette)),
                    Span::styled(format!("{:<14}", volume.disk_state().label()), value_style(palette)),
                    Span::styled(
                        format!("{:<15}", volume.replication_state().label()),
                        value_style(palette),
                    ),
                    flag_span(volume.state(), palette),
                ];
                if volume.replication_state().is_resync_target() {
                    let perc = volume.sync_perc();
                    spans.push(Span::styled(
                        format!(" {:>3}.{:02}%", perc / 100, perc % 100),
                        Style::default().fg(palette.mark),
                    ));
                }
                Line::from(spans)
            }
        };
        line.style = row_style(palette, index == state.detail_index);
        lines.push(line);
    }
    let rows = usize::from(inner.height);
    let start = window_start(state.detail_index, rows);
    let visible: Vec<Line> = lines.into_iter().skip(start).take(rows).collect();
    frame.render_widget(Paragraph::new(visible), inner);
}

fn exit_label(task: &TaskSnapshot) -> String {
    match task.state {
        TaskState::Finished if task.exit_status == EXIT_STATUS_NONE => "not run".to_string(),
        TaskState::Finished if task.exit_status < 0 => "failed".to_string(),
        TaskState::Finished => format!("exit {}", task.exit_status),
        _ => String::new(),
    }
}

fn render_tasks(area: Rect, frame: &mut ratatui::Frame<'_>, state: &UiState, console: &Console) {
    let palette = &state.palette;
    let queue = &console.queue;
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(3), Constraint::Length(8)])
        .split(area);

    let titles: Vec<String> = QueueKind::ALL
        .iter()
        .map(|kind| format!("{} ({})", kind.label(), queue.len(*kind)))
        .collect();
    let selected_tab = QueueKind::ALL
        .iter()
        .position(|kind| *kind == state.task_tab)
        .unwrap_or(0);
    frame.render_widget(
        Tabs::new(titles)
            .select(selected_tab)
            .style(label_style(palette))
            .highlight_style(Style::default().fg(palette.accent).add_modifier(Modifier::BOLD)),
        layout[0],
    );

    let block = panel_block(state.task_tab.label(), palette);
    let inner = block.inner(layout[1]);
    frame.render_widget(block, layout[1]);
    let tasks = queue.snapshot(state.task_tab);
    let selected_id = queue.selected_id(state.task_tab);
    let position = tasks
        .iter()
        .position(|task| Some(task.id) == selected_id)
        .unwrap_or(0);
    let rows = usize::from(inner.height.saturating_sub(1));
    let mut lines = vec![Line::from(vec![
        Span::styled(format!("{:>6} ", "ID"), header_style(palette)),
        Span::styled(format!("{:>8} ", "PID"), header_style(palette)),
        Span::styled(format!("{:<10}", "RESULT"), header_style(palette)),
        Span::styled("DESCRIPTION", header_style(palette)),
    ])];
    for task in tasks.iter().skip(window_start(position, rows)).take(rows) {
        let pid = task.pid.map_or_else(|| "-".to_string(), |pid| pid.to_string());
        let result_style = match task.exit_status {
            0 => Style::default().fg(palette.norm),
            EXIT_STATUS_NONE => label_style(palette),
            _ => Style::default().fg(palette.alert),
        };
        let mut line = Line::from(vec![
            Span::styled(format!("{:>6} ", task.id), label_style(palette)),
            Span::styled(format!("{pid:>8} "), label_style(palette)),
            Span::styled(format!("{:<10}", exit_label(task)), result_style),
            Span::styled(task.description.clone(), value_style(palette)),
        ]);
        line.style = row_style(palette, Some(task.id) == selected_id);
        lines.push(line);
    }
    frame.render_widget(Paragraph::new(lines), inner);

    let output_block = panel_block("Output", palette);
    let output = selected_id
        .and_then(|id| {
            let task = tasks.iter().find(|task| task.id == id)?;
            let (stdout, stderr) = queue.task_output(id).unwrap_or_default();
            let mut lines = vec![Line::from(Span::styled(
                task.command.clone(),
                header_style(palette),
            ))];
            lines.extend(
                stdout
                    .lines()
                    .map(|line| Line::from(Span::styled(line.to_string(), value_style(palette)))),
            );
            lines.extend(stderr.lines().map(|line| {
                Line::from(Span::styled(line.to_string(), Style::default().fg(palette.warn)))
            }));
            Some(lines)
        })
        .unwrap_or_default();
    frame.render_widget(
        Paragraph::new(output)
            .block(output_block)
            .wrap(Wrap { trim: false }),
        layout[2],
    );
}

fn render_log(area: Rect, frame: &mut ratatui::Frame<'_>, state: &UiState, console: &Console) {
    let palette = &state.palette;
    let log = console.dispatcher.log();
    let block = panel_block(&format!("Messages ({}/{})", log.len(), log.capacity()), palette);
    let inner = block.inner(area);
    frame.render_widget(block, area);
    let rows = usize::from(inner.height);
    let lines: Vec<Line> = log
        .iter()
        .skip(log.len().saturating_sub(rows))
        .map(|entry| {
            Line::from(vec![
                Span::styled(
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S ").to_string(),
                    label_style(palette),
                ),
                Span::styled(format!("{:<6}", entry.level.label()), palette.level(entry.level)),
                Span::styled(entry.text.clone(), value_style(palette)),
            ])
        })
        .collect();
    frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), inner);
}

fn render_alerts(area: Rect, frame: &mut ratatui::Frame<'_>, state: &UiState) {
    let lines: Vec<Line> = state
        .alerts
        .iter()
        .map(|alert| Line::from(Span::styled(alert.text.clone(), state.palette.level(alert.level))))
        .collect();
    frame.render_widget(Paragraph::new(lines), area);
}

fn render_footer(area: Rect, frame: &mut ratatui::Frame<'_>, state: &UiState) {
    let hint = match state.view {
        View::Tasks => "a activate  s suspend  x/X terminate  r remove  \u{2190}\u{2192} queue  Tab view  q quit",
        View::Log => "m clear  Tab view  w save  R reinit  q quit",
        View::Overview | View::Detail => {
            "\u{2191}\u{2193} select  Enter detail  c commands  p problems  Tab view  w save  q quit"
        }
    };
    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(
            hint,
            Style::default()
                .fg(state.palette.dim)
                .add_modifier(Modifier::DIM),
        ))),
        area,
    );
}

fn render_menu(area: Rect, frame: &mut ratatui::Frame<'_>, menu: &Menu, palette: &Palette) {
    let width = menu
        .items
        .iter()
        .map(|item| item.description().len())
        .max()
        .unwrap_or(20)
        .max(menu.title.len())
        .saturating_add(4)
        .min(usize::from(area.width)) as u16;
    let height = (menu.items.len() as u16 + 2).min(area.height);
    let popup = Rect {
        x: area.x + area.width.saturating_sub(width) / 2,
        y: area.y + area.height.saturating_sub(height) / 2,
        width,
        height,
    };
    let lines: Vec<Line> = menu
        .items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            Line::from(Span::styled(
                item.description().to_string(),
                row_style(palette, index == menu.index),
            ))
        })
        .collect();
    let visible = usize::from(height.saturating_sub(2));
    let start = window_start(menu.index, visible);
    frame.render_widget(Clear, popup);
    frame.render_widget(
        Paragraph::new(lines.into_iter().skip(start).collect::<Vec<_>>())
            .block(panel_block(&menu.title, palette).style(Style::default().bg(COLOR_PROMPT_BG))),
        popup,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;

    #[test]
    fn window_keeps_selection_visible() {
        assert_eq!(window_start(0, 5), 0);
        assert_eq!(window_start(4, 5), 0);
        assert_eq!(window_start(7, 5), 3);
        assert_eq!(window_start(3, 0), 0);
    }

    #[test]
    fn every_view_renders_on_a_small_terminal() {
        let mut dispatcher = EventDispatcher::new();
        for line in [
            "exists resource name:r0 role:Primary",
            "exists device name:r0 volume:0 minor:1 disk:UpToDate",
            "exists connection name:r0 conn-name:peer connection:Connecting role:Unknown",
            "exists peer-device name:r0 conn-name:peer volume:0 replication:SyncTarget peer-disk:UpToDate done:12.5",
            "exists -",
        ] {
            let _ = dispatcher.process_line(line);
        }
        let config = ConsoleConfig::default();
        let console = Console {
            dispatcher,
            queue: TaskQueue::new(Arc::new(SystemProcessFactory)),
            drbdadm: DrbdAdm::default(),
            config,
            config_path: None,
        };
        let mut state = UiState::new(&console.config);
        resolve_selection(&mut state, console.dispatcher.directory());
        push_alert(&mut state, "hello", LogLevel::Info);

        let mut terminal = Terminal::new(TestBackend::new(60, 12)).expect("terminal");
        for view in View::ALL {
            state.view = view;
            terminal
                .draw(|frame| render_ui(frame.size(), frame, &state, &console))
                .expect("draw");
        }
        open_command_menu(&mut state, &console);
        terminal
            .draw(|frame| render_ui(frame.size(), frame, &state, &console))
            .expect("draw menu");
        let buffer = terminal.backend().buffer().clone();
        let text: String = buffer.content().iter().map(|cell| cell.symbol()).collect();
        assert!(text.contains("Resource r0"));
    }
}
