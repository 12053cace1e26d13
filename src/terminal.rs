// SPDX-License-Identifier: GPL-3.0-only

//! Terminal-based pipeline viewer
//!
//! Runs the pipeline against a headless screen sized to the terminal and
//! renders the presented screen using Unicode half-block characters for
//! improved vertical resolution.

use crate::cli::{default_snapshot_dir, snapshot_file_name, start_pipeline};
use edgecam::Config;
use edgecam::backends::camera::{DisplayMetrics, SensorRotation, Size};
use edgecam::pipeline::{PipelineEvent, PipelineHandle, RendererStatus, ScreenSnapshot};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal, backend::CrosstermBackend, buffer::Buffer, layout::Rect, style::Color,
    widgets::Widget,
};
use std::io::{self, stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Threshold change per key press
const THRESHOLD_STEP: i32 = 5;

/// How often the status bar asks the render thread for a status
const STATUS_INTERVAL: Duration = Duration::from_millis(500);

/// Run the terminal viewer
pub fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let result = run_app(&mut terminal, config);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

/// Pixel size of the screen behind a terminal of `columns` x `rows` cells,
/// one row reserved for the status bar
fn surface_size(columns: u16, rows: u16) -> Size {
    Size::new(columns.max(1) as u32, rows.saturating_sub(1).max(1) as u32 * 2)
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let area = terminal.size()?;
    let size = surface_size(area.width, area.height);
    let display = DisplayMetrics::new(size, SensorRotation::None);

    let handle = start_pipeline(config, display, false)?;
    handle.surface_created(size);
    info!(%size, "Terminal viewer started");

    let mut frame_widget = FrameWidget::new();
    let mut enabled = true;
    let mut visible = true;
    let mut show_help = false;
    let mut notice: Option<String> = None;
    let mut status: Option<RendererStatus> = None;
    let mut last_status: Option<Instant> = None;

    loop {
        while let Some(event) = handle.try_event() {
            notice = Some(describe_event(&event));
        }

        if last_status.is_none_or(|at| at.elapsed() >= STATUS_INTERVAL) {
            status = handle.status().ok();
            last_status = Some(Instant::now());
        }

        match handle.snapshot() {
            Ok(snapshot) => frame_widget.update(snapshot),
            Err(e) => error!(error = %e, "Failed to read the screen"),
        }

        let status_message = if show_help {
            build_help_message()
        } else {
            build_status_message(status.as_ref(), notice.as_deref())
        };

        // Draw
        terminal.draw(|f| {
            let area = f.area();

            // Reserve bottom line for status
            let screen_area = Rect {
                x: area.x,
                y: area.y,
                width: area.width,
                height: area.height.saturating_sub(1),
            };

            f.render_widget(&frame_widget, screen_area);

            // Render status bar
            let status_area = Rect {
                x: area.x,
                y: area.height.saturating_sub(1),
                width: area.width,
                height: 1,
            };

            let status = StatusBar {
                message: &status_message,
            };
            f.render_widget(status, status_area);
        })?;

        // Handle input with timeout for frame updates
        if !event::poll(Duration::from_millis(33))? {
            continue;
        }
        match event::read()? {
            Event::Resize(columns, rows) => {
                handle.surface_changed(surface_size(columns, rows));
            }
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                // Ctrl+C to quit
                if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
                    break;
                }

                match key.code {
                    KeyCode::Char('q') => break,
                    KeyCode::Char('e') => {
                        enabled = !enabled;
                        handle.set_enabled(enabled);
                        notice = Some(format!("Enabled: {}", enabled));
                    }
                    KeyCode::Char('v') => {
                        visible = !visible;
                        handle.set_visible(visible);
                        notice = Some(format!("Visible: {}", visible));
                    }
                    KeyCode::Char('+') | KeyCode::Char('=') => {
                        let value = handle.set_threshold(handle.threshold() + THRESHOLD_STEP);
                        notice = Some(format!("Threshold: {}", value));
                    }
                    KeyCode::Char('-') => {
                        let value = handle.set_threshold(handle.threshold() - THRESHOLD_STEP);
                        notice = Some(format!("Threshold: {}", value));
                    }
                    KeyCode::Char('p') => {
                        show_help = false;
                        notice = Some(match save_snapshot(&handle) {
                            Ok(path) => format!("Saved: {}", path.display()),
                            Err(e) => {
                                error!("Failed to save snapshot: {}", e);
                                format!("Error: {}", e)
                            }
                        });
                    }
                    KeyCode::Char('h') => show_help = !show_help,
                    _ => {}
                }
            }
            _ => {}
        }
    }

    handle.shutdown();
    Ok(())
}

fn describe_event(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::Started { preview } => format!("Started at {}", preview),
        PipelineEvent::Stopped => "Stopped".to_string(),
        PipelineEvent::Error { category, message } => format!("{:?}: {}", category, message),
    }
}

fn build_status_message(status: Option<&RendererStatus>, notice: Option<&str>) -> String {
    let mut msg = match status {
        Some(status) => format!(
            "{} | preview {} | thr {} | {:.1} fps | dropped {}",
            if status.started { "running" } else { "stopped" },
            status
                .preview
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            status.threshold,
            status.processing_fps,
            status.dispatch.dropped,
        ),
        None => "starting".to_string(),
    };
    if let Some(notice) = notice {
        msg.push_str(" | ");
        msg.push_str(notice);
    }
    msg.push_str(" | 'h' help");
    msg
}

fn build_help_message() -> String {
    "e: Enable/disable | v: Show/hide | +/-: Threshold | p: Snapshot | h: Toggle help | q/Ctrl+C: Quit"
        .to_string()
}

/// Save the presented screen as a PNG snapshot
fn save_snapshot(handle: &PipelineHandle) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let snapshot = handle.snapshot()?;
    let dir = default_snapshot_dir();
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(snapshot_file_name());
    snapshot.save_png(&path)?;
    Ok(path)
}

/// Widget that renders the presented screen using half-block characters
struct FrameWidget {
    snapshot: Option<ScreenSnapshot>,
}

impl FrameWidget {
    fn new() -> Self {
        Self { snapshot: None }
    }

    fn update(&mut self, snapshot: ScreenSnapshot) {
        self.snapshot = Some(snapshot);
    }
}

impl Widget for &FrameWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let Some(snapshot) = self.snapshot.as_ref().filter(|s| !s.size.is_empty()) else {
            // No frame yet - show placeholder
            let msg = "Waiting for camera...";
            let x = area.x + (area.width.saturating_sub(msg.len() as u16)) / 2;
            let y = area.y + area.height / 2;
            if y < area.y + area.height && x < area.x + area.width {
                buf.set_string(x, y, msg, ratatui::style::Style::default());
            }
            return;
        };

        // The screen is sized to the terminal, but a resize may be in flight
        let size = snapshot.size;
        let display_width = area.width.min(size.width as u16);
        let display_height = area.height.min((size.height / 2) as u16);

        let x_scale = size.width as f64 / display_width.max(1) as f64;
        let y_scale = size.height as f64 / (display_height.max(1) * 2) as f64;

        // Each terminal cell represents 2 vertical pixels:
        // - Upper half (▀) colored with fg
        // - Lower half colored with bg
        for ty in 0..display_height {
            for tx in 0..display_width {
                let src_x = (tx as f64 * x_scale) as u32;
                let src_y_top = (ty as f64 * 2.0 * y_scale) as u32;
                let src_y_bottom = ((ty as f64 * 2.0 + 1.0) * y_scale) as u32;

                if let Some(cell) = buf.cell_mut((area.x + tx, area.y + ty)) {
                    cell.set_char('▀');
                    cell.set_fg(sample_pixel(snapshot, src_x, src_y_top));
                    cell.set_bg(sample_pixel(snapshot, src_x, src_y_bottom));
                }
            }
        }
    }
}

fn sample_pixel(snapshot: &ScreenSnapshot, x: u32, y: u32) -> Color {
    let x = x.min(snapshot.size.width - 1);
    let y = y.min(snapshot.size.height - 1);
    let idx = (y as usize * snapshot.size.width as usize + x as usize) * 4;
    match snapshot.rgba.get(idx..idx + 3) {
        Some(&[r, g, b]) => Color::Rgb(r, g, b),
        _ => Color::Black,
    }
}

/// Status bar widget
struct StatusBar<'a> {
    message: &'a str,
}

impl Widget for StatusBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        // Fill background
        for x in area.x..area.x + area.width {
            if let Some(cell) = buf.cell_mut((x, area.y)) {
                cell.set_char(' ');
                cell.set_bg(Color::DarkGray);
            }
        }

        // Render text
        let text: String = self.message.chars().take(area.width as usize).collect();

        buf.set_string(
            area.x,
            area.y,
            text,
            ratatui::style::Style::default()
                .fg(Color::White)
                .bg(Color::DarkGray),
        );
    }
}
