use crate::audio::AudioEngine;
use crate::core::PlayerCore;
use crate::model::PlaybackStatus;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use std::time::Duration;

const APP_TITLE: &str = "playdeck  ";
const WAVE_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
const PEAK_MAX: u64 = 100;

const BG: Color = Color::Rgb(10, 15, 24);
const PANEL_BG: Color = Color::Rgb(19, 29, 43);
const PANEL_ALT_BG: Color = Color::Rgb(24, 38, 58);
const BORDER: Color = Color::Rgb(69, 121, 176);
const TEXT: Color = Color::Rgb(214, 228, 248);
const MUTED: Color = Color::Rgb(149, 173, 204);
const ACCENT: Color = Color::Rgb(100, 203, 184);
const ALERT: Color = Color::Rgb(249, 174, 88);
const SELECTED_BG: Color = Color::Rgb(34, 55, 82);

/// What the footer shows besides the engine message.
pub struct PromptView<'a> {
    pub buffer: &'a str,
}

struct Regions {
    header: Rect,
    now_playing: Rect,
    timeline: Rect,
    waveform: Rect,
    playlist: Option<Rect>,
    footer: Rect,
}

fn regions(area: Rect, playlist_visible: bool) -> Regions {
    let constraints = if playlist_visible {
        vec![
            Constraint::Length(3),
            Constraint::Length(4),
            Constraint::Length(3),
            Constraint::Length(5),
            Constraint::Min(4),
            Constraint::Length(3),
        ]
    } else {
        vec![
            Constraint::Length(3),
            Constraint::Length(4),
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(3),
        ]
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    if playlist_visible {
        Regions {
            header: chunks[0],
            now_playing: chunks[1],
            timeline: chunks[2],
            waveform: chunks[3],
            playlist: Some(chunks[4]),
            footer: chunks[5],
        }
    } else {
        Regions {
            header: chunks[0],
            now_playing: chunks[1],
            timeline: chunks[2],
            waveform: chunks[3],
            playlist: None,
            footer: chunks[4],
        }
    }
}

/// Outer rectangle of the playlist panel, border included. Used for mouse hit-testing.
pub fn playlist_rect(area: Rect, playlist_visible: bool) -> Option<Rect> {
    regions(area, playlist_visible).playlist
}

/// Maps a terminal row inside the playlist panel to a track index, or to
/// `len` when the row is below the last track.
pub fn playlist_row_at(rect: Rect, row: u16, offset: usize, len: usize) -> Option<usize> {
    let top = rect.y.saturating_add(1);
    let bottom = rect.y.saturating_add(rect.height).saturating_sub(1);
    if row < top || row >= bottom {
        return None;
    }
    let index = offset + usize::from(row - top);
    Some(index.min(len))
}

pub fn draw<A: AudioEngine>(
    frame: &mut Frame,
    core: &PlayerCore<A>,
    cursor: usize,
    list_state: &mut ListState,
    prompt: Option<PromptView<'_>>,
) {
    frame.render_widget(Block::default().style(Style::default().bg(BG)), frame.area());
    let regions = regions(frame.area(), core.playlist_visible());

    draw_header(frame, core, regions.header);
    draw_now_playing(frame, core, regions.now_playing);

    let timeline = Paragraph::new(Span::styled(
        timeline_line(core, 32, 12),
        Style::default().fg(TEXT),
    ))
    .block(panel_block("Timeline", PANEL_BG));
    frame.render_widget(timeline, regions.timeline);

    draw_waveform(frame, core, regions.waveform);

    if let Some(area) = regions.playlist {
        draw_playlist(frame, core, cursor, list_state, area);
    }

    let footer = match prompt {
        Some(prompt) => Paragraph::new(Line::from(vec![
            Span::styled(":", Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)),
            Span::styled(prompt.buffer, Style::default().fg(TEXT)),
            Span::styled("_", Style::default().fg(MUTED)),
        ])),
        None => {
            let style = if core.status() == PlaybackStatus::Error {
                Style::default().fg(ALERT)
            } else {
                Style::default().fg(TEXT)
            };
            Paragraph::new(Line::from(vec![
                Span::styled(core.message.as_str(), style),
                Span::styled("  |  ", Style::default().fg(MUTED)),
                Span::styled(
                    "space play  s stop  n/b next/prev  z shuffle  p playlist  : command  q quit",
                    Style::default().fg(MUTED),
                ),
            ]))
        }
    };
    frame.render_widget(footer.block(panel_block("Message", PANEL_BG)), regions.footer);
}

fn draw_header<A: AudioEngine>(frame: &mut Frame, core: &PlayerCore<A>, area: Rect) {
    let mut spans = vec![
        Span::styled(APP_TITLE, Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)),
        Span::styled(core.status().label(), status_style(core.status())),
        Span::styled("  |  ", Style::default().fg(MUTED)),
        Span::styled(
            format!("Tracks {}", core.catalog().len()),
            Style::default().fg(TEXT),
        ),
    ];
    if core.shuffle_active() {
        spans.push(Span::styled("  |  ", Style::default().fg(MUTED)));
        spans.push(Span::styled("Shuffle", Style::default().fg(ALERT)));
    }
    if core.is_muted() {
        spans.push(Span::styled("  |  ", Style::default().fg(MUTED)));
        spans.push(Span::styled("Muted", Style::default().fg(ALERT)));
    }
    if let Some(output) = core.audio().output_name() {
        spans.push(Span::styled("  |  ", Style::default().fg(MUTED)));
        spans.push(Span::styled(output, Style::default().fg(MUTED)));
    }

    frame.render_widget(
        Paragraph::new(Line::from(spans)).block(panel_block("Status", PANEL_BG)),
        area,
    );
}

fn status_style(status: PlaybackStatus) -> Style {
    match status {
        PlaybackStatus::Playing => Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        PlaybackStatus::Paused => Style::default().fg(TEXT),
        PlaybackStatus::Stopped => Style::default().fg(MUTED),
        PlaybackStatus::Error => Style::default().fg(ALERT).add_modifier(Modifier::BOLD),
    }
}

fn draw_now_playing<A: AudioEngine>(frame: &mut Frame, core: &PlayerCore<A>, area: Rect) {
    let subtitle = core
        .loaded_track()
        .and_then(|track| track.subtitle())
        .unwrap_or_default();
    let position = core
        .catalog()
        .current_index()
        .map(|index| format!("{}/{}", index + 1, core.catalog().len()))
        .unwrap_or_else(|| format!("-/{}", core.catalog().len()));

    let lines = vec![
        Line::from(vec![
            Span::styled(
                core.now_playing_title(),
                Style::default().fg(TEXT).add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("  {position}"), Style::default().fg(MUTED)),
        ]),
        Line::from(Span::styled(subtitle, Style::default().fg(MUTED))),
    ];
    frame.render_widget(
        Paragraph::new(lines).block(panel_block("Now Playing", PANEL_ALT_BG)),
        area,
    );
}

fn draw_waveform<A: AudioEngine>(frame: &mut Frame, core: &PlayerCore<A>, area: Rect) {
    let block = panel_block("Waveform", PANEL_BG);
    let inner = block.inner(area);
    let width = usize::from(inner.width);

    let ratio = playback_ratio(core.position_seconds(), core.duration_seconds());
    let line = match core.waveform() {
        Some(peaks) if !peaks.is_empty() => waveform_line(&resample_peaks(peaks, width), ratio),
        _ => Line::from(Span::styled("─".repeat(width), Style::default().fg(MUTED))),
    };

    let rows = usize::from(inner.height.max(1));
    let padding = rows.saturating_sub(1) / 2;
    let mut lines = vec![Line::from(""); padding];
    lines.push(line);
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn waveform_line(columns: &[u64], ratio: Option<f64>) -> Line<'static> {
    let played = (ratio.unwrap_or(0.0) * columns.len() as f64).round() as usize;
    let spans = columns
        .iter()
        .enumerate()
        .map(|(column, peak)| {
            let color = if column < played { ACCENT } else { MUTED };
            Span::styled(wave_glyph(*peak).to_string(), Style::default().fg(color))
        })
        .collect::<Vec<_>>();
    Line::from(spans)
}

fn wave_glyph(peak: u64) -> char {
    let level = (peak.min(PEAK_MAX) as usize * (WAVE_LEVELS.len() - 1)) / PEAK_MAX as usize;
    WAVE_LEVELS[level]
}

/// Stretches or squeezes the peak buckets to `width` columns, keeping the loudest
/// bucket of each span.
pub fn resample_peaks(peaks: &[u64], width: usize) -> Vec<u64> {
    if peaks.is_empty() || width == 0 {
        return Vec::new();
    }
    (0..width)
        .map(|column| {
            let start = column * peaks.len() / width;
            let end = ((column + 1) * peaks.len() / width).max(start + 1);
            peaks[start..end.min(peaks.len())]
                .iter()
                .copied()
                .max()
                .unwrap_or(0)
        })
        .collect()
}

fn draw_playlist<A: AudioEngine>(
    frame: &mut Frame,
    core: &PlayerCore<A>,
    cursor: usize,
    list_state: &mut ListState,
    area: Rect,
) {
    let current = core.catalog().current_index();
    let items: Vec<ListItem> = core
        .catalog()
        .tracks()
        .iter()
        .enumerate()
        .map(|(index, track)| {
            let marker = if Some(index) == current { "> " } else { "  " };
            let mut style = if Some(index) == current {
                Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(TEXT)
            };
            if core.selection().contains(index) {
                style = style.bg(SELECTED_BG);
            }
            let duration = track
                .duration_seconds
                .map(|seconds| format_duration(Duration::from_secs_f64(seconds)))
                .unwrap_or_else(|| String::from("--:--"));
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(MUTED)),
                Span::styled(format!("{:>3}. ", index + 1), Style::default().fg(MUTED)),
                Span::styled(track.title.as_str(), style),
                Span::styled(format!("  {duration}"), Style::default().fg(MUTED)),
            ]))
        })
        .collect();

    let len = core.catalog().len();
    list_state.select((len > 0).then(|| cursor.min(len - 1)));

    let title = if core.shuffle_active() {
        String::from("Playlist (shuffled)")
    } else {
        String::from("Playlist")
    };
    let list = List::new(items)
        .block(panel_block(&title, PANEL_BG))
        .highlight_style(Style::default().add_modifier(Modifier::UNDERLINED))
        .highlight_symbol("-> ");
    frame.render_stateful_widget(list, area, list_state);
}

fn panel_block(title: &str, bg: Color) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(TEXT).add_modifier(Modifier::BOLD),
        ))
        .border_style(Style::default().fg(BORDER))
        .style(Style::default().bg(bg))
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    format!("{minutes:02}:{seconds:02}")
}

fn progress_bar(ratio: Option<f64>, width: usize) -> String {
    let clamped = ratio.unwrap_or(0.0).clamp(0.0, 1.0);
    let filled = (clamped * width as f64).round() as usize;
    let mut bar = String::with_capacity(width + 2);
    bar.push('[');
    bar.push_str(&"#".repeat(filled));
    bar.push_str(&"-".repeat(width.saturating_sub(filled)));
    bar.push(']');
    bar
}

fn playback_ratio(position_seconds: f64, duration_seconds: Option<f64>) -> Option<f64> {
    duration_seconds
        .filter(|total| *total > 0.0)
        .map(|total| (position_seconds / total).clamp(0.0, 1.0))
}

fn timeline_line<A: AudioEngine>(
    core: &PlayerCore<A>,
    timeline_bar_width: usize,
    volume_bar_width: usize,
) -> String {
    let elapsed = core.position_seconds().max(0.0);
    let total = core.duration_seconds();
    let ratio = playback_ratio(elapsed, total);

    // Level applied to the output, zero while muted.
    let volume = core.audio().volume();
    format!(
        "{} / {} {}  |  Vol {} {:>3}%",
        format_duration(Duration::from_secs_f64(elapsed)),
        total
            .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
            .map(|seconds| format_duration(Duration::from_secs_f64(seconds)))
            .unwrap_or_else(|| String::from("--:--")),
        progress_bar(ratio, timeline_bar_width),
        progress_bar(Some(f64::from(volume)), volume_bar_width),
        (volume * 100.0).round() as u16
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00");
        assert_eq!(format_duration(Duration::from_secs_f64(125.9)), "02:05");
    }

    #[test]
    fn progress_bar_clamps_ratio() {
        assert_eq!(progress_bar(Some(0.5), 4), "[##--]");
        assert_eq!(progress_bar(Some(7.0), 3), "[###]");
        assert_eq!(progress_bar(None, 2), "[--]");
    }

    #[test]
    fn resampling_keeps_loudest_peak_per_column() {
        assert_eq!(resample_peaks(&[1, 9, 3, 4], 2), vec![9, 4]);
        assert_eq!(resample_peaks(&[5, 7], 4), vec![5, 5, 7, 7]);
        assert!(resample_peaks(&[], 10).is_empty());
    }

    #[test]
    fn wave_glyphs_span_the_full_range() {
        assert_eq!(wave_glyph(0), '▁');
        assert_eq!(wave_glyph(100), '█');
        assert_eq!(wave_glyph(1_000), '█');
    }

    #[test]
    fn playlist_rows_map_to_indices() {
        let rect = Rect::new(0, 10, 40, 6);
        assert_eq!(playlist_row_at(rect, 10, 0, 3), None);
        assert_eq!(playlist_row_at(rect, 11, 0, 3), Some(0));
        assert_eq!(playlist_row_at(rect, 12, 2, 10), Some(3));
        assert_eq!(playlist_row_at(rect, 14, 0, 2), Some(2));
        assert_eq!(playlist_row_at(rect, 15, 0, 3), None);
    }

    #[test]
    fn hidden_playlist_has_no_rect() {
        let area = Rect::new(0, 0, 80, 40);
        assert!(playlist_rect(area, false).is_none());
        let rect = playlist_rect(area, true).expect("visible playlist");
        assert!(rect.height >= 4);
    }

    #[test]
    fn timeline_shows_the_applied_volume() {
        let mut core = PlayerCore::from_persisted(
            crate::audio::NullAudioEngine::new(),
            crate::model::PersistedState::default(),
        );
        core.set_volume(0.5);
        assert!(timeline_line(&core, 8, 4).ends_with(" 50%"));

        core.toggle_mute();
        assert!(timeline_line(&core, 8, 4).ends_with("  0%"));
        core.toggle_mute();
        assert!(timeline_line(&core, 8, 4).ends_with(" 50%"));
    }
}
