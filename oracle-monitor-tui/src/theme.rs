use ratatui::style::{Color, Modifier, Style};

/// Colour palette of one display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub background: Color,
    pub foreground: Color,
    pub muted: Color,
    pub title: Color,
    pub border: Color,
    pub positive: Color,
    pub negative: Color,
    pub neutral: Color,
    pub pinned: Color,
    pub highlight: Color,
    /// Line colours of the chart series, cycled
    pub series: [Color; 5],
}

impl Theme {
    pub const DARK: Theme = Theme {
        background: Color::Rgb(18, 18, 28),
        foreground: Color::Rgb(220, 220, 230),
        muted: Color::Rgb(128, 128, 128),
        title: Color::Rgb(255, 215, 0),
        border: Color::Rgb(138, 43, 226),
        positive: Color::Rgb(0, 255, 127),
        negative: Color::Rgb(255, 69, 58),
        neutral: Color::Rgb(100, 149, 237),
        pinned: Color::Rgb(255, 165, 0),
        highlight: Color::Rgb(48, 48, 72),
        series: [
            Color::Rgb(255, 215, 0),
            Color::Rgb(0, 191, 255),
            Color::Rgb(255, 105, 180),
            Color::Rgb(124, 252, 0),
            Color::Rgb(186, 85, 211),
        ],
    };

    pub const LIGHT: Theme = Theme {
        background: Color::Rgb(250, 250, 245),
        foreground: Color::Rgb(30, 30, 40),
        muted: Color::Rgb(120, 120, 120),
        title: Color::Rgb(120, 60, 0),
        border: Color::Rgb(90, 90, 160),
        positive: Color::Rgb(0, 140, 70),
        negative: Color::Rgb(200, 30, 30),
        neutral: Color::Rgb(40, 90, 180),
        pinned: Color::Rgb(200, 100, 0),
        highlight: Color::Rgb(220, 225, 240),
        series: [
            Color::Rgb(160, 110, 0),
            Color::Rgb(0, 110, 190),
            Color::Rgb(190, 40, 120),
            Color::Rgb(40, 140, 20),
            Color::Rgb(120, 50, 160),
        ],
    };

    pub fn for_mode(dark_mode: bool) -> Self {
        if dark_mode { Self::DARK } else { Self::LIGHT }
    }

    pub fn base(&self) -> Style {
        Style::default().fg(self.foreground).bg(self.background)
    }

    pub fn title_style(&self) -> Style {
        Style::default().fg(self.title).add_modifier(Modifier::BOLD)
    }

    pub fn series_color(&self, index: usize) -> Color {
        self.series[index % self.series.len()]
    }
}
