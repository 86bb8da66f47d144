//! Client colour capability and the palettes built from it.
//!
//! Everything here is derived from what the SSH client reports (`TERM` from the
//! PTY request, `COLORTERM` from an env request). The server's own terminal and
//! environment are never consulted.

use clap::ValueEnum;
use ratatui::prelude::{Color, Modifier, Style};

/// Colour depth supported by the client terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ColorProfile {
    /// No colour support, or nothing known about the client.
    Ascii,
    /// The 16 basic ANSI colours.
    Ansi,
    /// The xterm 256 colour palette.
    Ansi256,
    /// 24-bit colour.
    TrueColor,
}

impl ColorProfile {
    pub fn detect(term: Option<&str>, colorterm: Option<&str>) -> Self {
        let term = term.unwrap_or_default().trim().to_ascii_lowercase();
        if term.is_empty() || term == "dumb" {
            return ColorProfile::Ascii;
        }

        let colorterm = colorterm.unwrap_or_default().trim().to_ascii_lowercase();
        match colorterm.as_str() {
            "truecolor" | "24bit" => return ColorProfile::TrueColor,
            "yes" | "true" => return ColorProfile::Ansi256,
            _ => {}
        }

        match term.as_str() {
            "xterm-kitty" | "wezterm" | "xterm-ghostty" | "alacritty" => {
                return ColorProfile::TrueColor
            }
            "linux" => return ColorProfile::Ansi,
            _ => {}
        }

        if term.contains("truecolor") || term.contains("24bit") || term.contains("direct") {
            ColorProfile::TrueColor
        } else if term.contains("256color") {
            ColorProfile::Ansi256
        } else if term.contains("color") || term.contains("ansi") {
            ColorProfile::Ansi
        } else {
            ColorProfile::Ascii
        }
    }

    pub fn is_color_capable(self) -> bool {
        self != ColorProfile::Ascii
    }

    /// Degrade a colour to something this profile can display.
    pub fn adapt(self, color: Color) -> Option<Color> {
        match (self, color) {
            (_, Color::Reset) => Some(Color::Reset),
            (ColorProfile::Ascii, _) => None,
            (ColorProfile::TrueColor, color) => Some(color),
            (ColorProfile::Ansi256, Color::Rgb(r, g, b)) => Some(Color::Indexed(rgb_to_ansi256(r, g, b))),
            (ColorProfile::Ansi256, color) => Some(color),
            (ColorProfile::Ansi, Color::Rgb(r, g, b)) => Some(nearest_basic(r, g, b)),
            (ColorProfile::Ansi, Color::Indexed(index)) => {
                let (r, g, b) = ansi256_to_rgb(index);
                Some(nearest_basic(r, g, b))
            }
            (ColorProfile::Ansi, color) => Some(color),
        }
    }

    /// Apply [`ColorProfile::adapt`] to both colours of a style. Modifiers survive.
    pub fn adapt_style(self, style: Style) -> Style {
        Style {
            fg: style.fg.and_then(|color| self.adapt(color)),
            bg: style.bg.and_then(|color| self.adapt(color)),
            ..style
        }
    }
}

/// How the markdown palette is chosen for a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum StylePolicy {
    /// Dark palette with the body text and plain code text left in the
    /// client's own foreground colour.
    #[default]
    NoColorOverride,
    /// Dark palette exactly as defined, including body and code text colours.
    #[value(name = "auto")]
    Automatic,
}

/// How fenced code blocks are coloured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeColors {
    /// No highlighting at all.
    None,
    /// Highlighted, but tokens in the theme's default colour and the theme
    /// background are left to the client.
    Neutral,
    /// Highlighted with the theme's colours, background included.
    Themed,
}

/// Semantic styles used by the markdown renderer and the session view.
#[derive(Clone, Debug, PartialEq)]
pub struct Palette {
    pub text: Style,
    pub headings: [Style; 3],
    pub decoration: Style,
    pub link: Style,
    pub link_target: Style,
    pub inline_code: Style,
    pub code_fallback: Style,
    pub image: Style,
    pub table_header: Style,
    pub border: Style,
    pub status: Style,
    pub code: CodeColors,
}

impl Palette {
    pub fn dark() -> Self {
        Self {
            text: Style::default().fg(Color::Indexed(252)),
            headings: [
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
                Style::default()
                    .fg(Color::LightMagenta)
                    .add_modifier(Modifier::BOLD),
                Style::default()
                    .fg(Color::LightCyan)
                    .add_modifier(Modifier::BOLD),
            ],
            decoration: Style::default().fg(Color::DarkGray),
            link: Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::UNDERLINED),
            link_target: Style::default().fg(Color::Indexed(30)),
            inline_code: Style::default()
                .fg(Color::LightYellow)
                .add_modifier(Modifier::BOLD),
            code_fallback: Style::default().fg(Color::LightGreen),
            image: Style::default().fg(Color::LightBlue),
            table_header: Style::default().fg(Color::Yellow),
            border: Style::default().fg(Color::Indexed(62)),
            status: Style::default().fg(Color::Gray),
            code: CodeColors::Themed,
        }
    }

    /// Modifiers only: bold headings, underlined links, no colour anywhere.
    pub fn plain() -> Self {
        let bold = Style::default().add_modifier(Modifier::BOLD);
        Self {
            text: Style::default(),
            headings: [bold, bold, bold],
            decoration: Style::default(),
            link: Style::default().add_modifier(Modifier::UNDERLINED),
            link_target: Style::default(),
            inline_code: bold,
            code_fallback: Style::default(),
            image: Style::default(),
            table_header: bold,
            border: Style::default(),
            status: Style::default(),
            code: CodeColors::None,
        }
    }

    pub fn select(policy: StylePolicy, profile: ColorProfile) -> Self {
        if !profile.is_color_capable() {
            return Self::plain();
        }

        let mut palette = Self::dark();
        if policy == StylePolicy::NoColorOverride {
            palette.text = Style::default();
            palette.code_fallback = Style::default();
            palette.code = CodeColors::Neutral;
        }
        palette.adapted(profile)
    }

    fn adapted(self, profile: ColorProfile) -> Self {
        let adapt = |style: Style| profile.adapt_style(style);
        Self {
            text: adapt(self.text),
            headings: self.headings.map(adapt),
            decoration: adapt(self.decoration),
            link: adapt(self.link),
            link_target: adapt(self.link_target),
            inline_code: adapt(self.inline_code),
            code_fallback: adapt(self.code_fallback),
            image: adapt(self.image),
            table_header: adapt(self.table_header),
            border: adapt(self.border),
            status: adapt(self.status),
            code: self.code,
        }
    }

    pub fn heading(&self, level: u8) -> Style {
        let index = usize::from(level.clamp(1, 3)) - 1;
        self.headings[index]
    }
}

const CUBE_LEVELS: [u8; 6] = [0, 95, 135, 175, 215, 255];

const BASIC_RGB: [(u8, u8, u8); 16] = [
    (0, 0, 0),
    (205, 0, 0),
    (0, 205, 0),
    (205, 205, 0),
    (0, 0, 238),
    (205, 0, 205),
    (0, 205, 205),
    (229, 229, 229),
    (127, 127, 127),
    (255, 0, 0),
    (0, 255, 0),
    (255, 255, 0),
    (92, 92, 255),
    (255, 0, 255),
    (0, 255, 255),
    (255, 255, 255),
];

const BASIC_COLORS: [Color; 16] = [
    Color::Black,
    Color::Red,
    Color::Green,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
    Color::Gray,
    Color::DarkGray,
    Color::LightRed,
    Color::LightGreen,
    Color::LightYellow,
    Color::LightBlue,
    Color::LightMagenta,
    Color::LightCyan,
    Color::White,
];

fn distance(a: (u8, u8, u8), b: (u8, u8, u8)) -> u32 {
    let dr = i32::from(a.0) - i32::from(b.0);
    let dg = i32::from(a.1) - i32::from(b.1);
    let db = i32::from(a.2) - i32::from(b.2);
    (dr * dr + dg * dg + db * db).unsigned_abs()
}

fn cube_index(value: u8) -> u8 {
    if value < 48 {
        0
    } else if value < 115 {
        1
    } else {
        (value - 35) / 40
    }
}

fn rgb_to_ansi256(r: u8, g: u8, b: u8) -> u8 {
    let (ri, gi, bi) = (cube_index(r), cube_index(g), cube_index(b));
    let cube = (
        CUBE_LEVELS[usize::from(ri)],
        CUBE_LEVELS[usize::from(gi)],
        CUBE_LEVELS[usize::from(bi)],
    );
    let cube_color = 16 + 36 * ri + 6 * gi + bi;

    let average = (u16::from(r) + u16::from(g) + u16::from(b)) / 3;
    let gray_step = if average > 238 {
        23
    } else {
        average.saturating_sub(3) / 10
    };
    // gray_step is at most 23, so these fit in u8.
    let gray_level = (8 + 10 * gray_step) as u8;
    let gray_color = 232 + gray_step as u8;

    let gray = (gray_level, gray_level, gray_level);
    if distance((r, g, b), gray) < distance((r, g, b), cube) {
        gray_color
    } else {
        cube_color
    }
}

fn ansi256_to_rgb(index: u8) -> (u8, u8, u8) {
    match index {
        0..=15 => BASIC_RGB[usize::from(index)],
        16..=231 => {
            let offset = index - 16;
            (
                CUBE_LEVELS[usize::from(offset / 36)],
                CUBE_LEVELS[usize::from((offset / 6) % 6)],
                CUBE_LEVELS[usize::from(offset % 6)],
            )
        }
        232..=255 => {
            let level = 8 + 10 * (index - 232);
            (level, level, level)
        }
    }
}

fn nearest_basic(r: u8, g: u8, b: u8) -> Color {
    let mut best = 0;
    let mut best_distance = u32::MAX;
    for (idx, candidate) in BASIC_RGB.iter().enumerate() {
        let d = distance((r, g, b), *candidate);
        if d < best_distance {
            best = idx;
            best_distance = d;
        }
    }
    BASIC_COLORS[best]
}
