//! Markdown to styled terminal lines.
//!
//! [`RenderAdapter::render`] is a pure function of the document bytes, the wrap
//! width and the client's colour profile. The syntax and theme sets it holds
//! are loaded once and only ever read.

use pulldown_cmark::{Alignment, CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use ratatui::prelude::{Color, Modifier, Style};
use syntect::easy::HighlightLines;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;
use unicode_width::UnicodeWidthStr;

use crate::error::RenderError;
use crate::style::{CodeColors, ColorProfile, Palette, StylePolicy};
use crate::wrap::wrap_line;

const THEME: &str = "base16-ocean.dark";
const CODE_INDENT: &str = "  ";
const TAB_WIDTH: usize = 4;
const MIN_TABLE_COLUMN: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyledSegment {
    pub text: String,
    pub style: Style,
}

/// One terminal line as styled runs, plus its unstyled text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderedLine {
    pub segments: Vec<StyledSegment>,
    pub plain: String,
}

impl RenderedLine {
    /// Append `text`, merging it into the last run when the style matches.
    pub fn push(&mut self, text: &str, style: Style) {
        if text.is_empty() {
            return;
        }
        self.plain.push_str(text);
        if let Some(last) = self.segments.last_mut().filter(|last| last.style == style) {
            last.text.push_str(text);
            return;
        }
        self.segments.push(StyledSegment {
            text: text.to_owned(),
            style,
        });
    }

    /// Append every run of `other`.
    pub fn extend(&mut self, other: &RenderedLine) {
        for segment in &other.segments {
            self.push(&segment.text, segment.style);
        }
    }

    /// Display width in terminal columns.
    pub fn width(&self) -> usize {
        self.plain.width()
    }

    pub fn is_empty(&self) -> bool {
        self.plain.is_empty()
    }
}

/// A document rendered for one wrap width and one colour profile.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderedText {
    pub lines: Vec<RenderedLine>,
}

impl RenderedText {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The text without styling, one line per rendered line.
    pub fn plain(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.plain.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Blocks that put something in front of every line they contain.
enum Container {
    Quote,
    /// A list item. Lines after the first are indented by the marker width.
    Item { marker_width: usize },
}

/// Inline content that is collected instead of written straight out.
enum Capture {
    Code { lang: String, source: String },
    Image { target: String, alt: String },
}

struct OpenLink {
    target: String,
    text: String,
}

struct TableBuilder {
    alignments: Vec<Alignment>,
    header: Vec<String>,
    body: Vec<Vec<String>>,
    row: Vec<String>,
    cell: Option<String>,
}

impl TableBuilder {
    fn new(alignments: Vec<Alignment>) -> Self {
        Self {
            alignments,
            header: Vec::new(),
            body: Vec::new(),
            row: Vec::new(),
            cell: None,
        }
    }

    fn end_cell(&mut self) {
        if let Some(cell) = self.cell.take() {
            self.row.push(cell.trim().to_owned());
        }
    }

    fn column_widths(&self) -> Vec<usize> {
        let columns = std::iter::once(&self.header)
            .chain(&self.body)
            .map(Vec::len)
            .max()
            .unwrap_or(0);
        let mut widths = vec![MIN_TABLE_COLUMN; columns];
        for row in std::iter::once(&self.header).chain(&self.body) {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.width());
            }
        }
        widths
    }

    fn format_row(&self, row: &[String], widths: &[usize]) -> String {
        let cells: Vec<String> = widths
            .iter()
            .enumerate()
            .map(|(idx, width)| {
                let cell = row.get(idx).map(String::as_str).unwrap_or("");
                let pad = width.saturating_sub(cell.width());
                let (left, right) = match self.alignments.get(idx) {
                    Some(Alignment::Right) => (pad, 0),
                    Some(Alignment::Center) => (pad / 2, pad - pad / 2),
                    _ => (0, pad),
                };
                format!("{}{cell}{}", " ".repeat(left), " ".repeat(right))
            })
            .collect();
        cells.join(" │ ").trim_end().to_owned()
    }
}

/// Syntax highlighting of fenced code with the palette's code colour mode.
struct CodeHighlighter<'a> {
    syntax_set: &'a SyntaxSet,
    theme: &'a Theme,
    colors: CodeColors,
    fallback: Style,
}

impl CodeHighlighter<'_> {
    /// Styled runs for each source line, tabs expanded and line endings
    /// removed.
    fn highlight(&self, lang: &str, source: &str) -> Result<Vec<Vec<(String, Style)>>, RenderError> {
        let expanded = source.replace('\t', &" ".repeat(TAB_WIDTH));
        if self.colors == CodeColors::None {
            return Ok(LinesWithEndings::from(&expanded)
                .map(|line| vec![(strip_eol(line).to_owned(), self.fallback)])
                .collect());
        }

        let syntax = self
            .syntax_set
            .find_syntax_by_token(lang.trim())
            .unwrap_or_else(|| self.syntax_set.find_syntax_plain_text());
        let mut lines = HighlightLines::new(syntax, self.theme);
        let mut out = Vec::new();
        for line in LinesWithEndings::from(&expanded) {
            let runs = lines
                .highlight_line(line, self.syntax_set)?
                .into_iter()
                .map(|(token_style, text)| (strip_eol(text).to_owned(), self.token_style(token_style)))
                .collect();
            out.push(runs);
        }
        Ok(out)
    }

    fn token_style(&self, token: syntect::highlighting::Style) -> Style {
        let rgb = |c: syntect::highlighting::Color| Color::Rgb(c.r, c.g, c.b);
        match self.colors {
            CodeColors::None => self.fallback,
            CodeColors::Themed => Style::default()
                .fg(rgb(token.foreground))
                .bg(rgb(token.background)),
            CodeColors::Neutral if self.theme.settings.foreground == Some(token.foreground) => {
                self.fallback
            }
            CodeColors::Neutral => Style::default().fg(rgb(token.foreground)),
        }
    }
}

fn strip_eol(text: &str) -> &str {
    text.trim_end_matches(['\n', '\r'])
}

fn heading_depth(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Walks the pulldown-cmark event stream and lays out wrapped lines.
struct Renderer<'a> {
    palette: &'a Palette,
    code: CodeHighlighter<'a>,
    width: usize,

    done: Vec<RenderedLine>,
    /// Container prefix of the current line and of its wrapped continuations.
    prefix: RenderedLine,
    continuation: RenderedLine,
    started: bool,
    line: RenderedLine,

    styles: Vec<Style>,
    containers: Vec<Container>,
    /// Next number for each open list; `None` for bullet lists.
    lists: Vec<Option<u64>>,
    /// Marker of the newest list item, written with its first line.
    pending_marker: Option<String>,
    links: Vec<OpenLink>,
    capture: Option<Capture>,
    table: Option<TableBuilder>,
}

impl<'a> Renderer<'a> {
    fn new(palette: &'a Palette, code: CodeHighlighter<'a>, width: usize) -> Self {
        Self {
            palette,
            code,
            width,
            done: Vec::new(),
            prefix: RenderedLine::default(),
            continuation: RenderedLine::default(),
            started: false,
            line: RenderedLine::default(),
            styles: Vec::new(),
            containers: Vec::new(),
            lists: Vec::new(),
            pending_marker: None,
            links: Vec::new(),
            capture: None,
            table: None,
        }
    }

    fn style(&self) -> Style {
        self.styles.last().copied().unwrap_or(self.palette.text)
    }

    fn push_style(&mut self, patch: Style) {
        let style = self.style().patch(patch);
        self.styles.push(style);
    }

    /// Lay down container prefixes once per line.
    fn begin_line(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let last = self.containers.len().saturating_sub(1);
        for idx in 0..self.containers.len() {
            match self.containers[idx] {
                Container::Quote => {
                    self.prefix.push("│ ", self.palette.decoration);
                    self.continuation.push("│ ", self.palette.decoration);
                }
                Container::Item { marker_width } => {
                    let pad = " ".repeat(marker_width);
                    let marker = if idx == last {
                        self.pending_marker.take()
                    } else {
                        None
                    };
                    match marker {
                        Some(marker) => self.prefix.push(&marker, self.palette.decoration),
                        None => self.prefix.push(&pad, Style::default()),
                    }
                    self.continuation.push(&pad, Style::default());
                }
            }
        }
    }

    fn write(&mut self, text: &str, style: Style) {
        self.begin_line();
        self.line.push(text, style);
    }

    /// Finish the current line if anything was written to it.
    fn end_line(&mut self) {
        if self.started || !self.line.is_empty() {
            self.flush();
        }
    }

    /// Finish the current line even when it is empty.
    fn break_line(&mut self) {
        self.flush();
    }

    /// Wrap the body into the room the prefix leaves, repeating the
    /// continuation prefix on every line after the first.
    fn flush(&mut self) {
        let body = std::mem::take(&mut self.line);
        let prefix = std::mem::take(&mut self.prefix);
        let continuation = std::mem::take(&mut self.continuation);
        self.started = false;

        let room = self.width.saturating_sub(prefix.width().max(continuation.width()));
        if room == 0 {
            let mut whole = prefix;
            whole.extend(&body);
            self.done.extend(wrap_line(&whole, self.width));
            return;
        }
        for (idx, part) in wrap_line(&body, room).iter().enumerate() {
            let mut line = if idx == 0 {
                prefix.clone()
            } else {
                continuation.clone()
            };
            line.extend(part);
            self.done.push(line);
        }
    }

    /// One empty line between blocks, never two in a row.
    fn separate(&mut self) {
        self.end_line();
        if self.done.last().is_some_and(|line| !line.is_empty()) {
            self.done.push(RenderedLine::default());
        }
    }

    /// Put a list marker that never got content on a line of its own.
    fn settle_marker(&mut self) {
        if self.pending_marker.is_some() {
            self.begin_line();
            self.end_line();
        }
    }

    fn in_list(&self) -> bool {
        !self.lists.is_empty()
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), RenderError> {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag)?,
            Event::Text(text) => self.text(&text),
            Event::Code(code) => self.inline_code(&code),
            Event::Html(html) | Event::InlineHtml(html) => {
                let mut parts = html.trim_end_matches('\n').split('\n').peekable();
                while let Some(part) = parts.next() {
                    self.text(part);
                    if parts.peek().is_some() {
                        self.hard_break();
                    }
                }
            }
            Event::FootnoteReference(name) => self.text(&format!("[^{name}]")),
            Event::SoftBreak => self.soft_break(),
            Event::HardBreak => self.hard_break(),
            Event::Rule => {
                self.end_line();
                self.begin_line();
                let rule = "─".repeat(self.width.saturating_sub(self.prefix.width()).max(1));
                self.write(&rule, self.palette.decoration);
                self.separate();
            }
            Event::TaskListMarker(done) => {
                let marker = if done { "[✓] " } else { "[ ] " };
                self.write(marker, self.palette.decoration);
            }
            _ => {}
        }
        Ok(())
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading { level, .. } => {
                self.end_line();
                let depth = heading_depth(level);
                let style = self.palette.heading(depth);
                self.styles.push(style);
                self.write(&format!("{} ", "#".repeat(usize::from(depth))), style);
            }
            Tag::BlockQuote(_) => {
                self.end_line();
                self.containers.push(Container::Quote);
            }
            Tag::CodeBlock(kind) => {
                self.end_line();
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => info.split_whitespace().next().unwrap_or("").to_owned(),
                    CodeBlockKind::Indented => String::new(),
                };
                self.capture = Some(Capture::Code {
                    lang,
                    source: String::new(),
                });
            }
            Tag::List(first) => {
                self.settle_marker();
                self.end_line();
                self.lists.push(first);
            }
            Tag::Item => {
                self.settle_marker();
                self.end_line();
                let marker = match self.lists.last_mut() {
                    Some(Some(number)) => {
                        let marker = format!("{number}. ");
                        *number += 1;
                        marker
                    }
                    _ => "• ".to_owned(),
                };
                self.containers.push(Container::Item {
                    marker_width: marker.width(),
                });
                self.pending_marker = Some(marker);
            }
            Tag::FootnoteDefinition(name) => {
                self.end_line();
                self.write(&format!("[^{name}]: "), self.palette.decoration);
            }
            Tag::Table(alignments) => {
                self.end_line();
                self.table = Some(TableBuilder::new(alignments));
            }
            Tag::TableHead | Tag::TableRow => {
                if let Some(table) = self.table.as_mut() {
                    table.row.clear();
                }
            }
            Tag::TableCell => {
                if let Some(table) = self.table.as_mut() {
                    table.cell = Some(String::new());
                }
            }
            Tag::Emphasis => self.push_style(Style::default().add_modifier(Modifier::ITALIC)),
            Tag::Strong => self.push_style(Style::default().add_modifier(Modifier::BOLD)),
            Tag::Strikethrough => {
                self.push_style(Style::default().add_modifier(Modifier::CROSSED_OUT));
            }
            Tag::Link { dest_url, .. } => {
                self.push_style(self.palette.link);
                self.links.push(OpenLink {
                    target: dest_url.into_string(),
                    text: String::new(),
                });
            }
            Tag::Image { dest_url, .. } => {
                self.capture = Some(Capture::Image {
                    target: dest_url.into_string(),
                    alt: String::new(),
                });
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) -> Result<(), RenderError> {
        match tag {
            TagEnd::Paragraph => {
                self.end_line();
                if !self.in_list() {
                    self.separate();
                }
            }
            TagEnd::Heading(_) => {
                self.styles.pop();
                self.separate();
            }
            TagEnd::BlockQuote => {
                self.end_line();
                self.containers.pop();
                self.separate();
            }
            TagEnd::CodeBlock => {
                if let Some(Capture::Code { lang, source }) = self.capture.take() {
                    for runs in self.code.highlight(&lang, &source)? {
                        self.write(CODE_INDENT, Style::default());
                        for (text, style) in runs {
                            self.line.push(&text, style);
                        }
                        self.end_line();
                    }
                }
                if !self.in_list() {
                    self.separate();
                }
            }
            TagEnd::List(_) => {
                self.end_line();
                self.lists.pop();
                if !self.in_list() {
                    self.separate();
                }
            }
            TagEnd::Item => {
                self.end_line();
                self.pending_marker = None;
                self.containers.pop();
            }
            TagEnd::FootnoteDefinition => self.separate(),
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough => {
                self.styles.pop();
            }
            TagEnd::Link => {
                self.styles.pop();
                if let Some(link) = self.links.pop() {
                    let target = link.target.trim();
                    let shown = !target.is_empty()
                        && !target.starts_with('#')
                        && link.text.trim() != target;
                    if shown {
                        self.emit(&format!(" {target}"), self.palette.link_target);
                    }
                }
            }
            TagEnd::Image => {
                if let Some(Capture::Image { target, alt }) = self.capture.take() {
                    let alt = match alt.trim() {
                        "" => "image",
                        alt => alt,
                    };
                    self.emit(&format!("[image: {alt}] {target}"), self.palette.image);
                }
            }
            TagEnd::TableCell => {
                if let Some(table) = self.table.as_mut() {
                    table.end_cell();
                }
            }
            TagEnd::TableHead => {
                if let Some(table) = self.table.as_mut() {
                    table.header = std::mem::take(&mut table.row);
                }
            }
            TagEnd::TableRow => {
                if let Some(table) = self.table.as_mut() {
                    let row = std::mem::take(&mut table.row);
                    table.body.push(row);
                }
            }
            TagEnd::Table => {
                if let Some(table) = self.table.take() {
                    self.table(&table);
                }
                self.separate();
            }
            _ => {}
        }
        Ok(())
    }

    /// Where inline text goes while something is being collected.
    fn captured(&mut self) -> Option<&mut String> {
        match self.capture.as_mut() {
            Some(Capture::Code { source, .. }) => return Some(source),
            Some(Capture::Image { alt, .. }) => return Some(alt),
            None => {}
        }
        self.table.as_mut().and_then(|table| table.cell.as_mut())
    }

    /// Write to the line, or to whatever is collecting inline text.
    fn emit(&mut self, text: &str, style: Style) {
        match self.captured() {
            Some(buf) => buf.push_str(text),
            None => self.write(text, style),
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(link) = self.links.last_mut() {
            link.text.push_str(text);
        }
        let style = self.style();
        self.emit(text, style);
    }

    fn inline_code(&mut self, code: &str) {
        if let Some(link) = self.links.last_mut() {
            link.text.push_str(code);
        }
        self.emit(code, self.palette.inline_code);
    }

    /// Source newlines inside a paragraph are kept as line breaks.
    fn soft_break(&mut self) {
        let in_code = matches!(self.capture, Some(Capture::Code { .. }));
        if let Some(buf) = self.captured() {
            buf.push(if in_code { '\n' } else { ' ' });
            return;
        }
        self.break_line();
        if let Some(link) = self.links.last_mut() {
            link.text.push(' ');
        }
    }

    fn hard_break(&mut self) {
        self.soft_break();
    }

    fn table(&mut self, table: &TableBuilder) {
        let widths = table.column_widths();
        if widths.is_empty() {
            return;
        }
        if !table.header.is_empty() {
            self.write(&table.format_row(&table.header, &widths), self.palette.table_header);
            self.end_line();
            let rule: Vec<String> = widths.iter().map(|width| "─".repeat(*width)).collect();
            self.write(&rule.join("─┼─"), self.palette.decoration);
            self.end_line();
        }
        for row in &table.body {
            self.write(&table.format_row(row, &widths), self.palette.text);
            self.end_line();
        }
    }

    fn finish(mut self) -> Vec<RenderedLine> {
        self.end_line();
        while self.done.last().is_some_and(RenderedLine::is_empty) {
            self.done.pop();
        }
        if self.done.is_empty() {
            self.done.push(RenderedLine::default());
        }
        self.done
    }
}

fn parser_options() -> Options {
    Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_SMART_PUNCTUATION
}

/// Owns the highlighting assets and turns documents into [`RenderedText`].
pub struct RenderAdapter {
    syntax_set: SyntaxSet,
    theme: Theme,
    policy: StylePolicy,
}

impl RenderAdapter {
    pub fn new(policy: StylePolicy) -> Self {
        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            theme: dark_theme(ThemeSet::load_defaults()),
            policy,
        }
    }

    /// The palette a session with this colour profile is drawn with.
    pub fn palette(&self, profile: ColorProfile) -> Palette {
        Palette::select(self.policy, profile)
    }

    pub fn render(
        &self,
        document: &[u8],
        wrap_width: u16,
        profile: ColorProfile,
    ) -> Result<RenderedText, RenderError> {
        if wrap_width == 0 {
            return Err(RenderError::ZeroWidth);
        }
        let source = String::from_utf8_lossy(document);

        let width = usize::from(wrap_width);
        let palette = self.palette(profile);
        let code = CodeHighlighter {
            syntax_set: &self.syntax_set,
            theme: &self.theme,
            colors: palette.code,
            fallback: palette.code_fallback,
        };
        let mut renderer = Renderer::new(&palette, code, width);
        for event in Parser::new_ext(&source, parser_options()) {
            renderer.event(event)?;
        }

        let lines = renderer
            .finish()
            .into_iter()
            .map(|line| adapt_line(line, profile))
            .collect();
        Ok(RenderedText { lines })
    }
}

/// Degrade every colour in the line to what the client can show.
fn adapt_line(line: RenderedLine, profile: ColorProfile) -> RenderedLine {
    let mut adapted = RenderedLine::default();
    for segment in line.segments {
        adapted.push(&segment.text, profile.adapt_style(segment.style));
    }
    adapted
}

fn dark_theme(mut themes: ThemeSet) -> Theme {
    match themes.themes.remove(THEME) {
        Some(theme) => theme,
        None => themes.themes.into_values().next().unwrap_or_default(),
    }
}
