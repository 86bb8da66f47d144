//! Greedy word wrapping of styled lines by display width.

use ratatui::prelude::Style;
use unicode_width::UnicodeWidthChar;

use crate::markdown::RenderedLine;

#[derive(Default)]
struct Token {
    pieces: Vec<(char, Style)>,
    width: usize,
    whitespace: bool,
}

impl Token {
    fn push(&mut self, ch: char, style: Style) {
        self.width += char_width(ch);
        self.pieces.push((ch, style));
    }
}

fn char_width(ch: char) -> usize {
    ch.width().unwrap_or(0)
}

fn tokenize(line: &RenderedLine) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();
    for segment in &line.segments {
        for ch in segment.text.chars() {
            let whitespace = ch.is_whitespace();
            match tokens.last_mut() {
                Some(token) if token.whitespace == whitespace => token.push(ch, segment.style),
                _ => {
                    let mut token = Token {
                        whitespace,
                        ..Token::default()
                    };
                    token.push(ch, segment.style);
                    tokens.push(token);
                }
            }
        }
    }
    tokens
}

struct LineBuilder {
    width: usize,
    lines: Vec<RenderedLine>,
    current: RenderedLine,
    current_width: usize,
}

impl LineBuilder {
    fn append(&mut self, pieces: &[(char, Style)]) {
        let mut buf = [0u8; 4];
        for (ch, style) in pieces {
            self.current.push(ch.encode_utf8(&mut buf), *style);
            self.current_width += char_width(*ch);
        }
    }

    fn break_line(&mut self) {
        let mut line = std::mem::take(&mut self.current);
        trim_trailing_whitespace(&mut line);
        self.lines.push(line);
        self.current_width = 0;
    }

    fn remaining(&self) -> usize {
        self.width.saturating_sub(self.current_width)
    }

    /// Split a token that cannot fit on any line at character boundaries.
    fn append_split(&mut self, token: &Token) {
        for piece in &token.pieces {
            let w = char_width(piece.0);
            if w > self.remaining() && self.current_width > 0 {
                self.break_line();
            }
            self.append(std::slice::from_ref(piece));
        }
    }
}

fn trim_trailing_whitespace(line: &mut RenderedLine) {
    while let Some(last) = line.segments.last_mut() {
        let trimmed_len = last.text.trim_end().len();
        if trimmed_len == 0 {
            line.segments.pop();
            continue;
        }
        last.text.truncate(trimmed_len);
        break;
    }
    let plain_len = line.plain.trim_end().len();
    line.plain.truncate(plain_len);
}

/// Wrap one line to at most `width` columns. Leading whitespace of the source
/// line is kept; whitespace at a wrap point is dropped.
pub fn wrap_line(line: &RenderedLine, width: usize) -> Vec<RenderedLine> {
    let width = width.max(1);
    if line.width() <= width {
        return vec![line.clone()];
    }

    let mut builder = LineBuilder {
        width,
        lines: Vec::new(),
        current: RenderedLine::default(),
        current_width: 0,
    };

    for token in tokenize(line) {
        if token.whitespace {
            if builder.lines.is_empty() || builder.current_width > 0 {
                if token.width <= builder.remaining() {
                    builder.append(&token.pieces);
                } else if builder.current_width > 0 {
                    builder.break_line();
                }
            }
            continue;
        }

        if token.width <= builder.remaining() {
            builder.append(&token.pieces);
        } else if token.width <= width {
            builder.break_line();
            builder.append(&token.pieces);
        } else {
            builder.append_split(&token);
        }
    }

    if builder.current_width > 0 || builder.lines.is_empty() {
        builder.break_line();
    }
    builder.lines
}
