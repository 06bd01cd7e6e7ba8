//! Scrollback viewer widget

use ratatui::{
    prelude::*,
    widgets::{Block, Widget},
};

/// Renders styled scrollback lines starting at a fixed offset
pub struct OutputView<'a> {
    lines: &'a [Line<'static>],
    offset: usize,
    block: Option<Block<'a>>,
}

impl<'a> OutputView<'a> {
    pub fn new(lines: &'a [Line<'static>], offset: usize) -> Self {
        Self {
            lines,
            offset,
            block: None,
        }
    }

    pub fn block(mut self, block: Block<'a>) -> Self {
        self.block = Some(block);
        self
    }
}

impl<'a> Widget for OutputView<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let inner_area = match self.block {
            Some(b) => {
                let inner = b.inner(area);
                b.render(area, buf);
                inner
            }
            None => area,
        };

        if self.lines.is_empty() || inner_area.height == 0 {
            return;
        }

        let visible_height = inner_area.height as usize;
        let max_offset = self.lines.len().saturating_sub(visible_height);
        let offset = self.offset.min(max_offset);

        for (i, line) in self.lines.iter().skip(offset).take(visible_height).enumerate() {
            let y = inner_area.y + i as u16;
            buf.set_line(inner_area.x, y, line, inner_area.width);
        }

        // Scroll position, only when there is something to scroll
        if max_offset > 0 {
            let indicator = format!("{}%", offset * 100 / max_offset);
            let width = indicator.len() as u16 + 1;
            if inner_area.width > width {
                let x = inner_area.x + inner_area.width - width;
                buf.set_string(x, inner_area.y, &indicator, Style::default().fg(Color::DarkGray));
            }
        }
    }
}
