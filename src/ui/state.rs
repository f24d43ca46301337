/// Editable text buffer backing every form field and the search box.
///
/// Single-line inputs fold pasted newlines into spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextInput {
    pub(crate) lines: Vec<String>,
    pub(crate) cursor_row: usize,
    pub(crate) cursor_col: usize,
    /// Remembered column for vertical movement.
    pub(crate) desired_col: usize,
    multiline: bool,
}

impl Default for TextInput {
    fn default() -> Self {
        Self::single_line()
    }
}

impl TextInput {
    pub fn single_line() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_row: 0,
            cursor_col: 0,
            desired_col: 0,
            multiline: false,
        }
    }

    pub fn multi_line() -> Self {
        Self {
            multiline: true,
            ..Self::single_line()
        }
    }

    pub fn is_multiline(&self) -> bool {
        self.multiline
    }

    pub fn clear(&mut self) {
        self.lines = vec![String::new()];
        self.cursor_row = 0;
        self.cursor_col = 0;
        self.desired_col = 0;
    }

    /// Replace the contents and park the cursor at the end.
    pub fn set_text(&mut self, text: &str) {
        self.clear();
        self.insert_text(text);
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_blank(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_row, self.cursor_col)
    }

    pub fn insert_char(&mut self, ch: char) {
        let line = &mut self.lines[self.cursor_row];
        let byte_idx = char_to_byte_index(line, self.cursor_col);
        line.insert(byte_idx, ch);
        self.cursor_col += 1;
        self.desired_col = self.cursor_col;
    }

    pub fn insert_newline(&mut self) {
        if !self.multiline {
            return;
        }
        let line = &mut self.lines[self.cursor_row];
        let byte_idx = char_to_byte_index(line, self.cursor_col);
        let tail = line.split_off(byte_idx);
        self.cursor_row += 1;
        self.cursor_col = 0;
        self.desired_col = 0;
        self.lines.insert(self.cursor_row, tail);
    }

    pub fn backspace(&mut self) {
        if self.cursor_col > 0 {
            let line = &mut self.lines[self.cursor_row];
            let start = char_to_byte_index(line, self.cursor_col - 1);
            let end = char_to_byte_index(line, self.cursor_col);
            line.replace_range(start..end, "");
            self.cursor_col -= 1;
        } else if self.cursor_row > 0 {
            let current = self.lines.remove(self.cursor_row);
            self.cursor_row -= 1;
            self.cursor_col = self.lines[self.cursor_row].chars().count();
            self.lines[self.cursor_row].push_str(&current);
        }
        self.desired_col = self.cursor_col;
    }

    pub fn delete_forward(&mut self) {
        let line_chars = self.lines[self.cursor_row].chars().count();
        if self.cursor_col < line_chars {
            let line = &mut self.lines[self.cursor_row];
            let start = char_to_byte_index(line, self.cursor_col);
            let end = char_to_byte_index(line, self.cursor_col + 1);
            line.replace_range(start..end, "");
        } else if self.cursor_row + 1 < self.lines.len() {
            let next = self.lines.remove(self.cursor_row + 1);
            self.lines[self.cursor_row].push_str(&next);
        }
        self.desired_col = self.cursor_col;
    }

    pub fn move_left(&mut self) {
        if self.cursor_col > 0 {
            self.cursor_col -= 1;
        } else if self.cursor_row > 0 {
            self.cursor_row -= 1;
            self.cursor_col = self.lines[self.cursor_row].chars().count();
        }
        self.desired_col = self.cursor_col;
    }

    pub fn move_right(&mut self) {
        let line_chars = self.lines[self.cursor_row].chars().count();
        if self.cursor_col < line_chars {
            self.cursor_col += 1;
        } else if self.cursor_row + 1 < self.lines.len() {
            self.cursor_row += 1;
            self.cursor_col = 0;
        }
        self.desired_col = self.cursor_col;
    }

    pub fn move_up(&mut self) {
        if self.cursor_row > 0 {
            self.cursor_row -= 1;
            let line_chars = self.lines[self.cursor_row].chars().count();
            self.cursor_col = self.desired_col.min(line_chars);
        }
    }

    pub fn move_down(&mut self) {
        if self.cursor_row + 1 < self.lines.len() {
            self.cursor_row += 1;
            let line_chars = self.lines[self.cursor_row].chars().count();
            self.cursor_col = self.desired_col.min(line_chars);
        }
    }

    pub fn move_home(&mut self) {
        self.cursor_col = 0;
        self.desired_col = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor_col = self.lines[self.cursor_row].chars().count();
        self.desired_col = self.cursor_col;
    }

    /// Insert pasted text. `\r\n` and bare `\r` count as one newline.
    pub fn insert_text(&mut self, text: &str) {
        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '\n' | '\r' => {
                    if ch == '\r' && chars.peek() == Some(&'\n') {
                        continue;
                    }
                    if self.multiline {
                        self.insert_newline();
                    } else {
                        self.insert_char(' ');
                    }
                }
                '\t' => self.insert_char(' '),
                _ => self.insert_char(ch),
            }
        }
        self.desired_col = self.cursor_col;
    }
}

fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}
