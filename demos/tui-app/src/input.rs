//! Line editing and key mapping for the input box.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// What a key press asks the application to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Submit,
    /// Stop the running command, or leave a login prompt.
    Cancel,
    Quit,
    HistoryPrevious,
    HistoryNext,
    Complete,
    ScrollUp(u16),
    ScrollDown(u16),
    Edited,
    Ignored,
}

/// Single-line editor with a character cursor.
#[derive(Debug, Default, Clone)]
pub struct LineEditor {
    buffer: String,
    cursor: usize,
}

impl LineEditor {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Cursor position in characters.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Replace the contents and move the cursor to the end.
    pub fn set(&mut self, text: &str) {
        self.buffer = text.to_string();
        self.cursor = self.buffer.chars().count();
    }

    /// Take the contents, leaving the editor empty.
    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.buffer)
    }

    pub fn insert(&mut self, c: char) {
        let at = self.byte_index(self.cursor);
        self.buffer.insert(at, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let at = self.byte_index(self.cursor);
            self.buffer.remove(at);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.buffer.chars().count() {
            let at = self.byte_index(self.cursor);
            self.buffer.remove(at);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.buffer.chars().count());
    }

    pub const fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.buffer.chars().count();
    }

    /// Ctrl-U.
    pub fn kill_to_start(&mut self) {
        let at = self.byte_index(self.cursor);
        self.buffer.replace_range(..at, "");
        self.cursor = 0;
    }

    /// Ctrl-K.
    pub fn kill_to_end(&mut self) {
        let at = self.byte_index(self.cursor);
        self.buffer.truncate(at);
    }

    /// Ctrl-W: delete the word before the cursor and the spaces after it.
    pub fn delete_word(&mut self) {
        let chars: Vec<char> = self.buffer.chars().collect();
        let mut start = self.cursor;
        while start > 0 && chars[start - 1].is_whitespace() {
            start -= 1;
        }
        while start > 0 && !chars[start - 1].is_whitespace() {
            start -= 1;
        }
        let (from, to) = (self.byte_index(start), self.byte_index(self.cursor));
        self.buffer.replace_range(from..to, "");
        self.cursor = start;
    }

    fn byte_index(&self, chars: usize) -> usize {
        self.buffer
            .char_indices()
            .nth(chars)
            .map_or(self.buffer.len(), |(i, _)| i)
    }
}

/// Apply `key` to `editor` and report what else should happen.
pub fn handle_key(editor: &mut LineEditor, key: &KeyEvent) -> Action {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('c' | 'd') if ctrl => Action::Quit,
        KeyCode::Char('a') if ctrl => {
            editor.home();
            Action::Edited
        }
        KeyCode::Char('e') if ctrl => {
            editor.end();
            Action::Edited
        }
        KeyCode::Char('u') if ctrl => {
            editor.kill_to_start();
            Action::Edited
        }
        KeyCode::Char('k') if ctrl => {
            editor.kill_to_end();
            Action::Edited
        }
        KeyCode::Char('w') if ctrl => {
            editor.delete_word();
            Action::Edited
        }
        KeyCode::Char(_) if ctrl => Action::Ignored,
        KeyCode::Char(c) => {
            editor.insert(c);
            Action::Edited
        }
        KeyCode::Backspace => {
            editor.backspace();
            Action::Edited
        }
        KeyCode::Delete => {
            editor.delete();
            Action::Edited
        }
        KeyCode::Left => {
            editor.left();
            Action::Edited
        }
        KeyCode::Right => {
            editor.right();
            Action::Edited
        }
        KeyCode::Home => {
            editor.home();
            Action::Edited
        }
        KeyCode::End => {
            editor.end();
            Action::Edited
        }
        KeyCode::Enter => Action::Submit,
        KeyCode::Esc => Action::Cancel,
        KeyCode::Tab => Action::Complete,
        KeyCode::Up => Action::HistoryPrevious,
        KeyCode::Down => Action::HistoryNext,
        KeyCode::PageUp => Action::ScrollUp(10),
        KeyCode::PageDown => Action::ScrollDown(10),
        _ => Action::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn typed(text: &str) -> LineEditor {
        let mut editor = LineEditor::default();
        for c in text.chars() {
            handle_key(&mut editor, &key(KeyCode::Char(c)));
        }
        editor
    }

    #[test]
    fn test_insert_in_middle() {
        let mut editor = typed("helo");
        handle_key(&mut editor, &key(KeyCode::Left));
        handle_key(&mut editor, &key(KeyCode::Char('l')));
        assert_eq!(editor.as_str(), "hello");
        assert_eq!(editor.cursor(), 4);
    }

    #[test]
    fn test_kill_commands() {
        let mut editor = typed("Billing.Invoice.List 2024");
        handle_key(&mut editor, &ctrl('w'));
        assert_eq!(editor.as_str(), "Billing.Invoice.List ");

        handle_key(&mut editor, &ctrl('a'));
        handle_key(&mut editor, &ctrl('k'));
        assert_eq!(editor.as_str(), "");

        let mut editor = typed("abc def");
        handle_key(&mut editor, &key(KeyCode::Left));
        handle_key(&mut editor, &ctrl('u'));
        assert_eq!(editor.as_str(), "f");
        assert_eq!(editor.cursor(), 0);
    }

    #[test]
    fn test_multibyte_editing() {
        let mut editor = typed("grüße");
        handle_key(&mut editor, &key(KeyCode::Backspace));
        handle_key(&mut editor, &key(KeyCode::Home));
        handle_key(&mut editor, &key(KeyCode::Delete));
        assert_eq!(editor.as_str(), "rüß");
    }

    #[test]
    fn test_navigation_keys_map_to_actions() {
        let mut editor = LineEditor::default();
        assert_eq!(handle_key(&mut editor, &ctrl('c')), Action::Quit);
        assert_eq!(handle_key(&mut editor, &key(KeyCode::Tab)), Action::Complete);
        assert_eq!(handle_key(&mut editor, &key(KeyCode::Up)), Action::HistoryPrevious);
        assert_eq!(handle_key(&mut editor, &key(KeyCode::Enter)), Action::Submit);
        assert_eq!(handle_key(&mut editor, &key(KeyCode::Esc)), Action::Cancel);
        assert_eq!(handle_key(&mut editor, &ctrl('x')), Action::Ignored);
    }

    #[test]
    fn test_set_and_take() {
        let mut editor = LineEditor::default();
        editor.set("status");
        assert_eq!(editor.cursor(), 6);
        assert_eq!(editor.take(), "status");
        assert_eq!(editor.as_str(), "");
        assert_eq!(editor.cursor(), 0);
    }
}
