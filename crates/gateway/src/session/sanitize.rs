//! Terminal output sanitization.
//!
//! The drain actor feeds every chunk read from the PTY through an
//! [`OutputCleaner`] before it lands in the session buffer, so clients only
//! ever see plain text with uniform line endings. The cleaner is stateful:
//! a read can end mid escape sequence or mid multi-byte character, and that
//! tail is held back until the rest of it arrives.

/// Strips ANSI/VT escape sequences and normalizes line endings to `\r\n`.
///
/// Handles CSI sequences (`ESC [ ... final`), OSC sequences
/// (`ESC ] ... BEL` or `ESC ] ... ESC \`), and bare two-character escapes.
/// Lone `\n`, lone `\r`, and `\r\n` all come out as `\r\n`.
pub fn clean_output(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.peek() {
                Some('[') => {
                    chars.next();
                    // Parameter and intermediate bytes (0x20-0x3F)
                    while let Some(&next) = chars.peek() {
                        if next.is_ascii() && (0x20..=0x3f).contains(&(next as u8)) {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    // Final byte (0x40-0x7E)
                    if let Some(&next) = chars.peek() {
                        if next.is_ascii() && (0x40..=0x7e).contains(&(next as u8)) {
                            chars.next();
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    // OSC runs until BEL or ST (ESC \)
                    while let Some(inner) = chars.next() {
                        if inner == '\x07' {
                            break;
                        }
                        if inner == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                Some(_) => {
                    chars.next();
                }
                None => {}
            },
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                result.push_str("\r\n");
            }
            '\n' => result.push_str("\r\n"),
            _ => result.push(c),
        }
    }

    result
}

/// Longest escape-sequence tail held back between chunks. A sequence still
/// unterminated past this is abandoned to [`clean_output`] so a stream that
/// never terminates it cannot grow the carry without bound.
const MAX_HOLDBACK: usize = 256;

/// Chunk-boundary-safe wrapper around [`clean_output`].
///
/// [`push`](Self::push) returns the cleaned text that is safe to emit now;
/// an incomplete trailing escape sequence or multi-byte character is
/// carried into the next call. [`finish`](Self::finish) flushes the carry
/// when the stream ends.
#[derive(Default)]
pub struct OutputCleaner {
    pending: Vec<u8>,
}

impl OutputCleaner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw chunk read from the PTY.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let (text, utf8_tail) = decode_complete(&self.pending);

        let mut held = trailing_partial_escape(&text);
        if held > MAX_HOLDBACK {
            held = 0;
        }
        let (emit, escape_tail) = text.split_at(text.len() - held);
        let cleaned = clean_output(emit);

        let mut pending = escape_tail.as_bytes().to_vec();
        pending.extend_from_slice(&utf8_tail);
        self.pending = pending;

        cleaned
    }

    /// Flushes whatever is still held back; call at EOF or on a read error.
    pub fn finish(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        clean_output(&String::from_utf8_lossy(&bytes))
    }
}

/// Decodes the longest complete UTF-8 prefix of `bytes`.
///
/// Definitely-invalid byte runs become U+FFFD; an incomplete multi-byte
/// character at the very end is returned separately instead of being
/// mangled.
fn decode_complete(bytes: &[u8]) -> (String, Vec<u8>) {
    let mut text = String::new();
    let mut input = bytes;
    loop {
        match std::str::from_utf8(input) {
            Ok(s) => {
                text.push_str(s);
                return (text, Vec::new());
            }
            Err(e) => {
                let (valid, after) = input.split_at(e.valid_up_to());
                text.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(n) => {
                        text.push('\u{FFFD}');
                        input = &after[n..];
                    }
                    None => return (text, after.to_vec()),
                }
            }
        }
    }
}

/// Length in bytes of an unterminated escape sequence at the end of `text`,
/// or 0 if the text ends outside any sequence.
fn trailing_partial_escape(text: &str) -> usize {
    let Some(idx) = text.rfind('\x1b') else {
        return 0;
    };
    let suffix = &text[idx..];
    let mut rest = suffix.chars().skip(1);
    match rest.next() {
        // Bare ESC at the end of the chunk.
        None => suffix.len(),
        Some('[') => {
            for c in rest {
                // Any byte outside the parameter/intermediate range ends
                // the sequence, final byte or not.
                if !(c.is_ascii() && (0x20..=0x3f).contains(&(c as u8))) {
                    return 0;
                }
            }
            suffix.len()
        }
        // OSC within the suffix can only terminate on BEL; an ST would put
        // a later ESC after this one.
        Some(']') => {
            if suffix.contains('\x07') {
                0
            } else {
                suffix.len()
            }
        }
        // Two-character escape, already complete.
        Some(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(clean_output("hello world"), "hello world");
    }

    #[test]
    fn test_strips_color_codes() {
        assert_eq!(clean_output("\x1b[32mgreen\x1b[0m plain"), "green plain");
    }

    #[test]
    fn test_strips_cursor_movement() {
        assert_eq!(clean_output("\x1b[2J\x1b[1;1Hprompt>"), "prompt>");
    }

    #[test]
    fn test_strips_private_mode_sequences() {
        assert_eq!(clean_output("\x1b[?25lbusy\x1b[?25h"), "busy");
    }

    #[test]
    fn test_strips_osc_title_bel() {
        assert_eq!(clean_output("\x1b]0;window title\x07text"), "text");
    }

    #[test]
    fn test_strips_osc_title_st() {
        assert_eq!(clean_output("\x1b]0;title\x1b\\text"), "text");
    }

    #[test]
    fn test_strips_bare_escape_pair() {
        assert_eq!(clean_output("\x1b=keypad"), "keypad");
    }

    #[test]
    fn test_crlf_preserved() {
        assert_eq!(clean_output("one\r\ntwo\r\n"), "one\r\ntwo\r\n");
    }

    #[test]
    fn test_lone_lf_normalized() {
        assert_eq!(clean_output("one\ntwo\n"), "one\r\ntwo\r\n");
    }

    #[test]
    fn test_lone_cr_normalized() {
        assert_eq!(clean_output("one\rtwo"), "one\r\ntwo");
    }

    #[test]
    fn test_trailing_escape_without_sequence() {
        // A chunk boundary can land right after ESC; drop the dangling byte.
        assert_eq!(clean_output("tail\x1b"), "tail");
    }

    #[test]
    fn test_mixed_real_world_chunk() {
        let input = "\x1b[1m$\x1b[0m echo hi\r\nhi\r\n\x1b]0;sh\x07";
        assert_eq!(clean_output(input), "$ echo hi\r\nhi\r\n");
    }

    #[test]
    fn test_cleaner_whole_chunks_match_clean_output() {
        let mut cleaner = OutputCleaner::new();
        let out = cleaner.push("\x1b[32mok\x1b[0m\r\n".as_bytes());
        assert_eq!(out, "ok\r\n");
        assert_eq!(cleaner.finish(), "");
    }

    #[test]
    fn test_cleaner_csi_split_across_chunks() {
        let mut cleaner = OutputCleaner::new();
        let mut out = cleaner.push("red:\x1b".as_bytes());
        out.push_str(&cleaner.push("[31mtext\x1b[0m".as_bytes()));
        out.push_str(&cleaner.finish());
        assert_eq!(out, "red:text");
    }

    #[test]
    fn test_cleaner_csi_split_mid_parameters() {
        let mut cleaner = OutputCleaner::new();
        let mut out = cleaner.push("a\x1b[1;3".as_bytes());
        out.push_str(&cleaner.push("1mb".as_bytes()));
        out.push_str(&cleaner.finish());
        assert_eq!(out, "ab");
    }

    #[test]
    fn test_cleaner_osc_split_across_chunks() {
        let mut cleaner = OutputCleaner::new();
        let mut out = cleaner.push("before\x1b]0;ti".as_bytes());
        out.push_str(&cleaner.push("tle\x07after".as_bytes()));
        out.push_str(&cleaner.finish());
        assert_eq!(out, "beforeafter");
    }

    #[test]
    fn test_cleaner_utf8_split_across_chunks() {
        let bytes = "héllo".as_bytes();
        // Split inside the two-byte 'é'.
        let mut cleaner = OutputCleaner::new();
        let mut out = cleaner.push(&bytes[..2]);
        assert_eq!(out, "h");
        out.push_str(&cleaner.push(&bytes[2..]));
        out.push_str(&cleaner.finish());
        assert_eq!(out, "héllo");
    }

    #[test]
    fn test_cleaner_invalid_byte_becomes_replacement() {
        let mut cleaner = OutputCleaner::new();
        let out = cleaner.push(b"a\xffb");
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn test_cleaner_finish_flushes_partial_tail() {
        let mut cleaner = OutputCleaner::new();
        assert_eq!(cleaner.push("done\x1b".as_bytes()), "done");
        // Stream ended mid sequence; the dangling ESC is dropped.
        assert_eq!(cleaner.finish(), "");
    }

    #[test]
    fn test_cleaner_abandons_runaway_sequence() {
        let mut cleaner = OutputCleaner::new();
        let runaway = format!("\x1b]{}", "a".repeat(400));
        assert_eq!(cleaner.push(runaway.as_bytes()), "");
        // The unterminated sequence was dropped, not carried forever.
        assert_eq!(cleaner.push(b"ok"), "ok");
    }
}
