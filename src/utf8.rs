//! Streaming UTF-8 validation for text messages.
//!
//! A text message reaches the application in pieces: it may be split into several frames, and
//! each frame may be read into a buffer smaller than its payload. [`Utf8Validator`] keeps the
//! state of a partially decoded code point between pieces, so a sequence split across two reads
//! is accepted as long as the bytes form valid UTF-8 once joined.

#[cfg(feature = "simd")]
use simdutf8::compat::from_utf8;
#[cfg(not(feature = "simd"))]
use std::str::from_utf8;

/// Incremental UTF-8 validator.
///
/// Complete runs of the input are checked in bulk; only a code point that straddles two
/// pieces goes through the bytewise state machine.
#[derive(Debug, Default, Clone)]
pub struct Utf8Validator {
    sequence_in_progress: bool,
    additional_bytes_expected: u8,
    expected_value_min: u32,
    current_decode_bits: u32,
}

impl Utf8Validator {
    /// Creates a validator positioned at the start of a message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while a multi-byte sequence is waiting for its continuation bytes.
    pub fn is_in_progress(&self) -> bool {
        self.sequence_in_progress
    }

    /// Forgets any partially decoded sequence.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Validates the next piece of a message.
    ///
    /// When `end_of_message` is set the message must not end in the middle of a sequence, and
    /// the validator is reset for the next message. Returns `false` as soon as the bytes seen so
    /// far cannot be the prefix of valid UTF-8.
    pub fn validate(&mut self, input: &[u8], end_of_message: bool) -> bool {
        let valid = self.feed(input);
        let valid = valid && !(end_of_message && self.sequence_in_progress);

        if !valid || end_of_message {
            self.reset();
        }

        valid
    }

    fn feed(&mut self, mut input: &[u8]) -> bool {
        if self.sequence_in_progress {
            let Some(consumed) = self.continue_sequence(input) else {
                return false;
            };
            input = &input[consumed..];
        }

        if self.sequence_in_progress || input.is_empty() {
            return true;
        }

        match from_utf8(input) {
            Ok(_) => true,
            // the input ends with the valid prefix of a sequence
            Err(err) if err.error_len().is_none() => {
                let tail = &input[err.valid_up_to()..];
                self.start_sequence(tail[0]) && self.continue_sequence(&tail[1..]).is_some()
            }
            Err(_) => false,
        }
    }

    /// Decodes the leading byte of a sequence.
    fn start_sequence(&mut self, b: u8) -> bool {
        let (additional, bits, min) = if b & 0x80 == 0 {
            (0, u32::from(b & 0x7F), 0)
        } else if b & 0xE0 == 0xC0 {
            (1, u32::from(b & 0x1F), 0x80)
        } else if b & 0xF0 == 0xE0 {
            (2, u32::from(b & 0x0F), 0x800)
        } else if b & 0xF8 == 0xF0 {
            (3, u32::from(b & 0x07), 0x10000)
        } else {
            // misplaced continuation byte or an invalid leading byte
            return false;
        };

        self.sequence_in_progress = additional > 0;
        self.additional_bytes_expected = additional;
        self.current_decode_bits = bits;
        self.expected_value_min = min;
        true
    }

    /// Consumes continuation bytes of the sequence in progress.
    ///
    /// Returns the number of bytes consumed, which stops early once the sequence completes.
    fn continue_sequence(&mut self, input: &[u8]) -> Option<usize> {
        let mut consumed = 0;

        for &b in input {
            if self.additional_bytes_expected == 0 {
                break;
            }
            if b & 0xC0 != 0x80 {
                return None;
            }

            consumed += 1;
            self.additional_bytes_expected -= 1;
            self.current_decode_bits = (self.current_decode_bits << 6) | u32::from(b & 0x3F);

            // UTF-16 surrogates, 0xD800..=0xDFFF
            if self.additional_bytes_expected == 1
                && (0x360..=0x37F).contains(&self.current_decode_bits)
            {
                return None;
            }
            // above 0x10FFFF
            if self.additional_bytes_expected == 2 && self.current_decode_bits >= 0x110 {
                return None;
            }
        }

        if self.additional_bytes_expected == 0 {
            self.sequence_in_progress = false;
            // overlong encoding
            if self.current_decode_bits < self.expected_value_min {
                return None;
            }
        }

        Some(consumed)
    }
}
