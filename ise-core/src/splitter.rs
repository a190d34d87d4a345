//! Packet splitters: pure functions that locate the end of the next
//! complete application message within a byte span.
//!
//! A splitter returns `0` to mean "need more data" or `k > 0` to mean the
//! first `k` bytes (including any delimiter) form one complete message.
//! Splitters are pure and must not mutate the buffer they inspect — the
//! runtime removes exactly the reported `k` bytes on the caller's behalf.

/// A packet splitter inspects the readable span of a connection's receive
/// buffer and reports how many leading bytes form one complete message.
pub trait PacketSplitter: Send + Sync + 'static {
    /// Returns `0` if `data` does not yet contain a complete message, or the
    /// number of leading bytes (`> 0`) that do.
    fn split(&self, data: &[u8]) -> usize;
}

impl<F> PacketSplitter for F
where
    F: Fn(&[u8]) -> usize + Send + Sync + 'static,
{
    fn split(&self, data: &[u8]) -> usize {
        self(data)
    }
}

/// Delivers one byte at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteSplitter;

impl PacketSplitter for ByteSplitter {
    fn split(&self, data: &[u8]) -> usize {
        usize::from(!data.is_empty())
    }
}

/// Delivers up to and including the first `\r`, `\n`, or `\r\n`/`\n\r` pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineSplitter;

impl PacketSplitter for LineSplitter {
    fn split(&self, data: &[u8]) -> usize {
        for (i, &b) in data.iter().enumerate() {
            if b == b'\r' || b == b'\n' {
                let other = if b == b'\r' { b'\n' } else { b'\r' };
                return if data.get(i + 1) == Some(&other) { i + 2 } else { i + 1 };
            }
        }
        0
    }
}

/// Delivers up to and including the first `0x00` byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTerminatedSplitter;

impl PacketSplitter for NullTerminatedSplitter {
    fn split(&self, data: &[u8]) -> usize {
        data.iter().position(|&b| b == 0).map_or(0, |i| i + 1)
    }
}

/// Delivers the entire readable span as soon as any data is present.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnySplitter;

impl PacketSplitter for AnySplitter {
    fn split(&self, data: &[u8]) -> usize {
        data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_splitter_takes_one_byte_when_present() {
        assert_eq!(ByteSplitter.split(b""), 0);
        assert_eq!(ByteSplitter.split(b"x"), 1);
        assert_eq!(ByteSplitter.split(b"xy"), 1);
    }

    #[test]
    fn line_splitter_waits_for_terminator() {
        assert_eq!(LineSplitter.split(b"abc"), 0);
        assert_eq!(LineSplitter.split(b"abc\n"), 4);
        assert_eq!(LineSplitter.split(b"abc\r\ndef"), 5);
        assert_eq!(LineSplitter.split(b"abc\n\rdef"), 5);
    }

    #[test]
    fn line_splitter_does_not_merge_unrelated_terminators() {
        // "abc\r\n" then "def\nghi" fed as one buffer: two messages, the
        // splitter only ever reports the first.
        let data = b"abc\r\ndef\nghi";
        let k = LineSplitter.split(data);
        assert_eq!(k, 5);
        assert_eq!(&data[..k], b"abc\r\n");
        let k2 = LineSplitter.split(&data[k..]);
        assert_eq!(k2, 4);
        assert_eq!(&data[k..k + k2], b"def\n");
    }

    #[test]
    fn null_terminated_splitter() {
        assert_eq!(NullTerminatedSplitter.split(b"abc"), 0);
        assert_eq!(NullTerminatedSplitter.split(b"abc\0def"), 4);
    }

    #[test]
    fn any_splitter_takes_everything_available() {
        assert_eq!(AnySplitter.split(b""), 0);
        assert_eq!(AnySplitter.split(b"abc"), 3);
    }

    #[test]
    fn closures_are_usable_as_splitters() {
        let fixed_width = |data: &[u8]| if data.len() >= 4 { 4 } else { 0 };
        assert_eq!(fixed_width.split(b"ab"), 0);
        assert_eq!(fixed_width.split(b"abcd"), 4);
    }
}
