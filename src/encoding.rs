//! Decoding of raw input bytes.
//!
//! Input arrives from files and pipes written by whatever the console's code page happens to
//! be.  Decoding walks an ordered list of candidate encodings and keeps the first that decodes
//! without error, falling back to a lossy UTF-8 decode.

use std::fmt;

use encoding_rs::{SHIFT_JIS, WINDOWS_1252};

/// An encoding that may be tried when decoding input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    /// Shift_JIS as written by the Windows cp932 code page.
    ShiftJis,
    Windows1252,
    Ascii,
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::ShiftJis => "shift_jis",
            TextEncoding::Windows1252 => "windows-1252",
            TextEncoding::Ascii => "ascii",
        };
        f.write_str(name)
    }
}

/// Candidates in the order they are tried by default.
pub const DEFAULT_CANDIDATES: [TextEncoding; 4] = [
    TextEncoding::Utf8,
    TextEncoding::ShiftJis,
    TextEncoding::Windows1252,
    TextEncoding::Ascii,
];

/// Decoded text and how it was obtained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    /// The candidate that succeeded; `Utf8` for a lossy fallback.
    pub encoding: TextEncoding,
    /// True if no candidate succeeded and invalid sequences were replaced.
    pub lossy: bool,
}

impl TextEncoding {
    /// Decodes `bytes` strictly, returning `None` on any malformed sequence.
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => {
                let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
                std::str::from_utf8(bytes).ok().map(str::to_string)
            }
            TextEncoding::ShiftJis => SHIFT_JIS
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|text| text.into_owned()),
            TextEncoding::Windows1252 => WINDOWS_1252
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|text| text.into_owned()),
            TextEncoding::Ascii => bytes
                .is_ascii()
                .then(|| bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

/// Decodes `bytes` with the first candidate that succeeds.
pub fn decode_with_fallback(bytes: &[u8], candidates: &[TextEncoding]) -> Decoded {
    for encoding in candidates {
        if let Some(text) = encoding.decode(bytes) {
            return Decoded {
                text,
                encoding: *encoding,
                lossy: false,
            };
        }
    }
    Decoded {
        text: String::from_utf8_lossy(bytes).into_owned(),
        encoding: TextEncoding::Utf8,
        lossy: true,
    }
}
