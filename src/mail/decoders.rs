use std::sync::LazyLock;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use encoding_rs::Encoding;
use regex::bytes::Regex;

/// Charsets tried, in order, for header text that carries no charset tag.
pub const DEFAULT_FALLBACKS: &[&str] = &["utf-8", "big5"];

/// Mislabelled charsets seen in the wild, mapped to what senders actually used.
const CHARSET_ALIASES: &[(&str, &str)] = &[("gb2312", "gb18030")];

static ENCODED_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)=\?([^?]*)\?([qQbB])\?(.*?)\?=").expect("encoded-word pattern")
});

// Two encoded-words glued together: "...?==?..."
static GLUED_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)\?==\?").expect("glued-word pattern"));

// Padding is frequently missing or wrong in B-encoded words.
const LENIENT_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Every byte was valid under the charset.
    Decoded,
    /// Decoded, but invalid sequences were replaced with U+FFFD.
    Replaced,
    /// The bytes are not valid under the charset.
    Failed,
    /// The label does not name a charset we know.
    UnknownCharset,
}

/// One charset tried against one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharsetAttempt {
    pub charset: String,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Charset declared by the encoded-word, after alias normalisation.
    /// `None` for plain header text.
    pub charset: Option<String>,
    pub attempts: Vec<CharsetAttempt>,
    pub text: String,
}

impl Segment {
    /// Charset the text was finally decoded with, if any attempt produced text.
    pub fn decoded_with(&self) -> Option<&str> {
        self.attempts
            .iter()
            .find(|a| matches!(a.outcome, AttemptOutcome::Decoded | AttemptOutcome::Replaced))
            .map(|a| a.charset.as_str())
    }
}

/// Full decoding trail for a header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderDecode {
    pub segments: Vec<Segment>,
    /// Set when the value could not be split into encoded-words and was
    /// decoded as a single untagged unit instead.
    pub malformed: bool,
}

impl HeaderDecode {
    pub fn text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }
}

/// Decode a raw header value into text using [`DEFAULT_FALLBACKS`].
/// Never fails; undecodable parts come back as replacement characters or
/// empty text.
pub fn decode_header(raw: &[u8]) -> String {
    decode_header_with(raw, DEFAULT_FALLBACKS).text()
}

pub fn decode_header_with(raw: &[u8], fallbacks: &[&str]) -> HeaderDecode {
    let unfolded: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| *b != b'\r' && *b != b'\n')
        .collect();
    let line = GLUED_WORDS.replace_all(&unfolded, &b"?= =?"[..]);

    match split_words(&line) {
        Ok(parts) => HeaderDecode {
            segments: parts
                .into_iter()
                .map(|p| match p {
                    RawPart::Plain(bytes) => decode_untagged(&bytes, fallbacks),
                    RawPart::Encoded { charset, bytes } => decode_tagged(&charset, &bytes),
                })
                .collect(),
            malformed: false,
        },
        Err(()) => HeaderDecode {
            segments: vec![decode_untagged(&line, fallbacks)],
            malformed: true,
        },
    }
}

enum RawPart {
    Plain(Vec<u8>),
    Encoded { charset: String, bytes: Vec<u8> },
}

/// Split a header line into plain runs and encoded-words. Whitespace between
/// two encoded-words is dropped, and consecutive words in the same charset are
/// joined before decoding so multi-byte characters may straddle them.
fn split_words(line: &[u8]) -> Result<Vec<RawPart>, ()> {
    let mut parts: Vec<RawPart> = Vec::new();
    let mut last = 0;

    for caps in ENCODED_WORD.captures_iter(line) {
        let whole = caps.get(0).ok_or(())?;
        let between = &line[last..whole.start()];
        let after_word = matches!(parts.last(), Some(RawPart::Encoded { .. }));
        if !between.is_empty() && !(after_word && between.iter().all(u8::is_ascii_whitespace)) {
            parts.push(RawPart::Plain(between.to_vec()));
        }
        last = whole.end();

        let charset = normalize_charset(&String::from_utf8_lossy(&caps[1]));
        let bytes = match caps[2][0].to_ascii_lowercase() {
            b'b' => LENIENT_B64.decode(&caps[3]).map_err(|_| ())?,
            _ => decode_q(&caps[3]),
        };

        match parts.last_mut() {
            Some(RawPart::Encoded {
                charset: prev,
                bytes: acc,
            }) if *prev == charset => acc.extend_from_slice(&bytes),
            _ => parts.push(RawPart::Encoded { charset, bytes }),
        }
    }

    if last < line.len() {
        parts.push(RawPart::Plain(line[last..].to_vec()));
    }
    Ok(parts)
}

fn normalize_charset(label: &str) -> String {
    // RFC 2231 allows a language suffix: utf-8*en
    let label = label.split('*').next().unwrap_or("").trim().to_ascii_lowercase();
    CHARSET_ALIASES
        .iter()
        .find(|(from, _)| *from == label)
        .map(|(_, to)| (*to).to_string())
        .unwrap_or(label)
}

fn decode_tagged(charset: &str, bytes: &[u8]) -> Segment {
    let (text, outcome) = match Encoding::for_label(charset.as_bytes()) {
        Some(enc) => {
            let (text, had_errors) = enc.decode_without_bom_handling(bytes);
            let outcome = if had_errors {
                AttemptOutcome::Replaced
            } else {
                AttemptOutcome::Decoded
            };
            (text.into_owned(), outcome)
        }
        None => (
            String::from_utf8_lossy(bytes).into_owned(),
            AttemptOutcome::UnknownCharset,
        ),
    };
    Segment {
        charset: Some(charset.to_string()),
        attempts: vec![CharsetAttempt {
            charset: charset.to_string(),
            outcome,
        }],
        text,
    }
}

fn decode_untagged(bytes: &[u8], fallbacks: &[&str]) -> Segment {
    let mut attempts = Vec::with_capacity(fallbacks.len());
    let mut text = String::new();

    for label in fallbacks {
        let Some(enc) = Encoding::for_label(label.as_bytes()) else {
            attempts.push(CharsetAttempt {
                charset: label.to_string(),
                outcome: AttemptOutcome::UnknownCharset,
            });
            continue;
        };
        match enc.decode_without_bom_handling_and_without_replacement(bytes) {
            Some(decoded) => {
                attempts.push(CharsetAttempt {
                    charset: label.to_string(),
                    outcome: AttemptOutcome::Decoded,
                });
                text = decoded.into_owned();
                break;
            }
            None => attempts.push(CharsetAttempt {
                charset: label.to_string(),
                outcome: AttemptOutcome::Failed,
            }),
        }
    }

    Segment {
        charset: None,
        attempts,
        text,
    }
}

/// RFC 2047 "Q" encoding: `_` is a space, `=XX` a hex byte. Broken escapes
/// are kept literally.
fn decode_q(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'_' => out.push(b' '),
            b'=' => {
                if let (Some(hi), Some(lo)) = (
                    input.get(i + 1).and_then(|b| hex_value(*b)),
                    input.get(i + 2).and_then(|b| hex_value(*b)),
                ) {
                    out.push(hi << 4 | lo);
                    i += 3;
                    continue;
                }
                out.push(b'=');
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ascii_passes_through() {
        assert_eq!(decode_header(b"Weekly report"), "Weekly report");
    }

    #[test]
    fn base64_and_q_words_decode() {
        assert_eq!(decode_header(b"=?UTF-8?B?5Lit5paH?="), "中文");
        assert_eq!(
            decode_header(b"=?iso-8859-1?Q?caf=E9_cr=E8me?="),
            "café crème"
        );
    }

    #[test]
    fn whitespace_between_words_is_dropped_but_prefix_kept() {
        let raw = b"Re: =?utf-8?Q?hello?=   =?utf-8?Q?_world?=";
        assert_eq!(decode_header(raw), "Re: hello world");
    }

    #[test]
    fn folded_lines_are_unfolded() {
        let raw = b"=?utf-8?B?5Lit?=\r\n =?utf-8?B?5paH?=";
        assert_eq!(decode_header(raw), "中文");
    }

    #[test]
    fn glued_words_decode_like_spaced_words() {
        let glued = decode_header_with(b"=?utf-8?B?5Lit?==?big5?B?pOU=?=", DEFAULT_FALLBACKS);
        let spaced = decode_header_with(b"=?utf-8?B?5Lit?= =?big5?B?pOU=?=", DEFAULT_FALLBACKS);
        assert_eq!(glued, spaced);
        assert_eq!(glued.text(), "中文");
        assert_eq!(glued.segments.len(), 2);
    }

    #[test]
    fn multibyte_char_split_across_words_is_joined() {
        assert_eq!(decode_header(b"=?utf-8?B?5Lg=?= =?utf-8?B?rQ==?="), "中");
    }

    #[test]
    fn gb2312_label_is_decoded_as_gb18030() {
        let decoded = decode_header_with(b"=?gb2312?B?5Lit5paH?=", DEFAULT_FALLBACKS);
        let seg = &decoded.segments[0];
        assert_eq!(seg.charset.as_deref(), Some("gb18030"));
        assert_eq!(seg.decoded_with(), Some("gb18030"));

        let bytes = [0xE4, 0xB8, 0xAD, 0xE6, 0x96, 0x87];
        let (expected, _) = encoding_rs::GB18030.decode_without_bom_handling(&bytes);
        assert_eq!(decoded.text(), expected);
    }

    #[test]
    fn untagged_text_falls_back_to_big5() {
        // "中文" in Big5, invalid as UTF-8
        let decoded = decode_header_with(&[0xA4, 0xA4, 0xA4, 0xE5], DEFAULT_FALLBACKS);
        let seg = &decoded.segments[0];
        assert_eq!(
            seg.attempts,
            vec![
                CharsetAttempt {
                    charset: "utf-8".into(),
                    outcome: AttemptOutcome::Failed,
                },
                CharsetAttempt {
                    charset: "big5".into(),
                    outcome: AttemptOutcome::Decoded,
                },
            ]
        );
        assert_eq!(decoded.text(), "中文");
    }

    #[test]
    fn untagged_text_failing_every_fallback_is_empty() {
        let decoded = decode_header_with(&[b'A', 0xFF], DEFAULT_FALLBACKS);
        assert!(decoded.segments[0]
            .attempts
            .iter()
            .all(|a| a.outcome == AttemptOutcome::Failed));
        assert_eq!(decoded.text(), "");
    }

    #[test]
    fn unknown_fallback_label_is_recorded_and_skipped() {
        let decoded = decode_header_with(b"abc", &["x-nonsense", "utf-8"]);
        let attempts = &decoded.segments[0].attempts;
        assert_eq!(attempts[0].outcome, AttemptOutcome::UnknownCharset);
        assert_eq!(attempts[1].outcome, AttemptOutcome::Decoded);
        assert_eq!(decoded.text(), "abc");
    }

    #[test]
    fn tagged_invalid_bytes_are_replaced() {
        // 0xFF is never valid UTF-8
        let decoded = decode_header_with(b"=?utf-8?Q?ok=FF?=", DEFAULT_FALLBACKS);
        assert_eq!(decoded.text(), "ok\u{FFFD}");
        assert_eq!(decoded.segments[0].attempts[0].outcome, AttemptOutcome::Replaced);
    }

    #[test]
    fn broken_base64_falls_back_to_whole_value() {
        let decoded = decode_header_with(b"=?utf-8?B?@@@?=", DEFAULT_FALLBACKS);
        assert!(decoded.malformed);
        assert_eq!(decoded.text(), "=?utf-8?B?@@@?=");
    }

    #[test]
    fn q_decoding_keeps_broken_escapes() {
        assert_eq!(decode_q(b"a=3Db=ZZ_"), b"a=b=ZZ ");
    }
}
