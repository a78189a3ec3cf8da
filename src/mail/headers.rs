use log::debug;
use mailparse::{MailAddr, MailHeader};

use crate::domain::message::{MessageRecord, RawHeaderBlob};
use crate::mail::dates::normalize_date;
use crate::mail::decoders::decode_header;

/// Undecoded values of the three fields we keep. Absent fields are empty.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeaderFields {
    pub subject: Vec<u8>,
    pub date: Vec<u8>,
    pub from: Vec<u8>,
}

/// Turn one fetched header blob into a record. Never fails: anything that
/// cannot be decoded ends up as empty text or an unknown date.
pub fn record_from_blob(blob: &RawHeaderBlob) -> MessageRecord {
    let fields = split_fields(&blob.header);
    MessageRecord {
        subject: decode_header(&fields.subject).trim().to_string(),
        date_epoch: normalize_date(&String::from_utf8_lossy(&fields.date)),
        sender: extract_sender(&fields.from),
    }
}

pub fn split_fields(raw: &[u8]) -> HeaderFields {
    match mailparse::parse_headers(raw) {
        Ok((headers, _)) => HeaderFields {
            subject: raw_value(&headers, "Subject"),
            date: raw_value(&headers, "Date"),
            from: raw_value(&headers, "From"),
        },
        Err(e) => {
            debug!("header block did not parse ({e}); scanning lines");
            scan_fields(raw)
        }
    }
}

fn raw_value(headers: &[MailHeader], name: &str) -> Vec<u8> {
    headers
        .iter()
        .find(|h| h.get_key().eq_ignore_ascii_case(name))
        .map(|h| h.get_value_raw().to_vec())
        .unwrap_or_default()
}

/// Line-based recovery for header blocks mailparse rejects. Continuation
/// lines (leading space or tab) extend the field above them.
pub fn scan_fields(raw: &[u8]) -> HeaderFields {
    let mut fields = HeaderFields::default();
    let mut current: Option<&mut Vec<u8>> = None;

    for line in raw.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.first().is_some_and(|b| *b == b' ' || *b == b'\t') {
            if let Some(value) = current.as_mut() {
                value.extend_from_slice(b"\r\n");
                value.extend_from_slice(line);
            }
            continue;
        }

        current = None;
        let Some(colon) = line.iter().position(|b| *b == b':') else {
            continue;
        };
        let name = String::from_utf8_lossy(&line[..colon]);
        let target = match name.trim().to_ascii_lowercase().as_str() {
            "subject" => &mut fields.subject,
            "date" => &mut fields.date,
            "from" => &mut fields.from,
            _ => continue,
        };
        // first occurrence wins
        if !target.is_empty() {
            continue;
        }
        target.extend_from_slice(line[colon + 1..].trim_ascii_start());
        current = Some(target);
    }
    fields
}

/// Address part of a raw `From` value, or its decoded text when no address
/// can be found in it. The address is parsed before decoding so that a
/// display name decoding to specials (`Doe, John`) stays one mailbox.
pub fn extract_sender(raw_from: &[u8]) -> String {
    let mut line = b"From: ".to_vec();
    line.extend_from_slice(raw_from);
    let addr = mailparse::parse_header(&line)
        .ok()
        .and_then(|(header, _)| mailparse::addrparse_header(&header).ok())
        .and_then(|list| {
            list.iter().find_map(|a| match a {
                MailAddr::Single(info) => Some(info.addr.clone()),
                MailAddr::Group(group) => group.addrs.first().map(|i| i.addr.clone()),
            })
        });
    match addr {
        Some(addr) if addr.contains('@') => addr,
        _ => decode_header(raw_from).trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::UNKNOWN_DATE;

    fn blob(header: &[u8]) -> RawHeaderBlob {
        RawHeaderBlob {
            uid: 1,
            header: header.to_vec(),
        }
    }

    #[test]
    fn builds_record_from_headers() {
        let rec = record_from_blob(&blob(
            b"Subject: =?utf-8?B?5Lit5paH?=\r\n\
              Date: Thu, 23 Oct 2014 15:51:57 +0800\r\n\
              From: =?utf-8?Q?Li_Yi?= <lyshie@example.org>\r\n\r\n",
        ));
        assert_eq!(
            rec,
            MessageRecord {
                subject: "中文".into(),
                date_epoch: 1414050717,
                sender: "lyshie@example.org".into(),
            }
        );
    }

    #[test]
    fn absent_fields_become_empty() {
        let rec = record_from_blob(&blob(b"\r\n"));
        assert_eq!(rec.subject, "");
        assert_eq!(rec.date_epoch, UNKNOWN_DATE);
        assert_eq!(rec.sender, "");
    }

    #[test]
    fn folded_subject_is_joined() {
        let rec = record_from_blob(&blob(
            b"Subject: =?utf-8?B?5Lit?=\r\n =?utf-8?B?5paH?=\r\nDate: garbage\r\n\r\n",
        ));
        assert_eq!(rec.subject, "中文");
        assert_eq!(rec.date_epoch, UNKNOWN_DATE);
    }

    #[test]
    fn scanner_handles_continuations_and_case() {
        let fields = scan_fields(b"SUBJECT: part one\r\n\tpart two\r\nnoise line\r\nfrom:  a@b.c\r\n");
        assert_eq!(fields.subject, b"part one\r\n\tpart two");
        assert_eq!(fields.from, b"a@b.c");
        assert!(fields.date.is_empty());
    }

    #[test]
    fn sender_prefers_address() {
        assert_eq!(extract_sender(b"Li Yi <lyshie@example.org>"), "lyshie@example.org");
        assert_eq!(extract_sender(b" lyshie@example.org "), "lyshie@example.org");
        assert_eq!(extract_sender(b"Mailer Daemon"), "Mailer Daemon");
        assert_eq!(extract_sender(b""), "");
    }

    #[test]
    fn encoded_display_name_with_comma_keeps_address() {
        assert_eq!(
            extract_sender(b"=?utf-8?Q?Doe,_John?= <j@example.org>"),
            "j@example.org"
        );
        let rec = record_from_blob(&blob(
            b"Subject: hi\r\nFrom: =?utf-8?Q?Doe,_John?= <j@example.org>\r\n\r\n",
        ));
        assert_eq!(rec.sender, "j@example.org");
    }

    #[test]
    fn undecodable_sender_falls_back_to_decoded_text() {
        assert_eq!(extract_sender(b"=?utf-8?B?5Lit5paH?="), "中文");
    }
}
