//! Raw-to-canonical message mapping
//!
//! Pure transformation from the Gmail wire representation (a MIME-like
//! header/part tree) into the canonical [`EmailMessage`] model. No I/O, no
//! mutable state; every input shape maps to a message, never an error. A
//! message with no payload at all yields a message with every optional field
//! empty.
//!
//! HTML bodies are sanitized with `ammonia` before they reach callers.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, FixedOffset};

use crate::gmail::{RawHeader, RawMessage, RawMessagePart};
use crate::models::{EmailAddress, EmailAttachment, EmailMessage};

/// Reserved label marking unread messages
const UNREAD_LABEL: &str = "UNREAD";

/// Fallback content type for attachments that do not declare one
const OCTET_STREAM: &str = "application/octet-stream";

/// Map a raw message to the canonical model
///
/// With `include_body` false (summary fetches) both body fields stay `None`
/// by contract; list and search callers rely on that, not on empty strings.
pub fn map_message(raw: &RawMessage, include_body: bool) -> EmailMessage {
    let headers: &[RawHeader] = raw
        .payload
        .as_ref()
        .map(|p| p.headers.as_slice())
        .unwrap_or_default();

    let body = include_body
        .then(|| raw.payload.as_ref().and_then(|p| extract_body(p, "text/plain")))
        .flatten();
    let body_html = include_body
        .then(|| {
            raw.payload
                .as_ref()
                .and_then(|p| extract_body(p, "text/html"))
                .map(|html| ammonia::clean(&html))
        })
        .flatten();

    EmailMessage {
        id: raw.id.clone(),
        thread_id: raw.thread_id.clone().unwrap_or_else(|| raw.id.clone()),
        subject: header(headers, "Subject").map(str::to_owned),
        from: parse_address(header(headers, "From")),
        to: parse_address_list(header(headers, "To")),
        cc: parse_address_list(header(headers, "Cc")),
        bcc: parse_address_list(header(headers, "Bcc")),
        date: parse_date(header(headers, "Date")),
        snippet: raw.snippet.clone(),
        body,
        body_html,
        is_unread: raw.label_ids.iter().any(|l| l == UNREAD_LABEL),
        label_ids: raw.label_ids.clone(),
        attachments: extract_attachments(raw.payload.as_ref()),
    }
}

/// First header value matching `name`, case-insensitively
fn header<'a>(headers: &'a [RawHeader], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Parse a single address header value
///
/// Recognizes the `Display Name <address>` shape; anything that does not
/// parse falls back to the entire trimmed string as a bare address. Only an
/// empty/whitespace value yields `None`; a malformed value is never dropped.
pub fn parse_address(raw: Option<&str>) -> Option<EmailAddress> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some((name_part, rest)) = trimmed.rsplit_once('<') {
        if let Some(address) = rest.strip_suffix('>') {
            let address = address.trim();
            if !address.is_empty() {
                let name = name_part.trim().trim_matches('"').trim();
                return Some(EmailAddress {
                    address: address.to_owned(),
                    display_name: (!name.is_empty()).then(|| name.to_owned()),
                });
            }
        }
    }

    Some(EmailAddress::bare(trimmed))
}

/// Parse a multi-address header value
///
/// Splits on commas, trims, drops empty entries, and parses each address
/// independently in header order.
pub fn parse_address_list(raw: Option<&str>) -> Vec<EmailAddress> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| parse_address(Some(entry)))
        .collect()
}

/// Best-effort parse of a Date header
///
/// RFC 2822 first (the normal mail form), RFC 3339 as fallback; anything
/// unparsable is `None`, never an error.
fn parse_date(raw: Option<&str>) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(trimmed)
        .or_else(|_| DateTime::parse_from_rfc3339(trimmed))
        .ok()
}

/// Depth-first search for the first part of the requested content type
///
/// Content type comparison is exact and case-insensitive. The node itself is
/// a candidate when it carries inline data (non-multipart messages put the
/// body on the root part); children are visited in natural order and the
/// first match wins.
fn extract_body(part: &RawMessagePart, mime_type: &str) -> Option<String> {
    if part
        .mime_type
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case(mime_type))
    {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
            if let Some(text) = decode_base64url(data) {
                return Some(text);
            }
        }
    }

    part.parts
        .iter()
        .find_map(|child| extract_body(child, mime_type))
}

/// Decode base64url part data into UTF-8 text
///
/// The provider serves the URL-safe alphabet, usually unpadded: `-`/`_` are
/// remapped to `+`/`/` and `=` padding re-appended for remainder lengths 2
/// and 3 before standard decoding.
fn decode_base64url(data: &str) -> Option<String> {
    let mut standard: String = data
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    match standard.len() % 4 {
        2 => standard.push_str("=="),
        3 => standard.push('='),
        _ => {}
    }

    let bytes = BASE64.decode(standard).ok()?;
    String::from_utf8(bytes).ok()
}

/// Collect attachments from the direct children of the payload
///
/// Only first-level parts with a non-empty filename count as attachments;
/// nested parts are body structure, not attachments. Size and the provider
/// handle come from the part's body metadata.
fn extract_attachments(payload: Option<&RawMessagePart>) -> Vec<EmailAttachment> {
    let Some(payload) = payload else {
        return Vec::new();
    };
    payload
        .parts
        .iter()
        .filter_map(|part| {
            let filename = part.filename.as_deref().filter(|f| !f.is_empty())?;
            Some(EmailAttachment {
                filename: filename.to_owned(),
                mime_type: part
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| OCTET_STREAM.to_owned()),
                size: part.body.as_ref().and_then(|b| b.size).unwrap_or(0),
                attachment_id: part.body.as_ref().and_then(|b| b.attachment_id.clone()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::{map_message, parse_address, parse_address_list};
    use crate::gmail::{RawBody, RawHeader, RawMessage, RawMessagePart};

    fn b64url(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text.as_bytes())
    }

    fn leaf(mime_type: &str, data: &str) -> RawMessagePart {
        RawMessagePart {
            mime_type: Some(mime_type.to_owned()),
            body: Some(RawBody {
                data: Some(data.to_owned()),
                size: Some(data.len() as i64),
                ..RawBody::default()
            }),
            ..RawMessagePart::default()
        }
    }

    fn message_with_payload(payload: RawMessagePart) -> RawMessage {
        RawMessage {
            id: "m1".to_owned(),
            thread_id: Some("t1".to_owned()),
            payload: Some(payload),
            ..RawMessage::default()
        }
    }

    #[test]
    fn parses_display_name_and_bare_addresses() {
        let named = parse_address(Some("John Doe <john@example.com>")).expect("address");
        assert_eq!(named.address, "john@example.com");
        assert_eq!(named.display_name.as_deref(), Some("John Doe"));

        let quoted = parse_address(Some("\"Doe, John\" <john@example.com>")).expect("address");
        assert_eq!(quoted.display_name.as_deref(), Some("Doe, John"));

        let bare = parse_address(Some("john@example.com")).expect("address");
        assert_eq!(bare.address, "john@example.com");
        assert_eq!(bare.display_name, None);

        assert_eq!(parse_address(Some("")), None);
        assert_eq!(parse_address(Some("   ")), None);
        assert_eq!(parse_address(None), None);
    }

    #[test]
    fn malformed_address_falls_back_to_bare_string() {
        let odd = parse_address(Some("Broken <>")).expect("never dropped");
        assert_eq!(odd.address, "Broken <>");
        assert_eq!(odd.display_name, None);
    }

    #[test]
    fn splits_multi_address_headers_in_order() {
        let list = parse_address_list(Some("alice@test.com, Bob <bob@test.com>, ,"));
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].address, "alice@test.com");
        assert_eq!(list[1].address, "bob@test.com");
        assert_eq!(list[1].display_name.as_deref(), Some("Bob"));
    }

    #[test]
    fn unread_follows_reserved_label() {
        let mut raw = message_with_payload(RawMessagePart::default());
        raw.label_ids = vec!["INBOX".to_owned(), "UNREAD".to_owned()];
        assert!(map_message(&raw, false).is_unread);

        raw.label_ids = vec!["INBOX".to_owned()];
        assert!(!map_message(&raw, false).is_unread);
    }

    #[test]
    fn extracts_base64url_plain_text_body() {
        // "Hello, World!" is 13 bytes, so the unpadded form exercises the
        // remainder-2 re-padding rule.
        let raw = message_with_payload(RawMessagePart {
            mime_type: Some("multipart/alternative".to_owned()),
            parts: vec![leaf("text/plain", &b64url("Hello, World!"))],
            ..RawMessagePart::default()
        });

        let mapped = map_message(&raw, true);
        assert_eq!(mapped.body.as_deref(), Some("Hello, World!"));
    }

    #[test]
    fn body_search_is_depth_first_and_first_match_wins() {
        let nested = RawMessagePart {
            mime_type: Some("multipart/mixed".to_owned()),
            parts: vec![
                RawMessagePart {
                    mime_type: Some("multipart/alternative".to_owned()),
                    parts: vec![leaf("TEXT/PLAIN", &b64url("first"))],
                    ..RawMessagePart::default()
                },
                leaf("text/plain", &b64url("second")),
            ],
            ..RawMessagePart::default()
        };

        let mapped = map_message(&message_with_payload(nested), true);
        assert_eq!(mapped.body.as_deref(), Some("first"));
    }

    #[test]
    fn summary_fetch_leaves_bodies_unset() {
        let raw = message_with_payload(leaf("text/plain", &b64url("content")));
        let mapped = map_message(&raw, false);
        assert_eq!(mapped.body, None);
        assert_eq!(mapped.body_html, None);
    }

    #[test]
    fn html_body_is_sanitized() {
        let html = "<script>alert(1)</script><b>hi</b>";
        let raw = message_with_payload(leaf("text/html", &b64url(html)));

        let mapped = map_message(&raw, true);
        let body_html = mapped.body_html.expect("html body");
        assert!(!body_html.contains("script"));
        assert!(body_html.contains("<b>hi</b>"));
    }

    #[test]
    fn only_named_direct_children_become_attachments() {
        let payload = RawMessagePart {
            mime_type: Some("multipart/mixed".to_owned()),
            parts: vec![
                leaf("text/plain", &b64url("body")),
                RawMessagePart {
                    mime_type: Some("application/pdf".to_owned()),
                    filename: Some("report.pdf".to_owned()),
                    body: Some(RawBody {
                        attachment_id: Some("att-1".to_owned()),
                        size: Some(2048),
                        data: None,
                    }),
                    ..RawMessagePart::default()
                },
                RawMessagePart {
                    filename: Some("notes.txt".to_owned()),
                    body: Some(RawBody {
                        size: Some(10),
                        ..RawBody::default()
                    }),
                    ..RawMessagePart::default()
                },
            ],
            ..RawMessagePart::default()
        };

        let mapped = map_message(&message_with_payload(payload), false);
        assert_eq!(mapped.attachments.len(), 2);
        assert_eq!(mapped.attachments[0].filename, "report.pdf");
        assert_eq!(mapped.attachments[0].mime_type, "application/pdf");
        assert_eq!(mapped.attachments[0].size, 2048);
        assert_eq!(mapped.attachments[0].attachment_id.as_deref(), Some("att-1"));
        // Missing content type defaults to the generic octet-stream.
        assert_eq!(mapped.attachments[1].mime_type, "application/octet-stream");
    }

    #[test]
    fn headers_resolve_case_insensitively_with_first_match() {
        let payload = RawMessagePart {
            headers: vec![
                RawHeader {
                    name: "SUBJECT".to_owned(),
                    value: "first".to_owned(),
                },
                RawHeader {
                    name: "Subject".to_owned(),
                    value: "second".to_owned(),
                },
                RawHeader {
                    name: "Date".to_owned(),
                    value: "Wed, 1 Jan 2025 08:30:00 +0200".to_owned(),
                },
            ],
            ..RawMessagePart::default()
        };

        let mapped = map_message(&message_with_payload(payload), false);
        assert_eq!(mapped.subject.as_deref(), Some("first"));
        let date = mapped.date.expect("date parses");
        assert_eq!(date.format("%Y-%m-%d %H:%M %:z").to_string(), "2025-01-01 08:30 +02:00");
    }

    #[test]
    fn unparsable_date_is_none() {
        let payload = RawMessagePart {
            headers: vec![RawHeader {
                name: "Date".to_owned(),
                value: "sometime last week".to_owned(),
            }],
            ..RawMessagePart::default()
        };
        assert_eq!(map_message(&message_with_payload(payload), false).date, None);
    }

    #[test]
    fn missing_payload_maps_to_empty_message() {
        let raw = RawMessage {
            id: "m1".to_owned(),
            thread_id: None,
            ..RawMessage::default()
        };

        let mapped = map_message(&raw, true);
        assert_eq!(mapped.id, "m1");
        assert_eq!(mapped.thread_id, "m1");
        assert_eq!(mapped.subject, None);
        assert_eq!(mapped.from, None);
        assert!(mapped.to.is_empty());
        assert_eq!(mapped.body, None);
        assert!(mapped.attachments.is_empty());
    }
}
