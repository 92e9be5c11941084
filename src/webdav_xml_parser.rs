use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::reader::Reader;
use std::str;

use crate::errors::NextcloudError;

/// One `<d:response>` of a multi-status body, with properties taken only
/// from successful propstat blocks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DavResource {
    /// Percent-decoded href as sent by the server
    pub href: String,
    pub display_name: Option<String>,
    pub is_collection: bool,
    pub content_length: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

#[derive(Debug, Default)]
struct PropStat {
    props: DavResource,
    status: Option<u16>,
}

impl PropStat {
    fn merge_into(self, target: &mut DavResource) {
        let props = self.props;
        target.is_collection |= props.is_collection;
        target.display_name = props.display_name.or(target.display_name.take());
        target.content_length = props.content_length.or(target.content_length);
        target.last_modified = props.last_modified.or(target.last_modified);
        target.content_type = props.content_type.or(target.content_type.take());
        target.etag = props.etag.or(target.etag.take());
    }
}

/// Parses a PROPFIND multi-status body into its resources, in document order.
///
/// A body that is not well-formed XML, or has no `multistatus` root, is a
/// protocol error rather than an empty listing.
pub fn parse_multistatus(xml_text: &str) -> Result<Vec<DavResource>, NextcloudError> {
    let mut reader = Reader::from_str(xml_text);
    reader.config_mut().trim_text(true);

    let mut resources = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut current: Option<DavResource> = None;
    let mut propstat: Option<PropStat> = None;
    let mut saw_multistatus = false;

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = get_local_name(&e)?;
                text.clear();
                match name.as_str() {
                    "multistatus" => saw_multistatus = true,
                    "response" => current = Some(DavResource::default()),
                    "propstat" if current.is_some() => propstat = Some(PropStat::default()),
                    _ => {}
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = get_local_name(&e)?;
                match name.as_str() {
                    "multistatus" => saw_multistatus = true,
                    "collection" if stack.last().map(String::as_str) == Some("resourcetype") => {
                        if let Some(ref mut ps) = propstat {
                            ps.props.is_collection = true;
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                let value = e
                    .unescape()
                    .map_err(|e| NextcloudError::protocol(format!("XML parsing error: {}", e)))?;
                text.push_str(&value);
            }
            Ok(Event::CData(e)) => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(e)) => {
                let name = get_local_name_from_end(&e)?;
                stack.pop();
                let parent = stack.last().map(String::as_str);
                let value = text.trim().to_string();
                text.clear();

                match (name.as_str(), parent) {
                    ("href", Some("response")) => {
                        if let Some(ref mut resp) = current {
                            resp.href = urlencoding::decode(&value)
                                .map(|decoded| decoded.into_owned())
                                .unwrap_or(value);
                        }
                    }
                    ("status", Some("propstat")) => {
                        if let Some(ref mut ps) = propstat {
                            ps.status = parse_status_line(&value);
                        }
                    }
                    ("collection", Some("resourcetype")) => {
                        if let Some(ref mut ps) = propstat {
                            ps.props.is_collection = true;
                        }
                    }
                    (prop_name, Some("prop")) if !value.is_empty() => {
                        if let Some(ref mut ps) = propstat {
                            apply_property(&mut ps.props, prop_name, value);
                        }
                    }
                    ("propstat", _) => {
                        if let (Some(ps), Some(resp)) = (propstat.take(), current.as_mut()) {
                            // Missing status is tolerated; non-2xx blocks list absent properties
                            if ps.status.map_or(true, |s| (200..300).contains(&s)) {
                                ps.merge_into(resp);
                            }
                        }
                    }
                    ("response", _) => {
                        if let Some(resp) = current.take() {
                            if resp.href.is_empty() {
                                return Err(NextcloudError::protocol("multistatus response without href"));
                            }
                            resources.push(resp);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(NextcloudError::protocol(format!("XML parsing error: {}", e))),
            _ => {}
        }

        buf.clear();
    }

    if !saw_multistatus {
        return Err(NextcloudError::protocol("response is not a WebDAV multistatus document"));
    }
    if let Some(open) = stack.last() {
        return Err(NextcloudError::protocol(format!("document ends inside <{}>", open)));
    }

    Ok(resources)
}

/// Extracts `<s:message>` from a Sabre/Nextcloud error body
pub fn parse_error_message(body: &str) -> Option<String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut in_message = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                in_message = get_local_name(&e).ok()? == "message";
            }
            Ok(Event::Text(e)) if in_message => {
                let message = e.unescape().ok()?.trim().to_string();
                return if message.is_empty() { None } else { Some(message) };
            }
            Ok(Event::End(_)) => in_message = false,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

fn apply_property(props: &mut DavResource, name: &str, value: String) {
    match name {
        "displayname" => props.display_name = Some(value),
        "getcontentlength" => props.content_length = value.parse().ok(),
        "getlastmodified" => props.last_modified = parse_http_date(&value),
        "getcontenttype" => props.content_type = Some(value),
        "getetag" => props.etag = Some(value),
        _ => {}
    }
}

/// "HTTP/1.1 200 OK" -> 200
fn parse_status_line(line: &str) -> Option<u16> {
    line.split_whitespace().nth(1)?.parse().ok()
}

fn get_local_name(e: &BytesStart) -> Result<String, NextcloudError> {
    let qname = e.name();
    let local = qname.local_name();
    let name = str::from_utf8(local.as_ref())
        .map_err(|e| NextcloudError::protocol(format!("Invalid UTF-8 in element name: {}", e)))?;
    Ok(name.to_string())
}

fn get_local_name_from_end(e: &BytesEnd) -> Result<String, NextcloudError> {
    let qname = e.name();
    let local = qname.local_name();
    let name = str::from_utf8(local.as_ref())
        .map_err(|e| NextcloudError::protocol(format!("Invalid UTF-8 in element name: {}", e)))?;
    Ok(name.to_string())
}

fn parse_http_date(date_str: &str) -> Option<DateTime<Utc>> {
    if date_str.is_empty() {
        return None;
    }

    // WebDAV uses RFC 1123 dates
    DateTime::parse_from_rfc2822(date_str)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            DateTime::parse_from_rfc3339(date_str)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(date_str, "%a, %d %b %Y %H:%M:%S GMT")
                .ok()
                .map(|ndt| DateTime::from_naive_utc_and_offset(ndt, Utc))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_parse_nextcloud_listing() {
        let xml = r#"<?xml version="1.0"?>
        <d:multistatus xmlns:d="DAV:" xmlns:s="http://sabredav.org/ns" xmlns:oc="http://owncloud.org/ns" xmlns:nc="http://nextcloud.org/ns">
            <d:response>
                <d:href>/remote.php/dav/files/admin/Documents/</d:href>
                <d:propstat>
                    <d:prop>
                        <d:displayname>Documents</d:displayname>
                        <d:getlastmodified>Mon, 15 Jan 2024 14:30:00 GMT</d:getlastmodified>
                        <d:getetag>"dir123"</d:getetag>
                        <d:resourcetype><d:collection/></d:resourcetype>
                    </d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
                <d:propstat>
                    <d:prop>
                        <d:getcontentlength/>
                        <d:getcontenttype/>
                    </d:prop>
                    <d:status>HTTP/1.1 404 Not Found</d:status>
                </d:propstat>
            </d:response>
            <d:response>
                <d:href>/remote.php/dav/files/admin/Documents/report.pdf</d:href>
                <d:propstat>
                    <d:prop>
                        <d:displayname>report.pdf</d:displayname>
                        <d:getcontentlength>2048000</d:getcontentlength>
                        <d:getlastmodified>Mon, 15 Jan 2024 14:30:00 GMT</d:getlastmodified>
                        <d:getcontenttype>application/pdf</d:getcontenttype>
                        <d:getetag>"pdf123"</d:getetag>
                        <d:resourcetype/>
                    </d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
            </d:response>
        </d:multistatus>"#;

        let resources = parse_multistatus(xml).unwrap();
        assert_eq!(resources.len(), 2);

        let dir = &resources[0];
        assert!(dir.is_collection);
        assert_eq!(dir.href, "/remote.php/dav/files/admin/Documents/");
        assert_eq!(dir.content_length, None);
        assert_eq!(dir.etag.as_deref(), Some("\"dir123\""));

        let file = &resources[1];
        assert!(!file.is_collection);
        assert_eq!(file.display_name.as_deref(), Some("report.pdf"));
        assert_eq!(file.content_length, Some(2048000));
        assert_eq!(file.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(
            file.last_modified.unwrap().to_rfc3339(),
            "2024-01-15T14:30:00+00:00"
        );
    }

    #[test]
    fn test_hrefs_are_percent_decoded() {
        let xml = r#"<?xml version="1.0"?>
        <d:multistatus xmlns:d="DAV:">
            <d:response>
                <d:href>/webdav/File%20with%20spaces.pdf</d:href>
                <d:propstat>
                    <d:prop><d:resourcetype/></d:prop>
                    <d:status>HTTP/1.1 200 OK</d:status>
                </d:propstat>
            </d:response>
        </d:multistatus>"#;

        let resources = parse_multistatus(xml).unwrap();
        assert_eq!(resources[0].href, "/webdav/File with spaces.pdf");
        assert_eq!(resources[0].display_name, None);
    }

    #[test]
    fn test_other_namespace_prefixes() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
        <D:multistatus xmlns:D="DAV:">
            <D:response>
                <D:href>/dav/folder/</D:href>
                <D:propstat>
                    <D:prop>
                        <D:resourcetype><D:collection></D:collection></D:resourcetype>
                    </D:prop>
                    <D:status>HTTP/1.1 200 OK</D:status>
                </D:propstat>
            </D:response>
        </D:multistatus>"#;

        let resources = parse_multistatus(xml).unwrap();
        assert_eq!(resources.len(), 1);
        assert!(resources[0].is_collection);
    }

    #[test]
    fn test_empty_multistatus() {
        let xml = r#"<?xml version="1.0"?>
        <d:multistatus xmlns:d="DAV:">
        </d:multistatus>"#;

        assert!(parse_multistatus(xml).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_xml_is_protocol_error() {
        let err = parse_multistatus("<d:multistatus xmlns:d=\"DAV:\"><d:response></d:multistatus>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
    }

    #[test]
    fn test_truncated_document_is_protocol_error() {
        let err = parse_multistatus("<d:multistatus xmlns:d=\"DAV:\"><d:response>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
    }

    #[test]
    fn test_non_multistatus_body_is_protocol_error() {
        for body in ["", "<html><body>Login</body></html>", "not xml at all"] {
            let err = parse_multistatus(body).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ProtocolError, "body: {:?}", body);
        }
    }

    #[test]
    fn test_response_without_href_is_protocol_error() {
        let xml = r#"<d:multistatus xmlns:d="DAV:"><d:response><d:propstat/></d:response></d:multistatus>"#;
        assert!(parse_multistatus(xml).is_err());
    }

    #[test]
    fn test_parse_error_message() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
        <d:error xmlns:d="DAV:" xmlns:s="http://sabredav.org/ns">
          <s:exception>Sabre\DAV\Exception\PreconditionFailed</s:exception>
          <s:message>An If-Match header was specified, but none of the specified ETags matched.</s:message>
        </d:error>"#;
        assert_eq!(
            parse_error_message(body).as_deref(),
            Some("An If-Match header was specified, but none of the specified ETags matched.")
        );
        assert_eq!(parse_error_message("plain text"), None);
    }
}
