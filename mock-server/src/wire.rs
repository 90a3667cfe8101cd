//! Multipart batch parsing and writing, independent of the client crate.

/// One embedded HTTP request taken from a batch part.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedRequest {
    pub content_id: Option<String>,
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl EmbeddedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A top-level part of an incoming batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchPart {
    Request(EmbeddedRequest),
    ChangeSet(Vec<EmbeddedRequest>),
}

/// A reply to one embedded request.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedResponse {
    pub content_id: Option<String>,
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub body: String,
}

/// A reply to one top-level part.
#[derive(Debug, Clone, PartialEq)]
pub enum PartResponse {
    Single(EmbeddedResponse),
    ChangeSet(Vec<EmbeddedResponse>),
}

pub fn boundary_of(content_type: &str) -> Option<String> {
    let (media_type, params) = content_type.split_once(';')?;
    if !media_type.trim().eq_ignore_ascii_case("multipart/mixed") {
        return None;
    }
    params.split(';').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

fn split<'a>(lines: &[&'a str], boundary: &str) -> Vec<Vec<&'a str>> {
    let open = format!("--{boundary}");
    let close = format!("--{boundary}--");
    let mut parts = Vec::new();
    let mut current: Option<Vec<&'a str>> = None;
    for line in lines {
        if *line == close {
            break;
        }
        if *line == open {
            if let Some(part) = current.replace(Vec::new()) {
                parts.push(part);
            }
        } else if let Some(part) = current.as_mut() {
            part.push(*line);
        }
    }
    if let Some(part) = current {
        parts.push(part);
    }
    parts
}

/// Split a part into its header lines and the lines after the first blank line.
fn head_and_rest<'a, 'b>(lines: &'b [&'a str]) -> (&'b [&'a str], &'b [&'a str]) {
    let start = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
    let lines = &lines[start..];
    match lines.iter().position(|l| l.is_empty()) {
        Some(end) => (&lines[..end], &lines[end + 1..]),
        None => (lines, &[]),
    }
}

fn parse_headers(lines: &[&str]) -> Vec<(String, String)> {
    lines
        .iter()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn parse_request(lines: &[&str]) -> Result<EmbeddedRequest, String> {
    let (part_head, rest) = head_and_rest(lines);
    let part_headers = parse_headers(part_head);
    let (http_head, body) = head_and_rest(rest);
    let (request_line, headers) = http_head.split_first().ok_or("missing request line")?;
    let mut fields = request_line.split(' ');
    let method = fields.next().unwrap_or_default().to_string();
    let url = fields.next().ok_or("missing request target")?.to_string();

    let body = body.join("\r\n");
    Ok(EmbeddedRequest {
        content_id: find_header(&part_headers, "content-id").map(str::to_string),
        method,
        url,
        headers: parse_headers(headers),
        body: body.trim_end().to_string(),
    })
}

/// Parse a `multipart/mixed` batch body.
pub fn parse_batch(body: &str, boundary: &str) -> Result<Vec<BatchPart>, String> {
    let lines: Vec<&str> = body.lines().collect();
    split(&lines, boundary)
        .into_iter()
        .map(|part| {
            let (head, _) = head_and_rest(&part);
            let headers = parse_headers(head);
            match find_header(&headers, "content-type").and_then(boundary_of) {
                Some(nested) => split(&part, &nested)
                    .iter()
                    .map(|p| parse_request(p))
                    .collect::<Result<Vec<_>, _>>()
                    .map(BatchPart::ChangeSet),
                None => parse_request(&part).map(BatchPart::Request),
            }
        })
        .collect()
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Unknown",
    }
}

fn write_response(out: &mut String, response: &EmbeddedResponse) {
    out.push_str("Content-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n");
    if let Some(id) = &response.content_id {
        out.push_str(&format!("Content-ID: {id}\r\n"));
    }
    out.push_str(&format!("\r\nHTTP/1.1 {} {}\r\n", response.status, reason(response.status)));
    if let Some(content_type) = response.content_type {
        out.push_str(&format!("Content-Type: {content_type}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", response.body.len()));
    out.push_str(&response.body);
    out.push_str("\r\n");
}

/// Write the batch reply body delimited by `boundary`.
pub fn write_batch(parts: &[PartResponse], boundary: &str) -> String {
    let mut out = String::new();
    for part in parts {
        out.push_str(&format!("--{boundary}\r\n"));
        match part {
            PartResponse::Single(response) => write_response(&mut out, response),
            PartResponse::ChangeSet(responses) => {
                let nested = format!("changesetresponse_{}", uuid::Uuid::new_v4());
                out.push_str(&format!("Content-Type: multipart/mixed; boundary={nested}\r\n\r\n"));
                for response in responses {
                    out.push_str(&format!("--{nested}\r\n"));
                    write_response(&mut out, response);
                }
                out.push_str(&format!("--{nested}--\r\n"));
            }
        }
    }
    out.push_str(&format!("--{boundary}--\r\n"));
    out
}
