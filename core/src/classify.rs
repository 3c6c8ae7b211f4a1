//! Response classification: turns an `HttpResponse` into a JSON value or a
//! typed `Error`.
//!
//! # Design
//! The appliance answers with structured JSON from its API layer, but errors
//! raised by the web container in front of it arrive as HTML pages. Both end
//! up as `HttpError`; the HTML case gets the `REASON_UNAVAILABLE` sentinel and
//! a message scraped from the page. No real HTML parsing is attempted, only
//! enough string surgery to make the console's error pages readable.

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, HttpError, Result, REASON_UNAVAILABLE};
use crate::http::{HttpRequest, HttpResponse};
use crate::types::ErrorBody;

/// Title used when an HTML error page has neither `<title>` nor `<h1>`.
const DEFAULT_HTML_TITLE: &str = "Console Internal Error";

/// Classify `response`, which was received for `request`.
///
/// Returns `Ok(None)` for a success without a body, `Ok(Some(value))` for a
/// success with a JSON body, and an error otherwise.
pub fn classify(request: &HttpRequest, response: &HttpResponse) -> Result<Option<Value>> {
    debug!(
        status = response.status,
        request_id = response.header("x-request-id"),
        "{} {}",
        request.method,
        request.uri
    );

    if response.is_success() {
        return success_value(response);
    }

    Err(Error::Http(http_error(request, response)))
}

fn success_value(response: &HttpResponse) -> Result<Option<Value>> {
    if response.body.is_empty() {
        return Ok(None);
    }
    match response.content_type() {
        None => parse_json(&response.body).map(Some),
        Some(ct) if is_json(ct) => parse_json(&response.body).map(Some),
        Some(ct) => Err(Error::parse(format!(
            "unexpected content type in response: {ct}"
        ))),
    }
}

/// Strictly parse `body`, reporting the parser's position on failure.
pub fn parse_json(body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|err| {
        let text = err.to_string();
        // serde_json appends " at line L column C" to positioned errors
        let message = match text.rfind(" at line ") {
            Some(idx) if err.line() > 0 => text[..idx].to_string(),
            _ => text,
        };
        Error::Parse {
            message,
            line: (err.line() > 0).then(|| err.line()),
            column: (err.line() > 0).then(|| err.column()),
        }
    })
}

fn http_error(request: &HttpRequest, response: &HttpResponse) -> HttpError {
    let (http_status, reason, message) = match response.content_type() {
        _ if response.body.is_empty() => unavailable(response.status),
        None => structured(response),
        Some(ct) if is_json(ct) => structured(response),
        Some(ct) if media_type(ct) == "text/html" => {
            let page = decode(&response.body, ct);
            (response.status, REASON_UNAVAILABLE, html_message(&page))
        }
        Some(ct) if media_type(ct) == "text/plain" => {
            let text = decode(&response.body, ct);
            (response.status, REASON_UNAVAILABLE, fold_newlines(text.trim()))
        }
        Some(_) => unavailable(response.status),
    };

    HttpError {
        http_status,
        reason,
        message,
        request_uri: request.uri.clone(),
        request_method: request.method,
    }
}

fn structured(response: &HttpResponse) -> (u16, u32, String) {
    let body = match serde_json::from_slice::<ErrorBody>(&response.body) {
        Ok(body) => body,
        Err(err) => {
            debug!(%err, "error response carries unparseable JSON");
            return unavailable(response.status);
        }
    };
    let (_, _, generic) = unavailable(response.status);
    (
        body.http_status.unwrap_or(response.status),
        body.reason.unwrap_or(REASON_UNAVAILABLE),
        body.message.unwrap_or(generic),
    )
}

fn unavailable(status: u16) -> (u16, u32, String) {
    (
        status,
        REASON_UNAVAILABLE,
        format!("HTTP status {status} returned with no usable error details"),
    )
}

fn is_json(content_type: &str) -> bool {
    let media = media_type(content_type);
    media == "application/json" || media.ends_with("+json")
}

fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
    })
}

/// Decode a text body. Latin-1 is decoded byte-for-byte; every other (or an
/// unknown) charset is read as UTF-8.
fn decode(body: &[u8], content_type: &str) -> String {
    match charset(content_type).as_deref() {
        Some("iso-8859-1" | "latin1" | "latin-1") => body.iter().map(|&b| char::from(b)).collect(),
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}

/// Replace every line break with a literal `\n`.
fn fold_newlines(text: &str) -> String {
    text.replace("\r\n", "\\n")
        .replace('\r', "\\n")
        .replace('\n', "\\n")
}

/// Build `"<title>: <details>"` from a console error page. Tags are matched
/// without regard to case.
fn html_message(page: &str) -> String {
    let page = fold_newlines(page);
    // same byte offsets as `page`
    let lower = page.to_ascii_lowercase();

    let title = between(&page, &lower, "<title>", "</title>")
        .or_else(|| between(&page, &lower, "<h1>", "</h1>"))
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    let details_start = lower
        .find("<h2>details:</h2>")
        .map(|idx| idx + "<h2>details:</h2>".len())
        .or_else(|| lower.find("</h1>").map(|idx| idx + "</h1>".len()));

    match (title, details_start) {
        (Some(title), Some(start)) => {
            let rest = &lower[start..];
            let end = rest
                .find("<hr")
                .or_else(|| rest.find("</body>"))
                .unwrap_or(rest.len());
            format!("{title}: {}", readable_details(&page[start..start + end]))
        }
        (Some(title), None) => title,
        (None, _) => format!("{DEFAULT_HTML_TITLE}: Response body: {page}"),
    }
}

fn readable_details(raw: &str) -> String {
    let mut text = raw.to_string();
    for tag in ["<p>", "<P>", "<br>", "<BR>"] {
        text = text.replace(tag, "\\n");
    }
    while text.contains("\\n\\n") {
        text = text.replace("\\n\\n", "\\n");
    }
    text.trim().to_string()
}

/// Slice of `text` between the first `open` and the following `close`, both
/// searched for in `lower`, the lowercase copy of `text`.
fn between<'a>(text: &'a str, lower: &str, open: &str, close: &str) -> Option<&'a str> {
    let start = lower.find(open)? + open.len();
    let len = lower[start..].find(close)?;
    Some(&text[start..start + len])
}
