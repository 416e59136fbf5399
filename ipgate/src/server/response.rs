use bytes::Bytes;
use pingora::http::ResponseHeader;
use pingora_proxy::Session;
use serde::Serialize;

pub const INTERNAL_ERROR_CODE: &str = "server.internal_error";

#[derive(Serialize)]
struct ErrorBody<'a> {
    errors: [&'a str; 1],
}

/// `{"errors":["<code>"]}`
pub fn error_body(code: &str) -> Bytes {
    let body = ErrorBody { errors: [code] };
    Bytes::from(serde_json::to_vec(&body).unwrap_or_default())
}

pub async fn write_json_error(
    session: &mut Session,
    status: u16,
    code: &str,
    request_id: &str,
) -> pingora::Result<()> {
    let body = error_body(code);
    let len = body.len().to_string();

    let mut resp = ResponseHeader::build(status, None)?;
    resp.insert_header("content-type", "application/json")?;
    resp.insert_header("content-length", len.as_str())?;
    resp.insert_header("cache-control", "no-store")?;
    resp.insert_header("x-request-id", request_id)?;

    session.write_response_header(Box::new(resp), false).await?;
    session.write_response_body(Some(body), true).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_shape() {
        assert_eq!(
            &error_body("authz.restrict.blacklist")[..],
            br#"{"errors":["authz.restrict.blacklist"]}"#
        );
        assert_eq!(&error_body(INTERNAL_ERROR_CODE)[..], br#"{"errors":["server.internal_error"]}"#);
    }
}
