//! Just enough HTTP/1.1 to receive the OAuth2 redirect on the loopback interface.

use std::str;

use anyhow::Context;
use chrono::Utc;
use http::{HeaderValue, Method, Request, Uri};
use tokio::io;
use util::read_until_pattern;

pub async fn parse_request<R>(reader: R) -> anyhow::Result<Request<Vec<u8>>>
where
    R: io::AsyncBufRead,
{
    use io::AsyncReadExt;

    tokio::pin!(reader);

    const DELIM: &[u8; 2] = b"\r\n";

    let mut buf = Vec::new();
    read_until_pattern(&mut reader, DELIM, &mut buf).await?;
    if buf.is_empty() {
        anyhow::bail!("Empty HTTP request");
    }
    let (method, uri) = parse_command(&buf)?;

    let mut req = Request::builder().method(method).uri(uri);

    let mut content_length: Option<usize> = None;
    loop {
        buf.clear();
        read_until_pattern(&mut reader, DELIM, &mut buf).await?;
        if buf.len() <= 2 {
            break;
        }
        let (name, value) = parse_header(&buf)?;
        if name.eq_ignore_ascii_case("transfer-encoding") {
            anyhow::bail!("Unsupported header: Transfer-Encoding")
        }
        if name.eq_ignore_ascii_case("content-length") {
            content_length = Some(value.parse()?);
        }
        req = req.header(name, value.parse::<HeaderValue>()?);
    }
    buf.clear();
    if let Some(len) = content_length {
        buf.resize(len, 0);
        reader.read_exact(&mut buf).await?;
    }
    Ok(req.body(buf)?)
}

pub(super) fn parse_command(line: &[u8]) -> anyhow::Result<(Method, Uri)> {
    let mut parts = line.split(|b| *b == b' ');
    let line = str::from_utf8(line)?;

    let method = parts
        .next()
        .with_context(|| format!("no method in header {line}"))?;
    let method = Method::from_bytes(method)
        .with_context(|| format!("Unrecognized method: {}", String::from_utf8_lossy(method)))?;

    let uri = parts
        .next()
        .with_context(|| format!("no path in HTTP header {line}"))?;
    let uri = uri.try_into()?;

    let protocol = parts
        .next()
        .with_context(|| format!("no protocol in HTTP header {line}"))?;
    if protocol != b"HTTP/1.1\r\n" {
        anyhow::bail!("unsupported HTTP protocol in header {line}");
    }
    Ok((method, uri))
}

pub(super) fn parse_header(line: &[u8]) -> anyhow::Result<(&str, &str)> {
    let line = str::from_utf8(line)?;
    let (name, value) = line
        .split_once(':')
        .with_context(|| format!("Invalid header: {line}"))?;
    Ok((name.trim(), value.trim()))
}

pub async fn write_response<W, B>(resp: http::Response<B>, writer: W) -> anyhow::Result<()>
where
    W: io::AsyncWrite,
    B: AsRef<[u8]>,
{
    use io::AsyncWriteExt;

    let (parts, body) = resp.into_parts();

    let has_body = !body.as_ref().is_empty();

    let has_date = parts.headers.contains_key("date");
    let has_server = parts.headers.contains_key("server");
    let has_content_length = parts.headers.contains_key("content-length");

    tokio::pin!(writer);
    writer
        .write_all(format!("{:?} {}\r\n", parts.version, parts.status).as_bytes())
        .await?;
    if !has_date {
        writer
            .write_all(format!("Date: {}\r\n", Utc::now().to_rfc2822()).as_bytes())
            .await?;
    }
    if !has_server {
        writer.write_all(b"Server: dmirror\r\n").await?;
    }
    if has_body && !has_content_length {
        writer
            .write_all(format!("Content-Length: {}\r\n", body.as_ref().len()).as_bytes())
            .await?;
    }
    for (name, value) in parts.headers.iter() {
        writer.write_all(format!("{name}: ").as_bytes()).await?;
        writer.write_all(value.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
    }
    writer.write_all(b"\r\n").await?;
    if has_body {
        writer.write_all(body.as_ref()).await?;
    }
    writer.flush().await?;
    Ok(())
}

mod util {
    use tokio::io::{self, AsyncReadExt};

    /// Read from reader until either pattern or EOF is found.
    /// Pattern is included in the buffer.
    pub(super) async fn read_until_pattern<R>(
        reader: R,
        pattern: &[u8],
        buf: &mut Vec<u8>,
    ) -> anyhow::Result<usize>
    where
        R: io::AsyncBufRead,
    {
        use io::AsyncBufReadExt;

        debug_assert!(!pattern.is_empty());
        tokio::pin!(reader);
        let mut bb: [u8; 1] = [0];
        let mut len = 0;
        'outer: loop {
            let sz = reader.read_until(pattern[0], buf).await?;
            if sz == 0 {
                break;
            }
            len += sz;
            for c in pattern[1..].iter() {
                let sz = reader.read(&mut bb[..]).await?;
                if sz == 0 {
                    break 'outer;
                }
                len += sz;
                buf.push(bb[0]);
                if bb[0] != *c {
                    continue 'outer;
                }
            }
            break;
        }
        Ok(len)
    }
}
