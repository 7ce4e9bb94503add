use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use http::{Method, Request, Response, Uri, header, request, response};
use itertools::Itertools;
use log::{debug, trace};
use serde::de::DeserializeOwned;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs, lookup_host},
    task::JoinSet,
};
use tokio_native_tls::{TlsConnector as TokioTlsConnector, native_tls::TlsConnector};

const HAPPY_EYEBALLS_DELAY: Duration = Duration::from_millis(150);
const MAX_HEADERS: usize = 64;
const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

/// Where the sandbox web service lives and how to reach it.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub server_addr: String,
    pub tls: bool,
    pub prefer_ipv6: bool,
}

impl Endpoint {
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}://{}{path}",
            if self.tls { "https" } else { "http" },
            self.server_addr
        )
    }
}

/// Failure of a JSON request. The `Display` output is what gets shown to the user.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{0:#}")]
    Transport(anyhow::Error),
    #[error("invalid JSON in response: {0}")]
    Decode(#[from] serde_json::Error),
}

trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

pub fn basic_request_builder(uri: &str, method: Method) -> anyhow::Result<request::Builder> {
    let uri = uri.parse::<Uri>()?;
    let authority = uri
        .authority()
        .ok_or_else(|| anyhow::anyhow!("URL error: no host name"))?
        .as_str();
    let host = authority
        .find('@')
        .map(|idx| authority.split_at(idx + 1).1)
        .unwrap_or(authority);

    if host.is_empty() {
        anyhow::bail!("URL error: empty host name");
    }

    let req = Request::builder()
        .method(method)
        .header(header::HOST, host)
        .header(header::CONNECTION, "close")
        .header(header::ACCEPT_ENCODING, "identity")
        .uri(&uri);

    Ok(req)
}

/// Sends `req` and decodes the response body as JSON, whatever the status code.
pub async fn fetch_json<T, B>(req: Request<B>, endpoint: &Endpoint) -> Result<T, FetchError>
where
    T: DeserializeOwned,
    B: AsRef<[u8]>,
{
    let target = format!("{} {}", req.method(), req.uri());
    let resp = send_http_request(req, endpoint)
        .await
        .map_err(FetchError::Transport)?;
    debug!("{target} responded with {}", resp.status());

    Ok(serde_json::from_slice(resp.body())?)
}

pub async fn send_http_request<T: AsRef<[u8]>>(
    req: Request<T>,
    endpoint: &Endpoint,
) -> anyhow::Result<Response<Bytes>> {
    let mut stream = connect_tls(&req, endpoint.tls, endpoint.prefer_ipv6).await?;

    stream.write_all(&assemble_http_request(req)?).await?;
    stream.flush().await?;

    let buffer = read_to_eof(&mut stream, MAX_RESPONSE_SIZE).await?;
    trace!("Response: {:?}", String::from_utf8_lossy(&buffer));
    parse_http_response(buffer)
}

/// One request per connection, so the response ends at EOF.
async fn read_to_eof<R: AsyncRead + Unpin>(stream: &mut R, limit: usize) -> anyhow::Result<Bytes> {
    let mut buffer = BytesMut::with_capacity(512);
    while stream.read_buf(&mut buffer).await? != 0 {
        if buffer.len() > limit {
            anyhow::bail!("HTTP error: response exceeds {limit} bytes");
        }
    }

    Ok(buffer.freeze())
}

async fn connect_tls<T>(
    req: &Request<T>,
    tls: bool,
    prefer_ipv6: bool,
) -> anyhow::Result<Box<dyn AsyncReadWrite>> {
    let host = req
        .uri()
        .host()
        .ok_or_else(|| anyhow::anyhow!("URL error: no host name"))?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let port = req.uri().port_u16().unwrap_or(if tls { 443 } else { 80 });
    trace!("connecting to ({host}, {port})");
    let stream = connect_happy_eyeballs((host, port), prefer_ipv6).await?;

    if tls {
        let connector = TokioTlsConnector::from(TlsConnector::new()?);
        Ok(Box::new(connector.connect(host, stream).await?))
    } else {
        Ok(Box::new(stream))
    }
}

async fn connect_happy_eyeballs<A: ToSocketAddrs>(
    addr: A,
    prefer_ipv6: bool,
) -> anyhow::Result<TcpStream> {
    let addrs = {
        let (v4, v6): (Vec<_>, Vec<_>) = lookup_host(addr).await?.partition(|a| a.is_ipv4());

        let (first, second) = if prefer_ipv6 { (v6, v4) } else { (v4, v6) };
        first.into_iter().interleave(second).collect::<Vec<_>>()
    };

    let mut attempts = JoinSet::new();
    let accept = |res: Result<std::io::Result<TcpStream>, tokio::task::JoinError>| match res {
        Ok(Ok(stream)) => {
            debug!(
                "connection established with {}",
                stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "<unknown>".to_owned())
            );
            Some(stream)
        }
        Ok(Err(e)) => {
            trace!("connection attempt failed: {e}");
            None
        }
        Err(e) => {
            trace!("connection attempt panicked: {e}");
            None
        }
    };

    for addr in addrs {
        attempts.spawn(TcpStream::connect(addr));
        // give the newest attempt a head start before racing the next address
        let deadline = tokio::time::sleep(HAPPY_EYEBALLS_DELAY);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;

                Some(res) = attempts.join_next() => {
                    if let Some(stream) = accept(res) {
                        return Ok(stream);
                    }
                    if attempts.is_empty() {
                        break;
                    }
                }
                _ = &mut deadline => break,
            }
        }
    }

    while let Some(res) = attempts.join_next().await {
        if let Some(stream) = accept(res) {
            return Ok(stream);
        }
    }

    Err(anyhow::anyhow!("I/O error: all connection attempts failed"))
}

fn assemble_http_request<T: AsRef<[u8]>>(req: Request<T>) -> anyhow::Result<Bytes> {
    let body = req.body().as_ref();
    let mut buffer = BytesMut::with_capacity(256 + body.len());

    buffer.put_slice(
        format!(
            "{} {} {:?}\r\n",
            req.method(),
            req.uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/"),
            req.version()
        )
        .as_bytes(),
    );

    for (name, value) in req.headers() {
        buffer.put_slice(name.as_str().as_bytes());
        buffer.put_slice(b": ");
        buffer.put_slice(value.as_bytes());
        buffer.put_slice(b"\r\n");
    }
    buffer.put_slice(b"\r\n");
    buffer.put_slice(body);

    trace!("Request: {:?}", String::from_utf8_lossy(&buffer));

    Ok(buffer.freeze())
}

fn parse_http_response(bytes: Bytes) -> anyhow::Result<Response<Bytes>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);

    let body_start_index = match resp.parse(&bytes)? {
        httparse::Status::Complete(idx) => idx,
        httparse::Status::Partial => anyhow::bail!("HTTP error: response is incomplete"),
    };

    let mut chunked = false;
    let mut content_length = None;
    let mut response_builder = response::Builder::new()
        .status(resp.code.unwrap_or(200))
        .version(match resp.version.unwrap_or(1) {
            0 => http::Version::HTTP_10,
            _ => http::Version::HTTP_11,
        });

    for h in resp.headers.iter() {
        if h.name.eq_ignore_ascii_case(header::TRANSFER_ENCODING.as_str()) {
            chunked = String::from_utf8_lossy(h.value)
                .to_ascii_lowercase()
                .contains("chunked");
        } else if h.name.eq_ignore_ascii_case(header::CONTENT_LENGTH.as_str()) {
            content_length = Some(std::str::from_utf8(h.value)?.trim().parse::<usize>()?);
        }
        response_builder = response_builder.header(h.name, h.value);
    }

    let body = bytes.slice(body_start_index..);
    let body = match (chunked, content_length) {
        (true, _) => decode_chunked(&body)?,
        (false, Some(len)) if body.len() < len => {
            anyhow::bail!(
                "HTTP error: body is {} bytes, expected {len}",
                body.len()
            )
        }
        (false, Some(len)) => body.slice(..len),
        (false, None) => body,
    };

    Ok(response_builder.body(body)?)
}

fn decode_chunked(mut rest: &[u8]) -> anyhow::Result<Bytes> {
    let mut decoded = BytesMut::with_capacity(rest.len());

    loop {
        let (start, size) = match httparse::parse_chunk_size(rest) {
            Ok(httparse::Status::Complete(chunk)) => chunk,
            Ok(httparse::Status::Partial) => {
                anyhow::bail!("HTTP error: chunked body is incomplete")
            }
            Err(_) => anyhow::bail!("HTTP error: invalid chunk size"),
        };
        if size == 0 {
            // trailers are ignored
            break;
        }

        let end = usize::try_from(size)
            .ok()
            .and_then(|size| start.checked_add(size))
            .filter(|end| end.checked_add(2).is_some_and(|e| e <= rest.len()))
            .ok_or_else(|| anyhow::anyhow!("HTTP error: chunked body is incomplete"))?;
        if &rest[end..end + 2] != b"\r\n" {
            anyhow::bail!("HTTP error: chunk is not terminated by CRLF");
        }
        decoded.put_slice(&rest[start..end]);
        rest = &rest[end + 2..];
    }

    Ok(decoded.freeze())
}
