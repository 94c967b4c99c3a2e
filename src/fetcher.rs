use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Client, ClientBuilder,
};
use scraper::Html;
use tracing::debug;

use crate::{cookie::CookieJar, error::FetchError};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_10_1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/40.0.2214.91 Safari/537.36";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub url: String,
    /// Host the request is made on behalf of, used for the `Origin` header.
    pub host: String,
    pub body: Option<String>,
    pub cookies: CookieJar,
}

impl Request {
    pub fn get(url: &str, host: &str) -> Request {
        Request {
            method: Method::Get,
            url: url.to_string(),
            host: host.to_string(),
            body: None,
            cookies: CookieJar::new(),
        }
    }

    pub fn post(url: &str, host: &str) -> Request {
        Request {
            method: Method::Post,
            ..Request::get(url, host)
        }
    }

    pub fn body(mut self, body: String) -> Request {
        self.body = Some(body);
        self
    }

    pub fn cookies(mut self, cookies: CookieJar) -> Request {
        self.cookies = cookies;
        self
    }
}

/// A fetched page. `cookies` holds whatever the server set on this response.
#[derive(Clone, Debug)]
pub struct Page {
    pub url: String,
    pub body: String,
    pub cookies: CookieJar,
}

impl Page {
    pub fn document(&self) -> Html {
        Html::parse_document(&self.body)
    }
}

#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Page, FetchError>;
}

/// The one outbound client of a run. Cheap to share, reqwest pools
/// connections internally.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
}

fn client_builder(timeout: Duration) -> ClientBuilder {
    Client::builder().user_agent(USER_AGENT).timeout(timeout)
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<HttpFetcher, reqwest::Error> {
        let client = client_builder(timeout).build()?;
        Ok(HttpFetcher { client })
    }
}

pub fn browser_headers(host: &str, cookies: &CookieJar) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    if let Ok(origin) = HeaderValue::from_str(&format!("http://{}", host)) {
        headers.insert(header::ORIGIN, origin);
    }
    if !cookies.is_empty() {
        if let Ok(cookie) = HeaderValue::from_str(&cookies.serialize()) {
            headers.insert(header::COOKIE, cookie);
        }
    }
    headers
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: Request) -> Result<Page, FetchError> {
        let Request {
            method,
            url: requested,
            host,
            body,
            cookies,
        } = request;
        debug!(method = ?method, url = %requested, "fetching");
        let builder = match method {
            Method::Get => self.client.get(&requested),
            Method::Post => self.client.post(&requested),
        };
        let mut builder = builder.headers(browser_headers(&host, &cookies));
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| FetchError::from_reqwest(&requested, err))?;
        if !response.status().is_success() {
            Err(FetchError::Status {
                url: requested.clone(),
                status: response.status().as_u16(),
            })?
        }
        let url = response.url().to_string();
        let cookies = CookieJar::parse(response.headers().get_all(header::SET_COOKIE).iter());
        let body = response
            .text()
            .await
            .map_err(|err| FetchError::from_reqwest(&requested, err))?;
        Ok(Page { url, body, cookies })
    }
}

#[cfg(test)]
pub mod testing {
    use std::{
        collections::{HashMap, HashSet},
        sync::Mutex,
    };

    use super::*;

    /// Serves canned bodies keyed by method and url and remembers every call.
    /// Unknown urls answer with a 404.
    #[derive(Default)]
    pub struct ScriptedFetcher {
        routes: HashMap<(Method, String), String>,
        cookies: HashMap<String, CookieJar>,
        redirects: HashMap<String, String>,
        timeouts: HashSet<String>,
        calls: Mutex<Vec<Request>>,
    }

    impl ScriptedFetcher {
        pub fn new() -> ScriptedFetcher {
            ScriptedFetcher::default()
        }

        pub fn route(mut self, method: Method, url: &str, body: &str) -> ScriptedFetcher {
            self.routes
                .insert((method, url.to_string()), body.to_string());
            self
        }

        pub fn set_cookies(mut self, url: &str, cookies: CookieJar) -> ScriptedFetcher {
            self.cookies.insert(url.to_string(), cookies);
            self
        }

        /// The page served for `from` reports `to` as its final url.
        pub fn redirect(mut self, from: &str, to: &str) -> ScriptedFetcher {
            self.redirects.insert(from.to_string(), to.to_string());
            self
        }

        pub fn time_out(mut self, url: &str) -> ScriptedFetcher {
            self.timeouts.insert(url.to_string());
            self
        }

        pub fn calls(&self) -> Vec<Request> {
            self.calls.lock().unwrap().clone()
        }

        pub fn called(&self, url: &str) -> bool {
            self.calls().iter().any(|r| r.url == url)
        }
    }

    #[async_trait]
    impl Fetch for ScriptedFetcher {
        async fn fetch(&self, request: Request) -> Result<Page, FetchError> {
            self.calls.lock().unwrap().push(request.clone());
            if self.timeouts.contains(&request.url) {
                return Err(FetchError::Timeout { url: request.url });
            }
            match self.routes.get(&(request.method, request.url.clone())) {
                Some(body) => Ok(Page {
                    url: self
                        .redirects
                        .get(&request.url)
                        .cloned()
                        .unwrap_or_else(|| request.url.clone()),
                    body: body.clone(),
                    cookies: self.cookies.get(&request.url).cloned().unwrap_or_default(),
                }),
                None => Err(FetchError::Status {
                    url: request.url,
                    status: 404,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    use super::*;

    /// Talks to the local test server directly, whatever proxy the
    /// environment configures.
    fn local_fetcher(timeout: Duration) -> HttpFetcher {
        HttpFetcher {
            client: client_builder(timeout).no_proxy().build().unwrap(),
        }
    }

    /// Reads one request, headers and `Content-Length` body, and returns it.
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if raw.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&raw).to_string()
    }

    #[test]
    fn browser_headers_carry_origin_and_cookies() {
        let jar = CookieJar::from_pairs(&[("lang", "english")]);
        let headers = browser_headers("gorillavid.in", &jar);
        assert_eq!(headers[header::ORIGIN], "http://gorillavid.in");
        assert_eq!(headers[header::COOKIE], "lang=english");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(
            headers[header::CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );
    }

    #[test]
    fn browser_headers_skip_empty_cookie_jar() {
        let headers = browser_headers("daclips.in", &CookieJar::new());
        assert!(headers.get(header::COOKIE).is_none());
    }

    #[test]
    fn request_builder_keeps_host_and_body() {
        let request = Request::post("http://movpod.in/abc", "movpod.in").body("op=x".to_string());
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.host, "movpod.in");
        assert_eq!(request.body.as_deref(), Some("op=x"));
    }

    #[tokio::test]
    async fn posts_body_and_captures_set_cookie() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nSet-Cookie: xfss=abc; path=/\r\nContent-Length: 5\r\nConnection: close\r\n\r\nfound",
                )
                .await
                .unwrap();
            request
        });

        let url = format!("http://{}/abc", addr);
        let fetcher = local_fetcher(Duration::from_secs(5));
        let page = fetcher
            .fetch(
                Request::post(&url, "gorillavid.in")
                    .body("op=download1&id=abc".to_string())
                    .cookies(CookieJar::from_pairs(&[("lang", "english")])),
            )
            .await
            .unwrap();

        assert_eq!(page.url, url);
        assert_eq!(page.body, "found");
        assert_eq!(page.cookies.serialize(), "xfss=abc");
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /abc HTTP/1.1"));
        assert!(request.contains("cookie: lang=english"));
        assert!(request.contains("origin: http://gorillavid.in"));
        assert!(request.ends_with("op=download1&id=abc"));
    }

    #[tokio::test]
    async fn silent_server_is_a_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let url = format!("http://{}/", addr);
        let fetcher = local_fetcher(Duration::from_millis(200));
        let err = fetcher.fetch(Request::get(&url, "daclips.in")).await.unwrap_err();
        match err {
            FetchError::Timeout { url: timed_out } => assert_eq!(timed_out, url),
            other => panic!("expected a timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn error_status_is_reported_with_url() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket
                .write_all(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
        });

        let url = format!("http://{}/episode.html", addr);
        let fetcher = local_fetcher(Duration::from_secs(5));
        let err = fetcher.fetch(Request::get(&url, "watchseriestv.to")).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }
}
