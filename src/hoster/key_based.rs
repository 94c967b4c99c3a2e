use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use url::Url;

use crate::{
    cookie::CookieJar,
    error::{ExtractError, FetchError},
    fetcher::{Fetch, Request},
    hoster::{HostDescriptor, ResolvedLink},
};

static FILE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"flashvars\.file="(\w+)";"#).expect("valid file regex"));
static FILEKEY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"flashvars\.filekey="([\w.-]+)""#).expect("valid filekey regex"));
static VIDEO_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[\w.]+/dl/\w+/\w+/\w+\.(?:mp4|flv)"#).expect("valid video regex")
});

#[derive(Debug, PartialEq)]
pub struct FileKeys {
    pub file: String,
    pub key: String,
}

pub fn parse_keys(host: &'static str, body: &str) -> Result<FileKeys, ExtractError> {
    let file = FILE_REGEX
        .captures(body)
        .ok_or_else(|| ExtractError::not_found(host, "flashvars.file"))?[1]
        .to_string();
    let key = FILEKEY_REGEX
        .captures(body)
        .ok_or_else(|| ExtractError::not_found(host, "flashvars.filekey"))?[1]
        .to_string();
    Ok(FileKeys { file, key })
}

pub fn api_url(api: &str, client_id: &str, cid: &str, keys: &FileKeys) -> Result<Url, FetchError> {
    let mut url = Url::parse(api).map_err(|_| FetchError::InvalidUrl(api.to_string()))?;
    url.query_pairs_mut()
        .append_pair("cid3", client_id)
        .append_pair("numOfErrors", "0")
        .append_pair("key", &keys.key)
        .append_pair("file", &keys.file)
        .append_pair("cid", cid);
    Ok(url)
}

pub fn find_video_url(body: &str) -> Option<&str> {
    VIDEO_REGEX.find(body).map(|m| m.as_str())
}

pub async fn extract(
    descriptor: &HostDescriptor,
    api: &str,
    client_id: &str,
    cid: &str,
    fetcher: &dyn Fetch,
    page_url: &str,
) -> Result<ResolvedLink, ExtractError> {
    let cookies = CookieJar::from_pairs(descriptor.cookies);
    let player_page = fetcher
        .fetch(Request::post(page_url, descriptor.host).cookies(cookies.clone()))
        .await?;
    let keys = parse_keys(descriptor.name, &player_page.body)?;
    debug!(host = descriptor.name, file = %keys.file, "asking player api");

    let url = api_url(api, client_id, cid, &keys)?;
    let response = fetcher
        .fetch(Request::get(url.as_str(), descriptor.host).cookies(cookies))
        .await?;
    find_video_url(&response.body)
        .map(|url| ResolvedLink::new(url, descriptor.name))
        .ok_or_else(|| ExtractError::not_found(descriptor.name, "video url"))
}
