use scraper::{Html, Selector};
use tracing::debug;

use crate::{
    cookie::CookieJar,
    error::ExtractError,
    fetcher::{Fetch, Request},
    hoster::{find_file_url, HostDescriptor, ResolvedLink},
};

/// Reads the value of every configured form field from the wait page.
/// An input without a `value` attribute counts as an empty value, a missing
/// input means the page is not the form we expect.
pub fn collect_fields(
    host: &'static str,
    wait_page: &Html,
    fields: &[(&'static str, &'static str)],
) -> Result<Vec<(&'static str, String)>, ExtractError> {
    let mut values = Vec::with_capacity(fields.len());
    for (name, css) in fields {
        let selector = Selector::parse(css)
            .map_err(|err| ExtractError::malformed(host, format!("selector {}: {:?}", css, err)))?;
        let input = wait_page
            .select(&selector)
            .next()
            .ok_or_else(|| ExtractError::not_found(host, format!("form field \"{}\"", name)))?;
        values.push((*name, input.value().attr("value").unwrap_or("").to_string()));
    }
    Ok(values)
}

pub fn encode_form(fields: &[(&str, String)]) -> String {
    fields
        .iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                urlencoding::encode(name),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<String>>()
        .join("&")
}

pub async fn extract(
    descriptor: &HostDescriptor,
    fields: &[(&'static str, &'static str)],
    fetcher: &dyn Fetch,
    page_url: &str,
) -> Result<ResolvedLink, ExtractError> {
    let mut cookies = CookieJar::from_pairs(descriptor.cookies);
    let wait_page = fetcher
        .fetch(Request::get(page_url, descriptor.host).cookies(cookies.clone()))
        .await?;
    let form = {
        let document = wait_page.document();
        collect_fields(descriptor.name, &document, fields)?
    };
    cookies.merge(&wait_page.cookies);
    debug!(host = descriptor.name, fields = form.len(), "replaying wait page form");

    let response = fetcher
        .fetch(
            Request::post(page_url, descriptor.host)
                .body(encode_form(&form))
                .cookies(cookies),
        )
        .await?;
    find_file_url(&response.body)
        .map(|url| ResolvedLink::new(url, descriptor.name))
        .ok_or_else(|| ExtractError::not_found(descriptor.name, "file url"))
}
