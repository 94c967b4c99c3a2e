use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::warn;
use url::Url;

use crate::{error::ExtractError, fetcher::Fetch};

pub mod form_relay;
pub mod key_based;

/// Any absolute url shaped like `http://cdn.host[:port]/<dir>/<name>.<video ext>`.
/// The first match in a response wins.
static GENERIC_FILE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[\w.]+(?::\d{1,5})?/\w+/\w+\.(?:mp4|flv)"#)
        .expect("valid generic file regex")
});

const RELAY_BUTTON: &str = ".buttonlink";

#[derive(Debug)]
pub enum Protocol {
    /// Replays the hidden form of the wait page. Each entry maps a form field
    /// name to the selector locating its input element.
    FormRelay {
        fields: &'static [(&'static str, &'static str)],
    },
    /// Pulls `file` and `filekey` out of the player script and asks the
    /// hoster's player api for the video url.
    KeyBased {
        api: &'static str,
        client_id: &'static str,
        cid: &'static str,
    },
}

#[derive(Debug)]
pub struct HostDescriptor {
    pub name: &'static str,
    pub host: &'static str,
    /// Selector of the download block this hoster gets on an episode page.
    pub marker: &'static str,
    pub cookies: &'static [(&'static str, &'static str)],
    pub protocol: Protocol,
}

const XFS_FIELDS: &[(&str, &str)] = &[
    ("op", "input[type=hidden][name=op]"),
    ("id", "input[type=hidden][name=id]"),
    ("fname", "input[type=hidden][name=fname]"),
    ("method_free", "input[type=hidden][name=method_free]"),
];

const ENGLISH: &[(&str, &str)] = &[("lang", "english")];

pub static GORILLAVID: HostDescriptor = HostDescriptor {
    name: "gorillavid",
    host: "gorillavid.in",
    marker: r#".download_link_gorillavid\.in"#,
    cookies: ENGLISH,
    protocol: Protocol::FormRelay {
        fields: XFS_FIELDS,
    },
};

pub static DACLIPS: HostDescriptor = HostDescriptor {
    name: "daclips",
    host: "daclips.in",
    marker: r#".download_link_daclips\.in"#,
    cookies: ENGLISH,
    protocol: Protocol::FormRelay {
        fields: XFS_FIELDS,
    },
};

pub static VODLOCKER: HostDescriptor = HostDescriptor {
    name: "vodlocker",
    host: "vodlocker.com",
    marker: r#".download_link_vodlocker\.com"#,
    cookies: ENGLISH,
    protocol: Protocol::FormRelay {
        fields: &[
            ("op", "form[method=POST] input[type=hidden][name=op]"),
            ("id", "input[type=hidden][name=id]"),
            ("fname", "input[type=hidden][name=fname]"),
            ("hash", "input[type=hidden][name=hash]"),
            ("imhuman", "input[type=submit][name=imhuman]"),
        ],
    },
};

pub static MOVPOD: HostDescriptor = HostDescriptor {
    name: "movpod",
    host: "movpod.in",
    marker: r#".download_link_movpod\.in"#,
    cookies: ENGLISH,
    protocol: Protocol::FormRelay {
        fields: XFS_FIELDS,
    },
};

pub static NOVAMOV: HostDescriptor = HostDescriptor {
    name: "novamov",
    host: "novamov.com",
    marker: r#".download_link_novamov\.com"#,
    cookies: &[],
    protocol: Protocol::KeyBased {
        api: "http://www.novamov.com/api/player.api.php",
        client_id: "watch-series-tv.to",
        cid: "1",
    },
};

/// Every supported hoster, in the order they are listed on the site.
pub static HOSTS: [&HostDescriptor; 5] = [&GORILLAVID, &DACLIPS, &VODLOCKER, &MOVPOD, &NOVAMOV];

/// A direct file url ready to be handed to the download manager.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedLink {
    pub url: String,
    pub extension: String,
    pub host: &'static str,
}

impl ResolvedLink {
    pub fn new(url: &str, host: &'static str) -> ResolvedLink {
        ResolvedLink {
            url: url.to_string(),
            extension: extension_of(url),
            host,
        }
    }
}

fn extension_of(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let file = path.rsplit('/').next().unwrap_or("");
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_lowercase(),
        _ => String::from("mp4"),
    }
}

pub fn find_file_url(body: &str) -> Option<&str> {
    GENERIC_FILE_REGEX.find(body).map(|m| m.as_str())
}

fn selector(host: &'static str, css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(err) => {
            warn!(host, css, "invalid selector: {:?}", err);
            None
        }
    }
}

impl HostDescriptor {
    /// Whether the episode page offers a download block for this hoster.
    pub fn matches(&self, episode_page: &Html) -> bool {
        selector(self.name, self.marker)
            .map(|marker| episode_page.select(&marker).next().is_some())
            .unwrap_or(false)
    }

    /// The href of the first relay button inside this hoster's block.
    pub fn relay_link(&self, episode_page: &Html) -> Option<String> {
        let marker = selector(self.name, self.marker)?;
        let button = selector(self.name, RELAY_BUTTON)?;
        episode_page
            .select(&marker)
            .next()?
            .select(&button)
            .next()?
            .value()
            .attr("href")
            .map(|href| href.trim().to_string())
    }

    /// Whether `url` points at this hoster or one of its subdomains.
    pub fn owns(&self, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .map(|h| h == self.host || h.ends_with(&format!(".{}", self.host)))
            .unwrap_or(false)
    }

    pub async fn extract_file_url(
        &self,
        fetcher: &dyn Fetch,
        page_url: &str,
    ) -> Result<ResolvedLink, ExtractError> {
        if !self.owns(page_url) {
            Err(ExtractError::malformed(
                self.name,
                format!("{} is not a {} page", page_url, self.host),
            ))?
        }
        match &self.protocol {
            Protocol::FormRelay { fields } => {
                form_relay::extract(self, fields, fetcher, page_url).await
            }
            Protocol::KeyBased {
                api,
                client_id,
                cid,
            } => key_based::extract(self, api, client_id, cid, fetcher, page_url).await,
        }
    }
}

pub fn by_name(name: &str) -> Option<&'static HostDescriptor> {
    HOSTS.iter().copied().find(|h| h.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPISODE_PAGE: &str = r#"
        <html><body>
          <ul id="linktable">
            <li class="download_link_gorillavid.in">
              <a class="buttonlink" href="/cale.html?r=gorilla1">Play</a>
            </li>
            <li class="download_link_novamov.com">
              <a class="buttonlink" href=" /cale.html?r=nova1 ">Play</a>
            </li>
          </ul>
        </body></html>"#;

    #[test]
    fn generic_pattern_finds_file_url() {
        let body = r#"<script>player.setup({file: "http://cdn1.example.com/d/abcDEF.mp4"});</script>"#;
        assert_eq!(
            find_file_url(body),
            Some("http://cdn1.example.com/d/abcDEF.mp4")
        );
    }

    #[test]
    fn generic_pattern_takes_first_match() {
        let body = "http://ads.example.com:8080/x/promo.flv then http://cdn1.example.com/d/abcDEF.mp4";
        assert_eq!(
            find_file_url(body),
            Some("http://ads.example.com:8080/x/promo.flv")
        );
    }

    #[test]
    fn generic_pattern_without_match() {
        assert_eq!(find_file_url("<html>File was removed</html>"), None);
        assert_eq!(find_file_url("http://cdn1.example.com/d/abcDEF.txt"), None);
    }

    #[test]
    fn detects_offered_hosters() {
        let doc = Html::parse_document(EPISODE_PAGE);
        assert!(GORILLAVID.matches(&doc));
        assert!(NOVAMOV.matches(&doc));
        assert!(!DACLIPS.matches(&doc));
        assert!(!VODLOCKER.matches(&doc));
    }

    #[test]
    fn reads_relay_links() {
        let doc = Html::parse_document(EPISODE_PAGE);
        assert_eq!(
            GORILLAVID.relay_link(&doc).as_deref(),
            Some("/cale.html?r=gorilla1")
        );
        assert_eq!(
            NOVAMOV.relay_link(&doc).as_deref(),
            Some("/cale.html?r=nova1")
        );
        assert_eq!(MOVPOD.relay_link(&doc), None);
    }

    #[test]
    fn owns_host_and_subdomains() {
        assert!(GORILLAVID.owns("http://gorillavid.in/a0ftnvspv52c"));
        assert!(GORILLAVID.owns("http://www.gorillavid.in/a0ftnvspv52c"));
        assert!(!GORILLAVID.owns("http://notgorillavid.in/a0ftnvspv52c"));
        assert!(!GORILLAVID.owns("not a url"));
    }

    #[test]
    fn infers_extension() {
        assert_eq!(ResolvedLink::new("http://a.b/d/x.FLV", "x").extension, "flv");
        assert_eq!(ResolvedLink::new("http://a.b/dl/1/2/v.mp4?st=1", "x").extension, "mp4");
        assert_eq!(ResolvedLink::new("http://a.b/d/noext", "x").extension, "mp4");
    }

    #[test]
    fn host_names_are_unique() {
        for host in HOSTS.iter() {
            assert!(std::ptr::eq(by_name(host.name).unwrap(), *host));
        }
    }
}
