use once_cell::sync::Lazy;
use scraper::Selector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{ExtractError, FetchError},
    fetcher::{Fetch, Request},
    hoster::{HostDescriptor, ResolvedLink},
    registry::{Registry, TrialOrder},
};

static HOSTER_BUTTON: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".push_button.blue").expect("valid hoster button selector"));

/// Where one episode stands while its hosters are tried.
#[derive(Debug, PartialEq)]
pub enum State {
    /// Episode page not fetched yet.
    Pending,
    /// Trying the candidate at this index of the trial order.
    Trying(usize),
    Resolved(ResolvedLink),
    Exhausted,
}

/// A hoster offered on the episode page together with its relay href.
/// `page_url` is where the episode page was finally served from, relay
/// hrefs are relative to it.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub host: &'static HostDescriptor,
    pub relay: Option<String>,
    pub page_url: String,
}

#[derive(Debug)]
pub struct Failure {
    pub host: &'static str,
    pub error: ExtractError,
}

#[derive(Debug)]
pub enum Resolution {
    Resolved {
        link: ResolvedLink,
        failures: Vec<Failure>,
    },
    Exhausted {
        failures: Vec<Failure>,
    },
    Cancelled,
}

pub fn host_of(url: &str) -> Result<String, FetchError> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))
}

fn join(base: &str, href: &str) -> Option<String> {
    Url::parse(base)
        .and_then(|base| base.join(href))
        .map(String::from)
        .ok()
}

pub struct Resolver<F> {
    fetcher: F,
    registry: Registry,
}

impl<F: Fetch> Resolver<F> {
    pub fn new(fetcher: F, registry: Registry) -> Resolver<F> {
        Resolver { fetcher, registry }
    }

    #[cfg(test)]
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Fetches the episode page and lists the hosters it offers in the order
    /// they are going to be tried.
    pub async fn candidates<O>(
        &self,
        episode_url: &str,
        order: &mut O,
    ) -> Result<Vec<Candidate>, FetchError>
    where
        O: TrialOrder + ?Sized,
    {
        let page = self
            .fetcher
            .fetch(Request::get(episode_url, &host_of(episode_url)?))
            .await?;
        let document = page.document();
        let mut hosts = self.registry.applicable(&document);
        order.arrange(&mut hosts);
        Ok(hosts
            .into_iter()
            .map(|host| Candidate {
                host,
                relay: host.relay_link(&document),
                page_url: page.url.clone(),
            })
            .collect())
    }

    /// Follows the relay hop shared by all hosters and runs the hoster's
    /// extraction on the page it leads to.
    pub async fn attempt(&self, candidate: &Candidate) -> Result<ResolvedLink, ExtractError> {
        let name = candidate.host.name;
        let relay = candidate
            .relay
            .as_deref()
            .ok_or_else(|| ExtractError::not_found(name, "relay link"))?;
        let cale_url = join(&candidate.page_url, relay)
            .ok_or_else(|| ExtractError::malformed(name, format!("bad relay link {}", relay)))?;
        let cale = self
            .fetcher
            .fetch(Request::get(&cale_url, &host_of(&cale_url)?))
            .await?;
        let hoster_url = {
            let document = cale.document();
            let href = document
                .select(&HOSTER_BUTTON)
                .next()
                .and_then(|button| button.value().attr("href"))
                .ok_or_else(|| ExtractError::not_found(name, "hoster link"))?;
            join(&cale.url, href.trim())
                .ok_or_else(|| ExtractError::malformed(name, format!("bad hoster link {}", href)))?
        };
        debug!(host = name, url = %hoster_url, "extracting");
        candidate
            .host
            .extract_file_url(&self.fetcher, &hoster_url)
            .await
    }

    /// Tries the episode's hosters one after another until one yields a file
    /// url. Failures of single hosters never escape, they only move the
    /// episode on to the next hoster.
    pub async fn resolve<O>(
        &self,
        episode_url: &str,
        order: &mut O,
        cancel: &CancellationToken,
    ) -> Resolution
    where
        O: TrialOrder + ?Sized,
    {
        let mut candidates = Vec::new();
        let mut failures = Vec::new();
        let mut state = State::Pending;
        loop {
            state = match state {
                State::Pending => {
                    let found = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Resolution::Cancelled,
                        found = self.candidates(episode_url, order) => found,
                    };
                    match found {
                        Ok(found) if !found.is_empty() => {
                            debug!(
                                url = episode_url,
                                order = ?found.iter().map(|c| c.host.name).collect::<Vec<_>>(),
                                "trial order"
                            );
                            candidates = found;
                            State::Trying(0)
                        }
                        Ok(_) => {
                            warn!(url = episode_url, "no supported hoster offered");
                            State::Exhausted
                        }
                        Err(err) => {
                            warn!(url = episode_url, "episode page unavailable: {}", err);
                            State::Exhausted
                        }
                    }
                }
                State::Trying(index) => {
                    let candidate = &candidates[index];
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Resolution::Cancelled,
                        result = self.attempt(candidate) => result,
                    };
                    match result {
                        Ok(link) => State::Resolved(link),
                        Err(error) => {
                            warn!(host = candidate.host.name, "{}", error);
                            failures.push(Failure {
                                host: candidate.host.name,
                                error,
                            });
                            if index + 1 < candidates.len() {
                                State::Trying(index + 1)
                            } else {
                                State::Exhausted
                            }
                        }
                    }
                }
                State::Resolved(link) => {
                    info!(host = link.host, url = %link.url, "resolved");
                    return Resolution::Resolved { link, failures };
                }
                State::Exhausted => return Resolution::Exhausted { failures },
            };
        }
    }
}
