use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

use crate::{
    error::CatalogError,
    fetcher::{Fetch, Request},
    resolver::host_of,
};

pub const DEFAULT_DOMAIN: &str = "http://watchseriestv.to";

static SEASON_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)season\s*(\d+)"#).expect("valid season regex"));
static EPISODE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)episode\s*(\d+)[\s\-:.]*(.*)"#).expect("valid episode regex")
});
static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[/\\:*?"<>|\x00-\x1f]"#).expect("valid sanitize regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\s+"#).expect("valid whitespace regex"));

struct Selectors {
    title: Selector,
    season: Selector,
    heading: Selector,
    episode: Selector,
    name: Selector,
    link: Selector,
}

static SELECTORS: Lazy<Selectors> = Lazy::new(|| Selectors {
    title: Selector::parse("h1").expect("valid title selector"),
    season: Selector::parse("div[itemprop=season]").expect("valid season selector"),
    heading: Selector::parse("h2 span").expect("valid heading selector"),
    episode: Selector::parse(".listings li[itemprop=episode]").expect("valid episode selector"),
    name: Selector::parse("[itemprop=name]").expect("valid name selector"),
    link: Selector::parse("a[href]").expect("valid link selector"),
});

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Order {
    Ascending,
    Descending,
}

impl Order {
    pub fn from_name(name: &str) -> Order {
        match name {
            "desc" | "descending" => Order::Descending,
            _ => Order::Ascending,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Episode {
    pub season: u32,
    pub number: u32,
    pub title: String,
    /// `title` made safe to use as a file name.
    pub name: String,
    pub page_url: String,
}

impl Episode {
    pub fn basename(&self) -> String {
        format!("S{:02}E{:02} - {}", self.season, self.number, self.name)
    }

    pub fn season_dir(&self, series_dir: &Path) -> PathBuf {
        series_dir.join(format!("Season {:02}", self.season))
    }
}

#[derive(Clone, Debug)]
pub struct Series {
    pub title: String,
    pub episodes: Vec<Episode>,
}

impl Series {
    pub fn directory(&self, out: &Path) -> PathBuf {
        out.join(sanitize(&self.title))
    }

    /// Sorts seasons and, inside each season, episodes. Rows with equal
    /// numbers keep their page order.
    pub fn sort(&mut self, order: Order) {
        self.episodes.sort_by(|a, b| {
            let ordering = (a.season, a.number).cmp(&(b.season, b.number));
            match order {
                Order::Ascending => ordering,
                Order::Descending => ordering.reverse(),
            }
        });
    }

    pub fn retain(&mut self, season: Option<u32>, episodes: Option<(u32, u32)>) {
        self.episodes.retain(|episode| {
            season.map_or(true, |s| episode.season == s)
                && episodes.map_or(true, |(from, to)| {
                    episode.number >= from && episode.number <= to
                })
        });
    }
}

pub fn sanitize(name: &str) -> String {
    let collapsed = WHITESPACE.replace_all(name.trim(), " ");
    let replaced = UNSAFE_CHARS.replace_all(&collapsed, "_");
    let trimmed = replaced.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        String::from("unknown")
    } else {
        trimmed.to_string()
    }
}

pub fn parse_season_number(heading: &str) -> Result<u32, CatalogError> {
    SEASON_REGEX
        .captures(heading)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| CatalogError::MalformedSeason(heading.trim().to_string()))
}

/// Splits an episode name like `Episode 3 - The Buys` into number and title.
pub fn parse_episode_name(name: &str) -> Result<(u32, String), CatalogError> {
    let captures = EPISODE_REGEX
        .captures(name)
        .ok_or_else(|| CatalogError::MalformedEpisode(name.trim().to_string()))?;
    let number = captures[1]
        .parse()
        .map_err(|_| CatalogError::MalformedEpisode(name.trim().to_string()))?;
    let title = WHITESPACE.replace_all(captures[2].trim(), " ").to_string();
    let title = if title.is_empty() {
        format!("Episode {}", number)
    } else {
        title
    };
    Ok((number, title))
}

fn text_of(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn parse_episode(season: u32, row: ElementRef, page_url: &Url) -> Option<Episode> {
    let href = row.select(&SELECTORS.link).next()?.value().attr("href")?;
    let page_url = match page_url.join(href.trim()) {
        Ok(url) => url.to_string(),
        Err(err) => {
            warn!(href, "skipping episode with bad link: {}", err);
            return None;
        }
    };
    let raw_name = row
        .select(&SELECTORS.name)
        .next()
        .map(text_of)
        .unwrap_or_default();
    let (number, title) = match parse_episode_name(&raw_name) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(season, "{}", err);
            let title = WHITESPACE.replace_all(raw_name.trim(), " ").to_string();
            (0, if title.is_empty() { String::from("unknown") } else { title })
        }
    };
    Some(Episode {
        season,
        number,
        name: sanitize(&title),
        title,
        page_url,
    })
}

pub fn parse_series(slug: &str, page_url: &str, html: &str) -> Result<Series, Error> {
    let base = Url::parse(page_url).with_context(|| format!("invalid catalog url {}", page_url))?;
    let document = Html::parse_document(html);
    let title = document
        .select(&SELECTORS.title)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| slug.to_string());

    let mut episodes = Vec::new();
    for season_block in document.select(&SELECTORS.season) {
        let heading = season_block
            .select(&SELECTORS.heading)
            .next()
            .map(text_of)
            .unwrap_or_default();
        let season = match parse_season_number(&heading) {
            Ok(season) => season,
            Err(err) => {
                warn!("{}", err);
                0
            }
        };
        episodes.extend(
            season_block
                .select(&SELECTORS.episode)
                .filter_map(|row| parse_episode(season, row, &base)),
        );
    }
    Ok(Series {
        title,
        episodes,
    })
}

pub fn series_url(domain: &str, slug: &str) -> String {
    format!("{}/serie/{}", domain.trim_end_matches('/'), slug)
}

pub async fn fetch_series(fetcher: &dyn Fetch, domain: &str, slug: &str) -> Result<Series, Error> {
    let url = series_url(domain, slug);
    let page = fetcher
        .fetch(Request::get(&url, &host_of(&url)?))
        .await
        .with_context(|| format!("Failed to fetch catalog of \"{}\"", slug))?;
    parse_series(slug, &url, &page.body)
}
