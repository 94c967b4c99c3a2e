use std::{path::PathBuf, time::Duration};

use anyhow::{anyhow, Error};
use clap::ArgMatches;

use crate::{
    hoster,
    watchseries::{Order, DEFAULT_DOMAIN},
};

pub const DEFAULT_ARIA2_RPC: &str = "http://localhost:6800/jsonrpc";

pub fn is_number(test: String) -> Result<(), String> {
    test.parse::<u32>().map_err(|err| err.to_string())?;
    Ok(())
}

pub fn is_positive(test: String) -> Result<(), String> {
    match test.parse::<u32>() {
        Ok(0) => Err(String::from("Must be at least 1")),
        Ok(_) => Ok(()),
        Err(err) => Err(err.to_string()),
    }
}

pub fn is_range(test: String) -> Result<(), String> {
    let split: Vec<&str> = test.split(',').collect();
    if split.len() > 2 {
        Err(String::from("More than 2 numbers were entered"))?
    }
    for range in split {
        is_number(range.trim().to_owned())?
    }
    Ok(())
}

pub fn is_host_list(test: String) -> Result<(), String> {
    for name in test.split(',') {
        if hoster::by_name(name.trim()).is_none() {
            Err(format!("Unknown hoster \"{}\"", name.trim()))?
        }
    }
    Ok(())
}

pub fn parse_range(value: &str) -> Result<(u32, u32), Error> {
    let numbers = value
        .split(',')
        .map(|n| n.trim().parse::<u32>())
        .collect::<Result<Vec<u32>, _>>()?;
    match numbers.as_slice() {
        [single] => Ok((*single, *single)),
        [from, to] if from <= to => Ok((*from, *to)),
        [from, to] => Ok((*to, *from)),
        _ => Err(anyhow!("Invalid episode range \"{}\"", value)),
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub serie: String,
    pub domain: String,
    pub out: PathBuf,
    pub order: Order,
    pub season: Option<u32>,
    pub episodes: Option<(u32, u32)>,
    pub hosts: Vec<&'static str>,
    pub prefer: Vec<&'static str>,
    pub workers: usize,
    pub timeout: Duration,
    pub delay: Duration,
    pub seed: Option<u64>,
    pub aria2_rpc: String,
    pub aria2_secret: Option<String>,
    pub connections: u32,
    pub max_downloads: u32,
    pub dry_run: bool,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            serie: String::new(),
            domain: DEFAULT_DOMAIN.to_string(),
            out: PathBuf::from("."),
            order: Order::Ascending,
            season: None,
            episodes: None,
            hosts: hoster::HOSTS.iter().map(|h| h.name).collect(),
            prefer: Vec::new(),
            workers: 2,
            timeout: Duration::from_secs(30),
            delay: Duration::from_millis(0),
            seed: None,
            aria2_rpc: DEFAULT_ARIA2_RPC.to_string(),
            aria2_secret: None,
            connections: 4,
            max_downloads: 3,
            dry_run: false,
            verbose: false,
        }
    }
}

fn host_names(value: &str) -> Vec<&'static str> {
    value
        .split(',')
        .filter_map(|name| hoster::by_name(name.trim()))
        .map(|h| h.name)
        .collect()
}

fn number<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>, Error>
where
    T::Err: std::fmt::Display,
{
    matches
        .value_of(name)
        .map(|v| v.parse::<T>().map_err(|err| anyhow!("--{}: {}", name, err)))
        .transpose()
}

impl Config {
    pub fn from_matches(matches: &ArgMatches) -> Result<Config, Error> {
        let defaults = Config::default();
        Ok(Config {
            serie: matches
                .value_of("serie")
                .ok_or_else(|| anyhow!("No serie given"))?
                .to_string(),
            domain: matches
                .value_of("domain")
                .map(str::to_string)
                .unwrap_or(defaults.domain),
            out: matches.value_of("out").map(PathBuf::from).unwrap_or(defaults.out),
            order: matches
                .value_of("order")
                .map(Order::from_name)
                .unwrap_or(defaults.order),
            season: number(matches, "season")?,
            episodes: matches.value_of("episodes").map(parse_range).transpose()?,
            hosts: matches.value_of("hosts").map(host_names).unwrap_or(defaults.hosts),
            prefer: matches.value_of("prefer").map(host_names).unwrap_or_default(),
            workers: number(matches, "workers")?.unwrap_or(defaults.workers),
            timeout: number(matches, "timeout")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            delay: number(matches, "delay")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.delay),
            seed: number(matches, "seed")?,
            aria2_rpc: matches
                .value_of("aria2_rpc")
                .map(str::to_string)
                .unwrap_or(defaults.aria2_rpc),
            aria2_secret: matches
                .value_of("aria2_secret")
                .map(str::to_string)
                .or_else(|| std::env::var("ARIA2_SECRET").ok()),
            connections: number(matches, "connections")?.unwrap_or(defaults.connections),
            max_downloads: number(matches, "max_downloads")?.unwrap_or(defaults.max_downloads),
            dry_run: matches.is_present("dry_run"),
            verbose: matches.is_present("verbose"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validators() {
        assert!(is_number("12".to_string()).is_ok());
        assert!(is_number("x".to_string()).is_err());
        assert!(is_positive("0".to_string()).is_err());
        assert!(is_range("2,5".to_string()).is_ok());
        assert!(is_range("2,5,7".to_string()).is_err());
        assert!(is_host_list("gorillavid, novamov".to_string()).is_ok());
        assert!(is_host_list("youtube".to_string()).is_err());
    }

    #[test]
    fn ranges() {
        assert_eq!(parse_range("3").unwrap(), (3, 3));
        assert_eq!(parse_range("2,5").unwrap(), (2, 5));
        assert_eq!(parse_range("5,2").unwrap(), (2, 5));
        assert!(parse_range("a,2").is_err());
    }

    #[test]
    fn defaults_cover_every_hoster() {
        let config = Config::default();
        assert_eq!(config.hosts.len(), hoster::HOSTS.len());
        assert_eq!(config.order, Order::Ascending);
        assert_eq!(config.domain, DEFAULT_DOMAIN);
    }
}
