use rand::{seq::SliceRandom, Rng};
use scraper::Html;

use crate::hoster::HostDescriptor;

/// The fixed set of hosters a run knows about.
#[derive(Clone, Debug)]
pub struct Registry {
    hosts: Vec<&'static HostDescriptor>,
}

impl Registry {
    pub fn new(hosts: Vec<&'static HostDescriptor>) -> Registry {
        Registry { hosts }
    }

    /// Hosters offered on the episode page, in registry order.
    pub fn applicable(&self, episode_page: &Html) -> Vec<&'static HostDescriptor> {
        self.hosts
            .iter()
            .copied()
            .filter(|host| host.matches(episode_page))
            .collect()
    }
}

/// Uniform permutation (Fisher-Yates) of the hosters an episode offers.
pub fn shuffle<R: Rng + ?Sized>(hosts: &mut [&'static HostDescriptor], rng: &mut R) {
    hosts.shuffle(rng);
}

/// Decides in which order an episode's hosters are tried.
pub trait TrialOrder {
    fn arrange(&mut self, hosts: &mut Vec<&'static HostDescriptor>);
}

/// Random order drawn from an episode-local generator.
pub struct Shuffled<R>(pub R);

impl<R: Rng> TrialOrder for Shuffled<R> {
    fn arrange(&mut self, hosts: &mut Vec<&'static HostDescriptor>) {
        shuffle(hosts, &mut self.0);
    }
}

/// Tries hosters by name in the given order, anything else goes last in
/// registry order.
#[derive(Clone, Debug)]
pub struct Preferred(pub Vec<&'static str>);

impl TrialOrder for Preferred {
    fn arrange(&mut self, hosts: &mut Vec<&'static HostDescriptor>) {
        let rank = |host: &&HostDescriptor| {
            self.0
                .iter()
                .position(|name| *name == host.name)
                .unwrap_or(usize::MAX)
        };
        hosts.sort_by_key(rank);
    }
}
