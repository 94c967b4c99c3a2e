use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderValue;

static SET_COOKIE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*([^=;\s]+)=([^;]*)"#).expect("valid set-cookie regex"));

/// Cookies of a single extraction attempt. Hosters hand out a session cookie
/// on the wait page which has to be replayed with the form POST.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CookieJar {
    pub cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> CookieJar {
        CookieJar {
            cookies: Vec::new(),
        }
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> CookieJar {
        let mut jar = CookieJar::new();
        for (key, value) in pairs {
            jar.add_cookie(Cookie {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        jar
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.key == key)
            .map(|c| c.value.as_str())
    }

    pub fn add_cookie(&mut self, cookie: Cookie) {
        if cookie.value == "deleted" {
            self.cookies.retain(|c| c.key != cookie.key);
            return;
        }
        if let Some(duplicated_index) = self.cookies.iter().position(|c| c.key == cookie.key) {
            self.cookies.remove(duplicated_index);
        }
        self.cookies.push(cookie);
    }

    /// Later cookies win over the ones already in the jar.
    pub fn merge(&mut self, other: &CookieJar) {
        for cookie in &other.cookies {
            self.add_cookie(cookie.clone());
        }
    }

    pub fn serialize(&self) -> String {
        self.cookies
            .iter()
            .map(Cookie::serialize)
            .collect::<Vec<String>>()
            .join("; ")
    }

    /// Builds a jar from `Set-Cookie` headers, silently skipping values that
    /// are not valid utf-8 or carry no `key=value` pair.
    pub fn parse<'a, I>(headers: I) -> CookieJar
    where
        I: IntoIterator<Item = &'a HeaderValue>,
    {
        let mut cookie_jar = CookieJar::new();
        for header_value in headers {
            let header_value = match header_value.to_str() {
                Ok(value) => value,
                Err(_) => continue,
            };
            if let Some(captures) = SET_COOKIE_REGEX.captures(header_value) {
                cookie_jar.add_cookie(Cookie {
                    key: captures[1].to_string(),
                    value: captures[2].trim().to_string(),
                });
            }
        }
        cookie_jar
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cookie {
    pub key: String,
    pub value: String,
}

impl Cookie {
    pub fn serialize(&self) -> String {
        format!("{}={}", self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_cookie_headers() {
        let headers = vec![
            HeaderValue::from_static("xfss=abc123; path=/; domain=.gorillavid.in"),
            HeaderValue::from_static("lang=english; expires=Thu, 01 Jan 2030 00:00:00 GMT"),
            HeaderValue::from_static("; broken"),
        ];
        let jar = CookieJar::parse(headers.iter());
        assert_eq!(jar.get("xfss"), Some("abc123"));
        assert_eq!(jar.get("lang"), Some("english"));
        assert_eq!(jar.cookies.len(), 2);
    }

    #[test]
    fn merge_replaces_existing_keys() {
        let mut jar = CookieJar::from_pairs(&[("lang", "english"), ("aff", "1")]);
        let incoming = CookieJar::from_pairs(&[("lang", "german")]);
        jar.merge(&incoming);
        assert_eq!(jar.serialize(), "aff=1; lang=german");
    }

    #[test]
    fn deleted_value_drops_cookie() {
        let mut jar = CookieJar::from_pairs(&[("lang", "english"), ("aff", "1")]);
        jar.add_cookie(Cookie {
            key: "aff".to_string(),
            value: "deleted".to_string(),
        });
        assert_eq!(jar.serialize(), "lang=english");
    }

    #[test]
    fn empty_jar_serializes_to_nothing() {
        assert_eq!(CookieJar::new().serialize(), "");
        assert!(CookieJar::new().is_empty());
    }
}
