use std::time::Duration;

/// Parsed Cache-Control header directives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// Max age in seconds
    pub max_age: Option<Duration>,
    /// No-cache directive
    pub no_cache: bool,
    /// No-store directive
    pub no_store: bool,
    /// Must-revalidate directive
    pub must_revalidate: bool,
    /// Stale-while-revalidate window
    pub stale_while_revalidate: Option<Duration>,
}

impl CacheControl {
    /// Parse a `Cache-Control` header value; unknown directives are skipped
    pub fn parse(header: &str) -> Self {
        let mut cc = Self::default();
        for directive in header.split(',').map(str::trim) {
            let (name, value) = match directive.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (directive, None),
            };
            let seconds = value
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);

            match name.to_ascii_lowercase().as_str() {
                "no-cache" => cc.no_cache = true,
                "no-store" => cc.no_store = true,
                "must-revalidate" => cc.must_revalidate = true,
                "max-age" => cc.max_age = seconds,
                "stale-while-revalidate" => cc.stale_while_revalidate = seconds,
                _ => {}
            }
        }
        cc
    }

    /// Freshness lifetime the server asks for, if any.
    ///
    /// `no-cache` and `no-store` mean "revalidate on every use", i.e. zero.
    pub fn freshness(&self) -> Option<Duration> {
        if self.no_cache || self.no_store {
            return Some(Duration::ZERO);
        }
        self.max_age
    }
}
