pub const ALLOW_METHODS: &str = "GET,POST,OPTIONS";
pub const ALLOW_HEADERS: &str = "Content-Type, Authorization";
pub const MAX_AGE_SECONDS: &str = "86400";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorsPolicy {
    allowed_origins: Vec<String>,
}

impl CorsPolicy {
    /// Parses a comma separated origin list; blank entries are dropped.
    pub fn from_allowed_origins(raw: &str) -> Self {
        Self {
            allowed_origins: raw
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Headers to attach to every response. The origin is only echoed when
    /// it is in the allow list.
    pub fn headers_for(&self, origin: Option<&str>) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(5);
        if let Some(origin) = origin.filter(|origin| !origin.is_empty()) {
            if self.allowed_origins.iter().any(|allowed| allowed == origin) {
                headers.push(("access-control-allow-origin", origin.to_string()));
                headers.push(("vary", "Origin".to_string()));
            }
        }
        headers.push(("access-control-allow-methods", ALLOW_METHODS.to_string()));
        headers.push(("access-control-allow-headers", ALLOW_HEADERS.to_string()));
        headers.push(("access-control-max-age", MAX_AGE_SECONDS.to_string()));
        headers
    }
}
