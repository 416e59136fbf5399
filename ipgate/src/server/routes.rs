use crate::restrict::Action;

/// How a request path is treated by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Internal route, never restricted.
    Bypass,
    Check(Action),
}

/// Bypassed and login path lists, compared after [`normalize_path`].
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    bypass: Vec<String>,
    login: Vec<String>,
}

impl RouteTable {
    pub fn new(bypass: Vec<String>, login: Vec<String>) -> Self {
        Self {
            bypass: bypass.iter().map(|p| normalize_path(p)).collect(),
            login: login.iter().map(|p| normalize_path(p)).collect(),
        }
    }

    pub fn classify(&self, path: &str) -> Route {
        let path = normalize_path(path);
        if self.bypass.contains(&path) {
            return Route::Bypass;
        }
        if self.login.contains(&path) {
            return Route::Check(Action::Login);
        }
        Route::Check(Action::Generic)
    }
}

/// Lower-cased path with empty segments dropped and no trailing slash.
///
/// `/Login/`, `//login` and `/login` all become `/login`; the root stays `/`.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(&seg.to_ascii_lowercase());
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}
