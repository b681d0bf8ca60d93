//! Resolution trace
//!
//! Every resolution step is emitted as a `tracing` debug event. Setting
//! `NODE_DEBUG=module` additionally prints Node-style lines to stderr;
//! `NODE_DEBUG=module,foo,bar` limits them to the named modules.

use colored::{ColoredString, Colorize};
use std::path::Path;
use std::sync::LazyLock;

static SETTINGS: LazyLock<DebugSettings> =
    LazyLock::new(|| DebugSettings::parse(std::env::var("NODE_DEBUG").ok().as_deref()));

/// Result of one resolution step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Cached,
    Loaded,
    Native,
    Ok,
    NotFound,
    Invalid,
    Fail,
    Fatal,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Cached => "cached",
            Outcome::Loaded => "loaded",
            Outcome::Native => "native",
            Outcome::Ok => "ok",
            Outcome::NotFound => "not found",
            Outcome::Invalid => "invalid",
            Outcome::Fail => "fail",
            Outcome::Fatal => "fatal",
        }
    }

    fn colored(self) -> ColoredString {
        let label = self.as_str();
        match self {
            Outcome::Cached | Outcome::Loaded | Outcome::Ok => label.green(),
            Outcome::Native => label.yellow(),
            Outcome::Invalid | Outcome::Fatal => label.red(),
            Outcome::NotFound => label.bright_black(),
            Outcome::Fail => label.normal(),
        }
    }
}

#[derive(Debug, Default)]
struct DebugSettings {
    enabled: bool,
    filter: Vec<String>,
}

impl DebugSettings {
    fn parse(raw: Option<&str>) -> Self {
        let mut parts = raw.unwrap_or_default().split(',').map(str::trim);
        let enabled = parts.next() == Some("module");
        let filter = parts
            .filter(|part| !part.is_empty())
            .map(String::from)
            .collect();
        Self { enabled, filter }
    }

    fn wants(&self, path: &Path) -> bool {
        self.enabled
            && (self.filter.is_empty() || self.filter.iter().any(|name| *name == module_name(path)))
    }
}

/// Name a trace line is filtered on: the containing directory for files with
/// an extension, the last segment otherwise
fn module_name(path: &Path) -> String {
    let target = match path.extension() {
        Some(_) => path.parent().unwrap_or(path),
        None => path,
    };
    target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(crate) fn record(path: &Path, outcome: Outcome) {
    tracing::debug!(
        target: "nodeloop::require",
        path = %path.display(),
        result = outcome.as_str(),
        "resolve"
    );

    let settings = &*SETTINGS;
    if settings.wants(path) {
        eprintln!("resolve {} ({})", path.display(), outcome.colored());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_debug() {
        let settings = DebugSettings::parse(Some("module"));
        assert!(settings.enabled);
        assert!(settings.filter.is_empty());

        let settings = DebugSettings::parse(Some("module, lodash ,express"));
        assert!(settings.enabled);
        assert_eq!(settings.filter, vec!["lodash", "express"]);

        assert!(!DebugSettings::parse(Some("http,module")).enabled);
        assert!(!DebugSettings::parse(None).enabled);
    }

    #[test]
    fn test_filter_by_module_name() {
        let settings = DebugSettings::parse(Some("module,lodash"));
        assert!(settings.wants(Path::new("/app/node_modules/lodash/index.js")));
        assert!(settings.wants(Path::new("/app/node_modules/lodash")));
        assert!(!settings.wants(Path::new("/app/node_modules/react/index.js")));

        let disabled = DebugSettings::default();
        assert!(!disabled.wants(Path::new("/app/node_modules/lodash")));
    }
}
