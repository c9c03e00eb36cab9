//! Login shell selection and child environment construction.

use std::collections::HashMap;

use crate::models::session::SessionKey;

// ── Environment allowlist ────────────────────────────────────────────────────

/// Variables inherited from the host environment by every PTY child.
///
/// Everything else is dropped; the spawner clears the environment before
/// applying the plan.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "SHELL",
    "EDITOR",
    "VISUAL",
    "PAGER",
    "TMPDIR",
    "SSH_AUTH_SOCK",
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "XDG_CACHE_HOME",
    "XDG_RUNTIME_DIR",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
    "PATHEXT",
];

/// Prefixes of inherited locale variables (`LANG`, `LANGUAGE`, `LC_*`).
const ALLOWED_ENV_PREFIXES: &[&str] = &["LC_", "LANG"];

/// Variable carrying the lane identifier into the child.
pub const LANE_ID_VAR: &str = "LANE_PTY_LANE_ID";

/// Variable carrying the rendered session key into the child.
pub const SESSION_KEY_VAR: &str = "LANE_PTY_SESSION_KEY";

fn is_allowed(name: &str) -> bool {
    ALLOWED_ENV_VARS.contains(&name)
        || ALLOWED_ENV_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

/// Keep only allowlisted variables from `vars`.
#[must_use]
pub fn filter_inherited(
    vars: impl IntoIterator<Item = (String, String)>,
) -> HashMap<String, String> {
    vars.into_iter().filter(|(name, _)| is_allowed(name)).collect()
}

/// Allowlisted variables from the current process environment.
#[must_use]
pub fn inherited_env() -> HashMap<String, String> {
    filter_inherited(std::env::vars())
}

/// Terminal capabilities plus the session's identity.
#[must_use]
pub fn base_env(key: &SessionKey) -> HashMap<String, String> {
    HashMap::from([
        ("TERM".to_owned(), "xterm-256color".to_owned()),
        ("COLORTERM".to_owned(), "truecolor".to_owned()),
        (LANE_ID_VAR.to_owned(), key.lane_id().to_owned()),
        (SESSION_KEY_VAR.to_owned(), key.to_string()),
    ])
}

// ── Shell selection ──────────────────────────────────────────────────────────

/// Platform fallback when neither an override nor `$SHELL` is available.
#[must_use]
pub fn platform_shell() -> &'static str {
    if cfg!(windows) {
        "powershell.exe"
    } else {
        "/bin/bash"
    }
}

/// Pick the login shell: configured override, then `$SHELL`, then the
/// platform default. Blank values are skipped.
#[must_use]
pub fn select_shell(configured: Option<&str>, env_shell: Option<&str>) -> String {
    let chosen = configured
        .map(str::trim)
        .filter(|shell| !shell.is_empty())
        .or_else(|| env_shell.map(str::trim).filter(|shell| !shell.is_empty()));
    match chosen {
        Some(shell) => shell.to_owned(),
        None => platform_shell().to_owned(),
    }
}

/// Arguments that start `shell` as an interactive login shell.
#[must_use]
pub fn login_args(shell: &str) -> Vec<String> {
    let file = shell.rsplit(['/', '\\']).next().unwrap_or(shell);
    let name = file.to_ascii_lowercase();
    let name = name.strip_suffix(".exe").unwrap_or(&name);

    match name {
        "bash" | "zsh" | "fish" => vec!["-l".to_owned(), "-i".to_owned()],
        "powershell" | "pwsh" => vec!["-NoLogo".to_owned()],
        _ => Vec::new(),
    }
}
